//! BitTorrent handshake
//!
//! 68 bytes on the wire: a length-prefixed protocol string, eight reserved
//! bytes, the info-hash, and the peer id. The exchange happens in two
//! logical halves; each side may send its peer id only after reading the
//! other's header.

use bytes::{BufMut, BytesMut};

use crate::error::Error;

/// BitTorrent protocol identifier string
pub const PROTOCOL_STRING: &[u8; 19] = b"BitTorrent protocol";

/// Length of the protocol string
pub const PSTRLEN: u8 = 19;

/// Bytes in the first half of the exchange: pstrlen + pstr + reserved +
/// info-hash
pub const HEADER_LEN: usize = 48;

/// Total handshake length including the peer id
pub const HANDSHAKE_LEN: usize = 68;

/// A complete handshake message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    pub info_hash: [u8; 20],
    pub peer_id: [u8; 20],
}

impl Handshake {
    pub fn new(info_hash: [u8; 20], peer_id: [u8; 20]) -> Self {
        Self { info_hash, peer_id }
    }

    /// Serialize the full 68-byte handshake
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(HANDSHAKE_LEN);
        buf.put_slice(&encode_header(&self.info_hash));
        buf.put_slice(&self.peer_id);
        buf.to_vec()
    }

    /// Deserialize and validate a full 68-byte handshake
    pub fn deserialize(data: &[u8]) -> Result<Self, Error> {
        if data.len() < HANDSHAKE_LEN {
            return Err(Error::handshake(format!(
                "handshake too short: expected {} bytes, got {}",
                HANDSHAKE_LEN,
                data.len()
            )));
        }
        let header: [u8; HEADER_LEN] = data[..HEADER_LEN].try_into().expect("length checked");
        let info_hash = decode_header(&header)?;
        let peer_id: [u8; 20] = data[HEADER_LEN..HANDSHAKE_LEN]
            .try_into()
            .expect("length checked");
        Ok(Self { info_hash, peer_id })
    }
}

/// Encode the first half of the handshake: pstrlen, protocol string, eight
/// zero reserved bytes, and the info-hash
pub fn encode_header(info_hash: &[u8; 20]) -> [u8; HEADER_LEN] {
    let mut buf = BytesMut::with_capacity(HEADER_LEN);
    buf.put_u8(PSTRLEN);
    buf.put_slice(PROTOCOL_STRING);
    buf.put_slice(&[0u8; 8]);
    buf.put_slice(info_hash);
    buf.as_ref().try_into().expect("header is 48 bytes")
}

/// Validate the first half of a remote handshake and extract its info-hash.
///
/// The reserved extension bits are ignored; this client negotiates none.
pub fn decode_header(header: &[u8; HEADER_LEN]) -> Result<[u8; 20], Error> {
    if header[0] != PSTRLEN {
        return Err(Error::handshake(format!(
            "invalid protocol string length: expected {}, got {}",
            PSTRLEN, header[0]
        )));
    }
    if &header[1..20] != PROTOCOL_STRING {
        return Err(Error::handshake("invalid protocol string"));
    }
    let info_hash: [u8; 20] = header[28..48].try_into().expect("header is 48 bytes");
    Ok(info_hash)
}
