//! Peer identity

use std::fmt;
use std::net::{IpAddr, SocketAddr};

use rand::Rng;

use crate::error::Error;

/// Peer ids are always exactly 20 bytes
pub const PEER_ID_LEN: usize = 20;

/// A fixed 20-byte peer identifier, compared by value
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId([u8; PEER_ID_LEN]);

impl PeerId {
    /// Generate a fresh id: a readable client prefix followed by random
    /// alphanumerics. Done once per process at startup.
    pub fn generate() -> Self {
        const CHARS: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
        let mut id = [0u8; PEER_ID_LEN];
        id[..8].copy_from_slice(b"-BP0001-");
        let mut rng = rand::thread_rng();
        for byte in id[8..].iter_mut() {
            *byte = CHARS[rng.gen_range(0..CHARS.len())];
        }
        PeerId(id)
    }

    /// Parse an id from raw bytes, e.g. out of a tracker response
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        let id: [u8; PEER_ID_LEN] = bytes
            .try_into()
            .map_err(|_| Error::parse(format!("peer id must be 20 bytes, got {}", bytes.len())))?;
        Ok(PeerId(id))
    }

    pub fn as_bytes(&self) -> &[u8; PEER_ID_LEN] {
        &self.0
    }
}

impl From<[u8; PEER_ID_LEN]> for PeerId {
    fn from(bytes: [u8; PEER_ID_LEN]) -> Self {
        PeerId(bytes)
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Ids are conventionally mostly printable; fall back to hex
        if self.0.iter().all(|b| b.is_ascii_graphic()) {
            write!(f, "{}", String::from_utf8_lossy(&self.0))
        } else {
            write!(f, "{}", hex::encode(self.0))
        }
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({})", self)
    }
}

/// Where and who a peer is, as reported by the tracker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerInfo {
    pub id: PeerId,
    pub ip: IpAddr,
    pub port: u16,
}

impl PeerInfo {
    pub fn new(id: PeerId, ip: IpAddr, port: u16) -> Self {
        Self { id, ip, port }
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_has_prefix_and_length() {
        let id = PeerId::generate();
        assert_eq!(&id.as_bytes()[..8], b"-BP0001-");
        assert!(id.as_bytes()[8..].iter().all(|b| b.is_ascii_alphanumeric()));
    }

    #[test]
    fn test_generate_is_not_constant() {
        assert_ne!(PeerId::generate(), PeerId::generate());
    }

    #[test]
    fn test_from_bytes_requires_exact_length() {
        assert!(PeerId::from_bytes(&[1u8; 20]).is_ok());
        assert!(PeerId::from_bytes(&[1u8; 19]).is_err());
        assert!(PeerId::from_bytes(&[1u8; 21]).is_err());
    }

    #[test]
    fn test_display_printable_and_binary() {
        let id = PeerId::from_bytes(b"-BP0001-abcdefghijkl").unwrap();
        assert_eq!(id.to_string(), "-BP0001-abcdefghijkl");

        let id = PeerId::from([0u8; 20]);
        assert_eq!(id.to_string(), hex::encode([0u8; 20]));
    }

    #[test]
    fn test_socket_addr() {
        let info = PeerInfo::new(PeerId::from([1u8; 20]), "10.1.2.3".parse().unwrap(), 6881);
        assert_eq!(info.socket_addr().to_string(), "10.1.2.3:6881");
    }
}
