//! Peer wire messages
//!
//! Every message after the handshake is a 4-byte big-endian length prefix
//! followed by a one-byte type and its payload. A zero-length frame is a
//! keep-alive.

use bytes::{Buf, BufMut, BytesMut};

use crate::error::Error;

/// The customary request size for one block of a piece (16 KiB)
pub const BLOCK_SIZE: u32 = 16 * 1024;

/// A block request: a contiguous byte range within one piece
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Block {
    pub piece_index: u32,
    pub begin: u32,
    pub length: u32,
}

/// Wire message type bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageId {
    Choke = 0,
    Unchoke = 1,
    Interested = 2,
    NotInterested = 3,
    Have = 4,
    Bitfield = 5,
    Request = 6,
    Piece = 7,
    Cancel = 8,
}

impl TryFrom<u8> for MessageId {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Error> {
        match value {
            0 => Ok(MessageId::Choke),
            1 => Ok(MessageId::Unchoke),
            2 => Ok(MessageId::Interested),
            3 => Ok(MessageId::NotInterested),
            4 => Ok(MessageId::Have),
            5 => Ok(MessageId::Bitfield),
            6 => Ok(MessageId::Request),
            7 => Ok(MessageId::Piece),
            8 => Ok(MessageId::Cancel),
            other => Err(Error::session(format!("unknown message type {}", other))),
        }
    }
}

/// A peer wire message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    KeepAlive,
    Choke,
    Unchoke,
    Interested,
    NotInterested,
    Have { piece_index: u32 },
    Bitfield { bits: Vec<u8> },
    Request(Block),
    Piece { index: u32, begin: u32, data: Vec<u8> },
    Cancel(Block),
}

impl Message {
    /// The message type byte, None for keep-alive
    pub fn message_id(&self) -> Option<MessageId> {
        match self {
            Message::KeepAlive => None,
            Message::Choke => Some(MessageId::Choke),
            Message::Unchoke => Some(MessageId::Unchoke),
            Message::Interested => Some(MessageId::Interested),
            Message::NotInterested => Some(MessageId::NotInterested),
            Message::Have { .. } => Some(MessageId::Have),
            Message::Bitfield { .. } => Some(MessageId::Bitfield),
            Message::Request(_) => Some(MessageId::Request),
            Message::Piece { .. } => Some(MessageId::Piece),
            Message::Cancel(_) => Some(MessageId::Cancel),
        }
    }

    /// The length-prefix value: type byte plus payload
    pub fn length(&self) -> u32 {
        match self {
            Message::KeepAlive => 0,
            Message::Choke
            | Message::Unchoke
            | Message::Interested
            | Message::NotInterested => 1,
            Message::Have { .. } => 5,
            Message::Bitfield { bits } => 1 + bits.len() as u32,
            Message::Request(_) | Message::Cancel(_) => 13,
            Message::Piece { data, .. } => 9 + data.len() as u32,
        }
    }

    /// Serialize to bytes, including the length prefix
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(4 + self.length() as usize);
        buf.put_u32(self.length());
        if let Some(id) = self.message_id() {
            buf.put_u8(id as u8);
        }
        match self {
            Message::KeepAlive
            | Message::Choke
            | Message::Unchoke
            | Message::Interested
            | Message::NotInterested => {}
            Message::Have { piece_index } => {
                buf.put_u32(*piece_index);
            }
            Message::Bitfield { bits } => {
                buf.put_slice(bits);
            }
            Message::Request(block) | Message::Cancel(block) => {
                buf.put_u32(block.piece_index);
                buf.put_u32(block.begin);
                buf.put_u32(block.length);
            }
            Message::Piece { index, begin, data } => {
                buf.put_u32(*index);
                buf.put_u32(*begin);
                buf.put_slice(data);
            }
        }
        buf.to_vec()
    }

    /// Parse one frame payload (type byte plus body, the length prefix
    /// already stripped). An empty payload is a keep-alive.
    pub fn parse(payload: &[u8]) -> Result<Self, Error> {
        if payload.is_empty() {
            return Ok(Message::KeepAlive);
        }
        let mut buf = payload;
        let id = MessageId::try_from(buf.get_u8())?;
        match id {
            MessageId::Choke => Ok(Message::Choke),
            MessageId::Unchoke => Ok(Message::Unchoke),
            MessageId::Interested => Ok(Message::Interested),
            MessageId::NotInterested => Ok(Message::NotInterested),
            MessageId::Have => {
                if buf.remaining() != 4 {
                    return Err(Error::session(format!(
                        "HAVE payload must be 4 bytes, got {}",
                        buf.remaining()
                    )));
                }
                Ok(Message::Have {
                    piece_index: buf.get_u32(),
                })
            }
            MessageId::Bitfield => Ok(Message::Bitfield {
                bits: buf.to_vec(),
            }),
            MessageId::Request | MessageId::Cancel => {
                if buf.remaining() != 12 {
                    return Err(Error::session(format!(
                        "{:?} payload must be 12 bytes, got {}",
                        id,
                        buf.remaining()
                    )));
                }
                let block = Block {
                    piece_index: buf.get_u32(),
                    begin: buf.get_u32(),
                    length: buf.get_u32(),
                };
                if id == MessageId::Request {
                    Ok(Message::Request(block))
                } else {
                    Ok(Message::Cancel(block))
                }
            }
            MessageId::Piece => {
                if buf.remaining() < 8 {
                    return Err(Error::session(format!(
                        "PIECE payload must be at least 8 bytes, got {}",
                        buf.remaining()
                    )));
                }
                let index = buf.get_u32();
                let begin = buf.get_u32();
                Ok(Message::Piece {
                    index,
                    begin,
                    data: buf.to_vec(),
                })
            }
        }
    }
}
