//! Peer wire protocol
//!
//! Handshake, framed messages, and the compact piece-presence bitfield.

pub mod bitfield;
pub mod handshake;
pub mod message;
pub mod wire;

// Re-export main types
pub use bitfield::Bitfield;
pub use handshake::{Handshake, PROTOCOL_STRING, PSTRLEN};
pub use message::{Block, Message, MessageId, BLOCK_SIZE};
pub use wire::{read_frame, write_frame};
