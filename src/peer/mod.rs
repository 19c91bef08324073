//! Peers
//!
//! Peer identity, the per-peer wire session, and the worker that drives
//! one peer toward its assigned pieces.

pub mod id;
pub mod retry;
pub mod session;
pub mod worker;

// Re-export main types
pub use id::{PeerId, PeerInfo};
pub use retry::retry_with_backoff;
pub use session::PeerSession;
pub use worker::{PieceCallback, Worker};
