//! Piece assembly and delivery
//!
//! In-memory bookkeeping for pieces under download and the sink seam
//! through which validated payloads leave the core. Persisting payloads
//! anywhere is the sink implementor's business.

pub mod piece;
pub mod sink;

// Re-export main types
pub use piece::Piece;
pub use sink::{MemorySink, PieceSink};
