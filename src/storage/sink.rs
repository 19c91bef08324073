//! Validated-piece delivery
//!
//! The download core hands every verified piece payload to a `PieceSink`
//! and never touches a filesystem itself. Callers decide whether payloads
//! go to disk, memory, or somewhere stranger.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;

/// Destination for validated piece payloads
#[async_trait]
pub trait PieceSink: Send + Sync {
    /// Accept one verified piece. Called at most once per piece index.
    async fn deliver(&self, piece_index: u32, payload: Bytes) -> anyhow::Result<()>;

    /// Called once after every piece has been delivered
    async fn finish(&self) -> anyhow::Result<()>;
}

/// Sink that keeps every payload in memory, keyed by piece index
#[derive(Debug, Default)]
pub struct MemorySink {
    pieces: Mutex<BTreeMap<u32, Bytes>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of pieces delivered so far
    pub fn len(&self) -> usize {
        self.pieces.lock().expect("sink lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove and return everything delivered, ordered by piece index
    pub fn take_pieces(&self) -> BTreeMap<u32, Bytes> {
        std::mem::take(&mut *self.pieces.lock().expect("sink lock poisoned"))
    }
}

#[async_trait]
impl PieceSink for MemorySink {
    async fn deliver(&self, piece_index: u32, payload: Bytes) -> anyhow::Result<()> {
        self.pieces
            .lock()
            .expect("sink lock poisoned")
            .insert(piece_index, payload);
        Ok(())
    }

    async fn finish(&self) -> anyhow::Result<()> {
        Ok(())
    }
}
