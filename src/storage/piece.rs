//! Per-piece assembly state
//!
//! A piece is downloaded block by block into one contiguous buffer, with a
//! presence slot per block. Hashing at completion is a single pass over
//! the buffer, and a retry after corruption only clears the slots.

use sha1::{Digest, Sha1};

use crate::error::Error;
use crate::protocol::message::{Block, BLOCK_SIZE};

/// Assembly state for one piece of the torrent
#[derive(Debug, Clone)]
pub struct Piece {
    index: u32,
    size: u32,
    block_size: u32,
    hash: [u8; 20],
    present: Vec<bool>,
    payload: Vec<u8>,
}

impl Piece {
    /// Create a fresh piece with the customary 16 KiB block size
    pub fn new(index: u32, size: u32, hash: [u8; 20]) -> Self {
        Self::with_block_size(index, size, BLOCK_SIZE, hash)
    }

    pub fn with_block_size(index: u32, size: u32, block_size: u32, hash: [u8; 20]) -> Self {
        assert!(size > 0, "piece size must be positive");
        assert!(block_size > 0, "block size must be positive");
        let num_blocks = size.div_ceil(block_size) as usize;
        Self {
            index,
            size,
            block_size,
            hash,
            present: vec![false; num_blocks],
            payload: vec![0u8; size as usize],
        }
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn hash(&self) -> [u8; 20] {
        self.hash
    }

    pub fn num_blocks(&self) -> usize {
        self.present.len()
    }

    /// The scheduled block at slot `slot`; only the last block may be
    /// shorter than the block size
    fn block_at(&self, slot: usize) -> Block {
        debug_assert!(slot < self.num_blocks());
        let begin = slot as u32 * self.block_size;
        let length = std::cmp::min(self.block_size, self.size - begin);
        Block {
            piece_index: self.index,
            begin,
            length,
        }
    }

    /// Blocks not yet written, smallest offset first
    pub fn missing_blocks(&self) -> Vec<Block> {
        self.present
            .iter()
            .enumerate()
            .filter(|(_, present)| !**present)
            .map(|(slot, _)| self.block_at(slot))
            .collect()
    }

    /// Copy one block's payload into the piece buffer.
    ///
    /// The block must sit exactly on this piece's schedule and the payload
    /// length must match the block.
    pub fn add_block(&mut self, block: Block, payload: &[u8]) -> Result<(), Error> {
        if block.piece_index != self.index {
            return Err(Error::session(format!(
                "block for piece {} written into piece {}",
                block.piece_index, self.index
            )));
        }
        if block.begin % self.block_size != 0 {
            return Err(Error::session(format!(
                "block offset {} is not on the {}-byte schedule",
                block.begin, self.block_size
            )));
        }
        let slot = (block.begin / self.block_size) as usize;
        if slot >= self.num_blocks() || block != self.block_at(slot) {
            return Err(Error::session(format!(
                "block at offset {} with length {} does not match the piece schedule",
                block.begin, block.length
            )));
        }
        if payload.len() != block.length as usize {
            return Err(Error::session(format!(
                "block payload is {} bytes, declared {}",
                payload.len(),
                block.length
            )));
        }

        let begin = block.begin as usize;
        self.payload[begin..begin + payload.len()].copy_from_slice(payload);
        self.present[slot] = true;
        Ok(())
    }

    /// Whether every block slot has been written
    pub fn is_complete(&self) -> bool {
        self.present.iter().all(|present| *present)
    }

    /// A piece is valid when it is complete and its SHA-1 matches the
    /// metainfo digest
    pub fn verify(&self) -> bool {
        if !self.is_complete() {
            return false;
        }
        let mut hasher = Sha1::new();
        hasher.update(&self.payload);
        let digest: [u8; 20] = hasher.finalize().into();
        digest == self.hash
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Consume the piece, keeping only its assembled payload
    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }

    /// Mark every block absent again; the buffer is kept so a retry does
    /// not reallocate
    pub fn reset(&mut self) {
        self.present.fill(false);
    }
}
