//! Parsed torrent descriptor

use url::Url;

use crate::bencode::Value;

/// One file in the torrent's content
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// File size in bytes
    pub length: u64,
    /// Path components below the torrent's root name
    pub path: Vec<String>,
}

/// A parsed torrent descriptor, immutable after parse.
///
/// `info` is the exact decoded info dictionary, retained so that its
/// canonical re-encoding reproduces the bytes the info-hash was computed
/// over, including any keys this client does not otherwise consume.
#[derive(Debug, Clone)]
pub struct Metainfo {
    /// HTTP(S) tracker announce URL
    pub announce: Url,
    /// Suggested root name
    pub name: String,
    /// Size of each piece except possibly the last
    pub piece_length: u64,
    /// Sum of all file sizes
    pub total_size: u64,
    /// Content files; a single-file torrent is one entry
    pub files: Vec<FileEntry>,
    /// One SHA-1 digest per piece
    pub hashes: Vec<[u8; 20]>,
    /// The decoded info dictionary, verbatim
    pub info: Value,
    /// SHA-1 of the canonical encoding of `info`
    pub info_hash: [u8; 20],
}

impl Metainfo {
    /// Number of pieces
    pub fn piece_count(&self) -> usize {
        self.hashes.len()
    }

    /// Actual size of piece `index`; the final piece may be short
    pub fn piece_size(&self, index: u32) -> u64 {
        let start = self.piece_offset(index);
        let end = std::cmp::min(start + self.piece_length, self.total_size);
        end.saturating_sub(start)
    }

    /// Byte offset of piece `index` within the whole content
    pub fn piece_offset(&self, index: u32) -> u64 {
        index as u64 * self.piece_length
    }

    /// Expected SHA-1 digest of piece `index`
    pub fn piece_hash(&self, index: u32) -> Option<[u8; 20]> {
        self.hashes.get(index as usize).copied()
    }

    /// Info-hash rendered as lowercase hex
    pub fn info_hash_hex(&self) -> String {
        hex::encode(self.info_hash)
    }

    /// Upper bound for a single wire frame from a peer of this torrent:
    /// the largest legitimate payload is a full-piece PIECE message or the
    /// remote bitfield, whichever is bigger
    pub fn max_frame_payload(&self) -> usize {
        let bitfield_len = self.piece_count().div_ceil(8);
        std::cmp::max(self.piece_length as usize, bitfield_len) + 16
    }
}
