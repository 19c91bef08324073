//! bitpull
//!
//! A BitTorrent v1 leech client: parse a torrent descriptor, announce to
//! its HTTP tracker, and download and verify every piece from the swarm.
//! Validated piece payloads are delivered in memory through a sink trait;
//! what happens to them after that is the caller's business.

pub mod bencode;
pub mod cli;
pub mod download;
pub mod error;
pub mod peer;
pub mod protocol;
pub mod storage;
pub mod torrent;
pub mod tracker;

pub use error::Error;

pub use bencode::Value;
pub use download::{DownloadConfig, Downloader, ProgressSnapshot};
pub use peer::{PeerId, PeerInfo, PeerSession, Worker};
pub use protocol::{Bitfield, Block, Handshake, Message};
pub use storage::{MemorySink, Piece, PieceSink};
pub use torrent::{Metainfo, TorrentParser};
pub use tracker::TrackerClient;
pub use cli::{CliArgs, DownloadStats, ProgressDisplay};
