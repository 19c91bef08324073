//! Bencoding codec
//!
//! The self-describing encoding used for torrent metainfo files and
//! tracker responses. Four value kinds: integers, byte strings, lists, and
//! dictionaries with byte-string keys. Dictionaries encode with their keys
//! in ascending byte order; the info-hash is computed over that canonical
//! form, so the encoder must be deterministic all the way down.

mod decode;
mod encode;
mod value;

pub use decode::{decode, Decoder};
pub use encode::encode;
pub use value::{Dict, Value};
