//! Torrent file parser
//!
//! Decodes the bencoded descriptor, validates the required keys, and
//! derives the info-hash from the canonical re-encoding of the info
//! dictionary.

use sha1::{Digest, Sha1};
use tracing::{debug, info};
use url::Url;

use crate::bencode::{self, Dict, Value};
use crate::error::Error;
use crate::torrent::info::{FileEntry, Metainfo};

/// SHA-1 digest size; the `pieces` string is a concatenation of these
const HASH_LEN: usize = 20;

/// Parser for `.torrent` descriptors
pub struct TorrentParser;

impl TorrentParser {
    /// Parse a torrent descriptor from raw bytes
    pub fn parse_bytes(data: &[u8]) -> Result<Metainfo, Error> {
        debug!("parsing torrent descriptor from {} bytes", data.len());

        let root = bencode::decode(data)
            .map_err(|e| Error::parse_with_source("invalid bencoding", e.to_string()))?;
        let root = root
            .as_dict()
            .ok_or_else(|| Error::parse("torrent descriptor must be a dictionary"))?;

        let announce_raw = get_str(root, b"announce")
            .ok_or_else(|| Error::parse("missing announce url"))?;
        let announce = Url::parse(announce_raw)
            .map_err(|e| Error::parse_with_source("invalid announce url", e.to_string()))?;

        let info_value = root
            .get(b"info".as_ref())
            .ok_or_else(|| Error::parse("missing info dictionary"))?;
        let info_dict = info_value
            .as_dict()
            .ok_or_else(|| Error::parse("info must be a dictionary"))?;

        let name = get_str(info_dict, b"name")
            .ok_or_else(|| Error::parse("missing name"))?
            .to_string();

        let piece_length = info_dict
            .get(b"piece length".as_ref())
            .and_then(Value::as_int)
            .ok_or_else(|| Error::parse("missing piece length"))?;
        if piece_length <= 0 {
            return Err(Error::parse("piece length must be positive"));
        }
        // piece sizes travel as u32 on the wire
        if piece_length > u32::MAX as i64 {
            return Err(Error::parse("piece length too large"));
        }
        let piece_length = piece_length as u64;

        let pieces = info_dict
            .get(b"pieces".as_ref())
            .and_then(Value::as_bytes)
            .ok_or_else(|| Error::parse("missing piece hashes"))?;
        if pieces.len() % HASH_LEN != 0 {
            return Err(Error::parse(format!(
                "pieces length {} is not a multiple of {}",
                pieces.len(),
                HASH_LEN
            )));
        }
        let hashes: Vec<[u8; 20]> = pieces
            .chunks_exact(HASH_LEN)
            .map(|chunk| chunk.try_into().expect("chunks are 20 bytes"))
            .collect();

        let files = Self::parse_files(info_dict, &name)?;
        let total_size: u64 = files.iter().map(|f| f.length).sum();
        if total_size == 0 {
            return Err(Error::parse("torrent content is empty"));
        }

        let expected_pieces = total_size.div_ceil(piece_length) as usize;
        if expected_pieces != hashes.len() {
            return Err(Error::parse(format!(
                "{} bytes in {}-byte pieces needs {} hashes, descriptor has {}",
                total_size,
                piece_length,
                expected_pieces,
                hashes.len()
            )));
        }

        let info_hash = Self::hash_info(info_value);

        info!(
            name = %name,
            pieces = hashes.len(),
            total = total_size,
            "parsed torrent descriptor"
        );

        Ok(Metainfo {
            announce,
            name,
            piece_length,
            total_size,
            files,
            hashes,
            info: info_value.clone(),
            info_hash,
        })
    }

    /// Parse a torrent descriptor from a file path
    pub fn parse_file(path: &std::path::Path) -> Result<Metainfo, Error> {
        info!("loading torrent descriptor from {}", path.display());
        let data = std::fs::read(path).map_err(|e| {
            Error::parse_with_source(
                format!("failed to read {}", path.display()),
                e.to_string(),
            )
        })?;
        Self::parse_bytes(&data)
    }

    /// SHA-1 over the canonical re-encoding of the info dictionary
    fn hash_info(info: &Value) -> [u8; 20] {
        let mut hasher = Sha1::new();
        hasher.update(bencode::encode(info));
        hasher.finalize().into()
    }

    /// Exactly one of `length` (single file) or `files` (multi file) must
    /// be present; single-file mode becomes a one-entry list
    fn parse_files(info: &Dict, name: &str) -> Result<Vec<FileEntry>, Error> {
        let length = info.get(b"length".as_ref());
        let files = info.get(b"files".as_ref());

        match (length, files) {
            (Some(_), Some(_)) => Err(Error::parse(
                "info has both length and files; exactly one is allowed",
            )),
            (Some(length), None) => {
                let length = length
                    .as_int()
                    .filter(|l| *l > 0)
                    .ok_or_else(|| Error::parse("length must be a positive integer"))?;
                Ok(vec![FileEntry {
                    length: length as u64,
                    path: vec![name.to_string()],
                }])
            }
            (None, Some(files)) => {
                let files = files
                    .as_list()
                    .ok_or_else(|| Error::parse("files must be a list"))?;
                if files.is_empty() {
                    return Err(Error::parse("files list is empty"));
                }
                files.iter().map(Self::parse_file_entry).collect()
            }
            (None, None) => Err(Error::parse(
                "info has neither length nor files; exactly one is required",
            )),
        }
    }

    fn parse_file_entry(entry: &Value) -> Result<FileEntry, Error> {
        let entry = entry
            .as_dict()
            .ok_or_else(|| Error::parse("file entry must be a dictionary"))?;
        let length = entry
            .get(b"length".as_ref())
            .and_then(Value::as_int)
            .filter(|l| *l >= 0)
            .ok_or_else(|| Error::parse("file entry is missing its length"))?;
        let path = entry
            .get(b"path".as_ref())
            .and_then(Value::as_list)
            .ok_or_else(|| Error::parse("file entry is missing its path"))?;
        let path: Vec<String> = path
            .iter()
            .map(|component| {
                component
                    .as_str()
                    .map(str::to_string)
                    .ok_or_else(|| Error::parse("file path component is not a string"))
            })
            .collect::<Result<_, _>>()?;
        if path.is_empty() {
            return Err(Error::parse("file path is empty"));
        }
        Ok(FileEntry {
            length: length as u64,
            path,
        })
    }
}

fn get_str<'a>(dict: &'a Dict, key: &[u8]) -> Option<&'a str> {
    dict.get(key).and_then(Value::as_str)
}
