//! Error types for the client
//!
//! One error enum covers the whole download pipeline. The variants mirror
//! the blast radius of each failure: parse and initial-announce errors are
//! fatal, per-peer errors tear down one session, and piece-level errors
//! send the piece back to the pending set.

use std::fmt;

/// Crate-wide error type
#[derive(Debug, Clone)]
pub enum Error {
    /// Bencoding or metainfo malformed; fatal at startup
    Parse {
        message: String,
        source: Option<String>,
    },

    /// Tracker announce failed: non-200 status, malformed response, or a
    /// tracker-declared failure
    Tracker {
        message: String,
        url: Option<String>,
        source: Option<String>,
    },

    /// Connecting or handshaking with a peer failed; fatal for that peer only
    Handshake {
        message: String,
        peer: Option<String>,
        source: Option<String>,
    },

    /// Established peer session failed: read error, truncated or oversize
    /// frame, unknown message type; fatal for that peer only
    Session {
        message: String,
        peer: Option<String>,
        source: Option<String>,
    },

    /// Piece completed but its SHA-1 digest does not match the metainfo
    HashMismatch { piece: u32 },

    /// Block request retries were exhausted for a piece on this peer
    RequestExhausted { piece: u32, attempts: u32 },

    /// The operation was cancelled from above; terminal but not reportable
    Cancelled,
}

impl Error {
    /// Create a new Parse error
    pub fn parse(message: impl Into<String>) -> Self {
        Error::Parse {
            message: message.into(),
            source: None,
        }
    }

    /// Create a new Parse error with source detail
    pub fn parse_with_source(message: impl Into<String>, source: impl Into<String>) -> Self {
        Error::Parse {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Create a new Tracker error
    pub fn tracker(message: impl Into<String>) -> Self {
        Error::Tracker {
            message: message.into(),
            url: None,
            source: None,
        }
    }

    /// Create a new Tracker error with announce URL and source detail
    pub fn tracker_full(
        message: impl Into<String>,
        url: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        Error::Tracker {
            message: message.into(),
            url: Some(url.into()),
            source: Some(source.into()),
        }
    }

    /// Create a new Handshake error
    pub fn handshake(message: impl Into<String>) -> Self {
        Error::Handshake {
            message: message.into(),
            peer: None,
            source: None,
        }
    }

    /// Create a new Handshake error with peer address and source detail
    pub fn handshake_full(
        message: impl Into<String>,
        peer: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        Error::Handshake {
            message: message.into(),
            peer: Some(peer.into()),
            source: Some(source.into()),
        }
    }

    /// Create a new Session error
    pub fn session(message: impl Into<String>) -> Self {
        Error::Session {
            message: message.into(),
            peer: None,
            source: None,
        }
    }

    /// Create a new Session error with source detail
    pub fn session_with_source(message: impl Into<String>, source: impl Into<String>) -> Self {
        Error::Session {
            message: message.into(),
            peer: None,
            source: Some(source.into()),
        }
    }

    /// Attach a peer address to a Handshake or Session error
    pub fn with_peer(mut self, addr: impl Into<String>) -> Self {
        match &mut self {
            Error::Handshake { peer, .. } | Error::Session { peer, .. } => {
                *peer = Some(addr.into());
            }
            _ => {}
        }
        self
    }

    /// Whether this error is a cancellation rather than a real failure
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Parse { message, source } => {
                if let Some(src) = source {
                    write!(f, "parse error: {} ({})", message, src)
                } else {
                    write!(f, "parse error: {}", message)
                }
            }
            Error::Tracker {
                message,
                url,
                source,
            } => match (url, source) {
                (Some(u), Some(s)) => write!(f, "tracker error: {} (url: {}, {})", message, u, s),
                (Some(u), None) => write!(f, "tracker error: {} (url: {})", message, u),
                (None, Some(s)) => write!(f, "tracker error: {} ({})", message, s),
                (None, None) => write!(f, "tracker error: {}", message),
            },
            Error::Handshake {
                message,
                peer,
                source,
            } => match (peer, source) {
                (Some(p), Some(s)) => {
                    write!(f, "handshake error: {} (peer: {}, {})", message, p, s)
                }
                (Some(p), None) => write!(f, "handshake error: {} (peer: {})", message, p),
                (None, Some(s)) => write!(f, "handshake error: {} ({})", message, s),
                (None, None) => write!(f, "handshake error: {}", message),
            },
            Error::Session {
                message,
                peer,
                source,
            } => match (peer, source) {
                (Some(p), Some(s)) => write!(f, "session error: {} (peer: {}, {})", message, p, s),
                (Some(p), None) => write!(f, "session error: {} (peer: {})", message, p),
                (None, Some(s)) => write!(f, "session error: {} ({})", message, s),
                (None, None) => write!(f, "session error: {}", message),
            },
            Error::HashMismatch { piece } => {
                write!(f, "piece {} failed hash verification", piece)
            }
            Error::RequestExhausted { piece, attempts } => {
                write!(
                    f,
                    "gave up requesting blocks for piece {} after {} attempts",
                    piece, attempts
                )
            }
            Error::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::error::Error for Error {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_context() {
        let err = Error::handshake_full("info hash mismatch", "10.0.0.1:6881", "remote sent zeros");
        let text = err.to_string();
        assert!(text.contains("info hash mismatch"));
        assert!(text.contains("10.0.0.1:6881"));
    }

    #[test]
    fn test_with_peer_only_touches_peer_errors() {
        let err = Error::session("truncated frame").with_peer("10.0.0.2:51413");
        match err {
            Error::Session { peer, .. } => assert_eq!(peer.as_deref(), Some("10.0.0.2:51413")),
            _ => panic!("wrong variant"),
        }

        let err = Error::parse("bad integer").with_peer("10.0.0.2:51413");
        match err {
            Error::Parse { .. } => {}
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn test_is_cancelled() {
        assert!(Error::Cancelled.is_cancelled());
        assert!(!Error::parse("x").is_cancelled());
    }
}
