//! Decoded bencode values

use std::collections::BTreeMap;
use std::fmt;

/// A bencode dictionary. Keys are raw byte strings; the ordered map keeps
/// them in the canonical ascending byte order.
pub type Dict = BTreeMap<Vec<u8>, Value>;

/// A decoded bencode value
#[derive(Clone, PartialEq, Eq)]
pub enum Value {
    Int(i64),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    Dict(Dict),
}

impl Value {
    /// Get the integer value, if this is an integer
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Get the raw bytes, if this is a byte string
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Get the byte string as UTF-8 text, if it is one
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Bytes(b) => std::str::from_utf8(b).ok(),
            _ => None,
        }
    }

    /// Get the elements, if this is a list
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    /// Get the dictionary, if this is one
    pub fn as_dict(&self) -> Option<&Dict> {
        match self {
            Value::Dict(d) => Some(d),
            _ => None,
        }
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Bytes(s.as_bytes().to_vec())
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Bytes(b)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(i) => write!(f, "{}", i),
            // Torrent files mix text and binary strings; show text when we can
            Value::Bytes(b) => match std::str::from_utf8(b) {
                Ok(s) => write!(f, "{:?}", s),
                Err(_) => write!(f, "<{} bytes>", b.len()),
            },
            Value::List(l) => f.debug_list().entries(l).finish(),
            Value::Dict(d) => {
                let mut map = f.debug_map();
                for (k, v) in d {
                    match std::str::from_utf8(k) {
                        Ok(s) => map.key(&s),
                        Err(_) => map.key(&format_args!("<{} bytes>", k.len())),
                    };
                    map.value(v);
                }
                map.finish()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accessors_match_kind() {
        assert_eq!(Value::Int(7).as_int(), Some(7));
        assert_eq!(Value::Int(7).as_bytes(), None);

        let v = Value::from("spam");
        assert_eq!(v.as_bytes(), Some(b"spam".as_ref()));
        assert_eq!(v.as_str(), Some("spam"));
        assert_eq!(v.as_int(), None);

        let v = Value::Bytes(vec![0xff, 0xfe]);
        assert_eq!(v.as_str(), None);

        let v = Value::List(vec![Value::Int(1)]);
        assert_eq!(v.as_list().map(|l| l.len()), Some(1));
        assert_eq!(v.as_dict(), None);
    }
}
