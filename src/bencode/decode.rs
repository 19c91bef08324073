//! Bencode decoder

use crate::bencode::value::{Dict, Value};
use crate::error::Error;

/// Decode a single value from `input`, requiring that the whole slice is
/// consumed.
pub fn decode(input: &[u8]) -> Result<Value, Error> {
    let mut decoder = Decoder::new(input);
    let value = decoder.decode_value()?;
    if decoder.position() != input.len() {
        return Err(Error::parse(format!(
            "trailing bytes after value (consumed {} of {})",
            decoder.position(),
            input.len()
        )));
    }
    Ok(value)
}

/// Streaming decoder over a byte slice.
///
/// `decode_value` advances the cursor exactly past one value on success;
/// on failure the cursor position is unspecified, so decode from a fresh
/// view after an error.
pub struct Decoder<'a> {
    input: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    pub fn new(input: &'a [u8]) -> Self {
        Self { input, pos: 0 }
    }

    /// Bytes consumed so far
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Decode the next value, dispatching on its first byte
    pub fn decode_value(&mut self) -> Result<Value, Error> {
        match self.peek() {
            Some(b'i') => self.decode_int(),
            Some(b'l') => self.decode_list(),
            Some(b'd') => self.decode_dict(),
            Some(b'0'..=b'9') => self.decode_bytes(),
            Some(other) => Err(Error::parse(format!(
                "unrecognized prefix 0x{:02x} at offset {}",
                other, self.pos
            ))),
            None => Err(Error::parse("truncated input: expected a value")),
        }
    }

    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn next(&mut self) -> Result<u8, Error> {
        let b = self
            .peek()
            .ok_or_else(|| Error::parse("truncated input"))?;
        self.pos += 1;
        Ok(b)
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], Error> {
        if self.input.len() - self.pos < n {
            return Err(Error::parse(
                "declared string length does not match remaining input",
            ));
        }
        let slice = &self.input[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn decode_int(&mut self) -> Result<Value, Error> {
        self.next()?; // consume 'i'

        let negative = if self.peek() == Some(b'-') {
            self.next()?;
            true
        } else {
            false
        };

        let digits_start = self.pos;
        while matches!(self.peek(), Some(b'0'..=b'9')) {
            self.next()?;
        }
        let digits = &self.input[digits_start..self.pos];

        match self.next()? {
            b'e' => {}
            _ => return Err(Error::parse("integer not terminated by 'e'")),
        }

        if digits.is_empty() {
            return Err(Error::parse("integer has no digits"));
        }
        // Canonical form: no zero padding, and zero is never negative
        if digits.len() > 1 && digits[0] == b'0' {
            return Err(Error::parse("integer has a leading zero"));
        }
        if negative && digits == b"0" {
            return Err(Error::parse("negative zero is not a valid integer"));
        }

        let text = std::str::from_utf8(digits).expect("digits are ascii");
        let magnitude: i64 = if negative {
            format!("-{}", text)
                .parse()
                .map_err(|_| Error::parse("integer does not fit in 64 bits"))?
        } else {
            text.parse()
                .map_err(|_| Error::parse("integer does not fit in 64 bits"))?
        };

        Ok(Value::Int(magnitude))
    }

    fn decode_bytes(&mut self) -> Result<Value, Error> {
        let len_start = self.pos;
        while matches!(self.peek(), Some(b'0'..=b'9')) {
            self.next()?;
        }
        let len_digits = &self.input[len_start..self.pos];
        if len_digits.is_empty() {
            return Err(Error::parse("string encoding must start with its length"));
        }

        match self.next()? {
            b':' => {}
            _ => return Err(Error::parse("string length not terminated by ':'")),
        }

        let len: usize = std::str::from_utf8(len_digits)
            .expect("digits are ascii")
            .parse()
            .map_err(|_| Error::parse("string length does not fit in memory"))?;

        Ok(Value::Bytes(self.take(len)?.to_vec()))
    }

    fn decode_list(&mut self) -> Result<Value, Error> {
        self.next()?; // consume 'l'
        let mut items = Vec::new();
        loop {
            match self.peek() {
                Some(b'e') => {
                    self.next()?;
                    return Ok(Value::List(items));
                }
                Some(_) => items.push(self.decode_value()?),
                None => return Err(Error::parse("truncated input: unterminated list")),
            }
        }
    }

    fn decode_dict(&mut self) -> Result<Value, Error> {
        self.next()?; // consume 'd'
        let mut dict = Dict::new();
        loop {
            match self.peek() {
                Some(b'e') => {
                    self.next()?;
                    return Ok(Value::Dict(dict));
                }
                Some(b'0'..=b'9') => {
                    let key = match self.decode_bytes()? {
                        Value::Bytes(k) => k,
                        _ => unreachable!(),
                    };
                    let value = self.decode_value()?;
                    dict.insert(key, value);
                }
                Some(_) => return Err(Error::parse("dictionary key must be a string")),
                None => return Err(Error::parse("truncated input: unterminated dictionary")),
            }
        }
    }
}
