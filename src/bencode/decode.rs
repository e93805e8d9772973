//! Defensive bencode decoding.
//!
//! The decoder is liberal about key order (unsorted dictionaries are accepted
//! and reported as lints) but strict about everything that could exhaust
//! memory or stack: declared lengths are checked against a bound before any
//! allocation and nesting depth is capped.

use super::value::{Dict, Value};
use crate::error::ParseError;

/// Default maximum container nesting.
pub const DEFAULT_MAX_DEPTH: usize = 64;

/// Default maximum byte-string length (matches the default frame bound).
pub const DEFAULT_MAX_LENGTH: usize = 16 * 1024 * 1024;

/// Limits and policy for a decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeOptions {
    /// Maximum nesting of lists/dictionaries.
    pub max_depth: usize,
    /// Maximum declared byte-string length.
    pub max_length: usize,
    /// Reject unsorted dictionary keys instead of flagging them.
    pub strict: bool,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            max_length: DEFAULT_MAX_LENGTH,
            strict: false,
        }
    }
}

/// Non-fatal irregularity seen while decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeLint {
    /// A dictionary key sorted before its predecessor.
    UnsortedKeys { offset: usize },
}

/// Result of a successful decode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decoded {
    pub value: Value,
    pub consumed: usize,
    pub lints: Vec<DecodeLint>,
}

impl Decoded {
    /// True when the input was in canonical form.
    pub fn is_canonical(&self) -> bool {
        self.lints.is_empty()
    }
}

impl DecodeOptions {
    pub fn strict() -> Self {
        Self {
            strict: true,
            ..Self::default()
        }
    }

    /// Decode one value from the front of `input`.
    pub fn decode(&self, input: &[u8]) -> Result<Decoded, ParseError> {
        let mut parser = Parser {
            input,
            pos: 0,
            opts: self,
            lints: Vec::new(),
        };
        let value = parser.value(0)?;
        Ok(Decoded {
            value,
            consumed: parser.pos,
            lints: parser.lints,
        })
    }

    /// Decode a value that must span all of `input`.
    pub fn decode_exact(&self, input: &[u8]) -> Result<Decoded, ParseError> {
        let decoded = self.decode(input)?;
        if decoded.consumed != input.len() {
            return Err(ParseError::malformed(decoded.consumed, "trailing bytes after value"));
        }
        Ok(decoded)
    }
}

/// Decode one value with default limits, returning it and the bytes consumed.
pub fn decode(input: &[u8]) -> Result<(Value, usize), ParseError> {
    let decoded = DecodeOptions::default().decode(input)?;
    Ok((decoded.value, decoded.consumed))
}

/// Decode a value that must span all of `input`, with default limits.
pub fn decode_exact(input: &[u8]) -> Result<Value, ParseError> {
    DecodeOptions::default().decode_exact(input).map(|d| d.value)
}

struct Parser<'a> {
    input: &'a [u8],
    pos: usize,
    opts: &'a DecodeOptions,
    lints: Vec<DecodeLint>,
}

impl Parser<'_> {
    fn peek(&self) -> Result<u8, ParseError> {
        self.input.get(self.pos).copied().ok_or(ParseError::TruncatedInput)
    }

    /// `depth` counts the containers enclosing this value.
    fn value(&mut self, depth: usize) -> Result<Value, ParseError> {
        match self.peek()? {
            b'i' => self.integer(),
            b'0'..=b'9' => self.byte_string().map(Value::ByteString),
            b'l' => {
                self.enter(depth)?;
                self.pos += 1;
                let mut items = Vec::new();
                loop {
                    if self.peek()? == b'e' {
                        self.pos += 1;
                        return Ok(Value::List(items));
                    }
                    items.push(self.value(depth + 1)?);
                }
            }
            b'd' => {
                self.enter(depth)?;
                self.pos += 1;
                self.dictionary(depth).map(Value::Dictionary)
            }
            other => Err(ParseError::malformed(self.pos, format!("unexpected byte 0x{:02x}", other))),
        }
    }

    fn enter(&self, depth: usize) -> Result<(), ParseError> {
        if depth + 1 > self.opts.max_depth {
            return Err(ParseError::DepthExceeded {
                limit: self.opts.max_depth,
            });
        }
        Ok(())
    }

    fn dictionary(&mut self, depth: usize) -> Result<Dict, ParseError> {
        let mut dict = Dict::new();
        let mut previous: Option<Vec<u8>> = None;
        loop {
            let offset = self.pos;
            match self.peek()? {
                b'e' => {
                    self.pos += 1;
                    return Ok(dict);
                }
                b'0'..=b'9' => {}
                other => {
                    return Err(ParseError::malformed(
                        offset,
                        format!("dictionary key must be a byte string, found 0x{:02x}", other),
                    ));
                }
            }

            let key = self.byte_string()?;
            if dict.contains_key(&key) {
                return Err(ParseError::NonCanonicalDictionary { offset });
            }
            if previous.as_ref().is_some_and(|prev| key < *prev) {
                if self.opts.strict {
                    return Err(ParseError::NonCanonicalDictionary { offset });
                }
                self.lints.push(DecodeLint::UnsortedKeys { offset });
            }

            let value = self.value(depth + 1)?;
            previous = Some(key.clone());
            dict.insert(key, value);
        }
    }

    fn integer(&mut self) -> Result<Value, ParseError> {
        let start = self.pos + 1;
        let mut end = start;
        loop {
            match self.input.get(end) {
                None => return Err(ParseError::TruncatedInput),
                Some(b'e') => break,
                Some(b'-' | b'0'..=b'9') => end += 1,
                Some(other) => {
                    return Err(ParseError::malformed(end, format!("unexpected byte 0x{:02x} in integer", other)));
                }
            }
        }

        let digits = &self.input[start..end];
        let unsigned = digits.strip_prefix(b"-").unwrap_or(digits);
        if unsigned.is_empty() || unsigned.contains(&b'-') {
            return Err(ParseError::malformed(start, "invalid integer"));
        }
        if unsigned.len() > 1 && unsigned[0] == b'0' {
            return Err(ParseError::malformed(start, "integer has leading zero"));
        }
        if digits == b"-0" {
            return Err(ParseError::malformed(start, "negative zero"));
        }

        // digits are ASCII by construction
        let text = std::str::from_utf8(digits).map_err(|_| ParseError::malformed(start, "invalid integer"))?;
        let n = text
            .parse::<i64>()
            .map_err(|_| ParseError::malformed(start, "integer out of range"))?;
        self.pos = end + 1;
        Ok(Value::Integer(n))
    }

    fn byte_string(&mut self) -> Result<Vec<u8>, ParseError> {
        let start = self.pos;
        let limit = self.opts.max_length;
        let mut declared: u64 = 0;
        let mut end = start;
        loop {
            match self.input.get(end) {
                None => return Err(ParseError::TruncatedInput),
                Some(b':') => break,
                Some(&b) if b.is_ascii_digit() => {
                    declared = declared
                        .checked_mul(10)
                        .and_then(|d| d.checked_add(u64::from(b - b'0')))
                        .ok_or(ParseError::LengthOverflow {
                            declared: u64::MAX,
                            limit,
                        })?;
                    if declared > limit as u64 {
                        return Err(ParseError::LengthOverflow { declared, limit });
                    }
                    end += 1;
                }
                Some(other) => {
                    return Err(ParseError::malformed(end, format!("expected ':' after length, found 0x{:02x}", other)));
                }
            }
        }

        if end == start {
            return Err(ParseError::malformed(start, "missing length"));
        }
        if end - start > 1 && self.input[start] == b'0' {
            return Err(ParseError::malformed(start, "length has leading zero"));
        }

        // declared <= limit, so it fits in usize
        let len = declared as usize;
        let body = end + 1;
        if self.input.len() - body < len {
            return Err(ParseError::TruncatedInput);
        }
        self.pos = body + len;
        Ok(self.input[body..body + len].to_vec())
    }
}
