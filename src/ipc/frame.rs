//! IPC frame codec.
//!
//! Frames are laid out as:
//! - 8 bytes: body length as ASCII hex (written uppercase, read in either case)
//! - N bytes: one bencoded envelope
//!
//! The codec only delimits messages; what the body means is the envelope
//! layer's business.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::{ClutchError, ParseError, Result};

/// Width of the hex length prefix.
pub const HEADER_LEN: usize = 8;

/// Default maximum frame body (16 MB).
pub const DEFAULT_MAX_FRAME_LENGTH: usize = 16 * 1024 * 1024;

/// Length-prefixed frame codec.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    max_length: usize,
}

impl FrameCodec {
    /// Create a new codec with default max length (16 MB).
    pub fn new() -> Self {
        Self {
            max_length: DEFAULT_MAX_FRAME_LENGTH,
        }
    }

    /// Create a new codec with custom max length.
    ///
    /// The prefix cannot describe more than `u32::MAX` bytes, so larger
    /// bounds are clamped.
    pub fn with_max_length(max_length: usize) -> Self {
        Self {
            max_length: max_length.min(u32::MAX as usize),
        }
    }

    /// Get the max frame body length.
    pub fn max_length(&self) -> usize {
        self.max_length
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse the 8-digit hex prefix.
fn parse_header(header: &[u8]) -> std::result::Result<usize, ParseError> {
    let mut length: usize = 0;
    for (i, &b) in header.iter().enumerate() {
        let digit = (b as char)
            .to_digit(16)
            .ok_or_else(|| ParseError::malformed(i, format!("invalid hex digit 0x{:02x} in frame header", b)))?;
        length = (length << 4) | digit as usize;
    }
    Ok(length)
}

impl Decoder for FrameCodec {
    type Item = Bytes;
    type Error = ClutchError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        // Need the whole length prefix first
        if src.len() < HEADER_LEN {
            return Ok(None);
        }

        let length = parse_header(&src[..HEADER_LEN])?;

        if length > self.max_length {
            return Err(ParseError::LengthOverflow {
                declared: length as u64,
                limit: self.max_length,
            }
            .into());
        }

        if src.len() < HEADER_LEN + length {
            src.reserve(HEADER_LEN + length - src.len());
            return Ok(None);
        }

        src.advance(HEADER_LEN);
        Ok(Some(src.split_to(length).freeze()))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None if src.is_empty() => Ok(None),
            // peer went away in the middle of a frame
            None => Err(ClutchError::ConnectionClosed),
        }
    }
}

impl Encoder<Bytes> for FrameCodec {
    type Error = ClutchError;

    fn encode(&mut self, body: Bytes, dst: &mut BytesMut) -> Result<()> {
        let length = body.len();
        if length > self.max_length {
            return Err(ParseError::LengthOverflow {
                declared: length as u64,
                limit: self.max_length,
            }
            .into());
        }

        dst.reserve(HEADER_LEN + length);
        dst.put_slice(format!("{:08X}", length).as_bytes());
        dst.put_slice(&body);
        Ok(())
    }
}

/// Frame a body into a standalone buffer.
pub fn encode_frame(body: &[u8]) -> Result<Vec<u8>> {
    let mut buf = BytesMut::new();
    FrameCodec::new().encode(Bytes::copy_from_slice(body), &mut buf)?;
    Ok(buf.to_vec())
}

/// Split one frame off the front of `data`, returning the body and the
/// total bytes consumed.
pub fn decode_frame(data: &[u8]) -> Result<(&[u8], usize)> {
    if data.len() < HEADER_LEN {
        return Err(ParseError::TruncatedInput.into());
    }
    let length = parse_header(&data[..HEADER_LEN])?;
    if data.len() - HEADER_LEN < length {
        return Err(ParseError::TruncatedInput.into());
    }
    Ok((&data[HEADER_LEN..HEADER_LEN + length], HEADER_LEN + length))
}
