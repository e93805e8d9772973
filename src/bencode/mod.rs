//! Bencode codec.
//!
//! The self-describing value format spoken on the daemon socket: integers,
//! byte strings, lists and key-sorted dictionaries. Nothing in here knows
//! about torrents or RPC.

mod decode;
mod encode;
mod value;

pub use decode::{
    DEFAULT_MAX_DEPTH, DEFAULT_MAX_LENGTH, DecodeLint, DecodeOptions, Decoded, decode, decode_exact,
};
pub use encode::{encode, encode_to};
pub use value::{Dict, DictBuilder, Value, display_bytes};

#[cfg(test)]
mod tests;
