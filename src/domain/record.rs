//! Typed reads over a wire record.
//!
//! A record is the raw dictionary the daemon returns for one torrent or for
//! the session. Missing fields read as `None`; present fields with the wrong
//! type are protocol errors naming the field.

use crate::bencode::{Dict, Value};
use crate::error::{ClutchError, Result};

/// Raw per-torrent dictionary as returned by `torrent-get`.
pub type Record = Dict;

pub(crate) struct RecordReader<'a> {
    record: &'a Dict,
}

fn wrong_type(field: &str, expected: &str, got: &Value) -> ClutchError {
    ClutchError::Protocol(format!(
        "field {}: expected {}, got {}",
        field,
        expected,
        got.type_name()
    ))
}

impl<'a> RecordReader<'a> {
    pub(crate) fn new(record: &'a Dict) -> Self {
        Self { record }
    }

    pub(crate) fn raw(&self, field: &str) -> Option<&'a Value> {
        self.record.get(field.as_bytes())
    }

    pub(crate) fn int(&self, field: &str) -> Result<Option<i64>> {
        match self.raw(field) {
            None => Ok(None),
            Some(Value::Integer(n)) => Ok(Some(*n)),
            Some(other) => Err(wrong_type(field, "integer", other)),
        }
    }

    /// Byte string read as text; invalid UTF-8 is replaced, not rejected.
    pub(crate) fn string(&self, field: &str) -> Result<Option<String>> {
        match self.raw(field) {
            None => Ok(None),
            Some(Value::ByteString(b)) => Ok(Some(String::from_utf8_lossy(b).into_owned())),
            Some(other) => Err(wrong_type(field, "byte string", other)),
        }
    }

    /// Text field that some daemons send as an integer code.
    pub(crate) fn string_or_int(&self, field: &str) -> Result<Option<String>> {
        match self.raw(field) {
            Some(Value::Integer(n)) => Ok(Some(n.to_string())),
            _ => self.string(field),
        }
    }

    /// Byte string kept as raw bytes.
    pub(crate) fn bytes(&self, field: &str) -> Result<Option<Vec<u8>>> {
        match self.raw(field) {
            None => Ok(None),
            Some(Value::ByteString(b)) => Ok(Some(b.clone())),
            Some(other) => Err(wrong_type(field, "byte string", other)),
        }
    }

    /// Integer flag, any non-zero value is true.
    pub(crate) fn flag(&self, field: &str) -> Result<Option<bool>> {
        Ok(self.int(field)?.map(|n| n != 0))
    }

    pub(crate) fn list(&self, field: &str) -> Result<Option<&'a [Value]>> {
        match self.raw(field) {
            None => Ok(None),
            Some(Value::List(items)) => Ok(Some(items)),
            Some(other) => Err(wrong_type(field, "list", other)),
        }
    }

    pub(crate) fn dict(&self, field: &str) -> Result<Option<&'a Dict>> {
        match self.raw(field) {
            None => Ok(None),
            Some(Value::Dictionary(d)) => Ok(Some(d)),
            Some(other) => Err(wrong_type(field, "dictionary", other)),
        }
    }

    /// The join key; every record must carry one.
    pub(crate) fn id(&self) -> Result<i64> {
        self.int("id")?
            .ok_or_else(|| ClutchError::Protocol("record missing id".into()))
    }
}
