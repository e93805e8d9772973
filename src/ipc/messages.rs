//! IPC message envelope for client ↔ daemon communication.
//!
//! Every frame body is one bencoded list:
//! - `[name, payload, tag]` with `tag >= 1` is a tagged message: a request
//!   when the client sends it, a response when the daemon does.
//! - `[name, payload]` (or tag `0`) is an untagged daemon notification.
//!
//! Before any of these, both sides exchange a version dictionary
//! `{"version": {"label": ..., "max": 2, "min": 2}}`.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;

use crate::bencode::{self, DecodeOptions, DictBuilder, Value};
use crate::error::{ClutchError, Result};

/// Envelope version spoken by this client.
pub const PROTOCOL_VERSION: i64 = 2;

/// Correlation identifier for a request and its response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Tag(pub i64);

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Operations the client can request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    TorrentGet,
    TorrentStart,
    TorrentStop,
    TorrentRemove,
    TorrentAdd,
    SessionGet,
    SessionSet,
    Noop,
}

impl Method {
    pub const ALL: [Method; 8] = [
        Method::TorrentGet,
        Method::TorrentStart,
        Method::TorrentStop,
        Method::TorrentRemove,
        Method::TorrentAdd,
        Method::SessionGet,
        Method::SessionSet,
        Method::Noop,
    ];

    /// Wire name.
    pub fn name(self) -> &'static str {
        match self {
            Method::TorrentGet => "torrent-get",
            Method::TorrentStart => "torrent-start",
            Method::TorrentStop => "torrent-stop",
            Method::TorrentRemove => "torrent-remove",
            Method::TorrentAdd => "torrent-add",
            Method::SessionGet => "session-get",
            Method::SessionSet => "session-set",
            Method::Noop => "noop",
        }
    }

    pub fn from_name(name: &str) -> Option<Method> {
        Method::ALL.into_iter().find(|m| m.name() == name)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Reply names the daemon may answer with besides echoing the method.
pub struct ReplyName;

impl ReplyName {
    pub const SUCCEEDED: &'static str = "succeeded";
    pub const FAILED: &'static str = "failed";
    pub const NOT_SUPPORTED: &'static str = "not-supported";
    pub const BAD_FORMAT: &'static str = "bad-format";
}

/// Direction/role of an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Request,
    Response,
    Notification,
}

/// Decoded message envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub kind: MessageKind,
    pub name: String,
    pub tag: Option<Tag>,
    pub payload: Value,
}

impl Envelope {
    pub fn request(method: Method, args: Value, tag: Tag) -> Self {
        Self {
            kind: MessageKind::Request,
            name: method.name().to_string(),
            tag: Some(tag),
            payload: args,
        }
    }

    pub fn response(name: impl Into<String>, payload: Value, tag: Tag) -> Self {
        Self {
            kind: MessageKind::Response,
            name: name.into(),
            tag: Some(tag),
            payload,
        }
    }

    pub fn notification(name: impl Into<String>, payload: Value) -> Self {
        Self {
            kind: MessageKind::Notification,
            name: name.into(),
            tag: None,
            payload,
        }
    }

    /// Bencode the envelope into a frame body.
    pub fn encode(&self) -> Bytes {
        let mut items = vec![Value::from(self.name.as_str()), self.payload.clone()];
        if let Some(tag) = self.tag {
            items.push(Value::Integer(tag.0));
        }
        Bytes::from(bencode::encode(&Value::List(items)))
    }

    /// Decode a frame body. `tagged_kind` is the role a tagged message plays
    /// for the receiver (`Response` on the client, `Request` on a daemon).
    pub fn decode(body: &[u8], opts: &DecodeOptions, tagged_kind: MessageKind) -> Result<Self> {
        let decoded = opts.decode_exact(body)?;
        if !decoded.is_canonical() {
            tracing::warn!(lints = ?decoded.lints, "received non-canonical envelope");
        }

        let mut items = match decoded.value {
            Value::List(items) => items,
            other => {
                return Err(ClutchError::Protocol(format!(
                    "envelope must be a list, got {}",
                    other.type_name()
                )));
            }
        };

        let tag = match items.len() {
            2 => None,
            3 => match items.pop() {
                Some(Value::Integer(0)) => None,
                Some(Value::Integer(n)) if n > 0 => Some(Tag(n)),
                Some(other) => {
                    return Err(ClutchError::Protocol(format!("invalid tag {}", other)));
                }
                None => None,
            },
            n => {
                return Err(ClutchError::Protocol(format!(
                    "envelope must have 2 or 3 elements, got {}",
                    n
                )));
            }
        };

        let payload = items.pop().unwrap_or_else(Value::dict);
        let name = match items.pop() {
            Some(Value::ByteString(raw)) => String::from_utf8(raw)
                .map_err(|_| ClutchError::Protocol("message name is not UTF-8".into()))?,
            Some(other) => {
                return Err(ClutchError::Protocol(format!(
                    "message name must be a byte string, got {}",
                    other.type_name()
                )));
            }
            None => return Err(ClutchError::Protocol("missing message name".into())),
        };

        let kind = if tag.is_some() {
            tagged_kind
        } else {
            MessageKind::Notification
        };

        Ok(Self {
            kind,
            name,
            tag,
            payload,
        })
    }
}

/// Hands out request tags, skipping any still outstanding.
#[derive(Debug)]
pub struct TagAllocator {
    next: AtomicU64,
}

impl TagAllocator {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(0),
        }
    }

    /// Allocate a tag for which `in_use` returns false.
    pub fn allocate(&self, in_use: impl Fn(Tag) -> bool) -> Tag {
        loop {
            let raw = self.next.fetch_add(1, Ordering::SeqCst);
            // tags are 1..=i64::MAX, wrapping
            let tag = Tag((raw % i64::MAX as u64) as i64 + 1);
            if !in_use(tag) {
                return tag;
            }
        }
    }
}

impl Default for TagAllocator {
    fn default() -> Self {
        Self::new()
    }
}

/// Build and encode a request, returning the frame body and its fresh tag.
pub fn encode_request(
    tags: &TagAllocator,
    method: Method,
    args: Value,
    in_use: impl Fn(Tag) -> bool,
) -> (Bytes, Tag) {
    let tag = tags.allocate(in_use);
    (Envelope::request(method, args, tag).encode(), tag)
}

/// What a daemon said in answer to a tagged request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub name: String,
    pub payload: Value,
}

/// A message arriving at the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Incoming {
    Response { tag: Tag, reply: Reply },
    Notification { name: String, payload: Value },
}

/// Decode a daemon → client frame body.
pub fn decode_response(body: &[u8], opts: &DecodeOptions) -> Result<Incoming> {
    let envelope = Envelope::decode(body, opts, MessageKind::Response)?;
    Ok(match envelope.tag {
        Some(tag) => Incoming::Response {
            tag,
            reply: Reply {
                name: envelope.name,
                payload: envelope.payload,
            },
        },
        None => Incoming::Notification {
            name: envelope.name,
            payload: envelope.payload,
        },
    })
}

/// Decode a client → daemon frame body. Used by daemon-side code and test
/// doubles.
pub fn decode_request(body: &[u8], opts: &DecodeOptions) -> Result<(Method, Value, Tag)> {
    let envelope = Envelope::decode(body, opts, MessageKind::Request)?;
    let tag = envelope
        .tag
        .ok_or_else(|| ClutchError::Protocol("request without tag".into()))?;
    let method = Method::from_name(&envelope.name)
        .ok_or_else(|| ClutchError::Protocol(format!("unknown method {}", envelope.name)))?;
    Ok((method, envelope.payload, tag))
}

/// Version range a peer is willing to speak.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionInfo {
    pub label: Option<String>,
    pub min: i64,
    pub max: i64,
}

impl VersionInfo {
    /// What this client announces.
    pub fn local() -> Self {
        Self {
            label: Some(format!("{}/{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))),
            min: PROTOCOL_VERSION,
            max: PROTOCOL_VERSION,
        }
    }

    pub fn encode(&self) -> Bytes {
        let inner = DictBuilder::new()
            .insert_opt("label", self.label.clone())
            .insert("max", self.max)
            .insert("min", self.min)
            .build();
        let outer = DictBuilder::new().insert("version", inner).build();
        Bytes::from(bencode::encode(&outer))
    }

    /// Parse a version message. The value may be a `{min, max, label}`
    /// dictionary or a bare integer.
    pub fn decode(body: &[u8], opts: &DecodeOptions) -> Result<Self> {
        let value = opts.decode_exact(body)?.value;
        let version = value
            .get("version")
            .ok_or_else(|| ClutchError::Protocol("expected version message".into()))?;

        match version {
            Value::Integer(n) => Ok(Self {
                label: None,
                min: *n,
                max: *n,
            }),
            Value::Dictionary(_) => {
                let field = |key: &str| {
                    version
                        .get(key)
                        .and_then(Value::as_int)
                        .ok_or_else(|| ClutchError::Protocol(format!("version message missing {}", key)))
                };
                Ok(Self {
                    label: version.get("label").and_then(Value::as_str).map(str::to_string),
                    min: field("min")?,
                    max: field("max")?,
                })
            }
            other => Err(ClutchError::Protocol(format!(
                "version must be an integer or dictionary, got {}",
                other.type_name()
            ))),
        }
    }

    /// Highest version both sides support.
    pub fn negotiate(&self, remote: &VersionInfo) -> Result<i64> {
        let low = self.min.max(remote.min);
        let high = self.max.min(remote.max);
        if low > high {
            return Err(ClutchError::Protocol(format!(
                "unsupported protocol version: local {}..={}, daemon {}..={}",
                self.min, self.max, remote.min, remote.max
            )));
        }
        Ok(high)
    }
}
