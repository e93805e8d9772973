//! IPC layer for talking to the Transmission daemon
//!
//! This module provides:
//! - Hex length-prefixed frame codec
//! - Frame transport over any async byte stream
//! - Message envelope, tags and version handshake
//! - The message controller that correlates requests and responses

pub mod client;
pub mod frame;
pub mod messages;
pub mod transport;

pub use client::{ConnectionState, ControllerOptions, MessageController, Notification};
pub use frame::{DEFAULT_MAX_FRAME_LENGTH, FrameCodec, decode_frame, encode_frame};
pub use messages::{
    Envelope, Incoming, MessageKind, Method, PROTOCOL_VERSION, Reply, ReplyName, Tag, TagAllocator, VersionInfo,
    decode_request, decode_response, encode_request,
};
pub use transport::{FrameReader, FrameWriter, split};
