//! Daemon connection management
//!
//! - Address parsing (Unix socket path or TCP host:port)
//! - Connect with retry and backoff
//! - Reconnect that invalidates calls pending on the old connection

pub mod address;
pub mod controller;

pub use address::{DEFAULT_SOCKET, DaemonAddress};
pub use controller::{BoxedStream, Connector, DaemonController, DaemonStream, RetryPolicy, SocketConnector};
