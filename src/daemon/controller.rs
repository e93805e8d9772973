//! Connection lifecycle for the daemon.
//!
//! The `DaemonController` dials the configured address with retry and
//! backoff, hands the stream to a fresh `MessageController`, and replaces
//! that controller on reconnect. Replacing always closes the old controller
//! first, so calls pending on the old connection fail with `ConnectionLost`
//! before the new one is usable.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpStream, UnixStream};
use tokio::sync::Mutex;

use super::address::DaemonAddress;
use crate::error::{ClutchError, Result};
use crate::ipc::{ConnectionState, ControllerOptions, MessageController};

/// A connected byte stream to the daemon.
pub trait DaemonStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> DaemonStream for T {}

pub type BoxedStream = Box<dyn DaemonStream>;

/// Opens raw streams to a daemon address.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, address: &DaemonAddress) -> std::io::Result<BoxedStream>;
}

/// Connects over real Unix or TCP sockets.
#[derive(Debug, Clone, Copy, Default)]
pub struct SocketConnector;

#[async_trait]
impl Connector for SocketConnector {
    async fn connect(&self, address: &DaemonAddress) -> std::io::Result<BoxedStream> {
        match address {
            DaemonAddress::Unix(path) => Ok(Box::new(UnixStream::connect(path).await?)),
            DaemonAddress::Tcp(addr) => {
                let stream = TcpStream::connect(addr.as_str()).await?;
                stream.set_nodelay(true)?;
                Ok(Box::new(stream))
            }
        }
    }
}

/// How hard to try before declaring the daemon unreachable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total connection attempts, at least one.
    pub attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no waiting.
    pub fn none() -> Self {
        Self {
            attempts: 1,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }

    /// Delay after failed attempt `n` (zero-based): doubles each time, capped.
    pub fn backoff(&self, n: u32) -> Duration {
        let factor = 1u32.checked_shl(n).unwrap_or(u32::MAX);
        self.initial_backoff.saturating_mul(factor).min(self.max_backoff)
    }
}

/// Owns the connection to one daemon address.
pub struct DaemonController {
    address: DaemonAddress,
    connector: Arc<dyn Connector>,
    retry: RetryPolicy,
    connect_timeout: Duration,
    options: ControllerOptions,
    current: Mutex<Option<Arc<MessageController>>>,
}

impl DaemonController {
    /// Controller dialling real sockets.
    pub fn new(address: DaemonAddress, options: ControllerOptions) -> Self {
        Self::with_connector(address, Arc::new(SocketConnector), options)
    }

    pub fn with_connector(address: DaemonAddress, connector: Arc<dyn Connector>, options: ControllerOptions) -> Self {
        Self {
            address,
            connector,
            retry: RetryPolicy::default(),
            connect_timeout: Duration::from_secs(5),
            options,
            current: Mutex::new(None),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn address(&self) -> &DaemonAddress {
        &self.address
    }

    /// Connect if no controller is installed yet and return it. An installed
    /// controller is returned as-is, even if it has faulted.
    pub async fn connect(&self) -> Result<Arc<MessageController>> {
        let mut current = self.current.lock().await;
        if let Some(controller) = current.as_ref() {
            return Ok(Arc::clone(controller));
        }
        let controller = Arc::new(self.dial().await?);
        *current = Some(Arc::clone(&controller));
        Ok(controller)
    }

    /// The live controller, or `ConnectionLost` if there is none or it faulted.
    pub async fn controller(&self) -> Result<Arc<MessageController>> {
        let current = self.current.lock().await;
        match current.as_ref() {
            None => Err(ClutchError::ConnectionLost("not connected".into())),
            Some(controller) => match controller.state() {
                ConnectionState::Open => Ok(Arc::clone(controller)),
                ConnectionState::Faulted(reason) => Err(ClutchError::ConnectionLost(reason)),
            },
        }
    }

    /// Drop the current connection, failing its pending calls, and dial again.
    pub async fn reconnect(&self) -> Result<Arc<MessageController>> {
        let mut current = self.current.lock().await;
        if let Some(old) = current.take() {
            tracing::debug!(address = %self.address, pending = old.pending_count(), "closing connection for reconnect");
            old.close().await;
        }
        let controller = Arc::new(self.dial().await?);
        *current = Some(Arc::clone(&controller));
        Ok(controller)
    }

    /// Return the live controller, reconnecting only if there is none or it faulted.
    pub async fn ensure_connected(&self) -> Result<Arc<MessageController>> {
        match self.controller().await {
            Ok(controller) => Ok(controller),
            Err(_) => self.reconnect().await,
        }
    }

    /// Close and forget the current connection.
    pub async fn disconnect(&self) {
        if let Some(old) = self.current.lock().await.take() {
            old.close().await;
        }
    }

    async fn dial(&self) -> Result<MessageController> {
        let attempts = self.retry.attempts.max(1);
        let mut last_error = String::new();

        for attempt in 0..attempts {
            if attempt > 0 {
                let delay = self.retry.backoff(attempt - 1);
                tracing::debug!(attempt, delay_ms = delay.as_millis() as u64, "retrying daemon connection");
                tokio::time::sleep(delay).await;
            }

            let stream = match tokio::time::timeout(self.connect_timeout, self.connector.connect(&self.address)).await
            {
                Ok(Ok(stream)) => stream,
                Ok(Err(e)) => {
                    tracing::warn!(address = %self.address, attempt, error = %e, "connect failed");
                    last_error = e.to_string();
                    continue;
                }
                Err(_) => {
                    tracing::warn!(address = %self.address, attempt, "connect timed out");
                    last_error = format!("timed out after {}ms", self.connect_timeout.as_millis());
                    continue;
                }
            };

            match MessageController::start(stream, self.options.clone()).await {
                Ok(controller) => {
                    tracing::debug!(address = %self.address, attempt, "connected to daemon");
                    return Ok(controller);
                }
                // a version mismatch will not go away by retrying
                Err(e @ ClutchError::Protocol(_)) | Err(e @ ClutchError::Parse(_)) => return Err(e),
                Err(e) => {
                    tracing::warn!(address = %self.address, attempt, error = %e, "handshake failed");
                    last_error = e.to_string();
                }
            }
        }

        Err(ClutchError::Unreachable {
            address: self.address.to_string(),
            reason: last_error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bencode::{DecodeOptions, Value};
    use crate::ipc::{DEFAULT_MAX_FRAME_LENGTH, Envelope, decode_request, split};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fails the first `failures` attempts, then hands out in-memory
    /// connections whose peer answers every request with `succeeded`,
    /// except `torrent-get` which is left unanswered.
    struct FlakyConnector {
        failures: usize,
        attempts: AtomicUsize,
    }

    impl FlakyConnector {
        fn new(failures: usize) -> Arc<Self> {
            Arc::new(Self {
                failures,
                attempts: AtomicUsize::new(0),
            })
        }

        fn attempts(&self) -> usize {
            self.attempts.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Connector for FlakyConnector {
        async fn connect(&self, _address: &DaemonAddress) -> std::io::Result<BoxedStream> {
            let n = self.attempts.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                return Err(std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused"));
            }
            let (client, server) = tokio::io::duplex(16 * 1024);
            tokio::spawn(async move {
                let (mut reader, writer) = split(server, DEFAULT_MAX_FRAME_LENGTH);
                while let Ok(frame) = reader.next_frame().await {
                    let Ok((method, _, tag)) = decode_request(&frame, &DecodeOptions::default()) else {
                        break;
                    };
                    if method.name() == "torrent-get" {
                        continue;
                    }
                    let reply = Envelope::response("succeeded", Value::dict(), tag).encode();
                    if writer.send(reply).await.is_err() {
                        break;
                    }
                }
            });
            Ok(Box::new(client))
        }
    }

    fn options() -> ControllerOptions {
        ControllerOptions {
            handshake: false,
            request_timeout: Duration::from_secs(5),
            ..Default::default()
        }
    }

    fn fast_retry(attempts: u32) -> RetryPolicy {
        RetryPolicy {
            attempts,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(4),
        }
    }

    fn address() -> DaemonAddress {
        DaemonAddress::Unix("/tmp/clutch-test.sock".into())
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            attempts: 10,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(500),
        };
        assert_eq!(policy.backoff(0), Duration::from_millis(100));
        assert_eq!(policy.backoff(1), Duration::from_millis(200));
        assert_eq!(policy.backoff(2), Duration::from_millis(400));
        assert_eq!(policy.backoff(3), Duration::from_millis(500));
        assert_eq!(policy.backoff(40), Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_connect_retries_until_success() {
        let connector = FlakyConnector::new(2);
        let daemon = DaemonController::with_connector(address(), connector.clone(), options()).with_retry(fast_retry(3));

        let controller = daemon.connect().await.unwrap();
        assert_eq!(connector.attempts(), 3);
        controller.ping().await.unwrap();
    }

    #[tokio::test]
    async fn test_unreachable_after_all_attempts() {
        let connector = FlakyConnector::new(10);
        let daemon = DaemonController::with_connector(address(), connector.clone(), options()).with_retry(fast_retry(4));

        let err = daemon.connect().await.err();
        assert_eq!(connector.attempts(), 4);
        match err {
            Some(ClutchError::Unreachable { address, reason }) => {
                assert_eq!(address, "/tmp/clutch-test.sock");
                assert_eq!(reason, "refused");
            }
            other => panic!("expected Unreachable, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_real_socket_unreachable() {
        let daemon = DaemonController::new(DaemonAddress::Unix("/nonexistent/clutch/socket".into()), options())
            .with_retry(RetryPolicy::none());
        assert!(matches!(daemon.connect().await, Err(ClutchError::Unreachable { .. })));
    }

    #[tokio::test]
    async fn test_controller_requires_connection() {
        let daemon = DaemonController::with_connector(address(), FlakyConnector::new(0), options());
        assert!(matches!(daemon.controller().await, Err(ClutchError::ConnectionLost(_))));
        daemon.connect().await.unwrap();
        assert!(daemon.controller().await.is_ok());
        daemon.disconnect().await;
        assert!(daemon.controller().await.is_err());
    }

    #[tokio::test]
    async fn test_reconnect_fails_old_pending_calls() {
        let connector = FlakyConnector::new(0);
        let daemon = DaemonController::with_connector(address(), connector.clone(), options());
        let old = daemon.connect().await.unwrap();

        let stuck = {
            let old = Arc::clone(&old);
            tokio::spawn(async move { old.get_info(&crate::domain::Selection::All, &[]).await })
        };
        while old.pending_count() == 0 {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }

        let new = daemon.reconnect().await.unwrap();
        assert!(matches!(stuck.await.unwrap(), Err(ClutchError::ConnectionLost(_))));
        assert!(!old.is_open());
        assert!(new.is_open());
        assert!(!Arc::ptr_eq(&old, &new));
        assert_eq!(connector.attempts(), 2);
        new.ping().await.unwrap();
    }

    #[tokio::test]
    async fn test_ensure_connected_replaces_faulted_controller() {
        let connector = FlakyConnector::new(0);
        let daemon = DaemonController::with_connector(address(), connector.clone(), options());
        let first = daemon.connect().await.unwrap();

        let same = daemon.ensure_connected().await.unwrap();
        assert!(Arc::ptr_eq(&first, &same));
        assert_eq!(connector.attempts(), 1);

        first.close().await;
        let fresh = daemon.ensure_connected().await.unwrap();
        assert!(!Arc::ptr_eq(&first, &fresh));
        assert_eq!(connector.attempts(), 2);
    }
}
