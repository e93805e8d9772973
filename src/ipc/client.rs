//! Message controller: the request/response engine for one daemon connection.
//!
//! Provides on top of a frame transport:
//! - Tag allocation and correlation of responses to callers
//! - Per-call timeouts with cancellation-safe cleanup
//! - Fan-out of connection failure to every pending call
//! - Typed torrent and session operations
//!
//! A single dispatcher task owns the read half. Callers register a pending
//! entry, write their request under the transport's write lock, and wait on
//! a oneshot channel that the dispatcher resolves.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::frame::DEFAULT_MAX_FRAME_LENGTH;
use super::messages::{Incoming, Method, Reply, ReplyName, Tag, TagAllocator, VersionInfo};
use super::messages::{decode_response, encode_request};
use super::transport::{self, FrameReader, FrameWriter};
use crate::bencode::{DEFAULT_MAX_DEPTH, DecodeOptions, DictBuilder, Value};
use crate::domain::{
    AddTorrent, InfoField, Record, Selection, SessionSettings, StatusField, Torrent, TorrentId, TorrentInfo,
    TorrentStatus, join_by_id, projection, validate_ids,
};
use crate::domain::torrent::ids_value;
use crate::error::{ClutchError, ParseError, Result};

/// Options for a single controller/connection.
#[derive(Debug, Clone)]
pub struct ControllerOptions {
    /// Timeout used by the typed operations.
    pub request_timeout: Duration,
    /// Largest frame body accepted or sent.
    pub max_frame_length: usize,
    /// Nesting bound for decoded values.
    pub max_depth: usize,
    /// Buffered notifications before new ones are dropped.
    pub notification_capacity: usize,
    /// Exchange version messages before any request.
    pub handshake: bool,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            max_frame_length: DEFAULT_MAX_FRAME_LENGTH,
            max_depth: DEFAULT_MAX_DEPTH,
            notification_capacity: 64,
            handshake: true,
        }
    }
}

impl ControllerOptions {
    fn decode_options(&self) -> DecodeOptions {
        DecodeOptions {
            max_depth: self.max_depth,
            max_length: self.max_frame_length,
            strict: false,
        }
    }
}

/// Health of the connection behind a controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Open,
    /// No further calls are possible; holds the reason.
    Faulted(String),
}

/// Unsolicited message pushed by the daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub name: String,
    pub payload: Value,
}

/// Pending request awaiting response.
struct PendingCall {
    method: Method,
    sender: oneshot::Sender<Result<Reply>>,
}

#[derive(Default)]
struct PendingTable {
    fault: Option<String>,
    entries: HashMap<Tag, PendingCall>,
}

/// State shared between callers and the dispatcher.
#[derive(Default)]
struct Shared {
    table: Mutex<PendingTable>,
}

impl Shared {
    fn table(&self) -> std::sync::MutexGuard<'_, PendingTable> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn resolve(&self, tag: Tag, reply: Reply) {
        let entry = self.table().entries.remove(&tag);
        match entry {
            Some(call) => {
                tracing::debug!(%tag, method = %call.method, reply = %reply.name, "response matched");
                if call.sender.send(Ok(reply)).is_err() {
                    tracing::debug!(%tag, "caller went away before delivery");
                }
            }
            None => {
                tracing::debug!(%tag, reply = %reply.name, "discarding late or unsolicited response");
            }
        }
    }

    /// Move to `Faulted` and fail every pending call. Only the first reason
    /// is kept.
    fn fault(&self, reason: &str) {
        let drained: Vec<(Tag, PendingCall)> = {
            let mut table = self.table();
            if table.fault.is_none() {
                table.fault = Some(reason.to_string());
            }
            table.entries.drain().collect()
        };
        if !drained.is_empty() {
            tracing::warn!(pending = drained.len(), reason, "connection faulted, failing pending calls");
        }
        for (_, call) in drained {
            let _ = call.sender.send(Err(ClutchError::ConnectionLost(reason.to_string())));
        }
    }
}

/// Removes the caller's entry however the wait ends.
struct PendingGuard<'a> {
    shared: &'a Shared,
    tag: Tag,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.shared.table().entries.remove(&self.tag);
    }
}

/// Request/response engine over one connection.
pub struct MessageController {
    writer: FrameWriter,
    shared: Arc<Shared>,
    tags: TagAllocator,
    request_timeout: Duration,
    max_frame_length: usize,
    notifications: tokio::sync::Mutex<mpsc::Receiver<Notification>>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    version: Option<i64>,
    daemon_label: Option<String>,
}

impl MessageController {
    /// Take ownership of a connected stream, optionally perform the version
    /// handshake, and start the dispatcher.
    pub async fn start<S>(stream: S, options: ControllerOptions) -> Result<Self>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let decode_opts = options.decode_options();
        let (mut reader, writer) = transport::split(stream, options.max_frame_length);

        let (version, daemon_label) = if options.handshake {
            let remote = handshake(&mut reader, &writer, &decode_opts, options.request_timeout).await?;
            let version = VersionInfo::local().negotiate(&remote)?;
            tracing::debug!(version, label = ?remote.label, "handshake complete");
            (Some(version), remote.label)
        } else {
            (None, None)
        };

        let shared = Arc::new(Shared::default());
        let (notify_tx, notify_rx) = mpsc::channel(options.notification_capacity.max(1));
        let dispatcher = tokio::spawn(dispatch(reader, Arc::clone(&shared), decode_opts, notify_tx));

        Ok(Self {
            writer,
            shared,
            tags: TagAllocator::new(),
            request_timeout: options.request_timeout,
            max_frame_length: options.max_frame_length,
            notifications: tokio::sync::Mutex::new(notify_rx),
            dispatcher: Mutex::new(Some(dispatcher)),
            version,
            daemon_label,
        })
    }

    //=== Engine ===

    /// Send `method` and wait up to `timeout` for its outcome. The deadline
    /// covers writing the request as well as waiting for the reply.
    ///
    /// Succeeds only when the daemon's reply indicates success; explicit
    /// failures become `DaemonRejected` with the daemon's text. A request
    /// larger than the frame bound fails locally and leaves the connection open.
    pub async fn call(&self, method: Method, args: Value, timeout: Duration) -> Result<Reply> {
        let (tx, rx) = oneshot::channel();
        let (body, tag) = {
            let mut table = self.shared.table();
            if let Some(reason) = &table.fault {
                return Err(ClutchError::ConnectionLost(reason.clone()));
            }
            let (body, tag) = encode_request(&self.tags, method, args, |t| table.entries.contains_key(&t));
            if body.len() > self.max_frame_length {
                return Err(ParseError::LengthOverflow {
                    declared: body.len() as u64,
                    limit: self.max_frame_length,
                }
                .into());
            }
            table.entries.insert(tag, PendingCall { method, sender: tx });
            (body, tag)
        };
        let _guard = PendingGuard {
            shared: &self.shared,
            tag,
        };

        tracing::debug!(%tag, %method, bytes = body.len(), "sending request");
        let mut written = false;
        let exchange = async {
            if let Err(e) = self.writer.send(body).await {
                return Err(e);
            }
            written = true;
            rx.await
                .unwrap_or_else(|_| Err(ClutchError::ConnectionLost("dispatcher stopped".into())))
        };
        let outcome = tokio::time::timeout(timeout, exchange).await;

        match outcome {
            Ok(Ok(reply)) => check_outcome(method, reply),
            Ok(Err(e)) => {
                if !written {
                    self.shared.fault(&e.to_string());
                }
                Err(e)
            }
            Err(_) => {
                if written {
                    tracing::debug!(%tag, %method, "request timed out");
                } else {
                    // the frame may be partly on the wire
                    tracing::warn!(%tag, %method, "request write timed out, faulting connection");
                    self.shared.fault("request write timed out");
                }
                Err(ClutchError::Timeout {
                    method: method.name().to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }

    /// `call` with the connection's configured timeout.
    pub async fn call_with_default_timeout(&self, method: Method, args: Value) -> Result<Reply> {
        self.call(method, args, self.request_timeout).await
    }

    //=== Torrents ===

    /// Raw projection: one record per torrent with the named fields plus `id`.
    pub async fn torrent_get(&self, selection: &Selection, fields: &[&str]) -> Result<Vec<Record>> {
        if fields.is_empty() {
            return Err(ClutchError::InvalidArgument("torrent-get needs at least one field".into()));
        }
        let mut names = vec!["id"];
        for &field in fields {
            if field.is_empty() {
                return Err(ClutchError::InvalidArgument("empty field name".into()));
            }
            if !names.contains(&field) {
                names.push(field);
            }
        }

        let args = DictBuilder::new()
            .insert_opt("ids", selection.to_arg()?)
            .insert("fields", names.iter().map(|n| Value::from(*n)).collect::<Vec<_>>())
            .build();
        let reply = self.call_with_default_timeout(Method::TorrentGet, args).await?;
        records_from(reply.payload)
    }

    pub async fn get_info(&self, selection: &Selection, fields: &[InfoField]) -> Result<Vec<TorrentInfo>> {
        let records = self.torrent_get(selection, &projection(fields)).await?;
        records.iter().map(TorrentInfo::from_record).collect()
    }

    pub async fn get_status(&self, selection: &Selection, fields: &[StatusField]) -> Result<Vec<TorrentStatus>> {
        let records = self.torrent_get(selection, &projection(fields)).await?;
        records.iter().map(TorrentStatus::from_record).collect()
    }

    /// Every info and status field, joined on id.
    pub async fn get_torrents(&self, selection: &Selection) -> Result<Vec<Torrent>> {
        let (infos, statuses) = futures::try_join!(
            self.get_info(selection, &InfoField::ALL),
            self.get_status(selection, &StatusField::ALL)
        )?;
        join_by_id(infos, statuses)
    }

    /// Start the selected torrents; an empty selection means all.
    pub async fn start_torrents(&self, selection: &Selection) -> Result<()> {
        self.select_and_confirm(Method::TorrentStart, selection).await
    }

    /// Stop the selected torrents; an empty selection means all.
    pub async fn stop_torrents(&self, selection: &Selection) -> Result<()> {
        self.select_and_confirm(Method::TorrentStop, selection).await
    }

    async fn select_and_confirm(&self, method: Method, selection: &Selection) -> Result<()> {
        let args = DictBuilder::new().insert_opt("ids", selection.to_arg()?).build();
        self.call_with_default_timeout(method, args).await?;
        Ok(())
    }

    pub async fn remove_torrents(&self, ids: &[TorrentId]) -> Result<()> {
        if ids.is_empty() {
            return Err(ClutchError::InvalidArgument("torrent-remove needs at least one id".into()));
        }
        validate_ids(ids)?;
        let args = DictBuilder::new().insert("ids", ids_value(ids)).build();
        self.call_with_default_timeout(Method::TorrentRemove, args).await?;
        Ok(())
    }

    /// Remove every torrent the daemon currently lists. Returns what was removed.
    pub async fn remove_all_torrents(&self) -> Result<Vec<TorrentId>> {
        let ids: Vec<TorrentId> = self
            .get_info(&Selection::All, &[InfoField::Id])
            .await?
            .into_iter()
            .map(|info| info.id)
            .collect();
        if !ids.is_empty() {
            self.remove_torrents(&ids).await?;
        }
        Ok(ids)
    }

    /// Add a torrent and return the id the daemon assigned.
    pub async fn add_torrent(&self, request: &AddTorrent) -> Result<TorrentId> {
        let args = request.to_args()?;
        let reply = self.call_with_default_timeout(Method::TorrentAdd, args).await?;
        reply
            .payload
            .get("id")
            .and_then(Value::as_int)
            .map(TorrentId)
            .ok_or_else(|| ClutchError::Protocol(format!("torrent-add reply without id: {}", reply.payload)))
    }

    //=== Session ===

    pub async fn session_get(&self) -> Result<SessionSettings> {
        let reply = self.call_with_default_timeout(Method::SessionGet, Value::dict()).await?;
        SessionSettings::from_value(&reply.payload)
    }

    pub async fn session_set(&self, settings: &SessionSettings) -> Result<()> {
        if settings.is_empty() {
            return Err(ClutchError::InvalidArgument("no session settings to change".into()));
        }
        settings.validate()?;
        self.call_with_default_timeout(Method::SessionSet, settings.to_value()).await?;
        Ok(())
    }

    /// Round-trip a `noop` and report how long it took.
    pub async fn ping(&self) -> Result<Duration> {
        let started = Instant::now();
        self.call_with_default_timeout(Method::Noop, Value::dict()).await?;
        Ok(started.elapsed())
    }

    //=== Connection ===

    pub fn state(&self) -> ConnectionState {
        match &self.shared.table().fault {
            Some(reason) => ConnectionState::Faulted(reason.clone()),
            None => ConnectionState::Open,
        }
    }

    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Number of calls waiting for a response.
    pub fn pending_count(&self) -> usize {
        self.shared.table().entries.len()
    }

    pub fn has_pending(&self, tag: Tag) -> bool {
        self.shared.table().entries.contains_key(&tag)
    }

    /// Protocol version agreed in the handshake, if one was performed.
    pub fn negotiated_version(&self) -> Option<i64> {
        self.version
    }

    pub fn daemon_label(&self) -> Option<&str> {
        self.daemon_label.as_deref()
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Wait for the next daemon notification. `None` once the connection is gone.
    pub async fn recv_notification(&self) -> Option<Notification> {
        self.notifications.lock().await.recv().await
    }

    pub async fn try_recv_notification(&self) -> Option<Notification> {
        self.notifications.lock().await.try_recv().ok()
    }

    /// Fail pending calls, stop the dispatcher and close the write side.
    pub async fn close(&self) {
        self.shared.fault("connection closed by client");
        self.stop_dispatcher();
        if let Err(e) = self.writer.shutdown().await {
            tracing::debug!(error = %e, "error closing connection");
        }
    }

    fn stop_dispatcher(&self) {
        let handle = self
            .dispatcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.abort();
        }
    }
}

impl Drop for MessageController {
    fn drop(&mut self) {
        self.shared.fault("controller dropped");
        self.stop_dispatcher();
    }
}

/// Send our version and read the daemon's.
async fn handshake(
    reader: &mut FrameReader,
    writer: &FrameWriter,
    opts: &DecodeOptions,
    timeout: Duration,
) -> Result<VersionInfo> {
    writer.send(VersionInfo::local().encode()).await?;
    let frame = tokio::time::timeout(timeout, reader.next_frame())
        .await
        .map_err(|_| ClutchError::Timeout {
            method: "version".to_string(),
            timeout_ms: timeout.as_millis() as u64,
        })??;
    VersionInfo::decode(&frame, opts)
}

/// Dispatcher: read frames until the connection fails, routing responses to
/// pending callers and notifications to the channel.
async fn dispatch(
    mut reader: FrameReader,
    shared: Arc<Shared>,
    opts: DecodeOptions,
    notifications: mpsc::Sender<Notification>,
) {
    let reason = loop {
        let frame = match reader.next_frame().await {
            Ok(frame) => frame,
            Err(e) => break e.to_string(),
        };
        match decode_response(&frame, &opts) {
            Ok(Incoming::Response { tag, reply }) => shared.resolve(tag, reply),
            Ok(Incoming::Notification { name, payload }) => {
                match notifications.try_send(Notification { name, payload }) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(dropped)) => {
                        tracing::warn!(name = %dropped.name, "notification queue full, dropping");
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {}
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "undecodable frame from daemon");
                break e.to_string();
            }
        }
    };
    shared.fault(&reason);
}

/// Decide whether a reply means success for `method`.
fn check_outcome(method: Method, reply: Reply) -> Result<Reply> {
    if reply.name == ReplyName::FAILED {
        return Err(ClutchError::DaemonRejected(
            rejection_text(&reply.payload).unwrap_or_else(|| format!("{} failed", method)),
        ));
    }
    if let Some(Value::ByteString(text)) = reply.payload.get("error") {
        return Err(ClutchError::DaemonRejected(String::from_utf8_lossy(text).into_owned()));
    }
    match reply.name.as_str() {
        ReplyName::SUCCEEDED => Ok(reply),
        name if name == method.name() => Ok(reply),
        ReplyName::NOT_SUPPORTED => Err(ClutchError::Protocol(format!("daemon does not support {}", method))),
        ReplyName::BAD_FORMAT => Err(ClutchError::Protocol(format!("daemon could not parse {} request", method))),
        other => Err(ClutchError::Protocol(format!("unexpected reply {} to {}", other, method))),
    }
}

fn rejection_text(payload: &Value) -> Option<String> {
    match payload {
        Value::ByteString(text) => Some(String::from_utf8_lossy(text).into_owned()),
        Value::Dictionary(_) => payload
            .get("error")
            .and_then(Value::as_bytes)
            .map(|text| String::from_utf8_lossy(text).into_owned()),
        _ => None,
    }
}

/// `torrent-get` payload: a list of dictionaries, each with an integer id.
fn records_from(payload: Value) -> Result<Vec<Record>> {
    let items = match payload {
        Value::List(items) => items,
        other => {
            return Err(ClutchError::Protocol(format!(
                "torrent-get reply must be a list, got {}",
                other.type_name()
            )));
        }
    };
    items
        .into_iter()
        .map(|item| {
            let record = item
                .into_dict()
                .ok_or_else(|| ClutchError::Protocol("torrent-get entry is not a dictionary".into()))?;
            if !matches!(record.get(&b"id"[..]), Some(Value::Integer(_))) {
                return Err(ClutchError::Protocol("record missing id".into()));
            }
            Ok(record)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::messages::{Envelope, decode_request};
    use tokio::io::DuplexStream;

    fn options() -> ControllerOptions {
        ControllerOptions {
            request_timeout: Duration::from_secs(5),
            handshake: false,
            ..Default::default()
        }
    }

    /// Daemon side of an in-memory connection.
    struct Peer {
        reader: FrameReader,
        writer: FrameWriter,
    }

    impl Peer {
        async fn next_request(&mut self) -> (Method, Value, Tag) {
            let frame = self.reader.next_frame().await.unwrap();
            decode_request(&frame, &DecodeOptions::default()).unwrap()
        }

        async fn reply(&self, name: &str, payload: Value, tag: Tag) {
            self.writer.send(Envelope::response(name, payload, tag).encode()).await.unwrap();
        }
    }

    async fn pair() -> (Arc<MessageController>, Peer) {
        pair_with(options()).await
    }

    async fn pair_with(opts: ControllerOptions) -> (Arc<MessageController>, Peer) {
        let (client, server): (DuplexStream, DuplexStream) = tokio::io::duplex(64 * 1024);
        let controller = MessageController::start(client, opts).await.unwrap();
        let (reader, writer) = transport::split(server, DEFAULT_MAX_FRAME_LENGTH);
        (Arc::new(controller), Peer { reader, writer })
    }

    async fn wait_for_pending(controller: &MessageController, n: usize) {
        for _ in 0..200 {
            if controller.pending_count() == n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("expected {} pending calls, have {}", n, controller.pending_count());
    }

    #[test]
    fn test_options_default() {
        let opts = ControllerOptions::default();
        assert_eq!(opts.request_timeout, Duration::from_secs(30));
        assert_eq!(opts.max_frame_length, DEFAULT_MAX_FRAME_LENGTH);
        assert!(opts.handshake);
    }

    #[test]
    fn test_check_outcome() {
        let reply = |name: &str, payload: Value| Reply {
            name: name.into(),
            payload,
        };

        assert!(check_outcome(Method::TorrentStart, reply("succeeded", Value::dict())).is_ok());
        assert!(check_outcome(Method::TorrentGet, reply("torrent-get", Value::List(vec![]))).is_ok());

        let err = check_outcome(Method::TorrentRemove, reply("failed", Value::from("invalid id"))).unwrap_err();
        assert!(matches!(err, ClutchError::DaemonRejected(ref m) if m == "invalid id"));

        let err = check_outcome(
            Method::TorrentRemove,
            reply("torrent-remove", DictBuilder::new().insert("error", "invalid id").build()),
        )
        .unwrap_err();
        assert!(matches!(err, ClutchError::DaemonRejected(ref m) if m == "invalid id"));

        let err = check_outcome(Method::TorrentStop, reply("failed", Value::dict())).unwrap_err();
        assert_eq!(err.to_string(), "Daemon rejected request: torrent-stop failed");

        for name in ["not-supported", "bad-format", "torrent-get"] {
            let err = check_outcome(Method::SessionSet, reply(name, Value::dict())).unwrap_err();
            assert!(matches!(err, ClutchError::Protocol(_)), "reply {}", name);
        }
    }

    #[test]
    fn test_records_from() {
        let ok = Value::List(vec![DictBuilder::new().insert("id", 1).build()]);
        assert_eq!(records_from(ok).unwrap().len(), 1);
        assert!(records_from(Value::dict()).is_err());
        assert!(records_from(Value::List(vec![Value::Integer(1)])).is_err());
        assert!(records_from(Value::List(vec![DictBuilder::new().insert("name", "x").build()])).is_err());
    }

    #[tokio::test]
    async fn test_call_resolves_matching_reply() {
        let (controller, mut peer) = pair().await;
        let task = {
            let controller = Arc::clone(&controller);
            tokio::spawn(async move { controller.ping().await })
        };

        let (method, _, tag) = peer.next_request().await;
        assert_eq!(method, Method::Noop);
        peer.reply("succeeded", Value::dict(), tag).await;

        assert!(task.await.unwrap().is_ok());
        assert_eq!(controller.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_start_with_empty_selection_omits_ids() {
        let (controller, mut peer) = pair().await;
        let task = {
            let controller = Arc::clone(&controller);
            tokio::spawn(async move { controller.start_torrents(&Selection::Ids(vec![])).await })
        };

        let (method, args, tag) = peer.next_request().await;
        assert_eq!(method, Method::TorrentStart);
        assert!(args.get("ids").is_none());
        peer.reply("succeeded", Value::dict(), tag).await;
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_add_torrent_returns_assigned_id() {
        let (controller, mut peer) = pair().await;
        let task = {
            let controller = Arc::clone(&controller);
            tokio::spawn(async move { controller.add_torrent(&AddTorrent::metainfo(b"d4:infodee".to_vec())).await })
        };

        let (method, args, tag) = peer.next_request().await;
        assert_eq!(method, Method::TorrentAdd);
        assert_eq!(args.get("metainfo").and_then(Value::as_bytes), Some(&b"d4:infodee"[..]));
        peer.reply("torrent-add", DictBuilder::new().insert("id", 12).build(), tag).await;
        assert_eq!(task.await.unwrap().unwrap(), TorrentId(12));
    }

    #[tokio::test]
    async fn test_invalid_arguments_are_not_sent() {
        let (controller, _peer) = pair().await;
        assert!(matches!(
            controller.remove_torrents(&[]).await,
            Err(ClutchError::InvalidArgument(_))
        ));
        assert!(matches!(
            controller.torrent_get(&Selection::All, &[]).await,
            Err(ClutchError::InvalidArgument(_))
        ));
        assert!(matches!(
            controller.session_set(&SessionSettings::default()).await,
            Err(ClutchError::InvalidArgument(_))
        ));
        assert_eq!(controller.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_call_removes_pending_entry() {
        let (controller, mut peer) = pair().await;
        let task = {
            let controller = Arc::clone(&controller);
            tokio::spawn(async move { controller.ping().await })
        };
        let (_, _, tag) = peer.next_request().await;
        wait_for_pending(&controller, 1).await;
        assert!(controller.has_pending(tag));

        task.abort();
        let _ = task.await;
        assert_eq!(controller.pending_count(), 0);

        // the late reply is discarded and the connection stays usable
        peer.reply("succeeded", Value::dict(), tag).await;
        let again = {
            let controller = Arc::clone(&controller);
            tokio::spawn(async move { controller.ping().await })
        };
        let (_, _, next) = peer.next_request().await;
        assert_ne!(next, tag);
        peer.reply("succeeded", Value::dict(), next).await;
        assert!(again.await.unwrap().is_ok());
        assert!(controller.is_open());
    }

    #[tokio::test]
    async fn test_garbage_frame_faults_connection() {
        let (controller, mut peer) = pair().await;
        let task = {
            let controller = Arc::clone(&controller);
            tokio::spawn(async move { controller.ping().await })
        };
        peer.next_request().await;
        peer.writer.send(bytes::Bytes::from_static(b"not bencode")).await.unwrap();

        assert!(matches!(task.await.unwrap(), Err(ClutchError::ConnectionLost(_))));
        assert!(matches!(controller.state(), ConnectionState::Faulted(_)));
        assert!(matches!(controller.ping().await, Err(ClutchError::ConnectionLost(_))));
    }

    #[tokio::test]
    async fn test_notifications_are_forwarded() {
        let (controller, peer) = pair().await;
        peer.writer
            .send(Envelope::notification("torrent-added", Value::Integer(4)).encode())
            .await
            .unwrap();
        let notification = controller.recv_notification().await.unwrap();
        assert_eq!(notification.name, "torrent-added");
        assert_eq!(notification.payload, Value::Integer(4));
        assert!(controller.try_recv_notification().await.is_none());
    }

    #[tokio::test]
    async fn test_handshake_negotiates_version() {
        let (client, server) = tokio::io::duplex(4096);
        let (mut reader, writer) = transport::split(server, 4096);
        let daemon = tokio::spawn(async move {
            let frame = reader.next_frame().await.unwrap();
            let hello = VersionInfo::decode(&frame, &DecodeOptions::default()).unwrap();
            assert_eq!(hello.max, 2);
            writer.send(bytes::Bytes::from_static(b"d7:versiond5:label6:daemon3:maxi2e3:mini1eee")).await.unwrap();
            (reader, writer)
        });

        let opts = ControllerOptions {
            handshake: true,
            ..options()
        };
        let controller = MessageController::start(client, opts).await.unwrap();
        let _peer = daemon.await.unwrap();
        assert_eq!(controller.negotiated_version(), Some(2));
        assert_eq!(controller.daemon_label(), Some("daemon"));
    }

    #[tokio::test]
    async fn test_handshake_version_mismatch() {
        let (client, server) = tokio::io::duplex(4096);
        let (mut reader, writer) = transport::split(server, 4096);
        tokio::spawn(async move {
            let _ = reader.next_frame().await;
            writer.send(bytes::Bytes::from_static(b"d7:versioni1ee")).await.unwrap();
            tokio::time::sleep(Duration::from_millis(100)).await;
        });

        let opts = ControllerOptions {
            handshake: true,
            ..options()
        };
        let result = MessageController::start(client, opts).await;
        assert!(matches!(result, Err(ClutchError::Protocol(_))));
    }

    #[tokio::test]
    async fn test_close_fails_pending_calls() {
        let (controller, mut peer) = pair().await;
        let task = {
            let controller = Arc::clone(&controller);
            tokio::spawn(async move { controller.ping().await })
        };
        peer.next_request().await;
        wait_for_pending(&controller, 1).await;

        controller.close().await;
        assert!(matches!(task.await.unwrap(), Err(ClutchError::ConnectionLost(_))));
        assert_eq!(
            controller.state(),
            ConnectionState::Faulted("connection closed by client".into())
        );
    }

    #[tokio::test]
    async fn test_timeout_covers_blocked_write() {
        // peer never reads, so a large request fills the pipe
        let (client, _server) = tokio::io::duplex(64);
        let controller = Arc::new(MessageController::start(client, options()).await.unwrap());
        let blob = DictBuilder::new().insert("blob", vec![0u8; 4096]).build();

        let stuck = tokio::time::timeout(
            Duration::from_secs(1),
            controller.call(Method::SessionSet, blob, Duration::from_millis(50)),
        )
        .await
        .expect("call blocked past its deadline");
        assert!(matches!(stuck, Err(ClutchError::Timeout { timeout_ms: 50, .. })));

        // a partly written frame leaves the stream unusable
        assert!(matches!(controller.state(), ConnectionState::Faulted(_)));
        let next = tokio::time::timeout(
            Duration::from_secs(1),
            controller.call(Method::Noop, Value::dict(), Duration::from_millis(50)),
        )
        .await
        .expect("second call blocked");
        assert!(matches!(next, Err(ClutchError::ConnectionLost(_))));
        assert_eq!(controller.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_blocked_write_does_not_starve_other_callers() {
        let (client, _server) = tokio::io::duplex(64);
        let controller = Arc::new(MessageController::start(client, options()).await.unwrap());

        let first = {
            let controller = Arc::clone(&controller);
            tokio::spawn(async move {
                let blob = DictBuilder::new().insert("blob", vec![0u8; 4096]).build();
                controller.call(Method::SessionSet, blob, Duration::from_millis(50)).await
            })
        };
        let second = {
            let controller = Arc::clone(&controller);
            tokio::spawn(async move { controller.call(Method::Noop, Value::dict(), Duration::from_millis(50)).await })
        };

        for task in [first, second] {
            let result = tokio::time::timeout(Duration::from_secs(1), task)
                .await
                .expect("caller blocked past its deadline")
                .unwrap();
            assert!(result.is_err());
        }
    }

    #[tokio::test]
    async fn test_oversized_request_fails_locally() {
        let opts = ControllerOptions {
            max_frame_length: 256,
            ..options()
        };
        let (controller, mut peer) = pair_with(opts).await;
        let ping = {
            let controller = Arc::clone(&controller);
            tokio::spawn(async move { controller.ping().await })
        };
        let (_, _, ping_tag) = peer.next_request().await;
        wait_for_pending(&controller, 1).await;

        let result = controller.add_torrent(&AddTorrent::metainfo(vec![b'x'; 1000])).await;
        assert!(matches!(
            result,
            Err(ClutchError::Parse(ParseError::LengthOverflow { limit: 256, .. }))
        ));
        assert!(controller.is_open());
        assert_eq!(controller.pending_count(), 1);

        peer.reply("succeeded", Value::dict(), ping_tag).await;
        assert!(ping.await.unwrap().is_ok());
        let next = {
            let controller = Arc::clone(&controller);
            tokio::spawn(async move { controller.ping().await })
        };
        let (_, _, tag) = peer.next_request().await;
        peer.reply("succeeded", Value::dict(), tag).await;
        assert!(next.await.unwrap().is_ok());
    }
}
