//! The RNET session: one connection, many concurrent callers.
//!
//! # Architecture
//!
//! ```text
//!  callers ── send() ──► PendingTable (register) ──► SendQueue (High │ Low)
//!                                                          │
//!                                                     writer task ──► Connection
//!                                                                        │
//!  callers ◄── ResponseHandle ◄── PendingTable (resolve) ◄── reader task ◄┘
//!                                       ▲                      │
//!                               timeout scanner                ├─► BufferStore
//!                              (resend / time out)             └─► subscribers
//! ```
//!
//! Three background tasks run while the session is started:
//!
//! - **writer** – drains the [`SendQueue`] onto the connection.  It is the
//!   only task that writes, so frames are never interleaved.
//! - **reader** – feeds received bytes to a [`FrameDecoder`] and dispatches
//!   each frame before reading the next one, so updates to a path are applied
//!   in arrival order.
//! - **scanner** – ticks every `scan_interval`, re-queues requests whose
//!   deadline passed and times out the ones with no retries left.  A request
//!   therefore times out between `request_timeout` and
//!   `request_timeout + scan_interval` after it was written.
//!
//! # Lifecycle
//!
//! `Stopped → Starting → Started → Stopping → Stopped`.  A transport fault
//! fails every pending request with [`SessionError::Connection`] and returns
//! the session to `Stopped`; call [`Session::start`] again to resume.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use rnet_core::protocol::SequenceCounter;
use rnet_core::{
    encode_message, BufferError, BufferStore, DeviceAddress, Envelope, EventId, EventMessage,
    FrameDecoder, HandshakeKind, HandshakeMessage, Message, Path, Priority, ProtocolError,
    RequestDataMessage, SetDataMessage,
};
use tokio::sync::{broadcast, oneshot, watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::application::error::SessionError;
use crate::application::pending::{
    CorrelationKey, Expiry, OutboundFrame, PendingRequest, PendingTable, Reply,
};
use crate::application::send_queue::SendQueue;
use crate::application::subscriptions::{
    PathCallback, PathUpdate, SubscriptionId, SubscriptionRegistry,
};
use crate::infrastructure::connection::{Connection, ConnectionError, ConnectionState};

// ── Configuration ─────────────────────────────────────────────────────────────

/// Tunables for a [`Session`].
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// Source address stamped on every outbound frame.
    pub local_address: DeviceAddress,
    /// Time allowed for a reply after each attempt.
    pub request_timeout: Duration,
    /// Resends after the first attempt.
    pub retries: u32,
    /// Period of the timeout scan.
    pub scan_interval: Duration,
    /// Acknowledge inbound SetData packets with a data handshake.
    pub acknowledge_data: bool,
    /// Capacity of the [`SessionEvent`] broadcast channel.
    pub event_capacity: usize,
    /// Size of the reader's receive buffer.
    pub read_buffer_size: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            local_address: DeviceAddress::external(),
            request_timeout: Duration::from_millis(500),
            retries: 3,
            scan_interval: Duration::from_millis(25),
            acknowledge_data: true,
            event_capacity: 256,
            read_buffer_size: 1024,
        }
    }
}

impl SessionConfig {
    /// Shortest timeout scan period a session will run with.
    pub const MIN_SCAN_INTERVAL: Duration = Duration::from_millis(1);

    /// Raises zero and too-small settings to values the session can run with.
    fn sanitized(mut self) -> Self {
        // `tokio::time::interval` panics on a zero period.
        self.scan_interval = self.scan_interval.max(Self::MIN_SCAN_INTERVAL);
        self.event_capacity = self.event_capacity.max(1);
        self.read_buffer_size = self.read_buffer_size.max(1);
        self
    }
}

// ── Observable state ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Stopped,
    Starting,
    Started,
    Stopping,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Stopped => "stopped",
            SessionState::Starting => "starting",
            SessionState::Started => "started",
            SessionState::Stopping => "stopping",
        };
        f.write_str(s)
    }
}

/// A frame the session dropped or could not apply.  Never fatal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolIssue {
    /// Bytes on the wire did not form a valid frame or message.
    Decode(ProtocolError),
    /// A SetData packet arrived for a transfer that was never started.
    Reassembly {
        source: DeviceAddress,
        error: BufferError,
    },
}

impl fmt::Display for ProtocolIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolIssue::Decode(e) => write!(f, "{e}"),
            ProtocolIssue::Reassembly { source, error } => write!(f, "{error} (from {source})"),
        }
    }
}

/// Notifications published on [`Session::events`].  Purely informational.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    MessageSent(Arc<Envelope>),
    MessageReceived(Arc<Envelope>),
    ConnectionStateChanged(ConnectionState),
    SessionStateChanged(SessionState),
    ProtocolError(ProtocolIssue),
}

// ── Response handle ───────────────────────────────────────────────────────────

/// The caller's side of one request.
pub struct ResponseHandle {
    request_id: u64,
    outcome: oneshot::Receiver<Result<Reply, SessionError>>,
    inner: Arc<Inner>,
}

impl ResponseHandle {
    pub fn request_id(&self) -> u64 {
        self.request_id
    }

    /// Waits for the request to complete.
    ///
    /// # Errors
    ///
    /// [`SessionError::Timeout`], [`SessionError::Cancelled`] or
    /// [`SessionError::Connection`].
    pub async fn wait(self) -> Result<Reply, SessionError> {
        self.outcome.await.unwrap_or(Err(SessionError::Cancelled))
    }

    /// Withdraws the request; `wait` then yields [`SessionError::Cancelled`].
    ///
    /// Returns `false` if it had already completed.  Other requests are not
    /// affected.
    pub fn cancel(&self) -> bool {
        self.inner
            .pending()
            .cancel(self.request_id, SessionError::Cancelled)
    }
}

impl fmt::Debug for ResponseHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseHandle")
            .field("request_id", &self.request_id)
            .finish()
    }
}

// ── Session ───────────────────────────────────────────────────────────────────

struct Running {
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

struct Inner {
    config: SessionConfig,
    connection: Connection,
    queue: SendQueue<OutboundFrame>,
    pending: Mutex<PendingTable>,
    buffers: RwLock<BufferStore>,
    subscriptions: SubscriptionRegistry,
    request_ids: SequenceCounter,
    state_tx: watch::Sender<SessionState>,
    events: broadcast::Sender<SessionEvent>,
    running: AsyncMutex<Option<Running>>,
}

/// A client session on the RNET bus.  Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Session {
    inner: Arc<Inner>,
}

impl Session {
    pub fn new(connection: Connection, config: SessionConfig) -> Self {
        let config = config.sanitized();
        let (state_tx, _) = watch::channel(SessionState::Stopped);
        let (events, _) = broadcast::channel(config.event_capacity);
        Self {
            inner: Arc::new(Inner {
                config,
                connection,
                queue: SendQueue::new(),
                pending: Mutex::new(PendingTable::new()),
                buffers: RwLock::new(BufferStore::new()),
                subscriptions: SubscriptionRegistry::new(),
                request_ids: SequenceCounter::new(),
                state_tx,
                events,
                running: AsyncMutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    pub fn state(&self) -> SessionState {
        *self.inner.state_tx.borrow()
    }

    /// Receiver that observes every session state change.
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.inner.state_tx.subscribe()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.inner.connection.state()
    }

    /// Subscribes to traffic, state and protocol-error notifications.
    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    /// Requests registered and not yet completed.
    pub fn pending_count(&self) -> usize {
        self.inner.pending().len()
    }

    /// Opens the connection and starts the background tasks.
    ///
    /// Returns once the read loop is running.
    ///
    /// # Errors
    ///
    /// [`SessionError::AlreadyStarted`] if running, or
    /// [`SessionError::Connection`] if the transport cannot be opened (the
    /// session is then `Stopped`).
    pub async fn start(&self) -> Result<(), SessionError> {
        let inner = &self.inner;
        let mut running = inner.running.lock().await;
        if running.is_some() {
            return Err(SessionError::AlreadyStarted);
        }

        inner.set_state(SessionState::Starting);
        if let Err(e) = inner.connection.open().await {
            inner.set_state(SessionState::Stopped);
            return Err(e.into());
        }
        inner.queue.reopen();

        let cancel = CancellationToken::new();
        let (ready_tx, ready_rx) = oneshot::channel();
        let tasks = vec![
            tokio::spawn(read_loop(Arc::clone(inner), cancel.clone(), ready_tx)),
            tokio::spawn(write_loop(Arc::clone(inner), cancel.clone())),
            tokio::spawn(scan_loop(Arc::clone(inner), cancel.clone())),
            tokio::spawn(forward_connection_state(Arc::clone(inner), cancel.clone())),
        ];
        // Err only if the reader already exited, in which case it faulted
        // and will tear the session down once we release the lock.
        let _ = ready_rx.await;

        *running = Some(Running { cancel, tasks });
        inner.set_state(SessionState::Started);
        info!(endpoint = %inner.connection.endpoint(), "session started");
        Ok(())
    }

    /// Stops the background tasks, closes the connection, and cancels every
    /// pending request.  Does nothing if already stopped.
    pub async fn stop(&self) {
        let inner = &self.inner;
        let Some(running) = inner.running.lock().await.take() else {
            return;
        };

        inner.set_state(SessionState::Stopping);
        running.cancel.cancel();
        let dropped = inner.queue.close();
        let cancelled = inner.pending().fail_all(SessionError::Cancelled);
        inner.connection.close().await;
        for task in running.tasks {
            if let Err(e) = task.await {
                error!("session task ended abnormally: {e}");
            }
        }
        inner.set_state(SessionState::Stopped);
        info!(cancelled, dropped, "session stopped");
    }

    /// Queues `message` for `target` and returns a handle to its outcome.
    ///
    /// Events resolve with [`Reply::Ack`], RequestData with [`Reply::Data`],
    /// everything else (and anything sent to a broadcast address) with
    /// [`Reply::Sent`] once written.
    ///
    /// # Errors
    ///
    /// [`SessionError::NotStarted`], or [`SessionError::Encode`] if the
    /// message cannot be framed.
    pub fn send(
        &self,
        target: DeviceAddress,
        message: Message,
        priority: Priority,
    ) -> Result<ResponseHandle, SessionError> {
        if self.state() != SessionState::Started {
            return Err(SessionError::NotStarted);
        }
        let (request_id, outcome) = self.inner.enqueue(target, message, priority)?;
        Ok(ResponseHandle {
            request_id,
            outcome,
            inner: Arc::clone(&self.inner),
        })
    }

    /// Sends an event to `path` on `target` and waits for its handshake.
    ///
    /// # Errors
    ///
    /// See [`send`](Self::send) and [`ResponseHandle::wait`].
    pub async fn send_event(
        &self,
        target: DeviceAddress,
        path: Path,
        event_id: EventId,
        priority: Priority,
    ) -> Result<Reply, SessionError> {
        let event = EventMessage::new(path, event_id, priority);
        self.send(target, Message::Event(event), priority)?.wait().await
    }

    /// Returns the value at `path` on `target`.
    ///
    /// Served from the buffer cache when a complete value is known and
    /// `refresh` is `false`; otherwise issues a RequestData and waits for the
    /// full reply.
    ///
    /// # Errors
    ///
    /// See [`send`](Self::send) and [`ResponseHandle::wait`].
    pub async fn read_path(
        &self,
        target: DeviceAddress,
        path: &Path,
        refresh: bool,
    ) -> Result<Arc<[u8]>, SessionError> {
        if !refresh {
            if let Some(value) = self.cached(target, path) {
                debug!(%target, %path, "read served from cache");
                return Ok(value);
            }
        }

        let request = RequestDataMessage::value(path.clone());
        match self
            .send(target, Message::RequestData(request), Priority::Low)?
            .wait()
            .await?
        {
            Reply::Data(value) => Ok(value),
            other => Err(SessionError::UnexpectedReply(format!("{other:?}"))),
        }
    }

    /// Writes `value` to `path` on `target`, split into SetData packets, and
    /// waits until every packet has been written.
    ///
    /// # Errors
    ///
    /// See [`send`](Self::send).  If a packet fails, the packets queued after
    /// it are withdrawn.
    pub async fn write_path(
        &self,
        target: DeviceAddress,
        path: &Path,
        value: &[u8],
        priority: Priority,
    ) -> Result<(), SessionError> {
        let packets = SetDataMessage::split(path, &Path::root(), value)?;
        let mut handles = Vec::with_capacity(packets.len());
        for packet in packets {
            match self.send(target, Message::SetData(packet), priority) {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    handles.iter().for_each(|h| {
                        h.cancel();
                    });
                    return Err(e);
                }
            }
        }

        let mut failure = None;
        for handle in handles {
            if failure.is_some() {
                handle.cancel();
            } else if let Err(e) = handle.wait().await {
                failure = Some(e);
            }
        }
        failure.map_or(Ok(()), Err)
    }

    /// The last complete value seen at `path` on `target`, without any traffic.
    pub fn cached(&self, target: DeviceAddress, path: &Path) -> Option<Arc<[u8]>> {
        self.inner.buffers_read().read(&target, path)
    }

    /// Discards the buffered value at `path` on `target`.
    pub fn forget_path(&self, target: DeviceAddress, path: &Path) -> bool {
        self.inner.buffers_write().remove(&target, path)
    }

    /// Calls `callback` for every fragment and completion at `path` on `target`.
    pub fn subscribe<F>(&self, target: DeviceAddress, path: Path, callback: F) -> SubscriptionId
    where
        F: Fn(&PathUpdate) + Send + Sync + 'static,
    {
        let callback: PathCallback = Arc::new(callback);
        self.inner.subscriptions.subscribe(target, path, callback)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.subscriptions.unsubscribe(id)
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.state())
            .field("connection", &self.inner.connection)
            .field("pending", &self.pending_count())
            .finish()
    }
}

// ── Shared internals ──────────────────────────────────────────────────────────

impl Inner {
    fn pending(&self) -> MutexGuard<'_, PendingTable> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn buffers_read(&self) -> std::sync::RwLockReadGuard<'_, BufferStore> {
        self.buffers.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn buffers_write(&self) -> std::sync::RwLockWriteGuard<'_, BufferStore> {
        self.buffers.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: SessionState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            debug!(from = %previous, to = %state, "session state");
            self.publish(SessionEvent::SessionStateChanged(state));
        }
    }

    fn publish(&self, event: SessionEvent) {
        // No receivers is normal.
        let _ = self.events.send(event);
    }

    /// Encodes, registers and queues one message.
    fn enqueue(
        &self,
        target: DeviceAddress,
        message: Message,
        priority: Priority,
    ) -> Result<(u64, oneshot::Receiver<Result<Reply, SessionError>>), SessionError> {
        let key = CorrelationKey::for_request(target, &message);
        let envelope = Envelope::new(target, self.config.local_address, message);
        let bytes: Arc<[u8]> = Arc::from(encode_message(&envelope)?);
        let request_id = self.request_ids.next();
        let frame = OutboundFrame {
            request_id,
            envelope: Arc::new(envelope),
            bytes,
        };

        let (tx, rx) = oneshot::channel();
        self.pending().insert(PendingRequest::new(
            frame.clone(),
            priority,
            key,
            self.config.retries,
            tx,
        ));
        if self.queue.push(priority, frame).is_err() {
            // Raced with stop or a fault; the table may already be drained.
            self.pending().cancel(request_id, SessionError::Cancelled);
        }
        Ok((request_id, rx))
    }

    /// Tears the session down after a transport failure.
    async fn fault(&self, err: ConnectionError) {
        let Some(running) = self.running.lock().await.take() else {
            // Already stopping.
            return;
        };
        error!("session faulted: {err}");
        self.set_state(SessionState::Stopping);
        running.cancel.cancel();
        self.queue.close();
        let failed = self.pending().fail_all(err.into());
        self.connection.close().await;
        // Tasks exit on the cancelled token; the faulting task is one of them.
        drop(running.tasks);
        self.set_state(SessionState::Stopped);
        warn!(failed, "pending requests failed by connection fault");
    }

    // ── Inbound dispatch ──────────────────────────────────────────────────────

    fn dispatch(&self, envelope: Envelope) {
        let envelope = Arc::new(envelope);
        debug!(
            source = %envelope.source,
            target = %envelope.target,
            kind = envelope.message.name(),
            "frame received"
        );
        self.publish(SessionEvent::MessageReceived(Arc::clone(&envelope)));

        let to_us =
            envelope.target == self.config.local_address || envelope.target.is_broadcast();
        if !to_us {
            return;
        }

        match &envelope.message {
            Message::Handshake(hs) => {
                let resolved = CorrelationKey::for_handshake(envelope.source, hs.kind)
                    .and_then(|key| self.pending().resolve(&key, Reply::Ack(hs.kind)));
                if resolved.is_none() {
                    debug!(
                        source = %envelope.source,
                        kind = ?hs.kind,
                        "unmatched handshake dropped"
                    );
                }
            }
            Message::SetData(packet) => self.on_set_data(envelope.source, packet),
            Message::Unknown { message_type, .. } => {
                debug!(message_type, "ignoring unknown message type");
            }
            Message::Event(_) | Message::RequestData(_) => {}
        }
    }

    fn on_set_data(&self, source: DeviceAddress, packet: &SetDataMessage) {
        if self.config.acknowledge_data {
            let ack = Message::Handshake(HandshakeMessage {
                kind: HandshakeKind::Data,
            });
            if let Err(e) = self.enqueue(source, ack, Priority::High) {
                warn!("could not queue data handshake: {e}");
            }
        }

        let path = buffer_path(packet).clone();
        let fragment: Arc<[u8]> = Arc::from(packet.data.as_slice());

        let completed = {
            let mut buffers = self.buffers_write();
            let result = buffers.device_mut(source).write_packet(
                &path,
                packet.packet_number,
                packet.packet_count,
                &fragment,
            );
            match result {
                Ok(completed) => completed,
                Err(error) => {
                    drop(buffers);
                    warn!(%source, %path, packet = packet.packet_number, "{error}");
                    self.publish(SessionEvent::ProtocolError(ProtocolIssue::Reassembly {
                        source,
                        error,
                    }));
                    return;
                }
            }
        };

        self.subscriptions.notify(
            source,
            &path,
            &PathUpdate::Fragment {
                device: source,
                path: path.clone(),
                packet_number: packet.packet_number,
                packet_count: packet.packet_count,
                bytes: fragment,
            },
        );

        if let Some(value) = completed {
            self.subscriptions.notify(
                source,
                &path,
                &PathUpdate::Complete {
                    device: source,
                    path: path.clone(),
                    value: Arc::clone(&value),
                },
            );
            let key = CorrelationKey::data_from(source, path);
            self.pending().resolve(&key, Reply::Data(value));
        }
    }
}

/// The path a SetData packet's value belongs to.
///
/// Replies to a RequestData name the requested path as their source path;
/// unsolicited writes leave it empty and name the path in the target path.
fn buffer_path(packet: &SetDataMessage) -> &Path {
    if packet.source_path.is_empty() {
        &packet.target_path
    } else {
        &packet.source_path
    }
}

// ── Background tasks ──────────────────────────────────────────────────────────

async fn read_loop(inner: Arc<Inner>, cancel: CancellationToken, ready: oneshot::Sender<()>) {
    let mut decoder = FrameDecoder::new();
    let mut buf = vec![0u8; inner.config.read_buffer_size];
    let _ = ready.send(());

    loop {
        let received = tokio::select! {
            _ = cancel.cancelled() => break,
            r = inner.connection.receive(&mut buf) => r,
        };
        let n = match received {
            Ok(n) => n,
            Err(e) => {
                if !cancel.is_cancelled() {
                    inner.fault(e).await;
                }
                break;
            }
        };

        decoder.extend(&buf[..n]);
        loop {
            match decoder.next_frame() {
                Ok(Some(frame)) => match rnet_core::decode_message(&frame) {
                    Ok(envelope) => inner.dispatch(envelope),
                    Err(e) => report_decode_error(&inner, e),
                },
                Ok(None) => break,
                Err(e) => report_decode_error(&inner, e),
            }
        }
    }
    debug!("read loop exited");
}

fn report_decode_error(inner: &Inner, error: ProtocolError) {
    warn!("dropped inbound frame: {error}");
    inner.publish(SessionEvent::ProtocolError(ProtocolIssue::Decode(error)));
}

async fn write_loop(inner: Arc<Inner>, cancel: CancellationToken) {
    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => break,
            f = inner.queue.pop() => match f {
                Some(f) => f,
                None => break,
            },
        };
        // Cancelled or already answered while queued.
        if !inner.pending().contains(frame.request_id) {
            continue;
        }

        let sent = tokio::select! {
            _ = cancel.cancelled() => break,
            r = inner.connection.send(&frame.bytes) => r,
        };
        if let Err(e) = sent {
            if !cancel.is_cancelled() {
                inner.fault(e).await;
            }
            break;
        }
        debug!(
            target = %frame.envelope.target,
            kind = frame.envelope.message.name(),
            bytes = frame.bytes.len(),
            "frame sent"
        );
        inner.pending().mark_written(
            frame.request_id,
            Instant::now(),
            inner.config.request_timeout,
        );
        inner.publish(SessionEvent::MessageSent(frame.envelope));
    }
    debug!("write loop exited");
}

async fn scan_loop(inner: Arc<Inner>, cancel: CancellationToken) {
    let mut tick = tokio::time::interval(inner.config.scan_interval);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tick.tick() => {}
        }
        let expired = inner.pending().expire(Instant::now());
        for expiry in expired {
            match expiry {
                Expiry::Resend {
                    frame,
                    priority,
                    attempt,
                } => {
                    debug!(request = frame.request_id, attempt, "no reply, resending");
                    let id = frame.request_id;
                    if inner.queue.push(priority, frame).is_err() {
                        inner.pending().cancel(id, SessionError::Cancelled);
                    }
                }
                Expiry::TimedOut {
                    request_id,
                    attempts,
                } => {
                    warn!(request = request_id, attempts, "request timed out");
                }
            }
        }
    }
}

async fn forward_connection_state(inner: Arc<Inner>, cancel: CancellationToken) {
    let mut states = inner.connection.watch_state();
    inner.publish(SessionEvent::ConnectionStateChanged(*states.borrow_and_update()));
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
        let state = *states.borrow_and_update();
        inner.publish(SessionEvent::ConnectionStateChanged(state));
    }
}
