//! Room sessions.
//!
//! [`Room`] is a thin handle that talks to a background room loop over an
//! unbounded MPSC channel. The loop owns the [`Transport`] and the state
//! [`Serializer`]; it decodes frames strictly in arrival order and invokes the
//! handlers registered on the handle.
//!
//! A session moves through `Connecting → Open → (Leaving) → Closed`. The
//! leave handlers run exactly once, whichever path closed the session.
//!
//! # Example
//!
//! ```rust,ignore
//! let room = Room::join(connector, RoomOptions::new("lobby", "r1", "s1", url)).await?;
//!
//! room.on_message("PLAYER_STATE", |payload| println!("{payload:?}"));
//! room.on_leave(|code, reason| println!("left: {code} {reason}"));
//! room.send("READY", None)?;
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::error::{DecodeError, NetError, Result};
use crate::error_codes::CloseCode;
use crate::protocol::{Frame, MessageKind, Payload, ReconnectionToken};
use crate::serializer::{serializer_for, Change, Serializer, StateHandle};
use crate::transport::{Connector, Transport, TransportEvent};

/// Default time to wait for the join confirmation.
pub(crate) const DEFAULT_JOIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Default timeout for a graceful [`Room::dispose`].
pub(crate) const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

pub(crate) const DEFAULT_DEV_MODE_RETRIES: u32 = 8;
pub(crate) const DEFAULT_DEV_MODE_RETRY_INTERVAL: Duration = Duration::from_secs(2);

/// Close reason used when a state patch could not be applied.
pub const DESYNC_REASON: &str = "state desynchronized";

// ── Options ─────────────────────────────────────────────────────────

/// Parameters for opening a room session from a seat reservation.
#[derive(Debug, Clone)]
pub struct RoomOptions {
    /// Room handler name, e.g. `"lobby"`.
    pub name: String,
    pub room_id: String,
    pub session_id: String,
    /// Full room connection URL.
    pub url: String,
    /// Headers for the connection upgrade.
    pub headers: Vec<(String, String)>,
    /// The server runs in development mode and may restart rooms.
    pub dev_mode: bool,
    /// Time to wait for the join confirmation. Defaults to **10 seconds**.
    pub join_timeout: Duration,
    /// Reconnect attempts after a dev-mode restart. Defaults to **8**.
    pub dev_mode_retries: u32,
    /// Delay between dev-mode reconnect attempts. Defaults to **2 seconds**.
    pub dev_mode_retry_interval: Duration,
    /// Graceful teardown budget for [`Room::dispose`]. Defaults to **1 second**.
    pub shutdown_timeout: Duration,
}

impl RoomOptions {
    pub fn new(
        name: impl Into<String>,
        room_id: impl Into<String>,
        session_id: impl Into<String>,
        url: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            room_id: room_id.into(),
            session_id: session_id.into(),
            url: url.into(),
            headers: Vec::new(),
            dev_mode: false,
            join_timeout: DEFAULT_JOIN_TIMEOUT,
            dev_mode_retries: DEFAULT_DEV_MODE_RETRIES,
            dev_mode_retry_interval: DEFAULT_DEV_MODE_RETRY_INTERVAL,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_headers(mut self, headers: Vec<(String, String)>) -> Self {
        self.headers = headers;
        self
    }

    #[must_use]
    pub fn with_dev_mode(mut self, dev_mode: bool) -> Self {
        self.dev_mode = dev_mode;
        self
    }

    #[must_use]
    pub fn with_join_timeout(mut self, timeout: Duration) -> Self {
        self.join_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_dev_mode_retry(mut self, retries: u32, interval: Duration) -> Self {
        self.dev_mode_retries = retries;
        self.dev_mode_retry_interval = interval;
        self
    }

    #[must_use]
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

// ── Shared state ────────────────────────────────────────────────────

/// Lifecycle of a room session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RoomState {
    Connecting = 0,
    Open = 1,
    Leaving = 2,
    Closed = 3,
}

impl RoomState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Connecting,
            1 => Self::Open,
            2 => Self::Leaving,
            _ => Self::Closed,
        }
    }
}

type MessageHandler = Arc<dyn Fn(Payload) + Send + Sync>;
type CodeHandler = Arc<dyn Fn(u16, &str) + Send + Sync>;
type ErrorHandler = Arc<dyn Fn(i32, &str) + Send + Sync>;
type StateChangeHandler = Arc<dyn Fn(&StateHandle, &[Change]) + Send + Sync>;

#[derive(Default)]
struct Listeners {
    messages: HashMap<MessageKind, MessageHandler>,
    leave: Vec<CodeHandler>,
    error: Vec<ErrorHandler>,
    state_change: Vec<StateChangeHandler>,
    /// Close info once the leave handlers have run.
    closed_with: Option<(u16, String)>,
}

struct Shared {
    name: String,
    room_id: String,
    session_id: String,
    state: AtomicU8,
    reconnection_token: Mutex<Option<ReconnectionToken>>,
    serializer_id: Mutex<Option<String>>,
    state_handle: Mutex<Option<StateHandle>>,
    listeners: Mutex<Listeners>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

impl Shared {
    fn set_state(&self, state: RoomState) {
        self.state.store(state as u8, Ordering::Release);
    }

    fn state(&self) -> RoomState {
        RoomState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn dispatch(&self, kind: MessageKind, payload: Payload) {
        let handler = lock(&self.listeners).messages.get(&kind).cloned();
        match handler {
            Some(handler) => handler(payload),
            None => warn!(room_id = %self.room_id, %kind, "no handler registered for message type"),
        }
    }

    fn emit_error(&self, code: i32, message: &str) {
        let handlers = lock(&self.listeners).error.clone();
        for handler in handlers {
            handler(code, message);
        }
    }

    fn emit_state_change(&self, state: &StateHandle, changes: &[Change]) {
        let handlers = lock(&self.listeners).state_change.clone();
        for handler in handlers {
            handler(state, changes);
        }
    }

    fn emit_leave(&self, code: u16, reason: &str) {
        let handlers = {
            let mut listeners = lock(&self.listeners);
            if listeners.closed_with.is_some() {
                return;
            }
            listeners.closed_with = Some((code, reason.to_owned()));
            listeners.leave.clone()
        };
        self.set_state(RoomState::Closed);
        info!(room_id = %self.room_id, code, reason, "left room");
        for handler in handlers {
            handler(code, reason);
        }
    }
}

// ── Room handle ─────────────────────────────────────────────────────

enum Command {
    Send(Vec<u8>),
    Leave { consented: bool },
}

/// Handle to one room session.
///
/// Dropping the handle aborts the background loop without a close
/// handshake; call [`dispose`](Room::dispose) for a graceful teardown.
pub struct Room {
    cmd_tx: mpsc::UnboundedSender<Command>,
    shared: Arc<Shared>,
    task: Option<tokio::task::JoinHandle<()>>,
    shutdown_timeout: Duration,
}

impl Room {
    /// Connect to the room and wait for the server's join confirmation.
    ///
    /// # Errors
    ///
    /// - connection failures from the [`Connector`]
    /// - [`NetError::ServerError`] if the server sends an error frame first
    /// - [`NetError::ConnectionClosed`] if the connection closes first
    /// - [`NetError::UnknownSerializer`] / [`NetError::Decode`] if the
    ///   confirmation cannot be applied
    /// - [`NetError::Timeout`] if nothing arrives within the join timeout
    pub async fn join(connector: Arc<dyn Connector>, options: RoomOptions) -> Result<Self> {
        debug!(room = %options.name, room_id = %options.room_id, "joining room");
        let transport = connector.connect(&options.url, &options.headers).await?;
        let join_timeout = options.join_timeout;
        let (mut room, join_rx) = Self::start(transport, connector, options);

        match tokio::time::timeout(join_timeout, join_rx).await {
            Ok(Ok(Ok(()))) => Ok(room),
            Ok(Ok(Err(e))) => {
                room.abort();
                Err(e)
            }
            Ok(Err(_)) => {
                room.abort();
                Err(NetError::NotConnected)
            }
            Err(_) => {
                warn!(room_id = %room.shared.room_id, "join confirmation timed out");
                room.abort();
                Err(NetError::Timeout)
            }
        }
    }

    fn start(
        transport: Box<dyn Transport>,
        connector: Arc<dyn Connector>,
        options: RoomOptions,
    ) -> (Self, oneshot::Receiver<Result<()>>) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (join_tx, join_rx) = oneshot::channel();
        let shared = Arc::new(Shared {
            name: options.name.clone(),
            room_id: options.room_id.clone(),
            session_id: options.session_id.clone(),
            state: AtomicU8::new(RoomState::Connecting as u8),
            reconnection_token: Mutex::new(None),
            serializer_id: Mutex::new(None),
            state_handle: Mutex::new(None),
            listeners: Mutex::new(Listeners::default()),
        });
        let shutdown_timeout = options.shutdown_timeout;
        let task = tokio::spawn(room_loop(
            transport,
            connector,
            options,
            cmd_rx,
            Arc::clone(&shared),
            join_tx,
        ));
        let room = Self {
            cmd_tx,
            shared,
            task: Some(task),
            shutdown_timeout,
        };
        (room, join_rx)
    }

    fn abort(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.shared.set_state(RoomState::Closed);
    }

    // ── Accessors ───────────────────────────────────────────────────

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn room_id(&self) -> &str {
        &self.shared.room_id
    }

    pub fn session_id(&self) -> &str {
        &self.shared.session_id
    }

    /// Credential for resuming this session, once the server issued one.
    pub fn reconnection_token(&self) -> Option<ReconnectionToken> {
        lock(&self.shared.reconnection_token).clone()
    }

    /// Id of the serializer announced by the server.
    pub fn serializer_id(&self) -> Option<String> {
        lock(&self.shared.serializer_id).clone()
    }

    /// Read-only view of the synchronized state, for schema rooms.
    pub fn state(&self) -> Option<StateHandle> {
        lock(&self.shared.state_handle).clone()
    }

    pub fn state_kind(&self) -> RoomState {
        self.shared.state()
    }

    pub fn is_open(&self) -> bool {
        self.shared.state() == RoomState::Open
    }

    // ── Listeners ───────────────────────────────────────────────────

    /// Register the handler for one message type.
    ///
    /// Only the first registration per type takes effect.
    pub fn on_message<F>(&self, kind: impl Into<MessageKind>, handler: F)
    where
        F: Fn(Payload) + Send + Sync + 'static,
    {
        let kind = kind.into();
        let mut listeners = lock(&self.shared.listeners);
        if listeners.messages.contains_key(&kind) {
            debug!(%kind, "message handler already registered, ignoring");
            return;
        }
        listeners.messages.insert(kind, Arc::new(handler));
    }

    /// Register a leave handler.
    ///
    /// If the session already closed, the handler runs immediately with the
    /// close code and reason.
    pub fn on_leave<F>(&self, handler: F)
    where
        F: Fn(u16, &str) + Send + Sync + 'static,
    {
        let handler: CodeHandler = Arc::new(handler);
        let closed = {
            let mut listeners = lock(&self.shared.listeners);
            listeners.leave.push(Arc::clone(&handler));
            listeners.closed_with.clone()
        };
        if let Some((code, reason)) = closed {
            handler(code, &reason);
        }
    }

    /// Register an error handler. Errors are informational and do not close
    /// the session by themselves.
    pub fn on_error<F>(&self, handler: F)
    where
        F: Fn(i32, &str) + Send + Sync + 'static,
    {
        lock(&self.shared.listeners).error.push(Arc::new(handler));
    }

    /// Register a handler for applied snapshots and patches.
    pub fn on_state_change<F>(&self, handler: F)
    where
        F: Fn(&StateHandle, &[Change]) + Send + Sync + 'static,
    {
        lock(&self.shared.listeners)
            .state_change
            .push(Arc::new(handler));
    }

    /// Drop every registered handler.
    pub fn remove_all_listeners(&self) {
        let mut listeners = lock(&self.shared.listeners);
        listeners.messages.clear();
        listeners.leave.clear();
        listeners.error.clear();
        listeners.state_change.clear();
    }

    // ── Commands ────────────────────────────────────────────────────

    /// Send an application message with an optional JSON payload.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::NotConnected`] unless the session is open; nothing
    /// is sent in that case.
    pub fn send(&self, kind: impl Into<MessageKind>, data: Option<serde_json::Value>) -> Result<()> {
        self.queue(Frame::Message {
            kind: kind.into(),
            payload: data,
        })
    }

    /// Send an application message with a raw byte payload.
    ///
    /// # Errors
    ///
    /// See [`send`](Self::send).
    pub fn send_bytes(&self, kind: impl Into<MessageKind>, bytes: Vec<u8>) -> Result<()> {
        self.queue(Frame::MessageBytes {
            kind: kind.into(),
            bytes,
        })
    }

    fn queue(&self, frame: Frame) -> Result<()> {
        if !self.is_open() {
            warn!(room_id = %self.shared.room_id, "room not open, dropping outbound message");
            return Err(NetError::NotConnected);
        }
        let bytes = frame.encode()?;
        self.cmd_tx
            .send(Command::Send(bytes))
            .map_err(|_| NetError::NotConnected)
    }

    /// Leave the room.
    ///
    /// A consented leave asks the server to close the session; otherwise the
    /// connection is closed directly. The leave handlers run once the close
    /// completes. Leaving a session that is not open is a no-op.
    pub fn leave(&self, consented: bool) {
        let state = self.shared.state();
        if !matches!(state, RoomState::Open | RoomState::Connecting) {
            return;
        }
        self.shared.set_state(RoomState::Leaving);
        let _ = self.cmd_tx.send(Command::Leave { consented });
    }

    /// Leave the room and wait for the loop to exit, aborting it after the
    /// shutdown timeout.
    pub async fn dispose(&mut self) {
        self.leave(true);
        if let Some(mut task) = self.task.take() {
            match tokio::time::timeout(self.shutdown_timeout, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(join_err)) => {
                    warn!("room loop terminated with join error: {join_err}");
                }
                Err(_) => {
                    warn!(room_id = %self.shared.room_id, "room loop did not exit within timeout; aborting task");
                    task.abort();
                    if let Err(join_err) = task.await {
                        debug!("room loop aborted: {join_err}");
                    }
                }
            }
        }
        // No-op when the loop already reported the close.
        self.shared
            .emit_leave(CloseCode::Consented.code(), "left without server confirmation");
    }
}

impl std::fmt::Debug for Room {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Room")
            .field("name", &self.shared.name)
            .field("room_id", &self.shared.room_id)
            .field("state", &self.state_kind())
            .field("has_task", &self.task.is_some())
            .finish()
    }
}

impl Drop for Room {
    fn drop(&mut self) {
        // Drop cannot await a close handshake; aborting drops the transport.
        if let Some(task) = self.task.take() {
            task.abort();
            self.shared
                .emit_leave(CloseCode::Consented.code(), "room handle dropped");
        }
    }
}

// ── Room loop ───────────────────────────────────────────────────────

/// How one connection ended.
struct SessionEnd {
    code: u16,
    reason: String,
}

struct Session<'a> {
    shared: &'a Shared,
    serializer: Option<Box<dyn Serializer>>,
    join_tx: Option<oneshot::Sender<Result<()>>>,
}

impl Session<'_> {
    fn fail_join(&mut self, err: NetError) {
        if let Some(tx) = self.join_tx.take() {
            let _ = tx.send(Err(err));
        }
    }

    fn teardown(&mut self) {
        if let Some(mut serializer) = self.serializer.take() {
            serializer.teardown();
        }
    }
}

/// Background loop for one room.
///
/// Exits when the connection closes (after dev-mode retries, if any) or when
/// the handle is dropped.
async fn room_loop(
    mut transport: Box<dyn Transport>,
    connector: Arc<dyn Connector>,
    options: RoomOptions,
    mut cmd_rx: mpsc::UnboundedReceiver<Command>,
    shared: Arc<Shared>,
    join_tx: oneshot::Sender<Result<()>>,
) {
    debug!(room_id = %shared.room_id, "room loop started");
    let mut session = Session {
        shared: &shared,
        serializer: None,
        join_tx: Some(join_tx),
    };

    loop {
        let SessionEnd { code, reason } =
            run_connection(transport.as_mut(), &mut cmd_rx, &mut session).await;
        session.teardown();

        let restart = code == CloseCode::DevModeRestart.code()
            && options.dev_mode
            && session.join_tx.is_none()
            && shared.state() != RoomState::Leaving;
        if restart {
            shared.set_state(RoomState::Connecting);
            if let Some(next) = dev_mode_reconnect(&*connector, &options, &mut cmd_rx).await {
                transport = next;
                continue;
            }
        }

        session.fail_join(NetError::ConnectionClosed {
            code,
            reason: reason.clone(),
        });
        shared.emit_leave(code, &reason);
        break;
    }

    debug!(room_id = %shared.room_id, "room loop exited");
}

async fn run_connection(
    transport: &mut dyn Transport,
    cmd_rx: &mut mpsc::UnboundedReceiver<Command>,
    session: &mut Session<'_>,
) -> SessionEnd {
    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(Command::Send(bytes)) => {
                        if let Err(e) = transport.send(bytes).await {
                            error!("transport send error: {e}");
                            let _ = transport.close(None, None).await;
                            return SessionEnd {
                                code: CloseCode::Abnormal.code(),
                                reason: e.to_string(),
                            };
                        }
                    }
                    Some(Command::Leave { consented }) => {
                        if consented && transport.is_open() {
                            let leave = Frame::Leave { code: CloseCode::Consented.code(), reason: None };
                            if let Ok(bytes) = leave.encode() {
                                let _ = transport.send(bytes).await;
                            }
                        } else {
                            let _ = transport.close(Some(CloseCode::Normal.code()), None).await;
                        }
                    }
                    None => {
                        debug!("command channel closed, closing room transport");
                        let _ = transport.close(Some(CloseCode::Consented.code()), None).await;
                        return SessionEnd {
                            code: CloseCode::Consented.code(),
                            reason: "room handle dropped".into(),
                        };
                    }
                }
            }

            event = transport.recv() => {
                match event {
                    Some(TransportEvent::Message(bytes)) => {
                        if let Some(end) = handle_frame(transport, session, &bytes).await {
                            return end;
                        }
                    }
                    Some(TransportEvent::Error { code, reason }) => {
                        warn!(code, %reason, "room transport error");
                        session.shared.emit_error(i32::from(code), &reason);
                    }
                    Some(TransportEvent::Close { code, reason }) => {
                        debug!(code, %reason, "room transport closed");
                        return SessionEnd { code, reason };
                    }
                    None => {
                        return SessionEnd {
                            code: CloseCode::Abnormal.code(),
                            reason: "connection lost".into(),
                        };
                    }
                }
            }
        }
    }
}

/// Apply one inbound frame. Returns `Some` when the frame ends the
/// connection.
async fn handle_frame(
    transport: &mut dyn Transport,
    session: &mut Session<'_>,
    bytes: &[u8],
) -> Option<SessionEnd> {
    let shared = session.shared;
    let frame = match Frame::decode(bytes) {
        Ok(frame) => frame,
        Err(DecodeError::UnknownFrame(kind)) => {
            warn!(kind, "ignoring unknown frame kind");
            return None;
        }
        Err(e) => {
            warn!(error = %e, "ignoring malformed frame");
            return None;
        }
    };

    match frame {
        Frame::JoinRoom {
            reconnection_token,
            serializer_id,
            handshake,
        } => {
            if let Err(e) = confirm_join(transport, session, reconnection_token, &serializer_id, &handshake).await {
                error!(room_id = %shared.room_id, error = %e, "failed to apply join confirmation");
                session.fail_join(e);
                let _ = transport.close(Some(CloseCode::WithError.code()), None).await;
                return Some(SessionEnd {
                    code: CloseCode::WithError.code(),
                    reason: "join failed".into(),
                });
            }
        }
        Frame::Handshake { bytes } => match session.serializer.as_mut() {
            Some(serializer) => {
                if let Err(e) = serializer.handshake(&bytes) {
                    shared.emit_error(i32::from(CloseCode::WithError.code()), &e.to_string());
                }
            }
            None => warn!("handshake frame before join confirmation, ignoring"),
        },
        Frame::Error { code, message } => {
            warn!(code, reason = %message, "room error");
            if let Some(tx) = session.join_tx.take() {
                let _ = tx.send(Err(NetError::ServerError {
                    code,
                    message: message.clone(),
                }));
            }
            shared.emit_error(code, &message);
        }
        Frame::Leave { code, reason } => {
            debug!(code, ?reason, "server requested leave");
            let _ = transport.close(Some(code), reason.clone()).await;
            return Some(SessionEnd {
                code,
                reason: reason.unwrap_or_default(),
            });
        }
        Frame::StateSnapshot(bytes) => return apply_state(transport, session, &bytes, true).await,
        Frame::StatePatch(bytes) => return apply_state(transport, session, &bytes, false).await,
        Frame::Message { kind, payload } => {
            shared.dispatch(kind, payload.map_or(Payload::Empty, Payload::Json));
        }
        Frame::MessageBytes { kind, bytes } => shared.dispatch(kind, Payload::Bytes(bytes)),
        Frame::JoinAck => debug!("ignoring bare join frame from server"),
    }
    None
}

async fn confirm_join(
    transport: &mut dyn Transport,
    session: &mut Session<'_>,
    token: String,
    serializer_id: &str,
    handshake: &[u8],
) -> Result<()> {
    let shared = session.shared;
    if !token.is_empty() {
        *lock(&shared.reconnection_token) =
            Some(ReconnectionToken::new(shared.room_id.clone(), token));
    }

    let existing = lock(&shared.state_handle).clone();
    let mut serializer = serializer_for(serializer_id, existing)?;
    if !handshake.is_empty() {
        serializer.handshake(handshake)?;
    }
    if let Some(state) = serializer.state() {
        *lock(&shared.state_handle) = Some(state);
    }
    *lock(&shared.serializer_id) = Some(serializer_id.to_owned());
    session.serializer = Some(serializer);

    transport.send(Frame::JoinAck.encode()?).await?;
    shared.set_state(RoomState::Open);
    info!(room = %shared.name, room_id = %shared.room_id, serializer = serializer_id, "joined room");
    if let Some(tx) = session.join_tx.take() {
        let _ = tx.send(Ok(()));
    }
    Ok(())
}

async fn apply_state(
    transport: &mut dyn Transport,
    session: &mut Session<'_>,
    bytes: &[u8],
    snapshot: bool,
) -> Option<SessionEnd> {
    let shared = session.shared;
    let Some(serializer) = session.serializer.as_mut() else {
        error!("state frame before join confirmation, ignoring");
        return None;
    };
    let applied = if snapshot {
        serializer.set_state(bytes)
    } else {
        serializer.patch(bytes)
    };
    match applied {
        Ok(changes) => {
            if let Some(state) = serializer.state() {
                if !changes.is_empty() {
                    shared.emit_state_change(&state, &changes);
                }
            }
            None
        }
        Err(e) => {
            error!(room_id = %shared.room_id, error = %e, "failed to apply state, closing session");
            shared.emit_error(i32::from(CloseCode::Abnormal.code()), &e.to_string());
            let _ = transport
                .close(Some(CloseCode::Abnormal.code()), Some(DESYNC_REASON.into()))
                .await;
            Some(SessionEnd {
                code: CloseCode::Abnormal.code(),
                reason: DESYNC_REASON.into(),
            })
        }
    }
}

/// Reconnect to the same seat after a development server restart.
///
/// Returns `None` when every attempt failed or the handle asked to leave.
async fn dev_mode_reconnect(
    connector: &dyn Connector,
    options: &RoomOptions,
    cmd_rx: &mut mpsc::UnboundedReceiver<Command>,
) -> Option<Box<dyn Transport>> {
    info!(room_id = %options.room_id, "re-establishing connection after dev server restart");
    for attempt in 1..=options.dev_mode_retries {
        let delay = tokio::time::sleep(options.dev_mode_retry_interval);
        tokio::pin!(delay);
        loop {
            tokio::select! {
                () = &mut delay => break,
                cmd = cmd_rx.recv() => {
                    if matches!(cmd, None | Some(Command::Leave { .. })) {
                        return None;
                    }
                    // Sends are rejected by the handle while reconnecting.
                }
            }
        }
        match connector.connect(&options.url, &options.headers).await {
            Ok(transport) => {
                info!(room_id = %options.room_id, attempt, "re-established connection with room");
                return Some(transport);
            }
            Err(e) => {
                info!(
                    attempt,
                    max = options.dev_mode_retries,
                    error = %e,
                    "dev server reconnect failed, retrying"
                );
            }
        }
    }
    error!(room_id = %options.room_id, "failed to reconnect, is the server running?");
    None
}
