//! Lobby reconnection controller.
//!
//! Keeps the single long-lived lobby room alive. A failed connect or a lost
//! session schedules a reconnect with exponential backoff (1s doubling up to
//! 10s); at most one reconnect timer or attempt exists at a time. Progress is
//! published as a [`LobbyStatus`] through a `watch` channel.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::auth::TokenManager;
use crate::error::{NetError, Result};
use crate::matchmake::Client;
use crate::messages::{ClientMessageType, ServerMessageType, PLAYGROUND_MESSAGE_TYPES};
use crate::protocol::Payload;
use crate::room::Room;

pub const DEFAULT_LOBBY_ROOM: &str = "lobby";
pub const DEFAULT_RECONNECT_INITIAL: Duration = Duration::from_millis(1000);
pub const DEFAULT_RECONNECT_MAX: Duration = Duration::from_millis(10_000);

// ── Backoff ─────────────────────────────────────────────────────────

/// Doubling reconnect delay with an upper bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(DEFAULT_RECONNECT_INITIAL, DEFAULT_RECONNECT_MAX)
    }
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: initial,
        }
    }

    /// Delay before the next attempt.
    pub fn current(&self) -> Duration {
        self.current
    }

    /// Record a failed attempt.
    pub fn fail(&mut self) {
        self.current = self.current.saturating_mul(2).min(self.max);
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

// ── Status ──────────────────────────────────────────────────────────

/// UI-facing connection indicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LobbyStatus {
    /// Not joined, or disconnected on request.
    #[default]
    Idle,
    /// Connecting or waiting to reconnect.
    Connecting,
    Connected,
}

// ── Controller ──────────────────────────────────────────────────────

type LobbyHandler = Arc<dyn Fn(Payload) + Send + Sync>;

#[derive(Debug, Default)]
struct Reconnect {
    backoff: Backoff,
    timer: Option<JoinHandle<()>>,
    /// A timer is waiting or its attempt is running.
    pending: bool,
    /// The application wants the lobby connected.
    active: bool,
}

struct Inner {
    client: Client,
    auth: TokenManager,
    room_name: String,
    room: Mutex<Option<Room>>,
    /// Serializes connect and teardown.
    connect_gate: tokio::sync::Mutex<()>,
    /// Identifies the current lobby session; leave events of older sessions
    /// are ignored.
    session: AtomicU64,
    handlers: Mutex<HashMap<ServerMessageType, LobbyHandler>>,
    reconnect: Mutex<Reconnect>,
    status: watch::Sender<LobbyStatus>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(timer) = lock(&self.reconnect).timer.take() {
            timer.abort();
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// Owner of the lobby room session.
///
/// Cloning is cheap; clones control the same lobby.
#[derive(Clone)]
pub struct LobbyController {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for LobbyController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LobbyController")
            .field("room_name", &self.inner.room_name)
            .field("status", &self.status())
            .field("reconnect_delay", &self.reconnect_delay())
            .finish_non_exhaustive()
    }
}

impl LobbyController {
    pub fn new(client: Client, auth: TokenManager, room_name: impl Into<String>) -> Self {
        let (status, _) = watch::channel(LobbyStatus::Idle);
        Self {
            inner: Arc::new(Inner {
                client,
                auth,
                room_name: room_name.into(),
                room: Mutex::new(None),
                connect_gate: tokio::sync::Mutex::new(()),
                session: AtomicU64::new(0),
                handlers: Mutex::new(HashMap::new()),
                reconnect: Mutex::new(Reconnect::default()),
                status,
            }),
        }
    }

    #[must_use]
    pub fn with_backoff(self, backoff: Backoff) -> Self {
        lock(&self.inner.reconnect).backoff = backoff;
        self
    }

    pub fn status(&self) -> LobbyStatus {
        *self.inner.status.borrow()
    }

    /// Watch status changes.
    pub fn subscribe(&self) -> watch::Receiver<LobbyStatus> {
        self.inner.status.subscribe()
    }

    /// Delay the next reconnect would wait.
    pub fn reconnect_delay(&self) -> Duration {
        lock(&self.inner.reconnect).backoff.current()
    }

    pub fn reconnect_pending(&self) -> bool {
        lock(&self.inner.reconnect).pending
    }

    pub fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }

    /// Run `f` against the current lobby room, if any.
    pub fn with_room<R>(&self, f: impl FnOnce(&Room) -> R) -> Option<R> {
        lock(&self.inner.room).as_ref().map(f)
    }

    /// Connect to the lobby. A failure is not returned: it schedules a
    /// reconnect and shows up as [`LobbyStatus::Connecting`].
    pub async fn join_lobby(&self) {
        lock(&self.inner.reconnect).active = true;
        self.inner.set_status(LobbyStatus::Connecting);
        if let Err(e) = self.inner.connect_once(false).await {
            warn!(error = %e, "lobby join failed");
            self.inner.schedule_reconnect();
        }
    }

    /// Send an application message on the lobby room.
    ///
    /// Returns `false` without queueing when no lobby session is open.
    pub fn send_message(&self, message_type: ClientMessageType, data: Option<Value>) -> bool {
        match lock(&self.inner.room).as_ref() {
            Some(room) => room.send(message_type, data).is_ok(),
            None => {
                warn!(%message_type, "no lobby room, dropping message");
                false
            }
        }
    }

    /// Register the handler for a server message type.
    ///
    /// Only the first registration per type takes effect. Handlers survive
    /// reconnects.
    pub fn on_message<F>(&self, message_type: ServerMessageType, handler: F)
    where
        F: Fn(Payload) + Send + Sync + 'static,
    {
        let mut handlers = lock(&self.inner.handlers);
        if handlers.contains_key(&message_type) {
            debug!(%message_type, "lobby handler already registered, ignoring");
            return;
        }
        handlers.insert(message_type, Arc::new(handler));
    }

    /// Retry immediately if a reconnect is pending (app foregrounded).
    pub async fn resume(&self) {
        {
            let mut reconnect = lock(&self.inner.reconnect);
            if !reconnect.pending || !reconnect.active {
                return;
            }
            if let Some(timer) = reconnect.timer.take() {
                timer.abort();
            }
        }
        info!("resuming lobby connection");
        self.inner.attempt_reconnect().await;
    }

    /// Cancel any pending reconnect and leave the lobby.
    pub async fn disconnect(&self) {
        {
            let mut reconnect = lock(&self.inner.reconnect);
            reconnect.active = false;
            reconnect.pending = false;
            if let Some(timer) = reconnect.timer.take() {
                timer.abort();
            }
        }
        let _gate = self.inner.connect_gate.lock().await;
        self.inner.teardown().await;
        self.inner.set_status(LobbyStatus::Idle);
        info!("lobby disconnected");
    }
}

impl Inner {
    fn set_status(&self, status: LobbyStatus) {
        self.status.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
    }

    fn is_connected(&self) -> bool {
        lock(&self.room).as_ref().is_some_and(Room::is_open)
    }

    async fn teardown(&self) {
        self.session.fetch_add(1, Ordering::AcqRel);
        let old = lock(&self.room).take();
        if let Some(mut old) = old {
            old.remove_all_listeners();
            old.dispose().await;
            debug!(room_id = %old.room_id(), "previous lobby session torn down");
        }
    }

    /// Connect a fresh lobby session, replacing the current one.
    ///
    /// A reconnect attempt that finds its reconnect already settled by
    /// another connect or a disconnect does nothing.
    async fn connect_once(self: &Arc<Self>, reconnecting: bool) -> Result<()> {
        let _gate = self.connect_gate.lock().await;
        if reconnecting && !lock(&self.reconnect).pending {
            debug!("lobby reconnect superseded");
            return Ok(());
        }
        self.auth.valid_token().await?;
        self.teardown().await;

        let room = self
            .client
            .join_or_create(&self.room_name, json!({}))
            .await?;
        let session = self.session.fetch_add(1, Ordering::AcqRel) + 1;
        let weak = Arc::downgrade(self);

        room.on_error(|code, reason| {
            error!(code, reason, "lobby room error");
        });
        room.on_message(PLAYGROUND_MESSAGE_TYPES, |_| {});
        for message_type in ServerMessageType::ALL {
            let weak = Weak::clone(&weak);
            room.on_message(message_type, move |payload| {
                if let Some(inner) = weak.upgrade() {
                    inner.dispatch(message_type, payload);
                }
            });
        }
        room.send(ClientMessageType::Ready, None)?;
        room.on_leave(move |code, reason| {
            if let Some(inner) = weak.upgrade() {
                inner.handle_disconnect(session, code, reason);
            }
        });

        let open = room.is_open();
        let room_id = room.room_id().to_owned();
        *lock(&self.room) = Some(room);
        if !open {
            return Err(NetError::NotConnected);
        }

        {
            let mut reconnect = lock(&self.reconnect);
            reconnect.backoff.reset();
            reconnect.pending = false;
            if let Some(timer) = reconnect.timer.take() {
                debug!("connected, cancelling pending lobby reconnect");
                timer.abort();
            }
            self.set_status(LobbyStatus::Connected);
        }
        info!(%room_id, "lobby connected");

        // A close seen while `pending` was still set was not rescheduled.
        if !self.is_connected() {
            warn!(%room_id, "lobby session closed while connecting");
            self.schedule_reconnect();
        }
        Ok(())
    }

    fn dispatch(&self, message_type: ServerMessageType, payload: Payload) {
        let handler = lock(&self.handlers).get(&message_type).cloned();
        match handler {
            Some(handler) => handler(payload),
            None => warn!(%message_type, "no handler registered for lobby message"),
        }
    }

    fn handle_disconnect(self: &Arc<Self>, session: u64, code: u16, reason: &str) {
        if self.session.load(Ordering::Acquire) != session {
            debug!(code, "ignoring leave from a previous lobby session");
            return;
        }
        warn!(code, reason, "lobby session closed");
        self.schedule_reconnect();
    }

    fn schedule_reconnect(self: &Arc<Self>) {
        let mut reconnect = lock(&self.reconnect);
        if reconnect.pending || !reconnect.active {
            return;
        }
        let delay = reconnect.backoff.current();
        reconnect.pending = true;
        self.set_status(LobbyStatus::Connecting);
        info!(delay_ms = delay.as_millis(), "scheduling lobby reconnect");

        let weak = Arc::downgrade(self);
        reconnect.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(inner) = weak.upgrade() {
                inner.attempt_reconnect().await;
            }
        }));
    }

    /// Run one reconnect attempt. `pending` stays set until the attempt
    /// either connects or fails.
    async fn attempt_reconnect(self: &Arc<Self>) {
        // Detach our own timer; a successful connect aborts only others.
        drop(lock(&self.reconnect).timer.take());
        if let Err(e) = self.connect_once(true).await {
            {
                let mut reconnect = lock(&self.reconnect);
                reconnect.pending = false;
                reconnect.backoff.fail();
                warn!(
                    error = %e,
                    next_delay_ms = reconnect.backoff.current().as_millis(),
                    "lobby reconnect failed"
                );
            }
            self.schedule_reconnect();
        }
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_to_cap_and_resets() {
        let mut backoff = Backoff::default();
        let mut seen = Vec::new();
        for _ in 0..7 {
            seen.push(backoff.current().as_millis());
            backoff.fail();
        }
        assert_eq!(seen, vec![1000, 2000, 4000, 8000, 10_000, 10_000, 10_000]);
        backoff.reset();
        assert_eq!(backoff.current(), Duration::from_millis(1000));
    }

    #[test]
    fn backoff_respects_custom_bounds() {
        let mut backoff = Backoff::new(Duration::from_millis(300), Duration::from_millis(1000));
        backoff.fail();
        backoff.fail();
        assert_eq!(backoff.current(), Duration::from_millis(1000));
    }
}
