#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing,
    dead_code
)]
//! Shared test utilities for the networking integration tests.
//!
//! Provides a channel-backed [`ChannelTransport`] with a scriptable
//! [`ServerEnd`], a [`MockConnector`] handing out those transports, a routed
//! [`MockHttp`] backend, a [`StaticSocialLogin`] and builders for common
//! frames and response bodies.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use nonogram_net::auth::{LoginCode, SocialLogin};
use nonogram_net::http::{HttpBackend, HttpRequest, HttpResponse};
use nonogram_net::protocol::Frame;
use nonogram_net::transport::{Connector, ReadyState, Transport, TransportEvent};
use nonogram_net::NetError;

/// Upper bound for anything a test awaits.
pub const WAIT: Duration = Duration::from_secs(120);

pub const SERVER_URL: &str = "http://localhost:2567";

// ── ChannelTransport ────────────────────────────────────────────────

/// In-memory transport. The paired [`ServerEnd`] plays the room server.
///
/// A consented leave frame sent by the client is answered with a close
/// (code 4000), like a real room server does, unless the transport was
/// built to ignore it.
pub struct ChannelTransport {
    inbound: mpsc::UnboundedReceiver<TransportEvent>,
    loopback: mpsc::UnboundedSender<TransportEvent>,
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    state: ReadyState,
    answer_leave: bool,
}

/// Server side of a [`ChannelTransport`].
pub struct ServerEnd {
    pub url: String,
    pub headers: Vec<(String, String)>,
    to_client: mpsc::UnboundedSender<TransportEvent>,
    from_client: mpsc::UnboundedReceiver<Vec<u8>>,
}

pub fn channel_transport(url: &str, headers: &[(String, String)]) -> (ChannelTransport, ServerEnd) {
    let (to_client, inbound) = mpsc::unbounded_channel();
    let (outbound, from_client) = mpsc::unbounded_channel();
    let transport = ChannelTransport {
        inbound,
        loopback: to_client.clone(),
        outbound,
        state: ReadyState::Open,
        answer_leave: true,
    };
    let server = ServerEnd {
        url: url.to_owned(),
        headers: headers.to_vec(),
        to_client,
        from_client,
    };
    (transport, server)
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn send(&mut self, bytes: Vec<u8>) -> Result<(), NetError> {
        if self.state != ReadyState::Open {
            return Ok(());
        }
        if let (true, Ok(Frame::Leave { code, .. })) = (self.answer_leave, Frame::decode(&bytes)) {
            let _ = self.loopback.send(TransportEvent::Close {
                code,
                reason: String::new(),
            });
        }
        let _ = self.outbound.send(bytes);
        Ok(())
    }

    async fn recv(&mut self) -> Option<TransportEvent> {
        if self.state == ReadyState::Closed {
            return None;
        }
        match self.inbound.recv().await {
            Some(TransportEvent::Close { code, reason }) => {
                self.state = ReadyState::Closed;
                Some(TransportEvent::Close { code, reason })
            }
            Some(event) => Some(event),
            None => {
                self.state = ReadyState::Closed;
                Some(TransportEvent::Close {
                    code: 1006,
                    reason: "connection lost".into(),
                })
            }
        }
    }

    async fn close(&mut self, code: Option<u16>, reason: Option<String>) -> Result<(), NetError> {
        if self.state != ReadyState::Open {
            return Ok(());
        }
        self.state = ReadyState::Closing;
        let _ = self.loopback.send(TransportEvent::Close {
            code: code.unwrap_or(1000),
            reason: reason.unwrap_or_default(),
        });
        Ok(())
    }

    fn ready_state(&self) -> ReadyState {
        self.state
    }
}

impl ServerEnd {
    pub fn send(&self, frame: &Frame) {
        self.send_raw(frame.encode().unwrap());
    }

    pub fn send_raw(&self, bytes: Vec<u8>) {
        let _ = self.to_client.send(TransportEvent::Message(bytes));
    }

    /// Close the connection from the server side.
    pub fn close(&self, code: u16, reason: &str) {
        let _ = self.to_client.send(TransportEvent::Close {
            code,
            reason: reason.into(),
        });
    }

    pub fn error(&self, code: u16, reason: &str) {
        let _ = self.to_client.send(TransportEvent::Error {
            code,
            reason: reason.into(),
        });
    }

    /// Confirm the seat with the `none` serializer.
    pub fn confirm_join(&self, reconnection_token: &str) {
        self.send(&join_frame(reconnection_token, "none", Vec::new()));
    }

    /// Next frame the client sent.
    pub async fn recv_frame(&mut self) -> Frame {
        let bytes = tokio::time::timeout(WAIT, self.from_client.recv())
            .await
            .expect("timed out waiting for a client frame")
            .expect("client transport dropped");
        Frame::decode(&bytes).expect("client sent an undecodable frame")
    }

    /// Frames the client sent so far.
    pub fn drain(&mut self) -> Vec<Frame> {
        let mut frames = Vec::new();
        while let Ok(bytes) = self.from_client.try_recv() {
            frames.push(Frame::decode(&bytes).unwrap());
        }
        frames
    }
}

// ── MockConnector ───────────────────────────────────────────────────

/// Connector handing out [`ChannelTransport`]s.
///
/// Every accepted connection's [`ServerEnd`] is delivered on the receiver
/// returned by [`MockConnector::new`]. With auto-join enabled, each new
/// connection is confirmed immediately with the `none` serializer.
pub struct MockConnector {
    servers: mpsc::UnboundedSender<ServerEnd>,
    failures: AtomicUsize,
    attempts: AtomicUsize,
    auto_join: Option<String>,
    ignore_leave: AtomicBool,
    close_after_join: AtomicUsize,
    urls: StdMutex<Vec<String>>,
    times: StdMutex<Vec<tokio::time::Instant>>,
}

impl MockConnector {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<ServerEnd>) {
        Self::build(None)
    }

    /// Confirm every connection right away with `reconnection_token`.
    pub fn auto_join(reconnection_token: &str) -> (Arc<Self>, mpsc::UnboundedReceiver<ServerEnd>) {
        Self::build(Some(reconnection_token.to_owned()))
    }

    fn build(auto_join: Option<String>) -> (Arc<Self>, mpsc::UnboundedReceiver<ServerEnd>) {
        let (servers, rx) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            servers,
            failures: AtomicUsize::new(0),
            attempts: AtomicUsize::new(0),
            auto_join,
            ignore_leave: AtomicBool::new(false),
            close_after_join: AtomicUsize::new(0),
            urls: StdMutex::new(Vec::new()),
            times: StdMutex::new(Vec::new()),
        });
        (connector, rx)
    }

    /// Refuse the next `n` connection attempts.
    pub fn fail_next(&self, n: usize) {
        self.failures.store(n, Ordering::SeqCst);
    }

    /// The next `n` auto-joined connections close right after the join
    /// confirmation.
    pub fn close_after_join(&self, n: usize) {
        self.close_after_join.store(n, Ordering::SeqCst);
    }

    /// Servers of later connections never answer a leave frame.
    pub fn ignore_leave(&self) {
        self.ignore_leave.store(true, Ordering::SeqCst);
    }

    /// Connection attempts so far, refused ones included.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn urls(&self) -> Vec<String> {
        self.urls.lock().unwrap().clone()
    }

    /// Gaps between consecutive connection attempts.
    pub fn attempt_gaps(&self) -> Vec<Duration> {
        let times = self.times.lock().unwrap();
        times.windows(2).map(|w| w[1] - w[0]).collect()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(
        &self,
        url: &str,
        headers: &[(String, String)],
    ) -> Result<Box<dyn Transport>, NetError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.urls.lock().unwrap().push(url.to_owned());
        self.times.lock().unwrap().push(tokio::time::Instant::now());
        let refuse = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refuse {
            return Err(NetError::Network("connection refused".into()));
        }
        let (mut transport, server) = channel_transport(url, headers);
        transport.answer_leave = !self.ignore_leave.load(Ordering::SeqCst);
        if let Some(token) = &self.auto_join {
            server.confirm_join(token);
            let close = self
                .close_after_join
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if close {
                server.close(1006, "connection lost");
            }
        }
        let _ = self.servers.send(server);
        Ok(Box::new(transport))
    }
}

/// Next server end handed out by a [`MockConnector`].
pub async fn next_server(rx: &mut mpsc::UnboundedReceiver<ServerEnd>) -> ServerEnd {
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for a connection")
        .expect("connector dropped")
}

// ── MockHttp ────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub enum Reply {
    Json(u16, Value),
    Fail(String),
    Hang,
}

/// HTTP backend answering by URL path.
///
/// Queued replies for a path are used first, in order; after that the
/// path's fallback reply (if any) answers; anything else gets a 404.
#[derive(Default)]
pub struct MockHttp {
    queued: StdMutex<HashMap<String, VecDeque<Reply>>>,
    fallback: StdMutex<HashMap<String, Reply>>,
    requests: StdMutex<Vec<HttpRequest>>,
    latency: Option<Duration>,
}

impl MockHttp {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Delay every reply, so concurrent callers overlap.
    pub fn with_latency(latency: Duration) -> Arc<Self> {
        Arc::new(Self {
            latency: Some(latency),
            ..Self::default()
        })
    }

    pub fn push(&self, path: &str, reply: Reply) {
        self.queued
            .lock()
            .unwrap()
            .entry(path.to_owned())
            .or_default()
            .push_back(reply);
    }

    pub fn always(&self, path: &str, reply: Reply) {
        self.fallback.lock().unwrap().insert(path.to_owned(), reply);
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Requests whose URL path is `path`.
    pub fn requests_to(&self, path: &str) -> Vec<HttpRequest> {
        self.requests()
            .into_iter()
            .filter(|r| path_of(&r.url) == path)
            .collect()
    }

    pub fn calls_to(&self, path: &str) -> usize {
        self.requests_to(path).len()
    }
}

fn path_of(url: &str) -> String {
    url::Url::parse(url).unwrap().path().to_owned()
}

#[async_trait]
impl HttpBackend for MockHttp {
    async fn execute(&self, request: HttpRequest) -> nonogram_net::Result<HttpResponse> {
        let path = path_of(&request.url);
        self.requests.lock().unwrap().push(request);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        let reply = {
            let queued = self
                .queued
                .lock()
                .unwrap()
                .get_mut(&path)
                .and_then(VecDeque::pop_front);
            queued.or_else(|| self.fallback.lock().unwrap().get(&path).cloned())
        };
        match reply {
            Some(Reply::Json(status, body)) => Ok(HttpResponse {
                status,
                body: serde_json::to_vec(&body).unwrap(),
            }),
            Some(Reply::Fail(message)) => Err(NetError::Network(message)),
            Some(Reply::Hang) => std::future::pending().await,
            None => Ok(HttpResponse {
                status: 404,
                body: b"not found".to_vec(),
            }),
        }
    }
}

// ── StaticSocialLogin ───────────────────────────────────────────────

/// Social login returning `code-1`, `code-2`, ... for provider `test`.
pub struct StaticSocialLogin {
    session_valid: bool,
    refuse: bool,
    logins: AtomicUsize,
}

impl StaticSocialLogin {
    pub fn new(session_valid: bool) -> Arc<Self> {
        Arc::new(Self {
            session_valid,
            refuse: false,
            logins: AtomicUsize::new(0),
        })
    }

    pub fn refusing() -> Arc<Self> {
        Arc::new(Self {
            session_valid: false,
            refuse: true,
            logins: AtomicUsize::new(0),
        })
    }

    pub fn logins(&self) -> usize {
        self.logins.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SocialLogin for StaticSocialLogin {
    async fn check_session(&self) -> bool {
        self.session_valid
    }

    async fn login(&self) -> nonogram_net::Result<LoginCode> {
        if self.refuse {
            return Err(NetError::SocialLogin("user cancelled".into()));
        }
        let n = self.logins.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(LoginCode {
            code: format!("code-{n}"),
            provider: "test".into(),
        })
    }
}

// ── Builders ────────────────────────────────────────────────────────

pub fn join_frame(reconnection_token: &str, serializer_id: &str, handshake: Vec<u8>) -> Frame {
    Frame::JoinRoom {
        reconnection_token: reconnection_token.into(),
        serializer_id: serializer_id.into(),
        handshake,
    }
}

/// `{data, errCode, errMsg}` success envelope.
pub fn envelope(data: Value) -> Value {
    json!({ "data": data, "errCode": 0, "errMsg": "" })
}

/// Login/refresh response body.
pub fn auth_body(access_token: &str, refresh_token: &str, expires_in: i64) -> Value {
    envelope(json!({
        "accessToken": access_token,
        "refreshToken": refresh_token,
        "expiresIn": expires_in,
        "playerId": "player-1",
        "providerAccountId": "acc-1",
        "isNew": false,
    }))
}

/// Seat reservation body for `room_id` in the room named `name`.
pub fn reservation_body(name: &str, room_id: &str, session_id: &str) -> Value {
    json!({
        "room": {
            "name": name,
            "roomId": room_id,
            "processId": "proc-1",
        },
        "sessionId": session_id,
    })
}
