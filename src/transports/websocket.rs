//! Room connections over `tokio-tungstenite`.
//!
//! This module provides [`WebSocketTransport`], a [`Transport`] implementation
//! that carries room frames as binary WebSocket messages, and
//! [`WebSocketConnector`], the matching [`Connector`]. Both `ws://` and
//! `wss://` URLs are supported; TLS is handled transparently via
//! [`MaybeTlsStream`](tokio_tungstenite::MaybeTlsStream).
//!
//! # Feature gate
//!
//! Requires the default `transport-websocket` feature.
//!
//! # Example
//!
//! ```rust,no_run
//! # async fn example() -> Result<(), nonogram_net::NetError> {
//! use nonogram_net::{Transport, TransportEvent, WebSocketTransport};
//!
//! let headers = vec![("x-client".to_string(), "demo".to_string())];
//! let mut transport = WebSocketTransport::connect("ws://localhost:2567/p1/r1", &headers).await?;
//! transport.send(vec![10]).await?;
//!
//! while let Some(event) = transport.recv().await {
//!     if let TransportEvent::Close { code, .. } = event {
//!         println!("closed with {code}");
//!     }
//! }
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode as WsCloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, Message};

use crate::error::NetError;
use crate::error_codes::CloseCode;
use crate::transport::{Connector, ReadyState, Transport, TransportEvent};

/// Close code reported when the peer's close frame carried no status.
const NO_STATUS: u16 = 1005;

/// Client WebSocket stream accepted by [`WebSocketTransport::from_stream`].
pub type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

fn io_error(e: tokio_tungstenite::tungstenite::Error) -> NetError {
    let kind = match &e {
        tokio_tungstenite::tungstenite::Error::Io(io) => io.kind(),
        _ => std::io::ErrorKind::Other,
    };
    NetError::Io(std::io::Error::new(kind, e))
}

/// Room transport over one WebSocket connection.
///
/// # Construction
///
/// Use [`WebSocketTransport::connect`] to establish a new connection. For
/// custom TLS or proxy setups construct the stream yourself and use
/// [`WebSocketTransport::from_stream`].
///
/// # Cancel Safety
///
/// [`recv`](Transport::recv) is cancel-safe: a dropped `recv` future loses no
/// frames, so it can sit in a `tokio::select!` arm.
#[derive(Debug)]
pub struct WebSocketTransport {
    stream: WsStream,
    state: ReadyState,
    /// Close to report after an error event.
    pending_close: Option<(u16, String)>,
    close_reported: bool,
}

impl WebSocketTransport {
    /// Open a room connection.
    ///
    /// `headers` are added to the upgrade request.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::InvalidUrl`] for malformed URLs or headers and
    /// [`NetError::Io`] if the connection cannot be established. When the
    /// underlying error is an I/O error its
    /// [`ErrorKind`](std::io::ErrorKind) is preserved.
    pub async fn connect(url: &str, headers: &[(String, String)]) -> Result<Self, NetError> {
        tracing::debug!(url = %url, "connecting to room server");

        let mut request = url
            .into_client_request()
            .map_err(|e| NetError::InvalidUrl(format!("{url}: {e}")))?;
        for (name, value) in headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| NetError::InvalidUrl(format!("header {name}: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| NetError::InvalidUrl(format!("header value: {e}")))?;
            request.headers_mut().insert(name, value);
        }

        let (stream, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(io_error)?;

        tracing::info!(url = %url, "room connection established");

        Ok(Self::from_stream(stream))
    }

    /// Wrap a stream that is already upgraded.
    pub fn from_stream(stream: WsStream) -> Self {
        Self {
            stream,
            state: ReadyState::Open,
            pending_close: None,
            close_reported: false,
        }
    }

    /// [`connect`](Self::connect), bounded by `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::Timeout`] if the deadline elapses, or any
    /// error that [`connect`](Self::connect) may return.
    pub async fn connect_with_timeout(
        url: &str,
        headers: &[(String, String)],
        timeout: Duration,
    ) -> Result<Self, NetError> {
        tokio::time::timeout(timeout, Self::connect(url, headers))
            .await
            .map_err(|_| NetError::Timeout)?
    }

    fn report_close(&mut self, code: u16, reason: String) -> Option<TransportEvent> {
        self.state = ReadyState::Closed;
        if self.close_reported {
            return None;
        }
        self.close_reported = true;
        Some(TransportEvent::Close { code, reason })
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn send(&mut self, bytes: Vec<u8>) -> Result<(), NetError> {
        if self.state != ReadyState::Open {
            tracing::error!(
                state = ?self.state,
                len = bytes.len(),
                "transport not open, dropping outbound frame"
            );
            return Ok(());
        }
        self.stream
            .send(Message::Binary(bytes.into()))
            .await
            .map_err(|e| NetError::TransportSend(e.to_string()))
    }

    async fn recv(&mut self) -> Option<TransportEvent> {
        if let Some((code, reason)) = self.pending_close.take() {
            return self.report_close(code, reason);
        }
        if self.close_reported {
            return None;
        }
        loop {
            let msg = match self.stream.next().await {
                Some(Ok(msg)) => msg,
                Some(Err(e)) => {
                    let reason = e.to_string();
                    tracing::warn!(error = %reason, "room connection failed");
                    self.state = ReadyState::Closed;
                    self.pending_close = Some((CloseCode::Abnormal.code(), reason.clone()));
                    return Some(TransportEvent::Error {
                        code: CloseCode::Abnormal.code(),
                        reason,
                    });
                }
                None => {
                    return self.report_close(CloseCode::Abnormal.code(), "connection lost".into())
                }
            };

            match msg {
                Message::Binary(bytes) => return Some(TransportEvent::Message(bytes.to_vec())),
                Message::Close(frame) => {
                    tracing::debug!(?frame, "received WebSocket close frame");
                    let (code, reason) = frame
                        .map(|f| (u16::from(f.code), f.reason.to_string()))
                        .unwrap_or((NO_STATUS, String::new()));
                    return self.report_close(code, reason);
                }
                Message::Ping(_) => {
                    // tungstenite auto-queues the pong.
                    tracing::trace!("received WebSocket ping");
                }
                Message::Pong(_) => {}
                Message::Text(_) => {
                    tracing::warn!("received unexpected text WebSocket frame, skipping");
                }
                Message::Frame(_) => {
                    tracing::debug!("received raw WebSocket frame, skipping");
                }
            }
        }
    }

    async fn close(&mut self, code: Option<u16>, reason: Option<String>) -> Result<(), NetError> {
        if matches!(self.state, ReadyState::Closing | ReadyState::Closed) {
            return Ok(());
        }
        self.state = ReadyState::Closing;
        let frame = code.map(|code| CloseFrame {
            code: WsCloseCode::from(code),
            reason: reason.unwrap_or_default().into(),
        });
        self.stream
            .close(frame)
            .await
            .map_err(|e| NetError::TransportSend(e.to_string()))
    }

    fn ready_state(&self) -> ReadyState {
        self.state
    }
}

/// [`Connector`] that opens [`WebSocketTransport`]s.
#[derive(Debug, Clone, Default)]
pub struct WebSocketConnector {
    timeout: Option<Duration>,
}

impl WebSocketConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail connection attempts that take longer than `timeout`.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(
        &self,
        url: &str,
        headers: &[(String, String)],
    ) -> Result<Box<dyn Transport>, NetError> {
        let transport = match self.timeout {
            Some(timeout) => WebSocketTransport::connect_with_timeout(url, headers, timeout).await?,
            None => WebSocketTransport::connect(url, headers).await?,
        };
        Ok(Box::new(transport))
    }
}

#[cfg(test)]
#[cfg(feature = "transport-websocket")]
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
    fn websocket_transport_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<WebSocketTransport>();
    }

    #[tokio::test]
    async fn connect_fails_with_invalid_url() {
        let result = WebSocketTransport::connect("not-a-valid-url", &[]).await;
        assert!(matches!(
            result.unwrap_err(),
            NetError::InvalidUrl(_) | NetError::Io(_)
        ));
    }

    #[tokio::test]
    async fn connect_fails_with_unreachable_host() {
        let result = WebSocketTransport::connect("ws://127.0.0.1:1", &[]).await;
        assert!(matches!(result.unwrap_err(), NetError::Io(_)));
    }

    // ── Mock-stream helpers ──────────────────────────────────────────────

    use tokio::net::TcpListener;

    /// Start a local WebSocket server that runs `handler` on the accepted
    /// connection and returns the address to connect to.
    async fn start_mock_server<F, Fut>(handler: F) -> String
    where
        F: FnOnce(tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>) -> Fut
            + Send
            + 'static,
        Fut: std::future::Future<Output = ()> + Send,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            handler(ws).await;
        });

        format!("ws://{addr}")
    }

    // ── Mock-stream tests ────────────────────────────────────────────────

    #[tokio::test]
    async fn recv_receives_binary_frames_and_skips_text() {
        let url = start_mock_server(|mut ws| async move {
            ws.send(Message::Binary(vec![13, 0].into())).await.unwrap();
            ws.send(Message::Text("ignored".into())).await.unwrap();
            ws.send(Message::Binary(vec![14].into())).await.unwrap();
            ws.close(None).await.unwrap();
        })
        .await;

        let mut transport = WebSocketTransport::connect(&url, &[]).await.unwrap();
        assert!(transport.is_open());
        assert_eq!(
            transport.recv().await,
            Some(TransportEvent::Message(vec![13, 0]))
        );
        assert_eq!(
            transport.recv().await,
            Some(TransportEvent::Message(vec![14]))
        );
    }

    #[tokio::test]
    async fn close_frame_is_reported_once_with_code() {
        let url = start_mock_server(|mut ws| async move {
            ws.close(Some(CloseFrame {
                code: WsCloseCode::from(4010),
                reason: "restart".into(),
            }))
            .await
            .unwrap();
        })
        .await;

        let mut transport = WebSocketTransport::connect(&url, &[]).await.unwrap();
        assert_eq!(
            transport.recv().await,
            Some(TransportEvent::Close {
                code: 4010,
                reason: "restart".into()
            })
        );
        assert_eq!(transport.ready_state(), ReadyState::Closed);
        assert_eq!(transport.recv().await, None);
    }

    #[tokio::test]
    async fn send_after_close_is_dropped_without_error() {
        let url = start_mock_server(|mut ws| async move {
            while let Some(Ok(_)) = ws.next().await {}
        })
        .await;

        let mut transport = WebSocketTransport::connect(&url, &[]).await.unwrap();
        transport.close(Some(4000), None).await.unwrap();
        assert!(!transport.is_open());
        transport.send(vec![13]).await.unwrap();
    }

    #[tokio::test]
    async fn double_close_is_idempotent() {
        let url =
            start_mock_server(|mut ws| async move { while let Some(Ok(_)) = ws.next().await {} })
                .await;

        let mut transport = WebSocketTransport::connect(&url, &[]).await.unwrap();
        transport.close(None, None).await.unwrap();
        transport.close(None, None).await.unwrap();
    }

    #[tokio::test]
    async fn connect_with_timeout_times_out() {
        // Non-routable address.
        let result = WebSocketTransport::connect_with_timeout(
            "ws://192.0.2.1:1",
            &[],
            Duration::from_millis(50),
        )
        .await;

        assert!(matches!(result.unwrap_err(), NetError::Timeout));
    }

    #[tokio::test]
    async fn connector_sends_headers_and_round_trips() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (header_tx, header_rx) = tokio::sync::oneshot::channel();

        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let callback = |req: &tokio_tungstenite::tungstenite::handshake::server::Request,
                            resp| {
                let value = req
                    .headers()
                    .get("x-client")
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_owned);
                let _ = header_tx.send(value);
                Ok(resp)
            };
            let mut ws = tokio_tungstenite::accept_hdr_async(tcp, callback)
                .await
                .unwrap();
            if let Some(Ok(Message::Binary(bytes))) = ws.next().await {
                ws.send(Message::Binary(bytes)).await.unwrap();
            }
            ws.close(None).await.unwrap();
        });

        let connector = WebSocketConnector::new().with_timeout(Duration::from_secs(5));
        let headers = vec![("x-client".to_string(), "nonogram".to_string())];
        let mut transport = connector
            .connect(&format!("ws://{addr}"), &headers)
            .await
            .unwrap();

        assert_eq!(header_rx.await.unwrap().as_deref(), Some("nonogram"));
        transport.send(vec![10]).await.unwrap();
        assert_eq!(transport.recv().await, Some(TransportEvent::Message(vec![10])));
    }
}
