//! Transport abstraction for room connections.
//!
//! The [`Transport`] trait is a duplex binary message channel between the
//! client and a room server. Every call to [`send`](Transport::send) carries
//! one complete protocol frame and every [`TransportEvent::Message`] delivers
//! one, so implementations handle framing internally.
//!
//! # Connection Setup
//!
//! Connection setup is a separate seam: a [`Connector`] turns a room URL and
//! headers into a connected transport. The room session only depends on the
//! connector, so platform socket implementations (and test doubles) are
//! chosen once and injected.
//!
//! # Implementing a Custom Transport
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use nonogram_net::error::NetError;
//! use nonogram_net::transport::{ReadyState, Transport, TransportEvent};
//!
//! struct MyTransport { /* ... */ }
//!
//! #[async_trait]
//! impl Transport for MyTransport {
//!     async fn send(&mut self, bytes: Vec<u8>) -> Result<(), NetError> {
//!         // Write one binary frame
//!         todo!()
//!     }
//!
//!     async fn recv(&mut self) -> Option<TransportEvent> {
//!         // Next message, error or close; None once the close was reported
//!         todo!()
//!     }
//!
//!     async fn close(&mut self, code: Option<u16>, reason: Option<String>) -> Result<(), NetError> {
//!         todo!()
//!     }
//!
//!     fn ready_state(&self) -> ReadyState {
//!         ReadyState::Open
//!     }
//! }
//! ```

use async_trait::async_trait;

use crate::error::NetError;

/// Connection state, numbered like the WebSocket `readyState` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ReadyState {
    Connecting = 0,
    Open = 1,
    Closing = 2,
    Closed = 3,
}

/// Something the transport observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// One complete binary frame.
    Message(Vec<u8>),
    /// A transport failure. Usually followed by [`TransportEvent::Close`].
    Error { code: u16, reason: String },
    /// The connection is closed. Reported once.
    Close { code: u16, reason: String },
}

/// A bidirectional binary transport for room traffic.
///
/// # Send Semantics
///
/// Sending is fire-and-forget. When the transport is not
/// [`Open`](ReadyState::Open), [`send`](Transport::send) logs and drops the
/// payload and still returns `Ok(())`. Errors are reserved for failures of an
/// open connection.
///
/// # Cancel Safety
///
/// The [`recv`](Transport::recv) method **MUST** be cancel-safe because it is
/// used inside `tokio::select!`. If `recv` is cancelled before completion,
/// calling it again must not lose data. Channel-based implementations (e.g.,
/// wrapping `mpsc::Receiver`) are naturally cancel-safe.
#[async_trait]
pub trait Transport: Send + 'static {
    /// Send one binary frame.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::TransportSend`] if an open connection failed to
    /// write the frame.
    async fn send(&mut self, bytes: Vec<u8>) -> Result<(), NetError>;

    /// Receive the next event.
    ///
    /// Returns `None` once the close has been reported and nothing else will
    /// arrive.
    ///
    /// # Cancel Safety
    ///
    /// This method **MUST** be cancel-safe (see [trait documentation](Transport)).
    async fn recv(&mut self) -> Option<TransportEvent>;

    /// Start a graceful close with an optional code and reason.
    ///
    /// Closing an already closed transport is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the close handshake could not be sent.
    /// Implementations should still release resources in that case.
    async fn close(&mut self, code: Option<u16>, reason: Option<String>)
        -> Result<(), NetError>;

    /// Current connection state.
    fn ready_state(&self) -> ReadyState;

    /// Whether frames can be sent right now.
    fn is_open(&self) -> bool {
        self.ready_state() == ReadyState::Open
    }
}

/// Opens transports to room endpoints.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Connect to `url`, sending `headers` with the upgrade request where the
    /// platform allows it. The returned transport is open.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::Io`] or [`NetError::InvalidUrl`] if the connection
    /// cannot be established.
    async fn connect(
        &self,
        url: &str,
        headers: &[(String, String)],
    ) -> Result<Box<dyn Transport>, NetError>;
}
