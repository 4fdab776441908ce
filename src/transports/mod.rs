//! Transport implementations for room connections.
//!
//! Concrete [`Transport`](crate::Transport) implementations live behind
//! feature gates:
//!
//! | Feature                | Transport              | Connector              |
//! |------------------------|------------------------|------------------------|
//! | `transport-websocket`  | [`WebSocketTransport`] | [`WebSocketConnector`] |
//!
//! # Example
//!
//! ```rust,ignore
//! # async fn example() -> Result<(), nonogram_net::NetError> {
//! use nonogram_net::{Transport, TransportEvent, WebSocketTransport};
//!
//! let mut ws = WebSocketTransport::connect("ws://localhost:2567/p1/r1", &[]).await?;
//! ws.send(vec![10]).await?;
//!
//! if let Some(TransportEvent::Message(bytes)) = ws.recv().await {
//!     println!("server sent {} bytes", bytes.len());
//! }
//!
//! ws.close(None, None).await?;
//! # Ok(())
//! # }
//! ```

#[cfg(feature = "transport-websocket")]
pub mod websocket;

#[cfg(feature = "transport-websocket")]
pub use websocket::{WebSocketConnector, WebSocketTransport};
