//! # Nonogram Net
//!
//! Networking core for the Nonogram puzzle client: authenticated HTTP API
//! access, room matchmaking, binary room sessions with synchronized state,
//! and a self-healing lobby connection.
//!
//! ## Features
//!
//! - **Transport-agnostic**: implement [`Transport`] and [`Connector`] for any
//!   socket backend
//! - **WebSocket built-in**: the default `transport-websocket` feature
//!   provides [`WebSocketConnector`]
//! - **reqwest built-in**: the default `http-reqwest` feature provides
//!   [`ReqwestBackend`](http::ReqwestBackend)
//! - **Token lifecycle**: cached tokens, single-flight refresh, proactive
//!   renewal and one retry after a 401
//! - **Lobby reconnection**: exponential backoff with a watchable status
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use nonogram_net::{NetConfig, PendingNetManager, PlatformServices, ServerMessageType};
//!
//! let services = PlatformServices::native(social_login, "cache.json");
//! let (net, _auth) = PendingNetManager::new(NetConfig::new("https://game.example.com"), services)
//!     .init()
//!     .await?;
//! net.on_message(ServerMessageType::PlayerState, |payload| {
//!     println!("player state: {payload:?}");
//! });
//! net.join_lobby().await;
//! ```

pub mod auth;
pub mod bytes;
pub mod cache;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod error_codes;
pub mod http;
pub mod lobby;
pub mod manager;
pub mod matchmake;
pub mod messages;
pub mod protocol;
pub mod room;
pub mod serializer;
pub mod transport;
pub mod transports;

// Re-export primary types for ergonomic imports.
pub use auth::{AuthResponse, AuthTokens, LoginCode, SocialLogin, TokenManager};
pub use cache::{FileStore, KeyValueStore, MemoryStore};
pub use config::NetConfig;
pub use error::{HttpError, MatchMakeError, NetError, Result};
pub use error_codes::{CloseCode, ErrorCode};
pub use lobby::{LobbyController, LobbyStatus};
pub use manager::{NetManager, PendingNetManager, PlatformServices};
pub use matchmake::Client;
pub use messages::{ClientMessageType, ServerMessageType};
pub use protocol::{MessageKind, Payload, ReconnectionToken, SeatReservation};
pub use room::{Room, RoomOptions, RoomState};
pub use serializer::{Change, StateHandle, StateValue};
pub use transport::{Connector, Transport, TransportEvent};

#[cfg(feature = "transport-websocket")]
pub use transports::{WebSocketConnector, WebSocketTransport};
