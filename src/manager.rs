//! Process-wide networking context.
//!
//! [`PendingNetManager`] only exposes [`init`](PendingNetManager::init);
//! the [`NetManager`] it returns carries the authenticated HTTP API, the
//! matchmaker and the lobby. There is no global instance: the application
//! owns the manager and passes it where needed.
//!
//! # Example
//!
//! ```rust,ignore
//! let services = PlatformServices::native(social, "save/cache.json");
//! let (net, auth) = PendingNetManager::new(NetConfig::new(url), services).init().await?;
//! net.on_message(ServerMessageType::PlayerState, |p| println!("{p:?}"));
//! net.join_lobby().await;
//! net.send_message(ClientMessageType::UseHints, Some(json!({ "count": 1 })));
//! ```

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::watch;
use tracing::info;

use crate::auth::{AuthResponse, SocialLogin, TokenManager};
use crate::cache::KeyValueStore;
use crate::config::NetConfig;
use crate::endpoint::Endpoint;
use crate::error::Result;
use crate::http::{Http, HttpBackend, Method};
use crate::lobby::{Backoff, LobbyController, LobbyStatus};
use crate::matchmake::Client;
use crate::messages::{ClientMessageType, ServerMessageType};
use crate::protocol::Payload;
use crate::transport::Connector;

/// Platform capabilities, chosen once at startup.
#[derive(Clone)]
pub struct PlatformServices {
    pub connector: Arc<dyn Connector>,
    pub http_backend: Arc<dyn HttpBackend>,
    pub social: Arc<dyn SocialLogin>,
    pub store: Arc<dyn KeyValueStore>,
}

impl std::fmt::Debug for PlatformServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlatformServices").finish_non_exhaustive()
    }
}

impl PlatformServices {
    pub fn new(
        connector: Arc<dyn Connector>,
        http_backend: Arc<dyn HttpBackend>,
        social: Arc<dyn SocialLogin>,
        store: Arc<dyn KeyValueStore>,
    ) -> Self {
        Self {
            connector,
            http_backend,
            social,
            store,
        }
    }

    /// Desktop/server services: tokio-tungstenite sockets, reqwest HTTP and
    /// a JSON file cache at `cache_path`.
    #[cfg(all(feature = "transport-websocket", feature = "http-reqwest"))]
    pub fn native(
        social: Arc<dyn SocialLogin>,
        cache_path: impl Into<std::path::PathBuf>,
    ) -> Self {
        Self::new(
            Arc::new(crate::transports::WebSocketConnector::new()),
            Arc::new(crate::http::ReqwestBackend::new()),
            social,
            Arc::new(crate::cache::FileStore::open(cache_path)),
        )
    }
}

// ── PendingNetManager ───────────────────────────────────────────────

/// Networking context before authentication.
#[derive(Debug)]
pub struct PendingNetManager {
    config: NetConfig,
    services: PlatformServices,
}

impl PendingNetManager {
    pub fn new(config: NetConfig, services: PlatformServices) -> Self {
        Self { config, services }
    }

    /// Authenticate and build the live context.
    ///
    /// Cached tokens are restored when the platform session is still valid;
    /// a refresh (or, failing that, a full login) then runs either way.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::InvalidUrl`](crate::NetError::InvalidUrl) for a
    /// bad `server_url` and any login failure from
    /// [`TokenManager::login_or_refresh`].
    pub async fn init(self) -> Result<(NetManager, AuthResponse)> {
        let Self { config, services } = self;
        let endpoint = Endpoint::parse(&config.server_url)?;
        let http = Arc::new(Http::new(
            services.http_backend,
            endpoint,
            config.headers.clone(),
            config.http_timeout(),
        ));
        let auth = TokenManager::new(
            Arc::clone(&http),
            services.social,
            services.store,
            config.cache_namespace.clone(),
        );
        if auth.restore().await {
            info!("restored cached session");
        }
        let response = auth.login_or_refresh().await?;

        let client = Client::new(http, services.connector)
            .with_join_timeout(config.join_timeout())
            .with_dev_mode_retry(config.dev_mode_retries, config.dev_mode_retry_interval())
            .with_shutdown_timeout(config.shutdown_timeout());
        let lobby = LobbyController::new(client.clone(), auth.clone(), config.lobby_room.clone())
            .with_backoff(Backoff::new(
                config.reconnect_initial(),
                config.reconnect_max(),
            ));

        info!(player_id = %response.player_id, "net manager ready");
        Ok((
            NetManager {
                config,
                auth,
                client,
                lobby,
            },
            response,
        ))
    }
}

// ── NetManager ──────────────────────────────────────────────────────

/// Authenticated networking context.
#[derive(Debug)]
pub struct NetManager {
    config: NetConfig,
    auth: TokenManager,
    client: Client,
    lobby: LobbyController,
}

impl NetManager {
    pub fn config(&self) -> &NetConfig {
        &self.config
    }

    pub fn auth(&self) -> &TokenManager {
        &self.auth
    }

    /// Matchmaker for rooms other than the lobby.
    pub fn matchmaker(&self) -> &Client {
        &self.client
    }

    pub fn lobby(&self) -> &LobbyController {
        &self.lobby
    }

    /// # Errors
    ///
    /// See [`TokenManager::request`].
    pub async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        data: Option<&Value>,
    ) -> Result<T> {
        self.auth.request(method, path, data).await
    }

    /// # Errors
    ///
    /// See [`TokenManager::request`].
    pub async fn get<T: DeserializeOwned>(&self, path: &str, data: Option<&Value>) -> Result<T> {
        self.auth.get(path, data).await
    }

    /// # Errors
    ///
    /// See [`TokenManager::request`].
    pub async fn post<T: DeserializeOwned>(&self, path: &str, data: Option<&Value>) -> Result<T> {
        self.auth.post(path, data).await
    }

    pub async fn join_lobby(&self) {
        self.lobby.join_lobby().await;
    }

    pub fn send_message(&self, message_type: ClientMessageType, data: Option<Value>) -> bool {
        self.lobby.send_message(message_type, data)
    }

    pub fn on_message<F>(&self, message_type: ServerMessageType, handler: F)
    where
        F: Fn(Payload) + Send + Sync + 'static,
    {
        self.lobby.on_message(message_type, handler);
    }

    pub fn lobby_status(&self) -> watch::Receiver<LobbyStatus> {
        self.lobby.subscribe()
    }

    /// Call when the application returns to the foreground.
    pub async fn resume(&self) {
        self.lobby.resume().await;
    }

    /// Stop token renewal, cancel reconnects and leave the lobby.
    pub async fn shutdown(self) {
        self.auth.cancel_refresh();
        self.lobby.disconnect().await;
        info!("net manager shut down");
    }
}
