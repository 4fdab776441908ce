//! # Lobby Example
//!
//! Demonstrates a complete session lifecycle:
//!
//! 1. Log in through a (stubbed) platform login and cache the tokens
//! 2. Join the lobby room and keep it alive across disconnects
//! 3. React to server pushes and send a client message
//! 4. Shut down gracefully on Ctrl+C
//!
//! ## Running
//!
//! ```sh
//! # Start a game server on localhost:2567, then:
//! cargo run --example lobby
//!
//! # Override the server URL or the login code:
//! NONOGRAM_URL=https://game.example.com NONOGRAM_LOGIN_CODE=abc cargo run --example lobby
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use nonogram_net::{
    ClientMessageType, LobbyStatus, LoginCode, NetConfig, PendingNetManager, PlatformServices,
    ServerMessageType, SocialLogin,
};

/// Default server URL when `NONOGRAM_URL` is not set.
const DEFAULT_URL: &str = "http://localhost:2567";

/// Platform login that hands out a fixed code, as a development server
/// accepts.
struct DevLogin {
    code: String,
}

#[async_trait]
impl SocialLogin for DevLogin {
    async fn check_session(&self) -> bool {
        true
    }

    async fn login(&self) -> nonogram_net::Result<LoginCode> {
        Ok(LoginCode {
            code: self.code.clone(),
            provider: "dev".into(),
        })
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // ── Logging ─────────────────────────────────────────────────────
    // Set `RUST_LOG=debug` for verbose output.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // ── Configuration ───────────────────────────────────────────────
    let url = std::env::var("NONOGRAM_URL").unwrap_or_else(|_| DEFAULT_URL.to_string());
    let code = std::env::var("NONOGRAM_LOGIN_CODE").unwrap_or_else(|_| "dev-code".to_string());
    let config = NetConfig::new(url).with_header("X-Client-Version", env!("CARGO_PKG_VERSION"));

    let cache_path = std::env::temp_dir().join("nonogram-net-demo-cache.json");
    let services = PlatformServices::native(Arc::new(DevLogin { code }), cache_path);

    // ── Startup ─────────────────────────────────────────────────────
    let (net, auth) = PendingNetManager::new(config, services).init().await?;
    tracing::info!(player_id = %auth.player_id, new_player = auth.is_new, "logged in");

    net.on_message(ServerMessageType::PlayerState, |payload| {
        tracing::info!(?payload, "player state");
    });
    net.on_message(ServerMessageType::ItemsUpdated, |payload| {
        tracing::info!(?payload, "items updated");
    });

    let mut status = net.lobby_status();
    net.join_lobby().await;

    // ── Event loop ──────────────────────────────────────────────────
    loop {
        tokio::select! {
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = *status.borrow_and_update();
                tracing::info!(?current, "lobby status");
                if current == LobbyStatus::Connected {
                    net.send_message(ClientMessageType::UseHints, Some(json!({ "count": 1 })));
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Ctrl+C received, shutting down");
                break;
            }
        }
    }

    net.shutdown().await;
    Ok(())
}
