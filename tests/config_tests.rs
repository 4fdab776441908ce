#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
//! Configuration loading tests.
//!
//! Applications ship their network settings as a TOML file; these tests pin
//! the accepted keys and their defaults.

use std::time::Duration;

use tokio_test::{assert_err, assert_ok};

use nonogram_net::config::{NetConfig, DEFAULT_CACHE_NAMESPACE, DEFAULT_DEV_MODE_RETRIES};

#[test]
fn minimal_toml_uses_defaults() {
    let config: NetConfig = assert_ok!(toml::from_str(r#"server_url = "https://game.example.com""#));

    assert_eq!(config, NetConfig::new("https://game.example.com"));
    assert_eq!(config.http_timeout(), Duration::from_secs(10));
    assert_eq!(config.join_timeout(), Duration::from_secs(10));
    assert_eq!(config.lobby_room, "lobby");
    assert_eq!(config.reconnect_initial(), Duration::from_secs(1));
    assert_eq!(config.reconnect_max(), Duration::from_secs(10));
    assert_eq!(config.dev_mode_retries, DEFAULT_DEV_MODE_RETRIES);
    assert_eq!(config.cache_namespace, DEFAULT_CACHE_NAMESPACE);
    assert!(config.headers.is_empty());
}

#[test]
fn full_toml_overrides_every_field() {
    let config: NetConfig = toml::from_str(
        r#"
        server_url = "http://localhost:2567"
        http_timeout_ms = 2500
        join_timeout_ms = 4000
        lobby_room = "lobby_eu"
        reconnect_initial_ms = 500
        reconnect_max_ms = 30000
        dev_mode_retries = 2
        dev_mode_retry_interval_ms = 750
        cache_namespace = "Onet_2.0"
        shutdown_timeout_ms = 0
        headers = [["X-Client-Version", "1.4.0"], ["X-Platform", "desktop"]]
        "#,
    )
    .unwrap();

    let expected = NetConfig::new("http://localhost:2567")
        .with_http_timeout(Duration::from_millis(2500))
        .with_join_timeout(Duration::from_secs(4))
        .with_lobby_room("lobby_eu")
        .with_reconnect_backoff(Duration::from_millis(500), Duration::from_secs(30))
        .with_dev_mode_retry(2, Duration::from_millis(750))
        .with_cache_namespace("Onet_2.0")
        .with_shutdown_timeout(Duration::ZERO)
        .with_header("X-Client-Version", "1.4.0")
        .with_header("X-Platform", "desktop");
    assert_eq!(config, expected);
}

#[test]
fn inverted_backoff_bounds_are_clamped_on_read() {
    let config: NetConfig = toml::from_str(
        r#"
        server_url = "http://localhost:2567"
        reconnect_initial_ms = 8000
        reconnect_max_ms = 2000
        "#,
    )
    .unwrap();

    assert_eq!(config.reconnect_initial(), Duration::from_secs(8));
    assert_eq!(config.reconnect_max(), Duration::from_secs(8));
}

#[test]
fn missing_server_url_is_rejected() {
    let err = toml::from_str::<NetConfig>("lobby_room = \"lobby\"").unwrap_err();
    assert!(err.to_string().contains("server_url"), "{err}");
}

#[test]
fn wrongly_typed_field_is_rejected() {
    assert_err!(toml::from_str::<NetConfig>(
        r#"
        server_url = "http://localhost:2567"
        http_timeout_ms = "fast"
        "#,
    ));
}

#[test]
fn json_and_toml_agree() {
    let from_toml: NetConfig = toml::from_str(
        r#"
        server_url = "http://localhost:2567"
        lobby_room = "lobby_us"
        "#,
    )
    .unwrap();
    let from_json: NetConfig = serde_json::from_str(
        r#"{ "server_url": "http://localhost:2567", "lobby_room": "lobby_us" }"#,
    )
    .unwrap();
    assert_eq!(from_toml, from_json);
}
