//! Matchmaking client.
//!
//! [`Client`] reserves a seat over HTTP (`POST matchmake/{method}/{room}`),
//! then consumes the reservation by opening a [`Room`] and waiting for the
//! join confirmation.
//!
//! # Example
//!
//! ```rust,ignore
//! let client = Client::new(http, connector);
//! let room = client.join_or_create("lobby", serde_json::json!({})).await?;
//! let token = room.reconnection_token();
//! ```

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::endpoint::flatten_options;
use crate::error::{HttpError, MatchMakeError, Result};
use crate::http::{Http, Method};
use crate::protocol::{MatchMethod, ReconnectionToken, RequestError, SeatReservation};
use crate::room::{self, Room, RoomOptions};
use crate::transport::Connector;

/// Reserves seats and opens room sessions.
#[derive(Clone)]
pub struct Client {
    http: Arc<Http>,
    connector: Arc<dyn Connector>,
    join_timeout: Duration,
    dev_mode_retries: u32,
    dev_mode_retry_interval: Duration,
    shutdown_timeout: Duration,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("endpoint", self.http.endpoint())
            .field("join_timeout", &self.join_timeout)
            .finish_non_exhaustive()
    }
}

impl Client {
    pub fn new(http: Arc<Http>, connector: Arc<dyn Connector>) -> Self {
        Self {
            http,
            connector,
            join_timeout: room::DEFAULT_JOIN_TIMEOUT,
            dev_mode_retries: room::DEFAULT_DEV_MODE_RETRIES,
            dev_mode_retry_interval: room::DEFAULT_DEV_MODE_RETRY_INTERVAL,
            shutdown_timeout: room::DEFAULT_SHUTDOWN_TIMEOUT,
        }
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

    /// The HTTP layer carrying the bearer token.
    pub fn http(&self) -> &Arc<Http> {
        &self.http
    }

    /// # Errors
    ///
    /// See [`matchmake`](Self::matchmake).
    pub async fn join_or_create(&self, room_name: &str, options: Value) -> Result<Room> {
        self.matchmake(MatchMethod::JoinOrCreate, room_name, options).await
    }

    /// # Errors
    ///
    /// See [`matchmake`](Self::matchmake).
    pub async fn create(&self, room_name: &str, options: Value) -> Result<Room> {
        self.matchmake(MatchMethod::Create, room_name, options).await
    }

    /// # Errors
    ///
    /// See [`matchmake`](Self::matchmake).
    pub async fn join(&self, room_name: &str, options: Value) -> Result<Room> {
        self.matchmake(MatchMethod::Join, room_name, options).await
    }

    /// # Errors
    ///
    /// See [`matchmake`](Self::matchmake).
    pub async fn join_by_id(&self, room_id: &str, options: Value) -> Result<Room> {
        self.matchmake(MatchMethod::JoinById, room_id, options).await
    }

    /// Resume a previous session from its `roomId:token` credential.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::InvalidReconnectionToken`](crate::NetError::InvalidReconnectionToken)
    /// before any network call if the token is malformed; otherwise see
    /// [`matchmake`](Self::matchmake).
    pub async fn reconnect(&self, reconnection_token: &str) -> Result<Room> {
        let token: ReconnectionToken = reconnection_token.parse()?;
        self.matchmake(
            MatchMethod::Reconnect,
            &token.room_id,
            json!({ "reconnectionToken": token.token }),
        )
        .await
    }

    /// Reserve a seat and open the room.
    ///
    /// # Errors
    ///
    /// - [`NetError::MatchMake`](crate::NetError::MatchMake) for `{code, error}` responses
    /// - [`NetError::Http`](crate::NetError::Http) for other failed responses
    /// - any [`Room::join`] error
    pub async fn matchmake(&self, method: MatchMethod, room_or_id: &str, options: Value) -> Result<Room> {
        let reservation = self.reserve_seat(method, room_or_id, &options).await?;
        self.consume_seat_reservation(&reservation, &options).await
    }

    /// Ask the matchmaker for a seat.
    ///
    /// For [`MatchMethod::Reconnect`] the reservation carries the
    /// `reconnectionToken` from `options`.
    ///
    /// # Errors
    ///
    /// See [`matchmake`](Self::matchmake).
    pub async fn reserve_seat(
        &self,
        method: MatchMethod,
        room_or_id: &str,
        options: &Value,
    ) -> Result<SeatReservation> {
        let path = format!("matchmake/{method}/{room_or_id}");
        debug!(%method, room = room_or_id, "requesting seat reservation");
        let response = self.http.execute(Method::Post, &path, Some(options)).await?;

        let body = match response.json() {
            Ok(body) => body,
            Err(_) if !response.is_success() => {
                return Err(HttpError::new(i64::from(response.status), response.error_message()).into())
            }
            Err(e) => return Err(e),
        };
        if let Some(err) = RequestError::from_body(&body) {
            let err = MatchMakeError {
                code: err.code,
                message: err.error,
            };
            match err.kind() {
                Some(kind) => warn!(code = err.code, reason = kind.description(), "seat reservation refused"),
                None => warn!(code = err.code, reason = %err.message, "seat reservation refused"),
            }
            return Err(err.into());
        }
        if !response.is_success() {
            return Err(HttpError::new(i64::from(response.status), response.error_message()).into());
        }

        let mut reservation: SeatReservation = serde_json::from_value(body)?;
        if method == MatchMethod::Reconnect {
            reservation.reconnection_token = options
                .get("reconnectionToken")
                .and_then(Value::as_str)
                .map(str::to_owned);
        }
        Ok(reservation)
    }

    /// Connection URL for a reservation.
    ///
    /// Query parameters: `sessionId`, `reconnectionToken` (when present),
    /// `_authToken` (when authenticated), then the join options.
    pub fn room_url(&self, reservation: &SeatReservation, options: &Value) -> String {
        let mut params = vec![("sessionId".to_string(), reservation.session_id.clone())];
        if let Some(token) = &reservation.reconnection_token {
            params.push(("reconnectionToken".to_string(), token.clone()));
        }
        if let Some(token) = self.http.auth_token() {
            params.push(("_authToken".to_string(), token));
        }
        for (name, value) in flatten_options(options) {
            if !params.iter().any(|(k, _)| *k == name) {
                params.push((name, value));
            }
        }
        self.http
            .endpoint()
            .room_url(&reservation.room, &params, &reservation.protocol)
    }

    /// Open the room a seat was reserved in.
    ///
    /// # Errors
    ///
    /// See [`Room::join`].
    pub async fn consume_seat_reservation(
        &self,
        reservation: &SeatReservation,
        options: &Value,
    ) -> Result<Room> {
        let url = self.room_url(reservation, options);
        let room_options = RoomOptions::new(
            reservation.room.name.clone(),
            reservation.room.room_id.clone(),
            reservation.session_id.clone(),
            url,
        )
        .with_headers(self.http.headers().to_vec())
        .with_dev_mode(reservation.dev_mode)
        .with_join_timeout(self.join_timeout)
        .with_dev_mode_retry(self.dev_mode_retries, self.dev_mode_retry_interval)
        .with_shutdown_timeout(self.shutdown_timeout);

        let room = Room::join(Arc::clone(&self.connector), room_options).await?;
        info!(
            room = %reservation.room.name,
            room_id = %reservation.room.room_id,
            session_id = %reservation.session_id,
            "seat reservation consumed"
        );
        Ok(room)
    }
}
