//! Access/refresh token lifecycle.
//!
//! [`TokenManager`] owns the process-wide [`AuthTokens`]. It:
//!
//! - restores unexpired tokens from the cache at startup,
//! - runs one shared login-or-refresh cycle for any number of concurrent
//!   callers,
//! - renews proactively on a timer at `expires_at`,
//! - retries an API request exactly once after a 401.
//!
//! API responses use the `{data, errCode, errMsg}` envelope; a nonzero
//! `errCode` fails the request with an [`HttpError`] even on HTTP 200.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

use crate::cache::{get_cache, set_cache, KeyValueStore};
use crate::error::{HttpError, NetError, Result};
use crate::http::{Http, Method};

/// Cache entry holding the serialized [`AuthTokens`].
pub const AUTH_CACHE_KEY: &str = "auth_tokens";
pub const LOGIN_PATH: &str = "/api/auth/login";
pub const REFRESH_PATH: &str = "/api/auth/refresh";

/// Seconds subtracted from `expiresIn` so renewal happens before real expiry.
pub const EXPIRY_MARGIN_SECS: i64 = 120;

/// Floor for the proactive renewal delay.
const MIN_REFRESH_DELAY: Duration = Duration::from_secs(1);

/// Current unix time in seconds.
pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

// ── Wire types ──────────────────────────────────────────────────────

/// Tokens as persisted in the cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthTokens {
    pub access_token: String,
    pub refresh_token: String,
    /// Unix seconds, already reduced by [`EXPIRY_MARGIN_SECS`].
    pub expires_at: i64,
}

impl AuthTokens {
    pub fn from_response(response: &AuthResponse, now: i64) -> Self {
        Self {
            access_token: response.access_token.clone(),
            refresh_token: response.refresh_token.clone(),
            expires_at: now + response.expires_in - EXPIRY_MARGIN_SECS,
        }
    }

    pub fn is_expired(&self, now: i64) -> bool {
        now >= self.expires_at
    }
}

/// Body of a successful login or refresh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    pub access_token: String,
    pub refresh_token: String,
    /// Lifetime of the access token in seconds.
    pub expires_in: i64,
    #[serde(default)]
    pub player_id: String,
    #[serde(default)]
    pub provider_account_id: String,
    #[serde(default)]
    pub is_new: bool,
}

/// Application response envelope.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse<T> {
    #[serde(default = "Option::default")]
    pub data: Option<T>,
    #[serde(default)]
    pub err_code: i64,
    #[serde(default)]
    pub err_msg: String,
}

impl<T: DeserializeOwned> ApiResponse<T> {
    /// Unwrap the payload.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::Http`] with the envelope's code for a nonzero
    /// `errCode`, and [`NetError::Serialization`] if `data` is missing and
    /// `T` cannot be built from `null`.
    pub fn into_result(self) -> Result<T> {
        if self.err_code != 0 {
            return Err(HttpError::new(self.err_code, self.err_msg).into());
        }
        match self.data {
            Some(data) => Ok(data),
            None => Ok(serde_json::from_value(Value::Null)?),
        }
    }
}

/// Authorization code returned by a platform social SDK.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginCode {
    pub code: String,
    pub provider: String,
}

/// Platform social login capability.
#[async_trait]
pub trait SocialLogin: Send + Sync + 'static {
    /// Whether the platform session backing the cached tokens is still valid.
    async fn check_session(&self) -> bool;

    /// Obtain a fresh authorization code.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::SocialLogin`] if the platform refused.
    async fn login(&self) -> Result<LoginCode>;
}

// ── Token manager ───────────────────────────────────────────────────

struct Inner {
    http: Arc<Http>,
    social: Arc<dyn SocialLogin>,
    store: Arc<dyn KeyValueStore>,
    namespace: String,
    tokens: Mutex<Option<AuthTokens>>,
    /// Serializes login-or-refresh cycles.
    gate: tokio::sync::Mutex<()>,
    /// Completed cycles.
    generation: AtomicU64,
    last_outcome: Mutex<Option<Result<AuthResponse>>>,
    refresh_timer: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(timer) = lock(&self.refresh_timer).take() {
            timer.abort();
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// Copy of a shared cycle outcome for a waiting caller.
fn replay(outcome: &Result<AuthResponse>) -> Result<AuthResponse> {
    match outcome {
        Ok(response) => Ok(response.clone()),
        Err(NetError::Http(e)) => Err(NetError::Http(e.clone())),
        Err(NetError::Timeout) => Err(NetError::Timeout),
        Err(e) => Err(NetError::AuthFailed(e.to_string())),
    }
}

/// Owner of the access/refresh tokens.
///
/// Cloning is cheap; clones share the same tokens, timer and in-flight
/// cycle.
#[derive(Clone)]
pub struct TokenManager {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for TokenManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenManager")
            .field("has_tokens", &self.tokens().is_some())
            .field("generation", &self.inner.generation.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

impl TokenManager {
    pub fn new(
        http: Arc<Http>,
        social: Arc<dyn SocialLogin>,
        store: Arc<dyn KeyValueStore>,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                http,
                social,
                store,
                namespace: namespace.into(),
                tokens: Mutex::new(None),
                gate: tokio::sync::Mutex::new(()),
                generation: AtomicU64::new(0),
                last_outcome: Mutex::new(None),
                refresh_timer: Mutex::new(None),
            }),
        }
    }

    pub fn http(&self) -> &Arc<Http> {
        &self.inner.http
    }

    /// Tokens currently held in memory.
    pub fn tokens(&self) -> Option<AuthTokens> {
        lock(&self.inner.tokens).clone()
    }

    /// Whether a proactive renewal is scheduled.
    pub fn refresh_scheduled(&self) -> bool {
        lock(&self.inner.refresh_timer)
            .as_ref()
            .is_some_and(|t| !t.is_finished())
    }

    /// Load cached tokens if the platform session is still valid and the
    /// tokens have not expired. Returns whether tokens were restored.
    pub async fn restore(&self) -> bool {
        if !self.inner.social.check_session().await {
            debug!("platform session invalid, skipping token restore");
            return false;
        }
        let cached: Option<AuthTokens> = get_cache(
            &*self.inner.store,
            &self.inner.namespace,
            AUTH_CACHE_KEY,
            None,
        );
        match cached {
            Some(tokens) if !tokens.is_expired(unix_now()) => {
                debug!(expires_at = tokens.expires_at, "restored cached tokens");
                self.inner
                    .http
                    .set_auth_token(Some(tokens.access_token.clone()));
                *lock(&self.inner.tokens) = Some(tokens);
                true
            }
            _ => false,
        }
    }

    /// An unexpired access token, running login-or-refresh when needed.
    ///
    /// # Errors
    ///
    /// See [`login_or_refresh`](Self::login_or_refresh).
    pub async fn valid_token(&self) -> Result<String> {
        if let Some(tokens) = self.tokens() {
            if !tokens.is_expired(unix_now()) {
                return Ok(tokens.access_token);
            }
        }
        Ok(self.login_or_refresh().await?.access_token)
    }

    /// Refresh with the cached refresh token, falling back to a full login.
    ///
    /// Concurrent callers share one cycle: whoever arrives while a cycle is
    /// running receives that cycle's outcome instead of starting another.
    ///
    /// # Errors
    ///
    /// Returns the login failure ([`NetError::SocialLogin`], [`NetError::Http`],
    /// [`NetError::Timeout`]). Callers that shared the cycle receive a copy,
    /// with other variants reported as [`NetError::AuthFailed`].
    pub async fn login_or_refresh(&self) -> Result<AuthResponse> {
        let seen = self.inner.generation.load(Ordering::Acquire);
        let _gate = self.inner.gate.lock().await;
        if self.inner.generation.load(Ordering::Acquire) != seen {
            if let Some(outcome) = lock(&self.inner.last_outcome).as_ref() {
                debug!("joined in-flight login/refresh");
                return replay(outcome);
            }
        }

        let outcome = self.run_cycle().await;
        *lock(&self.inner.last_outcome) = Some(replay(&outcome));
        self.inner.generation.fetch_add(1, Ordering::AcqRel);
        outcome
    }

    async fn run_cycle(&self) -> Result<AuthResponse> {
        let refresh_token = self
            .tokens()
            .map(|t| t.refresh_token)
            .filter(|t| !t.is_empty());
        if let Some(refresh_token) = refresh_token {
            match self.refresh(&refresh_token).await {
                Ok(response) => return Ok(response),
                Err(e) => warn!(error = %e, "token refresh failed, falling back to login"),
            }
        }
        self.login().await
    }

    async fn login(&self) -> Result<AuthResponse> {
        let LoginCode { code, provider } = self.inner.social.login().await?;
        let response: AuthResponse = self
            .create_request(
                Method::Post,
                LOGIN_PATH,
                Some(&json!({ "code": code, "provider": provider })),
            )
            .await?;
        info!(player_id = %response.player_id, is_new = response.is_new, "logged in");
        self.set_tokens(&response);
        Ok(response)
    }

    async fn refresh(&self, refresh_token: &str) -> Result<AuthResponse> {
        let response: AuthResponse = self
            .create_request(
                Method::Post,
                REFRESH_PATH,
                Some(&json!({ "refreshToken": refresh_token })),
            )
            .await?;
        debug!("tokens refreshed");
        self.set_tokens(&response);
        Ok(response)
    }

    fn set_tokens(&self, response: &AuthResponse) {
        let tokens = AuthTokens::from_response(response, unix_now());
        self.inner
            .http
            .set_auth_token(Some(tokens.access_token.clone()));
        if let Err(e) = set_cache(
            &*self.inner.store,
            &self.inner.namespace,
            AUTH_CACHE_KEY,
            &tokens,
        ) {
            warn!(error = %e, "failed to persist tokens");
        }
        *lock(&self.inner.tokens) = Some(tokens);
        self.schedule_refresh();
    }

    /// Replace the renewal timer with one firing at the current `expires_at`.
    fn schedule_refresh(&self) {
        self.cancel_refresh();
        let Some(tokens) = self.tokens() else {
            return;
        };
        let secs = u64::try_from(tokens.expires_at - unix_now()).unwrap_or(0);
        let delay = Duration::from_secs(secs).max(MIN_REFRESH_DELAY);
        debug!(delay_secs = delay.as_secs(), "scheduling token renewal");

        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            // Detach so the renewal below does not abort this task.
            drop(lock(&inner.refresh_timer).take());
            let manager = TokenManager { inner };
            if let Err(e) = manager.login_or_refresh().await {
                error!(error = %e, "proactive token renewal failed");
            }
        });
        *lock(&self.inner.refresh_timer) = Some(timer);
    }

    /// Stop the renewal timer.
    pub fn cancel_refresh(&self) {
        if let Some(timer) = lock(&self.inner.refresh_timer).take() {
            timer.abort();
        }
    }

    // ── Requests ────────────────────────────────────────────────────

    /// Authenticated API request with one retry after a 401.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::Http`] for failed requests (a second 401 included)
    /// and [`NetError::Timeout`] when the server does not answer in time.
    pub async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        data: Option<&Value>,
    ) -> Result<T> {
        if self.tokens().is_none() {
            self.login_or_refresh().await?;
        }
        match self.create_request(method, path, data).await {
            Err(e) if e.is_unauthorized() => {
                debug!(path, "unauthorized, renewing tokens and retrying once");
                self.login_or_refresh().await?;
                self.create_request(method, path, data).await
            }
            other => other,
        }
    }

    /// # Errors
    ///
    /// See [`request`](Self::request).
    pub async fn get<T: DeserializeOwned>(&self, path: &str, data: Option<&Value>) -> Result<T> {
        self.request(Method::Get, path, data).await
    }

    /// # Errors
    ///
    /// See [`request`](Self::request).
    pub async fn post<T: DeserializeOwned>(&self, path: &str, data: Option<&Value>) -> Result<T> {
        self.request(Method::Post, path, data).await
    }

    /// One envelope request without retry.
    ///
    /// # Errors
    ///
    /// Failures other than [`NetError::Http`] and [`NetError::Timeout`] are
    /// reported as `HttpError(-1, message)`.
    pub async fn create_request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        data: Option<&Value>,
    ) -> Result<T> {
        let result = match self
            .inner
            .http
            .request::<ApiResponse<T>>(method, path, data)
            .await
        {
            Ok(envelope) => envelope.into_result(),
            Err(e) => Err(e),
        };
        match result {
            Ok(data) => {
                debug!(path, "request succeeded");
                Ok(data)
            }
            Err(e) => {
                error!(path, error = %e, "request failed");
                match e {
                    NetError::Http(_) | NetError::Timeout => Err(e),
                    other => Err(HttpError::new(-1, other.to_string()).into()),
                }
            }
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

    fn response(expires_in: i64) -> AuthResponse {
        AuthResponse {
            access_token: "a".into(),
            refresh_token: "r".into(),
            expires_in,
            player_id: "p".into(),
            provider_account_id: "acc".into(),
            is_new: false,
        }
    }

    #[test]
    fn expiry_keeps_safety_margin() {
        let tokens = AuthTokens::from_response(&response(3600), 1_000);
        assert_eq!(tokens.expires_at, 1_000 + 3600 - 120);
        assert!(!tokens.is_expired(4_479));
        assert!(tokens.is_expired(4_480));
    }

    #[test]
    fn tokens_use_camel_case_in_cache() {
        let tokens = AuthTokens::from_response(&response(200), 0);
        let json = serde_json::to_value(&tokens).unwrap();
        assert_eq!(
            json,
            json!({ "accessToken": "a", "refreshToken": "r", "expiresAt": 80 })
        );
    }

    #[test]
    fn envelope_error_code_fails_even_with_data() {
        let env: ApiResponse<Value> =
            serde_json::from_value(json!({ "data": {"x": 1}, "errCode": 1003, "errMsg": "no coins" }))
                .unwrap();
        match env.into_result() {
            Err(NetError::Http(e)) => {
                assert_eq!(e.code, 1003);
                assert_eq!(e.message, "no coins");
            }
            other => panic!("expected http error, got {other:?}"),
        }
    }

    #[test]
    fn envelope_without_data_decodes_unit() {
        let env: ApiResponse<()> = serde_json::from_value(json!({ "errCode": 0 })).unwrap();
        env.into_result().unwrap();
        let env: ApiResponse<Option<u32>> = serde_json::from_value(json!({})).unwrap();
        assert_eq!(env.into_result().unwrap(), None);
    }

    #[test]
    fn replay_preserves_http_errors() {
        let failed: Result<AuthResponse> = Err(HttpError::new(401, "nope").into());
        assert!(replay(&failed).unwrap_err().is_unauthorized());
        let other: Result<AuthResponse> = Err(NetError::SocialLogin("cancelled".into()));
        assert!(matches!(replay(&other), Err(NetError::AuthFailed(_))));
    }
}
