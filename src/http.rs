//! HTTP layer shared by matchmaking and the auth/API requests.
//!
//! [`HttpBackend`] is the platform capability that actually performs a
//! request; [`Http`] adds the endpoint, default headers, the bearer token and
//! the request timeout on top of it.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::endpoint::{flatten_options, Endpoint};
use crate::error::{HttpError, NetError, Result};

/// HTTP request method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
}

impl HttpRequest {
    /// Value of the first header named `name`, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// The body parsed as JSON, if any.
    pub fn json_body(&self) -> Option<serde_json::Value> {
        self.body
            .as_deref()
            .and_then(|b| serde_json::from_slice(b).ok())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// The body as JSON; an empty body is `null`.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::Serialization`] for non-JSON bodies.
    pub fn json(&self) -> Result<serde_json::Value> {
        if self.body.is_empty() {
            return Ok(serde_json::Value::Null);
        }
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// Best-effort error message: the `error`, `errMsg` or `message` field of
    /// a JSON body, else the raw body text.
    pub fn error_message(&self) -> String {
        if let Ok(serde_json::Value::Object(obj)) = self.json() {
            for field in ["error", "errMsg", "message"] {
                if let Some(serde_json::Value::String(msg)) = obj.get(field) {
                    return msg.clone();
                }
            }
        }
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Performs HTTP requests for the current platform.
#[async_trait]
pub trait HttpBackend: Send + Sync + 'static {
    /// Execute one request. Any received response, whatever its status, is
    /// `Ok`.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::Network`] when no response was received.
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse>;
}

// ── reqwest backend ─────────────────────────────────────────────────

/// [`HttpBackend`] backed by `reqwest`.
#[cfg(feature = "http-reqwest")]
#[derive(Debug, Clone, Default)]
pub struct ReqwestBackend {
    client: reqwest::Client,
}

#[cfg(feature = "http-reqwest")]
impl ReqwestBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[cfg(feature = "http-reqwest")]
#[async_trait]
impl HttpBackend for ReqwestBackend {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Delete => reqwest::Method::DELETE,
        };
        let mut builder = self.client.request(method, &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }
        let map_err = |e: reqwest::Error| {
            if e.is_timeout() {
                NetError::Timeout
            } else {
                NetError::Network(e.to_string())
            }
        };
        let response = builder.send().await.map_err(map_err)?;
        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(map_err)?.to_vec();
        Ok(HttpResponse { status, body })
    }
}

// ── Http ────────────────────────────────────────────────────────────

/// HTTP client bound to the game server endpoint.
pub struct Http {
    backend: Arc<dyn HttpBackend>,
    endpoint: Endpoint,
    headers: Vec<(String, String)>,
    auth_token: RwLock<Option<String>>,
    timeout: Duration,
}

impl std::fmt::Debug for Http {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Http")
            .field("endpoint", &self.endpoint)
            .field("headers", &self.headers)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl Http {
    pub fn new(
        backend: Arc<dyn HttpBackend>,
        endpoint: Endpoint,
        headers: Vec<(String, String)>,
        timeout: Duration,
    ) -> Self {
        Self {
            backend,
            endpoint,
            headers,
            auth_token: RwLock::new(None),
            timeout,
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Default headers sent with every request and room connection.
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn auth_token(&self) -> Option<String> {
        self.auth_token
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn set_auth_token(&self, token: Option<String>) {
        *self.auth_token.write().unwrap_or_else(|e| e.into_inner()) = token;
    }

    /// Send a request and return the raw response, whatever its status.
    ///
    /// GET and DELETE payloads become query parameters; other methods send
    /// them as a JSON body.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::Timeout`] when no response arrives within the
    /// configured timeout and [`NetError::Network`] for transport failures.
    pub async fn execute(
        &self,
        method: Method,
        path: &str,
        data: Option<&serde_json::Value>,
    ) -> Result<HttpResponse> {
        let mut url = self.endpoint.http_url(path);
        let mut body = None;
        match (method, data) {
            (Method::Get | Method::Delete, Some(data)) => {
                let mut parsed =
                    url::Url::parse(&url).map_err(|e| NetError::InvalidUrl(e.to_string()))?;
                {
                    let mut pairs = parsed.query_pairs_mut();
                    for (k, v) in flatten_options(data) {
                        pairs.append_pair(&k, &v);
                    }
                }
                url = parsed.into();
            }
            (_, Some(data)) => body = Some(serde_json::to_vec(data)?),
            (_, None) => {}
        }

        let mut headers = vec![("Content-Type".to_string(), "application/json".to_string())];
        headers.extend(self.headers.iter().cloned());
        if let Some(token) = self.auth_token() {
            headers.push(("Authorization".to_string(), format!("Bearer {token}")));
        }

        debug!(method = method.as_str(), url = %url, "http request");
        let request = HttpRequest {
            method,
            url,
            headers,
            body,
        };
        tokio::time::timeout(self.timeout, self.backend.execute(request))
            .await
            .map_err(|_| NetError::Timeout)?
    }

    /// Send a request and decode a successful JSON response.
    ///
    /// # Errors
    ///
    /// Non-2xx responses fail with [`NetError::Http`] carrying the status;
    /// see also [`execute`](Self::execute).
    pub async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        data: Option<&serde_json::Value>,
    ) -> Result<T> {
        let response = self.execute(method, path, data).await?;
        if !response.is_success() {
            return Err(HttpError::new(i64::from(response.status), response.error_message()).into());
        }
        Ok(serde_json::from_value(response.json()?)?)
    }

    /// # Errors
    ///
    /// See [`request`](Self::request).
    pub async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        data: Option<&serde_json::Value>,
    ) -> Result<T> {
        self.request(Method::Get, path, data).await
    }

    /// # Errors
    ///
    /// See [`request`](Self::request).
    pub async fn post<T: DeserializeOwned>(
        &self,
        path: &str,
        data: Option<&serde_json::Value>,
    ) -> Result<T> {
        self.request(Method::Post, path, data).await
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
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        requests: Mutex<Vec<HttpRequest>>,
        status: u16,
        body: &'static str,
        delay: Option<Duration>,
    }

    #[async_trait]
    impl HttpBackend for Recorder {
        async fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
            self.requests.lock().unwrap().push(request);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            Ok(HttpResponse {
                status: self.status,
                body: self.body.as_bytes().to_vec(),
            })
        }
    }

    fn http(backend: Arc<Recorder>) -> Http {
        Http::new(
            backend,
            Endpoint::parse("https://game.example.com").unwrap(),
            vec![("X-Client".into(), "test".into())],
            Duration::from_secs(10),
        )
    }

    #[tokio::test]
    async fn post_sends_json_and_bearer() {
        let backend = Arc::new(Recorder {
            status: 200,
            body: r#"{"ok":true}"#,
            ..Default::default()
        });
        let http = http(Arc::clone(&backend));
        http.set_auth_token(Some("tok".into()));
        let value: serde_json::Value = http
            .post("api/x", Some(&serde_json::json!({ "a": 1 })))
            .await
            .unwrap();
        assert_eq!(value, serde_json::json!({ "ok": true }));

        let requests = backend.requests.lock().unwrap();
        let req = &requests[0];
        assert_eq!(req.url, "https://game.example.com/api/x");
        assert_eq!(req.header("authorization"), Some("Bearer tok"));
        assert_eq!(req.header("x-client"), Some("test"));
        assert_eq!(req.json_body(), Some(serde_json::json!({ "a": 1 })));
    }

    #[tokio::test]
    async fn get_sends_query_params() {
        let backend = Arc::new(Recorder {
            status: 200,
            body: "null",
            ..Default::default()
        });
        let http = http(Arc::clone(&backend));
        let _: serde_json::Value = http
            .get("api/tasks", Some(&serde_json::json!({ "day": 3 })))
            .await
            .unwrap();
        let requests = backend.requests.lock().unwrap();
        assert_eq!(requests[0].url, "https://game.example.com/api/tasks?day=3");
        assert_eq!(requests[0].body, None);
        assert_eq!(requests[0].header("authorization"), None);
    }

    #[tokio::test]
    async fn non_success_status_becomes_http_error() {
        let backend = Arc::new(Recorder {
            status: 401,
            body: r#"{"error":"expired"}"#,
            ..Default::default()
        });
        let err = http(backend)
            .get::<serde_json::Value>("api/me", None)
            .await
            .unwrap_err();
        assert!(err.is_unauthorized());
        assert!(matches!(err, NetError::Http(HttpError { ref message, .. }) if message == "expired"));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_backend_times_out() {
        let backend = Arc::new(Recorder {
            status: 200,
            body: "{}",
            delay: Some(Duration::from_secs(30)),
            ..Default::default()
        });
        let err = http(backend)
            .get::<serde_json::Value>("api/slow", None)
            .await
            .unwrap_err();
        assert!(matches!(err, NetError::Timeout));
    }
}
