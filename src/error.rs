//! Error types for the networking core.

use thiserror::Error;

use crate::error_codes::ErrorCode;

/// A failed HTTP exchange.
///
/// `code` is the HTTP status for protocol failures, the server's `errCode`
/// for application envelopes, or `-1` when no response was received at all.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("http error {code}: {message}")]
pub struct HttpError {
    /// Status code, application error code, or `-1`.
    pub code: i64,
    /// Human-readable message.
    pub message: String,
}

impl HttpError {
    /// Create a new HTTP error.
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Returns `true` if the server rejected the bearer token.
    pub fn is_unauthorized(&self) -> bool {
        self.code == 401
    }
}

/// The matchmaker refused to reserve a seat.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("matchmake error {code}: {message}")]
pub struct MatchMakeError {
    /// Matchmaking error code (see [`ErrorCode`]).
    pub code: i32,
    /// Message returned by the matchmaker.
    pub message: String,
}

impl MatchMakeError {
    /// The known matchmaking failure behind `code`, if any.
    pub fn kind(&self) -> Option<ErrorCode> {
        ErrorCode::from_code(self.code)
    }
}

/// Errors raised while decoding wire frames or state bytes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The input ended before a complete value was read.
    #[error("unexpected end of input")]
    UnexpectedEof,

    /// The frame kind byte is not part of the protocol.
    #[error("unknown frame kind {0}")]
    UnknownFrame(u8),

    /// A length-prefixed string was not valid UTF-8.
    #[error("invalid utf-8 in string field")]
    InvalidUtf8,

    /// A value was structurally invalid.
    #[error("malformed input: {0}")]
    Malformed(String),
}

/// Errors that can occur in the networking core.
#[derive(Debug, Error)]
pub enum NetError {
    /// Failed to send a frame through the transport.
    #[error("transport send error: {0}")]
    TransportSend(String),

    /// The transport connection was closed.
    #[error("connection closed ({code}): {reason}")]
    ConnectionClosed {
        /// Close code reported by the transport.
        code: u16,
        /// Close reason, possibly empty.
        reason: String,
    },

    /// Failed to serialize or deserialize a JSON payload.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Failed to decode a binary frame or state payload.
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    /// The operation requires an open room session.
    #[error("not connected to room")]
    NotConnected,

    /// A component was used before its initialization step ran.
    #[error("{0} used before initialization")]
    NotInitialized(&'static str),

    /// The HTTP layer rejected the request.
    #[error(transparent)]
    Http(#[from] HttpError),

    /// The matchmaker rejected the seat reservation.
    #[error(transparent)]
    MatchMake(#[from] MatchMakeError),

    /// The room server sent an error frame.
    #[error("server error {code}: {message}")]
    ServerError {
        /// Error code sent by the room server.
        code: i32,
        /// Message sent by the room server.
        message: String,
    },

    /// A reconnection token did not have the `roomId:token` shape.
    #[error("invalid reconnection token format: expected roomId:token, got {0:?}")]
    InvalidReconnectionToken(String),

    /// The server URL or a derived endpoint could not be parsed.
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    /// The join confirmation named a serializer this client does not know.
    #[error("missing serializer: {0}")]
    UnknownSerializer(String),

    /// The server schema no longer matches the state held by the client.
    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),

    /// Login or refresh failed for every available strategy.
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// The platform social SDK could not produce a login code.
    #[error("social login failed: {0}")]
    SocialLogin(String),

    /// The network request failed before a response arrived.
    #[error("network error: {0}")]
    Network(String),

    /// An operation timed out.
    #[error("operation timed out")]
    Timeout,

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl NetError {
    /// Returns `true` if the error is an HTTP 401.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Http(e) if e.is_unauthorized())
    }
}

/// A specialized [`Result`] type for networking operations.
pub type Result<T> = std::result::Result<T, NetError>;
