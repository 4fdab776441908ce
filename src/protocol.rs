//! Wire protocol for room connections and matchmaking.
//!
//! Room traffic is a sequence of binary frames. Every frame starts with a
//! one-byte kind followed by a kind-specific body:
//!
//! | Kind | Code | Body |
//! |------|------|------|
//! | `HANDSHAKE` | 9 | reflection bytes (rest of frame) |
//! | `JOIN_ROOM` | 10 | token, serializer id, handshake bytes; empty body = client ack |
//! | `ERROR` | 11 | zigzag code, message |
//! | `LEAVE_ROOM` | 12 | uleb close code, optional reason; empty body = consented leave |
//! | `ROOM_DATA` | 13 | message kind, optional JSON payload (rest of frame) |
//! | `ROOM_STATE` | 14 | full state bytes |
//! | `ROOM_STATE_PATCH` | 15 | incremental state bytes |
//! | `ROOM_DATA_BYTES` | 17 | message kind, raw payload bytes |
//!
//! Strings are length-prefixed UTF-8 (see [`crate::bytes`]).
//!
//! Matchmaking is plain JSON over HTTP; [`SeatReservation`] and
//! [`RequestError`] mirror the matchmaker's response bodies.

use std::fmt;
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::bytes::{BytesReader, BytesWriter};
use crate::error::{DecodeError, NetError};
use crate::error_codes::CloseCode;

// ── Frame kinds ─────────────────────────────────────────────────────

pub const HANDSHAKE: u8 = 9;
pub const JOIN_ROOM: u8 = 10;
pub const ERROR: u8 = 11;
pub const LEAVE_ROOM: u8 = 12;
pub const ROOM_DATA: u8 = 13;
pub const ROOM_STATE: u8 = 14;
pub const ROOM_STATE_PATCH: u8 = 15;
pub const ROOM_DATA_BYTES: u8 = 17;

const KIND_TAG_NAME: u8 = 0;
const KIND_TAG_CODE: u8 = 1;

// ── Message kinds and payloads ──────────────────────────────────────

/// Type tag of an application message.
///
/// Rooms may address messages by name or by a compact numeric code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MessageKind {
    Name(String),
    Code(u32),
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Name(name) => f.write_str(name),
            Self::Code(code) => write!(f, "#{code}"),
        }
    }
}

impl From<&str> for MessageKind {
    fn from(name: &str) -> Self {
        Self::Name(name.to_owned())
    }
}

impl From<String> for MessageKind {
    fn from(name: String) -> Self {
        Self::Name(name)
    }
}

impl From<u32> for MessageKind {
    fn from(code: u32) -> Self {
        Self::Code(code)
    }
}

fn encode_kind(w: &mut BytesWriter, kind: &MessageKind) {
    match kind {
        MessageKind::Name(name) => {
            w.push_byte(KIND_TAG_NAME);
            w.push_var_string(name);
        }
        MessageKind::Code(code) => {
            w.push_byte(KIND_TAG_CODE);
            w.push_uleb(u64::from(*code));
        }
    }
}

fn decode_kind(r: &mut BytesReader<'_>) -> Result<MessageKind, DecodeError> {
    match r.read_byte()? {
        KIND_TAG_NAME => Ok(MessageKind::Name(r.read_var_string()?)),
        KIND_TAG_CODE => {
            let code = u32::try_from(r.read_uleb()?)
                .map_err(|_| DecodeError::Malformed("message code out of range".into()))?;
            Ok(MessageKind::Code(code))
        }
        other => Err(DecodeError::Malformed(format!(
            "invalid message kind tag {other}"
        ))),
    }
}

/// Body of an application message as delivered to handlers.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Empty,
    Json(serde_json::Value),
    Bytes(Vec<u8>),
}

impl Payload {
    /// The JSON body, if this is a JSON message.
    pub fn json(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Json(value) => Some(value),
            _ => None,
        }
    }

    /// Deserialize the body into `T`. An empty body decodes as JSON `null`.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::Serialization`] if the body does not match `T`.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, NetError> {
        match self {
            Self::Empty => Ok(serde_json::from_value(serde_json::Value::Null)?),
            Self::Json(value) => Ok(T::deserialize(value)?),
            Self::Bytes(bytes) => Ok(serde_json::from_slice(bytes)?),
        }
    }
}

// ── Frames ──────────────────────────────────────────────────────────

/// One decoded room frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Structural schema definition for the state serializer.
    Handshake { bytes: Vec<u8> },
    /// Seat confirmed by the room server.
    JoinRoom {
        reconnection_token: String,
        serializer_id: String,
        handshake: Vec<u8>,
    },
    /// Client acknowledgement of [`Frame::JoinRoom`].
    JoinAck,
    Error { code: i32, message: String },
    Leave { code: u16, reason: Option<String> },
    StateSnapshot(Vec<u8>),
    StatePatch(Vec<u8>),
    Message {
        kind: MessageKind,
        payload: Option<serde_json::Value>,
    },
    MessageBytes { kind: MessageKind, bytes: Vec<u8> },
}

impl Frame {
    /// The frame kind byte.
    pub fn kind(&self) -> u8 {
        match self {
            Self::Handshake { .. } => HANDSHAKE,
            Self::JoinRoom { .. } | Self::JoinAck => JOIN_ROOM,
            Self::Error { .. } => ERROR,
            Self::Leave { .. } => LEAVE_ROOM,
            Self::Message { .. } => ROOM_DATA,
            Self::StateSnapshot(_) => ROOM_STATE,
            Self::StatePatch(_) => ROOM_STATE_PATCH,
            Self::MessageBytes { .. } => ROOM_DATA_BYTES,
        }
    }

    /// Encode the frame into a transport payload.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::Serialization`] if a JSON payload cannot be
    /// serialized.
    pub fn encode(&self) -> Result<Vec<u8>, NetError> {
        let mut w = BytesWriter::new();
        w.push_byte(self.kind());
        match self {
            Self::Handshake { bytes } => w.push_bytes(bytes),
            Self::JoinRoom {
                reconnection_token,
                serializer_id,
                handshake,
            } => {
                w.push_var_string(reconnection_token);
                w.push_var_string(serializer_id);
                w.push_bytes(handshake);
            }
            Self::JoinAck => {}
            Self::Error { code, message } => {
                w.push_zigzag(i64::from(*code));
                w.push_var_string(message);
            }
            Self::Leave { code, reason } => {
                w.push_uleb(u64::from(*code));
                match reason {
                    Some(reason) => {
                        w.push_byte(1);
                        w.push_var_string(reason);
                    }
                    None => w.push_byte(0),
                }
            }
            Self::Message { kind, payload } => {
                encode_kind(&mut w, kind);
                if let Some(payload) = payload {
                    w.push_bytes(&serde_json::to_vec(payload)?);
                }
            }
            Self::StateSnapshot(bytes) | Self::StatePatch(bytes) => w.push_bytes(bytes),
            Self::MessageBytes { kind, bytes } => {
                encode_kind(&mut w, kind);
                w.push_bytes(bytes);
            }
        }
        Ok(w.finalize())
    }

    /// Decode one transport payload.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::UnknownFrame`] for kinds outside the protocol
    /// (callers log and skip those) and other [`DecodeError`]s for
    /// truncated or malformed bodies.
    pub fn decode(data: &[u8]) -> Result<Self, DecodeError> {
        let mut r = BytesReader::new(data);
        let kind = r.read_byte()?;
        let frame = match kind {
            HANDSHAKE => Self::Handshake {
                bytes: r.read_rest().to_vec(),
            },
            JOIN_ROOM if r.is_empty() => Self::JoinAck,
            JOIN_ROOM => Self::JoinRoom {
                reconnection_token: r.read_var_string()?,
                serializer_id: r.read_var_string()?,
                handshake: r.read_rest().to_vec(),
            },
            ERROR => {
                let code = i32::try_from(r.read_zigzag()?)
                    .map_err(|_| DecodeError::Malformed("error code out of range".into()))?;
                Self::Error {
                    code,
                    message: r.read_var_string()?,
                }
            }
            LEAVE_ROOM if r.is_empty() => Self::Leave {
                code: CloseCode::Consented.code(),
                reason: None,
            },
            LEAVE_ROOM => {
                let code = u16::try_from(r.read_uleb()?)
                    .map_err(|_| DecodeError::Malformed("close code out of range".into()))?;
                let reason = match r.read_byte()? {
                    0 => None,
                    _ => Some(r.read_var_string()?),
                };
                Self::Leave { code, reason }
            }
            ROOM_DATA => {
                let kind = decode_kind(&mut r)?;
                let rest = r.read_rest();
                let payload = if rest.is_empty() {
                    None
                } else {
                    Some(
                        serde_json::from_slice(rest)
                            .map_err(|e| DecodeError::Malformed(e.to_string()))?,
                    )
                };
                Self::Message { kind, payload }
            }
            ROOM_STATE => Self::StateSnapshot(r.read_rest().to_vec()),
            ROOM_STATE_PATCH => Self::StatePatch(r.read_rest().to_vec()),
            ROOM_DATA_BYTES => Self::MessageBytes {
                kind: decode_kind(&mut r)?,
                bytes: r.read_rest().to_vec(),
            },
            other => return Err(DecodeError::UnknownFrame(other)),
        };
        Ok(frame)
    }
}

// ── Reconnection tokens ─────────────────────────────────────────────

/// Credential for resuming a previous room session, written `roomId:token`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReconnectionToken {
    pub room_id: String,
    pub token: String,
}

impl ReconnectionToken {
    pub fn new(room_id: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            room_id: room_id.into(),
            token: token.into(),
        }
    }
}

impl fmt::Display for ReconnectionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.room_id, self.token)
    }
}

impl FromStr for ReconnectionToken {
    type Err = NetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some((room_id, token)) if !room_id.is_empty() && !token.is_empty() => {
                Ok(Self::new(room_id, token))
            }
            _ => Err(NetError::InvalidReconnectionToken(s.to_owned())),
        }
    }
}

// ── Matchmaking ─────────────────────────────────────────────────────

/// Matchmaking methods exposed at `matchmake/{method}/{roomOrId}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchMethod {
    JoinOrCreate,
    Create,
    Join,
    JoinById,
    Reconnect,
}

impl MatchMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::JoinOrCreate => "joinOrCreate",
            Self::Create => "create",
            Self::Join => "join",
            Self::JoinById => "joinById",
            Self::Reconnect => "reconnect",
        }
    }
}

impl fmt::Display for MatchMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Room instance a seat was reserved in.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RoomInfo {
    pub name: String,
    pub room_id: String,
    pub process_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_address: Option<String>,
}

fn default_protocol() -> String {
    "ws".to_owned()
}

/// Successful matchmaking response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SeatReservation {
    pub room: RoomInfo,
    pub session_id: String,
    #[serde(default = "default_protocol")]
    pub protocol: String,
    #[serde(default)]
    pub dev_mode: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reconnection_token: Option<String>,
}

/// Structured matchmaking failure body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RequestError {
    pub code: i32,
    pub error: String,
}

impl RequestError {
    /// Extract a matchmaking failure from a response body, if it has the
    /// `{code, error}` shape.
    pub fn from_body(body: &serde_json::Value) -> Option<Self> {
        let obj = body.as_object()?;
        if !obj.contains_key("code") || !obj.contains_key("error") {
            return None;
        }
        let code = obj.get("code")?.as_i64().and_then(|c| i32::try_from(c).ok())?;
        let error = match obj.get("error")? {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        Some(Self { code, error })
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

    #[test]
    fn bare_join_room_is_an_ack() {
        assert_eq!(Frame::JoinAck.encode().unwrap(), vec![JOIN_ROOM]);
        assert_eq!(Frame::decode(&[JOIN_ROOM]).unwrap(), Frame::JoinAck);
    }

    #[test]
    fn bare_leave_is_consented() {
        assert_eq!(
            Frame::decode(&[LEAVE_ROOM]).unwrap(),
            Frame::Leave {
                code: 4000,
                reason: None
            }
        );
    }

    #[test]
    fn unknown_kind_is_reported_not_panicked() {
        assert_eq!(Frame::decode(&[99, 1, 2]), Err(DecodeError::UnknownFrame(99)));
        assert_eq!(Frame::decode(&[]), Err(DecodeError::UnexpectedEof));
    }

    #[test]
    fn message_without_payload_has_no_trailing_bytes() {
        let frame = Frame::Message {
            kind: "READY".into(),
            payload: None,
        };
        let bytes = frame.encode().unwrap();
        assert_eq!(bytes, vec![ROOM_DATA, 0, 5, b'R', b'E', b'A', b'D', b'Y']);
        assert_eq!(Frame::decode(&bytes).unwrap(), frame);
    }

    #[test]
    fn reconnection_token_requires_both_halves() {
        assert!("r1:".parse::<ReconnectionToken>().is_err());
        assert!(":abc".parse::<ReconnectionToken>().is_err());
        assert!("noColonHere".parse::<ReconnectionToken>().is_err());
        let token: ReconnectionToken = "r1:abc".parse().unwrap();
        assert_eq!(token, ReconnectionToken::new("r1", "abc"));
        assert_eq!(token.to_string(), "r1:abc");
    }

    #[test]
    fn request_error_needs_both_fields() {
        let body = serde_json::json!({ "code": 4212, "error": "room not found" });
        assert_eq!(
            RequestError::from_body(&body),
            Some(RequestError {
                code: 4212,
                error: "room not found".into()
            })
        );
        assert_eq!(RequestError::from_body(&serde_json::json!({ "code": 1 })), None);
        assert_eq!(RequestError::from_body(&serde_json::json!([1, 2])), None);
    }

    #[test]
    fn payload_decode_handles_every_shape() {
        #[derive(Deserialize, PartialEq, Debug)]
        struct Coins {
            coins: u32,
        }
        let json = Payload::Json(serde_json::json!({ "coins": 3 }));
        assert_eq!(json.decode::<Coins>().unwrap(), Coins { coins: 3 });
        let bytes = Payload::Bytes(br#"{"coins":4}"#.to_vec());
        assert_eq!(bytes.decode::<Coins>().unwrap(), Coins { coins: 4 });
        assert_eq!(Payload::Empty.decode::<Option<Coins>>().unwrap(), None);
    }
}
