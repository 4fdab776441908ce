//! Numeric codes used by the matchmaker and the room server.
//!
//! Matchmaking failures and room error frames carry an [`ErrorCode`]; room
//! connections end with a [`CloseCode`]. Codes this client does not know are
//! kept as raw integers by the callers and map to `None` here.

use std::fmt;

/// Error codes returned by the matchmaker and in room `ERROR` frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// No room handler is defined for the requested room name.
    MatchmakeNoHandler,
    /// No room matched the join criteria.
    MatchmakeInvalidCriteria,
    /// The room id does not exist or is locked.
    MatchmakeInvalidRoomId,
    /// The matchmaker failed for an unspecified reason.
    MatchmakeUnhandled,
    /// The seat reservation expired before it was consumed.
    MatchmakeExpired,
    /// The room's `onAuth` hook rejected the client.
    AuthFailed,
    /// The room raised an application error.
    ApplicationError,
}

impl ErrorCode {
    /// All known codes.
    pub const ALL: [ErrorCode; 7] = [
        Self::MatchmakeNoHandler,
        Self::MatchmakeInvalidCriteria,
        Self::MatchmakeInvalidRoomId,
        Self::MatchmakeUnhandled,
        Self::MatchmakeExpired,
        Self::AuthFailed,
        Self::ApplicationError,
    ];

    /// The numeric wire value.
    pub fn code(self) -> i32 {
        match self {
            Self::MatchmakeNoHandler => 4210,
            Self::MatchmakeInvalidCriteria => 4211,
            Self::MatchmakeInvalidRoomId => 4212,
            Self::MatchmakeUnhandled => 4213,
            Self::MatchmakeExpired => 4214,
            Self::AuthFailed => 4215,
            Self::ApplicationError => 4216,
        }
    }

    /// Look up a code by its numeric wire value.
    pub fn from_code(code: i32) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.code() == code)
    }

    /// Returns a human-readable description of this error code.
    pub fn description(self) -> &'static str {
        match self {
            Self::MatchmakeNoHandler => {
                "No room handler is registered on the server for the requested room name."
            }
            Self::MatchmakeInvalidCriteria => {
                "No available room matches the requested criteria."
            }
            Self::MatchmakeInvalidRoomId => {
                "The requested room id does not exist, is locked, or is full."
            }
            Self::MatchmakeUnhandled => {
                "The matchmaker failed unexpectedly. Check the server logs."
            }
            Self::MatchmakeExpired => {
                "The seat reservation expired before the client connected. Request a new seat."
            }
            Self::AuthFailed => "The room rejected the client's credentials.",
            Self::ApplicationError => "The room raised an application-level error.",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Close codes observed on room connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CloseCode {
    /// Normal closure.
    Normal,
    /// The peer is going away (page unload, server shutdown).
    GoingAway,
    /// The connection dropped without a close frame.
    Abnormal,
    /// The client left the room on purpose.
    Consented,
    /// The server is shutting down.
    ServerShutdown,
    /// The room closed because of an error.
    WithError,
    /// The development server restarted and expects the client to rejoin.
    DevModeRestart,
}

impl CloseCode {
    /// All known codes.
    pub const ALL: [CloseCode; 7] = [
        Self::Normal,
        Self::GoingAway,
        Self::Abnormal,
        Self::Consented,
        Self::ServerShutdown,
        Self::WithError,
        Self::DevModeRestart,
    ];

    /// The numeric wire value.
    pub fn code(self) -> u16 {
        match self {
            Self::Normal => 1000,
            Self::GoingAway => 1001,
            Self::Abnormal => 1006,
            Self::Consented => 4000,
            Self::ServerShutdown => 4001,
            Self::WithError => 4002,
            Self::DevModeRestart => 4010,
        }
    }

    /// Look up a code by its numeric wire value.
    pub fn from_code(code: u16) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.code() == code)
    }

    /// Returns a human-readable description of this close code.
    pub fn description(self) -> &'static str {
        match self {
            Self::Normal => "The connection closed normally.",
            Self::GoingAway => "The remote endpoint is going away.",
            Self::Abnormal => "The connection dropped without a close handshake.",
            Self::Consented => "The client left the room.",
            Self::ServerShutdown => "The server is shutting down.",
            Self::WithError => "The room closed because of an error.",
            Self::DevModeRestart => "The development server restarted; the client may rejoin.",
        }
    }
}

impl fmt::Display for CloseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
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
    fn error_codes_round_trip_through_numbers() {
        for code in ErrorCode::ALL {
            assert_eq!(ErrorCode::from_code(code.code()), Some(code));
            assert!(!code.description().is_empty());
        }
        assert_eq!(ErrorCode::from_code(1), None);
    }

    #[test]
    fn close_codes_round_trip_through_numbers() {
        for code in CloseCode::ALL {
            assert_eq!(CloseCode::from_code(code.code()), Some(code));
        }
        assert_eq!(CloseCode::DevModeRestart.code(), 4010);
        assert_eq!(CloseCode::from_code(4999), None);
    }

    #[test]
    fn display_prints_numeric_value() {
        assert_eq!(ErrorCode::MatchmakeExpired.to_string(), "4214");
        assert_eq!(CloseCode::Consented.to_string(), "4000");
    }
}
