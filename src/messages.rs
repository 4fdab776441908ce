//! Application message types exchanged with the lobby room.
//!
//! Both enums serialize to their `SCREAMING_SNAKE_CASE` wire names and
//! convert into [`MessageKind`] for use with [`Room`](crate::room::Room).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::protocol::MessageKind;

/// Introspection message some servers push on join; it carries no data the
/// client needs.
pub const PLAYGROUND_MESSAGE_TYPES: &str = "__playground_message_types";

/// Messages sent by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientMessageType {
    /// The client finished joining and wants its initial state pushed.
    Ready,
    UseHints,
    UseCoins,
    UseEnergies,
    ClaimItemRewards,
    ClaimDailyTaskReward,
    LevelCompleted,
}

impl ClientMessageType {
    pub const ALL: [ClientMessageType; 7] = [
        Self::Ready,
        Self::UseHints,
        Self::UseCoins,
        Self::UseEnergies,
        Self::ClaimItemRewards,
        Self::ClaimDailyTaskReward,
        Self::LevelCompleted,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ready => "READY",
            Self::UseHints => "USE_HINTS",
            Self::UseCoins => "USE_COINS",
            Self::UseEnergies => "USE_ENERGIES",
            Self::ClaimItemRewards => "CLAIM_ITEM_REWARDS",
            Self::ClaimDailyTaskReward => "CLAIM_DAILY_TASK_REWARD",
            Self::LevelCompleted => "LEVEL_COMPLETED",
        }
    }
}

/// Messages pushed by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerMessageType {
    PlayerState,
    MedalState,
    ItemsUpdated,
    DailyTasksUpdated,
    WeeklyMedalAwarded,
}

impl ServerMessageType {
    pub const ALL: [ServerMessageType; 5] = [
        Self::PlayerState,
        Self::MedalState,
        Self::ItemsUpdated,
        Self::DailyTasksUpdated,
        Self::WeeklyMedalAwarded,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::PlayerState => "PLAYER_STATE",
            Self::MedalState => "MEDAL_STATE",
            Self::ItemsUpdated => "ITEMS_UPDATED",
            Self::DailyTasksUpdated => "DAILY_TASKS_UPDATED",
            Self::WeeklyMedalAwarded => "WEEKLY_MEDAL_AWARDED",
        }
    }
}

/// Returned when a wire name matches no known message type.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown message type: {0}")]
pub struct UnknownMessageType(pub String);

macro_rules! wire_name_impls {
    ($ty:ty) => {
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = UnknownMessageType;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::ALL
                    .into_iter()
                    .find(|t| t.as_str() == s)
                    .ok_or_else(|| UnknownMessageType(s.to_owned()))
            }
        }

        impl From<$ty> for MessageKind {
            fn from(t: $ty) -> Self {
                MessageKind::Name(t.as_str().to_owned())
            }
        }
    };
}

wire_name_impls!(ClientMessageType);
wire_name_impls!(ServerMessageType);

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
    fn wire_names_agree_with_serde() {
        for t in ClientMessageType::ALL {
            let json = serde_json::to_string(&t).unwrap();
            assert_eq!(json, format!("\"{}\"", t.as_str()));
            assert_eq!(t.as_str().parse::<ClientMessageType>().unwrap(), t);
        }
        for t in ServerMessageType::ALL {
            let json = serde_json::to_string(&t).unwrap();
            assert_eq!(json, format!("\"{}\"", t.as_str()));
            assert_eq!(t.as_str().parse::<ServerMessageType>().unwrap(), t);
        }
    }

    #[test]
    fn unknown_names_are_rejected() {
        assert_eq!(
            "PLAYER_STAT".parse::<ServerMessageType>(),
            Err(UnknownMessageType("PLAYER_STAT".into()))
        );
    }

    #[test]
    fn converts_into_named_message_kind() {
        assert_eq!(
            MessageKind::from(ClientMessageType::Ready),
            MessageKind::Name("READY".into())
        );
    }
}
