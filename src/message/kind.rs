use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Discriminant of an envelope on the wire.
///
/// The backend speaks lowercase snake_case (`update_file`); parsing is
/// case-insensitive so `UPDATE_FILE` is accepted as well.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Init,
    User,
    AgentPartial,
    AgentFinal,
    LoadCode,
    EditCode,
    UpdateInProgress,
    UpdateFile,
    UpdateCompleted,
    Error,
}

impl MessageType {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::User => "user",
            Self::AgentPartial => "agent_partial",
            Self::AgentFinal => "agent_final",
            Self::LoadCode => "load_code",
            Self::EditCode => "edit_code",
            Self::UpdateInProgress => "update_in_progress",
            Self::UpdateFile => "update_file",
            Self::UpdateCompleted => "update_completed",
            Self::Error => "error",
        }
    }

    pub const fn all() -> &'static [MessageType] {
        &[
            MessageType::Init,
            MessageType::User,
            MessageType::AgentPartial,
            MessageType::AgentFinal,
            MessageType::LoadCode,
            MessageType::EditCode,
            MessageType::UpdateInProgress,
            MessageType::UpdateFile,
            MessageType::UpdateCompleted,
            MessageType::Error,
        ]
    }

    /// Types produced by the agent while it is working on a request.
    pub const fn is_agent_lifecycle(&self) -> bool {
        matches!(
            self,
            Self::AgentPartial
                | Self::AgentFinal
                | Self::UpdateInProgress
                | Self::UpdateFile
                | Self::UpdateCompleted
        )
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for MessageType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase().replace('-', "_");
        MessageType::all()
            .iter()
            .copied()
            .find(|kind| kind.as_str() == normalized)
            .ok_or_else(|| format!("unknown message type: {value}"))
    }
}
