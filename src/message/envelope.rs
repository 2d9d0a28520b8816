use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::MessageType;

/// Sender tag the backend and UI use for human-authored input.
pub const USER_SENDER: &str = "USER";

/// Text shown for envelopes that carry neither `text` nor `error`.
const FALLBACK_DISPLAY_TEXT: &str = "Message";

pub type DataMap = Map<String, Value>;

#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    #[error("invalid message JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid {kind} payload: {reason}")]
    InvalidPayload { kind: MessageType, reason: String },
}

/// Chat input typed by the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserMessage {
    #[serde(default)]
    pub text: String,
    #[serde(default = "default_sender")]
    pub sender: String,
    /// Keys this crate does not interpret, kept for re-encoding.
    #[serde(flatten)]
    pub extra: DataMap,
}

impl UserMessage {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            sender: default_sender(),
            extra: DataMap::new(),
        }
    }
}

fn default_sender() -> String {
    USER_SENDER.to_string()
}

/// Streaming or final agent narration.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AgentText {
    #[serde(default)]
    pub text: String,
    #[serde(flatten)]
    pub extra: DataMap,
}

/// Progress on a generated artifact. `url` is set once a preview is available.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FileUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(flatten)]
    pub extra: DataMap,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AgentError {
    #[serde(default)]
    pub error: String,
    #[serde(flatten)]
    pub extra: DataMap,
}

/// Typed payload of an envelope, one variant per known [`MessageType`].
///
/// Inbound frames whose `type` is not recognised, or whose `data` does not fit
/// the payload of its type, decode into [`MessageBody::Unknown`] with their
/// raw data intact.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageBody {
    Init(DataMap),
    User(UserMessage),
    AgentPartial(AgentText),
    AgentFinal(AgentText),
    LoadCode(DataMap),
    EditCode(DataMap),
    UpdateInProgress(DataMap),
    UpdateFile(FileUpdate),
    UpdateCompleted(DataMap),
    Error(AgentError),
    Unknown { kind: String, data: Value },
}

impl MessageBody {
    pub fn user(text: impl Into<String>) -> Self {
        Self::User(UserMessage::new(text))
    }

    /// Build a body from a discriminant and an untyped `data` mapping.
    ///
    /// Strict: `data` that does not fit the payload of `kind` is an error.
    pub fn from_type(kind: MessageType, data: Value) -> Result<Self, MessageError> {
        let body = match kind {
            MessageType::Init => Self::Init(decode_payload(kind, data)?),
            MessageType::User => Self::User(decode_payload(kind, data)?),
            MessageType::AgentPartial => Self::AgentPartial(decode_payload(kind, data)?),
            MessageType::AgentFinal => Self::AgentFinal(decode_payload(kind, data)?),
            MessageType::LoadCode => Self::LoadCode(decode_payload(kind, data)?),
            MessageType::EditCode => Self::EditCode(decode_payload(kind, data)?),
            MessageType::UpdateInProgress => Self::UpdateInProgress(decode_payload(kind, data)?),
            MessageType::UpdateFile => Self::UpdateFile(decode_payload(kind, data)?),
            MessageType::UpdateCompleted => Self::UpdateCompleted(decode_payload(kind, data)?),
            MessageType::Error => Self::Error(decode_payload(kind, data)?),
        };
        Ok(body)
    }

    /// Lenient decode for inbound frames: never rejects a well-formed envelope.
    fn from_wire(kind: &str, data: Value) -> Self {
        let Ok(known) = kind.parse::<MessageType>() else {
            return Self::Unknown {
                kind: kind.to_string(),
                data,
            };
        };
        match Self::from_type(known, data.clone()) {
            Ok(body) => body,
            Err(e) => {
                tracing::debug!("keeping {known} frame opaque: {e}");
                Self::Unknown {
                    kind: known.as_str().to_string(),
                    data,
                }
            }
        }
    }

    /// `None` only when the discriminant itself is not recognised.
    pub fn message_type(&self) -> Option<MessageType> {
        let kind = match self {
            Self::Init(_) => MessageType::Init,
            Self::User(_) => MessageType::User,
            Self::AgentPartial(_) => MessageType::AgentPartial,
            Self::AgentFinal(_) => MessageType::AgentFinal,
            Self::LoadCode(_) => MessageType::LoadCode,
            Self::EditCode(_) => MessageType::EditCode,
            Self::UpdateInProgress(_) => MessageType::UpdateInProgress,
            Self::UpdateFile(_) => MessageType::UpdateFile,
            Self::UpdateCompleted(_) => MessageType::UpdateCompleted,
            Self::Error(_) => MessageType::Error,
            Self::Unknown { kind, .. } => return kind.parse().ok(),
        };
        Some(kind)
    }

    /// Wire spelling of the discriminant.
    pub fn kind(&self) -> &str {
        match self {
            Self::Unknown { kind, .. } => kind.as_str(),
            known => known.message_type().map_or("", |kind| kind.as_str()),
        }
    }

    fn to_data(&self) -> Result<Value, MessageError> {
        let data = match self {
            Self::Init(map)
            | Self::LoadCode(map)
            | Self::EditCode(map)
            | Self::UpdateInProgress(map)
            | Self::UpdateCompleted(map) => Value::Object(map.clone()),
            Self::User(user) => serde_json::to_value(user)?,
            Self::AgentPartial(text) | Self::AgentFinal(text) => serde_json::to_value(text)?,
            Self::UpdateFile(update) => serde_json::to_value(update)?,
            Self::Error(error) => serde_json::to_value(error)?,
            Self::Unknown { data, .. } => data.clone(),
        };
        Ok(data)
    }
}

fn decode_payload<T: DeserializeOwned>(kind: MessageType, data: Value) -> Result<T, MessageError> {
    let data = if data.is_null() {
        Value::Object(Map::new())
    } else {
        data
    };
    serde_json::from_value(data).map_err(|e| MessageError::InvalidPayload {
        kind,
        reason: e.to_string(),
    })
}

/// Wire form: `{"id", "type", "data", "timestamp"}`. Inbound frames may omit
/// everything but `type`.
#[derive(Debug, Serialize, Deserialize)]
struct WireMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    timestamp: Option<i64>,
}

/// One immutable unit of exchange between client and agent.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub id: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    pub body: MessageBody,
}

impl Message {
    pub fn new(body: MessageBody) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now().timestamp_millis(),
            body,
        }
    }

    /// Decode one inbound frame. Missing `id`/`timestamp` are stamped locally.
    ///
    /// Only frames that are not a JSON object with a string `type` fail.
    pub fn from_json(raw: &str) -> Result<Self, MessageError> {
        let wire: WireMessage = serde_json::from_str(raw)?;
        let body = MessageBody::from_wire(&wire.kind, wire.data);
        Ok(Self {
            id: wire.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            timestamp: wire
                .timestamp
                .unwrap_or_else(|| Utc::now().timestamp_millis()),
            body,
        })
    }

    pub fn to_json(&self) -> Result<String, MessageError> {
        let wire = WireMessage {
            id: Some(self.id.clone()),
            kind: self.body.kind().to_string(),
            data: self.body.to_data()?,
            timestamp: Some(self.timestamp),
        };
        Ok(serde_json::to_string(&wire)?)
    }

    pub fn message_type(&self) -> Option<MessageType> {
        self.body.message_type()
    }

    pub fn kind(&self) -> &str {
        self.body.kind()
    }

    /// Line of text a chat view shows for this envelope.
    pub fn display_text(&self) -> &str {
        let text = match &self.body {
            MessageBody::User(user) => Some(user.text.as_str()),
            MessageBody::AgentPartial(agent) | MessageBody::AgentFinal(agent) => {
                Some(agent.text.as_str())
            }
            MessageBody::UpdateFile(update) => update.text.as_deref(),
            MessageBody::Error(error) => Some(error.error.as_str()),
            MessageBody::Init(data)
            | MessageBody::LoadCode(data)
            | MessageBody::EditCode(data)
            | MessageBody::UpdateInProgress(data)
            | MessageBody::UpdateCompleted(data) => text_or_error(data),
            MessageBody::Unknown { data, .. } => data.as_object().and_then(text_or_error),
        };
        match text {
            Some(text) if !text.is_empty() => text,
            _ => FALLBACK_DISPLAY_TEXT,
        }
    }

    pub fn is_from_user(&self) -> bool {
        match &self.body {
            MessageBody::User(user) => user.sender == USER_SENDER,
            MessageBody::Unknown { data, .. } => {
                data.get("sender").and_then(Value::as_str) == Some(USER_SENDER)
            }
            _ => false,
        }
    }

    /// Preview URL carried by an `update_file` envelope, if any.
    pub fn preview_url(&self) -> Option<&str> {
        match &self.body {
            MessageBody::UpdateFile(update) => update.url.as_deref().filter(|url| !url.is_empty()),
            _ => None,
        }
    }

    /// Error reported by the agent in an `error` envelope, whatever the shape
    /// of its `error` field.
    pub fn agent_error(&self) -> Option<String> {
        match &self.body {
            MessageBody::Error(err) => Some(err.error.clone()),
            MessageBody::Unknown { data, .. } if self.message_type() == Some(MessageType::Error) => {
                match data.get("error").unwrap_or(data) {
                    Value::String(error) => Some(error.clone()),
                    other => Some(other.to_string()),
                }
            }
            _ => None,
        }
    }
}

fn text_or_error(data: &DataMap) -> Option<&str> {
    data.get("text")
        .or_else(|| data.get("error"))
        .and_then(Value::as_str)
}

/// Stamp a fresh envelope. Pure: no I/O, no side effects.
pub fn create_message(body: MessageBody) -> Message {
    Message::new(body)
}
