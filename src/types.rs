use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Request body for one streamed generation, mirroring the backend's
/// chat-stream surface. Optional fields are omitted from the payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatStreamRequest {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl ChatStreamRequest {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            conversation_id: None,
            agent_id: None,
            model: None,
        }
    }
}

/// One decoded inbound frame. Produced by the event decoder; immutable.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// A recognized non-terminal frame carrying a generation event payload.
    Data { event: String, payload: Value },
    /// The end-of-generation frame.
    Terminal {
        finish_reason: FinishReason,
        text: String,
        conversation_id: Option<String>,
        error: Option<String>,
    },
    /// A frame whose payload failed structural decoding.
    Malformed { raw: String },
}

/// Finish reasons attached to the terminal frame. Only `Complete` counts
/// as a successful generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    Complete,
    Error,
    ErrorToxic,
    ErrorLimit,
    UserCancel,
    MaxTokens,
    Unknown,
}

impl FinishReason {
    /// Case-insensitive parse of the wire value ("COMPLETE", "complete", ...).
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_uppercase().as_str() {
            "COMPLETE" => Self::Complete,
            "ERROR" => Self::Error,
            "ERROR_TOXIC" => Self::ErrorToxic,
            "ERROR_LIMIT" => Self::ErrorLimit,
            "USER_CANCEL" => Self::UserCancel,
            "MAX_TOKENS" => Self::MaxTokens,
            _ => Self::Unknown,
        }
    }

    pub fn is_complete(self) -> bool {
        matches!(self, Self::Complete)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Complete => "COMPLETE",
            Self::Error => "ERROR",
            Self::ErrorToxic => "ERROR_TOXIC",
            Self::ErrorLimit => "ERROR_LIMIT",
            Self::UserCancel => "USER_CANCEL",
            Self::MaxTokens => "MAX_TOKENS",
            Self::Unknown => "UNKNOWN",
        }
    }
}
