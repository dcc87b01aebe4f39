use crate::types::{FinishReason, StreamEvent};
use serde::Deserialize;
use serde_json::Value;

/// Event tag of the end-of-generation frame.
pub const TERMINAL_EVENT: &str = "stream-end";

#[derive(Debug, Deserialize)]
struct TerminalPayload {
    finish_reason: String,
    #[serde(default)]
    text: String,
    #[serde(default)]
    conversation_id: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Decode one inbound frame into exactly one `StreamEvent`.
///
/// The frame may carry an explicit SSE `event:` tag, or the tag may be
/// embedded in an envelope payload of the form `{"event": ..., "data": ...}`.
/// Decoding is pure: structural failures yield `StreamEvent::Malformed`
/// rather than an error.
pub fn decode_frame(event_type: Option<&str>, payload: &str) -> StreamEvent {
    let value: Value = match serde_json::from_str(payload) {
        Ok(value) => value,
        Err(_) => {
            return StreamEvent::Malformed {
                raw: payload.to_string(),
            }
        }
    };

    let (tag, body) = match event_type {
        Some(tag) => (tag.to_string(), value),
        None => {
            let Some(tag) = value.get("event").and_then(Value::as_str) else {
                return StreamEvent::Malformed {
                    raw: payload.to_string(),
                };
            };
            let tag = tag.to_string();
            let body = value.get("data").cloned().unwrap_or(Value::Null);
            (tag, body)
        }
    };

    if tag == TERMINAL_EVENT {
        return decode_terminal(body, payload);
    }

    if !body.is_object() && !body.is_null() {
        return StreamEvent::Malformed {
            raw: payload.to_string(),
        };
    }

    StreamEvent::Data {
        event: tag,
        payload: body,
    }
}

fn decode_terminal(body: Value, raw: &str) -> StreamEvent {
    match serde_json::from_value::<TerminalPayload>(body) {
        Ok(terminal) => StreamEvent::Terminal {
            finish_reason: FinishReason::parse(&terminal.finish_reason),
            text: terminal.text,
            conversation_id: terminal.conversation_id,
            error: terminal.error,
        },
        Err(_) => StreamEvent::Malformed {
            raw: raw.to_string(),
        },
    }
}
