// Wire frames exchanged with the chat server.
// Text frames carry JSON; anything that is not a chat line or a ping is Unknown.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::models::ChatPayload;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("Malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Ping,
    ChatMessage(ChatPayload),
    Unknown,
}

#[derive(Serialize, Deserialize)]
struct ChatEnvelope {
    message: ChatBody,
}

#[derive(Serialize, Deserialize)]
struct ChatBody {
    from: String,
    message: String,
}

#[derive(Serialize, Deserialize)]
struct TypedFrame {
    #[serde(rename = "type")]
    kind: String,
}

impl Frame {
    /// Parse a text frame. Only invalid JSON is an error; well-formed JSON of
    /// an unexpected shape becomes `Frame::Unknown`.
    pub fn parse(text: &str) -> Result<Frame, FrameError> {
        let value: Value = serde_json::from_str(text)?;

        if let Ok(envelope) = ChatEnvelope::deserialize(&value) {
            let ChatBody { from, message } = envelope.message;
            if !from.is_empty() && !message.is_empty() {
                return Ok(Frame::ChatMessage(ChatPayload { from, text: message }));
            }
            return Ok(Frame::Unknown);
        }

        match TypedFrame::deserialize(&value) {
            Ok(typed) if typed.kind == "ping" => Ok(Frame::Ping),
            _ => Ok(Frame::Unknown),
        }
    }

    /// Serialize for sending. `Unknown` has no wire form.
    pub fn to_json(&self) -> Option<String> {
        let value = match self {
            Frame::Ping => serde_json::to_value(TypedFrame { kind: "ping".to_string() }),
            Frame::ChatMessage(payload) => serde_json::to_value(ChatEnvelope {
                message: ChatBody {
                    from: payload.from.clone(),
                    message: payload.text.clone(),
                },
            }),
            Frame::Unknown => return None,
        };
        value.ok().map(|v| v.to_string())
    }
}
