use serde::{Deserialize, Serialize};

/// Sender identity used for messages authored on this device.
pub const LOCAL_SENDER: &str = "You";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub from: String,
    pub text: String,
    pub timestamp: u64, // Milliseconds since the Unix epoch
    pub is_read: bool,
}

impl Message {
    pub fn new(from: &str, text: &str, timestamp: u64, is_read: bool) -> Self {
        Message {
            id: uuid::Uuid::new_v4().to_string(),
            from: from.to_string(),
            text: text.to_string(),
            timestamp,
            is_read,
        }
    }

    /// Read state only ever moves forward.
    pub fn mark_read(&mut self) {
        self.is_read = true;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub id: String,
    pub name: String,
    pub last_message: Option<Message>,
    pub unread_count: u32,
    pub last_message_time: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dialog {
    pub contact_id: String,
    pub messages: Vec<Message>,
}

/// A chat line accepted from the server, after validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatPayload {
    pub from: String,
    pub text: String,
}

impl ChatPayload {
    pub fn new(from: impl Into<String>, text: impl Into<String>) -> Self {
        ChatPayload {
            from: from.into(),
            text: text.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum ConnectionPhase {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Failed,
}

/// Snapshot of the connection as seen by observers.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct ConnectionState {
    pub phase: ConnectionPhase,
    pub is_connected: bool,
    pub is_reconnecting: bool,
    pub reconnect_attempts: u32,
}
