use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{
    DeleteScope, GroupId, Message, MessageId, MessageKind, MessageTarget, UserId,
};

/// All frames a client may send over its channel.
///
/// A closed enum over frame kinds: an unknown `type` tag fails to parse
/// instead of being silently ignored, and a new kind added here forces
/// every dispatch site to handle it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ClientFrame {
    /// Must be the first frame on a fresh channel.
    Auth { token: String },

    /// Send a chat message to a user or a group.
    Message {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        to_id: Option<UserId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        group_id: Option<GroupId>,
        kind: MessageKind,
        #[serde(default)]
        content: String,
        /// Client-chosen token echoed back in the `delivered` ack so the
        /// client can reconcile its optimistic local copy.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        correlation_id: Option<String>,
    },

    /// Ephemeral typing indicator. Never persisted, never acknowledged.
    Typing { to_id: UserId },

    /// Batch read receipt for messages in the conversation with `to_id`.
    Read { ids: Vec<MessageId>, to_id: UserId },

    /// Delete a message, either from the caller's own view or for everyone.
    DeleteMessage {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        to_id: Option<UserId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        group_id: Option<GroupId>,
        message_id: MessageId,
        scope: DeleteScope,
    },

    // Call signaling: opaque payloads relayed verbatim to the target.
    CallOffer {
        to_id: UserId,
        payload: serde_json::Value,
    },
    CallAnswer {
        to_id: UserId,
        payload: serde_json::Value,
    },
    IceCandidate {
        to_id: UserId,
        payload: serde_json::Value,
    },
    CallReject {
        to_id: UserId,
        payload: serde_json::Value,
    },

    /// A snap was sent; renews the streak for both directions.
    SnapSent { to_id: UserId },
}

/// All frames the server may write to a client channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ServerFrame {
    AuthOk {
        user_id: UserId,
    },
    AuthFail,

    /// Synchronous ack to the sender; the reconciliation point for
    /// optimistic UI. `correlation_id` is echoed unchanged.
    Delivered {
        id: MessageId,
        to: MessageTarget,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        correlation_id: Option<String>,
        ts: DateTime<Utc>,
    },

    /// A message forwarded to a live recipient.
    NewMessage {
        message: Message,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        correlation_id: Option<String>,
    },

    UserTyping {
        from: UserId,
    },

    Read {
        ids: Vec<MessageId>,
        from: UserId,
        ts: DateTime<Utc>,
    },

    MessageDeleted {
        conversation_id: String,
        message_id: MessageId,
        scope: DeleteScope,
    },

    CallOffer {
        from: UserId,
        payload: serde_json::Value,
    },
    CallAnswer {
        from: UserId,
        payload: serde_json::Value,
    },
    IceCandidate {
        from: UserId,
        payload: serde_json::Value,
    },
    CallReject {
        from: UserId,
        payload: serde_json::Value,
    },

    SnapNotification {
        from: UserId,
        from_username: String,
    },

    /// Caller-visible failure (validation, persistence, authorization).
    Error {
        message: String,
    },
}

impl ClientFrame {
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl ServerFrame {
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
