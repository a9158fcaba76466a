use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// User identity = opaque string issued by the external user store
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct GroupId(pub String);

impl GroupId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for GroupId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct MessageId(pub Uuid);

impl MessageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Deterministic key grouping all messages between a fixed set of
/// participants.
///
/// Direct conversations sort the two user ids lexicographically before
/// joining, so both sides always resolve to the same key. Group
/// conversations live in their own `group:` namespace.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ConversationKey(String);

impl ConversationKey {
    pub fn direct(a: &UserId, b: &UserId) -> Self {
        let (lo, hi) = if a.0 <= b.0 { (a, b) } else { (b, a) };
        Self(format!("{}-{}", lo.0, hi.0))
    }

    pub fn group(group_id: &GroupId) -> Self {
        Self(format!("group:{}", group_id.0))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Content kind of a message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    Emoji,
    Sticker,
    Image,
    Audio,
    Video,
    File,
    Document,
}

/// Addressee of a message: a single user or a group.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum MessageTarget {
    User(UserId),
    Group(GroupId),
}

/// A persisted chat message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Server-generated, opaque to clients.
    pub id: MessageId,
    pub from: UserId,
    pub target: MessageTarget,
    pub kind: MessageKind,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    /// Users who have read this message. The sender is included at creation.
    pub read_by: HashSet<UserId>,
    /// Users who soft-deleted their own view ("delete for me").
    #[serde(default, skip_serializing_if = "HashSet::is_empty")]
    pub deleted_for: HashSet<UserId>,
}

impl Message {
    pub fn new(from: UserId, target: MessageTarget, kind: MessageKind, content: String) -> Self {
        let mut read_by = HashSet::new();
        read_by.insert(from.clone());
        Self {
            id: MessageId::new(),
            from,
            target,
            kind,
            content,
            timestamp: Utc::now(),
            read_by,
            deleted_for: HashSet::new(),
        }
    }

    /// Record that `reader` has read this message. Returns `true` if the
    /// set actually changed (idempotent on repeat calls).
    pub fn mark_read(&mut self, reader: &UserId) -> bool {
        self.read_by.insert(reader.clone())
    }

    pub fn is_deleted_for(&self, user: &UserId) -> bool {
        self.deleted_for.contains(user)
    }
}

/// Scope of a message deletion.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum DeleteScope {
    ForMe,
    ForEveryone,
}

/// One registered push endpoint for a user. The endpoint URL is the
/// identity used for dedup and pruning; the key material is opaque here.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PushSubscription {
    pub endpoint: String,
    #[serde(default)]
    pub keys: serde_json::Map<String, serde_json::Value>,
}

/// Per-user notification gating.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPreference {
    pub push_enabled: bool,
    pub do_not_disturb: bool,
}

impl Default for NotificationPreference {
    fn default() -> Self {
        Self {
            push_enabled: true,
            do_not_disturb: false,
        }
    }
}
