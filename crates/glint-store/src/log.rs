//! Append-only message log keyed by conversation.
//!
//! Locking is two-level: a registry lock guards the map of conversations,
//! and each conversation carries its own mutex so appends to unrelated
//! conversations never serialize on each other.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use tracing::debug;

use glint_shared::types::{ConversationKey, Message, MessageId, UserId};

use crate::error::{Result, StoreError};

/// Persistence seam for the message router. Implementations must be cheap
/// enough to call while the router holds no other lock; appends are atomic
/// per conversation.
pub trait ConversationLog: Send + Sync {
    /// Append a message to the conversation's log.
    fn append(&self, key: &ConversationKey, message: Message) -> Result<()>;

    /// All messages for a conversation, in append order.
    fn messages(&self, key: &ConversationKey) -> Result<Vec<Message>>;

    /// Look up a single message by id.
    fn get(&self, key: &ConversationKey, id: MessageId) -> Result<Option<Message>>;

    /// Add `reader` to the read set of each listed message that exists in
    /// this conversation. Returns the ids whose read set actually changed;
    /// repeat calls are no-ops (set semantics).
    fn mark_read(
        &self,
        key: &ConversationKey,
        ids: &[MessageId],
        reader: &UserId,
    ) -> Result<Vec<MessageId>>;

    /// Record a "delete for me": hides the message from `user`'s own view
    /// only. Idempotent. Returns `false` if the message does not exist.
    fn mark_deleted_for(
        &self,
        key: &ConversationKey,
        id: MessageId,
        user: &UserId,
    ) -> Result<bool>;

    /// Remove a message outright ("delete for everyone"). Returns the
    /// removed message, if it existed.
    fn remove(&self, key: &ConversationKey, id: MessageId) -> Result<Option<Message>>;
}

type Shard = Arc<Mutex<Vec<Message>>>;

/// In-memory conversation log for the single-process server.
pub struct MemoryLog {
    conversations: RwLock<HashMap<ConversationKey, Shard>>,
}

impl MemoryLog {
    pub fn new() -> Self {
        Self {
            conversations: RwLock::new(HashMap::new()),
        }
    }

    /// Conversation shard, created lazily on first touch.
    fn shard(&self, key: &ConversationKey) -> Result<Shard> {
        {
            let map = self
                .conversations
                .read()
                .map_err(|e| StoreError::Poisoned(e.to_string()))?;
            if let Some(shard) = map.get(key) {
                return Ok(shard.clone());
            }
        }
        let mut map = self
            .conversations
            .write()
            .map_err(|e| StoreError::Poisoned(e.to_string()))?;
        Ok(map.entry(key.clone()).or_default().clone())
    }
}

impl Default for MemoryLog {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversationLog for MemoryLog {
    fn append(&self, key: &ConversationKey, message: Message) -> Result<()> {
        let shard = self.shard(key)?;
        let mut messages = shard
            .lock()
            .map_err(|e| StoreError::Poisoned(e.to_string()))?;
        debug!(conversation = %key, id = %message.id, "Appending message");
        messages.push(message);
        Ok(())
    }

    fn messages(&self, key: &ConversationKey) -> Result<Vec<Message>> {
        let shard = self.shard(key)?;
        let messages = shard
            .lock()
            .map_err(|e| StoreError::Poisoned(e.to_string()))?;
        Ok(messages.clone())
    }

    fn get(&self, key: &ConversationKey, id: MessageId) -> Result<Option<Message>> {
        let shard = self.shard(key)?;
        let messages = shard
            .lock()
            .map_err(|e| StoreError::Poisoned(e.to_string()))?;
        Ok(messages.iter().find(|m| m.id == id).cloned())
    }

    fn mark_read(
        &self,
        key: &ConversationKey,
        ids: &[MessageId],
        reader: &UserId,
    ) -> Result<Vec<MessageId>> {
        let shard = self.shard(key)?;
        let mut messages = shard
            .lock()
            .map_err(|e| StoreError::Poisoned(e.to_string()))?;
        let mut updated = Vec::new();
        for message in messages.iter_mut() {
            if ids.contains(&message.id) && message.mark_read(reader) {
                updated.push(message.id);
            }
        }
        Ok(updated)
    }

    fn mark_deleted_for(
        &self,
        key: &ConversationKey,
        id: MessageId,
        user: &UserId,
    ) -> Result<bool> {
        let shard = self.shard(key)?;
        let mut messages = shard
            .lock()
            .map_err(|e| StoreError::Poisoned(e.to_string()))?;
        match messages.iter_mut().find(|m| m.id == id) {
            Some(message) => {
                message.deleted_for.insert(user.clone());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn remove(&self, key: &ConversationKey, id: MessageId) -> Result<Option<Message>> {
        let shard = self.shard(key)?;
        let mut messages = shard
            .lock()
            .map_err(|e| StoreError::Poisoned(e.to_string()))?;
        let pos = messages.iter().position(|m| m.id == id);
        Ok(pos.map(|i| messages.remove(i)))
    }
}
