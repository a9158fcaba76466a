//! Connection hub: the live mapping from authenticated user to channel.
//!
//! At most one live channel per user. Registering a second channel for the
//! same user supersedes the first; a close from the superseded channel must
//! not evict the newer mapping, which is why unregistration is keyed by the
//! connection id and not just the user.

use std::collections::HashMap;

use tokio::sync::{mpsc, Mutex};
use tracing::debug;
use uuid::Uuid;

use glint_shared::protocol::ServerFrame;
use glint_shared::types::UserId;

/// Handle to one client channel's outbound queue.
///
/// Sending is a non-blocking enqueue: a slow or stalled recipient never
/// stalls the task that forwards to it.
#[derive(Debug, Clone)]
pub struct ChannelHandle {
    /// Identity of the underlying connection, used to detect stale closes.
    pub connection_id: Uuid,
    sender: mpsc::UnboundedSender<ServerFrame>,
}

impl ChannelHandle {
    pub fn new(sender: mpsc::UnboundedSender<ServerFrame>) -> Self {
        Self {
            connection_id: Uuid::new_v4(),
            sender,
        }
    }

    /// Enqueue a frame. Returns `false` if the channel's writer is gone.
    pub fn send(&self, frame: ServerFrame) -> bool {
        self.sender.send(frame).is_ok()
    }
}

/// Registry of live channels. Injected, lock-guarded: tests instantiate
/// isolated hubs per case.
pub struct ConnectionHub {
    connections: Mutex<HashMap<UserId, ChannelHandle>>,
}

impl ConnectionHub {
    pub fn new() -> Self {
        Self {
            connections: Mutex::new(HashMap::new()),
        }
    }

    /// Install or replace the live mapping for `user_id`.
    pub async fn register(&self, user_id: UserId, handle: ChannelHandle) {
        let mut connections = self.connections.lock().await;
        if let Some(old) = connections.insert(user_id.clone(), handle) {
            debug!(
                user = %user_id,
                superseded = %old.connection_id,
                "Replaced live channel for user"
            );
        } else {
            debug!(user = %user_id, "Registered live channel");
        }
    }

    pub async fn lookup(&self, user_id: &UserId) -> Option<ChannelHandle> {
        self.connections.lock().await.get(user_id).cloned()
    }

    /// Remove the mapping for `user_id`, but only if it still points at the
    /// connection that is closing. Returns whether a mapping was removed.
    pub async fn unregister(&self, user_id: &UserId, connection_id: Uuid) -> bool {
        let mut connections = self.connections.lock().await;
        match connections.get(user_id) {
            Some(handle) if handle.connection_id == connection_id => {
                connections.remove(user_id);
                debug!(user = %user_id, "Unregistered live channel");
                true
            }
            Some(_) => {
                debug!(user = %user_id, "Ignoring stale unregister");
                false
            }
            None => false,
        }
    }

    /// Enqueue a frame to a user's live channel. Returns `false` when the
    /// user has no live channel (the fan-out path takes over from there).
    pub async fn send_to(&self, user_id: &UserId, frame: ServerFrame) -> bool {
        match self.lookup(user_id).await {
            Some(handle) => handle.send(frame),
            None => false,
        }
    }

    pub async fn connected_count(&self) -> usize {
        self.connections.lock().await.len()
    }
}

impl Default for ConnectionHub {
    fn default() -> Self {
        Self::new()
    }
}
