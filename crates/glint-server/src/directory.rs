//! External user-store collaborator.
//!
//! The realtime core does not own users, groups, or credentials; it
//! consumes them through this seam. [`MemoryDirectory`] is the in-process
//! stand-in used for development and tests.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::Mutex;

use glint_shared::types::{GroupId, UserId};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: UserId,
    pub display_name: String,
}

#[async_trait]
pub trait Directory: Send + Sync {
    /// Resolve a bearer credential to a user, or `None` when invalid.
    async fn verify_credential(&self, token: &str) -> Option<UserId>;

    async fn lookup_user(&self, id: &UserId) -> Option<UserProfile>;

    async fn is_group_member(&self, group: &GroupId, user: &UserId) -> bool;

    async fn group_members(&self, group: &GroupId) -> Vec<UserId>;

    /// Administrators may delete any message for everyone.
    async fn is_admin(&self, user: &UserId) -> bool;
}

#[derive(Default)]
struct DirectoryState {
    users: HashMap<UserId, UserProfile>,
    tokens: HashMap<String, UserId>,
    groups: HashMap<GroupId, Vec<UserId>>,
    admins: HashSet<UserId>,
}

/// In-memory directory. Seeded explicitly; nothing is implicit.
#[derive(Default)]
pub struct MemoryDirectory {
    state: Mutex<DirectoryState>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register_user(&self, id: UserId, display_name: &str, token: &str) {
        let mut state = self.state.lock().await;
        state.tokens.insert(token.to_string(), id.clone());
        state.users.insert(
            id.clone(),
            UserProfile {
                id,
                display_name: display_name.to_string(),
            },
        );
    }

    pub async fn create_group(&self, group: GroupId, members: Vec<UserId>) {
        self.state.lock().await.groups.insert(group, members);
    }

    pub async fn grant_admin(&self, user: UserId) {
        self.state.lock().await.admins.insert(user);
    }
}

#[async_trait]
impl Directory for MemoryDirectory {
    async fn verify_credential(&self, token: &str) -> Option<UserId> {
        self.state.lock().await.tokens.get(token).cloned()
    }

    async fn lookup_user(&self, id: &UserId) -> Option<UserProfile> {
        self.state.lock().await.users.get(id).cloned()
    }

    async fn is_group_member(&self, group: &GroupId, user: &UserId) -> bool {
        self.state
            .lock()
            .await
            .groups
            .get(group)
            .is_some_and(|members| members.contains(user))
    }

    async fn group_members(&self, group: &GroupId) -> Vec<UserId> {
        self.state
            .lock()
            .await
            .groups
            .get(group)
            .cloned()
            .unwrap_or_default()
    }

    async fn is_admin(&self, user: &UserId) -> bool {
        self.state.lock().await.admins.contains(user)
    }
}
