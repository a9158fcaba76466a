//! Message router: persists inbound chat frames, acknowledges the sender,
//! forwards to live recipients, and falls back to push fan-out for anyone
//! offline.
//!
//! Everything on the synchronous path (validate, persist, ack, forward)
//! completes before the call returns; push delivery is dispatched
//! afterwards and never affects the caller's response.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};

use glint_shared::constants::PUSH_PREVIEW_LEN;
use glint_shared::protocol::ServerFrame;
use glint_shared::types::{
    ConversationKey, DeleteScope, GroupId, Message, MessageId, MessageKind, MessageTarget, UserId,
};
use glint_shared::CoreError;
use glint_store::ConversationLog;

use crate::directory::Directory;
use crate::hub::ConnectionHub;
use crate::notify::{PushFanout, PushPayload};
use crate::streaks::StreakEngine;

pub struct MessageRouter {
    hub: Arc<ConnectionHub>,
    log: Arc<dyn ConversationLog>,
    directory: Arc<dyn Directory>,
    streaks: Arc<StreakEngine>,
    fanout: Arc<PushFanout>,
}

impl MessageRouter {
    pub fn new(
        hub: Arc<ConnectionHub>,
        log: Arc<dyn ConversationLog>,
        directory: Arc<dyn Directory>,
        streaks: Arc<StreakEngine>,
        fanout: Arc<PushFanout>,
    ) -> Self {
        Self {
            hub,
            log,
            directory,
            streaks,
            fanout,
        }
    }

    /// Persist and route an inbound chat message.
    pub async fn send(
        &self,
        from: &UserId,
        to_id: Option<UserId>,
        group_id: Option<GroupId>,
        kind: MessageKind,
        content: String,
        correlation_id: Option<String>,
    ) {
        let target = match self.resolve_target(from, to_id, group_id).await {
            Ok(target) => target,
            Err(err) => {
                self.caller_error(from, &err).await;
                return;
            }
        };
        if content.is_empty() {
            self.caller_error(from, &CoreError::ValidationFailed("content required".into()))
                .await;
            return;
        }

        let key = conversation_key(from, &target);
        let message = Message::new(from.clone(), target.clone(), kind, content);
        let message_id = message.id;

        if let Err(err) = self.log.append(&key, message.clone()) {
            warn!(conversation = %key, error = %err, "Message persistence failed");
            self.caller_error(from, &CoreError::PersistenceFailed("failed to send".into()))
                .await;
            return;
        }

        // Forward to whoever is live; everyone else goes to push fan-out.
        let mut offline = Vec::new();
        for recipient in self.recipients(from, &target).await {
            let delivered = self
                .hub
                .send_to(
                    &recipient,
                    ServerFrame::NewMessage {
                        message: message.clone(),
                        correlation_id: correlation_id.clone(),
                    },
                )
                .await;
            if !delivered {
                offline.push(recipient);
            }
        }

        // The reconciliation point for optimistic UI: server id plus the
        // caller's correlation token, unchanged.
        self.hub
            .send_to(
                from,
                ServerFrame::Delivered {
                    id: message_id,
                    to: target,
                    correlation_id,
                    ts: message.timestamp,
                },
            )
            .await;

        if !offline.is_empty() {
            self.dispatch_push(from, offline, kind, &message.content).await;
        }
    }

    /// Stateless typing indicator. Dropped silently when the target is
    /// offline; never persisted, never acknowledged.
    pub async fn typing(&self, from: &UserId, to_id: &UserId) {
        self.hub
            .send_to(to_id, ServerFrame::UserTyping { from: from.clone() })
            .await;
    }

    /// Batch read receipt. Fire-and-forget: the caller gets no reply.
    pub async fn read(&self, from: &UserId, ids: Vec<MessageId>, to_id: &UserId) {
        let key = ConversationKey::direct(from, to_id);
        if let Err(err) = self.log.mark_read(&key, &ids, from) {
            warn!(conversation = %key, error = %err, "Failed to persist read receipts");
            return;
        }
        self.hub
            .send_to(
                to_id,
                ServerFrame::Read {
                    ids,
                    from: from.clone(),
                    ts: Utc::now(),
                },
            )
            .await;
    }

    /// Delete a message for the caller only, or for everyone.
    pub async fn delete(
        &self,
        from: &UserId,
        to_id: Option<UserId>,
        group_id: Option<GroupId>,
        message_id: MessageId,
        scope: DeleteScope,
    ) {
        let target = match self.resolve_target(from, to_id, group_id).await {
            Ok(target) => target,
            Err(err) => {
                self.caller_error(from, &err).await;
                return;
            }
        };
        let key = conversation_key(from, &target);

        match scope {
            DeleteScope::ForMe => {
                match self.log.mark_deleted_for(&key, message_id, from) {
                    Ok(true) => {
                        // Only the caller's own view changes, so only the
                        // caller's live channel hears about it.
                        self.hub
                            .send_to(from, deleted_frame(&key, message_id, scope))
                            .await;
                    }
                    Ok(false) => {
                        self.caller_error(from, &CoreError::NotFound("message".into()))
                            .await;
                    }
                    Err(err) => {
                        warn!(conversation = %key, error = %err, "Delete-for-me failed");
                        self.caller_error(
                            from,
                            &CoreError::PersistenceFailed("failed to delete".into()),
                        )
                        .await;
                    }
                }
            }
            DeleteScope::ForEveryone => {
                let existing = match self.log.get(&key, message_id) {
                    Ok(Some(message)) => message,
                    Ok(None) => {
                        self.caller_error(from, &CoreError::NotFound("message".into()))
                            .await;
                        return;
                    }
                    Err(err) => {
                        warn!(conversation = %key, error = %err, "Delete lookup failed");
                        self.caller_error(
                            from,
                            &CoreError::PersistenceFailed("failed to delete".into()),
                        )
                        .await;
                        return;
                    }
                };

                let authorized =
                    existing.from == *from || self.directory.is_admin(from).await;
                if !authorized {
                    self.caller_error(from, &CoreError::UnauthorizedDelete).await;
                    return;
                }

                if let Err(err) = self.log.remove(&key, message_id) {
                    warn!(conversation = %key, error = %err, "Delete-for-everyone failed");
                    self.caller_error(
                        from,
                        &CoreError::PersistenceFailed("failed to delete".into()),
                    )
                    .await;
                    return;
                }

                // Every participant hears about a hard delete, the caller
                // included.
                let mut recipients = self.recipients(from, &target).await;
                recipients.push(from.clone());
                for recipient in recipients {
                    self.hub
                        .send_to(&recipient, deleted_frame(&key, message_id, scope))
                        .await;
                }
            }
        }
    }

    /// A snap was sent: notify the target and renew the streak in both
    /// directions, exactly as the reference system does.
    pub async fn snap(&self, from: &UserId, to_id: &UserId) {
        let from_username = self
            .directory
            .lookup_user(from)
            .await
            .map(|profile| profile.display_name)
            .unwrap_or_else(|| "Unknown".to_string());

        self.hub
            .send_to(
                to_id,
                ServerFrame::SnapNotification {
                    from: from.clone(),
                    from_username,
                },
            )
            .await;

        self.streaks.renew(from, to_id).await;
        self.streaks.renew(to_id, from).await;
    }

    async fn resolve_target(
        &self,
        from: &UserId,
        to_id: Option<UserId>,
        group_id: Option<GroupId>,
    ) -> Result<MessageTarget, CoreError> {
        match (to_id, group_id) {
            (Some(user), None) => Ok(MessageTarget::User(user)),
            (None, Some(group)) => {
                if !self.directory.is_group_member(&group, from).await {
                    return Err(CoreError::ValidationFailed(
                        "not a member of this group".into(),
                    ));
                }
                Ok(MessageTarget::Group(group))
            }
            _ => Err(CoreError::ValidationFailed(
                "exactly one of toId or groupId required".into(),
            )),
        }
    }

    /// Everyone who should receive a frame about a message, sender excluded.
    async fn recipients(&self, from: &UserId, target: &MessageTarget) -> Vec<UserId> {
        match target {
            MessageTarget::User(user) => vec![user.clone()],
            MessageTarget::Group(group) => self
                .directory
                .group_members(group)
                .await
                .into_iter()
                .filter(|member| member != from)
                .collect(),
        }
    }

    /// Fire-and-forget push dispatch for offline recipients. Runs after the
    /// synchronous path; its outcome never reaches the caller.
    async fn dispatch_push(
        &self,
        from: &UserId,
        recipients: Vec<UserId>,
        kind: MessageKind,
        content: &str,
    ) {
        let sender_name = self
            .directory
            .lookup_user(from)
            .await
            .map(|profile| profile.display_name)
            .unwrap_or_else(|| "Someone".to_string());
        let payload = PushPayload {
            title: format!("{sender_name} sent a message"),
            body: preview(kind, content),
            url: "/".to_string(),
        };

        let fanout = self.fanout.clone();
        tokio::spawn(async move {
            for recipient in recipients {
                fanout.notify(&recipient, payload.clone()).await;
            }
        });
    }

    async fn caller_error(&self, user: &UserId, err: &CoreError) {
        debug!(user = %user, error = %err, "Rejecting frame");
        self.hub
            .send_to(
                user,
                ServerFrame::Error {
                    message: err.to_string(),
                },
            )
            .await;
    }
}

fn conversation_key(from: &UserId, target: &MessageTarget) -> ConversationKey {
    match target {
        MessageTarget::User(user) => ConversationKey::direct(from, user),
        MessageTarget::Group(group) => ConversationKey::group(group),
    }
}

fn deleted_frame(key: &ConversationKey, message_id: MessageId, scope: DeleteScope) -> ServerFrame {
    ServerFrame::MessageDeleted {
        conversation_id: key.to_string(),
        message_id,
        scope,
    }
}

/// Short preview string for a push notification, derived by message kind.
fn preview(kind: MessageKind, content: &str) -> String {
    match kind {
        MessageKind::Text => content.chars().take(PUSH_PREVIEW_LEN).collect(),
        MessageKind::Emoji => content.to_string(),
        MessageKind::Sticker => "Sent a sticker".to_string(),
        MessageKind::Audio => "Sent a voice message".to_string(),
        _ => "New message".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration as StdDuration;

    use async_trait::async_trait;
    use tokio::sync::{mpsc, Mutex};

    use glint_shared::types::PushSubscription;
    use glint_store::MemoryLog;

    use crate::directory::MemoryDirectory;
    use crate::hub::ChannelHandle;
    use crate::notify::{PushOutcome, PushSender};

    /// Push sender that records every payload it is asked to deliver.
    struct RecordingSender {
        delivered: Mutex<Vec<PushPayload>>,
    }

    #[async_trait]
    impl PushSender for RecordingSender {
        async fn send(&self, _sub: &PushSubscription, payload: &PushPayload) -> PushOutcome {
            self.delivered.lock().await.push(payload.clone());
            PushOutcome::Delivered
        }
    }

    struct Harness {
        hub: Arc<ConnectionHub>,
        log: Arc<MemoryLog>,
        directory: Arc<MemoryDirectory>,
        streaks: Arc<StreakEngine>,
        router: MessageRouter,
        push_sender: Arc<RecordingSender>,
    }

    impl Harness {
        fn new() -> Self {
            let hub = Arc::new(ConnectionHub::new());
            let log = Arc::new(MemoryLog::new());
            let directory = Arc::new(MemoryDirectory::new());
            let streaks = Arc::new(StreakEngine::new());
            let push_sender = Arc::new(RecordingSender {
                delivered: Mutex::new(Vec::new()),
            });
            let fanout = Arc::new(PushFanout::new(push_sender.clone()));
            let router = MessageRouter::new(
                hub.clone(),
                log.clone(),
                directory.clone(),
                streaks.clone(),
                fanout.clone(),
            );
            Self {
                hub,
                log,
                directory,
                streaks,
                router,
                push_sender,
            }
        }

        async fn connect(&self, user: &str) -> mpsc::UnboundedReceiver<ServerFrame> {
            let (tx, rx) = mpsc::unbounded_channel();
            self.hub
                .register(UserId::new(user), ChannelHandle::new(tx))
                .await;
            rx
        }
    }

    async fn recv(rx: &mut mpsc::UnboundedReceiver<ServerFrame>) -> ServerFrame {
        tokio::time::timeout(StdDuration::from_secs(1), rx.recv())
            .await
            .expect("timed out waiting for frame")
            .expect("channel closed")
    }

    #[tokio::test]
    async fn test_delivered_ack_echoes_correlation_token() {
        let h = Harness::new();
        let mut alice_rx = h.connect("alice").await;
        let _bob_rx = h.connect("bob").await;

        h.router
            .send(
                &UserId::new("alice"),
                Some(UserId::new("bob")),
                None,
                MessageKind::Text,
                "hi".into(),
                Some("opt-42".into()),
            )
            .await;

        match recv(&mut alice_rx).await {
            ServerFrame::Delivered { correlation_id, to, .. } => {
                assert_eq!(correlation_id.as_deref(), Some("opt-42"));
                assert_eq!(to, MessageTarget::User(UserId::new("bob")));
            }
            other => panic!("expected delivered ack, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_forwarding_preserves_send_order() {
        let h = Harness::new();
        let _alice_rx = h.connect("alice").await;
        let mut bob_rx = h.connect("bob").await;

        for i in 0..5 {
            h.router
                .send(
                    &UserId::new("alice"),
                    Some(UserId::new("bob")),
                    None,
                    MessageKind::Text,
                    format!("m{i}"),
                    None,
                )
                .await;
        }

        for i in 0..5 {
            match recv(&mut bob_rx).await {
                ServerFrame::NewMessage { message, .. } => {
                    assert_eq!(message.content, format!("m{i}"));
                }
                other => panic!("expected new-message, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_validation_failure_sends_error_and_persists_nothing() {
        let h = Harness::new();
        let mut alice_rx = h.connect("alice").await;

        h.router
            .send(
                &UserId::new("alice"),
                Some(UserId::new("bob")),
                None,
                MessageKind::Text,
                String::new(),
                None,
            )
            .await;

        assert!(matches!(recv(&mut alice_rx).await, ServerFrame::Error { .. }));
        let key = ConversationKey::direct(&UserId::new("alice"), &UserId::new("bob"));
        assert!(h.log.messages(&key).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_offline_recipient_gets_push_with_kind_preview() {
        let h = Harness::new();
        let _alice_rx = h.connect("alice").await;
        // Bob is offline but has a push subscription.
        let fanout = h.router.fanout.clone();
        fanout
            .subscribe(
                UserId::new("bob"),
                PushSubscription {
                    endpoint: "https://push/bob".into(),
                    keys: serde_json::Map::new(),
                },
            )
            .await;
        h.directory
            .register_user(UserId::new("alice"), "Alice", "tok-a")
            .await;

        h.router
            .send(
                &UserId::new("alice"),
                Some(UserId::new("bob")),
                None,
                MessageKind::Sticker,
                "sticker-7".into(),
                None,
            )
            .await;

        // Push dispatch is spawned; give it a moment to land.
        let mut delivered = Vec::new();
        for _ in 0..50 {
            delivered = h.push_sender.delivered.lock().await.clone();
            if !delivered.is_empty() {
                break;
            }
            tokio::time::sleep(StdDuration::from_millis(10)).await;
        }
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].title, "Alice sent a message");
        assert_eq!(delivered[0].body, "Sent a sticker");
    }

    #[tokio::test]
    async fn test_read_receipt_forwarded_and_idempotent() {
        let h = Harness::new();
        let _alice_rx = h.connect("alice").await;
        let mut bob_rx = h.connect("bob").await;
        let alice = UserId::new("alice");
        let bob = UserId::new("bob");

        h.router
            .send(&alice, Some(bob.clone()), None, MessageKind::Text, "hi".into(), None)
            .await;
        let id = match recv(&mut bob_rx).await {
            ServerFrame::NewMessage { message, .. } => message.id,
            other => panic!("expected new-message, got {other:?}"),
        };

        let mut alice_rx = h.connect("alice").await;
        h.router.read(&bob, vec![id], &alice).await;
        h.router.read(&bob, vec![id], &alice).await;

        match recv(&mut alice_rx).await {
            ServerFrame::Read { ids, from, .. } => {
                assert_eq!(ids, vec![id]);
                assert_eq!(from, bob);
            }
            other => panic!("expected read frame, got {other:?}"),
        }

        let key = ConversationKey::direct(&alice, &bob);
        let stored = h.log.get(&key, id).unwrap().unwrap();
        assert_eq!(stored.read_by.iter().filter(|u| **u == bob).count(), 1);
    }

    #[tokio::test]
    async fn test_delete_for_me_keeps_counterpart_view() {
        let h = Harness::new();
        let _alice_rx = h.connect("alice").await;
        let mut bob_rx = h.connect("bob").await;
        let alice = UserId::new("alice");
        let bob = UserId::new("bob");

        h.router
            .send(&alice, Some(bob.clone()), None, MessageKind::Text, "hi".into(), None)
            .await;
        let id = match recv(&mut bob_rx).await {
            ServerFrame::NewMessage { message, .. } => message.id,
            other => panic!("expected new-message, got {other:?}"),
        };

        let mut bob_rx2 = h.connect("bob").await;
        h.router
            .delete(&bob, Some(alice.clone()), None, id, DeleteScope::ForMe)
            .await;

        assert!(matches!(
            recv(&mut bob_rx2).await,
            ServerFrame::MessageDeleted { scope: DeleteScope::ForMe, .. }
        ));

        // Still present, just hidden from Bob's own view.
        let key = ConversationKey::direct(&alice, &bob);
        let stored = h.log.get(&key, id).unwrap().unwrap();
        assert!(stored.is_deleted_for(&bob));
        assert!(!stored.is_deleted_for(&alice));
    }

    #[tokio::test]
    async fn test_delete_for_everyone_requires_sender() {
        let h = Harness::new();
        let _alice_rx = h.connect("alice").await;
        let mut bob_rx = h.connect("bob").await;
        let alice = UserId::new("alice");
        let bob = UserId::new("bob");

        h.router
            .send(&alice, Some(bob.clone()), None, MessageKind::Text, "hi".into(), None)
            .await;
        let id = match recv(&mut bob_rx).await {
            ServerFrame::NewMessage { message, .. } => message.id,
            other => panic!("expected new-message, got {other:?}"),
        };

        // Bob did not send it; his hard delete is rejected with no mutation.
        h.router
            .delete(&bob, Some(alice.clone()), None, id, DeleteScope::ForEveryone)
            .await;
        assert!(matches!(recv(&mut bob_rx).await, ServerFrame::Error { .. }));
        let key = ConversationKey::direct(&alice, &bob);
        assert!(h.log.get(&key, id).unwrap().is_some());

        // The sender's hard delete removes it and notifies both sides.
        let mut alice_rx = h.connect("alice").await;
        h.router
            .delete(&alice, Some(bob.clone()), None, id, DeleteScope::ForEveryone)
            .await;
        assert!(matches!(
            recv(&mut bob_rx).await,
            ServerFrame::MessageDeleted { scope: DeleteScope::ForEveryone, .. }
        ));
        assert!(matches!(
            recv(&mut alice_rx).await,
            ServerFrame::MessageDeleted { .. }
        ));
        assert!(h.log.get(&key, id).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_admin_may_delete_for_everyone() {
        let h = Harness::new();
        let _alice_rx = h.connect("alice").await;
        let mut bob_rx = h.connect("bob").await;
        let alice = UserId::new("alice");
        let bob = UserId::new("bob");
        h.directory.grant_admin(bob.clone()).await;

        h.router
            .send(&alice, Some(bob.clone()), None, MessageKind::Text, "hi".into(), None)
            .await;
        let id = match recv(&mut bob_rx).await {
            ServerFrame::NewMessage { message, .. } => message.id,
            other => panic!("expected new-message, got {other:?}"),
        };

        h.router
            .delete(&bob, Some(alice.clone()), None, id, DeleteScope::ForEveryone)
            .await;
        assert!(matches!(
            recv(&mut bob_rx).await,
            ServerFrame::MessageDeleted { scope: DeleteScope::ForEveryone, .. }
        ));
        let key = ConversationKey::direct(&alice, &bob);
        assert!(h.log.get(&key, id).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_group_send_reaches_members_except_sender() {
        let h = Harness::new();
        let group = GroupId::new("g1");
        h.directory
            .create_group(
                group.clone(),
                vec![UserId::new("alice"), UserId::new("bob"), UserId::new("carol")],
            )
            .await;

        let mut alice_rx = h.connect("alice").await;
        let mut bob_rx = h.connect("bob").await;
        let mut carol_rx = h.connect("carol").await;

        h.router
            .send(
                &UserId::new("alice"),
                None,
                Some(group),
                MessageKind::Text,
                "hello group".into(),
                None,
            )
            .await;

        assert!(matches!(recv(&mut bob_rx).await, ServerFrame::NewMessage { .. }));
        assert!(matches!(recv(&mut carol_rx).await, ServerFrame::NewMessage { .. }));
        // The sender gets the ack, not a copy of their own message.
        assert!(matches!(recv(&mut alice_rx).await, ServerFrame::Delivered { .. }));
    }

    #[tokio::test]
    async fn test_group_send_from_non_member_rejected() {
        let h = Harness::new();
        let group = GroupId::new("g1");
        h.directory
            .create_group(group.clone(), vec![UserId::new("bob")])
            .await;
        let mut alice_rx = h.connect("alice").await;

        h.router
            .send(
                &UserId::new("alice"),
                None,
                Some(group),
                MessageKind::Text,
                "hi".into(),
                None,
            )
            .await;

        assert!(matches!(recv(&mut alice_rx).await, ServerFrame::Error { .. }));
    }

    #[tokio::test]
    async fn test_snap_notifies_and_renews_both_directions() {
        let h = Harness::new();
        let alice = UserId::new("alice");
        let bob = UserId::new("bob");
        h.directory.register_user(alice.clone(), "Alice", "tok-a").await;
        let mut bob_rx = h.connect("bob").await;

        h.router.snap(&alice, &bob).await;

        match recv(&mut bob_rx).await {
            ServerFrame::SnapNotification { from, from_username } => {
                assert_eq!(from, alice);
                assert_eq!(from_username, "Alice");
            }
            other => panic!("expected snap-notification, got {other:?}"),
        }

        // Both directions renewed against the same pair entry: both sides
        // recorded activity, so the streak activates immediately.
        let state = h.streaks.snapshot(&alice, &bob).await;
        assert!(state.activated_at.is_some());
        assert!(state.last_activity_by.contains_key(&alice));
        assert!(state.last_activity_by.contains_key(&bob));
    }

    #[tokio::test]
    async fn test_typing_dropped_silently_when_offline() {
        let h = Harness::new();
        // No channels at all; must not error or panic.
        h.router
            .typing(&UserId::new("alice"), &UserId::new("bob"))
            .await;
    }
}
