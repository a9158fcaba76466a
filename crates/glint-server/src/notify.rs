//! Notification fan-out: best-effort push delivery to every registered
//! endpoint of a user, gated by preferences.
//!
//! Delivery runs outside any router lock and after the sender's ack; its
//! outcome only ever affects the subscription set, never a caller response.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use glint_shared::types::{NotificationPreference, PushSubscription, UserId};

/// Outcome of one delivery attempt to one endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Delivered,
    /// Endpoint is gone (410/404 class): drop the subscription.
    PermanentFailure,
    /// Transient problem: keep the subscription, just log.
    TransientFailure,
}

/// What a push notification carries.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PushPayload {
    pub title: String,
    pub body: String,
    pub url: String,
}

/// External delivery collaborator (web-push service, APNs bridge, ...).
#[async_trait]
pub trait PushSender: Send + Sync {
    async fn send(&self, subscription: &PushSubscription, payload: &PushPayload) -> PushOutcome;
}

/// Default sender for unconfigured deployments: logs and reports success,
/// so the rest of the pipeline behaves normally.
pub struct LoggingPushSender;

#[async_trait]
impl PushSender for LoggingPushSender {
    async fn send(&self, subscription: &PushSubscription, payload: &PushPayload) -> PushOutcome {
        debug!(
            endpoint = %subscription.endpoint,
            title = %payload.title,
            "Push delivery (logging sender)"
        );
        PushOutcome::Delivered
    }
}

/// A payload parked for later delivery (push disabled or DND active).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedNotification {
    pub user_id: UserId,
    pub payload: PushPayload,
    pub ts: DateTime<Utc>,
}

pub struct PushFanout {
    sender: Arc<dyn PushSender>,
    subscriptions: Mutex<HashMap<UserId, Vec<PushSubscription>>>,
    preferences: Mutex<HashMap<UserId, NotificationPreference>>,
    deferred: Mutex<Vec<QueuedNotification>>,
}

impl PushFanout {
    pub fn new(sender: Arc<dyn PushSender>) -> Self {
        Self {
            sender,
            subscriptions: Mutex::new(HashMap::new()),
            preferences: Mutex::new(HashMap::new()),
            deferred: Mutex::new(Vec::new()),
        }
    }

    /// Register an endpoint for a user. Duplicate endpoints are ignored.
    pub async fn subscribe(&self, user_id: UserId, subscription: PushSubscription) {
        let mut subs = self.subscriptions.lock().await;
        let entry = subs.entry(user_id).or_default();
        if !entry.iter().any(|s| s.endpoint == subscription.endpoint) {
            entry.push(subscription);
        }
    }

    pub async fn unsubscribe(&self, user_id: &UserId, endpoint: &str) {
        let mut subs = self.subscriptions.lock().await;
        if let Some(entry) = subs.get_mut(user_id) {
            entry.retain(|s| s.endpoint != endpoint);
            if entry.is_empty() {
                subs.remove(user_id);
            }
        }
    }

    pub async fn set_preferences(&self, user_id: UserId, prefs: NotificationPreference) {
        self.preferences.lock().await.insert(user_id, prefs);
    }

    pub async fn subscriptions_for(&self, user_id: &UserId) -> Vec<PushSubscription> {
        self.subscriptions
            .lock()
            .await
            .get(user_id)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn deferred_count(&self) -> usize {
        self.deferred.lock().await.len()
    }

    /// Deliver `payload` to every registered endpoint of `user_id`.
    ///
    /// Preference-gated users get the payload parked in the deferred queue
    /// instead. Endpoints reporting a permanent failure are pruned after
    /// the attempt. A user with zero subscriptions currently gets nothing,
    /// not even a deferred entry.
    pub async fn notify(&self, user_id: &UserId, payload: PushPayload) {
        let prefs = self
            .preferences
            .lock()
            .await
            .get(user_id)
            .cloned()
            .unwrap_or_default();
        if !prefs.push_enabled || prefs.do_not_disturb {
            debug!(user = %user_id, "Push gated by preferences, deferring");
            self.deferred.lock().await.push(QueuedNotification {
                user_id: user_id.clone(),
                payload,
                ts: Utc::now(),
            });
            return;
        }

        let subscriptions = self.subscriptions_for(user_id).await;
        if subscriptions.is_empty() {
            debug!(user = %user_id, "No push subscriptions, dropping payload");
            return;
        }

        // All endpoints attempted concurrently; no lock held across sends.
        let attempts = subscriptions.iter().map(|sub| {
            let payload = &payload;
            async move { (sub.endpoint.clone(), self.sender.send(sub, payload).await) }
        });
        let outcomes = join_all(attempts).await;

        let mut dead: Vec<String> = Vec::new();
        for (endpoint, outcome) in outcomes {
            match outcome {
                PushOutcome::Delivered => {}
                PushOutcome::PermanentFailure => dead.push(endpoint),
                PushOutcome::TransientFailure => {
                    warn!(user = %user_id, endpoint = %endpoint, "Transient push failure");
                }
            }
        }

        if !dead.is_empty() {
            let mut subs = self.subscriptions.lock().await;
            if let Some(entry) = subs.get_mut(user_id) {
                entry.retain(|s| !dead.contains(&s.endpoint));
                if entry.is_empty() {
                    subs.remove(user_id);
                }
            }
            debug!(user = %user_id, pruned = dead.len(), "Pruned dead push endpoints");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Sender that fails permanently for a configured set of endpoints and
    /// counts every attempt.
    struct ScriptedSender {
        dead_endpoints: HashSet<String>,
        transient_endpoints: HashSet<String>,
        attempts: AtomicUsize,
    }

    impl ScriptedSender {
        fn new() -> Self {
            Self {
                dead_endpoints: HashSet::new(),
                transient_endpoints: HashSet::new(),
                attempts: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl PushSender for ScriptedSender {
        async fn send(&self, sub: &PushSubscription, _payload: &PushPayload) -> PushOutcome {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            if self.dead_endpoints.contains(&sub.endpoint) {
                PushOutcome::PermanentFailure
            } else if self.transient_endpoints.contains(&sub.endpoint) {
                PushOutcome::TransientFailure
            } else {
                PushOutcome::Delivered
            }
        }
    }

    fn subscription(endpoint: &str) -> PushSubscription {
        PushSubscription {
            endpoint: endpoint.into(),
            keys: serde_json::Map::new(),
        }
    }

    fn payload() -> PushPayload {
        PushPayload {
            title: "Alice sent a message".into(),
            body: "hi".into(),
            url: "/".into(),
        }
    }

    #[tokio::test]
    async fn test_permanent_failure_prunes_subscription() {
        let mut sender = ScriptedSender::new();
        sender.dead_endpoints.insert("https://push/dead".into());
        let fanout = PushFanout::new(Arc::new(sender));
        let user = UserId::new("u1");

        fanout.subscribe(user.clone(), subscription("https://push/dead")).await;
        fanout.subscribe(user.clone(), subscription("https://push/ok")).await;

        fanout.notify(&user, payload()).await;

        let remaining = fanout.subscriptions_for(&user).await;
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].endpoint, "https://push/ok");
    }

    #[tokio::test]
    async fn test_transient_failure_keeps_subscription() {
        let mut sender = ScriptedSender::new();
        sender.transient_endpoints.insert("https://push/flaky".into());
        let fanout = PushFanout::new(Arc::new(sender));
        let user = UserId::new("u1");

        fanout.subscribe(user.clone(), subscription("https://push/flaky")).await;
        fanout.notify(&user, payload()).await;

        assert_eq!(fanout.subscriptions_for(&user).await.len(), 1);
    }

    #[tokio::test]
    async fn test_preferences_gate_defers_without_delivery() {
        let sender = Arc::new(ScriptedSender::new());
        let fanout = PushFanout::new(sender.clone());
        let user = UserId::new("u1");

        fanout.subscribe(user.clone(), subscription("https://push/ok")).await;
        fanout
            .set_preferences(
                user.clone(),
                NotificationPreference {
                    push_enabled: true,
                    do_not_disturb: true,
                },
            )
            .await;

        fanout.notify(&user, payload()).await;

        assert_eq!(sender.attempts.load(Ordering::SeqCst), 0);
        assert_eq!(fanout.deferred_count().await, 1);
    }

    #[tokio::test]
    async fn test_zero_subscriptions_drops_payload() {
        let fanout = PushFanout::new(Arc::new(ScriptedSender::new()));
        let user = UserId::new("u1");

        fanout.notify(&user, payload()).await;

        // Dropped outright: nothing deferred either.
        assert_eq!(fanout.deferred_count().await, 0);
    }

    #[tokio::test]
    async fn test_duplicate_subscribe_is_ignored() {
        let fanout = PushFanout::new(Arc::new(ScriptedSender::new()));
        let user = UserId::new("u1");

        fanout.subscribe(user.clone(), subscription("https://push/a")).await;
        fanout.subscribe(user.clone(), subscription("https://push/a")).await;

        assert_eq!(fanout.subscriptions_for(&user).await.len(), 1);
    }
}
