//! Streak engine: per-pair time-windowed activity state machine.
//!
//! A streak only becomes active once *both* sides have snapped within the
//! 24-hour window; from then on every renewal inside the window grows the
//! count, and a renewal after a lapse restarts it at one. Transport-free:
//! the engine consumes renewal events and answers queries, nothing else.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::debug;

use glint_shared::constants::{FREE_RESTORES, STREAK_WINDOW};
use glint_shared::types::UserId;

/// State for one unordered pair. Never deleted once created.
///
/// `last_activity` is a single shared timestamp (last writer wins across
/// both participants); `last_activity_by` tracks each side separately.
/// Both are kept: the shared timestamp drives the renew/lapse branches,
/// the per-user map drives activation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreakState {
    pub streak_count: u32,
    pub last_activity: Option<DateTime<Utc>>,
    pub last_activity_by: HashMap<UserId, DateTime<Utc>>,
    pub activated_at: Option<DateTime<Utc>>,
    pub restores_used: u32,
    pub premium_unlimited: bool,
}

impl StreakState {
    fn new() -> Self {
        Self {
            streak_count: 0,
            last_activity: None,
            last_activity_by: HashMap::new(),
            activated_at: None,
            restores_used: 0,
            premium_unlimited: false,
        }
    }
}

/// Restore budget for one pair.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreInfo {
    pub used: u32,
    pub remaining: u32,
    pub premium_unlimited: bool,
}

pub struct StreakEngine {
    streaks: Mutex<HashMap<String, StreakState>>,
    window: Duration,
}

impl StreakEngine {
    pub fn new() -> Self {
        Self::with_window(Duration::from_std(STREAK_WINDOW).unwrap_or(Duration::hours(24)))
    }

    pub fn with_window(window: Duration) -> Self {
        Self {
            streaks: Mutex::new(HashMap::new()),
            window,
        }
    }

    /// Unordered pair key: the same two users always resolve to the same
    /// entry regardless of who acts.
    fn pair_key(a: &UserId, b: &UserId) -> String {
        let (lo, hi) = if a.0 <= b.0 { (a, b) } else { (b, a) };
        format!("{}:{}", lo.0, hi.0)
    }

    /// Record a qualifying activity by `acting` toward `other`.
    pub async fn renew(&self, acting: &UserId, other: &UserId) -> StreakState {
        self.renew_at(acting, other, Utc::now()).await
    }

    pub async fn renew_at(
        &self,
        acting: &UserId,
        other: &UserId,
        now: DateTime<Utc>,
    ) -> StreakState {
        let key = Self::pair_key(acting, other);
        let mut streaks = self.streaks.lock().await;
        let state = streaks.entry(key).or_insert_with(StreakState::new);

        state.last_activity_by.insert(acting.clone(), now);

        // Activation requires both sides inside the window.
        if state.activated_at.is_none() {
            let cutoff = now - self.window;
            let acting_in = state
                .last_activity_by
                .get(acting)
                .is_some_and(|t| *t > cutoff);
            let other_in = state
                .last_activity_by
                .get(other)
                .is_some_and(|t| *t > cutoff);
            if acting_in && other_in {
                state.activated_at = Some(now);
                debug!(acting = %acting, other = %other, "Streak activated");
            }
        }

        match (state.activated_at, state.last_activity) {
            (Some(_), Some(last)) if now - last <= self.window => {
                state.streak_count += 1;
            }
            (Some(_), _) => {
                // Lapsed (or activated with no shared timestamp yet): this
                // event begins a fresh count of one.
                state.streak_count = 1;
            }
            (None, None) => {
                // Very first activity ever recorded for the pair.
                state.streak_count = 1;
            }
            (None, Some(_)) => {
                // Pending activation with prior activity: the count is
                // deliberately left unchanged. Observed behavior of the
                // reference system, asserted by tests; do not "fix".
            }
        }

        state.last_activity = Some(now);
        state.clone()
    }

    /// Whether the pair still has a restore available.
    pub async fn can_restore(&self, a: &UserId, b: &UserId) -> bool {
        let info = self.restore_info(a, b).await;
        info.premium_unlimited || info.used < FREE_RESTORES
    }

    pub async fn restore_info(&self, a: &UserId, b: &UserId) -> RestoreInfo {
        let streaks = self.streaks.lock().await;
        let (used, premium) = streaks
            .get(&Self::pair_key(a, b))
            .map(|s| (s.restores_used, s.premium_unlimited))
            .unwrap_or((0, false));
        RestoreInfo {
            used,
            remaining: FREE_RESTORES.saturating_sub(used),
            premium_unlimited: premium,
        }
    }

    /// Spend a restore: extends the window without touching the count.
    /// A paid restore upgrades the pair to unlimited instead of consuming
    /// from the free budget. The free counter is never replenished.
    pub async fn use_restore(&self, a: &UserId, b: &UserId, paid: bool) -> StreakState {
        self.use_restore_at(a, b, paid, Utc::now()).await
    }

    pub async fn use_restore_at(
        &self,
        a: &UserId,
        b: &UserId,
        paid: bool,
        now: DateTime<Utc>,
    ) -> StreakState {
        let key = Self::pair_key(a, b);
        let mut streaks = self.streaks.lock().await;
        let state = streaks.entry(key).or_insert_with(StreakState::new);
        if paid {
            state.premium_unlimited = true;
        } else {
            state.restores_used += 1;
        }
        state.last_activity = Some(now);
        state.clone()
    }

    pub async fn is_active(&self, a: &UserId, b: &UserId) -> bool {
        self.is_active_at(a, b, Utc::now()).await
    }

    pub async fn is_active_at(&self, a: &UserId, b: &UserId, now: DateTime<Utc>) -> bool {
        let streaks = self.streaks.lock().await;
        streaks
            .get(&Self::pair_key(a, b))
            .and_then(|s| s.last_activity)
            .is_some_and(|last| now - last <= self.window)
    }

    /// Time left before the streak lapses, clamped at zero. `None` when the
    /// pair has never had any activity.
    pub async fn time_until_expiry(&self, a: &UserId, b: &UserId) -> Option<Duration> {
        self.time_until_expiry_at(a, b, Utc::now()).await
    }

    pub async fn time_until_expiry_at(
        &self,
        a: &UserId,
        b: &UserId,
        now: DateTime<Utc>,
    ) -> Option<Duration> {
        let streaks = self.streaks.lock().await;
        let last = streaks.get(&Self::pair_key(a, b))?.last_activity?;
        let left = last + self.window - now;
        Some(left.max(Duration::zero()))
    }

    /// Display percentage of window remaining: 100 for a fresh or untouched
    /// streak, 0 once expired.
    pub async fn flame_health(&self, a: &UserId, b: &UserId) -> u32 {
        self.flame_health_at(a, b, Utc::now()).await
    }

    pub async fn flame_health_at(&self, a: &UserId, b: &UserId, now: DateTime<Utc>) -> u32 {
        match self.time_until_expiry_at(a, b, now).await {
            None => 100,
            Some(left) => {
                let ratio = left.num_milliseconds() as f64 / self.window.num_milliseconds() as f64;
                (ratio * 100.0).round().clamp(0.0, 100.0) as u32
            }
        }
    }

    /// Current state snapshot for a pair (default state if never touched).
    pub async fn snapshot(&self, a: &UserId, b: &UserId) -> StreakState {
        let streaks = self.streaks.lock().await;
        streaks
            .get(&Self::pair_key(a, b))
            .cloned()
            .unwrap_or_else(StreakState::new)
    }
}

impl Default for StreakEngine {
    fn default() -> Self {
        Self::new()
    }
}
