//! # glint-server
//!
//! Realtime communication core for the Glint messaging app.
//!
//! This binary provides:
//! - **Connection hub**: the live mapping from authenticated user to
//!   WebSocket channel, one lightweight task per connection
//! - **Message router**: persistence, delivery acks, live forwarding, and
//!   push fan-out for offline recipients
//! - **Streak engine**: the time-windowed mutual-activity state machine
//!   behind snap streaks
//! - **Signaling relay**: stateless pass-through for call setup payloads
//! - **REST API** (axum) for streak status/restores, push subscription
//!   management, and conversation history
//!
//! User storage, auth issuance, billing, and media upload are external
//! collaborators; the core consumes them through the directory seam.

mod api;
mod config;
mod directory;
mod error;
mod hub;
mod notify;
mod router;
mod signaling;
mod streaks;
mod ws;

use std::sync::Arc;

use chrono::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

use glint_shared::types::UserId;
use glint_store::{ConversationLog, MemoryLog};

use crate::api::AppState;
use crate::config::ServerConfig;
use crate::directory::{Directory, MemoryDirectory};
use crate::hub::ConnectionHub;
use crate::notify::{LoggingPushSender, PushFanout};
use crate::router::MessageRouter;
use crate::signaling::SignalingRelay;
use crate::streaks::StreakEngine;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,glint_server=debug")),
        )
        .init();

    info!("Starting Glint realtime server v{}", env!("CARGO_PKG_VERSION"));

    let config = ServerConfig::from_env();
    info!(
        instance = %config.instance_name,
        addr = %config.http_addr,
        "Loaded configuration"
    );

    // Directory is an external collaborator in production; the in-memory
    // implementation serves development, seeded from DEV_USERS.
    let directory = Arc::new(MemoryDirectory::new());
    for (user, token) in &config.dev_users {
        directory
            .register_user(UserId::new(user.clone()), user, token)
            .await;
    }
    if !config.dev_users.is_empty() {
        info!(count = config.dev_users.len(), "Seeded development users");
    }
    let directory: Arc<dyn Directory> = directory;

    let hub = Arc::new(ConnectionHub::new());
    let log: Arc<dyn ConversationLog> = Arc::new(MemoryLog::new());
    let streaks = Arc::new(match config.streak_window_secs {
        Some(secs) => StreakEngine::with_window(Duration::seconds(secs as i64)),
        None => StreakEngine::new(),
    });
    let fanout = Arc::new(PushFanout::new(Arc::new(LoggingPushSender)));
    let signaling = Arc::new(SignalingRelay::new(hub.clone()));
    let router = Arc::new(MessageRouter::new(
        hub.clone(),
        log.clone(),
        directory.clone(),
        streaks.clone(),
        fanout.clone(),
    ));

    let state = AppState {
        hub,
        log,
        directory,
        streaks,
        fanout,
        router,
        signaling,
        config: Arc::new(config.clone()),
    };

    tokio::select! {
        result = api::serve(state, config.http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
