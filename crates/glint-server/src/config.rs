//! Server configuration loaded from environment variables.
//!
//! Every setting has a default so the server starts with zero
//! configuration for local development.

use std::net::SocketAddr;

use glint_shared::constants::DEFAULT_HTTP_PORT;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP/WebSocket (axum) server.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:8080`
    pub http_addr: SocketAddr,

    /// Human-readable name for this server instance.
    /// Env: `INSTANCE_NAME`
    /// Default: `"Glint"`
    pub instance_name: String,

    /// Override for the streak window, in seconds. Intended for staging
    /// environments where waiting 24 hours is impractical.
    /// Env: `STREAK_WINDOW_SECS`
    /// Default: unset (24 hours).
    pub streak_window_secs: Option<u64>,

    /// Development-only user seed for the in-memory directory, formatted
    /// `user:token` pairs separated by commas.
    /// Env: `DEV_USERS`
    /// Default: empty.
    pub dev_users: Vec<(String, String)>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            instance_name: "Glint".to_string(),
            streak_window_secs: None,
            dev_users: Vec::new(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("HTTP_ADDR") {
            if let Ok(parsed) = addr.parse::<SocketAddr>() {
                config.http_addr = parsed;
            } else {
                tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default");
            }
        }

        if let Ok(name) = std::env::var("INSTANCE_NAME") {
            config.instance_name = name;
        }

        if let Ok(val) = std::env::var("STREAK_WINDOW_SECS") {
            match val.parse::<u64>() {
                Ok(secs) if secs > 0 => config.streak_window_secs = Some(secs),
                _ => {
                    tracing::warn!(value = %val, "Invalid STREAK_WINDOW_SECS, ignoring");
                }
            }
        }

        if let Ok(val) = std::env::var("DEV_USERS") {
            config.dev_users = parse_dev_users(&val);
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter.

        config
    }
}

fn parse_dev_users(raw: &str) -> Vec<(String, String)> {
    raw.split(',')
        .filter_map(|pair| {
            let (user, token) = pair.trim().split_once(':')?;
            if user.is_empty() || token.is_empty() {
                return None;
            }
            Some((user.to_string(), token.to_string()))
        })
        .collect()
}
