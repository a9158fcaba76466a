use std::time::Duration;

/// Application name
pub const APP_NAME: &str = "Glint";

/// Streak activity window: a pair's streak survives as long as the gap
/// between qualifying activities stays within this duration.
pub const STREAK_WINDOW: Duration = Duration::from_secs(24 * 60 * 60);

/// Free streak restores per pair. Never replenished.
pub const FREE_RESTORES: u32 = 3;

/// Maximum characters of message text carried in a push preview
pub const PUSH_PREVIEW_LEN: usize = 120;

/// Default HTTP/WebSocket port (server)
pub const DEFAULT_HTTP_PORT: u16 = 8080;
