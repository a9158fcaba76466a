use thiserror::Error;

/// Failures local to a single requesting channel. One user's bad input
/// never touches another user's session or the shared registry.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Authentication rejected")]
    AuthRejected,

    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Failed to persist message: {0}")]
    PersistenceFailed(String),

    #[error("Only the sender can delete a message for everyone")]
    UnauthorizedDelete,

    #[error("Not found: {0}")]
    NotFound(String),
}
