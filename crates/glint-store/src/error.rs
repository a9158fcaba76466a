use thiserror::Error;

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Message not found")]
    NotFound,

    #[error("Log poisoned: {0}")]
    Poisoned(String),

    #[error("Backend error: {0}")]
    Backend(String),
}
