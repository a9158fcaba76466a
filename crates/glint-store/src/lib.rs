//! # glint-store
//!
//! The conversation log: an append-only store of messages keyed by a
//! deterministic conversation key. The [`ConversationLog`] trait is the
//! seam for swapping the backend; [`MemoryLog`] is the in-process
//! implementation used by the single-process server.

pub mod log;

mod error;

pub use error::StoreError;
pub use log::{ConversationLog, MemoryLog};
