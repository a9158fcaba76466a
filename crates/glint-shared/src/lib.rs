//! # glint-shared
//!
//! Wire protocol frames, identifiers, and domain models shared between the
//! Glint realtime server and anything that speaks its protocol.

pub mod constants;
pub mod protocol;
pub mod types;

mod error;

pub use error::CoreError;
