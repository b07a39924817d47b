//! Shared types for natsmq

pub mod error;

pub use error::{NatsmqError, Result};
