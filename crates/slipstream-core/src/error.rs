//! Core Error Types
//!
//! Errors shared by every slipstream crate. Crate-specific errors (storage,
//! remote protocol) wrap or extend this enum in their own crates.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("expected {expected} columns in the row, given {given}")]
    InvalidColumnCount { expected: usize, given: usize },
}
