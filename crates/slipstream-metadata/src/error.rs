//! Metadata Error Types

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("slice not found: {0}")]
    SliceNotFound(String),
}
