//! Error types for slate-core

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SlateError {
    #[error("invalid request: {0}")]
    Validation(#[from] ValidationError),

    #[error("spawn error: {0}")]
    Spawn(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("nix error: {0}")]
    Nix(#[from] nix::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

impl SlateError {
    /// Whether the failure points at the caller's request rather than the host
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}

/// Rejections raised before any execution unit exists
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("code is {len} bytes, limit is {max}")]
    CodeTooLarge { len: usize, max: usize },

    #[error("stdin is {len} bytes, limit is {max}")]
    StdinTooLarge { len: usize, max: usize },

    #[error("{count} attached files, limit is {max}")]
    TooManyFiles { count: usize, max: usize },

    #[error("attached files total {total} bytes, limit is {max}")]
    AttachedFilesTooLarge { total: usize, max: usize },

    #[error("invalid attached file name {0:?}")]
    InvalidFileName(String),

    #[error("attached file {0:?} appears more than once")]
    DuplicateFileName(String),

    #[error("attached file name {0:?} is reserved")]
    ReservedFileName(String),

    #[error("session id must not be empty")]
    EmptySessionId,
}
