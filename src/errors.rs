// src/errors.rs

//! Crate-wide error aliases and helpers.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DirwatchError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// A controller or watcher operation was attempted in a state that does
    /// not permit it (e.g. editing configuration while a watcher runs).
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Unknown daemon: {0}")]
    UnknownDaemon(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("Watch error: {0}")]
    WatchError(#[from] notify::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl DirwatchError {
    pub(crate) fn invalid_op(msg: impl Into<String>) -> Self {
        DirwatchError::InvalidOperation(msg.into())
    }

    pub(crate) fn config(msg: impl Into<String>) -> Self {
        DirwatchError::ConfigError(msg.into())
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, DirwatchError>;
