//! Error types for the store, control host, mirror and configuration.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store: io error - {0}")]
    Io(#[from] std::io::Error),

    #[error("store: serialization error - {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("store: unavailable - {0}")]
    Unavailable(String),
}

#[derive(Debug, Error)]
pub enum ControlError {
    #[error("control: no such control {0}")]
    NotFound(String),

    #[error("control: {0} is no longer attached to the document")]
    Detached(String),

    #[error("control: host failure - {0}")]
    Host(String),
}

#[derive(Debug, Error)]
pub enum MirrorError {
    #[error("mirror: transport error - {0}")]
    Transport(#[from] reqwest::Error),

    #[error("mirror: rejected with status {0}")]
    Rejected(u16),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config: cannot read {path} - {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("config: invalid json - {0}")]
    Parse(#[from] serde_json::Error),

    #[error("config: {0}")]
    Invalid(String),
}

/// Returned by actor handles once the actor task has exited.
#[derive(Debug, Error)]
#[error("{0} is not running")]
pub struct Stopped(pub &'static str);
