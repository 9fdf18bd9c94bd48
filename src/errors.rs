//! Typed error hierarchy for opsboard.
//!
//! One enum per subsystem:
//! - `FetchError`: coalesced cache fetch failures (cloneable, shared by every waiter)
//! - `ProducerError`: external CLI / filesystem data producers
//! - `WatchError`: filesystem watcher setup
//! - `SinkError`: writes to a connected client stream
//! - `TransportError`: client-side event stream transport
//! - `ConfigError`: loading and saving `opsboard.toml`

use std::sync::Arc;

use thiserror::Error;

/// Failure of a coalesced fetch.
///
/// Every caller waiting on the same in-flight key receives a clone of the
/// same error, so the underlying error is reference counted.
#[derive(Debug, Clone, Error)]
#[error("{0:#}")]
pub struct FetchError(Arc<anyhow::Error>);

impl FetchError {
    pub fn new(err: anyhow::Error) -> Self {
        Self(Arc::new(err))
    }
}

impl From<anyhow::Error> for FetchError {
    fn from(err: anyhow::Error) -> Self {
        Self::new(err)
    }
}

impl From<ProducerError> for FetchError {
    fn from(err: ProducerError) -> Self {
        Self::new(err.into())
    }
}

/// Errors from the external data producers (bd, tmux, run log, PRD).
#[derive(Debug, Error)]
pub enum ProducerError {
    #[error("Failed to spawn `{cmd}`: {source}")]
    SpawnFailed {
        cmd: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{cmd}` exited with {status}: {stderr}")]
    CommandFailed {
        cmd: String,
        status: String,
        stderr: String,
    },

    #[error("`{cmd}` timed out after {after_ms}ms")]
    TimedOut { cmd: String, after_ms: u64 },

    #[error("Failed to read {path}: {source}")]
    ReadFailed {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {what}: {source}")]
    ParseFailed {
        what: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Cached fetch failed: {0}")]
    Fetch(#[from] FetchError),
}

/// Errors from filesystem watcher setup.
#[derive(Debug, Error)]
pub enum WatchError {
    #[error("Failed to create watcher: {0}")]
    WatcherCreation(#[from] notify::Error),

    #[error("Failed to watch path {path}: {source}")]
    WatchPath {
        path: std::path::PathBuf,
        #[source]
        source: notify::Error,
    },

    #[error("Watch directory does not exist: {0}")]
    MissingDirectory(std::path::PathBuf),
}

impl WatchError {
    /// True when the failure only means the path is not there (yet).
    pub fn is_not_found(&self) -> bool {
        match self {
            WatchError::MissingDirectory(_) => true,
            WatchError::WatcherCreation(e) | WatchError::WatchPath { source: e, .. } => {
                is_not_found(e)
            }
        }
    }
}

/// True for notify errors that only mean "path not found".
pub fn is_not_found(err: &notify::Error) -> bool {
    match &err.kind {
        notify::ErrorKind::PathNotFound => true,
        notify::ErrorKind::Io(io) => io.kind() == std::io::ErrorKind::NotFound,
        _ => false,
    }
}

/// A write to a connected client failed. The client is considered gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SinkError {
    #[error("client stream closed")]
    Closed,

    #[error("client stream buffer full")]
    Full,
}

/// Errors from the client-side event stream transport.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Event stream returned status {status}")]
    Status { status: u16 },
}

/// Errors from loading, layering or saving configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid value '{value}' for {var}: {reason}")]
    InvalidEnv {
        var: String,
        value: String,
        reason: String,
    },

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Failed to write config file {path}: {source}")]
    Write {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
}
