//! Error types for the offline log storage engine.

use thiserror::Error;

/// Errors that can occur in the storage engine.
#[derive(Debug, Error)]
pub enum StorageError {
    /// A null/invalid argument was passed; always checked first.
    #[error("invalid parameter: {0}")]
    WrongParameter(&'static str),

    /// A textual filter key could not be parsed.
    #[error("invalid filter key: {0}")]
    InvalidKey(String),

    /// A filter section is malformed; the section is skipped on load.
    #[error("invalid filter configuration: {0}")]
    ConfigInvalid(String),

    /// A rotation file could not be opened or created.
    #[error("no space for rotation file: {0}")]
    NoSpace(String),

    /// The global cache-memory ceiling is reached; allocation refused.
    #[error("cache budget exhausted: requested {requested} bytes, {available} available")]
    CacheOverCommitted {
        /// Bytes the allocation asked for.
        requested: usize,
        /// Bytes left under the ceiling.
        available: usize,
    },

    /// A single message is larger than the whole ring cache.
    #[error("message of {msg_size} bytes does not fit cache of {cache_size} bytes")]
    CacheTooSmall {
        /// Size of the rejected message.
        msg_size: usize,
        /// Configured cache capacity.
        cache_size: usize,
    },

    /// A file write failed or wrote fewer bytes than requested.
    #[error("write failure: {0}")]
    WriteFailure(String),

    /// The per-device write-error threshold was exceeded; the engine has
    /// disconnected the device itself.
    #[error("device disabled after {0} consecutive write errors")]
    DeviceDisabled(u32),

    /// The device is not connected or not configured.
    #[error("storage device not ready: {0}")]
    NotConnected(&'static str),

    /// The device configuration file could not be parsed.
    #[error("configuration error: {0}")]
    Config(#[from] dlt_config::ConfigError),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;
