//! # dlt-logstorage
//!
//! Offline log storage for DLT (Diagnostic Log and Trace) messages.
//!
//! This crate provides:
//!
//! - [`LogStorage`] — One storage device: connect, write, sync, disconnect
//! - [`FilterRegistry`] — Key-to-filter lookup built from `dlt_logstorage.conf`
//! - [`FilterConfig`] — One storage policy: matching rules and output limits
//! - [`SyncFlags`] — Sync strategies from write-through to cached batching
//! - [`RingCache`] — Ring buffer batching messages between flushes
//! - [`MessageSpans`] — Borrowed view of one framed DLT message
//! - [`LogLevelObserver`] — Log-level reconciliation hook for the daemon
//!
//! ## Example
//!
//! ```rust,no_run
//! use dlt_logstorage::{LogStorage, MessageSpans, SyncFlags};
//!
//! # fn demo(header: &[u8], ext: &[u8], payload: &[u8]) -> dlt_logstorage::Result<()> {
//! let mut device = LogStorage::new(1, "/mnt/usb0");
//! device.connect()?;
//!
//! let msg = MessageSpans::new(header, ext, payload);
//! device.write(&msg)?;
//!
//! device.disconnect(SyncFlags::ON_DEVICE_DISCONNECT)?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cache;
pub mod engine;
pub mod error;
pub mod filter;
pub mod keys;
pub mod registry;
pub mod rotation;
pub mod strategy;
pub mod types;

// Re-export main types
pub use cache::{CacheBudget, CacheFooter, RingCache};
pub use engine::{
    LogLevelObserver, LogStorage, StorageOptions, CONFIG_FILE_NAME, MAX_CONSECUTIVE_WRITE_ERRORS,
};
pub use error::{Result, StorageError};
pub use filter::{FilterConfig, FilterKind};
pub use keys::{build_keys, candidate_keys, split_key, ParsedKey};
pub use registry::{FilterRegistry, LoadStatus, SharedConfig};
pub use rotation::{FileNameRules, RotationRecord};
pub use types::{ExtHeaderInfo, LogLevel, MessageSpans, StorageId, SyncFlags};
