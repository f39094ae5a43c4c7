//! Core types for the offline log storage engine.
//!
//! This module provides:
//! - [`LogLevel`] — DLT log levels in their numeric order (1 = fatal,
//!   6 = verbose; higher is more verbose)
//! - [`StorageId`] — fixed-capacity 4-byte APID/CTID/ECU identifier with
//!   explicit truncation semantics
//! - [`SyncFlags`] — bitmask of cache-flush strategies
//! - [`MessageSpans`] — borrowed view of one framed message
//!   (header / extended header / payload) with field extraction

use std::fmt;

/// Fixed identifier width of APID/CTID/ECU ids.
pub const ID_LEN: usize = 4;

/// Wildcard notation for APID/CTID lists in filter sections.
pub const WILDCARD: &str = ".*";

/// Storage-header magic at the start of every framed message.
pub const STORAGE_MAGIC: [u8; 4] = *b"DLT\x01";

/// Length of the storage header: magic, seconds, microseconds, ECU id.
pub const STORAGE_HEADER_LEN: usize = 16;

/// Byte offset of the ECU id inside the storage header.
const STORAGE_HEADER_ECU_OFFSET: usize = 12;

/// Length of the extended header: MSIN, NOAR, APID, CTID.
pub const EXT_HEADER_LEN: usize = 10;

/// "Use extended header" bit in the standard-header HTYP byte.
pub const HTYP_UEH: u8 = 0x01;

/// "Verbose" bit in the extended-header MSIN byte.
pub const MSIN_VERB: u8 = 0x01;

/// DLT log levels. Numerically higher levels are more verbose; a filter
/// configured at [`LogLevel::Warn`] stores fatal, error and warning
/// messages and drops the rest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LogLevel {
    /// Fatal system errors.
    Fatal = 1,
    /// Errors with impact.
    Error = 2,
    /// Correct behavior cannot be ensured.
    Warn = 3,
    /// High-level information.
    Info = 4,
    /// Detailed debug information.
    Debug = 5,
    /// Highest-grade information.
    Verbose = 6,
}

impl LogLevel {
    /// Parses the configuration-file notation (`DLT_LOG_FATAL` ..
    /// `DLT_LOG_VERBOSE`).
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "DLT_LOG_FATAL" => Some(Self::Fatal),
            "DLT_LOG_ERROR" => Some(Self::Error),
            "DLT_LOG_WARN" => Some(Self::Warn),
            "DLT_LOG_INFO" => Some(Self::Info),
            "DLT_LOG_DEBUG" => Some(Self::Debug),
            "DLT_LOG_VERBOSE" => Some(Self::Verbose),
            _ => None,
        }
    }

    /// Converts the MTIN field of the extended header to a level.
    #[must_use]
    pub fn from_mtin(mtin: u8) -> Option<Self> {
        match mtin {
            1 => Some(Self::Fatal),
            2 => Some(Self::Error),
            3 => Some(Self::Warn),
            4 => Some(Self::Info),
            5 => Some(Self::Debug),
            6 => Some(Self::Verbose),
            _ => None,
        }
    }

    /// Returns the configuration-file notation of this level.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Fatal => "DLT_LOG_FATAL",
            Self::Error => "DLT_LOG_ERROR",
            Self::Warn => "DLT_LOG_WARN",
            Self::Info => "DLT_LOG_INFO",
            Self::Debug => "DLT_LOG_DEBUG",
            Self::Verbose => "DLT_LOG_VERBOSE",
        }
    }
}

/// A fixed-capacity identifier of at most [`ID_LEN`] bytes.
///
/// Overlong input is truncated, never rejected, matching the platform's
/// 4-character ID convention. Trailing NUL padding from wire data is
/// stripped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct StorageId {
    bytes: [u8; ID_LEN],
    len: u8,
}

impl StorageId {
    /// Creates an identifier from a string, truncating to [`ID_LEN`] bytes.
    ///
    /// Truncation happens on a character boundary so the stored value is
    /// always valid UTF-8.
    #[must_use]
    pub fn new(value: &str) -> Self {
        let mut end = value.len().min(ID_LEN);
        while end > 0 && !value.is_char_boundary(end) {
            end -= 1;
        }
        let mut bytes = [0u8; ID_LEN];
        bytes[..end].copy_from_slice(&value.as_bytes()[..end]);
        Self {
            bytes,
            len: end as u8,
        }
    }

    /// Creates an identifier from a 4-byte wire field, stripping NUL
    /// padding. Non-UTF-8 bytes yield an empty identifier.
    #[must_use]
    pub fn from_wire(raw: [u8; ID_LEN]) -> Self {
        let len = raw.iter().position(|&b| b == 0).unwrap_or(ID_LEN);
        match std::str::from_utf8(&raw[..len]) {
            Ok(s) => Self::new(s),
            Err(_) => Self::default(),
        }
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        // Constructors only store a valid UTF-8 prefix.
        std::str::from_utf8(&self.bytes[..self.len as usize]).unwrap_or("")
    }

    /// Returns true for the empty identifier.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl fmt::Display for StorageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for StorageId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Bitmask of sync strategies configured for one filter.
///
/// `ON_MSG` is exclusive of all others; `ON_SPECIFIC_SIZE` and
/// `ON_FILE_SIZE` are mutually exclusive with each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SyncFlags(u8);

impl SyncFlags {
    /// Flush and fsync after every message (direct-to-file).
    pub const ON_MSG: Self = Self(1);
    /// Flush the cache when the daemon exits.
    pub const ON_DAEMON_EXIT: Self = Self(1 << 1);
    /// Flush the cache on an explicit/periodic request.
    pub const ON_DEMAND: Self = Self(1 << 2);
    /// Flush the cache when the storage device disconnects.
    pub const ON_DEVICE_DISCONNECT: Self = Self(1 << 3);
    /// Flush the cache once `SpecificSize` bytes are buffered.
    pub const ON_SPECIFIC_SIZE: Self = Self(1 << 4);
    /// Flush the cache once `FileSize` bytes are buffered.
    pub const ON_FILE_SIZE: Self = Self(1 << 5);

    /// Parses the comma-separated `SyncBehavior` value.
    ///
    /// Returns `None` for unknown keywords or the forbidden combination of
    /// `ON_MSG` with any other strategy.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        let mut flags = Self::default();
        for word in value.split(',') {
            let word = word.trim();
            if word.is_empty() {
                continue;
            }
            flags = flags.with(match word {
                "ON_MSG" => Self::ON_MSG,
                "ON_DAEMON_EXIT" => Self::ON_DAEMON_EXIT,
                "ON_DEMAND" => Self::ON_DEMAND,
                "ON_DEVICE_DISCONNECT" => Self::ON_DEVICE_DISCONNECT,
                "ON_SPECIFIC_SIZE" => Self::ON_SPECIFIC_SIZE,
                "ON_FILE_SIZE" => Self::ON_FILE_SIZE,
                _ => return None,
            });
        }
        if flags.contains(Self::ON_MSG) && flags != Self::ON_MSG {
            return None;
        }
        Some(flags)
    }

    /// Returns the union of both masks.
    #[must_use]
    pub const fn with(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// Returns true if every bit of `other` is set.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns true if no strategy is set.
    #[must_use]
    pub const fn is_unset(self) -> bool {
        self.0 == 0
    }

    /// Returns true if the filter writes through the ring cache rather
    /// than directly to file.
    #[must_use]
    pub const fn is_cached(self) -> bool {
        !self.contains(Self::ON_MSG) && self.0 != 0
    }
}

/// Fields of interest extracted from the extended header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtHeaderInfo {
    /// Verbose bit of the MSIN byte.
    pub verbose: bool,
    /// Log level from the MTIN field, if it names a valid level.
    pub log_level: Option<LogLevel>,
    /// Application id.
    pub apid: StorageId,
    /// Context id.
    pub ctid: StorageId,
}

/// Borrowed view of one framed message as handed in by the daemon:
/// storage header + standard header, the optional extended header, and
/// the payload.
#[derive(Debug, Clone, Copy)]
pub struct MessageSpans<'a> {
    /// Storage header (starts with [`STORAGE_MAGIC`]) followed by the
    /// standard header.
    pub header: &'a [u8],
    /// Extended header bytes; empty for non-verbose messages.
    pub ext_header: &'a [u8],
    /// Raw payload bytes.
    pub payload: &'a [u8],
}

impl<'a> MessageSpans<'a> {
    /// Creates a message view over the three spans.
    #[must_use]
    pub const fn new(header: &'a [u8], ext_header: &'a [u8], payload: &'a [u8]) -> Self {
        Self {
            header,
            ext_header,
            payload,
        }
    }

    /// Total number of bytes across all three spans.
    #[must_use]
    pub const fn total_len(&self) -> usize {
        self.header.len() + self.ext_header.len() + self.payload.len()
    }

    /// Returns true if the standard-header HTYP byte announces an
    /// extended header.
    #[must_use]
    pub fn has_extended_header(&self) -> bool {
        self.header
            .get(STORAGE_HEADER_LEN)
            .is_some_and(|htyp| htyp & HTYP_UEH != 0)
    }

    /// ECU id from the storage header, if the span is long enough.
    #[must_use]
    pub fn ecu_id(&self) -> Option<StorageId> {
        let raw = self
            .header
            .get(STORAGE_HEADER_ECU_OFFSET..STORAGE_HEADER_ECU_OFFSET + ID_LEN)?;
        let mut bytes = [0u8; ID_LEN];
        bytes.copy_from_slice(raw);
        Some(StorageId::from_wire(bytes))
    }

    /// Parses APID/CTID/level from the extended-header span.
    ///
    /// Returns `None` when the header flag is absent or the span is too
    /// short, i.e. for non-verbose messages.
    #[must_use]
    pub fn ext_info(&self) -> Option<ExtHeaderInfo> {
        if !self.has_extended_header() || self.ext_header.len() < EXT_HEADER_LEN {
            return None;
        }
        let msin = self.ext_header[0];
        let mut apid = [0u8; ID_LEN];
        apid.copy_from_slice(&self.ext_header[2..2 + ID_LEN]);
        let mut ctid = [0u8; ID_LEN];
        ctid.copy_from_slice(&self.ext_header[6..6 + ID_LEN]);

        Some(ExtHeaderInfo {
            verbose: msin & MSIN_VERB != 0,
            log_level: LogLevel::from_mtin(msin >> 4),
            apid: StorageId::from_wire(apid),
            ctid: StorageId::from_wire(ctid),
        })
    }
}
