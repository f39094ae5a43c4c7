//! Filter registry: the key-to-config lookup table built from one
//! `dlt_logstorage.conf`.
//!
//! Every filter section yields one shared [`FilterConfig`] registered
//! under all key variants its id lists expand to. Malformed sections are
//! skipped with a warning so one bad filter does not take the whole
//! device down.

use std::sync::Arc;

use dlt_config::ConfigFile;
use parking_lot::Mutex;
use tracing::{info, warn};

use crate::error::{Result, StorageError};
use crate::filter::{FilterConfig, FilterKind};
use crate::keys::build_keys;

/// A filter config shared between all keys it is registered under.
pub type SharedConfig = Arc<Mutex<FilterConfig>>;

/// Outcome of loading a config file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStatus {
    /// Every filter section was accepted.
    Complete,
    /// At least one section was skipped; the rest is active.
    Partial,
}

/// Section name of device-wide options.
const GENERAL_SECTION: &str = "GENERAL";

/// General-section option keeping context log levels raised after
/// disconnect.
const MAINTAIN_LOG_LEVEL_KEY: &str = "MaintainLogstorageLogLevel";

#[derive(Debug)]
struct Entry {
    keys: Vec<String>,
    config: SharedConfig,
}

/// Lookup table from filter keys to shared filter configs.
#[derive(Debug, Default)]
pub struct FilterRegistry {
    entries: Vec<Entry>,
    /// When set, context log levels raised for storage stay raised
    /// after the device disconnects.
    pub maintain_log_level: bool,
}

impl FilterRegistry {
    /// Builds the registry from a parsed config file.
    ///
    /// Filter sections that fail validation are logged and skipped,
    /// reflected in the returned [`LoadStatus`]. A file that yields no
    /// filter at all is an error.
    pub fn load(file: &ConfigFile) -> Result<(Self, LoadStatus)> {
        let mut registry = Self::default();
        let mut status = LoadStatus::Complete;

        for section in file.sections() {
            let name = section.name();
            if name == GENERAL_SECTION {
                registry.maintain_log_level = section
                    .get(MAINTAIN_LOG_LEVEL_KEY)
                    .is_some_and(|v| v.eq_ignore_ascii_case("ON") || v == "1");
                continue;
            }
            let Some(kind) = classify_section(name) else {
                warn!(section = name, "skipping unrecognized section");
                status = LoadStatus::Partial;
                continue;
            };
            match registry.add_section(section, kind) {
                Ok(()) => {}
                Err(e) => {
                    warn!(section = name, error = %e, "skipping invalid filter section");
                    status = LoadStatus::Partial;
                }
            }
        }

        // A device without a single usable filter is not configured;
        // connecting it would silently store nothing.
        if registry.entries.is_empty() {
            return Err(StorageError::ConfigInvalid(
                "configuration contains no usable filter section".into(),
            ));
        }

        info!(
            filters = registry.entries.len(),
            maintain_log_level = registry.maintain_log_level,
            "filter registry loaded"
        );
        Ok((registry, status))
    }

    fn add_section(&mut self, section: &dlt_config::Section, kind: FilterKind) -> Result<()> {
        let config = FilterConfig::from_section(section, kind)?;
        let keys = build_keys(&config.apids, &config.ctids, config.ecu_id.as_ref())?;
        self.entries.push(Entry {
            keys,
            config: Arc::new(Mutex::new(config)),
        });
        Ok(())
    }

    /// All configs registered under `key`.
    pub fn find(&self, key: &str) -> impl Iterator<Item = &SharedConfig> {
        self.entries
            .iter()
            .filter(move |entry| entry.keys.iter().any(|k| k == key))
            .map(|entry| &entry.config)
    }

    /// All configs, each exactly once.
    pub fn configs(&self) -> impl Iterator<Item = &SharedConfig> {
        self.entries.iter().map(|entry| &entry.config)
    }

    /// Every registered key paired with its config; a config shared by
    /// several keys appears once per key.
    pub fn keyed_configs(&self) -> impl Iterator<Item = (&str, &SharedConfig)> {
        self.entries
            .iter()
            .flat_map(|entry| entry.keys.iter().map(move |k| (k.as_str(), &entry.config)))
    }

    /// Number of registered filters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no filter was accepted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Maps a section name to the filter flavor it declares, or `None` for
/// names outside the grammar.
fn classify_section(name: &str) -> Option<FilterKind> {
    let numbered = |prefix: &str| -> bool {
        name.strip_prefix(prefix)
            .is_some_and(|rest| !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit()))
    };
    if numbered("FILTER") {
        Some(FilterKind::Verbose)
    } else if numbered("NON-VERBOSE-STORAGE-FILTER") || numbered("NON-VERBOSE-LOGSTORAGE-FILTER") {
        Some(FilterKind::NonVerbose)
    } else {
        None
    }
}
