//! Ini-style configuration file reader.
//!
//! Parses the flat `[section]` / `key = value` format used by the storage
//! device configuration (`dlt_logstorage.conf`) into an ordered, read-only
//! section list with `(section, key) -> value` lookups.
//!
//! Lines starting with `#` or `;` are comments; inline comments after a
//! value are stripped. Section and key order is preserved so callers can
//! iterate sections in file order.

#![forbid(unsafe_code)]

use std::fs;
use std::path::Path;

use thiserror::Error;
use tracing::warn;

/// Longest accepted line; longer lines are rejected as malformed.
pub const MAX_LINE_LEN: usize = 1024;

/// Errors produced while loading a configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A line did not match the section or key/value grammar.
    #[error("malformed line {line}: {content}")]
    MalformedLine {
        /// 1-based line number.
        line: usize,
        /// The offending line content.
        content: String,
    },

    /// A key/value pair appeared before any section header.
    #[error("key/value pair outside of a section at line {0}")]
    KeyOutsideSection(usize),
}

/// Result type alias for configuration loading.
pub type Result<T> = std::result::Result<T, ConfigError>;

/// One `[section]` with its key/value pairs in file order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    name: String,
    entries: Vec<(String, String)>,
}

impl Section {
    /// Returns the section name without brackets.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Looks up a key in this section.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Iterates the key/value pairs in file order.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Returns the number of keys in this section.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the section holds no keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A parsed configuration file: ordered sections with ordered keys.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigFile {
    sections: Vec<Section>,
}

impl ConfigFile {
    /// Loads and parses a configuration file from disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or contains a line that
    /// matches neither the section nor the key/value grammar. Duplicate
    /// sections or keys are not an error; the first occurrence wins on
    /// lookup and duplicates are logged.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parses configuration content from a string.
    ///
    /// # Errors
    ///
    /// Same conditions as [`ConfigFile::load`].
    pub fn parse(content: &str) -> Result<Self> {
        let mut sections: Vec<Section> = Vec::new();

        for (idx, raw) in content.lines().enumerate() {
            let line_no = idx + 1;
            let line = raw.trim();

            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }
            if line.len() > MAX_LINE_LEN {
                return Err(ConfigError::MalformedLine {
                    line: line_no,
                    content: format!("line exceeds {MAX_LINE_LEN} bytes"),
                });
            }

            if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
                let name = name.trim();
                if name.is_empty() {
                    return Err(ConfigError::MalformedLine {
                        line: line_no,
                        content: raw.to_string(),
                    });
                }
                if sections.iter().any(|s| s.name == name) {
                    warn!(section = name, line = line_no, "duplicate section");
                }
                sections.push(Section {
                    name: name.to_string(),
                    entries: Vec::new(),
                });
                continue;
            }

            let Some((key, value)) = line.split_once('=') else {
                return Err(ConfigError::MalformedLine {
                    line: line_no,
                    content: raw.to_string(),
                });
            };
            let key = key.trim();
            let value = strip_inline_comment(value).trim();
            if key.is_empty() {
                return Err(ConfigError::MalformedLine {
                    line: line_no,
                    content: raw.to_string(),
                });
            }

            let Some(section) = sections.last_mut() else {
                return Err(ConfigError::KeyOutsideSection(line_no));
            };
            if section.get(key).is_some() {
                warn!(
                    section = section.name.as_str(),
                    key,
                    line = line_no,
                    "duplicate key ignored"
                );
                continue;
            }
            section.entries.push((key.to_string(), value.to_string()));
        }

        Ok(Self { sections })
    }

    /// Looks up a value by section and key.
    #[must_use]
    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.section(section).and_then(|s| s.get(key))
    }

    /// Returns a section by name.
    #[must_use]
    pub fn section(&self, name: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.name == name)
    }

    /// Iterates sections in file order.
    pub fn sections(&self) -> impl Iterator<Item = &Section> {
        self.sections.iter()
    }

    /// Returns the number of sections.
    #[must_use]
    pub fn num_sections(&self) -> usize {
        self.sections.len()
    }
}

/// Cuts off an inline `#` or `;` comment.
fn strip_inline_comment(value: &str) -> &str {
    match value.find(['#', ';']) {
        Some(pos) => &value[..pos],
        None => value,
    }
}
