//! Filter configuration parsed from one `[FILTER...]` section.

use dlt_config::Section;
use tracing::warn;

use crate::cache::RingCache;
use crate::error::{Result, StorageError};
use crate::rotation::RotationState;
use crate::strategy::WriteStrategy;
use crate::types::{LogLevel, StorageId, SyncFlags};

/// Flavor of a filter section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterKind {
    /// Regular `[FILTER<n>]` section for verbose messages.
    Verbose,
    /// `[NON-VERBOSE-...-FILTER<n>]` section; matches on ECU only and
    /// skips the log-level check.
    NonVerbose,
}

/// One storage policy: the matching rules and output parameters of a
/// filter section, plus the runtime state built up while writing.
#[derive(Debug)]
pub struct FilterConfig {
    /// Comma-separated application ids, `.*` for any.
    pub apids: String,
    /// Comma-separated context ids, `.*` for any.
    pub ctids: String,
    /// Application ids vetoed even when the filter matches.
    pub excluded_apids: Vec<StorageId>,
    /// Context ids vetoed even when the filter matches.
    pub excluded_ctids: Vec<StorageId>,
    /// Optional ECU restriction.
    pub ecu_id: Option<StorageId>,
    /// Messages above this level are not stored.
    pub log_level: LogLevel,
    /// Level to restore on the matched contexts at disconnect.
    pub reset_log_level: Option<LogLevel>,
    /// Base name of the rotation files.
    pub file_name: String,
    /// Size limit of one rotation file in bytes.
    pub file_size: u64,
    /// Number of rotation files retained.
    pub num_files: usize,
    /// Sync strategy bitmask.
    pub sync: SyncFlags,
    /// Cache flush threshold for `ON_SPECIFIC_SIZE`.
    pub specific_size: u64,
    /// Whether rotation files are gzip-compressed.
    pub gzip: bool,
    /// Section flavor this config came from.
    pub kind: FilterKind,

    pub(crate) strategy: WriteStrategy,
    pub(crate) rotation: RotationState,
    pub(crate) cache: Option<RingCache>,
}

impl FilterConfig {
    /// Parses a filter section.
    ///
    /// Required options are `File`, `FileSize` and `NOFiles`; verbose
    /// sections additionally require `LogAppName`, `ContextName` and
    /// `LogLevel`. Unknown options make the section invalid.
    pub fn from_section(section: &Section, kind: FilterKind) -> Result<Self> {
        let mut apids = None;
        let mut ctids = None;
        let mut excluded_apids = Vec::new();
        let mut excluded_ctids = Vec::new();
        let mut ecu_id = None;
        let mut log_level = None;
        let mut reset_log_level = None;
        let mut file_name = None;
        let mut file_size = None;
        let mut num_files = None;
        let mut sync = SyncFlags::default();
        let mut specific_size = 0u64;
        let mut gzip = false;

        for (key, value) in section.entries() {
            match key {
                "LogAppName" => apids = Some(value.to_string()),
                "ContextName" => ctids = Some(value.to_string()),
                "ExcludedLogAppName" => excluded_apids = id_list(value),
                "ExcludedContextName" => excluded_ctids = id_list(value),
                "EcuID" => ecu_id = Some(StorageId::new(value)),
                "LogLevel" => {
                    log_level = Some(LogLevel::parse(value).ok_or_else(|| {
                        StorageError::ConfigInvalid(format!("bad LogLevel '{value}'"))
                    })?);
                }
                "ResetLogLevel" => {
                    reset_log_level = Some(LogLevel::parse(value).ok_or_else(|| {
                        StorageError::ConfigInvalid(format!("bad ResetLogLevel '{value}'"))
                    })?);
                }
                "File" => file_name = Some(checked_file_name(value)?),
                "FileSize" => file_size = Some(positive_number(key, value)?),
                "NOFiles" => num_files = Some(positive_number(key, value)? as usize),
                "SpecificSize" => specific_size = number(key, value)?,
                "SyncBehavior" => {
                    sync = SyncFlags::parse(value).ok_or_else(|| {
                        StorageError::ConfigInvalid(format!("bad SyncBehavior '{value}'"))
                    })?;
                }
                "GzipCompression" => gzip = on_off(key, value)?,
                _ => {
                    return Err(StorageError::ConfigInvalid(format!(
                        "unknown option '{key}' in section [{}]",
                        section.name()
                    )));
                }
            }
        }

        let (apids, ctids, log_level) = match kind {
            FilterKind::Verbose => (
                apids.ok_or(StorageError::ConfigInvalid("LogAppName missing".into()))?,
                ctids.ok_or(StorageError::ConfigInvalid("ContextName missing".into()))?,
                log_level.ok_or(StorageError::ConfigInvalid("LogLevel missing".into()))?,
            ),
            // Non-verbose messages carry no ids and no level.
            FilterKind::NonVerbose => (
                apids.unwrap_or_else(|| crate::types::WILDCARD.to_string()),
                ctids.unwrap_or_else(|| crate::types::WILDCARD.to_string()),
                log_level.unwrap_or(LogLevel::Verbose),
            ),
        };

        let sync = if sync.is_unset() {
            SyncFlags::ON_MSG
        } else {
            sync
        };
        if sync.contains(SyncFlags::ON_SPECIFIC_SIZE) && specific_size == 0 {
            return Err(StorageError::ConfigInvalid(
                "ON_SPECIFIC_SIZE requires SpecificSize > 0".into(),
            ));
        }

        Ok(Self {
            apids,
            ctids,
            excluded_apids,
            excluded_ctids,
            ecu_id,
            log_level,
            reset_log_level,
            file_name: file_name.ok_or(StorageError::ConfigInvalid("File missing".into()))?,
            file_size: file_size.ok_or(StorageError::ConfigInvalid("FileSize missing".into()))?,
            num_files: num_files.ok_or(StorageError::ConfigInvalid("NOFiles missing".into()))?,
            strategy: WriteStrategy::for_flags(sync),
            sync,
            specific_size,
            gzip,
            kind,
            rotation: RotationState::default(),
            cache: None,
        })
    }

    /// True when a message of this level passes the filter's threshold.
    #[must_use]
    pub fn matches_level(&self, level: LogLevel) -> bool {
        level <= self.log_level
    }

    /// Exclusion veto. With both lists configured a message is vetoed
    /// only when application id and context id each appear; with a
    /// single list configured, a hit on that list suffices.
    #[must_use]
    pub fn excludes(&self, apid: &StorageId, ctid: &StorageId) -> bool {
        let apid_hit = self.excluded_apids.contains(apid);
        let ctid_hit = self.excluded_ctids.contains(ctid);
        match (
            self.excluded_apids.is_empty(),
            self.excluded_ctids.is_empty(),
        ) {
            (false, false) => apid_hit && ctid_hit,
            (false, true) => apid_hit,
            (true, false) => ctid_hit,
            (true, true) => false,
        }
    }
}

fn id_list(value: &str) -> Vec<StorageId> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(StorageId::new)
        .collect()
}

fn checked_file_name(value: &str) -> Result<String> {
    if value.is_empty() {
        return Err(StorageError::ConfigInvalid("File is empty".into()));
    }
    if value.contains("..") || value.contains('/') || value.contains('\\') {
        warn!(file = value, "rejecting file name with path components");
        return Err(StorageError::ConfigInvalid(format!(
            "File '{value}' must be a plain name"
        )));
    }
    Ok(value.to_string())
}

fn number(key: &str, value: &str) -> Result<u64> {
    value
        .parse()
        .map_err(|_| StorageError::ConfigInvalid(format!("bad {key} '{value}'")))
}

fn positive_number(key: &str, value: &str) -> Result<u64> {
    let n = number(key, value)?;
    if n == 0 {
        return Err(StorageError::ConfigInvalid(format!("{key} must be > 0")));
    }
    Ok(n)
}

fn on_off(key: &str, value: &str) -> Result<bool> {
    if value.eq_ignore_ascii_case("ON") {
        Ok(true)
    } else if value.eq_ignore_ascii_case("OFF") {
        Ok(false)
    } else {
        Err(StorageError::ConfigInvalid(format!("bad {key} '{value}'")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dlt_config::ConfigFile;
    use test_case::test_case;

    fn section_from(body: &str) -> Section {
        let content = format!("[FILTER1]\n{body}");
        let file = ConfigFile::parse(&content).expect("parse");
        file.section("FILTER1").expect("section").clone()
    }

    #[test]
    fn parses_full_verbose_section() {
        let section = section_from(
            "LogAppName=APP1,APP2\n\
             ContextName=.*\n\
             LogLevel=DLT_LOG_WARN\n\
             File=app\n\
             FileSize=50000\n\
             NOFiles=3\n\
             EcuID=ECU1\n\
             SyncBehavior=ON_SPECIFIC_SIZE\n\
             SpecificSize=5000\n\
             GzipCompression=ON\n\
             ExcludedContextName=NOIS\n",
        );
        let config = FilterConfig::from_section(&section, FilterKind::Verbose).expect("config");
        assert_eq!(config.apids, "APP1,APP2");
        assert_eq!(config.log_level, LogLevel::Warn);
        assert_eq!(config.file_size, 50_000);
        assert_eq!(config.num_files, 3);
        assert_eq!(config.ecu_id, Some(StorageId::new("ECU1")));
        assert!(config.sync.contains(SyncFlags::ON_SPECIFIC_SIZE));
        assert_eq!(config.specific_size, 5000);
        assert!(config.gzip);
        assert_eq!(config.excluded_ctids, vec![StorageId::new("NOIS")]);
    }

    #[test]
    fn sync_defaults_to_on_msg() {
        let section = section_from(
            "LogAppName=APP1\nContextName=CTX1\nLogLevel=DLT_LOG_INFO\n\
             File=app\nFileSize=1000\nNOFiles=2\n",
        );
        let config = FilterConfig::from_section(&section, FilterKind::Verbose).expect("config");
        assert_eq!(config.sync, SyncFlags::ON_MSG);
        assert!(!config.sync.is_cached());
    }

    #[test_case("LogAppName=A\nContextName=C\nFile=f\nFileSize=1\nNOFiles=1\n"; "missing log level")]
    #[test_case("ContextName=C\nLogLevel=DLT_LOG_INFO\nFile=f\nFileSize=1\nNOFiles=1\n"; "missing app name")]
    #[test_case("LogAppName=A\nContextName=C\nLogLevel=DLT_LOG_INFO\nFileSize=1\nNOFiles=1\n"; "missing file")]
    #[test_case("LogAppName=A\nContextName=C\nLogLevel=DLT_LOG_INFO\nFile=f\nFileSize=0\nNOFiles=1\n"; "zero file size")]
    #[test_case("LogAppName=A\nContextName=C\nLogLevel=DLT_LOG_INFO\nFile=../f\nFileSize=1\nNOFiles=1\n"; "path traversal")]
    #[test_case("LogAppName=A\nContextName=C\nLogLevel=DLT_LOG_INFO\nFile=f\nFileSize=1\nNOFiles=1\nBogus=1\n"; "unknown option")]
    #[test_case("LogAppName=A\nContextName=C\nLogLevel=DLT_LOG_INFO\nFile=f\nFileSize=1\nNOFiles=1\nSyncBehavior=ON_MSG,ON_DEMAND\n"; "on msg not exclusive")]
    #[test_case("LogAppName=A\nContextName=C\nLogLevel=DLT_LOG_INFO\nFile=f\nFileSize=1\nNOFiles=1\nSyncBehavior=ON_SPECIFIC_SIZE\n"; "specific size missing")]
    fn rejects_invalid_section(body: &str) {
        let section = section_from(body);
        let err = FilterConfig::from_section(&section, FilterKind::Verbose)
            .expect_err("must be rejected");
        assert!(matches!(err, StorageError::ConfigInvalid(_)));
    }

    #[test]
    fn non_verbose_defaults_to_wildcards() {
        let section = section_from("EcuID=ECU1\nFile=nv\nFileSize=1000\nNOFiles=2\n");
        let config = FilterConfig::from_section(&section, FilterKind::NonVerbose).expect("config");
        assert_eq!(config.apids, ".*");
        assert_eq!(config.ctids, ".*");
        assert_eq!(config.log_level, LogLevel::Verbose);
    }

    #[test]
    fn exclusion_needs_both_lists_to_agree() {
        let section = section_from(
            "LogAppName=.*\nContextName=.*\nLogLevel=DLT_LOG_VERBOSE\nEcuID=E\n\
             File=f\nFileSize=1000\nNOFiles=1\n\
             ExcludedLogAppName=BAPP\nExcludedContextName=BCTX\n",
        );
        let config = FilterConfig::from_section(&section, FilterKind::Verbose).expect("config");
        assert!(config.excludes(&StorageId::new("BAPP"), &StorageId::new("BCTX")));
        assert!(!config.excludes(&StorageId::new("BAPP"), &StorageId::new("GOOD")));
        assert!(!config.excludes(&StorageId::new("GOOD"), &StorageId::new("BCTX")));
    }

    #[test]
    fn single_exclusion_list_vetoes_alone() {
        let section = section_from(
            "LogAppName=.*\nContextName=.*\nLogLevel=DLT_LOG_VERBOSE\nEcuID=E\n\
             File=f\nFileSize=1000\nNOFiles=1\nExcludedLogAppName=BAPP\n",
        );
        let config = FilterConfig::from_section(&section, FilterKind::Verbose).expect("config");
        assert!(config.excludes(&StorageId::new("BAPP"), &StorageId::new("ANY")));
        assert!(!config.excludes(&StorageId::new("GOOD"), &StorageId::new("ANY")));
    }

    #[test]
    fn level_threshold_is_inclusive() {
        let section = section_from(
            "LogAppName=A\nContextName=C\nLogLevel=DLT_LOG_WARN\n\
             File=f\nFileSize=1000\nNOFiles=1\n",
        );
        let config = FilterConfig::from_section(&section, FilterKind::Verbose).expect("config");
        assert!(config.matches_level(LogLevel::Fatal));
        assert!(config.matches_level(LogLevel::Warn));
        assert!(!config.matches_level(LogLevel::Info));
    }
}
