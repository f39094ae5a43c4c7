//! The storage engine: one connected device with its filter registry.
//!
//! A [`LogStorage`] represents one mounted storage device. `connect`
//! loads `dlt_logstorage.conf` from the device root, `write` routes one
//! framed message through the matching filters, and `disconnect` flushes
//! and tears everything down. After five consecutive write failures the
//! device disables itself until the next `connect`.

use std::path::PathBuf;
use std::sync::Arc;

use dlt_config::ConfigFile;
use tracing::{debug, info, warn};

use crate::cache::CacheBudget;
use crate::error::{Result, StorageError};
use crate::filter::FilterKind;
use crate::keys::{candidate_keys, split_key, ParsedKey};
use crate::registry::{FilterRegistry, LoadStatus, SharedConfig};
use crate::rotation::{newest_file_table, FileNameRules, NewestFileTable};
use crate::strategy::{self, DeviceContext};
use crate::types::{LogLevel, MessageSpans, SyncFlags, STORAGE_HEADER_LEN, STORAGE_MAGIC};

/// Config file expected at the root of a storage device.
pub const CONFIG_FILE_NAME: &str = "dlt_logstorage.conf";

/// Consecutive write failures after which a device disables itself.
pub const MAX_CONSECUTIVE_WRITE_ERRORS: u32 = 5;

/// Default ring-cache budget per device, 30000 KiB.
pub const DEFAULT_CACHE_BUDGET: usize = 30_000 * 1024;

/// Tunables a device is created with.
#[derive(Debug, Clone)]
pub struct StorageOptions {
    /// Rotation-file naming rules.
    pub file_name_rules: FileNameRules,
    /// Total bytes available to all ring caches of the device.
    pub cache_budget: usize,
}

impl Default for StorageOptions {
    fn default() -> Self {
        Self {
            file_name_rules: FileNameRules::default(),
            cache_budget: DEFAULT_CACHE_BUDGET,
        }
    }
}

/// Callbacks into the embedding daemon for log-level reconciliation.
///
/// Loading a filter may require contexts to log more verbosely than the
/// daemon currently asks of them; the observer carries those requests
/// (and their rollback at disconnect) to the context owners. Each
/// registered filter key yields one callback, with wildcard segments as
/// `None`.
pub trait LogLevelObserver {
    /// A loaded filter needs the contexts matching `key` to log at
    /// `level`.
    fn apply_log_level(&mut self, key: &ParsedKey, level: LogLevel);

    /// The device disconnected; restore the contexts matching `key` to
    /// `level`.
    fn restore_log_level(&mut self, key: &ParsedKey, level: LogLevel);
}

/// One offline storage device.
pub struct LogStorage {
    device_id: u32,
    storage_path: PathBuf,
    rules: FileNameRules,
    budget: CacheBudget,
    newest: NewestFileTable,
    registry: Option<FilterRegistry>,
    disabled: bool,
    write_errors: u32,
    observer: Option<Box<dyn LogLevelObserver + Send>>,
}

impl LogStorage {
    /// Creates a device for the mount point at `storage_path`.
    #[must_use]
    pub fn new(device_id: u32, storage_path: impl Into<PathBuf>) -> Self {
        Self::with_options(device_id, storage_path, StorageOptions::default())
    }

    /// Creates a device with explicit tunables.
    #[must_use]
    pub fn with_options(
        device_id: u32,
        storage_path: impl Into<PathBuf>,
        options: StorageOptions,
    ) -> Self {
        Self {
            device_id,
            storage_path: storage_path.into(),
            rules: options.file_name_rules,
            budget: CacheBudget::new(options.cache_budget),
            newest: newest_file_table(),
            registry: None,
            disabled: false,
            write_errors: 0,
            observer: None,
        }
    }

    /// Registers the log-level observer.
    pub fn set_observer(&mut self, observer: Box<dyn LogLevelObserver + Send>) {
        self.observer = Some(observer);
    }

    /// Device id this storage was created with.
    #[must_use]
    pub const fn device_id(&self) -> u32 {
        self.device_id
    }

    /// True while a filter registry is loaded.
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        self.registry.is_some()
    }

    /// True once the device disabled itself after repeated write
    /// failures.
    #[must_use]
    pub const fn is_disabled(&self) -> bool {
        self.disabled
    }

    /// Number of active filters.
    #[must_use]
    pub fn num_filters(&self) -> usize {
        self.registry.as_ref().map_or(0, FilterRegistry::len)
    }

    /// Connects the device: loads `dlt_logstorage.conf` from the
    /// storage path and builds the filter registry.
    ///
    /// A still-connected device is disconnected first, as after a
    /// remount. Loading also clears a previous self-disable.
    pub fn connect(&mut self) -> Result<LoadStatus> {
        if self.registry.is_some() {
            self.disconnect(SyncFlags::ON_DEVICE_DISCONNECT)?;
        }

        let conf = self.storage_path.join(CONFIG_FILE_NAME);
        let file = ConfigFile::load(&conf)?;
        let (registry, status) = FilterRegistry::load(&file)?;

        if let Some(observer) = self.observer.as_mut() {
            for (key, shared) in registry.keyed_configs() {
                match split_key(key) {
                    Ok(parsed) => observer.apply_log_level(&parsed, shared.lock().log_level),
                    Err(e) => warn!(key, error = %e, "skipping unparsable filter key"),
                }
            }
        }

        info!(
            device = self.device_id,
            path = %self.storage_path.display(),
            filters = registry.len(),
            "storage device connected"
        );
        self.registry = Some(registry);
        self.disabled = false;
        self.write_errors = 0;
        Ok(status)
    }

    /// Disconnects the device: flushes every filter once, closes the
    /// rotation files and drops the registry.
    ///
    /// `reason` is handed to the sync step, so cached filters flush as
    /// for `ON_DAEMON_EXIT` or `ON_DEVICE_DISCONNECT`. Unless the
    /// config's `MaintainLogstorageLogLevel` is set, contexts with a
    /// `ResetLogLevel` are restored through the observer.
    pub fn disconnect(&mut self, reason: SyncFlags) -> Result<()> {
        let Some(registry) = self.registry.take() else {
            return Ok(());
        };

        let mut first_err = None;
        {
            let ctx = self.ctx();
            for shared in registry.configs() {
                let mut config = shared.lock();
                if let Err(e) = strategy::sync(&mut config, &ctx, reason) {
                    warn!(device = self.device_id, error = %e, "flush on disconnect failed");
                    first_err.get_or_insert(e);
                }
                config.rotation.close();
                config.cache = None;
            }
        }

        if !registry.maintain_log_level {
            if let Some(observer) = self.observer.as_mut() {
                for (key, shared) in registry.keyed_configs() {
                    let reset = shared.lock().reset_log_level;
                    let Some(level) = reset else { continue };
                    match split_key(key) {
                        Ok(parsed) => observer.restore_log_level(&parsed, level),
                        Err(e) => warn!(key, error = %e, "skipping unparsable filter key"),
                    }
                }
            }
        }

        self.newest.lock().clear();
        info!(device = self.device_id, "storage device disconnected");
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Routes one framed message through the matching filters.
    ///
    /// Returns how many filters stored the message. Verbose messages
    /// are matched on ECU, APID and CTID and pass the level and
    /// exclusion checks; non-verbose messages only reach ECU-wildcard
    /// non-verbose filters.
    pub fn write(&mut self, spans: &MessageSpans<'_>) -> Result<usize> {
        if self.disabled {
            return Err(StorageError::DeviceDisabled(self.write_errors));
        }
        let registry = self
            .registry
            .as_ref()
            .ok_or(StorageError::NotConnected("device not connected"))?;
        if spans.header.len() < STORAGE_HEADER_LEN || !spans.header.starts_with(&STORAGE_MAGIC) {
            return Err(StorageError::WrongParameter("malformed storage header"));
        }

        let ecu = spans.ecu_id();
        let info = spans.ext_info();
        let (keys, want_kind) = match &info {
            Some(i) if i.verbose => (
                candidate_keys(ecu.as_ref(), Some(&i.apid), Some(&i.ctid)),
                FilterKind::Verbose,
            ),
            _ => (candidate_keys(ecu.as_ref(), None, None), FilterKind::NonVerbose),
        };

        let mut matched: Vec<SharedConfig> = Vec::new();
        for key in &keys {
            for config in registry.find(key) {
                if !matched.iter().any(|c| Arc::ptr_eq(c, config)) {
                    matched.push(Arc::clone(config));
                }
            }
        }
        if matched.is_empty() {
            return Ok(0);
        }

        let mut frame = Vec::with_capacity(spans.total_len());
        frame.extend_from_slice(spans.header);
        frame.extend_from_slice(spans.ext_header);
        frame.extend_from_slice(spans.payload);

        let mut stored = 0usize;
        let mut failures = 0u32;
        {
            let ctx = self.ctx();
            for shared in &matched {
                let mut config = shared.lock();
                if config.kind != want_kind {
                    continue;
                }
                if let Some(i) = &info {
                    if i.verbose {
                        let Some(level) = i.log_level else {
                            debug!(device = self.device_id, "message with invalid MTIN skipped");
                            continue;
                        };
                        if !config.matches_level(level) {
                            continue;
                        }
                        if config.excludes(&i.apid, &i.ctid) {
                            continue;
                        }
                    }
                }

                let result = strategy::prepare(&mut config, &ctx, frame.len())
                    .and_then(|()| strategy::write(&mut config, &ctx, &frame))
                    .and_then(|()| strategy::sync(&mut config, &ctx, SyncFlags::ON_MSG));
                match result {
                    Ok(()) => stored += 1,
                    Err(e) => {
                        warn!(
                            device = self.device_id,
                            file = config.file_name.as_str(),
                            error = %e,
                            "storing message failed"
                        );
                        failures += 1;
                    }
                }
            }
        }

        if failures > 0 {
            self.write_errors += failures;
        } else if stored > 0 {
            self.write_errors = 0;
        }
        if self.write_errors >= MAX_CONSECUTIVE_WRITE_ERRORS {
            warn!(
                device = self.device_id,
                errors = self.write_errors,
                "too many write failures, disabling storage device"
            );
            if let Err(e) = self.disconnect(SyncFlags::ON_DEVICE_DISCONNECT) {
                warn!(device = self.device_id, error = %e, "disconnect while disabling failed");
            }
            self.disabled = true;
            return Err(StorageError::DeviceDisabled(self.write_errors));
        }
        Ok(stored)
    }

    /// Flushes every cached filter configured for `ON_DEMAND`.
    /// Best-effort: failures are logged, remaining filters still flush.
    pub fn sync_caches(&mut self) {
        let Some(registry) = self.registry.as_ref() else {
            return;
        };
        let ctx = DeviceContext {
            storage_path: &self.storage_path,
            rules: &self.rules,
            newest: &self.newest,
            budget: &self.budget,
        };
        for shared in registry.configs() {
            let mut config = shared.lock();
            if let Err(e) = strategy::sync(&mut config, &ctx, SyncFlags::ON_DEMAND) {
                warn!(
                    device = self.device_id,
                    file = config.file_name.as_str(),
                    error = %e,
                    "on-demand sync failed"
                );
            }
        }
    }

    fn ctx(&self) -> DeviceContext<'_> {
        DeviceContext {
            storage_path: &self.storage_path,
            rules: &self.rules,
            newest: &self.newest,
            budget: &self.budget,
        }
    }
}

impl Drop for LogStorage {
    fn drop(&mut self) {
        if self.registry.is_some() {
            if let Err(e) = self.disconnect(SyncFlags::ON_DAEMON_EXIT) {
                warn!(device = self.device_id, error = %e, "flush on drop failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{StorageId, EXT_HEADER_LEN, HTYP_UEH, MSIN_VERB};
    use std::fs;
    use tempfile::TempDir;

    fn write_conf(dir: &TempDir, content: &str) {
        fs::write(dir.path().join(CONFIG_FILE_NAME), content).expect("write conf");
    }

    fn verbose_frame(ecu: &[u8; 4], apid: &[u8; 4], ctid: &[u8; 4], level: LogLevel) -> Vec<u8> {
        let mut frame = STORAGE_MAGIC.to_vec();
        frame.extend_from_slice(&[0u8; 8]);
        frame.extend_from_slice(ecu);
        frame.extend_from_slice(&[HTYP_UEH, 0, 0, 30]);
        frame.push(MSIN_VERB | ((level as u8) << 4));
        frame.push(1);
        frame.extend_from_slice(apid);
        frame.extend_from_slice(ctid);
        frame.extend_from_slice(b"payload");
        frame
    }

    fn spans(frame: &[u8]) -> MessageSpans<'_> {
        MessageSpans::new(
            &frame[..STORAGE_HEADER_LEN + 4],
            &frame[STORAGE_HEADER_LEN + 4..STORAGE_HEADER_LEN + 4 + EXT_HEADER_LEN],
            &frame[STORAGE_HEADER_LEN + 4 + EXT_HEADER_LEN..],
        )
    }

    fn storage(dir: &TempDir) -> LogStorage {
        LogStorage::with_options(
            1,
            dir.path(),
            StorageOptions {
                file_name_rules: FileNameRules {
                    timestamp: false,
                    ..FileNameRules::default()
                },
                cache_budget: 1 << 20,
            },
        )
    }

    const BASIC_CONF: &str = "[FILTER1]\n\
        LogAppName=APP1\nContextName=.*\nLogLevel=DLT_LOG_WARN\n\
        File=app\nFileSize=10000\nNOFiles=2\n";

    #[test]
    fn write_requires_connect() {
        let dir = TempDir::new().expect("tempdir");
        let mut storage = storage(&dir);
        let frame = verbose_frame(b"ECU1", b"APP1", b"CTX1", LogLevel::Error);
        let err = storage.write(&spans(&frame)).expect_err("not connected");
        assert!(matches!(err, StorageError::NotConnected(_)));
    }

    #[test]
    fn connect_fails_without_config_file() {
        let dir = TempDir::new().expect("tempdir");
        let mut storage = storage(&dir);
        let err = storage.connect().expect_err("no conf");
        assert!(matches!(err, StorageError::Config(_)));
    }

    #[test]
    fn connect_fails_on_config_without_filters() {
        let dir = TempDir::new().expect("tempdir");
        write_conf(&dir, "[GENERAL]\nMaintainLogstorageLogLevel=ON\n");
        let mut storage = storage(&dir);
        let err = storage.connect().expect_err("no filters");
        assert!(matches!(err, StorageError::ConfigInvalid(_)));
        assert!(!storage.is_connected());
    }

    #[test]
    fn stores_matching_message() {
        let dir = TempDir::new().expect("tempdir");
        write_conf(&dir, BASIC_CONF);
        let mut storage = storage(&dir);
        assert_eq!(storage.connect().expect("connect"), LoadStatus::Complete);
        assert_eq!(storage.num_filters(), 1);

        let frame = verbose_frame(b"ECU1", b"APP1", b"CTX1", LogLevel::Error);
        assert_eq!(storage.write(&spans(&frame)).expect("write"), 1);

        let written = fs::read(dir.path().join("app_001.dlt")).expect("read");
        assert_eq!(written, frame);
    }

    #[test]
    fn level_and_id_mismatch_store_nothing() {
        let dir = TempDir::new().expect("tempdir");
        write_conf(&dir, BASIC_CONF);
        let mut storage = storage(&dir);
        storage.connect().expect("connect");

        // Info is quieter than the configured Warn threshold.
        let too_verbose = verbose_frame(b"ECU1", b"APP1", b"CTX1", LogLevel::Info);
        assert_eq!(storage.write(&spans(&too_verbose)).expect("write"), 0);

        let wrong_app = verbose_frame(b"ECU1", b"APP2", b"CTX1", LogLevel::Fatal);
        assert_eq!(storage.write(&spans(&wrong_app)).expect("write"), 0);

        assert!(!dir.path().join("app_001.dlt").exists());
    }

    #[test]
    fn exclusion_vetoes_matching_filter() {
        let dir = TempDir::new().expect("tempdir");
        write_conf(
            &dir,
            "[FILTER1]\n\
             LogAppName=.*\nContextName=.*\nLogLevel=DLT_LOG_VERBOSE\nEcuID=ECU1\n\
             File=app\nFileSize=10000\nNOFiles=2\nExcludedLogAppName=NOIS\n",
        );
        let mut storage = storage(&dir);
        storage.connect().expect("connect");

        let noisy = verbose_frame(b"ECU1", b"NOIS", b"CTX1", LogLevel::Error);
        assert_eq!(storage.write(&spans(&noisy)).expect("write"), 0);

        let wanted = verbose_frame(b"ECU1", b"GOOD", b"CTX1", LogLevel::Error);
        assert_eq!(storage.write(&spans(&wanted)).expect("write"), 1);
    }

    #[test]
    fn one_message_can_hit_two_filters() {
        let dir = TempDir::new().expect("tempdir");
        write_conf(
            &dir,
            "[FILTER1]\n\
             LogAppName=APP1\nContextName=.*\nLogLevel=DLT_LOG_VERBOSE\n\
             File=all\nFileSize=10000\nNOFiles=2\n\
             \n\
             [FILTER2]\n\
             LogAppName=.*\nContextName=CTX1\nLogLevel=DLT_LOG_VERBOSE\n\
             File=ctx\nFileSize=10000\nNOFiles=2\n",
        );
        let mut storage = storage(&dir);
        storage.connect().expect("connect");

        let frame = verbose_frame(b"ECU1", b"APP1", b"CTX1", LogLevel::Info);
        assert_eq!(storage.write(&spans(&frame)).expect("write"), 2);
        assert!(dir.path().join("all_001.dlt").exists());
        assert!(dir.path().join("ctx_001.dlt").exists());
    }

    #[test]
    fn non_verbose_message_reaches_only_non_verbose_filter() {
        let dir = TempDir::new().expect("tempdir");
        write_conf(
            &dir,
            "[FILTER1]\n\
             LogAppName=.*\nContextName=.*\nLogLevel=DLT_LOG_VERBOSE\nEcuID=ECU1\n\
             File=verb\nFileSize=10000\nNOFiles=2\n\
             \n\
             [NON-VERBOSE-STORAGE-FILTER1]\n\
             EcuID=ECU1\nFile=nonverb\nFileSize=10000\nNOFiles=2\n",
        );
        let mut storage = storage(&dir);
        storage.connect().expect("connect");

        // No extended header bit: a non-verbose message.
        let mut frame = STORAGE_MAGIC.to_vec();
        frame.extend_from_slice(&[0u8; 8]);
        frame.extend_from_slice(b"ECU1");
        frame.extend_from_slice(&[0, 0, 0, 20]);
        frame.extend_from_slice(&[0xde, 0xad]);
        let msg = MessageSpans::new(&frame[..STORAGE_HEADER_LEN + 4], &[], &frame[STORAGE_HEADER_LEN + 4..]);

        assert_eq!(storage.write(&msg).expect("write"), 1);
        assert!(dir.path().join("nonverb_001.dlt").exists());
        assert!(!dir.path().join("verb_001.dlt").exists());
    }

    #[test]
    fn disconnect_flushes_cached_filter() {
        let dir = TempDir::new().expect("tempdir");
        write_conf(
            &dir,
            "[FILTER1]\n\
             LogAppName=APP1\nContextName=.*\nLogLevel=DLT_LOG_VERBOSE\n\
             File=app\nFileSize=10000\nNOFiles=2\nSyncBehavior=ON_DAEMON_EXIT\n",
        );
        let mut storage = storage(&dir);
        storage.connect().expect("connect");

        let frame = verbose_frame(b"ECU1", b"APP1", b"CTX1", LogLevel::Info);
        assert_eq!(storage.write(&spans(&frame)).expect("write"), 1);
        assert!(!dir.path().join("app_001.dlt").exists());

        storage
            .disconnect(SyncFlags::ON_DAEMON_EXIT)
            .expect("disconnect");
        let written = fs::read(dir.path().join("app_001.dlt")).expect("read");
        assert_eq!(written, frame);
        assert!(!storage.is_connected());
    }

    #[test]
    fn on_demand_sync_flushes_cache() {
        let dir = TempDir::new().expect("tempdir");
        write_conf(
            &dir,
            "[FILTER1]\n\
             LogAppName=APP1\nContextName=.*\nLogLevel=DLT_LOG_VERBOSE\n\
             File=app\nFileSize=10000\nNOFiles=2\nSyncBehavior=ON_DEMAND\n",
        );
        let mut storage = storage(&dir);
        storage.connect().expect("connect");

        let frame = verbose_frame(b"ECU1", b"APP1", b"CTX1", LogLevel::Info);
        storage.write(&spans(&frame)).expect("write");
        assert!(!dir.path().join("app_001.dlt").exists());

        storage.sync_caches();
        assert!(dir.path().join("app_001.dlt").exists());
    }

    #[test]
    fn device_disables_itself_after_repeated_failures() {
        let dir = TempDir::new().expect("tempdir");
        write_conf(&dir, BASIC_CONF);
        let mut storage = storage(&dir);
        storage.connect().expect("connect");

        // Pull the storage directory out from under the device before
        // any rotation file is opened; every write then fails in open.
        fs::remove_dir_all(dir.path()).expect("remove");

        let frame = verbose_frame(b"ECU1", b"APP1", b"CTX1", LogLevel::Error);
        let mut disabled = false;
        for _ in 0..=MAX_CONSECUTIVE_WRITE_ERRORS {
            if let Err(StorageError::DeviceDisabled(errors)) = storage.write(&spans(&frame)) {
                assert_eq!(errors, MAX_CONSECUTIVE_WRITE_ERRORS);
                disabled = true;
                break;
            }
        }
        assert!(disabled);
        assert!(storage.is_disabled());
        assert!(!storage.is_connected());
    }

    struct RecordingObserver(std::sync::mpsc::Sender<(Option<StorageId>, LogLevel, bool)>);

    impl LogLevelObserver for RecordingObserver {
        fn apply_log_level(&mut self, key: &ParsedKey, level: LogLevel) {
            self.0.send((key.apid, level, true)).expect("send");
        }

        fn restore_log_level(&mut self, key: &ParsedKey, level: LogLevel) {
            self.0.send((key.apid, level, false)).expect("send");
        }
    }

    #[test]
    fn observer_sees_apply_and_restore() {
        let dir = TempDir::new().expect("tempdir");
        write_conf(
            &dir,
            "[FILTER1]\n\
             LogAppName=APP1\nContextName=.*\nLogLevel=DLT_LOG_DEBUG\n\
             ResetLogLevel=DLT_LOG_WARN\n\
             File=app\nFileSize=10000\nNOFiles=2\n",
        );
        let (tx, rx) = std::sync::mpsc::channel();
        let mut storage = storage(&dir);
        storage.set_observer(Box::new(RecordingObserver(tx)));

        storage.connect().expect("connect");
        assert_eq!(
            rx.try_recv().expect("apply"),
            (Some(StorageId::new("APP1")), LogLevel::Debug, true)
        );

        storage
            .disconnect(SyncFlags::ON_DEVICE_DISCONNECT)
            .expect("disconnect");
        assert_eq!(
            rx.try_recv().expect("restore"),
            (Some(StorageId::new("APP1")), LogLevel::Warn, false)
        );
    }

    #[test]
    fn maintain_flag_suppresses_restore() {
        let dir = TempDir::new().expect("tempdir");
        write_conf(
            &dir,
            "[GENERAL]\nMaintainLogstorageLogLevel=ON\n\
             \n\
             [FILTER1]\n\
             LogAppName=APP1\nContextName=.*\nLogLevel=DLT_LOG_DEBUG\n\
             ResetLogLevel=DLT_LOG_WARN\n\
             File=app\nFileSize=10000\nNOFiles=2\n",
        );
        let (tx, rx) = std::sync::mpsc::channel();
        let mut storage = storage(&dir);
        storage.set_observer(Box::new(RecordingObserver(tx)));

        storage.connect().expect("connect");
        rx.try_recv().expect("apply");
        storage
            .disconnect(SyncFlags::ON_DEVICE_DISCONNECT)
            .expect("disconnect");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn reconnect_disconnects_first() {
        let dir = TempDir::new().expect("tempdir");
        write_conf(&dir, BASIC_CONF);
        let mut storage = storage(&dir);
        storage.connect().expect("connect");
        storage.connect().expect("reconnect");
        assert!(storage.is_connected());
        assert_eq!(storage.num_filters(), 1);
    }
}
