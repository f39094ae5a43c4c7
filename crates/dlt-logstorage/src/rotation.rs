//! Rotation-file management.
//!
//! Handles the on-disk side of one filter: building file names of the form
//! `<name><delim><index>[<delim><timestamp>].dlt[.gz]`, scanning the
//! storage directory back into an oldest-first record list (with
//! wrap-around detection on the index sequence), and opening the active
//! file while enforcing the per-filter size and count limits.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use flate2::Compression;
use flate2::write::GzEncoder;
use parking_lot::Mutex;
use tracing::{debug, error, warn};

use crate::error::{Result, StorageError};

/// File extension of rotation files.
pub const FILE_EXTENSION: &str = ".dlt";

/// Extra extension of gzip-compressed rotation files.
pub const GZIP_EXTENSION: &str = ".gz";

/// Length of the `yyyyMMdd-HHmmss` timestamp part.
const TIMESTAMP_LEN: usize = 15;

/// Upper bound for a full rotation-file path; longer device paths are
/// rejected rather than silently truncated.
pub const MAX_PATH_LEN: usize = 1024;

/// File-name rules handed down from the embedding daemon's configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileNameRules {
    /// Delimiter between name, index and timestamp.
    pub delimiter: char,
    /// Whether file names carry a `yyyyMMdd-HHmmss` timestamp.
    pub timestamp: bool,
    /// Highest rotation index before wrapping back to 1.
    pub max_counter: u32,
    /// Zero-padded width of the index part.
    pub counter_width: usize,
}

impl Default for FileNameRules {
    fn default() -> Self {
        Self {
            delimiter: '_',
            timestamp: true,
            max_counter: 999,
            counter_width: 3,
        }
    }
}

/// One on-disk rotation file known to a filter: file name plus the index
/// parsed back out of it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotationRecord {
    /// File name without directory.
    pub name: String,
    /// Rotation index parsed from the name; never 0.
    pub index: u32,
}

/// Most recently written physical file for one logical `file_name`,
/// shared across all filters that target the same name. The wrap id is
/// bumped on every change so a filter can detect that its cached handle
/// went stale.
#[derive(Debug, Clone, Default)]
pub struct NewestFileEntry {
    /// File name of the newest rotation file.
    pub name: String,
    /// Monotonic change counter.
    pub wrap_id: u64,
}

/// Shared newest-file table, keyed by the configured base file name.
pub type NewestFileTable = Arc<Mutex<HashMap<String, NewestFileEntry>>>;

/// Creates an empty shared newest-file table.
#[must_use]
pub fn newest_file_table() -> NewestFileTable {
    Arc::new(Mutex::new(HashMap::new()))
}

/// Open output handle of the active rotation file.
#[derive(Debug)]
enum Output {
    Plain(File),
    Gzip(Box<GzEncoder<File>>),
}

/// Buffered append handle to one rotation file with size bookkeeping.
///
/// For gzip output the tracked size is the on-disk size at open time plus
/// the uncompressed bytes appended since; a conservative over-estimate
/// that keeps the rotation limit an upper bound.
#[derive(Debug)]
pub struct LogWriter {
    out: Output,
    path: PathBuf,
    size: u64,
}

impl LogWriter {
    /// Opens (or creates) a rotation file for appending.
    pub fn open_append(path: &Path, gzip: bool) -> Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let size = file.metadata()?.len();
        let out = if gzip {
            // Appending starts a fresh gzip member, which concatenates
            // into a single valid stream.
            Output::Gzip(Box::new(GzEncoder::new(file, Compression::default())))
        } else {
            Output::Plain(file)
        };
        Ok(Self {
            out,
            path: path.to_path_buf(),
            size,
        })
    }

    /// Appends one span, counting it toward the tracked size.
    pub fn write_all(&mut self, data: &[u8]) -> Result<()> {
        match &mut self.out {
            Output::Plain(file) => file.write_all(data)?,
            Output::Gzip(enc) => enc.write_all(data)?,
        }
        self.size += data.len() as u64;
        Ok(())
    }

    /// Flushes buffered data to the file.
    pub fn flush(&mut self) -> Result<()> {
        match &mut self.out {
            Output::Plain(file) => file.flush()?,
            Output::Gzip(enc) => enc.flush()?,
        }
        Ok(())
    }

    /// Flushes and fsyncs. Filesystems without sync support are
    /// tolerated.
    pub fn sync(&mut self) -> Result<()> {
        self.flush()?;
        let file = match &self.out {
            Output::Plain(file) => file,
            Output::Gzip(enc) => enc.get_ref(),
        };
        match file.sync_all() {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::Unsupported => {
                debug!(path = %self.path.display(), "fsync unsupported, ignored");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Tracked size in bytes.
    #[must_use]
    pub const fn size(&self) -> u64 {
        self.size
    }

    /// Path of the open file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Builds a rotation file name for the given index.
#[must_use]
pub fn log_file_name(rules: &FileNameRules, base: &str, index: u32, gzip: bool) -> String {
    let mut name = format!(
        "{base}{delim}{index:0width$}",
        delim = rules.delimiter,
        width = rules.counter_width
    );
    if rules.timestamp {
        let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S");
        name.push(rules.delimiter);
        name.push_str(&stamp.to_string());
    }
    name.push_str(FILE_EXTENSION);
    if gzip {
        name.push_str(GZIP_EXTENSION);
    }
    name
}

/// Parses the rotation index back out of a file name.
///
/// Returns `None` when the name does not follow the grammar or the index
/// is 0; the caller re-seeds at index 1 in that case.
#[must_use]
pub fn parse_file_index(rules: &FileNameRules, base: &str, name: &str) -> Option<u32> {
    let mut rest = name.strip_prefix(base)?;
    rest = rest.strip_prefix(rules.delimiter)?;
    rest = rest.strip_suffix(GZIP_EXTENSION).unwrap_or(rest);
    rest = rest.strip_suffix(FILE_EXTENSION)?;

    // With timestamps enabled the index sits before the trailing
    // `<delim><timestamp>` part.
    if rules.timestamp {
        if rest.len() < TIMESTAMP_LEN + 1 {
            return None;
        }
        let cut = rest.len() - TIMESTAMP_LEN - 1;
        if !rest[cut..].starts_with(rules.delimiter) {
            return None;
        }
        rest = &rest[..cut];
    }

    let index: u32 = rest.parse().ok()?;
    if index == 0 {
        error!(name, "rotation index 0 is invalid");
        return None;
    }
    Some(index)
}

/// Per-filter rotation state: the known on-disk files (oldest first) and
/// the currently open writer.
#[derive(Debug, Default)]
pub struct RotationState {
    records: Vec<RotationRecord>,
    writer: Option<LogWriter>,
    /// Name of the file the writer points at.
    working_file: Option<String>,
    /// Last observed wrap id of the shared newest-file entry.
    wrap_id: u64,
}

impl RotationState {
    /// Returns the known rotation records, oldest first.
    #[must_use]
    pub fn records(&self) -> &[RotationRecord] {
        &self.records
    }

    /// Returns the open writer, if any.
    pub fn writer_mut(&mut self) -> Option<&mut LogWriter> {
        self.writer.as_mut()
    }

    /// Name of the currently open rotation file.
    #[must_use]
    pub fn working_file(&self) -> Option<&str> {
        self.working_file.as_deref()
    }

    /// Closes the current writer, flushing buffered data.
    pub fn close(&mut self) {
        if let Some(mut writer) = self.writer.take() {
            if let Err(e) = writer.flush() {
                warn!(error = %e, "flush on close failed");
            }
        }
        self.working_file = None;
    }

    /// Rescans the storage directory for rotation files of `base`.
    ///
    /// The previous record list is discarded. Files are matched on the
    /// `base<delim>` prefix, their index is parsed per the file-name
    /// grammar, and the result is sorted ascending then rearranged so a
    /// single wrap gap puts the oldest file first.
    pub fn scan_directory(
        &mut self,
        rules: &FileNameRules,
        storage_path: &Path,
        base: &str,
    ) -> Result<()> {
        self.records.clear();

        let mut prefix = String::with_capacity(base.len() + 1);
        prefix.push_str(base);
        prefix.push(rules.delimiter);

        let mut found: Vec<(RotationRecord, std::time::SystemTime)> = Vec::new();
        for entry in fs::read_dir(storage_path)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if !name.starts_with(&prefix) {
                continue;
            }
            match parse_file_index(rules, base, name) {
                Some(index) => {
                    let modified = entry
                        .metadata()
                        .and_then(|m| m.modified())
                        .unwrap_or(std::time::SystemTime::UNIX_EPOCH);
                    let record = RotationRecord {
                        name: name.to_string(),
                        index,
                    };
                    found.push((record, modified));
                }
                None => warn!(name, "skipping file with unparsable rotation index"),
            }
        }

        // Two files can share an index, e.g. a counter wrap onto a file
        // not yet evicted, or plain and gzip output side by side. The
        // older file sorts first so eviction removes it first.
        found.sort_by(|a, b| a.0.index.cmp(&b.0.index).then(a.1.cmp(&b.1)));
        self.records = found.into_iter().map(|(record, _)| record).collect();
        rearrange_wrap(&mut self.records);
        Ok(())
    }

    /// Opens the active rotation file for a message of `msg_size` bytes.
    ///
    /// Opens the newest existing file when the message still fits below
    /// `file_size`; otherwise creates the next index (wrapping past
    /// `max_counter` to 1) and evicts the oldest file once more than
    /// `num_files` are retained.
    #[allow(clippy::too_many_arguments)]
    pub fn open_for_append(
        &mut self,
        rules: &FileNameRules,
        storage_path: &Path,
        base: &str,
        file_size: u64,
        num_files: usize,
        msg_size: u64,
        gzip: bool,
        newest: &NewestFileTable,
    ) -> Result<()> {
        if storage_path.as_os_str().len() + base.len() > MAX_PATH_LEN {
            return Err(StorageError::WrongParameter("device path too long"));
        }

        if self.records.is_empty() {
            self.scan_directory(rules, storage_path, base)?;
        }

        if let Some(record) = self.records.last() {
            let path = storage_path.join(&record.name);
            match fs::metadata(&path) {
                Ok(meta) if meta.len().saturating_add(msg_size) < file_size => {
                    let name = record.name.clone();
                    self.open_named(storage_path, &name, base, gzip, newest)?;
                    return Ok(());
                }
                Ok(_) => {}
                Err(e) => {
                    // The recorded file vanished under us, e.g. external
                    // cleanup of the device. Rescan so rotation works
                    // from what is actually on disk.
                    warn!(file = %path.display(), error = %e, "newest rotation file unreadable, rescanning");
                    self.scan_directory(rules, storage_path, base)?;
                }
            }
        }
        self.rotate(
            rules,
            storage_path,
            base,
            file_size,
            num_files,
            gzip,
            newest,
        )
    }

    /// Creates the next rotation file and evicts the oldest if the count
    /// limit is exceeded.
    #[allow(clippy::too_many_arguments)]
    pub fn rotate(
        &mut self,
        rules: &FileNameRules,
        storage_path: &Path,
        base: &str,
        _file_size: u64,
        num_files: usize,
        gzip: bool,
        newest: &NewestFileTable,
    ) -> Result<()> {
        self.close();
        if self.records.is_empty() {
            self.scan_directory(rules, storage_path, base)?;
        }

        let index = match self.records.last() {
            // Index 0 never occurs in records; +1 past the counter wraps.
            Some(record) if record.index < rules.max_counter => record.index + 1,
            Some(_) => 1,
            None => 1,
        };

        let name = log_file_name(rules, base, index, gzip);
        let path = storage_path.join(&name);
        let writer = LogWriter::open_append(&path, gzip)?;
        debug!(file = %path.display(), index, "created rotation file");

        self.records.push(RotationRecord {
            name: name.clone(),
            index,
        });
        self.writer = Some(writer);
        self.working_file = Some(name.clone());

        {
            let mut table = newest.lock();
            let entry = table.entry(base.to_string()).or_default();
            entry.name = name;
            entry.wrap_id += 1;
            self.wrap_id = entry.wrap_id;
        }

        while self.records.len() > num_files {
            let oldest = self.records.remove(0);
            let path = storage_path.join(&oldest.name);
            if let Err(e) = fs::remove_file(&path) {
                warn!(file = %path.display(), error = %e, "failed to evict oldest rotation file");
            } else {
                debug!(file = %path.display(), "evicted oldest rotation file");
            }
        }
        Ok(())
    }

    /// Opens an existing rotation file by name and adopts the shared
    /// newest-file entry for it.
    fn open_named(
        &mut self,
        storage_path: &Path,
        name: &str,
        base: &str,
        gzip: bool,
        newest: &NewestFileTable,
    ) -> Result<()> {
        if self.working_file.as_deref() == Some(name) && self.writer.is_some() {
            return Ok(());
        }
        self.close();
        let path = storage_path.join(name);
        self.writer = Some(LogWriter::open_append(&path, gzip)?);
        self.working_file = Some(name.to_string());

        let mut table = newest.lock();
        let entry = table.entry(base.to_string()).or_default();
        if entry.name.is_empty() {
            entry.name = name.to_string();
            entry.wrap_id += 1;
        }
        self.wrap_id = entry.wrap_id;
        Ok(())
    }

    /// True when another filter sharing the same base name has moved the
    /// newest file elsewhere since this filter last opened it.
    #[must_use]
    pub fn is_stale(&self, base: &str, newest: &NewestFileTable) -> bool {
        let table = newest.lock();
        match table.get(base) {
            Some(entry) => {
                entry.wrap_id != self.wrap_id || self.working_file.as_deref() != Some(&*entry.name)
            }
            None => false,
        }
    }

    /// Reopens the file currently named in the shared newest-file entry.
    pub fn reopen_newest(
        &mut self,
        storage_path: &Path,
        base: &str,
        gzip: bool,
        newest: &NewestFileTable,
    ) -> Result<()> {
        let name = {
            let table = newest.lock();
            table.get(base).map(|entry| entry.name.clone())
        };
        match name {
            Some(name) if !name.is_empty() => self.open_named(storage_path, &name, base, gzip, newest),
            _ => Err(StorageError::NoSpace("newest file unknown".into())),
        }
    }
}

/// Moves the records after a single non-monotonic index gap to the
/// front, so the oldest file leads. A sequence like `1 2 7 8` (indices 3
/// to 6 already evicted after a counter wrap) becomes `7 8 1 2`.
fn rearrange_wrap(records: &mut [RotationRecord]) {
    let mut wrap_at = None;
    for i in 1..records.len() {
        // Records arrive sorted ascending; a difference of 0 is a
        // duplicate index, not a wrap gap.
        if records[i].index - records[i - 1].index > 1 {
            wrap_at = Some(i);
        }
    }
    if let Some(at) = wrap_at {
        records.rotate_left(at);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn rules_plain() -> FileNameRules {
        FileNameRules {
            delimiter: '_',
            timestamp: false,
            max_counter: 999,
            counter_width: 3,
        }
    }

    #[test]
    fn file_name_zero_padded_index() {
        let name = log_file_name(&rules_plain(), "app", 7, false);
        assert_eq!(name, "app_007.dlt");
    }

    #[test]
    fn file_name_with_timestamp_and_gzip() {
        let rules = FileNameRules::default();
        let name = log_file_name(&rules, "app", 12, true);
        assert!(name.starts_with("app_012_"));
        assert!(name.ends_with(".dlt.gz"));
        // app_012_yyyymmdd-hhmmss.dlt.gz
        assert_eq!(name.len(), "app_012_".len() + TIMESTAMP_LEN + ".dlt.gz".len());
    }

    #[test]
    fn parse_index_round_trip() {
        let rules = rules_plain();
        assert_eq!(parse_file_index(&rules, "app", "app_001.dlt"), Some(1));
        assert_eq!(parse_file_index(&rules, "app", "app_042.dlt.gz"), Some(42));

        let with_ts = FileNameRules::default();
        let name = log_file_name(&with_ts, "app", 99, false);
        assert_eq!(parse_file_index(&with_ts, "app", &name), Some(99));
    }

    #[test]
    fn parse_index_rejects_bad_names() {
        let rules = rules_plain();
        assert_eq!(parse_file_index(&rules, "app", "app_000.dlt"), None);
        assert_eq!(parse_file_index(&rules, "app", "app_abc.dlt"), None);
        assert_eq!(parse_file_index(&rules, "app", "other_001.dlt"), None);
        assert_eq!(parse_file_index(&rules, "app", "app_001.txt"), None);
        // timestamp expected but missing
        assert_eq!(
            parse_file_index(&FileNameRules::default(), "app", "app_001.dlt"),
            None
        );
    }

    #[test]
    fn rearrange_moves_wrap_to_front() {
        let mut records: Vec<RotationRecord> = [1, 2, 7, 8]
            .iter()
            .map(|&index| RotationRecord {
                name: format!("app_{index:03}.dlt"),
                index,
            })
            .collect();
        rearrange_wrap(&mut records);
        let order: Vec<u32> = records.iter().map(|r| r.index).collect();
        assert_eq!(order, [7, 8, 1, 2]);
    }

    #[test]
    fn rearrange_keeps_monotonic_sequence() {
        let mut records: Vec<RotationRecord> = (3..=6)
            .map(|index| RotationRecord {
                name: format!("app_{index:03}.dlt"),
                index,
            })
            .collect();
        rearrange_wrap(&mut records);
        let order: Vec<u32> = records.iter().map(|r| r.index).collect();
        assert_eq!(order, [3, 4, 5, 6]);
    }

    #[test]
    fn scan_ignores_foreign_files() {
        let dir = TempDir::new().expect("tempdir");
        for name in ["app_001.dlt", "app_002.dlt", "other_001.dlt", "notes.txt"] {
            std::fs::write(dir.path().join(name), b"x").expect("write");
        }

        let mut state = RotationState::default();
        state
            .scan_directory(&rules_plain(), dir.path(), "app")
            .expect("scan");
        let names: Vec<&str> = state.records().iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, ["app_001.dlt", "app_002.dlt"]);
    }

    #[test]
    fn open_creates_first_file_at_index_one() {
        let dir = TempDir::new().expect("tempdir");
        let newest = newest_file_table();
        let mut state = RotationState::default();

        state
            .open_for_append(&rules_plain(), dir.path(), "app", 100, 2, 10, false, &newest)
            .expect("open");
        assert_eq!(state.working_file(), Some("app_001.dlt"));
        assert!(dir.path().join("app_001.dlt").exists());
    }

    #[test]
    fn open_rotates_and_evicts_oldest() {
        let dir = TempDir::new().expect("tempdir");
        let newest = newest_file_table();
        let rules = rules_plain();
        let mut state = RotationState::default();

        // Three rotations with num_files = 2: first file must be evicted.
        for _ in 0..3 {
            state
                .open_for_append(&rules, dir.path(), "app", 16, 2, 8, false, &newest)
                .expect("open");
            state
                .writer_mut()
                .expect("writer")
                .write_all(&[0u8; 16])
                .expect("write");
            state.close();
        }

        assert!(!dir.path().join("app_001.dlt").exists());
        assert!(dir.path().join("app_002.dlt").exists());
        assert!(dir.path().join("app_003.dlt").exists());
    }

    #[test]
    fn open_reuses_newest_with_space() {
        let dir = TempDir::new().expect("tempdir");
        let newest = newest_file_table();
        let rules = rules_plain();
        let mut state = RotationState::default();

        state
            .open_for_append(&rules, dir.path(), "app", 100, 2, 10, false, &newest)
            .expect("open");
        state
            .writer_mut()
            .expect("writer")
            .write_all(b"0123456789")
            .expect("write");
        state.close();

        // A fresh state (simulating re-connect) opens the same file.
        let mut state2 = RotationState::default();
        state2
            .open_for_append(&rules, dir.path(), "app", 100, 2, 10, false, &newest)
            .expect("open");
        assert_eq!(state2.working_file(), Some("app_001.dlt"));
    }

    #[test]
    fn rearrange_keeps_duplicate_indices_in_place() {
        let mut records: Vec<RotationRecord> = [(1, "app_001.dlt"), (2, "app_002.dlt"), (2, "app_002.dlt.gz")]
            .iter()
            .map(|&(index, name)| RotationRecord {
                name: name.to_string(),
                index,
            })
            .collect();
        rearrange_wrap(&mut records);
        let order: Vec<u32> = records.iter().map(|r| r.index).collect();
        assert_eq!(order, [1, 2, 2]);
    }

    #[test]
    fn scan_orders_duplicate_indices_oldest_first() {
        let dir = TempDir::new().expect("tempdir");
        for name in ["app_001.dlt", "app_002.dlt", "app_002.dlt.gz"] {
            std::fs::write(dir.path().join(name), b"x").expect("write");
        }
        // Backdate the gzip twin so it is unambiguously the older file.
        File::options()
            .write(true)
            .open(dir.path().join("app_002.dlt.gz"))
            .expect("open")
            .set_modified(std::time::SystemTime::UNIX_EPOCH)
            .expect("set mtime");

        let mut state = RotationState::default();
        state
            .scan_directory(&rules_plain(), dir.path(), "app")
            .expect("scan");
        let names: Vec<&str> = state.records().iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, ["app_001.dlt", "app_002.dlt.gz", "app_002.dlt"]);
    }

    #[test]
    fn open_recovers_when_newest_file_vanishes() {
        let dir = TempDir::new().expect("tempdir");
        let newest = newest_file_table();
        let rules = rules_plain();
        let mut state = RotationState::default();

        state
            .open_for_append(&rules, dir.path(), "app", 100, 2, 10, false, &newest)
            .expect("open");
        state.close();
        std::fs::remove_file(dir.path().join("app_001.dlt")).expect("remove");

        // The recorded newest file is gone; the next open must fall
        // back to a fresh rotation file instead of failing.
        state
            .open_for_append(&rules, dir.path(), "app", 100, 2, 10, false, &newest)
            .expect("reopen");
        assert_eq!(state.working_file(), Some("app_001.dlt"));
        assert!(dir.path().join("app_001.dlt").exists());
    }

    #[test]
    fn index_wraps_past_max_counter() {
        let dir = TempDir::new().expect("tempdir");
        let newest = newest_file_table();
        let rules = FileNameRules {
            max_counter: 3,
            ..rules_plain()
        };
        std::fs::write(dir.path().join("app_003.dlt"), vec![0u8; 32]).expect("write");

        let mut state = RotationState::default();
        state
            .open_for_append(&rules, dir.path(), "app", 16, 5, 8, false, &newest)
            .expect("open");
        assert_eq!(state.working_file(), Some("app_001.dlt"));
    }

    #[test]
    fn staleness_tracks_shared_newest_entry() {
        let dir = TempDir::new().expect("tempdir");
        let newest = newest_file_table();
        let rules = rules_plain();

        let mut a = RotationState::default();
        a.open_for_append(&rules, dir.path(), "app", 100, 3, 10, false, &newest)
            .expect("open a");
        assert!(!a.is_stale("app", &newest));

        // A second filter sharing the base name rotates the file.
        let mut b = RotationState::default();
        b.open_for_append(&rules, dir.path(), "app", 100, 3, 10, false, &newest)
            .expect("open b");
        b.rotate(&rules, dir.path(), "app", 100, 3, false, &newest)
            .expect("rotate b");

        assert!(a.is_stale("app", &newest));
        a.reopen_newest(dir.path(), "app", false, &newest)
            .expect("reopen");
        assert_eq!(a.working_file(), Some("app_002.dlt"));
        assert!(!a.is_stale("app", &newest));
    }

    #[test]
    fn gzip_writer_appends_members() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("app_001.dlt.gz");

        let mut writer = LogWriter::open_append(&path, true).expect("open");
        writer.write_all(b"hello ").expect("write");
        drop(writer); // finish the gzip member
        let mut writer = LogWriter::open_append(&path, true).expect("reopen");
        writer.write_all(b"world").expect("write");
        drop(writer);

        let file = File::open(&path).expect("open gz");
        let mut decoder = flate2::read::MultiGzDecoder::new(file);
        let mut content = String::new();
        std::io::Read::read_to_string(&mut decoder, &mut content).expect("decode");
        assert_eq!(content, "hello world");
    }
}
