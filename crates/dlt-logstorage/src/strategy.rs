//! Write strategies.
//!
//! A filter either writes straight to its rotation file (`ON_MSG`) or
//! goes through a ring cache that is flushed when the configured trigger
//! fires. The three entry points `prepare`, `write` and `sync` are run in
//! that order for every accepted message.

use std::ops::Range;
use std::path::Path;

use crate::cache::{find_frame_start, find_last_frame_start, CacheBudget, PushOutcome, RingCache};
use crate::error::{Result, StorageError};
use crate::filter::FilterConfig;
use crate::rotation::{FileNameRules, LogWriter, NewestFileTable, RotationState};
use crate::types::SyncFlags;

/// How a filter moves messages to disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStrategy {
    /// Append each message to the rotation file immediately.
    DirectFile,
    /// Batch messages in a ring cache, flush on trigger.
    RingCache,
}

impl WriteStrategy {
    /// Picks the strategy matching a sync bitmask.
    #[must_use]
    pub fn for_flags(flags: SyncFlags) -> Self {
        if flags.is_cached() {
            Self::RingCache
        } else {
            Self::DirectFile
        }
    }
}

/// Shared per-device handles the strategies need.
pub(crate) struct DeviceContext<'a> {
    pub storage_path: &'a Path,
    pub rules: &'a FileNameRules,
    pub newest: &'a NewestFileTable,
    pub budget: &'a CacheBudget,
}

/// Readies the filter for a message of `msg_size` bytes.
pub(crate) fn prepare(
    config: &mut FilterConfig,
    ctx: &DeviceContext<'_>,
    msg_size: usize,
) -> Result<()> {
    match config.strategy {
        WriteStrategy::DirectFile => prepare_direct(config, ctx, msg_size),
        WriteStrategy::RingCache => prepare_cache(config, ctx),
    }
}

/// Hands one message to the filter's output path.
pub(crate) fn write(config: &mut FilterConfig, ctx: &DeviceContext<'_>, msg: &[u8]) -> Result<()> {
    match config.strategy {
        WriteStrategy::DirectFile => {
            let writer = config
                .rotation
                .writer_mut()
                .ok_or(StorageError::NotConnected("no rotation file open"))?;
            writer.write_all(msg)
        }
        WriteStrategy::RingCache => write_cached(config, ctx, msg),
    }
}

/// Runs the sync step for `trigger`. Strategies ignore triggers they are
/// not configured for.
pub(crate) fn sync(
    config: &mut FilterConfig,
    ctx: &DeviceContext<'_>,
    trigger: SyncFlags,
) -> Result<()> {
    match config.strategy {
        WriteStrategy::DirectFile => {
            if trigger.contains(SyncFlags::ON_MSG) {
                if let Some(writer) = config.rotation.writer_mut() {
                    writer.sync()?;
                }
            }
            Ok(())
        }
        WriteStrategy::RingCache => {
            // Exit and disconnect always flush; whatever the configured
            // trigger, cached data would be lost otherwise.
            let forced = trigger.contains(SyncFlags::ON_DAEMON_EXIT)
                || trigger.contains(SyncFlags::ON_DEVICE_DISCONNECT);
            if !forced && !config.sync.contains(trigger) {
                return Ok(());
            }
            // Size-strategy filters empty their cache on every flush
            // and write each batch to a fresh rotation file.
            let size_strategy = config.sync.contains(SyncFlags::ON_SPECIFIC_SIZE)
                || config.sync.contains(SyncFlags::ON_FILE_SIZE);
            flush_cache(config, ctx, size_strategy)
        }
    }
}

fn prepare_direct(
    config: &mut FilterConfig,
    ctx: &DeviceContext<'_>,
    msg_size: usize,
) -> Result<()> {
    let open_size = config.rotation.writer_mut().map(|w| w.size());
    match open_size {
        None => config.rotation.open_for_append(
            ctx.rules,
            ctx.storage_path,
            &config.file_name,
            config.file_size,
            config.num_files,
            msg_size as u64,
            config.gzip,
            ctx.newest,
        ),
        Some(size) if size + msg_size as u64 >= config.file_size => config.rotation.rotate(
            ctx.rules,
            ctx.storage_path,
            &config.file_name,
            config.file_size,
            config.num_files,
            config.gzip,
            ctx.newest,
        ),
        // Another filter sharing the file name may have rotated it.
        Some(_) if config.rotation.is_stale(&config.file_name, ctx.newest) => config
            .rotation
            .reopen_newest(ctx.storage_path, &config.file_name, config.gzip, ctx.newest),
        Some(_) => Ok(()),
    }
}

fn prepare_cache(config: &mut FilterConfig, ctx: &DeviceContext<'_>) -> Result<()> {
    if config.sync.contains(SyncFlags::ON_SPECIFIC_SIZE)
        && config.sync.contains(SyncFlags::ON_FILE_SIZE)
    {
        return Err(StorageError::ConfigInvalid(
            "ON_SPECIFIC_SIZE and ON_FILE_SIZE are mutually exclusive".into(),
        ));
    }

    let cache_size = if config.sync.contains(SyncFlags::ON_SPECIFIC_SIZE) {
        if config.specific_size > config.file_size {
            return Err(StorageError::ConfigInvalid(
                "SpecificSize must not exceed FileSize".into(),
            ));
        }
        config.specific_size
    } else {
        config.file_size
    };

    if config.cache.is_none() {
        config.cache = Some(RingCache::new(cache_size as usize, ctx.budget)?);
    }
    Ok(())
}

fn write_cached(config: &mut FilterConfig, ctx: &DeviceContext<'_>, msg: &[u8]) -> Result<()> {
    let outcome = config
        .cache
        .as_mut()
        .ok_or(StorageError::NotConnected("ring cache not prepared"))?
        .push(msg)?;
    if outcome == PushOutcome::Stored {
        return Ok(());
    }

    // The ring is full. Size-triggered strategies flush now and start
    // over; the others keep buffering and overwrite the oldest lap.
    if config.sync.contains(SyncFlags::ON_SPECIFIC_SIZE)
        || config.sync.contains(SyncFlags::ON_FILE_SIZE)
    {
        flush_cache(config, ctx, true)?;
    } else if let Some(cache) = config.cache.as_mut() {
        cache.wrap();
    }

    let cache = config
        .cache
        .as_mut()
        .ok_or(StorageError::NotConnected("ring cache not prepared"))?;
    match cache.push(msg)? {
        PushOutcome::Stored => Ok(()),
        PushOutcome::NeedsSync => Err(StorageError::CacheTooSmall {
            msg_size: msg.len(),
            cache_size: cache.capacity(),
        }),
    }
}

/// Flushes all unsynced cache ranges to rotation files.
///
/// With `reset_after` the cache is emptied and the file handle closed,
/// so the next lap starts a fresh rotation file. Otherwise cached data
/// stays valid and only the sync mark advances.
fn flush_cache(config: &mut FilterConfig, ctx: &DeviceContext<'_>, reset_after: bool) -> Result<()> {
    let ranges = match config.cache.as_ref() {
        Some(cache) => cache.sync_ranges(),
        None => return Ok(()),
    };
    if ranges.is_empty() {
        return Ok(());
    }
    // Size-triggered flushes open a fresh rotation file each time;
    // SpecificSize is bounded by FileSize so one flush fits one file.
    if reset_after {
        config.rotation.rotate(
            ctx.rules,
            ctx.storage_path,
            &config.file_name,
            config.file_size,
            config.num_files,
            config.gzip,
            ctx.newest,
        )?;
    }
    for range in ranges {
        flush_range(config, ctx, range)?;
    }
    if let Some(writer) = config.rotation.writer_mut() {
        writer.sync()?;
    }
    if let Some(cache) = config.cache.as_mut() {
        if reset_after {
            cache.reset();
        } else {
            cache.mark_synced();
        }
    }
    if reset_after {
        config.rotation.close();
    }
    Ok(())
}

/// Writes one cache range, splitting at frame boundaries so a rotation
/// file never exceeds its size limit mid-frame.
fn flush_range(
    config: &mut FilterConfig,
    ctx: &DeviceContext<'_>,
    range: Range<usize>,
) -> Result<()> {
    let FilterConfig {
        cache,
        rotation,
        file_name,
        file_size,
        num_files,
        gzip,
        ..
    } = config;
    let Some(cache) = cache.as_ref() else {
        return Ok(());
    };
    let mut data = cache.slice(range);
    let (file_size, num_files, gzip) = (*file_size, *num_files, *gzip);

    while !data.is_empty() {
        if rotation.writer_mut().is_none() {
            rotation.open_for_append(
                ctx.rules,
                ctx.storage_path,
                file_name,
                file_size,
                num_files,
                0,
                gzip,
                ctx.newest,
            )?;
        }
        let written = rotation.writer_mut().map_or(0, |w| w.size());
        let remaining = usize::try_from(file_size.saturating_sub(written)).unwrap_or(usize::MAX);

        if data.len() <= remaining {
            open_writer(rotation)?.write_all(data)?;
            break;
        }
        match find_last_frame_start(data, remaining) {
            Some(cut) if cut > 0 => {
                open_writer(rotation)?.write_all(&data[..cut])?;
                data = &data[cut..];
                rotation.rotate(
                    ctx.rules,
                    ctx.storage_path,
                    file_name,
                    file_size,
                    num_files,
                    gzip,
                    ctx.newest,
                )?;
            }
            _ if written > 0 => {
                rotation.rotate(
                    ctx.rules,
                    ctx.storage_path,
                    file_name,
                    file_size,
                    num_files,
                    gzip,
                    ctx.newest,
                )?;
            }
            _ => {
                // Fresh file and a single frame above the size limit.
                // Write the frame whole rather than splitting it.
                let end = find_frame_start(data, 1).unwrap_or(data.len());
                open_writer(rotation)?.write_all(&data[..end])?;
                data = &data[end..];
            }
        }
    }
    Ok(())
}

fn open_writer(rotation: &mut RotationState) -> Result<&mut LogWriter> {
    rotation
        .writer_mut()
        .ok_or(StorageError::NotConnected("no rotation file open"))
}
