//! In-memory ring cache for deferred-sync filters.
//!
//! A filter whose sync strategy is not `ON_MSG` batches messages in a
//! ring buffer and flushes them to rotation files only when its trigger
//! fires. The footer records where the valid window of the ring lies so
//! a flush can reconstruct message order even after the write position
//! wrapped around and overwrote the oldest data.

use std::ops::Range;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::error::{Result, StorageError};
use crate::types::STORAGE_MAGIC;

/// Serialized size of a [`CacheFooter`], counted against the budget.
pub const FOOTER_LEN: usize = 16;

/// Bookkeeping trailer of one ring cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheFooter {
    /// Next write position.
    pub offset: u32,
    /// Number of wrap-arounds since the last sync.
    pub wrap_around_cnt: u32,
    /// Position up to which data was already synced.
    pub last_sync_offset: u32,
    /// End of valid data at the moment of the last wrap.
    pub end_sync_offset: u32,
}

#[derive(Debug, Default)]
struct BudgetInner {
    total: usize,
    used: usize,
}

/// Shared memory budget for all ring caches of one storage device.
///
/// Every cache reserves its capacity plus the footer size up front and
/// releases it on drop; a reservation that would exceed the limit fails
/// closed instead of shrinking.
#[derive(Debug, Clone)]
pub struct CacheBudget {
    inner: Arc<Mutex<BudgetInner>>,
}

impl CacheBudget {
    /// Creates a budget with `total` bytes available.
    #[must_use]
    pub fn new(total: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(BudgetInner { total, used: 0 })),
        }
    }

    fn reserve(&self, bytes: usize) -> Result<()> {
        let mut inner = self.inner.lock();
        let available = inner.total.saturating_sub(inner.used);
        if bytes > available {
            return Err(StorageError::CacheOverCommitted {
                requested: bytes,
                available,
            });
        }
        inner.used += bytes;
        Ok(())
    }

    fn release(&self, bytes: usize) {
        let mut inner = self.inner.lock();
        inner.used = inner.used.saturating_sub(bytes);
    }

    /// Bytes currently reserved.
    #[must_use]
    pub fn used(&self) -> usize {
        self.inner.lock().used
    }
}

/// Outcome of offering a message to the ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// Message stored at the current write position.
    Stored,
    /// Message does not fit at the current position; the caller must
    /// either sync or wrap before retrying.
    NeedsSync,
}

/// Fixed-capacity ring buffer holding whole storage frames.
#[derive(Debug)]
pub struct RingCache {
    buf: Vec<u8>,
    footer: CacheFooter,
    budget: CacheBudget,
}

impl RingCache {
    /// Allocates a cache of `capacity` bytes against the budget.
    pub fn new(capacity: usize, budget: &CacheBudget) -> Result<Self> {
        budget.reserve(capacity + FOOTER_LEN)?;
        Ok(Self {
            buf: vec![0; capacity],
            footer: CacheFooter::default(),
            budget: budget.clone(),
        })
    }

    /// Cache capacity in bytes.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Current footer state.
    #[must_use]
    pub const fn footer(&self) -> &CacheFooter {
        &self.footer
    }

    /// Offers a message to the ring without wrapping.
    ///
    /// A message larger than the whole cache is rejected outright.
    pub fn push(&mut self, msg: &[u8]) -> Result<PushOutcome> {
        if msg.len() > self.buf.len() {
            return Err(StorageError::CacheTooSmall {
                msg_size: msg.len(),
                cache_size: self.buf.len(),
            });
        }
        let offset = self.footer.offset as usize;
        if offset + msg.len() > self.buf.len() {
            return Ok(PushOutcome::NeedsSync);
        }
        self.buf[offset..offset + msg.len()].copy_from_slice(msg);
        self.footer.offset += msg.len() as u32;
        Ok(PushOutcome::Stored)
    }

    /// Wraps the write position back to the start, remembering where the
    /// valid data of the previous lap ended.
    pub fn wrap(&mut self) {
        self.footer.end_sync_offset = self.footer.offset;
        self.footer.offset = 0;
        self.footer.wrap_around_cnt += 1;
        debug!(
            wrap_around_cnt = self.footer.wrap_around_cnt,
            end_sync_offset = self.footer.end_sync_offset,
            "ring cache wrapped"
        );
    }

    /// Byte ranges of the buffer holding unsynced data, in message
    /// order. Empty when there is nothing to flush.
    ///
    /// Three footer states are distinguished: no wrap since the last
    /// sync, exactly one wrap with the write position still behind the
    /// old sync point, and everything else (the sync point itself was
    /// overwritten). In the last case the front range starts at the
    /// first intact frame after the write position.
    #[must_use]
    pub fn sync_ranges(&self) -> Vec<Range<usize>> {
        let f = &self.footer;
        let offset = f.offset as usize;
        let last_sync = f.last_sync_offset as usize;
        let end_sync = f.end_sync_offset as usize;

        let mut ranges = Vec::with_capacity(2);
        if f.wrap_around_cnt < 1 {
            if last_sync < offset {
                ranges.push(last_sync..offset);
            }
        } else if f.wrap_around_cnt == 1 && offset < last_sync {
            if last_sync < end_sync {
                ranges.push(last_sync..end_sync);
            }
            if offset > 0 {
                ranges.push(0..offset);
            }
        } else {
            // The write position overwrote the old sync point; data from
            // there to the lap end is the oldest still intact.
            if let Some(start) = find_frame_start(&self.buf[..end_sync], offset) {
                if start < end_sync {
                    ranges.push(start..end_sync);
                }
            }
            if offset > 0 {
                ranges.push(0..offset);
            }
        }
        ranges
    }

    /// Borrow of one buffer range, for flushing.
    #[must_use]
    pub fn slice(&self, range: Range<usize>) -> &[u8] {
        &self.buf[range]
    }

    /// Records a completed sync, keeping cached data for the next lap.
    pub fn mark_synced(&mut self) {
        self.footer.last_sync_offset = self.footer.offset;
        self.footer.wrap_around_cnt = 0;
        self.footer.end_sync_offset = 0;
    }

    /// Empties the cache completely.
    pub fn reset(&mut self) {
        self.footer = CacheFooter::default();
    }
}

impl Drop for RingCache {
    fn drop(&mut self) {
        self.budget.release(self.buf.len() + FOOTER_LEN);
    }
}

/// First position at or after `from` where a storage frame begins.
#[must_use]
pub fn find_frame_start(buf: &[u8], from: usize) -> Option<usize> {
    if buf.len() < STORAGE_MAGIC.len() {
        return None;
    }
    (from..=buf.len() - STORAGE_MAGIC.len()).find(|&i| buf[i..i + 4] == STORAGE_MAGIC)
}

/// Last position strictly below `limit` where a storage frame begins.
#[must_use]
pub fn find_last_frame_start(buf: &[u8], limit: usize) -> Option<usize> {
    let limit = limit.min(buf.len());
    if limit < STORAGE_MAGIC.len() {
        return None;
    }
    (0..=limit - STORAGE_MAGIC.len()).rev().find(|&i| buf[i..i + 4] == STORAGE_MAGIC)
}
