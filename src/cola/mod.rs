//! COLA controller — the per-table storage engine.
//!
//! A COLA (Cache-Oblivious Lookaside Array) arranges one table's data as a
//! write buffer ([`Blocks`]) in front of up to [`LEVELS`] immutable sorted
//! runs ([`Extent`]) of geometrically doubling capacity: level k holds up
//! to `MAX_RECORDS · 2^k` records.
//!
//! ## Design Invariants
//!
//! - Levels are totally ordered by recency: a smaller level holds strictly
//!   newer writes than any larger one.
//! - A key appears at most once in the buffer and at most once per level;
//!   the first hit when scanning buffer → level 0 → level 1 → … is
//!   authoritative.
//! - Tombstones (empty values) survive intermediate merges so they can mask
//!   stale copies below, and are dropped exactly when a run is installed at
//!   the bottom occupied level.
//! - The persisted bitmap matches the set of extent files on disk after
//!   every successful push-down.
//!
//! ## Push-down
//!
//! When the buffer fills, its sorted snapshot becomes a candidate run that
//! cascades down the levels: each occupied level is merged in (newer side
//! wins duplicate keys) and vacated, until a free level receives the
//! candidate. The new extent is renamed into place and the bitmap is
//! appended to `meta` *before* the consumed extents are unlinked — the
//! bitmap write is the linearization point, and any stray files a crash
//! leaves behind are deleted on the next open.
//!
//! ## Concurrency Model
//!
//! All state lives behind one `Arc<RwLock<_>>`; handles are cheap clones.
//! Reads take the read lock; `set` takes the write lock, which therefore
//! spans any push-down it triggers. A concurrent reader observes either the
//! pre- or post-push-down extent set, never a mixture.

// ------------------------------------------------------------------------------------------------
// Unit tests
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests;

// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::{
    fs::{self, File},
    io::{self, Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
    sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use thiserror::Error;
use tracing::{error, info, trace, warn};

use crate::blocks::{Blocks, BlocksError, HexKey, MAX_RECORDS};
use crate::extent::{Extent, ExtentBuilder, ExtentError};

// ------------------------------------------------------------------------------------------------
// Constants
// ------------------------------------------------------------------------------------------------

/// Number of levels the controller can hold.
///
/// Level k stores up to `MAX_RECORDS · 2^k` records, so 52 doublings past
/// the 2^12-record buffer already exhaust a 64-bit record count.
pub const LEVELS: usize = 53;

/// File name of the level-occupancy metadata log.
const META_FILE: &str = "meta";

/// File name of the buffer log.
const BLX_FILE: &str = "blx";

/// Byte length of one persisted bitmap.
const BITMAP_SIZE: u64 = 8;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by [`Cola`] operations.
#[derive(Debug, Error)]
pub enum ColaError {
    /// Underlying filesystem I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Buffer-layer failure.
    #[error("blocks error: {0}")]
    Blocks(#[from] BlocksError),

    /// Extent-layer failure.
    #[error("extent error: {0}")]
    Extent(#[from] ExtentError),

    /// The bitmap claims a level whose extent file is gone.
    #[error("extent file missing for occupied level {level}")]
    MissingExtent {
        /// The level whose file could not be opened.
        level: usize,
    },

    /// The metadata file does not hold a whole bitmap.
    #[error("meta file corrupt: {0}")]
    CorruptMeta(String),

    /// Internal invariant violation or poisoned lock.
    #[error("internal error: {0}")]
    Internal(String),
}

// ------------------------------------------------------------------------------------------------
// Statistics
// ------------------------------------------------------------------------------------------------

/// Snapshot of controller state returned by [`Cola::stats`].
#[derive(Debug)]
pub struct ColaStats {
    /// Records currently held in the write buffer.
    pub buffered: usize,

    /// Level-occupancy bitmap; bit k set iff level k is populated.
    pub bitmap: u64,

    /// `(level, record count)` for every occupied level, smallest first.
    pub levels: Vec<(usize, u64)>,
}

// ------------------------------------------------------------------------------------------------
// COLA Core
// ------------------------------------------------------------------------------------------------

struct ColaInner {
    /// Table directory holding `meta`, `blx`, and the `ext_<k>` files.
    dir: PathBuf,

    /// Metadata log; the last 8 bytes are the authoritative bitmap.
    meta: File,

    /// Level-occupancy bitmap.
    bitmap: u64,

    /// Level-0 write buffer.
    blocks: Blocks,

    /// Open extents, indexed by level.
    extents: [Option<Extent>; LEVELS],
}

/// A per-table COLA engine handle.
///
/// Thread-safe — clones share the same underlying state.
pub struct Cola {
    inner: Arc<RwLock<ColaInner>>,
}

impl Clone for Cola {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Cola {
    /// Creates a fresh table: a new directory, a `meta` file holding the
    /// zero bitmap, and an empty buffer log.
    ///
    /// Fails if the directory already exists.
    pub fn create<P: AsRef<Path>>(dir: P) -> Result<Self, ColaError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir(&dir)?;

        let mut meta = File::options()
            .read(true)
            .write(true)
            .create(true)
            .open(dir.join(META_FILE))?;
        meta.write_all(&0u64.to_be_bytes())?;

        let blocks = Blocks::create(dir.join(BLX_FILE))?;

        info!(dir = %dir.display(), "cola created");

        Ok(Self::wrap(ColaInner {
            dir,
            meta,
            bitmap: 0,
            blocks,
            extents: [const { None }; LEVELS],
        }))
    }

    /// Opens an existing table.
    ///
    /// Reads the authoritative bitmap from the tail of `meta`, rewrites it
    /// at offset 0 and truncates `meta` to exactly 8 bytes; reloads the
    /// buffer; deletes stray `.1` builder outputs and orphan extents a
    /// crash may have left behind; opens the extent of every occupied
    /// level. A buffer found full is pushed down immediately.
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self, ColaError> {
        let dir = dir.as_ref().to_path_buf();

        let mut meta = File::options()
            .read(true)
            .write(true)
            .open(dir.join(META_FILE))?;
        let len = meta.metadata()?.len();
        if len < BITMAP_SIZE {
            return Err(ColaError::CorruptMeta(format!(
                "{len} bytes, need at least {BITMAP_SIZE}"
            )));
        }

        meta.seek(SeekFrom::End(-(BITMAP_SIZE as i64)))?;
        let mut tail = [0u8; BITMAP_SIZE as usize];
        meta.read_exact(&mut tail)?;
        let bitmap = u64::from_be_bytes(tail);
        if bitmap >> LEVELS != 0 {
            return Err(ColaError::CorruptMeta(format!(
                "bitmap {bitmap:#018x} claims levels past {LEVELS}"
            )));
        }

        meta.seek(SeekFrom::Start(0))?;
        meta.write_all(&tail)?;
        meta.set_len(BITMAP_SIZE)?;

        let blocks = Blocks::load(dir.join(BLX_FILE))?;

        remove_orphans(&dir, bitmap)?;

        let mut extents = [const { None }; LEVELS];
        for (level, slot) in extents.iter_mut().enumerate() {
            if bitmap & (1 << level) == 0 {
                continue;
            }
            let path = dir.join(format!("ext_{level}"));
            *slot = Some(Extent::open(&path).map_err(|e| match e {
                ExtentError::Io(err) if err.kind() == io::ErrorKind::NotFound => {
                    ColaError::MissingExtent { level }
                }
                other => other.into(),
            })?);
        }

        let mut inner = ColaInner {
            dir,
            meta,
            bitmap,
            blocks,
            extents,
        };

        if inner.blocks.is_full() {
            inner.push_down()?;
        }

        info!(
            dir = %inner.dir.display(),
            bitmap = format_args!("{:b}", inner.bitmap),
            buffered = inner.blocks.len(),
            "cola opened"
        );

        Ok(Self::wrap(inner))
    }

    fn wrap(inner: ColaInner) -> Self {
        Self {
            inner: Arc::new(RwLock::new(inner)),
        }
    }

    /// Looks up a key: buffer first, then every occupied level smallest
    /// (newest) first. The first hit is authoritative.
    ///
    /// Returns `None` for absent keys and for tombstones alike; the value
    /// is copied out so it outlives any later push-down.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, ColaError> {
        let inner = self.read_lock()?;

        if let Some(value) = inner.blocks.get(key) {
            trace!(key = %HexKey(key), "hit in buffer");
            return Ok(non_tombstone(value));
        }

        let mut level = 0;
        while inner.bitmap >> level != 0 {
            if inner.bitmap & (1 << level) != 0 {
                if let Some(extent) = inner.extents[level].as_ref() {
                    if let Some(i) = extent.find(key) {
                        trace!(key = %HexKey(key), level, "hit in extent");
                        return Ok(non_tombstone(extent.record(i).1));
                    }
                }
            }
            level += 1;
        }

        Ok(None)
    }

    /// Writes a record. An empty value writes a tombstone.
    ///
    /// The buffer absorbs the write; when it is (or just became) full the
    /// write lock is held across the resulting push-down.
    pub fn set(&self, key: &[u8], value: &[u8]) -> Result<(), ColaError> {
        let mut inner = self.write_lock()?;

        match inner.blocks.set(key, value) {
            Ok(()) => {}
            Err(BlocksError::Full) => {
                inner.push_down()?;
                inner.blocks.set(key, value)?;
            }
            Err(e) => return Err(e.into()),
        }

        if inner.blocks.is_full() {
            inner.push_down()?;
        }
        Ok(())
    }

    /// Record count across the buffer and every level. An upper bound:
    /// copies of one key at several levels each count once.
    pub fn size(&self) -> Result<u64, ColaError> {
        let inner = self.read_lock()?;
        Ok(inner.blocks.len() as u64
            + inner
                .extents
                .iter()
                .flatten()
                .map(|e| e.total())
                .sum::<u64>())
    }

    /// Snapshot of buffer occupancy, bitmap, and per-level totals.
    pub fn stats(&self) -> Result<ColaStats, ColaError> {
        let inner = self.read_lock()?;
        Ok(ColaStats {
            buffered: inner.blocks.len(),
            bitmap: inner.bitmap,
            levels: inner
                .extents
                .iter()
                .enumerate()
                .filter_map(|(level, e)| e.as_ref().map(|e| (level, e.total())))
                .collect(),
        })
    }

    /// Flushes the buffer log and the metadata log. Mappings and file
    /// handles are released when the last handle drops.
    pub fn close(&self) -> Result<(), ColaError> {
        let inner = self.write_lock()?;
        inner.blocks.sync()?;
        inner.meta.sync_all()?;
        info!(dir = %inner.dir.display(), "cola closed");
        Ok(())
    }

    fn read_lock(&self) -> Result<RwLockReadGuard<'_, ColaInner>, ColaError> {
        self.inner.read().map_err(|_| {
            error!("cola rwlock poisoned");
            ColaError::Internal("rwlock poisoned".into())
        })
    }

    fn write_lock(&self) -> Result<RwLockWriteGuard<'_, ColaInner>, ColaError> {
        self.inner.write().map_err(|_| {
            error!("cola rwlock poisoned");
            ColaError::Internal("rwlock poisoned".into())
        })
    }
}

// ------------------------------------------------------------------------------------------------
// Push-down
// ------------------------------------------------------------------------------------------------

impl ColaInner {
    /// Converts the full buffer into an extent, cascading merges down the
    /// levels until a free one receives the candidate.
    fn push_down(&mut self) -> Result<(), ColaError> {
        let mut candidate = ExtentBuilder::from_blocks(&self.blocks);
        let mut consumed = Vec::new();

        let mut level = 0;
        while self.bitmap & (1 << level) != 0 {
            let older = self.extents[level].take().ok_or_else(|| {
                ColaError::Internal(format!("bitmap bit {level} set without an open extent"))
            })?;
            candidate = candidate.merge_older(&older);
            consumed.push(older);
            self.bitmap &= !(1 << level);
            level += 1;
        }

        // The candidate lands below every remaining occupied level: the
        // floor. Tombstones have nothing left to mask.
        if self.bitmap >> level == 0 {
            candidate = candidate.drop_tombstones();
        }

        if candidate.is_empty() {
            // Every record was a tombstone; nothing to install.
            warn!(dir = %self.dir.display(), level, "push-down compacted to nothing");
        } else {
            debug_assert!((candidate.len() as u128) <= (MAX_RECORDS as u128) << level);
            let extent = candidate.write(self.extent_path(level))?;
            self.extents[level] = Some(extent);
            self.bitmap |= 1 << level;
        }

        // Linearization point: the appended bitmap commits the new layout.
        self.append_bitmap()?;

        for extent in consumed {
            extent.free()?;
        }
        self.blocks.reset()?;

        info!(
            dir = %self.dir.display(),
            level,
            bitmap = format_args!("{:b}", self.bitmap),
            "push-down complete"
        );
        Ok(())
    }

    /// Appends the current bitmap to the metadata log.
    fn append_bitmap(&mut self) -> Result<(), ColaError> {
        self.meta.seek(SeekFrom::End(0))?;
        self.meta.write_all(&self.bitmap.to_be_bytes())?;
        Ok(())
    }

    fn extent_path(&self, level: usize) -> PathBuf {
        self.dir.join(format!("ext_{level}"))
    }
}

// ------------------------------------------------------------------------------------------------
// Helpers
// ------------------------------------------------------------------------------------------------

/// Maps an empty (tombstone) value to "not found".
fn non_tombstone(value: &[u8]) -> Option<Vec<u8>> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_vec())
    }
}

/// Deletes leftover `.1` builder outputs and extent files whose level the
/// bitmap does not claim. A crash between installing an extent and the
/// bitmap append (or between the append and freeing consumed extents) can
/// strand either kind.
fn remove_orphans(dir: &Path, bitmap: u64) -> Result<(), ColaError> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let Some(rest) = name.strip_prefix("ext_") else {
            continue;
        };

        let keep = match rest.strip_suffix(".1") {
            Some(_) => false,
            None => rest
                .parse::<usize>()
                .is_ok_and(|level| level < LEVELS && bitmap & (1 << level) != 0),
        };

        if !keep {
            warn!(path = %path.display(), "removing orphan extent file");
            fs::remove_file(&path)?;
        }
    }
    Ok(())
}
