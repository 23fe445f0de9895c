//! Extent — an immutable, sorted, memory-mapped run for one COLA level.
//!
//! ## On-disk layout
//!
//! ```text
//! [SIZE_BE (8 B)]      total byte length of the file
//! [TOTAL_BE (8 B)]     number of records
//! [INDEX]              total × u64 BE entries: (offset << 20) | klen
//! [RECORDS]            key || value, concatenated in key-sorted order
//! ```
//!
//! `offset` is the byte position of a record from the start of the file.
//! The value length of record `i` is derived: `offset[i+1] − offset[i] −
//! klen[i]`, with the last record bounded by `size`. Keys are strictly
//! ascending, so a point lookup is a binary search over `[0, total)`.
//!
//! # Concurrency model
//!
//! Extents are immutable — reads are lock-free and thread-safe. The byte
//! slices returned by [`Extent::key`] and [`Extent::record`] borrow the
//! mapping and therefore cannot outlive the extent; owners copy values out
//! before releasing it.
//!
//! # Guarantees
//!
//! - **Immutability:** once built, an extent file is never modified.
//! - **Atomic installation:** builders write to a `.1` temporary and rename
//!   into place on success; a crash cannot expose a partial extent.
//! - **Validated mapping:** all slicing bounds are checked against the real
//!   file length at open time.

// ------------------------------------------------------------------------------------------------
// Sub-modules
// ------------------------------------------------------------------------------------------------

pub mod builder;

#[cfg(test)]
mod tests;

pub use builder::ExtentBuilder;

// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::{
    cmp::Ordering,
    fs::{self, File},
    io,
    path::{Path, PathBuf},
};

use memmap2::Mmap;
use thiserror::Error;
use tracing::{debug, info};

use crate::codec::unpack_index_entry;

// ------------------------------------------------------------------------------------------------
// Constants
// ------------------------------------------------------------------------------------------------

/// Byte length of the `(size, total)` extent head.
pub(crate) const EXTENT_HEAD_SIZE: u64 = 16;

/// Byte length of one index entry.
pub(crate) const INDEX_ENTRY_SIZE: u64 = 8;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by extent operations.
#[derive(Debug, Error)]
pub enum ExtentError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The file does not decode as an extent.
    #[error("malformed extent: {0}")]
    Malformed(String),
}

// ------------------------------------------------------------------------------------------------
// Extent — immutable reader
// ------------------------------------------------------------------------------------------------

/// A fully memory-mapped, immutable sorted run.
pub struct Extent {
    /// Read-only mapping of the whole file.
    mmap: Mmap,

    /// Total byte length of the file.
    size: u64,

    /// Number of records.
    total: u64,

    /// Path of the backing file, kept for [`Extent::free`].
    path: PathBuf,
}

impl Extent {
    /// Opens an extent file, validates its head against the real file
    /// length, and maps it read-only.
    ///
    /// # Safety
    ///
    /// Uses `unsafe { Mmap::map(...) }` but is memory-safe because the file
    /// is never written after its rename into place, the mapping is
    /// read-only, and every slice boundary is validated before use.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, ExtentError> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        let mmap = unsafe { Mmap::map(&file)? };
        drop(file);

        if (mmap.len() as u64) < EXTENT_HEAD_SIZE {
            return Err(ExtentError::Malformed("file shorter than head".into()));
        }

        let size = u64::from_be_bytes(mmap[0..8].try_into().expect("8-byte slice"));
        let total = u64::from_be_bytes(mmap[8..16].try_into().expect("8-byte slice"));

        if size != mmap.len() as u64 {
            return Err(ExtentError::Malformed(format!(
                "head size {size} does not match file length {}",
                mmap.len()
            )));
        }
        let records_start = total
            .checked_mul(INDEX_ENTRY_SIZE)
            .and_then(|n| n.checked_add(EXTENT_HEAD_SIZE))
            .filter(|&n| n <= size)
            .ok_or_else(|| {
                ExtentError::Malformed(format!(
                    "index of {total} entries exceeds file length {size}"
                ))
            })?;

        let extent = Self {
            mmap,
            size,
            total,
            path,
        };

        // Validate every index entry up front so record slicing can never
        // leave the mapping.
        let mut prev_end = records_start;
        for i in 0..total {
            let (offset, klen) = extent.index(i);
            let end = if i + 1 == total {
                size
            } else {
                extent.index(i + 1).0
            };
            if offset < prev_end || offset + klen as u64 > end || end > size {
                return Err(ExtentError::Malformed(format!(
                    "index entry {i} out of bounds"
                )));
            }
            prev_end = end;
        }

        debug!(path = %extent.path.display(), total, size, "extent opened");
        Ok(extent)
    }

    /// Number of records in this extent.
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Total byte length of the extent file.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Decodes index entry `i` into `(offset, klen)`.
    pub fn index(&self, i: u64) -> (u64, usize) {
        debug_assert!(i < self.total);
        let at = (EXTENT_HEAD_SIZE + i * INDEX_ENTRY_SIZE) as usize;
        let entry = u64::from_be_bytes(self.mmap[at..at + 8].try_into().expect("8-byte slice"));
        unpack_index_entry(entry)
    }

    /// Key bytes of record `i`, borrowed from the mapping.
    pub fn key(&self, i: u64) -> &[u8] {
        let (offset, klen) = self.index(i);
        &self.mmap[offset as usize..offset as usize + klen]
    }

    /// Key and value byte spans of record `i`, borrowed from the mapping.
    ///
    /// An empty value span is a tombstone.
    pub fn record(&self, i: u64) -> (&[u8], &[u8]) {
        let (offset, klen) = self.index(i);
        let end = if i + 1 == self.total {
            self.size
        } else {
            self.index(i + 1).0
        };
        let offset = offset as usize;
        (
            &self.mmap[offset..offset + klen],
            &self.mmap[offset + klen..end as usize],
        )
    }

    /// Binary search for a key over `[0, total)`.
    pub fn find(&self, key: &[u8]) -> Option<u64> {
        let (mut lo, mut hi) = (0, self.total);
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            match self.key(mid).cmp(key) {
                Ordering::Equal => return Some(mid),
                Ordering::Less => lo = mid + 1,
                Ordering::Greater => hi = mid,
            }
        }
        None
    }

    /// Unmaps and unlinks the extent. Consuming `self` makes the
    /// exactly-once contract structural.
    pub fn free(self) -> Result<(), ExtentError> {
        let path = self.path.clone();
        drop(self);
        fs::remove_file(&path)?;
        info!(path = %path.display(), "extent freed");
        Ok(())
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}
