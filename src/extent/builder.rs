//! Extent builders — materialize sorted runs from a buffer snapshot, a
//! merge of two runs, or a tombstone-dropping compaction.
//!
//! An [`ExtentBuilder`] holds the candidate run in memory as a sorted,
//! duplicate-free record list. The three constructions are:
//!
//! - [`ExtentBuilder::from_blocks`] — snapshot the level-0 buffer and sort
//!   it ascending by key.
//! - [`ExtentBuilder::merge_older`] — two-pointer merge with an older
//!   extent; on duplicate keys the builder side (newer) wins and both
//!   cursors advance.
//! - [`ExtentBuilder::drop_tombstones`] — omit empty-value records; used
//!   only when the run is being installed at the bottom occupied level.
//!
//! [`ExtentBuilder::write`] materializes the run to `<path>.1`, syncs, and
//! renames into place, so a crash never exposes a partial extent. All three
//! constructions preserve strict ascending key order.

use std::{
    fs::{self, File},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use tracing::debug;

use crate::blocks::Blocks;
use crate::codec::pack_index_entry;

use super::{EXTENT_HEAD_SIZE, Extent, ExtentError, INDEX_ENTRY_SIZE};

// ------------------------------------------------------------------------------------------------
// ExtentBuilder
// ------------------------------------------------------------------------------------------------

/// A sorted, duplicate-free candidate run awaiting materialization.
pub struct ExtentBuilder {
    /// Records in strict ascending key order.
    records: Vec<(Vec<u8>, Vec<u8>)>,
}

impl ExtentBuilder {
    /// Snapshots the live records of a buffer and sorts them by key.
    ///
    /// The buffer's unique-key invariant carries over, so the result is
    /// strictly ascending.
    pub fn from_blocks(blocks: &Blocks) -> Self {
        let mut records: Vec<(Vec<u8>, Vec<u8>)> = blocks
            .records()
            .map(|(k, v)| (k.to_vec(), v.to_vec()))
            .collect();
        records.sort_unstable_by(|a, b| a.0.cmp(&b.0));
        Self { records }
    }

    /// Merges an older extent into this (newer) run.
    ///
    /// Two-pointer merge by lexicographic key order; on equal keys the
    /// newer record wins and both sides advance, collapsing the duplicate.
    pub fn merge_older(self, older: &Extent) -> Self {
        let mut out = Vec::with_capacity(self.records.len() + older.total() as usize);
        let mut newer = self.records.into_iter().peekable();

        for i in 0..older.total() {
            let (okey, ovalue) = older.record(i);

            let mut replaced = false;
            while let Some(rec) = newer.next_if(|(nkey, _)| nkey.as_slice() <= okey) {
                let duplicate = rec.0 == okey;
                out.push(rec);
                if duplicate {
                    replaced = true;
                    break;
                }
            }
            if !replaced {
                out.push((okey.to_vec(), ovalue.to_vec()));
            }
        }

        // Drain the remainder of the newer side in order.
        out.extend(newer);
        Self { records: out }
    }

    /// Drops tombstones (empty values) for installation at the bottom
    /// occupied level. When nothing is dropped this is the identity.
    pub fn drop_tombstones(mut self) -> Self {
        self.records.retain(|(_, value)| !value.is_empty());
        self
    }

    /// Number of records in the candidate run.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True when the candidate run holds no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Materializes the run: writes `size | total | index | records` to
    /// `<path>.1`, syncs, renames to `path`, and reopens it mmapped.
    pub fn write<P: AsRef<Path>>(self, path: P) -> Result<Extent, ExtentError> {
        let path = path.as_ref();
        debug_assert!(
            self.records.windows(2).all(|w| w[0].0 < w[1].0),
            "builder records must be strictly ascending"
        );

        let total = self.records.len() as u64;
        let payload: u64 = self
            .records
            .iter()
            .map(|(k, v)| (k.len() + v.len()) as u64)
            .sum();
        let size = EXTENT_HEAD_SIZE + total * INDEX_ENTRY_SIZE + payload;

        let tmp = tmp_path(path);
        let mut file = File::options()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp)?;
        let mut writer = BufWriter::new(&mut file);

        writer.write_all(&size.to_be_bytes())?;
        writer.write_all(&total.to_be_bytes())?;

        let mut offset = EXTENT_HEAD_SIZE + total * INDEX_ENTRY_SIZE;
        for (key, value) in &self.records {
            writer.write_all(&pack_index_entry(offset, key.len()).to_be_bytes())?;
            offset += (key.len() + value.len()) as u64;
        }
        for (key, value) in &self.records {
            writer.write_all(key)?;
            writer.write_all(value)?;
        }

        writer.flush()?;
        drop(writer);
        file.sync_all()?;
        drop(file);
        fs::rename(&tmp, path)?;

        debug!(path = %path.display(), total, size, "extent materialized");

        Extent::open(path)
    }
}

/// Sibling temporary path: `ext_3` → `ext_3.1`.
fn tmp_path(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_os_string();
    os.push(".1");
    PathBuf::from(os)
}
