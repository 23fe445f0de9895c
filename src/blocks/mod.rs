//! Blocks — the level-0 record buffer and its append-only `blx` log.
//!
//! ## Design Invariants
//!
//! - At most [`MAX_RECORDS`] live records; no two live slots hold the same
//!   key; slot indices form the dense range `[0, count)`.
//! - Every `set` appends exactly one `(head, key, value)` entry to `blx`
//!   before the in-memory state changes. Overwrites append a replacement
//!   entry carrying the same slot index.
//! - No fsync is performed per write; durability of the tail is best-effort
//!   and a partial trailing entry is dropped on recovery.
//!
//! ## Recovery Semantics
//!
//! [`Blocks::load`] replays the log sequentially. The latest entry per slot
//! wins. When any slot is seen more than once the file is rewritten compact
//! (one entry per live slot, ascending slot order) through a `blx.1`
//! temporary and an atomic rename. Finally the file is truncated to the last
//! whole record, dropping a partial trailer from an interrupted append.
//!
//! A head whose slot index is out of range — at or beyond capacity, or
//! skipping ahead of the dense slot prefix — marks the start of a corrupt
//! trailer and truncation happens there.

// ------------------------------------------------------------------------------------------------
// Unit tests
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests;

// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::{
    collections::HashMap,
    fs::{self, File},
    io::{self, BufReader, Read, Write},
    path::{Path, PathBuf},
};

use thiserror::Error;
use tracing::{info, trace, warn};

use crate::codec::{BlxHead, HEAD_SIZE, MAX_KEY_LEN, MAX_VALUE_LEN, SLOT_BITS};

// ------------------------------------------------------------------------------------------------
// Constants
// ------------------------------------------------------------------------------------------------

/// Level-0 buffer capacity C. One PushDown converts this many records into
/// a level-0 extent.
pub const MAX_RECORDS: usize = 1 << SLOT_BITS;

/// When the `blx` file is smaller than this after a PushDown it is truncated
/// in place; a larger file is replaced with a fresh one.
pub const BLX_BUF_SIZE: u64 = 16 * 1024 * 1024;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by [`Blocks`] operations.
#[derive(Debug, Error)]
pub enum BlocksError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Key exceeds the wire limit. State is unchanged.
    #[error("key too long: {0} bytes (max {MAX_KEY_LEN})")]
    KeyTooLarge(usize),

    /// Value exceeds the wire limit. State is unchanged.
    #[error("value too long: {0} bytes (max {MAX_VALUE_LEN})")]
    ValueTooLarge(usize),

    /// The buffer holds [`MAX_RECORDS`] records and the key is new; the
    /// owner must push the buffer down into the extent levels first.
    #[error("buffer full ({MAX_RECORDS} records)")]
    Full,
}

// ------------------------------------------------------------------------------------------------
// Blocks Core
// ------------------------------------------------------------------------------------------------

/// One live record in the buffer.
#[derive(Debug, Clone)]
struct BufferRecord {
    key: Vec<u8>,
    value: Vec<u8>,
}

/// The level-0 write buffer: a capacity-bounded slot array with O(1) key
/// lookup, persisted through the append-only `blx` log.
pub struct Blocks {
    /// Append-mode handle to the `blx` log.
    file: File,

    /// Path of the `blx` log.
    path: PathBuf,

    /// Live records; index = slot, length = count.
    records: Vec<BufferRecord>,

    /// Key bytes → slot index.
    dict: HashMap<Vec<u8>, usize>,

    /// Set during load when any slot was seen more than once.
    compact: bool,
}

impl Blocks {
    /// Creates an empty buffer, truncating any existing `blx` file.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self, BlocksError> {
        let path = path.as_ref().to_path_buf();
        let file = File::options().append(true).create(true).open(&path)?;
        file.set_len(0)?;

        info!(path = %path.display(), "blx created");

        Ok(Self {
            file,
            path,
            records: Vec::new(),
            dict: HashMap::new(),
            compact: false,
        })
    }

    /// Reopens a buffer from its `blx` log.
    ///
    /// Collapses duplicate slot entries (rewrite through `blx.1` + rename)
    /// and truncates the file to the last whole record.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, BlocksError> {
        let path = path.as_ref().to_path_buf();
        let mut blx = Self::scan(&path)?;

        if blx.compact {
            blx.rewrite()?;
        }

        // Drop a partial trailing append.
        let tail = blx.live_bytes();
        if blx.file.metadata()?.len() != tail {
            warn!(
                path = %blx.path.display(),
                tail,
                "blx carries a partial trailer, truncating"
            );
        }
        blx.file.set_len(tail)?;

        info!(
            path = %blx.path.display(),
            records = blx.records.len(),
            "blx loaded"
        );
        Ok(blx)
    }

    /// Opens the log and replays it sequentially into a fresh buffer.
    fn scan(path: &Path) -> Result<Self, BlocksError> {
        let file = File::options().read(true).append(true).create(true).open(path)?;

        let mut blx = Self {
            file,
            path: path.to_path_buf(),
            records: Vec::new(),
            dict: HashMap::new(),
            compact: false,
        };

        let file_len = blx.file.metadata()?.len();
        let mut offset = 0u64;

        let mut reader = BufReader::new(&blx.file);
        loop {
            let mut head = [0u8; HEAD_SIZE];
            match read_exact_or_eof(&mut reader, &mut head) {
                Ok(true) => {}
                Ok(false) => break,
                Err(e) => return Err(e.into()),
            }
            let head = BlxHead::decode(head);

            // A slot outside the dense prefix starts a corrupt trailer.
            if head.slot >= MAX_RECORDS || head.slot > blx.records.len() {
                warn!(
                    path = %path.display(),
                    slot = head.slot,
                    "blx head with out-of-range slot, stopping replay"
                );
                break;
            }

            // A head promising more bytes than the file holds is a partial
            // trailer; stop before allocating for it.
            let entry_len = (HEAD_SIZE + head.klen + head.vlen) as u64;
            if offset + entry_len > file_len {
                break;
            }
            offset += entry_len;

            let mut key = vec![0u8; head.klen];
            if !read_exact_or_eof(&mut reader, &mut key)? {
                break;
            }
            let mut value = vec![0u8; head.vlen];
            if !read_exact_or_eof(&mut reader, &mut value)? {
                break;
            }

            if blx.dict.contains_key(&key) || head.slot < blx.records.len() {
                blx.compact = true;
            }

            blx.dict.insert(key.clone(), head.slot);
            let record = BufferRecord { key, value };
            if head.slot == blx.records.len() {
                blx.records.push(record);
            } else {
                blx.records[head.slot] = record;
            }
        }

        Ok(blx)
    }

    /// Rewrites the log compact — one entry per live slot, ascending slot
    /// order — through `blx.1` and an atomic rename, then reopens it.
    fn rewrite(&mut self) -> Result<(), BlocksError> {
        let tmp = tmp_path(&self.path);
        let mut out = File::options()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp)?;

        for (slot, record) in self.records.iter().enumerate() {
            append_record(&mut out, slot, &record.key, &record.value)?;
        }
        out.sync_all()?;
        drop(out);
        fs::rename(&tmp, &self.path)?;

        self.file = File::options().read(true).append(true).open(&self.path)?;
        self.compact = false;

        info!(
            path = %self.path.display(),
            records = self.records.len(),
            "blx rewritten compact"
        );
        Ok(())
    }

    /// Looks up a key. Tombstones are returned as empty slices; the caller
    /// interprets them.
    pub fn get(&self, key: &[u8]) -> Option<&[u8]> {
        self.dict
            .get(key)
            .map(|&slot| self.records[slot].value.as_slice())
    }

    /// Writes a record: overwrite in place when the key is present,
    /// otherwise claim the next free slot.
    ///
    /// Fails with [`BlocksError::Full`] when the buffer holds
    /// [`MAX_RECORDS`] records and the key is new.
    pub fn set(&mut self, key: &[u8], value: &[u8]) -> Result<(), BlocksError> {
        if key.len() > MAX_KEY_LEN {
            return Err(BlocksError::KeyTooLarge(key.len()));
        }
        if value.len() > MAX_VALUE_LEN {
            return Err(BlocksError::ValueTooLarge(value.len()));
        }

        if let Some(&slot) = self.dict.get(key) {
            append_record(&mut self.file, slot, key, value)?;
            self.records[slot].value = value.to_vec();
            trace!(slot, key = %HexKey(key), "blx overwrite");
            return Ok(());
        }

        if self.records.len() >= MAX_RECORDS {
            return Err(BlocksError::Full);
        }

        let slot = self.records.len();
        append_record(&mut self.file, slot, key, value)?;
        self.records.push(BufferRecord {
            key: key.to_vec(),
            value: value.to_vec(),
        });
        self.dict.insert(key.to_vec(), slot);
        trace!(slot, key = %HexKey(key), "blx insert");
        Ok(())
    }

    /// Clears the buffer after a PushDown. The log file is truncated in
    /// place when it is smaller than [`BLX_BUF_SIZE`], otherwise a fresh
    /// file replaces it.
    pub fn reset(&mut self) -> Result<(), BlocksError> {
        if self.file.metadata()?.len() < BLX_BUF_SIZE {
            self.file.set_len(0)?;
        } else {
            self.file = File::options()
                .append(true)
                .create(true)
                .truncate(false)
                .open(&self.path)?;
            self.file.set_len(0)?;
        }
        self.records.clear();
        self.dict.clear();
        self.compact = false;
        trace!(path = %self.path.display(), "blx reset");
        Ok(())
    }

    /// Number of live records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True when no records are buffered.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// True when the buffer holds [`MAX_RECORDS`] records.
    pub fn is_full(&self) -> bool {
        self.records.len() >= MAX_RECORDS
    }

    /// Iterates the live records in slot order.
    pub fn records(&self) -> impl Iterator<Item = (&[u8], &[u8])> {
        self.records
            .iter()
            .map(|r| (r.key.as_slice(), r.value.as_slice()))
    }

    /// Flushes the log file to disk.
    pub fn sync(&self) -> Result<(), BlocksError> {
        self.file.sync_all()?;
        Ok(())
    }
}

// ------------------------------------------------------------------------------------------------
// Log I/O helpers
// ------------------------------------------------------------------------------------------------

impl Blocks {
    /// Byte length of the complete record stream currently in memory.
    fn live_bytes(&self) -> u64 {
        self.records
            .iter()
            .map(|r| (HEAD_SIZE + r.key.len() + r.value.len()) as u64)
            .sum()
    }
}

/// Appends one `(head, key, value)` entry with the declared byte counts.
fn append_record(file: &mut File, slot: usize, key: &[u8], value: &[u8]) -> io::Result<()> {
    let head = BlxHead {
        slot,
        klen: key.len(),
        vlen: value.len(),
    };
    file.write_all(&head.encode())?;
    file.write_all(key)?;
    file.write_all(value)?;
    Ok(())
}

/// Reads `buf.len()` bytes. Returns `Ok(false)` on a clean or mid-record
/// EOF — the caller treats the remainder as a partial trailer.
fn read_exact_or_eof(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// Sibling temporary path: `blx` → `blx.1`.
fn tmp_path(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_os_string();
    os.push(".1");
    PathBuf::from(os)
}

// ------------------------------------------------------------------------------------------------
// Tracing Helper
// ------------------------------------------------------------------------------------------------

/// Renders key bytes as hex in log lines, truncating long keys.
pub(crate) struct HexKey<'a>(pub &'a [u8]);

impl std::fmt::Display for HexKey<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.0.len() <= 32 {
            for byte in self.0 {
                write!(f, "{byte:02x}")?;
            }
        } else {
            for byte in &self.0[..16] {
                write!(f, "{byte:02x}")?;
            }
            write!(f, "...[{} bytes]", self.0.len())?;
        }
        Ok(())
    }
}
