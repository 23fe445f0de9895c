//! Storage — the owning registry mapping table names to COLA engines.
//!
//! Each table lives in its own subdirectory of the database root and is
//! served by exactly one [`Cola`] instance for the registry's lifetime.
//! Engines open lazily: a read touches only tables that already exist,
//! while a write creates the table on first use.
//!
//! The registry map sits behind a `Mutex`; the engines themselves carry
//! their own reader-writer locks, so registry lookups are short and table
//! operations run without any global lock.
//!
//! The database root also holds the `tag` file (see [`crate::cluster`]),
//! which is never a table name.

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
    fs, io,
    path::{Path, PathBuf},
    sync::Mutex,
};

use thiserror::Error;
use tracing::{info, warn};

use crate::cluster::TAG_FILE;
use crate::codec::MAX_TABLE_NAME_LEN;
use crate::cola::{Cola, ColaError};

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by [`Storage`] operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Underlying filesystem I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Failure inside a table's engine.
    #[error("cola error: {0}")]
    Cola(#[from] ColaError),

    /// The table name is empty, too long, reserved, or contains path
    /// separators.
    #[error("invalid table name: {0}")]
    InvalidTable(String),

    /// Internal invariant violation or poisoned lock.
    #[error("internal error: {0}")]
    Internal(String),
}

// ------------------------------------------------------------------------------------------------
// Storage Core
// ------------------------------------------------------------------------------------------------

/// The per-directory table registry.
///
/// Guarantees a single [`Cola`] instance per table directory.
pub struct Storage {
    /// Database root; one subdirectory per table.
    root: PathBuf,

    /// Open engines by table name.
    tables: Mutex<HashMap<String, Cola>>,
}

impl Storage {
    /// Opens a registry rooted at `root`, creating the directory if needed.
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self, StorageError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;

        info!(root = %root.display(), "storage opened");

        Ok(Self {
            root,
            tables: Mutex::new(HashMap::new()),
        })
    }

    /// Returns the table's engine, opening it from disk or creating it
    /// fresh on first use.
    pub fn open_or_create(&self, name: &[u8]) -> Result<Cola, StorageError> {
        let name = validate_name(name)?;
        let mut tables = self.lock()?;

        if let Some(cola) = tables.get(name.as_str()) {
            return Ok(cola.clone());
        }

        let dir = self.root.join(&name);
        let cola = match Cola::open(&dir) {
            Ok(cola) => cola,
            Err(ColaError::Io(e)) if e.kind() == io::ErrorKind::NotFound => Cola::create(&dir)?,
            Err(e) => return Err(e.into()),
        };
        tables.insert(name, cola.clone());
        Ok(cola)
    }

    /// Returns the table's engine only if the table already exists.
    pub fn existing(&self, name: &[u8]) -> Result<Option<Cola>, StorageError> {
        let name = validate_name(name)?;
        let mut tables = self.lock()?;

        if let Some(cola) = tables.get(name.as_str()) {
            return Ok(Some(cola.clone()));
        }

        match Cola::open(self.root.join(&name)) {
            Ok(cola) => {
                tables.insert(name, cola.clone());
                Ok(Some(cola))
            }
            Err(ColaError::Io(e)) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Reads a key. Absent tables and absent keys both read as `None`.
    pub fn get(&self, table: &[u8], key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        match self.existing(table)? {
            Some(cola) => Ok(cola.get(key)?),
            None => Ok(None),
        }
    }

    /// Writes a key, creating the table on first use. An empty value is a
    /// delete.
    pub fn set(&self, table: &[u8], key: &[u8], value: &[u8]) -> Result<(), StorageError> {
        let cola = self.open_or_create(table)?;
        Ok(cola.set(key, value)?)
    }

    /// Record count of a table; zero when the table does not exist.
    pub fn size(&self, table: &[u8]) -> Result<u64, StorageError> {
        match self.existing(table)? {
            Some(cola) => Ok(cola.size()?),
            None => Ok(0),
        }
    }

    /// Drops a table: closes its engine and removes the directory.
    /// Dropping a table that does not exist succeeds.
    pub fn drop_table(&self, name: &[u8]) -> Result<(), StorageError> {
        let name = validate_name(name)?;
        let mut tables = self.lock()?;

        if let Some(cola) = tables.remove(name.as_str()) {
            cola.close()?;
        }

        let dir = self.root.join(&name);
        match fs::remove_dir_all(&dir) {
            Ok(()) => {
                info!(table = %name, "table dropped");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Opens every table directory under the root (server bootstrap).
    /// Returns the number of tables opened; unreadable entries are logged
    /// and skipped.
    pub fn open_all(&self) -> Result<usize, StorageError> {
        let mut opened = 0;
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.path().is_dir() {
                continue;
            }
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if name == TAG_FILE {
                continue;
            }

            match self.open_or_create(name.as_bytes()) {
                Ok(_) => opened += 1,
                Err(e) => {
                    warn!(table = %name, error = %e, "skipping unopenable table");
                }
            }
        }
        info!(root = %self.root.display(), opened, "storage bootstrap complete");
        Ok(opened)
    }

    /// Database root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Cola>>, StorageError> {
        self.tables
            .lock()
            .map_err(|_| StorageError::Internal("registry mutex poisoned".into()))
    }
}

// ------------------------------------------------------------------------------------------------
// Helpers
// ------------------------------------------------------------------------------------------------

/// Validates a table name: non-empty, within the wire limit, valid UTF-8,
/// no path separators or NUL, and never the reserved `tag` file.
fn validate_name(name: &[u8]) -> Result<String, StorageError> {
    let printable = String::from_utf8_lossy(name).into_owned();
    if name.is_empty() || name.len() > MAX_TABLE_NAME_LEN {
        return Err(StorageError::InvalidTable(printable));
    }
    let Ok(name) = std::str::from_utf8(name) else {
        return Err(StorageError::InvalidTable(printable));
    };
    if name == TAG_FILE
        || name.starts_with('.')
        || name.contains(['/', '\\', '\0'])
    {
        return Err(StorageError::InvalidTable(printable));
    }
    Ok(name.to_string())
}
