//! Cluster — sharding configuration, FNV-1a placement, and the cluster tag.
//!
//! The cluster is a fixed, configuration-time list of server addresses.
//! A record's primary shard is chosen by hashing `table || key` with
//! FNV-1a 64; with replication on, the two following servers (round-robin)
//! hold the copies.
//!
//! The **cluster tag** fingerprints the membership: FNV-1a over the sorted
//! addresses, each suffixed with `&`. It is persisted as the 8-byte
//! big-endian `tag` file at the database root, and a server refuses to
//! start over a root whose tag disagrees with its configuration —
//! rebalancing data onto a changed membership is out of scope.
//!
//! Everything here is an immutable value: build a [`ClusterConfig`] once
//! and hand it to the server or client constructor.

// ------------------------------------------------------------------------------------------------
// Unit tests
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests;

// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::{
    fs, io,
    path::Path,
};

use thiserror::Error;
use tracing::info;

// ------------------------------------------------------------------------------------------------
// Constants
// ------------------------------------------------------------------------------------------------

/// Name of the cluster-tag file at the database root.
pub const TAG_FILE: &str = "tag";

/// Copies of each record when replication is on: the primary plus two.
pub const REPLICA_FACTOR: usize = 3;

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x1_0000_0000_01b3;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by cluster configuration and tag handling.
#[derive(Debug, Error)]
pub enum ClusterError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The configuration lists no servers.
    #[error("no servers configured")]
    NoServers,

    /// The on-disk tag was written by a different membership.
    #[error("cluster tag mismatch: disk {disk:#018x}, config {config:#018x}")]
    TagMismatch {
        /// Tag found in the root's `tag` file.
        disk: u64,
        /// Tag derived from the configured server list.
        config: u64,
    },

    /// The tag file does not hold a whole 8-byte tag.
    #[error("tag file corrupt: {0} bytes")]
    CorruptTag(usize),
}

// ------------------------------------------------------------------------------------------------
// ClusterConfig
// ------------------------------------------------------------------------------------------------

/// Immutable cluster membership and replication settings.
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    /// Server addresses, sorted. Order determines shard numbering.
    servers: Vec<String>,

    /// Whether reads and writes fan out to replicas.
    replica: bool,
}

impl ClusterConfig {
    /// Builds a configuration from a server list.
    ///
    /// Addresses are sorted so every node derives the same shard
    /// numbering. Replication is disabled when fewer than
    /// [`REPLICA_FACTOR`] servers are configured.
    pub fn new(mut servers: Vec<String>, replica: bool) -> Result<Self, ClusterError> {
        if servers.is_empty() {
            return Err(ClusterError::NoServers);
        }
        servers.sort();
        let replica = replica && servers.len() >= REPLICA_FACTOR;
        Ok(Self { servers, replica })
    }

    /// The sorted server addresses.
    pub fn servers(&self) -> &[String] {
        &self.servers
    }

    /// Whether replication is active.
    pub fn replica(&self) -> bool {
        self.replica
    }

    /// Primary shard index for a record.
    pub fn shard(&self, table: &[u8], key: &[u8]) -> usize {
        (hash_table_key(table, key) % self.servers.len() as u64) as usize
    }

    /// Replica shard indices following a primary, round-robin.
    /// Empty when replication is off.
    pub fn replicas(&self, primary: usize) -> Vec<usize> {
        if !self.replica {
            return Vec::new();
        }
        (1..REPLICA_FACTOR)
            .map(|i| (primary + i) % self.servers.len())
            .collect()
    }

    /// The membership fingerprint: FNV-1a over the sorted addresses, each
    /// suffixed with `&`.
    pub fn tag(&self) -> u64 {
        let mut hash = FNV_OFFSET_BASIS;
        for server in &self.servers {
            hash = fnv1a_step(hash, server.as_bytes());
            hash = fnv1a_step(hash, b"&");
        }
        hash
    }

    /// Verifies this configuration against the root's `tag` file, writing
    /// the tag on first start.
    pub fn check_tag(&self, root: &Path) -> Result<u64, ClusterError> {
        let config = self.tag();
        match read_tag(root)? {
            Some(disk) if disk == config => Ok(config),
            Some(disk) => Err(ClusterError::TagMismatch { disk, config }),
            None => {
                write_tag(root, config)?;
                info!(tag = format_args!("{config:#018x}"), "cluster tag written");
                Ok(config)
            }
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Hashing
// ------------------------------------------------------------------------------------------------

/// FNV-1a 64 over `table || key`; the basis of shard placement.
pub fn hash_table_key(table: &[u8], key: &[u8]) -> u64 {
    fnv1a_step(fnv1a_step(FNV_OFFSET_BASIS, table), key)
}

fn fnv1a_step(mut hash: u64, bytes: &[u8]) -> u64 {
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

// ------------------------------------------------------------------------------------------------
// Tag file I/O
// ------------------------------------------------------------------------------------------------

/// Reads the root's tag file; `None` when it does not exist yet.
pub fn read_tag(root: &Path) -> Result<Option<u64>, ClusterError> {
    match fs::read(root.join(TAG_FILE)) {
        Ok(bytes) => {
            let raw: [u8; 8] = bytes
                .as_slice()
                .try_into()
                .map_err(|_| ClusterError::CorruptTag(bytes.len()))?;
            Ok(Some(u64::from_be_bytes(raw)))
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Writes the root's tag file.
pub fn write_tag(root: &Path, tag: u64) -> Result<(), ClusterError> {
    fs::create_dir_all(root)?;
    fs::write(root.join(TAG_FILE), tag.to_be_bytes())?;
    Ok(())
}
