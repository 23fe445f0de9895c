//! # coladb
//!
//! An embeddable, persistent key-value storage engine built on a
//! **Cache-Oblivious Lookaside Array (COLA)**, plus a thin sharded TCP
//! server that multiplexes clients across a fixed set of nodes. Designed
//! for fast writes and crash-safe operation.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────┐
//! │                      Storage                          │
//! │   table name ──► COLA (one engine per table)          │
//! │                                                       │
//! │   ┌──────────────┐   push-down    ┌───────────────┐   │
//! │   │   Blocks     │ ─────────────► │    Extents    │   │
//! │   │  (buffer +   │  merge-cascade │  ext_0, ext_1 │   │
//! │   │   blx log)   │                │  … mmapped    │   │
//! │   └──────────────┘                └───────────────┘   │
//! │                                                       │
//! │   ┌───────────────────────────────────────────────┐   │
//! │   │       meta (level-occupancy bitmap log)       │   │
//! │   └───────────────────────────────────────────────┘   │
//! └───────────────────────────────────────────────────────┘
//!            ▲                                ▲
//!      ┌─────┴─────┐                    ┌─────┴─────┐
//!      │  server   │ ◄── head-framed ── │  client   │
//!      │ (sharded) │       protocol     │  (shell)  │
//!      └───────────┘                    └───────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`codec`] | 64-bit packed heads for the wire protocol and on-disk files |
//! | [`blocks`] | Level-0 write buffer with its append-only `blx` log |
//! | [`extent`] | Immutable, sorted, mmap-backed runs and their builders |
//! | [`cola`] | The per-table engine: get, set, and the push-down cascade |
//! | [`storage`] | Owning registry mapping table names to engines |
//! | [`cluster`] | FNV-1a sharding, replica placement, and the cluster tag |
//! | [`server`] | TCP listener dispatching head-framed requests |
//! | [`client`] | Cluster-aware client used by the shell |
//!
//! ## Key Properties
//!
//! - **Write-optimized** — writes append to a small buffered log and are
//!   merged into sorted runs in amortized batches; no per-write fsync.
//! - **Latest-wins reads** — the buffer, then each occupied level
//!   newest-first; the first hit is authoritative.
//! - **Tombstones** — deletion writes an empty value, which masks older
//!   copies during merges and is physically dropped at the bottom level.
//! - **Crash recovery** — the buffer log truncates to its last whole
//!   record, extents install by atomic rename, and the level bitmap append
//!   is the commit point of every push-down.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use coladb::cola::Cola;
//!
//! let cola = Cola::create("/tmp/my_table").unwrap();
//!
//! // Write
//! cola.set(b"hello", b"world").unwrap();
//!
//! // Read
//! assert_eq!(cola.get(b"hello").unwrap(), Some(b"world".to_vec()));
//!
//! // Delete = write an empty value (tombstone)
//! cola.set(b"hello", b"").unwrap();
//! assert_eq!(cola.get(b"hello").unwrap(), None);
//!
//! // Graceful shutdown
//! cola.close().unwrap();
//! ```

pub mod blocks;
pub mod client;
pub mod cluster;
pub mod codec;
pub mod cola;
pub mod extent;
pub mod server;
pub mod storage;

pub use cola::Cola;
pub use storage::Storage;
