//! Server — the TCP front end dispatching head-framed requests.
//!
//! One listener accepts connections; each connection gets a session thread
//! (scoped, borrowing the shared [`Storage`]) that loops: read one 8-byte
//! head, read the `table || key || value` payload it declares, dispatch
//! synchronously against the table's engine, and answer with an `OK` or
//! `ERR` head (plus value bytes for reads).
//!
//! ## Dispatch table
//!
//! | Opcode | Action | Reply |
//! |--------|--------|-------|
//! | GET    | point lookup | `OK` + value (empty for miss or tombstone) |
//! | SET    | write; empty value deletes | `OK` |
//! | DEL    | write of an empty value | `OK` |
//! | SIZE   | table record count | `OK` + 8-byte BE count |
//! | DROP   | remove the table | `OK` |
//! | QUIT   | end the session | — |
//! | other  | unsupported | `ERR` |
//!
//! Engine failures are logged and answered with `ERR`; the connection
//! stays open. A session ends on QUIT or when the peer disconnects.
//!
//! At startup the server verifies the database root's cluster tag against
//! its configuration (first start writes it) and pre-opens every table.

// ------------------------------------------------------------------------------------------------
// Unit tests
// ------------------------------------------------------------------------------------------------


// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::{
    io::{self, Read, Write},
    net::{SocketAddr, TcpListener, TcpStream},
    path::PathBuf,
};

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::cluster::{ClusterConfig, ClusterError};
use crate::codec::{self, HEAD_SIZE, Opcode, RequestHead};
use crate::storage::{Storage, StorageError};

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by server construction and the accept loop.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Underlying socket or filesystem I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Registry or engine failure during bootstrap.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Cluster tag verification failed.
    #[error("cluster error: {0}")]
    Cluster(#[from] ClusterError),

    /// Internal invariant violation.
    #[error("internal error: {0}")]
    Internal(String),
}

// ------------------------------------------------------------------------------------------------
// Configuration
// ------------------------------------------------------------------------------------------------

/// Immutable server configuration, passed to [`Server::new`].
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to listen on, e.g. `127.0.0.1:6631`.
    pub addr: String,

    /// Database root directory.
    pub db_dir: PathBuf,

    /// Cluster membership this node belongs to.
    pub cluster: ClusterConfig,
}

// ------------------------------------------------------------------------------------------------
// Server Core
// ------------------------------------------------------------------------------------------------

/// A bound server: storage bootstrapped, tag verified, listener ready.
pub struct Server {
    listener: TcpListener,
    storage: Storage,
}

impl Server {
    /// Bootstraps storage under the configured root, verifies (or writes)
    /// the cluster tag, pre-opens every table, and binds the listener.
    pub fn new(config: ServerConfig) -> Result<Self, ServerError> {
        let storage = Storage::new(&config.db_dir)?;
        config.cluster.check_tag(storage.root())?;
        storage.open_all()?;

        let listener = TcpListener::bind(&config.addr)?;
        info!(addr = %listener.local_addr()?, root = %config.db_dir.display(), "server listening");

        Ok(Self { listener, storage })
    }

    /// The bound address; useful when configured with port 0.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accepts connections until the listener fails, running one scoped
    /// session thread per connection.
    pub fn serve(&self) -> Result<(), ServerError> {
        crossbeam::thread::scope(|scope| {
            for stream in self.listener.incoming() {
                let stream = match stream {
                    Ok(stream) => stream,
                    Err(e) => {
                        warn!(error = %e, "accept failed");
                        continue;
                    }
                };

                let storage = &self.storage;
                scope.spawn(move |_| {
                    let peer = stream
                        .peer_addr()
                        .map(|a| a.to_string())
                        .unwrap_or_else(|_| "?".into());
                    debug!(peer = %peer, "session started");
                    match session(storage, stream) {
                        Ok(()) => debug!(peer = %peer, "session ended"),
                        Err(e) => warn!(peer = %peer, error = %e, "session aborted"),
                    }
                });
            }
        })
        .map_err(|_| ServerError::Internal("session thread panicked".into()))?;
        Ok(())
    }
}

// ------------------------------------------------------------------------------------------------
// Session loop
// ------------------------------------------------------------------------------------------------

/// Serves one connection until QUIT or disconnect.
fn session(storage: &Storage, mut stream: TcpStream) -> Result<(), ServerError> {
    stream.set_nodelay(true)?;

    loop {
        let mut raw = [0u8; HEAD_SIZE];
        match stream.read_exact(&mut raw) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(()),
            Err(e) => return Err(e.into()),
        }
        let head = RequestHead::decode(raw);

        let mut payload = vec![0u8; head.payload_len()];
        stream.read_exact(&mut payload)?;
        let (table, rest) = payload.split_at(head.tlen);
        let (key, value) = rest.split_at(head.klen);

        if dispatch(storage, &mut stream, &head, table, key, value)? {
            return Ok(());
        }
    }
}

/// Handles one request. Returns `true` when the session should end.
fn dispatch(
    storage: &Storage,
    stream: &mut TcpStream,
    head: &RequestHead,
    table: &[u8],
    key: &[u8],
    value: &[u8],
) -> Result<bool, ServerError> {
    let opcode = match head.opcode() {
        Ok(opcode) => opcode,
        Err(e) => {
            warn!(error = %e, "dropping request with unknown opcode");
            reply_err(stream)?;
            return Ok(false);
        }
    };

    match opcode {
        Opcode::Get => match storage.get(table, key) {
            Ok(Some(v)) => reply_value(stream, &v)?,
            Ok(None) => reply_value(stream, &[])?,
            Err(e) => {
                error!(error = %e, "GET failed");
                reply_err(stream)?;
            }
        },

        Opcode::Set => reply_write(stream, storage.set(table, key, value))?,

        // A DEL is a SET of the empty value: a tombstone.
        Opcode::Del => reply_write(stream, storage.set(table, key, &[]))?,

        Opcode::Size => match storage.size(table) {
            Ok(n) => reply_value(stream, &n.to_be_bytes())?,
            Err(e) => {
                error!(error = %e, "SIZE failed");
                reply_err(stream)?;
            }
        },

        Opcode::Drop => reply_write(stream, storage.drop_table(table))?,

        Opcode::Quit => return Ok(true),

        // KEYS needs iteration the engine does not offer; the batched
        // M-codes have no framing on this wire.
        Opcode::Keys | Opcode::MGet | Opcode::MSet | Opcode::MDel | Opcode::Ok | Opcode::Err => {
            warn!(code = head.code, "unsupported opcode");
            reply_err(stream)?;
        }
    }

    Ok(false)
}

// ------------------------------------------------------------------------------------------------
// Reply helpers
// ------------------------------------------------------------------------------------------------

fn reply_write(stream: &mut TcpStream, result: Result<(), StorageError>) -> Result<(), ServerError> {
    match result {
        Ok(()) => reply_value(stream, &[]),
        Err(e) => {
            error!(error = %e, "write failed");
            reply_err(stream)
        }
    }
}

fn reply_value(stream: &mut TcpStream, value: &[u8]) -> Result<(), ServerError> {
    let head = codec::encode_reply(Opcode::Ok, value.len())
        .map_err(|e| ServerError::Internal(e.to_string()))?;
    stream.write_all(&head)?;
    stream.write_all(value)?;
    Ok(())
}

fn reply_err(stream: &mut TcpStream) -> Result<(), ServerError> {
    let head = codec::encode_reply(Opcode::Err, 0)
        .map_err(|e| ServerError::Internal(e.to_string()))?;
    stream.write_all(&head)?;
    Ok(())
}
