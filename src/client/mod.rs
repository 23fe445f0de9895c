//! Client — cluster-aware connection handling for the shell.
//!
//! The client keeps one lazily-dialed TCP connection per configured
//! server. Every request is routed by FNV-1a placement: the primary shard
//! first and, with replication on, the two follower shards.
//!
//! Reads vote: the primary's value is cross-checked against the first
//! replica, falling back to the second on disagreement, and the majority
//! wins — a replica answers a read even when the primary is down. Writes
//! fan out to all placements. Failed servers are reported back to the
//! caller by address so the shell can print them; a failed connection is
//! dropped and redialed on the next request.

// ------------------------------------------------------------------------------------------------
// Unit tests
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests;

// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::{
    io::{self, Read, Write},
    net::TcpStream,
};

use thiserror::Error;
use tracing::{debug, warn};

use crate::cluster::ClusterConfig;
use crate::codec::{self, CodecError, HEAD_SIZE, Opcode, RequestHead};

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by per-server request plumbing.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Socket I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Request could not be encoded.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// The server answered with an ERR head.
    #[error("server reported failure")]
    Remote,

    /// The server's reply head did not carry a known opcode.
    #[error("malformed reply")]
    MalformedReply,
}

// ------------------------------------------------------------------------------------------------
// Client Core
// ------------------------------------------------------------------------------------------------

/// A cluster client: one optional connection per configured server.
pub struct Client {
    cluster: ClusterConfig,
    conns: Vec<Option<TcpStream>>,
}

impl Client {
    /// Builds a client; connections are dialed on first use.
    pub fn new(cluster: ClusterConfig) -> Self {
        let conns = (0..cluster.servers().len()).map(|_| None).collect();
        Self { cluster, conns }
    }

    /// The cluster configuration this client routes against.
    pub fn cluster(&self) -> &ClusterConfig {
        &self.cluster
    }

    /// Eagerly dials every server; returns `(address, reachable)` pairs
    /// for startup reporting.
    pub fn probe(&mut self) -> Vec<(String, bool)> {
        (0..self.conns.len())
            .map(|i| {
                let addr = self.cluster.servers()[i].clone();
                let up = self.conn(i).is_ok();
                (addr, up)
            })
            .collect()
    }

    /// Replicated read. Returns the chosen value (`None` when no server
    /// answered) and the addresses that failed along the way. An empty
    /// value means the key is absent.
    pub fn get(&mut self, table: &[u8], key: &[u8]) -> (Option<Vec<u8>>, Vec<String>) {
        let mut failed = Vec::new();
        let request = match codec::encode_get(table, key) {
            Ok(request) => request,
            Err(e) => {
                warn!(error = %e, "GET not sent");
                return (None, failed);
            }
        };

        let primary = self.cluster.shard(table, key);
        let replicas = self.cluster.replicas(primary);
        debug!(shard = primary, "GET routed");

        let mut answers = Vec::new();
        for &shard in std::iter::once(&primary).chain(replicas.iter()) {
            match self.exchange(shard, &request) {
                Ok(value) => {
                    answers.push(value);
                    // Primary and first replica agreeing settles the vote.
                    if answers.len() == 2 && answers[0] == answers[1] {
                        break;
                    }
                }
                Err(_) => failed.push(self.cluster.servers()[shard].clone()),
            }
        }

        (vote(answers), failed)
    }

    /// Replicated write; an empty value deletes. Returns the addresses
    /// that failed.
    pub fn set(&mut self, table: &[u8], key: &[u8], value: &[u8]) -> Vec<String> {
        let mut failed = Vec::new();
        let request = match codec::encode_set(table, key, value) {
            Ok(request) => request,
            Err(e) => {
                warn!(error = %e, "SET not sent");
                return failed;
            }
        };

        let primary = self.cluster.shard(table, key);
        let replicas = self.cluster.replicas(primary);
        for &shard in std::iter::once(&primary).chain(replicas.iter()) {
            if self.exchange(shard, &request).is_err() {
                failed.push(self.cluster.servers()[shard].clone());
            }
        }
        failed
    }

    /// Table size from its primary holder is meaningless under sharding;
    /// SIZE sums every server's answer. Unreachable servers are reported.
    pub fn size(&mut self, table: &[u8]) -> (Option<u64>, Vec<String>) {
        let mut failed = Vec::new();
        let request = match codec::encode_size(table) {
            Ok(request) => request,
            Err(e) => {
                warn!(error = %e, "SIZE not sent");
                return (None, failed);
            }
        };

        let mut total = None;
        for shard in 0..self.conns.len() {
            match self.exchange(shard, &request) {
                Ok(value) => {
                    let count = value
                        .as_slice()
                        .try_into()
                        .map(u64::from_be_bytes)
                        .unwrap_or(0);
                    total = Some(total.unwrap_or(0) + count);
                }
                Err(_) => failed.push(self.cluster.servers()[shard].clone()),
            }
        }
        (total, failed)
    }

    /// Drops a table on every server. Returns the addresses that failed.
    pub fn drop_table(&mut self, table: &[u8]) -> Vec<String> {
        let mut failed = Vec::new();
        let request = match codec::encode_drop(table) {
            Ok(request) => request,
            Err(e) => {
                warn!(error = %e, "DROP not sent");
                return failed;
            }
        };

        for shard in 0..self.conns.len() {
            if self.exchange(shard, &request).is_err() {
                failed.push(self.cluster.servers()[shard].clone());
            }
        }
        failed
    }

    /// Broadcasts QUIT to every live connection and closes them.
    pub fn quit(&mut self) {
        let request = codec::encode_bare(Opcode::Quit);
        for conn in self.conns.iter_mut() {
            if let Some(mut stream) = conn.take() {
                let _ = stream.write_all(&request);
            }
        }
    }

    // --------------------------------------------------------------------------------------------
    // Per-server plumbing
    // --------------------------------------------------------------------------------------------

    /// Returns the live connection for a shard, dialing if needed.
    fn conn(&mut self, shard: usize) -> Result<&mut TcpStream, ClientError> {
        if self.conns[shard].is_none() {
            let addr = &self.cluster.servers()[shard];
            let stream = TcpStream::connect(addr)?;
            stream.set_nodelay(true)?;
            debug!(addr = %addr, "connected");
            self.conns[shard] = Some(stream);
        }
        Ok(self.conns[shard]
            .as_mut()
            .expect("connection just installed"))
    }

    /// Sends one request and reads one reply. A failure tears the
    /// connection down so the next request redials.
    fn exchange(&mut self, shard: usize, request: &[u8]) -> Result<Vec<u8>, ClientError> {
        let result = self.exchange_inner(shard, request);
        if result.is_err() {
            self.conns[shard] = None;
        }
        result
    }

    fn exchange_inner(&mut self, shard: usize, request: &[u8]) -> Result<Vec<u8>, ClientError> {
        let stream = self.conn(shard)?;
        stream.write_all(request)?;

        let mut raw = [0u8; HEAD_SIZE];
        stream.read_exact(&mut raw)?;
        let head = RequestHead::decode(raw);

        let mut value = vec![0u8; head.vlen];
        stream.read_exact(&mut value)?;

        match head.opcode() {
            Ok(Opcode::Ok) => Ok(value),
            Ok(Opcode::Err) => Err(ClientError::Remote),
            _ => Err(ClientError::MalformedReply),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Helpers
// ------------------------------------------------------------------------------------------------

/// Majority vote over up to three replica answers; the first answer wins
/// a tie (it came from the closest placement).
fn vote(answers: Vec<Vec<u8>>) -> Option<Vec<u8>> {
    match answers.len() {
        0 => None,
        1 | 2 => answers.into_iter().next(),
        _ => {
            if answers[1] == answers[2] {
                answers.into_iter().nth(1)
            } else {
                // No two agree, or [0] is part of the majority either way.
                answers.into_iter().next()
            }
        }
    }
}
