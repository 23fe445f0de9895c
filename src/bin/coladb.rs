//! coladb server daemon.
//!
//! Serves one shard of the cluster: binds the configured address, opens
//! every table under the database root, and dispatches head-framed
//! requests until killed.

use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use coladb::cluster::ClusterConfig;
use coladb::server::{Server, ServerConfig, ServerError};

#[derive(Parser)]
#[command(name = "coladb", version, about = "COLA key-value store server")]
struct Args {
    /// Address this node listens on.
    #[arg(short, long, default_value = "127.0.0.1:6631")]
    addr: String,

    /// Database root directory; one subdirectory per table.
    #[arg(short, long, default_value = "/var/lib/coladb")]
    db_dir: PathBuf,

    /// Every server address in the cluster, this node included.
    /// Defaults to a single-node cluster of --addr.
    #[arg(short, long)]
    servers: Vec<String>,

    /// Fan writes out to two replica shards.
    #[arg(short, long)]
    replica: bool,

    /// Log level filter (overridden by RUST_LOG when set).
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

fn main() {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&args.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Err(e) = run(args) {
        eprintln!("coladb: {e}");
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<(), ServerError> {
    let servers = if args.servers.is_empty() {
        vec![args.addr.clone()]
    } else {
        args.servers
    };
    let cluster = ClusterConfig::new(servers, args.replica)?;

    let server = Server::new(ServerConfig {
        addr: args.addr,
        db_dir: args.db_dir,
        cluster,
    })?;
    server.serve()
}
