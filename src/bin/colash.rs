//! colash — the interactive coladb shell.
//!
//! Commands:
//!
//! ```text
//! GET  [TABLE] [KEY]
//! SET  [TABLE] [KEY] [VALUE]
//! DEL  [TABLE] [KEY]          (a SET of the empty value)
//! DROP [TABLE]
//! QUIT
//! ```
//!
//! Values print raw; an empty answer prints `<nil>`. Servers that fail a
//! request are reported as `* Failed on <addr>` and the shell continues.

use std::io::Write;

use clap::Parser;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use tracing_subscriber::EnvFilter;

use coladb::client::Client;
use coladb::cluster::ClusterConfig;

#[derive(Parser)]
#[command(name = "colash", version, about = "Interactive coladb shell")]
struct Args {
    /// Cluster server addresses.
    #[arg(short, long, default_value = "127.0.0.1:6631")]
    servers: Vec<String>,

    /// Read and write through replicas.
    #[arg(short, long)]
    replica: bool,
}

fn main() {
    let args = Args::parse();

    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();

    let cluster = match ClusterConfig::new(args.servers, args.replica) {
        Ok(cluster) => cluster,
        Err(e) => {
            eprintln!("colash: {e}");
            std::process::exit(1);
        }
    };

    let mut client = Client::new(cluster);
    for (addr, up) in client.probe() {
        if up {
            println!("Connected to {addr}");
        } else {
            println!("Cannot connect to {addr}");
        }
    }

    let mut editor = match DefaultEditor::new() {
        Ok(editor) => editor,
        Err(e) => {
            eprintln!("colash: {e}");
            std::process::exit(1);
        }
    };

    println!("\ncoladb shell");
    let mut line_number = 1;
    loop {
        let line = match editor.readline(&format!("{line_number}> ")) {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("colash: {e}");
                break;
            }
        };

        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.is_empty() {
            continue;
        }
        let _ = editor.add_history_entry(&line);

        match (tokens[0], tokens.len()) {
            ("GET", 3) => {
                let (value, failed) = client.get(tokens[1].as_bytes(), tokens[2].as_bytes());
                report_failures(&failed);
                if let Some(value) = value {
                    print_value(&value);
                }
            }
            ("GET", _) => println!("* GET [TABLE] [KEY]"),

            ("SET", 4) => {
                let failed = client.set(
                    tokens[1].as_bytes(),
                    tokens[2].as_bytes(),
                    tokens[3].as_bytes(),
                );
                report_failures(&failed);
            }
            ("SET", _) => println!("* SET [TABLE] [KEY] [VALUE]"),

            // DEL is a SET with an empty value.
            ("DEL", 3) => {
                let failed = client.set(tokens[1].as_bytes(), tokens[2].as_bytes(), b"");
                report_failures(&failed);
            }
            ("DEL", _) => println!("* DEL [TABLE] [KEY]"),

            ("DROP", 2) => {
                let failed = client.drop_table(tokens[1].as_bytes());
                report_failures(&failed);
            }
            ("DROP", _) => println!("* DROP [TABLE]"),

            ("QUIT", 1) => {
                client.quit();
                return;
            }
            ("QUIT", _) => println!("* QUIT"),

            _ => {
                println!("* Unknown command");
                continue;
            }
        }

        line_number += 1;
    }
}

/// Prints a value byte-for-byte; an empty value prints `<nil>`.
fn print_value(value: &[u8]) {
    if value.is_empty() {
        println!("<nil>");
        return;
    }
    let mut stdout = std::io::stdout();
    let _ = stdout.write_all(value);
    let _ = stdout.write_all(b"\n");
}

fn report_failures(failed: &[String]) {
    for addr in failed {
        println!("* Failed on {addr}");
    }
}
