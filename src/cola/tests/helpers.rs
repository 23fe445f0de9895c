use crate::cola::Cola;
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber controlled by `RUST_LOG` env var.
/// Safe to call multiple times — only the first call takes effect.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Zero-padded key for insert loops.
pub fn key(prefix: &str, i: usize) -> Vec<u8> {
    format!("{prefix}-{i:06}").into_bytes()
}

/// Inserts `count` distinct `prefix` keys, all with the same value.
pub fn fill(cola: &Cola, prefix: &str, count: usize, value: &[u8]) {
    for i in 0..count {
        cola.set(&key(prefix, i), value).expect("set");
    }
}
