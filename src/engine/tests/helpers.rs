use std::path::Path;

use tracing_subscriber::EnvFilter;

use crate::engine::{Engine, Options};
use crate::index::IndexType;

/// Initialize tracing subscriber controlled by `RUST_LOG` env var.
/// Safe to call multiple times — only the first call takes effect.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Standard options: files large enough that nothing rotates.
pub fn default_options(path: &Path) -> Options {
    init_tracing();
    Options {
        dir_path: path.to_path_buf(),
        data_file_size: 4 * 1024 * 1024,
        sync_write: false,
        bytes_per_sync: 0,
        index_type: IndexType::BTree,
        mmap_at_startup: false,
    }
}

/// Small data files so a handful of writes triggers rotation.
pub fn small_file_options(path: &Path) -> Options {
    Options {
        data_file_size: 1024,
        ..default_options(path)
    }
}

/// Open an engine with `default_options`.
pub fn open_engine(path: &Path) -> Engine {
    Engine::open(default_options(path)).expect("open engine")
}

/// Close and reopen, exercising the recovery path.
pub fn reopen(engine: Engine, path: &Path) -> Engine {
    engine.close().expect("close engine");
    drop(engine);
    open_engine(path)
}

/// Deterministic key/value helpers shared across the engine tests.
pub fn key(i: usize) -> Vec<u8> {
    format!("key_{i:05}").into_bytes()
}

pub fn value(i: usize) -> Vec<u8> {
    format!("value_with_some_padding_{i:05}").into_bytes()
}
