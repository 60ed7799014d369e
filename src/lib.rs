//! # emberdb
//!
//! An embeddable, persistent key-value storage engine of the
//! **Bitcask** family: an append-only log spread over numbered data
//! files plus a fully in-memory index from key to byte offset. Designed
//! for fast writes, predictable point reads, and crash-safe operation.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────┐
//! │                       Engine                          │
//! │  ┌─────────────┐  ┌──────────────┐  ┌─────────────┐   │
//! │  │   Active    │  │    Frozen    │  │   Index     │   │
//! │  │  data file  │  │  data files  │  │ key → pos   │   │
//! │  │  (appends)  │  │  (read-only) │  │ (in memory) │   │
//! │  └──────┬──────┘  └──────┬───────┘  └──────┬──────┘   │
//! │         │   rotate       │   merge         │          │
//! │         └────────►       └────────►        │          │
//! │                                            │          │
//! │  ┌─────────────────────────────────────────┘          │
//! │  │  Recovery (hint replay + log tail scan)            │
//! │  └────────────────────────────────────────────────────│
//! └───────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`engine`] | Core storage engine — open, read, write, iterate, merge, close |
//! | [`batch`] | Atomic multi-key write batches sealed by a terminator record |
//! | [`index`] | Pluggable key → position map: ordered tree, adaptive radix tree, on-disk B+-tree |
//! | [`datafile`] | Numbered append-only log files and their sidecars |
//! | [`record`] | CRC-protected record codec and varint position codec |
//! | [`fio`] | Positional I/O backends: standard files and startup memory maps |
//!
//! ## Key Features
//!
//! - **Append-only log** — every mutation is a record append; stale
//!   versions are reclaimed by offline compaction.
//! - **Atomic batches** — multi-key writes share a transaction sequence
//!   number and become visible all-or-nothing, even across crashes.
//! - **Pluggable index** — three interchangeable backings with ordered
//!   forward/reverse iteration and seek.
//! - **Hint files** — compaction emits an index-only log that makes the
//!   next startup scan skip the merged range entirely.
//! - **CRC32 integrity** — every record is checksummed; corruption is
//!   detected during recovery and reads.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use emberdb::{Engine, Options};
//!
//! let mut options = Options::default();
//! options.dir_path = "/tmp/emberdb-demo".into();
//!
//! let engine = Engine::open(options).unwrap();
//!
//! // Write
//! engine.put(b"name", b"lovewait").unwrap();
//!
//! // Read
//! assert_eq!(engine.get(b"name").unwrap(), b"lovewait".to_vec());
//!
//! // Delete
//! engine.delete(b"name").unwrap();
//! assert!(engine.get(b"name").is_err());
//!
//! // Atomic batch
//! let batch = engine.new_write_batch(Default::default()).unwrap();
//! batch.put(b"a", b"1").unwrap();
//! batch.put(b"b", b"2").unwrap();
//! batch.commit().unwrap();
//!
//! // Graceful shutdown
//! engine.close().unwrap();
//! ```

pub mod batch;
pub mod datafile;
pub mod engine;
pub mod fio;
pub mod index;
pub mod record;
pub mod util;

pub use batch::{WriteBatch, WriteBatchOptions};
pub use engine::{Engine, EngineError, EngineIterator, IteratorOptions, Options, Result, Stat};
pub use index::IndexType;
pub use record::RecordPos;
