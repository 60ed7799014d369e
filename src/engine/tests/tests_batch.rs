use tempfile::TempDir;

use super::helpers::*;
use crate::batch::WriteBatchOptions;
use crate::engine::{Engine, EngineError, Options};
use crate::index::IndexType;
use crate::record::{key_with_seq, LogRecord, RecordType};

#[test]
fn test_commit_makes_all_writes_visible() {
    let temp = TempDir::new().unwrap();
    let engine = open_engine(temp.path());

    let batch = engine.new_write_batch(Default::default()).expect("batch");
    batch.put(b"a", b"1").expect("put");
    batch.put(b"b", b"2").expect("put");

    // Nothing is visible before commit.
    assert!(matches!(engine.get(b"a"), Err(EngineError::KeyNotFound)));
    assert!(matches!(engine.get(b"b"), Err(EngineError::KeyNotFound)));

    batch.commit().expect("commit");
    assert_eq!(engine.get(b"a").expect("get"), b"1".to_vec());
    assert_eq!(engine.get(b"b").expect("get"), b"2".to_vec());
}

#[test]
fn test_committed_batch_survives_reopen() {
    let temp = TempDir::new().unwrap();
    let engine = open_engine(temp.path());

    let batch = engine.new_write_batch(Default::default()).expect("batch");
    batch.put(b"a", b"1").expect("put");
    batch.put(b"b", b"2").expect("put");
    batch.commit().expect("commit");

    let engine = reopen(engine, temp.path());
    assert_eq!(engine.get(b"a").expect("get"), b"1".to_vec());
    assert_eq!(engine.get(b"b").expect("get"), b"2".to_vec());
}

#[test]
fn test_uncommitted_batch_leaves_no_trace() {
    let temp = TempDir::new().unwrap();
    let engine = open_engine(temp.path());

    let batch = engine.new_write_batch(Default::default()).expect("batch");
    batch.put(b"a", b"1").expect("put");
    batch.put(b"b", b"2").expect("put");
    // No commit: nothing was appended, nothing survives.

    let engine = reopen(engine, temp.path());
    assert!(matches!(engine.get(b"a"), Err(EngineError::KeyNotFound)));
    assert!(matches!(engine.get(b"b"), Err(EngineError::KeyNotFound)));
}

#[test]
fn test_batch_without_terminator_is_discarded_at_recovery() {
    let temp = TempDir::new().unwrap();
    let engine = open_engine(temp.path());
    engine.put(b"committed", b"before").expect("put");

    // Simulate a crash mid-commit: append sequence-tagged records
    // directly, without the terminator and without index updates.
    let seq_no = 42u64;
    for (k, v) in [(&b"torn_a"[..], &b"1"[..]), (b"torn_b", b"2")] {
        let record = LogRecord {
            key: key_with_seq(k, seq_no),
            value: v.to_vec(),
            rec_type: RecordType::Normal,
        };
        engine
            .append_log_record_with_lock(&record)
            .expect("append");
    }
    engine.sync().expect("sync");
    engine.close().expect("close");
    drop(engine);

    let engine = open_engine(temp.path());
    assert_eq!(engine.get(b"committed").expect("get"), b"before".to_vec());
    assert!(matches!(engine.get(b"torn_a"), Err(EngineError::KeyNotFound)));
    assert!(matches!(engine.get(b"torn_b"), Err(EngineError::KeyNotFound)));
}

#[test]
fn test_terminated_batch_replays_fully() {
    let temp = TempDir::new().unwrap();
    let engine = open_engine(temp.path());

    // Same appends as a real commit, terminator included, but with no
    // index updates: recovery alone must surface the keys.
    let seq_no = 7u64;
    for (k, v) in [(&b"txn_a"[..], &b"1"[..]), (b"txn_b", b"2")] {
        let record = LogRecord {
            key: key_with_seq(k, seq_no),
            value: v.to_vec(),
            rec_type: RecordType::Normal,
        };
        engine
            .append_log_record_with_lock(&record)
            .expect("append");
    }
    let terminator = LogRecord {
        key: key_with_seq(b"txn-fin", seq_no),
        value: Vec::new(),
        rec_type: RecordType::TxnFinished,
    };
    engine
        .append_log_record_with_lock(&terminator)
        .expect("append terminator");
    engine.close().expect("close");
    drop(engine);

    let engine = open_engine(temp.path());
    assert_eq!(engine.get(b"txn_a").expect("get"), b"1".to_vec());
    assert_eq!(engine.get(b"txn_b").expect("get"), b"2".to_vec());
}

#[test]
fn test_batch_delete_staging_semantics() {
    let temp = TempDir::new().unwrap();
    let engine = open_engine(temp.path());
    engine.put(b"existing", b"v").expect("put");

    let batch = engine.new_write_batch(Default::default()).expect("batch");

    // Deleting a key only staged in the batch unstages it.
    batch.put(b"staged", b"v").expect("put");
    batch.delete(b"staged").expect("delete");

    // Deleting a key present in the engine stages a tombstone.
    batch.delete(b"existing").expect("delete");
    batch.commit().expect("commit");

    assert!(matches!(engine.get(b"staged"), Err(EngineError::KeyNotFound)));
    assert!(matches!(
        engine.get(b"existing"),
        Err(EngineError::KeyNotFound)
    ));
}

#[test]
fn test_batch_overwrites_collapse_to_last_staged() {
    let temp = TempDir::new().unwrap();
    let engine = open_engine(temp.path());

    let batch = engine.new_write_batch(Default::default()).expect("batch");
    batch.put(b"k", b"first").expect("put");
    batch.put(b"k", b"second").expect("put");
    batch.commit().expect("commit");

    assert_eq!(engine.get(b"k").expect("get"), b"second".to_vec());
}

#[test]
fn test_commit_empty_batch_is_a_no_op() {
    let temp = TempDir::new().unwrap();
    let engine = open_engine(temp.path());
    let batch = engine.new_write_batch(Default::default()).expect("batch");
    batch.commit().expect("commit");
    assert_eq!(engine.stat().expect("stat").key_num, 0);
}

#[test]
fn test_oversized_batch_is_rejected() {
    let temp = TempDir::new().unwrap();
    let engine = open_engine(temp.path());

    let batch = engine
        .new_write_batch(WriteBatchOptions {
            max_batch_num: 3,
            sync_writes: false,
        })
        .expect("batch");
    for i in 0..4 {
        batch.put(&key(i), &value(i)).expect("put");
    }
    assert!(matches!(batch.commit(), Err(EngineError::BatchTooLarge)));
}

#[test]
fn test_batch_commit_is_reusable() {
    let temp = TempDir::new().unwrap();
    let engine = open_engine(temp.path());

    let batch = engine.new_write_batch(Default::default()).expect("batch");
    batch.put(b"first", b"1").expect("put");
    batch.commit().expect("commit");

    // The batch is cleared by commit and can stage a new round.
    batch.put(b"second", b"2").expect("put");
    batch.commit().expect("commit");

    assert_eq!(engine.get(b"first").expect("get"), b"1".to_vec());
    assert_eq!(engine.get(b"second").expect("get"), b"2".to_vec());
}

#[test]
fn test_bptree_batch_gate() {
    let temp = TempDir::new().unwrap();
    let options = Options {
        index_type: IndexType::BPTree,
        ..default_options(temp.path())
    };

    // Fresh directory: batches are allowed.
    let engine = Engine::open(options.clone()).expect("open");
    let batch = engine.new_write_batch(Default::default()).expect("batch");
    batch.put(b"k", b"v").expect("put");
    batch.commit().expect("commit");
    drop(engine);

    // The engine was dropped without a clean close, so no seq-no file
    // exists and the directory is not fresh: batches are refused.
    let engine = Engine::open(options.clone()).expect("reopen");
    assert!(matches!(
        engine.new_write_batch(Default::default()),
        Err(EngineError::BatchNotAllowed)
    ));
    engine.close().expect("close");
    drop(engine);

    // After a clean close the gate opens again.
    let engine = Engine::open(options).expect("reopen");
    engine
        .new_write_batch(Default::default())
        .expect("batch allowed after clean close");
}
