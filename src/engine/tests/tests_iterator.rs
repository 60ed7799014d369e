use tempfile::TempDir;

use super::helpers::*;
use crate::engine::IteratorOptions;

fn seed_fruit(engine: &crate::engine::Engine) {
    for (k, v) in [
        (&b"apple"[..], &b"red"[..]),
        (b"apricot", b"orange"),
        (b"banana", b"yellow"),
        (b"cherry", b"dark-red"),
        (b"date", b"brown"),
    ] {
        engine.put(k, v).expect("put");
    }
}

#[test]
fn test_forward_iteration_is_ascending() {
    let temp = TempDir::new().unwrap();
    let engine = open_engine(temp.path());
    seed_fruit(&engine);

    let mut iter = engine.iterator(IteratorOptions::default());
    let mut keys = Vec::new();
    iter.rewind();
    while iter.valid() {
        keys.push(iter.key().to_vec());
        iter.next();
    }
    assert_eq!(
        keys,
        vec![
            b"apple".to_vec(),
            b"apricot".to_vec(),
            b"banana".to_vec(),
            b"cherry".to_vec(),
            b"date".to_vec(),
        ]
    );
}

#[test]
fn test_reverse_iteration_is_descending() {
    let temp = TempDir::new().unwrap();
    let engine = open_engine(temp.path());
    seed_fruit(&engine);

    let mut iter = engine.iterator(IteratorOptions {
        reverse: true,
        ..Default::default()
    });
    let mut keys = Vec::new();
    iter.rewind();
    while iter.valid() {
        keys.push(iter.key().to_vec());
        iter.next();
    }
    assert_eq!(
        keys,
        vec![
            b"date".to_vec(),
            b"cherry".to_vec(),
            b"banana".to_vec(),
            b"apricot".to_vec(),
            b"apple".to_vec(),
        ]
    );
}

#[test]
fn test_seek_positions_by_direction() {
    let temp = TempDir::new().unwrap();
    let engine = open_engine(temp.path());
    seed_fruit(&engine);

    // Forward: first key >= target.
    let mut iter = engine.iterator(IteratorOptions::default());
    iter.seek(b"b");
    assert!(iter.valid());
    assert_eq!(iter.key(), b"banana");

    // Reverse: first key <= target.
    let mut iter = engine.iterator(IteratorOptions {
        reverse: true,
        ..Default::default()
    });
    iter.seek(b"b");
    assert!(iter.valid());
    assert_eq!(iter.key(), b"apricot");
}

#[test]
fn test_prefix_filter_yields_only_matches() {
    let temp = TempDir::new().unwrap();
    let engine = open_engine(temp.path());
    seed_fruit(&engine);

    let mut iter = engine.iterator(IteratorOptions {
        prefix: b"ap".to_vec(),
        reverse: false,
    });
    let mut keys = Vec::new();
    iter.rewind();
    while iter.valid() {
        keys.push(iter.key().to_vec());
        iter.next();
    }
    assert_eq!(keys, vec![b"apple".to_vec(), b"apricot".to_vec()]);
}

#[test]
fn test_prefix_filter_in_reverse() {
    let temp = TempDir::new().unwrap();
    let engine = open_engine(temp.path());
    seed_fruit(&engine);

    let mut iter = engine.iterator(IteratorOptions {
        prefix: b"ap".to_vec(),
        reverse: true,
    });
    let mut keys = Vec::new();
    iter.rewind();
    while iter.valid() {
        keys.push(iter.key().to_vec());
        iter.next();
    }
    assert_eq!(keys, vec![b"apricot".to_vec(), b"apple".to_vec()]);
}

#[test]
fn test_prefix_with_no_matches() {
    let temp = TempDir::new().unwrap();
    let engine = open_engine(temp.path());
    seed_fruit(&engine);

    let iter = engine.iterator(IteratorOptions {
        prefix: b"zzz".to_vec(),
        reverse: false,
    });
    assert!(!iter.valid());
}

#[test]
fn test_value_resolves_through_the_engine() {
    let temp = TempDir::new().unwrap();
    let engine = open_engine(temp.path());
    seed_fruit(&engine);

    let mut iter = engine.iterator(IteratorOptions::default());
    iter.seek(b"cherry");
    assert!(iter.valid());
    assert_eq!(iter.value().expect("value"), b"dark-red".to_vec());
}

#[test]
fn test_iterator_on_empty_engine() {
    let temp = TempDir::new().unwrap();
    let engine = open_engine(temp.path());
    let mut iter = engine.iterator(IteratorOptions::default());
    assert!(!iter.valid());
    iter.rewind();
    assert!(!iter.valid());
}

#[test]
fn test_iterator_close_releases_snapshot() {
    let temp = TempDir::new().unwrap();
    let engine = open_engine(temp.path());
    seed_fruit(&engine);

    let mut iter = engine.iterator(IteratorOptions::default());
    assert!(iter.valid());
    iter.close();
    assert!(!iter.valid());
}

#[test]
fn test_iteration_reflects_latest_versions() {
    let temp = TempDir::new().unwrap();
    let engine = open_engine(temp.path());
    engine.put(b"k", b"old").expect("put");
    engine.put(b"k", b"new").expect("put");
    engine.put(b"gone", b"x").expect("put");
    engine.delete(b"gone").expect("delete");

    let mut iter = engine.iterator(IteratorOptions::default());
    let mut pairs = Vec::new();
    iter.rewind();
    while iter.valid() {
        pairs.push((iter.key().to_vec(), iter.value().expect("value")));
        iter.next();
    }
    assert_eq!(pairs, vec![(b"k".to_vec(), b"new".to_vec())]);
}
