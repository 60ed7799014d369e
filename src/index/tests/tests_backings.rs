use tempfile::TempDir;

use crate::index::{new_indexer, ArtIndex, BPTreeIndex, BTreeIndex, IndexType, Indexer};
use crate::record::RecordPos;

fn pos(file_id: u32, offset: u64) -> RecordPos {
    RecordPos { file_id, offset }
}

/// Run the shared contract checks against one backing.
fn check_contract(index: &dyn Indexer) {
    assert_eq!(index.size(), 0);
    assert!(index.get(b"missing").is_none());

    // Insert and read back.
    assert!(index.put(b"alpha".to_vec(), pos(0, 0)));
    assert!(index.put(b"beta".to_vec(), pos(0, 32)));
    assert_eq!(index.size(), 2);
    assert_eq!(index.get(b"alpha"), Some(pos(0, 0)));
    assert_eq!(index.get(b"beta"), Some(pos(0, 32)));

    // Replace keeps the size and swaps the position.
    assert!(index.put(b"alpha".to_vec(), pos(1, 64)));
    assert_eq!(index.size(), 2);
    assert_eq!(index.get(b"alpha"), Some(pos(1, 64)));

    // Delete reports presence.
    assert!(index.delete(b"alpha"));
    assert!(!index.delete(b"alpha"));
    assert!(index.get(b"alpha").is_none());
    assert_eq!(index.size(), 1);
}

#[test]
fn test_btree_contract() {
    check_contract(&BTreeIndex::new());
}

#[test]
fn test_art_contract() {
    check_contract(&ArtIndex::new());
}

#[test]
fn test_bptree_contract() {
    let temp = TempDir::new().unwrap();
    let index = BPTreeIndex::open(temp.path(), false).expect("open");
    check_contract(&index);
}

#[test]
fn test_new_indexer_selects_backing() {
    let temp = TempDir::new().unwrap();
    for index_type in [IndexType::BTree, IndexType::Art, IndexType::BPTree] {
        let index = new_indexer(index_type, temp.path(), false).expect("new indexer");
        assert!(index.put(b"k".to_vec(), pos(0, 0)));
        assert_eq!(index.get(b"k"), Some(pos(0, 0)));
        index.close().expect("close");
    }
}

#[test]
fn test_art_prefix_keys_coexist() {
    let index = ArtIndex::new();
    assert!(index.put(b"app".to_vec(), pos(0, 1)));
    assert!(index.put(b"apple".to_vec(), pos(0, 2)));
    assert!(index.put(b"application".to_vec(), pos(0, 3)));

    assert_eq!(index.get(b"app"), Some(pos(0, 1)));
    assert_eq!(index.get(b"apple"), Some(pos(0, 2)));
    assert_eq!(index.get(b"application"), Some(pos(0, 3)));
    assert!(index.get(b"ap").is_none());
    assert!(index.get(b"appl").is_none());

    // Removing the prefix key leaves its extensions intact.
    assert!(index.delete(b"app"));
    assert!(index.get(b"app").is_none());
    assert_eq!(index.get(b"apple"), Some(pos(0, 2)));
    assert_eq!(index.get(b"application"), Some(pos(0, 3)));
}

#[test]
fn test_art_node_growth_across_fanouts() {
    let index = ArtIndex::new();
    // 200 distinct first bytes under a shared root forces the child
    // container through every node size up to 256.
    for b in 0u8..200 {
        assert!(index.put(vec![b, b'x'], pos(0, u64::from(b))));
    }
    assert_eq!(index.size(), 200);
    for b in 0u8..200 {
        assert_eq!(index.get(&[b, b'x']), Some(pos(0, u64::from(b))));
    }

    // Delete half and verify the survivors.
    for b in (0u8..200).step_by(2) {
        assert!(index.delete(&[b, b'x']));
    }
    assert_eq!(index.size(), 100);
    for b in 0u8..200 {
        let expected = if b % 2 == 0 { None } else { Some(pos(0, u64::from(b))) };
        assert_eq!(index.get(&[b, b'x']), expected);
    }
}

#[test]
fn test_art_long_keys() {
    let index = ArtIndex::new();
    let long_a = vec![b'a'; 512];
    let mut long_b = long_a.clone();
    long_b.push(b'b');

    assert!(index.put(long_a.clone(), pos(1, 1)));
    assert!(index.put(long_b.clone(), pos(1, 2)));
    assert_eq!(index.get(&long_a), Some(pos(1, 1)));
    assert_eq!(index.get(&long_b), Some(pos(1, 2)));

    assert!(index.delete(&long_b));
    assert!(index.get(&long_b).is_none());
    assert_eq!(index.get(&long_a), Some(pos(1, 1)));
}

#[test]
fn test_bptree_survives_reopen() {
    let temp = TempDir::new().unwrap();
    {
        let index = BPTreeIndex::open(temp.path(), false).expect("open");
        assert!(index.put(b"durable".to_vec(), pos(7, 77)));
        index.close().expect("close");
    }
    let index = BPTreeIndex::open(temp.path(), false).expect("reopen");
    assert_eq!(index.get(b"durable"), Some(pos(7, 77)));
    assert_eq!(index.size(), 1);
}
