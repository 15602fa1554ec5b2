mod common;

use std::sync::Arc;

use crabtable::kilroy::new_kilroy;
use crabtable::{FindMode, HeapTable, IndexType, LockMode};
use tempfile::tempdir;

fn row(tag: &[u8], total_len: usize) -> Vec<u8> {
    common::padded(tag, total_len, b'_')
}

/// A table can carry one primary and several secondary indexes at once;
/// every mutation fans out to all of them in registration order.
#[test]
fn primary_and_two_secondaries_stay_in_sync() {
    let dir = tempdir().unwrap();
    let kilroy = new_kilroy();
    let table = HeapTable::create(dir.path(), 7100, 16, 4, 4, false, 2, 2, kilroy).unwrap();

    let primary = Arc::new(common::new_index(&dir, 7200, 4, 4, IndexType::Primary, kilroy));
    let by_second_byte = Arc::new(BTreeIndexAtOffset::new(&dir, 7300, kilroy, 1));
    let by_third_byte = Arc::new(BTreeIndexAtOffset::new(&dir, 7400, kilroy, 2));

    table.register_primary_index(primary.clone());
    table.register_secondary_index(by_second_byte.inner.clone());
    table.register_secondary_index(by_third_byte.inner.clone());

    for tag in [b"AXY1", b"BXZ2", b"CYZ3"] {
        table.add_tuple(&row(tag, 16)).unwrap();
    }

    assert!(primary
        .find_tuple(b"BXZ2", LockMode::ReadCrablock, FindMode::Direct)
        .unwrap()
        .is_some());
    assert!(by_second_byte
        .inner
        .find_tuple(b"X", LockMode::ReadCrablock, FindMode::First)
        .unwrap()
        .is_some());
    assert!(by_third_byte
        .inner
        .find_tuple(b"Z", LockMode::ReadCrablock, FindMode::First)
        .unwrap()
        .is_some());

    let (block, tuple) = primary
        .find_tuple(b"BXZ2", LockMode::ReadCrablock, FindMode::Direct)
        .unwrap()
        .unwrap();
    table.lock_tuple(block, tuple).unwrap();
    table.delete_tuple(block, tuple).unwrap();

    // deleting through the table must remove the row from every index,
    // not just the primary
    assert!(primary
        .find_tuple(b"BXZ2", LockMode::ReadCrablock, FindMode::Direct)
        .unwrap()
        .is_none());
    assert!(by_second_byte
        .inner
        .cursor()
        .set_cursor(b"X", FindMode::First)
        .unwrap()
        .is_some());
}

/// Thin wrapper so two secondary indexes in the same test can use
/// different single-byte prefixes as their key without needing distinct
/// `BTreeIndex` construction call sites in the test body.
struct BTreeIndexAtOffset {
    inner: Arc<crabtable::BTreeIndex>,
}

impl BTreeIndexAtOffset {
    fn new(dir: &tempfile::TempDir, key: i64, kilroy: crabtable::Kilroy, offset: usize) -> Self {
        let make_key: Arc<crabtable::index::MakeKeyFn> = Arc::new(move |payload: &[u8]| vec![payload[offset]]);
        let inner = crabtable::BTreeIndex::create(
            dir.path(),
            key,
            1,
            4,
            IndexType::Secondary,
            common::byte_compare(),
            make_key,
            kilroy,
        )
        .unwrap();
        Self { inner: Arc::new(inner) }
    }
}
