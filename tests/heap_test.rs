mod common;

use crabtable::kilroy::new_kilroy;
use crabtable::HeapTable;
use tempfile::tempdir;

fn row(tag: &[u8; 4]) -> Vec<u8> {
    common::padded(tag, 16, b'_')
}

/// Scenario 1 from the design doc: 4 initial slots, growth of 4, two
/// delete shards and two add shards. Eight inserts must cross into a
/// second block, and every payload must still be reachable by cursor scan.
#[test]
fn eight_inserts_grow_one_new_block() {
    let dir = tempdir().unwrap();
    let table = HeapTable::create(dir.path(), 4100, 16, 4, 4, false, 2, 2, new_kilroy()).unwrap();

    let tags: Vec<[u8; 4]> = (b'A'..=b'H').map(|c| [c, c, c, c]).collect();
    for tag in &tags {
        table.add_tuple(&row(tag)).unwrap();
    }

    assert_eq!(table.num_blocks(), 2);

    let mut seen: Vec<Vec<u8>> = Vec::new();
    let mut cursor = table.cursor();
    let mut next = cursor.next().unwrap();
    while let Some(bytes) = next {
        seen.push(bytes.to_vec());
        next = cursor.next().unwrap();
    }
    seen.sort();
    let mut expected: Vec<Vec<u8>> = tags.iter().map(|t| row(t)).collect();
    expected.sort();
    assert_eq!(seen, expected);
}

#[test]
fn delete_then_reuse_slot() {
    let dir = tempdir().unwrap();
    let table = HeapTable::create(dir.path(), 4200, 16, 4, 4, false, 1, 1, new_kilroy()).unwrap();

    let (block, tuple) = table.add_tuple(&row(b"AAAA")).unwrap();
    table.lock_tuple(block, tuple).unwrap();
    table.delete_tuple(block, tuple).unwrap();

    assert!(table.get_tuple(block, tuple).unwrap().is_none());

    // the freed slot comes back off the delete-list before any new block
    // is allocated
    let (block2, tuple2) = table.add_tuple(&row(b"ZZZZ")).unwrap();
    assert_eq!((block2, tuple2), (block, tuple));
    assert_eq!(table.num_blocks(), 1);
}

#[test]
fn cursor_past_end_then_prev_returns_last_live() {
    let dir = tempdir().unwrap();
    let table = HeapTable::create(dir.path(), 4300, 16, 4, 4, false, 1, 1, new_kilroy()).unwrap();
    for tag in [b"AAAA", b"BBBB", b"CCCC"] {
        table.add_tuple(&row(tag)).unwrap();
    }

    let mut cursor = table.cursor();
    let mut count = 0;
    while cursor.next().unwrap().is_some() {
        count += 1;
    }
    assert_eq!(count, 3);
    assert_eq!(cursor.status(), crabtable::CursorStatus::Eot);

    let last = cursor.prev().unwrap().expect("a previous live row");
    assert_eq!(&last[0..4], b"CCCC");
}

#[test]
fn delete_requires_caller_to_hold_the_lock() {
    let dir = tempdir().unwrap();
    let table = HeapTable::create(dir.path(), 4400, 16, 4, 4, false, 1, 1, new_kilroy()).unwrap();
    let (block, tuple) = table.add_tuple(&row(b"AAAA")).unwrap();

    // never locked -- delete_tuple must refuse
    let err = table.delete_tuple(block, tuple).unwrap_err();
    assert!(matches!(err, crabtable::StatusError::UnsafeOperation(_)));
}

#[test]
fn integrity_check_is_clean_after_mixed_churn() {
    let dir = tempdir().unwrap();
    let table = HeapTable::create(dir.path(), 4500, 16, 4, 4, false, 2, 2, new_kilroy()).unwrap();

    let mut locs = Vec::new();
    for c in b'A'..=b'P' {
        locs.push(table.add_tuple(&row(&[c, c, c, c])).unwrap());
    }
    for &(block, tuple) in locs.iter().step_by(2) {
        table.lock_tuple(block, tuple).unwrap();
        table.delete_tuple(block, tuple).unwrap();
    }

    let violations = table.check_integrity().unwrap();
    assert!(violations.is_empty(), "violations: {:?}", violations);
}
