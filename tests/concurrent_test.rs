mod common;

use std::sync::Arc;

use crabtable::kilroy::new_kilroy;
use crabtable::{FindMode, HeapTable, IndexType, LockMode};
use tempfile::tempdir;

fn key_bytes(n: u32) -> [u8; 4] {
    n.to_be_bytes()
}

fn row(n: u32) -> Vec<u8> {
    common::padded(&key_bytes(n), 12, 0)
}

/// Scenario 6: two workers hammer disjoint key ranges concurrently --
/// inserts followed by deletes of half of what each inserted. At
/// quiescence the tree and heap must both report zero invariant
/// violations and the live row count must equal inserts minus deletes.
#[test]
fn two_workers_disjoint_ranges_leave_a_consistent_tree() {
    const PER_WORKER_INSERTS: u32 = 2_000;
    const PER_WORKER_DELETES: u32 = 1_000;

    let dir = tempdir().unwrap();
    let kilroy = new_kilroy();
    let table = HeapTable::create(dir.path(), 6100, 12, 16, 16, false, 8, 8, kilroy).unwrap();
    let index = Arc::new(common::new_index(&dir, 6200, 4, 8, IndexType::Primary, kilroy));
    table.register_primary_index(index.clone());

    let ranges = [(0u32, PER_WORKER_INSERTS), (1_000_000, 1_000_000 + PER_WORKER_INSERTS)];

    crossbeam::thread::scope(|scope| {
        for (lo, hi) in ranges {
            let table = &table;
            let index = &index;
            scope.spawn(move |_| {
                for n in lo..hi {
                    table.add_tuple(&row(n)).expect("disjoint keys never collide");
                }
                for n in lo..(lo + PER_WORKER_DELETES) {
                    let key = key_bytes(n);
                    let (block, tuple) = index
                        .find_tuple(&key, LockMode::ReadCrablock, FindMode::Direct)
                        .unwrap()
                        .expect("just-inserted key must be findable");
                    table.lock_tuple(block, tuple).unwrap();
                    table.delete_tuple(block, tuple).unwrap();
                }
            });
        }
    })
    .unwrap();

    let tree_violations = index.check_tree().unwrap();
    assert!(tree_violations.is_empty(), "tree violations: {:?}", tree_violations);

    let heap_violations = table.check_integrity().unwrap();
    assert!(heap_violations.is_empty(), "heap violations: {:?}", heap_violations);

    let mut live = 0u64;
    let mut cursor = table.cursor();
    while cursor.next().unwrap().is_some() {
        live += 1;
    }
    let expected = 2 * (PER_WORKER_INSERTS - PER_WORKER_DELETES) as u64;
    assert_eq!(live, expected);
}
