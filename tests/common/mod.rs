use std::cmp::Ordering;
use std::sync::Arc;

use crabtable::index::{CompareFn, IndexType, MakeKeyFn};
use crabtable::{BTreeIndex, Kilroy};
use tempfile::TempDir;

pub fn byte_compare() -> Arc<CompareFn> {
    Arc::new(|a: &[u8], b: &[u8]| -> Ordering { a.cmp(b) })
}

/// A `make_key` that takes the first `len` bytes of the payload as the key.
pub fn prefix_key(len: usize) -> Arc<MakeKeyFn> {
    Arc::new(move |payload: &[u8]| payload[0..len].to_vec())
}

pub fn new_index(
    dir: &TempDir,
    key: i64,
    key_length: u32,
    keys_per_page: u32,
    index_type: IndexType,
    kilroy: Kilroy,
) -> BTreeIndex {
    BTreeIndex::create(
        dir.path(),
        key,
        key_length,
        keys_per_page,
        index_type,
        byte_compare(),
        prefix_key(key_length as usize),
        kilroy,
    )
    .expect("create index")
}

/// Pad `prefix` out to `total_len` bytes with `fill`, for building fixed-size
/// row payloads whose leading bytes are a known key.
pub fn padded(prefix: &[u8], total_len: usize, fill: u8) -> Vec<u8> {
    let mut v = prefix.to_vec();
    v.resize(total_len, fill);
    v
}
