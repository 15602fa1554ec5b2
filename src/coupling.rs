//! Index/table coupling: every index registered against a [`HeapTable`] is
//! kept synchronized with `AddTuple`/`DeleteTuple`, in a fixed order --
//! primary first, secondaries in registration order -- with a compensating
//! delete if any index insert fails partway through.

use std::sync::Arc;

use crate::error::CrabResult;

/// What a [`HeapTable`] needs from a registered index: insert and delete by
/// `(block, tuple)` plus the payload bytes the index derives its key from.
/// Implemented by `crate::index::BTreeIndex` adapters; tests may supply a
/// bare-bones fake.
pub trait IndexHandle: Send + Sync {
    fn insert_tuple(&self, block: i32, tuple: i32, payload: &[u8]) -> CrabResult<()>;
    fn delete_tuple(&self, block: i32, tuple: i32, payload: &[u8]) -> CrabResult<()>;
    fn is_unique(&self) -> bool {
        false
    }
}

/// The set of indexes fanned out to on every mutation: at most one primary,
/// any number of secondaries in insertion order.
pub struct IndexSet {
    pub primary: Option<Arc<dyn IndexHandle>>,
    pub secondaries: Vec<Arc<dyn IndexHandle>>,
}

impl IndexSet {
    pub fn new() -> Self {
        Self {
            primary: None,
            secondaries: Vec::new(),
        }
    }

    pub fn register_primary(&mut self, index: Arc<dyn IndexHandle>) {
        self.primary = Some(index);
    }

    pub fn register_secondary(&mut self, index: Arc<dyn IndexHandle>) {
        self.secondaries.push(index);
    }

    /// Idempotent: unregistering an index that isn't present is a no-op.
    pub fn unregister(&mut self, index: &Arc<dyn IndexHandle>) {
        if let Some(p) = &self.primary {
            if Arc::ptr_eq(p, index) {
                self.primary = None;
            }
        }
        self.secondaries.retain(|s| !Arc::ptr_eq(s, index));
    }
}

impl Default for IndexSet {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingIndex {
        inserts: AtomicUsize,
        deletes: AtomicUsize,
        fail_inserts: bool,
    }

    impl IndexHandle for CountingIndex {
        fn insert_tuple(&self, _block: i32, _tuple: i32, _payload: &[u8]) -> CrabResult<()> {
            self.inserts.fetch_add(1, Ordering::SeqCst);
            if self.fail_inserts {
                return Err(crate::error::StatusError::operation_failed("forced failure"));
            }
            Ok(())
        }
        fn delete_tuple(&self, _block: i32, _tuple: i32, _payload: &[u8]) -> CrabResult<()> {
            self.deletes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn register_and_unregister_roundtrip() {
        let mut set = IndexSet::new();
        let primary: Arc<dyn IndexHandle> = Arc::new(CountingIndex {
            inserts: AtomicUsize::new(0),
            deletes: AtomicUsize::new(0),
            fail_inserts: false,
        });
        set.register_primary(Arc::clone(&primary));
        assert!(set.primary.is_some());
        set.unregister(&primary);
        assert!(set.primary.is_none());
        // idempotent
        set.unregister(&primary);
        assert!(set.primary.is_none());
    }

    #[test]
    fn secondaries_preserve_insertion_order() {
        let mut set = IndexSet::new();
        let a: Arc<dyn IndexHandle> = Arc::new(CountingIndex {
            inserts: AtomicUsize::new(0),
            deletes: AtomicUsize::new(0),
            fail_inserts: false,
        });
        let b: Arc<dyn IndexHandle> = Arc::new(CountingIndex {
            inserts: AtomicUsize::new(0),
            deletes: AtomicUsize::new(0),
            fail_inserts: false,
        });
        set.register_secondary(Arc::clone(&a));
        set.register_secondary(Arc::clone(&b));
        assert!(Arc::ptr_eq(&set.secondaries[0], &a));
        assert!(Arc::ptr_eq(&set.secondaries[1], &b));
    }
}
