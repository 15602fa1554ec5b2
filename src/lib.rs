//! A concurrent, shared-memory tabular heap and B+Tree index library.
//!
//! [`heap::HeapTable`] is the core storage structure: fixed-size tuples in
//! growable, sharded segments, with per-slot locking and add/delete free
//! lists so many callers can allocate, read, and reclaim rows concurrently.
//! [`index::BTreeIndex`] layers a latch-crabbing B+Tree on top of the same
//! heap machinery (a tree's pages are themselves heap tuples), and
//! [`coupling`] keeps registered indexes synchronized with a table's
//! `add_tuple`/`delete_tuple`.
//!
//! Persistence and networked access are out of scope; see [`snapshot`] for
//! the whole-table/whole-index export and import formats this crate does
//! support.

pub mod coupling;
pub mod error;
pub mod heap;
pub mod index;
pub mod kilroy;
pub mod segment;
pub mod snapshot;
pub mod sync;

pub use coupling::{IndexHandle, IndexSet};
pub use error::{CrabResult, StatusError};
pub use heap::{Cursor, CursorStatus, HeapTable};
pub use index::{BTreeIndex, FindMode, IndexCursor, IndexType, LockMode};
pub use kilroy::{new_kilroy, Kilroy};
