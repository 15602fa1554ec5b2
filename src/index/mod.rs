//! The B+Tree index component: latch-crabbing descents over pages that
//! live inside a page-manager heap table.

pub mod btree;
pub mod cursor;
pub mod find;
pub mod lock;
pub mod page;

pub use btree::{BTreeIndex, MakeKeyFn};
pub use cursor::IndexCursor;
pub use find::{child_for_descent, find_in_page, CompareFn, FindMode, FindResult, IndexType, PeekOutcome};
pub use lock::LockMode;
pub use page::{PageGeometry, PageRef, PageType, END_CHAIN};
