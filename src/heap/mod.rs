//! The shared heap table component: fixed-size tuples in growable, sharded
//! segments, with per-slot locking and add/delete free lists.

pub mod control;
pub mod cursor;
pub mod layout;
pub mod table;

pub use cursor::{Cursor, CursorStatus};
pub use table::HeapTable;
