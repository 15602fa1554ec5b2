//! The tuple control word: a 3-word record prepended to every payload.
//!
//! `next_block`/`next_tuple` encode a tagged enum: values `>= 0` form a
//! free-list link, [`NORMAL`] means live, [`CHAIN_END`] terminates a list,
//! [`VIRGIN`] means never allocated. A slot's `lock` transitions only
//! through `{0 <-> kilroy} -> DELETED_SENTINEL -> kilroy` on reuse.

use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};

pub use crate::kilroy::DELETED_SENTINEL;

/// Free-list link, terminator, and virgin tags for `next_block`/`next_tuple`.
pub const NORMAL: i32 = -1;
pub const CHAIN_END: i32 = -2;
pub const VIRGIN: i32 = -3;

/// On-disk/in-memory layout of a tuple's control word. Lives directly in
/// shared bytes; every field is accessed through the atomic views below,
/// never through a plain struct read/write, because other processes may be
/// mutating it concurrently.
#[repr(C)]
pub struct TupleControlLayout {
    pub lock: u32,
    pub next_block: i32,
    pub next_tuple: i32,
}

pub const CONTROL_SIZE: usize = std::mem::size_of::<TupleControlLayout>();

/// A typed handle onto one tuple's control word inside a mapped segment.
#[derive(Clone, Copy)]
pub struct ControlRef {
    ptr: *mut TupleControlLayout,
}

unsafe impl Send for ControlRef {}
unsafe impl Sync for ControlRef {}

impl ControlRef {
    /// # Safety
    /// `ptr` must point to a valid, aligned `TupleControlLayout` for as long
    /// as the returned `ControlRef` is used.
    pub unsafe fn new(ptr: *mut u8) -> Self {
        Self {
            ptr: ptr as *mut TupleControlLayout,
        }
    }

    fn lock_atomic(&self) -> &AtomicU32 {
        unsafe { &*(&mut (*self.ptr).lock as *mut u32 as *mut AtomicU32) }
    }

    fn next_block_atomic(&self) -> &AtomicI32 {
        unsafe { &*(&mut (*self.ptr).next_block as *mut i32 as *mut AtomicI32) }
    }

    fn next_tuple_atomic(&self) -> &AtomicI32 {
        unsafe { &*(&mut (*self.ptr).next_tuple as *mut i32 as *mut AtomicI32) }
    }

    pub fn lock(&self) -> u32 {
        self.lock_atomic().load(Ordering::Acquire)
    }

    pub fn set_lock(&self, value: u32) {
        self.lock_atomic().store(value, Ordering::Release);
    }

    /// Attempt `current -> new`; returns the observed value either way.
    pub fn compare_exchange_lock(&self, current: u32, new: u32) -> Result<u32, u32> {
        self.lock_atomic()
            .compare_exchange(current, new, Ordering::AcqRel, Ordering::Acquire)
    }

    pub fn next_block(&self) -> i32 {
        self.next_block_atomic().load(Ordering::Acquire)
    }

    pub fn set_next_block(&self, value: i32) {
        self.next_block_atomic().store(value, Ordering::Release);
    }

    pub fn next_tuple(&self) -> i32 {
        self.next_tuple_atomic().load(Ordering::Acquire)
    }

    pub fn set_next_tuple(&self, value: i32) {
        self.next_tuple_atomic().store(value, Ordering::Release);
    }

    /// A slot is a valid, readable row iff it hasn't been tombstoned and
    /// its `next_block` has left every free-list/virgin tag.
    pub fn is_live(&self) -> bool {
        self.lock() != DELETED_SENTINEL && self.next_block() == NORMAL
    }

    /// Initialize a brand new slot: free, never used, threaded at
    /// `add_list_next` in its add-shard's chain.
    pub fn init_virgin(&self, add_list_next: i32) {
        self.set_lock(0);
        self.set_next_block(VIRGIN);
        self.set_next_tuple(add_list_next);
    }
}
