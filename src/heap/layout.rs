//! Fixed-layout headers living in shared bytes: the table info block, the
//! delete-list shards, and each block's header and add-list shards.

use std::sync::atomic::{AtomicI32, AtomicI64, AtomicU32, Ordering};

use crate::heap::control::CHAIN_END;
use crate::sync::{Latch, SpinLock};

/// Global, mostly-immutable table configuration, written once at create.
/// `num_blocks` and `instance_count` are the two fields that mutate after
/// creation, and are accessed atomically.
#[repr(C)]
pub struct TableInfoLayout {
    pub tuple_size: u32,
    pub true_tuple_size: u32,
    pub initial_alloc: u32,
    pub growth_alloc: u32,
    pub num_delete_shards: u32,
    pub num_add_shards: u32,
    pub soft_writes: u32,
    pub num_blocks: u32,
    pub instance_count: u32,
    pub key: i64,
}

pub const TABLE_INFO_SIZE: usize = std::mem::size_of::<TableInfoLayout>();

#[derive(Clone, Copy)]
pub struct TableInfoRef {
    ptr: *mut TableInfoLayout,
}

unsafe impl Send for TableInfoRef {}
unsafe impl Sync for TableInfoRef {}

impl TableInfoRef {
    /// # Safety
    /// `ptr` must point to a valid, aligned `TableInfoLayout`.
    pub unsafe fn new(ptr: *mut u8) -> Self {
        Self {
            ptr: ptr as *mut TableInfoLayout,
        }
    }

    pub fn init(
        &self,
        tuple_size: u32,
        true_tuple_size: u32,
        initial_alloc: u32,
        growth_alloc: u32,
        num_delete_shards: u32,
        num_add_shards: u32,
        soft_writes: bool,
        key: i64,
    ) {
        unsafe {
            (*self.ptr).tuple_size = tuple_size;
            (*self.ptr).true_tuple_size = true_tuple_size;
            (*self.ptr).initial_alloc = initial_alloc;
            (*self.ptr).growth_alloc = growth_alloc;
            (*self.ptr).num_delete_shards = num_delete_shards;
            (*self.ptr).num_add_shards = num_add_shards;
            (*self.ptr).soft_writes = soft_writes as u32;
            (*self.ptr).key = key;
        }
        self.num_blocks_atomic().store(1, Ordering::Release);
        self.instance_count_atomic().store(1, Ordering::Release);
    }

    pub fn tuple_size(&self) -> u32 {
        unsafe { (*self.ptr).tuple_size }
    }
    pub fn true_tuple_size(&self) -> u32 {
        unsafe { (*self.ptr).true_tuple_size }
    }
    pub fn initial_alloc(&self) -> u32 {
        unsafe { (*self.ptr).initial_alloc }
    }
    pub fn growth_alloc(&self) -> u32 {
        unsafe { (*self.ptr).growth_alloc }
    }
    pub fn num_delete_shards(&self) -> u32 {
        unsafe { (*self.ptr).num_delete_shards }
    }
    pub fn num_add_shards(&self) -> u32 {
        unsafe { (*self.ptr).num_add_shards }
    }
    pub fn soft_writes(&self) -> bool {
        unsafe { (*self.ptr).soft_writes != 0 }
    }
    pub fn key(&self) -> i64 {
        unsafe { (*self.ptr).key }
    }

    fn num_blocks_atomic(&self) -> &AtomicU32 {
        unsafe { &*(&mut (*self.ptr).num_blocks as *mut u32 as *mut AtomicU32) }
    }
    pub fn num_blocks(&self) -> u32 {
        self.num_blocks_atomic().load(Ordering::Acquire)
    }
    pub fn fetch_add_num_blocks(&self, delta: u32) -> u32 {
        self.num_blocks_atomic().fetch_add(delta, Ordering::AcqRel)
    }

    fn instance_count_atomic(&self) -> &AtomicU32 {
        unsafe { &*(&mut (*self.ptr).instance_count as *mut u32 as *mut AtomicU32) }
    }
    pub fn instance_count(&self) -> u32 {
        self.instance_count_atomic().load(Ordering::Acquire)
    }
    pub fn fetch_add_instance_count(&self, delta: i64) -> u32 {
        if delta >= 0 {
            self.instance_count_atomic()
                .fetch_add(delta as u32, Ordering::AcqRel)
        } else {
            self.instance_count_atomic()
                .fetch_sub((-delta) as u32, Ordering::AcqRel)
        }
    }
}

/// One block's shared header: allocation bookkeeping, its latch, and the
/// shared-memory id chain linking it to the next block.
#[repr(C)]
pub struct BlockHeaderLayout {
    pub tuples_allocated: u32,
    pub tuples_used: u32,
    pub block_index: u32,
    pub latch: u32,
    pub shared_mem_id: i64,
    pub next_shared_mem_id: i64,
}

pub const BLOCK_HEADER_SIZE: usize = std::mem::size_of::<BlockHeaderLayout>();

/// `next_shared_mem_id` has no successor yet.
pub const NO_NEXT_SEGMENT: i64 = -1;

#[derive(Clone, Copy)]
pub struct BlockHeaderRef {
    ptr: *mut BlockHeaderLayout,
}

unsafe impl Send for BlockHeaderRef {}
unsafe impl Sync for BlockHeaderRef {}

impl BlockHeaderRef {
    /// # Safety
    /// `ptr` must point to a valid, aligned `BlockHeaderLayout`.
    pub unsafe fn new(ptr: *mut u8) -> Self {
        Self {
            ptr: ptr as *mut BlockHeaderLayout,
        }
    }

    pub fn init(&self, tuples_allocated: u32, block_index: u32, shared_mem_id: i64) {
        unsafe {
            (*self.ptr).tuples_allocated = tuples_allocated;
            (*self.ptr).tuples_used = 0;
            (*self.ptr).block_index = block_index;
            (*self.ptr).latch = 0;
            (*self.ptr).shared_mem_id = shared_mem_id;
        }
        self.next_shared_mem_id_atomic()
            .store(NO_NEXT_SEGMENT, Ordering::Release);
    }

    pub fn tuples_allocated(&self) -> u32 {
        unsafe { (*self.ptr).tuples_allocated }
    }
    pub fn block_index(&self) -> u32 {
        unsafe { (*self.ptr).block_index }
    }
    pub fn shared_mem_id(&self) -> i64 {
        unsafe { (*self.ptr).shared_mem_id }
    }

    pub fn latch(&self) -> &Latch {
        unsafe { Latch::from_raw(&mut (*self.ptr).latch as *mut u32) }
    }

    fn tuples_used_atomic(&self) -> &AtomicU32 {
        unsafe { &*(&mut (*self.ptr).tuples_used as *mut u32 as *mut AtomicU32) }
    }
    pub fn tuples_used(&self) -> u32 {
        self.tuples_used_atomic().load(Ordering::Acquire)
    }
    pub fn inc_tuples_used(&self) {
        self.tuples_used_atomic().fetch_add(1, Ordering::AcqRel);
    }
    pub fn dec_tuples_used(&self) {
        self.tuples_used_atomic().fetch_sub(1, Ordering::AcqRel);
    }

    fn next_shared_mem_id_atomic(&self) -> &AtomicI64 {
        unsafe { &*(&mut (*self.ptr).next_shared_mem_id as *mut i64 as *mut AtomicI64) }
    }
    pub fn next_shared_mem_id(&self) -> i64 {
        self.next_shared_mem_id_atomic().load(Ordering::Acquire)
    }
    pub fn set_next_shared_mem_id(&self, value: i64) {
        self.next_shared_mem_id_atomic().store(value, Ordering::Release);
    }
}

/// One add-list shard head: a spinlock guarding a chain of free slots
/// local to one block.
#[repr(C)]
pub struct AddShardHeadLayout {
    pub lock: u32,
    pub head_tuple: i32,
}

pub const ADD_SHARD_SIZE: usize = std::mem::size_of::<AddShardHeadLayout>();

#[derive(Clone, Copy)]
pub struct AddShardHeadRef {
    ptr: *mut AddShardHeadLayout,
}

unsafe impl Send for AddShardHeadRef {}
unsafe impl Sync for AddShardHeadRef {}

impl AddShardHeadRef {
    /// # Safety
    /// `ptr` must point to a valid, aligned `AddShardHeadLayout`.
    pub unsafe fn new(ptr: *mut u8) -> Self {
        Self {
            ptr: ptr as *mut AddShardHeadLayout,
        }
    }

    pub fn lock(&self) -> &SpinLock {
        unsafe { SpinLock::from_raw(&mut (*self.ptr).lock as *mut u32) }
    }

    fn head_atomic(&self) -> &AtomicI32 {
        unsafe { &*(&mut (*self.ptr).head_tuple as *mut i32 as *mut AtomicI32) }
    }
    pub fn head(&self) -> i32 {
        self.head_atomic().load(Ordering::Acquire)
    }
    pub fn set_head(&self, value: i32) {
        self.head_atomic().store(value, Ordering::Release);
    }
    pub fn set_empty(&self) {
        self.set_head(CHAIN_END);
    }
    pub fn is_empty(&self) -> bool {
        self.head() == CHAIN_END
    }
}

/// One delete-list shard head: a spinlock guarding a chain of tombstoned
/// slots that may live in any block.
#[repr(C)]
pub struct DeleteShardHeadLayout {
    pub lock: u32,
    pub block: i32,
    pub tuple: i32,
}

pub const DELETE_SHARD_SIZE: usize = std::mem::size_of::<DeleteShardHeadLayout>();

#[derive(Clone, Copy)]
pub struct DeleteShardHeadRef {
    ptr: *mut DeleteShardHeadLayout,
}

unsafe impl Send for DeleteShardHeadRef {}
unsafe impl Sync for DeleteShardHeadRef {}

impl DeleteShardHeadRef {
    /// # Safety
    /// `ptr` must point to a valid, aligned `DeleteShardHeadLayout`.
    pub unsafe fn new(ptr: *mut u8) -> Self {
        Self {
            ptr: ptr as *mut DeleteShardHeadLayout,
        }
    }

    pub fn lock(&self) -> &SpinLock {
        unsafe { SpinLock::from_raw(&mut (*self.ptr).lock as *mut u32) }
    }

    fn block_atomic(&self) -> &AtomicI32 {
        unsafe { &*(&mut (*self.ptr).block as *mut i32 as *mut AtomicI32) }
    }
    fn tuple_atomic(&self) -> &AtomicI32 {
        unsafe { &*(&mut (*self.ptr).tuple as *mut i32 as *mut AtomicI32) }
    }

    pub fn head(&self) -> (i32, i32) {
        (
            self.block_atomic().load(Ordering::Acquire),
            self.tuple_atomic().load(Ordering::Acquire),
        )
    }
    pub fn set_head(&self, block: i32, tuple: i32) {
        self.block_atomic().store(block, Ordering::Release);
        self.tuple_atomic().store(tuple, Ordering::Release);
    }
    pub fn set_empty(&self) {
        self.set_head(CHAIN_END, CHAIN_END);
    }
    pub fn is_empty(&self) -> bool {
        self.block_atomic().load(Ordering::Acquire) == CHAIN_END
    }
}
