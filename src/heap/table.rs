//! The shared heap table: a segmented, growing container of fixed-size
//! tuples supporting concurrent allocation, reclamation, per-tuple locking,
//! and linear iteration under concurrent mutation.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use log::{debug, trace};

use crate::coupling::IndexSet;
use crate::error::{CrabResult, StatusError};
use crate::heap::control::{ControlRef, CHAIN_END, CONTROL_SIZE, DELETED_SENTINEL, NORMAL};
use crate::heap::layout::{
    AddShardHeadRef, BlockHeaderRef, DeleteShardHeadRef, TableInfoRef, ADD_SHARD_SIZE,
    BLOCK_HEADER_SIZE, DELETE_SHARD_SIZE, NO_NEXT_SEGMENT, TABLE_INFO_SIZE,
};
use crate::kilroy::Kilroy;
use crate::segment::{MmapSegment, Segment};
use crate::sync::SpinBackoff;

fn align_up(value: usize, align: usize) -> usize {
    (value + align - 1) / align * align
}

#[derive(Clone)]
pub(crate) struct BlockDescriptor {
    pub segment: Arc<dyn Segment>,
    pub header: BlockHeaderRef,
    pub add_shards: Vec<AddShardHeadRef>,
    pub data_ptr: *mut u8,
}

unsafe impl Send for BlockDescriptor {}
unsafe impl Sync for BlockDescriptor {}

/// A table-wide, per-caller handle onto a shared heap. Each opening
/// thread/process is expected to hold its own `HeapTable`, constructed with
/// its own [`Kilroy`] -- mirroring the original design, where every caller
/// attaches its own lightweight view onto the same underlying segments.
pub struct HeapTable {
    dir: PathBuf,
    key: i64,
    kilroy: Kilroy,

    tuple_size: usize,
    true_tuple_size: usize,
    num_add_shards: usize,
    num_delete_shards: usize,

    table_info: TableInfoRef,
    delete_shards: Vec<DeleteShardHeadRef>,
    blocks: RwLock<Vec<BlockDescriptor>>,

    last_add_shard: AtomicUsize,
    last_delete_shard: AtomicUsize,

    pub(crate) indexes: RwLock<IndexSet>,

    // Keeps segment 0 (table info + delete shards + block 0) alive; also
    // reachable as `blocks[0].segment`.
    _segment0: Arc<dyn Segment>,
}

impl HeapTable {
    /// Create a brand-new table, allocating its first segment.
    #[allow(clippy::too_many_arguments)]
    pub fn create(
        dir: impl Into<PathBuf>,
        key: i64,
        tuple_size: u32,
        initial_alloc: u32,
        growth_alloc: u32,
        soft_writes: bool,
        num_delete_shards: u32,
        num_add_shards: u32,
        kilroy: Kilroy,
    ) -> CrabResult<Self> {
        if tuple_size == 0 || initial_alloc == 0 || growth_alloc == 0 {
            return Err(StatusError::bad_parameters(
                "tuple_size, initial_alloc and growth_alloc must be nonzero",
            ));
        }
        if num_add_shards == 0 {
            return Err(StatusError::bad_parameters("num_add_shards must be nonzero"));
        }
        if num_delete_shards == 0 {
            return Err(StatusError::bad_parameters("num_delete_shards must be nonzero"));
        }

        let dir = dir.into();
        let true_tuple_size = align_up(CONTROL_SIZE + tuple_size as usize, 8);

        let seg0_len = TABLE_INFO_SIZE
            + num_delete_shards as usize * DELETE_SHARD_SIZE
            + BLOCK_HEADER_SIZE
            + num_add_shards as usize * ADD_SHARD_SIZE
            + initial_alloc as usize * true_tuple_size;

        let seg0 = MmapSegment::create(&dir, key, seg0_len)?;
        let base = seg0.as_ptr();

        let table_info = unsafe { TableInfoRef::new(base) };
        table_info.init(
            tuple_size,
            true_tuple_size as u32,
            initial_alloc,
            growth_alloc,
            num_delete_shards,
            num_add_shards,
            soft_writes,
            key,
        );

        let delete_shards_ptr = unsafe { base.add(TABLE_INFO_SIZE) };
        let delete_shards: Vec<DeleteShardHeadRef> = (0..num_delete_shards as usize)
            .map(|i| unsafe { DeleteShardHeadRef::new(delete_shards_ptr.add(i * DELETE_SHARD_SIZE)) })
            .collect();
        for shard in &delete_shards {
            shard.set_empty();
        }

        let header_ptr = unsafe { delete_shards_ptr.add(num_delete_shards as usize * DELETE_SHARD_SIZE) };
        let header = unsafe { BlockHeaderRef::new(header_ptr) };
        header.init(initial_alloc, 0, key);

        let add_shards_ptr = unsafe { header_ptr.add(BLOCK_HEADER_SIZE) };
        let add_shards: Vec<AddShardHeadRef> = (0..num_add_shards as usize)
            .map(|i| unsafe { AddShardHeadRef::new(add_shards_ptr.add(i * ADD_SHARD_SIZE)) })
            .collect();

        let data_ptr = unsafe { add_shards_ptr.add(num_add_shards as usize * ADD_SHARD_SIZE) };
        thread_add_shards(data_ptr, initial_alloc, &add_shards, true_tuple_size);

        let segment0: Arc<dyn Segment> = Arc::new(seg0);
        let block0 = BlockDescriptor {
            segment: Arc::clone(&segment0),
            header,
            add_shards,
            data_ptr,
        };

        debug!(
            "created table key={} tuple_size={} true_tuple_size={} initial_alloc={}",
            key, tuple_size, true_tuple_size, initial_alloc
        );

        Ok(Self {
            dir,
            key,
            kilroy,
            tuple_size: tuple_size as usize,
            true_tuple_size,
            num_add_shards: num_add_shards as usize,
            num_delete_shards: num_delete_shards as usize,
            table_info,
            delete_shards,
            blocks: RwLock::new(vec![block0]),
            last_add_shard: AtomicUsize::new(0),
            last_delete_shard: AtomicUsize::new(0),
            indexes: RwLock::new(IndexSet::new()),
            _segment0: segment0,
        })
    }

    /// Attach to an existing table. Increments `instance_count`.
    pub fn open(dir: impl Into<PathBuf>, key: i64, kilroy: Kilroy) -> CrabResult<Self> {
        let dir = dir.into();
        let seg0 = MmapSegment::open(&dir, key, TABLE_INFO_SIZE)?;
        let base = seg0.as_ptr();
        let table_info = unsafe { TableInfoRef::new(base) };

        let tuple_size = table_info.tuple_size() as usize;
        let true_tuple_size = table_info.true_tuple_size() as usize;
        let num_add_shards = table_info.num_add_shards() as usize;
        let num_delete_shards = table_info.num_delete_shards() as usize;

        let delete_shards_ptr = unsafe { base.add(TABLE_INFO_SIZE) };
        let delete_shards: Vec<DeleteShardHeadRef> = (0..num_delete_shards)
            .map(|i| unsafe { DeleteShardHeadRef::new(delete_shards_ptr.add(i * DELETE_SHARD_SIZE)) })
            .collect();

        let header_ptr = unsafe { delete_shards_ptr.add(num_delete_shards * DELETE_SHARD_SIZE) };
        let header = unsafe { BlockHeaderRef::new(header_ptr) };
        let add_shards_ptr = unsafe { header_ptr.add(BLOCK_HEADER_SIZE) };
        let add_shards: Vec<AddShardHeadRef> = (0..num_add_shards)
            .map(|i| unsafe { AddShardHeadRef::new(add_shards_ptr.add(i * ADD_SHARD_SIZE)) })
            .collect();
        let data_ptr = unsafe { add_shards_ptr.add(num_add_shards * ADD_SHARD_SIZE) };

        let segment0: Arc<dyn Segment> = Arc::new(seg0);
        let block0 = BlockDescriptor {
            segment: Arc::clone(&segment0),
            header,
            add_shards,
            data_ptr,
        };

        let table = Self {
            dir,
            key,
            kilroy,
            tuple_size,
            true_tuple_size,
            num_add_shards,
            num_delete_shards,
            table_info,
            delete_shards,
            blocks: RwLock::new(vec![block0]),
            last_add_shard: AtomicUsize::new(0),
            last_delete_shard: AtomicUsize::new(0),
            indexes: RwLock::new(IndexSet::new()),
            _segment0: segment0,
        };

        table.grow_local_view()?;
        table.table_info.fetch_add_instance_count(1);
        Ok(table)
    }

    pub fn kilroy(&self) -> Kilroy {
        self.kilroy
    }

    pub fn tuple_size(&self) -> usize {
        self.tuple_size
    }

    pub fn true_tuple_size(&self) -> usize {
        self.true_tuple_size
    }

    pub fn num_blocks(&self) -> u32 {
        self.table_info.num_blocks()
    }

    pub fn instance_count(&self) -> u32 {
        self.table_info.instance_count()
    }

    pub fn dir(&self) -> &std::path::Path {
        &self.dir
    }

    pub fn key(&self) -> i64 {
        self.key
    }

    pub fn num_add_shards(&self) -> usize {
        self.num_add_shards
    }

    pub fn num_delete_shards(&self) -> usize {
        self.num_delete_shards
    }

    pub fn initial_alloc(&self) -> u32 {
        self.table_info.initial_alloc()
    }

    pub fn growth_alloc(&self) -> u32 {
        self.table_info.growth_alloc()
    }

    pub fn soft_writes(&self) -> bool {
        self.table_info.soft_writes()
    }

    // ---- index coupling ----

    pub fn register_primary_index(&self, index: Arc<dyn crate::coupling::IndexHandle>) {
        self.indexes.write().unwrap().register_primary(index);
    }

    pub fn register_secondary_index(&self, index: Arc<dyn crate::coupling::IndexHandle>) {
        self.indexes.write().unwrap().register_secondary(index);
    }

    pub fn unregister_index(&self, index: &Arc<dyn crate::coupling::IndexHandle>) {
        self.indexes.write().unwrap().unregister(index);
    }

    // ---- local view synchronization ----

    pub(crate) fn get_block(&self, block: u32) -> CrabResult<BlockDescriptor> {
        loop {
            {
                let guard = self.blocks.read().unwrap();
                if (block as usize) < guard.len() {
                    return Ok(guard[block as usize].clone());
                }
            }
            self.grow_local_view()?;
            let guard = self.blocks.read().unwrap();
            if (block as usize) >= guard.len() {
                return Err(StatusError::not_found(format!("block {} not mapped", block)));
            }
        }
    }

    fn grow_local_view(&self) -> CrabResult<()> {
        let mut guard = self.blocks.write().unwrap();
        loop {
            let have = guard.len() as u32;
            let want = self.table_info.num_blocks();
            if have >= want {
                return Ok(());
            }
            let prev = guard[(have - 1) as usize].header;
            let shmid = prev.next_shared_mem_id();
            if shmid == NO_NEXT_SEGMENT {
                // the publisher hasn't linked the chain yet; caller may retry
                return Ok(());
            }
            let len = BLOCK_HEADER_SIZE + self.num_add_shards * ADD_SHARD_SIZE;
            let seg = MmapSegment::open(&self.dir, shmid, len)?;
            let base = seg.as_ptr();
            let header = unsafe { BlockHeaderRef::new(base) };
            let add_shards_ptr = unsafe { base.add(BLOCK_HEADER_SIZE) };
            let add_shards: Vec<AddShardHeadRef> = (0..self.num_add_shards)
                .map(|i| unsafe { AddShardHeadRef::new(add_shards_ptr.add(i * ADD_SHARD_SIZE)) })
                .collect();
            let data_ptr = unsafe { add_shards_ptr.add(self.num_add_shards * ADD_SHARD_SIZE) };
            guard.push(BlockDescriptor {
                segment: Arc::new(seg),
                header,
                add_shards,
                data_ptr,
            });
            trace!("mapped block {}", have);
        }
    }

    /// Append a new segment after the current last block. Caller is
    /// expected to hold the last block's header latch exclusively.
    fn add_block(&self) -> CrabResult<()> {
        let mut guard = self.blocks.write().unwrap();
        let new_index = guard.len() as u32;
        let growth_alloc = self.table_info.growth_alloc();
        let new_key = self.key + new_index as i64;

        let len = BLOCK_HEADER_SIZE
            + self.num_add_shards * ADD_SHARD_SIZE
            + growth_alloc as usize * self.true_tuple_size;
        let seg = MmapSegment::create(&self.dir, new_key, len)?;
        let base = seg.as_ptr();
        let header = unsafe { BlockHeaderRef::new(base) };
        header.init(growth_alloc, new_index, new_key);

        let add_shards_ptr = unsafe { base.add(BLOCK_HEADER_SIZE) };
        let add_shards: Vec<AddShardHeadRef> = (0..self.num_add_shards)
            .map(|i| unsafe { AddShardHeadRef::new(add_shards_ptr.add(i * ADD_SHARD_SIZE)) })
            .collect();
        let data_ptr = unsafe { add_shards_ptr.add(self.num_add_shards * ADD_SHARD_SIZE) };
        thread_add_shards(data_ptr, growth_alloc, &add_shards, self.true_tuple_size);

        // Link the chain, then publish the new block count last so a
        // reader racing with growth sees a consistent prefix.
        guard[(new_index - 1) as usize].header.set_next_shared_mem_id(new_key);
        guard.push(BlockDescriptor {
            segment: Arc::new(seg),
            header,
            add_shards,
            data_ptr,
        });
        self.table_info.fetch_add_num_blocks(1);
        debug!("added block {} (key {})", new_index, new_key);
        Ok(())
    }

    // ---- slot access ----

    fn control_at(desc: &BlockDescriptor, tuple: i32, true_tuple_size: usize) -> ControlRef {
        unsafe { ControlRef::new(desc.data_ptr.add(tuple as usize * true_tuple_size)) }
    }

    /// Raw payload pointer -- no validity check, faults the segment in if
    /// needed.
    pub fn locate(&self, block: i32, tuple: i32) -> CrabResult<&[u8]> {
        let desc = self.get_block(block as u32)?;
        let ptr = unsafe {
            desc.data_ptr
                .add(tuple as usize * self.true_tuple_size + CONTROL_SIZE)
        };
        Ok(unsafe { std::slice::from_raw_parts(ptr, self.tuple_size) })
    }

    fn locate_mut(&self, desc: &BlockDescriptor, tuple: i32) -> *mut u8 {
        unsafe {
            desc.data_ptr
                .add(tuple as usize * self.true_tuple_size + CONTROL_SIZE)
        }
    }

    /// Raw mutable payload pointer for a slot this caller already owns (a
    /// freshly allocated page-manager tuple, say). No liveness check.
    pub fn payload_ptr(&self, block: i32, tuple: i32) -> CrabResult<*mut u8> {
        let desc = self.get_block(block as u32)?;
        Ok(self.locate_mut(&desc, tuple))
    }

    /// Returns the payload only if the slot is live.
    pub fn get_tuple(&self, block: i32, tuple: i32) -> CrabResult<Option<&[u8]>> {
        let desc = self.get_block(block as u32)?;
        let control = Self::control_at(&desc, tuple, self.true_tuple_size);
        if !control.is_live() {
            return Ok(None);
        }
        self.locate(block, tuple).map(Some)
    }

    pub fn lock_tuple(&self, block: i32, tuple: i32) -> CrabResult<()> {
        let desc = self.get_block(block as u32)?;
        let control = Self::control_at(&desc, tuple, self.true_tuple_size);
        let mut backoff = SpinBackoff::new();
        loop {
            if control.next_block() != NORMAL {
                return Err(StatusError::not_found("tuple is not a valid row"));
            }
            let cur = control.lock();
            if cur == DELETED_SENTINEL {
                return Err(StatusError::not_found("tuple was deleted"));
            }
            if cur == 0 {
                if control.compare_exchange_lock(0, self.kilroy).is_ok() {
                    return Ok(());
                }
            }
            backoff.spin();
        }
    }

    pub fn bounce_lock_tuple(&self, block: i32, tuple: i32) -> CrabResult<bool> {
        let desc = self.get_block(block as u32)?;
        let control = Self::control_at(&desc, tuple, self.true_tuple_size);
        if control.next_block() != NORMAL || control.lock() == DELETED_SENTINEL {
            return Err(StatusError::not_found("tuple is not a valid row"));
        }
        Ok(control.compare_exchange_lock(0, self.kilroy).is_ok())
    }

    pub fn unlock_tuple(&self, block: i32, tuple: i32) -> CrabResult<()> {
        let desc = self.get_block(block as u32)?;
        let control = Self::control_at(&desc, tuple, self.true_tuple_size);
        control
            .compare_exchange_lock(self.kilroy, 0)
            .map(|_| ())
            .map_err(|_| StatusError::unsafe_operation("unlock_tuple: caller does not hold the slot lock"))
    }

    // ---- allocation / reclamation ----

    pub fn allocate_tuple(&self) -> CrabResult<(i32, i32)> {
        if let Some(loc) = self.get_deleted_record()? {
            return Ok(loc);
        }

        loop {
            let num_blocks = self.table_info.num_blocks();
            let last_block_idx = num_blocks - 1;
            let desc = self.get_block(last_block_idx)?;
            let start = (self.last_add_shard.load(Ordering::Relaxed) + 1) % self.num_add_shards;

            for off in 0..self.num_add_shards {
                let s = (start + off) % self.num_add_shards;
                let shard = desc.add_shards[s];
                if shard.is_empty() {
                    continue;
                }
                if !shard.lock().try_lock() {
                    continue;
                }
                if shard.is_empty() {
                    shard.lock().unlock();
                    continue;
                }
                let head = shard.head();
                let control = Self::control_at(&desc, head, self.true_tuple_size);
                let next = control.next_tuple();
                shard.set_head(next);
                control.set_next_block(NORMAL);
                control.set_next_tuple(NORMAL);
                control.set_lock(self.kilroy);
                shard.lock().unlock();
                self.last_add_shard.store(s, Ordering::Relaxed);
                return Ok((last_block_idx as i32, head));
            }

            // Nothing acquired this sweep: grow, guarded by the last
            // block's header latch so only one grower proceeds at a time.
            let latch = desc.header.latch();
            if !latch.queue_exclusive() {
                // another caller is already mid-grow; wait it out and resweep
                let mut backoff = SpinBackoff::new();
                while latch.is_exclusive_requested() {
                    backoff.spin();
                }
                continue;
            }
            let result = if self.table_info.num_blocks() != num_blocks {
                Ok(()) // someone else already grew it; resweep
            } else {
                self.add_block()
            };
            latch.release_exclusive();
            result?;
        }
    }

    fn get_deleted_record(&self) -> CrabResult<Option<(i32, i32)>> {
        if self.num_delete_shards == 0 {
            return Ok(None);
        }
        let start = (self.last_delete_shard.load(Ordering::Relaxed) + 1) % self.num_delete_shards;
        for off in 0..self.num_delete_shards {
            let s = (start + off) % self.num_delete_shards;
            let shard = self.delete_shards[s];
            if shard.is_empty() {
                continue;
            }
            if !shard.lock().try_lock() {
                continue;
            }
            if shard.is_empty() {
                shard.lock().unlock();
                continue;
            }
            let (block, tuple) = shard.head();
            let desc = self.get_block(block as u32)?;
            let control = Self::control_at(&desc, tuple, self.true_tuple_size);
            let (next_block, next_tuple) = (control.next_block(), control.next_tuple());
            shard.set_head(next_block, next_tuple);
            control.set_next_block(NORMAL);
            control.set_next_tuple(NORMAL);
            control.set_lock(self.kilroy);
            shard.lock().unlock();
            self.last_delete_shard.store(s, Ordering::Relaxed);
            return Ok(Some((block, tuple)));
        }
        Ok(None)
    }

    // ---- mutation ----

    pub fn add_tuple(&self, payload: &[u8]) -> CrabResult<(i32, i32)> {
        if payload.len() != self.tuple_size {
            return Err(StatusError::bad_parameters(format!(
                "payload is {} bytes, table tuple_size is {}",
                payload.len(),
                self.tuple_size
            )));
        }

        let (block, tuple) = self.allocate_tuple()?;
        let desc = self.get_block(block as u32)?;
        unsafe {
            std::ptr::copy_nonoverlapping(payload.as_ptr(), self.locate_mut(&desc, tuple), payload.len());
        }
        desc.header.inc_tuples_used();

        let insert_result: CrabResult<()> = (|| {
            let indexes = self.indexes.read().unwrap();
            if let Some(primary) = &indexes.primary {
                primary.insert_tuple(block, tuple, payload)?;
            }
            for secondary in &indexes.secondaries {
                secondary.insert_tuple(block, tuple, payload)?;
            }
            Ok(())
        })();

        if let Err(e) = insert_result {
            let _ = self.delete_tuple(block, tuple);
            return Err(e);
        }

        self.unlock_tuple(block, tuple)?;
        Ok((block, tuple))
    }

    /// Requires the slot to be locked by this table's own kilroy.
    pub fn delete_tuple(&self, block: i32, tuple: i32) -> CrabResult<()> {
        let desc = self.get_block(block as u32)?;
        let control = Self::control_at(&desc, tuple, self.true_tuple_size);
        if control.lock() != self.kilroy {
            return Err(StatusError::unsafe_operation(
                "delete_tuple: caller does not hold the slot lock",
            ));
        }

        let payload_copy = self.locate(block, tuple)?.to_vec();
        control.set_lock(DELETED_SENTINEL);

        let mut backoff = SpinBackoff::new();
        let (shard_index, shard) = loop {
            let mut picked = None;
            let start = (self.last_delete_shard.load(Ordering::Relaxed) + 1) % self.num_delete_shards;
            for off in 0..self.num_delete_shards {
                let s = (start + off) % self.num_delete_shards;
                let shard = self.delete_shards[s];
                if shard.lock().try_lock() {
                    picked = Some((s, shard));
                    break;
                }
            }
            if let Some(p) = picked {
                break p;
            }
            backoff.spin();
        };

        let (head_block, head_tuple) = shard.head();
        control.set_next_block(head_block);
        control.set_next_tuple(head_tuple);
        shard.set_head(block, tuple);
        self.last_delete_shard.store(shard_index, Ordering::Relaxed);

        let index_result: CrabResult<()> = (|| {
            let indexes = self.indexes.read().unwrap();
            if let Some(primary) = &indexes.primary {
                primary.delete_tuple(block, tuple, &payload_copy)?;
            }
            for secondary in &indexes.secondaries {
                secondary.delete_tuple(block, tuple, &payload_copy)?;
            }
            Ok(())
        })();

        shard.lock().unlock();
        desc.header.dec_tuples_used();
        index_result
    }

    // ---- cursor support ----

    pub(crate) fn scan_upper_bound(&self, block: u32, desc: &BlockDescriptor) -> u32 {
        if block + 1 != self.table_info.num_blocks() {
            return desc.header.tuples_allocated();
        }
        let mut bound = 0u32;
        for shard in &desc.add_shards {
            let h = shard.head();
            let v = if h == CHAIN_END {
                desc.header.tuples_allocated()
            } else {
                h as u32
            };
            bound = bound.max(v);
        }
        bound
    }

    pub fn cursor(&self) -> crate::heap::cursor::Cursor<'_> {
        crate::heap::cursor::Cursor::new(self)
    }

    /// Walk every slot in every block and assert the quiescent-state
    /// invariant: each slot is on exactly one of {add-list, delete-list,
    /// live}. Returns a list of violations (empty means healthy). Intended
    /// for tests; not cheap.
    pub fn check_integrity(&self) -> CrabResult<Vec<String>> {
        let mut violations = Vec::new();
        let num_blocks = self.table_info.num_blocks();

        let mut on_add_list = std::collections::HashSet::new();
        for block in 0..num_blocks {
            let desc = self.get_block(block)?;
            for shard in &desc.add_shards {
                let mut cur = shard.head();
                while cur != CHAIN_END {
                    on_add_list.insert((block as i32, cur));
                    let control = Self::control_at(&desc, cur, self.true_tuple_size);
                    cur = control.next_tuple();
                }
            }
        }

        let mut on_delete_list = std::collections::HashSet::new();
        for shard in &self.delete_shards {
            let (mut b, mut t) = shard.head();
            while b != CHAIN_END {
                on_delete_list.insert((b, t));
                let desc = self.get_block(b as u32)?;
                let control = Self::control_at(&desc, t, self.true_tuple_size);
                let (nb, nt) = (control.next_block(), control.next_tuple());
                b = nb;
                t = nt;
            }
        }

        for block in 0..num_blocks {
            let desc = self.get_block(block)?;
            for tuple in 0..desc.header.tuples_allocated() as i32 {
                let control = Self::control_at(&desc, tuple, self.true_tuple_size);
                let key = (block as i32, tuple);
                let is_add = on_add_list.contains(&key);
                let is_del = on_delete_list.contains(&key);
                let is_live = control.is_live();

                let membership_count = [is_add, is_del, is_live].iter().filter(|b| **b).count();
                if membership_count != 1 {
                    violations.push(format!(
                        "slot ({},{}) membership count {} (add={}, del={}, live={}, next_block={})",
                        block,
                        tuple,
                        membership_count,
                        is_add,
                        is_del,
                        is_live,
                        control.next_block()
                    ));
                }
            }
        }

        Ok(violations)
    }
}

impl Drop for HeapTable {
    fn drop(&mut self) {
        self.table_info.fetch_add_instance_count(-1);
    }
}

fn thread_add_shards(
    data_ptr: *mut u8,
    count: u32,
    add_shards: &[AddShardHeadRef],
    true_tuple_size: usize,
) {
    let num_shards = add_shards.len();
    let mut heads = vec![CHAIN_END; num_shards];

    // Thread highest-tuple-first so that the resulting chain head is the
    // lowest tuple number in the shard -- sequential allocation then yields
    // ascending tuple numbers.
    for tuple in (0..count).rev() {
        let shard_idx = tuple as usize % num_shards;
        let control = unsafe { ControlRef::new(data_ptr.add(tuple as usize * true_tuple_size)) };
        control.init_virgin(heads[shard_idx]);
        heads[shard_idx] = tuple as i32;
    }

    for (shard, head) in add_shards.iter().zip(heads.into_iter()) {
        shard.set_head(head);
    }
}
