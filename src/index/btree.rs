//! The B+Tree index: pages live as fixed-size tuples inside a page-manager
//! [`HeapTable`], giving the tree its allocator, growth, and slot-locking
//! for free. Latch-crabbing descents implement the five lock modes; splits
//! never merge back together, matching the design's "no tree-node merging"
//! choice.

use std::path::PathBuf;
use std::sync::Arc;

use log::debug;

use crate::coupling::IndexHandle;
use crate::error::{CrabResult, StatusError};
use crate::heap::HeapTable;
use crate::index::find::{child_for_descent, find_in_page, CompareFn, FindMode, IndexType};
use crate::index::lock::LockMode;
use crate::index::page::{PageGeometry, PageRef, PageType, END_CHAIN};
use crate::kilroy::Kilroy;
use crate::sync::SpinBackoff;

/// Caller-supplied callback deriving a sort key from a row payload.
pub type MakeKeyFn = dyn Fn(&[u8]) -> Vec<u8> + Send + Sync;

fn acquire_exclusive(page: &PageRef) {
    let mut backoff = SpinBackoff::new();
    while !page.latch().queue_exclusive() {
        backoff.spin();
    }
}

/// A latch-crabbing B+Tree index, embedding a page-manager heap table whose
/// tuple size is one page.
pub struct BTreeIndex {
    pages: HeapTable,
    geometry: PageGeometry,
    index_type: IndexType,
    compare: Arc<CompareFn>,
    make_key: Arc<MakeKeyFn>,
    root: (i32, i32),
    info: (i32, i32),
}

impl BTreeIndex {
    /// Create a brand-new, empty tree: one info page and one root page
    /// (which starts life as a leaf -- the root never moves once created,
    /// so the index never needs to track "which page is currently root").
    #[allow(clippy::too_many_arguments)]
    pub fn create(
        dir: impl Into<PathBuf>,
        key: i64,
        key_length: u32,
        keys_per_page: u32,
        index_type: IndexType,
        compare: Arc<CompareFn>,
        make_key: Arc<MakeKeyFn>,
        kilroy: Kilroy,
    ) -> CrabResult<Self> {
        if key_length == 0 || keys_per_page < 3 {
            return Err(StatusError::bad_parameters(
                "key_length must be nonzero and keys_per_page must allow a meaningful split",
            ));
        }
        let geometry = PageGeometry::new(key_length as usize, keys_per_page as usize);
        let pages = HeapTable::create(
            dir,
            key,
            geometry.total_page_size as u32,
            4,
            4,
            false,
            1,
            1,
            kilroy,
        )?;

        let blank = vec![0u8; geometry.total_page_size];
        let info = pages.add_tuple(&blank)?;
        let info_ptr = pages.payload_ptr(info.0, info.1)?;
        let info_page = unsafe { PageRef::new(info_ptr, geometry) };
        info_page.init(PageType::Info, info.0, info.1);

        let root = pages.add_tuple(&blank)?;
        let root_ptr = pages.payload_ptr(root.0, root.1)?;
        let root_page = unsafe { PageRef::new(root_ptr, geometry) };
        root_page.init(PageType::Leaf, root.0, root.1);

        debug!(
            "created btree key={} key_length={} keys_per_page={} index_type={:?}",
            key, key_length, keys_per_page, index_type
        );

        Ok(Self {
            pages,
            geometry,
            index_type,
            compare,
            make_key,
            root,
            info,
        })
    }

    /// Attach to an existing tree, locating its info and root pages by
    /// scanning the page manager (there are always exactly two pages
    /// allocated before any other, at slots (0,0) and (0,1)).
    pub fn open(
        dir: impl Into<PathBuf>,
        key: i64,
        key_length: u32,
        keys_per_page: u32,
        index_type: IndexType,
        compare: Arc<CompareFn>,
        make_key: Arc<MakeKeyFn>,
        kilroy: Kilroy,
    ) -> CrabResult<Self> {
        let geometry = PageGeometry::new(key_length as usize, keys_per_page as usize);
        let pages = HeapTable::open(dir, key, kilroy)?;

        let mut cursor = pages.cursor();
        let mut info = None;
        let mut root = None;
        let mut payload = cursor.next()?;
        while let Some(bytes) = payload {
            let (block, tuple) = cursor.position();
            let ptr = bytes.as_ptr() as *mut u8;
            let page = unsafe { PageRef::new(ptr, geometry) };
            match page.page_type() {
                PageType::Info if info.is_none() => info = Some((block, tuple)),
                PageType::Leaf | PageType::Node if root.is_none() && info.is_some() => {
                    root = Some((block, tuple));
                }
                _ => {}
            }
            if info.is_some() && root.is_some() {
                break;
            }
            payload = cursor.next()?;
        }

        let info = info.ok_or_else(|| StatusError::not_found("tree has no info page"))?;
        let root = root.ok_or_else(|| StatusError::not_found("tree has no root page"))?;

        Ok(Self {
            pages,
            geometry,
            index_type,
            compare,
            make_key,
            root,
            info,
        })
    }

    pub fn index_type(&self) -> IndexType {
        self.index_type
    }

    pub fn info_id(&self) -> (i32, i32) {
        self.info
    }

    pub fn root_id(&self) -> (i32, i32) {
        self.root
    }

    fn load_page(&self, id: (i32, i32)) -> CrabResult<PageRef> {
        let ptr = self.pages.payload_ptr(id.0, id.1)?;
        Ok(unsafe { PageRef::new(ptr, self.geometry) })
    }

    fn is_leaf(&self, page: &PageRef) -> bool {
        page.page_type() == PageType::Leaf
    }

    pub fn cursor(&self) -> crate::index::cursor::IndexCursor<'_> {
        crate::index::cursor::IndexCursor::new(self)
    }

    pub(crate) fn compare_fn(&self) -> &CompareFn {
        &*self.compare
    }

    pub(crate) fn load_page_pub(&self, id: (i32, i32)) -> CrabResult<PageRef> {
        self.load_page(id)
    }

    pub(crate) fn descend_read_pub(
        &self,
        target_key: &[u8],
        target_loc: Option<(i32, i32)>,
        find_mode: FindMode,
        lock_mode: LockMode,
    ) -> CrabResult<PageRef> {
        self.descend_read(target_key, target_loc, find_mode, lock_mode)
    }

    // ---- descent ----

    /// `READ_OPTIMISTIC`/`READ_CRABLOCK` descent, landing on the leaf that
    /// would contain `target_key`. Leaves the leaf's share latch held
    /// (`READ_CRABLOCK`) or untouched (`READ_OPTIMISTIC`) -- the caller is
    /// responsible for releasing it under `READ_CRABLOCK`.
    fn descend_read(
        &self,
        target_key: &[u8],
        target_loc: Option<(i32, i32)>,
        find_mode: FindMode,
        lock_mode: LockMode,
    ) -> CrabResult<PageRef> {
        let use_latches = lock_mode != LockMode::ReadOptimistic;
        let mut current = self.load_page(self.root)?;
        if use_latches {
            current.latch().acquire_share();
        }
        loop {
            if self.is_leaf(&current) {
                return Ok(current);
            }
            let result = find_in_page(&current, &*self.compare, self.index_type, target_key, target_loc, find_mode);
            let child_id = child_for_descent(&current, &result, find_mode);
            let child = self.load_page(child_id)?;
            if use_latches {
                child.latch().acquire_share();
                current.latch().release_share();
            }
            current = child;
        }
    }

    /// Top-down exclusive path from root to leaf, every page held
    /// exclusive until the caller releases the whole path. This is the
    /// `WRITE_HOLDLOCK` strategy; this implementation always uses it for
    /// mutation (see `DESIGN.md` on why `WRITE_OPTIMISTIC`'s share-then-
    /// upgrade fast path was not worth the added complexity here).
    fn descend_exclusive_path(
        &self,
        target_key: &[u8],
        target_loc: Option<(i32, i32)>,
        find_mode: FindMode,
    ) -> CrabResult<Vec<PageRef>> {
        let mut path = Vec::new();
        let root = self.load_page(self.root)?;
        acquire_exclusive(&root);
        path.push(root);
        loop {
            let top = *path.last().unwrap();
            if self.is_leaf(&top) {
                return Ok(path);
            }
            let result = find_in_page(&top, &*self.compare, self.index_type, target_key, target_loc, find_mode);
            let child_id = child_for_descent(&top, &result, find_mode);
            let child = self.load_page(child_id)?;
            acquire_exclusive(&child);
            path.push(child);
        }
    }

    fn release_path(path: &[PageRef]) {
        for page in path.iter().rev() {
            page.latch().release_exclusive();
        }
    }

    // ---- find ----

    /// Locate a single key (or the first of a run of equal keys), per
    /// `find_mode`. Returns the matching row's `(block, tuple)`.
    pub fn find_tuple(&self, key: &[u8], lock_mode: LockMode, find_mode: FindMode) -> CrabResult<Option<(i32, i32)>> {
        let leaf = self.descend_read(key, None, find_mode, lock_mode)?;
        let result = find_in_page(&leaf, &*self.compare, self.index_type, key, None, find_mode);
        let found = if result.exact {
            Some(leaf.target(leaf.key_pointer(result.index) as usize))
        } else {
            None
        };
        if lock_mode != LockMode::ReadOptimistic {
            leaf.latch().release_share();
        }
        Ok(found)
    }

    // ---- insert ----

    /// Insert `(key, target)`. Returns `Ok(false)` without mutating
    /// anything if this is a primary index and `key` is already present.
    pub fn insert_key_into_page(&self, key: &[u8], target: (i32, i32)) -> CrabResult<bool> {
        if key.len() != self.geometry.key_length {
            return Err(StatusError::bad_parameters(format!(
                "key is {} bytes, tree key_length is {}",
                key.len(),
                self.geometry.key_length
            )));
        }

        let path = self.descend_exclusive_path(key, None, FindMode::First)?;
        let leaf = *path.last().unwrap();

        if self.index_type == IndexType::Primary {
            let probe = find_in_page(&leaf, &*self.compare, self.index_type, key, None, FindMode::First);
            if probe.exact {
                Self::release_path(&path);
                return Ok(false);
            }
        }

        let result = self.insert_into_page(leaf, &path[..path.len() - 1], key, target, (END_CHAIN, END_CHAIN));
        Self::release_path(&path);
        result.map(|()| true)
    }

    /// Orders two entries by user key, falling back to the target location
    /// on a tie so secondary-index duplicates stay sorted by
    /// `(user_key, target_block, target_tuple)` regardless of insertion
    /// order. Inner-node entries always carry `(END_CHAIN, END_CHAIN)` as
    /// their target, so this is a no-op tiebreak for them.
    fn compare_entries(&self, key_a: &[u8], target_a: (i32, i32), key_b: &[u8], target_b: (i32, i32)) -> std::cmp::Ordering {
        match (self.compare)(key_a, key_b) {
            std::cmp::Ordering::Equal => target_a.cmp(&target_b),
            other => other,
        }
    }

    /// Insert `(key, target_or_child)` into `page`, splitting (and
    /// recursing into `ancestors`) if it's full. `ancestors` holds the
    /// path from the root down to (but excluding) `page`, all exclusively
    /// latched; the caller releases the whole path once this returns.
    fn insert_into_page(
        &self,
        page: PageRef,
        ancestors: &[PageRef],
        key: &[u8],
        target: (i32, i32),
        child: (i32, i32),
    ) -> CrabResult<()> {
        if let Some(slot) = page.alloc_slot() {
            page.set_key_bytes(slot, key);
            page.set_target(slot, target.0, target.1);
            page.set_child(slot, child.0, child.1);

            let n = page.num_keys() as usize;
            let mut pos = 0;
            while pos < n {
                let s = page.key_pointer(pos) as usize;
                if self.compare_entries(page.key_bytes(s), page.target(s), key, target) != std::cmp::Ordering::Greater {
                    pos += 1;
                } else {
                    break;
                }
            }
            for i in (pos..n).rev() {
                let v = page.key_pointer(i);
                page.set_key_pointer(i + 1, v);
            }
            page.set_key_pointer(pos, slot as i32);
            page.set_num_keys(n as i32 + 1);
            return Ok(());
        }

        let (dividing_key, right_id) = self.split_page(&page, key, target, child)?;

        match ancestors.split_last() {
            Some((&parent, grandparents)) => {
                self.insert_into_page(parent, grandparents, &dividing_key, (END_CHAIN, END_CHAIN), right_id)
            }
            None => self.split_root(&page, &dividing_key, right_id),
        }
    }

    /// Split a full page, inserting the new `(key, target, child)` entry
    /// logically before splitting. Returns the dividing key (the first key
    /// of the new right sibling) and the new sibling's id. `page` is
    /// rewritten in place to hold the left half; its identity, page type,
    /// and (for leaves) `prev_leaf` are unchanged.
    fn split_page(
        &self,
        page: &PageRef,
        new_key: &[u8],
        new_target: (i32, i32),
        new_child: (i32, i32),
    ) -> CrabResult<(Vec<u8>, (i32, i32))> {
        let n = page.num_keys() as usize;
        let mut entries: Vec<(Vec<u8>, (i32, i32), (i32, i32))> = (0..n)
            .map(|i| {
                let slot = page.key_pointer(i) as usize;
                (page.key_bytes(slot).to_vec(), page.target(slot), page.child(slot))
            })
            .collect();

        let mut pos = entries.len();
        for (i, (k, t, _)) in entries.iter().enumerate() {
            if self.compare_entries(k, *t, new_key, new_target) == std::cmp::Ordering::Greater {
                pos = i;
                break;
            }
        }
        entries.insert(pos, (new_key.to_vec(), new_target, new_child));

        let mid = self.geometry.keys_per_page / 2;
        let is_leaf = self.is_leaf(page);

        let blank = vec![0u8; self.geometry.total_page_size];
        let (right_block, right_tuple) = self.pages.add_tuple(&blank)?;
        let right = self.load_page((right_block, right_tuple))?;
        right.init(page.page_type(), right_block, right_tuple);

        let dividing_key;
        let (left_entries, right_entries): (&[_], &[_]) = if is_leaf {
            dividing_key = entries[mid].0.clone();
            (&entries[..mid], &entries[mid..])
        } else {
            // Inner-node split: the median is promoted without being
            // duplicated into either side; its child pointer becomes the
            // new right page's low_child.
            dividing_key = entries[mid].0.clone();
            right.set_low_child(entries[mid].2 .0, entries[mid].2 .1);
            (&entries[..mid], &entries[mid + 1..])
        };

        page.reset_entries();
        for (i, (k, t, c)) in left_entries.iter().enumerate() {
            let slot = page.alloc_slot().expect("freshly reset page has enough slots");
            page.set_key_bytes(slot, k);
            page.set_target(slot, t.0, t.1);
            page.set_child(slot, c.0, c.1);
            page.set_key_pointer(i, slot as i32);
        }
        page.set_num_keys(left_entries.len() as i32);

        for (i, (k, t, c)) in right_entries.iter().enumerate() {
            let slot = right.alloc_slot().expect("freshly reset page has enough slots");
            right.set_key_bytes(slot, k);
            right.set_target(slot, t.0, t.1);
            right.set_child(slot, c.0, c.1);
            right.set_key_pointer(i, slot as i32);
        }
        right.set_num_keys(right_entries.len() as i32);

        if is_leaf {
            right.set_prev_leaf(page.self_id().0, page.self_id().1);
            let old_next = page.next_leaf();
            right.set_next_leaf(old_next.0, old_next.1);
            if old_next != (END_CHAIN, END_CHAIN) {
                let next_page = self.load_page(old_next)?;
                next_page.set_prev_leaf(right_block, right_tuple);
            }
            page.set_next_leaf(right_block, right_tuple);
        }

        debug!(
            "split page ({},{}) -> ({},{}) at {} entries",
            page.self_id().0,
            page.self_id().1,
            right_block,
            right_tuple,
            left_entries.len()
        );

        Ok((dividing_key, (right_block, right_tuple)))
    }

    /// The root has just split into `root` (left half, rewritten in
    /// place) and `right_id` (new sibling). The root keeps its identity
    /// and becomes an internal node with exactly two children.
    fn split_root(&self, root: &PageRef, dividing_key: &[u8], right_id: (i32, i32)) -> CrabResult<()> {
        let was_leaf = self.is_leaf(root);
        let left_id = root.self_id();

        // Move the root's own (just-rewritten) entries into a brand new
        // left child so the root page can become a pure internal node.
        let n = root.num_keys() as usize;
        let entries: Vec<(Vec<u8>, (i32, i32), (i32, i32))> = (0..n)
            .map(|i| {
                let slot = root.key_pointer(i) as usize;
                (root.key_bytes(slot).to_vec(), root.target(slot), root.child(slot))
            })
            .collect();
        let low_child = root.low_child();
        let prev_leaf = root.prev_leaf();

        let blank = vec![0u8; self.geometry.total_page_size];
        let (new_left_block, new_left_tuple) = self.pages.add_tuple(&blank)?;
        let new_left = self.load_page((new_left_block, new_left_tuple))?;
        new_left.init(root.page_type(), new_left_block, new_left_tuple);
        if !was_leaf {
            new_left.set_low_child(low_child.0, low_child.1);
        } else {
            new_left.set_prev_leaf(prev_leaf.0, prev_leaf.1);
            new_left.set_next_leaf(right_id.0, right_id.1);
        }
        for (i, (k, t, c)) in entries.iter().enumerate() {
            let slot = new_left.alloc_slot().expect("freshly initialized page has enough slots");
            new_left.set_key_bytes(slot, k);
            new_left.set_target(slot, t.0, t.1);
            new_left.set_child(slot, c.0, c.1);
            new_left.set_key_pointer(i, slot as i32);
        }
        new_left.set_num_keys(n as i32);

        if was_leaf {
            let right = self.load_page(right_id)?;
            right.set_prev_leaf(new_left_block, new_left_tuple);
        }

        // The page that used to be `left_id` (same bytes as `root`) is
        // re-initialized as the new internal root with exactly two
        // children: `new_left` via `low_child`, `right_id` via one key.
        root.init(PageType::Node, left_id.0, left_id.1);
        root.set_low_child(new_left_block, new_left_tuple);
        let slot = root.alloc_slot().expect("freshly reset page has free slots");
        root.set_key_bytes(slot, dividing_key);
        root.set_child(slot, right_id.0, right_id.1);
        root.set_target(slot, END_CHAIN, END_CHAIN);
        root.set_key_pointer(0, slot as i32);
        root.set_num_keys(1);

        debug!(
            "root ({},{}) split: new children ({},{}) and ({},{})",
            left_id.0, left_id.1, new_left_block, new_left_tuple, right_id.0, right_id.1
        );
        Ok(())
    }

    // ---- delete ----

    /// Delete the exact `(key, target)` entry. Returns `Ok(false)` if no
    /// such entry exists. Inner-node separator entries are never deleted
    /// (no merging) -- only leaf rows are removed.
    pub fn delete_key_from_page(&self, key: &[u8], target: (i32, i32)) -> CrabResult<bool> {
        let leaf = self.descend_read(key, Some(target), FindMode::Direct, LockMode::Delete)?;
        leaf.latch().release_share();
        acquire_exclusive(&leaf);

        let result = find_in_page(&leaf, &*self.compare, self.index_type, key, Some(target), FindMode::Direct);
        if !result.exact {
            leaf.latch().release_exclusive();
            return Ok(false);
        }

        let slot = leaf.key_pointer(result.index) as usize;
        let n = leaf.num_keys() as usize;
        for i in result.index..n - 1 {
            let v = leaf.key_pointer(i + 1);
            leaf.set_key_pointer(i, v);
        }
        leaf.set_num_keys(n as i32 - 1);
        leaf.free_slot(slot);
        leaf.latch().release_exclusive();
        Ok(true)
    }

    // ---- integrity ----

    /// Walk every page, checking sortedness and sibling-chain consistency.
    /// Returns a list of violations (empty means healthy). Does not verify
    /// the non-leaf separator invariant against subtree contents, only
    /// that keys within a page are sorted and siblings agree with each
    /// other -- a full recursive check is left to the round-trip tests.
    pub fn check_tree(&self) -> CrabResult<Vec<String>> {
        let mut violations = Vec::new();
        let mut cursor = self.pages.cursor();
        let mut payload = cursor.next()?;
        while let Some(bytes) = payload {
            let (block, tuple) = cursor.position();
            let ptr = bytes.as_ptr() as *mut u8;
            let page = unsafe { PageRef::new(ptr, self.geometry) };

            if page.page_type() == PageType::Info {
                payload = cursor.next()?;
                continue;
            }

            let n = page.num_keys() as usize;
            let mut prev_key: Option<Vec<u8>> = None;
            for i in 0..n {
                let slot = page.key_pointer(i) as usize;
                let k = page.key_bytes(slot).to_vec();
                if let Some(p) = &prev_key {
                    let ord = (self.compare)(p, &k);
                    let ok = if self.index_type == IndexType::Primary || !self.is_leaf(&page) {
                        ord == std::cmp::Ordering::Less
                    } else {
                        ord != std::cmp::Ordering::Greater
                    };
                    if !ok {
                        violations.push(format!(
                            "page ({},{}) key_pointers out of order at index {}",
                            block, tuple, i
                        ));
                    }
                }
                prev_key = Some(k);
            }

            if self.is_leaf(&page) {
                let next = page.next_leaf();
                if next != (END_CHAIN, END_CHAIN) {
                    let next_page = self.load_page(next)?;
                    if next_page.prev_leaf() != (block, tuple) {
                        violations.push(format!(
                            "leaf ({},{})'s next_leaf ({},{}) does not point back",
                            block, tuple, next.0, next.1
                        ));
                    }
                }
            }

            payload = cursor.next()?;
        }
        Ok(violations)
    }

    fn row_key(&self, payload: &[u8]) -> Vec<u8> {
        (self.make_key)(payload)
    }
}

impl IndexHandle for BTreeIndex {
    fn insert_tuple(&self, block: i32, tuple: i32, payload: &[u8]) -> CrabResult<()> {
        let key = self.row_key(payload);
        if !self.insert_key_into_page(&key, (block, tuple))? {
            return Err(StatusError::object_in_use("duplicate primary key"));
        }
        Ok(())
    }

    fn delete_tuple(&self, block: i32, tuple: i32, payload: &[u8]) -> CrabResult<()> {
        let key = self.row_key(payload);
        self.delete_key_from_page(&key, (block, tuple))?;
        Ok(())
    }

    fn is_unique(&self) -> bool {
        self.index_type == IndexType::Primary
    }
}
