//! A B+Tree cursor: always `READ_CRABLOCK`, and never holds more than one
//! page's share latch at a time.

use crate::error::CrabResult;
use crate::index::btree::BTreeIndex;
use crate::index::find::FindMode;
use crate::index::lock::LockMode;
use crate::index::page::{PageRef, END_CHAIN};

pub struct IndexCursor<'i> {
    index: &'i BTreeIndex,
    page: Option<PageRef>,
    slot: usize,
}

impl<'i> IndexCursor<'i> {
    pub(crate) fn new(index: &'i BTreeIndex) -> Self {
        Self { index, page: None, slot: 0 }
    }

    fn release(&mut self) {
        if let Some(page) = self.page.take() {
            page.latch().release_share();
        }
    }

    /// Position the cursor on the first entry matching `key` under
    /// `find_mode`, returning its row id. `None` on a miss; the cursor is
    /// then unpositioned.
    pub fn set_cursor(&mut self, key: &[u8], find_mode: FindMode) -> CrabResult<Option<(i32, i32)>> {
        self.release();
        let leaf = self.index.descend_read_pub(key, None, find_mode, LockMode::ReadCrablock)?;
        let result = crate::index::find::find_in_page(&leaf, self.index.compare_fn(), self.index.index_type(), key, None, find_mode);
        if !result.exact {
            leaf.latch().release_share();
            return Ok(None);
        }
        let row = leaf.target(leaf.key_pointer(result.index) as usize);
        self.page = Some(leaf);
        self.slot = result.index;
        Ok(Some(row))
    }

    /// Advance to the next entry in key order, crossing into the next
    /// sibling leaf if the current page is exhausted.
    pub fn next(&mut self) -> CrabResult<Option<(i32, i32)>> {
        let page = match self.page {
            Some(p) => p,
            None => return Ok(None),
        };
        let n = page.num_keys() as usize;
        if self.slot + 1 < n {
            self.slot += 1;
            let row = page.target(page.key_pointer(self.slot) as usize);
            return Ok(Some(row));
        }

        let next_id = page.next_leaf();
        self.release();
        if next_id == (END_CHAIN, END_CHAIN) {
            return Ok(None);
        }
        let next_page = self.index.load_page_pub(next_id)?;
        next_page.latch().acquire_share();
        if next_page.num_keys() == 0 {
            next_page.latch().release_share();
            self.page = None;
            return Ok(None);
        }
        self.page = Some(next_page);
        self.slot = 0;
        Ok(Some(next_page.target(next_page.key_pointer(0) as usize)))
    }

    /// Move to the previous entry in key order, crossing into the
    /// previous sibling leaf if the current page is exhausted. Best-effort
    /// under concurrent splits: a split racing with this call can shift
    /// which leaf holds the "previous" entry.
    pub fn prev(&mut self) -> CrabResult<Option<(i32, i32)>> {
        let page = match self.page {
            Some(p) => p,
            None => return Ok(None),
        };
        if self.slot > 0 {
            self.slot -= 1;
            let row = page.target(page.key_pointer(self.slot) as usize);
            return Ok(Some(row));
        }

        let prev_id = page.prev_leaf();
        self.release();
        if prev_id == (END_CHAIN, END_CHAIN) {
            return Ok(None);
        }
        let prev_page = self.index.load_page_pub(prev_id)?;
        prev_page.latch().acquire_share();
        let n = prev_page.num_keys() as usize;
        if n == 0 {
            prev_page.latch().release_share();
            self.page = None;
            return Ok(None);
        }
        self.page = Some(prev_page);
        self.slot = n - 1;
        Ok(Some(prev_page.target(prev_page.key_pointer(self.slot) as usize)))
    }

    pub fn free_cursor(&mut self) {
        self.release();
    }
}

impl<'i> Drop for IndexCursor<'i> {
    fn drop(&mut self) {
        self.release();
    }
}
