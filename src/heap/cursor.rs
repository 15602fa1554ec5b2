//! A linear cursor over a [`HeapTable`], tolerant of concurrent mutation.

use crate::error::CrabResult;
use crate::heap::table::HeapTable;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorStatus {
    /// Before the first row.
    Bot,
    /// Positioned on a live row.
    Normal,
    /// Past the last row.
    Eot,
}

pub struct Cursor<'t> {
    table: &'t HeapTable,
    block: i32,
    tuple: i32,
    status: CursorStatus,
}

impl<'t> Cursor<'t> {
    pub(crate) fn new(table: &'t HeapTable) -> Self {
        Self {
            table,
            block: 0,
            tuple: -1,
            status: CursorStatus::Bot,
        }
    }

    pub fn status(&self) -> CursorStatus {
        self.status
    }

    pub fn position(&self) -> (i32, i32) {
        (self.block, self.tuple)
    }

    /// Jump directly to `(block, tuple)`. Fails silently (returns `Ok(None)`)
    /// if the slot is not currently live.
    pub fn set_tuple(&mut self, block: i32, tuple: i32) -> CrabResult<Option<&'t [u8]>> {
        match self.table.get_tuple(block, tuple)? {
            Some(payload) => {
                self.block = block;
                self.tuple = tuple;
                self.status = CursorStatus::Normal;
                Ok(Some(payload))
            }
            None => Ok(None),
        }
    }

    /// Advance to the next live row, in block/tuple order. Slots freed or
    /// allocated concurrently may be skipped or (if reused) revisited --
    /// the scan makes no isolation guarantee, matching the table's design.
    pub fn next(&mut self) -> CrabResult<Option<&'t [u8]>> {
        if self.status == CursorStatus::Eot {
            return Ok(None);
        }

        let num_blocks = self.table.num_blocks();
        let mut block = self.block;
        let mut tuple = self.tuple + 1;

        loop {
            if block as u32 >= num_blocks {
                self.status = CursorStatus::Eot;
                return Ok(None);
            }
            let desc = self.table.get_block(block as u32)?;
            let bound = self.table.scan_upper_bound(block as u32, &desc);
            while (tuple as u32) < bound {
                if let Some(payload) = self.table.get_tuple(block, tuple)? {
                    self.block = block;
                    self.tuple = tuple;
                    self.status = CursorStatus::Normal;
                    return Ok(Some(payload));
                }
                tuple += 1;
            }
            block += 1;
            tuple = 0;
        }
    }

    /// Retreat to the previous live row. Best-effort under concurrent
    /// mutation: a split or block-growth racing with this call may cause a
    /// row to be skipped or revisited.
    pub fn prev(&mut self) -> CrabResult<Option<&'t [u8]>> {
        if self.status == CursorStatus::Bot {
            return Ok(None);
        }

        let mut block = self.block;
        let mut tuple = self.tuple - 1;

        loop {
            if block < 0 {
                self.status = CursorStatus::Bot;
                return Ok(None);
            }
            if tuple < 0 {
                block -= 1;
                if block < 0 {
                    self.status = CursorStatus::Bot;
                    return Ok(None);
                }
                let desc = self.table.get_block(block as u32)?;
                tuple = self.table.scan_upper_bound(block as u32, &desc) as i32 - 1;
                continue;
            }
            if let Some(payload) = self.table.get_tuple(block, tuple)? {
                self.block = block;
                self.tuple = tuple;
                self.status = CursorStatus::Normal;
                return Ok(Some(payload));
            }
            tuple -= 1;
        }
    }
}
