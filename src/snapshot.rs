//! Export/import for a table's rows, and whole-table snapshots built on
//! top of them.
//!
//! A snapshot does not try to preserve the heap's free-list chains or a
//! tree's page ids byte-for-byte: it round-trips through raw row data
//! instead. Re-adding rows in cursor order reproduces identical
//! `(block, tuple)` ids for a table that was never deleted from (true of
//! every B+Tree page manager, since pages are never freed), but a table
//! that has seen deletes may renumber rows on reload. Any index should be
//! rebuilt from the reloaded table via [`rebuild_index`] rather than
//! snapshotted independently, which sidesteps that hazard entirely.

use std::io::{Read, Write};

use bytemuck::{Pod, Zeroable};

use crate::coupling::IndexHandle;
use crate::error::{CrabResult, StatusError};
use crate::heap::HeapTable;

const SNAPSHOT_MAGIC: &[u8; 16] = b"crabtable-tbl-v1";

// 8-byte fields first, then 4-byte fields: keeps the struct padding-free
// (required for `Pod`) without needing an explicit `repr(C, packed)`.
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct TableSnapshotHeader {
    key: i64,
    row_count: u64,
    tuple_size: u32,
    initial_alloc: u32,
    growth_alloc: u32,
    num_delete_shards: u32,
    num_add_shards: u32,
    soft_writes: u32,
}

/// Write every live row's raw payload, in cursor order, back to back with
/// no control words.
pub fn export_raw(table: &HeapTable, out: &mut impl Write) -> CrabResult<()> {
    let mut cursor = table.cursor();
    let mut row = cursor.next()?;
    while let Some(bytes) = row {
        out.write_all(bytes)?;
        row = cursor.next()?;
    }
    Ok(())
}

/// Read a stream of flat `tuple_size`-sized records and `add_tuple` each
/// one, fanning out to any indexes already registered on `table`. Returns
/// the number of rows imported.
pub fn import_raw(table: &HeapTable, input: &mut impl Read) -> CrabResult<u64> {
    let mut buf = vec![0u8; table.tuple_size()];
    let mut count = 0u64;
    loop {
        match input.read_exact(&mut buf) {
            Ok(()) => {
                table.add_tuple(&buf)?;
                count += 1;
            }
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(StatusError::from(e)),
        }
    }
    Ok(count)
}

/// Write a whole-table snapshot: a magic string, a header recording the
/// table's configuration, then every live row's raw payload.
pub fn write_table(table: &HeapTable, out: &mut impl Write) -> CrabResult<()> {
    let mut rows = Vec::new();
    export_raw(table, &mut rows)?;
    let row_count = (rows.len() / table.tuple_size().max(1)) as u64;

    let header = TableSnapshotHeader {
        tuple_size: table.tuple_size() as u32,
        initial_alloc: table.initial_alloc(),
        growth_alloc: table.growth_alloc(),
        num_delete_shards: table.num_delete_shards() as u32,
        num_add_shards: table.num_add_shards() as u32,
        soft_writes: table.soft_writes() as u32,
        key: table.key(),
        row_count,
    };

    out.write_all(SNAPSHOT_MAGIC)?;
    out.write_all(bytemuck::bytes_of(&header))?;
    out.write_all(&rows)?;
    Ok(())
}

/// Create a fresh table at `key` from a snapshot written by [`write_table`].
/// Rejects a snapshot whose stored `key` doesn't match the caller's
/// expectation -- the loader's one config check.
pub fn load_table(
    dir: impl Into<std::path::PathBuf>,
    key: i64,
    kilroy: crate::kilroy::Kilroy,
    input: &mut impl Read,
) -> CrabResult<HeapTable> {
    let mut magic = [0u8; 16];
    input.read_exact(&mut magic)?;
    if &magic != SNAPSHOT_MAGIC {
        return Err(StatusError::file_error("not a table snapshot (bad magic)"));
    }

    let mut header_bytes = [0u8; std::mem::size_of::<TableSnapshotHeader>()];
    input.read_exact(&mut header_bytes)?;
    let header: TableSnapshotHeader = *bytemuck::from_bytes(&header_bytes);

    if header.key != key {
        return Err(StatusError::bad_parameters(format!(
            "snapshot key {} does not match requested key {}",
            header.key, key
        )));
    }

    let table = HeapTable::create(
        dir,
        key,
        header.tuple_size,
        header.initial_alloc,
        header.growth_alloc,
        header.soft_writes != 0,
        header.num_delete_shards,
        header.num_add_shards,
        kilroy,
    )?;
    import_raw(&table, input)?;
    Ok(table)
}

/// Rebuild `index`'s contents by walking every live row in `table` and
/// inserting it. Used after [`load_table`] instead of snapshotting an
/// index's own pages, since rows may have been renumbered on reload.
pub fn rebuild_index(table: &HeapTable, index: &dyn IndexHandle) -> CrabResult<u64> {
    let mut cursor = table.cursor();
    let mut count = 0u64;
    let mut row = cursor.next()?;
    while let Some(bytes) = row {
        let (block, tuple) = cursor.position();
        index.insert_tuple(block, tuple, bytes)?;
        count += 1;
        row = cursor.next()?;
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kilroy::new_kilroy;
    use tempfile::tempdir;

    #[test]
    fn raw_export_import_round_trips() {
        let dir = tempdir().unwrap();
        let table = HeapTable::create(dir.path(), 9100, 8, 4, 4, false, 1, 1, new_kilroy()).unwrap();
        for i in 0u64..20 {
            table.add_tuple(&i.to_le_bytes()).unwrap();
        }

        let mut buf = Vec::new();
        export_raw(&table, &mut buf).unwrap();
        assert_eq!(buf.len(), 20 * 8);

        let dir2 = tempdir().unwrap();
        let table2 = HeapTable::create(dir2.path(), 9200, 8, 4, 4, false, 1, 1, new_kilroy()).unwrap();
        let mut cursor = std::io::Cursor::new(buf);
        let n = import_raw(&table2, &mut cursor).unwrap();
        assert_eq!(n, 20);
        assert_eq!(table2.num_blocks(), table.num_blocks());
    }

    #[test]
    fn write_load_table_round_trips_rows() {
        let dir = tempdir().unwrap();
        let table = HeapTable::create(dir.path(), 9300, 4, 4, 4, false, 1, 1, new_kilroy()).unwrap();
        for i in 0u32..10 {
            table.add_tuple(&i.to_le_bytes()).unwrap();
        }

        let mut snapshot = Vec::new();
        write_table(&table, &mut snapshot).unwrap();

        let dir2 = tempdir().unwrap();
        let mut cursor = std::io::Cursor::new(snapshot);
        let loaded = load_table(dir2.path(), 9300, new_kilroy(), &mut cursor).unwrap();

        let mut values = Vec::new();
        let mut row_cursor = loaded.cursor();
        let mut row = row_cursor.next().unwrap();
        while let Some(bytes) = row {
            values.push(u32::from_le_bytes(bytes.try_into().unwrap()));
            row = row_cursor.next().unwrap();
        }
        values.sort();
        assert_eq!(values, (0u32..10).collect::<Vec<_>>());
    }

    #[test]
    fn load_table_rejects_key_mismatch() {
        let dir = tempdir().unwrap();
        let table = HeapTable::create(dir.path(), 9400, 4, 4, 4, false, 1, 1, new_kilroy()).unwrap();
        let mut snapshot = Vec::new();
        write_table(&table, &mut snapshot).unwrap();

        let dir2 = tempdir().unwrap();
        let mut cursor = std::io::Cursor::new(snapshot);
        let err = load_table(dir2.path(), 9999, new_kilroy(), &mut cursor).unwrap_err();
        assert!(matches!(err, StatusError::BadParameters(_)));
    }
}
