//! The backing store for shared segments.
//!
//! The design treats the shared-memory allocator as an external
//! collaborator: named segments, attach/detach, size-tagged base pointers.
//! [`Segment`] is that contract, factored out so the heap table and page
//! manager never touch OS primitives directly. [`MmapSegment`] is the one
//! shipped implementation, backed by a memory-mapped file so that multiple
//! processes (or threads, in tests) opening the same key see the same
//! bytes -- the same sharing semantics a true SysV/POSIX shared-memory
//! segment would give.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use memmap2::MmapRaw;

use crate::error::{CrabResult, StatusError};

/// Identity of a segment within its table's or index's key range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SegmentId(pub i64);

/// A named, size-tagged block of shared bytes.
///
/// All access through [`Segment::as_ptr`] is unsynchronized by Rust's
/// borrow checker: callers coordinate through the latches and spinlocks
/// embedded in the bytes themselves, exactly as the design requires for
/// cross-process shared memory.
pub trait Segment: Send + Sync {
    fn create(dir: &Path, key: i64, len: usize) -> CrabResult<Self>
    where
        Self: Sized;

    fn open(dir: &Path, key: i64, len: usize) -> CrabResult<Self>
    where
        Self: Sized;

    fn id(&self) -> SegmentId;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Raw base pointer for this segment.
    ///
    /// # Safety
    /// Dereferencing beyond `len()` bytes, or without holding the latch
    /// that protects the targeted region, is undefined behavior.
    fn as_ptr(&self) -> *mut u8;
}

fn segment_path(dir: &Path, key: i64) -> PathBuf {
    dir.join(format!("seg-{}.bin", key))
}

/// A segment backed by a memory-mapped file.
pub struct MmapSegment {
    id: SegmentId,
    len: usize,
    map: MmapRaw,
    // Keeping the file open for the lifetime of the mapping is required on
    // some platforms; it is otherwise unused after `map_raw`.
    _file: std::fs::File,
}

// SAFETY: MmapRaw's pointer is valid for the lifetime of the MmapSegment and
// concurrent access is arbitrated by latches embedded in the mapped bytes,
// not by Rust aliasing rules.
unsafe impl Send for MmapSegment {}
unsafe impl Sync for MmapSegment {}

impl Segment for MmapSegment {
    fn create(dir: &Path, key: i64, len: usize) -> CrabResult<Self> {
        std::fs::create_dir_all(dir)?;
        let path = segment_path(dir, key);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        file.set_len(len as u64)?;
        let map = MmapRaw::map_raw(&file)
            .map_err(|e| StatusError::out_of_memory(format!("mmap {}: {}", path.display(), e)))?;
        Ok(Self {
            id: SegmentId(key),
            len,
            map,
            _file: file,
        })
    }

    fn open(dir: &Path, key: i64, len: usize) -> CrabResult<Self> {
        let path = segment_path(dir, key);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| StatusError::file_error(format!("open {}: {}", path.display(), e)))?;
        let actual_len = file.metadata()?.len() as usize;
        if actual_len < len {
            return Err(StatusError::operation_failed(format!(
                "segment {} too small: have {} bytes, need {}",
                key, actual_len, len
            )));
        }
        let map = MmapRaw::map_raw(&file)
            .map_err(|e| StatusError::out_of_memory(format!("mmap {}: {}", path.display(), e)))?;
        Ok(Self {
            id: SegmentId(key),
            len,
            map,
            _file: file,
        })
    }

    fn id(&self) -> SegmentId {
        self.id
    }

    fn len(&self) -> usize {
        self.len
    }

    fn as_ptr(&self) -> *mut u8 {
        self.map.as_mut_ptr()
    }
}
