//! The caller identity threaded through every slot-lock operation.
//!
//! A kilroy is whatever value the caller supplies to identify itself as the
//! owner of a locked heap slot -- classically "process ID + thread ID", here
//! a process-local monotonic counter. The system cannot detect kilroy reuse
//! across threads; callers are trusted to keep theirs distinct, per the
//! design notes.

use std::sync::atomic::{AtomicU32, Ordering};

/// Sentinel tuple-lock value marking a tombstoned slot.
pub const DELETED_SENTINEL: u32 = 0xFFFF_FFFF;

/// A caller identity used as the owner token of a slot lock. Never equal to
/// `0` (free) or [`DELETED_SENTINEL`] (tombstone).
pub type Kilroy = u32;

static NEXT_KILROY: AtomicU32 = AtomicU32::new(1);

/// Mint a fresh process-local kilroy. Guaranteed never to collide with `0`
/// or [`DELETED_SENTINEL`] for the lifetime of the process.
pub fn new_kilroy() -> Kilroy {
    loop {
        let id = NEXT_KILROY.fetch_add(1, Ordering::Relaxed);
        if id != 0 && id != DELETED_SENTINEL {
            return id;
        }
    }
}
