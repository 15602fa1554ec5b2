mod backoff;
mod latch;

pub use backoff::SpinBackoff;
pub use latch::{Latch, SpinLock};
