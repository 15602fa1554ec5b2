//! The four-level (five-mode) lock protocol descents crab down the tree
//! under.

/// How a descent acquires latches on its way down the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// No latches at all. On a miss (e.g. the page looks torn, or a
    /// concurrent structural change is suspected), the caller escalates to
    /// `ReadCrablock` and restarts from the root. Safe only when some
    /// coarser lock already rules out concurrent deletes.
    ReadOptimistic,
    /// Hold a share latch on the current page; attempt a share latch on
    /// the child before releasing the parent ("crabbing"). Restart from
    /// root if the parent comes under exclusive request while waiting.
    ReadCrablock,
    /// Share-crab down to the penultimate level, then attempt to upgrade
    /// to exclusive only at the leaf. Escalates to `WriteHoldlock` if the
    /// leaf (and a one-level parent upgrade) can't absorb the write.
    WriteOptimistic,
    /// Share-crab down while tracking the deepest "safe" (non-full)
    /// ancestor; once a full child is seen, accumulate exclusive latches
    /// from the safe ancestor down. Restart from root with backoff on
    /// upgrade failure.
    WriteHoldlock,
    /// Share-crab down, upgrade to exclusive only at the leaf.
    Delete,
}

impl LockMode {
    pub fn is_write(self) -> bool {
        matches!(self, LockMode::WriteOptimistic | LockMode::WriteHoldlock | LockMode::Delete)
    }
}
