//! In-page search and the inner-node child-selection rule that descent
//! builds on.

use std::cmp::Ordering;

use crate::index::page::PageRef;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FindMode {
    Direct,
    First,
    Last,
}

/// The outcome of an inner-node hit during a `FIND_FIRST` descent -- see
/// the design notes on the neighbor peek. This crate resolves the peek by
/// biasing left at an exact separator match and relying on the leaf
/// sibling chain to walk forward to the true first occurrence, so
/// `MatchInLow`/`MatchInPrevSiblingChild` both mean "descend left, the
/// leaf scan will find the real first hit."
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeekOutcome {
    MatchHere,
    MatchInLow,
    MatchInPrevSiblingChild,
    NoMatch,
}

pub struct FindResult {
    /// Index into `key_pointers[0..num_keys]`.
    pub index: usize,
    pub exact: bool,
    pub peek: PeekOutcome,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexType {
    Primary,
    Secondary,
}

pub type CompareFn = dyn Fn(&[u8], &[u8]) -> Ordering + Send + Sync;

/// Binary search `page`'s sorted key-pointer array for `target_key`
/// (optionally tie-broken by `target_loc` for an exact secondary lookup).
pub fn find_in_page(
    page: &PageRef,
    compare: &CompareFn,
    index_type: IndexType,
    target_key: &[u8],
    target_loc: Option<(i32, i32)>,
    mode: FindMode,
) -> FindResult {
    let n = page.num_keys() as usize;

    // lower_bound: first index with key[index] >= target_key
    let mut lo = 0usize;
    let mut hi = n;
    while lo < hi {
        let mid = (lo + hi) / 2;
        let slot = page.key_pointer(mid) as usize;
        if compare(page.key_bytes(slot), target_key) == Ordering::Less {
            lo = mid + 1;
        } else {
            hi = mid;
        }
    }
    let lower = lo;

    match mode {
        FindMode::First => {
            let exact = lower < n
                && compare(page.key_bytes(page.key_pointer(lower) as usize), target_key) == Ordering::Equal;
            let peek = if !exact {
                PeekOutcome::NoMatch
            } else if lower == 0 {
                PeekOutcome::MatchInLow
            } else {
                PeekOutcome::MatchInPrevSiblingChild
            };
            FindResult { index: lower, exact, peek }
        }
        FindMode::Direct => match index_type {
            IndexType::Primary => {
                let exact = lower < n
                    && compare(page.key_bytes(page.key_pointer(lower) as usize), target_key) == Ordering::Equal;
                FindResult { index: lower, exact, peek: PeekOutcome::NoMatch }
            }
            IndexType::Secondary => {
                let mut i = lower;
                while i < n {
                    let slot = page.key_pointer(i) as usize;
                    if compare(page.key_bytes(slot), target_key) != Ordering::Equal {
                        break;
                    }
                    if target_loc.is_none() || Some(page.target(slot)) == target_loc {
                        return FindResult { index: i, exact: true, peek: PeekOutcome::NoMatch };
                    }
                    i += 1;
                }
                FindResult { index: lower, exact: false, peek: PeekOutcome::NoMatch }
            }
        },
        FindMode::Last => {
            // upper_bound: first index with key[index] > target_key
            let mut lo2 = lower;
            let mut hi2 = n;
            while lo2 < hi2 {
                let mid = (lo2 + hi2) / 2;
                let slot = page.key_pointer(mid) as usize;
                if compare(page.key_bytes(slot), target_key) == Ordering::Greater {
                    hi2 = mid;
                } else {
                    lo2 = mid + 1;
                }
            }
            let upper = lo2;
            if upper > lower {
                FindResult { index: upper - 1, exact: true, peek: PeekOutcome::NoMatch }
            } else {
                FindResult { index: lower, exact: false, peek: PeekOutcome::NoMatch }
            }
        }
    }
}

/// Which child an inner-node descent should take, given `find_in_page`'s
/// lower-bound result. `FIND_FIRST` biases left on an exact separator
/// match (see [`PeekOutcome`]); every other mode descends right.
pub fn child_for_descent(page: &PageRef, result: &FindResult, mode: FindMode) -> (i32, i32) {
    let n = page.num_keys() as usize;

    if result.index >= n {
        return if n == 0 {
            page.low_child()
        } else {
            page.child(page.key_pointer(n - 1) as usize)
        };
    }

    let bias_left = result.exact && mode == FindMode::First;
    if result.exact && !bias_left {
        return page.child(page.key_pointer(result.index) as usize);
    }

    // target strictly less than key[index] (or biasing left on a tie):
    // descend the bucket before it.
    if result.index == 0 {
        page.low_child()
    } else {
        page.child(page.key_pointer(result.index - 1) as usize)
    }
}
