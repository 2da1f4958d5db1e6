//! Burst-first selection over round robin.
//!
//! Among RUNNABLE entries, one with a burst time always wins over one
//! without, and a smaller burst wins over a larger one. Entries that compare
//! equal are taken in table scan order starting just past the previously
//! dispatched slot, which gives plain round robin when no burst times are set.
//! Burst times never decay.

use core::fmt;
use core::num::NonZeroU32;

/// Declared expected CPU burst of an entry. Unset entries have none.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BurstTime(NonZeroU32);

impl BurstTime {
    /// `None` for 0, which means "unset".
    pub fn new(ticks: u32) -> Option<Self> {
        NonZeroU32::new(ticks).map(BurstTime)
    }

    pub fn get(&self) -> u32 {
        self.0.get()
    }
}

impl fmt::Display for BurstTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Sort key: any burst time beats none, then smaller bursts first.
fn rank(burst: Option<BurstTime>) -> (bool, u32) {
    match burst {
        Some(b) => (false, b.get()),
        None => (true, 0),
    }
}

/// Pick the slot to dispatch next.
///
/// `runnable(i)` returns `None` when slot `i` is not RUNNABLE, otherwise its
/// burst time. The scan covers `len` slots beginning at `start` and wrapping
/// around; the first slot with the best rank wins.
pub fn pick_next<F>(len: usize, start: usize, runnable: F) -> Option<usize>
where
    F: Fn(usize) -> Option<Option<BurstTime>>,
{
    let mut best: Option<(usize, (bool, u32))> = None;
    for offset in 0..len {
        let index = (start + offset) % len;
        let Some(burst) = runnable(index) else {
            continue;
        };
        let key = rank(burst);
        match best {
            Some((_, best_key)) if best_key <= key => {}
            _ => best = Some((index, key)),
        }
    }
    best.map(|(index, _)| index)
}
