//! Garbage collector
//!
//! Full, stop-the-world mark-and-sweep over the processor heap. Collection only
//! runs while the guest is suspended, so every coroutine is back in the heap and
//! the roots are just the handles the processor holds on to.

use ::std::collections::HashSet;
use ::std::time::{Duration, Instant};

use tracing::debug;

use super::memory::{Handle, Heap};

/// Outcome of one collection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GCStats {
    /// Objects that survived
    pub live: usize,
    /// Objects that were freed
    pub freed: usize,
}

/// Mark-and-sweep collector with running totals
#[derive(Debug, Default)]
pub struct GC {
    collections: u64,
    freed_total: u64,
    last_pause: Duration,
}

impl GC {
    pub fn new() -> Self {
        Self::default()
    }

    /// Free every object not reachable from `roots`
    pub fn collect(
        &mut self,
        heap: &mut Heap,
        roots: impl IntoIterator<Item = Handle>,
    ) -> GCStats {
        let started = Instant::now();
        let marked = Self::mark(heap, roots);

        let dead: Vec<Handle> = heap.handles().filter(|h| !marked.contains(h)).collect();
        for handle in &dead {
            heap.deallocate(*handle);
        }

        self.collections += 1;
        self.freed_total += dead.len() as u64;
        self.last_pause = started.elapsed();

        let stats = GCStats {
            live: heap.len(),
            freed: dead.len(),
        };
        debug!(
            live = stats.live,
            freed = stats.freed,
            pause_us = self.last_pause.as_micros() as u64,
            "gc cycle finished"
        );
        stats
    }

    /// 从根出发的可达集合
    fn mark(
        heap: &Heap,
        roots: impl IntoIterator<Item = Handle>,
    ) -> HashSet<Handle> {
        let mut marked = HashSet::new();
        let mut worklist: Vec<Handle> = roots.into_iter().collect();
        while let Some(handle) = worklist.pop() {
            if !marked.insert(handle) {
                continue;
            }
            if let Some(value) = heap.get(handle) {
                value.for_each_ref(&mut |child| {
                    if !marked.contains(&child) {
                        worklist.push(child);
                    }
                });
            }
        }
        marked
    }

    /// Number of completed collections
    pub fn collections(&self) -> u64 {
        self.collections
    }

    /// Objects freed over the collector's lifetime
    pub fn freed_total(&self) -> u64 {
        self.freed_total
    }

    pub fn last_pause(&self) -> Duration {
        self.last_pause
    }
}

#[cfg(test)]
mod tests;
