//! Cache for per-leaf global parts.
//!
//! One slot per theory leaf of a block. Slots are refreshed by a single
//! writer before the block is evaluated; the evaluation itself only reads
//! the `Arc`s handed out by [`GlobalPartCache::refresh`].

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::theory::{GlobalPart, TheoryFunction};

#[derive(Default)]
struct Slot {
    key: Option<Vec<f64>>,
    part: Option<GlobalPart>,
}

/// Global parts of one block, keyed by the arguments they depend on.
pub struct GlobalPartCache {
    slots: Mutex<Vec<Slot>>,
    recomputed: AtomicUsize,
}

impl GlobalPartCache {
    pub fn new(n_leaves: usize) -> Self {
        Self {
            slots: Mutex::new((0..n_leaves).map(|_| Slot::default()).collect()),
            recomputed: AtomicUsize::new(0),
        }
    }

    /// Bring the slot of leaf `leaf` up to date for `args` and return the
    /// part to use for this evaluation.
    ///
    /// The part is recomputed only when the key derived from `args` differs
    /// from the one it was computed for.
    pub fn refresh(
        &self,
        leaf: usize,
        function: &dyn TheoryFunction,
        args: &[f64],
    ) -> Option<GlobalPart> {
        if !function.needs_global_part() {
            return None;
        }
        let key = function.global_part_key(args);
        let mut slots = match self.slots.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let slot = slots.get_mut(leaf)?;
        if slot.key.as_deref() != Some(key.as_slice()) {
            slot.part = function.compute_global_part(args);
            slot.key = Some(key);
            self.recomputed.fetch_add(1, Ordering::Relaxed);
        }
        slot.part.clone()
    }

    /// Number of recomputations so far.
    pub fn recompute_count(&self) -> usize {
        self.recomputed.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for GlobalPartCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GlobalPartCache")
            .field("recomputed", &self.recompute_count())
            .finish()
    }
}
