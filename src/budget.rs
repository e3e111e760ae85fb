// PUBLISHED REPLAY BUDGET
// SINGLE WRITER (THE CONTROLLER), MANY READERS (REPLAY WORKERS).
// RELEASE ON STORE, ACQUIRE ON LOAD: A WORKER THAT OBSERVES A NEW
// BUDGET ALSO OBSERVES THE METRICS SNAPSHOT THAT PRODUCED IT.

use std::sync::atomic::{AtomicU32, Ordering};

pub struct BudgetCell(AtomicU32);

impl BudgetCell {
    pub fn new(initial: u32) -> Self {
        Self(AtomicU32::new(initial))
    }

    #[inline]
    pub fn get(&self) -> u32 {
        self.0.load(Ordering::Acquire)
    }

    #[inline]
    pub fn set(&self, budget: u32) {
        self.0.store(budget, Ordering::Release);
    }

    // CONFIG SWAPS MAY NARROW THE BOUNDS UNDER A LIVE CONTROLLER.
    // KEEP THE PUBLISHED VALUE LEGAL WITHOUT WAITING FOR THE NEXT TICK.
    pub fn clamp_into(&self, b_min: u32, b_max: u32) {
        let _ = self
            .0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |b| {
                Some(b.clamp(b_min, b_max))
            });
    }
}
