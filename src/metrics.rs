// SMART REPLAY METRICS
// HOT-PATH INGEST: RELAXED FETCH-ADD ON ALIGNED 64-BIT COUNTERS.
// WRITERS ARE UNBOUNDED (WAL RECEIVERS, GETPAGE HANDLERS, REPLAY
// WORKERS); THE CONTROLLER IS THE ONLY READER AND ONLY NEEDS
// APPROXIMATE RATES, NOT CAUSAL ORDER. OVERFLOW IS FINE -- DELTAS ARE
// TAKEN WITH WRAPPING SUBTRACTION.

use std::sync::atomic::{AtomicU64, Ordering};

// --- RAW COUNTERS ---

#[derive(Default)]
pub struct Counters {
    tasks:     AtomicU64,
    misses:    AtomicU64,
    wal_bytes: AtomicU64,
    reads:     AtomicU64,
}

/// One-instant relaxed read of all counters. Races with in-flight
/// increments cost at most a one-tick observation delay.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CounterSample {
    pub tasks: u64,
    pub misses: u64,
    pub wal_bytes: u64,
    pub reads: u64,
}

impl Counters {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn add_tasks(&self, n: u64) {
        self.tasks.fetch_add(n, Ordering::Relaxed);
    }

    #[inline]
    pub fn add_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn add_wal_bytes(&self, bytes: u64) {
        self.wal_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    #[inline]
    pub fn add_read(&self) {
        self.reads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn sample(&self) -> CounterSample {
        CounterSample {
            tasks: self.tasks.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            wal_bytes: self.wal_bytes.load(Ordering::Relaxed),
            reads: self.reads.load(Ordering::Relaxed),
        }
    }
}

// --- PUBLISHED SNAPSHOT ---

/// What the controller published on its most recent tick.
#[derive(Clone, Copy, Debug, Default)]
pub struct MetricsSnapshot {
    pub queue_ewma: f64,
    pub miss_rate_ewma: f64,
    pub wal_bps_ewma: f64,
    pub aggressiveness: f64,
    pub budget: u32,
    pub last_tick_ns: u64,
}

// FLOAT FIELDS TRAVEL AS RAW BITS IN ATOMICS. STORES ARE RELAXED: THE
// BUDGET CELL'S RELEASE STORE, WRITTEN AFTER THESE, ORDERS THEM FOR
// ANY READER THAT LOADS THE BUDGET FIRST.
#[derive(Default)]
pub struct SharedMetrics {
    queue_bits:   AtomicU64,
    miss_bits:    AtomicU64,
    wal_bits:     AtomicU64,
    agg_bits:     AtomicU64,
    last_tick_ns: AtomicU64,
}

impl SharedMetrics {
    pub fn publish(&self, snap: &MetricsSnapshot) {
        self.queue_bits
            .store(snap.queue_ewma.to_bits(), Ordering::Relaxed);
        self.miss_bits
            .store(snap.miss_rate_ewma.to_bits(), Ordering::Relaxed);
        self.wal_bits
            .store(snap.wal_bps_ewma.to_bits(), Ordering::Relaxed);
        self.agg_bits
            .store(snap.aggressiveness.to_bits(), Ordering::Relaxed);
        self.last_tick_ns
            .store(snap.last_tick_ns, Ordering::Relaxed);
    }

    pub fn read(&self, budget: u32) -> MetricsSnapshot {
        MetricsSnapshot {
            queue_ewma: f64::from_bits(self.queue_bits.load(Ordering::Relaxed)),
            miss_rate_ewma: f64::from_bits(self.miss_bits.load(Ordering::Relaxed)),
            wal_bps_ewma: f64::from_bits(self.wal_bits.load(Ordering::Relaxed)),
            aggressiveness: f64::from_bits(self.agg_bits.load(Ordering::Relaxed)),
            budget,
            last_tick_ns: self.last_tick_ns.load(Ordering::Relaxed),
        }
    }
}
