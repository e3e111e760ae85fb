// SMART REPLAY CONTROLLER
// ONE DEDICATED THREAD, ONE CYCLE PER tick_ms. EACH TICK: SNAPSHOT
// THE CONFIG, SMOOTH THE COUNTERS, NORMALIZE PRESSURES AGAINST THEIR
// REFERENCES, STEP-LIMIT THE AGGRESSIVENESS, MAP TO A BUDGET, PUBLISH
// THROUGH HYSTERESIS. A MISSED TICK IS HARMLESS; NOTHING IS RETRIED.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::info;

use crate::metrics::MetricsSnapshot;
use crate::policy::{self, Smoother};
use crate::ReplayGovernor;

// --- LIFECYCLE ---

#[repr(u8)]
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ControllerState {
    Stopped = 0,
    Running = 1,
    Draining = 2,
}

impl ControllerState {
    pub fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Running,
            2 => Self::Draining,
            _ => Self::Stopped,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Stopped => "STOPPED",
            Self::Running => "RUNNING",
            Self::Draining => "DRAINING",
        }
    }
}

// --- CONTROLLER ---

/// One control cycle's worth of logic plus the smoother state it owns.
/// The controller thread drives this with wall-clock ticks; tests
/// drive it directly with simulated timestamps.
pub struct Controller {
    gov: Arc<ReplayGovernor>,
    smoother: Smoother,
}

impl Controller {
    pub fn new(gov: Arc<ReplayGovernor>) -> Self {
        Self {
            gov,
            smoother: Smoother::default(),
        }
    }

    pub fn tick(&mut self, now_ns: u64) {
        // THE SNAPSHOT TAKEN HERE IS THE ONLY CONFIG THIS TICK SEES
        let cfg = self.gov.config_snapshot();
        if !cfg.enabled {
            return;
        }

        self.smoother
            .observe(self.gov.counters().sample(), now_ns, cfg.ewma_alpha);

        let e_q = policy::press(self.smoother.queue_ewma, cfg.q_star);
        let e_m = policy::press(self.smoother.miss_rate_ewma, cfg.r_star);
        let e_w = policy::press(self.smoother.wal_bps_ewma, cfg.w_star);

        let raw = policy::combine(e_q, e_m, e_w, cfg.w_q, cfg.w_m, cfg.w_w);
        let agg = policy::step_limit(self.smoother.agg_prev, raw, cfg.max_step);
        self.smoother.agg_prev = agg;

        let target = policy::map_budget(agg, cfg.b_min, cfg.b_max);
        let published = self.gov.budget_cell().get();
        let budget = if policy::within_hysteresis(target, published, cfg.hyst) {
            published
        } else {
            target
        };

        let snap = MetricsSnapshot {
            queue_ewma: self.smoother.queue_ewma,
            miss_rate_ewma: self.smoother.miss_rate_ewma,
            wal_bps_ewma: self.smoother.wal_bps_ewma,
            aggressiveness: agg,
            budget,
            last_tick_ns: now_ns,
        };

        // SNAPSHOT FIRST, BUDGET LAST: THE RELEASE STORE ON THE CELL
        // ORDERS THE SNAPSHOT FOR ACQUIRE READERS
        self.gov.shared_metrics().publish(&snap);
        self.gov.budget_cell().set(budget);
        self.gov.push_history(snap);

        if cfg.verbose {
            info!(
                "metrics: queue={:.2} miss_rate={:.4} wal_bps={:.0} pressures(q={:.2} m={:.2} w={:.2}) agg={:.2} budget={}",
                snap.queue_ewma,
                snap.miss_rate_ewma,
                snap.wal_bps_ewma,
                e_q,
                e_m,
                e_w,
                agg,
                budget,
            );
        }
    }
}

// --- THREAD ---

pub(crate) fn spawn(gov: Arc<ReplayGovernor>) -> std::io::Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("replay-governor".into())
        .spawn(move || run(gov))
}

fn run(gov: Arc<ReplayGovernor>) {
    let mut ctl = Controller::new(Arc::clone(&gov));
    // THE DRAIN FLAG IS CHECKED AT THE TOP OF EACH CYCLE; A DRAIN
    // REQUESTED MID-SLEEP STILL GETS ITS FINAL TICK, SO SHUTDOWN
    // LATENCY IS BOUNDED BY ONE TICK
    while !gov.draining() {
        let tick_ms = gov.config_snapshot().tick_ms;
        std::thread::sleep(Duration::from_millis(tick_ms));
        ctl.tick(now_ns());
    }
}

// MONOTONIC NANOSECONDS. ONLY THE CONTROLLER TIMESTAMPS TICKS; THE
// HOT PATHS NEVER TOUCH THE CLOCK.
pub(crate) fn now_ns() -> u64 {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    unsafe {
        libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts);
    }
    (ts.tv_sec as u64) * 1_000_000_000 + (ts.tv_nsec as u64)
}
