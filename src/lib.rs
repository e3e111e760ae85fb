// SMART REPLAY -- ADAPTIVE REPLAY GOVERNOR FOR DISAGGREGATED STORAGE
//
// A STORAGE NODE APPLIES SHIPPED WAL TO SERVE GetPage@LSN. A STATIC
// REPLAY RATE IS WRONG IN BOTH DIRECTIONS: TOO LOW AND READS STALL ON
// REPLAY, TOO HIGH AND REPLAY STARVES EVERYTHING ELSE. THIS CRATE
// CLOSES THE LOOP: THREE PRESSURE SIGNALS IN (PENDING-REPLAY RATE,
// HOT-MISS RATE, WAL ARRIVAL RATE), ONE SCALAR OUT -- THE RECORD
// BUDGET A REPLAY WORKER MAY APPLY BEFORE YIELDING.
//
// HOT PATHS WRITE RELAXED ATOMICS. ONE CONTROLLER THREAD SMOOTHS,
// DECIDES, AND PUBLISHES THROUGH THE BUDGET CELL. NO LOCKS ANYWHERE
// A WAL RECORD OR A READ CAN SEE.

pub mod budget;
pub mod config;
pub mod controller;
pub mod history;
pub mod metrics;
pub mod policy;
pub mod worker;

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::thread::JoinHandle;

use arc_swap::ArcSwap;
use tracing::{info, warn};

use budget::BudgetCell;
use history::TickLog;
use metrics::{Counters, SharedMetrics};

pub use config::{ConfigError, ReplayConfig};
pub use controller::{Controller, ControllerState};
pub use metrics::{CounterSample, MetricsSnapshot};
pub use worker::{run_replay_slice, ReplayError, SliceReport};

// --- GOVERNOR ---
// EXACTLY ONE PER STORAGE NODE. COLLABORATORS (WAL RECEIVER, GETPAGE
// HANDLERS, REPLAY WORKERS, BOOTSTRAP) REACH IT THROUGH THE FREE
// FUNCTIONS AT THE BOTTOM; TESTS AND EMBEDDERS OWN PRIVATE INSTANCES.

pub struct ReplayGovernor {
    config: ArcSwap<ReplayConfig>,
    enabled: AtomicBool, // HOT-PATH MIRROR OF config.enabled
    counters: Counters,
    shared: SharedMetrics,
    budget: BudgetCell,
    draining: AtomicBool,
    state: AtomicU8,
    handle: Mutex<Option<JoinHandle<()>>>,
    history: Mutex<TickLog>,
}

impl ReplayGovernor {
    pub fn new() -> Self {
        Self::build(ReplayConfig::default())
    }

    pub fn with_config(cfg: ReplayConfig) -> Result<Self, ConfigError> {
        cfg.validate()?;
        Ok(Self::build(cfg))
    }

    fn build(cfg: ReplayConfig) -> Self {
        let enabled = cfg.enabled;
        let b_min = cfg.b_min;
        Self {
            config: ArcSwap::from_pointee(cfg),
            enabled: AtomicBool::new(enabled),
            counters: Counters::new(),
            shared: SharedMetrics::default(),
            budget: BudgetCell::new(b_min),
            draining: AtomicBool::new(false),
            state: AtomicU8::new(ControllerState::Stopped as u8),
            handle: Mutex::new(None),
            history: Mutex::new(TickLog::new()),
        }
    }

    // --- INGEST (WAIT-FREE; DISABLED => UNTOUCHED COUNTERS) ---

    #[inline]
    pub fn record_replay_task(&self, n: u32) {
        if self.enabled.load(Ordering::Relaxed) {
            self.counters.add_tasks(n as u64);
        }
    }

    #[inline]
    pub fn record_hot_miss(&self) {
        if self.enabled.load(Ordering::Relaxed) {
            self.counters.add_miss();
        }
    }

    #[inline]
    pub fn record_wal_ingest(&self, bytes: u64) {
        if self.enabled.load(Ordering::Relaxed) {
            self.counters.add_wal_bytes(bytes);
        }
    }

    // OPTIONAL HOOK FOR NODES WITH AN INSTRUMENTED READ PATH; GIVES
    // THE MISS FRACTION A TRUE PER-READ DENOMINATOR
    #[inline]
    pub fn record_read_attempt(&self) {
        if self.enabled.load(Ordering::Relaxed) {
            self.counters.add_read();
        }
    }

    // --- READERS ---

    #[inline]
    pub fn get_budget(&self) -> u32 {
        self.budget.get()
    }

    pub fn read_metrics(&self) -> MetricsSnapshot {
        // BUDGET ACQUIRE FIRST: EVERYTHING THE PRODUCING TICK WROTE
        // BEFORE ITS RELEASE STORE IS VISIBLE BELOW
        let budget = self.budget.get();
        self.shared.read(budget)
    }

    pub fn counter_sample(&self) -> CounterSample {
        self.counters.sample()
    }

    pub fn read_history(&self) -> Vec<MetricsSnapshot> {
        self.history.lock().unwrap().to_vec()
    }

    pub fn dump_history(&self) {
        self.history.lock().unwrap().dump();
    }

    pub fn history_summary(&self) {
        self.history.lock().unwrap().summary();
    }

    pub fn controller_state(&self) -> ControllerState {
        ControllerState::from_u8(self.state.load(Ordering::Relaxed))
    }

    // --- CONFIG ---

    pub fn get_config(&self) -> ReplayConfig {
        (*self.config.load_full()).clone()
    }

    /// Whole-struct swap. A rejected update keeps the prior config.
    pub fn update_config(&self, cfg: ReplayConfig) -> Result<(), ConfigError> {
        if let Err(e) = cfg.validate() {
            warn!("config update rejected, keeping previous: {e}");
            return Err(e);
        }
        let enabled = cfg.enabled;
        let (b_min, b_max) = (cfg.b_min, cfg.b_max);
        self.config.store(Arc::new(cfg));
        self.enabled.store(enabled, Ordering::Relaxed);
        // NEW BOUNDS APPLY TO THE PUBLISHED BUDGET NOW, NOT AT THE
        // NEXT TICK
        self.budget.clamp_into(b_min, b_max);
        Ok(())
    }

    // --- LIFECYCLE ---

    pub fn start_controller(self: &Arc<Self>) {
        if !self.config.load().enabled {
            info!("replay governor disabled, controller stays stopped");
            return;
        }
        let mut handle = self.handle.lock().unwrap();
        if handle.is_some() {
            return; // ALREADY RUNNING
        }
        self.draining.store(false, Ordering::Relaxed);
        match controller::spawn(Arc::clone(self)) {
            Ok(h) => {
                *handle = Some(h);
                self.state
                    .store(ControllerState::Running as u8, Ordering::Relaxed);
            }
            Err(e) => {
                // NO CONTROLLER IS A SAFE FALLBACK: INGEST KEEPS
                // ACCUMULATING AND THE BUDGET HOLDS AT b_min
                warn!("controller spawn failed: {e}");
            }
        }
    }

    pub fn shutdown(&self) {
        let joined = self.handle.lock().unwrap().take();
        let Some(h) = joined else { return };
        self.state
            .store(ControllerState::Draining as u8, Ordering::Relaxed);
        self.draining.store(true, Ordering::Relaxed);
        if h.join().is_err() {
            warn!("controller thread panicked during drain");
        }
        self.state
            .store(ControllerState::Stopped as u8, Ordering::Relaxed);
    }

    // --- CONTROLLER PLUMBING ---

    pub(crate) fn config_snapshot(&self) -> Arc<ReplayConfig> {
        self.config.load_full()
    }

    pub(crate) fn counters(&self) -> &Counters {
        &self.counters
    }

    pub(crate) fn shared_metrics(&self) -> &SharedMetrics {
        &self.shared
    }

    pub(crate) fn budget_cell(&self) -> &BudgetCell {
        &self.budget
    }

    pub(crate) fn draining(&self) -> bool {
        self.draining.load(Ordering::Relaxed)
    }

    pub(crate) fn push_history(&self, snap: MetricsSnapshot) {
        self.history.lock().unwrap().push(snap);
    }
}

impl Default for ReplayGovernor {
    fn default() -> Self {
        Self::new()
    }
}

// --- PROCESS-WIDE INSTANCE ---

static GOVERNOR: OnceLock<Arc<ReplayGovernor>> = OnceLock::new();

fn global() -> &'static Arc<ReplayGovernor> {
    GOVERNOR.get_or_init(|| Arc::new(ReplayGovernor::new()))
}

/// Install the process-wide governor with default configuration.
/// Idempotent: later calls return the existing instance untouched.
pub fn init() -> &'static ReplayGovernor {
    global().as_ref()
}

pub fn start_controller() {
    global().start_controller();
}

pub fn shutdown() {
    global().shutdown();
}

#[inline]
pub fn record_replay_task(n: u32) {
    global().record_replay_task(n);
}

#[inline]
pub fn record_hot_miss() {
    global().record_hot_miss();
}

#[inline]
pub fn record_wal_ingest(bytes: u64) {
    global().record_wal_ingest(bytes);
}

#[inline]
pub fn record_read_attempt() {
    global().record_read_attempt();
}

#[inline]
pub fn get_budget() -> u32 {
    global().get_budget()
}

pub fn read_metrics() -> MetricsSnapshot {
    global().read_metrics()
}

pub fn read_history() -> Vec<MetricsSnapshot> {
    global().read_history()
}

pub fn get_config() -> ReplayConfig {
    global().get_config()
}

pub fn update_config(cfg: ReplayConfig) -> Result<(), ConfigError> {
    global().update_config(cfg)
}

pub fn controller_state() -> ControllerState {
    global().controller_state()
}
