// SMART REPLAY CONFIGURATION
// ONE IMMUTABLE RECORD, PUBLISHED BY POINTER SWAP. A CONTROLLER TICK
// READS ONE SNAPSHOT AND NEVER SEES A TORN STRUCT; THE INGEST FAST
// PATH READS ONLY A MIRRORED `enabled` FLAG.

use thiserror::Error;

// --- DEFAULTS ---

pub const DEFAULT_Q_STAR: f64 = 100.0; // HEALTHY PENDING-REPLAY RATE, RECORDS/SEC
pub const DEFAULT_R_STAR: f64 = 0.05; // HEALTHY HOT-MISS FRACTION
pub const DEFAULT_W_STAR: f64 = 10.0 * (1 << 20) as f64; // HEALTHY WAL INGEST, BYTES/SEC
pub const DEFAULT_B_MIN: u32 = 10;
pub const DEFAULT_B_MAX: u32 = 2000;
pub const DEFAULT_W_Q: f64 = 0.3;
pub const DEFAULT_W_M: f64 = 0.6; // HOT MISSES ARE THE SIGNAL CLOSEST TO USER-VISIBLE LATENCY
pub const DEFAULT_W_W: f64 = 0.1;
pub const DEFAULT_HYST: u32 = 20;
pub const DEFAULT_MAX_STEP: f64 = 0.2;
pub const DEFAULT_EWMA_ALPHA: f64 = 0.3;
pub const DEFAULT_TICK_MS: u64 = 200;

/// Governor knobs. Updated only as a whole via
/// [`ReplayGovernor::update_config`](crate::ReplayGovernor::update_config);
/// a rejected update leaves the previous record in place.
#[derive(Clone, Debug, PartialEq)]
pub struct ReplayConfig {
    /// Master switch. Off: ingest and controller ticks are no-ops.
    pub enabled: bool,
    /// One controller log line per tick.
    pub verbose: bool,
    /// Reference pending-replay rate, records/sec.
    pub q_star: f64,
    /// Reference hot-miss fraction in [0, 1].
    pub r_star: f64,
    /// Reference WAL ingest rate, bytes/sec.
    pub w_star: f64,
    /// Inclusive budget floor, >= 1.
    pub b_min: u32,
    /// Inclusive budget ceiling, > b_min.
    pub b_max: u32,
    /// Pending-replay pressure weight.
    pub w_q: f64,
    /// Hot-miss pressure weight.
    pub w_m: f64,
    /// WAL-ingest pressure weight.
    pub w_w: f64,
    /// Minimum budget move worth publishing.
    pub hyst: u32,
    /// Per-tick cap on the change of aggressiveness, in (0, 1].
    pub max_step: f64,
    /// EWMA weight on the new sample, in (0, 1].
    pub ewma_alpha: f64,
    /// Controller cycle length.
    pub tick_ms: u64,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            verbose: false,
            q_star: DEFAULT_Q_STAR,
            r_star: DEFAULT_R_STAR,
            w_star: DEFAULT_W_STAR,
            b_min: DEFAULT_B_MIN,
            b_max: DEFAULT_B_MAX,
            w_q: DEFAULT_W_Q,
            w_m: DEFAULT_W_M,
            w_w: DEFAULT_W_W,
            hyst: DEFAULT_HYST,
            max_step: DEFAULT_MAX_STEP,
            ewma_alpha: DEFAULT_EWMA_ALPHA,
            tick_ms: DEFAULT_TICK_MS,
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("budget bounds empty: b_min={b_min} b_max={b_max} (need b_min >= 1 and b_max > b_min)")]
    BudgetBounds { b_min: u32, b_max: u32 },
    #[error("pressure weight out of range: {name}={value} (need w >= 0 and w_q+w_m+w_w <= 1)")]
    Weight { name: &'static str, value: f64 },
    #[error("reference out of range: {name}={value}")]
    Reference { name: &'static str, value: f64 },
    #[error("max_step={0} outside (0, 1]")]
    MaxStep(f64),
    #[error("ewma_alpha={0} outside (0, 1]")]
    EwmaAlpha(f64),
    #[error("tick_ms must be nonzero")]
    TickMs,
}

impl ReplayConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.b_min < 1 || self.b_max <= self.b_min {
            return Err(ConfigError::BudgetBounds {
                b_min: self.b_min,
                b_max: self.b_max,
            });
        }
        for (name, w) in [("w_q", self.w_q), ("w_m", self.w_m), ("w_w", self.w_w)] {
            if !w.is_finite() || w < 0.0 {
                return Err(ConfigError::Weight { name, value: w });
            }
        }
        let sum = self.w_q + self.w_m + self.w_w;
        if sum > 1.0 + 1e-9 {
            return Err(ConfigError::Weight {
                name: "w_q+w_m+w_w",
                value: sum,
            });
        }
        if !self.q_star.is_finite() || self.q_star <= 0.0 {
            return Err(ConfigError::Reference {
                name: "q_star",
                value: self.q_star,
            });
        }
        if !self.r_star.is_finite() || self.r_star <= 0.0 || self.r_star > 1.0 {
            return Err(ConfigError::Reference {
                name: "r_star",
                value: self.r_star,
            });
        }
        if !self.w_star.is_finite() || self.w_star <= 0.0 {
            return Err(ConfigError::Reference {
                name: "w_star",
                value: self.w_star,
            });
        }
        if !self.max_step.is_finite() || self.max_step <= 0.0 || self.max_step > 1.0 {
            return Err(ConfigError::MaxStep(self.max_step));
        }
        if !self.ewma_alpha.is_finite() || self.ewma_alpha <= 0.0 || self.ewma_alpha > 1.0 {
            return Err(ConfigError::EwmaAlpha(self.ewma_alpha));
        }
        if self.tick_ms == 0 {
            return Err(ConfigError::TickMs);
        }
        Ok(())
    }
}
