// SMART REPLAY CONTROL POLICY
// PURE MATH: WRAP-SAFE COUNTER DELTAS, EWMA SMOOTHING, PRESSURE
// NORMALIZATION, STEP-LIMITED AGGRESSIVENESS, BUDGET MAPPING,
// HYSTERESIS. NO CLOCKS, NO ATOMICS, NO I/O -- EVERYTHING HERE RUNS
// OFFLINE IN TESTS.

use crate::metrics::CounterSample;

// --- GUARDS ---

// A DELTA ABOVE THIS IS A COUNTER-WENT-BACKWARDS ARTIFACT, NOT LOAD.
// ONE QUIET TICK BEATS ONE SATURATED TICK.
pub const DELTA_SANITY_MAX: u64 = 1 << 63;

// FLOOR ON THE MEASUREMENT WINDOW. CLAMPS THE IMPLIED RATE WHEN TWO
// TICKS LAND BACK TO BACK.
pub const MIN_DT_SECS: f64 = 0.1;

// --- PRIMITIVES ---

pub fn wrap_delta(cur: u64, prev: u64) -> u64 {
    let d = cur.wrapping_sub(prev);
    if d > DELTA_SANITY_MAX {
        0
    } else {
        d
    }
}

pub fn ewma(prev: f64, raw: f64, alpha: f64) -> f64 {
    let x = alpha * raw + (1.0 - alpha) * prev;
    if x.is_finite() {
        x.max(0.0)
    } else {
        0.0
    }
}

// press(x, x*) = clamp(x/x* - 1, 0, 1)
// ZERO BELOW THE REFERENCE, SATURATED AT 2X THE REFERENCE.
// NON-FINITE (0/0 PATHOLOGY) COUNTS AS NO PRESSURE.
pub fn press(x: f64, x_star: f64) -> f64 {
    let p = x / x_star - 1.0;
    if p.is_finite() {
        p.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

pub fn combine(e_q: f64, e_m: f64, e_w: f64, w_q: f64, w_m: f64, w_w: f64) -> f64 {
    let a = w_q * e_q + w_m * e_m + w_w * e_w;
    if a.is_finite() {
        a.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

// CAP THE PER-TICK MOVE OF AGGRESSIVENESS. LIMITING HERE RATHER THAN
// ON THE BUDGET KEEPS THE RATE OF CHANGE INDEPENDENT OF [B_MIN, B_MAX].
pub fn step_limit(prev: f64, next: f64, max_step: f64) -> f64 {
    if next > prev + max_step {
        prev + max_step
    } else if next < prev - max_step {
        prev - max_step
    } else {
        next
    }
}

pub fn map_budget(agg: f64, b_min: u32, b_max: u32) -> u32 {
    let b = b_min as f64 + agg * b_max.saturating_sub(b_min) as f64;
    (b.floor() as u32).clamp(b_min, b_max)
}

// BUDGET-LAYER HYSTERESIS: ABSORBS INTEGER-BOUNDARY JITTER WHEN
// AGGRESSIVENESS HOVERS AT A THRESHOLD.
pub fn within_hysteresis(target: u32, published: u32, hyst: u32) -> bool {
    target.abs_diff(published) < hyst
}

// --- SMOOTHER ---
// OWNED EXCLUSIVELY BY THE CONTROLLER. CONVERTS ONE COUNTER SAMPLE
// PER TICK INTO EWMA RATE ESTIMATES.

#[derive(Clone, Copy, Default)]
pub struct Smoother {
    tasks_prev:  u64,
    misses_prev: u64,
    wal_prev:    u64,
    reads_prev:  u64,
    t_prev_ns:   u64,
    pub queue_ewma:     f64,
    pub miss_rate_ewma: f64,
    pub wal_bps_ewma:   f64,
    pub agg_prev:       f64,
}

impl Smoother {
    pub fn observe(&mut self, s: CounterSample, now_ns: u64, alpha: f64) {
        // FIRST TICK HAS NO WINDOW; TREAT IT AS ONE SECOND
        let dt = if self.t_prev_ns == 0 {
            1.0
        } else {
            (now_ns.wrapping_sub(self.t_prev_ns) as f64 / 1e9).max(MIN_DT_SECS)
        };

        let d_tasks = wrap_delta(s.tasks, self.tasks_prev);
        let d_misses = wrap_delta(s.misses, self.misses_prev);
        let d_wal = wrap_delta(s.wal_bytes, self.wal_prev);
        let d_reads = wrap_delta(s.reads, self.reads_prev);

        let q_raw = d_tasks as f64 / dt;
        let w_raw = d_wal as f64 / dt;

        // WITH AN INSTRUMENTED READ PATH THE MISS FRACTION IS PER READ.
        // WITHOUT ONE IT FALLS BACK TO THE PER-TASK STRESS PROXY; THE
        // +1 BOUNDS A LONE MISS IN A ZERO-REPLAY WINDOW.
        let m_raw = if d_reads > 0 {
            d_misses as f64 / d_reads as f64
        } else {
            d_misses as f64 / (d_tasks + 1) as f64
        };
        let m_raw = if m_raw.is_finite() {
            m_raw.clamp(0.0, 1.0)
        } else {
            0.0
        };

        self.queue_ewma = ewma(self.queue_ewma, q_raw, alpha);
        self.miss_rate_ewma = ewma(self.miss_rate_ewma, m_raw, alpha);
        self.wal_bps_ewma = ewma(self.wal_bps_ewma, w_raw, alpha);

        self.tasks_prev = s.tasks;
        self.misses_prev = s.misses;
        self.wal_prev = s.wal_bytes;
        self.reads_prev = s.reads;
        self.t_prev_ns = now_ns;
    }
}
