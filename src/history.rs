// TICK HISTORY
// PRE-ALLOCATED RING OF PUBLISHED SNAPSHOTS. ONE PUSH PER CONTROLLER
// TICK, OLDEST OVERWRITTEN AT CAPACITY. FEEDS POST-RUN SUMMARIES AND
// THE SIMULATOR'S TABLES; NEVER ON THE HOT PATH.

use crate::metrics::MetricsSnapshot;

const MAX_TICKS: usize = 4096;

pub struct TickLog {
    ticks: Vec<MetricsSnapshot>,
    head: usize,
    len: usize,
}

impl TickLog {
    pub fn new() -> Self {
        Self {
            ticks: vec![MetricsSnapshot::default(); MAX_TICKS],
            head: 0,
            len: 0,
        }
    }

    pub fn push(&mut self, snap: MetricsSnapshot) {
        self.ticks[self.head] = snap;
        self.head = (self.head + 1) % MAX_TICKS;
        if self.len < MAX_TICKS {
            self.len += 1;
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    // CHRONOLOGICAL ORDER, OLDEST SURVIVING ENTRY FIRST
    fn iter_chronological(&self) -> impl Iterator<Item = &MetricsSnapshot> {
        let start = if self.len < MAX_TICKS { 0 } else { self.head };
        (0..self.len).map(move |i| &self.ticks[(start + i) % MAX_TICKS])
    }

    pub fn to_vec(&self) -> Vec<MetricsSnapshot> {
        self.iter_chronological().copied().collect()
    }

    // DUMP THE TIME SERIES AFTER A RUN
    pub fn dump(&self) {
        if self.len == 0 {
            return;
        }

        let mut iter = self.iter_chronological();
        let first = iter.next().unwrap();
        let base = first.last_tick_ns;

        println!(
            "\n{:<8} {:<10} {:<10} {:<12} {:<6} {:<8}",
            "TIME_S", "QUEUE/S", "MISS_RATE", "WAL_BPS", "AGG", "BUDGET"
        );
        println!("{}", "-".repeat(58));
        print_row(0.0, first);
        for t in iter {
            print_row(t.last_tick_ns.wrapping_sub(base) as f64 / 1e9, t);
        }

        if self.len == MAX_TICKS {
            println!("(RING WRAPPED -- SHOWING MOST RECENT {} TICKS)", MAX_TICKS);
        }
    }

    // SUMMARY STATISTICS
    pub fn summary(&self) {
        if self.len < 2 {
            return;
        }

        let ticks: Vec<&MetricsSnapshot> = self.iter_chronological().collect();
        let first = ticks[0];
        let last = ticks[ticks.len() - 1];

        let peak_budget = ticks.iter().map(|t| t.budget).max().unwrap_or(0);
        let avg_budget = ticks.iter().map(|t| t.budget as u64).sum::<u64>() / ticks.len() as u64;
        let peak_agg = ticks.iter().map(|t| t.aggressiveness).fold(0.0f64, f64::max);
        let publishes = ticks.windows(2).filter(|w| w[1].budget != w[0].budget).count();
        let elapsed_s = last.last_tick_ns.wrapping_sub(first.last_tick_ns) as f64 / 1e9;

        println!("\n{}", "=".repeat(50));
        println!("SMART REPLAY SUMMARY");
        println!("{}", "=".repeat(50));
        println!("  TICKS:            {}", self.len);
        println!("  ELAPSED:          {:.1}s", elapsed_s);
        println!("  AVG BUDGET:       {}", avg_budget);
        println!("  PEAK BUDGET:      {}", peak_budget);
        println!("  PEAK AGGRESSIVE:  {:.2}", peak_agg);
        println!("  BUDGET PUBLISHES: {}", publishes);
        println!(
            "  FINAL: queue={:.1} miss_rate={:.3} wal_bps={:.0} agg={:.2} budget={}",
            last.queue_ewma,
            last.miss_rate_ewma,
            last.wal_bps_ewma,
            last.aggressiveness,
            last.budget
        );
    }
}

impl Default for TickLog {
    fn default() -> Self {
        Self::new()
    }
}

fn print_row(elapsed_s: f64, t: &MetricsSnapshot) {
    println!(
        "{:<8.1} {:<10.1} {:<10.4} {:<12.0} {:<6.2} {:<8}",
        elapsed_s, t.queue_ewma, t.miss_rate_ewma, t.wal_bps_ewma, t.aggressiveness, t.budget
    );
}
