// SMART REPLAY GOVERNOR TESTS
// END-TO-END CONTROL SCENARIOS DRIVEN WITH SIMULATED TIME: EVERY TICK
// IS EXACTLY ONE SECOND APART. NO CONTROLLER THREAD, NO REAL CLOCK.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use smart_replay::{
    run_replay_slice, Controller, ControllerState, ReplayConfig, ReplayError, ReplayGovernor,
};

const MIB: u64 = 1 << 20;
const SEC: u64 = 1_000_000_000;

fn governor(cfg: ReplayConfig) -> Arc<ReplayGovernor> {
    Arc::new(ReplayGovernor::with_config(cfg).unwrap())
}

fn enabled_defaults() -> ReplayConfig {
    ReplayConfig {
        enabled: true,
        ..ReplayConfig::default()
    }
}

fn approx(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
}

// === STEADY STATE ===

#[test]
fn steady_idle_holds_budget_at_floor() {
    let gov = governor(enabled_defaults());
    let mut ctl = Controller::new(Arc::clone(&gov));

    for k in 1..=5 {
        ctl.tick(k * SEC);
    }

    let m = gov.read_metrics();
    assert_eq!(m.queue_ewma, 0.0);
    assert_eq!(m.miss_rate_ewma, 0.0);
    assert_eq!(m.wal_bps_ewma, 0.0);
    assert_eq!(m.aggressiveness, 0.0);
    assert_eq!(gov.get_budget(), 10);
}

// === PURE WAL PRESSURE ===

#[test]
fn wal_pressure_converges_below_hysteresis_of_target() {
    let gov = governor(enabled_defaults());
    let mut ctl = Controller::new(Arc::clone(&gov));

    // 20 MIB/S AGAINST A 10 MIB/S REFERENCE: e_w SATURATES, A -> 0.1
    for k in 1..=30 {
        gov.record_wal_ingest(20 * MIB);
        ctl.tick(k * SEC);
    }

    let m = gov.read_metrics();
    assert_eq!(m.queue_ewma, 0.0);
    assert_eq!(m.miss_rate_ewma, 0.0);
    assert!(m.wal_bps_ewma > 19.5 * MIB as f64);
    assert!(m.aggressiveness > 0.098 && m.aggressiveness <= 0.1 + 1e-9);
    // TARGET IS floor(10 + 0.1*1990) = 209; THE PUBLISHED VALUE PARKS
    // WITHIN ONE HYSTERESIS BAND OF IT
    let b = gov.get_budget();
    assert!(b > 189 && b <= 209, "budget {b}");
}

#[test]
fn published_budgets_move_by_zero_or_at_least_hysteresis() {
    let gov = governor(enabled_defaults());
    let mut ctl = Controller::new(Arc::clone(&gov));

    let mut published = vec![gov.get_budget()];
    for k in 1..=40 {
        gov.record_wal_ingest(20 * MIB);
        ctl.tick(k * SEC);
        published.push(gov.get_budget());
    }

    for w in published.windows(2) {
        let d = w[1].abs_diff(w[0]);
        assert!(d == 0 || d >= 20, "budget moved by {d}");
    }
}

// === HOT-MISS DOMINATED ===

#[test]
fn hot_miss_pressure_ramps_to_1204_under_step_limit() {
    let gov = governor(enabled_defaults());
    let mut ctl = Controller::new(Arc::clone(&gov));

    let mut budgets = Vec::new();
    for k in 1..=20 {
        for _ in 0..50 {
            gov.record_replay_task(1);
        }
        for _ in 0..25 {
            gov.record_hot_miss();
        }
        ctl.tick(k * SEC);
        budgets.push(gov.get_budget());
    }

    // MISS PRESSURE SATURATES FROM THE FIRST TICK; max_step=0.2 MEANS
    // THREE TICKS FROM 0 TO THE 0.6 PLATEAU
    assert_eq!(budgets[0], 408);
    assert_eq!(budgets[1], 806);
    assert_eq!(budgets[2], 1204);
    assert_eq!(budgets[19], 1204);

    let m = gov.read_metrics();
    assert!(approx(m.aggressiveness, 0.6));
    // EWMA CONVERGES TOWARD 25/51
    assert!(m.miss_rate_ewma > 0.485 && m.miss_rate_ewma < 0.4902);
    // 50 TASKS/S IS BELOW THE 100/S REFERENCE: NO QUEUE PRESSURE
    assert!(m.queue_ewma > 48.0 && m.queue_ewma < 50.1);
}

// === STEP LIMIT ===

#[test]
fn quiesce_from_saturation_steps_down_by_max_step() {
    // ALPHA 1.0: EWMAS TRACK THE RAW RATES EXACTLY, SO THE STEP LIMIT
    // IS THE ONLY THING SHAPING THE DESCENT
    let cfg = ReplayConfig {
        ewma_alpha: 1.0,
        ..enabled_defaults()
    };
    let gov = governor(cfg);
    let mut ctl = Controller::new(Arc::clone(&gov));

    // SATURATE ALL THREE PRESSURES FOR FIVE TICKS: A CLIMBS TO ~1.0
    for k in 1..=5 {
        gov.record_replay_task(300);
        for _ in 0..40 {
            gov.record_hot_miss();
        }
        gov.record_wal_ingest(25 * MIB);
        ctl.tick(k * SEC);
    }
    let peak = gov.read_metrics();
    assert!(peak.aggressiveness > 1.0 - 1e-9);
    assert!(gov.get_budget() >= 1999);

    // QUIESCE: AGGRESSIVENESS MAY ONLY FALL 0.2 PER TICK
    let mut aggs = Vec::new();
    let mut budgets = Vec::new();
    for k in 6..=10 {
        ctl.tick(k * SEC);
        aggs.push(gov.read_metrics().aggressiveness);
        budgets.push(gov.get_budget());
    }

    let expect = [0.8, 0.6, 0.4, 0.2, 0.0];
    for (got, want) in aggs.iter().zip(expect) {
        assert!(approx(*got, want), "agg {got} want {want}");
    }
    let expect_b = [1602u32, 1204, 806, 408, 10];
    for (got, want) in budgets.iter().zip(expect_b) {
        assert!(got.abs_diff(want) <= 1, "budget {got} want {want}");
    }
    assert_eq!(*budgets.last().unwrap(), 10);
}

#[test]
fn aggressiveness_never_moves_more_than_max_step_per_tick() {
    let gov = governor(enabled_defaults());
    let mut ctl = Controller::new(Arc::clone(&gov));

    // BURSTY WORKLOAD: ALTERNATE SATURATION AND SILENCE
    for k in 1..=30 {
        if k % 3 != 0 {
            gov.record_replay_task(500);
            for _ in 0..100 {
                gov.record_hot_miss();
            }
            gov.record_wal_ingest(40 * MIB);
        }
        ctl.tick(k * SEC);
    }

    let history = gov.read_history();
    assert_eq!(history.len(), 30);
    let mut prev = 0.0;
    for t in &history {
        assert!(t.aggressiveness >= 0.0 && t.aggressiveness <= 1.0);
        assert!((t.aggressiveness - prev).abs() <= 0.2 + 1e-9);
        assert!(t.budget >= 10 && t.budget <= 2000);
        prev = t.aggressiveness;
    }
}

// === DISABLED ===

#[test]
fn disabled_ingest_and_ticks_are_inert() {
    let gov = governor(ReplayConfig::default()); // enabled = false
    let mut ctl = Controller::new(Arc::clone(&gov));

    for _ in 0..1000 {
        gov.record_replay_task(1000);
        gov.record_hot_miss();
        gov.record_wal_ingest(MIB);
        gov.record_read_attempt();
    }
    for k in 1..=3 {
        ctl.tick(k * SEC);
    }

    assert_eq!(gov.counter_sample(), Default::default());
    assert_eq!(gov.get_budget(), 10);
    assert!(gov.read_history().is_empty());
    assert_eq!(gov.read_metrics().last_tick_ns, 0);

    // FIRST ENABLED TICK SEES ZERO DELTAS: NOTHING LEAKED THROUGH
    gov.update_config(enabled_defaults()).unwrap();
    ctl.tick(10 * SEC);
    assert_eq!(gov.read_metrics().queue_ewma, 0.0);
}

#[test]
fn start_controller_while_disabled_stays_stopped() {
    let gov = governor(ReplayConfig::default());
    gov.start_controller();
    assert_eq!(gov.controller_state(), ControllerState::Stopped);
    gov.shutdown(); // NO-OP WITHOUT A THREAD
    assert_eq!(gov.controller_state(), ControllerState::Stopped);
}

// === CONFIG ===

#[test]
fn config_roundtrip_is_idempotent() {
    let gov = governor(enabled_defaults());
    let before = gov.get_config();
    gov.update_config(gov.get_config()).unwrap();
    assert_eq!(gov.get_config(), before);
    assert_eq!(gov.get_budget(), 10);
}

#[test]
fn rejected_update_keeps_prior_config() {
    let gov = governor(enabled_defaults());
    let before = gov.get_config();

    let bad = ReplayConfig {
        b_min: 50,
        b_max: 40,
        ..enabled_defaults()
    };
    assert!(gov.update_config(bad).is_err());
    assert_eq!(gov.get_config(), before);

    let bad = ReplayConfig {
        ewma_alpha: 0.0,
        ..enabled_defaults()
    };
    assert!(gov.update_config(bad).is_err());
    assert_eq!(gov.get_config(), before);
}

#[test]
fn narrowing_bounds_reclamps_published_budget() {
    let gov = governor(enabled_defaults());
    let mut ctl = Controller::new(Arc::clone(&gov));

    for k in 1..=3 {
        for _ in 0..50 {
            gov.record_replay_task(1);
        }
        for _ in 0..25 {
            gov.record_hot_miss();
        }
        ctl.tick(k * SEC);
    }
    assert_eq!(gov.get_budget(), 1204);

    let narrowed = ReplayConfig {
        b_max: 500,
        ..enabled_defaults()
    };
    gov.update_config(narrowed).unwrap();
    // NO TICK NEEDED: THE SWAP ITSELF RESTORES THE BOUNDS INVARIANT
    assert_eq!(gov.get_budget(), 500);
}

// === MISS-RATE SIGNAL ===

#[test]
fn read_attempts_switch_the_miss_denominator() {
    let gov = governor(enabled_defaults());
    let mut ctl = Controller::new(Arc::clone(&gov));

    for _ in 0..100 {
        gov.record_read_attempt();
    }
    for _ in 0..10 {
        gov.record_hot_miss();
    }
    ctl.tick(SEC);

    // 10 MISSES / 100 READS = 0.1, SMOOTHED BY ALPHA 0.3
    assert!(approx(gov.read_metrics().miss_rate_ewma, 0.03));
}

#[test]
fn without_reads_a_lone_burst_is_bounded_then_decays() {
    let gov = governor(enabled_defaults());
    let mut ctl = Controller::new(Arc::clone(&gov));

    for _ in 0..10 {
        gov.record_hot_miss();
    }
    ctl.tick(SEC);
    let after_burst = gov.read_metrics().miss_rate_ewma;
    // 10 MISSES / (0 TASKS + 1) CLAMPS TO 1.0, SMOOTHED TO ALPHA
    assert!(approx(after_burst, 0.3));

    ctl.tick(2 * SEC);
    let decay1 = gov.read_metrics().miss_rate_ewma;
    ctl.tick(3 * SEC);
    let decay2 = gov.read_metrics().miss_rate_ewma;
    assert!(decay1 < after_burst);
    assert!(decay2 < decay1);
}

// === HISTORY ===

#[test]
fn history_records_one_entry_per_enabled_tick() {
    let gov = governor(enabled_defaults());
    let mut ctl = Controller::new(Arc::clone(&gov));

    for k in 1..=7 {
        ctl.tick(k * SEC);
    }
    let history = gov.read_history();
    assert_eq!(history.len(), 7);
    assert_eq!(history[6].last_tick_ns, 7 * SEC);
    assert_eq!(history[6].budget, gov.get_budget());
}

// === REPLAY SLICE DRIVER ===

#[test]
fn slice_stops_at_budget() {
    let gov = governor(enabled_defaults());
    let stop = AtomicBool::new(false);

    let mut stream = (1..=100u64).map(|lsn| (lsn, ()));
    let report = run_replay_slice(&gov, &mut stream, &stop, &mut |_, ()| Ok(())).unwrap();

    assert_eq!(report.budget, 10);
    assert_eq!(report.applied, 10);
    assert!(!report.exhausted);
    assert_eq!(report.last_lsn, Some(10));
    // NOTHING SKIPPED: THE NEXT RECORD IS STILL THERE
    assert_eq!(stream.next(), Some((11, ())));
}

#[test]
fn slice_reports_exhaustion() {
    let gov = governor(enabled_defaults());
    let stop = AtomicBool::new(false);

    let mut stream = (1..=3u64).map(|lsn| (lsn, ()));
    let report = run_replay_slice(&gov, &mut stream, &stop, &mut |_, ()| Ok(())).unwrap();

    assert_eq!(report.applied, 3);
    assert!(report.exhausted);
    assert_eq!(report.last_lsn, Some(3));
}

#[test]
fn slice_honors_stop_flag() {
    let gov = governor(enabled_defaults());
    let stop = AtomicBool::new(true);

    let mut stream = (1..=100u64).map(|lsn| (lsn, ()));
    let report = run_replay_slice(&gov, &mut stream, &stop, &mut |_, ()| Ok(())).unwrap();

    assert_eq!(report.applied, 0);
    assert!(!report.exhausted);
    assert_eq!(report.last_lsn, None);
}

#[test]
fn slice_rejects_lsn_regression() {
    let gov = governor(enabled_defaults());
    let stop = AtomicBool::new(false);

    let mut stream = [(5u64, ()), (5u64, ())].into_iter();
    let err = run_replay_slice(&gov, &mut stream, &stop, &mut |_, ()| Ok(())).unwrap_err();

    match err {
        ReplayError::LsnRegression { last, next } => {
            assert_eq!(last, 5);
            assert_eq!(next, 5);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn slice_surfaces_redo_failure_with_lsn() {
    let gov = governor(enabled_defaults());
    let stop = AtomicBool::new(false);

    let mut stream = (1..=10u64).map(|lsn| (lsn, ()));
    let err = run_replay_slice(&gov, &mut stream, &stop, &mut |lsn, ()| {
        if lsn == 2 {
            Err(anyhow::anyhow!("torn page"))
        } else {
            Ok(())
        }
    })
    .unwrap_err();

    match err {
        ReplayError::Redo { lsn, .. } => assert_eq!(lsn, 2),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn slice_applies_feed_the_queue_signal() {
    let gov = governor(enabled_defaults());
    let mut ctl = Controller::new(Arc::clone(&gov));
    let stop = AtomicBool::new(false);

    let mut stream = (1..=100u64).map(|lsn| (lsn, ()));
    let report = run_replay_slice(&gov, &mut stream, &stop, &mut |_, ()| Ok(())).unwrap();
    assert_eq!(report.applied, 10);

    ctl.tick(SEC);
    // 10 APPLIES IN A 1S WINDOW, SMOOTHED BY ALPHA 0.3
    assert!(approx(gov.read_metrics().queue_ewma, 3.0));
}
