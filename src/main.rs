// SMART REPLAY WORKLOAD SIMULATOR
// DRIVES A LIVE GOVERNOR WITH SYNTHETIC STORAGE-NODE TRAFFIC: A WAL
// RECEIVER, GETPAGE READ HANDLERS, AND BUDGET-BOUND REPLAY WORKERS.
// PRINTS A PER-SECOND TABLE AND A POST-RUN SUMMARY.

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Result;
use clap::{Parser, ValueEnum};

use smart_replay::run_replay_slice;

static SHUTDOWN: AtomicBool = AtomicBool::new(false);

const MIB: u64 = 1 << 20;

#[derive(Clone, Copy, PartialEq, Eq, Debug, ValueEnum)]
enum Profile {
    /// No traffic; the budget should sit at the floor
    Idle,
    /// WAL arrivals at ~2x the healthy reference, nothing else
    Wal,
    /// Replay traffic with a high read-blocks-on-replay fraction
    Miss,
    /// Everything at once
    Mixed,
}

#[derive(Parser)]
#[command(name = "smart-replay")]
#[command(about = "SMART REPLAY -- ADAPTIVE REPLAY GOVERNOR SIMULATOR")]
struct Cli {
    /// Workload profile
    #[arg(long, value_enum, default_value_t = Profile::Mixed)]
    profile: Profile,

    /// Run length in seconds
    #[arg(long, default_value_t = 15)]
    secs: u64,

    /// Controller cadence in milliseconds
    #[arg(long, default_value_t = 200)]
    tick_ms: u64,

    /// Replay worker threads
    #[arg(long, default_value_t = 2)]
    workers: usize,

    /// One controller log line per tick
    #[arg(long)]
    verbose: bool,

    /// Dump the full tick history after the run
    #[arg(long)]
    dump_log: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    ctrlc::set_handler(|| {
        SHUTDOWN.store(true, Ordering::Relaxed);
    })?;

    println!("SMART REPLAY v0.9.2");
    println!("PROFILE:   {:?}", cli.profile);
    println!("TICK:      {} ms", cli.tick_ms);
    println!("WORKERS:   {}", cli.workers);
    println!("DURATION:  {}s (CTRL+C TO EXIT)", cli.secs);
    println!();

    let gov = smart_replay::init();
    let mut cfg = smart_replay::get_config();
    cfg.enabled = true;
    cfg.verbose = cli.verbose;
    cfg.tick_ms = cli.tick_ms;
    smart_replay::update_config(cfg)?;
    smart_replay::start_controller();

    let mut handles = Vec::new();

    // WAL RECEIVER: 2 MIB EVERY 100MS => 20 MIB/S, 2X THE REFERENCE
    if matches!(cli.profile, Profile::Wal | Profile::Mixed) {
        handles.push(thread::spawn(|| {
            while !SHUTDOWN.load(Ordering::Relaxed) {
                smart_replay::record_wal_ingest(2 * MIB);
                thread::sleep(Duration::from_millis(100));
            }
        }));
    }

    // READ HANDLER: GETPAGE ATTEMPTS, HALF OF THEM BLOCKING ON REPLAY
    if matches!(cli.profile, Profile::Miss | Profile::Mixed) {
        handles.push(thread::spawn(|| {
            let mut i = 0u64;
            while !SHUTDOWN.load(Ordering::Relaxed) {
                smart_replay::record_read_attempt();
                if i % 2 == 0 {
                    smart_replay::record_hot_miss();
                }
                i += 1;
                thread::sleep(Duration::from_millis(2));
            }
        }));
    }

    // REPLAY WORKERS: BUDGET-BOUND SLICES OVER A SYNTHETIC WAL STREAM
    if matches!(cli.profile, Profile::Miss | Profile::Mixed) {
        for w in 0..cli.workers {
            handles.push(thread::spawn(move || {
                // DISJOINT LSN SPACES PER WORKER
                let mut next_lsn = 1 + ((w as u64) << 40);
                while !SHUTDOWN.load(Ordering::Relaxed) {
                    let available = smart_replay::get_budget() as u64 * 2;
                    let mut stream = (0..available).map(|i| (next_lsn + i, ()));
                    match run_replay_slice(gov, &mut stream, &SHUTDOWN, &mut |_lsn, ()| {
                        // SYNTHETIC REDO COST
                        thread::sleep(Duration::from_micros(200));
                        Ok(())
                    }) {
                        Ok(report) => next_lsn += report.applied as u64,
                        Err(e) => {
                            eprintln!("WORKER {w} STOPPED: {e}");
                            return;
                        }
                    }
                    // YIELD BETWEEN SLICES
                    thread::sleep(Duration::from_millis(10));
                }
            }));
        }
    }

    // MONITOR: ONE TABLE ROW PER SECOND
    let deadline = Instant::now() + Duration::from_secs(cli.secs);
    while !SHUTDOWN.load(Ordering::Relaxed) && Instant::now() < deadline {
        thread::sleep(Duration::from_secs(1));
        let m = smart_replay::read_metrics();
        println!(
            "budget: {:<6} agg: {:<5.2} queue/s: {:<9.1} miss_rate: {:<7.4} wal_bps: {:<12.0} state: {}",
            m.budget,
            m.aggressiveness,
            m.queue_ewma,
            m.miss_rate_ewma,
            m.wal_bps_ewma,
            smart_replay::controller_state().label(),
        );
    }

    println!("\nSMART REPLAY IS SHUTTING DOWN");
    SHUTDOWN.store(true, Ordering::Relaxed);
    smart_replay::shutdown();
    for h in handles {
        let _ = h.join();
    }

    if cli.dump_log {
        gov.dump_history();
    }
    gov.history_summary();

    println!("SMART REPLAY OUT.");
    Ok(())
}
