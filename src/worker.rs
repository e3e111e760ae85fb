// REPLAY WORKER SLICE DRIVER
// THE CONSUMPTION SIDE OF THE PUBLISHED BUDGET: READ THE BUDGET ONCE
// PER SLICE ENTRY, APPLY RECORDS IN STRICT LSN ORDER, ACCOUNT EVERY
// APPLY, STOP AT STREAM END / STOP FLAG / BUDGET EXHAUSTION. THE
// DRIVER NEVER WRITES THE BUDGET AND NEVER SKIPS A RECORD.

use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;

use crate::ReplayGovernor;

#[derive(Debug, Error)]
pub enum ReplayError {
    // REDO IS ORDER-DEPENDENT; A BACKWARDS LSN MEANS THE FEED IS BROKEN
    #[error("wal stream out of order: applied lsn {last}, next lsn {next}")]
    LsnRegression { last: u64, next: u64 },
    #[error("redo failed at lsn {lsn}")]
    Redo {
        lsn: u64,
        #[source]
        source: anyhow::Error,
    },
}

/// What one slice of budget-bounded replay did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SliceReport {
    /// Records applied this slice.
    pub applied: u32,
    /// The budget the slice ran under (read once, at entry).
    pub budget: u32,
    /// The record stream ran dry before the budget did.
    pub exhausted: bool,
    /// Highest LSN applied, if any.
    pub last_lsn: Option<u64>,
}

/// Apply records from `records` until the stream ends, `stop` fires,
/// or `budget` records have been applied, whichever comes first.
/// Mid-slice budget republishes take effect on the worker's next entry.
pub fn run_replay_slice<R>(
    gov: &ReplayGovernor,
    records: &mut dyn Iterator<Item = (u64, R)>,
    stop: &AtomicBool,
    apply: &mut dyn FnMut(u64, R) -> anyhow::Result<()>,
) -> Result<SliceReport, ReplayError> {
    let budget = gov.get_budget();
    let mut report = SliceReport {
        applied: 0,
        budget,
        exhausted: false,
        last_lsn: None,
    };

    while report.applied < budget {
        if stop.load(Ordering::Relaxed) {
            return Ok(report);
        }
        let (lsn, rec) = match records.next() {
            Some(r) => r,
            None => {
                report.exhausted = true;
                return Ok(report);
            }
        };
        if let Some(last) = report.last_lsn {
            if lsn <= last {
                return Err(ReplayError::LsnRegression { last, next: lsn });
            }
        }
        apply(lsn, rec).map_err(|source| ReplayError::Redo { lsn, source })?;
        gov.record_replay_task(1);
        report.applied += 1;
        report.last_lsn = Some(lsn);
    }

    Ok(report)
}
