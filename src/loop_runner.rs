//! Drives one phase (login, setup, or loop) through its steps in order, with
//! an optional heap snapshot taken immediately afterward.

use std::time::Duration;

use thiserror::Error;

use crate::config::{ConfigurationFile, Phase};
use crate::driver::{BrowserDriver, DriverError, HeapSnapshot};
use crate::step_engine::{self, StepError};

#[derive(Debug, Error)]
pub enum LoopError {
    #[error("step {index} of phase {phase} failed: {source}")]
    Step {
        phase: &'static str,
        index: usize,
        #[source]
        source: StepError,
    },

    #[error("heap snapshot acquisition failed: {0}")]
    Snapshot(#[from] DriverError),
}

/// Run every step of `phase` in order, taking a heap snapshot afterward when
/// `snapshot_at_end` is true.
///
/// `is_loop` selects whether `phase` is being run as one repetition of the
/// leak-inducing workload. When true, after the last step runs we wait for
/// the phase's first step's `check` to become true again, confirming the
/// loop returned to a quiescent initial state before the (optional) snapshot
/// is taken — this is the boundary a heap snapshot is defined against, not
/// the instant the last step's `next` fired. Kept as an explicit parameter
/// rather than inferred from `phase` so a caller can run the `loop` phase
/// once during setup without it being mistaken for a tracked iteration.
pub async fn run_loop(
    driver: &mut dyn BrowserDriver,
    config: &ConfigurationFile,
    phase: Phase,
    is_loop: bool,
    snapshot_at_end: bool,
) -> Result<Option<Box<dyn HeapSnapshot>>, LoopError> {
    let steps = config.phase(phase);
    let timeout = config.timeout();

    for (index, step) in steps.iter().enumerate() {
        step_engine::next_step(driver, step, timeout)
            .await
            .map_err(|source| LoopError::Step {
                phase: phase.as_str(),
                index,
                source,
            })?;
    }

    if is_loop {
        if let Some(first) = steps.first() {
            step_engine::wait_until_true(driver, &first.check, timeout)
                .await
                .map_err(|source| LoopError::Step {
                    phase: phase.as_str(),
                    index: 0,
                    source,
                })?;
        }
    }

    if snapshot_at_end {
        let snap = driver.take_heap_snapshot().await?;
        Ok(Some(snap))
    } else {
        Ok(None)
    }
}

/// Run `phase`'s steps `count` times in a row, collecting a snapshot after
/// every repetition when `snapshot_each` is true.
pub async fn run_loop_n_times(
    driver: &mut dyn BrowserDriver,
    config: &ConfigurationFile,
    phase: Phase,
    count: u32,
    snapshot_each: bool,
) -> Result<Vec<Box<dyn HeapSnapshot>>, LoopError> {
    let mut snapshots = Vec::new();
    for _ in 0..count {
        if let Some(snap) = run_loop(driver, config, phase, true, snapshot_each).await? {
            snapshots.push(snap);
        }
    }
    Ok(snapshots)
}

/// Convenience wrapper so call sites don't need `Duration` in scope just to
/// read a config's timeout through this module.
pub fn phase_timeout(config: &ConfigurationFile) -> Duration {
    config.timeout()
}
