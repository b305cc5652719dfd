//! Drives one full `login -> setup -> loop*` execution against a browser
//! session, dispatching heap snapshots to a caller-supplied sink as they're
//! taken, and a crash-resilient wrapper used by fix-evaluation.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::{ConfigurationFile, Phase};
use crate::driver::{BrowserDriver, DriverError, HeapSnapshot};
use crate::loop_runner::{self, LoopError};
use crate::step_engine::{self, StepError};

const POST_LOGIN_SETTLE: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("navigation failed: {0}")]
    Navigation(#[from] DriverError),

    #[error(transparent)]
    Loop(#[from] LoopError),

    #[error("quiescence wait failed: {0}")]
    Step(#[from] StepError),
}

/// Receives every heap snapshot taken during [`execute`].
///
/// An `async_trait` rather than a boxed closure: the growth tracker, the
/// fix-evaluation CSV reporter, and test hooks all implement it directly,
/// matching the dyn-compatible-async-trait idiom already used for
/// `BrowserDriver`/`InterceptionProxy` instead of threading a generic type
/// parameter (or an awkward boxed-future closure) through every call site.
///
/// `execute` always awaits this call and never treats its failure as fatal to
/// the run — errors are logged and the run continues (§9: always await,
/// never fire-and-forget).
#[async_trait]
pub trait SnapshotSink: Send {
    async fn on_snapshot(&mut self, snapshot: Box<dyn HeapSnapshot>);

    /// Called by [`execute_resilient`] when an attempt fails and is about to
    /// be retried. Sinks that buffer per-attempt state (the fix-evaluation
    /// CSV reporter) discard that buffer here so a crashed attempt's rows
    /// never survive into the eventual successful one. No-op by default.
    fn reset_for_retry(&mut self) {}
}

/// Options controlling one [`execute`] call.
pub struct ExecuteOptions {
    pub iterations: u32,
    pub run_login: bool,
    pub iterations_per_snapshot: u32,
    pub snapshot_on_first: bool,
}

impl ExecuteOptions {
    pub fn new(iterations: u32, run_login: bool) -> Self {
        ExecuteOptions {
            iterations,
            run_login,
            iterations_per_snapshot: 1,
            snapshot_on_first: false,
        }
    }
}

async fn dispatch_snapshot(sink: &mut dyn SnapshotSink, snapshot: Box<dyn HeapSnapshot>) {
    sink.on_snapshot(snapshot).await;
}

/// Run one full execution: navigate, optionally login, setup, then drive the
/// loop phase for `options.iterations` repetitions, handing snapshots to
/// `sink` (if given) as they're acquired.
pub async fn execute(
    driver: &mut dyn BrowserDriver,
    config: &ConfigurationFile,
    options: &ExecuteOptions,
    mut sink: Option<&mut dyn SnapshotSink>,
) -> Result<(), OrchestratorError> {
    driver.navigate_to(&config.url).await?;

    if options.run_login {
        loop_runner::run_loop(driver, config, Phase::Login, false, false).await?;
        tokio::time::sleep(POST_LOGIN_SETTLE).await;
        driver.navigate_to(&config.url).await?;
    }

    loop_runner::run_loop(driver, config, Phase::Setup, false, false).await?;

    let take_first_snapshot = sink.is_some() && options.snapshot_on_first;
    if take_first_snapshot {
        if let Some(first) = config.phase(Phase::Loop).first() {
            step_engine::wait_until_true(driver, &first.check, config.timeout()).await?;
        }
        let snap = driver.take_heap_snapshot().await?;
        dispatch_snapshot(sink.as_deref_mut().expect("checked above"), snap).await;
    }

    for i in 0..options.iterations {
        let snapshot_run =
            sink.is_some() && (i + 1) % options.iterations_per_snapshot.max(1) == 0;
        let snap = loop_runner::run_loop(driver, config, Phase::Loop, true, snapshot_run).await?;
        if let (Some(sink), Some(snap)) = (sink.as_deref_mut(), snap) {
            dispatch_snapshot(sink, snap).await;
        }
    }

    Ok(())
}

/// Wrap `execute` in a retry loop: on error, log it, discard the sink's
/// per-attempt state via [`SnapshotSink::reset_for_retry`], relaunch the
/// driver, and retry. `max_attempts` bounds the number of tries; `None`
/// retries unboundedly (the CLI's default — the page under test is assumed
/// eventually stable).
///
/// The reset happens before every retry, including the one that precedes the
/// eventual successful attempt, so a sink that buffers rows per attempt (the
/// fix-evaluation CSV reporter) never reports rows from a crashed attempt.
pub async fn execute_resilient(
    driver: &mut dyn BrowserDriver,
    config: &ConfigurationFile,
    options: &ExecuteOptions,
    mut sink: Option<&mut dyn SnapshotSink>,
    max_attempts: Option<u32>,
) -> Result<(), OrchestratorError> {
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        match execute(driver, config, options, sink.as_deref_mut()).await {
            Ok(()) => return Ok(()),
            Err(e) => {
                tracing::warn!(attempt, error = %e, "execute attempt failed, relaunching driver");
                if let Some(max) = max_attempts {
                    if attempt >= max {
                        return Err(e);
                    }
                }
                if let Some(sink) = sink.as_deref_mut() {
                    sink.reset_for_retry();
                }
                driver.relaunch().await?;
            }
        }
    }
}

#[async_trait]
impl SnapshotSink for crate::heap::GrowthTracker {
    async fn on_snapshot(&mut self, snapshot: Box<dyn HeapSnapshot>) {
        self.add_snapshot(snapshot.as_ref());
    }
}
