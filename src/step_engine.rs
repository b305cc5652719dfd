//! Drives a single [`crate::config::Step`] to completion: poll `check` until
//! it reports true, then run `next`.
//!
//! Mirrors the worker's poll loop in the teacher (`worker.rs`'s scripted-step
//! execution), generalized from fixed-interval load generation to
//! predicate-gated page steps.

use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;

use crate::config::Step;
use crate::driver::{BrowserDriver, DriverError};

/// How often `check` is polled.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How long to let the page settle after `check` reports true and before
/// running `next`.
const SETTLE_DELAY: Duration = Duration::from_millis(500);

/// After this many consecutive polls where the page reports `BLeakConfig` is
/// undefined, stop waiting for the timeout to elapse and fail fast — the
/// proxy injection almost certainly didn't take effect.
pub const UNDEFINED_CONFIG_ESCALATION_THRESHOLD: u32 = 20;

#[derive(Debug, Error)]
pub enum StepError {
    #[error("step timed out after {0:?} waiting for check to become true")]
    Timeout(Duration),

    #[error(
        "window.BLeakConfig was undefined for {0} consecutive polls; proxy injection likely failed"
    )]
    ConfigInjectionFailed(u32),

    #[error("page evaluation failed: {0}")]
    PageEvalFailure(#[from] DriverError),
}

/// Poll `check` on `driver` until it evaluates truthy or `timeout` elapses.
///
/// A single predicate-evaluation failure is logged and treated as "not yet
/// true" rather than aborting the wait immediately — the page may be
/// mid-navigation. Consecutive "BLeakConfig is undefined" observations are
/// tracked separately and escalate to [`StepError::ConfigInjectionFailed`]
/// once [`UNDEFINED_CONFIG_ESCALATION_THRESHOLD`] is reached, since that
/// failure mode will never resolve itself by continuing to wait.
pub async fn wait_until_true(
    driver: &mut dyn BrowserDriver,
    check: &str,
    timeout: Duration,
) -> Result<(), StepError> {
    let deadline = Instant::now() + timeout;
    let mut undefined_streak: u32 = 0;

    loop {
        match driver.run_code(check).await {
            Ok(value) => {
                undefined_streak = 0;
                if value.as_bool().unwrap_or(false) {
                    return Ok(());
                }
            }
            Err(DriverError::EvalFailed(msg)) if msg.contains("BLeakConfig") => {
                undefined_streak += 1;
                tracing::warn!(streak = undefined_streak, "BLeakConfig undefined on poll");
                if undefined_streak >= UNDEFINED_CONFIG_ESCALATION_THRESHOLD {
                    return Err(StepError::ConfigInjectionFailed(undefined_streak));
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "check predicate failed, retrying");
            }
        }

        if Instant::now() >= deadline {
            return Err(StepError::Timeout(timeout));
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

/// Run one [`Step`] to completion: optional initial sleep, wait for `check`,
/// settle, then run `next`.
pub async fn next_step(
    driver: &mut dyn BrowserDriver,
    step: &Step,
    timeout: Duration,
) -> Result<(), StepError> {
    if let Some(ms) = step.sleep {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }

    wait_until_true(driver, &step.check, timeout).await?;
    tokio::time::sleep(SETTLE_DELAY).await;

    driver.run_code(&step.next).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockDriver;

    #[tokio::test(start_paused = true)]
    async fn wait_returns_once_check_becomes_true() {
        let mut driver = MockDriver::new();
        driver.queue_eval_result(serde_json::json!(false));
        driver.queue_eval_result(serde_json::json!(false));
        driver.queue_eval_result(serde_json::json!(true));

        wait_until_true(&mut driver, "() => true", Duration::from_secs(5))
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn wait_times_out_when_check_never_becomes_true() {
        let mut driver = MockDriver::new();
        driver.always_eval_result(serde_json::json!(false));

        let err = wait_until_true(&mut driver, "() => false", Duration::from_millis(250))
            .await
            .unwrap_err();
        assert!(matches!(err, StepError::Timeout(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn escalates_after_repeated_undefined_config() {
        let mut driver = MockDriver::new();
        driver.always_eval_error("ReferenceError: BLeakConfig is not defined".to_string());

        let err = wait_until_true(&mut driver, "() => window.BLeakConfig.ready", Duration::from_secs(60))
            .await
            .unwrap_err();
        assert!(matches!(err, StepError::ConfigInjectionFailed(n) if n == UNDEFINED_CONFIG_ESCALATION_THRESHOLD));
    }

    #[tokio::test(start_paused = true)]
    async fn next_step_runs_next_after_check_true() {
        let mut driver = MockDriver::new();
        driver.queue_eval_result(serde_json::json!(true));
        driver.queue_eval_result(serde_json::json!(null));

        let step = Step {
            sleep: None,
            check: "() => true".to_string(),
            next: "() => { window.ran = true; }".to_string(),
        };
        next_step(&mut driver, &step, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(driver.run_code_calls(), vec!["() => true", "() => { window.ran = true; }"]);
    }
}
