//! End-to-end scenarios driven against the in-process mock driver, covering
//! the six scenarios named in the design notes: empty leaks, a single
//! growing root, step timeout, fix evaluation row counts, resume, and
//! crash-then-recover.

use bleak::config::{ConfigurationFile, Step};
use bleak::detect::{DiagnoseLeaksController, FindLeaksController};
use bleak::driver::{HeapMetrics, NoopResolver, PathCount};
use bleak::evaluate::{EvaluateFixesController, ResumePoint};
use bleak::mock::{FixedSnapshot, MockDriver};
use indexmap::IndexMap;

fn snapshot(paths: Vec<(&str, u64)>) -> FixedSnapshot {
    FixedSnapshot {
        paths: paths
            .into_iter()
            .map(|(p, count)| PathCount {
                path: p.split('/').map(str::to_string).collect(),
                count,
            })
            .collect(),
        metrics: HeapMetrics::default(),
    }
}

#[tokio::test(start_paused = true)]
async fn empty_leaks_produces_empty_results_and_no_paths_json() {
    let mut driver = MockDriver::new();
    for _ in 0..2 {
        driver.queue_snapshot(snapshot(vec![]));
    }

    let mut config = ConfigurationFile::default();
    config.iterations = 2;

    let mut find_controller = FindLeaksController::new();
    let roots = find_controller
        .find_leak_paths(&mut driver, &config, "")
        .await
        .unwrap();
    assert!(roots.is_empty());

    let dir = tempfile::tempdir().unwrap();
    let resolver = NoopResolver;
    let diagnose_controller = DiagnoseLeaksController::new(&resolver);
    let results = diagnose_controller
        .diagnose_leaks(&mut driver, &config, "", roots, dir.path())
        .await
        .unwrap();

    assert!(results.leak_roots.is_empty());
    assert!(dir.path().join("leaks.json").exists());
    assert!(!dir.path().join("paths.json").exists());
    assert!(driver.run_code_calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn single_growing_root_gets_one_attributed_stack() {
    let mut driver = MockDriver::new();
    driver.queue_snapshot(snapshot(vec![("window/a", 1)]));
    driver.queue_snapshot(snapshot(vec![("window/a", 2)]));
    driver.queue_snapshot(snapshot(vec![("window/a", 3)]));

    let mut config = ConfigurationFile::default();
    config.iterations = 3;

    let mut find_controller = FindLeaksController::new();
    let roots = find_controller
        .find_leak_paths(&mut driver, &config, "")
        .await
        .unwrap();
    assert_eq!(roots.len(), 1);

    // Warm-up eval, instrument-paths eval, then the stack-trace query.
    driver.queue_eval_result(serde_json::json!(null));
    driver.queue_eval_result(serde_json::json!({
        "0": [[{"url": "x.js", "line": 3, "column": 7}]]
    }));

    let dir = tempfile::tempdir().unwrap();
    let resolver = NoopResolver;
    let diagnose_controller = DiagnoseLeaksController::new(&resolver);
    let results = diagnose_controller
        .diagnose_leaks(&mut driver, &config, "", roots, dir.path())
        .await
        .unwrap();

    assert_eq!(results.leak_roots.len(), 1);
    assert_eq!(results.leak_roots[0].stacks.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn step_timeout_fails_fast() {
    use bleak::loop_runner::run_loop;

    let mut driver = MockDriver::new();
    driver.always_eval_result(serde_json::json!(false));

    let mut config = ConfigurationFile::default();
    config.timeout_ms = 50;
    config.setup.push(Step {
        sleep: None,
        check: "() => false".to_string(),
        next: "() => {}".to_string(),
    });

    let start = tokio::time::Instant::now();
    let err = run_loop(&mut driver, &config, bleak::config::Phase::Setup, false, false)
        .await
        .unwrap_err();
    let elapsed = start.elapsed();

    assert!(matches!(err, bleak::loop_runner::LoopError::Step { .. }));
    assert!(elapsed.as_millis() >= 50 && elapsed.as_millis() < 500);
}

fn config_with_one_metric() -> ConfigurationFile {
    let mut config = ConfigurationFile::default();
    let mut leaks = IndexMap::new();
    leaks.insert("m".to_string(), vec![1, 2]);
    config.leaks = leaks;
    config
}

#[tokio::test(start_paused = true)]
async fn fix_evaluation_emits_nine_rows_plus_header() {
    let mut driver = MockDriver::new();
    for _ in 0..9 {
        driver.queue_snapshot(snapshot(vec![]));
    }

    let config = config_with_one_metric();
    let mut buf = Vec::new();
    {
        let mut writer = csv::Writer::from_writer(&mut buf);
        let mut controller = EvaluateFixesController::new();
        controller
            .evaluate_leak_fixes(&mut driver, &config, "", &mut writer, 2, 1, None, None)
            .await
            .unwrap();
        writer.flush().unwrap();
    }

    let lines = String::from_utf8(buf).unwrap().lines().count();
    assert_eq!(lines, 1 + 9);
}

#[tokio::test(start_paused = true)]
async fn resume_skips_completed_pairs_and_suppresses_header() {
    let mut driver = MockDriver::new();
    for _ in 0..6 {
        driver.queue_snapshot(snapshot(vec![]));
    }

    let config = config_with_one_metric();
    let mut buf = Vec::new();
    {
        let mut writer = csv::Writer::from_writer(&mut buf);
        let mut controller = EvaluateFixesController::resuming();
        controller
            .evaluate_leak_fixes(
                &mut driver,
                &config,
                "",
                &mut writer,
                2,
                1,
                Some(ResumePoint {
                    metric: "m".to_string(),
                    leaks_fixed: 1,
                }),
                None,
            )
            .await
            .unwrap();
        writer.flush().unwrap();
    }

    let lines: Vec<String> = String::from_utf8(buf)
        .unwrap()
        .lines()
        .map(str::to_string)
        .collect();
    assert_eq!(lines.len(), 6);
    assert!(!lines[0].starts_with("metric"));
}

#[tokio::test(start_paused = true)]
async fn crash_then_recover_produces_no_duplicate_rows() {
    use bleak::driver::{BrowserDriver, DriverError};

    struct FlakyOnce {
        inner: MockDriver,
        failed_once: bool,
    }

    #[async_trait::async_trait]
    impl BrowserDriver for FlakyOnce {
        async fn navigate_to(&mut self, url: &str) -> Result<(), DriverError> {
            if !self.failed_once {
                self.failed_once = true;
                return Err(DriverError::NavigationFailed {
                    url: url.to_string(),
                    message: "simulated crash".to_string(),
                });
            }
            self.inner.navigate_to(url).await
        }

        async fn run_code(&mut self, source: &str) -> Result<serde_json::Value, DriverError> {
            self.inner.run_code(source).await
        }

        async fn take_heap_snapshot(
            &mut self,
        ) -> Result<Box<dyn bleak::driver::HeapSnapshot>, DriverError> {
            self.inner.take_heap_snapshot().await
        }

        async fn relaunch(&mut self) -> Result<(), DriverError> {
            self.inner.relaunch().await
        }

        async fn shutdown(self: Box<Self>) -> Result<(), DriverError> {
            Ok(())
        }

        fn proxy(&self) -> &dyn bleak::driver::InterceptionProxy {
            self.inner.proxy()
        }
    }

    let mut inner = MockDriver::new();
    for _ in 0..3 {
        inner.queue_snapshot(snapshot(vec![]));
    }
    let mut driver = FlakyOnce {
        inner,
        failed_once: false,
    };

    let mut config = ConfigurationFile::default();
    config.leaks = {
        let mut m = IndexMap::new();
        m.insert("m".to_string(), vec![]);
        m
    };

    let mut buf = Vec::new();
    {
        let mut writer = csv::Writer::from_writer(&mut buf);
        let mut controller = EvaluateFixesController::new();
        controller
            .evaluate_leak_fixes(&mut driver, &config, "", &mut writer, 2, 1, None, None)
            .await
            .unwrap();
        writer.flush().unwrap();
    }

    let lines = String::from_utf8(buf).unwrap().lines().count();
    // One (metric, leaksFixed=0) pair, 3 snapshots, one retry after the
    // simulated crash: still exactly 1 header + 3 data rows, no duplicates.
    assert_eq!(lines, 1 + 3);
    // One relaunch from the crash-recovery retry, one from the controller's
    // unconditional end-of-pair relaunch.
    assert_eq!(driver.inner.relaunch_count(), 2);
}
