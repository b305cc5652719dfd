//! Find-leaks and diagnose-leaks controllers: the first two of the three
//! top-level flows.

use std::path::Path;

use serde_json::Value;
use thiserror::Error;

use crate::config::ConfigurationFile;
use crate::driver::{BrowserDriver, DriverError, RawStackFrame, SourceMapResolver};
use crate::heap::{GrowthError, GrowthTracker, LeakRoot, LeakRootId};
use crate::orchestrator::{self, ExecuteOptions, OrchestratorError};
use crate::proxy_configurator;
use crate::results::{to_path_tree, Results};

#[derive(Debug, Error)]
pub enum DetectError {
    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),

    #[error(transparent)]
    Growth(#[from] GrowthError),

    #[error("proxy configuration failed: {0}")]
    Proxy(#[from] crate::driver::ProxyError),

    #[error("page evaluation failed: {0}")]
    Eval(#[from] DriverError),

    #[error("failed to write {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize results: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Drives the find-leaks pass: repeatedly runs the loop phase, feeding every
/// snapshot to a [`GrowthTracker`], then asks it for the growing paths.
pub struct FindLeaksController {
    growth_tracker: GrowthTracker,
}

impl FindLeaksController {
    pub fn new() -> Self {
        FindLeaksController {
            growth_tracker: GrowthTracker::new(),
        }
    }

    pub async fn find_leak_paths(
        &mut self,
        driver: &mut dyn BrowserDriver,
        config: &ConfigurationFile,
        config_source: &str,
    ) -> Result<Vec<LeakRoot>, DetectError> {
        proxy_configurator::configure_proxy(
            driver.proxy(),
            config,
            config_source,
            &config.fixed_leaks,
            false,
            false,
        )
        .await?;

        let options = ExecuteOptions::new(config.iterations, true);
        orchestrator::execute(driver, config, &options, Some(&mut self.growth_tracker)).await?;

        Ok(self.growth_tracker.find_leak_paths()?)
    }
}

impl Default for FindLeaksController {
    fn default() -> Self {
        Self::new()
    }
}

/// Drives the diagnose-leaks pass: instruments the paths found above, runs
/// two more loop iterations under instrumented JS, and attributes a stack
/// trace to each leak root.
pub struct DiagnoseLeaksController<'a> {
    resolver: &'a dyn SourceMapResolver,
}

impl<'a> DiagnoseLeaksController<'a> {
    pub fn new(resolver: &'a dyn SourceMapResolver) -> Self {
        DiagnoseLeaksController { resolver }
    }

    pub async fn diagnose_leaks(
        &self,
        driver: &mut dyn BrowserDriver,
        config: &ConfigurationFile,
        config_source: &str,
        leak_roots: Vec<LeakRoot>,
        out_dir: &Path,
    ) -> Result<Results, DetectError> {
        let results = Results::new(leak_roots);
        let path_tree = to_path_tree(&results.leak_roots);

        self.write_json(&out_dir.join("leaks.json"), &path_tree)?;
        if !results.leak_roots.is_empty() {
            self.write_json(&out_dir.join("paths.json"), &path_tree)?;
        }

        if results.leak_roots.is_empty() {
            return Ok(results.compact());
        }

        proxy_configurator::configure_proxy(
            driver.proxy(),
            config,
            config_source,
            &config.fixed_leaks,
            true,
            false,
        )
        .await?;

        let warm_up = ExecuteOptions::new(1, false);
        orchestrator::execute(driver, config, &warm_up, None).await?;

        let path_tree_json = serde_json::to_value(&path_tree)?;
        driver
            .run_code(&format!(
                "window.$$$INSTRUMENT_PATHS$$$({})",
                path_tree_json
            ))
            .await?;

        for _ in 0..2 {
            crate::loop_runner::run_loop(driver, config, crate::config::Phase::Loop, true, false)
                .await?;
        }

        let raw_traces_value = driver.run_code("window.$$$GET_STACK_TRACES$$$()").await?;
        self.attribute_stacks(results, raw_traces_value)
    }

    fn attribute_stacks(
        &self,
        mut results: Results,
        raw_traces_value: Value,
    ) -> Result<Results, DetectError> {
        let raw_traces: std::collections::BTreeMap<String, Vec<Vec<RawStackFrame>>> =
            serde_json::from_value(raw_traces_value).unwrap_or_default();

        for root in &results.leak_roots.clone() {
            let stacks = raw_traces
                .get(&root.id.to_string())
                .cloned()
                .unwrap_or_default();
            for raw_stack in stacks {
                let resolved = raw_stack.iter().map(|f| self.resolver.resolve(f)).collect();
                results.attribute_stack(root.id as LeakRootId, resolved);
            }
        }

        Ok(results.compact())
    }

    fn write_json<T: serde::Serialize>(
        &self,
        path: &Path,
        value: &T,
    ) -> Result<(), DetectError> {
        let text = serde_json::to_string_pretty(value)?;
        std::fs::write(path, text).map_err(|source| DetectError::Io {
            path: path.display().to_string(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::NoopResolver;
    use crate::mock::{FixedSnapshot, MockDriver};

    #[tokio::test(start_paused = true)]
    async fn empty_phases_yield_no_growth() {
        let mut driver = MockDriver::new();
        driver.queue_snapshot(FixedSnapshot::default());
        driver.queue_snapshot(FixedSnapshot::default());
        driver.queue_snapshot(FixedSnapshot::default());
        driver.queue_snapshot(FixedSnapshot::default());

        let mut config = ConfigurationFile::default();
        config.iterations = 2;

        let mut controller = FindLeaksController::new();
        let roots = controller
            .find_leak_paths(&mut driver, &config, "")
            .await
            .unwrap();
        assert!(roots.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn diagnosis_of_empty_roots_skips_instrumentation() {
        let mut driver = MockDriver::new();
        let config = ConfigurationFile::default();
        let dir = tempfile::tempdir().unwrap();

        let resolver = NoopResolver;
        let controller = DiagnoseLeaksController::new(&resolver);
        let results = controller
            .diagnose_leaks(&mut driver, &config, "", vec![], dir.path())
            .await
            .unwrap();

        assert!(results.leak_roots.is_empty());
        assert!(dir.path().join("leaks.json").exists());
        assert!(!dir.path().join("paths.json").exists());
        assert!(driver.run_code_calls().is_empty());
    }
}
