//! Fix-evaluation controller: sweeps every `(metric, leaks_fixed)` pair and
//! reports per-snapshot heap metrics as CSV rows.
//!
//! Grounded in the load-generation harness's CSV tooling (`csv` crate), here
//! repurposed to *write* rows instead of read data-driven test fixtures.

use std::collections::BTreeMap;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::ConfigurationFile;
use crate::driver::{BrowserDriver, HeapSnapshot};
use crate::orchestrator::{self, ExecuteOptions, OrchestratorError, SnapshotSink};
use crate::proxy_configurator;

#[derive(Debug, Error)]
pub enum EvaluateError {
    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),

    #[error("proxy configuration failed: {0}")]
    Proxy(#[from] crate::driver::ProxyError),

    #[error("failed to write CSV row: {0}")]
    Csv(#[from] csv::Error),

    #[error("driver relaunch failed: {0}")]
    Relaunch(#[from] crate::driver::DriverError),
}

/// Identifies the pair a fix-evaluation resumes from: the metric name and the
/// `leaks_fixed` prefix length to start the inner loop at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumePoint {
    pub metric: String,
    pub leaks_fixed: usize,
}

/// One reported row: the `(metric, leaks_fixed, iteration_count)` key plus
/// every field of the snapshot's heap metrics, to be serialized with sorted
/// column order.
#[derive(Debug, Clone)]
pub struct MetricRow {
    pub metric: String,
    pub leaks_fixed: usize,
    pub iteration_count: u32,
    pub fields: BTreeMap<String, u64>,
}

impl MetricRow {
    fn sorted_columns(&self) -> BTreeMap<String, String> {
        let mut columns = BTreeMap::new();
        columns.insert("metric".to_string(), self.metric.clone());
        columns.insert("leaksFixed".to_string(), self.leaks_fixed.to_string());
        columns.insert(
            "iterationCount".to_string(),
            self.iteration_count.to_string(),
        );
        for (k, v) in &self.fields {
            columns.insert(k.clone(), v.to_string());
        }
        columns
    }
}

/// Buffers rows for the current `execute` attempt; flushed to the
/// underlying `csv::Writer` only on success, discarded on retry.
struct CsvReportSink<'w, W: std::io::Write> {
    writer: &'w mut csv::Writer<W>,
    header_written: bool,
    metric: String,
    leaks_fixed: usize,
    iteration_count: u32,
    buffer: Vec<MetricRow>,
    user_cb: Option<&'w mut dyn FnMut(&dyn HeapSnapshot, &str, usize, u32)>,
}

#[async_trait]
impl<'w, W: std::io::Write + Send> SnapshotSink for CsvReportSink<'w, W> {
    async fn on_snapshot(&mut self, snapshot: Box<dyn HeapSnapshot>) {
        self.iteration_count += 1;
        let metrics = snapshot.metrics();

        let mut fields = metrics.extra.clone();
        fields.insert("totalSize".to_string(), metrics.total_size);
        fields.insert("nodeCount".to_string(), metrics.node_count);
        fields.insert("edgeCount".to_string(), metrics.edge_count);

        self.buffer.push(MetricRow {
            metric: self.metric.clone(),
            leaks_fixed: self.leaks_fixed,
            iteration_count: self.iteration_count,
            fields,
        });

        if let Some(cb) = self.user_cb.as_deref_mut() {
            cb(
                snapshot.as_ref(),
                &self.metric,
                self.leaks_fixed,
                self.iteration_count,
            );
        }
    }

    fn reset_for_retry(&mut self) {
        self.discard();
        self.iteration_count = 0;
    }
}

impl<'w, W: std::io::Write> CsvReportSink<'w, W> {
    fn flush(&mut self) -> Result<(), EvaluateError> {
        for row in self.buffer.drain(..) {
            let columns = row.sorted_columns();
            if !self.header_written {
                let headers: Vec<&str> = columns.keys().map(String::as_str).collect();
                self.writer.write_record(&headers)?;
                self.header_written = true;
            }
            let values: Vec<&str> = columns.values().map(String::as_str).collect();
            self.writer.write_record(&values)?;
        }
        self.writer.flush().ok();
        Ok(())
    }

    fn discard(&mut self) {
        self.buffer.clear();
    }
}

/// Drives the fix-evaluation sweep across every `(metric, leaks_fixed)` pair.
pub struct EvaluateFixesController {
    header_written: bool,
}

impl EvaluateFixesController {
    pub fn new() -> Self {
        EvaluateFixesController {
            header_written: false,
        }
    }

    /// Resume from a prior run, suppressing the header (already written by
    /// the interrupted run).
    pub fn resuming() -> Self {
        EvaluateFixesController {
            header_written: true,
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn evaluate_leak_fixes<W: std::io::Write>(
        &mut self,
        driver: &mut dyn BrowserDriver,
        config: &ConfigurationFile,
        config_source: &str,
        csv_writer: &mut csv::Writer<W>,
        iterations: u32,
        iterations_per_snapshot: u32,
        resume_at: Option<ResumePoint>,
        mut snapshot_cb: Option<&mut dyn FnMut(&dyn HeapSnapshot, &str, usize, u32)>,
    ) -> Result<(), EvaluateError> {
        let mut found_resume_metric = resume_at.is_none();

        for (metric, leak_ids) in &config.leaks {
            let start_leaks_fixed = if !found_resume_metric {
                match &resume_at {
                    Some(point) if point.metric == *metric => {
                        found_resume_metric = true;
                        point.leaks_fixed
                    }
                    _ => continue,
                }
            } else {
                0
            };

            for leaks_fixed in start_leaks_fixed..=leak_ids.len() {
                let fixes = &leak_ids[0..leaks_fixed];
                proxy_configurator::configure_proxy(
                    driver.proxy(),
                    config,
                    config_source,
                    fixes,
                    false,
                    true,
                )
                .await?;

                let mut sink = CsvReportSink {
                    writer: csv_writer,
                    header_written: self.header_written,
                    metric: metric.clone(),
                    leaks_fixed,
                    iteration_count: 0,
                    buffer: Vec::new(),
                    user_cb: snapshot_cb.as_deref_mut(),
                };

                let mut options = ExecuteOptions::new(iterations, true);
                options.iterations_per_snapshot = iterations_per_snapshot;
                options.snapshot_on_first = true;

                match orchestrator::execute_resilient(
                    driver,
                    config,
                    &options,
                    Some(&mut sink),
                    None,
                )
                .await
                {
                    Ok(()) => {
                        sink.flush()?;
                        self.header_written = sink.header_written;
                    }
                    Err(e) => {
                        sink.discard();
                        return Err(e.into());
                    }
                }

                driver.relaunch().await?;
            }
        }

        Ok(())
    }
}

impl Default for EvaluateFixesController {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{FixedSnapshot, MockDriver};
    use indexmap::IndexMap;

    fn config_with_metric() -> ConfigurationFile {
        let mut config = ConfigurationFile::default();
        let mut leaks = IndexMap::new();
        leaks.insert("m".to_string(), vec![1, 2]);
        config.leaks = leaks;
        config
    }

    #[tokio::test(start_paused = true)]
    async fn full_sweep_emits_expected_row_count() {
        let mut driver = MockDriver::new();
        // 3 (leaks_fixed in 0,1,2) * 3 (snapshots: first + 2 iterations) snapshots queued
        for _ in 0..9 {
            driver.queue_snapshot(FixedSnapshot::default());
        }

        let config = config_with_metric();
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

        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 1 + 9);
    }

    #[tokio::test(start_paused = true)]
    async fn resume_skips_completed_pairs() {
        let mut driver = MockDriver::new();
        for _ in 0..6 {
            driver.queue_snapshot(FixedSnapshot::default());
        }

        let config = config_with_metric();
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

        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<&str> = text.lines().filter(|l| !l.is_empty()).collect();
        assert_eq!(lines.len(), 6);
    }
}
