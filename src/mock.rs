//! In-process mock [`BrowserDriver`]/[`InterceptionProxy`] pair. The one
//! concrete driver implementation this crate ships; real browser automation
//! lives outside this crate's scope (§6).

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use crate::driver::{
    BrowserDriver, DriverError, HeapMetrics, HeapSnapshot, InterceptionProxy, PathCount,
    ProxyError, RewriteFn,
};

/// A canned heap snapshot: a fixed set of paths and counts, handed back
/// verbatim by [`MockDriver::take_heap_snapshot`].
#[derive(Debug, Clone, Default)]
pub struct FixedSnapshot {
    pub paths: Vec<PathCount>,
    pub metrics: HeapMetrics,
}

impl HeapSnapshot for FixedSnapshot {
    fn paths(&self) -> Vec<PathCount> {
        self.paths.clone()
    }

    fn metrics(&self) -> HeapMetrics {
        self.metrics.clone()
    }
}

/// Records of what was configured on the mock proxy, for assertions in tests.
#[derive(Debug, Clone, Default)]
pub struct ProxyConfiguration {
    pub rewrite_js: bool,
    pub fixes: Vec<u32>,
    pub inject_preamble: String,
    pub disable_all_rewrites: bool,
}

#[derive(Default)]
pub struct MockProxy {
    pub configurations: Mutex<Vec<ProxyConfiguration>>,
}

impl MockProxy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_configuration(&self) -> Option<ProxyConfiguration> {
        self.configurations.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl InterceptionProxy for MockProxy {
    async fn configure(
        &self,
        rewrite_js: bool,
        fixes: &[u32],
        inject_preamble: &str,
        disable_all_rewrites: bool,
        _rewrite_fn: Option<RewriteFn>,
    ) -> Result<(), ProxyError> {
        self.configurations.lock().unwrap().push(ProxyConfiguration {
            rewrite_js,
            fixes: fixes.to_vec(),
            inject_preamble: inject_preamble.to_string(),
            disable_all_rewrites,
        });
        Ok(())
    }
}

/// Scripted mock driver: a queue of canned `run_code` results/errors and a
/// queue of canned heap snapshots, consumed in order. Also records every
/// `run_code` source string for assertions.
pub struct MockDriver {
    eval_queue: VecDeque<Result<Value, String>>,
    always_eval: Option<Result<Value, String>>,
    snapshot_queue: VecDeque<FixedSnapshot>,
    run_code_log: Vec<String>,
    proxy: MockProxy,
    navigate_log: Vec<String>,
    relaunch_count: u32,
}

impl MockDriver {
    pub fn new() -> Self {
        MockDriver {
            eval_queue: VecDeque::new(),
            always_eval: None,
            snapshot_queue: VecDeque::new(),
            run_code_log: Vec::new(),
            proxy: MockProxy::new(),
            navigate_log: Vec::new(),
            relaunch_count: 0,
        }
    }

    pub fn queue_eval_result(&mut self, value: Value) {
        self.eval_queue.push_back(Ok(value));
    }

    pub fn queue_eval_error(&mut self, message: impl Into<String>) {
        self.eval_queue.push_back(Err(message.into()));
    }

    pub fn always_eval_result(&mut self, value: Value) {
        self.always_eval = Some(Ok(value));
    }

    pub fn always_eval_error(&mut self, message: impl Into<String>) {
        self.always_eval = Some(Err(message.into()));
    }

    pub fn queue_snapshot(&mut self, snapshot: FixedSnapshot) {
        self.snapshot_queue.push_back(snapshot);
    }

    pub fn run_code_calls(&self) -> Vec<String> {
        self.run_code_log.clone()
    }

    pub fn navigate_calls(&self) -> Vec<String> {
        self.navigate_log.clone()
    }

    pub fn relaunch_count(&self) -> u32 {
        self.relaunch_count
    }

    pub fn proxy_mock(&self) -> &MockProxy {
        &self.proxy
    }
}

impl Default for MockDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BrowserDriver for MockDriver {
    async fn navigate_to(&mut self, url: &str) -> Result<(), DriverError> {
        self.navigate_log.push(url.to_string());
        Ok(())
    }

    async fn run_code(&mut self, source: &str) -> Result<Value, DriverError> {
        self.run_code_log.push(source.to_string());
        let outcome = self
            .eval_queue
            .pop_front()
            .or_else(|| self.always_eval.clone())
            .unwrap_or(Ok(Value::Null));
        outcome.map_err(DriverError::EvalFailed)
    }

    async fn take_heap_snapshot(&mut self) -> Result<Box<dyn HeapSnapshot>, DriverError> {
        let snap = self
            .snapshot_queue
            .pop_front()
            .ok_or_else(|| DriverError::SnapshotFailed("no snapshot queued".to_string()))?;
        Ok(Box::new(snap))
    }

    async fn relaunch(&mut self) -> Result<(), DriverError> {
        self.relaunch_count += 1;
        Ok(())
    }

    async fn shutdown(self: Box<Self>) -> Result<(), DriverError> {
        Ok(())
    }

    fn proxy(&self) -> &dyn InterceptionProxy {
        &self.proxy
    }
}
