//! Browser driver and interception proxy contracts.
//!
//! These traits are the boundary the orchestrator is built against. A real
//! implementation drives an actual browser (heap snapshot acquisition, JS
//! eval, relaunch, shutdown) and a real HTTP-rewriting proxy; neither lives
//! in this crate. [`crate::mock`] ships the one concrete pair used by our
//! own tests.

use std::fmt;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// A function that rewrites response bodies: `(url, mime_type, bytes, fixes) -> bytes`.
///
/// Boxed rather than generic so it can be threaded through `dyn InterceptionProxy`
/// and stored on a [`crate::config::ConfigurationFile`] without infecting every
/// call site with a type parameter.
pub type RewriteFn = std::sync::Arc<dyn Fn(&str, &str, &[u8], &[u32]) -> Vec<u8> + Send + Sync>;

/// Errors surfaced by a [`BrowserDriver`].
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("navigation to {url} failed: {message}")]
    NavigationFailed { url: String, message: String },

    #[error("page evaluation failed: {0}")]
    EvalFailed(String),

    #[error("heap snapshot acquisition failed: {0}")]
    SnapshotFailed(String),

    #[error("browser crashed and could not be relaunched: {0}")]
    Crashed(String),
}

/// Errors surfaced by an [`InterceptionProxy`].
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("proxy configuration rejected: {0}")]
    ConfigurationRejected(String),
}

/// A raw stack frame as reported by the page-side instrumentation hook,
/// before source-map resolution.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RawStackFrame {
    pub url: String,
    pub line: u32,
    pub column: u32,
}

/// A stack frame after mapping back to original source, if a source map was
/// available. Falls back to the raw frame's fields when it wasn't.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ResolvedStackFrame {
    pub source_file: String,
    pub line: u32,
    pub column: u32,
    pub name: Option<String>,
}

/// Maps raw page-side stack frames to original-source locations.
///
/// Out of scope per the specification: the source-map format decoder itself.
/// This trait is the seam a real resolver plugs into; [`NoopResolver`] ships
/// as the identity mapping for environments without source maps.
pub trait SourceMapResolver: Send + Sync {
    fn resolve(&self, frame: &RawStackFrame) -> ResolvedStackFrame;
}

/// Identity source-map resolver: passes raw frames through unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopResolver;

impl SourceMapResolver for NoopResolver {
    fn resolve(&self, frame: &RawStackFrame) -> ResolvedStackFrame {
        ResolvedStackFrame {
            source_file: frame.url.clone(),
            line: frame.line,
            column: frame.column,
            name: None,
        }
    }
}

/// A single named heap-graph path with its reachable-object count in one snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct PathCount {
    pub path: Vec<String>,
    pub count: u64,
}

/// Numeric heap-size metrics reported by a parsed snapshot. Field set mirrors
/// what a real heap-snapshot parser can cheaply compute; extra fields a given
/// driver reports are carried in `extra` and still appear as CSV columns.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct HeapMetrics {
    pub total_size: u64,
    pub node_count: u64,
    pub edge_count: u64,
    #[serde(flatten)]
    pub extra: std::collections::BTreeMap<String, u64>,
}

/// An opaque, lazily-parsed heap snapshot.
///
/// Each snapshot is consumed exactly once by the growth tracker (or by the
/// fix-evaluation CSV reporter). Out of scope: the byte-stream snapshot
/// format decoder itself — `paths()`/`metrics()` stand in for it.
pub trait HeapSnapshot: Send {
    /// All heap-graph paths observed in this snapshot, with their counts.
    fn paths(&self) -> Vec<PathCount>;

    /// Aggregate heap-size metrics for this snapshot.
    fn metrics(&self) -> HeapMetrics;
}

impl fmt::Debug for dyn HeapSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HeapSnapshot(paths={})", self.paths().len())
    }
}

/// Handle to the interception proxy. Idempotent; takes effect on the next
/// HTTP response it intercepts.
#[async_trait]
pub trait InterceptionProxy: Send + Sync {
    /// Install rewriting/injection configuration.
    ///
    /// `inject_preamble` is inserted into every HTML response before the
    /// first `<script>`. When `disable_all_rewrites` is true, `rewrite_js`
    /// and `fixes` are ignored for instrumentation purposes but injection
    /// still occurs.
    async fn configure(
        &self,
        rewrite_js: bool,
        fixes: &[u32],
        inject_preamble: &str,
        disable_all_rewrites: bool,
        rewrite_fn: Option<RewriteFn>,
    ) -> Result<(), ProxyError>;
}

/// Handle to a (real or mocked) browser session.
///
/// The orchestrator holds at most one outstanding call into this trait at a
/// time — there is no internal synchronization because nothing else touches
/// the driver concurrently.
#[async_trait]
pub trait BrowserDriver: Send {
    /// Load `url`, resolving once the page has loaded.
    async fn navigate_to(&mut self, url: &str) -> Result<(), DriverError>;

    /// Evaluate `source` in the page context. The result must be JSON-serializable.
    async fn run_code(&mut self, source: &str) -> Result<Value, DriverError>;

    /// Take a heap snapshot. Parsing of the returned snapshot may be lazy.
    async fn take_heap_snapshot(&mut self) -> Result<Box<dyn HeapSnapshot>, DriverError>;

    /// Kill and restart the browser in place, keeping the same handle but a
    /// fresh session. All prior page state is forfeit.
    async fn relaunch(&mut self) -> Result<(), DriverError>;

    /// Tear the driver down. Consumes the driver since nothing else can use
    /// it afterwards.
    async fn shutdown(self: Box<Self>) -> Result<(), DriverError>;

    /// Handle to the interception proxy shared by this driver's session.
    fn proxy(&self) -> &dyn InterceptionProxy;
}
