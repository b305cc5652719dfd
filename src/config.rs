//! The test configuration: phases, steps, leak bookkeeping, and the proxy's
//! content rewriter.
//!
//! Mirrors `ConfigurationFile` from the specification. The struct itself is
//! plain data; turning an untrusted JS source blob into one lives in
//! [`crate::config_eval`].

use std::time::Duration;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::driver::RewriteFn;

/// Errors that can occur while loading or evaluating a configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config source from {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("config source evaluation failed: {0}")]
    EvalFailed(String),

    #[error("config deserialization failed: {0}")]
    Deserialize(#[from] serde_json::Error),
}

/// A single declarative step, interpreted entirely in the page.
///
/// `check` and `next` are opaque JS source snippets — nullary page-side
/// predicate and action, respectively — never parsed or executed by the
/// controller itself, only forwarded to `BrowserDriver::run_code`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    /// Milliseconds to sleep before the first `check` poll.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sleep: Option<u64>,

    /// Page-side nullary predicate source, e.g. `"() => document.readyState === 'complete'"`.
    pub check: String,

    /// Page-side nullary action source, run once `check` becomes true.
    pub next: String,
}

/// The full test configuration.
///
/// Immutable once constructed — every controller operation takes `&ConfigurationFile`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigurationFile {
    pub name: String,

    /// Loop iterations in the find-leaks pass. Must be positive.
    pub iterations: u32,

    pub url: String,

    /// Leak IDs whose rewrites are applied during find-leaks.
    #[serde(default)]
    pub fixed_leaks: Vec<u32>,

    /// Metric name -> ordered leak-ID prefix list. Key order is significant:
    /// it defines metric iteration order in the evaluate-fixes CSV, so this
    /// is an order-preserving map rather than a `HashMap`.
    #[serde(default)]
    pub leaks: IndexMap<String, Vec<u32>>,

    /// URL patterns excluded from JS rewriting.
    #[serde(default)]
    pub black_box: Vec<String>,

    #[serde(default)]
    pub login: Vec<Step>,
    #[serde(default)]
    pub setup: Vec<Step>,
    #[serde(default)]
    pub r#loop: Vec<Step>,

    /// Per-step wait cap, milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Proxy-side content rewriter: `(url, mime_type, bytes, fixes) -> bytes`.
    /// Not serializable; absent unless installed programmatically after
    /// config evaluation (the JS config can only describe everything else).
    #[serde(skip)]
    pub rewrite: Option<RewriteFn>,
}

fn default_timeout_ms() -> u64 {
    30_000
}

impl Default for ConfigurationFile {
    fn default() -> Self {
        ConfigurationFile {
            name: "bleak".to_string(),
            iterations: 4,
            url: String::new(),
            fixed_leaks: Vec::new(),
            leaks: IndexMap::new(),
            black_box: Vec::new(),
            login: Vec::new(),
            setup: Vec::new(),
            r#loop: Vec::new(),
            timeout_ms: default_timeout_ms(),
            rewrite: None,
        }
    }
}

impl ConfigurationFile {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Compiled `black_box` patterns, skipping any that fail to compile as
    /// regexes rather than failing the whole config (logged by the caller).
    pub fn black_box_patterns(&self) -> Vec<regex::Regex> {
        self.black_box
            .iter()
            .filter_map(|p| match regex::Regex::new(p) {
                Ok(re) => Some(re),
                Err(e) => {
                    tracing::warn!(pattern = %p, error = %e, "invalid blackBox pattern, ignoring");
                    None
                }
            })
            .collect()
    }

    /// Steps for a named phase (`"login"`, `"setup"`, or `"loop"`).
    pub fn phase(&self, phase: Phase) -> &[Step] {
        match phase {
            Phase::Login => &self.login,
            Phase::Setup => &self.setup,
            Phase::Loop => &self.r#loop,
        }
    }
}

/// The three named phases a workload is sequenced through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Login,
    Setup,
    Loop,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Login => "login",
            Phase::Setup => "setup",
            Phase::Loop => "loop",
        }
    }
}
