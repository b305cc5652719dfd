//! Aggregated diagnosis output: leak roots with attributed stacks, optional
//! heap-size metrics, and the compact path-tree projection shared with the
//! page-side instrumentation hook.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::driver::{HeapMetrics, ResolvedStackFrame};
use crate::heap::{LeakRoot, LeakRootId};

/// One row of aggregate heap metrics, stamped with the iteration it was
/// captured at.
#[derive(Debug, Clone, Serialize)]
pub struct HeapMetricsRow {
    pub iteration: u32,
    #[serde(flatten)]
    pub metrics: HeapMetrics,
}

/// Final diagnosis output.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Results {
    pub leak_roots: Vec<LeakRoot>,
    pub heap_metrics: Vec<HeapMetricsRow>,
}

impl Results {
    pub fn new(leak_roots: Vec<LeakRoot>) -> Self {
        Results {
            leak_roots,
            heap_metrics: Vec::new(),
        }
    }

    /// Append a converted stack trace to the matching root. A root id with
    /// no matching entry (shouldn't happen given §3's invariant, but not
    /// treated as fatal) is silently ignored.
    pub fn attribute_stack(&mut self, root_id: LeakRootId, stack: Vec<ResolvedStackFrame>) {
        if let Some(root) = self.leak_roots.iter_mut().find(|r| r.id == root_id) {
            root.stacks.push(stack);
        }
    }

    /// Sort each root's paths and stacks into a canonical order and drop
    /// roots with an empty path list. Idempotent: applying this twice yields
    /// the same result as applying it once.
    pub fn compact(mut self) -> Self {
        self.leak_roots.retain(|r| !r.paths.is_empty());
        for root in &mut self.leak_roots {
            root.paths.sort();
            root.stacks.sort_by(|a, b| format_stack(a).cmp(&format_stack(b)));
        }
        self.leak_roots.sort_by_key(|r| r.id);
        self
    }
}

fn format_stack(stack: &[ResolvedStackFrame]) -> String {
    stack
        .iter()
        .map(|f| format!("{}:{}:{}", f.source_file, f.line, f.column))
        .collect::<Vec<_>>()
        .join("|")
}

/// Compact projection of the leak roots' heap-graph paths, keyed by root id,
/// as the instrumentation hook and `leaks.json`/`paths.json` expect it.
///
/// Shared path prefixes across roots are not deduplicated across roots
/// themselves (each root is independently addressable by id) but within a
/// root, identical leading segments collapse naturally since `paths` is
/// already a flat list of full paths per root — this projection exists so
/// the wire/storage shape matches the external contract rather than our
/// internal `Vec<LeakRoot>` representation.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct PathTree(pub BTreeMap<LeakRootId, Vec<Vec<String>>>);

/// Project `leak_roots` into the external path-tree shape.
pub fn to_path_tree(leak_roots: &[LeakRoot]) -> PathTree {
    let mut tree = BTreeMap::new();
    for root in leak_roots {
        tree.insert(root.id, root.paths.clone());
    }
    PathTree(tree)
}
