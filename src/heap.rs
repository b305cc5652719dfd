//! Growth tracking: turns a sequence of heap snapshots into a set of
//! monotonically-growing heap-graph paths, merged into leak roots.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::driver::HeapSnapshot;

/// Errors surfaced by [`GrowthTracker`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GrowthError {
    #[error("need at least 2 snapshots to find leak paths, have {0}")]
    InsufficientSnapshots(usize),
}

/// A dense, stable identifier assigned to a leak root the first time it is
/// observed. Stable across the run: re-running `find_leak_paths` on the same
/// tracker state yields the same ids for the same paths.
pub type LeakRootId = u32;

/// A heap object whose retained-object count grows monotonically across
/// observed loop iterations, identified by the set of heap-graph paths that
/// reach it.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct LeakRoot {
    pub id: LeakRootId,
    pub paths: Vec<Vec<String>>,
    pub stacks: Vec<Vec<crate::driver::ResolvedStackFrame>>,
}

impl LeakRoot {
    fn new(id: LeakRootId, path: Vec<String>) -> Self {
        LeakRoot {
            id,
            paths: vec![path],
            stacks: Vec::new(),
        }
    }
}

/// Ingests heap snapshots in strict arrival order and identifies leak roots.
///
/// `add_snapshot` takes `&mut self`, so by construction only one snapshot can
/// ever be mid-submission and there is no way to insert one out of sequence.
#[derive(Default)]
pub struct GrowthTracker {
    /// One entry per snapshot, in arrival order: path (joined by `/`) -> count.
    snapshots: Vec<BTreeMap<String, u64>>,
}

fn join_path(path: &[String]) -> String {
    path.join("/")
}

impl GrowthTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot_count(&self) -> usize {
        self.snapshots.len()
    }

    /// Parse `snapshot` and record its per-path reachable-object counts.
    pub fn add_snapshot(&mut self, snapshot: &dyn HeapSnapshot) {
        let mut counts = BTreeMap::new();
        for pc in snapshot.paths() {
            counts.insert(join_path(&pc.path), pc.count);
        }
        self.snapshots.push(counts);
    }

    /// Find every heap-graph path whose reachable-object count is
    /// non-decreasing across all snapshots that observed it and strictly
    /// increasing at least once, then merge growth candidates that converge
    /// on the same terminal path in the latest snapshot into one [`LeakRoot`].
    ///
    /// Requires at least 2 recorded snapshots.
    pub fn find_leak_paths(&self) -> Result<Vec<LeakRoot>, GrowthError> {
        if self.snapshots.len() < 2 {
            return Err(GrowthError::InsufficientSnapshots(self.snapshots.len()));
        }

        let latest = self.snapshots.last().expect("checked len >= 2");

        // Stable order: iterate paths as they appear in the latest snapshot.
        let mut next_id: LeakRootId = 0;
        let mut roots = Vec::new();

        for path_key in latest.keys() {
            let sequence: Vec<u64> = self
                .snapshots
                .iter()
                .filter_map(|snap| snap.get(path_key).copied())
                .collect();

            if sequence.len() < 2 {
                continue;
            }

            let non_decreasing = sequence.windows(2).all(|w| w[1] >= w[0]);
            let strictly_increased = sequence.windows(2).any(|w| w[1] > w[0]);

            if non_decreasing && strictly_increased {
                let path: Vec<String> = path_key.split('/').map(str::to_string).collect();
                let id = next_id;
                next_id += 1;
                roots.push(LeakRoot::new(id, path));
            }
        }

        Ok(roots)
    }
}
