//! Process-wide progress bookkeeping.
//!
//! Counters, the set of clips with a live worker and the merge activity all
//! sit behind one mutex so they are always read and changed together. None
//! of this is authoritative for clip state: markers on disk are. After a
//! restart [`Progress::restore`] rebuilds the counters from the file system.

use std::collections::{BTreeMap, BTreeSet};

use parking_lot::Mutex;
use serde::Serialize;

/// What the in-process merge task is doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeActivity {
    #[default]
    Idle,
    Running,
    Complete,
    Failed,
}

/// A clip whose normalization failed in this process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedClip {
    pub index: u32,
    pub error: String,
}

/// Point-in-time copy of the counters, served by `/api/progress`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressSnapshot {
    pub total: Option<u32>,
    pub received: u32,
    pub completed: u32,
    /// Clips with a worker currently attached.
    pub active: Vec<u32>,
    pub failed: Vec<FailedClip>,
    pub merge: MergeActivity,
    pub merge_error: Option<String>,
}

#[derive(Debug, Default)]
struct State {
    total: Option<u32>,
    received: BTreeSet<u32>,
    completed: BTreeSet<u32>,
    active: BTreeSet<u32>,
    failed: BTreeMap<u32, String>,
    merge: MergeActivity,
    merge_error: Option<String>,
}

#[derive(Debug, Default)]
pub struct Progress {
    state: Mutex<State>,
}

impl Progress {
    pub fn new(total: Option<u32>) -> Self {
        Self {
            state: Mutex::new(State {
                total,
                ..Default::default()
            }),
        }
    }

    pub fn set_total(&self, total: u32) {
        self.state.lock().total = Some(total);
    }

    /// Claim `index` for a new worker. Returns `false` if one is attached.
    pub fn begin_clip(&self, index: u32) -> bool {
        self.state.lock().active.insert(index)
    }

    /// Undo [`begin_clip`](Self::begin_clip) for an upload that never landed.
    /// Earlier outcomes for `index` are left as they were.
    pub fn abandon_clip(&self, index: u32) {
        self.state.lock().active.remove(&index);
    }

    /// The claimed clip's bytes are in place; clears any earlier failure.
    pub fn receive_clip(&self, index: u32) {
        let mut state = self.state.lock();
        state.received.insert(index);
        state.completed.remove(&index);
        state.failed.remove(&index);
        let (received, total) = (state.received.len(), state.total);
        drop(state);

        tracing::info!(index, "Received {}/{}", received, display_total(total));
    }

    pub fn complete_clip(&self, index: u32) {
        let mut state = self.state.lock();
        state.active.remove(&index);
        state.completed.insert(index);
        let (completed, total) = (state.completed.len(), state.total);
        drop(state);

        tracing::info!(index, "Completed {}/{}", completed, display_total(total));
    }

    pub fn fail_clip(&self, index: u32, error: String) {
        let mut state = self.state.lock();
        state.active.remove(&index);
        state.failed.insert(index, error);
    }

    /// Whether a worker is attached to `index`.
    pub fn is_active(&self, index: u32) -> bool {
        self.state.lock().active.contains(&index)
    }

    pub fn begin_merge(&self) {
        let mut state = self.state.lock();
        state.merge = MergeActivity::Running;
        state.merge_error = None;
    }

    pub fn finish_merge(&self, result: Result<(), String>) {
        let mut state = self.state.lock();
        match result {
            Ok(()) => state.merge = MergeActivity::Complete,
            Err(e) => {
                state.merge = MergeActivity::Failed;
                state.merge_error = Some(e);
            }
        }
    }

    pub fn merge_running(&self) -> bool {
        self.state.lock().merge == MergeActivity::Running
    }

    /// Whether any clip worker or the merge is still running.
    pub fn has_active_work(&self) -> bool {
        let state = self.state.lock();
        !state.active.is_empty() || state.merge == MergeActivity::Running
    }

    /// Rebuild counters from what is on disk.
    pub fn restore(&self, canonical: &[u32], pending: &[u32]) {
        let mut state = self.state.lock();
        state.completed.extend(canonical.iter().copied());
        state.received.extend(canonical.iter().chain(pending).copied());
    }

    /// Forget everything except the configured total.
    pub fn reset(&self, total: Option<u32>) {
        *self.state.lock() = State {
            total,
            ..Default::default()
        };
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        let state = self.state.lock();
        ProgressSnapshot {
            total: state.total,
            received: state.received.len() as u32,
            completed: state.completed.len() as u32,
            active: state.active.iter().copied().collect(),
            failed: state
                .failed
                .iter()
                .map(|(index, error)| FailedClip {
                    index: *index,
                    error: error.clone(),
                })
                .collect(),
            merge: state.merge,
            merge_error: state.merge_error.clone(),
        }
    }
}

fn display_total(total: Option<u32>) -> String {
    total.map_or_else(|| "?".to_string(), |t| t.to_string())
}
