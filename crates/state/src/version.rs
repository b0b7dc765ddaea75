//! Append-only, bounded version log.

use std::collections::VecDeque;

use agui_core::JsonPatchOp;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// One committed transaction.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StateVersion {
    pub version_id: u64,
    /// The version this one was applied on top of; `None` for the first.
    pub parent_id: Option<u64>,
    pub created_at: DateTime<Utc>,
    pub ops: Vec<JsonPatchOp>,
    /// SHA-256 (hex) over the canonical JSON of the shards the
    /// transaction touched.
    pub root_hash: Option<String>,
}

/// The log itself.  Guarded by the store's version mutex; version IDs are
/// handed out here so commit order and ID order always agree.
pub struct VersionLog {
    entries: VecDeque<StateVersion>,
    next_id: u64,
    max_history: usize,
}

impl VersionLog {
    pub fn new(max_history: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            next_id: 1,
            max_history: max_history.max(1),
        }
    }

    /// Record a commit and return its version ID.
    pub fn append(&mut self, ops: Vec<JsonPatchOp>, root_hash: Option<String>) -> u64 {
        let version_id = self.next_id;
        self.next_id += 1;
        let parent_id = self.entries.back().map(|v| v.version_id);
        self.entries.push_back(StateVersion {
            version_id,
            parent_id,
            created_at: Utc::now(),
            ops,
            root_hash,
        });
        while self.entries.len() > self.max_history {
            self.entries.pop_front();
        }
        version_id
    }

    /// Most recent versions, newest first.
    pub fn history(&self, limit: usize) -> Vec<StateVersion> {
        self.entries.iter().rev().take(limit).cloned().collect()
    }

    /// The latest committed version ID, 0 if nothing committed yet.
    pub fn current(&self) -> u64 {
        self.next_id - 1
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
