//! The sharded, versioned state store.
//!
//! The root document is always a JSON object.  Top-level keys are hashed
//! onto a power-of-two number of shards; each shard publishes its slice of
//! the root as an immutable `Arc<Value>` snapshot.  Readers clone the Arc
//! under a briefly-held read lock and never observe partial writes.
//! Writers clone the touched shards into a scratch document, apply the
//! whole patch there, and only swap the new snapshots in once every op
//! has succeeded — shard locks are taken in canonical (index) order so
//! multi-shard transactions cannot deadlock.

use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeSet, HashMap};
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::{Duration, Instant};

use agui_core::pointer::{self, PointerError};
use agui_core::{BoundedQueue, JsonPatchOp, OverflowPolicy};
use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::config::StateConfig;
use crate::error::StateError;
use crate::patch::apply_op;
use crate::subscription::{StateChange, StateSubscription, SubscribeOptions};
use crate::version::{StateVersion, VersionLog};

/// One shard's published snapshot: the subset of top-level entries whose
/// keys hash here, always a `Value::Object`.
struct Shard {
    snapshot: RwLock<Arc<Value>>,
}

/// Observable store counters.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StateStats {
    pub current_version: u64,
    pub history_length: usize,
    pub subscribers_active: usize,
}

/// The store.  Cheap to share behind an `Arc`.
pub struct StateStore {
    shards: Vec<Shard>,
    shard_mask: u64,
    versions: Mutex<VersionLog>,
    subs: RwLock<HashMap<String, Arc<StateSubscription>>>,
    config: StateConfig,
}

impl StateStore {
    pub fn new(config: StateConfig) -> Self {
        let count = config.effective_shards();
        let shards = (0..count)
            .map(|_| Shard {
                snapshot: RwLock::new(Arc::new(Value::Object(Map::new()))),
            })
            .collect();
        Self {
            shards,
            shard_mask: (count - 1) as u64,
            versions: Mutex::new(VersionLog::new(config.max_history)),
            subs: RwLock::new(HashMap::new()),
            config,
        }
    }

    pub fn config(&self) -> &StateConfig {
        &self.config
    }

    fn shard_index(&self, top_level_key: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        top_level_key.hash(&mut hasher);
        (hasher.finish() & self.shard_mask) as usize
    }

    // ── Reads ────────────────────────────────────────────────────────

    /// Read the subtree at `path`.  Lock-free after the per-shard Arc
    /// clone; the returned value is an owned copy.
    pub fn get(&self, path: &str) -> Result<Value, StateError> {
        let segments = pointer::parse(path)?;
        if segments.is_empty() {
            return Ok(self.merged_root());
        }
        let shard = &self.shards[self.shard_index(&segments[0])];
        let snapshot = shard.snapshot.read().clone();
        match pointer::resolve(&snapshot, &segments) {
            Ok(value) => Ok(value.clone()),
            Err(PointerError::NotFound { .. }) | Err(PointerError::Scalar(_)) => {
                Err(StateError::NotFound(path.to_string()))
            }
            Err(e) => Err(StateError::Path(e)),
        }
    }

    /// A copy of the entire root object.  Merged from per-shard
    /// snapshots; consistency is per shard, as with any cross-shard read.
    pub fn snapshot(&self) -> Value {
        self.merged_root()
    }

    fn merged_root(&self) -> Value {
        let mut root = Map::new();
        for shard in &self.shards {
            let snapshot = shard.snapshot.read().clone();
            if let Value::Object(map) = snapshot.as_ref() {
                for (k, v) in map {
                    root.insert(k.clone(), v.clone());
                }
            }
        }
        Value::Object(root)
    }

    // ── Writes ───────────────────────────────────────────────────────

    /// Single-value write; equivalent to a one-op `add` patch.
    pub fn set(&self, path: &str, value: Value) -> Result<u64, StateError> {
        self.apply_patch(vec![JsonPatchOp::add(path, value)])
    }

    /// Remove the subtree at `path`.
    pub fn delete(&self, path: &str) -> Result<u64, StateError> {
        self.apply_patch(vec![JsonPatchOp::remove(path)])
            .map_err(|e| match e {
                // A failed single-op remove means the target is missing.
                StateError::Patch { .. } => StateError::NotFound(path.to_string()),
                other => other,
            })
    }

    /// Apply a multi-op patch atomically: either every op applies and a
    /// new version is recorded, or the state is untouched.
    pub fn apply_patch(&self, ops: Vec<JsonPatchOp>) -> Result<u64, StateError> {
        // Structural validation before any lock is taken.
        for (at, op) in ops.iter().enumerate() {
            op.validate().map_err(|e| StateError::Patch {
                at,
                reason: e.to_string(),
            })?;
        }

        // Which shards does this patch touch?  Root-path ops touch all.
        let mut keys: BTreeSet<usize> = BTreeSet::new();
        let mut whole_root = false;
        for op in &ops {
            for p in [Some(op.path.as_str()), op.from.as_deref()]
                .into_iter()
                .flatten()
            {
                let segments = pointer::parse(p)?;
                match segments.first() {
                    Some(first) => {
                        keys.insert(self.shard_index(first));
                    }
                    None => whole_root = true,
                }
            }
        }
        let indices: Vec<usize> = if whole_root {
            (0..self.shards.len()).collect()
        } else {
            keys.into_iter().collect()
        };

        // Canonical lock order: ascending shard index.
        let mut guards: Vec<_> = indices
            .iter()
            .map(|i| self.shards[*i].snapshot.write())
            .collect();

        // Scratch document holding the touched slices.
        let mut scratch = Map::new();
        for guard in &guards {
            let snapshot: &Value = guard;
            if let Value::Object(map) = snapshot {
                for (k, v) in map {
                    scratch.insert(k.clone(), v.clone());
                }
            }
        }
        let mut scratch = Value::Object(scratch);

        for (at, op) in ops.iter().enumerate() {
            apply_op(&mut scratch, op).map_err(|reason| StateError::Patch { at, reason })?;
        }

        let Value::Object(scratch) = scratch else {
            return Err(StateError::Patch {
                at: ops.len().saturating_sub(1),
                reason: "the document root must remain an object".into(),
            });
        };

        let root_hash = hash_canonical(&Value::Object(scratch.clone()));

        // Commit: version ID is assigned and snapshots swap while the
        // shard guards are held, so ID order matches visibility order.
        let mut versions = self.versions.lock();
        let version_id = versions.append(ops.clone(), Some(root_hash));

        let mut new_maps: Vec<Map<String, Value>> =
            indices.iter().map(|_| Map::new()).collect();
        for (k, v) in scratch {
            let shard = self.shard_index(&k);
            if let Some(pos) = indices.iter().position(|i| *i == shard) {
                new_maps[pos].insert(k, v);
            }
        }
        for (guard, map) in guards.iter_mut().zip(new_maps) {
            **guard = Arc::new(Value::Object(map));
        }

        // Fan-out in commit order, before releasing the version lock.
        // Pushes never block (Block/Error were downgraded at subscribe).
        self.fan_out(version_id, &ops);
        drop(versions);
        drop(guards);

        Ok(version_id)
    }

    /// Start an explicit transaction.
    pub fn begin(&self) -> Transaction<'_> {
        Transaction {
            store: self,
            staged: Vec::new(),
            done: false,
        }
    }

    // ── Versions ─────────────────────────────────────────────────────

    /// Most recent versions, newest first.
    pub fn history(&self, limit: usize) -> Vec<StateVersion> {
        self.versions.lock().history(limit)
    }

    /// The latest committed version ID; 0 before the first commit.
    pub fn current_version(&self) -> u64 {
        self.versions.lock().current()
    }

    // ── Subscriptions ────────────────────────────────────────────────

    /// Register interest in paths matching `pattern` (`*` matches one
    /// segment, e.g. `/users/*`).
    pub fn subscribe(
        &self,
        pattern: &str,
        opts: SubscribeOptions,
    ) -> Result<Arc<StateSubscription>, StateError> {
        let segments = pointer::parse(pattern)?;
        let policy = match opts.policy.unwrap_or(self.config.overflow_policy) {
            OverflowPolicy::DropOldest => OverflowPolicy::DropOldest,
            OverflowPolicy::DropNew => OverflowPolicy::DropNew,
            // The store's writer never blocks or fails on a slow
            // subscriber.
            other => {
                tracing::debug!(?other, "downgrading subscription overflow policy to drop-new");
                OverflowPolicy::DropNew
            }
        };
        let queue_size = opts
            .queue_size
            .unwrap_or(self.config.subscription_queue_size);
        let ttl = opts
            .ttl
            .map(Duration::from_secs)
            .unwrap_or_else(|| self.config.sub_ttl());

        let sub = Arc::new(StateSubscription {
            id: agui_core::id::new_id("sub"),
            pattern: pattern.to_string(),
            segments,
            queue: Arc::new(BoundedQueue::new(queue_size)),
            policy,
            ttl,
            created_at: Instant::now(),
            last_activity: Mutex::new(Instant::now()),
        });
        self.subs.write().insert(sub.id.clone(), sub.clone());
        tracing::debug!(id = %sub.id, pattern = %sub.pattern, "state subscription created");
        Ok(sub)
    }

    /// Cancel a subscription.  Its queue closes, so a pending `recv`
    /// observes end-of-stream.
    pub fn unsubscribe(&self, id: &str) -> Result<(), StateError> {
        match self.subs.write().remove(id) {
            Some(sub) => {
                sub.queue.close();
                tracing::debug!(id = %id, "state subscription cancelled");
                Ok(())
            }
            None => Err(StateError::SubscriptionNotFound(id.to_string())),
        }
    }

    /// Reap subscriptions whose inactivity TTL lapsed.  Returns how many
    /// were removed.
    pub fn sweep_subscriptions(&self) -> usize {
        let mut subs = self.subs.write();
        let before = subs.len();
        subs.retain(|_, sub| {
            let keep = !sub.expired();
            if !keep {
                sub.queue.close();
            }
            keep
        });
        let swept = before - subs.len();
        if swept > 0 {
            tracing::debug!(swept, "reaped idle state subscriptions");
        }
        swept
    }

    pub fn subscriber_count(&self) -> usize {
        self.subs.read().len()
    }

    pub fn stats(&self) -> StateStats {
        let versions = self.versions.lock();
        StateStats {
            current_version: versions.current(),
            history_length: versions.len(),
            subscribers_active: self.subscriber_count(),
        }
    }

    fn fan_out(&self, version_id: u64, ops: &[JsonPatchOp]) {
        let subs: Vec<Arc<StateSubscription>> = self.subs.read().values().cloned().collect();
        if subs.is_empty() {
            return;
        }
        for op in ops {
            let path_segments = pointer::parse(&op.path).unwrap_or_default();
            let from_segments = op
                .from
                .as_deref()
                .map(|f| pointer::parse(f).unwrap_or_default());
            for sub in &subs {
                let hit = sub.matches(&path_segments)
                    || from_segments
                        .as_deref()
                        .map(|f| sub.matches(f))
                        .unwrap_or(false);
                if hit {
                    sub.offer(StateChange {
                        version_id,
                        op: op.clone(),
                    });
                }
            }
        }
    }
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new(StateConfig::default())
    }
}

fn hash_canonical(value: &Value) -> String {
    let bytes = serde_jcs::to_vec(value).unwrap_or_default();
    hex::encode(Sha256::digest(&bytes))
}

/// An explicit transaction: stage ops, then commit atomically or discard.
pub struct Transaction<'a> {
    store: &'a StateStore,
    staged: Vec<JsonPatchOp>,
    done: bool,
}

impl Transaction<'_> {
    /// Stage ops.  Structural validation happens immediately; semantic
    /// validation happens at commit, against the then-current state.
    pub fn apply(&mut self, ops: impl IntoIterator<Item = JsonPatchOp>) -> Result<(), StateError> {
        if self.done {
            return Err(StateError::TransactionDone);
        }
        let start = self.staged.len();
        for (offset, op) in ops.into_iter().enumerate() {
            op.validate().map_err(|e| StateError::Patch {
                at: start + offset,
                reason: e.to_string(),
            })?;
            self.staged.push(op);
        }
        Ok(())
    }

    /// Materialise the staged ops as one atomic patch.
    pub fn commit(mut self) -> Result<u64, StateError> {
        if self.done {
            return Err(StateError::TransactionDone);
        }
        self.done = true;
        let staged = std::mem::take(&mut self.staged);
        self.store.apply_patch(staged)
    }

    /// Discard the staged ops.
    pub fn rollback(mut self) {
        self.done = true;
        self.staged.clear();
    }

    pub fn staged_len(&self) -> usize {
        self.staged.len()
    }
}
