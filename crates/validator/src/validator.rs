//! The sequence validator: a thread-safe protocol state machine.
//!
//! Concurrency model: *snapshot-read rules, serialized writer*.  Rule
//! evaluation runs against a read-locked snapshot and produces a
//! [`Plan`]; only events that transition state take the writer lock, where
//! the rules are re-evaluated against the authoritative state before the
//! transition commits.  Pure lookups (Raw/Custom, violations with no
//! transition) never serialize behind writers.

use std::time::Instant;

use parking_lot::RwLock;

use agui_core::error::{ValidationErrorKind, ValidationError};
use agui_core::{Event, EventType};

use crate::error::{SequenceError, SequenceErrorKind};
use crate::metrics::{ValidatorMetrics, ValidatorStats};
use crate::policy::{ValidationPolicy, ValidatorConfig};
use crate::state::{MessageState, RunState, ToolState, ValidationState};

/// The result of validating one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationOutcome {
    /// Violations observed, empty when the event is clean.
    pub errors: Vec<SequenceError>,
    /// Whether the event should be delivered to handlers under the
    /// active policy.
    pub deliver: bool,
}

impl ValidationOutcome {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// State transition an event implies, computed by rule evaluation and
/// applied under the writer lock.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Plan {
    None,
    StartRun {
        run_id: String,
        thread_id: String,
        /// Set when a duplicate start resets an already-active run first.
        reset_existing: bool,
    },
    /// Close a run; `failed` closes open children silently (error path),
    /// otherwise open children were already reported as violations.
    FinishRun {
        run_id: String,
        failed: bool,
    },
    StartStep {
        name: String,
        run_id: String,
    },
    FinishStep {
        name: String,
        run_id: String,
    },
    StartMessage {
        id: String,
        run_id: Option<String>,
    },
    MessageDelta {
        id: String,
    },
    EndMessage {
        id: String,
    },
    StartTool {
        id: String,
        parent_message_id: Option<String>,
        run_id: Option<String>,
    },
    ToolDelta {
        id: String,
        delta: String,
    },
    EndTool {
        id: String,
    },
}

/// Thread-safe protocol state machine.  One instance validates one event
/// stream (typically one transport).
pub struct SequenceValidator {
    config: ValidatorConfig,
    state: RwLock<ValidationState>,
    metrics: ValidatorMetrics,
}

impl SequenceValidator {
    pub fn new(config: ValidatorConfig) -> Self {
        let max = config.max_finished_entries;
        Self {
            config,
            state: RwLock::new(ValidationState::new(max)),
            metrics: ValidatorMetrics::new(),
        }
    }

    pub fn with_policy(policy: ValidationPolicy) -> Self {
        Self::new(ValidatorConfig {
            policy,
            ..ValidatorConfig::default()
        })
    }

    pub fn policy(&self) -> ValidationPolicy {
        self.config.policy
    }

    /// Validate one event and commit any lifecycle transition it implies.
    pub fn validate(&self, event: &Event) -> ValidationOutcome {
        let started = Instant::now();
        let policy = self.config.policy;
        let mut errors = Vec::new();

        // ── Per-event checks ─────────────────────────────────────────
        if let Err(err) = event.validate() {
            if policy.ids_required() || !is_relaxed_under_lenient_ids(&err) {
                errors.push(structural_to_sequence(err, event.event_type()));
            }
        }
        if policy.timestamps_required()
            && event.event_type() != EventType::Unknown
            && event.timestamp_ms().is_none()
        {
            errors.push(SequenceError::new(
                SequenceErrorKind::MissingTimestamp,
                event.event_type(),
                None,
                "timestampMs is required under the Production policy",
            ));
        }

        // ── Lifecycle rules ──────────────────────────────────────────
        if policy.tracks_lifecycle() {
            let needs_write = {
                let state = self.state.read();
                let (rule_errors, plan) = self.evaluate(&state, event);
                if plan == Plan::None {
                    errors.extend(rule_errors);
                    false
                } else {
                    true
                }
            };

            if needs_write {
                // Re-evaluate under the writer lock: the snapshot may be
                // stale by the time we get here.
                let mut state = self.state.write();
                let (rule_errors, plan) = self.evaluate(&state, event);
                errors.extend(rule_errors);
                self.commit(&mut state, plan, &mut errors, event.event_type());
            }
        }

        let deliver = match policy {
            ValidationPolicy::Production => errors.is_empty(),
            _ => true,
        };

        let latency_us = started.elapsed().as_micros().min(u128::from(u64::MAX)) as u64;
        self.metrics.record(latency_us, errors.is_empty());
        if !errors.is_empty() {
            tracing::debug!(
                event_type = ?event.event_type(),
                violations = errors.len(),
                deliver,
                "sequence validation reported violations"
            );
        }

        ValidationOutcome { errors, deliver }
    }

    /// Rule evaluation.  Pure with respect to `state`; all mutation goes
    /// through [`Self::commit`].
    fn evaluate(&self, state: &ValidationState, event: &Event) -> (Vec<SequenceError>, Plan) {
        let mut errors = Vec::new();
        let ty = event.event_type();

        let plan = match event {
            Event::RunStarted {
                thread_id, run_id, ..
            } => {
                if state.active_runs.contains_key(run_id) {
                    errors.push(
                        SequenceError::new(
                            SequenceErrorKind::DuplicateStart,
                            ty,
                            Some(run_id.clone()),
                            "run is already active",
                        )
                        .fatal(),
                    );
                    // Fatal: reset the existing run.  Under a recoverable
                    // policy the commit restarts it; under strict ordering
                    // the ID is retired instead.
                    Plan::StartRun {
                        run_id: run_id.clone(),
                        thread_id: thread_id.clone(),
                        reset_existing: true,
                    }
                } else {
                    let finished = state.finished_runs.contains(run_id);
                    self.metrics.record_finished_lookup(finished);
                    if finished {
                        errors.push(SequenceError::new(
                            SequenceErrorKind::AlreadyFinished,
                            ty,
                            Some(run_id.clone()),
                            "run id was already finished",
                        ));
                        Plan::None
                    } else {
                        Plan::StartRun {
                            run_id: run_id.clone(),
                            thread_id: thread_id.clone(),
                            reset_existing: false,
                        }
                    }
                }
            }

            Event::RunFinished { run_id, .. } => {
                if state.active_runs.contains_key(run_id) {
                    Plan::FinishRun {
                        run_id: run_id.clone(),
                        failed: false,
                    }
                } else {
                    let finished = state.finished_runs.contains(run_id);
                    self.metrics.record_finished_lookup(finished);
                    errors.push(SequenceError::new(
                        SequenceErrorKind::OrphanEnd,
                        ty,
                        Some(run_id.clone()),
                        if finished {
                            "run already finished"
                        } else {
                            "no matching RunStarted"
                        },
                    ));
                    Plan::None
                }
            }

            Event::RunError { run_id, .. } => {
                let target = run_id
                    .clone()
                    .or_else(|| state.current_run().map(str::to_owned));
                match target {
                    Some(r) if state.active_runs.contains_key(&r) => Plan::FinishRun {
                        run_id: r,
                        failed: true,
                    },
                    Some(r) => {
                        errors.push(SequenceError::new(
                            SequenceErrorKind::OrphanEnd,
                            ty,
                            Some(r),
                            "run is not active",
                        ));
                        Plan::None
                    }
                    // Out-of-band error with no run in flight: structural
                    // only, nothing to close.
                    None => Plan::None,
                }
            }

            Event::StepStarted { step_name, .. } => match state.current_run() {
                Some(run_id) => {
                    if state.active_steps.contains_key(step_name) {
                        errors.push(SequenceError::new(
                            SequenceErrorKind::DuplicateStart,
                            ty,
                            Some(step_name.clone()),
                            "step is already active",
                        ));
                        Plan::None
                    } else {
                        Plan::StartStep {
                            name: step_name.clone(),
                            run_id: run_id.to_owned(),
                        }
                    }
                }
                None => {
                    errors.push(SequenceError::new(
                        SequenceErrorKind::NoActiveRun,
                        ty,
                        Some(step_name.clone()),
                        "steps require an active run",
                    ));
                    Plan::None
                }
            },

            Event::StepFinished { step_name, .. } => {
                if !state.active_steps.contains_key(step_name) {
                    errors.push(SequenceError::new(
                        SequenceErrorKind::OrphanEnd,
                        ty,
                        Some(step_name.clone()),
                        "no matching StepStarted",
                    ));
                    Plan::None
                } else {
                    // Find the run whose stack holds this step.
                    let owner = state
                        .active_runs
                        .iter()
                        .find(|(_, run)| run.step_stack.iter().any(|s| s == step_name));
                    match owner {
                        Some((run_id, run)) => {
                            if run.step_stack.last().map(String::as_str) != Some(step_name.as_str()) {
                                errors.push(SequenceError::new(
                                    SequenceErrorKind::NonLifoStep,
                                    ty,
                                    Some(step_name.clone()),
                                    "step finished out of LIFO order",
                                ));
                            }
                            Plan::FinishStep {
                                name: step_name.clone(),
                                run_id: run_id.clone(),
                            }
                        }
                        None => {
                            errors.push(SequenceError::new(
                                SequenceErrorKind::OrphanEnd,
                                ty,
                                Some(step_name.clone()),
                                "step has no owning run",
                            ));
                            Plan::None
                        }
                    }
                }
            }

            Event::TextMessageStart { message_id, .. } => {
                if state.active_messages.contains_key(message_id) {
                    errors.push(SequenceError::new(
                        SequenceErrorKind::DuplicateStart,
                        ty,
                        Some(message_id.clone()),
                        "message is already streaming",
                    ));
                    Plan::None
                } else {
                    let finished = state.finished_messages.contains(message_id);
                    self.metrics.record_finished_lookup(finished);
                    if finished {
                        errors.push(SequenceError::new(
                            SequenceErrorKind::AlreadyFinished,
                            ty,
                            Some(message_id.clone()),
                            "message id was already finished",
                        ));
                        Plan::None
                    } else {
                        Plan::StartMessage {
                            id: message_id.clone(),
                            run_id: state.current_run().map(str::to_owned),
                        }
                    }
                }
            }

            Event::TextMessageContent { message_id, .. } => {
                if state.active_messages.contains_key(message_id) {
                    Plan::MessageDelta {
                        id: message_id.clone(),
                    }
                } else {
                    errors.push(SequenceError::new(
                        SequenceErrorKind::OrphanEnd,
                        ty,
                        Some(message_id.clone()),
                        "delta for a message that is not streaming",
                    ));
                    Plan::None
                }
            }

            Event::TextMessageEnd { message_id, .. } => {
                if state.active_messages.contains_key(message_id) {
                    Plan::EndMessage {
                        id: message_id.clone(),
                    }
                } else {
                    errors.push(SequenceError::new(
                        SequenceErrorKind::OrphanEnd,
                        ty,
                        Some(message_id.clone()),
                        "no matching TextMessageStart",
                    ));
                    Plan::None
                }
            }

            Event::ToolCallStart {
                tool_call_id,
                parent_message_id,
                ..
            } => {
                if state.active_tools.contains_key(tool_call_id) {
                    errors.push(SequenceError::new(
                        SequenceErrorKind::DuplicateStart,
                        ty,
                        Some(tool_call_id.clone()),
                        "tool call is already streaming",
                    ));
                    Plan::None
                } else {
                    let finished = state.finished_tools.contains(tool_call_id);
                    self.metrics.record_finished_lookup(finished);
                    if finished {
                        errors.push(SequenceError::new(
                            SequenceErrorKind::AlreadyFinished,
                            ty,
                            Some(tool_call_id.clone()),
                            "tool call id was already finished",
                        ));
                        Plan::None
                    } else {
                        Plan::StartTool {
                            id: tool_call_id.clone(),
                            parent_message_id: parent_message_id.clone(),
                            run_id: state.current_run().map(str::to_owned),
                        }
                    }
                }
            }

            Event::ToolCallArgs {
                tool_call_id, delta, ..
            } => {
                if state.active_tools.contains_key(tool_call_id) {
                    Plan::ToolDelta {
                        id: tool_call_id.clone(),
                        delta: delta.clone(),
                    }
                } else {
                    errors.push(SequenceError::new(
                        SequenceErrorKind::OrphanEnd,
                        ty,
                        Some(tool_call_id.clone()),
                        "args for a tool call that is not streaming",
                    ));
                    Plan::None
                }
            }

            Event::ToolCallEnd { tool_call_id, .. } => {
                if let Some(tool) = state.active_tools.get(tool_call_id) {
                    // Concatenated deltas must form one JSON document.
                    // Per-chunk validity was never required.
                    if !tool.args.is_empty()
                        && serde_json::from_str::<serde_json::Value>(&tool.args).is_err()
                    {
                        errors.push(SequenceError::new(
                            SequenceErrorKind::InvalidToolArgs,
                            ty,
                            Some(tool_call_id.clone()),
                            "concatenated argument deltas are not valid JSON",
                        ));
                    }
                    Plan::EndTool {
                        id: tool_call_id.clone(),
                    }
                } else {
                    errors.push(SequenceError::new(
                        SequenceErrorKind::OrphanEnd,
                        ty,
                        Some(tool_call_id.clone()),
                        "no matching ToolCallStart",
                    ));
                    Plan::None
                }
            }

            // State events carry no cross-event bookkeeping here: a
            // snapshot replaces whatever partial state preceded it, and
            // delta ops were already checked structurally.
            Event::StateSnapshot { .. } | Event::StateDelta { .. } => Plan::None,

            // Structural only; never part of lifecycle bookkeeping.
            Event::MessagesSnapshot { .. }
            | Event::Raw { .. }
            | Event::Custom { .. }
            | Event::Unknown { .. } => Plan::None,
        };

        (errors, plan)
    }

    /// Apply a transition.  Caller holds the writer lock.
    fn commit(
        &self,
        state: &mut ValidationState,
        plan: Plan,
        errors: &mut Vec<SequenceError>,
        ty: EventType,
    ) {
        match plan {
            Plan::None => {}

            Plan::StartRun {
                run_id,
                thread_id,
                reset_existing,
            } => {
                if reset_existing {
                    state.close_run(&run_id);
                    state.finished_runs.insert(run_id.clone());
                    // The reset also retires the ID; restart only under a
                    // recoverable policy.
                    if self.config.policy.strict_ordering() {
                        return;
                    }
                }
                state.active_runs.insert(
                    run_id.clone(),
                    RunState {
                        thread_id,
                        started_at: Instant::now(),
                        step_stack: Vec::new(),
                        open_messages: Default::default(),
                        open_tools: Default::default(),
                    },
                );
                state.run_order.push(run_id);
            }

            Plan::FinishRun { run_id, failed } => {
                let (open_messages, open_tools) = state.close_run(&run_id);
                if !failed {
                    for id in open_messages {
                        errors.push(SequenceError::new(
                            SequenceErrorKind::UnterminatedChild,
                            ty,
                            Some(id),
                            "message was still open when the run finished",
                        ));
                    }
                    for id in open_tools {
                        errors.push(SequenceError::new(
                            SequenceErrorKind::UnterminatedChild,
                            ty,
                            Some(id),
                            "tool call was still open when the run finished",
                        ));
                    }
                }
                state.finished_runs.insert(run_id);
            }

            Plan::StartStep { name, run_id } => {
                state.active_steps.insert(name.clone(), Instant::now());
                if let Some(run) = state.active_runs.get_mut(&run_id) {
                    run.step_stack.push(name);
                }
            }

            Plan::FinishStep { name, run_id } => {
                state.active_steps.remove(&name);
                if let Some(run) = state.active_runs.get_mut(&run_id) {
                    run.step_stack.retain(|s| s != &name);
                }
            }

            Plan::StartMessage { id, run_id } => {
                if let Some(run_id) = &run_id {
                    if let Some(run) = state.active_runs.get_mut(run_id) {
                        run.open_messages.insert(id.clone());
                    }
                }
                state.active_messages.insert(
                    id,
                    MessageState {
                        run_id,
                        started_at: Instant::now(),
                        last_delta_at: None,
                    },
                );
            }

            Plan::MessageDelta { id } => {
                if let Some(msg) = state.active_messages.get_mut(&id) {
                    msg.last_delta_at = Some(Instant::now());
                }
            }

            Plan::EndMessage { id } => {
                if let Some(msg) = state.active_messages.remove(&id) {
                    if let Some(run_id) = &msg.run_id {
                        if let Some(run) = state.active_runs.get_mut(run_id) {
                            run.open_messages.remove(&id);
                        }
                    }
                }
                state.finished_messages.insert(id);
            }

            Plan::StartTool {
                id,
                parent_message_id,
                run_id,
            } => {
                if let Some(run_id) = &run_id {
                    if let Some(run) = state.active_runs.get_mut(run_id) {
                        run.open_tools.insert(id.clone());
                    }
                }
                state.active_tools.insert(
                    id,
                    ToolState {
                        run_id,
                        parent_message_id,
                        started_at: Instant::now(),
                        args: String::new(),
                    },
                );
            }

            Plan::ToolDelta { id, delta } => {
                if let Some(tool) = state.active_tools.get_mut(&id) {
                    tool.args.push_str(&delta);
                }
            }

            Plan::EndTool { id } => {
                if let Some(tool) = state.active_tools.remove(&id) {
                    if let Some(run_id) = &tool.run_id {
                        if let Some(run) = state.active_runs.get_mut(run_id) {
                            run.open_tools.remove(&id);
                        }
                    }
                }
                state.finished_tools.insert(id);
            }
        }
    }

    /// Purge TTL-expired finished entries.  Returns how many were removed.
    /// Invoked by the background sweeper; safe to call directly.
    pub fn sweep(&self) -> usize {
        let ttl = self.config.retention();
        let mut state = self.state.write();
        state.finished_runs.purge_expired(ttl)
            + state.finished_messages.purge_expired(ttl)
            + state.finished_tools.purge_expired(ttl)
    }

    /// Drop all lifecycle state.  Metrics survive.
    pub fn reset(&self) {
        let mut state = self.state.write();
        *state = ValidationState::new(self.config.max_finished_entries);
    }

    pub fn stats(&self) -> ValidatorStats {
        let (active, finished) = {
            let state = self.state.read();
            (state.active_runs.len(), state.finished_runs.len())
        };
        self.metrics.snapshot(active, finished)
    }

    /// Number of in-flight runs.
    pub fn active_run_count(&self) -> usize {
        self.state.read().active_runs.len()
    }

    /// Whether a run ID is in the finished set.
    pub fn is_run_finished(&self, run_id: &str) -> bool {
        self.state.read().finished_runs.contains(run_id)
    }

    pub fn config(&self) -> &ValidatorConfig {
        &self.config
    }
}

/// Under Development/Testing/Permissive, empty protocol IDs are tolerated.
fn is_relaxed_under_lenient_ids(err: &ValidationError) -> bool {
    err.kind == ValidationErrorKind::EmptyField && err.field.ends_with("Id")
}

fn structural_to_sequence(err: ValidationError, ty: EventType) -> SequenceError {
    let kind = match err.kind {
        ValidationErrorKind::UnknownEvent => SequenceErrorKind::UnknownEvent,
        ValidationErrorKind::EmptyField if err.field.ends_with("Id") => SequenceErrorKind::MissingId,
        _ => SequenceErrorKind::InvalidField,
    };
    SequenceError::new(kind, ty, None, err.to_string())
}
