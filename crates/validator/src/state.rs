//! Mutable bookkeeping owned by the sequence validator.

use std::collections::{HashMap, HashSet};
use std::time::Instant;

use crate::lru::BoundedLruSet;

/// An in-flight run.
#[derive(Debug, Clone)]
pub struct RunState {
    pub thread_id: String,
    pub started_at: Instant,
    /// LIFO stack of step names opened within this run.
    pub step_stack: Vec<String>,
    pub open_messages: HashSet<String>,
    pub open_tools: HashSet<String>,
}

/// An in-flight streaming text message.
#[derive(Debug, Clone)]
pub struct MessageState {
    /// The run that owned the stream when it started, if any was active.
    pub run_id: Option<String>,
    pub started_at: Instant,
    pub last_delta_at: Option<Instant>,
}

/// An in-flight streaming tool call.
#[derive(Debug, Clone)]
pub struct ToolState {
    pub run_id: Option<String>,
    pub parent_message_id: Option<String>,
    pub started_at: Instant,
    /// Concatenation of the argument deltas seen so far; checked for JSON
    /// well-formedness at `TOOL_CALL_END`.
    pub args: String,
}

/// All mutable validator state.  Mutated only under the writer lock inside
/// `SequenceValidator::validate`.
pub struct ValidationState {
    pub active_runs: HashMap<String, RunState>,
    /// Start order of active runs; the last entry is the "current" run
    /// that new steps, messages, and tools bind to.
    pub run_order: Vec<String>,
    pub active_steps: HashMap<String, Instant>,
    pub active_messages: HashMap<String, MessageState>,
    pub active_tools: HashMap<String, ToolState>,
    pub finished_runs: BoundedLruSet,
    pub finished_messages: BoundedLruSet,
    pub finished_tools: BoundedLruSet,
}

impl ValidationState {
    pub fn new(max_finished_entries: usize) -> Self {
        Self {
            active_runs: HashMap::new(),
            run_order: Vec::new(),
            active_steps: HashMap::new(),
            active_messages: HashMap::new(),
            active_tools: HashMap::new(),
            finished_runs: BoundedLruSet::new(max_finished_entries),
            finished_messages: BoundedLruSet::new(max_finished_entries),
            finished_tools: BoundedLruSet::new(max_finished_entries),
        }
    }

    /// The run new lifecycle children bind to: the most recently started
    /// run that is still active.
    pub fn current_run(&self) -> Option<&str> {
        self.run_order.last().map(String::as_str)
    }

    /// Remove a run from the active maps along with its open children.
    /// Returns the IDs of the messages and tools that were still open.
    pub fn close_run(&mut self, run_id: &str) -> (Vec<String>, Vec<String>) {
        self.run_order.retain(|r| r != run_id);
        let Some(run) = self.active_runs.remove(run_id) else {
            return (Vec::new(), Vec::new());
        };
        for step in &run.step_stack {
            self.active_steps.remove(step);
        }
        let mut open_messages: Vec<String> = run.open_messages.into_iter().collect();
        let mut open_tools: Vec<String> = run.open_tools.into_iter().collect();
        open_messages.sort();
        open_tools.sort();
        for id in &open_messages {
            self.active_messages.remove(id);
            self.finished_messages.insert(id.clone());
        }
        for id in &open_tools {
            self.active_tools.remove(id);
            self.finished_tools.insert(id.clone());
        }
        (open_messages, open_tools)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(thread: &str) -> RunState {
        RunState {
            thread_id: thread.into(),
            started_at: Instant::now(),
            step_stack: Vec::new(),
            open_messages: HashSet::new(),
            open_tools: HashSet::new(),
        }
    }

    #[test]
    fn current_run_is_most_recent() {
        let mut s = ValidationState::new(16);
        s.active_runs.insert("run_1".into(), run("t"));
        s.run_order.push("run_1".into());
        s.active_runs.insert("run_2".into(), run("t"));
        s.run_order.push("run_2".into());
        assert_eq!(s.current_run(), Some("run_2"));
    }

    #[test]
    fn close_run_reports_open_children() {
        let mut s = ValidationState::new(16);
        let mut r = run("t");
        r.open_messages.insert("msg_1".into());
        r.open_tools.insert("tool_1".into());
        r.step_stack.push("plan".into());
        s.active_runs.insert("run_1".into(), r);
        s.run_order.push("run_1".into());
        s.active_steps.insert("plan".into(), Instant::now());
        s.active_messages.insert(
            "msg_1".into(),
            MessageState {
                run_id: Some("run_1".into()),
                started_at: Instant::now(),
                last_delta_at: None,
            },
        );
        s.active_tools.insert(
            "tool_1".into(),
            ToolState {
                run_id: Some("run_1".into()),
                parent_message_id: None,
                started_at: Instant::now(),
                args: String::new(),
            },
        );

        let (messages, tools) = s.close_run("run_1");
        assert_eq!(messages, vec!["msg_1"]);
        assert_eq!(tools, vec!["tool_1"]);
        assert!(s.active_runs.is_empty());
        assert!(s.active_steps.is_empty());
        assert!(s.active_messages.is_empty());
        assert!(s.active_tools.is_empty());
        assert!(s.finished_messages.contains("msg_1"));
        assert!(s.finished_tools.contains("tool_1"));
        assert_eq!(s.current_run(), None);
    }

    #[test]
    fn close_unknown_run_is_a_no_op() {
        let mut s = ValidationState::new(16);
        let (messages, tools) = s.close_run("run_missing");
        assert!(messages.is_empty());
        assert!(tools.is_empty());
    }
}
