//! Step tracing
//!
//! A traced run executes the same harness as a plain run, in trace mode: the
//! harness installs a `sys.settrace` hook and writes one record per step on
//! its stdout. [`collector::TraceCollector`] turns those lines into
//! [`TraceStep`]s and signals the supervisor once the step ceiling is hit.

pub mod collector;
pub mod value;

pub use self::value::{SequenceKind, TraceValue};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// What the interpreter was doing when a step was recorded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepEvent {
    Line,
    Call,
    Return,
    Exception,
}

/// One entry of the call stack, innermost last
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StackFrame {
    pub function_name: String,
    pub file_label: String,
    pub line: u32,
}

/// One observation point of a traced run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceStep {
    pub line: u32,
    pub event: StepEvent,
    /// Bindings of the current function scope (empty at module level)
    pub locals: BTreeMap<String, TraceValue>,
    /// Module-level bindings
    pub globals: BTreeMap<String, TraceValue>,
    pub call_stack: Vec<StackFrame>,
    /// Text printed since the previous step
    pub stdout_delta: String,
}

/// Result of a traced run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionTrace {
    pub steps: Vec<TraceStep>,
    pub total_steps: usize,
    /// The step ceiling or the trace byte budget was hit before the
    /// program finished
    pub truncated: bool,
    /// Program stdout was cut at the output cap; steps are all still present
    pub stdout_truncated: bool,
    /// Exit code of the process, or `-signal` if it was killed
    pub exit_code: i32,
    /// Sanitized error text when the program failed or timed out
    pub error: Option<String>,
    pub timed_out: bool,
    pub execution_time_ms: u64,
}

impl ExecutionTrace {
    /// Everything the program printed, reassembled from the step deltas
    #[must_use]
    pub fn stdout(&self) -> String {
        self.steps.iter().map(|s| s.stdout_delta.as_str()).collect()
    }

    /// Lines visited, in order
    pub fn lines(&self) -> impl Iterator<Item = u32> + '_ {
        self.steps.iter().map(|s| s.line)
    }
}
