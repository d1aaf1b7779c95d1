//! Decoding of harness trace records

use super::{StackFrame, StepEvent, TraceStep, TraceValue};
use crate::config::ValueLimits;
use serde::Deserialize;
use std::collections::BTreeMap;

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum Record {
    Step(RawStep),
    /// The harness wanted to emit one more step than allowed
    Truncated,
    /// Text printed after the last step
    Output {
        text: String,
        #[serde(default)]
        stdout_truncated: bool,
    },
}

#[derive(Debug, Deserialize)]
struct RawStep {
    line: u32,
    event: StepEvent,
    #[serde(default)]
    locals: BTreeMap<String, TraceValue>,
    #[serde(default)]
    globals: BTreeMap<String, TraceValue>,
    #[serde(default)]
    stack: Vec<RawFrame>,
    #[serde(default)]
    stdout: String,
    /// The harness ran out of stdout budget at or before this step
    #[serde(default)]
    stdout_truncated: bool,
}

#[derive(Debug, Deserialize)]
struct RawFrame {
    function: String,
    file: String,
    line: u32,
}

/// What the reader should do after a line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    /// The ceiling was just reached; the unit should be stopped
    CeilingReached,
}

/// Steps decoded so far
#[derive(Debug, Default)]
pub struct CollectedTrace {
    pub steps: Vec<TraceStep>,
    pub truncated: bool,
    /// Program stdout went past its budget and was cut
    pub stdout_truncated: bool,
    /// Lines that carried the record prefix but did not decode
    pub malformed: usize,
}

#[derive(Debug)]
pub struct TraceCollector {
    /// Record prefix including this job's token
    prefix: String,
    max_steps: usize,
    limits: ValueLimits,
    trace: CollectedTrace,
    /// Output seen outside any record, credited to the next step
    pending_stdout: String,
}

impl TraceCollector {
    #[must_use]
    pub fn new(prefix: String, max_steps: u64, limits: ValueLimits) -> Self {
        Self {
            prefix,
            max_steps: usize::try_from(max_steps).unwrap_or(usize::MAX),
            limits,
            trace: CollectedTrace::default(),
            pending_stdout: String::new(),
        }
    }

    #[must_use]
    pub fn steps(&self) -> &[TraceStep] {
        &self.trace.steps
    }

    #[must_use]
    pub const fn is_truncated(&self) -> bool {
        self.trace.truncated
    }

    /// Feed one stdout line, including its trailing newline if it had one
    pub fn accept_line(&mut self, line: &str) -> Flow {
        if self.trace.truncated {
            return Flow::Continue;
        }

        // Unterminated raw output may sit in front of a record.
        let Some(at) = line.find(self.prefix.as_str()) else {
            self.pending_stdout.push_str(line);
            return Flow::Continue;
        };
        self.pending_stdout.push_str(&line[..at]);
        let payload = &line[at + self.prefix.len()..];

        match serde_json::from_str::<Record>(payload.trim_end()) {
            Ok(Record::Step(raw)) => self.push_step(raw),
            Ok(Record::Truncated) => self.truncate(),
            Ok(Record::Output {
                text,
                stdout_truncated,
            }) => {
                self.pending_stdout.push_str(&text);
                self.trace.stdout_truncated |= stdout_truncated;
                Flow::Continue
            }
            Err(e) => {
                tracing::warn!(error = %e, "undecodable trace record");
                self.trace.malformed += 1;
                Flow::Continue
            }
        }
    }

    /// Close out the trace, crediting trailing output to the last step
    #[must_use]
    pub fn finish(&mut self) -> CollectedTrace {
        let pending = std::mem::take(&mut self.pending_stdout);
        if let Some(last) = self.trace.steps.last_mut() {
            last.stdout_delta.push_str(&pending);
        }
        std::mem::take(&mut self.trace)
    }

    fn push_step(&mut self, raw: RawStep) -> Flow {
        if self.trace.steps.len() >= self.max_steps {
            return self.truncate();
        }

        let limits = &self.limits;
        let bound = |vars: BTreeMap<String, TraceValue>| -> BTreeMap<String, TraceValue> {
            vars.into_iter()
                .map(|(name, value)| (name, value.bounded(limits)))
                .collect()
        };

        let mut stdout_delta = std::mem::take(&mut self.pending_stdout);
        stdout_delta.push_str(&raw.stdout);
        self.trace.stdout_truncated |= raw.stdout_truncated;

        self.trace.steps.push(TraceStep {
            line: raw.line,
            event: raw.event,
            locals: bound(raw.locals),
            globals: bound(raw.globals),
            call_stack: raw
                .stack
                .into_iter()
                .map(|f| StackFrame {
                    function_name: f.function,
                    file_label: f.file,
                    line: f.line,
                })
                .collect(),
            stdout_delta,
        });
        Flow::Continue
    }

    /// Stop accepting records; later lines are ignored
    pub fn truncate(&mut self) -> Flow {
        self.trace.truncated = true;
        self.pending_stdout.clear();
        Flow::CeilingReached
    }
}
