//! Turning a finished [`Execution`] into the caller-facing result types

use crate::result::ExecutionResult;
use crate::sandbox::{Execution, Output, StopCause};
use crate::sanitize::Sanitizer;
use crate::trace::ExecutionTrace;
use crate::trace::collector::CollectedTrace;
use std::time::Duration;

/// Build the result of a plain run
#[must_use]
pub fn run_result(execution: Execution, sanitizer: &Sanitizer, timeout: Duration) -> ExecutionResult {
    let (stdout, stdout_truncated) = match &execution.stdout {
        Output::Raw(buf) => (buf.to_string_lossy(), buf.overflowed()),
        Output::Trace(trace) => (joined_stdout(trace), trace.stdout_truncated),
    };
    let success =
        execution.exit_code == 0 && execution.stderr.is_empty() && execution.stop.is_none();

    ExecutionResult {
        success,
        stdout,
        error: error_text(&execution, sanitizer, timeout).unwrap_or_default(),
        execution_time_ms: millis(execution.elapsed),
        exit_code: execution.exit_code,
        timed_out: execution.stop == Some(StopCause::Timeout),
        stdout_truncated,
    }
}

/// Build the result of a traced run
#[must_use]
pub fn trace_result(execution: Execution, sanitizer: &Sanitizer, timeout: Duration) -> ExecutionTrace {
    let error = error_text(&execution, sanitizer, timeout);
    let collected = match execution.stdout {
        Output::Trace(trace) => trace,
        Output::Raw(_) => CollectedTrace::default(),
    };
    if collected.malformed > 0 {
        tracing::warn!(
            unit_id = execution.unit_id,
            malformed = collected.malformed,
            "trace records were dropped"
        );
    }

    ExecutionTrace {
        total_steps: collected.steps.len(),
        steps: collected.steps,
        truncated: collected.truncated,
        stdout_truncated: collected.stdout_truncated,
        exit_code: execution.exit_code,
        error,
        timed_out: execution.stop == Some(StopCause::Timeout),
        execution_time_ms: millis(execution.elapsed),
    }
}

/// Sanitized explanation of an abnormal end, if there was one
///
/// A unit stopped at the step ceiling is not a failure of the program, so its
/// signal exit does not count as an error.
fn error_text(execution: &Execution, sanitizer: &Sanitizer, timeout: Duration) -> Option<String> {
    let stderr = if execution.stderr.is_empty() {
        None
    } else {
        let raw = execution.stderr.to_string_lossy();
        Some(sanitizer.sanitize(&raw, Some(&execution.workdir)))
    };

    match (execution.stop, stderr) {
        (Some(StopCause::Timeout), stderr) => {
            let mut text = format!("Execution timed out after {} ms", millis(timeout));
            if let Some(stderr) = stderr {
                text.push('\n');
                text.push_str(&stderr);
            }
            Some(text)
        }
        (_, Some(stderr)) => Some(stderr),
        (None, None) if execution.exit_code != 0 => Some(format!(
            "Process exited with code {}",
            execution.exit_code
        )),
        _ => None,
    }
}

fn joined_stdout(trace: &CollectedTrace) -> String {
    trace.steps.iter().map(|s| s.stdout_delta.as_str()).collect()
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
