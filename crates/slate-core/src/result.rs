//! Execution result types

use serde::{Deserialize, Serialize};

/// Result of a plain sandboxed run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    /// Exit code 0, nothing on stderr, no timeout
    pub success: bool,

    /// Standard output, exactly as produced (up to the output cap)
    pub stdout: String,

    /// Sanitized error text, empty on success
    pub error: String,

    /// Wall-clock time from handing over the job to process exit
    pub execution_time_ms: u64,

    /// Exit code of the process, or `-signal` if it was killed
    pub exit_code: i32,

    /// Whether the process was killed due to timeout
    pub timed_out: bool,

    /// Whether stdout hit the capture cap
    pub stdout_truncated: bool,
}

impl ExecutionResult {
    /// Get stdout split into lines
    pub fn stdout_lines(&self) -> impl Iterator<Item = &str> {
        self.stdout.lines()
    }
}

impl Default for ExecutionResult {
    fn default() -> Self {
        Self {
            success: false,
            stdout: String::new(),
            error: String::new(),
            execution_time_ms: 0,
            exit_code: -1,
            timed_out: false,
            stdout_truncated: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_camel_case() {
        let result = ExecutionResult {
            success: true,
            stdout: "Hello\n".into(),
            exit_code: 0,
            ..ExecutionResult::default()
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["stdout"], "Hello\n");
        assert_eq!(json["exitCode"], 0);
        assert_eq!(json["executionTimeMs"], 0);
        assert_eq!(json["stdoutTruncated"], false);
    }
}
