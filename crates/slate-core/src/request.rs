//! Execution request types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Identifier of a classroom session owning a warm backend
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for SessionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// A file placed in the unit's private directory before the code starts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachedFile {
    pub name: String,
    pub content: String,
}

impl AttachedFile {
    #[must_use]
    pub fn new(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
        }
    }
}

/// Request to run or trace a piece of code
///
/// Fields are read-only once built; use [`ExecutionRequest::builder`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRequest {
    code: String,
    #[serde(default)]
    stdin: String,
    #[serde(default)]
    random_seed: Option<i64>,
    #[serde(default)]
    attached_files: Vec<AttachedFile>,
    #[serde(default)]
    timeout_ms: Option<u64>,
    #[serde(default)]
    max_steps: Option<u64>,
    #[serde(default)]
    session_id: Option<SessionId>,
}

impl ExecutionRequest {
    /// Request with only code set
    #[must_use]
    pub fn new(code: impl Into<String>) -> Self {
        Self::builder(code).build()
    }

    #[must_use]
    pub fn builder(code: impl Into<String>) -> ExecutionRequestBuilder {
        ExecutionRequestBuilder {
            request: Self {
                code: code.into(),
                stdin: String::new(),
                random_seed: None,
                attached_files: Vec::new(),
                timeout_ms: None,
                max_steps: None,
                session_id: None,
            },
        }
    }

    #[must_use]
    pub fn code(&self) -> &str {
        &self.code
    }

    #[must_use]
    pub fn stdin(&self) -> &str {
        &self.stdin
    }

    #[must_use]
    pub const fn random_seed(&self) -> Option<i64> {
        self.random_seed
    }

    #[must_use]
    pub fn attached_files(&self) -> &[AttachedFile] {
        &self.attached_files
    }

    /// Requested timeout, before clamping
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    /// Requested step cap, before clamping
    #[must_use]
    pub const fn max_steps(&self) -> Option<u64> {
        self.max_steps
    }

    #[must_use]
    pub const fn session_id(&self) -> Option<&SessionId> {
        self.session_id.as_ref()
    }
}

/// Builder for ExecutionRequest
#[derive(Debug)]
pub struct ExecutionRequestBuilder {
    request: ExecutionRequest,
}

impl ExecutionRequestBuilder {
    #[must_use]
    pub fn stdin(mut self, stdin: impl Into<String>) -> Self {
        self.request.stdin = stdin.into();
        self
    }

    #[must_use]
    pub const fn random_seed(mut self, seed: i64) -> Self {
        self.request.random_seed = Some(seed);
        self
    }

    #[must_use]
    pub fn file(mut self, name: impl Into<String>, content: impl Into<String>) -> Self {
        self.request
            .attached_files
            .push(AttachedFile::new(name, content));
        self
    }

    #[must_use]
    pub const fn timeout_ms(mut self, ms: u64) -> Self {
        self.request.timeout_ms = Some(ms);
        self
    }

    #[must_use]
    pub const fn max_steps(mut self, steps: u64) -> Self {
        self.request.max_steps = Some(steps);
        self
    }

    #[must_use]
    pub fn session(mut self, id: impl Into<SessionId>) -> Self {
        self.request.session_id = Some(id.into());
        self
    }

    #[must_use]
    pub fn build(self) -> ExecutionRequest {
        self.request
    }
}
