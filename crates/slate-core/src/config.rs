//! Engine configuration

use crate::{Result, SlateError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration for an [`Engine`](crate::Engine)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// How execution units are launched
    pub sandbox: SandboxConfig,

    /// Request size and cost ceilings
    pub limits: RequestLimits,

    /// Bounds applied to traced variable snapshots
    pub trace: ValueLimits,

    /// Session backend warm-up
    pub sessions: SessionConfig,

    /// Error text redaction
    pub sanitizer: SanitizerConfig,
}

impl EngineConfig {
    /// Load a JSON config file (missing fields take defaults), then apply
    /// environment overrides. `None` starts from defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path).map_err(|e| {
                    SlateError::Config(format!("cannot read {}: {e}", path.display()))
                })?;
                serde_json::from_str(&raw).map_err(|e| {
                    SlateError::Config(format!("cannot parse {}: {e}", path.display()))
                })?
            }
            None => Self::default(),
        };
        config.apply_env();
        config.check()?;
        Ok(config)
    }

    /// Apply `SLATE_PYTHON` if set
    pub fn apply_env(&mut self) {
        if let Some(python) = std::env::var_os("SLATE_PYTHON") {
            self.sandbox.python_path = PathBuf::from(python);
        }
    }

    /// Reject configurations that cannot produce a usable engine
    pub fn check(&self) -> Result<()> {
        let limits = &self.limits;
        if limits.max_timeout < Duration::from_millis(1) {
            return Err(SlateError::Config("limits.max_timeout must be at least 1 ms".into()));
        }
        if limits.default_timeout > limits.max_timeout {
            return Err(SlateError::Config(
                "limits.default_timeout exceeds limits.max_timeout".into(),
            ));
        }
        if limits.max_steps == 0 || limits.default_max_steps > limits.max_steps {
            return Err(SlateError::Config(
                "limits.default_max_steps must be within 1..=limits.max_steps".into(),
            ));
        }
        if self.sandbox.main_file.is_empty() || self.sandbox.main_file.contains('/') {
            return Err(SlateError::Config(format!(
                "sandbox.main_file {:?} must be a plain file name",
                self.sandbox.main_file
            )));
        }
        if self.sanitizer.placeholder.is_empty() {
            return Err(SlateError::Config("sanitizer.placeholder must not be empty".into()));
        }
        Ok(())
    }
}

/// Configuration for launching one execution unit
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Path to Python interpreter (bare names are looked up on the host `PATH`)
    pub python_path: PathBuf,

    /// Parent directory for per-unit private directories
    pub work_root: PathBuf,

    /// File name the submitted code is written to
    pub main_file: String,

    /// Environment variables (the host environment is never inherited)
    pub env: Vec<(String, String)>,

    /// How long an interpreter may take to report ready
    pub startup_timeout: Duration,

    /// Delay between SIGTERM and SIGKILL
    pub termination_grace: Duration,

    /// Cap on captured stdout and on captured stderr, each. In trace mode
    /// this bounds a single record line.
    pub max_output_bytes: usize,

    /// Total trace stream a unit may produce before it is cut short
    pub max_trace_bytes: usize,

    /// Address space limit in bytes (0 = unlimited)
    pub memory_limit: u64,

    /// CPU time limit in seconds (0 = unlimited)
    pub cpu_time_limit: u64,

    /// Largest file the unit may write, in bytes (0 = unlimited)
    pub file_size_limit: u64,

    /// Maximum open file descriptors (0 = unlimited)
    pub open_files_limit: u64,

    /// Run each unit in fresh user + network namespaces
    pub isolate_network: bool,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            python_path: PathBuf::from("python3"),
            work_root: std::env::temp_dir(),
            main_file: "main.py".into(),
            env: vec![
                ("PATH".into(), "/usr/local/bin:/usr/bin:/bin".into()),
                ("LANG".into(), "C.UTF-8".into()),
            ],
            startup_timeout: Duration::from_secs(10),
            termination_grace: Duration::from_secs(1),
            max_output_bytes: 1024 * 1024,
            max_trace_bytes: 64 * 1024 * 1024,
            memory_limit: 1024 * 1024 * 1024, // 1GB
            cpu_time_limit: 31,
            file_size_limit: 8 * 1024 * 1024,
            open_files_limit: 256,
            isolate_network: false,
        }
    }
}

impl SandboxConfig {
    /// Create a new config builder
    #[must_use]
    pub fn builder() -> SandboxConfigBuilder {
        SandboxConfigBuilder::default()
    }
}

/// Builder for SandboxConfig
#[derive(Debug, Default)]
pub struct SandboxConfigBuilder {
    config: SandboxConfig,
}

impl SandboxConfigBuilder {
    #[must_use]
    pub fn python_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.python_path = path.into();
        self
    }

    #[must_use]
    pub fn work_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.work_root = path.into();
        self
    }

    #[must_use]
    pub fn memory_limit(mut self, bytes: u64) -> Self {
        self.config.memory_limit = bytes;
        self
    }

    #[must_use]
    pub fn memory_limit_mb(self, mb: u64) -> Self {
        self.memory_limit(mb * 1024 * 1024)
    }

    #[must_use]
    pub fn cpu_time_limit_secs(mut self, secs: u64) -> Self {
        self.config.cpu_time_limit = secs;
        self
    }

    #[must_use]
    pub fn startup_timeout(mut self, duration: Duration) -> Self {
        self.config.startup_timeout = duration;
        self
    }

    #[must_use]
    pub fn termination_grace(mut self, duration: Duration) -> Self {
        self.config.termination_grace = duration;
        self
    }

    #[must_use]
    pub fn max_output_bytes(mut self, bytes: usize) -> Self {
        self.config.max_output_bytes = bytes;
        self
    }

    #[must_use]
    pub fn max_trace_bytes(mut self, bytes: usize) -> Self {
        self.config.max_trace_bytes = bytes;
        self
    }

    #[must_use]
    pub fn isolate_network(mut self, isolate: bool) -> Self {
        self.config.isolate_network = isolate;
        self
    }

    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.env.push((key.into(), value.into()));
        self
    }

    #[must_use]
    pub fn build(self) -> SandboxConfig {
        self.config
    }
}

/// Size and cost ceilings enforced by the validator
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestLimits {
    pub max_code_bytes: usize,
    pub max_stdin_bytes: usize,
    pub max_attached_files: usize,
    /// Aggregate size of all attached file contents
    pub max_attached_bytes: usize,
    pub default_timeout: Duration,
    pub max_timeout: Duration,
    pub default_max_steps: u64,
    /// Ceiling that larger `max_steps` requests are clamped to
    pub max_steps: u64,
}

impl Default for RequestLimits {
    fn default() -> Self {
        Self {
            max_code_bytes: 64 * 1024,
            max_stdin_bytes: 64 * 1024,
            max_attached_files: 16,
            max_attached_bytes: 256 * 1024,
            default_timeout: Duration::from_secs(5),
            max_timeout: Duration::from_secs(30),
            default_max_steps: 1_000,
            max_steps: 10_000,
        }
    }
}

/// Bounds for snapshotting a traced value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValueLimits {
    /// Nesting depth beyond which containers become placeholders
    pub max_depth: usize,
    /// Items kept per container
    pub max_items: usize,
    /// Characters kept per string
    pub max_string: usize,
}

impl Default for ValueLimits {
    fn default() -> Self {
        Self {
            max_depth: 3,
            max_items: 50,
            max_string: 200,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Idle interpreters kept ready per prepared session
    pub warm_units: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self { warm_units: 1 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SanitizerConfig {
    /// Label substituted for private directory paths
    pub placeholder: String,
}

impl Default for SanitizerConfig {
    fn default() -> Self {
        Self {
            placeholder: "<sandbox>".into(),
        }
    }
}
