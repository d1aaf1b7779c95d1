//! The execution engine: validation, unit acquisition, run and trace

use crate::config::EngineConfig;
use crate::harness::Mode;
use crate::report;
use crate::request::{ExecutionRequest, SessionId};
use crate::result::ExecutionResult;
use crate::sandbox::{self, Execution, ProcessSpawner, SandboxUnit, Spawner};
use crate::sanitize::Sanitizer;
use crate::session::{BackendState, SessionRegistry};
use crate::trace::ExecutionTrace;
use crate::validate::{ValidatedRequest, Validator};
use crate::Result;
use std::sync::Arc;

/// Runs and traces untrusted code, one fresh unit per call
///
/// Calls are independent and may run concurrently; only the session
/// registry is shared between them.
pub struct Engine {
    config: Arc<EngineConfig>,
    spawner: Arc<dyn Spawner>,
    validator: Validator,
    sanitizer: Sanitizer,
    sessions: SessionRegistry,
}

impl Engine {
    /// Create an engine that starts local interpreter processes
    pub fn new(config: EngineConfig) -> Result<Self> {
        Self::with_spawner(config, Arc::new(ProcessSpawner))
    }

    pub fn with_spawner(config: EngineConfig, spawner: Arc<dyn Spawner>) -> Result<Self> {
        config.check()?;
        let config = Arc::new(config);
        let validator = Validator::new(config.limits.clone(), config.sandbox.main_file.clone());
        let sanitizer = Sanitizer::new(config.sanitizer.placeholder.clone(), &config.sandbox.work_root)?;
        let sessions = SessionRegistry::new(Arc::clone(&spawner), Arc::clone(&config));

        tracing::debug!(
            python = ?config.sandbox.python_path,
            work_root = ?config.sandbox.work_root,
            "engine created"
        );

        Ok(Self {
            config,
            spawner,
            validator,
            sanitizer,
            sessions,
        })
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Check a request without running it
    pub fn validate(&self, request: ExecutionRequest) -> Result<ValidatedRequest> {
        Ok(self.validator.validate(request)?)
    }

    /// Run code to completion under the request's limits
    ///
    /// Timeouts and failing programs are reported in the result. Only
    /// invalid requests and units that cannot be started are errors.
    pub async fn run(&self, request: ExecutionRequest) -> Result<ExecutionResult> {
        let request = self.validate(request)?;
        let execution = self.execute(Mode::Run, &request).await?;
        let result = report::run_result(execution, &self.sanitizer, request.timeout());
        tracing::info!(
            success = result.success,
            exit_code = result.exit_code,
            timed_out = result.timed_out,
            elapsed_ms = result.execution_time_ms,
            "run finished"
        );
        Ok(result)
    }

    /// Run code under the step tracer
    pub async fn trace(&self, request: ExecutionRequest) -> Result<ExecutionTrace> {
        let request = self.validate(request)?;
        let execution = self.execute(Mode::Trace, &request).await?;
        let trace = report::trace_result(execution, &self.sanitizer, request.timeout());
        tracing::info!(
            steps = trace.total_steps,
            truncated = trace.truncated,
            exit_code = trace.exit_code,
            timed_out = trace.timed_out,
            elapsed_ms = trace.execution_time_ms,
            "trace finished"
        );
        Ok(trace)
    }

    /// Warm a backend for the session; failures only cost latency later
    pub async fn prepare_for_session(&self, session: &SessionId) {
        self.sessions.prepare(session).await;
    }

    /// Release the session's backend; unknown sessions are ignored
    pub async fn cleanup_session(&self, session: &SessionId) {
        self.sessions.cleanup(session).await;
    }

    #[must_use]
    pub fn session_state(&self, session: &SessionId) -> Option<BackendState> {
        self.sessions.state(session)
    }

    #[must_use]
    pub fn active_sessions(&self) -> Vec<SessionId> {
        self.sessions.active_sessions()
    }

    /// Tear down every session backend
    pub async fn shutdown(&self) {
        self.sessions.cleanup_all().await;
    }

    async fn execute(&self, mode: Mode, request: &ValidatedRequest) -> Result<Execution> {
        let unit = self.acquire(request.request().session_id()).await?;
        sandbox::execute(unit, mode, request, &self.config).await
    }

    /// A ready unit: the session's warm one if it has one, else a cold spawn
    async fn acquire(&self, session: Option<&SessionId>) -> Result<SandboxUnit> {
        let startup = self.config.sandbox.startup_timeout;

        if let Some(session) = session {
            if let Some(mut unit) = self.sessions.checkout(session).await {
                match unit.await_ready(startup).await {
                    Ok(()) => return Ok(unit),
                    Err(e) => {
                        tracing::warn!(%session, unit_id = unit.id, error = %e, "warm unit unusable, starting cold");
                        unit.terminate().await;
                    }
                }
            }
        }

        let mut unit = self.spawner.spawn(&self.config.sandbox)?;
        if let Err(e) = unit.await_ready(startup).await {
            unit.terminate().await;
            return Err(e);
        }
        Ok(unit)
    }
}
