//! # slate-core
//!
//! Execution engine for untrusted, student-authored Python code.
//!
//! - [`Engine::run`] executes code to completion under a wall-clock timeout
//! - [`Engine::trace`] executes it under a step tracer with a step ceiling
//! - [`Engine::prepare_for_session`] keeps warm interpreters per session
//!
//! Every call gets its own interpreter process in its own process group and
//! private directory. The unit is always reaped before the call returns.

#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod engine;
pub mod error;
pub mod harness;
pub mod report;
pub mod request;
pub mod result;
pub mod sandbox;
pub mod sanitize;
pub mod session;
pub mod trace;
pub mod validate;

pub use config::{EngineConfig, SandboxConfig};
pub use engine::Engine;
pub use error::{SlateError, ValidationError};
pub use request::{AttachedFile, ExecutionRequest, SessionId};
pub use result::ExecutionResult;
pub use session::BackendState;
pub use trace::{ExecutionTrace, StackFrame, StepEvent, TraceStep, TraceValue};

/// Crate-level result type
pub type Result<T> = std::result::Result<T, SlateError>;
