//! Execution units: one interpreter process per job
//!
//! - `unit` - spawning a unit and its readiness handshake
//! - `supervisor` - feeding a job, capturing output, timeouts, reaping
//! - `termination` - the SIGTERM/SIGKILL escalation state machine
//! - `isolation` - rlimits and namespaces applied before exec
//! - `workdir` - the unit's private directory

pub mod isolation;
pub mod supervisor;
pub mod termination;
pub mod unit;
pub mod workdir;

pub use self::supervisor::{Execution, Output, execute};
pub use self::termination::StopCause;
pub use self::unit::SandboxUnit;

use crate::Result;
use crate::config::SandboxConfig;

/// Source of fresh execution units
///
/// The engine and session backends only create units through this seam, so
/// callers can count or refuse spawns.
pub trait Spawner: Send + Sync {
    fn spawn(&self, config: &SandboxConfig) -> Result<SandboxUnit>;
}

/// Starts a local interpreter process per unit
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessSpawner;

impl Spawner for ProcessSpawner {
    fn spawn(&self, config: &SandboxConfig) -> Result<SandboxUnit> {
        SandboxUnit::spawn(config)
    }
}
