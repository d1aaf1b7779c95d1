//! Escalating termination (SIGTERM, grace period, SIGKILL)
//!
//! Kept as a plain state value so the transitions can be tested without a
//! process: the supervisor feeds it timer, step-ceiling and exit inputs and
//! carries out the [`Directive`] it returns.

use nix::errno::Errno;
use nix::sys::signal::{Signal, killpg};
use nix::unistd::Pid;
use std::time::{Duration, Instant};

/// Why the engine stopped a unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopCause {
    Timeout,
    StepCeiling,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Running { deadline: Instant },
    /// SIGTERM sent, SIGKILL due at `kill_at`
    Terminating { cause: StopCause, kill_at: Instant },
    Killed { cause: StopCause },
    Exited,
}

/// Action the supervisor must take after an input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directive {
    Wait,
    /// Send SIGTERM to the unit's process group
    Terminate,
    /// Send SIGKILL to the unit's process group
    Kill,
}

#[derive(Debug, Clone)]
pub struct Termination {
    phase: Phase,
    grace: Duration,
    cause: Option<StopCause>,
}

impl Termination {
    #[must_use]
    pub const fn new(deadline: Instant, grace: Duration) -> Self {
        Self {
            phase: Phase::Running { deadline },
            grace,
            cause: None,
        }
    }

    #[must_use]
    pub const fn phase(&self) -> Phase {
        self.phase
    }

    /// Set once the engine decided to stop the unit; survives the exit
    #[must_use]
    pub const fn cause(&self) -> Option<StopCause> {
        self.cause
    }

    #[must_use]
    pub const fn is_running(&self) -> bool {
        matches!(self.phase, Phase::Running { .. })
    }

    /// Next instant at which [`on_timer`](Self::on_timer) has work to do
    #[must_use]
    pub const fn wakeup(&self) -> Option<Instant> {
        match self.phase {
            Phase::Running { deadline } => Some(deadline),
            Phase::Terminating { kill_at, .. } => Some(kill_at),
            Phase::Killed { .. } | Phase::Exited => None,
        }
    }

    pub fn on_timer(&mut self, now: Instant) -> Directive {
        match self.phase {
            Phase::Running { deadline } if now >= deadline => {
                self.begin(StopCause::Timeout, now)
            }
            Phase::Terminating { cause, kill_at } if now >= kill_at => {
                self.phase = Phase::Killed { cause };
                Directive::Kill
            }
            _ => Directive::Wait,
        }
    }

    pub fn on_step_ceiling(&mut self, now: Instant) -> Directive {
        match self.phase {
            Phase::Running { .. } => self.begin(StopCause::StepCeiling, now),
            _ => Directive::Wait,
        }
    }

    pub fn on_exit(&mut self) {
        self.phase = Phase::Exited;
    }

    fn begin(&mut self, cause: StopCause, now: Instant) -> Directive {
        self.cause = Some(cause);
        self.phase = Phase::Terminating {
            cause,
            kill_at: now + self.grace,
        };
        Directive::Terminate
    }
}

/// Deliver a directive to a whole process group
pub fn enforce(pgid: Pid, directive: Directive) {
    match directive {
        Directive::Wait => {}
        Directive::Terminate => signal_group(pgid, Signal::SIGTERM),
        Directive::Kill => signal_group(pgid, Signal::SIGKILL),
    }
}

/// Signal a process group; an already-empty group is not an error
pub fn signal_group(pgid: Pid, signal: Signal) {
    match killpg(pgid, signal) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => tracing::warn!(
            pgid = pgid.as_raw(),
            ?signal,
            error = %e,
            "failed to signal process group"
        ),
    }
}
