use super::isolation::ChildSetup;
use super::termination::signal_group;
use super::workdir::Workdir;
use crate::config::SandboxConfig;
use crate::harness::{BOOTSTRAP, READY_MARKER};
use crate::request::AttachedFile;
use crate::{Result, SlateError};
use nix::sys::signal::Signal;
use nix::unistd::Pid;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};

static NEXT_UNIT_ID: AtomicU64 = AtomicU64::new(1);

/// One interpreter process plus its private directory
///
/// A unit runs exactly one job. It is either handed a job right after
/// spawning (cold) or parked idle in a session backend until needed (warm).
#[derive(Debug)]
pub struct SandboxUnit {
    pub id: u64,
    pid: Pid,
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    stderr: ChildStderr,
    workdir: Workdir,
    ready: bool,
}

/// A unit taken apart for supervision
#[derive(Debug)]
pub struct UnitParts {
    pub id: u64,
    pub pid: Pid,
    pub child: Child,
    pub stdin: ChildStdin,
    pub stdout: BufReader<ChildStdout>,
    pub stderr: ChildStderr,
    pub workdir: Workdir,
}

impl SandboxUnit {
    pub fn spawn(config: &SandboxConfig) -> Result<Self> {
        let id = NEXT_UNIT_ID.fetch_add(1, Ordering::Relaxed);
        let program = resolve_program(&config.python_path).ok_or_else(|| {
            SlateError::Spawn(format!(
                "interpreter {} not found",
                config.python_path.display()
            ))
        })?;
        let workdir = Workdir::create(&config.work_root)?;

        let mut cmd = Command::new(&program);
        cmd.args(["-u", "-s", "-B", "-c", BOOTSTRAP])
            .current_dir(workdir.path())
            .env_clear()
            .envs(config.env.iter().map(|(k, v)| (k, v)))
            .env("HOME", workdir.path())
            .env("TMPDIR", workdir.path())
            .env("PYTHONHASHSEED", "0")
            .env("PYTHONIOENCODING", "utf-8")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .process_group(0);

        let setup = ChildSetup::from_config(config);
        // SAFETY: the hook runs between fork and exec and only calls
        // unshare(2) and setrlimit(2), both async-signal-safe.
        unsafe {
            cmd.pre_exec(move || setup.apply());
        }

        let mut child = cmd.spawn().map_err(|e| {
            SlateError::Spawn(format!("failed to start {}: {e}", program.display()))
        })?;

        let pid = child
            .id()
            .and_then(|raw| i32::try_from(raw).ok())
            .map(Pid::from_raw)
            .ok_or_else(|| SlateError::Spawn("unit exited before it could be tracked".into()))?;
        let (Some(stdin), Some(stdout), Some(stderr)) =
            (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            return Err(SlateError::Spawn("unit pipes were not captured".into()));
        };

        tracing::debug!(unit_id = id, pid = pid.as_raw(), dir = ?workdir.path(), "unit spawned");

        Ok(Self {
            id,
            pid,
            child,
            stdin,
            stdout: BufReader::new(stdout),
            stderr,
            workdir,
            ready: false,
        })
    }

    #[must_use]
    pub const fn pid(&self) -> Pid {
        self.pid
    }

    #[must_use]
    pub fn workdir(&self) -> &Path {
        self.workdir.path()
    }

    #[must_use]
    pub const fn is_ready(&self) -> bool {
        self.ready
    }

    /// Write the job's code and attached files into the unit's directory
    pub async fn materialize(&self, main_file: &str, code: &str, files: &[AttachedFile]) -> Result<()> {
        self.workdir.materialize(main_file, code, files).await
    }

    /// Wait for the interpreter to print its readiness marker
    pub async fn await_ready(&mut self, timeout: Duration) -> Result<()> {
        if self.ready {
            return Ok(());
        }

        let mut line = String::new();
        let read = tokio::time::timeout(timeout, self.stdout.read_line(&mut line))
            .await
            .map_err(|_| {
                SlateError::Spawn(format!("interpreter not ready after {timeout:?}"))
            })??;

        if read == 0 {
            return Err(SlateError::Spawn("interpreter exited during startup".into()));
        }
        if line.trim_end() != READY_MARKER {
            return Err(SlateError::Protocol(format!(
                "unexpected startup output {:?}",
                line.trim_end()
            )));
        }

        self.ready = true;
        tracing::debug!(unit_id = self.id, "unit ready");
        Ok(())
    }

    /// Whether the process is already gone (reaps it if so)
    pub fn has_exited(&mut self) -> bool {
        !matches!(self.child.try_wait(), Ok(None))
    }

    /// Kill the whole process group, reap the leader, remove the directory
    pub async fn terminate(mut self) {
        signal_group(self.pid, Signal::SIGKILL);
        match self.child.wait().await {
            Ok(status) => tracing::debug!(unit_id = self.id, %status, "unit reaped"),
            Err(e) => tracing::warn!(unit_id = self.id, error = %e, "failed to reap unit"),
        }
        self.workdir.close();
    }

    #[must_use]
    pub fn into_parts(self) -> UnitParts {
        UnitParts {
            id: self.id,
            pid: self.pid,
            child: self.child,
            stdin: self.stdin,
            stdout: self.stdout,
            stderr: self.stderr,
            workdir: self.workdir,
        }
    }
}

/// Find an executable; bare names are searched on the host `PATH`
fn resolve_program(program: &Path) -> Option<PathBuf> {
    if program.components().count() > 1 {
        return is_executable(program).then(|| program.to_path_buf());
    }
    let search = std::env::var_os("PATH")?;
    std::env::split_paths(&search)
        .map(|dir| dir.join(program))
        .find(|candidate| is_executable(candidate))
}

fn is_executable(path: &Path) -> bool {
    std::fs::metadata(path)
        .is_ok_and(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
}
