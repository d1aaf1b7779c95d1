//! Driving one job through a unit, from job hand-off to reaping

use super::termination::{Directive, StopCause, Termination, enforce, signal_group};
use super::unit::{SandboxUnit, UnitParts};
use crate::config::EngineConfig;
use crate::harness::{self, Job, Mode};
use crate::trace::collector::{CollectedTrace, Flow, TraceCollector};
use crate::validate::ValidatedRequest;
use crate::{Result, SlateError};
use nix::sys::signal::Signal;
use nix::unistd::Pid;
use parking_lot::Mutex;
use std::os::unix::process::ExitStatusExt;
use std::path::PathBuf;
use std::process::ExitStatus;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin};
use tokio::sync::Notify;
use tokio::task::JoinHandle;

/// How long readers may keep going after the process group is gone
const READER_LINGER: Duration = Duration::from_millis(500);

/// Byte buffer that stops growing at a fixed size
#[derive(Debug, Default)]
pub struct CappedBuffer {
    data: Vec<u8>,
    limit: usize,
    overflowed: bool,
}

impl CappedBuffer {
    #[must_use]
    pub const fn new(limit: usize) -> Self {
        Self {
            data: Vec::new(),
            limit,
            overflowed: false,
        }
    }

    pub fn push(&mut self, chunk: &[u8]) {
        let room = self.limit.saturating_sub(self.data.len());
        if chunk.len() > room {
            self.overflowed = true;
        }
        self.data.extend_from_slice(&chunk[..chunk.len().min(room)]);
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[must_use]
    pub const fn overflowed(&self) -> bool {
        self.overflowed
    }

    #[must_use]
    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(&self.data).into_owned()
    }
}

/// Captured stdout, shaped by the job mode
#[derive(Debug)]
pub enum Output {
    Raw(CappedBuffer),
    Trace(CollectedTrace),
}

/// Everything known about a finished job
#[derive(Debug)]
pub struct Execution {
    pub unit_id: u64,
    pub exit_code: i32,
    pub stop: Option<StopCause>,
    pub elapsed: Duration,
    pub stdout: Output,
    pub stderr: CappedBuffer,
    /// Directory the unit ran in (already removed), for redaction
    pub workdir: PathBuf,
}

enum Sink {
    Raw(Arc<Mutex<CappedBuffer>>),
    Trace(Arc<Mutex<TraceCollector>>),
}

/// Run one job on a ready unit and reap it
///
/// Returns only once the unit's leader is reaped and its process group has
/// been swept with SIGKILL, whichever way the job ended.
pub async fn execute(
    unit: SandboxUnit,
    mode: Mode,
    request: &ValidatedRequest,
    config: &EngineConfig,
) -> Result<Execution> {
    let sandbox = &config.sandbox;
    let submitted = request.request();

    let token = harness::new_token();
    let job = Job {
        mode,
        main: &sandbox.main_file,
        seed: submitted.random_seed(),
        max_steps: request.max_steps(),
        max_stdout: sandbox.max_output_bytes,
        token: &token,
        limits: config.trace,
    };
    let staged = match job.encode() {
        Ok(payload) => unit
            .materialize(&sandbox.main_file, submitted.code(), submitted.attached_files())
            .await
            .map(|()| payload),
        Err(e) => Err(SlateError::Protocol(format!("cannot encode job: {e}"))),
    };
    let mut payload = match staged {
        Ok(payload) => payload,
        Err(e) => {
            unit.terminate().await;
            return Err(e);
        }
    };
    payload.extend_from_slice(submitted.stdin().as_bytes());

    let UnitParts {
        id,
        pid,
        mut child,
        stdin,
        stdout,
        stderr,
        workdir,
    } = unit.into_parts();

    let ceiling = Arc::new(Notify::new());
    let stderr_buf = Arc::new(Mutex::new(CappedBuffer::new(sandbox.max_output_bytes)));
    let stderr_task = tokio::spawn(pump_raw(stderr, Arc::clone(&stderr_buf)));
    let (sink, stdout_task) = match mode {
        Mode::Run => {
            let buf = Arc::new(Mutex::new(CappedBuffer::new(sandbox.max_output_bytes)));
            let task = tokio::spawn(pump_raw(stdout, Arc::clone(&buf)));
            (Sink::Raw(buf), task)
        }
        Mode::Trace => {
            let collector = Arc::new(Mutex::new(TraceCollector::new(
                harness::record_prefix(&token),
                request.max_steps(),
                config.trace,
            )));
            let task = tokio::spawn(pump_trace(
                stdout,
                Arc::clone(&collector),
                Arc::clone(&ceiling),
                sandbox.max_trace_bytes,
            ));
            (Sink::Trace(collector), task)
        }
    };

    tracing::debug!(unit_id = id, ?mode, timeout = ?request.timeout(), "job started");
    let started = Instant::now();
    let writer = tokio::spawn(feed_stdin(stdin, payload, id));
    let supervised = supervise(
        &mut child,
        pid,
        request.timeout(),
        sandbox.termination_grace,
        &ceiling,
    )
    .await;
    let elapsed = started.elapsed();

    // Forked descendants may outlive the leader.
    signal_group(pid, Signal::SIGKILL);
    writer.abort();
    join_reader(stdout_task, id, "stdout").await;
    join_reader(stderr_task, id, "stderr").await;

    let (status, stop) = supervised?;
    let exit_code = exit_code(status);
    tracing::debug!(unit_id = id, exit_code, ?stop, ?elapsed, "job finished");

    let stdout = match sink {
        Sink::Raw(buf) => Output::Raw(std::mem::take(&mut *buf.lock())),
        Sink::Trace(collector) => Output::Trace(collector.lock().finish()),
    };
    let stderr = std::mem::take(&mut *stderr_buf.lock());
    // Resolve while the directory still exists; tracebacks carry the real path.
    let workdir_path = workdir
        .path()
        .canonicalize()
        .unwrap_or_else(|_| workdir.path().to_path_buf());
    workdir.close();

    Ok(Execution {
        unit_id: id,
        exit_code,
        stop,
        elapsed,
        stdout,
        stderr,
        workdir: workdir_path,
    })
}

/// Wait for exit while applying the deadline and step ceiling
async fn supervise(
    child: &mut Child,
    pid: Pid,
    timeout: Duration,
    grace: Duration,
    ceiling: &Notify,
) -> Result<(ExitStatus, Option<StopCause>)> {
    let mut termination = Termination::new(Instant::now() + timeout, grace);

    let status = loop {
        let wakeup = termination.wakeup();
        let directive = tokio::select! {
            status = child.wait() => break status?,
            () = sleep_until(wakeup) => termination.on_timer(Instant::now()),
            () = ceiling.notified(), if termination.is_running() => {
                termination.on_step_ceiling(Instant::now())
            }
        };
        if directive != Directive::Wait {
            tracing::debug!(pid = pid.as_raw(), ?directive, cause = ?termination.cause(), "stopping unit");
        }
        enforce(pid, directive);
    };

    termination.on_exit();
    Ok((status, termination.cause()))
}

async fn sleep_until(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at.into()).await,
        None => std::future::pending().await,
    }
}

async fn feed_stdin(mut stdin: ChildStdin, payload: Vec<u8>, unit_id: u64) {
    if let Err(e) = stdin.write_all(&payload).await {
        // The program may exit without reading all of its input.
        tracing::debug!(unit_id, error = %e, "stdin closed early");
        return;
    }
    if let Err(e) = stdin.shutdown().await {
        tracing::debug!(unit_id, error = %e, "failed to close stdin");
    }
}

async fn pump_raw<R>(mut reader: R, sink: Arc<Mutex<CappedBuffer>>) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut chunk = [0u8; 8192];
    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }
        sink.lock().push(&chunk[..n]);
    }
}

/// Feed stdout lines to the collector until EOF or `budget` bytes
///
/// Going over the budget, even inside a single line, truncates the trace
/// and stops the unit the same way the step ceiling does.
async fn pump_trace<R>(
    mut reader: R,
    collector: Arc<Mutex<TraceCollector>>,
    ceiling: Arc<Notify>,
    budget: usize,
) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut total = 0usize;
    let mut line = Vec::new();
    loop {
        line.clear();
        let room = u64::try_from(budget.saturating_sub(total)).unwrap_or(u64::MAX);
        let n = (&mut reader)
            .take(room.saturating_add(1))
            .read_until(b'\n', &mut line)
            .await?;
        if n == 0 {
            return Ok(());
        }
        total = total.saturating_add(n);

        if total > budget {
            tracing::warn!(max_trace_bytes = budget, "trace output budget exhausted");
            if collector.lock().truncate() == Flow::CeilingReached {
                ceiling.notify_one();
            }
            // Keep the pipe drained until the unit is gone.
            tokio::io::copy(&mut reader, &mut tokio::io::sink()).await?;
            return Ok(());
        }

        let flow = collector.lock().accept_line(&String::from_utf8_lossy(&line));
        if flow == Flow::CeilingReached {
            ceiling.notify_one();
        }
    }
}

/// Give a reader a moment to hit EOF, then cut it loose
async fn join_reader(task: JoinHandle<std::io::Result<()>>, unit_id: u64, stream: &str) {
    let abort = task.abort_handle();
    match tokio::time::timeout(READER_LINGER, task).await {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(e))) => tracing::warn!(unit_id, stream, error = %e, "read failed"),
        Ok(Err(e)) => tracing::warn!(unit_id, stream, error = %e, "reader task failed"),
        Err(_) => {
            // Something outside the process group still holds the pipe.
            tracing::warn!(unit_id, stream, "pipe still open after exit");
            abort.abort();
        }
    }
}

/// Exit code, or the negated signal number for a killed process
fn exit_code(status: ExitStatus) -> i32 {
    status
        .code()
        .unwrap_or_else(|| status.signal().map_or(-1, |signal| -signal))
}
