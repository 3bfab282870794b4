//! The execution engine.
//!
//! ```text
//! Command ─► defaults ─► validate ─► reserve id ─► sanitize ─► slot ─► sandbox ─► spawn
//!                                                                                   │
//!        result ◄─ release ◄─ deregister ◄─ collect ◄─ exit | cancel ◄──────────────┘
//! ```

use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::{DashMap, DashSet};
use tokio::process::{Child, Command as ProcessCommand};
use tokio::sync::{OwnedSemaphorePermit, Semaphore, mpsc};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use warden_policy::{CommandValidator, sanitize_env, sanitize_path};
use warden_protocol::{Command, ExecutionResult, ExecutionStatus};
use warden_sandbox::{ResourceSandbox, SandboxBackend, set_process_group};

use crate::config::EngineConfig;
use crate::error::{ExecError, Result};
use crate::logging::AUDIT_TARGET;
use crate::output::{OutputCollector, OutputStream, OutputStreamer, STREAM_BUFFER, collect};
use crate::signal::{ProcessInfo, ProcessRegistry, Signal, SignalTarget};
use crate::timeout::TimeoutManager;
use crate::user::lookup_user;

/// How long readers may keep a pipe open after the process is gone.
const READER_GRACE: Duration = Duration::from_millis(250);

struct Inner {
    config: EngineConfig,
    validator: CommandValidator,
    sandbox: ResourceSandbox,
    registry: ProcessRegistry,
    timeouts: TimeoutManager,
    executions: DashMap<String, ExecutionStatus>,
    /// Ids claimed by a submission that has not been torn down yet.
    reserved: DashSet<String>,
    slots: Arc<Semaphore>,
}

/// Runs validated shell commands under one concurrency budget.
///
/// Cheap to clone; clones share executions, registries and slots.
#[derive(Clone)]
pub struct ExecutionEngine {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ExecutionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionEngine")
            .field("max_concurrent", &self.inner.config.max_concurrent)
            .field("running", &self.inner.executions.len())
            .field("sandbox_backend", &self.inner.sandbox.backend_name())
            .finish()
    }
}

enum OutputMode {
    Collect,
    Discard,
    Stream {
        stdout: mpsc::Sender<String>,
        stderr: mpsc::Sender<String>,
    },
}

/// Exclusive claim on an execution id, held from submission until the
/// execution is torn down.
struct Reservation {
    inner: Arc<Inner>,
    id: String,
}

impl Drop for Reservation {
    fn drop(&mut self) {
        self.inner.reserved.remove(&self.id);
    }
}

/// Owns the bookkeeping of a spawned process.
///
/// Dropped before the process was reaped (the caller abandoned the
/// execution), it kills the whole process group; `kill_on_drop` only
/// reaches the direct child.
struct LiveGuard {
    reservation: Reservation,
    pid: u32,
    pgid: Option<u32>,
    reaped: bool,
}

impl Drop for LiveGuard {
    fn drop(&mut self) {
        let inner = &self.reservation.inner;
        let id = self.reservation.id.as_str();

        if !self.reaped
            && let Some(pgid) = self.pgid
            && SignalTarget::Group(pgid).send(Signal::Kill).is_ok()
        {
            debug!(id, pgid, "execution abandoned, killed process group");
        }

        let pid = self.pid;
        inner.timeouts.cancel(id);
        inner.registry.unregister_pid(id, pid);
        inner.executions.remove_if(id, |_, status| status.pid == pid);
    }
}

/// A spawned, registered process.
struct Launch {
    child: Child,
    guard: LiveGuard,
    started: Instant,
    start_time: DateTime<Utc>,
    kill: CancellationToken,
    timed_out: Arc<AtomicBool>,
    readers: Vec<JoinHandle<()>>,
    stop_readers: CancellationToken,
    collector: OutputCollector,
}

/// Terminal result of a background execution.
#[derive(Debug)]
pub struct ResultHandle {
    id: String,
    command: String,
    handle: JoinHandle<ExecutionResult>,
}

impl ResultHandle {
    /// Wait for the terminal result. A panicked or aborted task yields a
    /// result with `error` set.
    pub async fn wait(self) -> ExecutionResult {
        match self.handle.await {
            Ok(result) => result,
            Err(e) => ExecutionResult::failed(
                self.id,
                self.command,
                format!("execution task failed: {e}"),
            ),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

/// Handle returned by [`ExecutionEngine::execute_async`].
#[derive(Debug)]
pub struct AsyncExecution {
    pub id: String,
    pub start_time: DateTime<Utc>,
    pub result: ResultHandle,
    cancel: CancellationToken,
}

impl AsyncExecution {
    /// Kill the execution, or abandon it if it has not started yet.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn wait(self) -> ExecutionResult {
        self.result.wait().await
    }
}

/// Handle returned by [`ExecutionEngine::execute_stream`].
///
/// The result resolves only after both line streams have been drained (or
/// dropped) and the process has exited.
#[derive(Debug)]
pub struct StreamingExecution {
    pub id: String,
    pub start_time: DateTime<Utc>,
    pub stdout: ReceiverStream<String>,
    pub stderr: ReceiverStream<String>,
    pub result: ResultHandle,
    cancel: CancellationToken,
}

impl StreamingExecution {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

impl ExecutionEngine {
    /// Build an engine with the declared-only sandbox backend.
    pub fn new(config: EngineConfig) -> Result<Self> {
        Self::build(config, ResourceSandbox::new())
    }

    /// Build an engine that enforces sandbox limits through `backend`.
    pub fn with_sandbox_backend(
        config: EngineConfig,
        backend: Arc<dyn SandboxBackend>,
    ) -> Result<Self> {
        Self::build(config, ResourceSandbox::with_backend(backend))
    }

    fn build(config: EngineConfig, sandbox: ResourceSandbox) -> Result<Self> {
        config.validate()?;
        let policy = config.security.clone().unwrap_or_default();

        debug!(
            max_concurrent = config.max_concurrent,
            default_timeout = ?config.default_timeout,
            max_timeout = ?config.max_timeout,
            backend = sandbox.backend_name(),
            "execution engine ready"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                validator: CommandValidator::new(&policy),
                sandbox,
                registry: ProcessRegistry::new(),
                timeouts: TimeoutManager::new(config.default_timeout, config.max_timeout),
                executions: DashMap::new(),
                reserved: DashSet::new(),
                slots: Arc::new(Semaphore::new(config.max_concurrent)),
                config,
            }),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn validator(&self) -> &CommandValidator {
        &self.inner.validator
    }

    /// Free concurrency slots.
    pub fn available_slots(&self) -> usize {
        self.inner.slots.available_permits()
    }

    /// Run a command to completion.
    pub async fn execute(&self, command: Command) -> Result<ExecutionResult> {
        self.execute_with_cancel(command, CancellationToken::new()).await
    }

    /// Run a command, overriding its timeout.
    pub async fn execute_with_timeout(
        &self,
        command: Command,
        timeout: Duration,
    ) -> Result<ExecutionResult> {
        self.execute(command.with_timeout(timeout)).await
    }

    /// Run a command to completion. Cancelling `cancel` kills the process
    /// group, or aborts with [`ExecError::Cancelled`] while still waiting for
    /// a slot. Dropping the returned future kills the process group too.
    pub async fn execute_with_cancel(
        &self,
        command: Command,
        cancel: CancellationToken,
    ) -> Result<ExecutionResult> {
        let (command, reservation) = self.prepare(command)?;
        let permit = self.acquire_slot(&command.id, &cancel).await?;
        let credentials = self.resolve_user(&command).await?;
        let mode = if command.capture_output {
            OutputMode::Collect
        } else {
            OutputMode::Discard
        };
        let launch = self.launch(&command, reservation, credentials, &cancel, mode)?;
        Ok(self.supervise(&command, launch, permit).await)
    }

    /// Validate now, run in the background.
    pub fn execute_async(&self, command: Command) -> Result<AsyncExecution> {
        self.execute_async_with_cancel(command, CancellationToken::new())
    }

    pub fn execute_async_with_cancel(
        &self,
        command: Command,
        parent: CancellationToken,
    ) -> Result<AsyncExecution> {
        let (command, reservation) = self.prepare(command)?;
        let cancel = parent.child_token();
        let start_time = Utc::now();
        let id = command.id.clone();
        let text = command.command.clone();

        let engine = self.clone();
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            let mode = if command.capture_output {
                OutputMode::Collect
            } else {
                OutputMode::Discard
            };
            engine.run_background(command, reservation, token, mode).await
        });

        Ok(AsyncExecution {
            id: id.clone(),
            start_time,
            result: ResultHandle {
                id,
                command: text,
                handle,
            },
            cancel,
        })
    }

    /// Validate now, run in the background with stdout and stderr exposed
    /// as live line streams.
    pub fn execute_stream(&self, command: Command) -> Result<StreamingExecution> {
        self.execute_stream_with_cancel(command, CancellationToken::new())
    }

    pub fn execute_stream_with_cancel(
        &self,
        command: Command,
        parent: CancellationToken,
    ) -> Result<StreamingExecution> {
        let (command, reservation) = self.prepare(command)?;
        let cancel = parent.child_token();
        let start_time = Utc::now();
        let id = command.id.clone();
        let text = command.command.clone();

        let (stdout_tx, stdout_rx) = mpsc::channel(STREAM_BUFFER);
        let (stderr_tx, stderr_rx) = mpsc::channel(STREAM_BUFFER);
        let mode = OutputMode::Stream {
            stdout: stdout_tx,
            stderr: stderr_tx,
        };

        let engine = self.clone();
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            engine.run_background(command, reservation, token, mode).await
        });

        Ok(StreamingExecution {
            id: id.clone(),
            start_time,
            stdout: ReceiverStream::new(stdout_rx),
            stderr: ReceiverStream::new(stderr_rx),
            result: ResultHandle {
                id,
                command: text,
                handle,
            },
            cancel,
        })
    }

    /// Live status with duration recomputed now.
    pub fn get_status(&self, id: &str) -> Result<ExecutionStatus> {
        let mut status = self
            .inner
            .executions
            .get(id)
            .map(|entry| entry.clone())
            .ok_or_else(|| ExecError::not_found(id))?;
        status.refresh();
        Ok(status)
    }

    /// Snapshot of every live execution.
    pub fn list_executions(&self) -> Vec<ExecutionStatus> {
        self.inner
            .executions
            .iter()
            .map(|entry| {
                let mut status = entry.clone();
                status.refresh();
                status
            })
            .collect()
    }

    /// Send `signal` to a live execution's process group.
    pub fn kill(&self, id: &str, signal: Signal) -> Result<()> {
        self.inner.registry.send(id, signal)?;
        Ok(())
    }

    /// Terminate, wait up to `timeout`, then force-kill.
    pub async fn graceful_shutdown(&self, id: &str, timeout: Duration) -> Result<()> {
        self.inner.registry.graceful_shutdown(id, timeout).await?;
        Ok(())
    }

    /// Force-kill every live execution. Returns how many were signaled.
    pub fn kill_all(&self) -> usize {
        self.inner.registry.kill_all()
    }

    async fn run_background(
        &self,
        command: Command,
        reservation: Reservation,
        cancel: CancellationToken,
        mode: OutputMode,
    ) -> ExecutionResult {
        let permit = match self.acquire_slot(&command.id, &cancel).await {
            Ok(permit) => permit,
            Err(e) => {
                let mut result =
                    ExecutionResult::failed(&command.id, &command.command, e.to_string());
                result.killed = true;
                result.finish();
                self.audit_result(&result);
                return result;
            }
        };

        let launched = self
            .resolve_user(&command)
            .await
            .and_then(|credentials| self.launch(&command, reservation, credentials, &cancel, mode));
        match launched {
            Ok(launch) => self.supervise(&command, launch, permit).await,
            Err(e) => {
                drop(permit);
                let mut result =
                    ExecutionResult::failed(&command.id, &command.command, e.to_string());
                result.finish();
                self.audit_result(&result);
                result
            }
        }
    }

    /// Apply engine defaults, validate, claim the id, and sanitize.
    fn prepare(&self, mut command: Command) -> Result<(Command, Reservation)> {
        let config = &self.inner.config;
        if command.work_dir.is_none() {
            command.work_dir = config.work_dir.clone();
        }
        for (key, value) in &config.env {
            command
                .env
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }
        if command.max_output_size == 0 {
            command.max_output_size = config.max_output_size;
        }
        if command.timeout.is_zero() {
            command.timeout = config.default_timeout;
        }
        if command.sandbox.is_none() {
            command.sandbox = config.sandbox.clone();
        }

        if let Err(e) = self.inner.validator.validate(&command) {
            warn!(id = %command.id, kind = %e.kind, "command rejected: {}", e.message);
            if config.audit_log {
                info!(
                    target: AUDIT_TARGET,
                    id = %command.id,
                    command = %command.command,
                    kind = %e.kind,
                    "command rejected"
                );
            }
            return Err(e.into());
        }

        let reservation = self.reserve(&command.id)?;

        command.env = sanitize_env(&command.env);
        command.work_dir = command.work_dir.as_deref().map(sanitize_path);

        if config.audit_log {
            info!(
                target: AUDIT_TARGET,
                id = %command.id,
                command = %command.command,
                "command accepted"
            );
        }
        Ok((command, reservation))
    }

    fn reserve(&self, id: &str) -> Result<Reservation> {
        if !self.inner.reserved.insert(id.to_string()) {
            return Err(ExecError::DuplicateId { id: id.to_string() });
        }
        Ok(Reservation {
            inner: Arc::clone(&self.inner),
            id: id.to_string(),
        })
    }

    async fn acquire_slot(
        &self,
        id: &str,
        cancel: &CancellationToken,
    ) -> Result<OwnedSemaphorePermit> {
        let slots = Arc::clone(&self.inner.slots);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ExecError::Cancelled { id: id.to_string() }),
            permit = slots.acquire_owned() => {
                permit.map_err(|_| ExecError::Cancelled { id: id.to_string() })
            }
        }
    }

    /// Resolve the run-as user off the async workers; the lookup may hit
    /// NSS or a directory service.
    async fn resolve_user(&self, command: &Command) -> Result<Option<(u32, u32)>> {
        let Some(user) = command.user.clone() else {
            return Ok(None);
        };
        let id = command.id.as_str();
        let resolved = tokio::task::spawn_blocking(move || lookup_user(&user))
            .await
            .map_err(|e| ExecError::spawn(id, e.to_string()))?;
        resolved
            .map(Some)
            .map_err(|e| ExecError::spawn(id, e.to_string()))
    }

    /// Build, sandbox, spawn and register the process.
    fn launch(
        &self,
        command: &Command,
        reservation: Reservation,
        credentials: Option<(u32, u32)>,
        cancel: &CancellationToken,
        mode: OutputMode,
    ) -> Result<Launch> {
        let id = command.id.clone();
        let mut process = ProcessCommand::new(command.shell.program());
        process
            .arg(command.shell.command_flag())
            .arg(&command.command)
            .args(&command.args)
            .envs(&command.env)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        match mode {
            OutputMode::Discard => process.stdout(Stdio::null()).stderr(Stdio::null()),
            _ => process.stdout(Stdio::piped()).stderr(Stdio::piped()),
        };

        if let Some(dir) = &command.work_dir {
            process.current_dir(dir);
        }

        let mut process_group = false;
        if let Some(sandbox) = &command.sandbox {
            let applied = self.inner.sandbox.apply(sandbox, &mut process)?;
            process_group = applied.process_group;
            debug!(id = %id, enforcement = %applied.enforcement, "sandbox applied");
        }
        if !process_group {
            process_group = set_process_group(&mut process);
        }

        if let Some((uid, gid)) = credentials {
            #[cfg(unix)]
            {
                process.uid(uid).gid(gid);
            }
            #[cfg(not(unix))]
            {
                let _ = (uid, gid);
                return Err(ExecError::spawn(&id, "run-as-user is not supported"));
            }
        }

        let mut child = process.spawn().map_err(|e| {
            warn!(id = %id, error = %e, "spawn failed");
            ExecError::spawn(&id, e.to_string())
        })?;

        let started = Instant::now();
        let start_time = Utc::now();
        let pid = child.id().unwrap_or(0);
        let pgid = process_group.then_some(pid);
        let guard = LiveGuard {
            reservation,
            pid,
            pgid,
            reaped: false,
        };

        self.inner.executions.insert(
            id.clone(),
            ExecutionStatus::running(&id, &command.command, start_time, pid),
        );
        self.inner
            .registry
            .register(&id, ProcessInfo::new(pid, pgid, &command.command));

        let kill = cancel.child_token();
        let timed_out = Arc::new(AtomicBool::new(false));
        let armed = {
            let kill = kill.clone();
            let timed_out = Arc::clone(&timed_out);
            self.inner
                .timeouts
                .start(&id, command.effective_timeout(), move || {
                    timed_out.store(true, Ordering::SeqCst);
                    kill.cancel();
                })
        };

        debug!(id = %id, pid, ?pgid, timeout = ?armed, "process started");

        let stop_readers = CancellationToken::new();
        let (collector, readers) = start_readers(command, &mut child, mode, &stop_readers);

        Ok(Launch {
            child,
            guard,
            started,
            start_time,
            kill,
            timed_out,
            readers,
            stop_readers,
            collector,
        })
    }

    /// Wait for exit or cancellation, gather output, deregister, release.
    async fn supervise(
        &self,
        command: &Command,
        launch: Launch,
        permit: OwnedSemaphorePermit,
    ) -> ExecutionResult {
        let Launch {
            mut child,
            mut guard,
            started,
            start_time,
            kill,
            timed_out,
            readers,
            stop_readers,
            collector,
        } = launch;
        let id = command.id.as_str();

        let mut killed = false;
        let waited = tokio::select! {
            status = child.wait() => status,
            _ = kill.cancelled() => {
                killed = true;
                self.force_kill(id, &mut child);
                child.wait().await
            }
        };
        guard.reaped = waited.is_ok();

        let signaled = self
            .inner
            .registry
            .get(id)
            .filter(|info| info.pid == guard.pid)
            .and_then(|info| info.signaled);

        // Anything the command left behind in its group goes with it.
        if !killed
            && let Some(pgid) = guard.pgid
            && SignalTarget::Group(pgid).send(Signal::Kill).is_ok()
        {
            debug!(id, pgid, "killed leftover group members");
        }

        let drain = join_readers(readers);
        tokio::pin!(drain);
        if tokio::time::timeout(READER_GRACE, &mut drain).await.is_err() {
            debug!(id, "output pipes still open after exit, closing readers");
            stop_readers.cancel();
            drain.await;
        }

        drop(guard);
        drop(permit);

        let mut result = ExecutionResult::new(id, &command.command);
        result.start_time = start_time;
        match waited {
            Ok(status) => {
                result.exit_code = exit_code(&status);
                if !killed && signaled.is_some() && status.code().is_none() {
                    killed = true;
                }
            }
            Err(e) => {
                result.exit_code = -1;
                result.error = Some(format!("failed to wait for process: {e}"));
            }
        }
        result.killed = killed;
        result.timed_out = killed && timed_out.load(Ordering::SeqCst);

        let output = collector.finish();
        result.stdout = output.stdout;
        result.stderr = output.stderr;
        result.output_size = output.output_size;
        result.end_time = Utc::now();
        result.duration = started.elapsed();

        debug!(
            id,
            exit_code = result.exit_code,
            killed = result.killed,
            timed_out = result.timed_out,
            truncated = output.truncated,
            "execution finished"
        );
        self.audit_result(&result);
        result
    }

    fn force_kill(&self, id: &str, child: &mut Child) {
        if let Err(e) = self.inner.registry.send(id, Signal::Kill) {
            warn!(id, error = %e, "group kill failed, killing child directly");
            if let Err(e) = child.start_kill() {
                warn!(id, error = %e, "failed to kill child");
            }
        }
    }

    fn audit_result(&self, result: &ExecutionResult) {
        if self.inner.config.audit_log {
            info!(
                target: AUDIT_TARGET,
                id = %result.id,
                command = %result.command,
                exit_code = result.exit_code,
                killed = result.killed,
                timed_out = result.timed_out,
                duration_ms = result.duration.as_millis() as u64,
                error = result.error.as_deref().unwrap_or(""),
                "execution finished"
            );
        }
    }
}

fn start_readers(
    command: &Command,
    child: &mut Child,
    mode: OutputMode,
    stop: &CancellationToken,
) -> (OutputCollector, Vec<JoinHandle<()>>) {
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let mut readers = Vec::with_capacity(2);

    match mode {
        OutputMode::Discard => (
            OutputCollector::new(command.max_output_size, false),
            readers,
        ),
        OutputMode::Collect => {
            let collector = OutputCollector::new(command.max_output_size, true);
            if let Some(pipe) = stdout {
                readers.push(tokio::spawn(collect(
                    pipe,
                    OutputStream::Stdout,
                    collector.clone(),
                    stop.clone(),
                )));
            }
            if let Some(pipe) = stderr {
                readers.push(tokio::spawn(collect(
                    pipe,
                    OutputStream::Stderr,
                    collector.clone(),
                    stop.clone(),
                )));
            }
            (collector, readers)
        }
        OutputMode::Stream {
            stdout: stdout_tx,
            stderr: stderr_tx,
        } => {
            let collector =
                OutputCollector::new(command.max_output_size, command.capture_output);
            if let Some(pipe) = stdout {
                let streamer =
                    OutputStreamer::new(OutputStream::Stdout, stdout_tx, collector.clone());
                readers.push(tokio::spawn(streamer.run(pipe, stop.clone())));
            }
            if let Some(pipe) = stderr {
                let streamer =
                    OutputStreamer::new(OutputStream::Stderr, stderr_tx, collector.clone());
                readers.push(tokio::spawn(streamer.run(pipe, stop.clone())));
            }
            (collector, readers)
        }
    }
}

async fn join_readers(readers: Vec<JoinHandle<()>>) {
    for reader in readers {
        let _ = reader.await;
    }
}

fn exit_code(status: &ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}
