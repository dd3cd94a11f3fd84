//! Run supervisor: launches the engine once per run and owns its lifecycle.
//!
//! Each run gets a fresh workspace, two stream readers and a supervising task.
//! The supervising task services kill requests, waits for both readers to
//! finish, reaps the process and then removes (or keeps) the workspace.

mod barrier;
pub mod reader;
pub mod workspace;

use crate::error::{KillError, RunError, WorkspaceError};
use crate::model::RunRequest;
use crate::queue::EventSender;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};
use workspace::{InputFile, Workspace};

/// The engine executable and any arguments that precede the per-run flags.
#[derive(Debug, Clone)]
pub struct EngineCommand {
    pub program: String,
    pub leading_args: Vec<String>,
}

impl EngineCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            leading_args: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub engine: EngineCommand,
    /// Directory under which per-run workspaces are created.
    pub workspace_root: PathBuf,
}

impl SupervisorConfig {
    pub fn new(engine: EngineCommand) -> Self {
        Self {
            engine,
            workspace_root: std::env::temp_dir(),
        }
    }
}

struct KillRequest {
    reply: oneshot::Sender<Result<(), KillError>>,
}

impl std::fmt::Debug for KillRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("KillRequest")
    }
}

impl KillRequest {
    fn deliver(self, child: &mut Child, pid: u32) {
        let res = match child.try_wait() {
            Ok(Some(_)) => Err(KillError::AlreadyExited { pid }),
            _ => child
                .start_kill()
                .map_err(|source| KillError::Signal { pid, source }),
        };
        let _ = self.reply.send(res);
    }
}

/// Caller-side view of a live run.
#[derive(Debug, Clone)]
pub struct ProcessHandle {
    run: u64,
    pid: Option<u32>,
    workspace: PathBuf,
    cancelled: Arc<AtomicBool>,
    kill_tx: mpsc::UnboundedSender<KillRequest>,
    reaped: watch::Receiver<bool>,
}

impl ProcessHandle {
    pub fn run(&self) -> u64 {
        self.run
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    pub fn is_reaped(&self) -> bool {
        *self.reaped.borrow()
    }

    /// Resolves once the process has been waited on and the workspace handled.
    pub async fn reaped(&self) {
        let mut rx = self.reaped.clone();
        let _ = rx.wait_for(|done| *done).await;
    }

    /// Ask for the process to be terminated. Does not wait for it to exit.
    pub async fn kill(&self) -> Result<(), KillError> {
        let pid = self.pid.unwrap_or_default();
        // Set before signalling so readers see it when their pipes fail.
        self.cancelled.store(true, Ordering::Release);
        let (reply, rx) = oneshot::channel();
        if self.kill_tx.send(KillRequest { reply }).is_err() {
            return Err(KillError::AlreadyExited { pid });
        }
        rx.await.unwrap_or(Err(KillError::AlreadyExited { pid }))
    }
}

pub struct Supervisor {
    config: SupervisorConfig,
    events: EventSender,
    active: Arc<Mutex<Option<ProcessHandle>>>,
    next_run: AtomicU64,
}

impl Supervisor {
    pub fn new(config: SupervisorConfig, events: EventSender) -> Self {
        Self {
            config,
            events,
            active: Arc::new(Mutex::new(None)),
            next_run: AtomicU64::new(0),
        }
    }

    /// The most recently started run that has not been reaped yet.
    pub fn active(&self) -> Option<ProcessHandle> {
        lock_slot(&self.active).clone()
    }

    pub fn is_active(&self) -> bool {
        lock_slot(&self.active).is_some()
    }

    /// Start a run. An empty program is a no-op and returns `Ok(None)`.
    ///
    /// Any active run is killed first; its teardown continues in the
    /// background and is not awaited here.
    pub async fn start(&self, req: RunRequest) -> Result<Option<ProcessHandle>, RunError> {
        if req.program.is_empty() {
            debug!("empty program, nothing to run");
            return Ok(None);
        }

        let prior = self.active();
        if let Some(prior) = &prior {
            if let Err(e) = prior.kill().await {
                info!(run = prior.run, error = %e, "could not kill previous run");
            }
        }

        let run = self.next_run.fetch_add(1, Ordering::Relaxed) + 1;
        let workspace = Workspace::create(&self.config.workspace_root)?;
        let args = match materialize(&workspace, &req) {
            Ok(args) => args,
            Err(e) => {
                workspace.dispose();
                return Err(e.into());
            }
        };

        let mut cmd = Command::new(&self.config.engine.program);
        cmd.args(&self.config.engine.leading_args)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(source) => {
                workspace.dispose();
                return Err(RunError::Spawn {
                    program: self.config.engine.program.clone(),
                    source,
                });
            }
        };
        let (stdout, stderr) = match (child.stdout.take(), child.stderr.take()) {
            (Some(out), Some(err)) => (out, err),
            (out, _) => {
                let _ = child.start_kill();
                workspace.dispose();
                let missing = if out.is_none() { "stdout" } else { "stderr" };
                return Err(RunError::MissingPipe(missing));
            }
        };

        let pid = child.id();
        let cancelled = Arc::new(AtomicBool::new(false));
        let (kill_tx, kill_rx) = mpsc::unbounded_channel();
        let (reaped_tx, reaped_rx) = watch::channel(false);
        let handle = ProcessHandle {
            run,
            pid,
            workspace: workspace.path().to_path_buf(),
            cancelled: cancelled.clone(),
            kill_tx,
            reaped: reaped_rx,
        };

        let (stdout_done, stderr_done, completion) = barrier::done_pair();
        {
            let events = self.events.clone();
            let cancelled = cancelled.clone();
            tokio::spawn(async move {
                let end = reader::read_records(stdout, &events, &cancelled).await;
                end.log(run, "stdout");
                stdout_done.signal();
            });
        }
        {
            let events = self.events.clone();
            tokio::spawn(async move {
                let end = reader::read_lines(stderr, &events, &cancelled).await;
                end.log(run, "stderr");
                stderr_done.signal();
            });
        }

        // Store before the supervising task exists so its release cannot run first.
        let displaced = lock_slot(&self.active).replace(handle.clone());
        tokio::spawn(supervise(RunTask {
            run,
            child,
            kill_rx,
            completion,
            workspace,
            keep: req.keep,
            slot: self.active.clone(),
            reaped_tx,
        }));

        info!(run, pid, workspace = %handle.workspace.display(), "engine started");

        // A concurrent start may have slipped its run in after we killed `prior`.
        let prior_run = prior.as_ref().map(|p| p.run);
        if let Some(displaced) = displaced.filter(|d| Some(d.run) != prior_run) {
            if let Err(e) = displaced.kill().await {
                info!(run = displaced.run, error = %e, "could not kill displaced run");
            }
        }
        Ok(Some(handle))
    }

    pub async fn kill(&self, handle: &ProcessHandle) -> Result<(), KillError> {
        handle.kill().await
    }

    /// Kill whatever run is active. `None` when nothing is running.
    pub async fn cancel(&self) -> Option<Result<(), KillError>> {
        match self.active() {
            Some(handle) => Some(handle.kill().await),
            None => None,
        }
    }
}

/// Write the non-empty inputs and build the engine's argument list.
fn materialize(ws: &Workspace, req: &RunRequest) -> Result<Vec<OsString>, WorkspaceError> {
    let mut args: Vec<OsString> = Vec::new();
    if !req.data.is_empty() {
        let path = ws.write_input(InputFile::Data, &req.data)?;
        args.push("-data".into());
        args.push(path.into_os_string());
    }
    if !req.config.is_empty() {
        let path = ws.write_input(InputFile::Config, &req.config)?;
        args.push("-cfg".into());
        args.push(path.into_os_string());
    }
    args.extend(req.options.to_args().into_iter().map(OsString::from));
    let src = ws.write_input(InputFile::Program, &req.program)?;
    args.push(src.into_os_string());
    Ok(args)
}

struct RunTask {
    run: u64,
    child: Child,
    kill_rx: mpsc::UnboundedReceiver<KillRequest>,
    completion: barrier::Completion,
    workspace: Workspace,
    keep: bool,
    slot: Arc<Mutex<Option<ProcessHandle>>>,
    reaped_tx: watch::Sender<bool>,
}

async fn supervise(task: RunTask) {
    let RunTask {
        run,
        mut child,
        mut kill_rx,
        completion,
        workspace,
        keep,
        slot,
        reaped_tx,
    } = task;
    let pid = child.id().unwrap_or_default();

    let streams = completion.wait();
    tokio::pin!(streams);
    loop {
        tokio::select! {
            _ = &mut streams => break,
            Some(req) = kill_rx.recv() => req.deliver(&mut child, pid),
        }
    }

    // Both streams are closed; the process may still be alive and killable.
    let status = loop {
        let req = tokio::select! {
            status = child.wait() => break status,
            req = kill_rx.recv() => req,
        };
        match req {
            Some(req) => req.deliver(&mut child, pid),
            None => break child.wait().await,
        }
    };
    match status {
        Ok(status) => debug!(run, %status, "engine exited"),
        Err(e) => warn!(run, error = %e, "failed to wait for engine"),
    }

    release(&slot, run);
    if keep {
        workspace.keep();
    } else {
        workspace.dispose();
    }
    let _ = reaped_tx.send(true);
}

/// Clear the slot, unless a newer run has already replaced this one.
fn release(slot: &Mutex<Option<ProcessHandle>>, run: u64) {
    let mut guard = lock_slot(slot);
    if guard.as_ref().is_some_and(|h| h.run == run) {
        *guard = None;
    }
}

fn lock_slot(slot: &Mutex<Option<ProcessHandle>>) -> MutexGuard<'_, Option<ProcessHandle>> {
    slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
