//! Run lifecycle controller.
//!
//! Owns the supervisor, turns UI commands into start/kill calls and reports
//! back to presentation layers through `RunNotice`s.

use crate::engine::{ProcessHandle, Supervisor};
use crate::format;
use crate::model::{RunNotice, RunRequest};
use anyhow::Result;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::time::Duration;
use tracing::{debug, info, warn};

/// How long quitting waits for the active run to be torn down.
const QUIT_GRACE: Duration = Duration::from_secs(3);

/// Commands emitted by UI layers to control runs.
#[derive(Debug, Clone)]
pub(crate) enum UiCommand {
    Run(RunRequest),
    Cancel,
    Format { program: String, data: String },
    Quit,
}

/// Serve UI commands until `Quit` (or until the UI goes away).
pub(crate) async fn run_controller(
    supervisor: Supervisor,
    formatter: String,
    notice_tx: UnboundedSender<RunNotice>,
    mut cmd_rx: UnboundedReceiver<UiCommand>,
) -> Result<()> {
    while let Some(cmd) = cmd_rx.recv().await {
        match cmd {
            UiCommand::Run(req) => start_run(&supervisor, req, &notice_tx).await,
            UiCommand::Cancel => match supervisor.cancel().await {
                Some(Ok(())) => {
                    let _ = notice_tx.send(RunNotice::Info("Cancelling…".into()));
                }
                Some(Err(e)) => {
                    let _ = notice_tx.send(RunNotice::Failed(e.to_string()));
                }
                None => {
                    let _ = notice_tx.send(RunNotice::Info("Nothing to cancel".into()));
                }
            },
            UiCommand::Format { program, data } => {
                let formatter = formatter.clone();
                let notice_tx = notice_tx.clone();
                tokio::spawn(async move { format_inputs(&formatter, program, data, notice_tx).await });
            }
            UiCommand::Quit => break,
        }
    }

    shutdown(&supervisor).await;
    Ok(())
}

async fn start_run(supervisor: &Supervisor, req: RunRequest, notice_tx: &UnboundedSender<RunNotice>) {
    debug!(replacing = supervisor.is_active(), "run requested");
    match supervisor.start(req).await {
        Ok(Some(handle)) => {
            let _ = notice_tx.send(RunNotice::Started {
                run: handle.run(),
                pid: handle.pid(),
                workspace: handle.workspace().to_path_buf(),
            });
            watch_run(handle, notice_tx.clone());
        }
        Ok(None) => {
            let _ = notice_tx.send(RunNotice::Info("Nothing to run: program is empty".into()));
        }
        Err(e) => {
            warn!(error = %e, "run failed to start");
            let _ = notice_tx.send(RunNotice::Failed(e.to_string()));
        }
    }
}

/// Report when a run has been reaped.
fn watch_run(handle: ProcessHandle, notice_tx: UnboundedSender<RunNotice>) {
    tokio::spawn(async move {
        handle.reaped().await;
        let _ = notice_tx.send(RunNotice::Finished { run: handle.run() });
    });
}

async fn format_inputs(
    formatter: &str,
    program: String,
    data: String,
    notice_tx: UnboundedSender<RunNotice>,
) {
    let program = match format::format_program(formatter, &program).await {
        Ok(p) => p,
        Err(e) => {
            let _ = notice_tx.send(RunNotice::Failed(format!("{e:#}")));
            return;
        }
    };
    match format::format_data(&data) {
        Ok(data) => {
            let _ = notice_tx.send(RunNotice::Formatted { program, data });
        }
        Err(e) => {
            let _ = notice_tx.send(RunNotice::Formatted {
                program,
                data: None,
            });
            let _ = notice_tx.send(RunNotice::Failed(format!("{e:#}")));
        }
    }
}

/// Kill the active run and give it a moment to be reaped so its workspace is cleaned.
async fn shutdown(supervisor: &Supervisor) {
    let Some(handle) = supervisor.active() else {
        return;
    };
    if handle.is_reaped() {
        return;
    }
    if let Err(e) = handle.kill().await {
        info!(run = handle.run(), error = %e, "kill on quit failed");
    }
    if tokio::time::timeout(QUIT_GRACE, handle.reaped()).await.is_err() {
        warn!(
            run = handle.run(),
            workspace = %handle.workspace().display(),
            "run still tearing down at exit"
        );
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::engine::{EngineCommand, SupervisorConfig};
    use crate::model::{Channel, DisplayEvent};
    use crate::queue::event_queue;
    use tempfile::TempDir;
    use tokio::sync::mpsc;

    struct Harness {
        cmd_tx: UnboundedSender<UiCommand>,
        notices: UnboundedReceiver<RunNotice>,
        events: tokio::task::JoinHandle<Vec<DisplayEvent>>,
        controller: tokio::task::JoinHandle<Result<()>>,
        _root: TempDir,
    }

    fn harness(script: &str, formatter: &str) -> Harness {
        let root = TempDir::new().unwrap();
        let (events_tx, mut events_rx) = event_queue();
        let config = SupervisorConfig {
            engine: EngineCommand {
                program: "sh".into(),
                leading_args: vec!["-c".into(), script.into(), "fake-mito".into()],
            },
            workspace_root: root.path().to_path_buf(),
        };
        let supervisor = Supervisor::new(config, events_tx);
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (notice_tx, notices) = mpsc::unbounded_channel();
        let controller = tokio::spawn(run_controller(
            supervisor,
            formatter.to_string(),
            notice_tx,
            cmd_rx,
        ));
        let events = tokio::spawn(async move {
            let mut seen = Vec::new();
            while let Some(ev) = events_rx.recv().await {
                seen.push(ev);
            }
            seen
        });
        Harness {
            cmd_tx,
            notices,
            events,
            controller,
            _root: root,
        }
    }

    async fn next_notice(h: &mut Harness) -> RunNotice {
        tokio::time::timeout(Duration::from_secs(10), h.notices.recv())
            .await
            .expect("notice in time")
            .expect("controller alive")
    }

    fn run_request(program: &str) -> RunRequest {
        RunRequest {
            program: program.into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn run_reports_start_and_finish() {
        let mut h = harness("echo hello >&2", "cat");
        h.cmd_tx.send(UiCommand::Run(run_request("x"))).unwrap();

        let RunNotice::Started { run, workspace, .. } = next_notice(&mut h).await else {
            panic!("expected Started");
        };
        let RunNotice::Finished { run: finished } = next_notice(&mut h).await else {
            panic!("expected Finished");
        };
        assert_eq!(run, finished);
        assert!(!workspace.exists());

        h.cmd_tx.send(UiCommand::Quit).unwrap();
        h.controller.await.unwrap().unwrap();
        let events = h.events.await.unwrap();
        assert_eq!(events, vec![DisplayEvent::error("hello")]);
        assert!(events.iter().all(|e| e.channel == Channel::Error));
    }

    #[tokio::test]
    async fn empty_program_and_idle_cancel_are_informational() {
        let mut h = harness("true", "cat");
        h.cmd_tx.send(UiCommand::Run(run_request(""))).unwrap();
        assert!(matches!(next_notice(&mut h).await, RunNotice::Info(_)));
        h.cmd_tx.send(UiCommand::Cancel).unwrap();
        assert!(matches!(next_notice(&mut h).await, RunNotice::Info(_)));
        drop(h.cmd_tx);
        h.controller.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn quit_kills_and_reaps_the_active_run() {
        let mut h = harness("exec sleep 30", "cat");
        h.cmd_tx.send(UiCommand::Run(run_request("x"))).unwrap();
        let RunNotice::Started { workspace, .. } = next_notice(&mut h).await else {
            panic!("expected Started");
        };
        assert!(workspace.exists());

        h.cmd_tx.send(UiCommand::Quit).unwrap();
        tokio::time::timeout(Duration::from_secs(5), h.controller)
            .await
            .expect("controller should stop")
            .unwrap()
            .unwrap();
        assert!(!workspace.exists());
    }

    #[tokio::test]
    async fn format_reports_both_inputs() {
        let mut h = harness("true", "cat");
        h.cmd_tx
            .send(UiCommand::Format {
                program: " a + b \n".into(),
                data: "{\"k\":[1]}".into(),
            })
            .unwrap();
        let RunNotice::Formatted { program, data } = next_notice(&mut h).await else {
            panic!("expected Formatted");
        };
        assert_eq!(program.as_deref(), Some("a + b"));
        assert_eq!(data.as_deref(), Some("{\n\t\"k\": [\n\t\t1\n\t]\n}"));
    }

    #[tokio::test]
    async fn spawn_failure_is_reported_as_failed() {
        let root = TempDir::new().unwrap();
        let (events_tx, _events_rx) = event_queue();
        let supervisor = Supervisor::new(
            SupervisorConfig {
                engine: EngineCommand::new("/nonexistent/mito"),
                workspace_root: root.path().to_path_buf(),
            },
            events_tx,
        );
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (notice_tx, mut notices) = mpsc::unbounded_channel();
        let controller = tokio::spawn(run_controller(supervisor, "cat".into(), notice_tx, cmd_rx));

        cmd_tx.send(UiCommand::Run(run_request("x"))).unwrap();
        let notice = tokio::time::timeout(Duration::from_secs(5), notices.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(notice, RunNotice::Failed(msg) if msg.contains("/nonexistent/mito")));

        drop(cmd_tx);
        controller.await.unwrap().unwrap();
    }
}
