use crate::engine::{EngineCommand, Supervisor, SupervisorConfig};
use crate::model::{Channel, EngineOptions, RunRequest};
use crate::queue::event_queue;
use crate::txtar;
use anyhow::{bail, Context, Result};
use clap::Parser;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;

/// Output line routing for stdout/stderr writer.
enum OutputLine {
    Stdout(String),
    Stderr(String),
}

/// Spawn a blocking writer for stdout/stderr to avoid blocking async tasks.
fn spawn_output_writer() -> (
    mpsc::UnboundedSender<OutputLine>,
    tokio::task::JoinHandle<()>,
) {
    let (tx, mut rx) = mpsc::unbounded_channel::<OutputLine>();
    let handle = tokio::task::spawn_blocking(move || {
        let stdout = std::io::stdout();
        let stderr = std::io::stderr();
        let mut out = std::io::LineWriter::new(stdout.lock());
        let mut err = std::io::LineWriter::new(stderr.lock());

        while let Some(line) = rx.blocking_recv() {
            match line {
                OutputLine::Stdout(msg) => {
                    let _ = writeln!(out, "{}", msg);
                }
                OutputLine::Stderr(msg) => {
                    let _ = writeln!(err, "{}", msg);
                }
            }
        }

        let _ = out.flush();
        let _ = err.flush();
    });
    (tx, handle)
}

#[derive(Debug, Parser, Clone)]
#[command(
    name = "miko",
    version,
    about = "Interactive playground for CEL programs run through mito"
)]
pub struct Cli {
    /// txtar archive holding src.cel, data.json and cfg.yaml
    #[arg(long, conflicts_with_all = ["src", "data", "cfg"])]
    pub txtar: Option<PathBuf>,

    /// Path to a CEL program
    #[arg(long)]
    pub src: Option<PathBuf>,

    /// Path to a JSON object holding input (exposed as the label state)
    #[arg(long)]
    pub data: Option<PathBuf>,

    /// Path to a YAML file holding run control configuration
    #[arg(long)]
    pub cfg: Option<PathBuf>,

    /// Engine executable
    #[arg(long, default_value = "mito")]
    pub engine: String,

    /// CEL formatter executable
    #[arg(long, default_value = "celfmt")]
    pub celfmt: String,

    /// Output refresh poll rate
    #[arg(long = "fr", default_value = "10ms")]
    pub poll: humantime::Duration,

    /// Width of tab stops measured in spaces
    #[arg(long = "tw", default_value_t = 4)]
    pub tab_width: usize,

    /// Maximum number of events rendered per refresh tick
    #[arg(long, default_value_t = 64)]
    pub max_events_per_tick: usize,

    /// Leave each run's workspace on disk after the run finishes
    #[arg(long)]
    pub keep: bool,

    /// Directory in which run workspaces are created (defaults to the system temp dir)
    #[arg(long)]
    pub workspace_root: Option<PathBuf>,

    /// Pass -insecure to the engine
    #[arg(long)]
    pub insecure: bool,

    /// Pass -log_requests to the engine
    #[arg(long)]
    pub log_requests: bool,

    /// Pass -dump <MODE> to the engine (e.g. "error")
    #[arg(long, value_name = "MODE")]
    pub dump: Option<String>,

    /// Run once without the TUI: records to stdout, diagnostics to stderr
    #[arg(long)]
    pub headless: bool,

    /// With --headless, print every event as a JSON line on stdout
    #[arg(long, requires = "headless")]
    pub json: bool,

    /// Verbose logging
    #[arg(long)]
    pub debug: bool,
}

impl Cli {
    pub fn validate(&self) -> Result<()> {
        if self.tab_width == 0 {
            bail!("--tw must be greater than zero");
        }
        if self.max_events_per_tick == 0 {
            bail!("--max-events-per-tick must be greater than zero");
        }
        if Duration::from(self.poll).is_zero() {
            bail!("--fr must be greater than zero");
        }
        Ok(())
    }

    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            insecure: self.insecure,
            log_requests: self.log_requests,
            dump: self.dump.clone(),
        }
    }
}

/// The three texts a run is built from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunInputs {
    pub program: String,
    pub data: String,
    pub config: String,
}

impl RunInputs {
    /// Load inputs from the archive or individual files named on the command line.
    pub fn load(args: &Cli) -> Result<Self> {
        let mut inputs = RunInputs::default();
        if let Some(path) = args.txtar.as_deref() {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("read {}", path.display()))?;
            let archive = txtar::parse(&text);
            inputs.program = archive.file(txtar::PROGRAM_FILE).unwrap_or_default().into();
            inputs.data = archive.file(txtar::DATA_FILE).unwrap_or_default().into();
            inputs.config = archive.file(txtar::CONFIG_FILE).unwrap_or_default().into();
        }
        for (path, dst) in [
            (args.src.as_deref(), &mut inputs.program),
            (args.data.as_deref(), &mut inputs.data),
            (args.cfg.as_deref(), &mut inputs.config),
        ] {
            if let Some(path) = path {
                *dst = std::fs::read_to_string(path)
                    .with_context(|| format!("read {}", path.display()))?;
            }
        }
        Ok(inputs)
    }

    pub fn request(&self, options: EngineOptions, keep: bool) -> RunRequest {
        RunRequest {
            program: self.program.clone(),
            data: self.data.clone(),
            config: self.config.clone(),
            options,
            keep,
        }
    }
}

/// Build a `SupervisorConfig` from CLI arguments.
pub fn build_config(args: &Cli) -> SupervisorConfig {
    let mut cfg = SupervisorConfig::new(EngineCommand::new(args.engine.clone()));
    if let Some(root) = args.workspace_root.clone() {
        cfg.workspace_root = root;
    }
    cfg
}

pub async fn run(args: Cli) -> Result<()> {
    args.validate()?;

    if !args.headless {
        #[cfg(feature = "tui")]
        {
            return crate::tui::run(args).await;
        }
        #[cfg(not(feature = "tui"))]
        {
            tracing::info!("built without TUI support, running headless");
        }
    }

    run_headless(args).await
}

/// Run the engine once and stream its output to the terminal.
async fn run_headless(args: Cli) -> Result<()> {
    let inputs = RunInputs::load(&args)?;
    if inputs.program.is_empty() {
        bail!("no program to run: pass --src or --txtar");
    }

    let (events_tx, mut events) = event_queue();
    let supervisor = Supervisor::new(build_config(&args), events_tx);
    let handle = supervisor
        .start(inputs.request(args.engine_options(), args.keep))
        .await
        .context("failed to start engine")?
        .context("engine did not start")?;

    let (out_tx, out_handle) = spawn_output_writer();
    let emit = |ev: crate::model::DisplayEvent| {
        let line = if args.json {
            match serde_json::to_string(&ev) {
                Ok(json) => OutputLine::Stdout(json),
                Err(e) => OutputLine::Stderr(format!("failed to encode event: {e}")),
            }
        } else {
            match ev.channel {
                Channel::Output => OutputLine::Stdout(ev.payload),
                Channel::Error => OutputLine::Stderr(ev.payload),
            }
        };
        let _ = out_tx.send(line);
    };

    let mut interrupted = false;
    loop {
        let next = tokio::select! {
            ev = events.recv() => ev,
            _ = handle.reaped() => None,
            _ = tokio::signal::ctrl_c(), if !interrupted => {
                interrupted = true;
                if let Err(e) = supervisor.kill(&handle).await {
                    tracing::info!(error = %e, "kill on interrupt failed");
                }
                continue;
            }
        };
        match next {
            Some(ev) => emit(ev),
            None => {
                // Both readers have finished, so whatever is left is already queued.
                while let Some(ev) = events.try_take() {
                    emit(ev);
                }
                break;
            }
        }
    }

    if args.keep {
        let _ = out_tx.send(OutputLine::Stderr(format!(
            "Kept workspace: {}",
            handle.workspace().display()
        )));
    }
    drop(out_tx);
    let _ = out_handle.await;
    Ok(())
}
