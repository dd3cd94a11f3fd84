mod cli;
mod engine;
mod error;
mod format;
mod logging;
mod model;
mod orchestrator;
mod queue;
mod txtar;
#[cfg(feature = "tui")]
mod tui;

use anyhow::Result;
use clap::Parser;

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();
    let _log_guard = logging::init(args.debug, args.headless);

    let res = cli::run(args).await;
    if let Err(e) = &res {
        tracing::error!(error = %format!("{e:#}"), "miko exited with an error");
    }
    res
}
