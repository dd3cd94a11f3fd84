//! Error types for the run supervisor.
//!
//! Errors raised before the engine process exists are returned from `start`.
//! Errors raised while streaming are only ever logged.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Failure to provision a run's workspace.
#[derive(Error, Debug)]
pub enum WorkspaceError {
    #[error("failed to create workspace under {}: {source}", root.display())]
    Create { root: PathBuf, source: io::Error },

    #[error("failed to write {}: {source}", path.display())]
    Write { path: PathBuf, source: io::Error },
}

/// Failure to start a run. Nothing is left running when this is returned.
#[derive(Error, Debug)]
pub enum RunError {
    #[error(transparent)]
    Workspace(#[from] WorkspaceError),

    #[error("failed to start {program}: {source}")]
    Spawn { program: String, source: io::Error },

    #[error("engine {0} pipe was not captured")]
    MissingPipe(&'static str),
}

/// Failure to deliver a terminate request.
///
/// Callers should report this and carry on; it usually means the process
/// already exited on its own.
#[derive(Error, Debug)]
pub enum KillError {
    #[error("process {pid} has already exited")]
    AlreadyExited { pid: u32 },

    #[error("failed to kill process {pid}: {source}")]
    Signal { pid: u32, source: io::Error },
}

/// Reasons a stream reader stopped early.
#[derive(Error, Debug)]
pub enum StreamError {
    #[error("malformed record: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("stream ended inside a record ({pending} bytes pending)")]
    Truncated { pending: usize },

    #[error("read failed: {0}")]
    Read(#[from] io::Error),
}
