use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Which engine stream a display event came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    /// Structured records written to the engine's stdout.
    Output,
    /// Diagnostic lines written to the engine's stderr.
    Error,
}

/// One renderable unit of engine output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayEvent {
    pub payload: String,
    #[serde(rename = "tag")]
    pub channel: Channel,
}

impl DisplayEvent {
    pub fn output(payload: impl Into<String>) -> Self {
        Self {
            payload: payload.into(),
            channel: Channel::Output,
        }
    }

    pub fn error(payload: impl Into<String>) -> Self {
        Self {
            payload: payload.into(),
            channel: Channel::Error,
        }
    }
}

/// Engine switches exposed to the user. Each field maps to at most one flag.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineOptions {
    /// Skip TLS verification for requests made by the program.
    pub insecure: bool,
    /// Log outgoing HTTP requests to the engine's diagnostic stream.
    pub log_requests: bool,
    /// Crash dump mode passed through as `-dump <mode>`.
    pub dump: Option<String>,
}

impl EngineOptions {
    pub fn to_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if self.insecure {
            args.push("-insecure".to_string());
        }
        if self.log_requests {
            args.push("-log_requests".to_string());
        }
        if let Some(mode) = self.dump.as_deref().filter(|m| !m.is_empty()) {
            args.push("-dump".to_string());
            args.push(mode.to_string());
        }
        args
    }
}

/// Everything needed to launch one run of the engine.
#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    pub program: String,
    pub data: String,
    pub config: String,
    pub options: EngineOptions,
    /// Leave the run's workspace on disk after the process is reaped.
    pub keep: bool,
}

/// Status messages from the run controller to presentation layers.
///
/// These never travel through the event queue; the queue only carries engine output.
#[derive(Debug, Clone)]
pub enum RunNotice {
    Started {
        run: u64,
        pid: Option<u32>,
        workspace: PathBuf,
    },
    Finished {
        run: u64,
    },
    /// A synchronous failure (start or kill) the user should see.
    Failed(String),
    Info(String),
    Formatted {
        program: Option<String>,
        data: Option<String>,
    },
}
