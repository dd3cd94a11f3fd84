//! Ephemeral per-run input directory.

use crate::error::WorkspaceError;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info, warn};

const DIR_PREFIX: &str = "miko-";

/// The inputs a run can materialize on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputFile {
    Program,
    Data,
    Config,
}

impl InputFile {
    pub fn file_name(self) -> &'static str {
        match self {
            InputFile::Program => "src.cel",
            InputFile::Data => "data.json",
            InputFile::Config => "cfg.yml",
        }
    }
}

#[derive(Debug)]
pub struct Workspace {
    dir: TempDir,
}

impl Workspace {
    /// Create a fresh, uniquely named directory under `root`.
    pub fn create(root: &Path) -> Result<Self, WorkspaceError> {
        let dir = tempfile::Builder::new()
            .prefix(DIR_PREFIX)
            .tempdir_in(root)
            .map_err(|source| WorkspaceError::Create {
                root: root.to_path_buf(),
                source,
            })?;
        debug!(path = %dir.path().display(), "created workspace");
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Write one input file and return its path.
    pub fn write_input(&self, input: InputFile, content: &str) -> Result<PathBuf, WorkspaceError> {
        let path = self.dir.path().join(input.file_name());
        write_private(&path, content.as_bytes()).map_err(|source| WorkspaceError::Write {
            path: path.clone(),
            source,
        })?;
        Ok(path)
    }

    /// Remove the directory and everything in it. Failures are logged, never returned.
    pub fn dispose(self) {
        let path = self.dir.path().to_path_buf();
        match self.dir.close() {
            Ok(()) => debug!(path = %path.display(), "removed workspace"),
            Err(e) => warn!(path = %path.display(), error = %e, "failed to remove workspace"),
        }
    }

    /// Leave the directory in place.
    pub fn keep(self) -> PathBuf {
        let dir = self.dir.keep();
        info!(path = %dir.display(), "keeping workspace");
        dir
    }
}

#[cfg(unix)]
fn write_private(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    use std::os::unix::fs::OpenOptionsExt;
    let mut f = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    f.write_all(bytes)
}

#[cfg(not(unix))]
fn write_private(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut f = std::fs::File::create(path)?;
    f.write_all(bytes)
}
