//! Resume checkpoints for long sweeps.
//!
//! The log is append-only and human-readable: one line per transition,
//! naming the next position to visit, and a final `complete` line.

use crate::space::SweepCursor;
use anyhow::{Context, Result};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const COMPLETE: &str = "complete";

/// Where a sweep should start according to its log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Checkpoint {
    Fresh,
    Resume(SweepCursor),
    Complete,
}

impl Checkpoint {
    pub fn start_cursor(&self) -> Option<SweepCursor> {
        match self {
            Checkpoint::Fresh => Some(SweepCursor::default()),
            Checkpoint::Resume(cursor) => Some(cursor.clone()),
            Checkpoint::Complete => None,
        }
    }
}

pub struct CheckpointLog {
    path: PathBuf,
    file: File,
}

impl CheckpointLog {
    /// Opens the log for appending; `fresh` truncates it first.
    pub fn open(path: impl AsRef<Path>, fresh: bool) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create directory {}", parent.display()))?;
        }
        let mut options = OpenOptions::new();
        options.create(true);
        if fresh {
            options.write(true).truncate(true);
        } else {
            options.append(true);
        }
        let file = options
            .open(&path)
            .with_context(|| format!("failed to open checkpoint log {}", path.display()))?;
        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Records the next position to visit, or completion when `next` is `None`.
    pub fn record(&mut self, next: Option<&SweepCursor>) -> Result<()> {
        let line = match next {
            Some(cursor) => cursor.to_string(),
            None => COMPLETE.to_string(),
        };
        debug!(checkpoint = %line, "recording sweep position");
        writeln!(self.file, "{line}")
            .and_then(|_| self.file.flush())
            .with_context(|| format!("failed to write checkpoint log {}", self.path.display()))
    }
}

/// Reads the last well-formed line of a checkpoint log.
///
/// A missing or empty log means a fresh start. Malformed lines are skipped.
pub fn load_checkpoint(path: impl AsRef<Path>) -> Result<Checkpoint> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(Checkpoint::Fresh);
    }
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read checkpoint log {}", path.display()))?;

    for line in text.lines().rev() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == COMPLETE {
            return Ok(Checkpoint::Complete);
        }
        match line.parse::<SweepCursor>() {
            Ok(cursor) => return Ok(Checkpoint::Resume(cursor)),
            Err(err) => warn!(line, error = %err, "skipping malformed checkpoint line"),
        }
    }
    Ok(Checkpoint::Fresh)
}
