use anyhow::Result;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Frames captured during one browser attempt, kept in a temporary
/// directory that disappears with the recording.
#[derive(Debug)]
pub struct SessionRecording {
    dir: TempDir,
    frames: Vec<PathBuf>,
}

impl SessionRecording {
    pub fn new() -> Result<Self> {
        let dir = tempfile::Builder::new().prefix("watcher-session-").tempdir()?;
        Ok(Self {
            dir,
            frames: Vec::new(),
        })
    }

    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    pub fn frames(&self) -> &[PathBuf] {
        &self.frames
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Write an already-encoded JPEG frame.
    pub fn push(&mut self, label: &str, jpeg: &[u8]) -> Result<()> {
        let safe: String = label
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        let path = self
            .dir
            .path()
            .join(format!("{:03}_{}.jpg", self.frames.len(), safe));
        std::fs::write(&path, jpeg)?;
        self.frames.push(path);
        Ok(())
    }

    /// The last `n` frames, oldest first.
    pub fn tail(&self, n: usize) -> &[PathBuf] {
        let start = self.frames.len().saturating_sub(n);
        &self.frames[start..]
    }
}
