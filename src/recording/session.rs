//! Recording session: the on-disk directory and its append-only manifest of
//! completed segment files.
//!
//! Layout: `{output_root}/{stem}_{session_ts}/{stem}_{segment_ts}.{ext}`.

use crate::error::{StreamError, StreamResult};
use chrono::{DateTime, Local, TimeDelta};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Second-resolution timestamp used in directory and file names.
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";
/// Fallback when two names would share the same second.
pub const TIMESTAMP_FORMAT_MILLIS: &str = "%Y%m%d_%H%M%S_%3f";

#[derive(Debug, Clone, Serialize)]
pub struct RecordingSession {
    directory: PathBuf,
    segments: Vec<PathBuf>,
    started_at: DateTime<Local>,
    #[serde(skip)]
    last_segment_at: Option<DateTime<Local>>,
}

impl RecordingSession {
    /// Create the session directory under `output_root`.
    ///
    /// A numeric suffix is appended if a directory with the same name exists.
    pub fn create(output_root: &Path, stem: &str, now: DateTime<Local>) -> StreamResult<Self> {
        fs::create_dir_all(output_root)
            .map_err(|e| StreamError::io_at("create output root", output_root, e))?;

        let base = format!("{}_{}", stem, now.format(TIMESTAMP_FORMAT));
        let mut directory = output_root.join(&base);
        let mut suffix = 1;
        while directory.exists() {
            suffix += 1;
            directory = output_root.join(format!("{base}_{suffix}"));
        }
        fs::create_dir(&directory)
            .map_err(|e| StreamError::io_at("create session directory", &directory, e))?;

        Ok(Self {
            directory,
            segments: Vec::new(),
            started_at: now,
            last_segment_at: None,
        })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Completed segments, oldest first.
    pub fn segments(&self) -> &[PathBuf] {
        &self.segments
    }

    pub fn started_at(&self) -> DateTime<Local> {
        self.started_at
    }

    pub fn duration(&self) -> Duration {
        (Local::now() - self.started_at).to_std().unwrap_or_default()
    }

    /// Name for the next segment file. Names within a session are strictly
    /// increasing, in time and in lexical order.
    pub fn next_segment_path(&mut self, stem: &str, ext: &str, now: DateTime<Local>) -> PathBuf {
        let at = match self.last_segment_at {
            Some(last) if now <= last => last + TimeDelta::milliseconds(1),
            _ => now,
        };
        let same_second = self
            .last_segment_at
            .is_some_and(|last| last.format(TIMESTAMP_FORMAT).to_string() == at.format(TIMESTAMP_FORMAT).to_string());

        let mut path = self.segment_path(stem, ext, at, TIMESTAMP_FORMAT);
        if same_second || path.exists() {
            path = self.segment_path(stem, ext, at, TIMESTAMP_FORMAT_MILLIS);
        }
        self.last_segment_at = Some(at);
        path
    }

    fn segment_path(&self, stem: &str, ext: &str, at: DateTime<Local>, format: &str) -> PathBuf {
        self.directory.join(format!("{}_{}.{}", stem, at.format(format), ext))
    }

    pub fn push_segment(&mut self, path: PathBuf) {
        self.segments.push(path);
    }
}
