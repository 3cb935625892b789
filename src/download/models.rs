//! Data structures for the download system
//!
//! This file contains the status snapshot published to listeners and the
//! lifecycle phase of a transfer.

use serde::{Deserialize, Serialize};
use std::{
    fmt,
    path::{Path, PathBuf},
};
use url::Url;

use crate::{
    error::{Error, Result},
    util::move_file,
};

/// Lifecycle phase of a download
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum TransferPhase {
    /// Created but not started
    #[default]
    Created,
    /// Background task is copying bytes
    Running,
    /// Stopped because the download was paused
    Paused,
    /// Stopped because the download was cancelled
    Cancelled,
    /// Reached the end of the stream
    Completed,
    /// Stopped by a transport or filesystem error
    Failed,
}

impl TransferPhase {
    pub fn is_stopped(&self) -> bool {
        !matches!(self, Self::Created | Self::Running)
    }
}

impl fmt::Display for TransferPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "Created"),
            Self::Running => write!(f, "Running"),
            Self::Paused => write!(f, "Paused"),
            Self::Cancelled => write!(f, "Cancelled"),
            Self::Completed => write!(f, "Completed"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

/// Progress of a download at one instant
///
/// A fresh value is built for every publish, so a snapshot handed to a listener
/// never changes afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct DownloadStatus {
    /// Phase of the transfer when the snapshot was taken
    pub phase: TransferPhase,
    /// Number of bytes written to the temporary file so far
    pub bytes_transferred: u64,
    /// Total size of the download in bytes, `None` when the server did not say
    pub total_size: Option<u64>,
    /// Percentage in `0.0..=100.0`, only meaningful when not indefinite
    pub progress: f32,
    pub indefinite: bool,
    pub finished: bool,
    pub paused: bool,
    pub cancelled: bool,
    /// Bytes read by the chunk that produced this snapshot
    pub chunk_size: u64,
    /// Temporary file holding the download, only set once it finished
    pub file_path: Option<PathBuf>,
    /// Error message if the download failed
    pub error: Option<String>,
}

impl DownloadStatus {
    /// Calculate the download progress as a percentage
    ///
    /// Returns None if the total size is unknown
    pub fn percentage(&self) -> Option<f32> {
        (!self.indefinite && self.total_size.is_some()).then_some(self.progress)
    }

    pub fn rounded_percentage(&self) -> Option<u32> {
        self.percentage().map(|p| p.round() as u32)
    }

    /// Whether the transfer stopped with an error
    pub fn errored(&self) -> bool {
        self.error.is_some()
    }

    /// Whether this is the last snapshot of a run
    pub fn is_terminal(&self) -> bool {
        self.phase.is_stopped()
    }

    /// Move the finished download to `dest`
    ///
    /// Fails with [`Error::NotFinished`] when the snapshot carries no file.
    pub async fn persist(&self, dest: impl AsRef<Path>) -> Result<PathBuf> {
        let src = self.file_path.as_deref().ok_or(Error::NotFinished)?;
        let dest = dest.as_ref();
        move_file(src, dest).await?;
        Ok(dest.to_path_buf())
    }
}

impl fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.progress)
    }
}

/// Percentage of `total` covered by `transferred`; an empty resource counts as done
pub(crate) fn progress_percent(transferred: u64, total: u64) -> f32 {
    if total == 0 {
        return 100.0;
    }
    transferred as f32 * 100.0 / total as f32
}

/// Last path segment of `url`, or the whole path when that segment is empty
pub fn file_name(url: &Url) -> String {
    let path = url.path();
    let name = path.rsplit_once('/').map_or(path, |(_, name)| name);

    if name.is_empty() {
        path.to_string()
    } else {
        name.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_file_name() {
        assert_eq!(file_name(&url("https://host/path/to/file.zip")), "file.zip");
        assert_eq!(file_name(&url("https://host/")), "/");
        assert_eq!(file_name(&url("https://host")), "/");
        assert_eq!(file_name(&url("https://host/dir/")), "/dir/");
        assert_eq!(file_name(&url("http://host/a.tar.gz?x=1")), "a.tar.gz");
    }

    #[test]
    fn test_progress_percent() {
        assert_eq!(progress_percent(250, 1000), 25.0);
        assert_eq!(progress_percent(1000, 1000), 100.0);
        assert_eq!(progress_percent(0, 0), 100.0);
    }

    #[test]
    fn test_default_snapshot() {
        let status = DownloadStatus::default();
        assert_eq!(status.bytes_transferred, 0);
        assert_eq!(status.total_size, None);
        assert_eq!(status.progress, 0.0);
        assert!(!status.indefinite && !status.finished && !status.paused && !status.cancelled);
        assert!(!status.is_terminal());
        assert_eq!(status.percentage(), None);
    }

    #[test]
    fn test_display_and_rounding() {
        let status = DownloadStatus {
            bytes_transferred: 333,
            total_size: Some(1000),
            progress: progress_percent(333, 1000),
            ..Default::default()
        };
        assert_eq!(status.to_string(), "33.30");
        assert_eq!(status.rounded_percentage(), Some(33));
    }

    #[tokio::test]
    async fn test_persist() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("file.tmpdownload");
        tokio::fs::write(&src, b"data").await.unwrap();

        let pending = DownloadStatus::default();
        assert!(matches!(
            pending.persist(dir.path().join("nope")).await,
            Err(Error::NotFinished)
        ));

        let done = DownloadStatus {
            phase: TransferPhase::Completed,
            finished: true,
            file_path: Some(src.clone()),
            ..Default::default()
        };
        let dest = dir.path().join("out").join("file.bin");
        let moved = done.persist(&dest).await.unwrap();

        assert_eq!(moved, dest);
        assert!(!src.exists());
        assert_eq!(tokio::fs::read(&dest).await.unwrap(), b"data");
    }
}
