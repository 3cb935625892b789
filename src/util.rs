use std::{
    io,
    path::{Path, PathBuf},
};

use tracing::debug;
use url::Url;

use crate::download::file_name;

/// Extension marking files that are still being downloaded
pub const TEMP_EXTENSION: &str = ".tmpdownload";

/// Move a file to another location, handling cross-filesystem moves.
///
/// `tokio::fs::rename` fails across filesystems, so this falls back to copying
/// the file and removing the source.
pub async fn move_file(src: &Path, dest: &Path) -> io::Result<()> {
    debug!(from = ?src, to = ?dest, "Moving file");

    // Make sure parent directory exists
    if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }

    if tokio::fs::rename(src, dest).await.is_err() {
        tokio::fs::copy(src, dest).await?;
        tokio::fs::remove_file(src).await?;
    }

    debug!(from = ?src, to = ?dest, "File moved successfully");
    Ok(())
}

/// Prefix for the temporary file of `url`: its file name plus a hex timestamp
pub fn temp_file_prefix(url: &Url) -> String {
    let raw = file_name(url);
    let name = urlencoding::decode(&raw)
        .map(|n| n.into_owned())
        .unwrap_or_else(|_| raw.clone());

    let name: String = name
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let name = name.trim_matches(|c| c == '_' || c == '.');
    let name = if name.is_empty() { "download" } else { name };

    format!("{}.{:x}", name, chrono::Utc::now().timestamp_millis())
}

/// Create a uniquely named temporary file for `url` inside `dir`
///
/// The file is kept on disk; removing it is up to the caller.
pub async fn create_temp_file(dir: &Path, url: &Url) -> io::Result<(tokio::fs::File, PathBuf)> {
    tokio::fs::create_dir_all(dir).await?;

    let dir = dir.to_path_buf();
    let prefix = temp_file_prefix(url);
    let (file, path) = tokio::task::spawn_blocking(move || {
        tempfile::Builder::new()
            .prefix(&prefix)
            .suffix(TEMP_EXTENSION)
            .tempfile_in(&dir)?
            .keep()
            .map_err(|e| e.error)
    })
    .await
    .map_err(io::Error::other)??;

    debug!(path = ?path, "Created temporary download file");
    Ok((tokio::fs::File::from_std(file), path))
}
