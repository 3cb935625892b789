//! Error types shared by the HTTP helpers and the download controller.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// The URL could not be parsed, or its scheme is not `http`/`https`
    #[error("\"{0}\" is not a valid http(s) url")]
    InvalidTarget(String),

    #[error("Download already finished")]
    AlreadyFinished,

    #[error("Download already started")]
    AlreadyStarted,

    #[error("No tokio runtime available to run the download")]
    NoRuntime,

    /// The background download task was aborted or panicked
    #[error("Interrupted while waiting for download: {0}")]
    Interrupted(String),

    #[error("Download is not finished yet")]
    NotFinished,

    #[error("HTTP error: {} {}", .0.as_u16(), .0.canonical_reason().unwrap_or("Unknown"))]
    Status(reqwest::StatusCode),

    #[error("Redirect error: {0}")]
    Redirect(String),

    // Transport errors
    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
