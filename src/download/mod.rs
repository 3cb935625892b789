//! Module for downloading files from HTTP sources
//!
//! This module provides a single-transfer download controller that streams a
//! remote file to a temporary location, can be paused or cancelled while
//! running, and reports progress to registered listeners.

mod element;
mod listener;
mod models;

// Re-export the public API
pub use element::Download;
pub use listener::{DownloadListener, ListenerId, ListenerRegistry};
pub use models::{DownloadStatus, TransferPhase, file_name};
