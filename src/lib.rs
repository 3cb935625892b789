//! HTTP helpers and background file downloads.
//!
//! ```no_run
//! use network_utils::{Download, DownloadStatus};
//!
//! # async fn run() -> network_utils::Result<()> {
//! let download = Download::new("https://example.com/files/archive.zip")?;
//! download.add_listener(|status: &DownloadStatus| println!("{status}%"));
//! download.start()?;
//! download.join().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod download;
pub mod error;
pub mod http;
pub mod util;

pub use config::DownloadConfig;
pub use download::{Download, DownloadListener, DownloadStatus, ListenerId, TransferPhase};
pub use error::{Error, Result};
pub use http::{HttpClient, HttpConnector};
