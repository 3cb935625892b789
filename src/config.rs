//! Config module for network-utils

use std::{path::PathBuf, time::Duration};

use clap::{Args, Parser};

/// Default size of the block read from the stream on every iteration
pub const DEFAULT_CHUNK_SIZE: u64 = 1024;

/// Settings for the HTTP connector and the download controller
#[derive(Args, Debug, Clone)]
pub struct DownloadConfig {
    /// Bytes read from the response body per chunk
    #[clap(
        long,
        env = "NETUTILS_CHUNK_SIZE",
        default_value_t = DEFAULT_CHUNK_SIZE,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub chunk_size: u64,

    /// Directory where in-progress downloads are written
    #[clap(long, env = "NETUTILS_TEMP_DIR", default_value_os_t = std::env::temp_dir())]
    pub temp_dir: PathBuf,

    #[clap(long, env = "NETUTILS_MAX_REDIRECTS", default_value_t = 10)]
    pub max_redirects: usize,

    /// Connect timeout in seconds, unbounded when unset
    #[clap(long, env = "NETUTILS_CONNECT_TIMEOUT")]
    pub connect_timeout: Option<u64>,

    #[clap(long, env = "NETUTILS_USER_AGENT", default_value_t = default_user_agent())]
    pub user_agent: String,
}

fn default_user_agent() -> String {
    format!("{}/{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            temp_dir: std::env::temp_dir(),
            max_redirects: 10,
            connect_timeout: None,
            user_agent: default_user_agent(),
        }
    }
}

impl DownloadConfig {
    pub fn chunk_size(&self) -> usize {
        usize::try_from(self.chunk_size.max(1)).unwrap_or(DEFAULT_CHUNK_SIZE as usize)
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout.map(Duration::from_secs)
    }
}

/// Command line configuration for the `netutils` binary
#[derive(Parser, Debug, Clone)]
#[clap(version, about = "Download a file over HTTP with progress reporting")]
pub struct Config {
    /// URL of the file to download
    pub url: String,

    /// Destination file or directory, defaults to the user's download directory
    #[clap(short, long, env = "NETUTILS_OUTPUT")]
    pub output: Option<PathBuf>,

    /// Print every status snapshot as a JSON line
    #[clap(long, env = "NETUTILS_JSON", default_value = "false")]
    pub json: bool,

    #[clap(flatten)]
    pub download: DownloadConfig,
}

impl Config {
    /// Resolve where the finished download should be moved to
    pub fn destination(&self, file_name: &str) -> PathBuf {
        let base = self
            .output
            .clone()
            .or_else(dirs::download_dir)
            .unwrap_or_else(|| PathBuf::from("."));

        if base.is_dir() { base.join(file_name) } else { base }
    }
}

pub fn config() -> Config {
    Config::parse()
}
