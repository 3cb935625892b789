use std::sync::{
    Arc, Mutex,
    atomic::{AtomicU64, Ordering},
};

use bytesize::ByteSize;
use color_eyre::eyre::eyre;
use network_utils::{Download, DownloadStatus, config};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const MIB: u64 = 1024 * 1024;

/// Logs whenever the rounded percentage changes, or every MiB when the size is unknown
fn progress_logger() -> impl Fn(&DownloadStatus) + Send + Sync + 'static {
    let last_step = AtomicU64::new(u64::MAX);

    move |status: &DownloadStatus| {
        if status.is_terminal() {
            return;
        }

        let step = match status.rounded_percentage() {
            Some(percentage) => u64::from(percentage),
            None => status.bytes_transferred / MIB,
        };
        if last_step.swap(step, Ordering::Relaxed) == step {
            return;
        }

        match status.total_size.filter(|_| !status.indefinite) {
            Some(total) => info!(
                progress = format_args!("{status}%"),
                downloaded = %ByteSize::b(status.bytes_transferred),
                total = %ByteSize::b(total),
                "Downloading"
            ),
            None => info!(
                downloaded = %ByteSize::b(status.bytes_transferred),
                "Downloading (size unknown)"
            ),
        }
    }
}

fn json_printer(status: &DownloadStatus) {
    match serde_json::to_string(status) {
        Ok(line) => println!("{line}"),
        Err(e) => warn!(error = %e, "Failed to serialize download status"),
    }
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    color_eyre::install()?;

    let config = config::config();
    let download = Arc::new(Download::with_config(&config.url, config.download.clone())?);

    if !download.exists().await {
        warn!(url = %config.url, "Resource did not answer HEAD with 200 OK, trying anyway");
    }

    if config.json {
        download.add_listener(json_printer);
    } else {
        download.add_listener(progress_logger());
    }

    let terminal = Arc::new(Mutex::new(None));
    download.add_listener({
        let terminal = terminal.clone();
        move |status: &DownloadStatus| {
            if status.is_terminal() {
                if let Ok(mut slot) = terminal.lock() {
                    *slot = Some(status.clone());
                }
            }
        }
    });

    download.start()?;

    let interrupt = tokio::spawn({
        let download = download.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupt received, cancelling download");
                if let Err(e) = download.cancel() {
                    warn!(error = %e, "Could not cancel download");
                }
            }
        }
    });

    download.join().await?;
    interrupt.abort();

    let status = terminal
        .lock()
        .map_err(|e| eyre!("Status lock poisoned: {e}"))?
        .take()
        .ok_or_else(|| eyre!("Download ended without a final status"))?;

    if let Some(error) = &status.error {
        return Err(eyre!("Download failed: {error}"));
    }
    if !status.finished {
        return Err(eyre!("Download {}", status.phase.to_string().to_lowercase()));
    }

    let name = download.file_name();
    let name = if name.contains('/') { "download".to_string() } else { name };
    let dest = status.persist(config.destination(&name)).await?;

    info!(
        path = %dest.display(),
        size = %ByteSize::b(status.bytes_transferred),
        "Download saved"
    );
    Ok(())
}
