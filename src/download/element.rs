//! Single download controller
//!
//! A [`Download`] streams one remote resource into a temporary file on a
//! background tokio task. Pause, resume and cancel flip flags that the copy loop
//! checks between chunks, and every chunk produces a [`DownloadStatus`] that is
//! handed to the registered listeners.

use std::{
    path::PathBuf,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use reqwest::header::HeaderMap;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    runtime::Handle,
    sync::{OnceCell, watch},
    task::JoinHandle,
};
use tracing::{Instrument, debug, error, info, info_span, trace, warn};
use url::Url;

use super::{
    listener::{DownloadListener, ListenerId, ListenerRegistry},
    models::{DownloadStatus, TransferPhase, file_name, progress_percent},
};
use crate::{
    config::DownloadConfig,
    error::{Error, Result},
    http::{ByteStream, HttpClient, HttpConnector, content_length},
    util::create_temp_file,
};

/// Flags and counters of one transfer, always accessed under the lock
#[derive(Debug, Default)]
struct TransferState {
    phase: TransferPhase,
    started: bool,
    cancelled: bool,
    paused: bool,
    finished: bool,
    indefinite: bool,
    bytes_transferred: u64,
    total_size: Option<u64>,
    progress: f32,
    temp_file: Option<PathBuf>,
}

impl TransferState {
    fn snapshot(&self, chunk_size: u64) -> DownloadStatus {
        DownloadStatus {
            phase: self.phase,
            bytes_transferred: self.bytes_transferred,
            total_size: self.total_size,
            progress: self.progress,
            indefinite: self.indefinite,
            finished: self.finished,
            paused: self.paused,
            cancelled: self.cancelled,
            chunk_size,
            file_path: None,
            error: None,
        }
    }
}

/// How the background run ended
#[derive(Debug, Clone, PartialEq)]
enum RunEnd {
    Pending,
    Completed,
    Interrupted(String),
}

/// State shared between the controller and its background task
struct Shared<C> {
    url: Url,
    client: C,
    config: DownloadConfig,
    headers: OnceCell<HeaderMap>,
    state: Mutex<TransferState>,
    listeners: ListenerRegistry,
    done: watch::Sender<RunEnd>,
}

/// Records the end of a run when dropped, including on abort or panic
///
/// Owned by the spawned future, so it fires even if the task never gets polled.
struct RunGuard<C: HttpClient> {
    shared: Arc<Shared<C>>,
    completed: bool,
}

impl<C: HttpClient> Drop for RunGuard<C> {
    fn drop(&mut self) {
        let end = if self.completed {
            RunEnd::Completed
        } else if std::thread::panicking() {
            RunEnd::Interrupted("download task panicked".to_string())
        } else {
            RunEnd::Interrupted("download task was aborted".to_string())
        };
        self.shared.done.send_replace(end);
    }
}

/// Controls the download of a single remote resource
pub struct Download<C: HttpClient = HttpConnector> {
    shared: Arc<Shared<C>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Download<HttpConnector> {
    /// Create a download for `url` using a default [`HttpConnector`]
    pub fn new(url: &str) -> Result<Self> {
        Self::with_config(url, DownloadConfig::default())
    }

    pub fn with_config(url: &str, config: DownloadConfig) -> Result<Self> {
        let client = HttpConnector::with_config(&config)?;
        Self::with_client(url, client, config)
    }
}

impl<C: HttpClient> Download<C> {
    /// Create a download for `url` served by `client`
    ///
    /// Fails with [`Error::InvalidTarget`] unless `url` is an http(s) URL.
    pub fn with_client(url: &str, client: C, config: DownloadConfig) -> Result<Self> {
        let url = Url::parse(url).map_err(|_| Error::InvalidTarget(url.to_string()))?;
        Self::from_url(url, client, config)
    }

    pub fn from_url(url: Url, client: C, config: DownloadConfig) -> Result<Self> {
        if !matches!(url.scheme(), "http" | "https") {
            return Err(Error::InvalidTarget(url.to_string()));
        }

        let (done, _) = watch::channel(RunEnd::Pending);

        Ok(Self {
            shared: Arc::new(Shared {
                url,
                client,
                config,
                headers: OnceCell::new(),
                state: Mutex::new(TransferState::default()),
                listeners: ListenerRegistry::new(),
                done,
            }),
            task: Mutex::new(None),
        })
    }

    pub fn url(&self) -> &Url {
        &self.shared.url
    }

    pub fn client(&self) -> &C {
        &self.shared.client
    }

    /// Whether the resource exists; transport errors count as "no"
    pub async fn exists(&self) -> bool {
        match self.shared.client.exists(&self.shared.url).await {
            Ok(exists) => exists,
            Err(e) => {
                debug!(url = %self.shared.url, error = %e, "Existence check failed");
                false
            }
        }
    }

    /// Response headers, fetched on first use and kept for the lifetime of the download
    pub async fn headers(&self) -> Result<&HeaderMap> {
        self.shared.headers().await
    }

    /// Total size from `Content-Length`
    ///
    /// Returns `None` and marks the download indefinite when the header is missing.
    pub async fn size(&self) -> Result<Option<u64>> {
        self.shared.size().await
    }

    /// Launch the background copy task and return immediately
    ///
    /// Must be called from within a tokio runtime, and only once.
    pub fn start(&self) -> Result<()> {
        let runtime = Handle::try_current().map_err(|_| Error::NoRuntime)?;

        {
            let mut state = self.shared.lock_state();
            if state.started {
                return Err(Error::AlreadyStarted);
            }
            state.started = true;
            state.phase = TransferPhase::Running;
        }

        let mut guard = RunGuard {
            shared: Arc::clone(&self.shared),
            completed: false,
        };
        let span = info_span!("download", url = %self.shared.url);
        let handle = runtime.spawn(
            async move {
                guard.shared.run().await;
                guard.completed = true;
            }
            .instrument(span),
        );

        *self.lock_task() = Some(handle);
        Ok(())
    }

    pub fn pause(&self) -> Result<()> {
        self.shared.update(|state| state.paused = true)?;
        info!(url = %self.shared.url, "Download paused");
        Ok(())
    }

    /// Clear the pause flag
    ///
    /// This does not restart a copy loop that already stopped because of the
    /// pause; it only has an effect if the loop has not observed the flag yet.
    pub fn resume(&self) -> Result<()> {
        self.shared.update(|state| state.paused = false)?;
        info!(url = %self.shared.url, "Download resumed");
        Ok(())
    }

    /// Stop the download at the next chunk boundary. There is no way back.
    pub fn cancel(&self) -> Result<()> {
        self.shared.update(|state| state.cancelled = true)?;
        info!(url = %self.shared.url, "Download cancelled");
        Ok(())
    }

    pub fn is_paused(&self) -> bool {
        self.shared.lock_state().paused
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.lock_state().cancelled
    }

    pub fn is_finished(&self) -> bool {
        self.shared.lock_state().finished
    }

    pub fn is_indefinite(&self) -> bool {
        self.shared.lock_state().indefinite
    }

    pub fn phase(&self) -> TransferPhase {
        self.shared.lock_state().phase
    }

    pub fn bytes_transferred(&self) -> u64 {
        self.shared.lock_state().bytes_transferred
    }

    /// Temporary file backing the download, unless none was created or it was discarded
    pub fn temp_file(&self) -> Option<PathBuf> {
        self.shared.lock_state().temp_file.clone()
    }

    /// Wait until the background task has published its final status
    ///
    /// Returns immediately if the download was never started. Fails with
    /// [`Error::Interrupted`] if the task was aborted or panicked, on every call.
    pub async fn join(&self) -> Result<()> {
        if !self.shared.lock_state().started {
            return Ok(());
        }

        let handle = self.lock_task().take();
        if let Some(handle) = handle {
            // The outcome is read back from the run guard below
            let _ = handle.await;
        }

        let mut done = self.shared.done.subscribe();
        let end = done
            .wait_for(|end| *end != RunEnd::Pending)
            .await
            .map(|end| end.clone());

        match end {
            Ok(RunEnd::Interrupted(reason)) => Err(Error::Interrupted(reason)),
            _ => Ok(()),
        }
    }

    /// Register a listener for status snapshots
    pub fn add_listener<L: DownloadListener + 'static>(&self, listener: L) -> ListenerId {
        self.shared.listeners.add(Arc::new(listener))
    }

    pub fn add_shared_listener(&self, listener: Arc<dyn DownloadListener>) -> ListenerId {
        self.shared.listeners.add(listener)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.shared.listeners.remove(id)
    }

    /// Name of the remote file, taken from the last path segment of the URL
    pub fn file_name(&self) -> String {
        file_name(&self.shared.url)
    }

    fn lock_task(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.task.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<C: HttpClient> Shared<C> {
    fn lock_state(&self) -> MutexGuard<'_, TransferState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply a control change unless the download already finished
    fn update(&self, change: impl FnOnce(&mut TransferState)) -> Result<()> {
        let mut state = self.lock_state();
        if state.finished {
            return Err(Error::AlreadyFinished);
        }
        change(&mut state);
        Ok(())
    }

    async fn headers(&self) -> Result<&HeaderMap> {
        self.headers
            .get_or_try_init(|| async {
                let headers = self.client.headers(&self.url).await?;
                debug!(url = %self.url, headers = ?headers, "Fetched download headers");
                Ok::<_, Error>(headers)
            })
            .await
    }

    async fn size(&self) -> Result<Option<u64>> {
        let size = content_length(self.headers().await?);

        let mut state = self.lock_state();
        state.indefinite = size.is_none();
        state.total_size = size;
        Ok(size)
    }

    fn should_stop(&self) -> bool {
        let state = self.lock_state();
        state.cancelled || state.paused
    }

    async fn run(&self) {
        let result = self.transfer().await;
        let status = self.finish(result).await;

        self.listeners.dispatch(&status);
    }

    /// Resolve metadata, open the stream and copy it into a temporary file
    ///
    /// The file and the stream are closed before this returns, whatever the outcome.
    async fn transfer(&self) -> Result<PathBuf> {
        // A server rejecting HEAD still gets a GET, as a download of unknown size
        let total_size = match self.size().await {
            Ok(size) => size,
            Err(e) => {
                warn!(error = %e, "Could not read download headers, size unknown");
                let mut state = self.lock_state();
                state.indefinite = true;
                state.total_size = None;
                None
            }
        };
        match total_size {
            Some(size) => info!(bytes = size, "Starting download"),
            None => info!("Starting download of unknown size"),
        }

        let mut stream = self.client.open_stream(&self.url).await?;
        let (mut file, path) = create_temp_file(&self.config.temp_dir, &self.url).await?;
        self.lock_state().temp_file = Some(path.clone());

        let initial = self.lock_state().snapshot(0);
        self.listeners.dispatch(&initial);

        let copied = self.copy(&mut stream, &mut file).await;
        let flushed = file.flush().await;
        drop(file);
        drop(stream);

        copied?;
        flushed?;
        Ok(path)
    }

    async fn copy(&self, stream: &mut ByteStream, file: &mut tokio::fs::File) -> Result<()> {
        let mut buffer = vec![0u8; self.config.chunk_size()];

        loop {
            if self.should_stop() {
                debug!("Copy loop stopped by control flag");
                return Ok(());
            }

            let read = stream.read(&mut buffer).await?;
            if read == 0 {
                trace!("End of stream");
                return Ok(());
            }

            file.write_all(&buffer[..read]).await?;

            let status = self.record_chunk(read as u64);
            self.listeners.dispatch(&status);
        }
    }

    fn record_chunk(&self, read: u64) -> DownloadStatus {
        let mut state = self.lock_state();
        let previous = state.progress;

        state.bytes_transferred += read;
        if let (false, Some(total)) = (state.indefinite, state.total_size) {
            state.progress = progress_percent(state.bytes_transferred, total);

            // Log once per quarter crossed
            if (previous / 25.0).floor() < (state.progress / 25.0).floor() {
                info!(
                    percentage = format_args!("{:.1}%", state.progress),
                    bytes = state.bytes_transferred,
                    total = total,
                    "Download milestone"
                );
            }
        }

        trace!(bytes = state.bytes_transferred, chunk_size = read, "Received chunk");
        state.snapshot(read)
    }

    /// Settle the final flags and build the terminal snapshot
    async fn finish(&self, result: Result<PathBuf>) -> DownloadStatus {
        let (status, discard) = {
            let mut state = self.lock_state();

            let outcome = match result {
                Ok(path) => {
                    state.finished = !state.paused && !state.cancelled;
                    state.phase = if state.cancelled {
                        TransferPhase::Cancelled
                    } else if state.paused {
                        TransferPhase::Paused
                    } else {
                        TransferPhase::Completed
                    };
                    Ok(path)
                }
                Err(e) => {
                    state.phase = TransferPhase::Failed;
                    Err(e)
                }
            };

            if state.finished {
                if let Some(total) = state.total_size {
                    state.progress = progress_percent(state.bytes_transferred, total);
                }
            }

            let mut status = state.snapshot(0);
            let discard = match outcome {
                Ok(path) if state.finished => {
                    info!(bytes = state.bytes_transferred, path = ?path, "Download completed");
                    status.file_path = Some(path);
                    None
                }
                // Keep the partial file of a paused download around
                Ok(_) if state.paused && !state.cancelled => {
                    info!(bytes = state.bytes_transferred, "Download stopped while paused");
                    None
                }
                Ok(_) => {
                    info!(bytes = state.bytes_transferred, "Download stopped after cancellation");
                    state.temp_file.take()
                }
                Err(e) => {
                    error!(error = %e, bytes = state.bytes_transferred, "Download failed");
                    status.error = Some(e.to_string());
                    state.temp_file.take()
                }
            };

            (status, discard)
        };

        if let Some(path) = discard {
            if let Err(e) = tokio::fs::remove_file(&path).await {
                warn!(path = ?path, error = %e, "Failed to remove partial download");
            }
        }

        status
    }
}
