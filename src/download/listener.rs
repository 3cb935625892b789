//! Status listeners and their registry

use std::{
    fmt,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::{Arc, Mutex, PoisonError},
};

use tracing::error;
use ulid::Ulid;

use super::models::DownloadStatus;

/// Receives every status snapshot published by a download
///
/// Listeners run on the download task itself, so a slow listener slows the
/// transfer down.
pub trait DownloadListener: Send + Sync {
    fn on_status(&self, status: &DownloadStatus);
}

impl<F> DownloadListener for F
where
    F: Fn(&DownloadStatus) + Send + Sync,
{
    fn on_status(&self, status: &DownloadStatus) {
        self(status)
    }
}

/// Handle identifying one registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(Ulid);

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Listeners in registration order
#[derive(Default)]
pub struct ListenerRegistry {
    listeners: Mutex<Vec<(ListenerId, Arc<dyn DownloadListener>)>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener; registering the same one twice gets it called twice
    pub fn add(&self, listener: Arc<dyn DownloadListener>) -> ListenerId {
        let id = ListenerId(Ulid::new());
        self.lock().push((id, listener));
        id
    }

    pub fn remove(&self, id: ListenerId) -> bool {
        let mut listeners = self.lock();
        let before = listeners.len();
        listeners.retain(|(listener_id, _)| *listener_id != id);
        listeners.len() != before
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Call every listener with `status`
    ///
    /// The list is copied first so listeners may add or remove registrations.
    /// A panicking listener is logged and skipped.
    pub fn dispatch(&self, status: &DownloadStatus) {
        let listeners: Vec<_> = self.lock().iter().cloned().collect();

        for (id, listener) in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener.on_status(status))).is_err() {
                error!(listener = %id, "Download listener panicked");
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<(ListenerId, Arc<dyn DownloadListener>)>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("listeners", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn status(bytes: u64) -> DownloadStatus {
        DownloadStatus {
            bytes_transferred: bytes,
            ..Default::default()
        }
    }

    #[test]
    fn test_dispatch_in_order() {
        let registry = ListenerRegistry::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second", "third"] {
            let seen = seen.clone();
            registry.add(Arc::new(move |_: &DownloadStatus| {
                seen.lock().unwrap().push(tag)
            }));
        }

        registry.dispatch(&status(1));
        assert_eq!(*seen.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_duplicate_registration() {
        let registry = ListenerRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let listener: Arc<dyn DownloadListener> = {
            let calls = calls.clone();
            Arc::new(move |_: &DownloadStatus| {
                calls.fetch_add(1, Ordering::SeqCst);
            })
        };

        let first = registry.add(listener.clone());
        let second = registry.add(listener);
        assert_ne!(first, second);

        registry.dispatch(&status(1));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_remove() {
        let registry = ListenerRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let id = {
            let calls = calls.clone();
            registry.add(Arc::new(move |_: &DownloadStatus| {
                calls.fetch_add(1, Ordering::SeqCst);
            }))
        };

        assert!(registry.remove(id));
        assert!(!registry.remove(id));
        assert!(registry.is_empty());

        registry.dispatch(&status(1));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_panicking_listener_is_skipped() {
        let registry = ListenerRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));

        registry.add(Arc::new(|_: &DownloadStatus| panic!("listener failure")));
        {
            let calls = calls.clone();
            registry.add(Arc::new(move |_: &DownloadStatus| {
                calls.fetch_add(1, Ordering::SeqCst);
            }));
        }

        registry.dispatch(&status(1));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_listener_can_register_during_dispatch() {
        let registry = Arc::new(ListenerRegistry::new());
        {
            let inner = registry.clone();
            registry.add(Arc::new(move |_: &DownloadStatus| {
                inner.add(Arc::new(|_: &DownloadStatus| {}));
            }));
        }

        registry.dispatch(&status(1));
        assert_eq!(registry.len(), 2);
    }
}
