//! Graceful-exit coordination
//!
//! A single watch channel fans the stop signal out to the HTTP server, the
//! dataset GC task, and every in-flight analysis (which reads it as its
//! cancellation signal). On exit the service drains whatever tasks were
//! registered, then checkpoints and closes the store.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::constants::SHUTDOWN_TIMEOUT_SECS;
use crate::data::DuckdbService;

#[derive(Clone)]
pub struct ShutdownService {
    signal: Arc<watch::Sender<bool>>,
    tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
    db: Arc<DuckdbService>,
}

impl ShutdownService {
    pub fn new(db: Arc<DuckdbService>) -> Self {
        let (signal, _) = watch::channel(false);
        Self {
            signal: Arc::new(signal),
            tasks: Arc::new(Mutex::new(Vec::new())),
            db,
        }
    }

    /// A receiver that flips to `true` once shutdown begins
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.signal.subscribe()
    }

    /// Begin shutdown; idempotent
    pub fn trigger(&self) {
        self.signal.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.signal.borrow()
    }

    /// Track a background task so `shutdown` can drain it
    pub fn register(&self, handle: JoinHandle<()>) {
        self.tasks.lock().push(handle);
    }

    /// Future that resolves once shutdown begins (axum graceful shutdown)
    pub fn wait(&self) -> impl std::future::Future<Output = ()> + Send + 'static {
        let mut rx = self.subscribe();
        async move {
            let _ = rx.wait_for(|stopped| *stopped).await;
        }
    }

    /// Flip the signal, drain registered tasks within the grace period,
    /// then checkpoint and close the store.
    pub async fn shutdown(&self) {
        self.trigger();

        let tasks = std::mem::take(&mut *self.tasks.lock());
        if !tasks.is_empty() {
            tracing::debug!(tasks = tasks.len(), "Draining background tasks");
            let grace = Duration::from_secs(SHUTDOWN_TIMEOUT_SECS);
            if tokio::time::timeout(grace, futures::future::join_all(tasks))
                .await
                .is_err()
            {
                tracing::warn!(
                    grace_secs = SHUTDOWN_TIMEOUT_SECS,
                    "Background tasks did not finish within the grace period"
                );
            }
        }

        if let Err(e) = self.db.checkpoint().await {
            tracing::warn!("Store checkpoint failed during shutdown: {}", e);
        }
        if let Err(e) = self.db.clone().close().await {
            tracing::warn!("Store close failed during shutdown: {}", e);
        }
        tracing::debug!("Shutdown finished");
    }

    /// Trip the shutdown signal when the process receives Ctrl+C or SIGTERM
    pub fn listen_for_signals(&self) {
        let signal = Arc::clone(&self.signal);
        tokio::spawn(async move {
            wait_for_stop_signal().await;
            tracing::info!("Stop signal received, shutting down");
            signal.send_replace(true);
        });
    }
}

#[cfg(unix)]
async fn wait_for_stop_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let mut term = match signal(SignalKind::terminate()) {
        Ok(term) => term,
        Err(e) => {
            tracing::error!("Could not install SIGTERM handler: {}", e);
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = term.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_stop_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
