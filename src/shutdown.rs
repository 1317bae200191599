//! Graceful shutdown coordination.
//!
//! A [`ShutdownSignal`] is cloned into every long-lived task (the gateway
//! session, the liveness endpoint). It fires on SIGINT/SIGTERM, or when an
//! administrator issues the `exit` command.
//!
//! ```rust,ignore
//! let shutdown = ShutdownSignal::new();
//! let mut stop = shutdown.subscribe();
//!
//! tokio::spawn({
//!     let shutdown = shutdown.clone();
//!     async move { shutdown.wait().await }
//! });
//!
//! tokio::select! {
//!     _ = stop.recv() => {}
//!     _ = session.run() => {}
//! }
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{error, info};

/// How long the gateway gets to close cleanly before the process exits.
const DEFAULT_SHUTDOWN_TIMEOUT: u64 = 10;

/// Why the process is stopping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    Signal,
    Command,
}

/// Broadcast of the one shutdown event to every component holding a clone.
#[derive(Clone)]
pub struct ShutdownSignal {
    sender: broadcast::Sender<ShutdownReason>,
    triggered: Arc<AtomicBool>,
    timeout: Duration,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::with_timeout(Duration::from_secs(DEFAULT_SHUTDOWN_TIMEOUT))
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        let (sender, _) = broadcast::channel(1);
        Self {
            sender,
            triggered: Arc::new(AtomicBool::new(false)),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Block until SIGINT or SIGTERM arrives, then notify all receivers.
    ///
    /// If a handler cannot be installed that signal is simply never seen.
    pub async fn wait(&self) {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to install Ctrl+C handler");
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut stream) => {
                    stream.recv().await;
                }
                Err(e) => {
                    error!(error = %e, "Failed to install SIGTERM handler");
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
            _ = terminate => info!("Received SIGTERM, shutting down"),
        }

        self.fire(ShutdownReason::Signal);
    }

    /// Subscribe to the shutdown event.
    pub fn subscribe(&self) -> broadcast::Receiver<ShutdownReason> {
        self.sender.subscribe()
    }

    pub fn is_shutdown(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }

    /// Shut down on request (the `exit` command).
    pub fn trigger(&self) {
        info!("Shutdown requested");
        self.fire(ShutdownReason::Command);
    }

    fn fire(&self, reason: ShutdownReason) {
        self.triggered.store(true, Ordering::SeqCst);
        // no receivers just means nothing is left to stop
        let _ = self.sender.send(reason);
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}
