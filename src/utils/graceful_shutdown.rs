use std::{
    future::Future,
    sync::{Arc, OnceLock},
    time::Duration,
};

use eyre::{Result, WrapErr};
use tokio::{signal, time::timeout};
use tokio_util::sync::CancellationToken;

/// Why the server is stopping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// SIGINT or SIGTERM.
    Signal,
    /// Requested by the embedding application.
    Requested,
    /// In-flight requests did not drain in time.
    Force,
}

/// Coordinates server shutdown: OS signals or explicit requests cancel a
/// shared token, and in-flight work gets a bounded drain period.
#[derive(Debug, Clone)]
pub struct GracefulShutdown {
    token: CancellationToken,
    reason: Arc<OnceLock<ShutdownReason>>,
    drain_timeout: Duration,
}

impl GracefulShutdown {
    /// Shutdown manager with a 30-second drain period.
    pub fn new() -> Self {
        Self::with_timeout(Duration::from_secs(30))
    }

    pub fn with_timeout(drain_timeout: Duration) -> Self {
        Self {
            token: CancellationToken::new(),
            reason: Arc::new(OnceLock::new()),
            drain_timeout,
        }
    }

    pub fn drain_timeout(&self) -> Duration {
        self.drain_timeout
    }

    pub fn is_shutdown_initiated(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Reason of the first shutdown request, if any.
    pub fn reason(&self) -> Option<ShutdownReason> {
        self.reason.get().copied()
    }

    /// Start shutting down. Returns `false` if shutdown was already under way;
    /// the first reason wins.
    pub fn trigger_shutdown(&self, reason: ShutdownReason) -> bool {
        if self.reason.set(reason).is_err() {
            tracing::warn!("Shutdown already initiated, ignoring {:?}", reason);
            return false;
        }
        tracing::info!("Shutdown initiated: {:?}", reason);
        self.token.cancel();
        true
    }

    /// Token cancelled once shutdown starts.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Resolves with the shutdown reason once shutdown starts.
    pub async fn wait_for_shutdown(&self) -> ShutdownReason {
        self.token.cancelled().await;
        self.reason().unwrap_or(ShutdownReason::Requested)
    }

    /// Listen for SIGINT and SIGTERM until one arrives or shutdown is
    /// triggered some other way.
    pub async fn run_signal_handler(&self) -> Result<()> {
        tracing::info!("Signal handler started. Listening for SIGTERM and SIGINT");

        tokio::select! {
            received = signal::ctrl_c() => {
                received.wrap_err("Failed to listen for SIGINT")?;
                tracing::info!("Received SIGINT (Ctrl+C), initiating graceful shutdown...");
                self.trigger_shutdown(ShutdownReason::Signal);
            }
            received = wait_for_sigterm() => {
                received?;
                tracing::info!("Received SIGTERM, initiating graceful shutdown...");
                self.trigger_shutdown(ShutdownReason::Signal);
            }
            () = self.token.cancelled() => {}
        }

        Ok(())
    }

    /// Wait for `work` for at most the drain period. Returns `None` and
    /// records [`ShutdownReason::Force`] when the period elapses first.
    pub async fn drain<F: Future>(&self, work: F) -> Option<F::Output> {
        match timeout(self.drain_timeout, work).await {
            Ok(output) => Some(output),
            Err(_) => {
                tracing::error!(
                    "Shutdown drain period exceeded ({:?}), forcing shutdown",
                    self.drain_timeout
                );
                self.trigger_shutdown(ShutdownReason::Force);
                None
            }
        }
    }
}

impl Default for GracefulShutdown {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(unix)]
async fn wait_for_sigterm() -> Result<()> {
    use tokio::signal::unix::{SignalKind, signal};
    let mut sigterm =
        signal(SignalKind::terminate()).wrap_err("Failed to register SIGTERM handler")?;
    sigterm.recv().await;
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_sigterm() -> Result<()> {
    std::future::pending().await
}
