//! Signal handling for graceful shutdown

use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Handles shutdown signals (SIGTERM, SIGINT)
///
/// The signal is turned into a cancelled [`CancellationToken`] so the turn
/// machine can stop at its next cancellation point instead of being
/// dropped mid-state.
pub struct ShutdownSignal {
    token: CancellationToken,
}

impl ShutdownSignal {
    /// Create a new shutdown signal handler
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    /// Token cancelled once a shutdown signal arrives
    #[cfg(test)]
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Register the signal handlers and cancel the token on the first signal.
    /// Must be called from within the tokio runtime.
    pub fn listen(self) -> std::io::Result<CancellationToken> {
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        let token = self.token.clone();

        tokio::spawn(async move {
            tokio::select! {
                _ = sigterm.recv() => {
                    debug!("received SIGTERM");
                }
                _ = sigint.recv() => {
                    debug!("received SIGINT");
                }
                _ = self.token.cancelled() => {
                    return;
                }
            }
            info!("shutdown signal received");
            self.token.cancel();
        });

        Ok(token)
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}
