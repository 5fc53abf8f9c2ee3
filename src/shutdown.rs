//! Graceful shutdown coordination.
//!
//! A [`ShutdownSignal`] owns the root cancellation token. Every processing
//! [`Context`](crate::Context) is derived from it, so a SIGINT/SIGTERM aborts
//! in-flight repository calls as well as the consumer loop.
//!
//! # Example
//!
//! ```rust,ignore
//! use appointment_creator::shutdown::ShutdownSignal;
//!
//! let shutdown = ShutdownSignal::new();
//! tokio::spawn(shutdown.clone().listen());
//!
//! loop {
//!     tokio::select! {
//!         _ = shutdown.cancelled() => break,
//!         // ... process events with shutdown.context()
//!     }
//! }
//! ```

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::context::Context;

/// A signal for coordinating graceful shutdown across components.
#[derive(Clone, Debug)]
pub struct ShutdownSignal {
    token: CancellationToken,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    /// Root context for processing; cancelled when shutdown is triggered.
    pub fn context(&self) -> Context {
        Context::new(self.token.child_token())
    }

    /// Wait for a termination signal (SIGTERM or SIGINT), then trigger shutdown.
    pub async fn listen(self) {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to install Ctrl+C handler");
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
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
            _ = ctrl_c => {
                info!("Received Ctrl+C, initiating graceful shutdown...");
            }
            _ = terminate => {
                info!("Received SIGTERM, initiating graceful shutdown...");
            }
            _ = self.token.cancelled() => return,
        }

        self.token.cancel();
    }

    /// Resolves once shutdown has been triggered.
    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }

    /// Check if shutdown has been triggered.
    pub fn is_shutdown(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}
