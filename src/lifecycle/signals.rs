//! OS signal handling.
//!
//! SIGTERM and SIGINT start a graceful shutdown; SIGHUP asks for a
//! configuration reload. Failing to install a handler is logged and the
//! corresponding signal simply never fires.

use tokio::signal;

/// Resolves on Ctrl+C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("Received Ctrl+C, starting graceful shutdown"),
        () = terminate => tracing::info!("Received SIGTERM, starting graceful shutdown"),
    }
}

/// Stream of SIGHUP notifications.
pub struct HangupSignal {
    #[cfg(unix)]
    inner: Option<signal::unix::Signal>,
}

impl HangupSignal {
    pub fn new() -> Self {
        #[cfg(unix)]
        {
            let inner = match signal::unix::signal(signal::unix::SignalKind::hangup()) {
                Ok(sig) => Some(sig),
                Err(e) => {
                    tracing::warn!(error = %e, "SIGHUP handler unavailable; reload on signal disabled");
                    None
                }
            };
            Self { inner }
        }
        #[cfg(not(unix))]
        {
            Self {}
        }
    }

    /// Wait for the next SIGHUP. Never resolves where SIGHUP is unavailable.
    pub async fn recv(&mut self) {
        #[cfg(unix)]
        if let Some(sig) = self.inner.as_mut() {
            if sig.recv().await.is_some() {
                return;
            }
        }
        std::future::pending::<()>().await
    }
}

impl Default for HangupSignal {
    fn default() -> Self {
        Self::new()
    }
}
