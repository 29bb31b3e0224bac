//! Shutdown coordination.

use std::time::Duration;

use tokio::sync::broadcast;

/// Coordinator for graceful shutdown.
///
/// Every long-running task (health monitor, discovery listener, reload loop,
/// admin server) holds a receiver and exits when the signal fires.
#[derive(Clone)]
pub struct Shutdown {
    tx: broadcast::Sender<()>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    pub fn trigger(&self) {
        let _ = self.tx.send(());
    }

    /// Number of tasks still holding a receiver.
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Resolves when the signal fires.
    pub async fn wait(&self) {
        let mut rx = self.subscribe();
        let _ = rx.recv().await;
    }

    /// Wait until every subscribed task has dropped its receiver, up to
    /// `timeout`. Returns false if tasks were still running at the deadline.
    pub async fn drain(&self, timeout: Duration) -> bool {
        let waiting = async {
            while self.receiver_count() > 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        };
        match tokio::time::timeout(timeout, waiting).await {
            Ok(()) => true,
            Err(_) => {
                tracing::warn!(
                    remaining = self.receiver_count(),
                    "Drain deadline reached with tasks still running"
                );
                false
            }
        }
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}
