//! Service discovery events.
//!
//! Discovery sources (DNS polling, an orchestrator watch, labels) push
//! [`DiscoveryEvent`]s into a channel; [`DiscoveryListener`] applies them to
//! the registry. Removals drain the backend rather than dropping it.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};

use crate::config::BackendConfig;
use crate::load_balancer::{BackendRegistry, RegistryError};

/// A membership change reported by a discovery source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryEvent {
    Added { cluster: String, backend: BackendConfig },
    Removed { cluster: String, addr: SocketAddr },
}

/// Applies discovery events to the registry until the channel closes or
/// shutdown is signalled.
pub struct DiscoveryListener {
    registry: Arc<BackendRegistry>,
    events: mpsc::Receiver<DiscoveryEvent>,
}

impl DiscoveryListener {
    /// Create a listener and the sender discovery sources publish on.
    pub fn new(registry: Arc<BackendRegistry>, capacity: usize) -> (Self, mpsc::Sender<DiscoveryEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            Self {
                registry,
                events: rx,
            },
            tx,
        )
    }

    pub fn apply(&self, event: DiscoveryEvent) -> Result<(), RegistryError> {
        match event {
            DiscoveryEvent::Added { cluster, backend } => {
                let added = self.registry.upsert_backend(&cluster, &backend)?;
                tracing::debug!(cluster = %cluster, backend = %added.addr, "Backend discovered");
            }
            DiscoveryEvent::Removed { cluster, addr } => {
                if self.registry.remove_backend(&cluster, addr)? {
                    tracing::debug!(cluster = %cluster, backend = %addr, "Backend withdrawn");
                }
            }
        }
        Ok(())
    }

    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!("Discovery listener started");
        loop {
            tokio::select! {
                event = self.events.recv() => {
                    let Some(event) = event else {
                        tracing::debug!("Discovery channel closed");
                        break;
                    };
                    if let Err(e) = self.apply(event) {
                        tracing::warn!(error = %e, "Discovery event rejected");
                    }
                }
                _ = shutdown.recv() => {
                    tracing::info!("Discovery listener shutting down");
                    break;
                }
            }
        }
    }
}
