//! Fan-out of committed config versions to connected viewers.
//!
//! Handlers publish the new version stamp on a broadcast channel and return
//! immediately. A bridge task turns each stamp into a reload message and
//! queues it on every client without waiting, so neither a commit nor
//! another viewer is ever held up by a slow or vanished viewer.

use std::sync::Arc;

use serde_json::json;
use tokio::sync::broadcast;

use crate::client::ClientRegistry;

#[derive(Clone)]
pub struct ReloadNotifier {
    tx: broadcast::Sender<i64>,
}

impl ReloadNotifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Announce a committed version. Never blocks; with no bridge running
    /// the stamp is simply dropped.
    pub fn notify(&self, version: i64) {
        if self.tx.send(version).is_err() {
            tracing::debug!(version, "no reload subscribers");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<i64> {
        self.tx.subscribe()
    }

    /// Spawn the task that forwards stamps to every registered client.
    pub fn start_bridge(&self, registry: Arc<ClientRegistry>) -> tokio::task::JoinHandle<()> {
        let mut rx = self.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(version) => {
                        let delivered = registry.broadcast(&reload_message(version));
                        tracing::debug!(version, delivered, "reload broadcast");
                    }
                    // only the newest stamp matters and it is still queued
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(skipped = n, "reload bridge lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        tracing::info!("reload channel closed");
                        break;
                    }
                }
            }
        })
    }
}

/// Wire form of the push message: `{"type":"reload","lastModified":n}`.
pub fn reload_message(version: i64) -> String {
    json!({ "type": "reload", "lastModified": version }).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn message_shape() {
        let value: serde_json::Value = serde_json::from_str(&reload_message(1_700_000_000_000)).unwrap();
        assert_eq!(value["type"], "reload");
        assert_eq!(value["lastModified"], 1_700_000_000_000i64);
    }

    #[test]
    fn notify_without_subscribers_is_harmless() {
        ReloadNotifier::new(4).notify(1);
    }

    #[tokio::test]
    async fn bridge_delivers_to_every_client() {
        let registry = Arc::new(ClientRegistry::new(8));
        let (_a, mut rx_a) = registry.register();
        let (_b, mut rx_b) = registry.register();

        let notifier = ReloadNotifier::new(16);
        let _bridge = notifier.start_bridge(Arc::clone(&registry));
        notifier.notify(42);

        for rx in [&mut rx_a, &mut rx_b] {
            let msg = tokio::time::timeout(Duration::from_secs(2), rx.recv())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(msg, reload_message(42));
        }
    }

    #[tokio::test]
    async fn stalled_client_does_not_block_others() {
        let registry = Arc::new(ClientRegistry::new(1));
        let (_stalled, _never_read) = registry.register();
        let (_live, mut rx_live) = registry.register();

        let notifier = ReloadNotifier::new(16);
        let _bridge = notifier.start_bridge(Arc::clone(&registry));
        notifier.notify(1);
        let first = tokio::time::timeout(Duration::from_secs(2), rx_live.recv()).await.unwrap();
        assert_eq!(first.as_deref(), Some(reload_message(1).as_str()));

        notifier.notify(2);
        let second = tokio::time::timeout(Duration::from_secs(2), rx_live.recv()).await.unwrap();
        assert_eq!(second.as_deref(), Some(reload_message(2).as_str()));
    }
}
