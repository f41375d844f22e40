//! Event Forwarding
//!
//! After each successful append the writer offers the record to an
//! optional forwarder. Offers never block: a bounded queue feeds a
//! background task that delivers to an `EventSink`, and delivery
//! failures are only logged.

pub mod webhook;

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::audit::entry::AuditEvent;
use crate::error::AuditResult;

pub use webhook::WebhookSink;

/// Destination for forwarded audit events
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &str;

    async fn forward(&self, event: &AuditEvent) -> AuditResult<()>;
}

/// Writer-side handle of the forwarding queue
#[derive(Clone, Debug)]
pub struct ForwardingPublisher {
    tx: mpsc::Sender<AuditEvent>,
}

impl ForwardingPublisher {
    /// Offer an event for forwarding. Returns false if it was dropped.
    pub fn offer(&self, event: &AuditEvent) -> bool {
        match self.tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(event)) => {
                warn!("Forwarding queue full, dropping event {}", event.event_id);
                false
            }
            Err(TrySendError::Closed(event)) => {
                warn!("Forwarder stopped, dropping event {}", event.event_id);
                false
            }
        }
    }
}

/// Delivery counters reported when the forwarder shuts down
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ForwardingStats {
    pub delivered: u64,
    pub failed: u64,
}

/// Start the forwarding task. It runs until every publisher is dropped.
pub fn spawn_forwarder(
    sink: Arc<dyn EventSink>,
    capacity: usize,
) -> (ForwardingPublisher, JoinHandle<ForwardingStats>) {
    let (tx, mut rx) = mpsc::channel::<AuditEvent>(capacity.max(1));

    let handle = tokio::spawn(async move {
        let mut stats = ForwardingStats::default();
        info!("Event forwarder started ({})", sink.name());

        while let Some(event) = rx.recv().await {
            match sink.forward(&event).await {
                Ok(()) => {
                    stats.delivered += 1;
                    debug!("Forwarded event {} to {}", event.event_id, sink.name());
                }
                Err(e) => {
                    stats.failed += 1;
                    warn!("Failed to forward event {} to {}: {}", event.event_id, sink.name(), e);
                }
            }
        }

        info!(
            "Event forwarder stopped: {} delivered, {} failed",
            stats.delivered, stats.failed
        );
        stats
    });

    (ForwardingPublisher { tx }, handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::entry::{EventFields, GENESIS_HASH};
    use crate::error::AuditError;
    use tokio::sync::Mutex;

    struct RecordingSink {
        seen: Mutex<Vec<String>>,
        fail: bool,
    }

    #[async_trait]
    impl EventSink for RecordingSink {
        fn name(&self) -> &str {
            "recording"
        }

        async fn forward(&self, event: &AuditEvent) -> AuditResult<()> {
            if self.fail {
                return Err(AuditError::ForwardingError("sink down".to_string()));
            }
            self.seen.lock().await.push(event.event_id.clone());
            Ok(())
        }
    }

    fn event(action: &str) -> AuditEvent {
        EventFields::new("svc", action, "resource/1")
            .seal(GENESIS_HASH)
            .unwrap()
    }

    #[tokio::test]
    async fn test_forwarder_delivers_in_order() {
        let sink = Arc::new(RecordingSink { seen: Mutex::new(vec![]), fail: false });
        let (publisher, handle) = spawn_forwarder(sink.clone(), 8);

        let first = event("read");
        let second = event("delete");
        assert!(publisher.offer(&first));
        assert!(publisher.offer(&second));
        drop(publisher);

        let stats = handle.await.unwrap();
        assert_eq!(stats, ForwardingStats { delivered: 2, failed: 0 });
        assert_eq!(*sink.seen.lock().await, vec![first.event_id, second.event_id]);
    }

    #[tokio::test]
    async fn test_sink_failures_are_counted_not_raised() {
        let sink = Arc::new(RecordingSink { seen: Mutex::new(vec![]), fail: true });
        let (publisher, handle) = spawn_forwarder(sink, 8);

        assert!(publisher.offer(&event("read")));
        drop(publisher);

        let stats = handle.await.unwrap();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.delivered, 0);
    }

    #[tokio::test]
    async fn test_offer_after_shutdown_is_dropped() {
        let sink = Arc::new(RecordingSink { seen: Mutex::new(vec![]), fail: false });
        let (publisher, handle) = spawn_forwarder(sink, 1);
        handle.abort();
        let _ = handle.await;

        assert!(!publisher.offer(&event("read")));
    }
}
