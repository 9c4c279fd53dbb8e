//! Best-effort delivery of ledger events to members.
//!
//! Delivery runs on its own task after the ledger transaction has committed.
//! A failed delivery is logged and dropped; it never touches balances.

use std::sync::Arc;

use async_trait::async_trait;
use groupledger_shared::api::LedgerEvent;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

use crate::storage::Store;

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("no delivery target for {0}")]
    NoTarget(String),
    #[error("delivery failed: {0}")]
    Delivery(String),
}

/// A channel that can reach group members (push, mail, chat...).
#[async_trait]
pub trait Notifier: Send + Sync + 'static {
    async fn deliver(&self, event: &LedgerEvent) -> Result<(), NotifyError>;
}

/// Writes events to the log. Used when no external channel is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn deliver(&self, event: &LedgerEvent) -> Result<(), NotifyError> {
        let payload =
            serde_json::to_string(event).map_err(|e| NotifyError::Delivery(e.to_string()))?;
        info!(%payload, "notify: event");
        Ok(())
    }
}

#[derive(Clone)]
pub struct Notifications {
    inner: Arc<dyn Notifier>,
    in_flight: TaskTracker,
}

impl Notifications {
    pub fn new(inner: Arc<dyn Notifier>) -> Self {
        Self {
            inner,
            in_flight: TaskTracker::new(),
        }
    }

    /// Fire-and-forget delivery on a background task.
    pub fn dispatch_event(&self, store: Store, event: LedgerEvent) {
        let inner = self.inner.clone();
        self.in_flight.spawn(async move {
            if let Err(err) = inner.deliver(&event).await {
                warn!(error = %err, "notify: delivery failed");
                return;
            }
            if let LedgerEvent::AuctionWon { auction_id, .. } = event
                && let Err(err) = store.mark_winner_notified(auction_id).await
            {
                warn!(auction_id, error = %err, "notify: failed to flag winner as notified");
            }
        });
    }

    /// Waits for every delivery dispatched so far.
    pub async fn flush(&self) {
        self.in_flight.close();
        self.in_flight.wait().await;
        self.in_flight.reopen();
    }
}

impl Default for Notifications {
    fn default() -> Self {
        Self::new(Arc::new(LogNotifier))
    }
}
