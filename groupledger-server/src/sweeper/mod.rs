//! Periodic finalization of time-bounded auctions and tasks.
//!
//! Each sweeper is an independent tokio task with its own interval. A tick
//! never overlaps the previous one, and a failure while finalizing one item
//! is logged and retried on a later tick because the item stays eligible.

mod auctions;
mod tasks;

use std::fmt;
use std::future::Future;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub use auctions::{AuctionOutcome, run_auction_sweep};
pub use tasks::{TaskOutcome, run_task_sweep};

use crate::notify::Notifications;
use crate::storage::Store;

/// Counters for a single sweep pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    /// Items that matched the sweep predicate.
    pub examined: usize,
    pub finalized: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweeperKind {
    Auctions,
    Tasks,
}

impl fmt::Display for SweeperKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SweeperKind::Auctions => f.write_str("auctions"),
            SweeperKind::Tasks => f.write_str("tasks"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SweepSchedule {
    pub auction_interval: Duration,
    pub task_interval: Duration,
}

impl Default for SweepSchedule {
    fn default() -> Self {
        Self {
            auction_interval: Duration::from_secs(60),
            task_interval: Duration::from_secs(60),
        }
    }
}

/// Owns the two background sweepers from start to shutdown.
pub struct Sweepers {
    cancel: CancellationToken,
    joinset: JoinSet<SweeperKind>,
}

impl Sweepers {
    /// Spawns both sweepers. They stop when `parent` is cancelled or on
    /// [`Sweepers::shutdown`].
    pub fn start(
        store: Store,
        notifications: Notifications,
        schedule: SweepSchedule,
        parent: &CancellationToken,
    ) -> Self {
        let cancel = parent.child_token();
        let mut joinset = JoinSet::new();

        {
            let store = store.clone();
            let notifications = notifications.clone();
            joinset.spawn(sweep_loop(
                SweeperKind::Auctions,
                schedule.auction_interval,
                cancel.clone(),
                move || {
                    let store = store.clone();
                    let notifications = notifications.clone();
                    async move { run_auction_sweep(&store, &notifications).await }
                },
            ));
        }
        joinset.spawn(sweep_loop(
            SweeperKind::Tasks,
            schedule.task_interval,
            cancel.clone(),
            move || {
                let store = store.clone();
                let notifications = notifications.clone();
                async move { run_task_sweep(&store, &notifications).await }
            },
        ));

        Self { cancel, joinset }
    }

    /// Stops future ticks and waits for any in-flight tick to finish.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        while let Some(res) = self.joinset.join_next().await {
            match res {
                Ok(kind) => debug!(sweeper = %kind, "sweeper joined"),
                Err(err) => warn!(error = %err, "sweeper task aborted"),
            }
        }
    }
}

async fn sweep_loop<F, Fut>(
    kind: SweeperKind,
    period: Duration,
    cancel: CancellationToken,
    mut sweep: F,
) -> SweeperKind
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = SweepReport> + Send,
{
    info!(sweeper = %kind, period_secs = period.as_secs(), "sweeper started");
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        // Runs outside select! so shutdown never interrupts a tick.
        let report = sweep().await;
        if report.failed > 0 {
            warn!(
                sweeper = %kind,
                examined = report.examined,
                finalized = report.finalized,
                failed = report.failed,
                "sweep tick finished with failures"
            );
        } else {
            debug!(
                sweeper = %kind,
                examined = report.examined,
                finalized = report.finalized,
                "sweep tick finished"
            );
        }
    }
    info!(sweeper = %kind, "sweeper stopped");
    kind
}
