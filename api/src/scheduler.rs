//! The accrual polling pipeline.
//!
//! Uploaded orders enter `pending`. The poller sweeps the map, querying
//! the accrual service for every order that has not reached a terminal
//! status, and forwards `200` bodies to the applier over a
//! single-producer single-consumer channel. The applier writes each
//! update to the store. One wait governs each sweep; the last wait
//! observed in a sweep wins, so a rate-limit signal dominates the next
//! sweep.
//!
//! ```text
//!  NEW ──(poll 200 non-terminal)──▶ PROCESSING
//!   │                                    │
//!   │                                    ▼
//!   └──(poll 200 terminal)────────▶ PROCESSED | INVALID
//!                                   (purged on the next sweep)
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;
use tokio::sync::{Mutex, mpsc, watch};

use payloads::OrderStatus;

use crate::accrual::{AccrualClient, AccrualOrder, PollOutcome};
use crate::store;
use crate::telemetry::log_error;

/// Wait between sweeps unless the accrual service dictates otherwise.
pub const DEFAULT_POLL_WAIT: Duration = Duration::from_secs(2);

/// Updates in flight between the poller and the applier.
const UPDATE_QUEUE_CAPACITY: usize = 64;

pub struct AccrualScheduler {
    pending: Arc<Mutex<HashMap<i64, OrderStatus>>>,
    shutdown: watch::Sender<bool>,
}

impl AccrualScheduler {
    /// Spawn the poller and applier tasks.
    ///
    /// [`shutdown`](Self::shutdown) (or dropping the scheduler) stops the
    /// poller; the poller closes the updates channel on exit, which lets
    /// the applier drain and terminate.
    pub fn start(
        client: AccrualClient,
        pool: PgPool,
        poll_wait: Duration,
    ) -> Self {
        let pending = Arc::new(Mutex::new(HashMap::new()));
        let (shutdown, shutdown_rx) = watch::channel(false);
        let (updates_tx, updates_rx) = mpsc::channel(UPDATE_QUEUE_CAPACITY);
        tokio::spawn(poll_loop(
            client,
            Arc::clone(&pending),
            updates_tx,
            poll_wait,
            shutdown_rx,
        ));
        tokio::spawn(apply_loop(pool, updates_rx));
        Self { pending, shutdown }
    }

    /// Queue an order for status polling. Safe under concurrent callers.
    pub async fn enqueue(&self, number: i64) {
        self.pending.lock().await.insert(number, OrderStatus::New);
    }

    /// Signal both background tasks to stop.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }
}

async fn poll_loop(
    client: AccrualClient,
    pending: Arc<Mutex<HashMap<i64, OrderStatus>>>,
    updates: mpsc::Sender<AccrualOrder>,
    default_wait: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let wait = sweep(&client, &pending, &updates, default_wait).await;
        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            changed = shutdown.changed() => {
                // a dropped sender also means the process is going away
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    // dropping `updates` here ends the applier once it has drained
    tracing::info!("accrual poller stopped");
}

/// One traversal of `pending`: purge entries whose cached status is
/// terminal, poll the accrual service for the rest, and settle on the wait
/// before the next sweep.
async fn sweep(
    client: &AccrualClient,
    pending: &Mutex<HashMap<i64, OrderStatus>>,
    updates: &mpsc::Sender<AccrualOrder>,
    default_wait: Duration,
) -> Duration {
    let mut wait = default_wait;
    let mut pending = pending.lock().await;
    pending.retain(|_, status| !status.is_terminal());
    for (&number, status) in pending.iter_mut() {
        let outcome = match client.fetch(number).await {
            Ok(outcome) => outcome,
            Err(e) => {
                log_error(e);
                wait = default_wait;
                continue;
            }
        };
        wait = next_wait(&outcome, default_wait);
        if let PollOutcome::Ready(update) = outcome {
            *status = update.status.into();
            if updates.send(update).await.is_err() {
                tracing::error!(
                    number,
                    "applier is gone; dropping accrual update"
                );
            }
        }
    }
    wait
}

/// The wait a poll outcome asks for. Only a rate limit with a usable
/// `Retry-After` overrides the default.
fn next_wait(outcome: &PollOutcome, default_wait: Duration) -> Duration {
    match outcome {
        PollOutcome::RateLimited(Some(seconds)) => {
            Duration::from_secs(*seconds)
        }
        _ => default_wait,
    }
}

async fn apply_loop(pool: PgPool, mut updates: mpsc::Receiver<AccrualOrder>) {
    while let Some(update) = updates.recv().await {
        let number: i64 = match update.order.parse() {
            Ok(number) => number,
            Err(_) => {
                tracing::warn!(
                    order = %update.order,
                    "accrual service reported an unparseable order number"
                );
                continue;
            }
        };
        // at-most-once application: failures are logged and the update is
        // dropped
        if let Err(e) = store::balance::apply_accrual(
            number,
            update.accrual,
            update.status.into(),
            &pool,
        )
        .await
        {
            tracing::error!(
                number,
                error = %e,
                "failed to apply accrual update"
            );
        }
    }
    tracing::info!("accrual applier stopped");
}
