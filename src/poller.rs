//! Scheduled reconciliation of leases awaiting signature.
//!
//! Webhook delivery is best-effort, so this poller is the guarantee that
//! every signed document is eventually observed: each cycle it sweeps all
//! pending leases with a provider document and reconciles them one by one.

use rand::Rng;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Interval, interval};
use tracing::{debug, error, info};

use crate::coordinator::{ReconcileOutcome, SignatureCoordinator};
use crate::lease;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcilePollerConfig {
    pub polling_interval: Duration,
    pub max_jitter: Duration,
}

impl Default for ReconcilePollerConfig {
    fn default() -> Self {
        Self {
            polling_interval: Duration::from_secs(60),
            max_jitter: Duration::from_secs(5),
        }
    }
}

pub struct ReconcilePoller {
    config: ReconcilePollerConfig,
    coordinator: Arc<SignatureCoordinator>,
    pool: SqlitePool,
    interval: Interval,
}

impl ReconcilePoller {
    pub fn new(
        config: ReconcilePollerConfig,
        coordinator: Arc<SignatureCoordinator>,
        pool: SqlitePool,
    ) -> Self {
        let interval = interval(config.polling_interval);

        Self {
            config,
            coordinator,
            pool,
            interval,
        }
    }

    pub async fn run(mut self) {
        info!(
            "Starting signature reconciliation poller with interval: {:?}",
            self.config.polling_interval
        );

        loop {
            self.interval.tick().await;
            if let Err(e) = self.reconcile_pending().await {
                error!("Reconciliation cycle failed: {e}");
            }
        }
    }

    /// One full pass over the leases awaiting signature.
    ///
    /// Each lease is reconciled independently: a provider or database
    /// failure on one is logged and the sweep moves on, so a single bad
    /// record cannot starve the rest of the batch.
    pub async fn reconcile_pending(&self) -> Result<(), sqlx::Error> {
        debug!("Starting reconciliation cycle for pending signatures");

        let pending = lease::find_pending_signatures(&self.pool).await?;

        if pending.is_empty() {
            debug!("No leases awaiting signature");
            return Ok(());
        }

        info!("Reconciling {} leases awaiting signature", pending.len());

        for lease in pending {
            match self.coordinator.reconcile(&lease).await {
                Ok(ReconcileOutcome::TransitionedToSigned) => {
                    info!("Lease {} reconciled to signed", lease.id);
                }
                Ok(outcome) => {
                    debug!("Lease {} reconciliation outcome: {outcome:?}", lease.id);
                }
                Err(e) => {
                    error!("Failed to reconcile lease {}: {e}", lease.id);
                }
            }

            self.add_jittered_delay().await;
        }

        debug!("Completed reconciliation cycle");
        Ok(())
    }

    async fn add_jittered_delay(&self) {
        if self.config.max_jitter > Duration::ZERO {
            #[allow(clippy::cast_possible_truncation)]
            let max_jitter_millis = self.config.max_jitter.as_millis() as u64;
            let jitter_millis = rand::thread_rng().gen_range(0..max_jitter_millis);
            let jitter = Duration::from_millis(jitter_millis);
            tokio::time::sleep(jitter).await;
        }
    }
}
