use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::cache::PipelineCache;
use crate::db::{self, DbPool};
use crate::lock::LeaderLock;
use crate::message::ChatMessage;
use crate::pipeline::PipelineStatus;

/// Leader-elected batch writer.
///
/// Every process runs the tick on a fixed period, but only the current
/// holder of the leadership lock drains the batch queue and bulk-writes to
/// the durable store. The drain is peek → write → trim: entries are removed
/// only after the store acknowledges a write covering them, so a crash or a
/// failed write at any point leaves the queue intact for the next leader.
/// The bulk insert is id-keyed and skips duplicates, which keeps a retry
/// (or a brief two-leader window after a TTL race) harmless.
pub struct BatchWriter {
    cache: Arc<Mutex<PipelineCache>>,
    lock: LeaderLock,
    pool: Arc<DbPool>,
    status: Arc<PipelineStatus>,
    deployment: String,
    batch_max: usize,
}

impl BatchWriter {
    pub fn new(
        cache: Arc<Mutex<PipelineCache>>,
        lock: LeaderLock,
        pool: Arc<DbPool>,
        status: Arc<PipelineStatus>,
        deployment: String,
        batch_max: usize,
    ) -> Self {
        Self {
            cache,
            lock,
            pool,
            status,
            deployment,
            batch_max,
        }
    }

    /// One writer tick.
    ///
    /// Follower → Leader on a won acquire; a held lock is renewed on every
    /// tick so a live leader is never demoted by its own TTL. Any failure
    /// during the flush releases leadership immediately and leaves the
    /// queue untouched.
    pub async fn tick(&mut self) -> Result<()> {
        let leading = match self.lock.try_acquire().await {
            Ok(leading) => leading,
            Err(e) => {
                self.status.set_is_leader(false);
                return Err(e.context("Leadership attempt failed"));
            }
        };

        if !leading {
            self.status.set_is_leader(false);
            return Ok(());
        }
        self.status.set_is_leader(true);

        match self.flush_queue().await {
            Ok(0) => Ok(()),
            Ok(flushed) => {
                crate::metrics::BATCH_FLUSH_TOTAL.inc();
                info!(count = flushed, "Batch flush complete");
                Ok(())
            }
            Err(e) => {
                crate::metrics::BATCH_FLUSH_FAILURE_TOTAL.inc();
                error!(error = %e, "Batch flush failed, releasing leadership");
                if let Err(release_err) = self.lock.release().await {
                    warn!(error = %release_err, "Failed to release leadership after flush error");
                }
                self.status.set_is_leader(false);
                Err(e)
            }
        }
    }

    /// Drain up to `batch_max` queue entries into one idempotent bulk insert.
    /// Returns how many entries were removed from the queue.
    async fn flush_queue(&mut self) -> Result<usize> {
        let raw = self
            .cache
            .lock()
            .await
            .queue_peek(&self.deployment, self.batch_max)
            .await
            .context("Failed to peek batch queue")?;

        if raw.is_empty() {
            return Ok(0);
        }
        let drained = raw.len();

        let mut batch: Vec<ChatMessage> = Vec::with_capacity(drained);
        for bytes in &raw {
            match rmp_serde::from_slice::<ChatMessage>(bytes) {
                Ok(message) => batch.push(message),
                Err(e) => {
                    // An entry that cannot decode will never decode; keeping
                    // it would wedge the FIFO forever.
                    error!(error = %e, "Dropping undecodable batch queue entry");
                }
            }
        }

        if !batch.is_empty() {
            let written = db::insert_messages(&self.pool, &batch)
                .await
                .context("Bulk insert failed")?;
            self.status.set_store_connected(true);

            let duplicates = batch.len() as u64 - written;
            if duplicates > 0 {
                debug!(duplicates, "Skipped already-persisted messages in batch");
            }
        }

        // Only after the store acknowledged the batch: remove exactly the
        // entries we drained. Entries appended since the peek stay put.
        self.cache
            .lock()
            .await
            .queue_trim(&self.deployment, drained)
            .await
            .context("Failed to trim batch queue after write")?;

        Ok(drained)
    }

    /// Voluntary stand-down during shutdown, so the next tick elsewhere in
    /// the fleet does not have to wait out our TTL.
    pub async fn release_leadership(&mut self) {
        if let Err(e) = self.lock.release().await {
            warn!(error = %e, "Failed to release leadership on shutdown");
        }
        self.status.set_is_leader(false);
    }

    /// Periodic driver: tick on `period` until shutdown.
    pub async fn run(
        mut self,
        period: std::time::Duration,
        mut shutdown: tokio::sync::watch::Receiver<bool>,
    ) {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(period_secs = period.as_secs(), "Batch writer started");

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.tick().await {
                        error!(error = %e, "Batch writer tick failed");
                    }
                }
                _ = shutdown.changed() => {
                    info!("Batch writer shutting down");
                    self.release_leadership().await;
                    return;
                }
            }
        }
    }
}
