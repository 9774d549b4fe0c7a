use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::broadcast::{Broadcaster, PRESENCE_ROOM};
use crate::cache::PipelineCache;
use crate::db::{self, DbPool};

/// Periodic sweep correcting presence drift.
///
/// A crash or network partition can leave a user marked online with no live
/// connection anywhere in the fleet, a ghost no disconnect handler will
/// ever clean up. Each sweep compares the marks against the live-connection
/// sets the Broadcaster's hooks maintain and corrects the mismatches:
/// durable status to offline with a last-seen timestamp, mark cleared,
/// status change broadcast.
pub struct PresenceReconciler {
    cache: Arc<Mutex<PipelineCache>>,
    pool: Arc<DbPool>,
    broadcaster: Arc<Broadcaster>,
}

impl PresenceReconciler {
    pub fn new(
        cache: Arc<Mutex<PipelineCache>>,
        pool: Arc<DbPool>,
        broadcaster: Arc<Broadcaster>,
    ) -> Self {
        Self {
            cache,
            pool,
            broadcaster,
        }
    }

    /// One reconciliation pass. Returns how many stale marks were corrected.
    /// A failure on one user is logged and does not abort the pass.
    pub async fn sweep(&self) -> Result<usize> {
        let marked = self
            .cache
            .lock()
            .await
            .marked_online()
            .await
            .context("Failed to read presence marks")?;

        let mut corrected = 0;
        for user_id in marked {
            match self.reconcile_user(&user_id).await {
                Ok(true) => corrected += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(error = %e, "Failed to reconcile presence for user");
                }
            }
        }

        if corrected > 0 {
            crate::metrics::PRESENCE_CORRECTIONS_TOTAL.inc_by(corrected as u64);
            info!(corrected, "Presence sweep corrected stale marks");
        }
        Ok(corrected)
    }

    /// Returns true when the user's mark was stale and has been corrected.
    async fn reconcile_user(&self, user_id: &Uuid) -> Result<bool> {
        let live = self
            .cache
            .lock()
            .await
            .has_live_connection(user_id)
            .await
            .context("Failed to check live connections")?;
        if live {
            return Ok(false);
        }

        let last_seen = Utc::now();
        db::mark_user_offline(&self.pool, user_id, last_seen)
            .await
            .context("Failed to store offline status")?;

        self.cache
            .lock()
            .await
            .clear_online_mark(user_id)
            .await
            .context("Failed to clear presence mark")?;

        // Status change is a non-chat broadcast on the shared presence
        // stream; a failed broadcast is not worth re-marking the user over.
        if let Err(e) = self
            .broadcaster
            .broadcast(
                PRESENCE_ROOM,
                "presence.offline",
                json!({ "userId": user_id, "lastSeenAt": last_seen }),
            )
            .await
        {
            warn!(error = %e, "Failed to broadcast presence change");
        }

        Ok(true)
    }

    /// Periodic driver: sweep on `period` until shutdown.
    pub async fn run(
        self,
        period: std::time::Duration,
        mut shutdown: tokio::sync::watch::Receiver<bool>,
    ) {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(period_secs = period.as_secs(), "Presence reconciler started");

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.sweep().await {
                        error!(error = %e, "Presence sweep failed");
                    }
                }
                _ = shutdown.changed() => {
                    info!("Presence reconciler shutting down");
                    return;
                }
            }
        }
    }
}
