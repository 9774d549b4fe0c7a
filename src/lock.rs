use std::time::Duration;

use anyhow::{Context, Result};
use redis::Script;
use uuid::Uuid;

/// Owner-checked renewal: refresh the TTL only while we still hold the key.
const RENEW_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('PEXPIRE', KEYS[1], ARGV[2])
else
    return 0
end"#;

/// Owner-checked release: never delete a lock another process has since won.
const RELEASE_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
else
    return 0
end"#;

/// Time-bounded, mutually-exclusive leadership claim.
///
/// One global key holds the current owner's token with a TTL. Acquisition is
/// a single non-blocking `SET NX PX`, so a losing process never waits. The TTL
/// bounds how long a crashed leader blocks the fleet; a live leader must
/// renew every tick or it is implicitly demoted when the key expires.
/// Renewal and release are compare-and-set on the owner token, so an expired
/// ex-leader cannot disturb its successor.
pub struct LeaderLock {
    client: redis::aio::ConnectionManager,
    key: String,
    token: String,
    ttl_ms: u64,
    renew: Script,
    release: Script,
}

impl LeaderLock {
    pub fn new(client: redis::aio::ConnectionManager, key: impl Into<String>, ttl: Duration) -> Self {
        Self {
            client,
            key: key.into(),
            // Each process instance gets its own owner token for the
            // compare-and-set checks.
            token: Uuid::new_v4().to_string(),
            ttl_ms: ttl.as_millis() as u64,
            renew: Script::new(RENEW_SCRIPT),
            release: Script::new(RELEASE_SCRIPT),
        }
    }

    /// Single non-blocking acquisition attempt.
    ///
    /// Returns true when this process holds the lock after the call: either
    /// the `SET NX` won, or we already held it (in which case the TTL is
    /// renewed, keeping a live leader from involuntary demotion).
    pub async fn try_acquire(&mut self) -> Result<bool> {
        let acquired: Option<String> = redis::cmd("SET")
            .arg(&self.key)
            .arg(&self.token)
            .arg("NX")
            .arg("PX")
            .arg(self.ttl_ms)
            .query_async(&mut self.client)
            .await
            .context("Leadership acquire failed")?;

        if acquired.is_some() {
            tracing::info!(key = %self.key, "Leadership acquired");
            return Ok(true);
        }

        // Key exists: held by us (renew) or by another process (lose the tick).
        self.renew_held().await
    }

    /// Refresh the TTL if we still own the lock.
    async fn renew_held(&mut self) -> Result<bool> {
        let renewed: i64 = self
            .renew
            .key(&self.key)
            .arg(&self.token)
            .arg(self.ttl_ms)
            .invoke_async(&mut self.client)
            .await
            .context("Leadership renewal failed")?;
        Ok(renewed == 1)
    }

    /// Give up leadership immediately. Returns true when the key was ours to
    /// delete; false when it had already expired or changed hands.
    pub async fn release(&mut self) -> Result<bool> {
        let released: i64 = self
            .release
            .key(&self.key)
            .arg(&self.token)
            .invoke_async(&mut self.client)
            .await
            .context("Leadership release failed")?;

        if released == 1 {
            tracing::info!(key = %self.key, "Leadership released");
        }
        Ok(released == 1)
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}
