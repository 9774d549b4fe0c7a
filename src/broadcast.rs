use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::Result;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, Mutex, RwLock};
use uuid::Uuid;

use crate::cache::PipelineCache;
use crate::pipeline::PipelineStatus;

/// Room that every session implicitly joins on connect; presence changes are
/// broadcast here instead of per-room.
pub const PRESENCE_ROOM: &str = "presence";

pub type ConnectionId = Uuid;

/// One event fanned to all sessions subscribed to a room.
///
/// Frames travel through cross-process pub/sub, so a message produced on one
/// instance reaches sockets on any other. Room ids are strings: message rooms
/// use the room UUID, well-known streams (presence) use a fixed name.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastFrame {
    pub room_id: String,
    pub event: String,
    pub payload: Value,
}

struct Session {
    user_id: Uuid,
    tx: mpsc::UnboundedSender<BroadcastFrame>,
}

/// In-process view of connected sessions and their room subscriptions.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: HashMap<ConnectionId, Session>,
    rooms: HashMap<String, HashSet<ConnectionId>>,
}

impl SessionRegistry {
    pub fn insert_session(
        &mut self,
        connection_id: ConnectionId,
        user_id: Uuid,
        tx: mpsc::UnboundedSender<BroadcastFrame>,
    ) {
        self.sessions.insert(connection_id, Session { user_id, tx });
        // Presence events reach every session without an explicit join.
        self.join(&connection_id, PRESENCE_ROOM);
    }

    /// Remove a session everywhere. Returns its user id if it existed.
    pub fn remove_session(&mut self, connection_id: &ConnectionId) -> Option<Uuid> {
        for members in self.rooms.values_mut() {
            members.remove(connection_id);
        }
        self.rooms.retain(|_, members| !members.is_empty());
        self.sessions.remove(connection_id).map(|s| s.user_id)
    }

    pub fn join(&mut self, connection_id: &ConnectionId, room_id: &str) -> bool {
        if !self.sessions.contains_key(connection_id) {
            return false;
        }
        self.rooms
            .entry(room_id.to_string())
            .or_default()
            .insert(*connection_id);
        true
    }

    pub fn leave(&mut self, connection_id: &ConnectionId, room_id: &str) {
        if let Some(members) = self.rooms.get_mut(room_id) {
            members.remove(connection_id);
            if members.is_empty() {
                self.rooms.remove(room_id);
            }
        }
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Send a frame to every member of its room, once per connection.
    /// Returns how many sessions received it and which senders were dead.
    fn fanout(&self, frame: &BroadcastFrame) -> (usize, Vec<ConnectionId>) {
        let Some(members) = self.rooms.get(&frame.room_id) else {
            return (0, Vec::new());
        };

        let mut delivered = 0;
        let mut dead = Vec::new();
        for connection_id in members {
            let Some(session) = self.sessions.get(connection_id) else {
                continue;
            };
            if session.tx.send(frame.clone()).is_ok() {
                delivered += 1;
            } else {
                dead.push(*connection_id);
            }
        }
        (delivered, dead)
    }
}

/// Cross-process realtime fan-out.
///
/// `broadcast` publishes a frame on a shared pub/sub channel; every instance
/// (including the publishing one) runs a listener that delivers the frame to
/// its local sessions. Local delivery happens only through the listener, so
/// each joined connection sees a frame exactly once no matter where it was
/// produced. This decoupling is what lets the submit path broadcast
/// optimistically without waiting on the log or the durable write.
pub struct Broadcaster {
    sessions: Arc<RwLock<SessionRegistry>>,
    cache: Arc<Mutex<PipelineCache>>,
    channel: String,
    status: Arc<PipelineStatus>,
}

impl Broadcaster {
    pub fn new(
        cache: Arc<Mutex<PipelineCache>>,
        channel: impl Into<String>,
        status: Arc<PipelineStatus>,
    ) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(SessionRegistry::default())),
            cache,
            channel: channel.into(),
            status,
        }
    }

    /// Connect hook: register the session locally and record the user's
    /// presence mark and live connection in the cache. Cache failures are
    /// logged, not fatal; the reconciler repairs presence drift later.
    pub async fn register_connection(
        &self,
        user_id: Uuid,
        tx: mpsc::UnboundedSender<BroadcastFrame>,
    ) -> ConnectionId {
        let connection_id = Uuid::new_v4();
        self.sessions
            .write()
            .await
            .insert_session(connection_id, user_id, tx);

        crate::metrics::CONNECTIONS_TOTAL.inc();

        let mut cache = self.cache.lock().await;
        if let Err(e) = cache.track_connection(&user_id, &connection_id).await {
            tracing::warn!(error = %e, "Failed to track connection in cache");
        }
        if let Err(e) = cache.mark_online(&user_id).await {
            tracing::warn!(error = %e, "Failed to set presence mark");
        }

        tracing::debug!(connection_id = %connection_id, "Session registered");
        connection_id
    }

    /// Graceful disconnect hook. Clears the presence mark once the user's
    /// last connection is gone; an ungraceful disconnect skips this entirely
    /// and is corrected by the presence reconciler.
    pub async fn unregister_connection(&self, connection_id: &ConnectionId) {
        let user_id = self.sessions.write().await.remove_session(connection_id);
        let Some(user_id) = user_id else {
            return;
        };

        let mut cache = self.cache.lock().await;
        if let Err(e) = cache.untrack_connection(&user_id, connection_id).await {
            tracing::warn!(error = %e, "Failed to untrack connection in cache");
            return;
        }
        match cache.has_live_connection(&user_id).await {
            Ok(false) => {
                if let Err(e) = cache.clear_online_mark(&user_id).await {
                    tracing::warn!(error = %e, "Failed to clear presence mark");
                }
            }
            Ok(true) => {}
            Err(e) => tracing::warn!(error = %e, "Failed to check live connections"),
        }
    }

    /// Subscribe a connection to a room. Capability checks (`is_member` /
    /// `has_access`) are the caller's responsibility, per the authorization
    /// layer's contract.
    pub async fn join_room(&self, connection_id: &ConnectionId, room_id: &str) -> bool {
        self.sessions.write().await.join(connection_id, room_id)
    }

    pub async fn leave_room(&self, connection_id: &ConnectionId, room_id: &str) {
        self.sessions.write().await.leave(connection_id, room_id);
    }

    /// Fan an event to all sessions subscribed to `room_id`, fleet-wide.
    pub async fn broadcast(&self, room_id: &str, event: &str, payload: Value) -> Result<()> {
        let frame = BroadcastFrame {
            room_id: room_id.to_string(),
            event: event.to_string(),
            payload,
        };
        let encoded = serde_json::to_string(&frame)?;

        let result = self.cache.lock().await.publish(&self.channel, &encoded).await;
        match result {
            Ok(()) => {
                self.status.set_broadcaster_connected(true);
                crate::metrics::BROADCAST_FRAMES_TOTAL.inc();
                Ok(())
            }
            Err(e) => {
                self.status.set_broadcaster_connected(false);
                Err(e)
            }
        }
    }

    /// Deliver a frame to local sessions. Dead senders (socket task gone
    /// without a graceful disconnect) are dropped from the registry; their
    /// presence state is left for the reconciler.
    pub async fn deliver_local(&self, frame: &BroadcastFrame) -> usize {
        let (delivered, dead) = self.sessions.read().await.fanout(frame);

        if !dead.is_empty() {
            let mut registry = self.sessions.write().await;
            for connection_id in &dead {
                let _ = registry.remove_session(connection_id);
            }
            tracing::debug!(count = dead.len(), "Dropped dead sessions during fan-out");
        }
        delivered
    }

    /// Long-running listener draining the pub/sub channel into local
    /// sessions. Reconnects with a short backoff if the subscription drops.
    pub async fn run_listener(self: Arc<Self>, redis_url: String) {
        loop {
            let client = match redis::Client::open(redis_url.as_str()) {
                Ok(client) => client,
                Err(e) => {
                    tracing::error!(error = %e, "Invalid cache URL for broadcast listener");
                    return;
                }
            };

            let mut pubsub = match client.get_async_pubsub().await {
                Ok(conn) => conn,
                Err(e) => {
                    tracing::error!(error = %e, "Broadcast listener failed to connect, retrying");
                    self.status.set_broadcaster_connected(false);
                    tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                    continue;
                }
            };

            if let Err(e) = pubsub.subscribe(&self.channel).await {
                tracing::error!(error = %e, "Broadcast listener failed to subscribe, retrying");
                tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                continue;
            }

            tracing::info!(channel = %self.channel, "Broadcast listener subscribed");
            self.status.set_broadcaster_connected(true);

            let mut stream = pubsub.on_message();
            while let Some(msg) = stream.next().await {
                let payload: String = match msg.get_payload() {
                    Ok(p) => p,
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to read broadcast payload");
                        continue;
                    }
                };

                let frame: BroadcastFrame = match serde_json::from_str(&payload) {
                    Ok(frame) => frame,
                    Err(e) => {
                        tracing::error!(error = %e, "Skipping undecodable broadcast frame");
                        continue;
                    }
                };

                self.deliver_local(&frame).await;
            }

            tracing::warn!("Broadcast subscription closed, reconnecting...");
            self.status.set_broadcaster_connected(false);
            tokio::time::sleep(std::time::Duration::from_secs(1)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn frame(room: &str) -> BroadcastFrame {
        BroadcastFrame {
            room_id: room.to_string(),
            event: "message.created".to_string(),
            payload: json!({"body": "hi"}),
        }
    }

    #[test]
    fn fanout_reaches_each_joined_connection_exactly_once() {
        let mut registry = SessionRegistry::default();
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        let (tx_c, mut rx_c) = mpsc::unbounded_channel();

        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();
        registry.insert_session(a, Uuid::new_v4(), tx_a);
        registry.insert_session(b, Uuid::new_v4(), tx_b);
        registry.insert_session(c, Uuid::new_v4(), tx_c);

        registry.join(&a, "room-1");
        registry.join(&b, "room-1");
        // Joining twice must not double-deliver.
        registry.join(&b, "room-1");

        let (delivered, dead) = registry.fanout(&frame("room-1"));
        assert_eq!(delivered, 2);
        assert!(dead.is_empty());

        assert!(rx_a.try_recv().is_ok());
        assert!(rx_a.try_recv().is_err());
        assert!(rx_b.try_recv().is_ok());
        assert!(rx_b.try_recv().is_err());
        // c never joined the room.
        assert!(rx_c.try_recv().is_err());
    }

    #[test]
    fn leave_stops_delivery() {
        let mut registry = SessionRegistry::default();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let conn = Uuid::new_v4();
        registry.insert_session(conn, Uuid::new_v4(), tx);
        registry.join(&conn, "room-1");
        registry.leave(&conn, "room-1");

        let (delivered, _) = registry.fanout(&frame("room-1"));
        assert_eq!(delivered, 0);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn every_session_receives_presence_frames() {
        let mut registry = SessionRegistry::default();
        let (tx, mut rx) = mpsc::unbounded_channel();
        registry.insert_session(Uuid::new_v4(), Uuid::new_v4(), tx);

        let (delivered, _) = registry.fanout(&frame(PRESENCE_ROOM));
        assert_eq!(delivered, 1);
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn dead_senders_are_reported() {
        let mut registry = SessionRegistry::default();
        let (tx, rx) = mpsc::unbounded_channel();
        let conn = Uuid::new_v4();
        registry.insert_session(conn, Uuid::new_v4(), tx);
        registry.join(&conn, "room-1");
        drop(rx);

        let (delivered, dead) = registry.fanout(&frame("room-1"));
        assert_eq!(delivered, 0);
        assert_eq!(dead, vec![conn]);
    }

    #[test]
    fn join_requires_registered_session() {
        let mut registry = SessionRegistry::default();
        assert!(!registry.join(&Uuid::new_v4(), "room-1"));
    }
}
