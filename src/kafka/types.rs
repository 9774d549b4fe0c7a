use anyhow::Result;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::message::ChatMessage;

/// Type of event crossing the durable log.
///
/// The envelope schema is tagged so both sides can validate the payload
/// shape; unknown tags fail deserialization on the consume side instead of
/// being half-interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RoomEventKind {
    MessageCreated,
}

/// Envelope for events appended to the room-events topic.
///
/// `room_id` doubles as the partition key, which is what gives messages for
/// one room their strict relative order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomEventEnvelope {
    pub event: RoomEventKind,
    pub room_id: Uuid,
    pub message: ChatMessage,
    /// Unix timestamp (seconds) of the append, for consumer lag diagnostics
    pub published_at: i64,
}

impl RoomEventEnvelope {
    /// Wrap a freshly submitted message for publication.
    pub fn message_created(message: ChatMessage) -> Result<Self> {
        let room = message.room()?;
        Ok(Self {
            event: RoomEventKind::MessageCreated,
            room_id: room.id(),
            message,
            published_at: chrono::Utc::now().timestamp(),
        })
    }

    /// Partition key: the room id, so per-room order is preserved.
    pub fn partition_key(&self) -> String {
        self.room_id.to_string()
    }

    /// Validate the envelope. Run on both the produce and the consume side;
    /// a message that fails here is rejected before any side effect.
    pub fn validate(&self) -> Result<()> {
        self.message.validate()?;
        let room = self.message.room()?;
        if room.id() != self.room_id {
            anyhow::bail!(
                "envelope room {} does not match message room {}",
                self.room_id,
                room.id()
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::RoomRef;

    #[test]
    fn envelope_carries_room_as_partition_key() {
        let room = RoomRef::Channel(Uuid::new_v4());
        let msg = ChatMessage::new_text(room, Uuid::new_v4(), "hi");
        let envelope = RoomEventEnvelope::message_created(msg).unwrap();

        assert_eq!(envelope.room_id, room.id());
        assert_eq!(envelope.partition_key(), room.id().to_string());
        assert!(envelope.validate().is_ok());
    }

    #[test]
    fn envelope_rejects_room_mismatch() {
        let msg = ChatMessage::new_text(
            RoomRef::Channel(Uuid::new_v4()),
            Uuid::new_v4(),
            "hi",
        );
        let mut envelope = RoomEventEnvelope::message_created(msg).unwrap();
        envelope.room_id = Uuid::new_v4();
        assert!(envelope.validate().is_err());
    }

    #[test]
    fn envelope_round_trips_through_json() {
        let msg = ChatMessage::new_text(
            RoomRef::Direct(Uuid::new_v4()),
            Uuid::new_v4(),
            "there",
        );
        let envelope = RoomEventEnvelope::message_created(msg.clone()).unwrap();

        let bytes = serde_json::to_vec(&envelope).unwrap();
        let decoded: RoomEventEnvelope = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(decoded.event, RoomEventKind::MessageCreated);
        assert_eq!(decoded.message.id, msg.id);
        assert_eq!(decoded.message.body, "there");
    }
}
