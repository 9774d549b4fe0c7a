use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::{
    MAX_ATTACHMENTS_PER_MESSAGE, MAX_MENTIONS_PER_MESSAGE, MAX_MESSAGE_BODY_BYTES,
};

/// Kind of chat message flowing through the pipeline
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "message_kind", rename_all = "UPPERCASE")]
pub enum MessageKind {
    Text,
    File,
    System,
}

/// The room a message belongs to: a channel or a direct-message conversation.
/// The room id is the unit of ordering, cache keying and broadcast fan-out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomRef {
    Channel(Uuid),
    Direct(Uuid),
}

impl RoomRef {
    pub fn id(&self) -> Uuid {
        match self {
            RoomRef::Channel(id) | RoomRef::Direct(id) => *id,
        }
    }
}

/// A chat message as carried through the delivery pipeline.
///
/// The id is a UUIDv7 minted at submit time, so ids within a room sort in
/// creation order. Exactly one of `channel_id` / `dm_room_id` is set;
/// `sender_id` is absent only for system messages. Edits and deletes mutate
/// the durable store outside this core, so a cached copy may lag the store by
/// up to the cache TTL.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dm_room_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<Uuid>,
    pub kind: MessageKind,
    pub body: String,
    #[serde(default)]
    pub attachments: Vec<String>,
    #[serde(default)]
    pub mentions: Vec<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub edited_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default)]
    pub pinned: bool,
}

impl ChatMessage {
    /// Create a text message authored by `sender` in `room`.
    pub fn new_text(room: RoomRef, sender: Uuid, body: impl Into<String>) -> Self {
        Self::new(room, Some(sender), MessageKind::Text, body)
    }

    /// Create a system message (no sender) in `room`.
    pub fn new_system(room: RoomRef, body: impl Into<String>) -> Self {
        Self::new(room, None, MessageKind::System, body)
    }

    fn new(room: RoomRef, sender_id: Option<Uuid>, kind: MessageKind, body: impl Into<String>) -> Self {
        let (channel_id, dm_room_id) = match room {
            RoomRef::Channel(id) => (Some(id), None),
            RoomRef::Direct(id) => (None, Some(id)),
        };
        Self {
            id: Uuid::now_v7(),
            channel_id,
            dm_room_id,
            sender_id,
            kind,
            body: body.into(),
            attachments: Vec::new(),
            mentions: Vec::new(),
            parent_id: None,
            created_at: Utc::now(),
            edited_at: None,
            deleted: false,
            pinned: false,
        }
    }

    /// The room this message belongs to. Errors when the channel/DM invariant
    /// is violated (neither or both set).
    pub fn room(&self) -> Result<RoomRef> {
        match (self.channel_id, self.dm_room_id) {
            (Some(id), None) => Ok(RoomRef::Channel(id)),
            (None, Some(id)) => Ok(RoomRef::Direct(id)),
            (None, None) => anyhow::bail!("message {} has no room reference", self.id),
            (Some(_), Some(_)) => {
                anyhow::bail!("message {} references both a channel and a DM room", self.id)
            }
        }
    }

    /// Validate message structure and size limits.
    ///
    /// Called synchronously at the entry point; a message failing here never
    /// enters the pipeline. Also re-checked on the consume side before any
    /// side effect.
    pub fn validate(&self) -> Result<()> {
        self.room()?;

        if self.id.is_nil() {
            anyhow::bail!("message id is required");
        }
        if self.sender_id.is_none() && self.kind != MessageKind::System {
            anyhow::bail!("sender_id is required for non-system messages");
        }
        if self.body.is_empty() && self.attachments.is_empty() {
            anyhow::bail!("message has neither body nor attachments");
        }
        if self.body.len() > MAX_MESSAGE_BODY_BYTES {
            anyhow::bail!(
                "message body exceeds {} bytes ({})",
                MAX_MESSAGE_BODY_BYTES,
                self.body.len()
            );
        }
        if self.attachments.len() > MAX_ATTACHMENTS_PER_MESSAGE {
            anyhow::bail!("too many attachments ({})", self.attachments.len());
        }
        if self.mentions.len() > MAX_MENTIONS_PER_MESSAGE {
            anyhow::bail!("too many mentions ({})", self.mentions.len());
        }
        if self.kind == MessageKind::File && self.attachments.is_empty() {
            anyhow::bail!("file message requires at least one attachment");
        }
        if let Some(parent) = self.parent_id {
            if parent == self.id {
                anyhow::bail!("message cannot reply to itself");
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn room() -> RoomRef {
        RoomRef::Channel(Uuid::new_v4())
    }

    #[test]
    fn text_message_sets_exactly_one_room() {
        let msg = ChatMessage::new_text(room(), Uuid::new_v4(), "hi");
        assert!(msg.channel_id.is_some());
        assert!(msg.dm_room_id.is_none());
        assert!(msg.validate().is_ok());

        let dm = ChatMessage::new_text(RoomRef::Direct(Uuid::new_v4()), Uuid::new_v4(), "hi");
        assert!(dm.channel_id.is_none());
        assert!(dm.dm_room_id.is_some());
        assert!(dm.validate().is_ok());
    }

    #[test]
    fn room_invariant_is_enforced() {
        let mut msg = ChatMessage::new_text(room(), Uuid::new_v4(), "hi");
        msg.dm_room_id = Some(Uuid::new_v4());
        assert!(msg.room().is_err());

        msg.channel_id = None;
        msg.dm_room_id = None;
        assert!(msg.room().is_err());
        assert!(msg.validate().is_err());
    }

    #[test]
    fn system_message_needs_no_sender() {
        let msg = ChatMessage::new_system(room(), "user joined");
        assert!(msg.sender_id.is_none());
        assert!(msg.validate().is_ok());

        let mut text = ChatMessage::new_text(room(), Uuid::new_v4(), "hi");
        text.sender_id = None;
        assert!(text.validate().is_err());
    }

    #[test]
    fn oversized_body_is_rejected() {
        let big = "x".repeat(MAX_MESSAGE_BODY_BYTES + 1);
        let msg = ChatMessage::new_text(room(), Uuid::new_v4(), big);
        assert!(msg.validate().is_err());
    }

    #[test]
    fn file_message_requires_attachment() {
        let mut msg = ChatMessage::new_text(room(), Uuid::new_v4(), "doc");
        msg.kind = MessageKind::File;
        assert!(msg.validate().is_err());

        msg.attachments.push("https://cdn.example.com/doc.pdf".to_string());
        assert!(msg.validate().is_ok());
    }

    #[test]
    fn ids_are_time_ordered() {
        let first = ChatMessage::new_text(room(), Uuid::new_v4(), "one");
        std::thread::sleep(std::time::Duration::from_millis(2));
        let second = ChatMessage::new_text(room(), Uuid::new_v4(), "two");
        assert!(first.id < second.id);
    }
}
