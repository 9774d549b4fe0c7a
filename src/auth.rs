use std::future::Future;

use anyhow::Result;
use uuid::Uuid;

use crate::message::RoomRef;

/// Capability checks consumed from the (external) authorization layer.
///
/// The pipeline calls these before accepting a submit or a room join; the
/// implementation lives with the HTTP/CRUD surface and is injected here.
pub trait RoomAuthorizer: Send + Sync {
    /// Whether `user_id` belongs to the room (channel membership via its
    /// server, or DM participation).
    fn is_member(
        &self,
        user_id: Uuid,
        room: &RoomRef,
    ) -> impl Future<Output = Result<bool>> + Send;

    /// Whether `user_id` may read/write the channel, including role-based
    /// overrides.
    fn has_access(
        &self,
        user_id: Uuid,
        channel_id: Uuid,
    ) -> impl Future<Output = Result<bool>> + Send;
}

/// Authorizer that admits everyone. For tests and local development only.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl RoomAuthorizer for AllowAll {
    async fn is_member(&self, _user_id: Uuid, _room: &RoomRef) -> Result<bool> {
        Ok(true)
    }

    async fn has_access(&self, _user_id: Uuid, _channel_id: Uuid) -> Result<bool> {
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn allow_all_admits_everyone() {
        let authz = AllowAll;
        let user = Uuid::new_v4();
        let room = RoomRef::Channel(Uuid::new_v4());
        assert!(authz.is_member(user, &room).await.unwrap());
        assert!(authz.has_access(user, room.id()).await.unwrap());
    }
}
