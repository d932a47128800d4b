use std::collections::HashSet;
use std::sync::Arc;

use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use courier_db::Database;
use courier_types::models::Channel;

use crate::blocking;
use crate::registry::SessionRegistry;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("channel {0} not found")]
    ChannelNotFound(Uuid),

    #[error("user {0} not found")]
    UserNotFound(Uuid),

    #[error("channel name '{0}' is already taken")]
    NameTaken(String),

    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

/// Channel metadata and membership.
///
/// Membership changes are mirrored into the session registry so that open
/// sockets start (or stop) receiving a channel's messages immediately.
#[derive(Clone)]
pub struct ChannelStore {
    db: Arc<Database>,
    registry: SessionRegistry,
}

impl ChannelStore {
    pub fn new(db: Arc<Database>, registry: SessionRegistry) -> Self {
        Self { db, registry }
    }

    /// Create a channel owned by `owner_id`. The owner is always a member.
    pub async fn create(&self, name: String, owner_id: Uuid, members: Vec<Uuid>) -> Result<Channel, StoreError> {
        let mut seen = HashSet::new();
        let members: Vec<Uuid> = std::iter::once(owner_id)
            .chain(members)
            .filter(|id| seen.insert(*id))
            .collect();

        let channel_id = Uuid::new_v4();
        let member_list = members.clone();
        let row = blocking(&self.db, move |db| {
            if db.get_channel_by_name(&name)?.is_some() {
                return Ok(Err(StoreError::NameTaken(name)));
            }
            for user in &member_list {
                if db.get_user_by_id(&user.to_string())?.is_none() {
                    return Ok(Err(StoreError::UserNotFound(*user)));
                }
            }
            let ids: Vec<String> = member_list.iter().map(Uuid::to_string).collect();
            let owner = owner_id.to_string();
            db.create_channel(&channel_id.to_string(), &name, Some(owner.as_str()), &ids)
                .map(Ok)
        })
        .await??;

        for user in &members {
            self.registry.join_channel(*user, channel_id);
        }

        let channel = row.into_channel()?;
        info!("Channel '{}' ({}) created by {}", channel.name, channel.id, owner_id);
        Ok(channel)
    }

    pub async fn get(&self, channel_id: Uuid) -> Result<Option<Channel>, StoreError> {
        let row = blocking(&self.db, move |db| db.get_channel(&channel_id.to_string())).await?;
        Ok(row.map(|r| r.into_channel()).transpose()?)
    }

    /// Give a channel a new name. Renaming to its current name is a no-op.
    pub async fn rename(&self, channel_id: Uuid, name: String) -> Result<Channel, StoreError> {
        let row = blocking(&self.db, move |db| {
            let cid = channel_id.to_string();
            if let Some(holder) = db.get_channel_by_name(&name)? {
                if holder.id != cid {
                    return Ok(Err(StoreError::NameTaken(name)));
                }
            }
            if !db.rename_channel(&cid, &name)? {
                return Ok(Err(StoreError::ChannelNotFound(channel_id)));
            }
            db.get_channel(&cid)?
                .ok_or_else(|| anyhow::anyhow!("channel {} vanished during rename", cid))
                .map(Ok)
        })
        .await??;

        let channel = row.into_channel()?;
        info!("Channel {} renamed to '{}'", channel.id, channel.name);
        Ok(channel)
    }

    pub async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<Channel>, StoreError> {
        let rows = blocking(&self.db, move |db| db.list_channels_for_user(&user_id.to_string())).await?;
        Ok(rows
            .into_iter()
            .map(|r| r.into_channel())
            .collect::<anyhow::Result<Vec<_>>>()?)
    }

    pub async fn channel_ids_for_user(&self, user_id: Uuid) -> Result<Vec<Uuid>, StoreError> {
        Ok(self.list_for_user(user_id).await?.into_iter().map(|c| c.id).collect())
    }

    pub async fn member_ids(&self, channel_id: Uuid) -> Result<Vec<Uuid>, StoreError> {
        let ids = blocking(&self.db, move |db| db.member_ids(&channel_id.to_string())).await?;
        ids.iter()
            .map(|id| id.parse::<Uuid>().map_err(|e| StoreError::Storage(anyhow::anyhow!("corrupt member id '{}': {}", id, e))))
            .collect()
    }

    pub async fn is_member(&self, channel_id: Uuid, user_id: Uuid) -> Result<bool, StoreError> {
        Ok(blocking(&self.db, move |db| db.is_member(&channel_id.to_string(), &user_id.to_string())).await?)
    }

    /// Add `user_id` to the channel. Returns false if they already were a member.
    pub async fn add_member(&self, channel_id: Uuid, user_id: Uuid) -> Result<bool, StoreError> {
        let added = blocking(&self.db, move |db| {
            let cid = channel_id.to_string();
            let uid = user_id.to_string();
            if db.get_channel(&cid)?.is_none() {
                return Ok(Err(StoreError::ChannelNotFound(channel_id)));
            }
            if db.get_user_by_id(&uid)?.is_none() {
                return Ok(Err(StoreError::UserNotFound(user_id)));
            }
            db.add_member(&cid, &uid).map(Ok)
        })
        .await??;

        if added {
            self.registry.join_channel(user_id, channel_id);
            info!("{} joined channel {}", user_id, channel_id);
        }
        Ok(added)
    }

    /// Remove `user_id` from the channel. Returns false if they were not a member.
    pub async fn remove_member(&self, channel_id: Uuid, user_id: Uuid) -> Result<bool, StoreError> {
        let removed = blocking(&self.db, move |db| {
            let cid = channel_id.to_string();
            if db.get_channel(&cid)?.is_none() {
                return Ok(Err(StoreError::ChannelNotFound(channel_id)));
            }
            db.remove_member(&cid, &user_id.to_string()).map(Ok)
        })
        .await??;

        if removed {
            self.registry.leave_channel(user_id, channel_id);
            info!("{} left channel {}", user_id, channel_id);
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_types::models::GENERAL_CHANNEL_ID;

    fn setup() -> (ChannelStore, SessionRegistry, Uuid, Uuid) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        db.create_user(&alice.to_string(), "alice@example.com", "Alice", "hash").unwrap();
        db.create_user(&bob.to_string(), "bob@example.com", "Bob", "hash").unwrap();
        let registry = SessionRegistry::new(8);
        (ChannelStore::new(db, registry.clone()), registry, alice, bob)
    }

    #[tokio::test]
    async fn create_adds_owner_and_members() {
        let (store, _registry, alice, bob) = setup();

        let channel = store.create("team".into(), alice, vec![bob]).await.unwrap();
        assert_eq!(channel.owner_id, Some(alice));

        let mut members = store.member_ids(channel.id).await.unwrap();
        members.sort();
        let mut expected = vec![alice, bob];
        expected.sort();
        assert_eq!(members, expected);

        let names: Vec<String> = store.list_for_user(bob).await.unwrap().into_iter().map(|c| c.name).collect();
        assert_eq!(names, vec!["team"]);
    }

    #[tokio::test]
    async fn create_rejects_duplicates_and_unknown_members() {
        let (store, _registry, alice, _bob) = setup();

        assert!(matches!(
            store.create("general".into(), alice, vec![]).await,
            Err(StoreError::NameTaken(_))
        ));

        let ghost = Uuid::new_v4();
        assert!(matches!(
            store.create("ghosts".into(), alice, vec![ghost]).await,
            Err(StoreError::UserNotFound(id)) if id == ghost
        ));
        assert!(store.list_for_user(alice).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn membership_updates_open_sessions() {
        let (store, registry, alice, _bob) = setup();
        let (session, _rx) = registry.register(alice, []);

        assert!(store.add_member(GENERAL_CHANNEL_ID, alice).await.unwrap());
        assert!(!store.add_member(GENERAL_CHANNEL_ID, alice).await.unwrap());
        assert!(store.is_member(GENERAL_CHANNEL_ID, alice).await.unwrap());
        assert!(registry.is_subscribed(session.id(), GENERAL_CHANNEL_ID));

        assert!(store.remove_member(GENERAL_CHANNEL_ID, alice).await.unwrap());
        assert!(!registry.is_subscribed(session.id(), GENERAL_CHANNEL_ID));
        assert!(!store.remove_member(GENERAL_CHANNEL_ID, alice).await.unwrap());
    }

    #[tokio::test]
    async fn rename_keeps_names_unique() {
        let (store, _registry, alice, _bob) = setup();
        let team = store.create("team".into(), alice, vec![]).await.unwrap();

        let renamed = store.rename(team.id, "crew".into()).await.unwrap();
        assert_eq!(renamed.name, "crew");
        assert_eq!(store.get(team.id).await.unwrap().unwrap().name, "crew");

        // Same name again is fine, another channel's name is not
        assert!(store.rename(team.id, "crew".into()).await.is_ok());
        assert!(matches!(
            store.rename(team.id, "general".into()).await,
            Err(StoreError::NameTaken(name)) if name == "general"
        ));

        let missing = Uuid::new_v4();
        assert!(matches!(
            store.rename(missing, "nowhere".into()).await,
            Err(StoreError::ChannelNotFound(id)) if id == missing
        ));
    }

    #[tokio::test]
    async fn add_member_to_missing_channel() {
        let (store, _registry, alice, _bob) = setup();
        let missing = Uuid::new_v4();
        assert!(matches!(
            store.add_member(missing, alice).await,
            Err(StoreError::ChannelNotFound(id)) if id == missing
        ));
    }
}
