use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::codec;
use crate::db::KvStore;
use crate::error::StoreError;
use crate::types::Guild;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("channel does not follow that team")]
pub struct AlreadyUnfollowed;

impl Guild {
    /// Prepends `team_names` to the channel's follows, keeping the first
    /// occurrence of every name.
    pub fn follow<I, S>(&mut self, channel_id: &str, team_names: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let existing = self.subscriptions.remove(channel_id).unwrap_or_default();
        let mut seen = HashSet::new();
        let merged: Vec<String> = team_names
            .into_iter()
            .map(Into::into)
            .chain(existing)
            .filter(|team| seen.insert(team.clone()))
            .collect();

        if !merged.is_empty() {
            self.subscriptions.insert(channel_id.to_owned(), merged);
        }
    }

    /// Leaves the document untouched when the channel does not follow `team_name`.
    pub fn unfollow(&mut self, channel_id: &str, team_name: &str) -> Result<(), AlreadyUnfollowed> {
        let teams = self
            .subscriptions
            .get_mut(channel_id)
            .ok_or(AlreadyUnfollowed)?;
        let index = teams
            .iter()
            .position(|team| team == team_name)
            .ok_or(AlreadyUnfollowed)?;

        teams.remove(index);
        if teams.is_empty() {
            self.subscriptions.remove(channel_id);
        }

        Ok(())
    }
}

/// Owns the load -> mutate -> persist cycle of guild documents.
pub struct SubscriptionStore<K> {
    kv: K,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl<K> SubscriptionStore<K>
where
    K: KvStore,
{
    pub fn new(kv: K) -> Self {
        Self {
            kv,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Serializes writers of one guild within this process. Hold the guard
    /// from `load_guild` until `persist` returns.
    ///
    /// A guild keeps its lock for the life of the store, so every writer of
    /// the same id, before and after `unregister`, queues on one mutex.
    pub async fn lock_guild(&self, guild_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            locks.entry(guild_id.to_owned()).or_default().clone()
        };
        lock.lock_owned().await
    }

    pub async fn load_guild(&self, guild_id: &str) -> Result<Option<Guild>, StoreError> {
        let Some(bytes) = self.kv.get(guild_id).await? else {
            return Ok(None);
        };

        codec::decode(&bytes)
            .map(Some)
            .map_err(|source| StoreError::Corrupt {
                guild_id: guild_id.to_owned(),
                source,
            })
    }

    pub async fn persist(&self, guild_id: &str, guild: &Guild) -> Result<(), StoreError> {
        let bytes = codec::encode(guild).map_err(|source| StoreError::Encode {
            guild_id: guild_id.to_owned(),
            source,
        })?;
        self.kv.put(guild_id, bytes).await
    }

    /// Creates an empty document unless one already exists. Returns whether
    /// a document was created.
    pub async fn register(&self, guild_id: &str) -> Result<bool, StoreError> {
        let _guard = self.lock_guild(guild_id).await;
        if self.kv.get(guild_id).await?.is_some() {
            return Ok(false);
        }

        self.persist(guild_id, &Guild::default()).await?;
        Ok(true)
    }

    pub async fn unregister(&self, guild_id: &str) -> Result<bool, StoreError> {
        let _guard = self.lock_guild(guild_id).await;
        self.kv.delete(guild_id).await
    }

    pub async fn guild_ids(&self) -> Result<Vec<String>, StoreError> {
        self.kv.keys().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::BotDb;
    use crate::error::BoxError;
    use serenity::async_trait;
    use std::time::Duration;
    use tokio::sync::oneshot;

    const CHANNEL: &str = "42";

    fn guild_following(teams: &[&str]) -> Guild {
        let mut guild = Guild::default();
        guild.follow(CHANNEL, teams.iter().copied());
        guild
    }

    async fn memory_store() -> SubscriptionStore<BotDb> {
        let db = BotDb::open(":memory:").unwrap();
        db.migrate().await.unwrap();
        SubscriptionStore::new(db)
    }

    struct BrokenKv;

    #[async_trait]
    impl KvStore for BrokenKv {
        async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, StoreError> {
            Ok(Some(br#"{"subscriptions":{}}"#.to_vec()))
        }

        async fn put(&self, _key: &str, _value: Vec<u8>) -> Result<(), StoreError> {
            Err(StoreError::StorageUnavailable(BoxError::from("disk full")))
        }

        async fn delete(&self, _key: &str) -> Result<bool, StoreError> {
            Ok(false)
        }

        async fn keys(&self) -> Result<Vec<String>, StoreError> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn follow_puts_new_teams_first_and_dedups() {
        let mut guild = guild_following(&["B", "C"]);
        guild.follow(CHANNEL, ["A", "B"]);

        assert_eq!(guild.channel_follows(CHANNEL), ["A", "B", "C"]);
    }

    #[test]
    fn follow_is_idempotent() {
        let mut once = Guild::default();
        once.follow(CHANNEL, ["OG"]);
        let mut twice = once.clone();
        twice.follow(CHANNEL, ["OG"]);

        assert_eq!(once, twice);
    }

    #[test]
    fn follow_dedups_within_the_new_names() {
        let guild = guild_following(&["A", "B", "A"]);
        assert_eq!(guild.channel_follows(CHANNEL), ["A", "B"]);
    }

    #[test]
    fn follow_does_not_touch_other_channels() {
        let mut guild = guild_following(&["A"]);
        guild.follow("7", ["B"]);

        assert_eq!(guild.channel_follows(CHANNEL), ["A"]);
        assert_eq!(guild.channel_follows("7"), ["B"]);
    }

    #[test]
    fn follow_with_no_names_keeps_channel_absent() {
        let mut guild = Guild::default();
        guild.follow(CHANNEL, Vec::<String>::new());

        assert!(guild.subscriptions.is_empty());
    }

    #[test]
    fn unfollow_removes_one_and_keeps_order() {
        let mut guild = guild_following(&["A", "B", "C"]);
        guild.unfollow(CHANNEL, "B").unwrap();

        assert_eq!(guild.channel_follows(CHANNEL), ["A", "C"]);
    }

    #[test]
    fn unfollow_of_unknown_team_leaves_document_unchanged() {
        let mut guild = guild_following(&["A"]);
        let before = guild.clone();

        assert_eq!(guild.unfollow(CHANNEL, "Z"), Err(AlreadyUnfollowed));
        assert_eq!(guild, before);
    }

    #[test]
    fn unfollow_on_channel_without_follows_is_already_unfollowed() {
        let mut guild = Guild::default();
        assert_eq!(guild.unfollow(CHANNEL, "A"), Err(AlreadyUnfollowed));
    }

    #[test]
    fn unfollowing_the_last_team_drops_the_channel() {
        let mut guild = guild_following(&["A"]);
        guild.unfollow(CHANNEL, "A").unwrap();

        assert!(!guild.subscriptions.contains_key(CHANNEL));
    }

    #[tokio::test]
    async fn load_of_unregistered_guild_is_none() {
        let store = memory_store().await;
        assert_eq!(store.load_guild("1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn persisted_guild_loads_back() {
        let store = memory_store().await;
        let guild = guild_following(&["Team Liquid", "OG"]);
        store.persist("1", &guild).await.unwrap();

        assert_eq!(store.load_guild("1").await.unwrap(), Some(guild));
    }

    #[tokio::test]
    async fn register_only_creates_missing_documents() {
        let store = memory_store().await;
        assert!(store.register("1").await.unwrap());

        store.persist("1", &guild_following(&["OG"])).await.unwrap();
        assert!(!store.register("1").await.unwrap());

        let guild = store.load_guild("1").await.unwrap().unwrap();
        assert_eq!(guild.channel_follows(CHANNEL), ["OG"]);
    }

    #[tokio::test]
    async fn unregister_removes_the_document() {
        let store = memory_store().await;
        store.register("1").await.unwrap();

        assert!(store.unregister("1").await.unwrap());
        assert_eq!(store.load_guild("1").await.unwrap(), None);
        assert!(store.guild_ids().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn corrupt_document_is_a_store_error() {
        let db = BotDb::open(":memory:").unwrap();
        db.migrate().await.unwrap();
        db.put("1", b"not a document".to_vec()).await.unwrap();
        let store = SubscriptionStore::new(db);

        let err = store.load_guild("1").await.unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { ref guild_id, .. } if guild_id == "1"));
    }

    #[tokio::test]
    async fn failed_write_surfaces_storage_unavailable() {
        let store = SubscriptionStore::new(BrokenKv);
        let guild = store.load_guild("1").await.unwrap().unwrap();

        let err = store.persist("1", &guild).await.unwrap_err();
        assert!(matches!(err, StoreError::StorageUnavailable(_)));
    }

    #[tokio::test]
    async fn writers_queued_behind_unregister_stay_serialized() {
        let store = Arc::new(memory_store().await);
        store.register("1").await.unwrap();
        let first = store.lock_guild("1").await;

        let unregistering = tokio::spawn({
            let store = store.clone();
            async move { store.unregister("1").await.unwrap() }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        let (acquired_tx, acquired_rx) = oneshot::channel();
        let (release_tx, release_rx) = oneshot::channel::<()>();
        let waiting = tokio::spawn({
            let store = store.clone();
            async move {
                let _guard = store.lock_guild("1").await;
                acquired_tx.send(()).unwrap();
                release_rx.await.ok();
            }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        drop(first);
        assert!(unregistering.await.unwrap());
        acquired_rx.await.unwrap();

        let newcomer = tokio::time::timeout(Duration::from_millis(20), store.lock_guild("1")).await;
        assert!(newcomer.is_err());

        release_tx.send(()).unwrap();
        waiting.await.unwrap();
        let _after = store.lock_guild("1").await;
    }

    #[tokio::test]
    async fn guild_lock_is_exclusive() {
        let store = memory_store().await;
        let guard = store.lock_guild("1").await;

        let blocked = tokio::time::timeout(Duration::from_millis(20), store.lock_guild("1")).await;
        assert!(blocked.is_err());

        let _other = store.lock_guild("2").await;
        drop(guard);
        let _again = store.lock_guild("1").await;
    }
}
