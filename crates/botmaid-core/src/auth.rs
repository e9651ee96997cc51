use std::sync::Arc;

use crate::{
    domain::{Chat, User},
    store::KeyValueStore,
    Result,
};

pub fn master_key(connection: &str) -> String {
    format!("master_{connection}")
}

pub fn ban_key(connection: &str) -> String {
    format!("ban_{connection}")
}

pub fn handles_key(connection: &str) -> String {
    format!("handles_{connection}")
}

fn chat_member(chat_id: i64) -> String {
    format!("chat:{chat_id}")
}

/// What a toggle operation did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Toggle {
    Added,
    Removed,
}

/// Master/ban lookups per connection, backed by the key-value store.
#[derive(Clone)]
pub struct AuthGate {
    store: Arc<dyn KeyValueStore>,
}

impl AuthGate {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }

    pub async fn is_master(&self, connection: &str, user: &User) -> Result<bool> {
        self.store
            .set_is_member(&master_key(connection), &user.id.to_string())
            .await
    }

    /// Banned by id, or by handle when the ban was issued with a raw name.
    pub async fn is_banned(&self, connection: &str, user: &User) -> Result<bool> {
        let key = ban_key(connection);
        if self.store.set_is_member(&key, &user.id.to_string()).await? {
            return Ok(true);
        }
        if user.username.is_empty() {
            return Ok(false);
        }
        self.store.set_is_member(&key, &user.username).await
    }

    pub async fn is_conversation_banned(&self, connection: &str, chat_id: i64) -> Result<bool> {
        self.store
            .set_is_member(&ban_key(connection), &chat_member(chat_id))
            .await
    }

    pub async fn ban_conversation(&self, connection: &str, chat: &Chat) -> Result<bool> {
        self.store
            .set_add(&ban_key(connection), &chat_member(chat.id))
            .await
    }

    pub async fn toggle_master(&self, connection: &str, member: &str) -> Result<Toggle> {
        toggle(self.store.as_ref(), &master_key(connection), member).await
    }

    pub async fn toggle_ban(&self, connection: &str, member: &str) -> Result<Toggle> {
        toggle(self.store.as_ref(), &ban_key(connection), member).await
    }

    pub async fn seed_masters(&self, connection: &str, ids: &[i64]) -> Result<()> {
        let key = master_key(connection);
        for id in ids {
            self.store.set_add(&key, &id.to_string()).await?;
        }
        Ok(())
    }

    pub async fn remember_handle(&self, connection: &str, user: &User) -> Result<()> {
        if user.username.is_empty() {
            return Ok(());
        }
        self.store
            .hash_set(
                &handles_key(connection),
                &user.username.to_lowercase(),
                &user.id.to_string(),
            )
            .await
    }

    pub async fn lookup_handle(&self, connection: &str, handle: &str) -> Result<Option<i64>> {
        let handle = handle.trim_start_matches('@').to_lowercase();
        let raw = self
            .store
            .hash_get(&handles_key(connection), &handle)
            .await?;
        Ok(raw.and_then(|s| s.trim().parse::<i64>().ok()))
    }
}

async fn toggle(store: &dyn KeyValueStore, key: &str, member: &str) -> Result<Toggle> {
    if store.set_remove(key, member).await? {
        return Ok(Toggle::Removed);
    }
    store.set_add(key, member).await?;
    Ok(Toggle::Added)
}
