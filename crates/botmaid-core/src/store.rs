use std::{
    collections::{BTreeMap, BTreeSet},
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::Result;

/// Key-value port backing authorization, bans, handle lookup and subscriptions.
///
/// Each primitive must be atomic on its own; callers do no extra locking.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Returns `true` if the member was newly added.
    async fn set_add(&self, key: &str, member: &str) -> Result<bool>;
    /// Returns `true` if the member was present.
    async fn set_remove(&self, key: &str, member: &str) -> Result<bool>;
    async fn set_is_member(&self, key: &str, member: &str) -> Result<bool>;
    async fn set_members(&self, key: &str) -> Result<Vec<String>>;

    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>>;
    async fn hash_set(&self, key: &str, field: &str, value: &str) -> Result<()>;

    /// Append to the list at `key`; returns the new length.
    async fn list_push(&self, key: &str, value: &str) -> Result<usize>;
    async fn list_items(&self, key: &str) -> Result<Vec<String>>;
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct StoreData {
    #[serde(default)]
    sets: BTreeMap<String, BTreeSet<String>>,
    #[serde(default)]
    hashes: BTreeMap<String, BTreeMap<String, String>>,
    #[serde(default)]
    lists: BTreeMap<String, Vec<String>>,
}

/// In-process store. With a snapshot path, every mutation rewrites a JSON file.
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: RwLock<StoreData>,
    snapshot: Option<PathBuf>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a store persisted at `path`, loading it if the file exists.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let data = load_snapshot(&path)?.unwrap_or_default();
        Ok(Self {
            data: RwLock::new(data),
            snapshot: Some(path),
        })
    }

    /// Apply `f` and persist the result; the change is visible only once the
    /// snapshot write succeeded. `f` reports whether anything changed.
    async fn mutate<T>(&self, f: impl FnOnce(&mut StoreData) -> (T, bool)) -> Result<T> {
        let mut data = self.data.write().await;
        let Some(path) = &self.snapshot else {
            return Ok(f(&mut *data).0);
        };

        let mut next = data.clone();
        let (out, changed) = f(&mut next);
        if changed {
            let txt = serde_json::to_string_pretty(&next)?;
            write_text_atomic(path, &txt).await?;
            *data = next;
        }
        Ok(out)
    }
}

fn load_snapshot(path: &Path) -> Result<Option<StoreData>> {
    if !path.exists() {
        return Ok(None);
    }
    let txt = std::fs::read_to_string(path)?;
    if txt.trim().is_empty() {
        return Ok(None);
    }
    let data: StoreData = serde_json::from_str(&txt)?;
    Ok(Some(data))
}

/// Write to a sibling temp file, then rename over `path`.
async fn write_text_atomic(path: &Path, content: &str) -> Result<()> {
    let dir = path
        .parent()
        .filter(|d| !d.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    tokio::fs::create_dir_all(dir).await?;

    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("store");
    let tmp = dir.join(format!(".{name}.tmp-{}", std::process::id()));
    tokio::fs::write(&tmp, content).await?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    Ok(())
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn set_add(&self, key: &str, member: &str) -> Result<bool> {
        self.mutate(|data| {
            let added = data
                .sets
                .entry(key.to_string())
                .or_default()
                .insert(member.to_string());
            (added, added)
        })
        .await
    }

    async fn set_remove(&self, key: &str, member: &str) -> Result<bool> {
        self.mutate(|data| {
            let Some(set) = data.sets.get_mut(key) else {
                return (false, false);
            };
            let removed = set.remove(member);
            if set.is_empty() {
                data.sets.remove(key);
            }
            (removed, removed)
        })
        .await
    }

    async fn set_is_member(&self, key: &str, member: &str) -> Result<bool> {
        let data = self.data.read().await;
        Ok(data.sets.get(key).is_some_and(|s| s.contains(member)))
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>> {
        let data = self.data.read().await;
        Ok(data
            .sets
            .get(key)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>> {
        let data = self.data.read().await;
        Ok(data.hashes.get(key).and_then(|h| h.get(field)).cloned())
    }

    async fn hash_set(&self, key: &str, field: &str, value: &str) -> Result<()> {
        self.mutate(|data| {
            let prev = data
                .hashes
                .entry(key.to_string())
                .or_default()
                .insert(field.to_string(), value.to_string());
            ((), prev.as_deref() != Some(value))
        })
        .await
    }

    async fn list_push(&self, key: &str, value: &str) -> Result<usize> {
        self.mutate(|data| {
            let list = data.lists.entry(key.to_string()).or_default();
            list.push(value.to_string());
            (list.len(), true)
        })
        .await
    }

    async fn list_items(&self, key: &str) -> Result<Vec<String>> {
        let data = self.data.read().await;
        Ok(data.lists.get(key).cloned().unwrap_or_default())
    }
}
