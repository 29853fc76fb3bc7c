use crate::traits::{EventStore, KvStore};
use aiops_common::Result;
use aiops_types::ClusterEvent;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;

struct Entry {
    value: String,
    expires_at: DateTime<Utc>,
}

/// In-process KV store used by tests and single-replica deployments. TTL is
/// enforced lazily on read, matching Redis's own expiry-on-access semantics
/// closely enough for this crate's purposes.
#[derive(Default)]
pub struct MemoryKvStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn setex(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<()> {
        self.entries.lock().insert(
            key.to_string(),
            Entry { value: value.to_string(), expires_at: Utc::now() + chrono::Duration::seconds(ttl_seconds as i64) },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(entry) if entry.expires_at > Utc::now() => Ok(Some(entry.value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn scan(&self, prefix: &str) -> Result<Vec<String>> {
        let now = Utc::now();
        Ok(self
            .entries
            .lock()
            .iter()
            .filter(|(k, e)| k.starts_with(prefix) && e.expires_at > now)
            .map(|(k, _)| k.clone())
            .collect())
    }

    async fn cas(&self, key: &str, expected: &str, new: &str, ttl_seconds: u64) -> Result<bool> {
        let mut entries = self.entries.lock();
        let current = entries.get(key).map(|e| e.value.as_str());
        if current == Some(expected) {
            entries.insert(
                key.to_string(),
                Entry { value: new.to_string(), expires_at: Utc::now() + chrono::Duration::seconds(ttl_seconds as i64) },
            );
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.lock().remove(key);
        Ok(())
    }
}

/// In-process append-only event sink used by tests.
#[derive(Default)]
pub struct MemoryEventStore {
    events: Mutex<Vec<ClusterEvent>>,
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ClusterEvent> {
        self.events.lock().clone()
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn append(&self, event: &ClusterEvent) -> Result<()> {
        self.events.lock().push(event.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cas_only_swaps_on_matching_expected_value() {
        let kv = MemoryKvStore::new();
        kv.setex("k", "v1", 60).await.unwrap();
        assert!(!kv.cas("k", "wrong", "v2", 60).await.unwrap());
        assert_eq!(kv.get("k").await.unwrap(), Some("v1".to_string()));
        assert!(kv.cas("k", "v1", "v2", 60).await.unwrap());
        assert_eq!(kv.get("k").await.unwrap(), Some("v2".to_string()));
    }

    #[tokio::test]
    async fn scan_filters_by_prefix() {
        let kv = MemoryKvStore::new();
        kv.setex("approval:a", "1", 60).await.unwrap();
        kv.setex("approval:b", "2", 60).await.unwrap();
        kv.setex("other:c", "3", 60).await.unwrap();
        let mut keys = kv.scan("approval:").await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["approval:a".to_string(), "approval:b".to_string()]);
    }

    #[tokio::test]
    async fn expired_entries_are_not_returned() {
        let kv = MemoryKvStore::new();
        kv.setex("k", "v", 0).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        assert_eq!(kv.get("k").await.unwrap(), None);
    }
}
