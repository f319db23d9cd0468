//! Content-addressed digest cache.
//!
//! Entries are kept in insertion order and evicted oldest-first once the cap
//! is exceeded; re-setting a key moves it to the back. Every mutation writes
//! the whole cache through the `BlobStore`.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;

use crate::knowledge::KnowledgeConfig;
use crate::knowledge::store::BlobStore;

/// Blob id the cache persists under.
pub const CACHE_BLOB_ID: &str = "knowledge-cache";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheEntry {
    key: String,
    payload: String,
    created_at_ms: u64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    entries: Vec<CacheEntry>,
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// SHA-256 of `content`, hex encoded.
pub fn content_hash(content: &str) -> String {
    hex::encode(Sha256::digest(content.as_bytes()))
}

/// Order-independent key over content hashes plus the task topic.
pub fn generate_key<S: AsRef<str>>(hashes: &[S], topic: &str) -> String {
    let mut sorted: Vec<&str> = hashes.iter().map(AsRef::as_ref).collect();
    sorted.sort_unstable();
    let mut hasher = Sha256::new();
    for h in &sorted {
        hasher.update(h.as_bytes());
        hasher.update(b"|");
    }
    hasher.update(topic.as_bytes());
    hex::encode(&hasher.finalize()[..8])
}

pub struct KnowledgeCache {
    entries: Mutex<VecDeque<CacheEntry>>,
    store: Arc<dyn BlobStore>,
    ttl: Duration,
    max_entries: usize,
    min_payload_chars: usize,
}

impl KnowledgeCache {
    /// Rehydrate from `store`, dropping entries already past their TTL. An
    /// unreadable or corrupt blob starts an empty cache.
    pub async fn load(store: Arc<dyn BlobStore>, config: &KnowledgeConfig) -> Self {
        let snapshot = match store.load_blob(CACHE_BLOB_ID).await {
            Ok(Some(text)) => serde_json::from_str::<Snapshot>(&text).unwrap_or_else(|e| {
                tracing::warn!(error = %e, "discarding corrupt knowledge cache");
                Snapshot::default()
            }),
            Ok(None) => Snapshot::default(),
            Err(e) => {
                tracing::warn!(error = %e, "knowledge cache store unreadable, starting empty");
                Snapshot::default()
            }
        };

        let cache = Self {
            entries: Mutex::new(snapshot.entries.into()),
            store,
            ttl: config.ttl,
            max_entries: config.max_entries.max(1),
            min_payload_chars: config.min_payload_chars,
        };

        let purged = cache.purge_expired().await;
        tracing::info!(
            entries = cache.len().await,
            purged,
            "knowledge cache rehydrated"
        );
        cache
    }

    fn is_expired(&self, entry: &CacheEntry, now: u64) -> bool {
        now.saturating_sub(entry.created_at_ms) > self.ttl.as_millis() as u64
    }

    pub async fn get(&self, key: &str) -> Option<String> {
        let mut entries = self.entries.lock().await;
        let pos = entries.iter().position(|e| e.key == key)?;
        if self.is_expired(&entries[pos], now_ms()) {
            entries.remove(pos);
            tracing::debug!(key, "knowledge cache entry expired");
            self.persist(&entries).await;
            return None;
        }
        Some(entries[pos].payload.clone())
    }

    /// Store `payload` under `key`. Returns false when the payload is too
    /// short to be worth keeping.
    pub async fn set(&self, key: &str, payload: &str) -> bool {
        if payload.trim().chars().count() < self.min_payload_chars {
            tracing::debug!(key, len = payload.len(), "refusing to cache short payload");
            return false;
        }

        let mut entries = self.entries.lock().await;
        entries.retain(|e| e.key != key);
        entries.push_back(CacheEntry {
            key: key.to_string(),
            payload: payload.to_string(),
            created_at_ms: now_ms(),
        });
        while entries.len() > self.max_entries {
            if let Some(evicted) = entries.pop_front() {
                tracing::debug!(key = %evicted.key, "evicted oldest knowledge cache entry");
            }
        }
        self.persist(&entries).await;
        true
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    pub async fn clear(&self) {
        let mut entries = self.entries.lock().await;
        entries.clear();
        self.persist(&entries).await;
    }

    /// Drop every expired entry. Re-persists only if something was removed.
    pub async fn purge_expired(&self) -> usize {
        let mut entries = self.entries.lock().await;
        let now = now_ms();
        let before = entries.len();
        entries.retain(|e| !self.is_expired(e, now));
        let purged = before - entries.len();
        if purged > 0 {
            self.persist(&entries).await;
        }
        purged
    }

    /// Persistence failures are logged, never surfaced.
    async fn persist(&self, entries: &VecDeque<CacheEntry>) {
        let snapshot = Snapshot {
            entries: entries.iter().cloned().collect(),
        };
        let json = match serde_json::to_string(&snapshot) {
            Ok(j) => j,
            Err(e) => {
                tracing::warn!(error = %e, "failed to serialize knowledge cache");
                return;
            }
        };
        if let Err(e) = self.store.save_blob(CACHE_BLOB_ID, &json).await {
            tracing::warn!(error = %e, "failed to persist knowledge cache");
        }
    }
}
