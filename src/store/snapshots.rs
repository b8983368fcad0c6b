use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use tokio::sync::{Mutex, RwLock};

use super::{ReportPayload, Snapshot, StorageBackend};
use crate::error::PersistenceError;
use crate::telemetry::metrics::STORE_PERSIST_FAILURES;

#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    pub week_key: String,
    pub created_at: DateTime<Utc>,
}

/// Serialized shape of one entry: `{"timestamp": ..., "data": {...}}` under its week key.
#[derive(Serialize)]
struct StoredEntryRef<'a> {
    timestamp: &'a DateTime<Utc>,
    data: &'a ReportPayload,
}

#[derive(Deserialize)]
struct StoredEntry {
    #[serde(deserialize_with = "lenient_timestamp")]
    timestamp: DateTime<Utc>,
    data: ReportPayload,
}

/// Accepts RFC 3339 as well as offset-less ISO timestamps, which are taken as UTC.
fn lenient_timestamp<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
    let raw = String::deserialize(deserializer)?;
    if let Ok(ts) = DateTime::parse_from_rfc3339(&raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(serde::de::Error::custom)
}

/// Every generated report, keyed by week.
///
/// Each `put` rewrites the whole mapping, so a write costs O(total history). That
/// is fine at one snapshot per week; much larger histories are outside what this
/// store is built for.
pub struct SnapshotStore {
    backend: Arc<dyn StorageBackend>,
    snapshots: RwLock<BTreeMap<String, Snapshot>>,
    flush_lock: Mutex<()>,
}

impl SnapshotStore {
    pub fn open(backend: Arc<dyn StorageBackend>) -> Self {
        let snapshots = load_from(backend.as_ref());

        tracing::info!(
            storage = %backend.describe(),
            snapshots = snapshots.len(),
            "Snapshot store loaded"
        );

        Self {
            backend,
            snapshots: RwLock::new(snapshots),
            flush_lock: Mutex::new(()),
        }
    }

    /// Reads the full persisted mapping. Missing or unreadable storage yields an
    /// empty mapping.
    pub fn load(&self) -> BTreeMap<String, Snapshot> {
        load_from(self.backend.as_ref())
    }

    /// Inserts or overwrites `snapshot` under its week key, then flushes the whole
    /// mapping. On a flush error the in-memory mapping keeps the new value.
    #[tracing::instrument(name = "store.put", skip(self, snapshot), fields(week_key = %snapshot.week_key))]
    pub async fn put(&self, snapshot: Snapshot) -> Result<(), PersistenceError> {
        let _flush = self.flush_lock.lock().await;

        let bytes = {
            let mut snapshots = self.snapshots.write().await;
            snapshots.insert(snapshot.week_key.clone(), snapshot);
            encode(&snapshots)
        };

        let result = match bytes {
            Ok(bytes) => {
                let backend = Arc::clone(&self.backend);
                tokio::task::spawn_blocking(move || backend.write_all(&bytes))
                    .await
                    .map_err(|e| PersistenceError::Write(format!("flush task failed: {e}")))
                    .and_then(|written| written)
            }
            Err(e) => Err(e),
        };

        if let Err(e) = &result {
            STORE_PERSIST_FAILURES.add(1, &[]);
            tracing::error!(error = %e, storage = %self.backend.describe(), "Failed to persist snapshots");
        }

        result
    }

    pub async fn get(&self, week_key: &str) -> Option<Snapshot> {
        self.snapshots.read().await.get(week_key).cloned()
    }

    pub async fn latest(&self) -> Option<Snapshot> {
        self.snapshots
            .read()
            .await
            .last_key_value()
            .map(|(_, snapshot)| snapshot.clone())
    }

    /// Week keys, newest first.
    pub async fn list_keys(&self) -> Vec<String> {
        self.snapshots.read().await.keys().rev().cloned().collect()
    }

    pub async fn history(&self) -> Vec<HistoryEntry> {
        self.snapshots
            .read()
            .await
            .values()
            .rev()
            .map(|s| HistoryEntry {
                week_key: s.week_key.clone(),
                created_at: s.created_at,
            })
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.snapshots.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.snapshots.read().await.is_empty()
    }
}

fn encode(snapshots: &BTreeMap<String, Snapshot>) -> Result<Vec<u8>, PersistenceError> {
    let stored: BTreeMap<&str, StoredEntryRef<'_>> = snapshots
        .iter()
        .map(|(key, s)| {
            (
                key.as_str(),
                StoredEntryRef {
                    timestamp: &s.created_at,
                    data: &s.payload,
                },
            )
        })
        .collect();

    serde_json::to_vec_pretty(&stored).map_err(|e| PersistenceError::Encode(e.to_string()))
}

fn decode(bytes: &[u8]) -> Result<BTreeMap<String, Snapshot>, PersistenceError> {
    let stored: BTreeMap<String, StoredEntry> =
        serde_json::from_slice(bytes).map_err(|e| PersistenceError::Decode(e.to_string()))?;

    Ok(stored
        .into_iter()
        .map(|(week_key, entry)| {
            let snapshot = Snapshot {
                week_key: week_key.clone(),
                created_at: entry.timestamp,
                payload: entry.data,
            };
            (week_key, snapshot)
        })
        .collect())
}

fn load_from(backend: &dyn StorageBackend) -> BTreeMap<String, Snapshot> {
    let loaded = backend
        .read_all()
        .and_then(|bytes| bytes.map(|b| decode(&b)).transpose());

    match loaded {
        Ok(Some(snapshots)) => snapshots,
        Ok(None) => BTreeMap::new(),
        Err(e) => {
            tracing::warn!(
                error = %e,
                storage = %backend.describe(),
                "Could not load snapshots, starting with empty history"
            );
            BTreeMap::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{FileBackend, MemoryBackend};
    use chrono::TimeZone;
    use serde_json::json;
    use tokio_test::{assert_err, assert_ok};

    fn snapshot(week_key: &str, message: &str) -> Snapshot {
        let mut payload = ReportPayload::new();
        payload.insert("message".into(), json!(message));
        Snapshot {
            week_key: week_key.to_string(),
            created_at: Utc.with_ymd_and_hms(2025, 10, 6, 8, 0, 0).unwrap(),
            payload,
        }
    }

    fn memory_store() -> (Arc<MemoryBackend>, SnapshotStore) {
        let backend = Arc::new(MemoryBackend::new());
        let store = SnapshotStore::open(backend.clone());
        (backend, store)
    }

    #[tokio::test]
    async fn test_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::open(dir.path().join("missing.json")).unwrap();
        let store = SnapshotStore::open(Arc::new(backend));

        assert!(store.load().is_empty());
        assert_eq!(store.latest().await, None);
        assert!(store.list_keys().await.is_empty());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_get_is_idempotent() {
        let (_, store) = memory_store();
        assert_ok!(store.put(snapshot("2025-W40", "a")).await);

        let first = store.get("2025-W40").await;
        let second = store.get("2025-W40").await;
        assert!(first.is_some());
        assert_eq!(first, second);
        assert_eq!(store.get("2025-W41").await, None);
    }

    #[tokio::test]
    async fn test_put_overwrites_existing_key() {
        let (_, store) = memory_store();
        assert_ok!(store.put(snapshot("2025-W39", "x")).await);
        assert_ok!(store.put(snapshot("2025-W40", "a")).await);
        let size_before = store.len().await;

        assert_ok!(store.put(snapshot("2025-W40", "b")).await);

        assert_eq!(store.len().await, size_before);
        assert_eq!(store.get("2025-W40").await, Some(snapshot("2025-W40", "b")));
    }

    #[tokio::test]
    async fn test_latest_is_lexicographically_maximal_key() {
        let (_, store) = memory_store();
        for key in ["2025-W05", "2025-W40", "2024-W52"] {
            assert_ok!(store.put(snapshot(key, key)).await);
        }

        let latest = store.latest().await.unwrap();
        assert_eq!(latest.week_key, "2025-W40");
        assert_eq!(
            store.list_keys().await,
            vec!["2025-W40", "2025-W05", "2024-W52"]
        );
    }

    #[tokio::test]
    async fn test_history_is_descending_with_timestamps() {
        let (_, store) = memory_store();
        assert_ok!(store.put(snapshot("2025-W01", "a")).await);
        assert_ok!(store.put(snapshot("2025-W02", "b")).await);

        let history = store.history().await;
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].week_key, "2025-W02");
        assert_eq!(history[1].created_at, snapshot("2025-W01", "a").created_at);
    }

    #[tokio::test]
    async fn test_put_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reports.json");

        {
            let store = SnapshotStore::open(Arc::new(FileBackend::open(&path).unwrap()));
            assert_ok!(store.put(snapshot("2025-W40", "persisted")).await);
        }

        let reopened = SnapshotStore::open(Arc::new(FileBackend::open(&path).unwrap()));
        assert_eq!(
            reopened.get("2025-W40").await,
            Some(snapshot("2025-W40", "persisted"))
        );
        assert_eq!(reopened.load().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_flush_reports_error_but_updates_memory() {
        let (backend, store) = memory_store();
        assert_ok!(store.put(snapshot("2025-W39", "durable")).await);
        backend.set_fail_writes(true);

        let result = store.put(snapshot("2025-W40", "volatile")).await;

        assert!(matches!(result, Err(PersistenceError::Write(_))));
        assert!(store.get("2025-W40").await.is_some());
        assert!(store.load().contains_key("2025-W39"));
        assert!(!store.load().contains_key("2025-W40"));
    }

    #[tokio::test]
    async fn test_corrupt_storage_loads_empty() {
        let backend = Arc::new(MemoryBackend::with_contents(b"{not json".to_vec()));
        let store = SnapshotStore::open(backend);

        assert!(store.is_empty().await);
        assert_eq!(store.latest().await, None);
    }

    #[tokio::test]
    async fn test_loads_offset_less_timestamps_as_utc() {
        let legacy = br#"{
            "2025-W40": {
                "timestamp": "2025-10-06T08:00:00.123456",
                "data": {"metadata": {"version": "2.0"}}
            }
        }"#;
        let store = SnapshotStore::open(Arc::new(MemoryBackend::with_contents(legacy.to_vec())));

        let loaded = store.get("2025-W40").await.unwrap();
        assert_eq!(
            loaded.created_at.timestamp(),
            Utc.with_ymd_and_hms(2025, 10, 6, 8, 0, 0).unwrap().timestamp()
        );
        assert_eq!(loaded.payload["metadata"]["version"], "2.0");
    }

    #[test]
    fn test_encoded_layout() {
        let mut snapshots = BTreeMap::new();
        snapshots.insert("2025-W40".to_string(), snapshot("2025-W40", "ok"));

        let bytes = encode(&snapshots).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(value["2025-W40"]["data"]["message"], "ok");
        assert_eq!(value["2025-W40"]["timestamp"], "2025-10-06T08:00:00Z");
    }

    #[test]
    fn test_decode_rejects_non_object_entries() {
        assert_err!(decode(br#"{"2025-W40": 5}"#));
        assert_err!(decode(b"[]"));
    }
}
