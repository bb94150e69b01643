//! In-memory [`BackupStore`] and [`ObjectStore`] implementations for testing.
//!
//! Uses `HashMap` behind `std::sync::RwLock` for thread safety. The
//! write lock is held across each read-check-write, which gives the same
//! compare-and-set guarantee as the SQLite conditional update.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{BackupRecord, BackupStatus, Snapshot};

use super::{is_stale, BackupStore, ClaimOutcome, Completion, ObjectStore};

/// In-memory document store.
pub struct InMemoryBackupStore {
    backups: RwLock<HashMap<String, BackupRecord>>,
    snapshots: RwLock<HashMap<String, Snapshot>>,
}

impl InMemoryBackupStore {
    pub fn new() -> Self {
        Self {
            backups: RwLock::new(HashMap::new()),
            snapshots: RwLock::new(HashMap::new()),
        }
    }

    pub fn snapshot_count(&self) -> usize {
        self.snapshots.read().unwrap().len()
    }
}

impl Default for InMemoryBackupStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BackupStore for InMemoryBackupStore {
    async fn insert_backup(&self, record: &BackupRecord) -> Result<()> {
        let mut backups = self.backups.write().unwrap();
        if backups.contains_key(&record.id) {
            bail!("backup {} already exists", record.id);
        }
        backups.insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn get_backup(&self, id: &str) -> Result<Option<BackupRecord>> {
        Ok(self.backups.read().unwrap().get(id).cloned())
    }

    async fn find_by_checksum(
        &self,
        owner_id: &str,
        sha256: &str,
    ) -> Result<Option<BackupRecord>> {
        let backups = self.backups.read().unwrap();
        Ok(backups
            .values()
            .filter(|b| b.owner_id == owner_id && b.sha256 == sha256)
            .max_by(|a, b| a.created_at.cmp(&b.created_at).then(b.id.cmp(&a.id)))
            .cloned())
    }

    async fn list_by_owner(&self, owner_id: &str) -> Result<Vec<BackupRecord>> {
        let backups = self.backups.read().unwrap();
        let mut owned: Vec<BackupRecord> = backups
            .values()
            .filter(|b| b.owner_id == owner_id)
            .cloned()
            .collect();
        owned.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        Ok(owned)
    }

    async fn claim_for_processing(
        &self,
        id: &str,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> Result<ClaimOutcome> {
        let mut backups = self.backups.write().unwrap();
        let Some(record) = backups.get_mut(id) else {
            return Ok(ClaimOutcome::NotFound);
        };
        match record.status {
            BackupStatus::Ready => Ok(ClaimOutcome::AlreadyReady(record.clone())),
            BackupStatus::Processing if !is_stale(record, stale_before) => {
                Ok(ClaimOutcome::AlreadyProcessing)
            }
            _ => {
                record.status = BackupStatus::Processing;
                record.processing_started_at = Some(now);
                record.error_message = None;
                Ok(ClaimOutcome::Claimed(record.clone()))
            }
        }
    }

    async fn mark_ready(
        &self,
        id: &str,
        claimed_at: DateTime<Utc>,
        completion: &Completion,
    ) -> Result<()> {
        let mut backups = self.backups.write().unwrap();
        let record = held_claim(&mut backups, id, claimed_at)?;
        record.status = BackupStatus::Ready;
        record.contains = completion.contains.clone();
        record.format_version = Some(completion.format_version);
        record.storage_paths.derived = Some(completion.derived_path.clone());
        record.storage_paths.recovery_pack = completion.recovery_path.clone();
        record.processed_at = Some(completion.processed_at);
        record.processing_started_at = None;
        record.error_message = None;
        Ok(())
    }

    async fn mark_error(&self, id: &str, claimed_at: DateTime<Utc>, message: &str) -> Result<()> {
        let mut backups = self.backups.write().unwrap();
        let record = held_claim(&mut backups, id, claimed_at)?;
        record.status = BackupStatus::Error;
        record.error_message = Some(message.to_string());
        record.processing_started_at = None;
        Ok(())
    }

    async fn put_snapshot(&self, snapshot: &Snapshot) -> Result<()> {
        self.snapshots
            .write()
            .unwrap()
            .insert(snapshot.backup_id.clone(), snapshot.clone());
        Ok(())
    }

    async fn get_snapshot(&self, backup_id: &str) -> Result<Option<Snapshot>> {
        Ok(self.snapshots.read().unwrap().get(backup_id).cloned())
    }

    async fn delete_snapshot(&self, backup_id: &str) -> Result<()> {
        self.snapshots.write().unwrap().remove(backup_id);
        Ok(())
    }

    async fn list_raw_expired(&self, now: DateTime<Utc>) -> Result<Vec<BackupRecord>> {
        let backups = self.backups.read().unwrap();
        let mut expired: Vec<BackupRecord> = backups
            .values()
            .filter(|b| {
                b.status != BackupStatus::Processing
                    && b.storage_paths.raw.is_some()
                    && b.retention.raw_expires_at <= now
            })
            .cloned()
            .collect();
        expired.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(expired)
    }

    async fn list_derived_expired(&self, now: DateTime<Utc>) -> Result<Vec<BackupRecord>> {
        let backups = self.backups.read().unwrap();
        let mut expired: Vec<BackupRecord> = backups
            .values()
            .filter(|b| {
                b.status != BackupStatus::Processing
                    && b.retention.raw_expires_at <= now
                    && b.retention.derived_expires_at <= now
            })
            .cloned()
            .collect();
        expired.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(expired)
    }

    async fn claim_for_expiry(
        &self,
        id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<BackupRecord>> {
        let mut backups = self.backups.write().unwrap();
        let Some(record) = backups.get_mut(id) else {
            return Ok(None);
        };
        if record.status == BackupStatus::Processing {
            return Ok(None);
        }
        let before = record.clone();
        record.status = BackupStatus::Processing;
        record.processing_started_at = Some(now);
        Ok(Some(before))
    }

    async fn release_expiry(
        &self,
        id: &str,
        claimed_at: DateTime<Utc>,
        status: BackupStatus,
        clear_raw: bool,
    ) -> Result<()> {
        let mut backups = self.backups.write().unwrap();
        let record = held_claim(&mut backups, id, claimed_at)?;
        record.status = status;
        record.processing_started_at = None;
        if clear_raw {
            record.storage_paths.raw = None;
        }
        Ok(())
    }

    async fn delete_backup(&self, id: &str, claimed_at: DateTime<Utc>) -> Result<()> {
        let mut backups = self.backups.write().unwrap();
        held_claim(&mut backups, id, claimed_at)?;
        backups.remove(id);
        Ok(())
    }
}

/// The record, if it is `processing` under the claim made at `claimed_at`.
fn held_claim<'a>(
    backups: &'a mut HashMap<String, BackupRecord>,
    id: &str,
    claimed_at: DateTime<Utc>,
) -> Result<&'a mut BackupRecord> {
    let Some(record) = backups.get_mut(id) else {
        bail!("backup {} not found", id);
    };
    if record.status != BackupStatus::Processing {
        bail!("backup {} is {}, not processing", id, record.status);
    }
    if record.processing_started_at != Some(claimed_at) {
        bail!("backup {} was claimed by another run", id);
    }
    Ok(record)
}

/// In-memory blob store.
pub struct InMemoryObjectStore {
    objects: RwLock<HashMap<String, Vec<u8>>>,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self {
            objects: RwLock::new(HashMap::new()),
        }
    }

    pub fn contains(&self, path: &str) -> bool {
        self.objects.read().unwrap().contains_key(path)
    }
}

impl Default for InMemoryObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn put(&self, path: &str, bytes: Vec<u8>) -> Result<()> {
        self.objects.write().unwrap().insert(path.to_string(), bytes);
        Ok(())
    }

    async fn get(&self, path: &str) -> Result<Vec<u8>> {
        match self.objects.read().unwrap().get(path) {
            Some(bytes) => Ok(bytes.clone()),
            None => bail!("object not found: {}", path),
        }
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.objects.write().unwrap().remove(path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Contains, FormatVersion, Retention, StoragePaths, Tier};
    use chrono::Duration;

    fn record(id: &str, status: BackupStatus) -> BackupRecord {
        let now = Utc::now();
        BackupRecord {
            id: id.to_string(),
            owner_id: "user-1".to_string(),
            status,
            tier: Tier::Deterministic,
            sha256: format!("sha-{}", id),
            storage_paths: StoragePaths {
                raw: Some(format!("raw/{}.zip", id)),
                ..StoragePaths::default()
            },
            retention: Retention {
                raw_expires_at: now + Duration::days(7),
                derived_expires_at: now + Duration::days(365),
            },
            contains: Contains::default(),
            format_version: None,
            error_message: None,
            created_at: now,
            processing_started_at: None,
            processed_at: None,
        }
    }

    #[tokio::test]
    async fn test_claim_is_exclusive() {
        let store = InMemoryBackupStore::new();
        store.insert_backup(&record("b1", BackupStatus::Pending)).await.unwrap();
        let now = Utc::now();
        let stale_before = now - Duration::minutes(15);

        let first = store.claim_for_processing("b1", now, stale_before).await.unwrap();
        assert!(matches!(first, ClaimOutcome::Claimed(_)));
        let second = store.claim_for_processing("b1", now, stale_before).await.unwrap();
        assert_eq!(second, ClaimOutcome::AlreadyProcessing);
        let missing = store.claim_for_processing("nope", now, stale_before).await.unwrap();
        assert_eq!(missing, ClaimOutcome::NotFound);
    }

    #[tokio::test]
    async fn test_stale_claim_can_be_taken_over() {
        let store = InMemoryBackupStore::new();
        store.insert_backup(&record("b1", BackupStatus::Pending)).await.unwrap();
        let long_ago = Utc::now() - Duration::hours(2);
        store
            .claim_for_processing("b1", long_ago, long_ago - Duration::minutes(15))
            .await
            .unwrap();

        let now = Utc::now();
        let retry = store
            .claim_for_processing("b1", now, now - Duration::minutes(15))
            .await
            .unwrap();
        assert!(matches!(retry, ClaimOutcome::Claimed(_)));
    }

    #[tokio::test]
    async fn test_ready_and_error_transitions() {
        let store = InMemoryBackupStore::new();
        store.insert_backup(&record("b1", BackupStatus::Pending)).await.unwrap();
        let completion = Completion {
            contains: Contains::default(),
            format_version: FormatVersion::Unknown,
            derived_path: "derived/b1.json".to_string(),
            recovery_path: None,
            processed_at: Utc::now(),
        };
        let now = Utc::now();
        assert!(store.mark_ready("b1", now, &completion).await.is_err());

        store.claim_for_processing("b1", now, now).await.unwrap();
        store.mark_error("b1", now, "boom").await.unwrap();
        let errored = store.get_backup("b1").await.unwrap().unwrap();
        assert_eq!(errored.status, BackupStatus::Error);
        assert_eq!(errored.error_message.as_deref(), Some("boom"));

        store.claim_for_processing("b1", now, now).await.unwrap();
        store.mark_ready("b1", now, &completion).await.unwrap();
        let ready = store.get_backup("b1").await.unwrap().unwrap();
        assert_eq!(ready.status, BackupStatus::Ready);
        assert_eq!(ready.error_message, None);
        assert_eq!(ready.storage_paths.derived.as_deref(), Some("derived/b1.json"));

        let again = store.claim_for_processing("b1", now, now).await.unwrap();
        assert!(matches!(again, ClaimOutcome::AlreadyReady(_)));
    }

    #[tokio::test]
    async fn test_expiry_queries_skip_processing() {
        let store = InMemoryBackupStore::new();
        let mut busy = record("busy", BackupStatus::Processing);
        busy.processing_started_at = Some(Utc::now());
        let mut done = record("done", BackupStatus::Ready);
        let past = Utc::now() - Duration::days(1);
        busy.retention.raw_expires_at = past;
        busy.retention.derived_expires_at = past;
        done.retention.raw_expires_at = past;
        store.insert_backup(&busy).await.unwrap();
        store.insert_backup(&done).await.unwrap();

        let raw = store.list_raw_expired(Utc::now()).await.unwrap();
        assert_eq!(raw.len(), 1);
        assert_eq!(raw[0].id, "done");
        assert!(store.list_derived_expired(Utc::now()).await.unwrap().is_empty());

        let now = Utc::now();
        let held = store.claim_for_expiry("done", now).await.unwrap().unwrap();
        assert_eq!(held.status, BackupStatus::Ready);
        store
            .release_expiry("done", now, held.status, true)
            .await
            .unwrap();
        assert!(store.list_raw_expired(Utc::now()).await.unwrap().is_empty());
        let done = store.get_backup("done").await.unwrap().unwrap();
        assert_eq!(done.status, BackupStatus::Ready);
        assert!(done.processing_started_at.is_none());
    }

    #[tokio::test]
    async fn test_finish_after_takeover_is_refused() {
        let store = InMemoryBackupStore::new();
        store.insert_backup(&record("b1", BackupStatus::Pending)).await.unwrap();
        let first = Utc::now() - Duration::hours(2);
        store.claim_for_processing("b1", first, first).await.unwrap();
        let second = Utc::now();
        store
            .claim_for_processing("b1", second, second - Duration::minutes(15))
            .await
            .unwrap();

        let completion = Completion {
            contains: Contains::default(),
            format_version: FormatVersion::Unknown,
            derived_path: "derived/b1.json".to_string(),
            recovery_path: None,
            processed_at: second,
        };
        assert!(store.mark_ready("b1", first, &completion).await.is_err());
        assert!(store.mark_error("b1", first, "late").await.is_err());
        assert_eq!(
            store.get_backup("b1").await.unwrap().unwrap().status,
            BackupStatus::Processing
        );
        store.mark_ready("b1", second, &completion).await.unwrap();
    }

    #[tokio::test]
    async fn test_expiry_claim_excludes_runs() {
        let store = InMemoryBackupStore::new();
        store.insert_backup(&record("b1", BackupStatus::Pending)).await.unwrap();
        let now = Utc::now();

        store.claim_for_expiry("b1", now).await.unwrap().unwrap();
        assert_eq!(
            store
                .claim_for_processing("b1", now, now - Duration::minutes(15))
                .await
                .unwrap(),
            ClaimOutcome::AlreadyProcessing
        );
        assert!(store.claim_for_expiry("b1", now).await.unwrap().is_none());
        store.delete_backup("b1", now).await.unwrap();
        assert!(store.get_backup("b1").await.unwrap().is_none());

        // A record held by a run cannot be taken by the sweep.
        store.insert_backup(&record("b2", BackupStatus::Pending)).await.unwrap();
        store.claim_for_processing("b2", now, now).await.unwrap();
        assert!(store.claim_for_expiry("b2", now).await.unwrap().is_none());
        assert!(store.delete_backup("b2", now - Duration::hours(1)).await.is_err());
    }

    #[tokio::test]
    async fn test_object_store_roundtrip() {
        let objects = InMemoryObjectStore::new();
        objects.put("a/b", vec![1, 2, 3]).await.unwrap();
        assert_eq!(objects.get("a/b").await.unwrap(), vec![1, 2, 3]);
        objects.delete("a/b").await.unwrap();
        objects.delete("a/b").await.unwrap();
        assert!(objects.get("a/b").await.is_err());
    }
}
