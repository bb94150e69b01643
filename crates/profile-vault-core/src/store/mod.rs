//! Storage abstractions for Profile Vault.
//!
//! Two collaborators sit behind traits so the lifecycle manager can run
//! against SQLite and the filesystem in production and against the
//! in-memory implementations in [`memory`] in tests:
//!
//! - [`BackupStore`] — the document store holding [`BackupRecord`]s and
//!   [`Snapshot`]s, with an atomic compare-and-set for the
//!   `pending → processing` transition.
//! - [`ObjectStore`] — the blob store holding raw archives and derived
//!   artifacts.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{BackupRecord, BackupStatus, Contains, FormatVersion, Snapshot};

/// Result of trying to claim a backup for processing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// The record moved to `processing`; the caller owns the run.
    Claimed(BackupRecord),
    /// Another run holds the record.
    AlreadyProcessing,
    /// The record is already `ready`; nothing to do.
    AlreadyReady(BackupRecord),
    NotFound,
}

/// Fields written by the `processing → ready` transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub contains: Contains,
    pub format_version: FormatVersion,
    pub derived_path: String,
    pub recovery_path: Option<String>,
    pub processed_at: DateTime<Utc>,
}

/// Abstract document store.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`insert_backup`](BackupStore::insert_backup) | Create a `pending` record |
/// | [`claim_for_processing`](BackupStore::claim_for_processing) | Compare-and-set into `processing` |
/// | [`mark_ready`](BackupStore::mark_ready) / [`mark_error`](BackupStore::mark_error) | Finish a run |
/// | [`list_raw_expired`](BackupStore::list_raw_expired) / [`list_derived_expired`](BackupStore::list_derived_expired) | Retention queries |
/// | [`claim_for_expiry`](BackupStore::claim_for_expiry) / [`release_expiry`](BackupStore::release_expiry) | Hold a record while the sweep deletes its artifacts |
///
/// Every transition out of `processing` is fenced on the claim time
/// (`processing_started_at`) returned by the claim, so a run that lost its
/// claim to a stale takeover cannot finish the new owner's run.
#[async_trait]
pub trait BackupStore: Send + Sync {
    async fn insert_backup(&self, record: &BackupRecord) -> Result<()>;

    async fn get_backup(&self, id: &str) -> Result<Option<BackupRecord>>;

    /// Find an owner's backup of an archive with this checksum.
    async fn find_by_checksum(&self, owner_id: &str, sha256: &str)
        -> Result<Option<BackupRecord>>;

    /// All backups of an owner, newest first.
    async fn list_by_owner(&self, owner_id: &str) -> Result<Vec<BackupRecord>>;

    /// Atomically move a `pending` or `error` record to `processing`.
    ///
    /// A `processing` record whose claim started before `stale_before` is
    /// treated as abandoned and may be claimed again.
    async fn claim_for_processing(
        &self,
        id: &str,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> Result<ClaimOutcome>;

    /// `processing → ready`. Fails unless the record is still `processing`
    /// under the claim made at `claimed_at`.
    async fn mark_ready(
        &self,
        id: &str,
        claimed_at: DateTime<Utc>,
        completion: &Completion,
    ) -> Result<()>;

    /// `processing → error`, keeping `message` for diagnostics. Fenced like
    /// [`mark_ready`](BackupStore::mark_ready).
    async fn mark_error(&self, id: &str, claimed_at: DateTime<Utc>, message: &str) -> Result<()>;

    /// Insert or replace the snapshot for its backup id.
    async fn put_snapshot(&self, snapshot: &Snapshot) -> Result<()>;

    async fn get_snapshot(&self, backup_id: &str) -> Result<Option<Snapshot>>;

    async fn delete_snapshot(&self, backup_id: &str) -> Result<()>;

    /// Non-processing records that still reference a raw artifact whose
    /// expiry is at or before `now`.
    async fn list_raw_expired(&self, now: DateTime<Utc>) -> Result<Vec<BackupRecord>>;

    /// Non-processing records whose raw and derived expiries have both passed.
    async fn list_derived_expired(&self, now: DateTime<Utc>) -> Result<Vec<BackupRecord>>;

    /// Atomically move a non-`processing` record to `processing` on behalf
    /// of the retention sweep, so no run can claim it while its artifacts
    /// are deleted. Returns the record as it was before the claim, or `None`
    /// if it is missing or already held by a run.
    async fn claim_for_expiry(&self, id: &str, now: DateTime<Utc>)
        -> Result<Option<BackupRecord>>;

    /// End an expiry claim: restore `status` and, with `clear_raw`, forget
    /// the raw artifact path.
    async fn release_expiry(
        &self,
        id: &str,
        claimed_at: DateTime<Utc>,
        status: BackupStatus,
        clear_raw: bool,
    ) -> Result<()>;

    /// Delete a record held by an expiry claim.
    async fn delete_backup(&self, id: &str, claimed_at: DateTime<Utc>) -> Result<()>;
}

/// Abstract blob store keyed by slash-separated relative paths.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, path: &str, bytes: Vec<u8>) -> Result<()>;

    async fn get(&self, path: &str) -> Result<Vec<u8>>;

    /// Delete an object. Deleting a missing object succeeds.
    async fn delete(&self, path: &str) -> Result<()>;
}

/// Whether a `processing` claim is old enough to be taken over.
pub fn is_stale(record: &BackupRecord, stale_before: DateTime<Utc>) -> bool {
    match record.processing_started_at {
        Some(started) => started < stale_before,
        None => true,
    }
}
