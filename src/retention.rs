//! Retention sweep.
//!
//! Two independent passes over the document store:
//!
//! - **raw** — records whose raw expiry has passed lose the raw archive;
//!   the record and its derived artifacts stay.
//! - **derived** — records whose raw and derived expiries have both passed
//!   lose their derived artifacts, snapshot, and the record itself.
//!
//! Records in `processing` are never touched. Before deleting anything the
//! sweep takes an expiry claim on the record, so a run triggered after the
//! listing is refused until the sweep lets go; a record claimed by a run
//! in the meantime is skipped. A failure on one record is logged and
//! counted; the sweep moves on to the next. A record whose artifacts could
//! not be deleted is kept so the next sweep retries it.
//!
//! Derived and recovery artifacts are deleted at their well-known keys as
//! well as at the recorded paths, which covers anything left by a run that
//! failed after writing them.

use std::collections::BTreeSet;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use profile_vault_core::models::{BackupRecord, StoragePaths};
use profile_vault_core::store::{BackupStore, ObjectStore};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub raw_deleted: usize,
    pub records_deleted: usize,
    pub failures: usize,
}

pub async fn sweep(
    store: &dyn BackupStore,
    objects: &dyn ObjectStore,
    now: DateTime<Utc>,
) -> Result<SweepReport> {
    let mut report = SweepReport::default();

    let raw_expired = store
        .list_raw_expired(now)
        .await
        .context("Failed to list raw-expired backups")?;
    for listed in &raw_expired {
        match expire_raw(store, objects, &listed.id, now).await {
            Ok(true) => report.raw_deleted += 1,
            Ok(false) => {}
            Err(e) => {
                warn!(id = %listed.id, error = %e, "failed to expire raw archive");
                report.failures += 1;
            }
        }
    }

    let derived_expired = store
        .list_derived_expired(now)
        .await
        .context("Failed to list derived-expired backups")?;
    for listed in &derived_expired {
        match expire_record(store, objects, &listed.id, now).await {
            Ok(true) => report.records_deleted += 1,
            Ok(false) => {}
            Err(e) => {
                warn!(id = %listed.id, error = %e, "failed to expire backup");
                report.failures += 1;
            }
        }
    }

    info!(
        raw_deleted = report.raw_deleted,
        records_deleted = report.records_deleted,
        failures = report.failures,
        "retention sweep finished"
    );
    Ok(report)
}

/// Take the expiry claim on `id`. `None` when a run holds the record or it
/// is gone.
async fn claim(
    store: &dyn BackupStore,
    id: &str,
    now: DateTime<Utc>,
) -> Result<Option<BackupRecord>> {
    let held = store.claim_for_expiry(id, now).await?;
    if held.is_none() {
        debug!(id, "backup held by a run or gone; skipping");
    }
    Ok(held)
}

/// Delete the raw archive of `id`. `Ok(false)` when the record was skipped.
async fn expire_raw(
    store: &dyn BackupStore,
    objects: &dyn ObjectStore,
    id: &str,
    now: DateTime<Utc>,
) -> Result<bool> {
    let Some(record) = claim(store, id, now).await? else {
        return Ok(false);
    };
    let path = match record.storage_paths.raw.as_deref() {
        Some(path) if record.retention.raw_expires_at <= now => path,
        _ => {
            store.release_expiry(id, now, record.status, false).await?;
            return Ok(false);
        }
    };

    if let Err(e) = objects.delete(path).await {
        store.release_expiry(id, now, record.status, false).await?;
        return Err(e);
    }
    store.release_expiry(id, now, record.status, true).await?;
    info!(id, "raw archive expired");
    Ok(true)
}

/// Delete every artifact of `id`, its snapshot, and the record itself.
async fn expire_record(
    store: &dyn BackupStore,
    objects: &dyn ObjectStore,
    id: &str,
    now: DateTime<Utc>,
) -> Result<bool> {
    let Some(record) = claim(store, id, now).await? else {
        return Ok(false);
    };
    let retention = &record.retention;
    if retention.raw_expires_at > now || retention.derived_expires_at > now {
        store.release_expiry(id, now, record.status, false).await?;
        return Ok(false);
    }

    if let Err(e) = delete_artifacts(store, objects, &record).await {
        store.release_expiry(id, now, record.status, false).await?;
        return Err(e);
    }
    store.delete_backup(id, now).await?;
    info!(id, owner = %record.owner_id, "backup expired");
    Ok(true)
}

async fn delete_artifacts(
    store: &dyn BackupStore,
    objects: &dyn ObjectStore,
    record: &BackupRecord,
) -> Result<()> {
    let paths = &record.storage_paths;
    let mut keys: BTreeSet<String> = [&paths.raw, &paths.derived, &paths.recovery_pack]
        .into_iter()
        .flatten()
        .cloned()
        .collect();
    keys.insert(StoragePaths::derived_key(&record.owner_id, &record.id));
    keys.insert(StoragePaths::recovery_key(&record.owner_id, &record.id));

    for key in &keys {
        objects.delete(key).await?;
    }
    store.delete_snapshot(&record.id).await
}
