//! SQLite-backed [`BackupStore`] implementation.
//!
//! Records live in the `backups` table with their `contains` flags as JSON;
//! snapshots live in `snapshots` keyed by backup id. Timestamps are stored
//! as Unix seconds. The claim transition is a single conditional `UPDATE`,
//! so two hosts racing on the same id cannot both win.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use profile_vault_core::models::{
    BackupRecord, BackupStatus, Retention, Snapshot, StoragePaths,
};
use profile_vault_core::store::{BackupStore, ClaimOutcome, Completion};

const BACKUP_COLUMNS: &str = "id, owner_id, status, tier, sha256, raw_path, derived_path, \
    recovery_path, raw_expires_at, derived_expires_at, contains_json, format_version, \
    error_message, created_at, processing_started_at, processed_at";

pub struct SqliteBackupStore {
    pool: SqlitePool,
}

impl SqliteBackupStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn fetch_where(&self, clause: &str, binds: &[i64]) -> Result<Vec<BackupRecord>> {
        let sql = format!("SELECT {} FROM backups WHERE {}", BACKUP_COLUMNS, clause);
        let mut query = sqlx::query(&sql);
        for value in binds {
            query = query.bind(*value);
        }
        let rows = query.fetch_all(&self.pool).await?;
        rows.iter().map(row_to_backup).collect()
    }
}

fn from_ts(ts: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp(ts, 0).ok_or_else(|| anyhow::anyhow!("invalid timestamp: {}", ts))
}

fn from_opt_ts(ts: Option<i64>) -> Result<Option<DateTime<Utc>>> {
    ts.map(from_ts).transpose()
}

fn row_to_backup(row: &SqliteRow) -> Result<BackupRecord> {
    let id: String = row.try_get("id")?;
    let status: String = row.try_get("status")?;
    let tier: String = row.try_get("tier")?;
    let contains_json: String = row.try_get("contains_json")?;
    let format_version: Option<String> = row.try_get("format_version")?;

    Ok(BackupRecord {
        owner_id: row.try_get("owner_id")?,
        status: status.parse()?,
        tier: tier.parse()?,
        sha256: row.try_get("sha256")?,
        storage_paths: StoragePaths {
            raw: row.try_get("raw_path")?,
            derived: row.try_get("derived_path")?,
            recovery_pack: row.try_get("recovery_path")?,
        },
        retention: Retention {
            raw_expires_at: from_ts(row.try_get("raw_expires_at")?)?,
            derived_expires_at: from_ts(row.try_get("derived_expires_at")?)?,
        },
        contains: serde_json::from_str(&contains_json)
            .with_context(|| format!("Corrupt contains flags on backup {}", id))?,
        format_version: format_version.map(|v| v.parse()).transpose()?,
        error_message: row.try_get("error_message")?,
        created_at: from_ts(row.try_get("created_at")?)?,
        processing_started_at: from_opt_ts(row.try_get("processing_started_at")?)?,
        processed_at: from_opt_ts(row.try_get("processed_at")?)?,
        id,
    })
}

#[async_trait]
impl BackupStore for SqliteBackupStore {
    async fn insert_backup(&self, record: &BackupRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO backups (id, owner_id, status, tier, sha256, raw_path, derived_path,
                                 recovery_path, raw_expires_at, derived_expires_at,
                                 contains_json, format_version, error_message, created_at,
                                 processing_started_at, processed_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.id)
        .bind(&record.owner_id)
        .bind(record.status.as_str())
        .bind(record.tier.as_str())
        .bind(&record.sha256)
        .bind(&record.storage_paths.raw)
        .bind(&record.storage_paths.derived)
        .bind(&record.storage_paths.recovery_pack)
        .bind(record.retention.raw_expires_at.timestamp())
        .bind(record.retention.derived_expires_at.timestamp())
        .bind(serde_json::to_string(&record.contains)?)
        .bind(record.format_version.map(|v| v.as_str()))
        .bind(&record.error_message)
        .bind(record.created_at.timestamp())
        .bind(record.processing_started_at.map(|t| t.timestamp()))
        .bind(record.processed_at.map(|t| t.timestamp()))
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to insert backup {}", record.id))?;
        Ok(())
    }

    async fn get_backup(&self, id: &str) -> Result<Option<BackupRecord>> {
        let sql = format!("SELECT {} FROM backups WHERE id = ?", BACKUP_COLUMNS);
        let row = sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await?;
        row.as_ref().map(row_to_backup).transpose()
    }

    async fn find_by_checksum(
        &self,
        owner_id: &str,
        sha256: &str,
    ) -> Result<Option<BackupRecord>> {
        let sql = format!(
            "SELECT {} FROM backups WHERE owner_id = ? AND sha256 = ? \
             ORDER BY created_at DESC LIMIT 1",
            BACKUP_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(owner_id)
            .bind(sha256)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_backup).transpose()
    }

    async fn list_by_owner(&self, owner_id: &str) -> Result<Vec<BackupRecord>> {
        let sql = format!(
            "SELECT {} FROM backups WHERE owner_id = ? ORDER BY created_at DESC, id ASC",
            BACKUP_COLUMNS
        );
        let rows = sqlx::query(&sql).bind(owner_id).fetch_all(&self.pool).await?;
        rows.iter().map(row_to_backup).collect()
    }

    async fn claim_for_processing(
        &self,
        id: &str,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> Result<ClaimOutcome> {
        let result = sqlx::query(
            r#"
            UPDATE backups
            SET status = 'processing', processing_started_at = ?, error_message = NULL
            WHERE id = ?
              AND (status IN ('pending', 'error')
                   OR (status = 'processing'
                       AND (processing_started_at IS NULL OR processing_started_at < ?)))
            "#,
        )
        .bind(now.timestamp())
        .bind(id)
        .bind(stale_before.timestamp())
        .execute(&self.pool)
        .await?;

        let current = self.get_backup(id).await?;
        if result.rows_affected() == 1 {
            return match current {
                Some(record) => Ok(ClaimOutcome::Claimed(record)),
                None => Ok(ClaimOutcome::NotFound),
            };
        }
        Ok(match current {
            None => ClaimOutcome::NotFound,
            Some(record) if record.status == BackupStatus::Ready => {
                ClaimOutcome::AlreadyReady(record)
            }
            Some(_) => ClaimOutcome::AlreadyProcessing,
        })
    }

    async fn mark_ready(
        &self,
        id: &str,
        claimed_at: DateTime<Utc>,
        completion: &Completion,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE backups
            SET status = 'ready', contains_json = ?, format_version = ?, derived_path = ?,
                recovery_path = ?, processed_at = ?, processing_started_at = NULL,
                error_message = NULL
            WHERE id = ? AND status = 'processing' AND processing_started_at = ?
            "#,
        )
        .bind(serde_json::to_string(&completion.contains)?)
        .bind(completion.format_version.as_str())
        .bind(&completion.derived_path)
        .bind(&completion.recovery_path)
        .bind(completion.processed_at.timestamp())
        .bind(id)
        .bind(claimed_at.timestamp())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            anyhow::bail!("backup {} is not processing under this claim", id);
        }
        Ok(())
    }

    async fn mark_error(&self, id: &str, claimed_at: DateTime<Utc>, message: &str) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE backups
            SET status = 'error', error_message = ?, processing_started_at = NULL
            WHERE id = ? AND status = 'processing' AND processing_started_at = ?
            "#,
        )
        .bind(message)
        .bind(id)
        .bind(claimed_at.timestamp())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            anyhow::bail!("backup {} is not processing under this claim", id);
        }
        Ok(())
    }

    async fn put_snapshot(&self, snapshot: &Snapshot) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO snapshots (backup_id, owner_id, stats_json, report_json, created_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(backup_id) DO UPDATE SET
                owner_id = excluded.owner_id,
                stats_json = excluded.stats_json,
                report_json = excluded.report_json,
                created_at = excluded.created_at
            "#,
        )
        .bind(&snapshot.backup_id)
        .bind(&snapshot.owner_id)
        .bind(serde_json::to_string(&snapshot.stats)?)
        .bind(serde_json::to_string(&snapshot.report)?)
        .bind(snapshot.created_at.timestamp())
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to store snapshot for {}", snapshot.backup_id))?;
        Ok(())
    }

    async fn get_snapshot(&self, backup_id: &str) -> Result<Option<Snapshot>> {
        let row = sqlx::query(
            "SELECT backup_id, owner_id, stats_json, report_json, created_at \
             FROM snapshots WHERE backup_id = ?",
        )
        .bind(backup_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let stats_json: String = row.try_get("stats_json")?;
        let report_json: String = row.try_get("report_json")?;
        Ok(Some(Snapshot {
            backup_id: row.try_get("backup_id")?,
            owner_id: row.try_get("owner_id")?,
            stats: serde_json::from_str(&stats_json).context("Corrupt snapshot stats")?,
            report: serde_json::from_str(&report_json).context("Corrupt snapshot report")?,
            created_at: from_ts(row.try_get("created_at")?)?,
        }))
    }

    async fn delete_snapshot(&self, backup_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM snapshots WHERE backup_id = ?")
            .bind(backup_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_raw_expired(&self, now: DateTime<Utc>) -> Result<Vec<BackupRecord>> {
        self.fetch_where(
            "status != 'processing' AND raw_path IS NOT NULL AND raw_expires_at <= ? ORDER BY id",
            &[now.timestamp()],
        )
        .await
    }

    async fn list_derived_expired(&self, now: DateTime<Utc>) -> Result<Vec<BackupRecord>> {
        self.fetch_where(
            "status != 'processing' AND raw_expires_at <= ? AND derived_expires_at <= ? \
             ORDER BY id",
            &[now.timestamp(), now.timestamp()],
        )
        .await
    }

    async fn claim_for_expiry(
        &self,
        id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<BackupRecord>> {
        let Some(before) = self.get_backup(id).await? else {
            return Ok(None);
        };
        // Compare-and-set on the status read above, so a claim that slipped
        // in between wins and the sweep backs off.
        let result = sqlx::query(
            r#"
            UPDATE backups
            SET status = 'processing', processing_started_at = ?
            WHERE id = ? AND status = ? AND status != 'processing'
            "#,
        )
        .bind(now.timestamp())
        .bind(id)
        .bind(before.status.as_str())
        .execute(&self.pool)
        .await?;

        Ok((result.rows_affected() == 1).then_some(before))
    }

    async fn release_expiry(
        &self,
        id: &str,
        claimed_at: DateTime<Utc>,
        status: BackupStatus,
        clear_raw: bool,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE backups
            SET status = ?, processing_started_at = NULL,
                raw_path = CASE WHEN ? THEN NULL ELSE raw_path END
            WHERE id = ? AND status = 'processing' AND processing_started_at = ?
            "#,
        )
        .bind(status.as_str())
        .bind(clear_raw)
        .bind(id)
        .bind(claimed_at.timestamp())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            anyhow::bail!("backup {} is not held by this expiry claim", id);
        }
        Ok(())
    }

    async fn delete_backup(&self, id: &str, claimed_at: DateTime<Utc>) -> Result<()> {
        let result = sqlx::query(
            "DELETE FROM backups WHERE id = ? AND status = 'processing' \
             AND processing_started_at = ?",
        )
        .bind(id)
        .bind(claimed_at.timestamp())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            anyhow::bail!("backup {} is not held by this expiry claim", id);
        }
        Ok(())
    }
}
