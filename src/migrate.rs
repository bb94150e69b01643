use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate_pool(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create the schema on an open pool. Safe to run repeatedly.
pub async fn migrate_pool(pool: &SqlitePool) -> Result<()> {
    // Create backups table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS backups (
            id TEXT PRIMARY KEY,
            owner_id TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            tier TEXT NOT NULL DEFAULT 'deterministic',
            sha256 TEXT NOT NULL,
            raw_path TEXT,
            derived_path TEXT,
            recovery_path TEXT,
            raw_expires_at INTEGER NOT NULL,
            derived_expires_at INTEGER NOT NULL,
            contains_json TEXT NOT NULL DEFAULT '{}',
            format_version TEXT,
            error_message TEXT,
            created_at INTEGER NOT NULL,
            processing_started_at INTEGER,
            processed_at INTEGER
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create snapshots table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS snapshots (
            backup_id TEXT PRIMARY KEY,
            owner_id TEXT NOT NULL,
            stats_json TEXT NOT NULL,
            report_json TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            FOREIGN KEY (backup_id) REFERENCES backups(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create indexes
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_backups_owner ON backups(owner_id, created_at DESC)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_backups_owner_sha ON backups(owner_id, sha256)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_backups_raw_expiry ON backups(raw_expires_at)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_backups_derived_expiry ON backups(derived_expires_at)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
