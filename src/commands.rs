//! CLI command implementations.
//!
//! Each `run_*` function prints a human summary to stdout and ends with
//! `ok` on success. Diagnostics go through `tracing` to stderr.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};

use profile_vault_core::models::{BackupRecord, EntityKind, Tier};

use crate::config::Config;
use crate::enrich::create_enricher;
use crate::lifecycle::{Lifecycle, ProcessOutcome};
use crate::object_store::FsObjectStore;
use crate::sqlite_store::SqliteBackupStore;
use crate::{db, migrate};

/// Wire the lifecycle manager to SQLite, the filesystem store, and the
/// configured enricher.
pub async fn open_lifecycle(config: &Config) -> Result<Lifecycle> {
    let pool = db::connect(config).await?;
    migrate::migrate_pool(&pool).await?;
    let store = Arc::new(SqliteBackupStore::new(pool));
    let objects = Arc::new(FsObjectStore::new(&config.storage.root));
    let enricher = create_enricher(&config.enrichment)?;

    Ok(Lifecycle::new(store, objects, Arc::new(config.clone())).with_enricher(enricher))
}

fn print_record(record: &BackupRecord) {
    println!("id:           {}", record.id);
    println!("owner:        {}", record.owner_id);
    println!("status:       {}", record.status);
    println!("tier:         {}", record.tier.as_str());
    println!("sha256:       {}", record.sha256);
    println!("created_at:   {}", record.created_at.to_rfc3339());
    if let Some(processed) = record.processed_at {
        println!("processed_at: {}", processed.to_rfc3339());
    }
    if let Some(version) = record.format_version {
        println!("format:       {}", version.as_str());
    }
    let present: Vec<&str> = EntityKind::ALL
        .iter()
        .filter(|k| record.contains.get(**k))
        .map(|k| k.as_str())
        .collect();
    if !present.is_empty() {
        println!("contains:     {}", present.join(", "));
    }
    println!(
        "raw:          {}",
        record.storage_paths.raw.as_deref().unwrap_or("(expired)")
    );
    println!(
        "raw_expires:  {}",
        record.retention.raw_expires_at.to_rfc3339()
    );
    println!(
        "expires:      {}",
        record.retention.derived_expires_at.to_rfc3339()
    );
    if let Some(message) = &record.error_message {
        println!("error:        {}", message);
    }
}

pub async fn run_submit(config: &Config, archive: &Path, user: &str, tier: Tier) -> Result<()> {
    let bytes = std::fs::read(archive)
        .with_context(|| format!("Failed to read archive: {}", archive.display()))?;
    let lifecycle = open_lifecycle(config).await?;
    let submission = lifecycle.submit(user, tier, bytes).await?;

    if submission.duplicate {
        println!("submit {} (duplicate of existing backup)", archive.display());
    } else {
        println!("submit {}", archive.display());
    }
    print_record(&submission.record);
    println!("ok");
    Ok(())
}

pub async fn run_process(config: &Config, id: &str) -> Result<()> {
    let lifecycle = open_lifecycle(config).await?;
    let outcome = lifecycle.process(id).await?;

    match &outcome {
        ProcessOutcome::Processed(_) => println!("process {}", id),
        ProcessOutcome::AlreadyReady(_) => println!("process {} (already ready)", id),
        ProcessOutcome::Failed(_) => println!("process {} (failed)", id),
    }
    print_record(outcome.record());

    if let ProcessOutcome::Failed(record) = outcome {
        anyhow::bail!(
            "processing failed: {}",
            record.error_message.unwrap_or_default()
        );
    }
    println!("ok");
    Ok(())
}

pub async fn run_status(config: &Config, id: &str) -> Result<()> {
    let lifecycle = open_lifecycle(config).await?;
    let record = lifecycle.status(id).await?;
    print_record(&record);
    Ok(())
}

pub async fn run_list(config: &Config, user: &str) -> Result<()> {
    let lifecycle = open_lifecycle(config).await?;
    let records = lifecycle.list(user).await?;

    if records.is_empty() {
        println!("No backups for {}.", user);
        return Ok(());
    }
    println!("{:<38} {:<11} {:<14} CREATED", "ID", "STATUS", "TIER");
    for record in &records {
        println!(
            "{:<38} {:<11} {:<14} {}",
            record.id,
            record.status.as_str(),
            record.tier.as_str(),
            record.created_at.format("%Y-%m-%d %H:%M:%S")
        );
    }
    Ok(())
}

/// Print the snapshot as pretty JSON.
pub async fn run_report(config: &Config, id: &str) -> Result<()> {
    let lifecycle = open_lifecycle(config).await?;
    let snapshot = lifecycle.snapshot(id).await?;
    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    Ok(())
}

pub async fn run_sweep(config: &Config) -> Result<()> {
    let lifecycle = open_lifecycle(config).await?;
    let report = lifecycle.sweep().await?;

    println!("sweep");
    println!("  raw archives deleted: {}", report.raw_deleted);
    println!("  backups deleted: {}", report.records_deleted);
    println!("  failures: {}", report.failures);
    println!("ok");
    Ok(())
}
