//! Backup lifecycle manager.
//!
//! The only component that mutates [`BackupRecord`]s. States move
//! `pending → processing → ready | error`; `error` may be retried by
//! triggering processing again. Entry into `processing` goes through the
//! store's compare-and-set, so a backup id is processed by at most one run
//! at a time. A claim older than `retention.stale_processing_secs` is
//! treated as abandoned and can be taken over.
//!
//! # Run
//!
//! 1. Claim the record (`pending | error → processing`).
//! 2. Fetch the raw archive from the object store.
//! 3. [`pipeline::analyze`]: validate, locate, parse, normalize, aggregate.
//! 4. [`enrich::generate_report`] for the record's tier.
//! 5. Write the derived snapshot (and recovery pack) to the object store.
//! 6. Persist the [`Snapshot`] and mark the record `ready`.
//!
//! Any failure in steps 2–6 marks the record `error` with the message and
//! removes the artifacts the failed run wrote.
//!
//! Steps 2–6 run on a detached task: dropping the caller's future (a client
//! disconnecting mid-request) does not abandon a claimed record. The
//! synchronous analysis runs on the blocking pool.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use profile_vault_core::models::{
    BackupRecord, BackupStatus, CanonicalRecord, Contains, Retention, Snapshot, StoragePaths,
    Tier,
};
use profile_vault_core::store::{BackupStore, ClaimOutcome, Completion, ObjectStore};

use crate::archive::ExtractionMetrics;
use crate::config::Config;
use crate::enrich::{self, Enricher};
use crate::pipeline::{self, PipelineError};
use crate::retention::{self, SweepReport};

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("backup {0} not found")]
    NotFound(String),
    #[error("backup {0} is already being processed")]
    AlreadyProcessing(String),
    #[error("invalid request: {0}")]
    Invalid(String),
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// Result of [`Lifecycle::submit`].
#[derive(Debug, Clone)]
pub struct Submission {
    pub record: BackupRecord,
    /// The owner had already submitted identical bytes.
    pub duplicate: bool,
}

/// Result of [`Lifecycle::process`].
#[derive(Debug, Clone)]
pub enum ProcessOutcome {
    Processed(BackupRecord),
    /// Already `ready`; nothing was reprocessed.
    AlreadyReady(BackupRecord),
    /// The run failed and the record is now `error`.
    Failed(BackupRecord),
}

impl ProcessOutcome {
    pub fn record(&self) -> &BackupRecord {
        match self {
            ProcessOutcome::Processed(r)
            | ProcessOutcome::AlreadyReady(r)
            | ProcessOutcome::Failed(r) => r,
        }
    }
}

#[derive(Clone)]
pub struct Lifecycle {
    store: Arc<dyn BackupStore>,
    objects: Arc<dyn ObjectStore>,
    config: Arc<Config>,
    enricher: Option<Arc<dyn Enricher>>,
}

fn valid_owner_id(owner_id: &str) -> bool {
    !owner_id.is_empty()
        && owner_id != "."
        && owner_id != ".."
        && owner_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '@'))
}

impl Lifecycle {
    pub fn new(
        store: Arc<dyn BackupStore>,
        objects: Arc<dyn ObjectStore>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            store,
            objects,
            config,
            enricher: None,
        }
    }

    pub fn with_enricher(mut self, enricher: Option<Arc<dyn Enricher>>) -> Self {
        self.enricher = enricher;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Accept an archive for `owner_id` and store it as a `pending` backup.
    pub async fn submit(
        &self,
        owner_id: &str,
        tier: Tier,
        bytes: Vec<u8>,
    ) -> Result<Submission, LifecycleError> {
        if !valid_owner_id(owner_id) {
            return Err(LifecycleError::Invalid(format!(
                "owner id '{}' must be non-empty and use only letters, digits, '-', '_', '.', '@'",
                owner_id
            )));
        }
        if bytes.is_empty() {
            return Err(LifecycleError::Invalid("archive is empty".to_string()));
        }

        let sha256 = hex::encode(Sha256::digest(&bytes));
        if let Some(existing) = self.store.find_by_checksum(owner_id, &sha256).await? {
            // A record whose raw archive was swept before it reached `ready`
            // can never be processed again; the upload starts a fresh one.
            let usable = existing.storage_paths.raw.is_some()
                || matches!(
                    existing.status,
                    BackupStatus::Ready | BackupStatus::Processing
                );
            if usable {
                info!(id = %existing.id, owner = owner_id, "duplicate archive submission");
                return Ok(Submission {
                    record: existing,
                    duplicate: true,
                });
            }
            info!(
                id = %existing.id,
                owner = owner_id,
                status = %existing.status,
                "earlier upload lost its raw archive; creating a new backup"
            );
        }

        let now = Utc::now();
        let id = Uuid::new_v4().to_string();
        let raw_path = StoragePaths::raw_key(owner_id, &id);
        let size = bytes.len();
        self.objects.put(&raw_path, bytes).await?;

        let retention = &self.config.retention;
        let record = BackupRecord {
            id: id.clone(),
            owner_id: owner_id.to_string(),
            status: BackupStatus::Pending,
            tier,
            sha256,
            storage_paths: StoragePaths {
                raw: Some(raw_path.clone()),
                derived: None,
                recovery_pack: None,
            },
            retention: Retention {
                raw_expires_at: now + chrono::Duration::days(retention.raw_days),
                derived_expires_at: now + chrono::Duration::days(retention.derived_days),
            },
            contains: Contains::default(),
            format_version: None,
            error_message: None,
            created_at: now,
            processing_started_at: None,
            processed_at: None,
        };

        if let Err(e) = self.store.insert_backup(&record).await {
            if let Err(cleanup) = self.objects.delete(&raw_path).await {
                warn!(path = %raw_path, error = %cleanup, "failed to remove orphaned raw archive");
            }
            return Err(e.into());
        }

        info!(id = %id, owner = owner_id, tier = tier.as_str(), bytes = size, "backup submitted");
        Ok(Submission {
            record,
            duplicate: false,
        })
    }

    /// Trigger processing of one backup.
    pub async fn process(&self, id: &str) -> Result<ProcessOutcome, LifecycleError> {
        let now = Utc::now();
        let stale_before =
            now - chrono::Duration::seconds(self.config.retention.stale_processing_secs);

        let record = match self.store.claim_for_processing(id, now, stale_before).await? {
            ClaimOutcome::Claimed(record) => record,
            ClaimOutcome::AlreadyReady(record) => {
                info!(id, "backup already ready; skipping");
                return Ok(ProcessOutcome::AlreadyReady(record));
            }
            ClaimOutcome::AlreadyProcessing => {
                return Err(LifecycleError::AlreadyProcessing(id.to_string()))
            }
            ClaimOutcome::NotFound => return Err(LifecycleError::NotFound(id.to_string())),
        };
        info!(id, owner = %record.owner_id, "pending → processing");

        let this = self.clone();
        tokio::spawn(async move { this.finish(record, now).await })
            .await
            .map_err(|e| LifecycleError::Store(anyhow::anyhow!("processing task failed: {}", e)))?
    }

    /// Run a claimed record to `ready` or `error`.
    async fn finish(
        &self,
        record: BackupRecord,
        claimed_at: DateTime<Utc>,
    ) -> Result<ProcessOutcome, LifecycleError> {
        let id = record.id.as_str();
        let finished = match self.run(&record).await {
            Ok(completion) => self
                .store
                .mark_ready(id, claimed_at, &completion)
                .await
                .map_err(|e| PipelineError::Persistence(format!("{:#}", e))),
            Err(e) => Err(e),
        };

        if let Err(e) = finished {
            warn!(id, error = %e, "processing → error");
            self.store
                .mark_error(id, claimed_at, &e.to_string())
                .await?;
            let record = self.fetch(id).await?;
            return Ok(ProcessOutcome::Failed(record));
        }

        let record = self.fetch(id).await?;
        info!(id, "processing → ready");
        Ok(ProcessOutcome::Processed(record))
    }

    async fn run(&self, record: &BackupRecord) -> Result<Completion, PipelineError> {
        let raw_path = record
            .storage_paths
            .raw
            .as_deref()
            .ok_or_else(|| PipelineError::Storage("raw archive has expired".to_string()))?;
        let bytes = self
            .objects
            .get(raw_path)
            .await
            .map_err(|e| PipelineError::Storage(format!("{:#}", e)))?;

        let config = Arc::clone(&self.config);
        let analysis = tokio::task::spawn_blocking(move || {
            let metrics = ExtractionMetrics::default();
            pipeline::analyze(&bytes, &config, &metrics)
        })
        .await
        .map_err(|e| PipelineError::Aborted(e.to_string()))??;

        let deadline = Duration::from_secs(self.config.enrichment.timeout_secs);
        let report = enrich::generate_report(
            &analysis.stats,
            record.tier,
            &self.config.insight,
            self.enricher.as_deref(),
            deadline,
        )
        .await;

        let processed_at = Utc::now();
        let snapshot = Snapshot {
            backup_id: record.id.clone(),
            owner_id: record.owner_id.clone(),
            stats: analysis.stats,
            report,
            created_at: processed_at,
        };

        let mut written = Vec::new();
        let result = self
            .write_artifacts(record, &snapshot, &analysis.records, &mut written)
            .await;
        let recovery_path = match result {
            Ok(path) => path,
            Err(e) => {
                self.discard(&record.id, &written, false).await;
                return Err(e);
            }
        };

        if let Err(e) = self.store.put_snapshot(&snapshot).await {
            self.discard(&record.id, &written, true).await;
            return Err(PipelineError::Persistence(format!("{:#}", e)));
        }

        Ok(Completion {
            contains: analysis.contains,
            format_version: analysis.format_version,
            derived_path: StoragePaths::derived_key(&record.owner_id, &record.id),
            recovery_path,
            processed_at,
        })
    }

    /// Write the derived snapshot and, when enabled, the recovery pack.
    /// Every path written is pushed to `written`.
    async fn write_artifacts(
        &self,
        record: &BackupRecord,
        snapshot: &Snapshot,
        records: &[CanonicalRecord],
        written: &mut Vec<String>,
    ) -> Result<Option<String>, PipelineError> {
        let derived_path = StoragePaths::derived_key(&record.owner_id, &record.id);
        let derived = serde_json::to_vec_pretty(snapshot)
            .map_err(|e| PipelineError::Persistence(e.to_string()))?;
        self.objects
            .put(&derived_path, derived)
            .await
            .map_err(|e| PipelineError::Storage(format!("{:#}", e)))?;
        written.push(derived_path);

        if !self.config.retention.recovery_pack {
            return Ok(None);
        }
        let pack = pipeline::recovery_pack(records)
            .map_err(|e| PipelineError::Persistence(format!("{:#}", e)))?;
        let path = StoragePaths::recovery_key(&record.owner_id, &record.id);
        self.objects
            .put(&path, pack)
            .await
            .map_err(|e| PipelineError::Storage(format!("{:#}", e)))?;
        written.push(path.clone());
        Ok(Some(path))
    }

    /// Best-effort removal of what a failed run wrote.
    async fn discard(&self, id: &str, written: &[String], snapshot: bool) {
        for path in written {
            if let Err(e) = self.objects.delete(path).await {
                warn!(id, path = %path, error = %e, "failed to remove artifact of failed run");
            }
        }
        if snapshot {
            if let Err(e) = self.store.delete_snapshot(id).await {
                warn!(id, error = %e, "failed to remove snapshot of failed run");
            }
        }
    }

    async fn fetch(&self, id: &str) -> Result<BackupRecord, LifecycleError> {
        self.store
            .get_backup(id)
            .await?
            .ok_or_else(|| LifecycleError::NotFound(id.to_string()))
    }

    pub async fn status(&self, id: &str) -> Result<BackupRecord, LifecycleError> {
        self.fetch(id).await
    }

    pub async fn snapshot(&self, id: &str) -> Result<Snapshot, LifecycleError> {
        self.store
            .get_snapshot(id)
            .await?
            .ok_or_else(|| LifecycleError::NotFound(id.to_string()))
    }

    pub async fn list(&self, owner_id: &str) -> Result<Vec<BackupRecord>, LifecycleError> {
        Ok(self.store.list_by_owner(owner_id).await?)
    }

    /// Run the retention sweep at the current time.
    pub async fn sweep(&self) -> Result<SweepReport, LifecycleError> {
        Ok(retention::sweep(self.store.as_ref(), self.objects.as_ref(), Utc::now()).await?)
    }
}
