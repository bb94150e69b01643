use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use profile_vault_core::aggregate::{AggregationParams, CompletenessTargets, MAX_TOP_N};
use profile_vault_core::insight::InsightParams;

use crate::archive::ArchiveLimits;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub aggregation: AggregationConfig,
    #[serde(default)]
    pub insight: InsightParams,
    #[serde(default)]
    pub enrichment: EnrichmentConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// Root directory of the filesystem object store.
    pub root: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LimitsConfig {
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
    #[serde(default = "default_max_total_bytes")]
    pub max_total_bytes: u64,
    #[serde(default = "default_warn_total_bytes")]
    pub warn_total_bytes: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_entries: default_max_entries(),
            max_file_bytes: default_max_file_bytes(),
            max_total_bytes: default_max_total_bytes(),
            warn_total_bytes: default_warn_total_bytes(),
        }
    }
}

fn default_max_entries() -> usize {
    5_000
}
fn default_max_file_bytes() -> u64 {
    100 * 1024 * 1024
}
fn default_max_total_bytes() -> u64 {
    500 * 1024 * 1024
}
fn default_warn_total_bytes() -> u64 {
    100 * 1024 * 1024
}

impl LimitsConfig {
    pub fn archive_limits(&self) -> ArchiveLimits {
        ArchiveLimits {
            max_entries: self.max_entries,
            max_file_bytes: self.max_file_bytes,
            max_total_bytes: self.max_total_bytes,
            warn_total_bytes: self.warn_total_bytes,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AggregationConfig {
    #[serde(default = "default_top_n")]
    pub top_n: usize,
    #[serde(default = "default_unknown_sentinel")]
    pub unknown_sentinel: String,
    #[serde(default)]
    pub targets: CompletenessTargets,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            top_n: default_top_n(),
            unknown_sentinel: default_unknown_sentinel(),
            targets: CompletenessTargets::default(),
        }
    }
}

fn default_top_n() -> usize {
    MAX_TOP_N
}
fn default_unknown_sentinel() -> String {
    "Unknown".to_string()
}

impl AggregationConfig {
    pub fn params(&self) -> AggregationParams {
        AggregationParams {
            top_n: self.top_n,
            unknown_sentinel: self.unknown_sentinel.clone(),
            targets: self.targets,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct EnrichmentConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    /// Base URL of an OpenAI-compatible API.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            url: None,
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    2
}

impl EnrichmentConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetentionConfig {
    #[serde(default = "default_raw_days")]
    pub raw_days: i64,
    #[serde(default = "default_derived_days")]
    pub derived_days: i64,
    /// A `processing` claim older than this may be taken over.
    #[serde(default = "default_stale_processing_secs")]
    pub stale_processing_secs: i64,
    #[serde(default = "default_recovery_pack")]
    pub recovery_pack: bool,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            raw_days: default_raw_days(),
            derived_days: default_derived_days(),
            stale_processing_secs: default_stale_processing_secs(),
            recovery_pack: default_recovery_pack(),
        }
    }
}

/// Upper bounds keep expiry arithmetic well inside `chrono`'s range.
const MAX_RETENTION_DAYS: i64 = 36_500;
const MAX_STALE_PROCESSING_SECS: i64 = 7 * 24 * 60 * 60;

fn default_raw_days() -> i64 {
    7
}
fn default_derived_days() -> i64 {
    365
}
fn default_stale_processing_secs() -> i64 {
    900
}
fn default_recovery_pack() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7340".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    // Validate limits
    let limits = &config.limits;
    if limits.max_entries == 0 || limits.max_file_bytes == 0 || limits.max_total_bytes == 0 {
        anyhow::bail!("limits.max_entries, max_file_bytes, and max_total_bytes must be > 0");
    }
    if limits.max_file_bytes > limits.max_total_bytes {
        anyhow::bail!("limits.max_file_bytes must be <= limits.max_total_bytes");
    }

    // Validate aggregation
    if !(1..=MAX_TOP_N).contains(&config.aggregation.top_n) {
        anyhow::bail!("aggregation.top_n must be in [1, {}]", MAX_TOP_N);
    }
    let targets = &config.aggregation.targets;
    if targets.experience == 0
        || targets.education == 0
        || targets.skills == 0
        || targets.recommendations == 0
    {
        anyhow::bail!("aggregation.targets must all be > 0");
    }

    // Validate insight
    if config.insight.base_score > 100 {
        anyhow::bail!("insight.base_score must be <= 100");
    }

    // Validate retention
    let retention = &config.retention;
    if retention.raw_days < 0 || retention.derived_days < 0 {
        anyhow::bail!("retention.raw_days and retention.derived_days must be >= 0");
    }
    if retention.derived_days < retention.raw_days {
        anyhow::bail!("retention.derived_days must be >= retention.raw_days");
    }
    if retention.raw_days > MAX_RETENTION_DAYS || retention.derived_days > MAX_RETENTION_DAYS {
        anyhow::bail!(
            "retention.raw_days and retention.derived_days must be <= {}",
            MAX_RETENTION_DAYS
        );
    }
    if retention.stale_processing_secs <= 0
        || retention.stale_processing_secs > MAX_STALE_PROCESSING_SECS
    {
        anyhow::bail!(
            "retention.stale_processing_secs must be in [1, {}]",
            MAX_STALE_PROCESSING_SECS
        );
    }

    // Validate enrichment
    if config.enrichment.is_enabled() {
        if config.enrichment.model.is_none() {
            anyhow::bail!(
                "enrichment.model must be specified when provider is '{}'",
                config.enrichment.provider
            );
        }
        if config.enrichment.timeout_secs == 0 {
            anyhow::bail!("enrichment.timeout_secs must be > 0");
        }
    }

    match config.enrichment.provider.as_str() {
        "disabled" | "openai" => {}
        other => anyhow::bail!(
            "Unknown enrichment provider: '{}'. Must be disabled or openai.",
            other
        ),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[db]
path = "./data/vault.sqlite"

[storage]
root = "./data/objects"
"#;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config: Config = toml::from_str(MINIMAL).unwrap();
        validate(&config).unwrap();
        assert_eq!(config.limits.max_entries, 5_000);
        assert_eq!(config.aggregation.top_n, 20);
        assert_eq!(config.aggregation.targets.skills, 10);
        assert_eq!(config.insight.base_score, 50);
        assert_eq!(config.retention.raw_days, 7);
        assert!(!config.enrichment.is_enabled());
    }

    #[test]
    fn test_top_n_out_of_range_rejected() {
        let text = format!("{}\n[aggregation]\ntop_n = 50\n", MINIMAL);
        let config: Config = toml::from_str(&text).unwrap();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_enrichment_requires_model() {
        let text = format!("{}\n[enrichment]\nprovider = \"openai\"\n", MINIMAL);
        let config: Config = toml::from_str(&text).unwrap();
        let err = validate(&config).unwrap_err().to_string();
        assert!(err.contains("enrichment.model"));
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let text = format!(
            "{}\n[enrichment]\nprovider = \"oracle\"\nmodel = \"m\"\n",
            MINIMAL
        );
        let config: Config = toml::from_str(&text).unwrap();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_huge_retention_rejected() {
        for section in [
            "[retention]\nraw_days = 9223372036854775807\nderived_days = 9223372036854775807\n",
            "[retention]\nderived_days = 100000\n",
            "[retention]\nstale_processing_secs = 9223372036854775807\n",
        ] {
            let text = format!("{}\n{}", MINIMAL, section);
            let config: Config = toml::from_str(&text).unwrap();
            assert!(validate(&config).is_err(), "{}", section);
        }
    }

    #[test]
    fn test_file_limit_above_total_rejected() {
        let text = format!(
            "{}\n[limits]\nmax_file_bytes = 10\nmax_total_bytes = 5\n",
            MINIMAL
        );
        let config: Config = toml::from_str(&text).unwrap();
        assert!(validate(&config).is_err());
    }
}
