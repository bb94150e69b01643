//! One archive run: validate → locate → parse → normalize → aggregate.
//!
//! This stage is synchronous and touches no storage. It receives the raw
//! archive bytes from the lifecycle manager and returns the canonical
//! records plus their statistics; everything it allocates is dropped when
//! the run ends.

use std::io::{Cursor, Write};

use anyhow::{Context, Result};
use profile_vault_core::aggregate::{aggregate, AggregatedStats};
use profile_vault_core::models::{CanonicalRecord, Contains, EntityKind, FormatVersion};
use profile_vault_core::normalize::{normalize, CONNECTIONS_ANCHOR};
use profile_vault_core::tabular::{parse_table, ParseOptions};
use thiserror::Error;
use tracing::{debug, info};

use crate::archive::{self, ExtractionMetrics, Rejection};
use crate::config::Config;
use crate::locate::locate;

/// Why a run could not produce a safe result.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("malformed archive: {0}")]
    Malformed(String),
    #[error(transparent)]
    Rejected(Rejection),
    #[error("storage failure: {0}")]
    Storage(String),
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("analysis task failed: {0}")]
    Aborted(String),
}

impl From<Rejection> for PipelineError {
    fn from(rejection: Rejection) -> Self {
        if rejection.malformed {
            PipelineError::Malformed(rejection.reasons.join("; "))
        } else {
            PipelineError::Rejected(rejection)
        }
    }
}

/// Output of [`analyze`].
#[derive(Debug, Clone)]
pub struct Analysis {
    pub records: Vec<CanonicalRecord>,
    /// Entities whose file was present in the archive.
    pub contains: Contains,
    pub format_version: FormatVersion,
    pub stats: AggregatedStats,
    pub warnings: Vec<String>,
}

/// Run the synchronous stages over one archive.
pub fn analyze(
    bytes: &[u8],
    config: &Config,
    metrics: &ExtractionMetrics,
) -> Result<Analysis, PipelineError> {
    let mut archive = archive::validate(bytes, &config.limits.archive_limits())?;
    let located = locate(archive.manifest());
    let warnings = archive.warnings().to_vec();

    let mut records = Vec::new();
    for (kind, path) in &located.files {
        let content = archive.read_entry(path, metrics)?;
        let text = String::from_utf8_lossy(&content);
        let options = ParseOptions {
            anchor: (*kind == EntityKind::Connections).then_some(CONNECTIONS_ANCHOR),
            ..ParseOptions::default()
        };
        let table = parse_table(&text, options);
        let normalized = normalize(*kind, &table.rows);
        info!(
            entity = %kind,
            rows = normalized.len(),
            dropped = table.dropped,
            "parsed entity file"
        );
        records.extend(normalized);
    }

    let contains = Contains::from_kinds(located.files.keys().copied());
    for kind in EntityKind::ALL {
        if !contains.get(kind) {
            debug!(entity = %kind, "entity file absent");
        }
    }

    let stats = aggregate(&records, &config.aggregation.params());
    info!(
        records = records.len(),
        completeness = stats.completeness.score,
        entries_read = metrics.entries_read(),
        bytes_inflated = metrics.bytes_inflated(),
        "aggregated archive"
    );

    Ok(Analysis {
        records,
        contains,
        format_version: located.version,
        stats,
        warnings,
    })
}

/// Zip of `<entity>.json` files holding the normalized records.
pub fn recovery_pack(records: &[CanonicalRecord]) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    {
        let mut zip = zip::ZipWriter::new(Cursor::new(&mut buf));
        let options = zip::write::SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Deflated);
        for kind in EntityKind::ALL {
            let of_kind: Vec<&CanonicalRecord> =
                records.iter().filter(|r| r.kind() == kind).collect();
            if of_kind.is_empty() {
                continue;
            }
            let json = serde_json::to_vec_pretty(&of_kind)
                .with_context(|| format!("Failed to serialize {} records", kind))?;
            zip.start_file(format!("{}.json", kind), options)
                .context("Failed to start recovery pack entry")?;
            zip.write_all(&json)
                .context("Failed to write recovery pack entry")?;
        }
        zip.finish().context("Failed to finish recovery pack")?;
    }
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    fn build_zip(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut buf = Vec::new();
        {
            let mut zip = zip::ZipWriter::new(Cursor::new(&mut buf));
            for (name, data) in entries {
                zip.start_file(*name, zip::write::SimpleFileOptions::default())
                    .unwrap();
                zip.write_all(data.as_bytes()).unwrap();
            }
            zip.finish().unwrap();
        }
        buf
    }

    fn test_config() -> Config {
        toml::from_str(
            r#"
[db]
path = "unused.sqlite"

[storage]
root = "unused"
"#,
        )
        .unwrap()
    }

    const PROFILE: &str = "First Name,Last Name,Headline,Summary,Industry,Geo Location\n\
        Ada,Lovelace,Analyst,Writes notes,Mathematics,London\n";
    const CONNECTIONS: &str = "Notes:\n\"Exported connections\"\n\n\
        First Name,Last Name,URL,Email Address,Company,Position,Connected On\n\
        Grace,Hopper,https://x/grace,,Navy,Admiral,01 Jan 2023\n\
        Alan,Turing,https://x/alan,,\"Bletchley, Park\",Cryptanalyst,15 Feb 2023\n";

    #[test]
    fn test_analyze_full_export() {
        let bytes = build_zip(&[
            ("export/Profile.csv", PROFILE),
            ("export/Connections.csv", CONNECTIONS),
            ("export/Positions.csv", "Company Name,Title,Started On\nAcme,Engineer,Jan 2020\n"),
            ("export/README.txt", "ignored"),
        ]);
        let metrics = ExtractionMetrics::default();
        let analysis = analyze(&bytes, &test_config(), &metrics).unwrap();

        assert_eq!(analysis.format_version, FormatVersion::Known);
        assert!(analysis.contains.connections);
        assert!(analysis.contains.positions);
        assert!(!analysis.contains.skills);
        assert_eq!(analysis.stats.count(EntityKind::Connections), 2);
        let companies: Vec<&str> = analysis
            .stats
            .top_companies
            .iter()
            .map(|e| e.value.as_str())
            .collect();
        assert_eq!(companies, vec!["Navy", "Bletchley, Park"]);
        assert_eq!(metrics.entries_read(), 3);
    }

    #[test]
    fn test_missing_positions_is_not_an_error() {
        let bytes = build_zip(&[("Profile.csv", PROFILE), ("Connections.csv", CONNECTIONS)]);
        let analysis = analyze(&bytes, &test_config(), &ExtractionMetrics::default()).unwrap();
        assert_eq!(analysis.format_version, FormatVersion::Unknown);
        assert!(!analysis.contains.positions);
        assert_eq!(analysis.stats.completeness.breakdown.experience, 0);
    }

    #[test]
    fn test_garbage_is_malformed() {
        let err = analyze(b"PK\x03\x04 nope", &test_config(), &ExtractionMetrics::default())
            .unwrap_err();
        assert!(matches!(err, PipelineError::Malformed(_)));
    }

    #[test]
    fn test_traversal_is_rejected_before_reading() {
        let bytes = build_zip(&[("Connections.csv", CONNECTIONS), ("../../etc/cron.d/x", "boom")]);
        let metrics = ExtractionMetrics::default();
        let err = analyze(&bytes, &test_config(), &metrics).unwrap_err();
        match err {
            PipelineError::Rejected(rejection) => assert_eq!(rejection.reasons.len(), 1),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(metrics.entries_read(), 0);
    }

    #[test]
    fn test_over_total_archive_rejected_before_any_inflation() {
        let big = "x".repeat(900);
        let bytes = build_zip(&[
            ("Connections.csv", big.as_str()),
            ("Positions.csv", big.as_str()),
            ("Skills.csv", big.as_str()),
        ]);
        let mut config = test_config();
        config.limits.max_file_bytes = 1_000;
        config.limits.max_total_bytes = 2_500;
        config.limits.warn_total_bytes = 2_000;

        let metrics = ExtractionMetrics::default();
        let err = analyze(&bytes, &config, &metrics).unwrap_err();
        match err {
            PipelineError::Rejected(rejection) => {
                assert!(rejection.reasons.iter().any(|r| r.contains("total uncompressed")))
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(metrics.entries_read(), 0);
        assert_eq!(metrics.bytes_inflated(), 0);
    }

    #[test]
    fn test_recovery_pack_has_one_file_per_entity() {
        let bytes = build_zip(&[("Profile.csv", PROFILE), ("Connections.csv", CONNECTIONS)]);
        let analysis = analyze(&bytes, &test_config(), &ExtractionMetrics::default()).unwrap();
        let pack = recovery_pack(&analysis.records).unwrap();

        let mut zip = zip::ZipArchive::new(Cursor::new(pack)).unwrap();
        let mut names: Vec<String> = zip.file_names().map(String::from).collect();
        names.sort();
        assert_eq!(names, vec!["connections.json", "profile.json"]);

        let mut json = String::new();
        zip.by_name("connections.json")
            .unwrap()
            .read_to_string(&mut json)
            .unwrap();
        let parsed: Vec<CanonicalRecord> = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.len(), 2);
    }
}
