//! Archive safety validation and bounded entry reading.
//!
//! [`inspect`] walks the zip central directory only: entry names and the
//! sizes declared in the headers. No entry content is inflated. Only a
//! [`ValidatedArchive`], obtainable solely through [`validate`], can read
//! entry content, and it reads every entry through a size cap so that a
//! header lying about its uncompressed size cannot inflate past the limits.
//!
//! # Checks
//!
//! | Check | On violation |
//! |-------|--------------|
//! | Entry count ≤ `max_entries` | reject immediately, nothing else scanned |
//! | Entry size ≤ `max_file_bytes` | record reason, keep scanning |
//! | Path has no `..` and is not absolute | record reason, keep scanning |
//! | Running total ≤ `max_total_bytes` | record reason, stop scanning |

use std::io::{Cursor, Read};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};
use zip::ZipArchive;

/// Resource ceilings enforced before and during extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveLimits {
    pub max_entries: usize,
    pub max_file_bytes: u64,
    pub max_total_bytes: u64,
    /// Above this total, validation passes with a warning.
    pub warn_total_bytes: u64,
}

impl Default for ArchiveLimits {
    fn default() -> Self {
        Self {
            max_entries: 5_000,
            max_file_bytes: 100 * 1024 * 1024,
            max_total_bytes: 500 * 1024 * 1024,
            warn_total_bytes: 100 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManifestEntry {
    pub path: String,
    pub is_directory: bool,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
}

/// Entries enumerated from the central directory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ArchiveManifest {
    pub entries: Vec<ManifestEntry>,
    pub total_uncompressed: u64,
}

impl ArchiveManifest {
    pub fn files(&self) -> impl Iterator<Item = &ManifestEntry> {
        self.entries.iter().filter(|e| !e.is_directory)
    }
}

/// Full diagnostic result of [`inspect`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inspection {
    pub passed: bool,
    pub reasons: Vec<String>,
    pub warnings: Vec<String>,
    /// Entries examined before scanning stopped.
    pub scanned: usize,
    /// The bytes are not a readable zip archive at all.
    pub malformed: bool,
    /// Present only when `passed`.
    pub manifest: Option<ArchiveManifest>,
}

impl Inspection {
    fn failed(reason: String, malformed: bool) -> Self {
        Self {
            passed: false,
            reasons: vec![reason],
            warnings: Vec::new(),
            scanned: 0,
            malformed,
            manifest: None,
        }
    }
}

/// An archive refused by the safety guard, with every reason found.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("archive rejected: {}", .reasons.join("; "))]
pub struct Rejection {
    pub reasons: Vec<String>,
    pub malformed: bool,
}

impl Rejection {
    fn single(reason: String) -> Self {
        Self {
            reasons: vec![reason],
            malformed: false,
        }
    }
}

/// Counters for content actually inflated from an archive.
#[derive(Debug, Default)]
pub struct ExtractionMetrics {
    entries_read: AtomicUsize,
    bytes_inflated: AtomicU64,
}

impl ExtractionMetrics {
    pub fn entries_read(&self) -> usize {
        self.entries_read.load(Ordering::Relaxed)
    }

    pub fn bytes_inflated(&self) -> u64 {
        self.bytes_inflated.load(Ordering::Relaxed)
    }

    fn record(&self, bytes: u64) {
        self.entries_read.fetch_add(1, Ordering::Relaxed);
        self.bytes_inflated.fetch_add(bytes, Ordering::Relaxed);
    }
}

/// Whether an entry path escapes the extraction root.
pub fn is_unsafe_path(path: &str) -> bool {
    if path.is_empty() || path.contains('\0') {
        return true;
    }
    if path.starts_with('/') || path.starts_with('\\') {
        return true;
    }
    // Windows drive prefix, e.g. "C:".
    let bytes = path.as_bytes();
    if bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' {
        return true;
    }
    path.split(['/', '\\']).any(|component| component == "..")
}

/// Inspect archive metadata against `limits` without inflating any entry.
pub fn inspect(bytes: &[u8], limits: &ArchiveLimits) -> Inspection {
    let mut archive = match ZipArchive::new(Cursor::new(bytes)) {
        Ok(a) => a,
        Err(e) => {
            return Inspection::failed(format!("not a readable zip archive: {}", e), true)
        }
    };

    let count = archive.len();
    if count > limits.max_entries {
        return Inspection::failed(
            format!("archive has {} entries, limit is {}", count, limits.max_entries),
            false,
        );
    }

    let mut reasons = Vec::new();
    let mut entries = Vec::with_capacity(count);
    let mut total: u64 = 0;
    let mut scanned = 0;

    for i in 0..count {
        let entry = match archive.by_index_raw(i) {
            Ok(e) => e,
            Err(e) => {
                reasons.push(format!("entry {} is unreadable: {}", i, e));
                break;
            }
        };
        scanned += 1;

        let path = entry.name().to_string();
        let is_directory = entry.is_dir();
        let size = entry.size();

        if is_unsafe_path(&path) {
            reasons.push(format!("entry path escapes the archive root: {}", path));
        }
        if !is_directory && size > limits.max_file_bytes {
            reasons.push(format!(
                "entry {} is {} bytes uncompressed, limit is {}",
                path, size, limits.max_file_bytes
            ));
        }

        total = total.saturating_add(size);
        entries.push(ManifestEntry {
            path,
            is_directory,
            compressed_size: entry.compressed_size(),
            uncompressed_size: size,
        });

        if total > limits.max_total_bytes {
            reasons.push(format!(
                "total uncompressed size exceeds {} bytes",
                limits.max_total_bytes
            ));
            break;
        }
    }

    let mut warnings = Vec::new();
    if reasons.is_empty() && total > limits.warn_total_bytes {
        warnings.push(format!(
            "large archive ({} bytes uncompressed), processing may be slow",
            total
        ));
    }

    let passed = reasons.is_empty();
    Inspection {
        passed,
        reasons,
        warnings,
        scanned,
        malformed: false,
        manifest: passed.then_some(ArchiveManifest {
            entries,
            total_uncompressed: total,
        }),
    }
}

/// An archive that passed [`inspect`]; the only way to read entry content.
pub struct ValidatedArchive<'a> {
    archive: ZipArchive<Cursor<&'a [u8]>>,
    manifest: ArchiveManifest,
    warnings: Vec<String>,
    max_file_bytes: u64,
}

/// Validate `bytes` and open them for bounded reading.
pub fn validate<'a>(
    bytes: &'a [u8],
    limits: &ArchiveLimits,
) -> Result<ValidatedArchive<'a>, Rejection> {
    let inspection = inspect(bytes, limits);
    let manifest = match inspection.manifest {
        Some(m) if inspection.passed => m,
        _ => {
            warn!(reasons = ?inspection.reasons, "archive rejected");
            return Err(Rejection {
                reasons: inspection.reasons,
                malformed: inspection.malformed,
            });
        }
    };
    for warning in &inspection.warnings {
        warn!("{}", warning);
    }
    info!(
        entries = manifest.entries.len(),
        total_uncompressed = manifest.total_uncompressed,
        "archive passed validation"
    );

    let archive = ZipArchive::new(Cursor::new(bytes)).map_err(|e| Rejection {
        reasons: vec![format!("not a readable zip archive: {}", e)],
        malformed: true,
    })?;
    Ok(ValidatedArchive {
        archive,
        manifest,
        warnings: inspection.warnings,
        max_file_bytes: limits.max_file_bytes,
    })
}

impl ValidatedArchive<'_> {
    pub fn manifest(&self) -> &ArchiveManifest {
        &self.manifest
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    /// Read one entry, capped at its declared size and the per-file ceiling.
    pub fn read_entry(
        &mut self,
        path: &str,
        metrics: &ExtractionMetrics,
    ) -> Result<Vec<u8>, Rejection> {
        let declared = self
            .manifest
            .entries
            .iter()
            .find(|e| e.path == path)
            .map(|e| e.uncompressed_size)
            .ok_or_else(|| Rejection::single(format!("entry {} is not in the manifest", path)))?;
        let cap = declared.min(self.max_file_bytes);

        let entry = self
            .archive
            .by_name(path)
            .map_err(|e| Rejection::single(format!("entry {} is unreadable: {}", path, e)))?;
        let mut out = Vec::new();
        entry
            .take(cap + 1)
            .read_to_end(&mut out)
            .map_err(|e| Rejection::single(format!("entry {} failed to inflate: {}", path, e)))?;
        metrics.record(out.len() as u64);

        if out.len() as u64 > cap {
            return Err(Rejection::single(format!(
                "entry {} inflates beyond its declared {} bytes",
                path, declared
            )));
        }
        debug!(path, bytes = out.len(), "read archive entry");
        Ok(out)
    }
}
