//! File locator and export format detection.
//!
//! Entity files are matched by basename, case-insensitively and exactly,
//! against a fixed table of canonical names. Directory nesting is ignored:
//! `Export/Basic_LinkedInDataExport/Connections.csv` and `connections.csv`
//! both locate the connections table.

use std::collections::BTreeMap;

use profile_vault_core::models::{EntityKind, FormatVersion};
use tracing::{debug, info};

use crate::archive::ArchiveManifest;

/// Entities whose presence marks an archive as the known layout.
pub const ANCHOR_SET: [EntityKind; 3] = [
    EntityKind::Connections,
    EntityKind::Profile,
    EntityKind::Positions,
];

/// Canonical file names per entity, lowercase.
fn canonical_names(kind: EntityKind) -> &'static [&'static str] {
    match kind {
        EntityKind::Profile => &["profile.csv"],
        EntityKind::Connections => &["connections.csv"],
        EntityKind::Positions => &["positions.csv"],
        EntityKind::Education => &["education.csv"],
        EntityKind::Skills => &["skills.csv"],
        EntityKind::Recommendations => &[
            "recommendations_received.csv",
            "recommendations received.csv",
        ],
        EntityKind::Messages => &["messages.csv"],
        EntityKind::Posts => &["shares.csv", "posts.csv"],
        EntityKind::Comments => &["comments.csv"],
        EntityKind::Reactions => &["reactions.csv"],
        EntityKind::CompanyFollows => &["company follows.csv", "company_follows.csv"],
    }
}

/// Entity whose canonical table contains this basename.
pub fn classify(path: &str) -> Option<EntityKind> {
    let basename = path.rsplit(['/', '\\']).next().unwrap_or(path);
    let lowered = basename.to_lowercase();
    EntityKind::ALL
        .iter()
        .copied()
        .find(|kind| canonical_names(*kind).contains(&lowered.as_str()))
}

/// Entity files found in an archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Located {
    /// Entity → archive entry path.
    pub files: BTreeMap<EntityKind, String>,
    pub version: FormatVersion,
}

impl Located {
    pub fn path(&self, kind: EntityKind) -> Option<&str> {
        self.files.get(&kind).map(String::as_str)
    }
}

/// Map entity kinds to entry paths and detect the layout variant.
///
/// When two entries share a canonical name, the first in archive order wins.
pub fn locate(manifest: &ArchiveManifest) -> Located {
    let mut files = BTreeMap::new();
    for entry in manifest.files() {
        let Some(kind) = classify(&entry.path) else {
            continue;
        };
        if files.contains_key(&kind) {
            debug!(path = %entry.path, entity = %kind, "duplicate entity file ignored");
            continue;
        }
        files.insert(kind, entry.path.clone());
    }

    let version = if ANCHOR_SET.iter().all(|k| files.contains_key(k)) {
        FormatVersion::Known
    } else {
        FormatVersion::Unknown
    };

    info!(
        found = files.len(),
        version = version.as_str(),
        "located entity files"
    );
    Located { files, version }
}
