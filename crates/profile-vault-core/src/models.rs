//! Core data models used throughout Profile Vault.
//!
//! These types represent the canonical records produced from an export
//! archive, and the backup and snapshot documents the lifecycle manager
//! persists.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::aggregate::AggregatedStats;
use crate::insight::InsightReport;

/// One category of exported data.
///
/// The declaration order is the canonical processing and reporting order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Profile,
    Connections,
    Positions,
    Education,
    Skills,
    Recommendations,
    Messages,
    Posts,
    Comments,
    Reactions,
    CompanyFollows,
}

impl EntityKind {
    pub const ALL: [EntityKind; 11] = [
        EntityKind::Profile,
        EntityKind::Connections,
        EntityKind::Positions,
        EntityKind::Education,
        EntityKind::Skills,
        EntityKind::Recommendations,
        EntityKind::Messages,
        EntityKind::Posts,
        EntityKind::Comments,
        EntityKind::Reactions,
        EntityKind::CompanyFollows,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Profile => "profile",
            EntityKind::Connections => "connections",
            EntityKind::Positions => "positions",
            EntityKind::Education => "education",
            EntityKind::Skills => "skills",
            EntityKind::Recommendations => "recommendations",
            EntityKind::Messages => "messages",
            EntityKind::Posts => "posts",
            EntityKind::Comments => "comments",
            EntityKind::Reactions => "reactions",
            EntityKind::CompanyFollows => "company_follows",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub first_name: String,
    pub last_name: String,
    pub headline: String,
    pub summary: String,
    pub industry: String,
    pub location: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    pub first_name: String,
    pub last_name: String,
    pub url: String,
    pub email: Option<String>,
    pub company: String,
    pub position: String,
    /// Only present in some export versions.
    pub location: Option<String>,
    /// Only present in some export versions.
    pub industry: Option<String>,
    pub connected_on: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub company: String,
    pub title: String,
    pub description: String,
    pub location: String,
    pub started_on: Option<NaiveDate>,
    pub finished_on: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Education {
    pub school: String,
    pub degree: String,
    pub notes: String,
    pub started_on: Option<NaiveDate>,
    pub finished_on: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Skill {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recommendation {
    pub first_name: String,
    pub last_name: String,
    pub company: String,
    pub job_title: String,
    pub text: String,
    pub status: String,
    pub created_on: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub conversation_id: String,
    pub from: String,
    pub to: String,
    pub subject: String,
    pub content: String,
    pub folder: String,
    pub sent_on: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    pub link: String,
    pub commentary: String,
    pub shared_url: String,
    pub visibility: String,
    pub posted_on: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub link: String,
    pub message: String,
    pub commented_on: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reaction {
    pub kind: String,
    pub link: String,
    pub reacted_on: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompanyFollow {
    pub organization: String,
    pub followed_on: Option<NaiveDate>,
}

/// The normalized, alias-resolved representation of one exported row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "entity", rename_all = "snake_case")]
pub enum CanonicalRecord {
    Profile(Profile),
    Connection(Connection),
    Position(Position),
    Education(Education),
    Skill(Skill),
    Recommendation(Recommendation),
    Message(Message),
    Post(Post),
    Comment(Comment),
    Reaction(Reaction),
    CompanyFollow(CompanyFollow),
}

impl CanonicalRecord {
    pub fn kind(&self) -> EntityKind {
        match self {
            CanonicalRecord::Profile(_) => EntityKind::Profile,
            CanonicalRecord::Connection(_) => EntityKind::Connections,
            CanonicalRecord::Position(_) => EntityKind::Positions,
            CanonicalRecord::Education(_) => EntityKind::Education,
            CanonicalRecord::Skill(_) => EntityKind::Skills,
            CanonicalRecord::Recommendation(_) => EntityKind::Recommendations,
            CanonicalRecord::Message(_) => EntityKind::Messages,
            CanonicalRecord::Post(_) => EntityKind::Posts,
            CanonicalRecord::Comment(_) => EntityKind::Comments,
            CanonicalRecord::Reaction(_) => EntityKind::Reactions,
            CanonicalRecord::CompanyFollow(_) => EntityKind::CompanyFollows,
        }
    }
}

/// Which export layout variant an archive follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormatVersion {
    Known,
    Unknown,
}

impl FormatVersion {
    pub fn as_str(&self) -> &'static str {
        match self {
            FormatVersion::Known => "known",
            FormatVersion::Unknown => "unknown",
        }
    }
}

impl FromStr for FormatVersion {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "known" => Ok(FormatVersion::Known),
            "unknown" => Ok(FormatVersion::Unknown),
            other => anyhow::bail!("unknown format version: '{}'", other),
        }
    }
}

/// Service level controlling which insight path runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    #[default]
    Deterministic,
    Enriched,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Deterministic => "deterministic",
            Tier::Enriched => "enriched",
        }
    }
}

impl FromStr for Tier {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "deterministic" | "basic" => Ok(Tier::Deterministic),
            "enriched" | "premium" => Ok(Tier::Enriched),
            other => anyhow::bail!(
                "Unknown tier: '{}'. Must be deterministic or enriched.",
                other
            ),
        }
    }
}

/// Backup lifecycle state: `pending → processing → ready | error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupStatus {
    Pending,
    Processing,
    Ready,
    Error,
}

impl BackupStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackupStatus::Pending => "pending",
            BackupStatus::Processing => "processing",
            BackupStatus::Ready => "ready",
            BackupStatus::Error => "error",
        }
    }
}

impl fmt::Display for BackupStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackupStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(BackupStatus::Pending),
            "processing" => Ok(BackupStatus::Processing),
            "ready" => Ok(BackupStatus::Ready),
            "error" => Ok(BackupStatus::Error),
            other => anyhow::bail!("unknown backup status: '{}'", other),
        }
    }
}

/// Object-store locations of a backup's artifacts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoragePaths {
    pub raw: Option<String>,
    pub derived: Option<String>,
    pub recovery_pack: Option<String>,
}

impl StoragePaths {
    pub fn raw_key(owner_id: &str, backup_id: &str) -> String {
        format!("raw/{}/{}.zip", owner_id, backup_id)
    }

    pub fn derived_key(owner_id: &str, backup_id: &str) -> String {
        format!("derived/{}/{}.json", owner_id, backup_id)
    }

    pub fn recovery_key(owner_id: &str, backup_id: &str) -> String {
        format!("recovery/{}/{}.zip", owner_id, backup_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Retention {
    pub raw_expires_at: DateTime<Utc>,
    pub derived_expires_at: DateTime<Utc>,
}

/// Which entities were present in a processed archive.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contains {
    pub profile: bool,
    pub connections: bool,
    pub positions: bool,
    pub education: bool,
    pub skills: bool,
    pub recommendations: bool,
    pub messages: bool,
    pub posts: bool,
    pub comments: bool,
    pub reactions: bool,
    pub company_follows: bool,
}

impl Contains {
    pub fn from_kinds<I: IntoIterator<Item = EntityKind>>(kinds: I) -> Self {
        let mut contains = Contains::default();
        for kind in kinds {
            *contains.flag_mut(kind) = true;
        }
        contains
    }

    pub fn get(&self, kind: EntityKind) -> bool {
        match kind {
            EntityKind::Profile => self.profile,
            EntityKind::Connections => self.connections,
            EntityKind::Positions => self.positions,
            EntityKind::Education => self.education,
            EntityKind::Skills => self.skills,
            EntityKind::Recommendations => self.recommendations,
            EntityKind::Messages => self.messages,
            EntityKind::Posts => self.posts,
            EntityKind::Comments => self.comments,
            EntityKind::Reactions => self.reactions,
            EntityKind::CompanyFollows => self.company_follows,
        }
    }

    fn flag_mut(&mut self, kind: EntityKind) -> &mut bool {
        match kind {
            EntityKind::Profile => &mut self.profile,
            EntityKind::Connections => &mut self.connections,
            EntityKind::Positions => &mut self.positions,
            EntityKind::Education => &mut self.education,
            EntityKind::Skills => &mut self.skills,
            EntityKind::Recommendations => &mut self.recommendations,
            EntityKind::Messages => &mut self.messages,
            EntityKind::Posts => &mut self.posts,
            EntityKind::Comments => &mut self.comments,
            EntityKind::Reactions => &mut self.reactions,
            EntityKind::CompanyFollows => &mut self.company_follows,
        }
    }
}

/// Persisted record of one submitted archive.
///
/// Only the lifecycle manager mutates it; the pipeline stages never see it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupRecord {
    pub id: String,
    pub owner_id: String,
    pub status: BackupStatus,
    pub tier: Tier,
    /// Hex SHA-256 of the raw archive, recorded at submission.
    pub sha256: String,
    pub storage_paths: StoragePaths,
    pub retention: Retention,
    pub contains: Contains,
    pub format_version: Option<FormatVersion>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub processing_started_at: Option<DateTime<Utc>>,
    pub processed_at: Option<DateTime<Utc>>,
}

/// Derived-only projection of one completed run, keyed by backup id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub backup_id: String,
    pub owner_id: String,
    pub stats: AggregatedStats,
    pub report: InsightReport,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contains_from_kinds() {
        let contains = Contains::from_kinds([EntityKind::Connections, EntityKind::Skills]);
        assert!(contains.connections);
        assert!(contains.skills);
        assert!(!contains.positions);
        for kind in EntityKind::ALL {
            let expected = matches!(kind, EntityKind::Connections | EntityKind::Skills);
            assert_eq!(contains.get(kind), expected, "flag mismatch for {}", kind);
        }
    }

    #[test]
    fn test_status_roundtrip_through_str() {
        for status in [
            BackupStatus::Pending,
            BackupStatus::Processing,
            BackupStatus::Ready,
            BackupStatus::Error,
        ] {
            assert_eq!(status.as_str().parse::<BackupStatus>().unwrap(), status);
        }
        assert!("finished".parse::<BackupStatus>().is_err());
    }

    #[test]
    fn test_tier_accepts_legacy_names() {
        assert_eq!("basic".parse::<Tier>().unwrap(), Tier::Deterministic);
        assert_eq!("premium".parse::<Tier>().unwrap(), Tier::Enriched);
        assert!("gold".parse::<Tier>().is_err());
    }

    #[test]
    fn test_record_serializes_with_entity_tag() {
        let record = CanonicalRecord::Skill(Skill {
            name: "Rust".to_string(),
        });
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["entity"], "skill");
        assert_eq!(json["name"], "Rust");
        assert_eq!(record.kind(), EntityKind::Skills);
    }
}
