//! Aggregation of canonical records into statistics.
//!
//! A single pass over the records increments counters, frequency maps, and
//! month histograms. Frequency maps are then truncated to their top-N
//! entries using a stable sort, so ties keep first-seen order and two runs
//! over the same records always produce identical output.
//!
//! # Completeness
//!
//! Six dimensions, each scored `0..=100`:
//!
//! | Dimension | Score |
//! |-----------|-------|
//! | headline | 100 if present, else 0 |
//! | summary | 100 if present, else 0 |
//! | experience | `min(100, positions / target × 100)` |
//! | education | `min(100, education / target × 100)` |
//! | skills | `min(100, skills / target × 100)` |
//! | recommendations | `min(100, recommendations / target × 100)` |
//!
//! The overall score is the unweighted mean, rounded to the nearest integer.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

use crate::models::{CanonicalRecord, EntityKind};

/// Hard ceiling for every frequency map.
pub const MAX_TOP_N: usize = 20;

/// Completeness targets per counted dimension.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompletenessTargets {
    pub experience: u32,
    pub education: u32,
    pub skills: u32,
    pub recommendations: u32,
}

impl Default for CompletenessTargets {
    fn default() -> Self {
        Self {
            experience: 3,
            education: 2,
            skills: 10,
            recommendations: 3,
        }
    }
}

/// Aggregation tuning, decoupled from application config.
#[derive(Debug, Clone)]
pub struct AggregationParams {
    /// Entries kept per frequency map; clamped to [`MAX_TOP_N`].
    pub top_n: usize,
    /// Value excluded from frequency maps (compared case-insensitively).
    pub unknown_sentinel: String,
    pub targets: CompletenessTargets,
}

impl Default for AggregationParams {
    fn default() -> Self {
        Self {
            top_n: MAX_TOP_N,
            unknown_sentinel: "Unknown".to_string(),
            targets: CompletenessTargets::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrequencyEntry {
    pub value: String,
    pub count: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityStats {
    pub messages: u64,
    pub conversations: u64,
    pub posts: u64,
    pub comments: u64,
    pub reactions: u64,
    /// Comments plus reactions.
    pub engagement: u64,
    pub company_follows: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletenessBreakdown {
    pub headline: u8,
    pub summary: u8,
    pub experience: u8,
    pub education: u8,
    pub skills: u8,
    pub recommendations: u8,
}

impl CompletenessBreakdown {
    /// Dimensions in reporting order, as `(name, score)`.
    pub fn dimensions(&self) -> [(&'static str, u8); 6] {
        [
            ("headline", self.headline),
            ("summary", self.summary),
            ("experience", self.experience),
            ("education", self.education),
            ("skills", self.skills),
            ("recommendations", self.recommendations),
        ]
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Completeness {
    pub score: u8,
    pub breakdown: CompletenessBreakdown,
}

/// Everything the insight generator needs, and nothing more.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregatedStats {
    /// Record count per entity; every entity is present, absent ones as 0.
    pub counts: BTreeMap<EntityKind, u64>,
    pub top_companies: Vec<FrequencyEntry>,
    pub top_locations: Vec<FrequencyEntry>,
    pub top_industries: Vec<FrequencyEntry>,
    pub top_positions: Vec<FrequencyEntry>,
    /// Connections per `YYYY-MM`.
    pub connection_history: BTreeMap<String, u64>,
    /// Connections whose date did not parse; still counted in `counts`.
    pub undated_connections: u64,
    /// Posts per `YYYY-MM`.
    pub post_history: BTreeMap<String, u64>,
    pub activity: ActivityStats,
    pub completeness: Completeness,
}

impl AggregatedStats {
    pub fn count(&self, kind: EntityKind) -> u64 {
        self.counts.get(&kind).copied().unwrap_or(0)
    }
}

/// Insertion-ordered frequency counter.
#[derive(Debug, Default)]
struct FrequencyCounter {
    index: HashMap<String, usize>,
    entries: Vec<FrequencyEntry>,
}

impl FrequencyCounter {
    fn record(&mut self, value: &str, sentinel: &str) {
        let value = value.trim();
        if value.is_empty() || value.eq_ignore_ascii_case(sentinel) {
            return;
        }
        match self.index.get(value) {
            Some(&i) => self.entries[i].count += 1,
            None => {
                self.index.insert(value.to_string(), self.entries.len());
                self.entries.push(FrequencyEntry {
                    value: value.to_string(),
                    count: 1,
                });
            }
        }
    }

    fn top(self, n: usize) -> Vec<FrequencyEntry> {
        let mut entries = self.entries;
        // Stable: equal counts keep first-seen order.
        entries.sort_by(|a, b| b.count.cmp(&a.count));
        entries.truncate(n);
        entries
    }
}

fn month_key(date: NaiveDate) -> String {
    date.format("%Y-%m").to_string()
}

/// Aggregate a run's records into [`AggregatedStats`].
pub fn aggregate(records: &[CanonicalRecord], params: &AggregationParams) -> AggregatedStats {
    let sentinel = params.unknown_sentinel.as_str();
    let top_n = params.top_n.clamp(1, MAX_TOP_N);

    let mut counts: BTreeMap<EntityKind, u64> =
        EntityKind::ALL.iter().map(|k| (*k, 0)).collect();
    let mut companies = FrequencyCounter::default();
    let mut locations = FrequencyCounter::default();
    let mut industries = FrequencyCounter::default();
    let mut positions = FrequencyCounter::default();
    let mut connection_history = BTreeMap::new();
    let mut post_history = BTreeMap::new();
    let mut undated_connections = 0;
    let mut conversations = HashSet::new();
    let mut has_headline = false;
    let mut has_summary = false;

    for record in records {
        *counts.entry(record.kind()).or_insert(0) += 1;
        match record {
            CanonicalRecord::Profile(p) => {
                has_headline |= !p.headline.is_empty();
                has_summary |= !p.summary.is_empty();
                industries.record(&p.industry, sentinel);
                locations.record(&p.location, sentinel);
            }
            CanonicalRecord::Connection(c) => {
                companies.record(&c.company, sentinel);
                positions.record(&c.position, sentinel);
                if let Some(location) = &c.location {
                    locations.record(location, sentinel);
                }
                if let Some(industry) = &c.industry {
                    industries.record(industry, sentinel);
                }
                match c.connected_on {
                    Some(date) => *connection_history.entry(month_key(date)).or_insert(0) += 1,
                    None => undated_connections += 1,
                }
            }
            CanonicalRecord::Message(m) => {
                if !m.conversation_id.is_empty() {
                    conversations.insert(m.conversation_id.as_str());
                }
            }
            CanonicalRecord::Post(p) => {
                if let Some(date) = p.posted_on {
                    *post_history.entry(month_key(date)).or_insert(0) += 1;
                }
            }
            CanonicalRecord::Position(_)
            | CanonicalRecord::Education(_)
            | CanonicalRecord::Skill(_)
            | CanonicalRecord::Recommendation(_)
            | CanonicalRecord::Comment(_)
            | CanonicalRecord::Reaction(_)
            | CanonicalRecord::CompanyFollow(_) => {}
        }
    }

    let count = |kind: EntityKind| counts.get(&kind).copied().unwrap_or(0);
    let activity = ActivityStats {
        messages: count(EntityKind::Messages),
        conversations: conversations.len() as u64,
        posts: count(EntityKind::Posts),
        comments: count(EntityKind::Comments),
        reactions: count(EntityKind::Reactions),
        engagement: count(EntityKind::Comments) + count(EntityKind::Reactions),
        company_follows: count(EntityKind::CompanyFollows),
    };

    let targets = &params.targets;
    let completeness = completeness(
        has_headline,
        has_summary,
        [
            (count(EntityKind::Positions), targets.experience),
            (count(EntityKind::Education), targets.education),
            (count(EntityKind::Skills), targets.skills),
            (count(EntityKind::Recommendations), targets.recommendations),
        ],
    );

    AggregatedStats {
        counts,
        top_companies: companies.top(top_n),
        top_locations: locations.top(top_n),
        top_industries: industries.top(top_n),
        top_positions: positions.top(top_n),
        connection_history,
        undated_connections,
        post_history,
        activity,
        completeness,
    }
}

fn presence_score(present: bool) -> f64 {
    if present {
        100.0
    } else {
        0.0
    }
}

fn ratio_score(actual: u64, target: u32) -> f64 {
    if target == 0 {
        return 100.0;
    }
    (actual as f64 / target as f64 * 100.0).min(100.0)
}

fn completeness(has_headline: bool, has_summary: bool, counted: [(u64, u32); 4]) -> Completeness {
    let [experience, education, skills, recommendations] =
        counted.map(|(actual, target)| ratio_score(actual, target));
    let scores = [
        presence_score(has_headline),
        presence_score(has_summary),
        experience,
        education,
        skills,
        recommendations,
    ];
    let mean = scores.iter().sum::<f64>() / scores.len() as f64;

    Completeness {
        score: mean.round() as u8,
        breakdown: CompletenessBreakdown {
            headline: scores[0].round() as u8,
            summary: scores[1].round() as u8,
            experience: experience.round() as u8,
            education: education.round() as u8,
            skills: skills.round() as u8,
            recommendations: recommendations.round() as u8,
        },
    }
}
