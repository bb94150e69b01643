//! Insight report generation.
//!
//! Two paths produce the same [`InsightReport`] shape:
//!
//! - **Deterministic** — [`generate_deterministic`], a pure function of
//!   [`AggregatedStats`] and [`InsightParams`].
//! - **Enriched** — an external text-generation service fills the report
//!   from the prompt built by [`build_prompt`]; its raw reply is accepted
//!   through [`parse_enriched`]. Whenever the service fails or the reply
//!   does not parse, the caller falls back to the deterministic path.
//!
//! The service call itself lives in the application crate; this module
//! only owns the prompt and the forgiving reply parser.

use serde::{Deserialize, Serialize};

use crate::aggregate::AggregatedStats;
use crate::models::{EntityKind, Tier};

/// Score thresholds and template parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InsightParams {
    pub base_score: u8,
    pub increment: u8,
    pub connections_moderate: u64,
    pub connections_strong: u64,
    pub posts_active: u64,
    pub engagement_active: u64,
    pub skills_strong: u64,
    /// Below this many posts, recommend posting more.
    pub posting_floor: u64,
    /// Below this many connections, recommend growing the network.
    pub connection_floor: u64,
    /// Below this completeness score, recommend completing the profile.
    pub completeness_floor: u8,
}

impl Default for InsightParams {
    fn default() -> Self {
        Self {
            base_score: 50,
            increment: 10,
            connections_moderate: 100,
            connections_strong: 500,
            posts_active: 10,
            engagement_active: 50,
            skills_strong: 10,
            posting_floor: 4,
            connection_floor: 500,
            completeness_floor: 80,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    #[serde(alias = "High", alias = "HIGH")]
    High,
    #[serde(alias = "Medium", alias = "MEDIUM")]
    Medium,
    #[serde(alias = "Low", alias = "LOW")]
    Low,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionItem {
    pub title: String,
    pub priority: Priority,
    pub timeline: String,
    pub impact: String,
}

/// Which path produced a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportSource {
    Deterministic,
    Enriched,
    /// Enriched tier, served by the deterministic generator.
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsightReport {
    pub tier: Tier,
    pub source: ReportSource,
    pub score: u8,
    pub assessment: String,
    pub recommendations: Vec<String>,
    pub action_items: Vec<ActionItem>,
}

/// Network-health score: base plus one increment per crossed threshold.
pub fn health_score(stats: &AggregatedStats, params: &InsightParams) -> u8 {
    let connections = stats.count(EntityKind::Connections);
    let crossed = [
        connections >= params.connections_moderate,
        connections >= params.connections_strong,
        stats.activity.posts >= params.posts_active,
        stats.activity.engagement >= params.engagement_active,
        stats.count(EntityKind::Skills) >= params.skills_strong,
    ];
    let bonus = crossed.iter().filter(|c| **c).count() as u32 * params.increment as u32;
    (params.base_score as u32 + bonus).min(100) as u8
}

fn assessment(connections: u64) -> String {
    match connections {
        0 => "No connections were found in this export. Start by connecting with current and former colleagues.".to_string(),
        1..=99 => format!(
            "Your network is in its early stages with {} connections. Focused outreach will compound quickly from here.",
            connections
        ),
        100..=499 => format!(
            "You have a growing network of {} connections with room to deepen reach in your field.",
            connections
        ),
        500..=999 => format!(
            "You have a well-established network of {} connections. The next gains come from engagement rather than volume.",
            connections
        ),
        _ => format!(
            "You have an extensive network of {} connections. Focus on nurturing the relationships that matter most.",
            connections
        ),
    }
}

fn weakest_dimension(stats: &AggregatedStats) -> &'static str {
    let dimensions = stats.completeness.breakdown.dimensions();
    let mut weakest = dimensions[0];
    for dimension in dimensions.iter().skip(1) {
        if dimension.1 < weakest.1 {
            weakest = *dimension;
        }
    }
    weakest.0
}

/// Produce the deterministic report for `stats`.
pub fn generate_deterministic(
    stats: &AggregatedStats,
    tier: Tier,
    params: &InsightParams,
) -> InsightReport {
    let connections = stats.count(EntityKind::Connections);
    let posts = stats.activity.posts;
    let completeness = stats.completeness.score;
    let top_company = stats.top_companies.first().map(|e| e.value.as_str());
    let top_industry = stats.top_industries.first().map(|e| e.value.as_str());
    let top_location = stats.top_locations.first().map(|e| e.value.as_str());

    let mut recommendations = Vec::new();
    if connections < params.connection_floor {
        recommendations.push(format!(
            "Grow your network toward {}+ connections by reconnecting with colleagues from {}.",
            params.connection_floor,
            top_company.unwrap_or("your past roles")
        ));
    }
    if posts < params.posting_floor {
        recommendations.push(format!(
            "Share at least one post per week; this export contains {} posts.",
            posts
        ));
    }
    if let Some(industry) = top_industry {
        recommendations.push(format!(
            "Engage with thought leaders in {} to strengthen your industry presence.",
            industry
        ));
    }
    if let Some(location) = top_location {
        recommendations.push(format!(
            "Attend local events in {} to turn online connections into relationships.",
            location
        ));
    }
    if completeness < params.completeness_floor {
        recommendations.push(format!(
            "Complete your profile: it is {}% complete, with {} the weakest section.",
            completeness,
            weakest_dimension(stats)
        ));
    }
    if recommendations.is_empty() {
        recommendations
            .push("Keep up your current cadence; your network fundamentals are strong.".to_string());
    }

    let mut action_items = Vec::new();
    if completeness < 100 {
        action_items.push(ActionItem {
            title: format!("Fill in the {} section of your profile", weakest_dimension(stats)),
            priority: Priority::High,
            timeline: "This week".to_string(),
            impact: "Higher visibility in search results".to_string(),
        });
    }
    if posts < params.posting_floor {
        action_items.push(ActionItem {
            title: "Publish one post per week".to_string(),
            priority: Priority::Medium,
            timeline: "Next 30 days".to_string(),
            impact: "More profile views and inbound engagement".to_string(),
        });
    }
    if connections < params.connection_floor {
        action_items.push(ActionItem {
            title: "Send ten personalised connection requests per week".to_string(),
            priority: Priority::Medium,
            timeline: "Next 90 days".to_string(),
            impact: "Broader reach for everything you share".to_string(),
        });
    }
    action_items.push(ActionItem {
        title: "Export and review your network insights again next quarter".to_string(),
        priority: Priority::Low,
        timeline: "Next 90 days".to_string(),
        impact: "Track growth against this baseline".to_string(),
    });

    InsightReport {
        tier,
        source: match tier {
            Tier::Deterministic => ReportSource::Deterministic,
            Tier::Enriched => ReportSource::Fallback,
        },
        score: health_score(stats, params),
        assessment: assessment(connections),
        recommendations,
        action_items,
    }
}

/// Build the text prompt sent to the enrichment service.
///
/// Only aggregated figures are included; no names, messages, or URLs.
pub fn build_prompt(stats: &AggregatedStats) -> String {
    let list = |entries: &[crate::aggregate::FrequencyEntry]| {
        entries
            .iter()
            .take(5)
            .map(|e| format!("{} ({})", e.value, e.count))
            .collect::<Vec<_>>()
            .join(", ")
    };
    let counts = EntityKind::ALL
        .iter()
        .map(|k| format!("{}: {}", k, stats.count(*k)))
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "You are a career advisor analysing a professional network export.\n\
         Entity counts: {counts}\n\
         Top companies: {companies}\n\
         Top positions: {positions}\n\
         Top industries: {industries}\n\
         Top locations: {locations}\n\
         Engagement (comments + reactions): {engagement}\n\
         Profile completeness: {completeness}%\n\n\
         Respond with only a JSON object of this exact shape:\n\
         {{\"score\": <integer 0-100>, \"assessment\": <string>, \
         \"recommendations\": [<string>, ...], \
         \"action_items\": [{{\"title\": <string>, \"priority\": \"high\"|\"medium\"|\"low\", \
         \"timeline\": <string>, \"impact\": <string>}}, ...]}}",
        counts = counts,
        companies = list(&stats.top_companies),
        positions = list(&stats.top_positions),
        industries = list(&stats.top_industries),
        locations = list(&stats.top_locations),
        engagement = stats.activity.engagement,
        completeness = stats.completeness.score,
    )
}

#[derive(Deserialize)]
struct EnrichedPayload {
    score: f64,
    assessment: String,
    recommendations: Vec<String>,
    action_items: Vec<ActionItem>,
}

/// Remove a surrounding Markdown code fence (```` ```json ... ``` ````).
pub fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string ("json") on the opening fence line.
    let body = match rest.find('\n') {
        Some(i) => &rest[i + 1..],
        None => rest,
    };
    body.trim_end()
        .strip_suffix("```")
        .unwrap_or(body)
        .trim()
}

fn parse_payload(text: &str) -> Option<EnrichedPayload> {
    serde_json::from_str(text).ok()
}

/// Parse an enrichment reply into a report, or `None` if it cannot be trusted.
///
/// Tries the reply as-is, then with a code fence stripped, then the span
/// between the first `{` and the last `}`. A payload with an empty
/// assessment, recommendation list, or action list is rejected.
pub fn parse_enriched(reply: &str, tier: Tier) -> Option<InsightReport> {
    let stripped = strip_code_fence(reply);
    let payload = parse_payload(reply.trim())
        .or_else(|| parse_payload(stripped))
        .or_else(|| {
            let start = stripped.find('{')?;
            let end = stripped.rfind('}')?;
            if end <= start {
                return None;
            }
            parse_payload(&stripped[start..=end])
        })?;

    if payload.assessment.trim().is_empty()
        || payload.recommendations.is_empty()
        || payload.action_items.is_empty()
        || !payload.score.is_finite()
    {
        return None;
    }

    Some(InsightReport {
        tier,
        source: ReportSource::Enriched,
        score: payload.score.clamp(0.0, 100.0).round() as u8,
        assessment: payload.assessment.trim().to_string(),
        recommendations: payload.recommendations,
        action_items: payload.action_items,
    })
}
