//! Schema normalization.
//!
//! Maps each entity's version-drifting column names into a
//! [`CanonicalRecord`]. Every canonical field has an ordered list of
//! accepted header spellings; the first one present in the row wins.
//! Header matching is exact and case-sensitive, so each known spelling is
//! listed explicitly.
//!
//! Missing fields become empty strings (or `None` for optional fields) and
//! never cause a row to be dropped. Dates are parsed permissively; a value
//! that does not parse becomes "no date".

use chrono::{DateTime, NaiveDate};

use crate::models::{
    CanonicalRecord, Comment, CompanyFollow, Connection, Education, EntityKind, Message, Position,
    Post, Profile, Reaction, Recommendation, Skill,
};
use crate::tabular::Row;

const FIRST_NAME: &[&str] = &["First Name", "FirstName", "first_name", "First name"];
const LAST_NAME: &[&str] = &["Last Name", "LastName", "last_name", "Last name"];
const COMPANY: &[&str] = &["Company", "company", "Company Name", "Organization"];
const LOCATION: &[&str] = &["Location", "location", "Geo Location", "Geographic Area"];
const INDUSTRY: &[&str] = &["Industry", "industry"];
const DATE: &[&str] = &["Date", "date", "Created Date"];
const LINK: &[&str] = &["Link", "link", "ShareLink", "Url", "URL"];

/// Header that marks the real header line of a connections file, which
/// some export versions precede with a "Notes:" preamble.
pub const CONNECTIONS_ANCHOR: &str = "First Name";

/// Normalize the parsed rows of one entity file.
pub fn normalize(kind: EntityKind, rows: &[Row]) -> Vec<CanonicalRecord> {
    rows.iter().map(|row| normalize_row(kind, row)).collect()
}

fn normalize_row(kind: EntityKind, row: &Row) -> CanonicalRecord {
    match kind {
        EntityKind::Profile => CanonicalRecord::Profile(Profile {
            first_name: text(row, FIRST_NAME),
            last_name: text(row, LAST_NAME),
            headline: text(row, &["Headline", "headline"]),
            summary: text(row, &["Summary", "summary", "About"]),
            industry: text(row, INDUSTRY),
            location: text(row, LOCATION),
        }),
        EntityKind::Connections => CanonicalRecord::Connection(Connection {
            first_name: text(row, FIRST_NAME),
            last_name: text(row, LAST_NAME),
            url: text(row, &["URL", "Url", "url", "Profile URL"]),
            email: optional_text(row, &["Email Address", "Email", "email", "E-mail Address"]),
            company: text(row, COMPANY),
            position: text(row, &["Position", "position", "Title", "Job Title"]),
            location: optional_text(row, LOCATION),
            industry: optional_text(row, INDUSTRY),
            connected_on: date(row, &["Connected On", "Connected on", "connected_on", "Date"]),
        }),
        EntityKind::Positions => CanonicalRecord::Position(Position {
            company: text(row, &["Company Name", "Company", "company", "Organization"]),
            title: text(row, &["Title", "title", "Position"]),
            description: text(row, &["Description", "description"]),
            location: text(row, LOCATION),
            started_on: date(row, &["Started On", "Start Date", "started_on"]),
            finished_on: date(row, &["Finished On", "End Date", "finished_on"]),
        }),
        EntityKind::Education => CanonicalRecord::Education(Education {
            school: text(row, &["School Name", "School", "school"]),
            degree: text(row, &["Degree Name", "Degree", "degree"]),
            notes: text(row, &["Notes", "Activities", "notes"]),
            started_on: date(row, &["Start Date", "Started On", "start_date"]),
            finished_on: date(row, &["End Date", "Finished On", "end_date"]),
        }),
        EntityKind::Skills => CanonicalRecord::Skill(Skill {
            name: text(row, &["Name", "Skill", "name", "skill"]),
        }),
        EntityKind::Recommendations => CanonicalRecord::Recommendation(Recommendation {
            first_name: text(row, FIRST_NAME),
            last_name: text(row, LAST_NAME),
            company: text(row, COMPANY),
            job_title: text(row, &["Job Title", "Title", "job_title"]),
            text: text(row, &["Text", "text", "Recommendation"]),
            status: text(row, &["Status", "status"]),
            created_on: date(row, &["Creation Date", "Created On", "Date"]),
        }),
        EntityKind::Messages => CanonicalRecord::Message(Message {
            conversation_id: text(row, &["CONVERSATION ID", "Conversation ID", "conversation_id"]),
            from: text(row, &["FROM", "From", "from"]),
            to: text(row, &["TO", "To", "to"]),
            subject: text(row, &["SUBJECT", "Subject", "subject"]),
            content: text(row, &["CONTENT", "Content", "content"]),
            folder: text(row, &["FOLDER", "Folder", "folder"]),
            sent_on: date(row, &["DATE", "Date", "date"]),
        }),
        EntityKind::Posts => CanonicalRecord::Post(Post {
            link: text(row, &["ShareLink", "Link", "link", "URL"]),
            commentary: text(row, &["ShareCommentary", "Commentary", "commentary", "Text"]),
            shared_url: text(row, &["SharedUrl", "Shared URL", "shared_url"]),
            visibility: text(row, &["Visibility", "visibility"]),
            posted_on: date(row, DATE),
        }),
        EntityKind::Comments => CanonicalRecord::Comment(Comment {
            link: text(row, LINK),
            message: text(row, &["Message", "message", "Comment"]),
            commented_on: date(row, DATE),
        }),
        EntityKind::Reactions => CanonicalRecord::Reaction(Reaction {
            kind: text(row, &["Type", "type", "Reaction"]),
            link: text(row, LINK),
            reacted_on: date(row, DATE),
        }),
        EntityKind::CompanyFollows => CanonicalRecord::CompanyFollow(CompanyFollow {
            organization: text(row, &["Organization", "Company", "organization", "Company Name"]),
            followed_on: date(row, &["Followed On", "Followed on", "Date"]),
        }),
    }
}

/// First alias present in the row, cleaned; empty when none is present.
fn text(row: &Row, aliases: &[&str]) -> String {
    aliases
        .iter()
        .find_map(|alias| row.get(*alias))
        .map(|value| clean_text(value))
        .unwrap_or_default()
}

fn optional_text(row: &Row, aliases: &[&str]) -> Option<String> {
    let value = text(row, aliases);
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

fn date(row: &Row, aliases: &[&str]) -> Option<NaiveDate> {
    parse_date(&text(row, aliases))
}

/// Collapse runs of whitespace (including line breaks) to single spaces and trim.
pub fn clean_text(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

const DATE_FORMATS: &[&str] = &[
    "%d %b %Y",
    "%d %B %Y",
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%m/%d/%Y",
    "%m/%d/%y",
    "%b %d, %Y",
    "%B %d, %Y",
    "%d-%b-%Y",
];

/// Parse a date in any of the formats seen across export versions.
///
/// Accepts day-precision dates, timestamps (the date part is kept),
/// month-precision values like `Jan 2020`, and bare years. Anything else
/// yields `None`.
pub fn parse_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(value, format) {
            return Some(date);
        }
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.date_naive());
    }

    // Timestamps such as "2023-04-01 10:22:05 UTC": keep the date part.
    if let Some(prefix) = value.get(..10) {
        if value.len() > 10 {
            if let Ok(date) = NaiveDate::parse_from_str(prefix, "%Y-%m-%d") {
                return Some(date);
            }
        }
    }

    for format in ["%d %b %Y", "%d %B %Y"] {
        if let Ok(date) = NaiveDate::parse_from_str(&format!("1 {}", value), format) {
            return Some(date);
        }
    }

    if value.len() == 4 && value.chars().all(|c| c.is_ascii_digit()) {
        let year: i32 = value.parse().ok()?;
        return NaiveDate::from_ymd_opt(year, 1, 1);
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(pairs: &[(&str, &str)]) -> Row {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_connection_aliases_and_cleaning() {
        let rows = vec![row(&[
            ("First Name", "  Ada "),
            ("Last Name", "Lovelace"),
            ("company", "Acme\n  Corp"),
            ("Position", "Engineer"),
            ("Connected On", "15 Jan 2023"),
        ])];
        let records = normalize(EntityKind::Connections, &rows);
        let CanonicalRecord::Connection(c) = &records[0] else {
            panic!("expected a connection record");
        };
        assert_eq!(c.first_name, "Ada");
        assert_eq!(c.company, "Acme Corp");
        assert_eq!(c.email, None);
        assert_eq!(c.location, None);
        assert_eq!(c.connected_on, NaiveDate::from_ymd_opt(2023, 1, 15));
    }

    #[test]
    fn test_first_alias_wins() {
        let rows = vec![row(&[("Company Name", "Primary"), ("Company", "Secondary")])];
        let CanonicalRecord::Position(p) = &normalize(EntityKind::Positions, &rows)[0] else {
            panic!("expected a position record");
        };
        assert_eq!(p.company, "Primary");
    }

    #[test]
    fn test_missing_fields_default_without_dropping_row() {
        let rows = vec![row(&[("Unrelated", "x")]), row(&[])];
        let records = normalize(EntityKind::Education, &rows);
        assert_eq!(records.len(), 2);
        let CanonicalRecord::Education(e) = &records[0] else {
            panic!("expected an education record");
        };
        assert_eq!(e.school, "");
        assert_eq!(e.started_on, None);
    }

    #[test]
    fn test_alias_match_is_case_sensitive() {
        let rows = vec![row(&[("COMPANY", "Shouty")])];
        let CanonicalRecord::Connection(c) = &normalize(EntityKind::Connections, &rows)[0] else {
            panic!("expected a connection record");
        };
        assert_eq!(c.company, "");
    }

    #[test]
    fn test_unparseable_date_is_none() {
        let rows = vec![row(&[("Connected On", "sometime last year")])];
        let CanonicalRecord::Connection(c) = &normalize(EntityKind::Connections, &rows)[0] else {
            panic!("expected a connection record");
        };
        assert_eq!(c.connected_on, None);
    }

    #[test]
    fn test_parse_date_formats() {
        let d = |y, m, day| NaiveDate::from_ymd_opt(y, m, day);
        assert_eq!(parse_date("15 Jan 2023"), d(2023, 1, 15));
        assert_eq!(parse_date("2023-01-15"), d(2023, 1, 15));
        assert_eq!(parse_date("01/15/2023"), d(2023, 1, 15));
        assert_eq!(parse_date("2023-04-01 10:22:05 UTC"), d(2023, 4, 1));
        assert_eq!(parse_date("2023-04-01T10:22:05Z"), d(2023, 4, 1));
        assert_eq!(parse_date("Jan 2020"), d(2020, 1, 1));
        assert_eq!(parse_date("2015"), d(2015, 1, 1));
        assert_eq!(parse_date(""), None);
        assert_eq!(parse_date("not a date"), None);
        assert_eq!(parse_date("31 Feb 2023"), None);
    }

    #[test]
    fn test_clean_text() {
        assert_eq!(clean_text("  a\n\tb   c "), "a b c");
        assert_eq!(clean_text(""), "");
    }
}
