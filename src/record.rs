//! The normalized unit of harvested data.

use chrono::{DateTime, SubsecRound, Utc};

/// Source label used when a monitor or a backlog block doesn't name one.
pub const DEFAULT_SOURCE: &str = "Federal Register";

/// A harvested document. Identity is the `url` alone; titles can be edited upstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub title: String,
    pub source: String,
    pub url: String,
    pub published_at: DateTime<Utc>,
    pub summary: String,
    /// Provenance tag (e.g. the index range that produced it). Display only.
    pub batch_marker: Option<String>,
}

impl Record {
    /// Builds a record, normalizing every field the way the backlog stores it.
    /// Returns `None` if `title` or `url` is blank.
    pub fn new(
        title: &str,
        url: &str,
        published_at: Option<DateTime<Utc>>,
        source: Option<&str>,
        summary: Option<&str>,
    ) -> Option<Self> {
        let title = collapse_whitespace(title);
        let url = url.trim();
        if title.is_empty() || url.is_empty() {
            return None;
        }

        let source = source
            .map(collapse_whitespace)
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_SOURCE.to_string());
        let summary = sanitize_summary(summary, &source);

        Some(Self {
            title,
            source,
            url: url.to_string(),
            published_at: canonical_timestamp(published_at.unwrap_or_else(Utc::now)),
            summary,
            batch_marker: None,
        })
    }

    pub fn with_batch_marker(mut self, marker: impl Into<String>) -> Self {
        self.batch_marker = Some(marker.into());
        self
    }
}

/// Collapses every whitespace run to a single space and trims the ends.
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Stands in for summaries that are empty after whitespace collapsing.
pub fn empty_summary(source: &str) -> String {
    format!("{source} notice with no supplied summary.")
}

/// Single-paragraph summary, or the placeholder sentence if nothing is left.
/// A summary made only of dashes would read back as a block divider, so it
/// counts as empty.
pub fn sanitize_summary(text: Option<&str>, source: &str) -> String {
    let collapsed = text.map(collapse_whitespace).unwrap_or_default();
    if collapsed.chars().all(|c| c == '-') {
        empty_summary(source)
    } else {
        collapsed
    }
}

/// Backlog timestamps have whole-second precision.
pub fn canonical_timestamp(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.trunc_subsecs(0)
}
