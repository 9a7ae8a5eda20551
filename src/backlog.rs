//! The on-disk backlog: a human readable text file of harvested records,
//! newest first.
//!
//! ```text
//! ================================================================================
//! Federal Register Historical Backlog (2 items)
//! ================================================================================
//!
//! [FEDERAL REGISTER INDEX] 2024-01-03 00:00:00Z | Title
//! Source: Federal Register
//! Batch File: indices 0-9
//! URL: https://www.federalregister.gov/documents/...
//! Summary text.
//! --------------------------------------------------------------------------------
//! [FEDERAL REGISTER INDEX] 2024-01-02 00:00:00Z | Another title
//! ...
//! ```
//!
//! Parsing is a block scanner: strip the header, split on the divider, then
//! classify each block's lines by prefix. Malformed blocks are skipped.
//! The file is always rewritten whole, never appended to.

use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime, Utc};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::record::{Record, DEFAULT_SOURCE};
use crate::{Error, Result};

pub const DIVIDER: &str =
    "--------------------------------------------------------------------------------";
pub const HEADER_RULE: &str =
    "================================================================================";
pub const DEFAULT_TAG: &str = "[FEDERAL REGISTER INDEX]";
pub const DEFAULT_LABEL: &str = "Federal Register";
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%SZ";

const SOURCE_PREFIX: &str = "Source:";
const BATCH_PREFIX: &str = "Batch File:";
const URL_PREFIX: &str = "URL:";

/// One block of the backlog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BacklogEntry {
    pub tag: String,
    pub record: Record,
}

impl BacklogEntry {
    pub fn new(tag: impl Into<String>, record: Record) -> Self {
        Self {
            tag: tag.into(),
            record,
        }
    }

    pub fn url(&self) -> &str {
        &self.record.url
    }

    pub fn published_at(&self) -> DateTime<Utc> {
        self.record.published_at
    }
}

/// Why a block didn't make it into the backlog.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BlockSkip {
    #[error("no 'TAG TIMESTAMP | TITLE' line: '{0}'")]
    MissingTagLine(String),
    #[error("malformed timestamp '{0}'")]
    BadTimestamp(String),
    #[error("no URL line for '{0}'")]
    MissingUrl(String),
}

/// A parsed backlog file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Backlog {
    pub entries: Vec<BacklogEntry>,
    /// Tag of the last parsed entry, reused for newly harvested ones.
    pub tag: Option<String>,
}

impl Backlog {
    pub fn parse(text: &str) -> Self {
        let lines: Vec<&str> = text.lines().collect();
        let body = &lines[header_end(&lines)..];

        let mut backlog = Backlog::default();
        for block in body.split(|line| line.trim() == DIVIDER) {
            let block: Vec<&str> = block
                .iter()
                .map(|line| line.trim())
                .filter(|line| !line.is_empty())
                .collect();
            if block.is_empty() {
                continue;
            }

            match parse_block(&block) {
                Ok(entry) => {
                    backlog.tag = Some(entry.tag.clone());
                    backlog.entries.push(entry);
                }
                Err(skip) => debug!(reason = %skip, "skipping backlog block"),
            }
        }
        backlog
    }

    pub fn urls(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(BacklogEntry::url)
    }

    pub fn seen_urls(&self) -> HashSet<String> {
        self.urls().map(str::to_string).collect()
    }

    pub fn tag_or<'a>(&'a self, default: &'a str) -> &'a str {
        self.tag.as_deref().unwrap_or(default)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Index of the first line after the `=====` framed header, or 0 without one.
fn header_end(lines: &[&str]) -> usize {
    let Some(first) = lines.iter().position(|line| !line.trim().is_empty()) else {
        return lines.len();
    };
    if lines[first].trim() != HEADER_RULE {
        return 0;
    }
    lines[first + 1..]
        .iter()
        .position(|line| line.trim() == HEADER_RULE)
        .map(|closing| first + 1 + closing + 1)
        .unwrap_or(first + 1)
}

/// Splits `TAG YYYY-MM-DD HH:MM:SSZ | TITLE` into its three parts.
/// The tag may itself contain spaces; the timestamp is the last two words before `|`.
pub fn parse_tag_line(line: &str) -> Option<(&str, String, &str)> {
    let (lhs, title) = line.split_once('|')?;
    let title = title.trim();
    let mut words = lhs.split_whitespace();
    let time = words.next_back()?;
    let date = words.next_back()?;

    let tag_len = lhs.trim_end().len() - time.len();
    let tag = lhs[..tag_len].trim_end();
    let tag = tag[..tag.len() - date.len()].trim();
    if tag.is_empty() || title.is_empty() {
        return None;
    }
    Some((tag, format!("{date} {time}"), title))
}

pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(raw.trim(), TIMESTAMP_FORMAT)
        .ok()
        .map(|dt| dt.and_utc())
}

pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

/// Builds an entry from the trimmed, non-blank lines of one block.
pub fn parse_block(lines: &[&str]) -> core::result::Result<BacklogEntry, BlockSkip> {
    let first = lines.first().copied().unwrap_or_default();
    let (tag, timestamp, title) =
        parse_tag_line(first).ok_or_else(|| BlockSkip::MissingTagLine(first.to_string()))?;
    let published_at =
        parse_timestamp(&timestamp).ok_or_else(|| BlockSkip::BadTimestamp(timestamp.clone()))?;

    let mut source = None;
    let mut batch_marker = None;
    let mut located = None;

    for (idx, line) in lines.iter().enumerate().skip(1) {
        if let Some(value) = line.strip_prefix(SOURCE_PREFIX) {
            source = Some(value.trim()).filter(|v| !v.is_empty());
        } else if let Some(value) = line.strip_prefix(BATCH_PREFIX) {
            batch_marker = Some(value.trim()).filter(|v| !v.is_empty());
        } else if let Some(value) = line.strip_prefix(URL_PREFIX) {
            located = Some(value.trim()).filter(|v| !v.is_empty()).map(|url| (url, idx));
            break;
        }
    }

    let (url, url_idx) = located.ok_or_else(|| BlockSkip::MissingUrl(title.to_string()))?;
    let summary = lines[url_idx + 1..].join("\n");

    Ok(BacklogEntry {
        tag: tag.to_string(),
        record: Record {
            title: title.to_string(),
            source: source.unwrap_or(DEFAULT_SOURCE).to_string(),
            url: url.to_string(),
            published_at,
            summary,
            batch_marker: batch_marker.map(str::to_string),
        },
    })
}

/// Combines the existing backlog with newly harvested entries.
///
/// Keyed by URL: an existing entry is never replaced, so manual edits to a
/// published block survive. The result is sorted newest first; ties keep
/// their relative order.
pub fn merge(existing: Vec<BacklogEntry>, new: Vec<BacklogEntry>) -> Vec<BacklogEntry> {
    let mut urls = HashSet::with_capacity(existing.len() + new.len());
    let mut merged = Vec::with_capacity(existing.len() + new.len());

    for entry in existing.into_iter().chain(new) {
        if urls.contains(entry.url()) {
            debug!(url = entry.url(), "dropping entry with an already merged URL");
            continue;
        }
        urls.insert(entry.url().to_string());
        merged.push(entry);
    }

    merged.sort_by(|a, b| b.published_at().cmp(&a.published_at()));
    merged
}

/// Renders entries, in the given order, into the on-disk format.
pub fn render(entries: &[BacklogEntry], label: &str) -> String {
    let mut lines = vec![
        HEADER_RULE.to_string(),
        format!("{label} Historical Backlog ({} items)", entries.len()),
        HEADER_RULE.to_string(),
        String::new(),
    ];

    if entries.is_empty() {
        lines.push(format!("No {label} index range results were available."));
        lines.push(String::new());
        return lines.join("\n");
    }

    for (i, entry) in entries.iter().enumerate() {
        let rec = &entry.record;
        if i > 0 {
            lines.push(DIVIDER.to_string());
        }
        lines.push(format!(
            "{} {} | {}",
            entry.tag,
            format_timestamp(&rec.published_at),
            rec.title
        ));
        lines.push(format!("{SOURCE_PREFIX} {}", rec.source));
        if let Some(marker) = &rec.batch_marker {
            lines.push(format!("{BATCH_PREFIX} {marker}"));
        }
        lines.push(format!("{URL_PREFIX} {}", rec.url));
        let summary = rec.summary.trim();
        if !summary.is_empty() {
            lines.push(summary.to_string());
        }
    }

    let mut text = lines.join("\n");
    text.push('\n');
    text
}

/// Reads the backlog at `path`. A missing or unreadable file is an empty backlog.
pub async fn load(path: &Path) -> Backlog {
    match tokio::fs::read_to_string(path).await {
        Ok(text) => {
            let backlog = Backlog::parse(&text);
            info!(path = %path.display(), entries = backlog.len(), "loaded existing backlog");
            backlog
        }
        Err(e) if e.kind() == ErrorKind::NotFound => {
            info!(path = %path.display(), "no backlog found; starting with an empty one");
            Backlog::default()
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "couldn't read backlog; starting with an empty one");
            Backlog::default()
        }
    }
}

/// Replaces the file at `path` with `text`: the whole text goes to a sibling
/// temporary file first, which is then renamed over the target.
pub async fn write_atomic(path: &Path, text: &str) -> Result<()> {
    let fail = |source: std::io::Error| Error::WriteBacklog {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(fail)?;
    }

    let tmp = temp_path(path);
    tokio::fs::write(&tmp, text).await.map_err(fail)?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(fail(e));
    }
    Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn entry(url: &str, day: u32, summary: &str) -> BacklogEntry {
        BacklogEntry::new(
            DEFAULT_TAG,
            Record {
                title: format!("Document {url}"),
                source: DEFAULT_SOURCE.to_string(),
                url: url.to_string(),
                published_at: Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap(),
                summary: summary.to_string(),
                batch_marker: Some("indices 0-9".to_string()),
            },
        )
    }

    #[test]
    fn tag_line_with_spaced_tag() {
        let (tag, ts, title) =
            parse_tag_line("[FEDERAL REGISTER INDEX] 2026-02-04 00:00:00Z | A | B title").unwrap();
        assert_eq!(tag, "[FEDERAL REGISTER INDEX]");
        assert_eq!(ts, "2026-02-04 00:00:00Z");
        assert_eq!(title, "A | B title");
    }

    #[test]
    fn tag_line_rejects_malformed() {
        assert!(parse_tag_line("no separator here").is_none());
        assert!(parse_tag_line("2026-02-04 00:00:00Z | missing tag").is_none());
        assert!(parse_tag_line("[TAG] 2026-02-04 00:00:00Z |   ").is_none());
    }

    #[test]
    fn block_fields_are_classified() {
        let block = [
            "[FR] 2024-01-05 10:20:30Z | Title",
            "Source: Agency Feed",
            "Batch File: indices 3000-3900",
            "URL: https://example.gov/doc/1",
            "Line one.",
            "Line two.",
        ];
        let entry = parse_block(&block).unwrap();
        assert_eq!(entry.tag, "[FR]");
        assert_eq!(entry.record.source, "Agency Feed");
        assert_eq!(entry.record.batch_marker.as_deref(), Some("indices 3000-3900"));
        assert_eq!(entry.record.url, "https://example.gov/doc/1");
        assert_eq!(entry.record.summary, "Line one.\nLine two.");
        assert_eq!(
            entry.published_at(),
            Utc.with_ymd_and_hms(2024, 1, 5, 10, 20, 30).unwrap()
        );
    }

    #[test]
    fn block_defaults_source() {
        let block = ["[FR] 2024-01-05 10:20:30Z | Title", "URL: https://example.gov/doc/1"];
        let entry = parse_block(&block).unwrap();
        assert_eq!(entry.record.source, DEFAULT_SOURCE);
        assert_eq!(entry.record.batch_marker, None);
        assert_eq!(entry.record.summary, "");
    }

    #[test]
    fn block_missing_tag_line() {
        let block = ["Just some text", "URL: https://example.gov/doc/1"];
        assert_eq!(
            parse_block(&block),
            Err(BlockSkip::MissingTagLine("Just some text".into()))
        );
    }

    #[test]
    fn block_bad_timestamp() {
        let block = ["[FR] 2024-13-05 10:20:30Z | Title", "URL: https://example.gov/doc/1"];
        assert_eq!(
            parse_block(&block),
            Err(BlockSkip::BadTimestamp("2024-13-05 10:20:30Z".into()))
        );
        let block = ["[FR] 2024-01-05T10:20:30Z | Title", "URL: https://example.gov/doc/1"];
        assert!(matches!(parse_block(&block), Err(BlockSkip::MissingTagLine(_))));
    }

    #[test]
    fn block_missing_url() {
        let block = ["[FR] 2024-01-05 10:20:30Z | Title", "Source: X", "URL:   ", "text"];
        assert_eq!(parse_block(&block), Err(BlockSkip::MissingUrl("Title".into())));
    }

    #[test]
    fn parse_skips_bad_blocks_and_keeps_good_ones() {
        let text = format!(
            "{HEADER_RULE}\nFederal Register Historical Backlog (3 items)\n{HEADER_RULE}\n\n\
             [FR] 2024-01-02 00:00:00Z | Good one\nURL: https://example.gov/1\nSummary.\n{DIVIDER}\n\
             [FR] not-a-date 00:00:00Z | Bad\nURL: https://example.gov/2\n{DIVIDER}\n\
             [FR] 2024-01-01 00:00:00Z | Good two\nURL: https://example.gov/3\n"
        );
        let backlog = Backlog::parse(&text);
        assert_eq!(backlog.len(), 2);
        assert_eq!(backlog.entries[0].record.title, "Good one");
        assert_eq!(backlog.entries[1].record.url, "https://example.gov/3");
        assert_eq!(backlog.tag.as_deref(), Some("[FR]"));
    }

    #[test]
    fn merge_keeps_existing_and_sorts_newest_first() {
        let existing = vec![
            entry("https://example.gov/doc/42", 3, "Edited by hand."),
            entry("https://example.gov/doc/1", 1, "Old."),
        ];
        let new = vec![
            entry("https://example.gov/doc/42", 9, "Fresh upstream."),
            entry("https://example.gov/doc/7", 5, "New."),
        ];

        let merged = merge(existing, new);
        let urls: Vec<&str> = merged.iter().map(BacklogEntry::url).collect();
        assert_eq!(
            urls,
            vec![
                "https://example.gov/doc/7",
                "https://example.gov/doc/42",
                "https://example.gov/doc/1"
            ]
        );
        assert_eq!(merged[1].record.summary, "Edited by hand.");
    }

    #[test]
    fn merge_ties_keep_relative_order() {
        let existing = vec![entry("https://example.gov/b", 2, ""), entry("https://example.gov/a", 2, "")];
        let new = vec![entry("https://example.gov/c", 2, "")];
        let merged = merge(existing, new);
        let urls: Vec<&str> = merged.iter().map(BacklogEntry::url).collect();
        assert_eq!(
            urls,
            vec!["https://example.gov/b", "https://example.gov/a", "https://example.gov/c"]
        );
    }

    #[test]
    fn render_empty_backlog() {
        let text = render(&[], DEFAULT_LABEL);
        assert!(text.contains("Federal Register Historical Backlog (0 items)"));
        assert!(text.contains("No Federal Register index range results were available."));
        assert!(Backlog::parse(&text).is_empty());
    }

    #[test]
    fn render_layout() {
        let entries = vec![entry("https://example.gov/2", 2, "Two."), entry("https://example.gov/1", 1, "")];
        let text = render(&entries, DEFAULT_LABEL);
        let expected = format!(
            "{HEADER_RULE}\nFederal Register Historical Backlog (2 items)\n{HEADER_RULE}\n\n\
             [FEDERAL REGISTER INDEX] 2024-01-02 00:00:00Z | Document https://example.gov/2\n\
             Source: Federal Register\nBatch File: indices 0-9\nURL: https://example.gov/2\nTwo.\n\
             {DIVIDER}\n\
             [FEDERAL REGISTER INDEX] 2024-01-01 00:00:00Z | Document https://example.gov/1\n\
             Source: Federal Register\nBatch File: indices 0-9\nURL: https://example.gov/1\n"
        );
        assert_eq!(text, expected);
    }

    #[test]
    fn render_parse_round_trip() {
        let entries = merge(
            vec![
                entry("https://example.gov/1", 1, "Multi\nline summary"),
                entry("https://example.gov/2", 4, "One line."),
            ],
            vec![],
        );
        let text = render(&entries, DEFAULT_LABEL);
        let parsed = Backlog::parse(&text);
        assert_eq!(parsed.entries, entries);
        assert_eq!(render(&merge(parsed.entries, vec![]), DEFAULT_LABEL), text);
    }

    #[test]
    fn temp_path_is_a_sibling() {
        assert_eq!(
            temp_path(Path::new("out/backlog.txt")),
            PathBuf::from("out/backlog.txt.tmp")
        );
    }

    #[tokio::test]
    async fn write_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("backlog.txt");
        let entries = vec![entry("https://example.gov/1", 1, "Summary.")];

        write_atomic(&path, &render(&entries, DEFAULT_LABEL)).await.unwrap();
        assert!(!temp_path(&path).exists());

        let backlog = load(&path).await;
        assert_eq!(backlog.entries, entries);
        assert!(backlog.seen_urls().contains("https://example.gov/1"));
    }

    #[tokio::test]
    async fn load_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let backlog = load(&dir.path().join("absent.txt")).await;
        assert!(backlog.is_empty());
        assert_eq!(backlog.tag_or(DEFAULT_TAG), DEFAULT_TAG);
    }

    #[tokio::test]
    async fn write_into_a_file_parent_fails() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, "x").unwrap();
        let res = write_atomic(&blocker.join("backlog.txt"), "text").await;
        assert!(matches!(res, Err(Error::WriteBacklog { .. })));
    }
}
