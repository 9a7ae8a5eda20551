//! Range specifications: `"3000-3900,4000-4500"` into validated [`IndexRange`]s.

use std::fmt;

use clap::ValueEnum;
use tracing::warn;

use crate::{Error, Result};

const SEGMENT_SEPARATOR: char = ',';
const BOUND_SEPARATOR: char = '-';

/// Closed interval `[start, end]`, `start <= end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IndexRange {
    pub start: u64,
    pub end: u64,
}

impl IndexRange {
    pub fn new(start: u64, end: u64) -> Result<Self> {
        if start > end {
            return Err(Error::InvertedRange { start, end });
        }
        Ok(Self { start, end })
    }

    /// Number of indices covered. Saturates for `[0, u64::MAX]`.
    pub fn count(&self) -> u64 {
        (self.end - self.start).saturating_add(1)
    }
}

impl fmt::Display for IndexRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// What the numbers of a range specification count.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum RangeUnit {
    /// Zero-based record offsets.
    #[default]
    Index,
    /// One-based page numbers of `page_size` records each.
    Page,
}

impl RangeUnit {
    /// The record offsets covered by `range` in this unit.
    pub fn span(self, range: IndexRange, page_size: u64) -> IndexRange {
        match self {
            RangeUnit::Index => range,
            RangeUnit::Page => IndexRange {
                start: range.start.saturating_sub(1).saturating_mul(page_size),
                end: range.end.saturating_mul(page_size).saturating_sub(1),
            },
        }
    }

    /// Provenance label stamped on every record the range produces.
    pub fn label(self, range: IndexRange) -> String {
        match self {
            RangeUnit::Index => format!("indices {range}"),
            RangeUnit::Page => format!("pages {range}"),
        }
    }
}

/// Parses one `start-end` segment.
pub fn parse_segment(segment: &str, unit: RangeUnit) -> Result<IndexRange> {
    let token = segment.trim();
    let (start_raw, end_raw) = token
        .split_once(BOUND_SEPARATOR)
        .ok_or_else(|| Error::InvalidRangeFormat(token.to_string()))?;

    let parse_bound = |raw: &str| {
        raw.trim()
            .parse::<u64>()
            .map_err(|_| Error::InvalidRangeFormat(token.to_string()))
    };
    let range = IndexRange::new(parse_bound(start_raw)?, parse_bound(end_raw)?)?;

    if unit == RangeUnit::Page && range.start == 0 {
        return Err(Error::ZeroPage(token.to_string()));
    }
    Ok(range)
}

/// Parses a comma separated range specification, in order of appearance.
/// Invalid segments are skipped with a warning; only a specification with no
/// valid segment at all is an error.
pub fn parse_range_spec(spec: &str, unit: RangeUnit) -> Result<Vec<IndexRange>> {
    let mut ranges = Vec::new();
    for segment in spec.split(SEGMENT_SEPARATOR) {
        if segment.trim().is_empty() {
            continue;
        }
        match parse_segment(segment, unit) {
            Ok(range) => ranges.push(range),
            Err(e) => warn!(segment = segment.trim(), error = %e, "skipping range segment"),
        }
    }

    if ranges.is_empty() {
        return Err(Error::NoValidRanges);
    }
    Ok(ranges)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn r(start: u64, end: u64) -> IndexRange {
        IndexRange { start, end }
    }

    #[test]
    fn parses_multiple_segments_in_order() {
        let ranges = parse_range_spec("3000-3900, 4000-4500,10-20", RangeUnit::Index).unwrap();
        assert_eq!(ranges, vec![r(3000, 3900), r(4000, 4500), r(10, 20)]);
    }

    #[test]
    fn inverted_segment_is_skipped() {
        let ranges = parse_range_spec("50-40,10-20", RangeUnit::Index).unwrap();
        assert_eq!(ranges, vec![r(10, 20)]);
    }

    #[test]
    fn segment_errors_are_classified() {
        assert!(matches!(
            parse_segment("3000", RangeUnit::Index),
            Err(Error::InvalidRangeFormat(s)) if s == "3000"
        ));
        assert!(matches!(
            parse_segment("a-10", RangeUnit::Index),
            Err(Error::InvalidRangeFormat(_))
        ));
        assert!(matches!(
            parse_segment("1-2-3", RangeUnit::Index),
            Err(Error::InvalidRangeFormat(_))
        ));
        assert!(matches!(
            parse_segment("-5-10", RangeUnit::Index),
            Err(Error::InvalidRangeFormat(_))
        ));
        assert!(matches!(
            parse_segment("9-3", RangeUnit::Index),
            Err(Error::InvertedRange { start: 9, end: 3 })
        ));
        assert!(matches!(
            parse_segment("0-3", RangeUnit::Page),
            Err(Error::ZeroPage(_))
        ));
    }

    #[test]
    fn all_invalid_is_fatal() {
        assert!(matches!(
            parse_range_spec("x-1,5-2, ,", RangeUnit::Index),
            Err(Error::NoValidRanges)
        ));
        assert!(matches!(
            parse_range_spec("", RangeUnit::Index),
            Err(Error::NoValidRanges)
        ));
    }

    #[test]
    fn overlapping_ranges_are_tolerated() {
        let ranges = parse_range_spec("0-10,5-15", RangeUnit::Index).unwrap();
        assert_eq!(ranges.len(), 2);
    }

    #[test]
    fn page_unit_maps_to_index_span() {
        let span = RangeUnit::Page.span(r(1, 3), 100);
        assert_eq!(span, r(0, 299));
        let span = RangeUnit::Page.span(r(4, 4), 25);
        assert_eq!(span, r(75, 99));
        assert_eq!(RangeUnit::Index.span(r(7, 9), 100), r(7, 9));
    }

    #[test]
    fn count_includes_both_ends() {
        assert_eq!(r(3, 12).count(), 10);
        assert_eq!(r(5, 5).count(), 1);
        assert_eq!(r(0, u64::MAX).count(), u64::MAX);
    }

    #[test]
    fn labels_name_the_unit() {
        assert_eq!(RangeUnit::Index.label(r(0, 9)), "indices 0-9");
        assert_eq!(RangeUnit::Page.label(r(2, 5)), "pages 2-5");
    }
}
