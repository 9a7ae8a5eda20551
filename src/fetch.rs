//! Walks the remote pages covering one [`IndexRange`].

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::backoff::{fetch_with_backoff, BackoffPolicy};
use crate::dedup::SeenUrls;
use crate::monitor::{DateBounds, Monitor, Order, PageQuery};
use crate::range::IndexRange;
use crate::record::Record;

/// Largest page size the remote API will honor.
pub const PAGE_SIZE_CAP: u64 = 1000;

/// Per-run fetch parameters shared by all workers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchPlan {
    pub page_size: u64,
    pub order: Order,
    pub date_bounds: DateBounds,
    pub backoff: BackoffPolicy,
}

/// Counters for one walked range.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RangeStats {
    /// Records claimed in `seen` and handed to the sink.
    pub accepted: u64,
    pub pages_fetched: u64,
    pub pages_skipped: u64,
    /// Records dropped because another worker or the backlog already had the URL.
    pub duplicates: u64,
    /// The remote source ran out of data before the range end.
    pub exhausted: bool,
}

/// What one range produced.
#[derive(Debug, Default)]
pub struct RangeHarvest {
    /// First-seen records, in index order.
    pub records: Vec<Record>,
    pub stats: RangeStats,
}

/// One-based page holding `index`, and the global offset of its first item.
pub fn locate(index: u64, page_size: u64) -> (u64, u64) {
    ((index / page_size).saturating_add(1), index - index % page_size)
}

/// Which slice of a fetched page belongs to the request: `(start_in_page, take)`.
/// `None` if the page ends before `current`.
pub fn page_window(current: u64, end: u64, page_start: u64, available: u64) -> Option<(u64, u64)> {
    let start_in_page = current.saturating_sub(page_start);
    if start_in_page >= available {
        return None;
    }
    let remaining = (end - current).saturating_add(1);
    Some((start_in_page, (available - start_in_page).min(remaining)))
}

/// Fetches every record of `range`, touching the fewest pages.
///
/// Failed pages are skipped. Records whose URL was already claimed in `seen`
/// are dropped. Each kept record is stamped with `label`.
pub async fn harvest_range<M: Monitor + ?Sized>(
    monitor: &M,
    range: IndexRange,
    plan: &FetchPlan,
    seen: &SeenUrls,
    label: &str,
) -> RangeHarvest {
    let (records_tx, mut records_rx) = mpsc::unbounded_channel();
    let stats = harvest_range_into(monitor, range, plan, seen, label, &records_tx).await;
    drop(records_tx);

    let mut records = Vec::new();
    while let Some(record) = records_rx.recv().await {
        records.push(record);
    }
    RangeHarvest { records, stats }
}

/// Like [`harvest_range`], but every accepted record is sent to `sink` as soon
/// as its URL is claimed. A claimed URL's record therefore outlives this
/// future, even if a later page panics.
pub async fn harvest_range_into<M: Monitor + ?Sized>(
    monitor: &M,
    range: IndexRange,
    plan: &FetchPlan,
    seen: &SeenUrls,
    label: &str,
    sink: &mpsc::UnboundedSender<Record>,
) -> RangeStats {
    let page_size = plan.page_size.clamp(1, PAGE_SIZE_CAP);
    info!(
        %range,
        indices = range.count(),
        page_size,
        monitor = monitor.name(),
        "processing range"
    );

    let mut out = RangeStats::default();
    let mut current = range.start;

    while current <= range.end {
        let (page, page_start) = locate(current, page_size);
        let query = PageQuery {
            page,
            per_page: page_size,
            order: plan.order,
            date_bounds: plan.date_bounds,
        };

        let raw = match fetch_with_backoff(monitor, &query, &plan.backoff).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(%range, page, error = %e, "skipping page");
                out.pages_skipped += 1;
                match page_start.checked_add(page_size) {
                    Some(next) => current = next,
                    None => break,
                }
                continue;
            }
        };
        out.pages_fetched += 1;

        let records = monitor.parse(&raw);
        if records.is_empty() {
            info!(%range, page, "no results returned; stopping early");
            out.exhausted = true;
            break;
        }

        let available = records.len() as u64;
        let Some((start_in_page, take)) = page_window(current, range.end, page_start, available)
        else {
            debug!(%range, page, available, "page ends before requested offset");
            out.exhausted = true;
            break;
        };

        for record in records
            .into_iter()
            .skip(start_in_page as usize)
            .take(take as usize)
        {
            if seen.accept(&record.url) {
                out.accepted += 1;
                if sink.send(record.with_batch_marker(label)).is_err() {
                    warn!(%range, "record sink closed; claimed record dropped");
                }
            } else {
                out.duplicates += 1;
            }
        }

        match current.checked_add(take) {
            Some(next) => current = next,
            None => break,
        }
        if available < page_size {
            out.exhausted = current <= range.end;
            break;
        }
    }

    info!(
        %range,
        new = out.accepted,
        duplicates = out.duplicates,
        pages_fetched = out.pages_fetched,
        pages_skipped = out.pages_skipped,
        "range done"
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locate_pages() {
        assert_eq!(locate(0, 5), (1, 0));
        assert_eq!(locate(4, 5), (1, 0));
        assert_eq!(locate(5, 5), (2, 5));
        assert_eq!(locate(3042, 100), (31, 3000));
        assert_eq!(locate(u64::MAX, 1), (u64::MAX, u64::MAX));
    }

    #[test]
    fn window_handles_misaligned_ranges() {
        // [3, 12] with pages of 5: take 2 from page 1, 5 from page 2, 3 from page 3.
        assert_eq!(page_window(3, 12, 0, 5), Some((3, 2)));
        assert_eq!(page_window(5, 12, 5, 5), Some((0, 5)));
        assert_eq!(page_window(10, 12, 10, 5), Some((0, 3)));
    }

    #[test]
    fn window_past_short_page() {
        assert_eq!(page_window(8, 12, 5, 2), None);
        assert_eq!(page_window(6, 12, 5, 2), Some((1, 1)));
    }

    #[test]
    fn window_at_top_of_index_space() {
        assert_eq!(page_window(u64::MAX, u64::MAX, u64::MAX - 1, 5), Some((1, 1)));
        assert_eq!(page_window(0, u64::MAX, 0, 5), Some((0, 5)));
    }
}
