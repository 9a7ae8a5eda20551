#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use harvest::backoff::BackoffPolicy;
use harvest::monitor::{FetchError, Monitor, PageQuery};
use harvest::record::Record;

/// How a page misbehaves before it is served.
#[derive(Debug, Clone, Copy)]
pub enum Fault {
    /// Answer 429 this many times first.
    RateLimited(usize),
    /// Answer 429 with a `Retry-After` this many times first.
    RateLimitedWithHint(usize, Duration),
    /// Alternate 429 and 503, starting with 429, this many times first.
    Flaky(usize),
    /// Always answer 503.
    Unavailable,
    /// Panic while fetching.
    Panic,
}

/// In-memory listing of `total` documents; document `i` lives at
/// `https://example.gov/doc/{i}` and is one minute older than document `i - 1`.
#[derive(Default)]
pub struct MockListing {
    pub total: u64,
    pub faults: HashMap<u64, Fault>,
    pub calls: Mutex<HashMap<u64, usize>>,
    pub fetches: AtomicUsize,
    pub call_times: Mutex<Vec<(u64, Instant)>>,
}

impl MockListing {
    pub fn new(total: u64) -> Self {
        Self {
            total,
            ..Self::default()
        }
    }

    pub fn with_fault(mut self, page: u64, fault: Fault) -> Self {
        self.faults.insert(page, fault);
        self
    }

    pub fn calls_for(&self, page: u64) -> usize {
        self.calls.lock().unwrap().get(&page).copied().unwrap_or(0)
    }

    /// Time between consecutive requests for `page`.
    pub fn gaps_for(&self, page: u64) -> Vec<Duration> {
        let times: Vec<Instant> = self
            .call_times
            .lock()
            .unwrap()
            .iter()
            .filter(|(p, _)| *p == page)
            .map(|(_, t)| *t)
            .collect();
        times.windows(2).map(|w| w[1] - w[0]).collect()
    }
}

fn unavailable() -> FetchError {
    FetchError::Status {
        status: 503,
        retry_after: None,
        url: "https://example.gov/api".into(),
    }
}

pub fn doc_url(i: u64) -> String {
    format!("https://example.gov/doc/{i}")
}

fn rate_limited(retry_after: Option<Duration>) -> FetchError {
    FetchError::Status {
        status: 429,
        retry_after,
        url: "https://example.gov/api".into(),
    }
}

#[async_trait]
impl Monitor for MockListing {
    fn name(&self) -> &str {
        "mock"
    }

    async fn fetch(&self, query: &PageQuery) -> Result<String, FetchError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.call_times
            .lock()
            .unwrap()
            .push((query.page, Instant::now()));
        let call = {
            let mut calls = self.calls.lock().unwrap();
            let n = calls.entry(query.page).or_insert(0);
            *n += 1;
            *n
        };

        match self.faults.get(&query.page) {
            Some(Fault::RateLimited(n)) if call <= *n => return Err(rate_limited(None)),
            Some(Fault::RateLimitedWithHint(n, hint)) if call <= *n => {
                return Err(rate_limited(Some(*hint)))
            }
            Some(Fault::Flaky(n)) if call <= *n => {
                return Err(if call % 2 == 1 {
                    rate_limited(None)
                } else {
                    unavailable()
                })
            }
            Some(Fault::Unavailable) => return Err(unavailable()),
            Some(Fault::Panic) => panic!("listing exploded on page {}", query.page),
            _ => {}
        }

        let first = (query.page - 1) * query.per_page;
        let last = (first + query.per_page).min(self.total);
        Ok((first..last)
            .map(|i| i.to_string())
            .collect::<Vec<_>>()
            .join(","))
    }

    fn parse(&self, raw: &str) -> Vec<Record> {
        let base = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        raw.split(',')
            .filter_map(|s| s.parse::<u64>().ok())
            .filter_map(|i| {
                Record::new(
                    &format!("Document {i}"),
                    &doc_url(i),
                    Some(base - chrono::Duration::minutes(i as i64)),
                    Some("Mock Register"),
                    Some(format!("Summary for   document {i}.").as_str()),
                )
            })
            .collect()
    }
}

/// Backoff fast enough for tests.
pub fn quick_backoff(max_retries: u32) -> BackoffPolicy {
    BackoffPolicy {
        max_retries,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
    }
}

pub fn shared(listing: MockListing) -> Arc<MockListing> {
    Arc::new(listing)
}
