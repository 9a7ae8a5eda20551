//! Per-site collaborators: fetch one page of a listing, parse it into records.

mod federal_register;
mod html_listing;

pub use federal_register::{FederalRegisterMonitor, FEDERAL_REGISTER_BASE_URL};
pub use html_listing::{parse_listing_url, HtmlListingMonitor, HtmlSelectors};

use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use clap::ValueEnum;
use thiserror::Error;

use crate::backoff::Signal;
use crate::record::Record;
use crate::{Error, Result};

/// A remote listing that can be walked page by page.
///
/// One instance is owned by one worker for its whole lifetime, so an
/// implementation holding a `reqwest::Client` gets connection reuse for free.
#[async_trait]
pub trait Monitor: Send + Sync {
    fn name(&self) -> &str;

    /// Requests one page. Transport and status failures carry enough
    /// information for the backoff policy to classify them.
    async fn fetch(&self, query: &PageQuery) -> core::result::Result<String, FetchError>;

    /// Never fails: malformed entries are skipped, a malformed payload yields nothing.
    fn parse(&self, raw: &str) -> Vec<Record>;
}

/// Everything a monitor needs to request one page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageQuery {
    /// One-based page number.
    pub page: u64,
    pub per_page: u64,
    pub order: Order,
    pub date_bounds: DateBounds,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum Order {
    #[default]
    Newest,
    Oldest,
    Relevance,
}

impl Order {
    pub fn as_str(&self) -> &'static str {
        match self {
            Order::Newest => "newest",
            Order::Oldest => "oldest",
            Order::Relevance => "relevance",
        }
    }
}

/// Optional inclusive publication-date bounds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DateBounds {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

impl DateBounds {
    /// Parses `"YYYY-MM-DD,YYYY-MM-DD"`.
    pub fn parse(spec: &str) -> Result<Self> {
        let parts: Vec<&str> = spec.split(',').map(str::trim).collect();
        let [from, to] = parts.as_slice() else {
            return Err(Error::InvalidDateBounds(format!(
                "expected two dates separated by a comma, got '{spec}'"
            )));
        };

        let parse_date = |raw: &str| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|_| {
                Error::InvalidDateBounds(format!("'{raw}' is not in YYYY-MM-DD format"))
            })
        };
        let (from, to) = (parse_date(from)?, parse_date(to)?);
        if from > to {
            return Err(Error::InvalidDateBounds(format!(
                "start date {from} is after end date {to}"
            )));
        }

        Ok(Self {
            from: Some(from),
            to: Some(to),
        })
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP status {status} from {url}")]
    Status {
        status: u16,
        retry_after: Option<Duration>,
        url: String,
    },
    #[error("Transport Error: {0}")]
    Transport(#[from] reqwest::Error),
}

impl FetchError {
    /// How the backoff policy should treat this failure.
    pub fn signal(&self) -> Signal {
        match self {
            FetchError::Status {
                status: 429,
                retry_after,
                ..
            } => Signal::RateLimited {
                retry_after: *retry_after,
            },
            FetchError::Status { status, .. } if *status == 408 || (500..600).contains(status) => {
                Signal::Transient
            }
            FetchError::Status { .. } => Signal::Fatal,
            FetchError::Transport(e) if e.is_builder() || e.is_redirect() => Signal::Fatal,
            FetchError::Transport(_) => Signal::Transient,
        }
    }
}
