//! Command line / environment configuration and logging setup.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tracing_subscriber::EnvFilter;

use crate::backlog::{DEFAULT_LABEL, DEFAULT_TAG};
use crate::backoff::BackoffPolicy;
use crate::fetch::{FetchPlan, PAGE_SIZE_CAP};
use crate::monitor::{
    parse_listing_url, DateBounds, FederalRegisterMonitor, HtmlListingMonitor, HtmlSelectors,
    Monitor, Order, FEDERAL_REGISTER_BASE_URL,
};
use crate::range::{parse_range_spec, IndexRange, RangeUnit};
use crate::request::build_client;
use crate::{Error, Result};

/// Which kind of listing the workers walk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum SourceKind {
    #[default]
    FederalRegister,
    Html,
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "harvest",
    about = "Harvest paginated document listings into a deduplicated text backlog"
)]
pub struct Cli {
    /// Comma separated ranges, e.g. 3000-3900,4000-4500
    #[arg(long, env = "HARVEST_RANGES", default_value = "3000-3900")]
    pub ranges: String,

    /// Whether the ranges count record offsets or pages
    #[arg(long, env = "HARVEST_UNIT", value_enum, default_value_t = RangeUnit::Index)]
    pub unit: RangeUnit,

    /// Records requested per page (capped at 1000)
    #[arg(long, env = "HARVEST_PAGE_SIZE", default_value_t = 100)]
    pub page_size: u64,

    #[arg(long, env = "HARVEST_ORDER", value_enum, default_value_t = Order::Newest)]
    pub order: Order,

    /// Publication date bounds: YYYY-MM-DD,YYYY-MM-DD
    #[arg(long, env = "HARVEST_DATE_RANGE")]
    pub date_range: Option<String>,

    /// Number of concurrent workers
    #[arg(long, env = "HARVEST_THREADS", default_value_t = 4)]
    pub threads: usize,

    /// Backlog file to update
    #[arg(long, env = "HARVEST_OUTPUT", default_value = "federal_register_results.txt")]
    pub output: PathBuf,

    /// Tag prefixed to new backlog entries when the backlog has none yet
    #[arg(long, env = "HARVEST_TAG", default_value = DEFAULT_TAG)]
    pub tag: String,

    /// Label used in the backlog header
    #[arg(long, env = "HARVEST_LABEL", default_value = DEFAULT_LABEL)]
    pub label: String,

    #[arg(long, env = "HARVEST_SOURCE", value_enum, default_value_t = SourceKind::FederalRegister)]
    pub source: SourceKind,

    /// API base url (federal-register) or listing url (html)
    #[arg(long, env = "HARVEST_BASE_URL")]
    pub base_url: Option<String>,

    /// Source label stamped on records from an HTML listing
    #[arg(long, env = "HARVEST_SOURCE_NAME", default_value = "Department of Justice")]
    pub source_name: String,

    #[arg(long, default_value = ".views-row")]
    pub item_selector: String,
    #[arg(long, default_value = "h3 a")]
    pub title_selector: String,
    #[arg(long, default_value = "time")]
    pub date_selector: String,
    #[arg(long)]
    pub summary_selector: Option<String>,

    #[arg(long, env = "HARVEST_MAX_RETRIES", default_value_t = 5)]
    pub max_retries: u32,
    #[arg(long, env = "HARVEST_BASE_DELAY_MS", default_value_t = 2_000)]
    pub base_delay_ms: u64,
    #[arg(long, env = "HARVEST_MAX_DELAY_MS", default_value_t = 60_000)]
    pub max_delay_ms: u64,

    /// Per-request timeout
    #[arg(long, env = "HARVEST_TIMEOUT_SECS", default_value_t = 15)]
    pub timeout_secs: u64,

    /// Log at debug level
    #[arg(short, long)]
    pub verbose: bool,
}

/// How each worker builds its monitor.
#[derive(Debug, Clone)]
pub enum MonitorConfig {
    FederalRegister {
        base_url: String,
    },
    HtmlListing {
        listing_url: String,
        source: String,
        selectors: HtmlSelectors,
    },
}

impl MonitorConfig {
    /// Everything `build` could reject, checked up front so a bad url or
    /// selector fails the run before any worker starts.
    pub fn validate(&self) -> Result<()> {
        let invalid = |e: Error| Error::InvalidConfig(e.to_string());
        match self {
            MonitorConfig::FederalRegister { base_url } => {
                parse_listing_url(base_url).map_err(invalid)?;
            }
            MonitorConfig::HtmlListing {
                listing_url,
                selectors,
                ..
            } => {
                parse_listing_url(listing_url).map_err(invalid)?;
                selectors.validate().map_err(invalid)?;
            }
        }
        Ok(())
    }

    /// A fresh monitor with its own HTTP client.
    pub fn build(&self, timeout: Duration) -> Result<Arc<dyn Monitor>> {
        let client = build_client(timeout)?;
        let monitor: Arc<dyn Monitor> = match self {
            MonitorConfig::FederalRegister { base_url } => {
                Arc::new(FederalRegisterMonitor::with_base_url(client, base_url))
            }
            MonitorConfig::HtmlListing {
                listing_url,
                source,
                selectors,
            } => Arc::new(HtmlListingMonitor::new(
                client,
                listing_url,
                source,
                selectors,
            )?),
        };
        Ok(monitor)
    }
}

/// Validated run configuration.
#[derive(Debug, Clone)]
pub struct HarvestConfig {
    pub ranges: Vec<IndexRange>,
    pub unit: RangeUnit,
    pub plan: FetchPlan,
    pub threads: usize,
    pub output: PathBuf,
    pub tag: String,
    pub label: String,
    pub monitor: MonitorConfig,
    pub request_timeout: Duration,
}

impl HarvestConfig {
    /// Defaults for everything but what must be supplied.
    pub fn new(ranges: Vec<IndexRange>, output: impl Into<PathBuf>) -> Self {
        Self {
            ranges,
            unit: RangeUnit::Index,
            plan: FetchPlan {
                page_size: 100,
                order: Order::Newest,
                date_bounds: DateBounds::default(),
                backoff: BackoffPolicy::default(),
            },
            threads: 4,
            output: output.into(),
            tag: DEFAULT_TAG.to_string(),
            label: DEFAULT_LABEL.to_string(),
            monitor: MonitorConfig::FederalRegister {
                base_url: FEDERAL_REGISTER_BASE_URL.to_string(),
            },
            request_timeout: Duration::from_secs(15),
        }
    }
}

impl Cli {
    /// Validates everything before any network activity.
    pub fn into_config(self) -> Result<HarvestConfig> {
        if self.threads == 0 {
            return Err(Error::InvalidConfig("threads must be positive".into()));
        }
        if self.page_size == 0 {
            return Err(Error::InvalidConfig("page size must be positive".into()));
        }
        if self.base_delay_ms > self.max_delay_ms {
            return Err(Error::InvalidConfig(
                "base delay must not exceed max delay".into(),
            ));
        }

        let date_bounds = match self.date_range.as_deref() {
            Some(spec) => DateBounds::parse(spec)?,
            None => DateBounds::default(),
        };

        let monitor = match self.source {
            SourceKind::FederalRegister => MonitorConfig::FederalRegister {
                base_url: self
                    .base_url
                    .unwrap_or_else(|| FEDERAL_REGISTER_BASE_URL.to_string()),
            },
            SourceKind::Html => MonitorConfig::HtmlListing {
                listing_url: self.base_url.ok_or_else(|| {
                    Error::InvalidConfig("--base-url is required for html listings".into())
                })?,
                source: self.source_name,
                selectors: HtmlSelectors {
                    item: self.item_selector,
                    title_link: self.title_selector,
                    date: self.date_selector,
                    summary: self.summary_selector,
                },
            },
        };

        monitor.validate()?;
        let ranges = parse_range_spec(&self.ranges, self.unit)?;

        Ok(HarvestConfig {
            ranges,
            unit: self.unit,
            plan: FetchPlan {
                page_size: self.page_size.min(PAGE_SIZE_CAP),
                order: self.order,
                date_bounds,
                backoff: BackoffPolicy {
                    max_retries: self.max_retries,
                    base_delay: Duration::from_millis(self.base_delay_ms),
                    max_delay: Duration::from_millis(self.max_delay_ms),
                },
            },
            threads: self.threads,
            output: self.output,
            tag: self.tag,
            label: self.label,
            monitor,
            request_timeout: Duration::from_secs(self.timeout_secs),
        })
    }
}

/// Installs the global tracing subscriber. Call once, from `main`.
/// `RUST_LOG` takes precedence over the default directive.
pub fn init_logging(verbose: bool) -> Result<()> {
    let default = if verbose { "harvest=debug" } else { "harvest=info" };
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(default));
    let filter = filter.map_err(|e| Error::InvalidConfig(format!("log filter: {e}")))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .map_err(|e| Error::InvalidConfig(format!("logging already initialized: {e}")))
}
