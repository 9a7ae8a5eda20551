use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use reqwest::Client;
use scraper::{ElementRef, Html, Selector};
use url::Url;

use super::{FetchError, Monitor, PageQuery};
use crate::record::{collapse_whitespace, Record};
use crate::request::request_page_text;
use crate::{Error, Result};

/// CSS selectors locating the parts of one listing entry.
#[derive(Debug, Clone)]
pub struct HtmlSelectors {
    pub item: String,
    pub title_link: String,
    pub date: String,
    pub summary: Option<String>,
}

impl Default for HtmlSelectors {
    fn default() -> Self {
        Self {
            item: ".views-row".to_string(),
            title_link: "h3 a".to_string(),
            date: "time".to_string(),
            summary: None,
        }
    }
}

impl HtmlSelectors {
    /// Checks every selector compiles, without building a monitor.
    pub fn validate(&self) -> Result<()> {
        self.compile().map(|_| ())
    }

    fn compile(&self) -> Result<CompiledSelectors> {
        Ok(CompiledSelectors {
            item: create_selector(&self.item)?,
            title_link: create_selector(&self.title_link)?,
            date: create_selector(&self.date)?,
            summary: self.summary.as_deref().map(create_selector).transpose()?,
        })
    }
}

struct CompiledSelectors {
    item: Selector,
    title_link: Selector,
    date: Selector,
    summary: Option<Selector>,
}

/// Monitor for paginated HTML press-release style listings, where page `n`
/// is served at `?page=n-1`.
pub struct HtmlListingMonitor {
    client: Client,
    listing_url: Url,
    source: String,
    selectors: CompiledSelectors,
}

impl HtmlListingMonitor {
    pub fn new(
        client: Client,
        listing_url: &str,
        source: &str,
        selectors: &HtmlSelectors,
    ) -> Result<Self> {
        Ok(Self {
            client,
            listing_url: parse_listing_url(listing_url)?,
            source: source.to_string(),
            selectors: selectors.compile()?,
        })
    }

    fn parse_entry(&self, entry: ElementRef<'_>) -> Option<Record> {
        let link = entry.select(&self.selectors.title_link).next()?;
        let title = element_text(link);
        let url = self.listing_url.join(link.value().attr("href")?).ok()?;

        let published_at = entry
            .select(&self.selectors.date)
            .next()
            .and_then(|date| {
                date.value()
                    .attr("datetime")
                    .and_then(parse_listing_date)
                    .or_else(|| parse_listing_date(&element_text(date)))
            });

        let summary = self
            .selectors
            .summary
            .as_ref()
            .and_then(|sel| entry.select(sel).next())
            .map(element_text);

        Record::new(
            &title,
            url.as_str(),
            published_at,
            Some(self.source.as_str()),
            summary.as_deref(),
        )
    }
}

#[async_trait]
impl Monitor for HtmlListingMonitor {
    fn name(&self) -> &str {
        &self.source
    }

    async fn fetch(&self, query: &PageQuery) -> core::result::Result<String, FetchError> {
        let page_param = query.page.saturating_sub(1).to_string();
        request_page_text(&self.client, self.listing_url.as_str(), &[("page", page_param)]).await
    }

    fn parse(&self, raw: &str) -> Vec<Record> {
        let doc = Html::parse_document(raw);
        doc.select(&self.selectors.item)
            .filter_map(|entry| self.parse_entry(entry))
            .collect()
    }
}

pub fn parse_listing_url(raw: &str) -> Result<Url> {
    Url::parse(raw).map_err(|e| Error::Monitor(format!("invalid listing url '{raw}': {e}")))
}

#[inline]
fn create_selector(sel_str: &str) -> Result<Selector> {
    Selector::parse(sel_str).map_err(|_| Error::Monitor(format!("invalid selector: {sel_str}")))
}

fn element_text(el: ElementRef<'_>) -> String {
    collapse_whitespace(&el.text().collect::<String>())
}

fn parse_listing_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%B %d, %Y", "%Y-%m-%d"]
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}
