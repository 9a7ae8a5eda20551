use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use super::{FetchError, Monitor, PageQuery};
use crate::record::Record;
use crate::request::request_page_text;

pub const FEDERAL_REGISTER_BASE_URL: &str = "https://www.federalregister.gov";
const DOCUMENTS_PATH: &str = "/api/v1/documents.json";
const SOURCE: &str = "Federal Register";

/// Monitor for the Federal Register documents API.
pub struct FederalRegisterMonitor {
    client: Client,
    base_url: String,
}

impl FederalRegisterMonitor {
    pub fn new(client: Client) -> Self {
        Self::with_base_url(client, FEDERAL_REGISTER_BASE_URL)
    }

    pub fn with_base_url(client: Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn query_params(query: &PageQuery) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("per_page", query.per_page.to_string()),
            ("page", query.page.to_string()),
            ("order", query.order.as_str().to_string()),
        ];
        if let Some(from) = query.date_bounds.from {
            params.push(("conditions[publication_date][gte]", from.to_string()));
        }
        if let Some(to) = query.date_bounds.to {
            params.push(("conditions[publication_date][lte]", to.to_string()));
        }
        params
    }
}

#[async_trait]
impl Monitor for FederalRegisterMonitor {
    fn name(&self) -> &str {
        "federal-register"
    }

    async fn fetch(&self, query: &PageQuery) -> Result<String, FetchError> {
        let url = format!("{}{DOCUMENTS_PATH}", self.base_url);
        request_page_text(&self.client, &url, &Self::query_params(query)).await
    }

    fn parse(&self, raw: &str) -> Vec<Record> {
        let page: DocumentsPage = match serde_json::from_str(raw) {
            Ok(page) => page,
            Err(e) => {
                debug!(error = %e, "undecodable Federal Register payload");
                return Vec::new();
            }
        };

        page.results
            .into_iter()
            .filter_map(|value| match serde_json::from_value::<Document>(value) {
                Ok(doc) => doc.into_record(),
                Err(e) => {
                    debug!(error = %e, "skipping malformed Federal Register document");
                    None
                }
            })
            .collect()
    }
}

#[derive(Debug, Deserialize)]
struct DocumentsPage {
    #[serde(default)]
    results: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct Document {
    title: Option<String>,
    html_url: Option<String>,
    document_number: Option<String>,
    publication_date: Option<String>,
    #[serde(rename = "abstract")]
    abstract_text: Option<String>,
    #[serde(rename = "type")]
    doc_type: Option<String>,
    #[serde(default)]
    agencies: Vec<Agency>,
}

#[derive(Debug, Deserialize)]
struct Agency {
    name: Option<String>,
}

impl Document {
    fn into_record(self) -> Option<Record> {
        let title = self.title.filter(|t| !t.trim().is_empty())?;
        let published_at = parse_publication_date(self.publication_date.as_deref()?)?;

        let url = match (self.html_url, self.document_number) {
            (Some(url), _) if !url.trim().is_empty() => url,
            (_, Some(number)) if !number.trim().is_empty() => {
                format!("{FEDERAL_REGISTER_BASE_URL}/documents/{}", number.trim())
            }
            _ => return None,
        };

        let summary = match self.abstract_text.filter(|a| !a.trim().is_empty()) {
            Some(abstract_text) => abstract_text,
            None => {
                let agency = self
                    .agencies
                    .into_iter()
                    .find_map(|a| a.name)
                    .unwrap_or_else(|| "an agency".to_string());
                match self.doc_type {
                    Some(doc_type) => {
                        format!("Federal Register document from {agency} ({doc_type})")
                    }
                    None => format!("Federal Register document from {agency}"),
                }
            }
        };

        Record::new(&title, &url, Some(published_at), Some(SOURCE), Some(summary.as_str()))
    }
}

/// Accepts `YYYY-MM-DD` (midnight UTC) or a full RFC 3339 timestamp.
fn parse_publication_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(date.and_hms_opt(0, 0, 0)?.and_utc());
    }
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
