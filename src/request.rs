use std::time::Duration;

use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::Client;
use tracing::debug;

use crate::monitor::FetchError;
use crate::Result;

const USER_AGENT: &str = concat!("harvest/", env!("CARGO_PKG_VERSION"));

/// Builds the client a single worker keeps for its lifetime.
/// `timeout` bounds every individual page request.
pub fn build_client(timeout: Duration) -> Result<Client> {
    let client = Client::builder()
        .user_agent(USER_AGENT)
        .timeout(timeout)
        .build()?;
    Ok(client)
}

/// Requests a page and returns its body, or a classified failure.
pub(crate) async fn request_page_text(
    client: &Client,
    url: &str,
    params: &[(&str, String)],
) -> core::result::Result<String, FetchError> {
    debug!(url, ?params, "requesting page");
    let res = client.get(url).query(params).send().await?;

    let status = res.status();
    if !status.is_success() {
        return Err(FetchError::Status {
            status: status.as_u16(),
            retry_after: retry_after(res.headers()),
            url: res.url().to_string(),
        });
    }
    Ok(res.text().await?)
}

/// Only the delta-seconds form of `Retry-After` is honored.
fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}
