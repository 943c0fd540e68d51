//! Client for the data.gouv.fr tabular API.
//!
//! The trait seam exists so the fetcher and pipeline can run against
//! in-memory fakes in tests; the reqwest implementation mirrors the public
//! API's `{data: [...], meta: {total} | total_count}` shape.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde_json::{Map, Value};
use tracing::debug;

use crate::config::ApiConfig;
use crate::error::Result;

/// One page of rows plus the advertised total, when the API sends one.
#[derive(Debug, Clone, Default)]
pub struct TabularPage {
    pub rows: Vec<Map<String, Value>>,
    pub total: Option<u64>,
}

/// Outcome of a page request. Non-success statuses are data, not errors:
/// the fetcher decides whether they are fatal based on the page index.
#[derive(Debug)]
pub enum PageOutcome {
    Page(TabularPage),
    Status(u16),
}

#[async_trait]
pub trait TabularClient: Send + Sync {
    async fn fetch_page(
        &self,
        resource_id: &str,
        filters: &[(String, String)],
        page: u32,
        page_size: u32,
    ) -> Result<PageOutcome>;

    /// Publication timestamp of a resource, for the freshness banner.
    async fn resource_created_at(&self, resource_id: &str) -> Result<Option<DateTime<Utc>>>;

    /// Fallback freshness signal from the dataset API.
    async fn dataset_last_update(&self, dataset_id: &str) -> Result<Option<DateTime<Utc>>>;
}

/// Production client over reqwest.
#[derive(Clone)]
pub struct HttpTabularClient {
    client: Client,
    tabular_base: String,
    datagouv_base: String,
    request_delay: std::time::Duration,
}

impl HttpTabularClient {
    pub fn new(config: &ApiConfig) -> Self {
        let client = Client::builder()
            .user_agent(crate::USER_AGENT)
            .timeout(config.request_timeout)
            .gzip(true)
            .brotli(true)
            .build()
            .expect("Failed to create HTTP client");
        Self {
            client,
            tabular_base: config.tabular_base.trim_end_matches('/').to_string(),
            datagouv_base: config.datagouv_base.trim_end_matches('/').to_string(),
            request_delay: config.request_delay,
        }
    }
}

fn parse_page(body: Value) -> TabularPage {
    let rows = body
        .get("data")
        .and_then(Value::as_array)
        .map(|rows| {
            rows.iter()
                .filter_map(|row| row.as_object().cloned())
                .collect()
        })
        .unwrap_or_default();
    let total = body
        .get("meta")
        .and_then(|meta| meta.get("total"))
        .or_else(|| body.get("total_count"))
        .and_then(Value::as_u64);
    TabularPage { rows, total }
}

fn parse_datetime(value: Option<&Value>) -> Option<DateTime<Utc>> {
    value
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

#[async_trait]
impl TabularClient for HttpTabularClient {
    async fn fetch_page(
        &self,
        resource_id: &str,
        filters: &[(String, String)],
        page: u32,
        page_size: u32,
    ) -> Result<PageOutcome> {
        let url = format!("{}/resources/{}/data/", self.tabular_base, resource_id);
        let mut query: Vec<(String, String)> = filters.to_vec();
        query.push(("page".to_string(), page.to_string()));
        query.push(("page_size".to_string(), page_size.to_string()));

        debug!(resource_id, page, "fetching tabular page");
        let response = self.client.get(&url).query(&query).send().await?;
        let status = response.status();

        // Fixed pacing under the upstream's implicit rate limits.
        tokio::time::sleep(self.request_delay).await;

        if !status.is_success() {
            return Ok(PageOutcome::Status(status.as_u16()));
        }
        let body: Value = response.json().await?;
        Ok(PageOutcome::Page(parse_page(body)))
    }

    async fn resource_created_at(&self, resource_id: &str) -> Result<Option<DateTime<Utc>>> {
        let url = format!("{}/resources/{}/", self.tabular_base, resource_id);
        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Ok(None);
        }
        let body: Value = response.json().await?;
        Ok(parse_datetime(body.get("created_at")))
    }

    async fn dataset_last_update(&self, dataset_id: &str) -> Result<Option<DateTime<Utc>>> {
        let url = format!("{}/datasets/{}/", self.datagouv_base, dataset_id);
        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Ok(None);
        }
        let body: Value = response.json().await?;
        Ok(parse_datetime(body.get("last_update")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_page_meta_total() {
        let page = parse_page(json!({"data": [{"a": 1}], "meta": {"total": 125}}));
        assert_eq!(page.rows.len(), 1);
        assert_eq!(page.total, Some(125));
    }

    #[test]
    fn test_parse_page_total_count_fallback() {
        let page = parse_page(json!({"data": [], "total_count": 7}));
        assert_eq!(page.total, Some(7));
    }

    #[test]
    fn test_parse_page_no_total() {
        let page = parse_page(json!({"data": [{"a": 1}, {"b": 2}]}));
        assert_eq!(page.total, None);
        assert_eq!(page.rows.len(), 2);
    }
}
