//! Multi-page retrieval of one logical dataset.
//!
//! Walks successive pages until the advertised total is reached, a page
//! comes back empty, or the page ceiling is hit. A non-success status on the
//! first page is fatal; on later pages it degrades to a partial result, which
//! is what lets declaration-year resources that do not exist yet fail softly.

use serde_json::{Map, Value};
use tracing::{info, warn};

use super::client::{PageOutcome, TabularClient};
use crate::cancel::CancelToken;
use crate::error::{Result, SpeError};

/// Progress signal emitted after every page. Purely observational.
#[derive(Debug, Clone, Copy)]
pub struct FetchProgress {
    pub fetched: usize,
    pub total: u64,
    pub page: u32,
}

#[derive(Debug, Default)]
pub struct FetchOutcome {
    pub rows: Vec<Map<String, Value>>,
    pub total: u64,
    /// True when pagination stopped early on a later-page failure.
    pub partial: bool,
    /// Resource id that answered the first page.
    pub resource_id: String,
}

pub struct PageFetcher<'a> {
    client: &'a dyn TabularClient,
    page_ceiling: u32,
}

impl<'a> PageFetcher<'a> {
    pub fn new(client: &'a dyn TabularClient, page_ceiling: u32) -> Self {
        Self {
            client,
            page_ceiling,
        }
    }

    /// Fetch every page of the first resource in `resource_ids` that accepts
    /// the request. The chain exists because the upstream periodically
    /// deprecates one file format for another.
    pub async fn fetch_all(
        &self,
        resource_ids: &[String],
        filters: &[(String, String)],
        page_size: u32,
        cancel: &CancelToken,
        mut progress: impl FnMut(FetchProgress),
    ) -> Result<FetchOutcome> {
        let (resource_id, first_page) = self.first_page(resource_ids, filters, page_size).await?;

        let mut total = first_page.total.unwrap_or(first_page.rows.len() as u64);
        let mut rows = first_page.rows;
        let mut partial = false;
        let mut page = 1u32;
        progress(FetchProgress {
            fetched: rows.len(),
            total,
            page,
        });

        while (rows.len() as u64) < total && page < self.page_ceiling {
            if cancel.is_cancelled() {
                return Err(SpeError::Cancelled);
            }
            page += 1;
            match self
                .client
                .fetch_page(&resource_id, filters, page, page_size)
                .await
            {
                Ok(PageOutcome::Page(next)) => {
                    if next.rows.is_empty() {
                        // Defensive stop: the advertised total was inconsistent.
                        warn!(resource_id, page, "empty page before advertised total");
                        break;
                    }
                    if let Some(t) = next.total {
                        total = t;
                    }
                    rows.extend(next.rows);
                }
                Ok(PageOutcome::Status(status)) => {
                    warn!(resource_id, page, status, "pagination stopped, keeping partial rows");
                    partial = true;
                    break;
                }
                Err(err) => {
                    warn!(resource_id, page, error = %err, "pagination stopped, keeping partial rows");
                    partial = true;
                    break;
                }
            }
            progress(FetchProgress {
                fetched: rows.len(),
                total,
                page,
            });
        }

        info!(
            resource_id,
            rows = rows.len(),
            total,
            partial,
            "dataset fetched"
        );
        Ok(FetchOutcome {
            rows,
            total,
            partial,
            resource_id,
        })
    }

    /// First page across the resource chain. The first resource to answer
    /// with a success status wins; exhausting the chain is a hard failure
    /// carrying the last status.
    async fn first_page(
        &self,
        resource_ids: &[String],
        filters: &[(String, String)],
        page_size: u32,
    ) -> Result<(String, super::client::TabularPage)> {
        let mut last_status = 0u16;
        let mut last_error: Option<SpeError> = None;
        for (i, resource_id) in resource_ids.iter().enumerate() {
            match self.client.fetch_page(resource_id, filters, 1, page_size).await {
                Ok(PageOutcome::Page(page)) => return Ok((resource_id.clone(), page)),
                Ok(PageOutcome::Status(status)) => {
                    warn!(resource_id, status, "resource rejected first page");
                    last_status = status;
                }
                Err(err) => {
                    if i + 1 == resource_ids.len() && last_status == 0 {
                        return Err(err);
                    }
                    last_error = Some(err);
                }
            }
        }
        if last_status != 0 {
            Err(SpeError::FirstPage {
                status: last_status,
            })
        } else {
            Err(last_error.unwrap_or(SpeError::FirstPage { status: 0 }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tabular::client::TabularPage;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fake upstream advertising `total` rows across fixed-size pages.
    struct FakeTabular {
        total: u64,
        page_size: u32,
        requests: AtomicUsize,
        /// Pages (1-based) that answer with this status instead of data.
        failing_pages: Vec<(u32, u16)>,
        /// Resources that reject every request with this status.
        dead_resources: Vec<(String, u16)>,
    }

    impl FakeTabular {
        fn new(total: u64, page_size: u32) -> Self {
            Self {
                total,
                page_size,
                requests: AtomicUsize::new(0),
                failing_pages: Vec::new(),
                dead_resources: Vec::new(),
            }
        }
    }

    #[async_trait]
    impl TabularClient for FakeTabular {
        async fn fetch_page(
            &self,
            resource_id: &str,
            _filters: &[(String, String)],
            page: u32,
            _page_size: u32,
        ) -> Result<PageOutcome> {
            self.requests.fetch_add(1, Ordering::SeqCst);
            if let Some((_, status)) = self
                .dead_resources
                .iter()
                .find(|(id, _)| id == resource_id)
            {
                return Ok(PageOutcome::Status(*status));
            }
            if let Some((_, status)) = self.failing_pages.iter().find(|(p, _)| *p == page) {
                return Ok(PageOutcome::Status(*status));
            }
            let start = u64::from(page - 1) * u64::from(self.page_size);
            let end = (start + u64::from(self.page_size)).min(self.total);
            let rows = (start..end)
                .map(|i| {
                    json!({"id": i, "name": format!("site {i}")})
                        .as_object()
                        .cloned()
                        .unwrap()
                })
                .collect();
            Ok(PageOutcome::Page(TabularPage {
                rows,
                total: Some(self.total),
            }))
        }

        async fn resource_created_at(&self, _: &str) -> Result<Option<DateTime<Utc>>> {
            Ok(None)
        }

        async fn dataset_last_update(&self, _: &str) -> Result<Option<DateTime<Utc>>> {
            Ok(None)
        }
    }

    fn ids(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_fetch_all_exact_page_count() {
        let client = FakeTabular::new(125, 50);
        let fetcher = PageFetcher::new(&client, 100);
        let mut pages_seen = Vec::new();
        let outcome = fetcher
            .fetch_all(&ids(&["r1"]), &[], 50, &CancelToken::new(), |p| {
                pages_seen.push(p.page)
            })
            .await
            .unwrap();
        assert_eq!(outcome.rows.len(), 125);
        assert_eq!(outcome.total, 125);
        assert!(!outcome.partial);
        assert_eq!(client.requests.load(Ordering::SeqCst), 3);
        assert_eq!(pages_seen, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_first_page_failure_is_hard() {
        let mut client = FakeTabular::new(10, 50);
        client.failing_pages.push((1, 500));
        let fetcher = PageFetcher::new(&client, 100);
        let err = fetcher
            .fetch_all(&ids(&["r1"]), &[], 50, &CancelToken::new(), |_| {})
            .await
            .unwrap_err();
        assert!(matches!(err, SpeError::FirstPage { status: 500 }));
    }

    #[tokio::test]
    async fn test_later_page_failure_is_partial() {
        let mut client = FakeTabular::new(125, 50);
        client.failing_pages.push((3, 404));
        let fetcher = PageFetcher::new(&client, 100);
        let outcome = fetcher
            .fetch_all(&ids(&["r1"]), &[], 50, &CancelToken::new(), |_| {})
            .await
            .unwrap();
        assert_eq!(outcome.rows.len(), 100);
        assert!(outcome.partial);
    }

    #[tokio::test]
    async fn test_resource_fallback_chain() {
        let mut client = FakeTabular::new(30, 50);
        client.dead_resources.push(("old".to_string(), 404));
        let fetcher = PageFetcher::new(&client, 100);
        let outcome = fetcher
            .fetch_all(&ids(&["old", "new"]), &[], 50, &CancelToken::new(), |_| {})
            .await
            .unwrap();
        assert_eq!(outcome.resource_id, "new");
        assert_eq!(outcome.rows.len(), 30);
    }

    #[tokio::test]
    async fn test_page_ceiling_terminates_normally() {
        let client = FakeTabular::new(1_000, 50);
        let fetcher = PageFetcher::new(&client, 3);
        let outcome = fetcher
            .fetch_all(&ids(&["r1"]), &[], 50, &CancelToken::new(), |_| {})
            .await
            .unwrap();
        assert_eq!(outcome.rows.len(), 150);
        assert!(!outcome.partial);
    }

    #[tokio::test]
    async fn test_cancelled_between_pages() {
        let client = FakeTabular::new(125, 50);
        let fetcher = PageFetcher::new(&client, 100);
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = fetcher
            .fetch_all(&ids(&["r1"]), &[], 50, &cancel, |_| {})
            .await
            .unwrap_err();
        assert!(matches!(err, SpeError::Cancelled));
    }
}
