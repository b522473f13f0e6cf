//! Offset/limit pagination over listing endpoints.
//!
//! The automation platform reports the full result size in `meta.total`
//! (usually as a numeric string). Pages are requested with
//! `offset = page * page_size` until the offset passes that total, pausing
//! between pages to stay under the upstream rate limit.

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::error::{RemoteError, SyncError};
use crate::retry::RetryRunner;

/// Default number of items requested per page.
pub const DEFAULT_PAGE_SIZE: usize = 50;

/// Something that can fetch one page of a listing as raw JSON.
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn fetch_page(
        &self,
        endpoint: &str,
        params: &[(String, String)],
    ) -> Result<Value, RemoteError>;
}

/// One listing request: where, what to pull out, and how fast.
#[derive(Debug, Clone)]
pub struct PageRequest<'a> {
    pub endpoint: &'a str,
    /// Top-level key holding the page's items.
    pub result_key: &'a str,
    pub extra_params: Vec<(String, String)>,
    pub page_size: usize,
    /// Pause between consecutive pages.
    pub throttle: Duration,
}

impl<'a> PageRequest<'a> {
    pub fn new(endpoint: &'a str, result_key: &'a str) -> Self {
        Self {
            endpoint,
            result_key,
            extra_params: Vec::new(),
            page_size: DEFAULT_PAGE_SIZE,
            throttle: Duration::from_secs(1),
        }
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_params.push((key.into(), value.into()));
        self
    }

    pub fn page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn throttle(mut self, throttle: Duration) -> Self {
        self.throttle = throttle;
        self
    }
}

/// Fetch every item of a listing, in arrival order.
///
/// Each page goes through `retry`, decoding included. A page with no items
/// ends the listing even if the reported total was not reached.
pub async fn fetch_all<T, S>(
    source: &S,
    retry: &RetryRunner,
    request: &PageRequest<'_>,
    label: &str,
) -> Result<Vec<T>, SyncError>
where
    T: DeserializeOwned,
    S: PageSource + ?Sized,
{
    let mut items: Vec<T> = Vec::new();
    let mut offset = 0usize;

    loop {
        let mut params = request.extra_params.clone();
        params.push(("offset".to_string(), offset.to_string()));
        params.push(("limit".to_string(), request.page_size.to_string()));

        let params = &params;
        let (total, batch) = retry
            .run(label, || async move {
                let page = source.fetch_page(request.endpoint, params).await?;
                let batch = page_items::<T>(&page, request.result_key)?;
                Ok((parse_total(&page), batch))
            })
            .await?;

        let received = batch.len();
        items.extend(batch);
        offset += request.page_size;

        debug!(
            endpoint = request.endpoint,
            fetched = items.len(),
            total,
            "Fetched listing page"
        );

        if offset >= total || received == 0 {
            return Ok(items);
        }

        tokio::time::sleep(request.throttle).await;
    }
}

/// `meta.total` as an integer; missing or unparseable counts as zero.
pub fn parse_total(page: &Value) -> usize {
    match page.get("meta").and_then(|m| m.get("total")) {
        Some(Value::Number(n)) => n.as_u64().unwrap_or(0) as usize,
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0),
        _ => 0,
    }
}

fn page_items<T: DeserializeOwned>(page: &Value, result_key: &str) -> Result<Vec<T>, RemoteError> {
    match page.get(result_key) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(items) => serde_json::from_value(items.clone()).map_err(|e| {
            RemoteError::decode("activecampaign", format!("'{result_key}' items: {e}"))
        }),
    }
}
