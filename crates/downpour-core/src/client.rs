//! Bundled `HttpEngine` implementation over reqwest.
//!
//! Follows redirects, applies per-request custom headers, and classifies
//! every failure into `DownloadError`. `Retry-After` is parsed only for
//! HTTP 429, matching the retry policy's override rule.

use crate::error::DownloadError;
use crate::http::{ByteStream, HttpEngine, ResourceInfo};
use crate::planner::OPEN_END;
use async_trait::async_trait;
use futures::StreamExt;
use std::collections::HashMap;
use std::time::Duration;

/// Real HTTP engine backed by a shared `reqwest::Client`.
pub struct ReqwestEngine {
    client: reqwest::Client,
}

impl ReqwestEngine {
    pub fn new() -> Result<Self, DownloadError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(15))
            .build()
            .map_err(map_transport)?;
        Ok(Self { client })
    }

    /// Wrap an existing client (shared pools, custom TLS, proxies).
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    fn apply_headers(
        mut req: reqwest::RequestBuilder,
        headers: &HashMap<String, String>,
    ) -> reqwest::RequestBuilder {
        for (name, value) in headers {
            req = req.header(name.trim(), value.trim());
        }
        req
    }
}

#[async_trait]
impl HttpEngine for ReqwestEngine {
    async fn probe(
        &self,
        url: &str,
        headers: &HashMap<String, String>,
    ) -> Result<ResourceInfo, DownloadError> {
        let req = Self::apply_headers(self.client.head(url), headers);
        let resp = req.send().await.map_err(map_transport)?;
        if !resp.status().is_success() {
            return Err(classify_status(&resp));
        }
        Ok(parse_resource_info(resp.headers()))
    }

    async fn fetch_range(
        &self,
        url: &str,
        headers: &HashMap<String, String>,
        range: Option<(u64, u64)>,
    ) -> Result<ByteStream, DownloadError> {
        let mut req = Self::apply_headers(self.client.get(url), headers);
        if let Some((start, end)) = range {
            let value = if end == OPEN_END {
                format!("bytes={}-", start)
            } else {
                format!("bytes={}-{}", start, end)
            };
            req = req.header(reqwest::header::RANGE, value);
        }
        let resp = req.send().await.map_err(map_transport)?;
        if !resp.status().is_success() {
            return Err(classify_status(&resp));
        }
        Ok(resp
            .bytes_stream()
            .map(|chunk| chunk.map(|b| b.to_vec()).map_err(map_transport))
            .boxed())
    }
}

fn map_transport(e: reqwest::Error) -> DownloadError {
    // Status errors are classified separately; everything reqwest reports
    // here is transport-level and retryable.
    DownloadError::network(e.to_string())
}

fn classify_status(resp: &reqwest::Response) -> DownloadError {
    let code = resp.status().as_u16();
    let retry_after = if code == 429 {
        resp.headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
    } else {
        None
    };
    DownloadError::Http { code, retry_after }
}

fn parse_resource_info(headers: &reqwest::header::HeaderMap) -> ResourceInfo {
    let header_str = |name: reqwest::header::HeaderName| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim().to_string())
    };
    ResourceInfo {
        content_length: header_str(reqwest::header::CONTENT_LENGTH)
            .and_then(|v| v.parse::<u64>().ok()),
        accept_ranges: header_str(reqwest::header::ACCEPT_RANGES)
            .is_some_and(|v| v.eq_ignore_ascii_case("bytes")),
        etag: header_str(reqwest::header::ETAG).map(|v| v.trim_matches('"').to_string()),
        last_modified: header_str(reqwest::header::LAST_MODIFIED),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{HeaderMap, HeaderValue};

    #[test]
    fn parse_length_ranges_and_validators() {
        let mut h = HeaderMap::new();
        h.insert("content-length", HeaderValue::from_static("12345"));
        h.insert("accept-ranges", HeaderValue::from_static("bytes"));
        h.insert("etag", HeaderValue::from_static("\"abc-123\""));
        h.insert(
            "last-modified",
            HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"),
        );
        let info = parse_resource_info(&h);
        assert_eq!(info.content_length, Some(12345));
        assert!(info.accept_ranges);
        assert_eq!(info.etag.as_deref(), Some("abc-123"));
        assert_eq!(
            info.last_modified.as_deref(),
            Some("Wed, 21 Oct 2015 07:28:00 GMT")
        );
        assert!(info.supports_resume());
    }

    #[test]
    fn parse_accept_ranges_none() {
        let mut h = HeaderMap::new();
        h.insert("content-length", HeaderValue::from_static("999"));
        h.insert("accept-ranges", HeaderValue::from_static("none"));
        let info = parse_resource_info(&h);
        assert_eq!(info.content_length, Some(999));
        assert!(!info.accept_ranges);
        assert!(!info.supports_resume());
    }

    #[test]
    fn parse_missing_headers() {
        let info = parse_resource_info(&HeaderMap::new());
        assert_eq!(info, ResourceInfo::default());
    }
}
