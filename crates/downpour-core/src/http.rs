//! Abstract HTTP capability consumed by the engine.
//!
//! The engine never talks to a concrete client: the prober and segment
//! workers go through `HttpEngine`, which a real implementation (see
//! `client`) or a test double provides. All failures arrive as classified
//! `DownloadError`s, including status code and `Retry-After` for HTTP
//! responses.

use crate::error::DownloadError;
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Response body as a stream of chunks; chunk sizes are transport-defined.
pub type ByteStream = BoxStream<'static, Result<Vec<u8>, DownloadError>>;

/// Probe result: the headers needed for segment planning and safe resume.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceInfo {
    /// Total size in bytes, if `Content-Length` was present.
    pub content_length: Option<u64>,
    /// True if the server sent `Accept-Ranges: bytes`.
    pub accept_ranges: bool,
    /// `ETag` value, used as a resume validator.
    pub etag: Option<String>,
    /// `Last-Modified` value, used as a resume validator.
    pub last_modified: Option<String>,
}

impl ResourceInfo {
    /// A download can resume byte-exact only when the server supports ranges
    /// and the size is known and non-zero.
    pub fn supports_resume(&self) -> bool {
        self.accept_ranges && self.content_length.is_some_and(|n| n > 0)
    }
}

/// HTTP capability: a metadata probe and a ranged streaming GET.
#[async_trait]
pub trait HttpEngine: Send + Sync {
    /// HEAD-style probe for length, range support, and cache validators.
    async fn probe(
        &self,
        url: &str,
        headers: &HashMap<String, String>,
    ) -> Result<ResourceInfo, DownloadError>;

    /// Open a GET for `range` (inclusive bounds; `None` fetches the whole
    /// resource). The returned stream yields body chunks; errors mid-stream
    /// are classified like request errors.
    async fn fetch_range(
        &self,
        url: &str,
        headers: &HashMap<String, String>,
        range: Option<(u64, u64)>,
    ) -> Result<ByteStream, DownloadError>;
}
