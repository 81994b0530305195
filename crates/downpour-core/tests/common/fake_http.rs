//! In-memory HTTP engine for integration tests.
//!
//! Serves static bodies keyed by full URL, records every probe and range
//! request, and can inject scripted failures or stall a stream forever to
//! hold a task mid-download.

use downpour_core::error::DownloadError;
use downpour_core::http::{ByteStream, HttpEngine, ResourceInfo};
use futures::stream::{self, StreamExt};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

pub struct FakeResource {
    body: Vec<u8>,
    accept_ranges: bool,
    advertise_length: bool,
    chunk_size: usize,
    /// Bytes a fetch may stream before the stream hangs forever.
    stall_after: Option<usize>,
    /// Errors handed out first, one per fetch call.
    fail_queue: Mutex<VecDeque<DownloadError>>,
}

impl FakeResource {
    pub fn push_failure(&self, error: DownloadError) {
        self.fail_queue.lock().unwrap().push_back(error);
    }

    pub fn push_failures(&self, error: DownloadError, count: usize) {
        let mut q = self.fail_queue.lock().unwrap();
        for _ in 0..count {
            q.push_back(error.clone());
        }
    }

    pub fn clear_failures(&self) {
        self.fail_queue.lock().unwrap().clear();
    }
}

#[derive(Default)]
pub struct FakeHttpEngine {
    resources: Mutex<HashMap<String, Arc<FakeResource>>>,
    probes: Mutex<Vec<String>>,
    ranges: Mutex<Vec<(String, Option<(u64, u64)>)>>,
}

impl FakeHttpEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Range-capable resource with a known length.
    pub fn serve(&self, url: &str, body: Vec<u8>) -> Arc<FakeResource> {
        self.serve_with(url, body, true, true, None)
    }

    /// Resource whose streams emit `stall_after` bytes and then hang until
    /// the engine interrupts them.
    pub fn serve_stalled(&self, url: &str, body: Vec<u8>, stall_after: usize) -> Arc<FakeResource> {
        self.serve_with(url, body, true, true, Some(stall_after))
    }

    pub fn serve_with(
        &self,
        url: &str,
        body: Vec<u8>,
        accept_ranges: bool,
        advertise_length: bool,
        stall_after: Option<usize>,
    ) -> Arc<FakeResource> {
        let res = Arc::new(FakeResource {
            body,
            accept_ranges,
            advertise_length,
            chunk_size: 256,
            stall_after,
            fail_queue: Mutex::new(VecDeque::new()),
        });
        self.resources
            .lock()
            .unwrap()
            .insert(url.to_string(), res.clone());
        res
    }

    pub fn probe_count(&self, url: &str) -> usize {
        self.probes.lock().unwrap().iter().filter(|u| *u == url).count()
    }

    /// Ranges requested for `url`, in request order.
    pub fn recorded_ranges(&self, url: &str) -> Vec<Option<(u64, u64)>> {
        self.ranges
            .lock()
            .unwrap()
            .iter()
            .filter(|(u, _)| u == url)
            .map(|(_, r)| *r)
            .collect()
    }

    fn resource(&self, url: &str) -> Result<Arc<FakeResource>, DownloadError> {
        self.resources
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or(DownloadError::Http {
                code: 404,
                retry_after: None,
            })
    }
}

#[async_trait::async_trait]
impl HttpEngine for FakeHttpEngine {
    async fn probe(
        &self,
        url: &str,
        _headers: &HashMap<String, String>,
    ) -> Result<ResourceInfo, DownloadError> {
        let res = self.resource(url)?;
        self.probes.lock().unwrap().push(url.to_string());
        Ok(ResourceInfo {
            content_length: res.advertise_length.then_some(res.body.len() as u64),
            accept_ranges: res.accept_ranges,
            etag: Some("fake-etag".into()),
            last_modified: None,
        })
    }

    async fn fetch_range(
        &self,
        url: &str,
        _headers: &HashMap<String, String>,
        range: Option<(u64, u64)>,
    ) -> Result<ByteStream, DownloadError> {
        let res = self.resource(url)?;
        self.ranges.lock().unwrap().push((url.to_string(), range));
        if let Some(error) = res.fail_queue.lock().unwrap().pop_front() {
            return Err(error);
        }

        let slice: Vec<u8> = match range {
            Some((start, end)) => {
                let start = start as usize;
                let end = ((end as usize) + 1).min(res.body.len());
                if start >= end {
                    Vec::new()
                } else {
                    res.body[start..end].to_vec()
                }
            }
            None => res.body.clone(),
        };
        let emitted = match res.stall_after {
            Some(n) => slice[..n.min(slice.len())].to_vec(),
            None => slice,
        };

        let chunks: Vec<Result<Vec<u8>, DownloadError>> = emitted
            .chunks(res.chunk_size)
            .map(|c| Ok(c.to_vec()))
            .collect();
        let body = stream::iter(chunks);
        if res.stall_after.is_some() {
            Ok(body.chain(stream::pending()).boxed())
        } else {
            Ok(body.boxed())
        }
    }
}
