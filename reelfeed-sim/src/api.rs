//! Simulated remote feed API.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use reelfeed_core::feed::{FeedApi, FeedError, FeedRequest, FeedResponse, FeedType};

use crate::catalog::SimCatalog;

/// Feed API serving pages out of a [`SimCatalog`].
///
/// Responses pass through JSON so the wire format is exercised end to end.
/// With session dedup enabled the server hides records it already served
/// until a request carries `clear_session`.
pub struct SimFeedApi {
    catalogs: HashMap<FeedType, SimCatalog>,
    fallback: SimCatalog,
    latency: Duration,
    session_dedup: bool,
    shown: Mutex<HashSet<String>>,
    scripted_failures: Mutex<VecDeque<FeedError>>,
    offline: AtomicBool,
    requests: AtomicUsize,
}

impl SimFeedApi {
    /// Serves `catalog` for every feed type.
    pub fn new(catalog: SimCatalog) -> Self {
        Self {
            catalogs: HashMap::new(),
            fallback: catalog,
            latency: Duration::ZERO,
            session_dedup: false,
            shown: Mutex::new(HashSet::new()),
            scripted_failures: Mutex::new(VecDeque::new()),
            offline: AtomicBool::new(false),
            requests: AtomicUsize::new(0),
        }
    }

    /// Serves a dedicated catalog for one feed type.
    pub fn with_feed(mut self, feed_type: FeedType, catalog: SimCatalog) -> Self {
        self.catalogs.insert(feed_type, catalog);
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Hides already served records until a session is cleared.
    pub fn with_session_dedup(mut self, enabled: bool) -> Self {
        self.session_dedup = enabled;
        self
    }

    /// Fails the next request with `error`; queued failures apply in order.
    pub fn fail_next(&self, error: FeedError) {
        self.scripted_failures.lock().push_back(error);
    }

    /// While offline every request fails with a network error.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    fn catalog_for(&self, feed_type: FeedType) -> &SimCatalog {
        self.catalogs.get(&feed_type).unwrap_or(&self.fallback)
    }

    fn respond(&self, request: &FeedRequest) -> Result<FeedResponse, FeedError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(FeedError::Network {
                reason: "simulated network unreachable".to_string(),
            });
        }
        if let Some(error) = self.scripted_failures.lock().pop_front() {
            return Err(error);
        }

        let mut response = self
            .catalog_for(request.feed_type)
            .page(request.page, request.limit);

        if self.session_dedup {
            let mut shown = self.shown.lock();
            if request.clear_session {
                tracing::debug!("Simulated server cleared {} shown records", shown.len());
                shown.clear();
            }
            response.videos.retain(|video| shown.insert(video.id.clone()));
        }

        let encoded = serde_json::to_vec(&response).map_err(|e| FeedError::Data {
            reason: e.to_string(),
        })?;
        serde_json::from_slice(&encoded).map_err(|e| FeedError::Data {
            reason: e.to_string(),
        })
    }
}

#[async_trait]
impl FeedApi for SimFeedApi {
    async fn fetch_feed(&self, request: &FeedRequest) -> Result<FeedResponse, FeedError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let result = self.respond(request);
        match &result {
            Ok(response) => tracing::trace!(
                "Simulated {} page {}: {} videos, has_more={}",
                request.feed_type,
                request.page,
                response.videos.len(),
                response.has_more
            ),
            Err(e) => tracing::trace!("Simulated {} page {} failed: {}", request.feed_type, request.page, e),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(page: u32, clear_session: bool) -> FeedRequest {
        FeedRequest {
            page,
            limit: 5,
            feed_type: FeedType::Main,
            device_id: "sim-device".to_string(),
            platform: "linux".to_string(),
            clear_session,
            auth_token: None,
        }
    }

    #[tokio::test]
    async fn test_serves_catalog_pages() {
        let api = SimFeedApi::new(SimCatalog::generate(1, 12));

        let second = api.fetch_feed(&request(2, false)).await.unwrap();
        let third = api.fetch_feed(&request(3, false)).await.unwrap();

        assert_eq!(second.videos[0].id, "sim-0005");
        assert!(second.has_more);
        assert_eq!(third.videos.len(), 2);
        assert!(!third.has_more);
        assert_eq!(api.request_count(), 2);
    }

    #[tokio::test]
    async fn test_session_dedup_until_cleared() {
        let api = SimFeedApi::new(SimCatalog::generate(1, 12)).with_session_dedup(true);

        assert_eq!(api.fetch_feed(&request(1, false)).await.unwrap().videos.len(), 5);
        assert!(api.fetch_feed(&request(1, false)).await.unwrap().videos.is_empty());
        assert_eq!(api.fetch_feed(&request(1, true)).await.unwrap().videos.len(), 5);
    }

    #[tokio::test]
    async fn test_scripted_failures_then_recovery() {
        let api = SimFeedApi::new(SimCatalog::generate(1, 12));
        api.fail_next(FeedError::Timeout { seconds: 15 });

        assert_eq!(
            api.fetch_feed(&request(1, false)).await.unwrap_err(),
            FeedError::Timeout { seconds: 15 }
        );
        assert!(api.fetch_feed(&request(1, false)).await.is_ok());

        api.set_offline(true);
        assert!(matches!(
            api.fetch_feed(&request(1, false)).await,
            Err(FeedError::Network { .. })
        ));
    }
}
