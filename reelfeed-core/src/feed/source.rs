//! Paginated feed retrieval with retry, offline fallback and a loop guard.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use super::api::{AlwaysOnline, Connectivity, FeedApi, FeedRequest};
use super::descriptor::{FeedPage, FeedResponse, PageOrigin, VideoDescriptor, VideoId};
use super::gallery::LocalGallery;
use super::{FeedError, FeedType};
use crate::cache::{CacheKey, OfflineCache};
use crate::clock::Clock;
use crate::config::{FeedConfig, NetworkConfig};

/// Pagination state for one feed type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PaginationGuard {
    /// Consecutive empty or errored batches for pages beyond the first
    pub empty_streak: u32,
    /// Further pages are not requested until the next page-1 fetch
    pub exhausted: bool,
}

/// Fetches feed pages from the remote API and degrades to cached or local
/// content when the network fails.
pub struct FeedSource {
    api: Arc<dyn FeedApi>,
    cache: Arc<OfflineCache>,
    gallery: Option<Arc<dyn LocalGallery>>,
    connectivity: Arc<dyn Connectivity>,
    config: FeedConfig,
    device_id: String,
    platform: String,
    clock: Arc<dyn Clock>,
    guards: Mutex<HashMap<FeedType, PaginationGuard>>,
}

impl FeedSource {
    /// Creates a source that assumes the device is always online and has no gallery.
    pub fn new(
        api: Arc<dyn FeedApi>,
        cache: Arc<OfflineCache>,
        config: FeedConfig,
        network: &NetworkConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            api,
            cache,
            gallery: None,
            connectivity: Arc::new(AlwaysOnline),
            config,
            device_id: network.device_id.clone(),
            platform: network.platform.to_string(),
            clock,
            guards: Mutex::new(HashMap::new()),
        }
    }

    /// Adds a local gallery used as the last offline fallback.
    pub fn with_gallery(mut self, gallery: Arc<dyn LocalGallery>) -> Self {
        self.gallery = Some(gallery);
        self
    }

    /// Replaces the connectivity probe.
    pub fn with_connectivity(mut self, connectivity: Arc<dyn Connectivity>) -> Self {
        self.connectivity = connectivity;
        self
    }

    pub fn config(&self) -> &FeedConfig {
        &self.config
    }

    /// Returns the pagination guard for a feed type.
    pub fn guard(&self, feed_type: FeedType) -> PaginationGuard {
        self.guards
            .lock()
            .get(&feed_type)
            .copied()
            .unwrap_or_default()
    }

    /// Forgets pagination state for a feed type.
    pub fn reset_guard(&self, feed_type: FeedType) {
        self.guards.lock().remove(&feed_type);
    }

    /// Fetches one page of the feed.
    ///
    /// Page 1 retries once on an empty result (with `clear_session` set) or
    /// a transient error, then falls back to the offline cache and the
    /// local gallery. Pages beyond the first stop being requested after
    /// `max_empty_batches` consecutive empty or errored batches.
    ///
    /// # Errors
    /// - `FeedError::Network` - Offline on page 1 with nothing cached or local
    /// - `FeedError::Server` - Server failure that no fallback could cover
    /// - `FeedError::Data` - Every descriptor in the response was invalid
    /// - `FeedError::Timeout` - Request timed out and no fallback could cover
    pub async fn fetch_page(
        &self,
        page: u32,
        page_size: u32,
        feed_type: FeedType,
        session_token: Option<&str>,
        clear_session: bool,
    ) -> Result<FeedPage, FeedError> {
        if page == 0 {
            return Err(FeedError::Data {
                reason: "page numbers start at 1".to_string(),
            });
        }

        if page == 1 {
            self.fetch_first_page(page_size, feed_type, session_token, clear_session)
                .await
        } else {
            self.fetch_later_page(page, page_size, feed_type, session_token, clear_session)
                .await
        }
    }

    async fn fetch_first_page(
        &self,
        page_size: u32,
        feed_type: FeedType,
        session_token: Option<&str>,
        clear_session: bool,
    ) -> Result<FeedPage, FeedError> {
        self.reset_guard(feed_type);

        if !self.connectivity.is_online().await {
            tracing::info!("Device offline, serving {} page 1 from fallback", feed_type);
            return self
                .offline_fallback(feed_type)
                .await
                .ok_or_else(|| FeedError::Network {
                    reason: "device is offline and no cached or local videos are available"
                        .to_string(),
                });
        }

        match self
            .request(1, page_size, feed_type, session_token, clear_session)
            .await
        {
            Ok(page) if !page.is_empty() => {
                self.remember(&page).await;
                Ok(page)
            }
            Ok(_) => {
                tracing::info!(
                    "{} page 1 came back empty, retrying once with a cleared session",
                    feed_type
                );
                match self
                    .request(1, page_size, feed_type, session_token, true)
                    .await
                {
                    Ok(page) if !page.is_empty() => {
                        self.remember(&page).await;
                        Ok(page)
                    }
                    Ok(_) => Ok(self.fallback_or_empty(feed_type).await),
                    Err(e) => {
                        tracing::warn!("Retry of {} page 1 failed: {}", feed_type, e);
                        Ok(self.fallback_or_empty(feed_type).await)
                    }
                }
            }
            Err(error) if error.is_transient() => {
                tracing::warn!("{} page 1 failed ({}), retrying once", feed_type, error);
                match self
                    .request(1, page_size, feed_type, session_token, clear_session)
                    .await
                {
                    Ok(page) if !page.is_empty() => {
                        self.remember(&page).await;
                        Ok(page)
                    }
                    Ok(_) => Ok(self.fallback_or_empty(feed_type).await),
                    Err(retry_error) => {
                        tracing::warn!("Retry of {} page 1 failed: {}", feed_type, retry_error);
                        self.offline_fallback(feed_type).await.ok_or(error)
                    }
                }
            }
            Err(error) => Err(error),
        }
    }

    async fn fetch_later_page(
        &self,
        page: u32,
        page_size: u32,
        feed_type: FeedType,
        session_token: Option<&str>,
        clear_session: bool,
    ) -> Result<FeedPage, FeedError> {
        if self.guard(feed_type).exhausted {
            tracing::debug!(
                "{} pagination exhausted, not requesting page {}",
                feed_type,
                page
            );
            return Ok(FeedPage::empty(
                feed_type,
                page,
                self.clock.now(),
                PageOrigin::Exhausted,
            ));
        }

        match self
            .request(page, page_size, feed_type, session_token, clear_session)
            .await
        {
            Ok(fetched) if !fetched.is_empty() => {
                self.guards.lock().insert(feed_type, PaginationGuard::default());
                self.remember(&fetched).await;
                Ok(fetched)
            }
            Ok(mut fetched) => {
                if self.record_empty_batch(feed_type, page) {
                    fetched.has_more = false;
                }
                Ok(fetched)
            }
            Err(error) => {
                tracing::warn!("{} page {} failed: {}", feed_type, page, error);
                if self.record_empty_batch(feed_type, page) {
                    Ok(FeedPage::empty(
                        feed_type,
                        page,
                        self.clock.now(),
                        PageOrigin::Exhausted,
                    ))
                } else {
                    Err(error)
                }
            }
        }
    }

    /// Counts an empty batch and reports whether the guard just tripped.
    fn record_empty_batch(&self, feed_type: FeedType, page: u32) -> bool {
        let mut guards = self.guards.lock();
        let guard = guards.entry(feed_type).or_default();
        guard.empty_streak += 1;

        if guard.empty_streak >= self.config.max_empty_batches {
            guard.exhausted = true;
            tracing::info!(
                "{} returned {} empty batches in a row (last page {}), stopping pagination",
                feed_type,
                guard.empty_streak,
                page
            );
            true
        } else {
            tracing::debug!(
                "{} page {} empty, streak {}",
                feed_type,
                page,
                guard.empty_streak
            );
            false
        }
    }

    async fn request(
        &self,
        page: u32,
        page_size: u32,
        feed_type: FeedType,
        session_token: Option<&str>,
        clear_session: bool,
    ) -> Result<FeedPage, FeedError> {
        let request = FeedRequest {
            page,
            limit: page_size,
            feed_type,
            device_id: self.device_id.clone(),
            platform: self.platform.clone(),
            clear_session,
            auth_token: session_token.map(str::to_string),
        };

        let response = self.api.fetch_feed(&request).await?;
        let has_more = response.has_more;
        let videos = self.convert_descriptors(feed_type, page, response)?;

        Ok(FeedPage {
            feed_type,
            page,
            videos,
            has_more,
            fetched_at: self.clock.now(),
            origin: PageOrigin::Remote,
        })
    }

    /// Converts wire records strictly, dropping or substituting invalid ones.
    fn convert_descriptors(
        &self,
        feed_type: FeedType,
        page: u32,
        response: FeedResponse,
    ) -> Result<Vec<VideoDescriptor>, FeedError> {
        let received = response.videos.len() + response.rejected.len();
        let mut videos = Vec::with_capacity(received);
        let mut invalid = 0usize;
        let mut last_error = None;

        let converted = response.videos.into_iter().map(|json| {
            let id = json.id.clone();
            (id, VideoDescriptor::try_from(json))
        });
        let rejected = response.rejected.into_iter().map(|record| {
            let error = FeedError::Data {
                reason: format!("malformed descriptor: {}", record.reason),
            };
            (record.id, Err::<VideoDescriptor, _>(error))
        });

        for (id, result) in converted.chain(rejected) {
            match result {
                Ok(descriptor) => videos.push(descriptor),
                Err(error) => {
                    invalid += 1;
                    if self.config.substitute_unavailable {
                        tracing::warn!(
                            "Substituting unavailable placeholder for {}: {}",
                            id,
                            error
                        );
                        let placeholder_id = if id.trim().is_empty() {
                            VideoId::new(format!("unavailable-{feed_type}-{page}-{invalid}"))
                        } else {
                            VideoId::new(id)
                        };
                        videos.push(VideoDescriptor::unavailable(
                            placeholder_id,
                            error.to_string(),
                        ));
                    } else {
                        tracing::warn!("Dropping invalid descriptor {:?}: {}", id, error);
                    }
                    last_error = Some(error);
                }
            }
        }

        if received > 0 && invalid == received {
            return Err(FeedError::Data {
                reason: format!(
                    "all {received} descriptors on {feed_type} page {page} were invalid: {}",
                    last_error.map(|e| e.to_string()).unwrap_or_default()
                ),
            });
        }

        Ok(videos)
    }

    async fn remember(&self, page: &FeedPage) {
        let key = match CacheKey::new(page.feed_type, page.page) {
            Ok(key) => key,
            Err(e) => {
                tracing::warn!("Not caching page: {}", e);
                return;
            }
        };
        if let Err(e) = self.cache.put(key, page.clone()).await {
            tracing::warn!("Failed to cache {}: {}", key, e);
        }
    }

    async fn fallback_or_empty(&self, feed_type: FeedType) -> FeedPage {
        match self.offline_fallback(feed_type).await {
            Some(page) => page,
            None => {
                tracing::info!("No fallback content for {}, showing empty feed", feed_type);
                FeedPage::empty(feed_type, 1, self.clock.now(), PageOrigin::Remote)
            }
        }
    }

    /// Cache first, then the local gallery. Fallback pages never report more.
    async fn offline_fallback(&self, feed_type: FeedType) -> Option<FeedPage> {
        if let Ok(key) = CacheKey::new(feed_type, 1)
            && let Some(mut cached) = self.cache.get(&key).await
            && !cached.is_empty()
        {
            tracing::info!(
                "Serving {} cached videos for {} page 1",
                cached.len(),
                feed_type
            );
            cached.has_more = false;
            cached.origin = PageOrigin::Cache;
            return Some(cached);
        }

        let gallery = self.gallery.as_ref()?;
        match gallery.list_videos(self.config.gallery_limit).await {
            Ok(videos) if !videos.is_empty() => {
                tracing::info!("Serving {} local gallery videos for {}", videos.len(), feed_type);
                Some(FeedPage {
                    feed_type,
                    page: 1,
                    videos,
                    has_more: false,
                    fetched_at: self.clock.now(),
                    origin: PageOrigin::Gallery,
                })
            }
            Ok(_) => None,
            Err(e) => {
                tracing::warn!("Local gallery unavailable: {}", e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::clock::ManualClock;
    use crate::config::CacheConfig;
    use crate::test_mocks::{MockConnectivity, MockFeedApi, MockGallery, descriptor, wire_page};

    struct Fixture {
        api: Arc<MockFeedApi>,
        cache: Arc<OfflineCache>,
        connectivity: Arc<MockConnectivity>,
        gallery: Arc<MockGallery>,
        source: FeedSource,
    }

    fn fixture(config: FeedConfig) -> Fixture {
        let clock = ManualClock::shared();
        let api = Arc::new(MockFeedApi::new());
        let cache = Arc::new(OfflineCache::in_memory(CacheConfig::default(), clock.clone()));
        let connectivity = Arc::new(MockConnectivity::online());
        let gallery = Arc::new(MockGallery::default());
        let source = FeedSource::new(
            api.clone(),
            cache.clone(),
            config,
            &NetworkConfig::default(),
            clock,
        )
        .with_connectivity(connectivity.clone())
        .with_gallery(gallery.clone());

        Fixture {
            api,
            cache,
            connectivity,
            gallery,
            source,
        }
    }

    #[tokio::test]
    async fn test_successful_page_is_cached() {
        let f = fixture(FeedConfig::default());
        f.api.respond(1, Ok(wire_page("a", 10, true)));

        let page = f.source.fetch_page(1, 10, FeedType::Main, None, false).await.unwrap();

        assert_eq!(page.len(), 10);
        assert!(page.has_more);
        assert_eq!(page.origin, PageOrigin::Remote);
        assert!(f.cache.contains(&CacheKey::new(FeedType::Main, 1).unwrap()).await);
    }

    #[tokio::test]
    async fn test_offline_serves_warm_cache_without_request() {
        let f = fixture(FeedConfig::default());
        f.api.respond(1, Ok(wire_page("a", 10, true)));
        f.source.fetch_page(1, 10, FeedType::Main, None, false).await.unwrap();

        f.connectivity.set_online(false);
        let page = f.source.fetch_page(1, 10, FeedType::Main, None, false).await.unwrap();

        assert_eq!(page.len(), 10);
        assert!(!page.has_more);
        assert_eq!(page.origin, PageOrigin::Cache);
        assert_eq!(f.api.request_count(), 1);
    }

    #[tokio::test]
    async fn test_offline_without_cache_uses_gallery_then_fails() {
        let f = fixture(FeedConfig::default());
        f.connectivity.set_online(false);

        let error = f
            .source
            .fetch_page(1, 10, FeedType::Main, None, false)
            .await
            .unwrap_err();
        assert!(matches!(error, FeedError::Network { .. }));

        f.gallery.set_videos(vec![descriptor("local-1"), descriptor("local-2")]);
        let page = f.source.fetch_page(1, 10, FeedType::Main, None, false).await.unwrap();
        assert_eq!(page.origin, PageOrigin::Gallery);
        assert_eq!(page.len(), 2);
        assert!(!page.has_more);
    }

    #[tokio::test]
    async fn test_empty_first_page_retries_with_cleared_session() {
        let f = fixture(FeedConfig::default());
        f.api.respond(1, Ok(wire_page("a", 0, true)));
        f.api.respond(1, Ok(wire_page("b", 4, true)));

        let page = f.source.fetch_page(1, 10, FeedType::Main, None, false).await.unwrap();

        let requests = f.api.requests();
        assert_eq!(requests.len(), 2);
        assert!(!requests[0].clear_session);
        assert!(requests[1].clear_session);
        assert_eq!(page.len(), 4);
    }

    #[tokio::test]
    async fn test_empty_first_page_twice_yields_empty_feed() {
        let f = fixture(FeedConfig::default());

        let page = f.source.fetch_page(1, 10, FeedType::Main, None, false).await.unwrap();

        assert!(page.is_empty());
        assert!(!page.has_more);
        assert_eq!(f.api.request_count(), 2);
    }

    #[tokio::test]
    async fn test_transient_error_retries_then_falls_back_to_cache() {
        let f = fixture(FeedConfig::default());
        f.api.respond(1, Ok(wire_page("a", 10, true)));
        f.source.fetch_page(1, 10, FeedType::Main, None, false).await.unwrap();

        f.api.respond(1, Err(FeedError::Timeout { seconds: 15 }));
        f.api.respond(
            1,
            Err(FeedError::Server {
                status: 503,
                reason: "busy".into(),
            }),
        );
        let page = f.source.fetch_page(1, 10, FeedType::Main, None, false).await.unwrap();

        assert_eq!(page.origin, PageOrigin::Cache);
        assert_eq!(f.api.request_count(), 3);
    }

    #[tokio::test]
    async fn test_transient_error_without_fallback_propagates_original() {
        let f = fixture(FeedConfig::default());
        f.api.respond(1, Err(FeedError::Timeout { seconds: 15 }));
        f.api.respond(
            1,
            Err(FeedError::Network {
                reason: "reset".into(),
            }),
        );

        let error = f
            .source
            .fetch_page(1, 10, FeedType::Main, None, false)
            .await
            .unwrap_err();

        assert_eq!(error, FeedError::Timeout { seconds: 15 });
    }

    #[tokio::test]
    async fn test_client_error_is_not_retried() {
        let f = fixture(FeedConfig::default());
        f.api.respond(
            1,
            Err(FeedError::Server {
                status: 401,
                reason: "unauthorized".into(),
            }),
        );

        assert!(f.source.fetch_page(1, 10, FeedType::Main, None, false).await.is_err());
        assert_eq!(f.api.request_count(), 1);
    }

    #[tokio::test]
    async fn test_three_empty_batches_stop_pagination() {
        let f = fixture(FeedConfig::default());
        f.api.respond(1, Ok(wire_page("a", 10, true)));
        f.source.fetch_page(1, 10, FeedType::Main, None, false).await.unwrap();

        for page in 2..=3 {
            f.api.respond(page, Ok(wire_page("x", 0, true)));
            let fetched = f.source.fetch_page(page, 10, FeedType::Main, None, false).await.unwrap();
            assert!(fetched.has_more);
        }
        f.api.respond(4, Ok(wire_page("x", 0, true)));
        let fourth = f.source.fetch_page(4, 10, FeedType::Main, None, false).await.unwrap();
        assert!(!fourth.has_more);

        let fifth = f.source.fetch_page(5, 10, FeedType::Main, None, false).await.unwrap();
        assert_eq!(fifth.origin, PageOrigin::Exhausted);
        assert!(!fifth.has_more);
        assert!(f.api.requests().iter().all(|r| r.page != 5));
    }

    #[tokio::test]
    async fn test_errored_batches_count_toward_guard_and_page_one_resets() {
        let f = fixture(FeedConfig::default());
        for page in 2..=4 {
            f.api.respond(
                page,
                Err(FeedError::Network {
                    reason: "flaky".into(),
                }),
            );
        }

        assert!(f.source.fetch_page(2, 10, FeedType::Trending, None, false).await.is_err());
        assert!(f.source.fetch_page(3, 10, FeedType::Trending, None, false).await.is_err());
        let tripped = f.source.fetch_page(4, 10, FeedType::Trending, None, false).await.unwrap();
        assert!(!tripped.has_more);
        assert!(f.source.guard(FeedType::Trending).exhausted);
        assert!(!f.source.guard(FeedType::Main).exhausted);

        f.api.respond(1, Ok(wire_page("t", 3, true)));
        f.source.fetch_page(1, 10, FeedType::Trending, None, false).await.unwrap();
        assert_eq!(f.source.guard(FeedType::Trending), PaginationGuard::default());
    }

    #[tokio::test]
    async fn test_non_empty_page_resets_streak() {
        let f = fixture(FeedConfig::default());
        f.api.respond(2, Ok(wire_page("x", 0, true)));
        f.api.respond(3, Ok(wire_page("y", 2, true)));

        f.source.fetch_page(2, 10, FeedType::Main, None, false).await.unwrap();
        assert_eq!(f.source.guard(FeedType::Main).empty_streak, 1);
        f.source.fetch_page(3, 10, FeedType::Main, None, false).await.unwrap();
        assert_eq!(f.source.guard(FeedType::Main).empty_streak, 0);
    }

    #[tokio::test]
    async fn test_invalid_descriptors_dropped_or_substituted() {
        let mut response = wire_page("a", 3, true);
        response.videos[1].video_url = "::broken::".to_string();

        let f = fixture(FeedConfig::default());
        f.api.respond(1, Ok(response.clone()));
        let page = f.source.fetch_page(1, 10, FeedType::Main, None, false).await.unwrap();
        assert_eq!(page.len(), 2);

        let f = fixture(FeedConfig {
            substitute_unavailable: true,
            ..FeedConfig::default()
        });
        f.api.respond(1, Ok(response));
        let page = f.source.fetch_page(1, 10, FeedType::Main, None, false).await.unwrap();
        assert_eq!(page.len(), 3);
        assert!(!page.videos[1].is_playable());
    }

    #[tokio::test]
    async fn test_malformed_record_only_costs_itself() {
        let mut wire = serde_json::to_value(wire_page("a", 2, true)).unwrap();
        wire["videos"]
            .as_array_mut()
            .unwrap()
            .push(serde_json::json!({"id": "broken", "name": "missing media"}));
        let response: FeedResponse = serde_json::from_value(wire).unwrap();

        let f = fixture(FeedConfig::default());
        f.api.respond(1, Ok(response.clone()));
        let page = f.source.fetch_page(1, 10, FeedType::Main, None, false).await.unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page.origin, PageOrigin::Remote);

        let f = fixture(FeedConfig {
            substitute_unavailable: true,
            ..FeedConfig::default()
        });
        f.api.respond(1, Ok(response));
        let page = f.source.fetch_page(1, 10, FeedType::Main, None, false).await.unwrap();
        assert_eq!(page.len(), 3);
        let placeholder = page.videos.iter().find(|v| v.id.as_str() == "broken").unwrap();
        assert!(!placeholder.is_playable());
    }

    #[tokio::test]
    async fn test_all_invalid_descriptors_is_data_error() {
        let mut response = wire_page("a", 2, true);
        for video in &mut response.videos {
            video.duration = -1.0;
        }
        let f = fixture(FeedConfig::default());
        f.api.respond(2, Ok(response));

        let error = f
            .source
            .fetch_page(2, 10, FeedType::Main, None, false)
            .await
            .unwrap_err();
        assert!(matches!(error, FeedError::Data { .. }));
    }

    #[tokio::test]
    async fn test_session_token_and_flags_forwarded() {
        let f = fixture(FeedConfig::default());
        f.api.respond(1, Ok(wire_page("a", 1, false)));

        tokio::time::timeout(
            Duration::from_secs(1),
            f.source.fetch_page(1, 7, FeedType::Series, Some("token-1"), true),
        )
        .await
        .unwrap()
        .unwrap();

        let request = &f.api.requests()[0];
        assert_eq!(request.limit, 7);
        assert_eq!(request.feed_type, FeedType::Series);
        assert_eq!(request.auth_token.as_deref(), Some("token-1"));
        assert!(request.clear_session);
        assert_eq!(request.platform, std::env::consts::OS);
    }
}
