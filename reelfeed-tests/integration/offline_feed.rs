//! Offline degradation of the feed source.

use std::sync::Arc;

use reelfeed_core::cache::OfflineCache;
use reelfeed_core::clock::ManualClock;
use reelfeed_core::config::ReelfeedConfig;
use reelfeed_core::feed::{FeedError, FeedSource, FeedType, PageOrigin};
use reelfeed_core::test_mocks::{MockConnectivity, MockFeedApi, MockGallery, descriptors, wire_page};

struct Fixture {
    api: Arc<MockFeedApi>,
    connectivity: Arc<MockConnectivity>,
    gallery: Arc<MockGallery>,
    source: FeedSource,
}

fn fixture() -> Fixture {
    let config = ReelfeedConfig::for_testing();
    let clock = ManualClock::shared();
    let api = Arc::new(MockFeedApi::new());
    let connectivity = Arc::new(MockConnectivity::online());
    let gallery = Arc::new(MockGallery::default());
    let cache = Arc::new(OfflineCache::in_memory(config.cache.clone(), clock.clone()));
    let source = FeedSource::new(api.clone(), cache, config.feed, &config.network, clock)
        .with_connectivity(connectivity.clone())
        .with_gallery(gallery.clone());

    Fixture {
        api,
        connectivity,
        gallery,
        source,
    }
}

#[tokio::test]
async fn test_offline_with_warm_cache_serves_cached_first_page() {
    let f = fixture();
    f.api.respond(1, Ok(wire_page("m", 10, true)));

    let online = f
        .source
        .fetch_page(1, 10, FeedType::Main, None, false)
        .await
        .unwrap();
    assert_eq!(online.origin, PageOrigin::Remote);
    assert!(online.has_more);

    f.connectivity.set_online(false);
    let offline = f
        .source
        .fetch_page(1, 10, FeedType::Main, None, false)
        .await
        .unwrap();

    assert_eq!(offline.origin, PageOrigin::Cache);
    assert_eq!(offline.videos.len(), 10);
    assert_eq!(offline.videos, online.videos);
    assert!(!offline.has_more);
    assert_eq!(f.api.request_count(), 1);
}

#[tokio::test]
async fn test_offline_cold_cache_falls_back_to_gallery_then_fails() {
    let f = fixture();
    f.connectivity.set_online(false);
    f.gallery.set_videos(descriptors("local", 4));

    let local = f
        .source
        .fetch_page(1, 10, FeedType::Trending, None, false)
        .await
        .unwrap();
    assert_eq!(local.origin, PageOrigin::Gallery);
    assert_eq!(local.videos.len(), 4);
    assert!(!local.has_more);

    f.gallery.set_videos(Vec::new());
    let error = f
        .source
        .fetch_page(1, 10, FeedType::Trending, None, false)
        .await
        .unwrap_err();
    assert!(matches!(error, FeedError::Network { .. }));
    assert_eq!(f.api.request_count(), 0);
}

#[tokio::test]
async fn test_transient_failures_on_first_page_degrade_to_cache() {
    let f = fixture();
    f.api.respond(1, Ok(wire_page("m", 10, true)));
    f.source
        .fetch_page(1, 10, FeedType::Main, None, false)
        .await
        .unwrap();

    f.api.respond(1, Err(FeedError::Timeout { seconds: 15 }));
    f.api.respond(
        1,
        Err(FeedError::Server {
            status: 503,
            reason: "unavailable".to_string(),
        }),
    );
    let page = f
        .source
        .fetch_page(1, 10, FeedType::Main, None, false)
        .await
        .unwrap();

    assert_eq!(page.origin, PageOrigin::Cache);
    assert_eq!(page.videos.len(), 10);
    assert_eq!(f.api.request_count(), 3);
}
