//! Pagination stops after repeated empty batches.

use std::sync::Arc;

use reelfeed_core::cache::OfflineCache;
use reelfeed_core::clock::ManualClock;
use reelfeed_core::config::ReelfeedConfig;
use reelfeed_core::feed::{FeedSource, FeedType, PageOrigin};
use reelfeed_core::test_mocks::{MockFeedApi, wire_page};

fn source(api: Arc<MockFeedApi>) -> FeedSource {
    let config = ReelfeedConfig::for_testing();
    let clock = ManualClock::shared();
    let cache = Arc::new(OfflineCache::in_memory(config.cache.clone(), clock.clone()));
    FeedSource::new(api, cache, config.feed, &config.network, clock)
}

#[tokio::test]
async fn test_three_empty_pages_stop_pagination() {
    let api = Arc::new(MockFeedApi::new());
    api.respond(1, Ok(wire_page("p", 10, true)));
    for page in 2..=4 {
        api.respond(page, Ok(wire_page("p", 0, true)));
    }
    let source = source(api.clone());

    assert!(
        source
            .fetch_page(1, 10, FeedType::Main, None, false)
            .await
            .unwrap()
            .has_more
    );
    for page in 2..=3 {
        let empty = source
            .fetch_page(page, 10, FeedType::Main, None, false)
            .await
            .unwrap();
        assert!(empty.videos.is_empty());
        assert!(empty.has_more);
    }

    let fourth = source
        .fetch_page(4, 10, FeedType::Main, None, false)
        .await
        .unwrap();
    assert!(!fourth.has_more);
    assert!(source.guard(FeedType::Main).exhausted);

    let fifth = source
        .fetch_page(5, 10, FeedType::Main, None, false)
        .await
        .unwrap();
    assert_eq!(fifth.origin, PageOrigin::Exhausted);
    assert!(!fifth.has_more);
    assert!(api.requests().iter().all(|request| request.page != 5));
    assert_eq!(api.request_count(), 4);
}

#[tokio::test]
async fn test_non_empty_page_resets_the_streak() {
    let api = Arc::new(MockFeedApi::new());
    api.respond(1, Ok(wire_page("p", 10, true)));
    api.respond(2, Ok(wire_page("p", 0, true)));
    api.respond(3, Ok(wire_page("q", 5, true)));
    api.respond(4, Ok(wire_page("p", 0, true)));
    let source = source(api.clone());

    for page in 1..=4 {
        source
            .fetch_page(page, 10, FeedType::Main, None, false)
            .await
            .unwrap();
    }

    let guard = source.guard(FeedType::Main);
    assert_eq!(guard.empty_streak, 1);
    assert!(!guard.exhausted);
}

#[tokio::test]
async fn test_first_page_rearms_an_exhausted_feed() {
    let api = Arc::new(MockFeedApi::new());
    let source = source(api.clone());
    for page in 2..=4 {
        source
            .fetch_page(page, 10, FeedType::Following, None, false)
            .await
            .unwrap();
    }
    assert!(source.guard(FeedType::Following).exhausted);
    assert!(!source.guard(FeedType::Main).exhausted);

    api.respond(1, Ok(wire_page("f", 10, true)));
    source
        .fetch_page(1, 10, FeedType::Following, None, false)
        .await
        .unwrap();
    assert!(!source.guard(FeedType::Following).exhausted);
}
