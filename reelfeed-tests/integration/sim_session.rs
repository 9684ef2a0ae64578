//! Whole sessions against the deterministic simulation.

use std::sync::Arc;
use std::time::Duration;

use reelfeed_core::cache::OfflineCache;
use reelfeed_core::clock::ManualClock;
use reelfeed_core::config::ReelfeedConfig;
use reelfeed_core::feed::{FeedType, PageOrigin};
use reelfeed_core::playback::HandleState;
use reelfeed_core::session::FeedSession;
use reelfeed_sim::SimEnvironment;
use tokio_test::{assert_err, assert_ok};

struct Harness {
    config: ReelfeedConfig,
    env: SimEnvironment,
    clock: Arc<ManualClock>,
    cache: Arc<OfflineCache>,
}

impl Harness {
    fn new() -> Self {
        let config = ReelfeedConfig::for_testing();
        let env = SimEnvironment::new(&config.simulation);
        let clock = ManualClock::shared();
        let cache = Arc::new(OfflineCache::in_memory(config.cache.clone(), clock.clone()));
        Self {
            config,
            env,
            clock,
            cache,
        }
    }

    fn session(&self) -> FeedSession {
        self.env.session(
            &self.config,
            FeedType::Main,
            self.cache.clone(),
            self.clock.clone(),
        )
    }
}

#[tokio::test]
async fn test_scrolling_the_whole_catalog() {
    let harness = Harness::new();
    let session = harness.session();
    let catalog = harness.config.simulation.catalog_size;

    let first = session.start().await.unwrap();
    assert_eq!(first.origin, PageOrigin::Remote);

    let mut index = 0;
    while index < session.pool().feed_len().await {
        session.scroll_to(index).await.unwrap();
        session.pool().settle().await;
        assert!(session.play_current().await.unwrap());

        let stats = session.pool().statistics().await;
        assert!(stats.active_handles <= harness.config.playback.max_active_decoders);

        harness.clock.advance(Duration::from_secs(2));
        session.pool().sweep().await;
        index += 1;
    }

    let stats = session.statistics().await;
    assert_eq!(stats.pool.feed_len, catalog);
    assert_eq!(stats.pages_loaded, 3);
    assert!(!stats.has_more);
    assert!(!stats.offline);

    let audit = harness.env.decoder.audit();
    assert!(audit.peak_live <= 3);
    assert_eq!(audit.double_releases, 0);
    assert_eq!(audit.commands_after_release, 0);

    session.shutdown().await;
    assert_eq!(harness.env.decoder.audit().live, 0);
    assert_err!(session.scroll_to(0).await);
}

#[tokio::test]
async fn test_decoder_error_disposes_only_the_failing_video() {
    let harness = Harness::new();
    let session = harness.session();
    session.start().await.unwrap();
    session.scroll_to(1).await.unwrap();
    session.pool().settle().await;
    session.play_current().await.unwrap();

    let failing = session.pool().video_at(1).await.unwrap();
    let neighbour = session.pool().video_at(2).await.unwrap();
    let uri = failing.media_url.clone().unwrap();
    let handle = harness.env.decoder.handle_for(&uri).unwrap();

    harness.env.decoder.emit_error(handle, "stream corrupted");
    for _ in 0..100 {
        if session.pool().handle_state(&failing.id).await.is_none() {
            break;
        }
        tokio::task::yield_now().await;
    }

    assert_eq!(session.pool().handle_state(&failing.id).await, None);
    assert_eq!(
        session.pool().handle_state(&neighbour.id).await,
        Some(HandleState::Ready)
    );
    assert!(session.pool().statistics().await.playing.is_none());
    session.shutdown().await;
}

#[tokio::test]
async fn test_offline_session_replays_the_cached_first_page() {
    let harness = Harness::new();

    let online = harness.session();
    let loaded = online.start().await.unwrap();
    online.shutdown().await;

    harness.env.connectivity.set_online(false);
    let requests = harness.env.api.request_count();
    let offline = harness.session();
    let summary = offline.start().await.unwrap();

    assert_eq!(summary.origin, PageOrigin::Cache);
    assert_eq!(summary.appended, loaded.appended);
    assert!(!summary.has_more);
    assert!(assert_ok!(offline.load_next_page().await).is_none());
    assert!(offline.statistics().await.offline);
    assert_eq!(harness.env.api.request_count(), requests);
    offline.shutdown().await;
}

#[tokio::test]
async fn test_same_seed_same_feed() {
    let first = Harness::new();
    let second = Harness::new();
    let a = first.session();
    let b = second.session();

    a.start().await.unwrap();
    b.start().await.unwrap();

    assert_eq!(a.pool().feed_ids().await, b.pool().feed_ids().await);
    a.shutdown().await;
    b.shutdown().await;
}
