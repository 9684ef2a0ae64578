//! The decoder cap holds however the viewer scrolls.

use std::sync::Arc;

use proptest::prelude::*;
use reelfeed_core::clock::ManualClock;
use reelfeed_core::config::ReelfeedConfig;
use reelfeed_core::playback::PlaybackResourcePool;
use reelfeed_core::test_mocks::descriptors;
use reelfeed_sim::SimDecoderBackend;

const FEED_LEN: usize = 40;

/// Visits every index in order, playing each, and returns the highest
/// number of live handles the pool reported.
async fn scroll(indices: &[usize]) -> (usize, Arc<SimDecoderBackend>) {
    let config = ReelfeedConfig::for_testing().playback;
    let cap = config.max_active_decoders;
    let backend = Arc::new(SimDecoderBackend::new(17));
    let pool = PlaybackResourcePool::new(backend.clone(), config, ManualClock::shared());
    pool.append(descriptors("c", FEED_LEN)).await;

    let mut peak = 0;
    for &index in indices {
        pool.preload_window(index).await.unwrap();
        pool.settle().await;
        pool.play(index).await.unwrap();

        let stats = pool.statistics().await;
        assert!(stats.active_handles <= cap, "{} active at {}", stats.active_handles, index);
        assert!(stats.live_handles <= cap, "{} live at {}", stats.live_handles, index);
        peak = peak.max(stats.live_handles);
    }

    pool.shutdown().await;
    (peak, backend)
}

#[tokio::test]
async fn test_jumps_never_exceed_the_cap() {
    let (peak, backend) = scroll(&[0, 1, 2, 3, 10, 11, 9, 25, 24, 26, 39, 38, 0, 5]).await;

    let audit = backend.audit();
    assert_eq!(peak, 3);
    assert!(audit.peak_live <= 3);
    assert_eq!(audit.live, 0);
    assert_eq!(audit.initialized, audit.released);
    assert_eq!(audit.double_releases, 0);
    assert_eq!(audit.commands_after_release, 0);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn test_random_scrolls_respect_the_cap(indices in prop::collection::vec(0..FEED_LEN, 1..30)) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let (_, backend) = runtime.block_on(scroll(&indices));

        let audit = backend.audit();
        prop_assert!(audit.peak_live <= 3);
        prop_assert_eq!(audit.live, 0);
        prop_assert_eq!(audit.double_releases, 0);
        prop_assert_eq!(audit.commands_after_release, 0);
    }
}
