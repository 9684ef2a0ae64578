//! TTL boundaries of the offline cache, in memory and on disk.

use std::time::Duration;

use reelfeed_core::cache::{CacheKey, OfflineCache};
use reelfeed_core::clock::{Clock, ManualClock};
use reelfeed_core::config::CacheConfig;
use reelfeed_core::feed::{FeedPage, FeedType, PageOrigin};
use reelfeed_core::test_mocks::descriptors;

const TTL: Duration = Duration::from_secs(600);

fn ttl_config() -> CacheConfig {
    CacheConfig {
        default_ttl: TTL,
        cleanup_interval: None,
        ..CacheConfig::default()
    }
}

fn page(clock: &ManualClock, count: usize) -> FeedPage {
    FeedPage {
        feed_type: FeedType::Main,
        page: 1,
        videos: descriptors("c", count),
        has_more: true,
        fetched_at: clock.now(),
        origin: PageOrigin::Remote,
    }
}

#[tokio::test]
async fn test_entry_lives_until_ttl_and_is_evicted_after() {
    let clock = ManualClock::shared();
    let cache = OfflineCache::in_memory(ttl_config(), clock.clone());
    let key = CacheKey::new(FeedType::Main, 1).unwrap();
    let stored = page(&clock, 4);

    cache.put(key, stored.clone()).await.unwrap();

    clock.advance(TTL - Duration::from_secs(1));
    assert_eq!(cache.get(&key).await, Some(stored));

    clock.advance(Duration::from_secs(2));
    assert_eq!(cache.get(&key).await, None);

    let stats = cache.statistics().await;
    assert_eq!(stats.entries, 0);
    assert_eq!(stats.expirations, 1);
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);
}

#[tokio::test]
async fn test_series_outlive_the_default_ttl() {
    let clock = ManualClock::shared();
    let cache = OfflineCache::in_memory(ttl_config(), clock.clone());
    let main = CacheKey::new(FeedType::Main, 1).unwrap();
    let series = CacheKey::new(FeedType::Series, 1).unwrap();

    cache.put(main, page(&clock, 2)).await.unwrap();
    cache
        .put(
            series,
            FeedPage {
                feed_type: FeedType::Series,
                ..page(&clock, 2)
            },
        )
        .await
        .unwrap();

    clock.advance(TTL + Duration::from_secs(1));

    assert!(!cache.contains(&main).await);
    assert!(cache.contains(&series).await);
    assert_eq!(cache.purge_expired().await.unwrap(), 1);
}

#[tokio::test]
async fn test_file_store_survives_reopen_and_honours_ttl() {
    let dir = tempfile::tempdir().unwrap();
    let clock = ManualClock::shared();
    let config = CacheConfig {
        directory: Some(dir.path().to_path_buf()),
        ..ttl_config()
    };
    let key = CacheKey::new(FeedType::Main, 1).unwrap();
    let stored = page(&clock, 3);

    {
        let cache = OfflineCache::from_config(config.clone(), clock.clone())
            .await
            .unwrap();
        cache.put(key, stored.clone()).await.unwrap();
    }

    let reopened = OfflineCache::from_config(config, clock.clone()).await.unwrap();
    clock.advance(TTL - Duration::from_secs(1));
    assert_eq!(reopened.get(&key).await, Some(stored));

    clock.advance(Duration::from_secs(2));
    assert_eq!(reopened.get(&key).await, None);
    assert_eq!(reopened.statistics().await.entries, 0);
}
