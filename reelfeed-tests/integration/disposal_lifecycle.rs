//! Disposal of decoder handles as the preload window moves.

use std::sync::Arc;
use std::time::Duration;

use reelfeed_core::clock::ManualClock;
use reelfeed_core::config::{PlaybackConfig, ReelfeedConfig};
use reelfeed_core::feed::VideoId;
use reelfeed_core::playback::{DisposalOutcome, HandleState, PlaybackResourcePool};
use reelfeed_core::test_mocks::{MockDecoderBackend, descriptors};
use reelfeed_sim::SimDecoderBackend;

fn id(n: usize) -> VideoId {
    VideoId::new(format!("v{n}"))
}

fn playback_config() -> PlaybackConfig {
    ReelfeedConfig::for_testing().playback
}

async fn mock_pool(
    config: PlaybackConfig,
) -> (PlaybackResourcePool, Arc<MockDecoderBackend>, Arc<ManualClock>) {
    let backend = Arc::new(MockDecoderBackend::new());
    let clock = ManualClock::shared();
    let pool = PlaybackResourcePool::new(backend.clone(), config, clock.clone());
    pool.append(descriptors("v", 10)).await;
    (pool, backend, clock)
}

#[tokio::test]
async fn test_repeated_disposal_releases_once() {
    let (pool, backend, clock) = mock_pool(playback_config()).await;
    pool.preload_window(0).await.unwrap();
    pool.settle().await;

    assert_eq!(pool.request_disposal(&id(0), true).await, DisposalOutcome::Released);
    assert_eq!(pool.request_disposal(&id(0), true).await, DisposalOutcome::Absent);
    assert_eq!(backend.dispose_count_for("v0"), 1);

    assert_eq!(pool.request_disposal(&id(1), false).await, DisposalOutcome::Deferred);
    assert_eq!(
        pool.request_disposal(&id(1), false).await,
        DisposalOutcome::AlreadyPending
    );
    clock.advance(Duration::from_secs(2));
    assert_eq!(pool.sweep().await, 1);
    assert_eq!(pool.sweep().await, 0);
    assert_eq!(pool.request_disposal(&id(1), true).await, DisposalOutcome::Absent);
    assert_eq!(backend.dispose_count_for("v1"), 1);
}

#[tokio::test]
async fn test_release_is_silenced_and_never_followed_by_commands() {
    let (pool, backend, _clock) = mock_pool(playback_config()).await;
    pool.preload_window(0).await.unwrap();
    pool.settle().await;
    pool.play(0).await.unwrap();
    let handle = backend.handle_for("v0").unwrap();

    pool.request_disposal(&id(0), true).await;

    assert_eq!(backend.operations(handle), vec!["play", "pause", "set_volume", "dispose"]);
    assert_eq!(backend.volume_of(handle), Some(0.0));
    assert!(pool.play(0).await.is_err());
    assert_eq!(backend.operations(handle).len(), 4);
}

#[tokio::test]
async fn test_moving_forward_defers_the_handle_behind_keep_range() {
    let config = PlaybackConfig {
        max_active_decoders: 7,
        ..playback_config()
    };
    let (pool, backend, clock) = mock_pool(config).await;

    for index in 2..=4 {
        pool.preload_window(index).await.unwrap();
        pool.settle().await;
    }
    assert_eq!(pool.handle_state(&id(2)).await, Some(HandleState::Ready));

    let outcome = pool.preload_window(5).await.unwrap();
    pool.settle().await;

    assert_eq!(outcome.deferred, vec![id(2)]);
    assert!(outcome.released.is_empty());
    assert_eq!(
        pool.handle_state(&id(2)).await,
        Some(HandleState::PendingDisposal)
    );
    for n in [4, 5] {
        assert_eq!(pool.handle_state(&id(n)).await, Some(HandleState::Ready));
    }

    clock.advance(Duration::from_secs(2));
    assert_eq!(pool.sweep().await, 2);
    assert_eq!(pool.handle_state(&id(1)).await, None);
    assert_eq!(pool.handle_state(&id(2)).await, None);
    assert_eq!(backend.dispose_count_for("v2"), 1);
    assert_eq!(backend.dispose_count_for("v4"), 0);
    assert_eq!(backend.dispose_count_for("v5"), 0);
}

#[tokio::test]
async fn test_reactivated_handle_survives_its_stale_ticket() {
    let config = PlaybackConfig {
        max_active_decoders: 7,
        ..playback_config()
    };
    let (pool, backend, clock) = mock_pool(config).await;
    pool.preload_window(2).await.unwrap();
    pool.settle().await;
    pool.preload_window(6).await.unwrap();
    pool.settle().await;

    let back = pool.preload_window(2).await.unwrap();
    clock.advance(Duration::from_secs(2));
    pool.sweep().await;

    assert!(back.reactivated.contains(&id(2)));
    assert_eq!(pool.handle_state(&id(2)).await, Some(HandleState::Ready));
    assert_eq!(backend.dispose_count_for("v2"), 0);
    assert!(pool.statistics().await.disposal.skipped >= 1);
}

#[tokio::test]
async fn test_scrolling_zero_to_five_keeps_four_five_six() {
    let backend = Arc::new(SimDecoderBackend::new(3));
    let pool = PlaybackResourcePool::new(backend.clone(), playback_config(), ManualClock::shared());
    pool.append(descriptors("v", 10)).await;

    for index in 0..=5 {
        pool.preload_window(index).await.unwrap();
        pool.settle().await;
    }

    let live: Vec<VideoId> = pool
        .live_handles()
        .await
        .into_iter()
        .map(|(video_id, _)| video_id)
        .collect();
    assert_eq!(live, vec![id(4), id(5), id(6)]);
    for n in (0..=3).chain(7..10) {
        assert_eq!(pool.handle_state(&id(n)).await, None);
    }

    let audit = backend.audit();
    assert_eq!(audit.live, 3);
    assert_eq!(audit.released, 4);
    assert_eq!(audit.double_releases, 0);
    assert_eq!(audit.commands_after_release, 0);

    assert_eq!(pool.shutdown().await, 3);
    assert_eq!(backend.audit().live, 0);
}
