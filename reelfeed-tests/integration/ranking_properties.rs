//! Ranking properties over arbitrary batches.

use std::collections::HashSet;
use std::time::Duration;

use chrono::TimeDelta;
use proptest::prelude::*;
use reelfeed_core::feed::{EngagementCounters, VideoDescriptor};
use reelfeed_core::ranking::{RankingEngine, RankingPolicy};
use reelfeed_core::test_mocks::descriptor;

// Weighted sums of normalized signals may round a hair above 1
const EPSILON: f64 = 1e-9;

type Row = (u64, u64, u64, u64, f64, u64, i64);

fn build(rows: Vec<Row>) -> Vec<VideoDescriptor> {
    rows.into_iter()
        .enumerate()
        .map(|(i, (views, likes, shares, comments, ad_earnings, secs, age))| {
            let mut video = descriptor(&format!("r{i}"));
            video.counters = EngagementCounters {
                views,
                likes,
                shares,
                comments,
                ad_earnings,
            };
            video.duration = Duration::from_secs(secs);
            video.uploaded_at -= TimeDelta::seconds(age);
            video
        })
        .collect()
}

fn batch() -> impl Strategy<Value = Vec<VideoDescriptor>> {
    prop::collection::vec(
        (
            0u64..20_000_000,
            0u64..500_000,
            0u64..100_000,
            0u64..100_000,
            0.0f64..500.0,
            0u64..900,
            0i64..2_000_000,
        ),
        0..40,
    )
    .prop_map(build)
}

fn ids(batch: &[VideoDescriptor]) -> Vec<String> {
    let mut ids: Vec<String> = batch.iter().map(|v| v.id.to_string()).collect();
    ids.sort();
    ids
}

proptest! {
    #[test]
    fn test_rank_returns_a_permutation(batch in batch(), seed in any::<u64>()) {
        for policy in [
            RankingPolicy::RecencyFirst,
            RankingPolicy::EngagementWeighted { seed: Some(seed) },
            RankingPolicy::EngagementWeighted { seed: None },
        ] {
            let ranked = RankingEngine::new(policy).rank(batch.clone());
            prop_assert_eq!(ranked.len(), batch.len());
            prop_assert_eq!(ids(&ranked), ids(&batch));
        }
    }

    #[test]
    fn test_scores_stay_in_unit_interval(batch in batch()) {
        let scores = RankingEngine::new(RankingPolicy::RecencyFirst).score_batch(&batch);
        prop_assert_eq!(scores.len(), batch.len());

        for score in scores {
            for value in [
                score.duration,
                score.likes,
                score.shares,
                score.interactions,
                score.ad_earnings,
                score.watch_proxy,
                score.recency_tiebreak,
                score.engagement,
            ] {
                prop_assert!(value >= 0.0 && value <= 1.0 + EPSILON, "{} scored {}", score.id, value);
            }
        }
    }

    #[test]
    fn test_recency_puts_newest_first(batch in batch()) {
        let ranked = RankingEngine::new(RankingPolicy::RecencyFirst).rank(batch);
        for pair in ranked.windows(2) {
            prop_assert!(pair[0].uploaded_at >= pair[1].uploaded_at);
        }
    }
}

#[test]
fn test_seeded_engagement_order_is_reproducible() {
    let batch = build(
        (0..25)
            .map(|i| (i * 1000, i * 40, i * 3, i, i as f64, 30 + i, i as i64 * 90))
            .collect(),
    );
    let policy = RankingPolicy::EngagementWeighted { seed: Some(11) };

    let first = RankingEngine::new(policy).rank(batch.clone());
    let second = RankingEngine::new(policy).rank(batch);

    let order = |ranked: &[VideoDescriptor]| -> Vec<String> {
        ranked.iter().map(|v| v.id.to_string()).collect()
    };
    assert_eq!(order(&first), order(&second));
    assert_eq!(
        first.iter().map(|v| v.id.clone()).collect::<HashSet<_>>().len(),
        25
    );
}
