//! Ordering of fetched batches.
//!
//! Every signal is normalized against the batch maximum, so a ranking only
//! depends on the batch it is given. The engine keeps no state between calls.

use std::cmp::Ordering;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::feed::{VideoDescriptor, VideoId};

/// Durations beyond this many seconds do not earn more watch credit.
const WATCH_DURATION_CAP_SECS: f64 = 180.0;
/// View counts beyond this do not earn more watch credit.
const WATCH_VIEWS_CAP: f64 = 10_000_000.0;
/// Floor applied to engagement scores before computing A-Res keys.
const MIN_SCORE: f64 = 1e-6;

const RECENCY_DURATION_WEIGHT: f64 = 0.50;
const RECENCY_SHARES_WEIGHT: f64 = 0.20;
const RECENCY_LIKES_WEIGHT: f64 = 0.30;

const ENGAGEMENT_WATCH_WEIGHT: f64 = 0.60;
const ENGAGEMENT_INTERACTION_WEIGHT: f64 = 0.10;
const ENGAGEMENT_SHARES_WEIGHT: f64 = 0.25;
const ENGAGEMENT_AD_WEIGHT: f64 = 0.05;

/// How a batch is ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RankingPolicy {
    /// Newest uploads first, engagement breaks ties
    #[default]
    RecencyFirst,
    /// Weighted random sampling without replacement (A-Res) over engagement scores
    EngagementWeighted {
        /// Fixed seed for a reproducible order; None draws fresh entropy per batch
        seed: Option<u64>,
    },
}

/// Normalized signals and derived scores of one descriptor within its batch.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreBreakdown {
    pub id: VideoId,
    pub duration: f64,
    pub likes: f64,
    pub shares: f64,
    /// Likes plus comments
    pub interactions: f64,
    pub ad_earnings: f64,
    /// Clamped duration times clamped views
    pub watch_proxy: f64,
    /// Tie-break score of the recency policy
    pub recency_tiebreak: f64,
    /// Score of the engagement-weighted policy
    pub engagement: f64,
}

/// Normalizes `value` against the batch maximum into [0, 1].
///
/// Returns 0 when the maximum is not positive.
pub fn normalize(value: f64, max: f64) -> f64 {
    if max > 0.0 && value.is_finite() {
        (value / max).clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// Stateless batch ranker.
#[derive(Debug, Clone, Default)]
pub struct RankingEngine {
    policy: RankingPolicy,
}

impl RankingEngine {
    pub fn new(policy: RankingPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> RankingPolicy {
        self.policy
    }

    /// Returns the batch reordered according to the policy.
    ///
    /// The output is always a permutation of the input.
    pub fn rank(&self, batch: Vec<VideoDescriptor>) -> Vec<VideoDescriptor> {
        if batch.len() < 2 {
            return batch;
        }

        let scores = self.score_batch(&batch);
        let order = match self.policy {
            RankingPolicy::RecencyFirst => recency_order(&batch, &scores),
            RankingPolicy::EngagementWeighted { seed } => weighted_order(&scores, seed),
        };

        let mut slots: Vec<Option<VideoDescriptor>> = batch.into_iter().map(Some).collect();
        let ranked: Vec<VideoDescriptor> = order
            .into_iter()
            .filter_map(|index| slots[index].take())
            .collect();

        tracing::trace!("Ranked batch of {} with {:?}", ranked.len(), self.policy);
        ranked
    }

    /// Computes normalized signals for every descriptor in the batch.
    pub fn score_batch(&self, batch: &[VideoDescriptor]) -> Vec<ScoreBreakdown> {
        let raw: Vec<RawSignals> = batch.iter().map(RawSignals::from).collect();
        let max = raw.iter().fold(RawSignals::default(), |acc, s| acc.max(s));

        batch
            .iter()
            .zip(&raw)
            .map(|(descriptor, signals)| {
                let duration = normalize(signals.duration, max.duration);
                let likes = normalize(signals.likes, max.likes);
                let shares = normalize(signals.shares, max.shares);
                let interactions = normalize(signals.interactions, max.interactions);
                let ad_earnings = normalize(signals.ad_earnings, max.ad_earnings);
                let watch_proxy = normalize(signals.watch_proxy, max.watch_proxy);

                ScoreBreakdown {
                    id: descriptor.id.clone(),
                    duration,
                    likes,
                    shares,
                    interactions,
                    ad_earnings,
                    watch_proxy,
                    recency_tiebreak: (RECENCY_DURATION_WEIGHT * duration
                        + RECENCY_SHARES_WEIGHT * shares
                        + RECENCY_LIKES_WEIGHT * likes)
                        .min(1.0),
                    engagement: (ENGAGEMENT_WATCH_WEIGHT * watch_proxy
                        + ENGAGEMENT_INTERACTION_WEIGHT * interactions
                        + ENGAGEMENT_SHARES_WEIGHT * shares
                        + ENGAGEMENT_AD_WEIGHT * ad_earnings)
                        .min(1.0),
                }
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct RawSignals {
    duration: f64,
    likes: f64,
    shares: f64,
    interactions: f64,
    ad_earnings: f64,
    watch_proxy: f64,
}

impl RawSignals {
    fn max(self, other: &RawSignals) -> RawSignals {
        RawSignals {
            duration: self.duration.max(other.duration),
            likes: self.likes.max(other.likes),
            shares: self.shares.max(other.shares),
            interactions: self.interactions.max(other.interactions),
            ad_earnings: self.ad_earnings.max(other.ad_earnings),
            watch_proxy: self.watch_proxy.max(other.watch_proxy),
        }
    }
}

impl From<&VideoDescriptor> for RawSignals {
    fn from(descriptor: &VideoDescriptor) -> Self {
        let counters = &descriptor.counters;
        let duration = descriptor.duration.as_secs_f64();
        let clamped_duration = duration.clamp(0.0, WATCH_DURATION_CAP_SECS);
        let clamped_views = (counters.views as f64).clamp(0.0, WATCH_VIEWS_CAP);

        RawSignals {
            duration,
            likes: counters.likes as f64,
            shares: counters.shares as f64,
            interactions: counters.likes.saturating_add(counters.comments) as f64,
            ad_earnings: counters.ad_earnings.max(0.0),
            watch_proxy: clamped_duration * clamped_views,
        }
    }
}

fn recency_order(batch: &[VideoDescriptor], scores: &[ScoreBreakdown]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..batch.len()).collect();
    order.sort_by(|&a, &b| {
        batch[b]
            .uploaded_at
            .cmp(&batch[a].uploaded_at)
            .then_with(|| {
                scores[b]
                    .recency_tiebreak
                    .total_cmp(&scores[a].recency_tiebreak)
            })
            .then_with(|| batch[a].id.cmp(&batch[b].id))
    });
    order
}

fn weighted_order(scores: &[ScoreBreakdown], seed: Option<u64>) -> Vec<usize> {
    let mut rng = match seed {
        Some(seed) => ChaCha8Rng::seed_from_u64(seed),
        None => ChaCha8Rng::from_rng(&mut rand::rng()),
    };

    let mut keyed: Vec<(f64, usize)> = scores
        .iter()
        .enumerate()
        .map(|(index, score)| {
            let u: f64 = rng.random_range(f64::EPSILON..1.0);
            (-u.ln() / score.engagement.max(MIN_SCORE), index)
        })
        .collect();

    keyed.sort_by(|a, b| match a.0.total_cmp(&b.0) {
        Ordering::Equal => scores[a.1].id.cmp(&scores[b.1].id),
        other => other,
    });
    keyed.into_iter().map(|(_, index)| index).collect()
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::time::Duration;

    use chrono::{TimeDelta, Utc};
    use proptest::prelude::*;

    use super::*;
    use crate::feed::EngagementCounters;
    use crate::test_mocks::descriptor;

    fn video(id: &str, age_secs: i64, duration_secs: u64, likes: u64, shares: u64) -> VideoDescriptor {
        let mut video = descriptor(id);
        video.uploaded_at = Utc::now() - TimeDelta::seconds(age_secs);
        video.duration = Duration::from_secs(duration_secs);
        video.counters = EngagementCounters {
            likes,
            shares,
            ..EngagementCounters::default()
        };
        video
    }

    fn ids(batch: &[VideoDescriptor]) -> Vec<&str> {
        batch.iter().map(|v| v.id.as_str()).collect()
    }

    #[test]
    fn test_normalize_bounds() {
        assert_eq!(normalize(5.0, 10.0), 0.5);
        assert_eq!(normalize(5.0, 0.0), 0.0);
        assert_eq!(normalize(12.0, 10.0), 1.0);
        assert_eq!(normalize(f64::NAN, 10.0), 0.0);
    }

    #[test]
    fn test_recency_orders_newest_first() {
        let engine = RankingEngine::default();
        let batch = vec![
            video("old", 300, 10, 0, 0),
            video("new", 10, 10, 0, 0),
            video("mid", 100, 10, 0, 0),
        ];

        assert_eq!(ids(&engine.rank(batch)), vec!["new", "mid", "old"]);
    }

    #[test]
    fn test_recency_ties_broken_by_engagement_then_id() {
        let engine = RankingEngine::new(RankingPolicy::RecencyFirst);
        let uploaded = Utc::now();
        let mut batch = vec![
            video("b", 0, 10, 5, 0),
            video("a", 0, 10, 5, 0),
            video("c", 0, 60, 100, 9),
        ];
        for item in &mut batch {
            item.uploaded_at = uploaded;
        }

        assert_eq!(ids(&engine.rank(batch)), vec!["c", "a", "b"]);
    }

    #[test]
    fn test_zero_maximum_normalizes_to_zero() {
        let engine = RankingEngine::default();
        let batch = vec![video("a", 0, 0, 0, 0), video("b", 0, 0, 0, 0)];

        for score in engine.score_batch(&batch) {
            assert_eq!(score.recency_tiebreak, 0.0);
            assert_eq!(score.engagement, 0.0);
        }
    }

    #[test]
    fn test_seeded_engagement_order_is_reproducible() {
        let engine = RankingEngine::new(RankingPolicy::EngagementWeighted { seed: Some(7) });
        let batch: Vec<VideoDescriptor> = (0..12)
            .map(|i| video(&format!("v{i}"), i, 10 + i as u64, i as u64 * 3, i as u64))
            .collect();

        let first = engine.rank(batch.clone());
        let second = engine.rank(batch);

        assert_eq!(ids(&first), ids(&second));
    }

    #[test]
    fn test_engagement_weighting_favors_high_scores() {
        let mut strong = video("strong", 0, 120, 1000, 500);
        strong.counters.views = 1_000_000;
        let weak = video("weak", 0, 1, 0, 0);

        let mut strong_first = 0;
        for seed in 0..200 {
            let engine = RankingEngine::new(RankingPolicy::EngagementWeighted { seed: Some(seed) });
            let ranked = engine.rank(vec![weak.clone(), strong.clone()]);
            if ranked[0].id.as_str() == "strong" {
                strong_first += 1;
            }
        }

        assert!(strong_first > 190, "strong first only {strong_first} times");
    }

    #[test]
    fn test_watch_proxy_clamps_duration() {
        let engine = RankingEngine::default();
        let mut long = video("long", 0, 3600, 0, 0);
        long.counters.views = 10;
        let mut capped = video("capped", 0, 180, 0, 0);
        capped.counters.views = 10;

        let scores = engine.score_batch(&[long, capped]);

        assert_eq!(scores[0].watch_proxy, scores[1].watch_proxy);
        assert_eq!(scores[0].duration, 1.0);
        assert_eq!(scores[1].duration, 0.05);
    }

    fn arb_batch() -> impl Strategy<Value = Vec<VideoDescriptor>> {
        prop::collection::vec(
            (
                0i64..100_000,
                0u64..3_600,
                0u64..1_000_000,
                0u64..100_000,
                0u64..1_000,
                0u64..50_000_000,
                0.0f64..1_000.0,
            ),
            0..40,
        )
        .prop_map(|rows| {
            rows.into_iter()
                .enumerate()
                .map(|(i, (age, dur, likes, shares, comments, views, ad))| {
                    let mut item = video(&format!("v{i}"), age, dur, likes, shares);
                    item.counters.comments = comments;
                    item.counters.views = views;
                    item.counters.ad_earnings = ad;
                    item
                })
                .collect()
        })
    }

    proptest! {
        #[test]
        fn prop_rank_is_permutation(batch in arb_batch(), seed in any::<Option<u64>>(), weighted in any::<bool>()) {
            let policy = if weighted {
                RankingPolicy::EngagementWeighted { seed }
            } else {
                RankingPolicy::RecencyFirst
            };
            let engine = RankingEngine::new(policy);

            let input: HashSet<String> = batch.iter().map(|v| v.id.to_string()).collect();
            let ranked = engine.rank(batch.clone());
            let output: HashSet<String> = ranked.iter().map(|v| v.id.to_string()).collect();

            prop_assert_eq!(ranked.len(), batch.len());
            prop_assert_eq!(input, output);
        }

        #[test]
        fn prop_normalized_scores_in_unit_range(batch in arb_batch()) {
            let engine = RankingEngine::default();
            for score in engine.score_batch(&batch) {
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
                    prop_assert!((0.0..=1.0).contains(&value), "{} out of range", value);
                }
            }
        }
    }
}
