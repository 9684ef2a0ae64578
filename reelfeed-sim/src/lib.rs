//! Reelfeed Simulation - Deterministic collaborators for the feed pipeline.
//!
//! Every external collaborator of `reelfeed-core` has a simulated
//! counterpart here, driven by a seeded ChaCha8 generator so the same seed
//! always produces the same catalog, failures and ordering:
//!
//! - [`SimFeedApi`] serves pages from a generated [`SimCatalog`], with
//!   latency, scripted failures and server-side session dedup
//! - [`SimDecoderBackend`] issues decoder handles and audits misuse
//! - [`StaticGallery`] and [`ToggleConnectivity`] stand in for the device
//!
//! [`SimEnvironment`] wires them into a ready-to-run [`FeedSession`].

pub mod api;
pub mod catalog;
pub mod decoder;
pub mod device;

use std::sync::Arc;
use std::time::Duration;

pub use api::SimFeedApi;
pub use catalog::{SIM_MEDIA_HOST, SimCatalog};
pub use decoder::{DecoderAudit, SimDecoderBackend};
pub use device::{StaticGallery, ToggleConnectivity};
use reelfeed_core::cache::OfflineCache;
use reelfeed_core::clock::Clock;
use reelfeed_core::config::{ReelfeedConfig, SimulationConfig};
use reelfeed_core::feed::{FeedSource, FeedType};
use reelfeed_core::playback::PlaybackResourcePool;
use reelfeed_core::session::FeedSession;

/// Seed used when the configuration does not pin one.
pub const DEFAULT_SEED: u64 = 0x5EED_F00D;

// Gallery entries are drawn from a separate catalog so they never collide with remote ids
const GALLERY_SEED_OFFSET: u64 = 1;
const GALLERY_SIZE: usize = 12;

/// The full set of simulated collaborators for one run.
pub struct SimEnvironment {
    pub seed: u64,
    pub api: Arc<SimFeedApi>,
    pub decoder: Arc<SimDecoderBackend>,
    pub gallery: Arc<StaticGallery>,
    pub connectivity: Arc<ToggleConnectivity>,
    decoder_latency: Duration,
}

impl SimEnvironment {
    pub fn new(config: &SimulationConfig) -> Self {
        let seed = config.deterministic_seed.unwrap_or(DEFAULT_SEED);
        let catalog = SimCatalog::generate(seed, config.catalog_size);
        let gallery_catalog = SimCatalog::generate(seed.wrapping_add(GALLERY_SEED_OFFSET), GALLERY_SIZE);

        let api = SimFeedApi::new(catalog)
            .with_latency(Duration::from_millis(config.api_latency_ms))
            .with_session_dedup(true);
        let decoder_latency = Duration::from_millis(config.decoder_init_latency_ms);
        let decoder = SimDecoderBackend::new(seed).with_init_latency(decoder_latency);

        tracing::info!(
            "Simulation ready: seed {}, {} catalog videos, {} gallery videos",
            seed,
            config.catalog_size,
            GALLERY_SIZE
        );

        Self {
            seed,
            api: Arc::new(api),
            decoder: Arc::new(decoder),
            gallery: Arc::new(StaticGallery::new(gallery_catalog.descriptors())),
            connectivity: Arc::new(ToggleConnectivity::default()),
            decoder_latency,
        }
    }

    /// Replaces the decoder with one failing `rate` of its initializations.
    pub fn with_decoder_failure_rate(mut self, rate: f64) -> Self {
        self.decoder = Arc::new(
            SimDecoderBackend::new(self.seed)
                .with_init_latency(self.decoder_latency)
                .with_failure_rate(rate),
        );
        self
    }

    /// Builds a feed session over the simulated collaborators.
    pub fn session(
        &self,
        config: &ReelfeedConfig,
        feed_type: FeedType,
        cache: Arc<OfflineCache>,
        clock: Arc<dyn Clock>,
    ) -> FeedSession {
        let source = FeedSource::new(
            self.api.clone(),
            cache,
            config.feed.clone(),
            &config.network,
            Arc::clone(&clock),
        )
        .with_gallery(self.gallery.clone())
        .with_connectivity(self.connectivity.clone());
        let pool = PlaybackResourcePool::new(self.decoder.clone(), config.playback.clone(), clock);

        FeedSession::new(feed_type, source, pool)
    }
}

#[cfg(test)]
mod tests {
    use reelfeed_core::clock::ManualClock;

    use super::*;

    #[tokio::test]
    async fn test_environment_runs_a_session() {
        let config = ReelfeedConfig::for_testing();
        let env = SimEnvironment::new(&config.simulation);
        let clock = ManualClock::shared();
        let cache = Arc::new(OfflineCache::in_memory(config.cache.clone(), clock.clone()));
        let session = env.session(&config, FeedType::Main, cache, clock);

        let summary = session.start().await.unwrap();
        session.pool().settle().await;

        assert_eq!(summary.appended, config.feed.page_size as usize);
        assert_eq!(env.decoder.audit().live, 2);
        assert_eq!(session.shutdown().await, 2);
        assert_eq!(env.decoder.audit().live, 0);
    }

    #[tokio::test]
    async fn test_failing_decoder_never_plays() {
        let config = ReelfeedConfig::for_testing();
        let env = SimEnvironment::new(&config.simulation).with_decoder_failure_rate(1.0);
        let clock = ManualClock::shared();
        let cache = Arc::new(OfflineCache::in_memory(config.cache.clone(), clock.clone()));
        let session = env.session(&config, FeedType::Main, cache, clock);

        session.start().await.unwrap();
        session.pool().settle().await;

        assert!(!matches!(session.play_current().await, Ok(true)));
        assert_eq!(env.decoder.audit().initialized, 0);
        session.shutdown().await;
    }
}
