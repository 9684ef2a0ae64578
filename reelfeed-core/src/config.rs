//! Centralized configuration for Reelfeed.
//!
//! All tunable parameters and settings are defined here to avoid
//! hard-coded values scattered throughout the codebase.

use std::collections::HashMap;
use std::time::Duration;

use crate::feed::FeedType;
use crate::ranking::RankingPolicy;

/// Central configuration for all Reelfeed components.
///
/// Groups related configuration settings into logical sections.
/// Supports environment variable overrides for runtime customization.
#[derive(Debug, Clone, Default)]
pub struct ReelfeedConfig {
    pub feed: FeedConfig,
    pub cache: CacheConfig,
    pub playback: PlaybackConfig,
    pub network: NetworkConfig,
    pub simulation: SimulationConfig,
}

/// Feed pagination and ranking configuration.
#[derive(Debug, Clone)]
pub struct FeedConfig {
    /// Number of descriptors requested per page
    pub page_size: u32,
    /// Consecutive empty batches (pages > 1) before pagination stops
    pub max_empty_batches: u32,
    /// Upper bound on substitute entries taken from the local gallery
    pub gallery_limit: usize,
    /// Replace invalid descriptors with an explicit placeholder instead of dropping them
    pub substitute_unavailable: bool,
    /// Ordering applied to every fetched batch
    pub ranking: RankingPolicy,
    /// Load the next page when the current index is this close to the end
    pub prefetch_threshold: usize,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            page_size: 10,
            max_empty_batches: 3,
            gallery_limit: 20,
            substitute_unavailable: false,
            ranking: RankingPolicy::RecencyFirst,
            prefetch_threshold: 3,
        }
    }
}

/// Offline cache configuration.
///
/// TTLs are per feed type; feeds without an override use `default_ttl`.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// TTL applied when a feed type has no explicit override
    pub default_ttl: Duration,
    /// Per feed type TTL overrides
    pub ttl_overrides: HashMap<FeedType, Duration>,
    /// Interval of the background expiry sweep (None disables it)
    pub cleanup_interval: Option<Duration>,
    /// Directory for the file-backed store (None keeps entries in memory)
    pub directory: Option<std::path::PathBuf>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        let mut ttl_overrides = HashMap::new();
        ttl_overrides.insert(FeedType::Series, Duration::from_secs(7 * 24 * 3600)); // 7 days

        Self {
            default_ttl: Duration::from_secs(24 * 3600), // 24 hours
            ttl_overrides,
            cleanup_interval: Some(Duration::from_secs(600)), // 10 minutes
            directory: None,
        }
    }
}

impl CacheConfig {
    /// Returns the TTL that applies to entries of the given feed type.
    pub fn ttl_for(&self, feed_type: FeedType) -> Duration {
        self.ttl_overrides
            .get(&feed_type)
            .copied()
            .unwrap_or(self.default_ttl)
    }
}

/// Decoder pool and disposal configuration.
#[derive(Debug, Clone)]
pub struct PlaybackConfig {
    /// Maximum handles in Ready, Playing, Paused or Buffering at once
    pub max_active_decoders: usize,
    /// Indices on each side of the current one kept initialized
    pub preload_radius: usize,
    /// Indices on each side of the current one within which handles are retained
    pub keep_range: usize,
    /// Decoder initialization timeout
    pub init_timeout: Duration,
    /// Consecutive init failures before a video is given up on
    pub max_init_attempts: u32,
    /// Delay between a deferred disposal request and its sweep
    pub sweep_delay: Duration,
    /// Spawn a timer task per deferred disposal (disable for virtual-time tests)
    pub auto_sweep: bool,
    /// Live feed length that triggers memory-pressure trimming
    pub max_feed_len: usize,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            max_active_decoders: 3,
            preload_radius: 1,
            keep_range: 2,
            init_timeout: Duration::from_secs(10),
            max_init_attempts: 3,
            sweep_delay: Duration::from_secs(2),
            auto_sweep: true,
            max_feed_len: 200,
        }
    }
}

/// Remote feed API configuration.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Base URL of the feed API
    pub api_base_url: String,
    /// HTTP request timeout
    pub request_timeout: Duration,
    /// User agent for HTTP requests
    pub user_agent: &'static str,
    /// Device identifier sent with every request
    pub device_id: String,
    /// Platform identifier sent with every request
    pub platform: &'static str,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://127.0.0.1:8080/api".to_string(),
            request_timeout: Duration::from_secs(15),
            user_agent: "reelfeed/0.1.0",
            device_id: uuid::Uuid::new_v4().to_string(),
            platform: std::env::consts::OS,
        }
    }
}

/// Simulation mode configuration for testing and development.
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    /// Enable simulated collaborators
    pub enabled: bool,
    /// Deterministic seed for reproducible content and ranking
    pub deterministic_seed: Option<u64>,
    /// Simulated API latency in milliseconds
    pub api_latency_ms: u64,
    /// Simulated decoder initialization latency in milliseconds
    pub decoder_init_latency_ms: u64,
    /// Number of videos the simulated API serves before running dry
    pub catalog_size: usize,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            deterministic_seed: None,
            api_latency_ms: 80,
            decoder_init_latency_ms: 120,
            catalog_size: 60,
        }
    }
}

impl SimulationConfig {
    /// Creates a configuration for deterministic testing.
    pub fn deterministic_testing() -> Self {
        Self {
            enabled: true,
            deterministic_seed: Some(42),
            api_latency_ms: 0,
            decoder_init_latency_ms: 0,
            catalog_size: 30,
        }
    }
}

/// Errors produced by [`ReelfeedConfig::validate`].
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ConfigError {
    #[error("keep_range ({keep_range}) must be greater than preload_radius ({preload_radius})")]
    KeepRangeTooSmall {
        keep_range: usize,
        preload_radius: usize,
    },

    #[error("max_active_decoders must be at least 1")]
    NoDecoders,

    #[error(
        "max_active_decoders ({max_active_decoders}) cannot hold a preload window of {window} handles"
    )]
    WindowExceedsCapacity {
        max_active_decoders: usize,
        window: usize,
    },

    #[error("page_size must be at least 1")]
    EmptyPage,

    #[error("max_feed_len ({max_feed_len}) must exceed the keep window ({window})")]
    FeedTooShort { max_feed_len: usize, window: usize },
}

impl ReelfeedConfig {
    /// Creates configuration with environment variable overrides.
    ///
    /// Allows runtime configuration via environment variables while
    /// maintaining sensible defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(url) = std::env::var("REELFEED_API_URL") {
            config.network.api_base_url = url;
        }

        if let Ok(timeout) = std::env::var("REELFEED_REQUEST_TIMEOUT")
            && let Ok(seconds) = timeout.parse::<u64>()
        {
            config.network.request_timeout = Duration::from_secs(seconds);
        }

        if let Ok(max) = std::env::var("REELFEED_MAX_DECODERS")
            && let Ok(count) = max.parse::<usize>()
        {
            config.playback.max_active_decoders = count;
        }

        if let Ok(page_size) = std::env::var("REELFEED_PAGE_SIZE")
            && let Ok(size) = page_size.parse::<u32>()
        {
            config.feed.page_size = size;
        }

        if let Ok(dir) = std::env::var("REELFEED_CACHE_DIR") {
            config.cache.directory = Some(dir.into());
        }

        if let Ok(enabled) = std::env::var("REELFEED_SIMULATION_MODE") {
            config.simulation.enabled = enabled.parse().unwrap_or(false);
        }

        if let Ok(seed) = std::env::var("REELFEED_SIMULATION_SEED")
            && let Ok(seed_value) = seed.parse::<u64>()
        {
            config.simulation.deterministic_seed = Some(seed_value);
        }

        config
    }

    /// Creates a configuration optimized for testing.
    ///
    /// Disables timer-driven sweeps and background cleanup so tests drive
    /// time explicitly through a manual clock.
    pub fn for_testing() -> Self {
        let mut config = Self {
            simulation: SimulationConfig::deterministic_testing(),
            ..Default::default()
        };
        config.playback.auto_sweep = false;
        config.playback.init_timeout = Duration::from_millis(500);
        config.cache.cleanup_interval = None;
        config.network.device_id = "test-device".to_string();
        config
    }

    /// Checks cross-field constraints.
    ///
    /// # Errors
    /// - `ConfigError::KeepRangeTooSmall` - keep range does not exceed the preload radius
    /// - `ConfigError::NoDecoders` - decoder cap is zero
    /// - `ConfigError::WindowExceedsCapacity` - preload window cannot fit in the cap
    /// - `ConfigError::EmptyPage` - page size is zero
    /// - `ConfigError::FeedTooShort` - trimming threshold is inside the keep window
    pub fn validate(&self) -> Result<(), ConfigError> {
        let playback = &self.playback;
        if playback.keep_range <= playback.preload_radius {
            return Err(ConfigError::KeepRangeTooSmall {
                keep_range: playback.keep_range,
                preload_radius: playback.preload_radius,
            });
        }
        if playback.max_active_decoders == 0 {
            return Err(ConfigError::NoDecoders);
        }
        let window = playback.preload_radius * 2 + 1;
        if window > playback.max_active_decoders {
            return Err(ConfigError::WindowExceedsCapacity {
                max_active_decoders: playback.max_active_decoders,
                window,
            });
        }
        if self.feed.page_size == 0 {
            return Err(ConfigError::EmptyPage);
        }
        let keep_window = playback.keep_range * 2 + 1;
        if playback.max_feed_len <= keep_window {
            return Err(ConfigError::FeedTooShort {
                max_feed_len: playback.max_feed_len,
                window: keep_window,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_values() {
        let config = ReelfeedConfig::default();

        assert_eq!(config.feed.page_size, 10);
        assert_eq!(config.feed.max_empty_batches, 3);
        assert_eq!(config.playback.max_active_decoders, 3);
        assert_eq!(config.playback.preload_radius, 1);
        assert_eq!(config.playback.keep_range, 2);
        assert_eq!(config.playback.sweep_delay, Duration::from_secs(2));
        assert_eq!(config.cache.default_ttl, Duration::from_secs(86400));
        assert!(!config.simulation.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_ttl_overrides_per_feed_type() {
        let config = CacheConfig::default();

        assert_eq!(config.ttl_for(FeedType::Main), Duration::from_secs(86400));
        assert_eq!(
            config.ttl_for(FeedType::Series),
            Duration::from_secs(7 * 86400)
        );
    }

    #[test]
    fn test_validate_rejects_keep_range_not_wider_than_radius() {
        let mut config = ReelfeedConfig::default();
        config.playback.keep_range = 1;

        assert_eq!(
            config.validate(),
            Err(ConfigError::KeepRangeTooSmall {
                keep_range: 1,
                preload_radius: 1
            })
        );
    }

    #[test]
    fn test_validate_rejects_window_larger_than_cap() {
        let mut config = ReelfeedConfig::default();
        config.playback.max_active_decoders = 2;

        assert!(matches!(
            config.validate(),
            Err(ConfigError::WindowExceedsCapacity { window: 3, .. })
        ));
    }

    #[test]
    fn test_testing_preset_disables_timers() {
        let config = ReelfeedConfig::for_testing();

        assert!(!config.playback.auto_sweep);
        assert!(config.cache.cleanup_interval.is_none());
        assert_eq!(config.simulation.deterministic_seed, Some(42));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_override() {
        unsafe {
            std::env::set_var("REELFEED_MAX_DECODERS", "5");
            std::env::set_var("REELFEED_PAGE_SIZE", "25");
            std::env::set_var("REELFEED_SIMULATION_MODE", "true");
            std::env::set_var("REELFEED_SIMULATION_SEED", "12345");
        }

        let config = ReelfeedConfig::from_env();

        assert_eq!(config.playback.max_active_decoders, 5);
        assert_eq!(config.feed.page_size, 25);
        assert!(config.simulation.enabled);
        assert_eq!(config.simulation.deterministic_seed, Some(12345));

        unsafe {
            std::env::remove_var("REELFEED_MAX_DECODERS");
            std::env::remove_var("REELFEED_PAGE_SIZE");
            std::env::remove_var("REELFEED_SIMULATION_MODE");
            std::env::remove_var("REELFEED_SIMULATION_SEED");
        }
    }
}
