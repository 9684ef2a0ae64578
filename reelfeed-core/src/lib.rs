//! Reelfeed Core - Short-video feed pipeline
//!
//! This crate provides the building blocks of a continuously scrolling
//! video feed: paginated retrieval with offline fallback, a TTL-bounded
//! page cache, batch ranking, and a bounded pool of decoder handles with
//! exactly-once disposal.

pub mod cache;
pub mod clock;
pub mod config;
pub mod feed;
pub mod mode;
pub mod playback;
pub mod ranking;
pub mod session;
pub mod tracing_setup;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_mocks;

// Re-export main types for convenient access
pub use cache::{CacheError, OfflineCache};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, ReelfeedConfig};
pub use feed::{FeedError, FeedPage, FeedSource, FeedType, VideoDescriptor, VideoId};
pub use mode::RuntimeMode;
pub use playback::{DecoderBackend, PlaybackError, PlaybackResourcePool};
pub use ranking::{RankingEngine, RankingPolicy};
pub use session::FeedSession;

/// Errors that can bubble up from any Reelfeed subsystem.
#[derive(Debug, thiserror::Error)]
pub enum ReelfeedError {
    #[error("Feed error: {0}")]
    Feed(#[from] FeedError),

    #[error("Playback error: {0}")]
    Playback(#[from] PlaybackError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Configuration error: {reason}")]
    Configuration { reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ConfigError> for ReelfeedError {
    fn from(error: ConfigError) -> Self {
        ReelfeedError::Configuration {
            reason: error.to_string(),
        }
    }
}

impl ReelfeedError {
    /// Returns a user-friendly error message suitable for display.
    pub fn user_message(&self) -> String {
        match self {
            ReelfeedError::Feed(e) => match e {
                FeedError::Network { .. } | FeedError::Timeout { .. } => {
                    "You appear to be offline and nothing is cached yet".to_string()
                }
                FeedError::Server { status, .. } if *status >= 500 => {
                    "The feed service is having trouble, try again shortly".to_string()
                }
                FeedError::Server { status, .. } => format!("The feed request was rejected ({status})"),
                FeedError::Data { .. } => "The feed returned unreadable videos".to_string(),
            },
            ReelfeedError::Playback(e) => match e {
                PlaybackError::GaveUp { .. } => "This video cannot be played".to_string(),
                PlaybackError::InitTimeout { .. } => "This video is taking too long to load".to_string(),
                PlaybackError::Capacity { .. } => "Too many videos are loading at once".to_string(),
                _ => "Playback error occurred".to_string(),
            },
            ReelfeedError::Cache(_) => "Offline storage error occurred".to_string(),
            ReelfeedError::Configuration { .. } => "Configuration error occurred".to_string(),
            ReelfeedError::Io(_) => "File system error occurred".to_string(),
        }
    }

    /// Checks if retrying the same operation later may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            ReelfeedError::Feed(e) => e.is_transient(),
            ReelfeedError::Playback(e) => matches!(
                e,
                PlaybackError::InitTimeout { .. } | PlaybackError::Capacity { .. }
            ),
            ReelfeedError::Cache(CacheError::Io { .. }) | ReelfeedError::Io(_) => true,
            ReelfeedError::Cache(_) | ReelfeedError::Configuration { .. } => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, ReelfeedError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::VideoId;

    #[test]
    fn test_transient_classification() {
        let timeout: ReelfeedError = FeedError::Timeout { seconds: 15 }.into();
        let rejected: ReelfeedError = FeedError::Server {
            status: 404,
            reason: "missing".into(),
        }
        .into();
        let gave_up: ReelfeedError = PlaybackError::GaveUp {
            video_id: VideoId::new("v1"),
            attempts: 3,
        }
        .into();

        assert!(timeout.is_transient());
        assert!(!rejected.is_transient());
        assert!(!gave_up.is_transient());
        assert!(ReelfeedError::from(PlaybackError::Capacity { max_active: 3 }).is_transient());
    }

    #[test]
    fn test_user_messages() {
        let busy: ReelfeedError = FeedError::Server {
            status: 503,
            reason: "busy".into(),
        }
        .into();
        assert!(busy.user_message().contains("trouble"));

        let config: ReelfeedError = ConfigError::NoDecoders.into();
        assert!(matches!(config, ReelfeedError::Configuration { .. }));
        assert_eq!(config.user_message(), "Configuration error occurred");
    }
}
