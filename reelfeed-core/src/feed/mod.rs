//! Paginated feed retrieval with offline fallback.
//!
//! The [`FeedSource`] talks to a remote [`FeedApi`], writes good pages into
//! the offline cache, and falls back to the cache or a [`LocalGallery`] when
//! the network lets it down.

pub mod api;
pub mod descriptor;
pub mod gallery;
pub mod source;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub use api::{AlwaysOnline, Connectivity, FeedApi, FeedRequest, HttpFeedApi};
pub use descriptor::{
    Availability, EngagementCounters, FeedPage, FeedResponse, MediaVariant, PageOrigin,
    RejectedRecord, SeriesInfo, UploaderRef, VideoDescriptor, VideoDescriptorJson, VideoId,
};
pub use gallery::{DirectoryGallery, LocalGallery};
pub use source::FeedSource;

/// Category of feed requested from the remote API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedType {
    /// General "for you" feed
    Main,
    Trending,
    Following,
    /// Episodic content that rarely changes
    Series,
}

impl FeedType {
    /// Wire and cache-key name of the feed type.
    pub fn as_str(self) -> &'static str {
        match self {
            FeedType::Main => "main",
            FeedType::Trending => "trending",
            FeedType::Following => "following",
            FeedType::Series => "series",
        }
    }
}

impl fmt::Display for FeedType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FeedType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "main" => Ok(FeedType::Main),
            "trending" => Ok(FeedType::Trending),
            "following" => Ok(FeedType::Following),
            "series" => Ok(FeedType::Series),
            _ => Err(format!(
                "Invalid feed type: '{s}'. Valid options are: main, trending, following, series"
            )),
        }
    }
}

/// Errors that can occur while fetching feed pages.
#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum FeedError {
    #[error("Network unavailable: {reason}")]
    Network { reason: String },

    #[error("Server error {status}: {reason}")]
    Server { status: u16, reason: String },

    #[error("Malformed feed payload: {reason}")]
    Data { reason: String },

    #[error("Feed request timed out after {seconds} seconds")]
    Timeout { seconds: u64 },
}

impl FeedError {
    /// Checks whether a single retry has a reasonable chance of succeeding.
    ///
    /// Client errors (4xx) and malformed payloads are not transient.
    pub fn is_transient(&self) -> bool {
        match self {
            FeedError::Network { .. } | FeedError::Timeout { .. } => true,
            FeedError::Server { status, .. } => *status >= 500,
            FeedError::Data { .. } => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feed_type_round_trips_through_str() {
        for feed_type in [
            FeedType::Main,
            FeedType::Trending,
            FeedType::Following,
            FeedType::Series,
        ] {
            assert_eq!(feed_type.as_str().parse::<FeedType>(), Ok(feed_type));
        }
        assert!("reels".parse::<FeedType>().is_err());
    }

    #[test]
    fn test_transient_classification() {
        assert!(
            FeedError::Network {
                reason: "offline".into()
            }
            .is_transient()
        );
        assert!(FeedError::Timeout { seconds: 15 }.is_transient());
        assert!(
            FeedError::Server {
                status: 503,
                reason: "busy".into()
            }
            .is_transient()
        );
        assert!(
            !FeedError::Server {
                status: 404,
                reason: "gone".into()
            }
            .is_transient()
        );
        assert!(
            !FeedError::Data {
                reason: "bad".into()
            }
            .is_transient()
        );
    }
}
