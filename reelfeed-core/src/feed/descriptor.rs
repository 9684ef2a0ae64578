//! Video descriptors, feed pages, and the remote wire format.
//!
//! Wire records are deserialized into [`VideoDescriptorJson`] and converted
//! strictly into [`VideoDescriptor`]; nothing silently falls back to a
//! default record.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use super::{FeedError, FeedType};

/// Stable identifier of a video.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VideoId(String);

impl VideoId {
    /// Creates an id from any string-like value.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VideoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for VideoId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Engagement counters for a video.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct EngagementCounters {
    pub views: u64,
    pub likes: u64,
    pub shares: u64,
    pub comments: u64,
    /// Accumulated ad earnings in the API's currency unit
    pub ad_earnings: f64,
}

/// An alternative rendition of the primary media.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaVariant {
    /// Human label such as "720p" or "hls"
    pub label: String,
    pub url: Url,
    /// Advertised bitrate in bits per second
    pub bandwidth: Option<u64>,
}

/// Reference to the uploading account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploaderRef {
    pub id: String,
    pub name: String,
}

/// Series/episode metadata for episodic content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeriesInfo {
    pub id: String,
    pub title: String,
    pub episode: u32,
}

/// Whether a descriptor can actually be played.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Availability {
    Available,
    /// Explicit placeholder substituted for an invalid wire record
    Unavailable { reason: String },
}

/// Immutable description of one video in the feed.
///
/// Counters and the like flag change only through
/// [`VideoDescriptor::with_engagement`], which returns a new value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoDescriptor {
    pub id: VideoId,
    pub title: String,
    pub media_url: Option<Url>,
    pub variants: Vec<MediaVariant>,
    pub duration: Duration,
    pub counters: EngagementCounters,
    pub uploader: UploaderRef,
    pub uploaded_at: DateTime<Utc>,
    pub liked_by_viewer: bool,
    pub series: Option<SeriesInfo>,
    pub availability: Availability,
}

impl VideoDescriptor {
    /// Returns a copy carrying new counters and like flag.
    pub fn with_engagement(&self, counters: EngagementCounters, liked_by_viewer: bool) -> Self {
        Self {
            counters,
            liked_by_viewer,
            ..self.clone()
        }
    }

    /// Builds the explicit placeholder for a record that failed validation.
    pub fn unavailable(id: VideoId, reason: impl Into<String>) -> Self {
        Self {
            id,
            title: String::new(),
            media_url: None,
            variants: Vec::new(),
            duration: Duration::ZERO,
            counters: EngagementCounters::default(),
            uploader: UploaderRef {
                id: String::new(),
                name: String::new(),
            },
            uploaded_at: DateTime::<Utc>::UNIX_EPOCH,
            liked_by_viewer: false,
            series: None,
            availability: Availability::Unavailable {
                reason: reason.into(),
            },
        }
    }

    /// Checks whether the descriptor has playable media.
    pub fn is_playable(&self) -> bool {
        matches!(self.availability, Availability::Available) && self.media_url.is_some()
    }

    /// URI handed to the decoder: the primary media reference.
    pub fn playback_uri(&self) -> Option<&Url> {
        self.media_url.as_ref()
    }
}

/// Where the contents of a [`FeedPage`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PageOrigin {
    Remote,
    Cache,
    Gallery,
    /// Pagination guard tripped; no request was issued
    Exhausted,
}

/// One page of feed results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedPage {
    pub feed_type: FeedType,
    pub page: u32,
    pub videos: Vec<VideoDescriptor>,
    pub has_more: bool,
    pub fetched_at: DateTime<Utc>,
    pub origin: PageOrigin,
}

impl FeedPage {
    /// Creates an empty terminal page.
    pub fn empty(feed_type: FeedType, page: u32, fetched_at: DateTime<Utc>, origin: PageOrigin) -> Self {
        Self {
            feed_type,
            page,
            videos: Vec::new(),
            has_more: false,
            fetched_at,
            origin,
        }
    }

    pub fn len(&self) -> usize {
        self.videos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.videos.is_empty()
    }
}

/// Remote response body: `{ "videos": [...], "hasMore": bool }`.
///
/// Each element of `videos` is decoded on its own. Elements that do not
/// match the record shape land in `rejected` instead of failing the page.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "RawFeedResponse")]
pub struct FeedResponse {
    #[serde(default)]
    pub videos: Vec<VideoDescriptorJson>,
    #[serde(default)]
    pub has_more: bool,
    #[serde(skip)]
    pub rejected: Vec<RejectedRecord>,
}

impl FeedResponse {
    pub fn new(videos: Vec<VideoDescriptorJson>, has_more: bool) -> Self {
        Self {
            videos,
            has_more,
            rejected: Vec::new(),
        }
    }
}

/// Wire element that could not be decoded as a [`VideoDescriptorJson`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedRecord {
    /// The element's `id` if it had a string one, empty otherwise
    pub id: String,
    pub reason: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawFeedResponse {
    #[serde(default)]
    videos: Vec<serde_json::Value>,
    #[serde(default)]
    has_more: bool,
}

impl From<RawFeedResponse> for FeedResponse {
    fn from(raw: RawFeedResponse) -> Self {
        let mut videos = Vec::with_capacity(raw.videos.len());
        let mut rejected = Vec::new();

        for value in raw.videos {
            let id = value
                .get("id")
                .and_then(serde_json::Value::as_str)
                .unwrap_or_default()
                .to_string();
            match serde_json::from_value::<VideoDescriptorJson>(value) {
                Ok(record) => videos.push(record),
                Err(e) => rejected.push(RejectedRecord {
                    id,
                    reason: e.to_string(),
                }),
            }
        }

        Self {
            videos,
            has_more: raw.has_more,
            rejected,
        }
    }
}

/// Wire representation of a media variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariantJson {
    pub label: String,
    pub url: String,
    #[serde(default)]
    pub bandwidth: Option<u64>,
}

/// Wire representation of an uploader.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploaderJson {
    pub id: String,
    #[serde(default)]
    pub name: String,
}

/// Wire representation of series metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeriesJson {
    pub id: String,
    pub title: String,
    pub episode: u32,
}

/// Wire representation of a video descriptor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoDescriptorJson {
    pub id: String,
    pub name: String,
    pub video_url: String,
    #[serde(default)]
    pub variants: Vec<VariantJson>,
    /// Seconds
    pub duration: f64,
    #[serde(default)]
    pub views: u64,
    #[serde(default)]
    pub likes: u64,
    #[serde(default)]
    pub shares: u64,
    #[serde(default)]
    pub comments: u64,
    #[serde(default)]
    pub ad_earnings: f64,
    pub uploader: UploaderJson,
    pub uploaded_at: DateTime<Utc>,
    #[serde(default)]
    pub is_liked: bool,
    #[serde(default)]
    pub series: Option<SeriesJson>,
}

impl TryFrom<VideoDescriptorJson> for VideoDescriptor {
    type Error = FeedError;

    fn try_from(json: VideoDescriptorJson) -> Result<Self, Self::Error> {
        if json.id.trim().is_empty() {
            return Err(FeedError::Data {
                reason: "descriptor without id".to_string(),
            });
        }

        let media_url = parse_media_url(&json.id, "videoUrl", &json.video_url)?;

        if !json.duration.is_finite() || json.duration < 0.0 {
            return Err(FeedError::Data {
                reason: format!("video {}: invalid duration {}", json.id, json.duration),
            });
        }
        if !json.ad_earnings.is_finite() || json.ad_earnings < 0.0 {
            return Err(FeedError::Data {
                reason: format!("video {}: invalid adEarnings {}", json.id, json.ad_earnings),
            });
        }

        let variants = json
            .variants
            .into_iter()
            .map(|variant| {
                Ok(MediaVariant {
                    url: parse_media_url(&json.id, "variants.url", &variant.url)?,
                    label: variant.label,
                    bandwidth: variant.bandwidth,
                })
            })
            .collect::<Result<Vec<_>, FeedError>>()?;

        Ok(Self {
            id: VideoId::new(json.id),
            title: json.name,
            media_url: Some(media_url),
            variants,
            duration: Duration::from_secs_f64(json.duration),
            counters: EngagementCounters {
                views: json.views,
                likes: json.likes,
                shares: json.shares,
                comments: json.comments,
                ad_earnings: json.ad_earnings,
            },
            uploader: UploaderRef {
                id: json.uploader.id,
                name: json.uploader.name,
            },
            uploaded_at: json.uploaded_at,
            liked_by_viewer: json.is_liked,
            series: json.series.map(|series| SeriesInfo {
                id: series.id,
                title: series.title,
                episode: series.episode,
            }),
            availability: Availability::Available,
        })
    }
}

impl From<&VideoDescriptor> for VideoDescriptorJson {
    fn from(descriptor: &VideoDescriptor) -> Self {
        Self {
            id: descriptor.id.to_string(),
            name: descriptor.title.clone(),
            video_url: descriptor
                .media_url
                .as_ref()
                .map(Url::to_string)
                .unwrap_or_default(),
            variants: descriptor
                .variants
                .iter()
                .map(|variant| VariantJson {
                    label: variant.label.clone(),
                    url: variant.url.to_string(),
                    bandwidth: variant.bandwidth,
                })
                .collect(),
            duration: descriptor.duration.as_secs_f64(),
            views: descriptor.counters.views,
            likes: descriptor.counters.likes,
            shares: descriptor.counters.shares,
            comments: descriptor.counters.comments,
            ad_earnings: descriptor.counters.ad_earnings,
            uploader: UploaderJson {
                id: descriptor.uploader.id.clone(),
                name: descriptor.uploader.name.clone(),
            },
            uploaded_at: descriptor.uploaded_at,
            is_liked: descriptor.liked_by_viewer,
            series: descriptor.series.as_ref().map(|series| SeriesJson {
                id: series.id.clone(),
                title: series.title.clone(),
                episode: series.episode,
            }),
        }
    }
}

fn parse_media_url(id: &str, field: &str, raw: &str) -> Result<Url, FeedError> {
    Url::parse(raw).map_err(|e| FeedError::Data {
        reason: format!("video {id}: invalid {field} '{raw}': {e}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_json() -> serde_json::Value {
        serde_json::json!({
            "id": "v-1",
            "name": "Sunset",
            "videoUrl": "https://cdn.example.com/v-1.mp4",
            "variants": [{"label": "hls", "url": "https://cdn.example.com/v-1.m3u8", "bandwidth": 800000}],
            "duration": 14.5,
            "views": 1200,
            "likes": 80,
            "shares": 4,
            "comments": 9,
            "adEarnings": 1.25,
            "uploader": {"id": "u-9", "name": "Ana"},
            "uploadedAt": "2026-03-01T12:00:00Z",
            "isLiked": true,
            "series": {"id": "s-1", "title": "Coast", "episode": 2}
        })
    }

    #[test]
    fn test_strict_conversion_of_valid_record() {
        let json: VideoDescriptorJson = serde_json::from_value(sample_json()).unwrap();
        let descriptor = VideoDescriptor::try_from(json).unwrap();

        assert_eq!(descriptor.id.as_str(), "v-1");
        assert_eq!(descriptor.duration, Duration::from_secs_f64(14.5));
        assert_eq!(descriptor.counters.comments, 9);
        assert_eq!(descriptor.variants.len(), 1);
        assert_eq!(descriptor.series.as_ref().map(|s| s.episode), Some(2));
        assert!(descriptor.liked_by_viewer);
        assert!(descriptor.is_playable());
    }

    #[test]
    fn test_invalid_url_is_data_error() {
        let mut value = sample_json();
        value["videoUrl"] = serde_json::json!("not a url");
        let json: VideoDescriptorJson = serde_json::from_value(value).unwrap();

        let error = VideoDescriptor::try_from(json).unwrap_err();
        assert!(matches!(error, FeedError::Data { .. }));
    }

    #[test]
    fn test_negative_duration_is_data_error() {
        let mut value = sample_json();
        value["duration"] = serde_json::json!(-3.0);
        let json: VideoDescriptorJson = serde_json::from_value(value).unwrap();

        assert!(VideoDescriptor::try_from(json).is_err());
    }

    #[test]
    fn test_malformed_element_does_not_reject_page() {
        let body = serde_json::json!({
            "videos": [sample_json(), {"id": "x", "name": "no media"}, 42],
            "hasMore": true
        });

        let response: FeedResponse = serde_json::from_value(body).unwrap();

        assert!(response.has_more);
        assert_eq!(response.videos.len(), 1);
        assert_eq!(response.videos[0].id, "v-1");
        assert_eq!(response.rejected.len(), 2);
        assert_eq!(response.rejected[0].id, "x");
        assert!(response.rejected[0].reason.contains("videoUrl"));
        assert_eq!(response.rejected[1].id, "");
    }

    #[test]
    fn test_engagement_update_returns_new_value() {
        let json: VideoDescriptorJson = serde_json::from_value(sample_json()).unwrap();
        let original = VideoDescriptor::try_from(json).unwrap();

        let counters = EngagementCounters {
            likes: 81,
            ..original.counters
        };
        let updated = original.with_engagement(counters, false);

        assert_eq!(original.counters.likes, 80);
        assert!(original.liked_by_viewer);
        assert_eq!(updated.counters.likes, 81);
        assert!(!updated.liked_by_viewer);
        assert_eq!(updated.id, original.id);
    }

    #[test]
    fn test_placeholder_is_not_playable() {
        let placeholder = VideoDescriptor::unavailable(VideoId::new("v-x"), "missing url");

        assert!(!placeholder.is_playable());
        assert!(placeholder.playback_uri().is_none());
    }
}
