//! Remote feed API contract and its HTTP implementation.

use async_trait::async_trait;

use super::descriptor::FeedResponse;
use super::{FeedError, FeedType};
use crate::config::NetworkConfig;

/// One request against the remote feed API.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedRequest {
    pub page: u32,
    pub limit: u32,
    pub feed_type: FeedType,
    pub device_id: String,
    pub platform: String,
    /// Ask the server to reset its "already shown" dedup state
    pub clear_session: bool,
    pub auth_token: Option<String>,
}

/// Remote source of feed pages.
///
/// Implementations perform exactly one round trip per call; retries and
/// fallbacks belong to [`super::FeedSource`].
#[async_trait]
pub trait FeedApi: Send + Sync {
    /// Fetches one page of raw descriptors.
    ///
    /// # Errors
    /// - `FeedError::Network` - Transport failure or host unreachable
    /// - `FeedError::Server` - Non-success HTTP status
    /// - `FeedError::Data` - Body is not a valid feed response
    /// - `FeedError::Timeout` - Request exceeded the configured bound
    async fn fetch_feed(&self, request: &FeedRequest) -> Result<FeedResponse, FeedError>;
}

/// Reports whether the device currently has network access.
#[async_trait]
pub trait Connectivity: Send + Sync {
    async fn is_online(&self) -> bool;
}

/// Connectivity probe for environments without a reachability signal.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysOnline;

#[async_trait]
impl Connectivity for AlwaysOnline {
    async fn is_online(&self) -> bool {
        true
    }
}

/// HTTP implementation of [`FeedApi`].
///
/// Issues `GET {base}/feed?page=..&limit=..&feedType=..&deviceId=..&platform=..`
/// with an optional bearer token.
pub struct HttpFeedApi {
    base_url: String,
    client: reqwest::Client,
    timeout_secs: u64,
}

impl HttpFeedApi {
    /// Creates a client using network configuration for timeout and user agent.
    ///
    /// # Errors
    /// - `FeedError::Network` - The HTTP client could not be constructed
    pub fn new(config: &NetworkConfig) -> Result<Self, FeedError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(config.user_agent)
            .redirect(reqwest::redirect::Policy::limited(3))
            .build()
            .map_err(|e| FeedError::Network {
                reason: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            client,
            timeout_secs: config.request_timeout.as_secs(),
        })
    }

    /// Builds the query parameters for a request.
    pub(crate) fn query_pairs(request: &FeedRequest) -> Vec<(&'static str, String)> {
        let mut pairs = vec![
            ("page", request.page.to_string()),
            ("limit", request.limit.to_string()),
            ("feedType", request.feed_type.as_str().to_string()),
            ("deviceId", request.device_id.clone()),
            ("platform", request.platform.clone()),
        ];
        if request.clear_session {
            pairs.push(("clearSession", "true".to_string()));
        }
        pairs
    }

    fn map_transport_error(&self, error: reqwest::Error) -> FeedError {
        if error.is_timeout() {
            FeedError::Timeout {
                seconds: self.timeout_secs,
            }
        } else if let Some(status) = error.status() {
            FeedError::Server {
                status: status.as_u16(),
                reason: error.to_string(),
            }
        } else {
            FeedError::Network {
                reason: error.to_string(),
            }
        }
    }
}

#[async_trait]
impl FeedApi for HttpFeedApi {
    async fn fetch_feed(&self, request: &FeedRequest) -> Result<FeedResponse, FeedError> {
        let url = format!("{}/feed", self.base_url);
        let mut builder = self.client.get(&url).query(&Self::query_pairs(request));
        if let Some(token) = &request.auth_token {
            builder = builder.bearer_auth(token);
        }

        tracing::debug!(
            "Requesting {} page {} (limit {}, clear_session={})",
            request.feed_type,
            request.page,
            request.limit,
            request.clear_session
        );

        let response = builder
            .send()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FeedError::Server {
                status: status.as_u16(),
                reason: status
                    .canonical_reason()
                    .unwrap_or("unexpected status")
                    .to_string(),
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        serde_json::from_str::<FeedResponse>(&body).map_err(|e| FeedError::Data {
            reason: format!("invalid feed response: {e}"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(clear_session: bool) -> FeedRequest {
        FeedRequest {
            page: 2,
            limit: 10,
            feed_type: FeedType::Trending,
            device_id: "device-1".to_string(),
            platform: "linux".to_string(),
            clear_session,
            auth_token: None,
        }
    }

    #[test]
    fn test_query_pairs_include_required_fields() {
        let pairs = HttpFeedApi::query_pairs(&request(false));

        assert!(pairs.contains(&("page", "2".to_string())));
        assert!(pairs.contains(&("feedType", "trending".to_string())));
        assert!(pairs.contains(&("deviceId", "device-1".to_string())));
        assert!(!pairs.iter().any(|(key, _)| *key == "clearSession"));
    }

    #[test]
    fn test_query_pairs_forward_clear_session() {
        let pairs = HttpFeedApi::query_pairs(&request(true));

        assert!(pairs.contains(&("clearSession", "true".to_string())));
    }

    #[test]
    fn test_client_builds_from_default_config() {
        let api = HttpFeedApi::new(&NetworkConfig::default()).unwrap();

        assert!(api.base_url.ends_with("/api"));
        assert_eq!(api.timeout_secs, 15);
    }

    #[tokio::test]
    async fn test_always_online() {
        assert!(AlwaysOnline.is_online().await);
    }

    #[test]
    fn test_feed_response_tolerates_missing_fields() {
        let response: FeedResponse = serde_json::from_str("{}").unwrap();

        assert!(response.videos.is_empty());
        assert!(!response.has_more);
    }
}
