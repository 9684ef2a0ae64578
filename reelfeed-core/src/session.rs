//! Per-session feed service.
//!
//! A [`FeedSession`] owns one feed type's pipeline: it pages descriptors in
//! through the [`FeedSource`], ranks each batch, appends it to the
//! [`PlaybackResourcePool`], keeps the preload window on the current index
//! and forwards decoder events into the pool. Nothing here is global; a
//! session is torn down with [`FeedSession::shutdown`].

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::feed::{EngagementCounters, FeedSource, FeedType, PageOrigin, VideoId};
use crate::playback::{PlaybackResourcePool, PoolStats, PreloadOutcome};
use crate::ranking::RankingEngine;
use crate::{ReelfeedError, Result};

/// Result of loading one page into the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageSummary {
    pub page: u32,
    /// Descriptors fetched, before de-duplication against the live feed
    pub fetched: usize,
    /// Descriptors actually appended to the live feed
    pub appended: usize,
    pub has_more: bool,
    pub origin: PageOrigin,
}

/// Session statistics for monitoring.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionStats {
    pub session_id: Uuid,
    pub feed_type: FeedType,
    pub pages_loaded: u32,
    pub next_page: u32,
    pub has_more: bool,
    /// Whether the last page came from cache or the local gallery
    pub offline: bool,
    pub pool: PoolStats,
}

#[derive(Debug)]
struct PagingState {
    next_page: u32,
    pages_loaded: u32,
    has_more: bool,
    last_origin: Option<PageOrigin>,
}

impl Default for PagingState {
    fn default() -> Self {
        Self {
            next_page: 1,
            pages_loaded: 0,
            has_more: true,
            last_origin: None,
        }
    }
}

/// Explicitly owned feed pipeline for one viewing session.
pub struct FeedSession {
    id: Uuid,
    feed_type: FeedType,
    source: FeedSource,
    ranking: RankingEngine,
    pool: PlaybackResourcePool,
    session_token: Option<String>,
    paging: tokio::sync::Mutex<PagingState>,
    event_pump: parking_lot::Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl FeedSession {
    /// Creates a session ranking batches with the source's configured policy.
    pub fn new(feed_type: FeedType, source: FeedSource, pool: PlaybackResourcePool) -> Self {
        let ranking = RankingEngine::new(source.config().ranking);
        Self {
            id: Uuid::new_v4(),
            feed_type,
            source,
            ranking,
            pool,
            session_token: None,
            paging: tokio::sync::Mutex::new(PagingState::default()),
            event_pump: parking_lot::Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    /// Sends `token` as bearer authentication with every page request.
    pub fn with_session_token(mut self, token: impl Into<String>) -> Self {
        self.session_token = Some(token.into());
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn feed_type(&self) -> FeedType {
        self.feed_type
    }

    pub fn pool(&self) -> &PlaybackResourcePool {
        &self.pool
    }

    pub fn source(&self) -> &FeedSource {
        &self.source
    }

    /// Loads the first page, starts the decoder event pump and preloads
    /// around index 0.
    ///
    /// # Errors
    /// - `ReelfeedError::Feed` - First page could not be fetched and no fallback existed
    /// - `ReelfeedError::Configuration` - Session was already shut down
    pub async fn start(&self) -> Result<PageSummary> {
        self.ensure_open()?;
        tracing::info!("Starting {} feed session {}", self.feed_type, self.id);

        let summary = self.load_page(true).await?;
        self.spawn_event_pump();

        if self.pool.feed_len().await > 0 {
            self.pool.preload_window(0).await?;
        }
        Ok(summary)
    }

    /// Loads the next page if the feed has more.
    ///
    /// Returns `None` once pagination has stopped.
    ///
    /// # Errors
    /// - `ReelfeedError::Feed` - The page request failed
    pub async fn load_next_page(&self) -> Result<Option<PageSummary>> {
        self.ensure_open()?;
        {
            let paging = self.paging.lock().await;
            if !paging.has_more {
                return Ok(None);
            }
        }
        self.load_page(false).await.map(Some)
    }

    async fn load_page(&self, first: bool) -> Result<PageSummary> {
        let mut paging = self.paging.lock().await;
        let page_number = if first { 1 } else { paging.next_page };
        let page_size = self.source.config().page_size;

        let page = self
            .source
            .fetch_page(
                page_number,
                page_size,
                self.feed_type,
                self.session_token.as_deref(),
                false,
            )
            .await?;

        let fetched = page.len();
        let ranked = self.ranking.rank(page.videos);
        let appended = self.pool.append(ranked).await;

        paging.next_page = page_number + 1;
        paging.pages_loaded += 1;
        paging.has_more = page.has_more;
        paging.last_origin = Some(page.origin);

        if matches!(page.origin, PageOrigin::Cache | PageOrigin::Gallery) {
            tracing::info!(
                "Page {} of {} served offline from {:?}",
                page_number,
                self.feed_type,
                page.origin
            );
        } else {
            tracing::debug!(
                "Page {} of {}: {} fetched, {} appended, has_more={}",
                page_number,
                self.feed_type,
                fetched,
                appended,
                page.has_more
            );
        }

        Ok(PageSummary {
            page: page_number,
            fetched,
            appended,
            has_more: page.has_more,
            origin: page.origin,
        })
    }

    /// Moves the current index, adjusting the preload window, trimming the
    /// live feed and prefetching the next page when close to the end.
    ///
    /// Prefetch failures are logged; the scroll itself still succeeds.
    ///
    /// # Errors
    /// - `ReelfeedError::Playback` - `index` is outside the live feed
    pub async fn scroll_to(&self, index: usize) -> Result<PreloadOutcome> {
        self.ensure_open()?;
        let outcome = self.pool.preload_window(index).await?;
        if let Some(video) = self.pool.video_at(index).await {
            self.pool.mark_seen(&video.id).await;
        }
        self.pool.trim().await;

        let current = self.pool.current_index().await;
        let remaining = self
            .pool
            .feed_len()
            .await
            .saturating_sub(current + 1);
        if remaining <= self.source.config().prefetch_threshold {
            match self.load_next_page().await {
                Ok(Some(summary)) => {
                    tracing::debug!("Prefetched page {} at index {}", summary.page, current);
                }
                Ok(None) => {}
                Err(e) => tracing::warn!("Prefetch at index {} failed: {}", current, e),
            }
        }

        Ok(outcome)
    }

    /// Plays the item at the current index.
    ///
    /// # Errors
    /// - `ReelfeedError::Playback` - The current item has no usable decoder
    pub async fn play_current(&self) -> Result<bool> {
        self.ensure_open()?;
        let index = self.pool.current_index().await;
        Ok(self.pool.play(index).await?)
    }

    /// Pauses the item at the current index.
    ///
    /// # Errors
    /// - `ReelfeedError::Playback` - The backend rejected the pause
    pub async fn pause_current(&self) -> Result<bool> {
        self.ensure_open()?;
        let index = self.pool.current_index().await;
        Ok(self.pool.pause(index).await?)
    }

    /// Replaces counters and like flag after an engagement update.
    pub async fn record_engagement(
        &self,
        video_id: &VideoId,
        counters: EngagementCounters,
        liked_by_viewer: bool,
    ) -> bool {
        self.pool
            .update_engagement(video_id, counters, liked_by_viewer)
            .await
    }

    fn spawn_event_pump(&self) {
        let mut pump = self.event_pump.lock();
        if pump.is_some() {
            return;
        }

        let pool = self.pool.clone();
        let mut events = pool.subscribe_events();
        let session_id = self.id;
        *pump = Some(tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        if let Err(e) = pool.apply_event(event).await {
                            tracing::warn!("Session {}: {}", session_id, e);
                        }
                    }
                    Err(RecvError::Lagged(missed)) => {
                        tracing::warn!("Session {} missed {} decoder events", session_id, missed);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            tracing::debug!("Decoder event stream closed for session {}", session_id);
        }));
    }

    pub async fn statistics(&self) -> SessionStats {
        let paging = self.paging.lock().await;
        SessionStats {
            session_id: self.id,
            feed_type: self.feed_type,
            pages_loaded: paging.pages_loaded,
            next_page: paging.next_page,
            has_more: paging.has_more,
            offline: matches!(
                paging.last_origin,
                Some(PageOrigin::Cache | PageOrigin::Gallery)
            ),
            pool: self.pool.statistics().await,
        }
    }

    /// Stops the event pump and releases every decoder.
    ///
    /// Idempotent; returns the number of handles released by this call.
    pub async fn shutdown(&self) -> usize {
        if self.closed.swap(true, Ordering::SeqCst) {
            return 0;
        }
        if let Some(pump) = self.event_pump.lock().take() {
            pump.abort();
        }
        let released = self.pool.shutdown().await;
        tracing::info!(
            "Feed session {} shut down, {} decoders released",
            self.id,
            released
        );
        released
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(ReelfeedError::Configuration {
                reason: format!("feed session {} is shut down", self.id),
            });
        }
        Ok(())
    }
}

impl Drop for FeedSession {
    fn drop(&mut self) {
        if let Some(pump) = self.event_pump.get_mut().take() {
            pump.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::cache::OfflineCache;
    use crate::clock::ManualClock;
    use crate::config::ReelfeedConfig;
    use crate::playback::{DecoderEvent, HandleState};
    use crate::test_mocks::{MockDecoderBackend, MockFeedApi, wire_page};

    struct Fixture {
        api: Arc<MockFeedApi>,
        backend: Arc<MockDecoderBackend>,
        session: FeedSession,
    }

    fn fixture() -> Fixture {
        let config = ReelfeedConfig::for_testing();
        let clock = ManualClock::shared();
        let api = Arc::new(MockFeedApi::new());
        let backend = Arc::new(MockDecoderBackend::new());
        let cache = Arc::new(OfflineCache::in_memory(config.cache.clone(), clock.clone()));
        let source = FeedSource::new(
            api.clone(),
            cache,
            config.feed.clone(),
            &config.network,
            clock.clone(),
        );
        let pool = PlaybackResourcePool::new(backend.clone(), config.playback.clone(), clock);
        let session = FeedSession::new(FeedType::Main, source, pool).with_session_token("secret");

        Fixture {
            api,
            backend,
            session,
        }
    }

    #[tokio::test]
    async fn test_start_loads_ranks_and_preloads() {
        let f = fixture();
        f.api.respond(1, Ok(wire_page("a", 10, true)));

        let summary = f.session.start().await.unwrap();
        f.session.pool().settle().await;

        assert_eq!(summary.page, 1);
        assert_eq!(summary.appended, 10);
        assert_eq!(summary.origin, PageOrigin::Remote);
        // Recency first: the newest upload leads
        let first = f.session.pool().video_at(0).await.unwrap();
        assert_eq!(first.id.as_str(), "a9");
        assert_eq!(f.session.pool().live_handles().await.len(), 2);
        assert_eq!(
            f.api.requests()[0].auth_token.as_deref(),
            Some("secret")
        );
    }

    #[tokio::test]
    async fn test_scrolling_near_end_prefetches_next_page() {
        let f = fixture();
        f.api.respond(1, Ok(wire_page("a", 10, true)));
        f.api.respond(2, Ok(wire_page("b", 10, false)));
        f.session.start().await.unwrap();

        f.session.scroll_to(6).await.unwrap();

        assert_eq!(f.session.pool().feed_len().await, 20);
        let stats = f.session.statistics().await;
        assert_eq!(stats.pages_loaded, 2);
        assert!(!stats.has_more);
        assert_eq!(f.session.load_next_page().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_event_pump_applies_decoder_errors() {
        let f = fixture();
        f.api.respond(1, Ok(wire_page("a", 5, false)));
        f.session.start().await.unwrap();
        f.session.pool().settle().await;
        let current = f.session.pool().video_at(0).await.unwrap().id;
        let handle = f.backend.handle_for(current.as_str()).unwrap();

        f.backend.emit(DecoderEvent::Error {
            handle,
            reason: "network stall".into(),
        });

        tokio::time::timeout(Duration::from_secs(1), async {
            while f.session.pool().handle_state(&current).await.is_some() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        assert_eq!(f.backend.dispose_count(handle), 1);
    }

    #[tokio::test]
    async fn test_play_current_and_shutdown() {
        let f = fixture();
        f.api.respond(1, Ok(wire_page("a", 5, false)));
        f.session.start().await.unwrap();
        f.session.pool().settle().await;

        assert!(f.session.play_current().await.unwrap());
        let current = f.session.pool().video_at(0).await.unwrap().id;
        assert_eq!(
            f.session.pool().handle_state(&current).await,
            Some(HandleState::Playing)
        );

        assert_eq!(f.session.shutdown().await, 2);
        assert_eq!(f.session.shutdown().await, 0);
        assert!(f.session.pool().live_handles().await.is_empty());
        assert!(matches!(
            f.session.play_current().await,
            Err(ReelfeedError::Configuration { .. })
        ));
    }

    #[tokio::test]
    async fn test_empty_feed_starts_without_preload() {
        let f = fixture();

        let summary = f.session.start().await.unwrap();

        assert_eq!(summary.appended, 0);
        assert!(!summary.has_more);
        assert!(f.session.pool().live_handles().await.is_empty());
    }
}
