//! Mock collaborators for testing the feed and playback pipeline.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use url::Url;

use crate::feed::{
    Availability, Connectivity, EngagementCounters, FeedApi, FeedError, FeedRequest, FeedResponse,
    LocalGallery, UploaderRef, VideoDescriptor, VideoDescriptorJson, VideoId,
};
use crate::feed::descriptor::UploaderJson;
use crate::playback::{BackendHandle, DecoderBackend, DecoderError, DecoderEvent};

// Fixed upload time so generated data is reproducible
const BASE_UPLOAD_TIMESTAMP: i64 = 1_700_000_000;
const MOCK_MEDIA_HOST: &str = "https://cdn.reelfeed.test/videos";

fn upload_time(offset_secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(BASE_UPLOAD_TIMESTAMP + offset_secs, 0).unwrap_or(DateTime::UNIX_EPOCH)
}

/// Playable descriptor whose media URL ends in `/{id}.mp4`.
pub fn descriptor(id: &str) -> VideoDescriptor {
    VideoDescriptor {
        id: VideoId::new(id),
        title: format!("Video {id}"),
        media_url: Url::parse(&format!("{MOCK_MEDIA_HOST}/{id}.mp4")).ok(),
        variants: Vec::new(),
        duration: Duration::from_secs(30),
        counters: EngagementCounters::default(),
        uploader: UploaderRef {
            id: "uploader-1".to_string(),
            name: "Mock Uploader".to_string(),
        },
        uploaded_at: upload_time(0),
        liked_by_viewer: false,
        series: None,
        availability: Availability::Available,
    }
}

/// `count` playable descriptors with ids `{prefix}0`, `{prefix}1`, ...
pub fn descriptors(prefix: &str, count: usize) -> Vec<VideoDescriptor> {
    (0..count)
        .map(|i| descriptor(&format!("{prefix}{i}")))
        .collect()
}

/// Valid wire page of `count` records with ids `{prefix}0`, `{prefix}1`, ...
pub fn wire_page(prefix: &str, count: usize, has_more: bool) -> FeedResponse {
    let videos = (0..count)
        .map(|i| VideoDescriptorJson {
            id: format!("{prefix}{i}"),
            name: format!("Clip {i}"),
            video_url: format!("{MOCK_MEDIA_HOST}/{prefix}{i}.mp4"),
            variants: Vec::new(),
            duration: 15.0 + i as f64,
            views: 100 * i as u64,
            likes: 10 * i as u64,
            shares: i as u64,
            comments: 0,
            ad_earnings: 0.0,
            uploader: UploaderJson {
                id: "uploader-1".to_string(),
                name: "Mock Uploader".to_string(),
            },
            uploaded_at: upload_time(i as i64 * 60),
            is_liked: false,
            series: None,
        })
        .collect();

    FeedResponse::new(videos, has_more)
}

/// Scripted feed API.
///
/// Each page has a FIFO queue of responses; unscripted calls return an
/// empty final page.
#[derive(Debug, Default)]
pub struct MockFeedApi {
    responses: Mutex<HashMap<u32, VecDeque<Result<FeedResponse, FeedError>>>>,
    requests: Mutex<Vec<FeedRequest>>,
}

impl MockFeedApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a response for the next request of `page`.
    pub fn respond(&self, page: u32, response: Result<FeedResponse, FeedError>) {
        self.responses
            .lock()
            .entry(page)
            .or_default()
            .push_back(response);
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }

    /// Every request received so far, in order.
    pub fn requests(&self) -> Vec<FeedRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl FeedApi for MockFeedApi {
    async fn fetch_feed(&self, request: &FeedRequest) -> Result<FeedResponse, FeedError> {
        self.requests.lock().push(request.clone());
        self.responses
            .lock()
            .get_mut(&request.page)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| Ok(FeedResponse::default()))
    }
}

/// Connectivity probe toggled by the test.
#[derive(Debug)]
pub struct MockConnectivity {
    online: AtomicBool,
}

impl MockConnectivity {
    pub fn online() -> Self {
        Self {
            online: AtomicBool::new(true),
        }
    }

    pub fn offline() -> Self {
        Self {
            online: AtomicBool::new(false),
        }
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }
}

#[async_trait]
impl Connectivity for MockConnectivity {
    async fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }
}

/// Gallery returning a fixed list.
#[derive(Debug, Default)]
pub struct MockGallery {
    videos: Mutex<Vec<VideoDescriptor>>,
}

impl MockGallery {
    pub fn set_videos(&self, videos: Vec<VideoDescriptor>) {
        *self.videos.lock() = videos;
    }
}

#[async_trait]
impl LocalGallery for MockGallery {
    async fn list_videos(&self, limit: usize) -> Result<Vec<VideoDescriptor>, std::io::Error> {
        Ok(self.videos.lock().iter().take(limit).cloned().collect())
    }
}

/// Decoder backend recording every call.
///
/// Handles are issued sequentially from 1. Videos are identified by the
/// file stem of their media URL.
#[derive(Debug)]
pub struct MockDecoderBackend {
    next_handle: AtomicU64,
    init_delay: Duration,
    init_calls: AtomicUsize,
    failing: Mutex<HashSet<String>>,
    fail_release: AtomicBool,
    issued: Mutex<Vec<(String, BackendHandle)>>,
    operations: Mutex<HashMap<BackendHandle, Vec<&'static str>>>,
    volumes: Mutex<HashMap<BackendHandle, f32>>,
    disposals: Mutex<HashMap<BackendHandle, usize>>,
    events: broadcast::Sender<DecoderEvent>,
}

impl MockDecoderBackend {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            next_handle: AtomicU64::new(1),
            init_delay: Duration::ZERO,
            init_calls: AtomicUsize::new(0),
            failing: Mutex::new(HashSet::new()),
            fail_release: AtomicBool::new(false),
            issued: Mutex::new(Vec::new()),
            operations: Mutex::new(HashMap::new()),
            volumes: Mutex::new(HashMap::new()),
            disposals: Mutex::new(HashMap::new()),
            events,
        }
    }

    /// Delays every initialization by `delay`.
    pub fn with_init_delay(mut self, delay: Duration) -> Self {
        self.init_delay = delay;
        self
    }

    /// Makes every initialization of `video` fail.
    pub fn fail_init_for(&self, video: &str) {
        self.failing.lock().insert(video.to_string());
    }

    pub fn fail_release(&self, fail: bool) {
        self.fail_release.store(fail, Ordering::SeqCst);
    }

    pub fn init_count(&self) -> usize {
        self.init_calls.load(Ordering::SeqCst)
    }

    /// Most recent handle issued for `video`.
    pub fn handle_for(&self, video: &str) -> Option<BackendHandle> {
        self.issued
            .lock()
            .iter()
            .rev()
            .find(|(stem, _)| stem == video)
            .map(|(_, handle)| *handle)
    }

    pub fn dispose_count(&self, handle: BackendHandle) -> usize {
        self.disposals.lock().get(&handle).copied().unwrap_or(0)
    }

    /// Dispose calls across every handle issued for `video`.
    pub fn dispose_count_for(&self, video: &str) -> usize {
        let handles: Vec<BackendHandle> = self
            .issued
            .lock()
            .iter()
            .filter(|(stem, _)| stem == video)
            .map(|(_, handle)| *handle)
            .collect();
        handles.into_iter().map(|h| self.dispose_count(h)).sum()
    }

    pub fn total_disposals(&self) -> usize {
        self.disposals.lock().values().sum()
    }

    pub fn volume_of(&self, handle: BackendHandle) -> Option<f32> {
        self.volumes.lock().get(&handle).copied()
    }

    /// Commands received by `handle`, excluding initialization.
    pub fn operations(&self, handle: BackendHandle) -> Vec<&'static str> {
        self.operations
            .lock()
            .get(&handle)
            .cloned()
            .unwrap_or_default()
    }

    /// Publishes an event to subscribers.
    pub fn emit(&self, event: DecoderEvent) {
        // No subscribers is fine for tests that never listen
        let _ = self.events.send(event);
    }

    fn record(&self, handle: BackendHandle, operation: &'static str) {
        self.operations
            .lock()
            .entry(handle)
            .or_default()
            .push(operation);
    }
}

impl Default for MockDecoderBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn video_stem(uri: &Url) -> String {
    let file = uri.path().rsplit('/').next().unwrap_or_default();
    file.strip_suffix(".mp4").unwrap_or(file).to_string()
}

#[async_trait]
impl DecoderBackend for MockDecoderBackend {
    async fn init(
        &self,
        uri: &Url,
        _headers: &HashMap<String, String>,
    ) -> Result<BackendHandle, DecoderError> {
        self.init_calls.fetch_add(1, Ordering::SeqCst);
        if !self.init_delay.is_zero() {
            tokio::time::sleep(self.init_delay).await;
        }

        let stem = video_stem(uri);
        if self.failing.lock().contains(&stem) {
            return Err(DecoderError::InitFailed {
                reason: format!("mock failure for {stem}"),
            });
        }

        let handle = BackendHandle(self.next_handle.fetch_add(1, Ordering::SeqCst));
        self.issued.lock().push((stem, handle));
        Ok(handle)
    }

    async fn play(&self, handle: BackendHandle) -> Result<(), DecoderError> {
        self.record(handle, "play");
        Ok(())
    }

    async fn pause(&self, handle: BackendHandle) -> Result<(), DecoderError> {
        self.record(handle, "pause");
        Ok(())
    }

    async fn seek(&self, handle: BackendHandle, _position: Duration) -> Result<(), DecoderError> {
        self.record(handle, "seek");
        Ok(())
    }

    async fn set_volume(&self, handle: BackendHandle, volume: f32) -> Result<(), DecoderError> {
        self.record(handle, "set_volume");
        self.volumes.lock().insert(handle, volume);
        Ok(())
    }

    async fn dispose(&self, handle: BackendHandle) -> Result<(), DecoderError> {
        self.record(handle, "dispose");
        *self.disposals.lock().entry(handle).or_default() += 1;
        if self.fail_release.load(Ordering::SeqCst) {
            return Err(DecoderError::ReleaseFailed {
                reason: "mock release failure".to_string(),
            });
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<DecoderEvent> {
        self.events.subscribe()
    }
}
