//! Simulated decoder backend with lifecycle auditing.
//!
//! Besides driving the pool like a real decoder, [`SimDecoderBackend`]
//! records misuse it would otherwise hide: commands sent to released
//! handles, double releases and the peak number of live decoders.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use reelfeed_core::playback::{BackendHandle, DecoderBackend, DecoderError, DecoderEvent};
use tokio::sync::broadcast;
use url::Url;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Lifecycle violations observed by the simulated decoder.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecoderAudit {
    /// Decoders initialized and not yet released
    pub live: usize,
    /// Highest `live` ever observed
    pub peak_live: usize,
    pub initialized: u64,
    pub released: u64,
    /// Release calls for a handle that was already released or never issued
    pub double_releases: u64,
    /// play/pause/seek/volume calls on a released handle
    pub commands_after_release: u64,
}

#[derive(Debug, Default)]
struct LiveDecoders {
    handles: HashMap<BackendHandle, Url>,
    released: HashSet<BackendHandle>,
    peak: usize,
}

/// Decoder backend with seeded failures and latency.
pub struct SimDecoderBackend {
    init_latency: Duration,
    failure_rate: f64,
    failing_uris: Mutex<HashSet<String>>,
    rng: Mutex<ChaCha8Rng>,
    next_handle: AtomicU64,
    live: Mutex<LiveDecoders>,
    initialized: AtomicU64,
    released: AtomicU64,
    double_releases: AtomicU64,
    commands_after_release: AtomicU64,
    init_calls: AtomicUsize,
    events: broadcast::Sender<DecoderEvent>,
}

impl SimDecoderBackend {
    pub fn new(seed: u64) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            init_latency: Duration::ZERO,
            failure_rate: 0.0,
            failing_uris: Mutex::new(HashSet::new()),
            rng: Mutex::new(ChaCha8Rng::seed_from_u64(seed)),
            next_handle: AtomicU64::new(1),
            live: Mutex::new(LiveDecoders::default()),
            initialized: AtomicU64::new(0),
            released: AtomicU64::new(0),
            double_releases: AtomicU64::new(0),
            commands_after_release: AtomicU64::new(0),
            init_calls: AtomicUsize::new(0),
            events,
        }
    }

    pub fn with_init_latency(mut self, latency: Duration) -> Self {
        self.init_latency = latency;
        self
    }

    /// Fails this fraction of initializations, drawn from the seeded RNG.
    pub fn with_failure_rate(mut self, rate: f64) -> Self {
        self.failure_rate = rate.clamp(0.0, 1.0);
        self
    }

    /// Makes every initialization of `uri` fail.
    pub fn fail_uri(&self, uri: &Url) {
        self.failing_uris.lock().insert(uri.to_string());
    }

    pub fn init_calls(&self) -> usize {
        self.init_calls.load(Ordering::SeqCst)
    }

    /// Live handle currently decoding `uri`, if any.
    pub fn handle_for(&self, uri: &Url) -> Option<BackendHandle> {
        self.live
            .lock()
            .handles
            .iter()
            .find(|(_, live_uri)| *live_uri == uri)
            .map(|(handle, _)| *handle)
    }

    /// Emits a buffering stall or recovery for `handle`.
    pub fn emit_buffering(&self, handle: BackendHandle, active: bool) {
        self.emit(DecoderEvent::Buffering { handle, active });
    }

    /// Emits a fatal playback error for `handle`.
    pub fn emit_error(&self, handle: BackendHandle, reason: impl Into<String>) {
        self.emit(DecoderEvent::Error {
            handle,
            reason: reason.into(),
        });
    }

    fn emit(&self, event: DecoderEvent) {
        if self.events.send(event).is_err() {
            tracing::trace!("Dropping simulated decoder event without subscribers");
        }
    }

    pub fn audit(&self) -> DecoderAudit {
        let live = self.live.lock();
        DecoderAudit {
            live: live.handles.len(),
            peak_live: live.peak,
            initialized: self.initialized.load(Ordering::SeqCst),
            released: self.released.load(Ordering::SeqCst),
            double_releases: self.double_releases.load(Ordering::SeqCst),
            commands_after_release: self.commands_after_release.load(Ordering::SeqCst),
        }
    }

    fn command(&self, handle: BackendHandle, operation: &'static str) -> Result<(), DecoderError> {
        let live = self.live.lock();
        if live.handles.contains_key(&handle) {
            return Ok(());
        }
        if live.released.contains(&handle) {
            self.commands_after_release.fetch_add(1, Ordering::SeqCst);
            tracing::warn!("Simulated decoder got {} on released {}", operation, handle);
        }
        Err(DecoderError::OperationFailed {
            operation,
            reason: format!("{handle} is not live"),
        })
    }
}

#[async_trait]
impl DecoderBackend for SimDecoderBackend {
    async fn init(
        &self,
        uri: &Url,
        _headers: &HashMap<String, String>,
    ) -> Result<BackendHandle, DecoderError> {
        self.init_calls.fetch_add(1, Ordering::SeqCst);
        if !self.init_latency.is_zero() {
            tokio::time::sleep(self.init_latency).await;
        }

        let forced = self.failing_uris.lock().contains(uri.as_str());
        let unlucky = self.failure_rate > 0.0 && self.rng.lock().random_bool(self.failure_rate);
        if forced || unlucky {
            return Err(DecoderError::InitFailed {
                reason: format!("simulated decoder could not open {uri}"),
            });
        }

        let handle = BackendHandle(self.next_handle.fetch_add(1, Ordering::SeqCst));
        let mut live = self.live.lock();
        live.handles.insert(handle, uri.clone());
        live.peak = live.peak.max(live.handles.len());
        self.initialized.fetch_add(1, Ordering::SeqCst);
        Ok(handle)
    }

    async fn play(&self, handle: BackendHandle) -> Result<(), DecoderError> {
        self.command(handle, "play")
    }

    async fn pause(&self, handle: BackendHandle) -> Result<(), DecoderError> {
        self.command(handle, "pause")
    }

    async fn seek(&self, handle: BackendHandle, _position: Duration) -> Result<(), DecoderError> {
        self.command(handle, "seek")
    }

    async fn set_volume(&self, handle: BackendHandle, _volume: f32) -> Result<(), DecoderError> {
        self.command(handle, "set_volume")
    }

    async fn dispose(&self, handle: BackendHandle) -> Result<(), DecoderError> {
        let mut live = self.live.lock();
        if live.handles.remove(&handle).is_none() {
            self.double_releases.fetch_add(1, Ordering::SeqCst);
            return Err(DecoderError::ReleaseFailed {
                reason: format!("{handle} was not live"),
            });
        }
        live.released.insert(handle);
        self.released.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<DecoderEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uri(name: &str) -> Url {
        Url::parse(&format!("https://media.reelfeed.sim/{name}.mp4")).unwrap()
    }

    #[tokio::test]
    async fn test_audit_tracks_lifecycle() {
        let backend = SimDecoderBackend::new(1);
        let headers = HashMap::new();

        let a = backend.init(&uri("a"), &headers).await.unwrap();
        let b = backend.init(&uri("b"), &headers).await.unwrap();
        backend.dispose(a).await.unwrap();

        assert!(backend.play(a).await.is_err());
        assert!(backend.dispose(a).await.is_err());
        assert!(backend.play(b).await.is_ok());

        let audit = backend.audit();
        assert_eq!(audit.live, 1);
        assert_eq!(audit.peak_live, 2);
        assert_eq!(audit.double_releases, 1);
        assert_eq!(audit.commands_after_release, 1);
        assert_eq!(backend.handle_for(&uri("b")), Some(b));
    }

    #[tokio::test]
    async fn test_forced_and_seeded_failures() {
        let backend = SimDecoderBackend::new(9).with_failure_rate(1.0);
        assert!(backend.init(&uri("x"), &HashMap::new()).await.is_err());

        let backend = SimDecoderBackend::new(9);
        backend.fail_uri(&uri("x"));
        assert!(backend.init(&uri("x"), &HashMap::new()).await.is_err());
        assert!(backend.init(&uri("y"), &HashMap::new()).await.is_ok());
        assert_eq!(backend.init_calls(), 2);
    }
}
