//! Decoder pool around the current feed index.
//!
//! All pool state sits behind one async mutex shared with the
//! [`DisposalCoordinator`]. Backend calls that must not interleave with
//! disposal (play, pause, release) are awaited while holding it.

use std::collections::{HashMap, HashSet};
use std::ops::RangeInclusive;
use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use url::Url;

use super::decoder::{BackendHandle, DecoderBackend, DecoderError, DecoderEvent};
use super::disposal::{DisposalCoordinator, DisposalOutcome, DisposalStats};
use super::handle::{DecoderHandle, HandleId, HandleState, VideoSlot};
use super::PlaybackError;
use crate::clock::{Clock, elapsed_between};
use crate::config::PlaybackConfig;
use crate::feed::{EngagementCounters, VideoDescriptor, VideoId};

type SharedInit = Shared<BoxFuture<'static, Result<BackendHandle, DecoderError>>>;

/// Mutable pool state guarded by the pool mutex.
#[derive(Default)]
pub(crate) struct PoolState {
    pub(crate) feed: Vec<VideoDescriptor>,
    pub(crate) current: usize,
    pub(crate) slots: HashMap<VideoId, VideoSlot>,
    /// Initializations in flight, keyed by video and owned by one handle
    pub(crate) in_flight: HashMap<VideoId, (HandleId, SharedInit)>,
    /// Handles disposed before their initialization completed
    pub(crate) orphans: HashSet<HandleId>,
    pub(crate) playing: Option<VideoId>,
    next_handle: u64,
}

impl PoolState {
    fn video_at(&self, index: usize) -> Result<VideoId, PlaybackError> {
        self.feed
            .get(index)
            .map(|video| video.id.clone())
            .ok_or(PlaybackError::IndexOutOfRange {
                index,
                len: self.feed.len(),
            })
    }

    fn handle(&self, video_id: &VideoId) -> Option<&DecoderHandle> {
        self.slots.get(video_id).and_then(|slot| slot.handle.as_ref())
    }

    fn handle_mut(&mut self, video_id: &VideoId) -> Option<&mut DecoderHandle> {
        self.slots
            .get_mut(video_id)
            .and_then(|slot| slot.handle.as_mut())
    }

    /// Handles holding or reserving a decoder.
    fn live_count(&self) -> usize {
        self.slots.values().filter(|s| s.handle.is_some()).count()
    }

    fn count_where(&self, predicate: impl Fn(&DecoderHandle) -> bool) -> usize {
        self.slots
            .values()
            .filter_map(|slot| slot.handle.as_ref())
            .filter(|handle| predicate(handle))
            .count()
    }

    fn owner_of(&self, backend: BackendHandle) -> Option<VideoId> {
        self.slots.iter().find_map(|(id, slot)| {
            slot.handle
                .as_ref()
                .filter(|handle| handle.backend == Some(backend))
                .map(|_| id.clone())
        })
    }

    fn allocate_handle_id(&mut self) -> HandleId {
        self.next_handle += 1;
        HandleId(self.next_handle)
    }
}

/// What a call to [`PlaybackResourcePool::preload_window`] changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreloadOutcome {
    pub index: usize,
    /// New handles, initialization started
    pub created: Vec<VideoId>,
    /// Pending disposals cancelled because the video is needed again
    pub reactivated: Vec<VideoId>,
    /// Handles outside the keep range queued for disposal
    pub deferred: Vec<VideoId>,
    /// Handles released immediately, including capacity evictions
    pub released: Vec<VideoId>,
    /// Window entries left without a handle because every decoder is in use
    pub blocked: Vec<VideoId>,
}

/// Pool statistics for monitoring.
#[derive(Debug, Clone, PartialEq)]
pub struct PoolStats {
    pub feed_len: usize,
    pub current_index: usize,
    /// Handles in any non-terminal state
    pub live_handles: usize,
    /// Handles in Ready, Playing, Paused or Buffering
    pub active_handles: usize,
    pub initializing: usize,
    pub pending_disposal: usize,
    pub gave_up: usize,
    pub playing: Option<VideoId>,
    pub disposal: DisposalStats,
}

struct PoolInner {
    state: Arc<tokio::sync::Mutex<PoolState>>,
    coordinator: Arc<DisposalCoordinator>,
    backend: Arc<dyn DecoderBackend>,
    config: PlaybackConfig,
    clock: Arc<dyn Clock>,
    headers: HashMap<String, String>,
    init_tasks: parking_lot::Mutex<Vec<JoinHandle<()>>>,
}

impl Drop for PoolInner {
    fn drop(&mut self) {
        for task in self.init_tasks.get_mut().drain(..) {
            task.abort();
        }
    }
}

/// Bounded set of decoder handles keyed by video id.
///
/// Cloning is cheap; clones share the same pool.
#[derive(Clone)]
pub struct PlaybackResourcePool {
    inner: Arc<PoolInner>,
}

impl PlaybackResourcePool {
    pub fn new(
        backend: Arc<dyn DecoderBackend>,
        config: PlaybackConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self::with_headers(backend, config, clock, HashMap::new())
    }

    /// Creates a pool passing `headers` to every decoder initialization.
    pub fn with_headers(
        backend: Arc<dyn DecoderBackend>,
        config: PlaybackConfig,
        clock: Arc<dyn Clock>,
        headers: HashMap<String, String>,
    ) -> Self {
        let state = Arc::new(tokio::sync::Mutex::new(PoolState::default()));
        let coordinator = Arc::new(DisposalCoordinator::new(
            Arc::clone(&backend),
            Arc::clone(&state),
            Arc::clone(&clock),
            config.sweep_delay,
            config.auto_sweep,
        ));

        Self {
            inner: Arc::new(PoolInner {
                state,
                coordinator,
                backend,
                config,
                clock,
                headers,
                init_tasks: parking_lot::Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn config(&self) -> &PlaybackConfig {
        &self.inner.config
    }

    pub fn coordinator(&self) -> &Arc<DisposalCoordinator> {
        &self.inner.coordinator
    }

    /// Subscribes to the backend's decoder events.
    pub fn subscribe_events(&self) -> broadcast::Receiver<DecoderEvent> {
        self.inner.backend.subscribe()
    }

    /// Appends descriptors to the live feed, skipping ids already present.
    ///
    /// Returns the number of descriptors added.
    pub async fn append(&self, descriptors: Vec<VideoDescriptor>) -> usize {
        let mut state = self.inner.state.lock().await;
        let mut known: HashSet<VideoId> = state.feed.iter().map(|v| v.id.clone()).collect();
        let before = state.feed.len();

        for descriptor in descriptors {
            if known.insert(descriptor.id.clone()) {
                state.feed.push(descriptor);
            } else {
                tracing::debug!("Skipping duplicate video {}", descriptor.id);
            }
        }

        state.feed.len() - before
    }

    pub async fn feed_len(&self) -> usize {
        self.inner.state.lock().await.feed.len()
    }

    pub async fn current_index(&self) -> usize {
        self.inner.state.lock().await.current
    }

    pub async fn video_at(&self, index: usize) -> Option<VideoDescriptor> {
        self.inner.state.lock().await.feed.get(index).cloned()
    }

    /// Ids of the live feed in order.
    pub async fn feed_ids(&self) -> Vec<VideoId> {
        let state = self.inner.state.lock().await;
        state.feed.iter().map(|v| v.id.clone()).collect()
    }

    /// Replaces the engagement counters of a video. Returns false if unknown.
    pub async fn update_engagement(
        &self,
        video_id: &VideoId,
        counters: EngagementCounters,
        liked_by_viewer: bool,
    ) -> bool {
        let mut state = self.inner.state.lock().await;
        match state.feed.iter_mut().find(|v| &v.id == video_id) {
            Some(video) => {
                *video = video.with_engagement(counters, liked_by_viewer);
                true
            }
            None => false,
        }
    }

    /// Records that the viewer has seen a video. Returns false if unknown.
    pub async fn mark_seen(&self, video_id: &VideoId) -> bool {
        let mut state = self.inner.state.lock().await;
        if !state.feed.iter().any(|v| &v.id == video_id) {
            return false;
        }
        let now = self.inner.clock.now();
        state
            .slots
            .entry(video_id.clone())
            .or_insert_with(|| VideoSlot::new(now))
            .seen = true;
        true
    }

    /// Current state of the live handle for a video, if it has one.
    pub async fn handle_state(&self, video_id: &VideoId) -> Option<HandleState> {
        let state = self.inner.state.lock().await;
        state.handle(video_id).map(DecoderHandle::state)
    }

    /// Runs `inspect` against the slot of a video.
    pub async fn inspect_slot<R>(
        &self,
        video_id: &VideoId,
        inspect: impl FnOnce(&VideoSlot) -> R,
    ) -> Option<R> {
        let state = self.inner.state.lock().await;
        state.slots.get(video_id).map(inspect)
    }

    /// Live handles in feed order with their states.
    pub async fn live_handles(&self) -> Vec<(VideoId, HandleState)> {
        let state = self.inner.state.lock().await;
        state
            .feed
            .iter()
            .filter_map(|video| {
                state
                    .handle(&video.id)
                    .map(|handle| (video.id.clone(), handle.state))
            })
            .collect()
    }

    /// Ensures handles for the preload window around `index` and requests
    /// disposal of handles outside the keep range.
    ///
    /// The current index is provisioned first. Initializations are spawned
    /// in the background; use [`Self::settle`] to wait for them.
    ///
    /// # Errors
    /// - `PlaybackError::IndexOutOfRange` - `index` is past the end of the feed
    pub async fn preload_window(&self, index: usize) -> Result<PreloadOutcome, PlaybackError> {
        let inner = &self.inner;
        let mut outcome = PreloadOutcome {
            index,
            ..PreloadOutcome::default()
        };
        let mut to_initialize = Vec::new();

        {
            let mut state = inner.state.lock().await;
            let len = state.feed.len();
            if index >= len {
                return Err(PlaybackError::IndexOutOfRange { index, len });
            }
            state.current = index;

            let now = inner.clock.now();
            let window = span(index, inner.config.preload_radius, len);
            let keep = span(index, inner.config.keep_range, len);

            let outside_keep: Vec<VideoId> = state
                .feed
                .iter()
                .enumerate()
                .filter(|(position, video)| {
                    !keep.contains(position) && state.handle(&video.id).is_some()
                })
                .map(|(_, video)| video.id.clone())
                .collect();
            for video_id in outside_keep {
                match inner
                    .coordinator
                    .request_disposal(&mut state, &video_id, false)
                    .await
                {
                    DisposalOutcome::Released => outcome.released.push(video_id),
                    DisposalOutcome::Deferred => outcome.deferred.push(video_id),
                    DisposalOutcome::AlreadyPending | DisposalOutcome::Absent => {}
                }
            }

            for position in window_order(index, inner.config.preload_radius, len) {
                let video = &state.feed[position];
                let video_id = video.id.clone();
                let playable = video.is_playable();

                let slot = state
                    .slots
                    .entry(video_id.clone())
                    .or_insert_with(|| VideoSlot::new(now));
                slot.last_needed = now;
                if slot.gave_up || !playable {
                    continue;
                }

                let existing = slot.handle.as_ref().map(DecoderHandle::state);
                match existing {
                    Some(HandleState::PendingDisposal) => {
                        let resumed = state
                            .handle_mut(&video_id)
                            .and_then(DecoderHandle::reactivate);
                        if let Some(resumed) = resumed {
                            tracing::debug!("Reactivated {} as {}", video_id, resumed);
                            if resumed == HandleState::Uninitialized {
                                to_initialize.push(video_id.clone());
                            }
                            outcome.reactivated.push(video_id);
                        }
                    }
                    Some(HandleState::Uninitialized) => to_initialize.push(video_id),
                    Some(_) => {}
                    None => match self
                        .create_handle(&mut state, &video_id, &window, &keep, &mut outcome)
                        .await
                    {
                        Ok(()) => {
                            outcome.created.push(video_id.clone());
                            to_initialize.push(video_id);
                        }
                        Err(e) => {
                            tracing::debug!("Deferring handle for {}: {}", video_id, e);
                            outcome.blocked.push(video_id);
                        }
                    },
                }
            }

            tracing::debug!(
                "Preloaded around {}: {} live, {} created, {} deferred, {} released",
                index,
                state.live_count(),
                outcome.created.len(),
                outcome.deferred.len(),
                outcome.released.len()
            );
        }

        for video_id in to_initialize {
            self.spawn_initialize(video_id);
        }
        Ok(outcome)
    }

    /// Creates an uninitialized handle, evicting one at capacity.
    async fn create_handle(
        &self,
        state: &mut PoolState,
        video_id: &VideoId,
        window: &RangeInclusive<usize>,
        keep: &RangeInclusive<usize>,
        outcome: &mut PreloadOutcome,
    ) -> Result<(), PlaybackError> {
        let max_active = self.inner.config.max_active_decoders;
        if state.live_count() >= max_active {
            let Some(victim) = eviction_candidate(state, window, keep) else {
                return Err(PlaybackError::Capacity { max_active });
            };
            tracing::debug!("Evicting {} to make room for {}", victim, video_id);
            self.inner
                .coordinator
                .request_disposal(state, &victim, true)
                .await;
            outcome.released.push(victim);
        }

        let handle_id = state.allocate_handle_id();
        let now = self.inner.clock.now();
        state
            .slots
            .entry(video_id.clone())
            .or_insert_with(|| VideoSlot::new(now))
            .handle = Some(DecoderHandle::new(handle_id, video_id.clone()));
        tracing::trace!("Created {} for {}", handle_id, video_id);
        Ok(())
    }

    fn spawn_initialize(&self, video_id: VideoId) {
        let pool = self.clone();
        let task = tokio::spawn(async move {
            match pool.initialize(&video_id).await {
                Ok(()) => {}
                Err(e @ PlaybackError::HandleUnavailable { .. }) => {
                    tracing::debug!("Initialization of {} abandoned: {}", video_id, e);
                }
                Err(e) => tracing::warn!("Initialization of {} failed: {}", video_id, e),
            }
        });

        let mut tasks = self.inner.init_tasks.lock();
        tasks.retain(|t| !t.is_finished());
        tasks.push(task);
    }

    /// Waits for every background initialization spawned so far.
    pub async fn settle(&self) {
        loop {
            let tasks: Vec<JoinHandle<()>> = self.inner.init_tasks.lock().drain(..).collect();
            if tasks.is_empty() {
                break;
            }
            for result in futures::future::join_all(tasks).await {
                if let Err(e) = result
                    && e.is_panic()
                {
                    tracing::warn!("Initialization task panicked: {}", e);
                }
            }
        }
    }

    /// Initializes the decoder for a video that already has a handle.
    ///
    /// Idempotent: initialized handles return immediately and concurrent
    /// callers share one in-flight initialization.
    ///
    /// # Errors
    /// - `PlaybackError::HandleUnavailable` - No handle, or it was disposed meanwhile
    /// - `PlaybackError::InitTimeout` - Backend did not answer within `init_timeout`
    /// - `PlaybackError::Decoder` - Backend rejected the media
    /// - `PlaybackError::GaveUp` - Too many consecutive failures for this video
    pub async fn initialize(&self, video_id: &VideoId) -> Result<(), PlaybackError> {
        let unavailable = || PlaybackError::HandleUnavailable {
            video_id: video_id.clone(),
        };

        let (handle_id, init) = {
            let mut state = self.inner.state.lock().await;
            let uri = state
                .feed
                .iter()
                .find(|v| &v.id == video_id)
                .and_then(|v| v.playback_uri().cloned());
            let in_flight = state.in_flight.get(video_id).cloned();

            let slot = state.slots.get_mut(video_id).ok_or_else(unavailable)?;
            if slot.gave_up {
                return Err(PlaybackError::GaveUp {
                    video_id: video_id.clone(),
                    attempts: slot.init_failures,
                });
            }
            let handle = slot.handle.as_mut().ok_or_else(unavailable)?;
            let handle_id = handle.id;

            match handle.effective_state() {
                effective if effective.is_active() => return Ok(()),
                HandleState::Initializing => match in_flight {
                    Some((owner, init)) if owner == handle_id => (handle_id, init),
                    _ => return Err(unavailable()),
                },
                HandleState::Uninitialized if handle.state == HandleState::Uninitialized => {
                    let uri = uri.ok_or_else(unavailable)?;
                    handle.transition(HandleState::Initializing);
                    let init = self.start_init(uri);
                    state
                        .in_flight
                        .insert(video_id.clone(), (handle_id, init.clone()));
                    tracing::debug!("Initializing {} for {}", handle_id, video_id);
                    (handle_id, init)
                }
                _ => return Err(unavailable()),
            }
        };

        let result = init.await;
        self.complete_init(video_id, handle_id, result).await
    }

    fn start_init(&self, uri: Url) -> SharedInit {
        let backend = Arc::clone(&self.inner.backend);
        let headers = self.inner.headers.clone();
        let timeout = self.inner.config.init_timeout;

        async move {
            match tokio::time::timeout(timeout, backend.init(&uri, &headers)).await {
                Ok(result) => result,
                Err(_) => Err(DecoderError::Timeout {
                    millis: timeout.as_millis() as u64,
                }),
            }
        }
        .boxed()
        .shared()
    }

    async fn complete_init(
        &self,
        video_id: &VideoId,
        handle_id: HandleId,
        result: Result<BackendHandle, DecoderError>,
    ) -> Result<(), PlaybackError> {
        let inner = &self.inner;
        let unavailable = || PlaybackError::HandleUnavailable {
            video_id: video_id.clone(),
        };
        let mut state = inner.state.lock().await;

        // Every waiter sees the same result; only the first one may release it
        let first_completion = state
            .in_flight
            .get(video_id)
            .is_some_and(|(owner, _)| *owner == handle_id);
        if first_completion {
            state.in_flight.remove(video_id);
        }

        if state.orphans.remove(&handle_id) {
            if let Ok(backend) = result {
                inner.coordinator.release_orphan(backend).await;
            }
            return Err(unavailable());
        }

        let owner_alive = state
            .slots
            .get(video_id)
            .and_then(|slot| slot.handle.as_ref())
            .is_some_and(|h| h.id == handle_id);
        if !owner_alive {
            if first_completion && let Ok(backend) = result {
                tracing::debug!("{} of {} has no owner left", backend, video_id);
                inner.coordinator.release_orphan(backend).await;
            }
            return Err(unavailable());
        }
        let Some(slot) = state.slots.get_mut(video_id) else {
            return Err(unavailable());
        };
        let Some(handle) = slot.handle.as_mut().filter(|h| h.id == handle_id) else {
            return Err(unavailable());
        };

        let error = match result {
            Ok(backend) => {
                if handle.backend.is_none()
                    && handle.effective_state() == HandleState::Initializing
                {
                    handle.backend = Some(backend);
                    if handle.state == HandleState::PendingDisposal {
                        handle.resume_state = Some(HandleState::Ready);
                    } else {
                        handle.transition(HandleState::Ready);
                    }
                    slot.init_failures = 0;
                    slot.last_error = None;
                    tracing::debug!("{} ready for {} ({})", handle_id, video_id, backend);
                }
                return Ok(());
            }
            Err(error) => error,
        };

        if handle.effective_state() != HandleState::Initializing {
            // Another waiter on the same initialization already recorded it
            return Err(PlaybackError::from_decoder(video_id, error));
        }

        slot.init_failures += 1;
        slot.last_error = Some(error.clone());
        let attempts = slot.init_failures;

        if attempts >= inner.config.max_init_attempts {
            handle.transition(HandleState::Errored);
            slot.gave_up = true;
            tracing::warn!(
                "Giving up on {} after {} failed initializations: {}",
                video_id,
                attempts,
                error
            );
            inner
                .coordinator
                .request_disposal(&mut state, video_id, true)
                .await;
            return Err(PlaybackError::GaveUp {
                video_id: video_id.clone(),
                attempts,
            });
        }

        if handle.state == HandleState::PendingDisposal {
            handle.resume_state = Some(HandleState::Uninitialized);
        } else {
            handle.transition(HandleState::Uninitialized);
        }
        tracing::debug!(
            "Initialization {} of {} failed: {}",
            attempts,
            video_id,
            error
        );
        Err(PlaybackError::from_decoder(video_id, error))
    }

    /// Starts playback of the item at `index`, pausing whatever played before.
    ///
    /// Returns false without side effects when the handle is not Ready or Paused.
    ///
    /// # Errors
    /// - `PlaybackError::IndexOutOfRange` - `index` is past the end of the feed
    /// - `PlaybackError::HandleUnavailable` - The item has no handle
    /// - `PlaybackError::Decoder` - Backend failed; the handle was disposed
    pub async fn play(&self, index: usize) -> Result<bool, PlaybackError> {
        let inner = &self.inner;
        let mut state = inner.state.lock().await;
        let video_id = state.video_at(index)?;

        let Some(handle) = state.handle(&video_id) else {
            return Err(PlaybackError::HandleUnavailable { video_id });
        };
        if !handle.state.can_play() {
            tracing::debug!("Ignoring play of {} in state {}", video_id, handle.state);
            return Ok(false);
        }
        let Some(backend) = handle.backend else {
            return Err(PlaybackError::HandleUnavailable { video_id });
        };

        if let Some(previous) = state.playing.clone()
            && previous != video_id
        {
            self.pause_locked(&mut state, &previous).await?;
        }

        if let Err(error) = inner.backend.play(backend).await {
            self.fail_handle(&mut state, &video_id, error.clone()).await;
            return Err(PlaybackError::from_decoder(&video_id, error));
        }

        if let Some(handle) = state.handle_mut(&video_id) {
            handle.transition(HandleState::Playing);
        }
        state.playing = Some(video_id.clone());
        tracing::debug!("Playing {} at index {}", video_id, index);
        Ok(true)
    }

    /// Pauses the item at `index`.
    ///
    /// Returns false without side effects when the handle is not Playing or Buffering.
    ///
    /// # Errors
    /// - `PlaybackError::IndexOutOfRange` - `index` is past the end of the feed
    /// - `PlaybackError::Decoder` - Backend failed; the handle was disposed
    pub async fn pause(&self, index: usize) -> Result<bool, PlaybackError> {
        let mut state = self.inner.state.lock().await;
        let video_id = state.video_at(index)?;
        self.pause_locked(&mut state, &video_id).await
    }

    async fn pause_locked(
        &self,
        state: &mut PoolState,
        video_id: &VideoId,
    ) -> Result<bool, PlaybackError> {
        let Some(handle) = state.handle(video_id) else {
            return Ok(false);
        };
        if !handle.state.can_pause() {
            return Ok(false);
        }
        let Some(backend) = handle.backend else {
            return Ok(false);
        };

        if let Err(error) = self.inner.backend.pause(backend).await {
            self.fail_handle(state, video_id, error.clone()).await;
            return Err(PlaybackError::from_decoder(video_id, error));
        }

        if let Some(handle) = state.handle_mut(video_id) {
            handle.transition(HandleState::Paused);
        }
        if let Some(slot) = state.slots.get_mut(video_id) {
            slot.buffering_since = None;
        }
        if state.playing.as_ref() == Some(video_id) {
            state.playing = None;
        }
        Ok(true)
    }

    /// Seeks the item at `index` if its decoder is initialized.
    ///
    /// # Errors
    /// - `PlaybackError::IndexOutOfRange` - `index` is past the end of the feed
    /// - `PlaybackError::HandleUnavailable` - The item has no initialized decoder
    /// - `PlaybackError::Decoder` - Backend rejected the seek
    pub async fn seek(&self, index: usize, position: Duration) -> Result<(), PlaybackError> {
        let state = self.inner.state.lock().await;
        let video_id = state.video_at(index)?;
        let backend = state
            .handle(&video_id)
            .filter(|handle| handle.state.is_active())
            .and_then(DecoderHandle::backend)
            .ok_or_else(|| PlaybackError::HandleUnavailable {
                video_id: video_id.clone(),
            })?;

        self.inner
            .backend
            .seek(backend, position)
            .await
            .map_err(|error| PlaybackError::from_decoder(&video_id, error))
    }

    /// Marks the handle Errored and releases it.
    async fn fail_handle(&self, state: &mut PoolState, video_id: &VideoId, error: DecoderError) {
        tracing::warn!("Decoder for {} failed: {}", video_id, error);
        if let Some(slot) = state.slots.get_mut(video_id) {
            slot.last_error = Some(error);
            slot.buffering_since = None;
            if let Some(handle) = slot.handle.as_mut() {
                handle.transition(HandleState::Errored);
            }
        }
        self.inner
            .coordinator
            .request_disposal(state, video_id, true)
            .await;
    }

    /// Applies one decoder event to the handle that emitted it.
    ///
    /// Events for unknown or already disposed handles are ignored.
    ///
    /// # Errors
    /// - `PlaybackError::Decoder` - The decoder reported a failure; only that handle was disposed
    pub async fn apply_event(&self, event: DecoderEvent) -> Result<(), PlaybackError> {
        let mut state = self.inner.state.lock().await;
        let Some(video_id) = state.owner_of(event.handle()) else {
            tracing::trace!("Ignoring event for unknown {}", event.handle());
            return Ok(());
        };
        let now = self.inner.clock.now();

        match event {
            DecoderEvent::Buffering { active: true, .. } => {
                if let Some(slot) = state.slots.get_mut(&video_id)
                    && let Some(handle) = slot.handle.as_mut()
                    && handle.state == HandleState::Playing
                    && handle.transition(HandleState::Buffering)
                {
                    slot.buffering_since = Some(now);
                    tracing::debug!("{} buffering", video_id);
                }
                Ok(())
            }
            DecoderEvent::Buffering { active: false, .. } => {
                if let Some(slot) = state.slots.get_mut(&video_id)
                    && let Some(handle) = slot.handle.as_mut()
                    && handle.state == HandleState::Buffering
                    && handle.transition(HandleState::Playing)
                    && let Some(since) = slot.buffering_since.take()
                {
                    tracing::debug!(
                        "{} resumed after stalling {:?}",
                        video_id,
                        elapsed_between(since, now)
                    );
                }
                Ok(())
            }
            DecoderEvent::Position { position, .. } => {
                if let Some(slot) = state.slots.get_mut(&video_id) {
                    slot.position = Some(position);
                }
                Ok(())
            }
            DecoderEvent::Error { reason, .. } => {
                let error = DecoderError::OperationFailed {
                    operation: "playback",
                    reason,
                };
                self.fail_handle(&mut state, &video_id, error.clone()).await;
                Err(PlaybackError::Decoder {
                    video_id,
                    source: error,
                })
            }
        }
    }

    /// Requests teardown of the handle owned by `video_id`.
    ///
    /// Forced requests release immediately; otherwise an active handle is
    /// deferred until the next due sweep. Repeated requests are no-ops.
    pub async fn request_disposal(&self, video_id: &VideoId, force: bool) -> DisposalOutcome {
        let mut state = self.inner.state.lock().await;
        self.inner
            .coordinator
            .request_disposal(&mut state, video_id, force)
            .await
    }

    /// Drops the oldest feed entries when the feed outgrows `max_feed_len`.
    ///
    /// Only entries more than `keep_range` behind the current index are
    /// removed; their handles are released and slots forgotten. Returns the
    /// number of entries removed.
    pub async fn trim(&self) -> usize {
        let inner = &self.inner;
        let mut state = inner.state.lock().await;
        let len = state.feed.len();
        if len <= inner.config.max_feed_len {
            return 0;
        }

        let removable = state.current.saturating_sub(inner.config.keep_range);
        let count = (len - inner.config.max_feed_len).min(removable);
        if count == 0 {
            return 0;
        }

        let removed: Vec<VideoId> = state.feed[..count].iter().map(|v| v.id.clone()).collect();
        for video_id in &removed {
            inner
                .coordinator
                .request_disposal(&mut state, video_id, true)
                .await;
            state.slots.remove(video_id);
            state.in_flight.remove(video_id);
        }
        state.feed.drain(..count);
        state.current -= count;

        tracing::info!(
            "Trimmed {} videos from the feed, {} remain",
            count,
            state.feed.len()
        );
        count
    }

    /// Disposes every due deferred handle.
    pub async fn sweep(&self) -> usize {
        self.inner.coordinator.process_queue().await
    }

    pub async fn statistics(&self) -> PoolStats {
        let state = self.inner.state.lock().await;
        PoolStats {
            feed_len: state.feed.len(),
            current_index: state.current,
            live_handles: state.live_count(),
            active_handles: state.count_where(|h| h.state.is_active()),
            initializing: state.count_where(|h| h.effective_state() == HandleState::Initializing),
            pending_disposal: state.count_where(|h| h.state == HandleState::PendingDisposal),
            gave_up: state.slots.values().filter(|s| s.gave_up).count(),
            playing: state.playing.clone(),
            disposal: self.inner.coordinator.statistics(),
        }
    }

    /// Cancels background work and releases every handle.
    ///
    /// Returns the number of handles released.
    pub async fn shutdown(&self) -> usize {
        let inner = &self.inner;
        for task in inner.init_tasks.lock().drain(..) {
            task.abort();
        }
        inner.coordinator.shutdown();

        let mut state = inner.state.lock().await;
        let live: Vec<VideoId> = state
            .slots
            .iter()
            .filter(|(_, slot)| slot.handle.is_some())
            .map(|(id, _)| id.clone())
            .collect();

        let mut released = 0;
        for video_id in &live {
            if inner
                .coordinator
                .request_disposal(&mut state, video_id, true)
                .await
                == DisposalOutcome::Released
            {
                released += 1;
            }
        }
        // Orphans stay recorded so inits still in flight release their handles
        state.in_flight.clear();
        state.playing = None;

        tracing::info!("Playback pool shut down, released {} handles", released);
        released
    }
}

/// Indices within `radius` of `center`, clamped to the feed.
fn span(center: usize, radius: usize, len: usize) -> RangeInclusive<usize> {
    center.saturating_sub(radius)..=center.saturating_add(radius).min(len.saturating_sub(1))
}

/// Window positions ordered current first, then alternating forward and back.
fn window_order(center: usize, radius: usize, len: usize) -> Vec<usize> {
    let mut order = vec![center];
    for distance in 1..=radius {
        if let Some(ahead) = center.checked_add(distance).filter(|&i| i < len) {
            order.push(ahead);
        }
        if let Some(behind) = center.checked_sub(distance) {
            order.push(behind);
        }
    }
    order
}

/// Least recently needed live handle outside the window, preferring ones
/// outside the keep range. Never the current or playing item.
fn eviction_candidate(
    state: &PoolState,
    window: &RangeInclusive<usize>,
    keep: &RangeInclusive<usize>,
) -> Option<VideoId> {
    let current = state.feed.get(state.current).map(|v| &v.id);

    state
        .feed
        .iter()
        .enumerate()
        .filter(|(position, video)| {
            !window.contains(position)
                && Some(&video.id) != current
                && state.playing.as_ref() != Some(&video.id)
        })
        .filter_map(|(position, video)| {
            let slot = state.slots.get(&video.id)?;
            slot.handle.as_ref()?;
            Some((
                !keep.contains(&position),
                std::cmp::Reverse(slot.last_needed),
                position.abs_diff(state.current),
                video.id.clone(),
            ))
        })
        .max_by(|a, b| (a.0, a.1, a.2).cmp(&(b.0, b.1, b.2)))
        .map(|(_, _, _, id)| id)
}
