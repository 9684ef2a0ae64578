//! Exactly-once teardown of decoder handles.
//!
//! Immediate disposals happen under the pool lock: the handle is taken out
//! of its slot before any backend call is awaited, so nothing else can reach
//! it once teardown has begun. Deferred disposals become tickets drained by
//! [`DisposalCoordinator::process_queue`].

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;
use tokio::task::JoinHandle;

use super::decoder::{BackendHandle, DecoderBackend};
use super::handle::{HandleId, HandleState};
use super::pool::PoolState;
use crate::clock::Clock;
use crate::feed::VideoId;

/// A deferred disposal waiting in the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisposalTicket {
    pub handle_id: HandleId,
    pub video_id: VideoId,
    pub scheduled_at: DateTime<Utc>,
    /// Dispose even if the handle left PendingDisposal in the meantime.
    ///
    /// Always false for tickets queued by `request_disposal`: forced
    /// requests release on the spot and never enter the queue.
    pub force: bool,
}

/// What a disposal request did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisposalOutcome {
    /// Handle released right away
    Released,
    /// Ticket queued for a later sweep
    Deferred,
    /// A ticket for this handle is already queued
    AlreadyPending,
    /// No live handle for the id
    Absent,
}

/// Disposal statistics for monitoring.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DisposalStats {
    /// Tickets currently waiting
    pub queued: usize,
    /// Handles taken through teardown
    pub disposed: u64,
    /// Backend release calls that reported an error
    pub release_failures: u64,
    /// Tickets dropped because the handle was reused or already gone
    pub skipped: u64,
    /// Late-arriving backend handles released after their owner was disposed
    pub orphans_released: u64,
}

#[derive(Debug, Default)]
struct DisposalCounters {
    disposed: AtomicU64,
    release_failures: AtomicU64,
    skipped: AtomicU64,
    orphans_released: AtomicU64,
}

/// Owns the disposal queue and every backend release call.
pub struct DisposalCoordinator {
    backend: Arc<dyn DecoderBackend>,
    state: Arc<tokio::sync::Mutex<PoolState>>,
    clock: Arc<dyn Clock>,
    sweep_delay: Duration,
    auto_sweep: bool,
    queue: Mutex<VecDeque<DisposalTicket>>,
    is_processing: AtomicBool,
    sweep_tasks: Mutex<Vec<JoinHandle<()>>>,
    counters: DisposalCounters,
}

/// Clears the processing flag even if a drain is cancelled mid-way.
struct ProcessingGuard<'a>(&'a AtomicBool);

impl Drop for ProcessingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl DisposalCoordinator {
    pub(crate) fn new(
        backend: Arc<dyn DecoderBackend>,
        state: Arc<tokio::sync::Mutex<PoolState>>,
        clock: Arc<dyn Clock>,
        sweep_delay: Duration,
        auto_sweep: bool,
    ) -> Self {
        Self {
            backend,
            state,
            clock,
            sweep_delay,
            auto_sweep,
            queue: Mutex::new(VecDeque::new()),
            is_processing: AtomicBool::new(false),
            sweep_tasks: Mutex::new(Vec::new()),
            counters: DisposalCounters::default(),
        }
    }

    /// Requests teardown of the handle owned by `video_id`.
    ///
    /// Forced requests and handles that are Errored or Uninitialized are
    /// released immediately; anything else is marked PendingDisposal and
    /// queued for `sweep_delay`. Never fails: release errors are logged.
    pub(crate) async fn request_disposal(
        self: &Arc<Self>,
        state: &mut PoolState,
        video_id: &VideoId,
        force: bool,
    ) -> DisposalOutcome {
        let Some(handle) = state
            .slots
            .get(video_id)
            .and_then(|slot| slot.handle.as_ref())
        else {
            return DisposalOutcome::Absent;
        };

        let current = handle.state;
        let backend = handle.backend;
        if force || matches!(current, HandleState::Errored | HandleState::Uninitialized) {
            self.dispose_now(state, video_id).await;
            return DisposalOutcome::Released;
        }
        if current == HandleState::PendingDisposal {
            return DisposalOutcome::AlreadyPending;
        }

        if current.is_playing() {
            if let Some(backend) = backend
                && let Err(e) = self.backend.pause(backend).await
            {
                tracing::warn!("Pause before deferred disposal of {} failed: {}", backend, e);
            }
            if state.playing.as_ref() == Some(video_id) {
                state.playing = None;
            }
        }

        let delay = TimeDelta::from_std(self.sweep_delay).unwrap_or(TimeDelta::zero());
        let due = self.clock.now() + delay;
        let Some(handle) = state
            .slots
            .get_mut(video_id)
            .and_then(|slot| slot.handle.as_mut())
        else {
            return DisposalOutcome::Absent;
        };
        if !handle.mark_pending(due) {
            // Lifecycle refused the deferral; fall back to releasing now
            self.dispose_now(state, video_id).await;
            return DisposalOutcome::Released;
        }

        let ticket = DisposalTicket {
            handle_id: handle.id,
            video_id: video_id.clone(),
            scheduled_at: due,
            force: false,
        };
        tracing::debug!(
            "Deferred disposal of {} ({}) until {}",
            video_id,
            ticket.handle_id,
            due
        );
        self.queue.lock().push_back(ticket);

        if self.auto_sweep {
            self.schedule_sweep();
        }
        DisposalOutcome::Deferred
    }

    /// Releases the handle owned by `video_id` right now.
    ///
    /// Returns false when there was no handle to release.
    pub(crate) async fn dispose_now(&self, state: &mut PoolState, video_id: &VideoId) -> bool {
        let Some(mut handle) = state
            .slots
            .get_mut(video_id)
            .and_then(|slot| slot.handle.take())
        else {
            return false;
        };

        if state.playing.as_ref() == Some(video_id) {
            state.playing = None;
        }

        let was_playing = handle.state.is_playing();
        let was_initializing = handle.effective_state() == HandleState::Initializing;

        match handle.backend.take() {
            Some(backend) => self.release(backend, was_playing).await,
            None if was_initializing => {
                // Init still in flight: its completion releases the backend handle
                state.orphans.insert(handle.id);
                tracing::debug!(
                    "Disposed {} of {} while initializing, recorded as orphan",
                    handle.id,
                    video_id
                );
            }
            None => {}
        }

        handle.transition(HandleState::Disposed);
        self.counters.disposed.fetch_add(1, Ordering::Relaxed);
        tracing::debug!("Disposed {} of {}", handle.id, video_id);
        true
    }

    /// Pause if needed, silence, then release. Errors are logged and swallowed.
    async fn release(&self, backend: BackendHandle, was_playing: bool) {
        if was_playing && let Err(e) = self.backend.pause(backend).await {
            tracing::warn!("Pause before release of {} failed: {}", backend, e);
        }
        if let Err(e) = self.backend.set_volume(backend, 0.0).await {
            tracing::warn!("Silencing {} before release failed: {}", backend, e);
        }
        if let Err(e) = self.backend.dispose(backend).await {
            self.counters.release_failures.fetch_add(1, Ordering::Relaxed);
            tracing::warn!("Release of {} failed: {}", backend, e);
        }
    }

    /// Releases a backend handle whose owner was disposed before init finished.
    pub(crate) async fn release_orphan(&self, backend: BackendHandle) {
        self.release(backend, false).await;
        self.counters.orphans_released.fetch_add(1, Ordering::Relaxed);
        tracing::debug!("Released orphaned {}", backend);
    }

    fn schedule_sweep(self: &Arc<Self>) {
        let coordinator = Arc::clone(self);
        let delay = self.sweep_delay;
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            coordinator.process_queue().await;
        });

        let mut tasks = self.sweep_tasks.lock();
        tasks.retain(|t| !t.is_finished());
        tasks.push(task);
    }

    /// Disposes every due ticket in FIFO order.
    ///
    /// Tickets whose handle was reactivated or replaced are dropped. Returns
    /// the number of handles disposed; a concurrent call returns 0.
    pub async fn process_queue(&self) -> usize {
        if self
            .is_processing
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            tracing::trace!("Disposal sweep already running");
            return 0;
        }
        let _guard = ProcessingGuard(&self.is_processing);

        let mut disposed = 0;
        loop {
            let now = self.clock.now();
            let ticket = {
                let mut queue = self.queue.lock();
                match queue.front() {
                    Some(ticket) if ticket.scheduled_at <= now => queue.pop_front(),
                    _ => None,
                }
            };
            let Some(ticket) = ticket else {
                break;
            };

            let mut state = self.state.lock().await;
            if Self::ticket_still_valid(&state, &ticket) {
                if self.dispose_now(&mut state, &ticket.video_id).await {
                    disposed += 1;
                }
            } else {
                self.counters.skipped.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    "Dropping stale disposal ticket for {} ({})",
                    ticket.video_id,
                    ticket.handle_id
                );
            }
        }

        disposed
    }

    fn ticket_still_valid(state: &PoolState, ticket: &DisposalTicket) -> bool {
        let Some(handle) = state
            .slots
            .get(&ticket.video_id)
            .and_then(|slot| slot.handle.as_ref())
        else {
            return false;
        };
        if handle.id != ticket.handle_id {
            return false;
        }
        ticket.force
            || (handle.state == HandleState::PendingDisposal
                && handle.disposal_due == Some(ticket.scheduled_at))
    }

    /// Aborts scheduled sweeps and drops every queued ticket.
    pub fn shutdown(&self) {
        for task in self.sweep_tasks.lock().drain(..) {
            task.abort();
        }
        let dropped = {
            let mut queue = self.queue.lock();
            let dropped = queue.len();
            queue.clear();
            dropped
        };
        if dropped > 0 {
            tracing::debug!("Dropped {} queued disposal tickets on shutdown", dropped);
        }
    }

    /// Returns a snapshot of the queue.
    pub fn pending_tickets(&self) -> Vec<DisposalTicket> {
        self.queue.lock().iter().cloned().collect()
    }

    pub fn statistics(&self) -> DisposalStats {
        DisposalStats {
            queued: self.queue.lock().len(),
            disposed: self.counters.disposed.load(Ordering::Relaxed),
            release_failures: self.counters.release_failures.load(Ordering::Relaxed),
            skipped: self.counters.skipped.load(Ordering::Relaxed),
            orphans_released: self.counters.orphans_released.load(Ordering::Relaxed),
        }
    }
}

impl Drop for DisposalCoordinator {
    fn drop(&mut self) {
        for task in self.sweep_tasks.get_mut().drain(..) {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::playback::handle::{DecoderHandle, VideoSlot};
    use crate::test_mocks::MockDecoderBackend;

    struct Fixture {
        backend: Arc<MockDecoderBackend>,
        state: Arc<tokio::sync::Mutex<PoolState>>,
        clock: Arc<ManualClock>,
        coordinator: Arc<DisposalCoordinator>,
    }

    fn fixture() -> Fixture {
        let backend = Arc::new(MockDecoderBackend::new());
        let state = Arc::new(tokio::sync::Mutex::new(PoolState::default()));
        let clock = ManualClock::shared();
        let coordinator = Arc::new(DisposalCoordinator::new(
            backend.clone(),
            state.clone(),
            clock.clone(),
            Duration::from_secs(2),
            false,
        ));
        Fixture {
            backend,
            state,
            clock,
            coordinator,
        }
    }

    async fn insert_ready(f: &Fixture, id: &str, backend: u64) -> VideoId {
        let video_id = VideoId::new(id);
        let mut handle = DecoderHandle::new(HandleId(backend), video_id.clone());
        handle.backend = Some(BackendHandle(backend));
        handle.state = HandleState::Ready;
        let mut slot = VideoSlot::new(f.clock.now());
        slot.handle = Some(handle);
        f.state.lock().await.slots.insert(video_id.clone(), slot);
        video_id
    }

    #[tokio::test]
    async fn test_forced_disposal_releases_exactly_once() {
        let f = fixture();
        let id = insert_ready(&f, "a", 1).await;
        let mut state = f.state.lock().await;

        let first = f.coordinator.request_disposal(&mut state, &id, true).await;
        let second = f.coordinator.request_disposal(&mut state, &id, true).await;

        assert_eq!(first, DisposalOutcome::Released);
        assert_eq!(second, DisposalOutcome::Absent);
        assert_eq!(f.backend.dispose_count(BackendHandle(1)), 1);
        assert_eq!(f.backend.volume_of(BackendHandle(1)), Some(0.0));
    }

    #[tokio::test]
    async fn test_deferred_disposal_waits_for_sweep_delay() {
        let f = fixture();
        let id = insert_ready(&f, "a", 1).await;
        {
            let mut state = f.state.lock().await;
            let outcome = f.coordinator.request_disposal(&mut state, &id, false).await;
            assert_eq!(outcome, DisposalOutcome::Deferred);
            let again = f.coordinator.request_disposal(&mut state, &id, false).await;
            assert_eq!(again, DisposalOutcome::AlreadyPending);
        }

        f.clock.advance(Duration::from_secs(1));
        assert_eq!(f.coordinator.process_queue().await, 0);
        assert_eq!(f.backend.dispose_count(BackendHandle(1)), 0);

        f.clock.advance(Duration::from_secs(1));
        assert_eq!(f.coordinator.process_queue().await, 1);
        assert_eq!(f.backend.dispose_count(BackendHandle(1)), 1);
        assert!(f.state.lock().await.slots[&id].handle.is_none());
    }

    #[tokio::test]
    async fn test_reactivated_handle_survives_sweep() {
        let f = fixture();
        let id = insert_ready(&f, "a", 1).await;
        {
            let mut state = f.state.lock().await;
            f.coordinator.request_disposal(&mut state, &id, false).await;
            let handle = state.slots.get_mut(&id).unwrap().handle.as_mut().unwrap();
            assert_eq!(handle.reactivate(), Some(HandleState::Ready));
        }

        f.clock.advance(Duration::from_secs(5));
        assert_eq!(f.coordinator.process_queue().await, 0);
        assert_eq!(f.backend.dispose_count(BackendHandle(1)), 0);
        assert_eq!(f.coordinator.statistics().skipped, 1);
    }

    #[tokio::test]
    async fn test_release_errors_are_swallowed() {
        let f = fixture();
        f.backend.fail_release(true);
        let id = insert_ready(&f, "a", 7).await;
        let mut state = f.state.lock().await;

        let outcome = f.coordinator.request_disposal(&mut state, &id, true).await;

        assert_eq!(outcome, DisposalOutcome::Released);
        assert_eq!(f.coordinator.statistics().release_failures, 1);
        assert!(state.slots[&id].handle.is_none());
    }

    #[tokio::test]
    async fn test_errored_handle_is_disposed_immediately() {
        let f = fixture();
        let id = insert_ready(&f, "a", 3).await;
        let mut state = f.state.lock().await;
        state
            .slots
            .get_mut(&id)
            .unwrap()
            .handle
            .as_mut()
            .unwrap()
            .state = HandleState::Errored;

        let outcome = f.coordinator.request_disposal(&mut state, &id, false).await;

        assert_eq!(outcome, DisposalOutcome::Released);
        assert_eq!(f.coordinator.pending_tickets().len(), 0);
    }

    #[tokio::test]
    async fn test_only_unforced_requests_are_queued() {
        let f = fixture();
        let deferred = insert_ready(&f, "a", 1).await;
        let forced = insert_ready(&f, "b", 2).await;
        {
            let mut state = f.state.lock().await;
            f.coordinator.request_disposal(&mut state, &deferred, false).await;
            f.coordinator.request_disposal(&mut state, &forced, true).await;
        }

        let tickets = f.coordinator.pending_tickets();
        assert_eq!(tickets.len(), 1);
        assert_eq!(tickets[0].video_id, deferred);
        assert!(!tickets[0].force);
        assert_eq!(f.backend.dispose_count(BackendHandle(2)), 1);
    }

    #[tokio::test]
    async fn test_shutdown_clears_queue() {
        let f = fixture();
        let id = insert_ready(&f, "a", 1).await;
        {
            let mut state = f.state.lock().await;
            f.coordinator.request_disposal(&mut state, &id, false).await;
        }
        assert_eq!(f.coordinator.statistics().queued, 1);

        f.coordinator.shutdown();

        assert_eq!(f.coordinator.statistics().queued, 0);
    }
}
