//! Decoder handle lifecycle and per-video bookkeeping.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};

use super::decoder::{BackendHandle, DecoderError};
use crate::feed::VideoId;

/// Pool-assigned identity of one decoder handle; never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandleId(pub u64);

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "handle#{}", self.0)
    }
}

/// Lifecycle state of a decoder handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandleState {
    Uninitialized,
    Initializing,
    Ready,
    Playing,
    Paused,
    Buffering,
    /// Disposal requested but deferred; a preload may still reactivate it
    PendingDisposal,
    /// Terminal
    Disposed,
    Errored,
}

impl HandleState {
    /// Check if the handle holds an initialized decoder that counts toward capacity
    pub fn is_active(self) -> bool {
        matches!(
            self,
            HandleState::Ready | HandleState::Playing | HandleState::Paused | HandleState::Buffering
        )
    }

    /// Check if the handle is currently producing frames or waiting for data to do so
    pub fn is_playing(self) -> bool {
        matches!(self, HandleState::Playing | HandleState::Buffering)
    }

    pub fn can_play(self) -> bool {
        matches!(self, HandleState::Ready | HandleState::Paused)
    }

    pub fn can_pause(self) -> bool {
        self.is_playing()
    }

    /// Checks whether the lifecycle allows moving from `self` to `next`.
    pub fn can_transition_to(self, next: HandleState) -> bool {
        use HandleState::*;

        match (self, next) {
            (Disposed, _) => false,
            (_, Disposed) => true,
            (Errored, _) => false,
            (_, Errored) => true,
            (Uninitialized, Initializing) => true,
            (Initializing, Ready | Uninitialized | PendingDisposal) => true,
            (Ready, Playing | PendingDisposal) => true,
            (Playing, Paused | Buffering | PendingDisposal) => true,
            (Paused, Playing | PendingDisposal) => true,
            (Buffering, Playing | Paused | PendingDisposal) => true,
            (PendingDisposal, Uninitialized | Initializing | Ready | Paused) => true,
            _ => false,
        }
    }
}

impl fmt::Display for HandleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Per-video playback resource.
#[derive(Debug)]
pub struct DecoderHandle {
    pub(crate) id: HandleId,
    pub(crate) video_id: VideoId,
    pub(crate) backend: Option<BackendHandle>,
    pub(crate) state: HandleState,
    /// State restored when a pending disposal is cancelled
    pub(crate) resume_state: Option<HandleState>,
    /// Due time of the disposal ticket that owns this handle, if any
    pub(crate) disposal_due: Option<DateTime<Utc>>,
}

impl DecoderHandle {
    pub(crate) fn new(id: HandleId, video_id: VideoId) -> Self {
        Self {
            id,
            video_id,
            backend: None,
            state: HandleState::Uninitialized,
            resume_state: None,
            disposal_due: None,
        }
    }

    pub fn id(&self) -> HandleId {
        self.id
    }

    pub fn video_id(&self) -> &VideoId {
        &self.video_id
    }

    pub fn state(&self) -> HandleState {
        self.state
    }

    pub fn backend(&self) -> Option<BackendHandle> {
        self.backend
    }

    /// State the handle is logically in, looking through a pending disposal.
    pub(crate) fn effective_state(&self) -> HandleState {
        match (self.state, self.resume_state) {
            (HandleState::PendingDisposal, Some(resume)) => resume,
            (state, _) => state,
        }
    }

    /// Moves to `next` if the lifecycle allows it.
    ///
    /// Returns false and leaves the state untouched otherwise.
    pub(crate) fn transition(&mut self, next: HandleState) -> bool {
        if !self.state.can_transition_to(next) {
            tracing::debug!(
                "Refusing {} transition {} -> {} for {}",
                self.id,
                self.state,
                next,
                self.video_id
            );
            return false;
        }
        tracing::trace!("{} {}: {} -> {}", self.video_id, self.id, self.state, next);
        self.state = next;
        true
    }

    /// Defers disposal, remembering where to resume if the handle is needed again.
    pub(crate) fn mark_pending(&mut self, due: DateTime<Utc>) -> bool {
        let previous = self.state;
        // Playback stops once disposal is requested; a reactivated handle resumes paused
        let resume = if previous.is_playing() {
            HandleState::Paused
        } else {
            previous
        };
        if !self.transition(HandleState::PendingDisposal) {
            return false;
        }
        self.resume_state = Some(resume);
        self.disposal_due = Some(due);
        true
    }

    /// Cancels a pending disposal. Returns the restored state.
    pub(crate) fn reactivate(&mut self) -> Option<HandleState> {
        if self.state != HandleState::PendingDisposal {
            return None;
        }
        let resume = self.resume_state.take().unwrap_or(HandleState::Uninitialized);
        self.disposal_due = None;
        self.transition(resume).then_some(resume)
    }
}

/// Everything the pool tracks for one video id.
#[derive(Debug)]
pub struct VideoSlot {
    pub(crate) handle: Option<DecoderHandle>,
    pub(crate) seen: bool,
    /// Consecutive failed initializations
    pub(crate) init_failures: u32,
    /// Auto-retry stopped after too many failures
    pub(crate) gave_up: bool,
    pub(crate) buffering_since: Option<DateTime<Utc>>,
    pub(crate) last_error: Option<DecoderError>,
    pub(crate) last_needed: DateTime<Utc>,
    pub(crate) position: Option<Duration>,
}

impl VideoSlot {
    pub(crate) fn new(now: DateTime<Utc>) -> Self {
        Self {
            handle: None,
            seen: false,
            init_failures: 0,
            gave_up: false,
            buffering_since: None,
            last_error: None,
            last_needed: now,
            position: None,
        }
    }

    pub fn handle(&self) -> Option<&DecoderHandle> {
        self.handle.as_ref()
    }

    pub fn seen(&self) -> bool {
        self.seen
    }

    pub fn init_failures(&self) -> u32 {
        self.init_failures
    }

    pub fn gave_up(&self) -> bool {
        self.gave_up
    }

    pub fn last_error(&self) -> Option<&DecoderError> {
        self.last_error.as_ref()
    }

    pub fn buffering_since(&self) -> Option<DateTime<Utc>> {
        self.buffering_since
    }

    pub fn position(&self) -> Option<Duration> {
        self.position
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disposed_is_terminal() {
        for next in [
            HandleState::Uninitialized,
            HandleState::Ready,
            HandleState::Playing,
            HandleState::Errored,
            HandleState::Disposed,
        ] {
            assert!(!HandleState::Disposed.can_transition_to(next));
        }
    }

    #[test]
    fn test_errored_leads_only_to_disposed() {
        assert!(HandleState::Errored.can_transition_to(HandleState::Disposed));
        assert!(!HandleState::Errored.can_transition_to(HandleState::Ready));
        assert!(!HandleState::Errored.can_transition_to(HandleState::Uninitialized));
    }

    #[test]
    fn test_happy_path_transitions() {
        assert!(HandleState::Uninitialized.can_transition_to(HandleState::Initializing));
        assert!(HandleState::Initializing.can_transition_to(HandleState::Ready));
        assert!(HandleState::Ready.can_transition_to(HandleState::Playing));
        assert!(HandleState::Playing.can_transition_to(HandleState::Buffering));
        assert!(HandleState::Buffering.can_transition_to(HandleState::Playing));
        assert!(HandleState::Playing.can_transition_to(HandleState::Paused));
        assert!(HandleState::Paused.can_transition_to(HandleState::PendingDisposal));
        assert!(!HandleState::Uninitialized.can_transition_to(HandleState::Playing));
        assert!(!HandleState::Ready.can_transition_to(HandleState::Paused));
    }

    #[test]
    fn test_pending_disposal_round_trip_resumes_paused() {
        let mut handle = DecoderHandle::new(HandleId(1), VideoId::new("v"));
        handle.state = HandleState::Playing;

        assert!(handle.mark_pending(Utc::now()));
        assert_eq!(handle.state(), HandleState::PendingDisposal);
        assert_eq!(handle.effective_state(), HandleState::Paused);

        assert_eq!(handle.reactivate(), Some(HandleState::Paused));
        assert!(handle.disposal_due.is_none());
        assert!(handle.state().is_active());
    }

    #[test]
    fn test_refused_transition_keeps_state() {
        let mut handle = DecoderHandle::new(HandleId(2), VideoId::new("v"));

        assert!(!handle.transition(HandleState::Playing));
        assert_eq!(handle.state(), HandleState::Uninitialized);
    }
}
