//! Decoder collaborator contract.
//!
//! The pool drives an external decoder through [`DecoderBackend`] and
//! listens to its [`DecoderEvent`] stream.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;
use url::Url;

/// Opaque handle issued by a decoder backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BackendHandle(pub u64);

impl fmt::Display for BackendHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "backend#{}", self.0)
    }
}

/// Asynchronous notifications from the decoder.
#[derive(Debug, Clone, PartialEq)]
pub enum DecoderEvent {
    /// Playback stalled (`true`) or resumed (`false`)
    Buffering { handle: BackendHandle, active: bool },
    /// Playback failed; the handle is unusable afterwards
    Error {
        handle: BackendHandle,
        reason: String,
    },
    Position {
        handle: BackendHandle,
        position: Duration,
    },
}

impl DecoderEvent {
    pub fn handle(&self) -> BackendHandle {
        match self {
            DecoderEvent::Buffering { handle, .. }
            | DecoderEvent::Error { handle, .. }
            | DecoderEvent::Position { handle, .. } => *handle,
        }
    }
}

/// Errors reported by a decoder backend.
#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum DecoderError {
    #[error("Decoder initialization failed: {reason}")]
    InitFailed { reason: String },

    #[error("Decoder initialization timed out after {millis}ms")]
    Timeout { millis: u64 },

    #[error("Decoder {operation} failed: {reason}")]
    OperationFailed {
        operation: &'static str,
        reason: String,
    },

    #[error("Decoder release failed: {reason}")]
    ReleaseFailed { reason: String },
}

/// External decoder driven by the playback pool.
#[async_trait]
pub trait DecoderBackend: Send + Sync {
    /// Prepares a decoder for `uri`.
    ///
    /// # Errors
    /// - `DecoderError::InitFailed` - Media could not be opened
    async fn init(
        &self,
        uri: &Url,
        headers: &HashMap<String, String>,
    ) -> Result<BackendHandle, DecoderError>;

    /// # Errors
    /// - `DecoderError::OperationFailed` - Handle rejected the command
    async fn play(&self, handle: BackendHandle) -> Result<(), DecoderError>;

    /// # Errors
    /// - `DecoderError::OperationFailed` - Handle rejected the command
    async fn pause(&self, handle: BackendHandle) -> Result<(), DecoderError>;

    /// # Errors
    /// - `DecoderError::OperationFailed` - Handle rejected the command
    async fn seek(&self, handle: BackendHandle, position: Duration) -> Result<(), DecoderError>;

    /// # Errors
    /// - `DecoderError::OperationFailed` - Handle rejected the command
    async fn set_volume(&self, handle: BackendHandle, volume: f32) -> Result<(), DecoderError>;

    /// Releases every resource held by the handle.
    ///
    /// # Errors
    /// - `DecoderError::ReleaseFailed` - Release did not complete cleanly
    async fn dispose(&self, handle: BackendHandle) -> Result<(), DecoderError>;

    /// Subscribes to decoder events for all handles.
    fn subscribe(&self) -> broadcast::Receiver<DecoderEvent>;
}
