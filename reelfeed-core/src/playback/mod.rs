//! Bounded pool of decoder handles around the current feed position.
//!
//! The [`PlaybackResourcePool`] keeps a preload window of initialized
//! decoders, never exceeds its decoder cap, and routes every teardown
//! through the [`DisposalCoordinator`].

pub mod decoder;
pub mod disposal;
pub mod handle;
pub mod pool;

pub use decoder::{BackendHandle, DecoderBackend, DecoderError, DecoderEvent};
pub use disposal::{DisposalCoordinator, DisposalOutcome, DisposalStats, DisposalTicket};
pub use handle::{DecoderHandle, HandleId, HandleState, VideoSlot};
pub use pool::{PlaybackResourcePool, PoolStats, PreloadOutcome};

use crate::feed::VideoId;

/// Errors that can occur while driving playback.
#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum PlaybackError {
    #[error("Decoder error for {video_id}: {source}")]
    Decoder {
        video_id: VideoId,
        #[source]
        source: DecoderError,
    },

    #[error("Decoder for {video_id} did not initialize within {millis}ms")]
    InitTimeout { video_id: VideoId, millis: u64 },

    #[error("All {max_active} decoders are in use")]
    Capacity { max_active: usize },

    #[error("No usable decoder handle for {video_id}")]
    HandleUnavailable { video_id: VideoId },

    #[error("Index {index} out of range for feed of {len} videos")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("Gave up on {video_id} after {attempts} failed initializations")]
    GaveUp { video_id: VideoId, attempts: u32 },
}

impl PlaybackError {
    /// Maps a backend failure for one video onto the pool taxonomy.
    pub(crate) fn from_decoder(video_id: &VideoId, error: DecoderError) -> Self {
        match error {
            DecoderError::Timeout { millis } => PlaybackError::InitTimeout {
                video_id: video_id.clone(),
                millis,
            },
            source => PlaybackError::Decoder {
                video_id: video_id.clone(),
                source,
            },
        }
    }

    /// Video the error concerns, when it concerns a single one.
    pub fn video_id(&self) -> Option<&VideoId> {
        match self {
            PlaybackError::Decoder { video_id, .. }
            | PlaybackError::InitTimeout { video_id, .. }
            | PlaybackError::HandleUnavailable { video_id }
            | PlaybackError::GaveUp { video_id, .. } => Some(video_id),
            PlaybackError::Capacity { .. } | PlaybackError::IndexOutOfRange { .. } => None,
        }
    }
}
