//! Flush state machine and deferred actions
//!
//! Each stream runs its own copy of the flush automaton; together with the
//! deferred-action queue they form the serialization fence: pipeline
//! mutations queue up as actions and only execute once neither stream is
//! mid-flush.

use crate::player::DoneFn;
use crate::renderer::VideoSurface;
use std::fmt;
use std::sync::Arc;

/// Per-stream flush automaton state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) enum FlushState {
    /// Not flushing
    #[default]
    None,

    /// Flush requested; decoder keeps its instance afterwards
    FlushingDecoder,

    /// Flush requested; decoder is torn down once drained
    FlushingDecoderShutdown,

    /// Flush acknowledged; waiting for the sibling stream to settle
    Flushed,

    /// Flush acknowledged, teardown in flight
    ShuttingDownDecoder,

    /// Teardown acknowledged; waiting for the sibling stream to settle
    ShutDown,
}

impl FlushState {
    /// `Some(needs_shutdown)` while a flush is in flight.
    pub(crate) fn flush_in_flight(self) -> Option<bool> {
        match self {
            FlushState::FlushingDecoder => Some(false),
            FlushState::FlushingDecoderShutdown => Some(true),
            _ => None,
        }
    }

    /// True in the resting states a deferred drain may observe.
    pub(crate) fn is_settled(self) -> bool {
        matches!(
            self,
            FlushState::None | FlushState::Flushed | FlushState::ShutDown
        )
    }
}

/// Pipeline mutations that must wait for a quiescent pipeline
///
/// The queue drains FIFO; execution halts as soon as an action puts a
/// stream back into a flushing state and resumes when the flush settles.
pub(crate) enum DeferredAction {
    /// Seek the source and re-sync the driver
    Seek { time_us: i64 },

    /// Swap (or clear) the video output surface
    SetSurface {
        surface: Option<Arc<dyn VideoSurface>>,
    },

    /// Flush-with-shutdown the named streams
    ShutdownDecoder { audio: bool, video: bool },

    /// Release an awaiting collaborator
    Post { done: DoneFn },

    /// Parameterless controller entry point
    Simple { func: SimpleFunc },
}

/// The parameterless deferred entry points
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SimpleFunc {
    ScanSources,
    Reset,
    DecoderFlush,
}

impl fmt::Debug for DeferredAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeferredAction::Seek { time_us } => write!(f, "Seek({time_us})"),
            DeferredAction::SetSurface { surface } => {
                write!(f, "SetSurface(present={})", surface.is_some())
            }
            DeferredAction::ShutdownDecoder { audio, video } => {
                write!(f, "ShutdownDecoder(audio={audio}, video={video})")
            }
            DeferredAction::Post { .. } => write!(f, "Post"),
            DeferredAction::Simple { func } => write!(f, "Simple({func:?})"),
        }
    }
}
