//! Decoder capability for playcore
//!
//! A decoder owns its codec and worker threads; the controller only issues
//! the control verbs below and answers the decoder's buffer requests.
//! Concrete decoders come from a [`DecoderFactory`]; for offloaded audio
//! the factory returns a passthrough decoder that forwards compressed data
//! to the sink instead of decoding it.
//!
//! Every decoder instance is bound to a `DecoderNotifier` stamped with the
//! generation it was created under. Notifications from a torn-down decoder
//! carry the old generation and are discarded by the controller.

use crate::media::{AccessUnit, MediaFormat, OutputBuffer};
use crate::player::DecoderNotifier;
use crate::renderer::VideoSurface;
use crate::utils::error::{PlayerError, Result};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

/// Controller-owned input buffer shared with a secure source
pub type SharedInputBuffer = Arc<Mutex<Vec<u8>>>;

/// Answer to a decoder's input request
#[derive(Debug, Clone)]
pub enum FillReply {
    /// One access unit of input
    Buffer(AccessUnit),

    /// The pipeline is being reconfigured; stop requesting input until the
    /// controller signals a resume
    Discontinuity,

    /// Terminal input status, including `EndOfStream`
    Error(PlayerError),
}

/// Callback completing a `FillThisBuffer` request
pub type FillReplyFn = Box<dyn FnOnce(FillReply) + Send>;

/// Callback returning an output buffer to its decoder
pub type DrainReplyFn = Box<dyn FnOnce() + Send>;

/// Decoder capability
pub trait Decoder: Send {
    fn init(&mut self) -> Result<()>;

    fn configure(&mut self, format: &MediaFormat) -> Result<()>;

    /// Flush buffered data. Completion arrives as a `FlushCompleted`
    /// notification; `new_format` primes the decoder for the stream it will
    /// see after a time discontinuity.
    fn signal_flush(&mut self, new_format: Option<MediaFormat>);

    /// Resume requesting input after a completed flush.
    fn signal_resume(&mut self);

    /// Absorb a seamless format change without flushing.
    fn signal_update_format(&mut self, format: MediaFormat);

    /// Begin asynchronous teardown. Completion arrives as a
    /// `ShutdownCompleted` notification.
    fn initiate_shutdown(&mut self);

    /// Input buffers for in-place population by a secure source.
    fn input_buffers(&mut self) -> Result<Vec<SharedInputBuffer>>;

    /// Whether this decoder can switch to `format` without draining its
    /// output.
    fn supports_seamless_format_change(&self, format: &MediaFormat) -> bool;
}

/// Creates decoders for the controller
pub trait DecoderFactory: Send {
    /// Create an audio decoder; `passthrough` selects the offload path that
    /// hands compressed data through to the sink.
    fn create_audio(&self, notify: DecoderNotifier, passthrough: bool) -> Result<Box<dyn Decoder>>;

    /// Create a video decoder rendering into `surface`.
    fn create_video(
        &self,
        notify: DecoderNotifier,
        surface: Arc<dyn VideoSurface>,
    ) -> Result<Box<dyn Decoder>>;
}

/// Notifications a decoder posts to the controller
pub(crate) enum DecoderEvent {
    /// The decoder wants one access unit of input
    FillThisBuffer { reply: FillReplyFn },

    /// The decoder produced one output buffer
    DrainThisBuffer {
        buffer: OutputBuffer,
        reply: DrainReplyFn,
    },

    /// The decoder's output format changed
    OutputFormatChanged { format: MediaFormat },

    FlushCompleted,

    ShutdownCompleted,

    /// The input side hit a terminal status
    Eos { error: PlayerError },

    /// The decoder failed; fatal for its stream
    Error { error: PlayerError },
}

impl fmt::Debug for DecoderEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecoderEvent::FillThisBuffer { .. } => write!(f, "FillThisBuffer"),
            DecoderEvent::DrainThisBuffer { buffer, .. } => {
                write!(f, "DrainThisBuffer(time_us={})", buffer.time_us)
            }
            DecoderEvent::OutputFormatChanged { format } => {
                write!(f, "OutputFormatChanged({})", format.mime)
            }
            DecoderEvent::FlushCompleted => write!(f, "FlushCompleted"),
            DecoderEvent::ShutdownCompleted => write!(f, "ShutdownCompleted"),
            DecoderEvent::Eos { error } => write!(f, "Eos({error})"),
            DecoderEvent::Error { error } => write!(f, "Error({error})"),
        }
    }
}
