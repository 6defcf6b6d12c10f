//! Renderer capability for playcore
//!
//! The renderer owns the playback clock and A/V sync math and runs on its
//! own execution context. The controller queues decoded buffers and EOS
//! markers into it and reacts to its notifications; it never touches the
//! clock directly.
//!
//! This module also defines the video output surface handle. The surface is
//! owned by the controller and handed to video decoders at configure time.

use crate::audio::AudioSink;
use crate::decoder::DrainReplyFn;
use crate::media::OutputBuffer;
use crate::player::RendererNotifier;
use crate::utils::error::{PlayerError, Result};
use std::sync::Arc;

/// Scaling applied when a frame and its window disagree on aspect ratio
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VideoScalingMode {
    /// Stretch to the window
    #[default]
    ScaleToWindow,

    /// Uniform scale, cropping overflow
    ScaleCrop,
}

/// Video output surface handle
///
/// Opaque to the controller beyond scaling-mode control; decoders dequeue
/// and queue frame buffers against it directly.
pub trait VideoSurface: Send + Sync {
    fn set_scaling_mode(&self, mode: VideoScalingMode) -> Result<()>;
}

/// Behavior switches fixed at renderer creation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RendererFlags {
    /// Source is real-time; render as data arrives
    pub real_time: bool,

    /// Audio arrives compressed and plays through the sink's offload path
    pub offload_audio: bool,
}

/// Renderer capability
pub trait Renderer: Send {
    /// Queue one decoded buffer; `reply` returns the buffer to its decoder
    /// once rendered or dropped.
    fn queue_buffer(&mut self, audio: bool, buffer: OutputBuffer, reply: DrainReplyFn);

    /// Queue an end-of-stream marker carrying the stream's final status.
    fn queue_eos(&mut self, audio: bool, error: PlayerError);

    /// Discard everything queued for one stream.
    fn flush(&mut self, audio: bool);

    fn pause(&mut self);

    fn resume(&mut self);

    /// The media timeline jumped; restart A/V sync bookkeeping.
    fn signal_time_discontinuity(&mut self);

    /// The audio sink was closed and reopened.
    fn signal_audio_sink_changed(&mut self);

    /// Stop using the sink's offload path.
    fn signal_disable_offload_audio(&mut self);
}

/// Creates renderers for the controller
pub trait RendererFactory: Send {
    fn create(
        &self,
        sink: Option<Arc<dyn AudioSink>>,
        notify: RendererNotifier,
        flags: RendererFlags,
    ) -> Box<dyn Renderer>;
}

/// Notifications a renderer posts to the controller
#[derive(Debug, Clone)]
pub(crate) enum RendererEvent {
    /// One stream finished rendering; `final_result` is `EndOfStream` for a
    /// clean end or the error that stopped the stream
    Eos { audio: bool, final_result: PlayerError },

    /// Periodic position report
    Position {
        position_us: i64,
        video_late_by_us: i64,
    },

    /// A requested flush finished
    FlushComplete { audio: bool },

    /// First video frame went out
    VideoRenderingStart,

    /// First frame of any stream went out
    MediaRenderingStart,

    /// The offloaded audio path died; the controller must rebuild the audio
    /// pipeline in PCM mode from `position_us`
    AudioOffloadTearDown { position_us: i64 },
}
