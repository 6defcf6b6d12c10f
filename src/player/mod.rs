//! Player module for playcore
//!
//! This module owns the controller that binds a source, a pair of decoders
//! and a renderer into one playback session, and exposes the client-facing
//! API around it. All mutation happens on the controller's thread; clients
//! and collaborators talk to it exclusively by posting onto its mailbox.

mod controller;
mod flush;

pub(crate) use controller::Controller;
pub(crate) use flush::{DeferredAction, FlushState, SimpleFunc};

use crate::audio::AudioSink;
use crate::caption::CaptionEvent;
use crate::caption::CaptionDecoderFactory;
use crate::decoder::{DecoderEvent, DecoderFactory, DrainReplyFn, FillReplyFn};
use crate::mailbox::{Mailbox, PostHandle};
use crate::media::{MediaFormat, OutputBuffer, TextBuffer, TrackInfo, TrackType};
use crate::renderer::{RendererEvent, RendererFactory, VideoScalingMode, VideoSurface};
use crate::source::{Source, SourceFactory, SourceFlags, SourceKind};
use crate::utils::config::Settings;
use crate::utils::error::{PlayerError, Result};
use crossbeam::channel::{bounded, Sender};
use std::sync::{Arc, Weak};
use std::thread;

/// Callback completing a source-requested decoder shutdown
pub type DoneFn = Box<dyn FnOnce() + Send>;

/// Informational sub-kinds of the listener surface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaInfoKind {
    RenderingStart,
    BufferingStart,
    BufferingEnd,
    MetadataUpdate,
}

/// Player status callbacks forwarded to the client
#[derive(Debug, Clone, PartialEq)]
pub enum ListenerMessage {
    /// Every stream reached end of stream
    PlaybackComplete,

    /// Generic failure surface; `error.code()` carries the sub-code
    Error { error: PlayerError },

    Info { info: MediaInfoKind },

    /// Rendering started for the session
    Started,

    BufferingUpdate { percent: i32 },

    SetVideoSize { width: i32, height: i32 },

    SubtitleData { buffer: TextBuffer },

    /// `None` clears the currently displayed timed text
    TimedText { buffer: Option<TextBuffer> },
}

/// Driver callback surface (controller to client)
///
/// The controller holds this weakly and notifies best-effort: once the
/// driver is gone, notifications silently drop.
pub trait Driver: Send + Sync {
    fn notify_set_data_source_completed(&self, result: Result<()>);
    fn notify_prepare_completed(&self, result: Result<()>);
    fn notify_duration(&self, duration_us: i64);
    fn notify_position(&self, position_us: i64);
    fn notify_frame_stats(&self, total: u64, dropped: u64);
    fn notify_seek_complete(&self);
    fn notify_set_surface_complete(&self);
    fn notify_reset_complete(&self);
    fn notify_flags_changed(&self, flags: SourceFlags);
    fn notify_listener(&self, message: ListenerMessage);
}

/// How a data source is specified before a concrete source exists
pub(crate) enum SourceSpec {
    Url {
        kind: SourceKind,
        url: String,
        headers: Vec<(String, String)>,
    },
    Fd {
        fd: i32,
        offset: i64,
        length: i64,
    },
    Provided {
        source: Box<dyn Source>,
    },
}

/// Everything the controller dispatches on
pub(crate) enum Event {
    SetDataSource { spec: SourceSpec },
    Prepare,
    Start,
    Pause,
    Resume,
    Reset,
    Seek { time_us: i64 },
    SetVideoSurface { surface: Option<Arc<dyn VideoSurface>> },
    SetAudioSink { sink: Arc<dyn AudioSink> },
    SetVideoScalingMode { mode: VideoScalingMode },
    ScanSources { generation: u32 },
    PollDuration { generation: u32 },
    GetTrackInfo { reply: Sender<Vec<TrackInfo>> },
    GetSelectedTrack {
        track_type: TrackType,
        reply: Sender<Result<Option<usize>>>,
    },
    SelectTrack {
        index: usize,
        select: bool,
        reply: Sender<Result<()>>,
    },
    DecoderNotify {
        audio: bool,
        generation: u32,
        event: DecoderEvent,
    },
    RendererNotify { event: RendererEvent },
    SourceNotify { event: SourceEvent },
    ClosedCaptionNotify { event: CaptionEvent },
    MoreDataQueued,
    Release,
}

/// Notifications a source posts to the controller
pub(crate) enum SourceEvent {
    Prepared { result: Result<()> },
    FlagsChanged { flags: SourceFlags },
    VideoSizeChanged { format: MediaFormat },
    BufferingUpdate { percent: i32 },
    BufferingStart,
    BufferingEnd,
    SubtitleData { buffer: TextBuffer },
    TimedTextData {
        buffer: TextBuffer,
        generation: Option<u32>,
    },
    QueueDecoderShutdown {
        audio: bool,
        video: bool,
        done: DoneFn,
    },
    DrmNoLicense,
}

/// Posting handle given to a source at creation time
#[derive(Clone)]
pub struct SourceNotifier {
    tx: PostHandle<Event>,
}

impl SourceNotifier {
    pub(crate) fn new(tx: PostHandle<Event>) -> Self {
        Self { tx }
    }

    fn post(&self, event: SourceEvent) {
        self.tx.post(Event::SourceNotify { event });
    }

    pub fn prepared(&self, result: Result<()>) {
        self.post(SourceEvent::Prepared { result });
    }

    pub fn flags_changed(&self, flags: SourceFlags) {
        self.post(SourceEvent::FlagsChanged { flags });
    }

    pub fn video_size_changed(&self, format: MediaFormat) {
        self.post(SourceEvent::VideoSizeChanged { format });
    }

    pub fn buffering_update(&self, percent: i32) {
        self.post(SourceEvent::BufferingUpdate { percent });
    }

    pub fn buffering_start(&self) {
        self.post(SourceEvent::BufferingStart);
    }

    pub fn buffering_end(&self) {
        self.post(SourceEvent::BufferingEnd);
    }

    pub fn subtitle_data(&self, buffer: TextBuffer) {
        self.post(SourceEvent::SubtitleData { buffer });
    }

    pub fn timed_text_data(&self, buffer: TextBuffer) {
        self.post(SourceEvent::TimedTextData {
            buffer,
            generation: None,
        });
    }

    /// Ask the controller to tear down decoders and call `done` once the
    /// pipeline is quiescent (used by sources that must re-negotiate their
    /// transport mid-session).
    pub fn queue_decoder_shutdown(&self, audio: bool, video: bool, done: DoneFn) {
        self.post(SourceEvent::QueueDecoderShutdown { audio, video, done });
    }

    pub fn drm_no_license(&self) {
        self.post(SourceEvent::DrmNoLicense);
    }
}

/// Posting handle given to a decoder at creation time
///
/// Carries the stream and the generation the decoder was created under and
/// stamps both into every notification, which is what lets the controller
/// drop callbacks from torn-down decoders.
#[derive(Clone)]
pub struct DecoderNotifier {
    tx: PostHandle<Event>,
    audio: bool,
    generation: u32,
}

impl DecoderNotifier {
    pub(crate) fn new(tx: PostHandle<Event>, audio: bool, generation: u32) -> Self {
        Self {
            tx,
            audio,
            generation,
        }
    }

    fn post(&self, event: DecoderEvent) {
        self.tx.post(Event::DecoderNotify {
            audio: self.audio,
            generation: self.generation,
            event,
        });
    }

    pub fn is_audio(&self) -> bool {
        self.audio
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// Request one access unit of input.
    pub fn request_input(&self, reply: FillReplyFn) {
        self.post(DecoderEvent::FillThisBuffer { reply });
    }

    /// Offer one decoded buffer for rendering.
    pub fn output_ready(&self, buffer: OutputBuffer, reply: DrainReplyFn) {
        self.post(DecoderEvent::DrainThisBuffer { buffer, reply });
    }

    pub fn output_format_changed(&self, format: MediaFormat) {
        self.post(DecoderEvent::OutputFormatChanged { format });
    }

    pub fn flush_completed(&self) {
        self.post(DecoderEvent::FlushCompleted);
    }

    pub fn shutdown_completed(&self) {
        self.post(DecoderEvent::ShutdownCompleted);
    }

    pub fn eos(&self, error: PlayerError) {
        self.post(DecoderEvent::Eos { error });
    }

    pub fn error(&self, error: PlayerError) {
        self.post(DecoderEvent::Error { error });
    }
}

/// Posting handle given to the renderer at creation time
#[derive(Clone)]
pub struct RendererNotifier {
    tx: PostHandle<Event>,
}

impl RendererNotifier {
    pub(crate) fn new(tx: PostHandle<Event>) -> Self {
        Self { tx }
    }

    fn post(&self, event: RendererEvent) {
        self.tx.post(Event::RendererNotify { event });
    }

    pub fn eos(&self, audio: bool, final_result: PlayerError) {
        self.post(RendererEvent::Eos {
            audio,
            final_result,
        });
    }

    pub fn position(&self, position_us: i64, video_late_by_us: i64) {
        self.post(RendererEvent::Position {
            position_us,
            video_late_by_us,
        });
    }

    pub fn flush_complete(&self, audio: bool) {
        self.post(RendererEvent::FlushComplete { audio });
    }

    pub fn video_rendering_start(&self) {
        self.post(RendererEvent::VideoRenderingStart);
    }

    pub fn media_rendering_start(&self) {
        self.post(RendererEvent::MediaRenderingStart);
    }

    pub fn audio_offload_tear_down(&self, position_us: i64) {
        self.post(RendererEvent::AudioOffloadTearDown { position_us });
    }
}

/// Posting handle given to the caption decoder at creation time
#[derive(Clone)]
pub struct CaptionNotifier {
    tx: PostHandle<Event>,
}

impl CaptionNotifier {
    pub(crate) fn new(tx: PostHandle<Event>) -> Self {
        Self { tx }
    }

    pub fn data(&self, buffer: TextBuffer) {
        self.tx.post(Event::ClosedCaptionNotify {
            event: CaptionEvent::Data { buffer },
        });
    }

    pub fn track_added(&self) {
        self.tx.post(Event::ClosedCaptionNotify {
            event: CaptionEvent::TrackAdded,
        });
    }
}

/// The pluggable collaborators a player session is assembled from
pub struct PlayerComponents {
    pub sources: Box<dyn SourceFactory>,
    pub decoders: Box<dyn DecoderFactory>,
    pub renderers: Box<dyn RendererFactory>,
    pub captions: Box<dyn CaptionDecoderFactory>,
}

/// Owns the controller thread
pub struct Player {
    handle: PlayerHandle,
    worker: Option<thread::JoinHandle<()>>,
}

impl Player {
    /// Assemble a player session and start its controller thread.
    pub fn new(components: PlayerComponents, driver: Weak<dyn Driver>, settings: Settings) -> Self {
        let mailbox = Mailbox::new();
        let handle = PlayerHandle {
            tx: mailbox.handle(),
        };

        let controller = Controller::new(mailbox, components, driver, settings);
        let worker = thread::spawn(move || controller.run());

        Self {
            handle,
            worker: Some(worker),
        }
    }

    /// Clonable client handle onto this session.
    pub fn handle(&self) -> PlayerHandle {
        self.handle.clone()
    }

    /// Stop the controller thread and wait for it.
    pub fn shutdown(mut self) {
        self.shutdown_inner();
    }

    fn shutdown_inner(&mut self) {
        if let Some(worker) = self.worker.take() {
            self.handle.release();
            let _ = worker.join();
        }
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        self.shutdown_inner();
    }
}

/// Client-facing API
///
/// Every method posts onto the controller's mailbox; only the track calls
/// block, awaiting their reply the way the driver's synchronous entry
/// points require.
#[derive(Clone)]
pub struct PlayerHandle {
    tx: PostHandle<Event>,
}

impl PlayerHandle {
    /// Set a URL data source. The URL picks the source variant; failure is
    /// reported asynchronously through the driver.
    pub fn set_data_source_url(&self, url: &str, headers: &[(String, String)]) {
        let kind = SourceKind::classify(url);
        self.tx.post(Event::SetDataSource {
            spec: SourceSpec::Url {
                kind,
                url: url.to_string(),
                headers: headers.to_vec(),
            },
        });
    }

    /// Set a file-descriptor data source covering `length` bytes at
    /// `offset`.
    pub fn set_data_source_fd(&self, fd: i32, offset: i64, length: i64) {
        self.tx.post(Event::SetDataSource {
            spec: SourceSpec::Fd { fd, offset, length },
        });
    }

    /// Set a caller-built streaming source. The builder receives the
    /// notifier the source must report through.
    pub fn set_data_source_with<F>(&self, build: F)
    where
        F: FnOnce(SourceNotifier) -> Box<dyn Source>,
    {
        let source = build(SourceNotifier::new(self.tx.clone()));
        self.tx.post(Event::SetDataSource {
            spec: SourceSpec::Provided { source },
        });
    }

    pub fn prepare_async(&self) {
        self.tx.post(Event::Prepare);
    }

    pub fn start(&self) {
        self.tx.post(Event::Start);
    }

    pub fn pause(&self) {
        self.tx.post(Event::Pause);
    }

    pub fn resume(&self) {
        self.tx.post(Event::Resume);
    }

    pub fn reset_async(&self) {
        self.tx.post(Event::Reset);
    }

    pub fn seek_to_async(&self, time_us: i64) {
        self.tx.post(Event::Seek { time_us });
    }

    pub fn set_video_surface(&self, surface: Option<Arc<dyn VideoSurface>>) {
        self.tx.post(Event::SetVideoSurface { surface });
    }

    pub fn set_audio_sink(&self, sink: Arc<dyn AudioSink>) {
        self.tx.post(Event::SetAudioSink { sink });
    }

    pub fn set_video_scaling_mode(&self, mode: VideoScalingMode) {
        self.tx.post(Event::SetVideoScalingMode { mode });
    }

    /// Fetch the unified track table (in-band tracks first, then caption
    /// tracks). Blocks until the controller replies.
    pub fn get_track_info(&self) -> Result<Vec<TrackInfo>> {
        let (reply, response) = bounded(1);
        self.tx.post(Event::GetTrackInfo { reply });
        response.recv().map_err(|_| PlayerError::InvalidOperation)
    }

    /// Fetch the selected track of a type, if any. Blocks until the
    /// controller replies.
    pub fn get_selected_track(&self, track_type: TrackType) -> Result<Option<usize>> {
        let (reply, response) = bounded(1);
        self.tx.post(Event::GetSelectedTrack { track_type, reply });
        response
            .recv()
            .map_err(|_| PlayerError::InvalidOperation)?
    }

    /// Select or deselect a track by unified index. Blocks until the
    /// controller replies.
    pub fn select_track(&self, index: usize, select: bool) -> Result<()> {
        let (reply, response) = bounded(1);
        self.tx.post(Event::SelectTrack {
            index,
            select,
            reply,
        });
        response
            .recv()
            .map_err(|_| PlayerError::InvalidOperation)?
    }

    /// End the controller's run-loop. Pending work is abandoned.
    pub fn release(&self) {
        self.tx.post(Event::Release);
    }
}
