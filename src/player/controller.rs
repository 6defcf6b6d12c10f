//! Playback controller for playcore
//!
//! The controller is the single active object of a playback session. It
//! owns the source, both decoders, the renderer handle, the audio sink and
//! the video surface, and mutates all of its state from one run-loop over
//! its mailbox. Collaborators post generation-stamped notifications back
//! onto the same mailbox; stale generations are dropped on dispatch.
//!
//! Mutations that need a quiescent decoder pipeline (seek, surface swap,
//! reset, decoder shutdown, source-driven rescans) never touch the pipeline
//! directly: they append deferred actions which only execute once neither
//! stream is mid-flush.

use crate::audio::{self, AudioEncoding, OffloadInfo, SinkConfig};
use crate::audio::AudioSink;
use crate::caption::{CaptionDecoder, CaptionEvent};
use crate::decoder::{Decoder, DecoderEvent, DrainReplyFn, FillReply, FillReplyFn};
use crate::mailbox::Mailbox;
use crate::media::{self, MediaFormat, OutputBuffer, TextBuffer, TrackInfo, TrackType};
use crate::player::{
    DeferredAction, DoneFn, Driver, Event, FlushState, ListenerMessage, MediaInfoKind,
    PlayerComponents, SimpleFunc, SourceEvent, SourceSpec,
};
use crate::player::{CaptionNotifier, DecoderNotifier, RendererNotifier, SourceNotifier};
use crate::renderer::{Renderer, RendererEvent, RendererFlags, VideoScalingMode, VideoSurface};
use crate::source::{DequeueResult, Source, SourceFlags};
use crate::utils::config::Settings;
use crate::utils::error::{PlayerError, Result};
use crossbeam::channel::Sender;
use log::{debug, error, info, warn};
use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use std::time::Duration;

fn stream_name(audio: bool) -> &'static str {
    if audio {
        "audio"
    } else {
        "video"
    }
}

/// Outcome of answering a decoder input request
enum FeedOutcome {
    /// The request was answered (buffer, discontinuity or error)
    Replied,

    /// The source had nothing; the caller re-posts the request
    WouldBlock(FillReplyFn),
}

/// The playback session controller
pub(crate) struct Controller {
    mailbox: Mailbox<Event>,
    components: PlayerComponents,
    driver: Weak<dyn Driver>,
    settings: Settings,

    source: Option<Box<dyn Source>>,
    source_flags: SourceFlags,
    audio_sink: Option<Arc<dyn AudioSink>>,
    native_window: Option<Arc<dyn VideoSurface>>,
    renderer: Option<Box<dyn Renderer>>,
    audio_decoder: Option<Box<dyn Decoder>>,
    video_decoder: Option<Box<dyn Decoder>>,
    caption_decoder: Option<Box<dyn CaptionDecoder>>,

    audio_decoder_generation: u32,
    video_decoder_generation: u32,
    scan_sources_generation: u32,
    poll_duration_generation: u32,
    timed_text_generation: u32,
    scan_sources_pending: bool,

    started: bool,
    offload_audio: bool,
    current_offload_info: Option<OffloadInfo>,
    audio_eos: bool,
    video_eos: bool,
    current_position_us: i64,
    video_late_by_us: i64,
    video_is_avc: bool,
    frames_total: u64,
    frames_dropped: u64,
    skip_audio_until_us: i64,
    skip_video_until_us: i64,
    time_discontinuity_pending: bool,
    flushing_audio: FlushState,
    flushing_video: FlushState,
    video_scaling_mode: VideoScalingMode,
    deferred_actions: VecDeque<DeferredAction>,
}

impl Controller {
    pub(crate) fn new(
        mailbox: Mailbox<Event>,
        components: PlayerComponents,
        driver: Weak<dyn Driver>,
        settings: Settings,
    ) -> Self {
        Self {
            mailbox,
            components,
            driver,
            settings,
            source: None,
            source_flags: SourceFlags::empty(),
            audio_sink: None,
            native_window: None,
            renderer: None,
            audio_decoder: None,
            video_decoder: None,
            caption_decoder: None,
            audio_decoder_generation: 0,
            video_decoder_generation: 0,
            scan_sources_generation: 0,
            poll_duration_generation: 0,
            timed_text_generation: 0,
            scan_sources_pending: false,
            started: false,
            offload_audio: false,
            current_offload_info: None,
            audio_eos: false,
            video_eos: false,
            current_position_us: 0,
            video_late_by_us: 0,
            video_is_avc: false,
            frames_total: 0,
            frames_dropped: 0,
            skip_audio_until_us: -1,
            skip_video_until_us: -1,
            time_discontinuity_pending: false,
            flushing_audio: FlushState::None,
            flushing_video: FlushState::None,
            video_scaling_mode: VideoScalingMode::default(),
            deferred_actions: VecDeque::new(),
        }
    }

    /// Run until released. Consumes the controller; all state dies with the
    /// run-loop.
    pub(crate) fn run(mut self) {
        while let Some(event) = self.mailbox.recv() {
            if matches!(event, Event::Release) {
                break;
            }
            self.handle(event);
        }
        debug!("controller run-loop exited");
    }

    fn handle(&mut self, event: Event) {
        match event {
            Event::SetDataSource { spec } => self.on_set_data_source(spec),
            Event::Prepare => self.on_prepare(),
            Event::Start => self.on_start(),
            Event::Pause => self.on_pause(),
            Event::Resume => self.on_resume(),
            Event::Reset => self.on_reset(),
            Event::Seek { time_us } => self.on_seek(time_us),
            Event::SetVideoSurface { surface } => self.on_set_video_surface(surface),
            Event::SetAudioSink { sink } => self.on_set_audio_sink(sink),
            Event::SetVideoScalingMode { mode } => self.on_set_video_scaling_mode(mode),
            Event::ScanSources { generation } => self.on_scan_sources(generation),
            Event::PollDuration { generation } => self.on_poll_duration(generation),
            Event::GetTrackInfo { reply } => self.on_get_track_info(reply),
            Event::GetSelectedTrack { track_type, reply } => {
                self.on_get_selected_track(track_type, reply)
            }
            Event::SelectTrack {
                index,
                select,
                reply,
            } => self.on_select_track(index, select, reply),
            Event::DecoderNotify {
                audio,
                generation,
                event,
            } => self.on_decoder_notify(audio, generation, event),
            Event::RendererNotify { event } => self.on_renderer_notify(event),
            Event::SourceNotify { event } => self.on_source_notify(event),
            Event::ClosedCaptionNotify { event } => self.on_caption_notify(event),
            Event::MoreDataQueued => {}
            Event::Release => {}
        }
    }

    // ------------------------------------------------------------------
    // Client events
    // ------------------------------------------------------------------

    fn on_set_data_source(&mut self, spec: SourceSpec) {
        debug!("set_data_source");

        if self.source.is_some() {
            warn!("data source already set for this session");
            self.with_driver(|d| {
                d.notify_set_data_source_completed(Err(PlayerError::InvalidOperation))
            });
            return;
        }

        let notify = SourceNotifier::new(self.mailbox.handle());
        let created = match spec {
            SourceSpec::Url { kind, url, headers } => {
                self.components.sources.create_url(kind, &url, &headers, notify)
            }
            SourceSpec::Fd { fd, offset, length } => {
                self.components.sources.create_fd(fd, offset, length, notify)
            }
            SourceSpec::Provided { source } => Ok(source),
        };

        let result = match created {
            Ok(source) => {
                self.source = Some(source);
                Ok(())
            }
            Err(err) => {
                error!("failed to create data source: {err}");
                Err(err)
            }
        };
        self.with_driver(|d| d.notify_set_data_source_completed(result.clone()));
    }

    fn on_prepare(&mut self) {
        match self.source.as_mut() {
            Some(source) => source.prepare_async(),
            None => {
                warn!("prepare without a data source");
                self.with_driver(|d| d.notify_prepare_completed(Err(PlayerError::InvalidOperation)));
            }
        }
    }

    fn on_start(&mut self) {
        debug!("start");

        self.video_is_avc = false;
        self.offload_audio = false;
        self.audio_eos = false;
        self.video_eos = false;
        self.skip_audio_until_us = -1;
        self.skip_video_until_us = -1;
        self.video_late_by_us = 0;
        self.frames_total = 0;
        self.frames_dropped = 0;
        self.started = true;

        if self.source.is_none() {
            warn!("start without a data source");
            self.notify_listener(ListenerMessage::Error {
                error: PlayerError::InvalidOperation,
            });
            return;
        }

        // Secure playback needs its decoders (and their controller-owned
        // input buffers) before the first access unit moves.
        if self.source_flags.contains(SourceFlags::SECURE) {
            if self.native_window.is_some() {
                let _ = self.instantiate_decoder(false);
            }
            if self.audio_sink.is_some() {
                let _ = self.instantiate_decoder(true);
            }
        }

        if let Some(source) = self.source.as_mut() {
            source.start();
        }

        let real_time = self.source.as_ref().map_or(false, |s| s.is_real_time());
        let audio_format = self.source.as_ref().and_then(|s| s.format(true));
        let has_video = self
            .source
            .as_ref()
            .and_then(|s| s.format(false))
            .is_some();

        self.offload_audio = match (&self.audio_sink, &audio_format) {
            (Some(sink), Some(format)) => audio::offload_info_for(format, has_video, true)
                .map(|mut info| {
                    info.stream_type = sink.stream_type();
                    sink.supports_offload(&info)
                })
                .unwrap_or(false),
            _ => false,
        };

        let flags = RendererFlags {
            real_time,
            offload_audio: self.offload_audio,
        };
        let notify = RendererNotifier::new(self.mailbox.handle());
        self.renderer = Some(
            self.components
                .renderers
                .create(self.audio_sink.clone(), notify, flags),
        );

        self.post_scan_sources();
    }

    fn on_pause(&mut self) {
        if self.renderer.is_none() {
            warn!("pause without an active renderer");
            return;
        }
        if let Some(source) = self.source.as_mut() {
            source.pause();
        }
        if let Some(renderer) = self.renderer.as_mut() {
            renderer.pause();
        }
    }

    fn on_resume(&mut self) {
        if self.renderer.is_none() {
            warn!("resume without an active renderer");
            return;
        }
        if let Some(source) = self.source.as_mut() {
            source.resume();
        }
        if let Some(renderer) = self.renderer.as_mut() {
            renderer.resume();
        }
    }

    fn on_reset(&mut self) {
        debug!("reset");

        self.deferred_actions.push_back(DeferredAction::ShutdownDecoder {
            audio: true,
            video: true,
        });
        self.deferred_actions.push_back(DeferredAction::Simple {
            func: SimpleFunc::Reset,
        });

        self.process_deferred_actions();
    }

    fn on_seek(&mut self, time_us: i64) {
        debug!("seek to {} us", time_us);

        self.deferred_actions.push_back(DeferredAction::Simple {
            func: SimpleFunc::DecoderFlush,
        });
        self.deferred_actions
            .push_back(DeferredAction::Seek { time_us });

        self.process_deferred_actions();
    }

    fn on_set_video_surface(&mut self, surface: Option<Arc<dyn VideoSurface>>) {
        debug!("set_video_surface (present={})", surface.is_some());

        // Tear down the video decoder first, then swap the surface; with a
        // real surface the pipeline is re-established at the current
        // position.
        self.deferred_actions.push_back(DeferredAction::ShutdownDecoder {
            audio: false,
            video: true,
        });

        let reattach = surface.is_some();
        self.deferred_actions
            .push_back(DeferredAction::SetSurface { surface });

        if reattach {
            self.deferred_actions.push_back(DeferredAction::Seek {
                time_us: self.current_position_us,
            });
            self.deferred_actions.push_back(DeferredAction::Simple {
                func: SimpleFunc::ScanSources,
            });
        }

        self.process_deferred_actions();
    }

    fn on_set_audio_sink(&mut self, sink: Arc<dyn AudioSink>) {
        debug!("set_audio_sink");
        self.audio_sink = Some(sink);
    }

    fn on_set_video_scaling_mode(&mut self, mode: VideoScalingMode) {
        self.video_scaling_mode = mode;
        if let Some(window) = &self.native_window {
            if let Err(err) = window.set_scaling_mode(mode) {
                error!("failed to set scaling mode: {err}");
            }
        }
    }

    // ------------------------------------------------------------------
    // Periodic work
    // ------------------------------------------------------------------

    fn on_scan_sources(&mut self, generation: u32) {
        if generation != self.scan_sources_generation {
            return;
        }
        self.scan_sources_pending = false;

        if self.source.is_none() {
            warn!("scan_sources without a data source");
            return;
        }

        debug!(
            "scanning sources have_audio={} have_video={}",
            self.audio_decoder.is_some(),
            self.video_decoder.is_some()
        );

        let had_any_decoder = self.audio_decoder.is_some() || self.video_decoder.is_some();

        // Video before audio: a video decoder appearing changes the audio
        // sink's deep-buffer choice.
        if self.native_window.is_some() {
            if let Err(err) = self.instantiate_decoder(false) {
                if !err.is_would_block() {
                    warn!("video decoder instantiation failed: {err}");
                }
            }
        }

        if self.audio_sink.is_some() {
            if self.offload_audio {
                // Open the sink with the compressed format before the
                // decoder exists, so the passthrough path is ready.
                if let Some(format) = self.source.as_ref().and_then(|s| s.format(true)) {
                    self.open_audio_sink(format, true);
                }
            }
            if let Err(err) = self.instantiate_decoder(true) {
                if !err.is_would_block() {
                    warn!("audio decoder instantiation failed: {err}");
                }
            }
        }

        if !had_any_decoder && (self.audio_decoder.is_some() || self.video_decoder.is_some()) {
            // First time anything playable appeared.
            if self.source_flags.contains(SourceFlags::DYNAMIC_DURATION) {
                self.schedule_poll_duration();
            }
        }

        if let Some(source) = self.source.as_mut() {
            if let Err(err) = source.feed_more_data() {
                if self.audio_decoder.is_none() && self.video_decoder.is_none() {
                    // Input ran out before either track produced a decoder.
                    if err == PlayerError::EndOfStream {
                        self.notify_listener(ListenerMessage::PlaybackComplete);
                    } else {
                        self.notify_listener(ListenerMessage::Error { error: err });
                    }
                }
                return;
            }
        }

        if (self.audio_decoder.is_none() && self.audio_sink.is_some())
            || (self.video_decoder.is_none() && self.native_window.is_some())
        {
            let delay = Duration::from_millis(self.settings.timing.scan_sources_retry_ms);
            self.mailbox.post_delayed(
                Event::ScanSources {
                    generation: self.scan_sources_generation,
                },
                delay,
            );
            self.scan_sources_pending = true;
        }
    }

    fn post_scan_sources(&mut self) {
        if self.scan_sources_pending {
            return;
        }
        self.mailbox.post(Event::ScanSources {
            generation: self.scan_sources_generation,
        });
        self.scan_sources_pending = true;
    }

    fn on_poll_duration(&mut self, generation: u32) {
        if generation != self.poll_duration_generation {
            // stale
            return;
        }

        if let Some(duration_us) = self.source.as_ref().and_then(|s| s.duration_us()) {
            self.with_driver(|d| d.notify_duration(duration_us));
        }

        let delay = Duration::from_millis(self.settings.timing.poll_duration_interval_ms);
        self.mailbox
            .post_delayed(Event::PollDuration { generation }, delay);
    }

    fn schedule_poll_duration(&mut self) {
        self.mailbox.post(Event::PollDuration {
            generation: self.poll_duration_generation,
        });
    }

    fn cancel_poll_duration(&mut self) {
        self.poll_duration_generation += 1;
    }

    // ------------------------------------------------------------------
    // Track selection
    // ------------------------------------------------------------------

    fn on_get_track_info(&mut self, reply: Sender<Vec<TrackInfo>>) {
        let mut tracks = Vec::new();

        if let Some(source) = &self.source {
            for i in 0..source.track_count() {
                if let Some(info) = source.track_info(i) {
                    tracks.push(info);
                }
            }
        }

        if let Some(caption) = &self.caption_decoder {
            for i in 0..caption.track_count() {
                if let Some(info) = caption.track_info(i) {
                    tracks.push(info);
                }
            }
        }

        let _ = reply.send(tracks);
    }

    fn on_get_selected_track(&mut self, track_type: TrackType, reply: Sender<Result<Option<usize>>>) {
        let result = match &self.source {
            Some(source) => Ok(source.selected_track(track_type)),
            None => Err(PlayerError::InvalidOperation),
        };
        let _ = reply.send(result);
    }

    fn on_select_track(&mut self, index: usize, select: bool, reply: Sender<Result<()>>) {
        let inband_tracks = self.source.as_ref().map_or(0, |s| s.track_count());
        let caption_tracks = self.caption_decoder.as_ref().map_or(0, |c| c.track_count());

        let result = if index < inband_tracks {
            match self.source.as_mut() {
                Some(source) => {
                    let info = source.track_info(index);
                    let result = source.select_track(index, select);
                    if result.is_ok()
                        && !select
                        && info.map_or(false, |i| i.track_type == TrackType::TimedText)
                    {
                        // Invalidate pending delayed deliveries.
                        self.timed_text_generation += 1;
                    }
                    result
                }
                None => Err(PlayerError::InvalidOperation),
            }
        } else if index - inband_tracks < caption_tracks {
            match self.caption_decoder.as_mut() {
                Some(caption) => caption.select_track(index - inband_tracks, select),
                None => Err(PlayerError::InvalidOperation),
            }
        } else {
            Err(PlayerError::InvalidOperation)
        };

        let _ = reply.send(result);
    }

    // ------------------------------------------------------------------
    // Decoder notifications
    // ------------------------------------------------------------------

    fn on_decoder_notify(&mut self, audio: bool, generation: u32, event: DecoderEvent) {
        let current_generation = if audio {
            self.audio_decoder_generation
        } else {
            self.video_decoder_generation
        };

        if generation != current_generation {
            debug!(
                "dropping notification from old {} decoder, generation {} != {}",
                stream_name(audio),
                generation,
                current_generation
            );
            // Release the sender if it awaits a reply so it does not hang.
            match event {
                DecoderEvent::FillThisBuffer { reply } => reply(FillReply::Discontinuity),
                DecoderEvent::DrainThisBuffer { reply, .. } => reply(),
                _ => {}
            }
            return;
        }

        match event {
            DecoderEvent::FillThisBuffer { reply } => {
                match self.feed_decoder_input(audio, reply) {
                    FeedOutcome::Replied => {}
                    FeedOutcome::WouldBlock(reply) => {
                        let fed = self
                            .source
                            .as_mut()
                            .map(|s| s.feed_more_data().is_ok())
                            .unwrap_or(false);
                        if fed {
                            let delay = Duration::from_millis(
                                self.settings.timing.decoder_backpressure_retry_ms,
                            );
                            self.mailbox.post_delayed(
                                Event::DecoderNotify {
                                    audio,
                                    generation,
                                    event: DecoderEvent::FillThisBuffer { reply },
                                },
                                delay,
                            );
                        }
                    }
                }
            }

            DecoderEvent::DrainThisBuffer { buffer, reply } => {
                self.render_buffer(audio, buffer, reply);
            }

            DecoderEvent::OutputFormatChanged { format } => {
                if audio {
                    self.open_audio_sink(format, false);
                } else {
                    let input = self.source.as_ref().and_then(|s| s.format(false));
                    self.update_video_size(input.as_ref(), Some(&format));
                }
            }

            DecoderEvent::FlushCompleted => {
                let state = if audio {
                    self.flushing_audio
                } else {
                    self.flushing_video
                };
                let Some(needs_shutdown) = state.flush_in_flight() else {
                    warn!(
                        "[{}] unexpected flush completion in state {:?}",
                        stream_name(audio),
                        state
                    );
                    return;
                };

                debug!("[{}] decoder flush completed", stream_name(audio));
                if audio {
                    self.flushing_audio = FlushState::Flushed;
                } else {
                    self.flushing_video = FlushState::Flushed;
                    self.video_late_by_us = 0;
                }

                if needs_shutdown {
                    debug!("initiating {} decoder shutdown", stream_name(audio));
                    let decoder = if audio {
                        self.audio_decoder.as_mut()
                    } else {
                        self.video_decoder.as_mut()
                    };
                    if let Some(decoder) = decoder {
                        decoder.initiate_shutdown();
                    }
                    if audio {
                        self.flushing_audio = FlushState::ShuttingDownDecoder;
                    } else {
                        self.flushing_video = FlushState::ShuttingDownDecoder;
                    }
                }

                self.finish_flush_if_possible();
            }

            DecoderEvent::ShutdownCompleted => {
                debug!("[{}] decoder shutdown completed", stream_name(audio));
                let state = if audio {
                    self.flushing_audio
                } else {
                    self.flushing_video
                };
                if state != FlushState::ShuttingDownDecoder {
                    warn!(
                        "[{}] unexpected shutdown completion in state {:?}",
                        stream_name(audio),
                        state
                    );
                }

                if audio {
                    self.audio_decoder = None;
                    self.flushing_audio = FlushState::ShutDown;
                } else {
                    self.video_decoder = None;
                    self.flushing_video = FlushState::ShutDown;
                }

                self.finish_flush_if_possible();
            }

            DecoderEvent::Eos { error } => {
                if error == PlayerError::EndOfStream {
                    debug!("got {} decoder EOS", stream_name(audio));
                } else {
                    debug!(
                        "got {} decoder EOS with error {}",
                        stream_name(audio),
                        error
                    );
                }
                if let Some(renderer) = self.renderer.as_mut() {
                    renderer.queue_eos(audio, error);
                }
            }

            DecoderEvent::Error { error } => {
                error!(
                    "received error from {} decoder, aborting playback: {}",
                    stream_name(audio),
                    error
                );
                if let Some(renderer) = self.renderer.as_mut() {
                    renderer.queue_eos(audio, error);
                }
                if audio && self.flushing_audio != FlushState::None {
                    self.audio_decoder = None;
                    self.flushing_audio = FlushState::ShutDown;
                } else if !audio && self.flushing_video != FlushState::None {
                    self.video_decoder = None;
                    self.flushing_video = FlushState::ShutDown;
                }
                self.finish_flush_if_possible();
            }
        }
    }

    /// Answer a decoder's input request from the source.
    fn feed_decoder_input(&mut self, audio: bool, reply: FillReplyFn) -> FeedOutcome {
        let flushing = if audio {
            self.flushing_audio != FlushState::None
        } else {
            self.flushing_video != FlushState::None
        };
        if flushing {
            reply(FillReply::Discontinuity);
            return FeedOutcome::Replied;
        }

        loop {
            let Some(source) = self.source.as_mut() else {
                reply(FillReply::Error(PlayerError::InvalidOperation));
                return FeedOutcome::Replied;
            };

            match source.dequeue_access_unit(audio) {
                DequeueResult::WouldBlock => return FeedOutcome::WouldBlock(reply),

                DequeueResult::Discontinuity(disc) => {
                    let mut format_change = if audio {
                        disc.audio_format
                    } else {
                        disc.video_format
                    };
                    let time_change = disc.time;

                    info!(
                        "{} discontinuity (format_change={}, time_change={})",
                        stream_name(audio),
                        format_change,
                        time_change
                    );

                    if audio {
                        self.skip_audio_until_us = -1;
                    } else {
                        self.skip_video_until_us = -1;
                    }

                    if time_change {
                        if let Some(resume_at_us) = disc.resume_at_us {
                            info!(
                                "suppressing rendering of {} until {} us",
                                stream_name(audio),
                                resume_at_us
                            );
                            if audio {
                                self.skip_audio_until_us = resume_at_us;
                            } else {
                                self.skip_video_until_us = resume_at_us;
                            }
                        }
                    }

                    self.time_discontinuity_pending =
                        self.time_discontinuity_pending || time_change;

                    let new_format = self.source.as_ref().and_then(|s| s.format(audio));

                    let mut seamless = false;
                    if format_change {
                        let decoder = if audio {
                            self.audio_decoder.as_ref()
                        } else {
                            self.video_decoder.as_ref()
                        };
                        seamless = match (decoder, new_format.as_ref()) {
                            (Some(decoder), Some(format)) => {
                                decoder.supports_seamless_format_change(format)
                            }
                            _ => false,
                        };
                        // A seamless switch is absorbed without a flush.
                        format_change = !seamless;
                    }

                    let shutdown_or_flush = format_change || time_change;

                    // Queue a rescan at most once per discontinuity: after
                    // the first stream starts flushing, its state is no
                    // longer NONE and the second stream skips this.
                    if self.flushing_audio == FlushState::None
                        && self.flushing_video == FlushState::None
                        && shutdown_or_flush
                    {
                        self.deferred_actions.push_front(DeferredAction::Simple {
                            func: SimpleFunc::ScanSources,
                        });
                    }

                    if format_change {
                        // Decoder cannot absorb the new format: rebuild it.
                        self.flush_decoder(audio, true, None);
                        reply(FillReply::Discontinuity);
                        return FeedOutcome::Replied;
                    } else if time_change {
                        self.flush_decoder(audio, false, new_format);
                        reply(FillReply::Discontinuity);
                        return FeedOutcome::Replied;
                    } else if seamless {
                        if let Some(format) = new_format {
                            self.update_decoder_format_without_flush(audio, format);
                        }
                        // The unit stream continues below the same request.
                        continue;
                    } else {
                        // This stream is unaffected by the discontinuity.
                        return FeedOutcome::WouldBlock(reply);
                    }
                }

                DequeueResult::Error(err) => {
                    reply(FillReply::Error(err));
                    return FeedOutcome::Replied;
                }

                DequeueResult::Unit(unit) => {
                    if !audio {
                        self.frames_total += 1;

                        if self.settings.video.allow_frame_drop
                            && !self.source_flags.contains(SourceFlags::SECURE)
                            && self.video_late_by_us > self.settings.video.late_frame_threshold_us
                            && self.video_is_avc
                            && !unit.is_reference_frame
                        {
                            self.frames_dropped += 1;
                            continue;
                        }

                        if let Some(caption) = self.caption_decoder.as_mut() {
                            caption.decode(&unit);
                        }
                    }

                    reply(FillReply::Buffer(unit));
                    return FeedOutcome::Replied;
                }
            }
        }
    }

    /// Forward one decoded buffer to the renderer, honoring flush state and
    /// skip-until markers.
    fn render_buffer(&mut self, audio: bool, buffer: OutputBuffer, reply: DrainReplyFn) {
        let flushing = if audio {
            self.flushing_audio != FlushState::None
        } else {
            self.flushing_video != FlushState::None
        };
        if flushing {
            // The decoder wants its buffers back to finish the flush; its
            // stale output must not reach the renderer.
            debug!(
                "still flushing the {} decoder, returning its output buffer",
                stream_name(audio)
            );
            reply();
            return;
        }

        let time_us = buffer.time_us;

        let skip_until_us = if audio {
            &mut self.skip_audio_until_us
        } else {
            &mut self.skip_video_until_us
        };

        if *skip_until_us >= 0 {
            if time_us < *skip_until_us {
                debug!(
                    "dropping {} buffer at {} us as requested",
                    stream_name(audio),
                    time_us
                );
                reply();
                return;
            }
            *skip_until_us = -1;
        }

        if !audio {
            if let Some(caption) = self.caption_decoder.as_mut() {
                if caption.is_selected() {
                    caption.display(time_us);
                }
            }
        }

        if let Some(renderer) = self.renderer.as_mut() {
            renderer.queue_buffer(audio, buffer, reply);
        } else {
            reply();
        }
    }

    // ------------------------------------------------------------------
    // Renderer notifications
    // ------------------------------------------------------------------

    fn on_renderer_notify(&mut self, event: RendererEvent) {
        match event {
            RendererEvent::Eos {
                audio,
                final_result,
            } => {
                if audio {
                    self.audio_eos = true;
                } else {
                    self.video_eos = true;
                }

                if final_result == PlayerError::EndOfStream {
                    debug!("reached {} EOS", stream_name(audio));
                } else {
                    error!(
                        "{} track encountered an error: {}",
                        stream_name(audio),
                        final_result
                    );
                    self.notify_listener(ListenerMessage::Error {
                        error: final_result,
                    });
                }

                if (self.audio_eos || self.audio_decoder.is_none())
                    && (self.video_eos || self.video_decoder.is_none())
                {
                    self.notify_listener(ListenerMessage::PlaybackComplete);
                }
            }

            RendererEvent::Position {
                position_us,
                video_late_by_us,
            } => {
                self.current_position_us = position_us;
                self.video_late_by_us = video_late_by_us;
                let (total, dropped) = (self.frames_total, self.frames_dropped);
                self.with_driver(|d| {
                    d.notify_position(position_us);
                    d.notify_frame_stats(total, dropped);
                });
            }

            RendererEvent::FlushComplete { audio } => {
                debug!("renderer {} flush completed", stream_name(audio));
            }

            RendererEvent::VideoRenderingStart => {
                self.notify_listener(ListenerMessage::Info {
                    info: MediaInfoKind::RenderingStart,
                });
            }

            RendererEvent::MediaRenderingStart => {
                debug!("media rendering started");
                self.notify_listener(ListenerMessage::Started);
            }

            RendererEvent::AudioOffloadTearDown { position_us } => {
                info!("audio offload torn down, falling back to PCM");

                self.close_audio_sink();
                self.audio_decoder = None;
                if let Some(renderer) = self.renderer.as_mut() {
                    renderer.flush(true);
                    if self.video_decoder.is_some() {
                        renderer.flush(false);
                    }
                    renderer.signal_disable_offload_audio();
                }
                self.offload_audio = false;

                self.perform_seek(position_us);
                if let Err(err) = self.instantiate_decoder(true) {
                    if !err.is_would_block() {
                        warn!("audio decoder re-instantiation failed: {err}");
                    }
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Source notifications
    // ------------------------------------------------------------------

    fn on_source_notify(&mut self, event: SourceEvent) {
        if self.source.is_none() {
            // A source cleared by reset may still have notifications in
            // flight; they are all stale now.
            debug!("dropping source notification after reset");
            return;
        }

        match event {
            SourceEvent::Prepared { result } => {
                // Report duration first so it is set by the time the client
                // sees prepare completion.
                let duration = self.source.as_ref().and_then(|s| s.duration_us());
                self.with_driver(|d| {
                    if let Some(duration_us) = duration {
                        d.notify_duration(duration_us);
                    }
                    d.notify_prepare_completed(result.clone());
                });
            }

            SourceEvent::FlagsChanged { flags } => {
                self.with_driver(|d| d.notify_flags_changed(flags));

                let had_dynamic = self.source_flags.contains(SourceFlags::DYNAMIC_DURATION);
                let has_dynamic = flags.contains(SourceFlags::DYNAMIC_DURATION);
                if had_dynamic && !has_dynamic {
                    self.cancel_poll_duration();
                } else if !had_dynamic
                    && has_dynamic
                    && (self.audio_decoder.is_some() || self.video_decoder.is_some())
                {
                    self.schedule_poll_duration();
                }

                self.source_flags = flags;
            }

            SourceEvent::VideoSizeChanged { format } => {
                self.update_video_size(Some(&format), None);
            }

            SourceEvent::BufferingUpdate { percent } => {
                self.notify_listener(ListenerMessage::BufferingUpdate { percent });
            }

            SourceEvent::BufferingStart => {
                self.notify_listener(ListenerMessage::Info {
                    info: MediaInfoKind::BufferingStart,
                });
            }

            SourceEvent::BufferingEnd => {
                self.notify_listener(ListenerMessage::Info {
                    info: MediaInfoKind::BufferingEnd,
                });
            }

            SourceEvent::SubtitleData { buffer } => {
                self.send_subtitle_data(buffer, 0);
            }

            SourceEvent::TimedTextData { buffer, generation } => {
                if let Some(generation) = generation {
                    if generation != self.timed_text_generation {
                        return;
                    }
                }

                if self.current_position_us < buffer.time_us {
                    // Not due yet; re-post tagged with the current
                    // generation so a later deselect invalidates it.
                    let delay_us = (buffer.time_us - self.current_position_us) as u64;
                    let generation = self.timed_text_generation;
                    self.mailbox.post_delayed(
                        Event::SourceNotify {
                            event: SourceEvent::TimedTextData {
                                buffer,
                                generation: Some(generation),
                            },
                        },
                        Duration::from_micros(delay_us),
                    );
                } else {
                    self.send_timed_text(buffer);
                }
            }

            SourceEvent::QueueDecoderShutdown { audio, video, done } => {
                self.queue_decoder_shutdown(audio, video, done);
            }

            SourceEvent::DrmNoLicense => {
                self.notify_listener(ListenerMessage::Error {
                    error: PlayerError::DrmNoLicense,
                });
            }
        }
    }

    fn queue_decoder_shutdown(&mut self, audio: bool, video: bool, done: DoneFn) {
        info!("queue_decoder_shutdown audio={audio} video={video}");

        self.deferred_actions
            .push_back(DeferredAction::ShutdownDecoder { audio, video });
        self.deferred_actions.push_back(DeferredAction::Simple {
            func: SimpleFunc::ScanSources,
        });
        self.deferred_actions.push_back(DeferredAction::Post { done });

        self.process_deferred_actions();
    }

    // ------------------------------------------------------------------
    // Caption notifications
    // ------------------------------------------------------------------

    fn on_caption_notify(&mut self, event: CaptionEvent) {
        match event {
            CaptionEvent::Data { buffer } => {
                let inband_tracks = self.source.as_ref().map_or(0, |s| s.track_count());
                self.send_subtitle_data(buffer, inband_tracks);
            }
            CaptionEvent::TrackAdded => {
                self.notify_listener(ListenerMessage::Info {
                    info: MediaInfoKind::MetadataUpdate,
                });
            }
        }
    }

    fn send_subtitle_data(&mut self, mut buffer: TextBuffer, base_index: usize) {
        buffer.track_index += base_index;
        self.notify_listener(ListenerMessage::SubtitleData { buffer });
    }

    fn send_timed_text(&mut self, buffer: TextBuffer) {
        if buffer.mime.eq_ignore_ascii_case(media::MIME_TEXT_3GPP) && !buffer.data.is_empty() {
            self.notify_listener(ListenerMessage::TimedText {
                buffer: Some(buffer),
            });
        } else {
            // An empty payload clears the display.
            self.notify_listener(ListenerMessage::TimedText { buffer: None });
        }
    }

    // ------------------------------------------------------------------
    // Decoder lifecycle
    // ------------------------------------------------------------------

    /// Create and configure the decoder for one stream.
    ///
    /// `WouldBlock` means the source has not produced a format yet; the
    /// scan-sources loop retries later.
    fn instantiate_decoder(&mut self, audio: bool) -> Result<()> {
        let present = if audio {
            self.audio_decoder.is_some()
        } else {
            self.video_decoder.is_some()
        };
        if present {
            return Ok(());
        }

        let Some(source) = self.source.as_ref() else {
            return Err(PlayerError::InvalidOperation);
        };
        let Some(mut format) = source.format(audio) else {
            return Err(PlayerError::WouldBlock);
        };

        if !audio {
            self.video_is_avc = format.is_avc();

            self.caption_decoder = Some(
                self.components
                    .captions
                    .create(CaptionNotifier::new(self.mailbox.handle())),
            );

            if self.source_flags.contains(SourceFlags::SECURE) {
                format.secure = true;
            }
        }

        let mut decoder = if audio {
            self.audio_decoder_generation += 1;
            let notify = DecoderNotifier::new(
                self.mailbox.handle(),
                true,
                self.audio_decoder_generation,
            );
            self.components
                .decoders
                .create_audio(notify, self.offload_audio)?
        } else {
            self.video_decoder_generation += 1;
            let notify = DecoderNotifier::new(
                self.mailbox.handle(),
                false,
                self.video_decoder_generation,
            );
            let Some(surface) = self.native_window.clone() else {
                return Err(PlayerError::InvalidOperation);
            };
            self.components.decoders.create_video(notify, surface)?
        };

        decoder.init()?;
        decoder.configure(&format)?;

        // A fresh buffer set for every decoder generation: the source must
        // never keep buffers of a torn-down decoder.
        if !audio && self.source_flags.contains(SourceFlags::SECURE) {
            let buffers = decoder.input_buffers()?;
            if let Some(source) = self.source.as_mut() {
                if let Err(err) = source.set_buffers(false, buffers) {
                    error!("secure source rejected decoder input buffers: {err}");
                    return Err(err);
                }
            }
        }

        if audio {
            self.audio_decoder = Some(decoder);
        } else {
            self.video_decoder = Some(decoder);
        }
        Ok(())
    }

    fn flush_decoder(&mut self, audio: bool, needs_shutdown: bool, new_format: Option<MediaFormat>) {
        debug!(
            "[{}] flush_decoder needs_shutdown={}",
            stream_name(audio),
            needs_shutdown
        );

        let state = if audio {
            self.flushing_audio
        } else {
            self.flushing_video
        };
        if state != FlushState::None {
            info!(
                "[{}] flush requested while already in {:?}",
                stream_name(audio),
                state
            );
            return;
        }

        let decoder = if audio {
            self.audio_decoder.as_mut()
        } else {
            self.video_decoder.as_mut()
        };
        let Some(decoder) = decoder else {
            info!(
                "flush_decoder {} without decoder present",
                stream_name(audio)
            );
            return;
        };

        decoder.signal_flush(new_format);

        // No scanning of sources until this flush settles.
        self.scan_sources_generation += 1;
        self.scan_sources_pending = false;

        if let Some(renderer) = self.renderer.as_mut() {
            renderer.flush(audio);
        }

        let new_state = if needs_shutdown {
            FlushState::FlushingDecoderShutdown
        } else {
            FlushState::FlushingDecoder
        };
        if audio {
            self.flushing_audio = new_state;
        } else {
            self.flushing_video = new_state;
        }
    }

    fn update_decoder_format_without_flush(&mut self, audio: bool, format: MediaFormat) {
        debug!("[{}] update_decoder_format_without_flush", stream_name(audio));

        let decoder = if audio {
            self.audio_decoder.as_mut()
        } else {
            self.video_decoder.as_mut()
        };
        match decoder {
            Some(decoder) => decoder.signal_update_format(format),
            None => info!(
                "update_decoder_format_without_flush {} without decoder present",
                stream_name(audio)
            ),
        }
    }

    fn finish_flush_if_possible(&mut self) {
        if !self.flushing_audio.is_settled() || !self.flushing_video.is_settled() {
            return;
        }

        debug!("both audio and video are flushed now");

        if self.time_discontinuity_pending {
            if let Some(renderer) = self.renderer.as_mut() {
                renderer.signal_time_discontinuity();
            }
            self.time_discontinuity_pending = false;
        }

        if self.flushing_audio == FlushState::Flushed {
            if let Some(decoder) = self.audio_decoder.as_mut() {
                decoder.signal_resume();
            }
        }
        if self.flushing_video == FlushState::Flushed {
            if let Some(decoder) = self.video_decoder.as_mut() {
                decoder.signal_resume();
            }
        }

        self.flushing_audio = FlushState::None;
        self.flushing_video = FlushState::None;

        self.process_deferred_actions();
    }

    // ------------------------------------------------------------------
    // Deferred actions
    // ------------------------------------------------------------------

    fn process_deferred_actions(&mut self) {
        loop {
            if self.flushing_audio != FlushState::None || self.flushing_video != FlushState::None {
                // Mid-flush; the drain resumes from finish_flush_if_possible.
                debug!(
                    "postponing deferred actions, flushing_audio={:?} flushing_video={:?}",
                    self.flushing_audio, self.flushing_video
                );
                break;
            }

            let Some(action) = self.deferred_actions.pop_front() else {
                break;
            };
            debug!("executing deferred action {:?}", action);
            self.execute_action(action);
        }
    }

    fn execute_action(&mut self, action: DeferredAction) {
        match action {
            DeferredAction::Seek { time_us } => self.perform_seek(time_us),
            DeferredAction::SetSurface { surface } => self.perform_set_surface(surface),
            DeferredAction::ShutdownDecoder { audio, video } => {
                self.perform_decoder_shutdown(audio, video)
            }
            DeferredAction::Post { done } => done(),
            DeferredAction::Simple { func } => match func {
                SimpleFunc::ScanSources => self.perform_scan_sources(),
                SimpleFunc::Reset => self.perform_reset(),
                SimpleFunc::DecoderFlush => self.perform_decoder_flush(),
            },
        }
    }

    fn perform_seek(&mut self, time_us: i64) {
        debug!(
            "perform_seek to {} us ({:.2} secs)",
            time_us,
            time_us as f64 / 1e6
        );

        if let Some(source) = self.source.as_mut() {
            if let Err(err) = source.seek_to(time_us) {
                error!("source seek failed: {err}");
            }
        }
        self.timed_text_generation += 1;

        self.with_driver(|d| {
            d.notify_position(time_us);
            d.notify_seek_complete();
        });

        // Everything is flushed; decoders resume from finish_flush.
    }

    fn perform_decoder_flush(&mut self) {
        debug!("perform_decoder_flush");

        if self.audio_decoder.is_none() && self.video_decoder.is_none() {
            return;
        }

        self.time_discontinuity_pending = true;

        if self.audio_decoder.is_some() {
            self.flush_decoder(true, false, None);
        }
        if self.video_decoder.is_some() {
            self.flush_decoder(false, false, None);
        }
    }

    fn perform_decoder_shutdown(&mut self, audio: bool, video: bool) {
        debug!("perform_decoder_shutdown audio={audio} video={video}");

        if (!audio || self.audio_decoder.is_none()) && (!video || self.video_decoder.is_none()) {
            return;
        }

        self.time_discontinuity_pending = true;

        if audio && self.audio_decoder.is_some() {
            self.flush_decoder(true, true, None);
        }
        if video && self.video_decoder.is_some() {
            self.flush_decoder(false, true, None);
        }
    }

    fn perform_reset(&mut self) {
        debug!("perform_reset");

        if self.audio_decoder.is_some() || self.video_decoder.is_some() {
            warn!("perform_reset with decoders still present");
            self.audio_decoder = None;
            self.video_decoder = None;
        }

        self.cancel_poll_duration();

        self.scan_sources_generation += 1;
        self.scan_sources_pending = false;

        self.renderer = None;
        self.caption_decoder = None;

        if let Some(mut source) = self.source.take() {
            source.stop();
        }

        self.with_driver(|d| d.notify_reset_complete());

        self.started = false;
    }

    fn perform_scan_sources(&mut self) {
        debug!("perform_scan_sources");

        if !self.started {
            return;
        }

        if self.audio_decoder.is_none() || self.video_decoder.is_none() {
            self.post_scan_sources();
        }
    }

    fn perform_set_surface(&mut self, surface: Option<Arc<dyn VideoSurface>>) {
        debug!("perform_set_surface (present={})", surface.is_some());

        self.native_window = surface;

        if let Some(window) = &self.native_window {
            if let Err(err) = window.set_scaling_mode(self.video_scaling_mode) {
                error!("failed to re-apply scaling mode: {err}");
            }
        }

        self.with_driver(|d| d.notify_set_surface_complete());
    }

    // ------------------------------------------------------------------
    // Audio sink configurator
    // ------------------------------------------------------------------

    fn open_audio_sink(&mut self, format: MediaFormat, offload_only: bool) {
        debug!(
            "open_audio_sink: offload_only={} offload_audio={}",
            offload_only, self.offload_audio
        );

        let Some(sink) = self.audio_sink.clone() else {
            return;
        };
        let (Some(channel_count), Some(sample_rate)) = (format.channel_count, format.sample_rate)
        else {
            error!("audio format is missing channel count or sample rate");
            return;
        };

        let mut sink_changed = false;

        let deep_buffer = self.video_decoder.is_none()
            && self
                .source
                .as_ref()
                .and_then(|s| s.duration_us())
                .map_or(false, |d| d > self.settings.audio.deep_buffer_min_duration_us);

        if self.offload_audio {
            match audio::encoding_for_mime(&format.mime) {
                None => {
                    error!(
                        "could not map mime \"{}\" to an offloadable encoding",
                        format.mime
                    );
                    self.offload_audio = false;
                }
                Some(mut encoding) => {
                    if encoding == AudioEncoding::Aac {
                        if let Some(profile) = format.aac_profile {
                            encoding = audio::refine_aac_encoding(profile);
                        }
                    }

                    let info = OffloadInfo {
                        sample_rate,
                        channel_mask: format.channel_mask,
                        encoding,
                        stream_type: sink.stream_type(),
                        bit_rate: format.bit_rate,
                        duration_us: format.duration_us,
                        has_video: self.video_decoder.is_some(),
                        is_streaming: true,
                    };

                    if self.current_offload_info.as_ref() == Some(&info) {
                        debug!("open_audio_sink: no change in offload mode");
                        return;
                    }

                    debug!("open_audio_sink: trying to open sink in offload mode");
                    sink_changed = true;
                    sink.close();

                    let config = SinkConfig {
                        sample_rate,
                        channel_count,
                        channel_mask: format.channel_mask,
                        encoding,
                        buffer_count: self.settings.audio.sink_buffer_count,
                        deep_buffer: false,
                        offload: Some(info.clone()),
                    };

                    let mut opened = sink.open(&config);
                    if opened.is_ok() {
                        // Offloaded tracks bypass the mixer; the hardware
                        // wants codec metadata before the first buffer.
                        sink.send_metadata(&format);
                        self.current_offload_info = Some(info);
                        opened = sink.start();
                        if opened.is_ok() {
                            debug!("open_audio_sink: offload succeeded");
                        }
                    }
                    if let Err(err) = opened {
                        warn!("open_audio_sink: offload failed ({err}), disabling offload");
                        sink.close();
                        if let Some(renderer) = self.renderer.as_mut() {
                            renderer.signal_disable_offload_audio();
                        }
                        self.offload_audio = false;
                        self.current_offload_info = None;
                    }
                }
            }
        }

        if !offload_only && !self.offload_audio {
            debug!("open_audio_sink: opening sink in PCM mode");
            sink_changed = true;
            sink.close();
            self.current_offload_info = None;

            let config = SinkConfig {
                sample_rate,
                channel_count,
                channel_mask: format.channel_mask,
                encoding: AudioEncoding::Pcm16,
                buffer_count: self.settings.audio.sink_buffer_count,
                deep_buffer,
                offload: None,
            };

            // A valid PCM configuration must always be openable.
            if let Err(err) = sink.open(&config) {
                panic!("PCM audio sink open failed: {err}");
            }
            if let Err(err) = sink.start() {
                error!("audio sink start failed: {err}");
            }
        }

        if sink_changed {
            if let Some(renderer) = self.renderer.as_mut() {
                renderer.signal_audio_sink_changed();
            }
        }
    }

    fn close_audio_sink(&mut self) {
        if let Some(sink) = &self.audio_sink {
            sink.close();
        }
        self.current_offload_info = None;
    }

    // ------------------------------------------------------------------
    // Egress helpers
    // ------------------------------------------------------------------

    fn update_video_size(&mut self, input: Option<&MediaFormat>, output: Option<&MediaFormat>) {
        let Some(input) = input else {
            warn!("unknown video size, reporting 0x0");
            self.notify_listener(ListenerMessage::SetVideoSize {
                width: 0,
                height: 0,
            });
            return;
        };

        let (width, height) = media::display_size(input, output);
        debug!("video display size {}x{}", width, height);
        self.notify_listener(ListenerMessage::SetVideoSize { width, height });
    }

    fn notify_listener(&self, message: ListenerMessage) {
        self.with_driver(|d| d.notify_listener(message.clone()));
    }

    fn with_driver<F: FnOnce(&dyn Driver)>(&self, f: F) {
        if let Some(driver) = self.driver.upgrade() {
            f(&*driver);
        }
    }
}
