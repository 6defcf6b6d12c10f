//! Scripted decoder
//!
//! Behaves like a zero-latency codec: each access unit it is fed comes
//! straight back out as an output buffer with the same timestamp. The
//! request/feed/drain chain runs entirely over the controller's mailbox via
//! the reply callbacks, so no worker thread is needed.
//!
//! Tests can hold a flush open (`hold_flush`) to observe the controller
//! mid-flush, then release it.

use crate::decoder::{Decoder, DecoderFactory, FillReply, SharedInputBuffer};
use crate::media::{MediaFormat, OutputBuffer};
use crate::player::DecoderNotifier;
use crate::renderer::VideoSurface;
use crate::utils::error::{PlayerError, Result};
use parking_lot::Mutex;
use std::sync::Arc;

struct AutoDecoderInner {
    notifier: DecoderNotifier,
    seamless: bool,
    hold_flush: bool,
    flush_pending: bool,

    configured: Vec<MediaFormat>,
    updated_formats: Vec<MediaFormat>,
    flushes: u32,
    resumes: u32,
    shutdowns: u32,
    idle: bool,
}

fn request_more(inner: &Arc<Mutex<AutoDecoderInner>>) {
    let notifier = inner.lock().notifier.clone();
    let state = Arc::clone(inner);
    notifier.request_input(Box::new(move |reply| handle_fill(&state, reply)));
}

fn handle_fill(inner: &Arc<Mutex<AutoDecoderInner>>, reply: FillReply) {
    match reply {
        FillReply::Buffer(unit) => {
            let notifier = inner.lock().notifier.clone();
            let buffer = OutputBuffer {
                time_us: unit.time_us,
                data: unit.data,
            };
            let state = Arc::clone(inner);
            notifier.output_ready(
                buffer,
                Box::new(move || {
                    if !state.lock().idle {
                        request_more(&state);
                    }
                }),
            );
        }
        FillReply::Discontinuity => {
            // Pipeline is reconfiguring; wait for signal_resume.
            inner.lock().idle = true;
        }
        FillReply::Error(error) => {
            let notifier = inner.lock().notifier.clone();
            notifier.eos(error);
        }
    }
}

/// Decoder implementation that echoes its input
pub struct AutoDecoder {
    inner: Arc<Mutex<AutoDecoderInner>>,
}

impl Decoder for AutoDecoder {
    fn init(&mut self) -> Result<()> {
        Ok(())
    }

    fn configure(&mut self, format: &MediaFormat) -> Result<()> {
        let notifier = {
            let mut inner = self.inner.lock();
            inner.configured.push(format.clone());
            inner.idle = false;
            inner.notifier.clone()
        };
        notifier.output_format_changed(format.clone());
        request_more(&self.inner);
        Ok(())
    }

    fn signal_flush(&mut self, new_format: Option<MediaFormat>) {
        let notifier = {
            let mut inner = self.inner.lock();
            inner.flushes += 1;
            inner.idle = true;
            if let Some(format) = new_format {
                inner.updated_formats.push(format);
            }
            if inner.hold_flush {
                inner.flush_pending = true;
                return;
            }
            inner.notifier.clone()
        };
        notifier.flush_completed();
    }

    fn signal_resume(&mut self) {
        {
            let mut inner = self.inner.lock();
            inner.resumes += 1;
            inner.idle = false;
        }
        request_more(&self.inner);
    }

    fn signal_update_format(&mut self, format: MediaFormat) {
        self.inner.lock().updated_formats.push(format);
    }

    fn initiate_shutdown(&mut self) {
        let notifier = {
            let mut inner = self.inner.lock();
            inner.shutdowns += 1;
            inner.idle = true;
            inner.notifier.clone()
        };
        notifier.shutdown_completed();
    }

    fn input_buffers(&mut self) -> Result<Vec<SharedInputBuffer>> {
        Ok((0..2)
            .map(|_| Arc::new(Mutex::new(vec![0u8; 4096])))
            .collect())
    }

    fn supports_seamless_format_change(&self, _format: &MediaFormat) -> bool {
        self.inner.lock().seamless
    }
}

/// Inspection and control handle onto one created decoder
#[derive(Clone)]
pub struct AutoDecoderHandle {
    pub audio: bool,
    pub passthrough: bool,
    pub surface: Option<Arc<dyn VideoSurface>>,
    pub notifier: DecoderNotifier,
    inner: Arc<Mutex<AutoDecoderInner>>,
}

impl AutoDecoderHandle {
    /// Complete a flush that `hold_flush` kept pending. Subsequent flushes
    /// complete immediately.
    pub fn release_flush(&self) {
        let notifier = {
            let mut inner = self.inner.lock();
            inner.hold_flush = false;
            if !inner.flush_pending {
                return;
            }
            inner.flush_pending = false;
            inner.notifier.clone()
        };
        notifier.flush_completed();
    }

    pub fn flushes(&self) -> u32 {
        self.inner.lock().flushes
    }

    pub fn resumes(&self) -> u32 {
        self.inner.lock().resumes
    }

    pub fn shutdowns(&self) -> u32 {
        self.inner.lock().shutdowns
    }

    pub fn configured_formats(&self) -> Vec<MediaFormat> {
        self.inner.lock().configured.clone()
    }

    pub fn updated_formats(&self) -> Vec<MediaFormat> {
        self.inner.lock().updated_formats.clone()
    }
}

struct FactoryState {
    hold_audio_flush: bool,
    hold_video_flush: bool,
    seamless: bool,
    fail_creation: bool,
    created: Vec<AutoDecoderHandle>,
}

/// Factory for [`AutoDecoder`]s, recording every instance it hands out
#[derive(Clone)]
pub struct AutoDecoderFactory {
    state: Arc<Mutex<FactoryState>>,
}

impl Default for AutoDecoderFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl AutoDecoderFactory {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(FactoryState {
                hold_audio_flush: false,
                hold_video_flush: false,
                seamless: false,
                fail_creation: false,
                created: Vec::new(),
            })),
        }
    }

    /// Hold future flushes of newly created decoders of one stream open
    /// until `release_flush` is called on the handle.
    pub fn hold_flush(&self, audio: bool, hold: bool) {
        let mut state = self.state.lock();
        if audio {
            state.hold_audio_flush = hold;
        } else {
            state.hold_video_flush = hold;
        }
    }

    /// Make created decoders report seamless format-change support.
    pub fn set_seamless(&self, seamless: bool) {
        self.state.lock().seamless = seamless;
    }

    /// Make decoder creation fail.
    pub fn set_fail_creation(&self, fail: bool) {
        self.state.lock().fail_creation = fail;
    }

    pub fn created(&self) -> Vec<AutoDecoderHandle> {
        self.state.lock().created.clone()
    }

    /// Most recently created decoder of one stream.
    pub fn last(&self, audio: bool) -> Option<AutoDecoderHandle> {
        self.state
            .lock()
            .created
            .iter()
            .rev()
            .find(|handle| handle.audio == audio)
            .cloned()
    }

    fn build(
        &self,
        notify: DecoderNotifier,
        passthrough: bool,
        surface: Option<Arc<dyn VideoSurface>>,
    ) -> Result<Box<dyn Decoder>> {
        let mut state = self.state.lock();
        if state.fail_creation {
            return Err(PlayerError::Decoder("scripted creation failure".to_string()));
        }

        let audio = notify.is_audio();
        let hold_flush = if audio {
            state.hold_audio_flush
        } else {
            state.hold_video_flush
        };

        let inner = Arc::new(Mutex::new(AutoDecoderInner {
            notifier: notify.clone(),
            seamless: state.seamless,
            hold_flush,
            flush_pending: false,
            configured: Vec::new(),
            updated_formats: Vec::new(),
            flushes: 0,
            resumes: 0,
            shutdowns: 0,
            idle: true,
        }));

        state.created.push(AutoDecoderHandle {
            audio,
            passthrough,
            surface,
            notifier: notify,
            inner: Arc::clone(&inner),
        });

        Ok(Box::new(AutoDecoder { inner }))
    }
}

impl DecoderFactory for AutoDecoderFactory {
    fn create_audio(&self, notify: DecoderNotifier, passthrough: bool) -> Result<Box<dyn Decoder>> {
        self.build(notify, passthrough, None)
    }

    fn create_video(
        &self,
        notify: DecoderNotifier,
        surface: Arc<dyn VideoSurface>,
    ) -> Result<Box<dyn Decoder>> {
        self.build(notify, false, Some(surface))
    }
}
