//! Scripted renderer
//!
//! Consumes queued buffers immediately, returning each one to its decoder
//! through the reply callback, and records everything it was told. With
//! `auto_position` enabled it reports each queued buffer's timestamp as the
//! playback position, which is enough of a clock for the demo binary.

use crate::audio::AudioSink;
use crate::decoder::DrainReplyFn;
use crate::media::OutputBuffer;
use crate::player::RendererNotifier;
use crate::renderer::{Renderer, RendererFactory, RendererFlags};
use crate::utils::error::PlayerError;
use parking_lot::Mutex;
use std::sync::Arc;

/// Everything a scripted renderer was told, for inspection
#[derive(Default)]
pub struct RendererState {
    pub queued_audio: Vec<i64>,
    pub queued_video: Vec<i64>,
    pub eos: Vec<(bool, PlayerError)>,
    pub flushes: Vec<bool>,
    pub pauses: u32,
    pub resumes: u32,
    pub time_discontinuities: u32,
    pub sink_changes: u32,
    pub offload_disables: u32,
    pub flags: RendererFlags,
    pub has_sink: bool,
}

/// Inspection handle onto one created renderer
#[derive(Clone)]
pub struct RendererHandle {
    pub notifier: RendererNotifier,
    state: Arc<Mutex<RendererState>>,
}

impl RendererHandle {
    pub fn queued_times(&self, audio: bool) -> Vec<i64> {
        let state = self.state.lock();
        if audio {
            state.queued_audio.clone()
        } else {
            state.queued_video.clone()
        }
    }

    pub fn eos(&self) -> Vec<(bool, PlayerError)> {
        self.state.lock().eos.clone()
    }

    pub fn flushes(&self) -> Vec<bool> {
        self.state.lock().flushes.clone()
    }

    pub fn time_discontinuities(&self) -> u32 {
        self.state.lock().time_discontinuities
    }

    pub fn sink_changes(&self) -> u32 {
        self.state.lock().sink_changes
    }

    pub fn offload_disables(&self) -> u32 {
        self.state.lock().offload_disables
    }

    pub fn flags(&self) -> RendererFlags {
        self.state.lock().flags
    }
}

struct ImmediateRenderer {
    state: Arc<Mutex<RendererState>>,
    notifier: RendererNotifier,
    auto_position: bool,
}

impl Renderer for ImmediateRenderer {
    fn queue_buffer(&mut self, audio: bool, buffer: OutputBuffer, reply: DrainReplyFn) {
        let time_us = buffer.time_us;
        {
            let mut state = self.state.lock();
            if audio {
                state.queued_audio.push(time_us);
            } else {
                state.queued_video.push(time_us);
            }
        }
        reply();
        if self.auto_position {
            self.notifier.position(time_us, 0);
        }
    }

    fn queue_eos(&mut self, audio: bool, error: PlayerError) {
        self.state.lock().eos.push((audio, error.clone()));
        self.notifier.eos(audio, error);
    }

    fn flush(&mut self, audio: bool) {
        self.state.lock().flushes.push(audio);
        self.notifier.flush_complete(audio);
    }

    fn pause(&mut self) {
        self.state.lock().pauses += 1;
    }

    fn resume(&mut self) {
        self.state.lock().resumes += 1;
    }

    fn signal_time_discontinuity(&mut self) {
        self.state.lock().time_discontinuities += 1;
    }

    fn signal_audio_sink_changed(&mut self) {
        self.state.lock().sink_changes += 1;
    }

    fn signal_disable_offload_audio(&mut self) {
        self.state.lock().offload_disables += 1;
    }
}

/// Factory for scripted renderers, recording every instance
#[derive(Clone)]
pub struct ImmediateRendererFactory {
    created: Arc<Mutex<Vec<RendererHandle>>>,
    auto_position: bool,
}

impl ImmediateRendererFactory {
    pub fn new(auto_position: bool) -> Self {
        Self {
            created: Arc::new(Mutex::new(Vec::new())),
            auto_position,
        }
    }

    pub fn created(&self) -> Vec<RendererHandle> {
        self.created.lock().clone()
    }

    pub fn last(&self) -> Option<RendererHandle> {
        self.created.lock().last().cloned()
    }
}

impl RendererFactory for ImmediateRendererFactory {
    fn create(
        &self,
        sink: Option<Arc<dyn AudioSink>>,
        notify: RendererNotifier,
        flags: RendererFlags,
    ) -> Box<dyn Renderer> {
        let state = Arc::new(Mutex::new(RendererState {
            flags,
            has_sink: sink.is_some(),
            ..Default::default()
        }));

        self.created.lock().push(RendererHandle {
            notifier: notify.clone(),
            state: Arc::clone(&state),
        });

        Box::new(ImmediateRenderer {
            state,
            notifier: notify,
            auto_position: self.auto_position,
        })
    }
}
