//! Scripted source
//!
//! Serves formats and access units from a shared [`SourceScript`] and
//! records every lifecycle call, so tests preload streams and inspect what
//! the controller did with them.

use crate::decoder::SharedInputBuffer;
use crate::media::{MediaFormat, TrackInfo, TrackType};
use crate::player::SourceNotifier;
use crate::source::{DequeueResult, Source, SourceFactory, SourceFlags, SourceKind};
use crate::utils::error::Result;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

/// Shared script and call record of a [`ScriptedSource`]
pub struct SourceScript {
    // script
    pub prepare_result: Result<()>,
    pub duration_us: Option<i64>,
    pub flags: SourceFlags,
    pub real_time: bool,
    pub audio_format: Option<MediaFormat>,
    pub video_format: Option<MediaFormat>,
    pub audio_units: VecDeque<DequeueResult>,
    pub video_units: VecDeque<DequeueResult>,
    pub feed_result: Result<()>,
    pub tracks: Vec<TrackInfo>,

    // recorded calls
    pub starts: u32,
    pub pauses: u32,
    pub resumes: u32,
    pub stops: u32,
    pub seeks: Vec<i64>,
    pub selections: Vec<(usize, bool)>,
    pub selected: Vec<usize>,
    pub secure_buffer_sets: Vec<(bool, usize)>,
}

impl Default for SourceScript {
    fn default() -> Self {
        Self {
            prepare_result: Ok(()),
            duration_us: None,
            flags: SourceFlags::empty(),
            real_time: false,
            audio_format: None,
            video_format: None,
            audio_units: VecDeque::new(),
            video_units: VecDeque::new(),
            feed_result: Ok(()),
            tracks: Vec::new(),
            starts: 0,
            pauses: 0,
            resumes: 0,
            stops: 0,
            seeks: Vec::new(),
            selections: Vec::new(),
            selected: Vec::new(),
            secure_buffer_sets: Vec::new(),
        }
    }
}

impl SourceScript {
    /// Push access units for one stream.
    pub fn push_units(&mut self, audio: bool, units: impl IntoIterator<Item = DequeueResult>) {
        let queue = if audio {
            &mut self.audio_units
        } else {
            &mut self.video_units
        };
        queue.extend(units);
    }
}

/// Source implementation backed by a [`SourceScript`]
pub struct ScriptedSource {
    script: Arc<Mutex<SourceScript>>,
    notify: SourceNotifier,
}

impl Source for ScriptedSource {
    fn prepare_async(&mut self) {
        let result = self.script.lock().prepare_result.clone();
        self.notify.prepared(result);
    }

    fn start(&mut self) {
        self.script.lock().starts += 1;
    }

    fn pause(&mut self) {
        self.script.lock().pauses += 1;
    }

    fn resume(&mut self) {
        self.script.lock().resumes += 1;
    }

    fn stop(&mut self) {
        self.script.lock().stops += 1;
    }

    fn seek_to(&mut self, time_us: i64) -> Result<()> {
        self.script.lock().seeks.push(time_us);
        Ok(())
    }

    fn is_real_time(&self) -> bool {
        self.script.lock().real_time
    }

    fn duration_us(&self) -> Option<i64> {
        self.script.lock().duration_us
    }

    fn format(&self, audio: bool) -> Option<MediaFormat> {
        let script = self.script.lock();
        if audio {
            script.audio_format.clone()
        } else {
            script.video_format.clone()
        }
    }

    fn track_count(&self) -> usize {
        self.script.lock().tracks.len()
    }

    fn track_info(&self, index: usize) -> Option<TrackInfo> {
        self.script.lock().tracks.get(index).cloned()
    }

    fn selected_track(&self, track_type: TrackType) -> Option<usize> {
        let script = self.script.lock();
        script
            .selected
            .iter()
            .copied()
            .find(|&index| {
                script
                    .tracks
                    .get(index)
                    .map_or(false, |info| info.track_type == track_type)
            })
    }

    fn select_track(&mut self, index: usize, select: bool) -> Result<()> {
        let mut script = self.script.lock();
        script.selections.push((index, select));
        if select {
            if !script.selected.contains(&index) {
                script.selected.push(index);
            }
        } else {
            script.selected.retain(|&i| i != index);
        }
        Ok(())
    }

    fn dequeue_access_unit(&mut self, audio: bool) -> DequeueResult {
        let mut script = self.script.lock();
        let queue = if audio {
            &mut script.audio_units
        } else {
            &mut script.video_units
        };
        queue.pop_front().unwrap_or(DequeueResult::WouldBlock)
    }

    fn feed_more_data(&mut self) -> Result<()> {
        self.script.lock().feed_result.clone()
    }

    fn set_buffers(&mut self, audio: bool, buffers: Vec<SharedInputBuffer>) -> Result<()> {
        self.script
            .lock()
            .secure_buffer_sets
            .push((audio, buffers.len()));
        Ok(())
    }
}

/// Factory handing out sources over one shared script
#[derive(Clone)]
pub struct ScriptedSourceFactory {
    script: Arc<Mutex<SourceScript>>,
    notifier: Arc<Mutex<Option<SourceNotifier>>>,
}

impl ScriptedSourceFactory {
    pub fn new(script: SourceScript) -> Self {
        Self {
            script: Arc::new(Mutex::new(script)),
            notifier: Arc::new(Mutex::new(None)),
        }
    }

    /// Shared script handle for preloading and inspection.
    pub fn script(&self) -> Arc<Mutex<SourceScript>> {
        Arc::clone(&self.script)
    }

    /// The notifier of the last source handed out, for posting source
    /// events from a test.
    pub fn notifier(&self) -> Option<SourceNotifier> {
        self.notifier.lock().clone()
    }

    fn build(&self, notify: SourceNotifier) -> Box<dyn Source> {
        *self.notifier.lock() = Some(notify.clone());
        Box::new(ScriptedSource {
            script: Arc::clone(&self.script),
            notify,
        })
    }
}

impl SourceFactory for ScriptedSourceFactory {
    fn create_url(
        &self,
        _kind: SourceKind,
        _url: &str,
        _headers: &[(String, String)],
        notify: SourceNotifier,
    ) -> Result<Box<dyn Source>> {
        Ok(self.build(notify))
    }

    fn create_fd(
        &self,
        _fd: i32,
        _offset: i64,
        _length: i64,
        notify: SourceNotifier,
    ) -> Result<Box<dyn Source>> {
        Ok(self.build(notify))
    }
}
