//! Scripted caption decoder

use crate::caption::{CaptionDecoder, CaptionDecoderFactory};
use crate::media::{AccessUnit, TrackInfo};
use crate::player::CaptionNotifier;
use crate::utils::error::{PlayerError, Result};
use parking_lot::Mutex;
use std::sync::Arc;

/// Shared state behind every caption decoder the factory creates
#[derive(Default)]
pub struct ScriptedCaptionState {
    pub tracks: Vec<TrackInfo>,
    pub selected: Option<usize>,
    pub decoded_units: u32,
    pub displayed: Vec<i64>,
    pub notifier: Option<CaptionNotifier>,
}

struct NullCaptionDecoder {
    state: Arc<Mutex<ScriptedCaptionState>>,
}

impl CaptionDecoder for NullCaptionDecoder {
    fn track_count(&self) -> usize {
        self.state.lock().tracks.len()
    }

    fn track_info(&self, index: usize) -> Option<TrackInfo> {
        self.state.lock().tracks.get(index).cloned()
    }

    fn select_track(&mut self, index: usize, select: bool) -> Result<()> {
        let mut state = self.state.lock();
        if index >= state.tracks.len() {
            return Err(PlayerError::InvalidOperation);
        }
        state.selected = if select { Some(index) } else { None };
        Ok(())
    }

    fn is_selected(&self) -> bool {
        self.state.lock().selected.is_some()
    }

    fn decode(&mut self, _unit: &AccessUnit) {
        self.state.lock().decoded_units += 1;
    }

    fn display(&mut self, time_us: i64) {
        self.state.lock().displayed.push(time_us);
    }
}

/// Factory for scripted caption decoders over one shared state
#[derive(Clone)]
pub struct NullCaptionFactory {
    state: Arc<Mutex<ScriptedCaptionState>>,
}

impl Default for NullCaptionFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl NullCaptionFactory {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(ScriptedCaptionState::default())),
        }
    }

    pub fn state(&self) -> Arc<Mutex<ScriptedCaptionState>> {
        Arc::clone(&self.state)
    }
}

impl CaptionDecoderFactory for NullCaptionFactory {
    fn create(&self, notify: CaptionNotifier) -> Box<dyn CaptionDecoder> {
        self.state.lock().notifier = Some(notify);
        Box::new(NullCaptionDecoder {
            state: Arc::clone(&self.state),
        })
    }
}
