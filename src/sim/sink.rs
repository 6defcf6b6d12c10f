//! Scripted audio sink and video surface

use crate::audio::{AudioSink, OffloadInfo, SinkConfig};
use crate::media::MediaFormat;
use crate::renderer::{VideoScalingMode, VideoSurface};
use crate::utils::error::{PlayerError, Result};
use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Default)]
struct SinkState {
    opens: Vec<SinkConfig>,
    starts: u32,
    closes: u32,
    metadata: Vec<MediaFormat>,
    offload_supported: bool,
    fail_offload_open: bool,
}

/// Audio sink that records every call and plays nothing
#[derive(Clone, Default)]
pub struct NullAudioSink {
    state: Arc<Mutex<SinkState>>,
}

impl NullAudioSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report offload support for any stream.
    pub fn set_offload_supported(&self, supported: bool) {
        self.state.lock().offload_supported = supported;
    }

    /// Fail the next offload-mode opens, forcing the PCM fallback.
    pub fn set_fail_offload_open(&self, fail: bool) {
        self.state.lock().fail_offload_open = fail;
    }

    pub fn opens(&self) -> Vec<SinkConfig> {
        self.state.lock().opens.clone()
    }

    pub fn starts(&self) -> u32 {
        self.state.lock().starts
    }

    pub fn closes(&self) -> u32 {
        self.state.lock().closes
    }

    pub fn metadata(&self) -> Vec<MediaFormat> {
        self.state.lock().metadata.clone()
    }
}

impl AudioSink for NullAudioSink {
    fn open(&self, config: &SinkConfig) -> Result<()> {
        let mut state = self.state.lock();
        if config.offload.is_some() && state.fail_offload_open {
            return Err(PlayerError::AudioSink(
                "scripted offload open failure".to_string(),
            ));
        }
        state.opens.push(config.clone());
        Ok(())
    }

    fn start(&self) -> Result<()> {
        self.state.lock().starts += 1;
        Ok(())
    }

    fn close(&self) {
        self.state.lock().closes += 1;
    }

    fn supports_offload(&self, _info: &OffloadInfo) -> bool {
        self.state.lock().offload_supported
    }

    fn send_metadata(&self, format: &MediaFormat) {
        self.state.lock().metadata.push(format.clone());
    }
}

/// Video surface that records scaling-mode changes
#[derive(Default)]
pub struct NullSurface {
    modes: Mutex<Vec<VideoScalingMode>>,
}

impl NullSurface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scaling_modes(&self) -> Vec<VideoScalingMode> {
        self.modes.lock().clone()
    }
}

impl VideoSurface for NullSurface {
    fn set_scaling_mode(&self, mode: VideoScalingMode) -> Result<()> {
        self.modes.lock().push(mode);
        Ok(())
    }
}
