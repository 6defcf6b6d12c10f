//! Shared test rig
//!
//! Assembles a player over the scripted sim components and keeps
//! inspection handles onto every collaborator plus the recorded driver
//! callbacks.

use crossbeam::channel::Receiver;
use playcore::media::{AccessUnit, MediaFormat, MIME_AUDIO_AAC, MIME_VIDEO_AVC};
use playcore::sim::{
    AutoDecoderFactory, DriverNote, ImmediateRendererFactory, NullAudioSink, NullCaptionFactory,
    RecordingDriver, ScriptedSourceFactory, SourceScript,
};
use playcore::source::DequeueResult;
use playcore::{Driver, Player, PlayerComponents, PlayerError, PlayerHandle, Settings};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

pub const WAIT: Duration = Duration::from_secs(5);

pub struct Rig {
    pub player: Player,
    pub handle: PlayerHandle,
    pub sources: ScriptedSourceFactory,
    pub decoders: AutoDecoderFactory,
    pub renderers: ImmediateRendererFactory,
    pub captions: NullCaptionFactory,
    pub sink: NullAudioSink,
    pub notes: Receiver<DriverNote>,
    _driver: Arc<RecordingDriver>,
}

impl Rig {
    pub fn new(script: SourceScript, auto_position: bool) -> Self {
        let sources = ScriptedSourceFactory::new(script);
        let decoders = AutoDecoderFactory::new();
        let renderers = ImmediateRendererFactory::new(auto_position);
        let captions = NullCaptionFactory::new();

        let components = PlayerComponents {
            sources: Box::new(sources.clone()),
            decoders: Box::new(decoders.clone()),
            renderers: Box::new(renderers.clone()),
            captions: Box::new(captions.clone()),
        };

        let (driver, notes) = RecordingDriver::new();
        let driver_dyn: Arc<dyn Driver> = driver.clone();
        let driver_weak: Weak<dyn Driver> = Arc::downgrade(&driver_dyn);
        let player = Player::new(components, driver_weak, Settings::default());
        let handle = player.handle();

        Self {
            player,
            handle,
            sources,
            decoders,
            renderers,
            captions,
            sink: NullAudioSink::new(),
            notes,
            _driver: driver,
        }
    }

    /// Block until a driver note matching `pred` arrives, returning it.
    /// Notes seen on the way are discarded.
    pub fn wait_note<F: Fn(&DriverNote) -> bool>(&self, pred: F) -> DriverNote {
        let deadline = Instant::now() + WAIT;
        let mut seen = Vec::new();
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.notes.recv_timeout(remaining) {
                Ok(note) => {
                    if pred(&note) {
                        return note;
                    }
                    seen.push(note);
                }
                Err(_) => panic!("timed out waiting for driver note; saw {seen:?}"),
            }
        }
    }

    /// Assert that no note matching `pred` arrives within `window`.
    pub fn assert_no_note<F: Fn(&DriverNote) -> bool>(&self, window: Duration, pred: F) {
        let deadline = Instant::now() + window;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return;
            }
            if let Ok(note) = self.notes.recv_timeout(remaining) {
                assert!(!pred(&note), "unexpected driver note: {note:?}");
            }
        }
    }

    /// Poll `probe` until it returns `Some`, failing on timeout.
    pub fn wait_for<T, F: Fn() -> Option<T>>(&self, probe: F) -> T {
        let deadline = Instant::now() + WAIT;
        loop {
            if let Some(value) = probe() {
                return value;
            }
            if Instant::now() >= deadline {
                panic!("timed out polling for test condition");
            }
            std::thread::sleep(Duration::from_millis(5));
        }
    }
}

/// Script with both streams: `frames` units each, then end of stream.
pub fn av_script(frames: u32, frame_interval_us: i64) -> SourceScript {
    let mut script = SourceScript {
        duration_us: Some(frame_interval_us * i64::from(frames)),
        audio_format: Some(MediaFormat::audio(MIME_AUDIO_AAC, 44_100, 2)),
        video_format: Some(MediaFormat::video(MIME_VIDEO_AVC, 1280, 720)),
        ..Default::default()
    };
    for i in 0..frames {
        let time_us = frame_interval_us * i64::from(i);
        script.push_units(true, [DequeueResult::Unit(AccessUnit::new(time_us, vec![0; 64]))]);
        script.push_units(
            false,
            [DequeueResult::Unit(AccessUnit::new(time_us, vec![0; 256]))],
        );
    }
    script.push_units(true, [DequeueResult::Error(PlayerError::EndOfStream)]);
    script.push_units(false, [DequeueResult::Error(PlayerError::EndOfStream)]);
    script
}

/// Video-only script with an explicit unit list and no terminator.
pub fn video_script(times_us: &[i64]) -> SourceScript {
    let mut script = SourceScript {
        duration_us: Some(60_000_000),
        video_format: Some(MediaFormat::video(MIME_VIDEO_AVC, 1280, 720)),
        ..Default::default()
    };
    for &time_us in times_us {
        script.push_units(
            false,
            [DequeueResult::Unit(AccessUnit::new(time_us, vec![0; 256]))],
        );
    }
    script
}
