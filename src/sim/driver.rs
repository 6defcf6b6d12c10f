//! Recording driver
//!
//! Captures every controller callback in order onto a channel, which is how
//! the integration tests and the demo binary observe a session.

use crate::player::{Driver, ListenerMessage};
use crate::source::SourceFlags;
use crate::utils::error::Result;
use crossbeam::channel::{unbounded, Receiver, Sender};
use std::sync::Arc;

/// One observed driver callback
#[derive(Debug, Clone, PartialEq)]
pub enum DriverNote {
    SetDataSourceCompleted(Result<()>),
    PrepareCompleted(Result<()>),
    Duration(i64),
    Position(i64),
    FrameStats(u64, u64),
    SeekComplete,
    SetSurfaceComplete,
    ResetComplete,
    FlagsChanged(SourceFlags),
    Listener(ListenerMessage),
}

/// Driver implementation that records callbacks onto a channel
pub struct RecordingDriver {
    tx: Sender<DriverNote>,
}

impl RecordingDriver {
    pub fn new() -> (Arc<RecordingDriver>, Receiver<DriverNote>) {
        let (tx, rx) = unbounded();
        (Arc::new(RecordingDriver { tx }), rx)
    }

    fn note(&self, note: DriverNote) {
        let _ = self.tx.send(note);
    }
}

impl Driver for RecordingDriver {
    fn notify_set_data_source_completed(&self, result: Result<()>) {
        self.note(DriverNote::SetDataSourceCompleted(result));
    }

    fn notify_prepare_completed(&self, result: Result<()>) {
        self.note(DriverNote::PrepareCompleted(result));
    }

    fn notify_duration(&self, duration_us: i64) {
        self.note(DriverNote::Duration(duration_us));
    }

    fn notify_position(&self, position_us: i64) {
        self.note(DriverNote::Position(position_us));
    }

    fn notify_frame_stats(&self, total: u64, dropped: u64) {
        self.note(DriverNote::FrameStats(total, dropped));
    }

    fn notify_seek_complete(&self) {
        self.note(DriverNote::SeekComplete);
    }

    fn notify_set_surface_complete(&self) {
        self.note(DriverNote::SetSurfaceComplete);
    }

    fn notify_reset_complete(&self) {
        self.note(DriverNote::ResetComplete);
    }

    fn notify_flags_changed(&self, flags: SourceFlags) {
        self.note(DriverNote::FlagsChanged(flags));
    }

    fn notify_listener(&self, message: ListenerMessage) {
        self.note(DriverNote::Listener(message));
    }
}
