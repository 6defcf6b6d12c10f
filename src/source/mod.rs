//! Media source capability for playcore
//!
//! A source demuxes some transport (file, stream, live playlist, RTSP) into
//! per-stream access units and drives its own I/O; the controller only ever
//! talks to this trait. Concrete sources are supplied through a
//! [`SourceFactory`], selected by URL classification.

use crate::decoder::SharedInputBuffer;
use crate::media::{AccessUnit, MediaFormat, TrackInfo, TrackType};
use crate::player::SourceNotifier;
use crate::utils::error::{PlayerError, Result};
use std::ops::{BitOr, BitOrAssign};

/// Capability flags a source reports via `FlagsChanged`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SourceFlags(u32);

impl SourceFlags {
    /// Content is protected; decoder input buffers are controller-owned
    pub const SECURE: SourceFlags = SourceFlags(1 << 0);

    /// Duration may keep changing (live recording), poll it periodically
    pub const DYNAMIC_DURATION: SourceFlags = SourceFlags(1 << 1);

    /// Real-time source; the renderer must not buffer ahead
    pub const REAL_TIME: SourceFlags = SourceFlags(1 << 2);

    pub const CAN_PAUSE: SourceFlags = SourceFlags(1 << 3);
    pub const CAN_SEEK: SourceFlags = SourceFlags(1 << 4);

    pub fn empty() -> Self {
        SourceFlags(0)
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn from_bits(bits: u32) -> Self {
        SourceFlags(bits)
    }

    pub fn contains(self, other: SourceFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for SourceFlags {
    type Output = SourceFlags;

    fn bitor(self, rhs: SourceFlags) -> SourceFlags {
        SourceFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for SourceFlags {
    fn bitor_assign(&mut self, rhs: SourceFlags) {
        self.0 |= rhs.0;
    }
}

/// A stream boundary event, possibly with a resume hint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Discontinuity {
    /// The audio format changes at this point
    pub audio_format: bool,

    /// The video format changes at this point
    pub video_format: bool,

    /// Timestamps jump at this point
    pub time: bool,

    /// Discard decoded samples below this media time after the jump
    pub resume_at_us: Option<i64>,
}

impl Discontinuity {
    pub fn time_jump(resume_at_us: Option<i64>) -> Self {
        Self {
            time: true,
            resume_at_us,
            ..Default::default()
        }
    }

    pub fn format_change(audio: bool) -> Self {
        Self {
            audio_format: audio,
            video_format: !audio,
            ..Default::default()
        }
    }
}

/// Outcome of dequeuing one access unit from a stream
#[derive(Debug, Clone)]
pub enum DequeueResult {
    /// One access unit
    Unit(AccessUnit),

    /// Nothing buffered right now; retry after nudging the source
    WouldBlock,

    /// Stream boundary; the unit stream resumes after the controller
    /// reconfigures the pipeline
    Discontinuity(Discontinuity),

    /// Terminal status, including `EndOfStream`
    Error(PlayerError),
}

/// Media source capability
///
/// All methods are invoked from the controller's execution context. Sources
/// report progress through the [`SourceNotifier`] they were created with.
pub trait Source: Send {
    /// Start asynchronous preparation; completion arrives as a `Prepared`
    /// notification.
    fn prepare_async(&mut self);

    fn start(&mut self);

    fn pause(&mut self);

    fn resume(&mut self);

    fn stop(&mut self);

    fn seek_to(&mut self, time_us: i64) -> Result<()>;

    fn is_real_time(&self) -> bool;

    /// Total duration, if known yet
    fn duration_us(&self) -> Option<i64>;

    /// Current format of the audio (`audio = true`) or video stream, or
    /// `None` while the source has not seen enough data to know it
    fn format(&self, audio: bool) -> Option<MediaFormat>;

    fn track_count(&self) -> usize;

    fn track_info(&self, index: usize) -> Option<TrackInfo>;

    fn selected_track(&self, track_type: TrackType) -> Option<usize>;

    fn select_track(&mut self, index: usize, select: bool) -> Result<()>;

    /// Dequeue one access unit for the given stream.
    fn dequeue_access_unit(&mut self, audio: bool) -> DequeueResult;

    /// Give the source a chance to pull more transport data.
    ///
    /// `Err(EndOfStream)` means the transport is exhausted; any other error
    /// is fatal for the session when no decoder is active.
    fn feed_more_data(&mut self) -> Result<()>;

    /// Hand controller-owned input buffers to a secure source so it can
    /// decrypt into them in place.
    fn set_buffers(&mut self, audio: bool, buffers: Vec<SharedInputBuffer>) -> Result<()>;
}

/// Source variant selected from the data-source URL
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// HTTP live playlist
    HttpLive,

    /// RTSP session, including SDP descriptions fetched over HTTP
    Rtsp,

    /// Everything else (progressive file or stream)
    Generic,
}

impl SourceKind {
    /// Classify a URL the way the playback stack expects:
    /// `.m3u8` (or any `m3u8` substring) under http/https/file is a live
    /// playlist, `rtsp://` or an `.sdp` under http is RTSP, everything else
    /// is generic.
    pub fn classify(url: &str) -> SourceKind {
        let lower = url.to_ascii_lowercase();

        let is_http = lower.starts_with("http://") || lower.starts_with("https://");

        if is_http || lower.starts_with("file://") {
            if lower.ends_with(".m3u8") || lower.contains("m3u8") {
                return SourceKind::HttpLive;
            }
        }

        if lower.starts_with("rtsp://") {
            return SourceKind::Rtsp;
        }

        if is_http && (lower.ends_with(".sdp") || lower.contains(".sdp?")) {
            return SourceKind::Rtsp;
        }

        SourceKind::Generic
    }
}

/// Creates sources for the controller
pub trait SourceFactory: Send {
    /// Create a source for a URL of the given classification.
    fn create_url(
        &self,
        kind: SourceKind,
        url: &str,
        headers: &[(String, String)],
        notify: SourceNotifier,
    ) -> Result<Box<dyn Source>>;

    /// Create a source reading `length` bytes at `offset` of an open file
    /// descriptor.
    fn create_fd(
        &self,
        fd: i32,
        offset: i64,
        length: i64,
        notify: SourceNotifier,
    ) -> Result<Box<dyn Source>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_http_live() {
        assert_eq!(
            SourceKind::classify("http://host/stream.m3u8"),
            SourceKind::HttpLive
        );
        assert_eq!(
            SourceKind::classify("https://host/live/m3u8/master"),
            SourceKind::HttpLive
        );
        assert_eq!(
            SourceKind::classify("file:///sdcard/event.m3u8"),
            SourceKind::HttpLive
        );
    }

    #[test]
    fn test_classify_rtsp() {
        assert_eq!(
            SourceKind::classify("rtsp://host/session"),
            SourceKind::Rtsp
        );
        assert_eq!(
            SourceKind::classify("http://host/describe.sdp"),
            SourceKind::Rtsp
        );
        assert_eq!(
            SourceKind::classify("https://host/describe.sdp?token=1"),
            SourceKind::Rtsp
        );
    }

    #[test]
    fn test_classify_generic() {
        assert_eq!(
            SourceKind::classify("http://host/movie.mp4"),
            SourceKind::Generic
        );
        assert_eq!(
            SourceKind::classify("file:///sdcard/movie.mkv"),
            SourceKind::Generic
        );
    }

    #[test]
    fn test_source_flags() {
        let mut flags = SourceFlags::empty();
        assert!(!flags.contains(SourceFlags::SECURE));

        flags |= SourceFlags::SECURE | SourceFlags::CAN_SEEK;
        assert!(flags.contains(SourceFlags::SECURE));
        assert!(flags.contains(SourceFlags::CAN_SEEK));
        assert!(!flags.contains(SourceFlags::DYNAMIC_DURATION));

        assert_eq!(SourceFlags::from_bits(flags.bits()), flags);
    }
}
