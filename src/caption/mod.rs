//! Closed-caption decoder capability for playcore
//!
//! Caption decoding itself lives outside this crate; the controller only
//! feeds video access units through the caption decoder, asks it to display
//! at render time, and merges its tracks behind the source's in-band tracks
//! in the unified track table.

use crate::media::{AccessUnit, TextBuffer, TrackInfo};
use crate::player::CaptionNotifier;
use crate::utils::error::Result;

/// Closed-caption decoder capability
pub trait CaptionDecoder: Send {
    fn track_count(&self) -> usize;

    fn track_info(&self, index: usize) -> Option<TrackInfo>;

    fn select_track(&mut self, index: usize, select: bool) -> Result<()>;

    fn is_selected(&self) -> bool;

    /// Scan one video access unit for caption payloads.
    fn decode(&mut self, unit: &AccessUnit);

    /// Release caption payloads due at `time_us`.
    fn display(&mut self, time_us: i64);
}

/// Creates caption decoders for the controller
pub trait CaptionDecoderFactory: Send {
    fn create(&self, notify: CaptionNotifier) -> Box<dyn CaptionDecoder>;
}

/// Notifications a caption decoder posts to the controller
#[derive(Debug, Clone)]
pub(crate) enum CaptionEvent {
    /// A caption payload is ready for egress; `buffer.track_index` is in
    /// the caption decoder's own index space
    Data { buffer: TextBuffer },

    /// A new caption track appeared in the stream
    TrackAdded,
}
