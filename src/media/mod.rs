//! Shared media types for playcore
//!
//! Formats, access units, decoded output buffers, side-band text buffers and
//! track descriptions exchanged between the controller and its
//! collaborators.

use std::mem;

/// MIME type for H.264/AVC video, which drives the late-frame drop policy
pub const MIME_VIDEO_AVC: &str = "video/avc";

/// MIME type for AAC audio in LATM framing
pub const MIME_AUDIO_AAC: &str = "audio/mp4a-latm";

/// MIME type for 3GPP timed text
pub const MIME_TEXT_3GPP: &str = "text/3gpp-tt";

/// Crop rectangle reported in a decoder output format, inclusive bounds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropRect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

/// Stream format description
///
/// One bag of optional fields shared by audio and video streams; producers
/// fill in whatever they know. Field meanings follow the glossary of the
/// elementary-stream metadata the source extracts.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MediaFormat {
    /// MIME type, e.g. "video/avc" or "audio/mp4a-latm"
    pub mime: String,

    /// Coded width in pixels (video)
    pub width: Option<i32>,

    /// Coded height in pixels (video)
    pub height: Option<i32>,

    /// Active picture crop (video output formats)
    pub crop: Option<CropRect>,

    /// Sample aspect ratio as (width, height)
    pub sar: Option<(i32, i32)>,

    /// Display rotation in degrees (0, 90, 180, 270)
    pub rotation_degrees: i32,

    /// Channel count (audio)
    pub channel_count: Option<u32>,

    /// Channel mask (audio); `None` derives the mask from the count
    pub channel_mask: Option<u32>,

    /// Sample rate in Hz (audio)
    pub sample_rate: Option<u32>,

    /// Average bit rate in bits per second
    pub bit_rate: Option<u32>,

    /// AAC profile (audio-object-type) when the MIME alone is ambiguous
    pub aac_profile: Option<i32>,

    /// Content duration in microseconds
    pub duration_us: Option<i64>,

    /// Stream carries protected content; input buffers must come from the
    /// controller so the source can decrypt in place
    pub secure: bool,
}

impl MediaFormat {
    /// Minimal audio format
    pub fn audio(mime: &str, sample_rate: u32, channel_count: u32) -> Self {
        Self {
            mime: mime.to_string(),
            sample_rate: Some(sample_rate),
            channel_count: Some(channel_count),
            ..Default::default()
        }
    }

    /// Minimal video format
    pub fn video(mime: &str, width: i32, height: i32) -> Self {
        Self {
            mime: mime.to_string(),
            width: Some(width),
            height: Some(height),
            ..Default::default()
        }
    }

    pub fn is_avc(&self) -> bool {
        self.mime.eq_ignore_ascii_case(MIME_VIDEO_AVC)
    }
}

/// One elementary-stream frame with timestamp metadata
#[derive(Debug, Clone, PartialEq)]
pub struct AccessUnit {
    /// Compressed payload
    pub data: Vec<u8>,

    /// Media timestamp in microseconds
    pub time_us: i64,

    /// Whether later frames reference this one; non-reference frames may be
    /// dropped when the renderer reports video running late
    pub is_reference_frame: bool,
}

impl AccessUnit {
    pub fn new(time_us: i64, data: Vec<u8>) -> Self {
        Self {
            data,
            time_us,
            is_reference_frame: true,
        }
    }

    pub fn non_reference(time_us: i64, data: Vec<u8>) -> Self {
        Self {
            data,
            time_us,
            is_reference_frame: false,
        }
    }
}

/// One decoded buffer on its way to the renderer
#[derive(Debug, Clone, PartialEq)]
pub struct OutputBuffer {
    /// Decoded payload (opaque to the controller)
    pub data: Vec<u8>,

    /// Media timestamp in microseconds
    pub time_us: i64,
}

/// Side-band text payload (subtitles, timed text)
#[derive(Debug, Clone, PartialEq)]
pub struct TextBuffer {
    /// Track this payload belongs to, in the emitter's own index space
    pub track_index: usize,

    /// Presentation time in microseconds
    pub time_us: i64,

    /// Display duration in microseconds
    pub duration_us: i64,

    /// Payload MIME type
    pub mime: String,

    /// Encoded text payload
    pub data: Vec<u8>,
}

/// Track classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackType {
    Audio,
    Video,
    Subtitle,
    TimedText,
    Metadata,
}

/// One entry of the unified track table
#[derive(Debug, Clone, PartialEq)]
pub struct TrackInfo {
    pub track_type: TrackType,

    /// ISO 639 language tag, or "und"
    pub language: String,

    /// MIME type, reported for subtitle tracks
    pub mime: Option<String>,

    /// Subtitle auto-selection flag
    pub auto_select: bool,

    /// Subtitle default-track flag
    pub is_default: bool,

    /// Subtitle forced-display flag
    pub forced: bool,
}

impl TrackInfo {
    pub fn new(track_type: TrackType, language: &str) -> Self {
        Self {
            track_type,
            language: language.to_string(),
            mime: None,
            auto_select: false,
            is_default: false,
            forced: false,
        }
    }
}

/// Compute the display dimensions for a video stream.
///
/// The output format's crop rectangle wins when present, otherwise the
/// input format's coded size is used. The input's sample aspect ratio
/// scales the width, and a 90/270 degree rotation swaps the axes.
pub fn display_size(input: &MediaFormat, output: Option<&MediaFormat>) -> (i32, i32) {
    let (mut width, mut height) = match output.and_then(|o| o.crop.as_ref()) {
        Some(crop) => (crop.right - crop.left + 1, crop.bottom - crop.top + 1),
        None => (input.width.unwrap_or(0), input.height.unwrap_or(0)),
    };

    if let Some((sar_width, sar_height)) = input.sar {
        if sar_height != 0 {
            width = width * sar_width / sar_height;
        }
    }

    if input.rotation_degrees == 90 || input.rotation_degrees == 270 {
        mem::swap(&mut width, &mut height);
    }

    (width, height)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_size_from_input() {
        let input = MediaFormat::video(MIME_VIDEO_AVC, 1920, 1080);
        assert_eq!(display_size(&input, None), (1920, 1080));
    }

    #[test]
    fn test_display_size_prefers_output_crop() {
        let input = MediaFormat::video(MIME_VIDEO_AVC, 1920, 1088);
        let output = MediaFormat {
            crop: Some(CropRect {
                left: 0,
                top: 0,
                right: 1919,
                bottom: 1079,
            }),
            ..MediaFormat::video(MIME_VIDEO_AVC, 1920, 1088)
        };
        assert_eq!(display_size(&input, Some(&output)), (1920, 1080));
    }

    #[test]
    fn test_display_size_applies_sample_aspect_ratio() {
        let mut input = MediaFormat::video(MIME_VIDEO_AVC, 720, 576);
        input.sar = Some((64, 45));
        assert_eq!(display_size(&input, None), (1024, 576));
    }

    #[test]
    fn test_display_size_rotation_swaps_axes() {
        let mut input = MediaFormat::video(MIME_VIDEO_AVC, 1920, 1080);
        input.rotation_degrees = 90;
        assert_eq!(display_size(&input, None), (1080, 1920));

        input.rotation_degrees = 180;
        assert_eq!(display_size(&input, None), (1920, 1080));
    }

    #[test]
    fn test_avc_detection() {
        assert!(MediaFormat::video("video/avc", 1, 1).is_avc());
        assert!(MediaFormat::video("Video/AVC", 1, 1).is_avc());
        assert!(!MediaFormat::video("video/hevc", 1, 1).is_avc());
    }
}
