//! Audio sink capability for playcore
//!
//! The sink is injected by the client and owned by the controller; the
//! renderer plays through it but never opens or closes it. This module
//! holds the sink trait, the open parameters, and the offload bookkeeping:
//! mapping a stream MIME to a sink encoding, refining AAC by profile, and
//! the `OffloadInfo` record whose equality gates redundant sink reopens.

use crate::media::MediaFormat;
use crate::utils::error::Result;

/// AAC audio-object-type: low complexity
pub const AAC_PROFILE_LC: i32 = 2;

/// AAC audio-object-type: high efficiency (SBR)
pub const AAC_PROFILE_HE: i32 = 5;

/// AAC audio-object-type: high efficiency v2 (SBR + PS)
pub const AAC_PROFILE_HE_V2: i32 = 29;

/// Encodings a sink can be opened with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioEncoding {
    /// 16-bit PCM; the non-offload path always uses this
    Pcm16,

    /// AAC with unknown profile
    Aac,

    AacLc,
    AacHeV1,
    AacHeV2,
    Mp3,
    Vorbis,
    Opus,
    Flac,
}

/// Sink stream class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AudioStreamType {
    #[default]
    Music,
}

/// Map a compressed stream MIME to a sink encoding.
///
/// `None` means the stream cannot go through the offload path.
pub fn encoding_for_mime(mime: &str) -> Option<AudioEncoding> {
    match mime.to_ascii_lowercase().as_str() {
        "audio/mp4a-latm" | "audio/aac" => Some(AudioEncoding::Aac),
        "audio/mpeg" => Some(AudioEncoding::Mp3),
        "audio/vorbis" => Some(AudioEncoding::Vorbis),
        "audio/opus" => Some(AudioEncoding::Opus),
        "audio/flac" => Some(AudioEncoding::Flac),
        _ => None,
    }
}

/// Refine a generic AAC encoding by the stream's audio-object-type.
pub fn refine_aac_encoding(profile: i32) -> AudioEncoding {
    match profile {
        AAC_PROFILE_LC => AudioEncoding::AacLc,
        AAC_PROFILE_HE => AudioEncoding::AacHeV1,
        AAC_PROFILE_HE_V2 => AudioEncoding::AacHeV2,
        _ => AudioEncoding::Aac,
    }
}

/// Everything the hardware needs to know to take a compressed stream
///
/// Compared by value: opening the sink with an `OffloadInfo` identical to
/// the one already applied is a no-op.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OffloadInfo {
    pub sample_rate: u32,
    pub channel_mask: Option<u32>,
    pub encoding: AudioEncoding,
    pub stream_type: AudioStreamType,
    pub bit_rate: Option<u32>,
    pub duration_us: Option<i64>,
    pub has_video: bool,
    pub is_streaming: bool,
}

/// Build the offload record for a stream format, or `None` when the format
/// is incomplete or not offloadable.
pub fn offload_info_for(
    format: &MediaFormat,
    has_video: bool,
    is_streaming: bool,
) -> Option<OffloadInfo> {
    let mut encoding = encoding_for_mime(&format.mime)?;
    if encoding == AudioEncoding::Aac {
        if let Some(profile) = format.aac_profile {
            encoding = refine_aac_encoding(profile);
        }
    }

    Some(OffloadInfo {
        sample_rate: format.sample_rate?,
        channel_mask: format.channel_mask,
        encoding,
        stream_type: AudioStreamType::Music,
        bit_rate: format.bit_rate,
        duration_us: format.duration_us,
        has_video,
        is_streaming,
    })
}

/// Parameters for opening the sink
#[derive(Debug, Clone, PartialEq)]
pub struct SinkConfig {
    pub sample_rate: u32,

    pub channel_count: u32,

    /// `None` asks the sink to derive the mask from the channel count
    pub channel_mask: Option<u32>,

    pub encoding: AudioEncoding,

    /// Requested buffer depth
    pub buffer_count: u32,

    /// Large-buffer low-power mode for long video-less content
    pub deep_buffer: bool,

    /// Present when opening the compressed passthrough path
    pub offload: Option<OffloadInfo>,
}

/// Audio sink capability
///
/// Shared between the controller (which opens and closes it) and the
/// renderer (which writes into it), hence `&self` methods with interior
/// mutability on the implementor's side.
pub trait AudioSink: Send + Sync {
    fn open(&self, config: &SinkConfig) -> Result<()>;

    fn start(&self) -> Result<()>;

    fn close(&self);

    /// Whether the hardware would accept this stream on the offload path.
    fn supports_offload(&self, info: &OffloadInfo) -> bool;

    /// Pass codec metadata down for an offloaded stream.
    fn send_metadata(&self, format: &MediaFormat);

    fn stream_type(&self) -> AudioStreamType {
        AudioStreamType::Music
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::MIME_AUDIO_AAC;

    #[test]
    fn test_encoding_for_mime() {
        assert_eq!(encoding_for_mime(MIME_AUDIO_AAC), Some(AudioEncoding::Aac));
        assert_eq!(encoding_for_mime("audio/mpeg"), Some(AudioEncoding::Mp3));
        assert_eq!(encoding_for_mime("AUDIO/FLAC"), Some(AudioEncoding::Flac));
        assert_eq!(encoding_for_mime("audio/raw"), None);
        assert_eq!(encoding_for_mime("video/avc"), None);
    }

    #[test]
    fn test_refine_aac_encoding() {
        assert_eq!(refine_aac_encoding(AAC_PROFILE_LC), AudioEncoding::AacLc);
        assert_eq!(refine_aac_encoding(AAC_PROFILE_HE), AudioEncoding::AacHeV1);
        assert_eq!(
            refine_aac_encoding(AAC_PROFILE_HE_V2),
            AudioEncoding::AacHeV2
        );
        assert_eq!(refine_aac_encoding(0), AudioEncoding::Aac);
    }

    #[test]
    fn test_offload_info_for() {
        let mut format = MediaFormat::audio(MIME_AUDIO_AAC, 44_100, 2);
        format.aac_profile = Some(AAC_PROFILE_HE);
        format.bit_rate = Some(128_000);

        let info = offload_info_for(&format, false, true).unwrap();
        assert_eq!(info.encoding, AudioEncoding::AacHeV1);
        assert_eq!(info.sample_rate, 44_100);
        assert!(!info.has_video);
        assert!(info.is_streaming);

        // identical formats produce identical records
        let again = offload_info_for(&format, false, true).unwrap();
        assert_eq!(info, again);

        // PCM-only mimes are not offloadable
        let pcm = MediaFormat::audio("audio/raw", 48_000, 2);
        assert!(offload_info_for(&pcm, false, true).is_none());

        // missing sample rate disqualifies the stream
        let mut incomplete = MediaFormat::audio(MIME_AUDIO_AAC, 44_100, 2);
        incomplete.sample_rate = None;
        assert!(offload_info_for(&incomplete, false, true).is_none());
    }
}
