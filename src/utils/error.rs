//! Error types for playcore
//!
//! This module defines the error type used throughout the crate. We use
//! thiserror for the definitions; the demo binary wraps everything in
//! anyhow at its boundary.
//!
//! Errors are `Clone` because they travel through notification channels and
//! are reported to the driver on top of being returned to callers.

use thiserror::Error;

/// Main error type for playcore
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlayerError {
    /// The operation cannot make progress right now; retry later.
    #[error("operation would block")]
    WouldBlock,

    /// The stream ran out of data. Terminal for the stream, not a failure.
    #[error("end of stream")]
    EndOfStream,

    /// A client call was rejected in the current state.
    #[error("invalid operation")]
    InvalidOperation,

    /// Protected content without a usable license.
    #[error("no DRM license")]
    DrmNoLicense,

    /// Source-side errors
    #[error("source error: {0}")]
    Source(String),

    /// Decoder errors
    #[error("decoder error: {0}")]
    Decoder(String),

    /// Renderer errors
    #[error("renderer error: {0}")]
    Renderer(String),

    /// Audio sink errors
    #[error("audio sink error: {0}")]
    AudioSink(String),

    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(String),

    /// Generic error carrying a raw sub-code
    #[error("unknown error ({0})")]
    Unknown(i32),
}

impl PlayerError {
    /// Stable numeric sub-code reported alongside generic media errors.
    pub fn code(&self) -> i32 {
        match self {
            PlayerError::WouldBlock => -11,
            PlayerError::EndOfStream => -1011,
            PlayerError::InvalidOperation => -38,
            PlayerError::DrmNoLicense => -1012,
            PlayerError::Source(_) => -1,
            PlayerError::Decoder(_) => -2,
            PlayerError::Renderer(_) => -3,
            PlayerError::AudioSink(_) => -4,
            PlayerError::Config(_) => -5,
            PlayerError::Unknown(code) => *code,
        }
    }

    /// True for the retry-later status, which is not a session failure.
    pub fn is_would_block(&self) -> bool {
        matches!(self, PlayerError::WouldBlock)
    }
}

/// Convenience type alias for Results in playcore
pub type Result<T> = std::result::Result<T, PlayerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PlayerError::Decoder("codec rejected format".to_string());
        assert_eq!(err.to_string(), "decoder error: codec rejected format");

        let err = PlayerError::EndOfStream;
        assert_eq!(err.to_string(), "end of stream");
    }

    #[test]
    fn test_error_codes_are_stable() {
        assert_eq!(PlayerError::EndOfStream.code(), -1011);
        assert_eq!(PlayerError::WouldBlock.code(), -11);
        assert_eq!(PlayerError::Unknown(-77).code(), -77);
    }

    #[test]
    fn test_would_block_predicate() {
        assert!(PlayerError::WouldBlock.is_would_block());
        assert!(!PlayerError::EndOfStream.is_would_block());
    }
}
