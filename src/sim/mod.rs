//! Scripted in-memory collaborators
//!
//! Stand-ins for the real source, decoders, renderer, sink and surface,
//! driven entirely by scripts and controller calls (no codecs, no I/O).
//! The demo binary plays a synthetic session through them, and the
//! integration tests use their recorded state to observe the controller
//! from the outside.

mod caption;
mod decoder;
mod driver;
mod renderer;
mod sink;
mod source;

pub use caption::{NullCaptionFactory, ScriptedCaptionState};
pub use decoder::{AutoDecoderFactory, AutoDecoderHandle};
pub use driver::{DriverNote, RecordingDriver};
pub use renderer::{ImmediateRendererFactory, RendererHandle, RendererState};
pub use sink::{NullAudioSink, NullSurface};
pub use source::{ScriptedSource, ScriptedSourceFactory, SourceScript};
