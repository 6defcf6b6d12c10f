//! playcore: core playback controller of a networked media player
//!
//! A single-threaded, message-driven coordinator binding a pluggable media
//! source, a pair of decoders and a renderer into one playback session.
//! The controller serializes every pipeline mutation on its mailbox,
//! filters stale collaborator callbacks by generation, and defers
//! flush-sensitive work until the pipeline is quiescent.
//!
//! Concrete sources, codecs, rendering and audio output live behind the
//! capability traits in [`source`], [`decoder`], [`renderer`] and
//! [`audio`]; the [`sim`] module provides scripted stand-ins for tests and
//! demos.

pub mod audio;
pub mod caption;
pub mod decoder;
pub mod mailbox;
pub mod media;
pub mod player;
pub mod renderer;
pub mod sim;
pub mod source;
pub mod utils;

pub use player::{
    Driver, ListenerMessage, MediaInfoKind, Player, PlayerComponents, PlayerHandle,
};
pub use utils::config::Settings;
pub use utils::error::{PlayerError, Result};
