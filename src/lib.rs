//! MIDI sequencing and playback core for the midibox player.
//!
//! Files are decoded into one time-ordered timeline (`midi`), replayed by a cancellable
//! dispatch thread (`engine`) that re-addresses each event through the track→channel
//! table (`routing`) and writes it to every open output port (`sinks`). The
//! `session::SessionController` keeps exactly one playback alive at a time, MIDI or MP3.

pub mod audio;
pub mod config;
pub mod engine;
pub mod error;
pub mod library;
pub mod midi;
pub mod routing;
pub mod session;
pub mod sinks;

#[cfg(test)]
mod fixtures;

pub use error::{PlayerError, Result};
pub use session::SessionController;
