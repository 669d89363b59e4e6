//! session.rs
//!
//! The one object the UI talks to. It guarantees that at most one thing is playing:
//! either a MIDI dispatch thread or an external decoder process, never both, and never
//! two dispatch threads.
//!
//! All start/stop paths go through one mutex, and every start begins with a full stop
//! (cancel, join, close outputs, kill decoder). `stop()` only returns once the old
//! dispatch thread has exited, so the next session's outputs are opened strictly after
//! the previous session's were closed.

use std::{
    path::Path,
    sync::{Arc, Mutex, MutexGuard},
};

use log::{debug, info, warn};

use crate::{
    audio::{AudioLauncher, AudioProcess},
    engine::{Playback, PlaybackState},
    error::Result,
    midi::PlaybackTimeline,
    routing::{ChannelMap, ChannelStore, NUM_TRACKS},
    sinks::SinkProvider,
};

#[derive(Default)]
struct Active {
    midi: Option<Playback>,
    audio: Option<Box<dyn AudioProcess>>,
}

pub struct SessionController {
    active: Mutex<Active>,
    channels: Arc<ChannelMap>,
    store: ChannelStore,
    outputs: Box<dyn SinkProvider>,
    decoder: Box<dyn AudioLauncher>,
}

impl SessionController {
    /// Build a controller, loading the channel map from `store`.
    pub fn new(store: ChannelStore, outputs: Box<dyn SinkProvider>, decoder: Box<dyn AudioLauncher>) -> Self {
        let channels = Arc::new(store.load());
        debug!("channel map {:?}", channels.channels());
        Self { active: Mutex::new(Active::default()), channels, store, outputs, decoder }
    }

    /// Stop whatever is playing, then play the MIDI file at `path`.
    ///
    /// A file that cannot be read or parsed returns the error and leaves nothing playing.
    pub fn play_midi(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let mut active = self.lock();
        stop_locked(&mut active);

        let timeline = PlaybackTimeline::load(path)?;
        let sinks = self.outputs.open_all();
        info!("playing {:?} on {} outputs", path, sinks.len());
        active.midi = Some(Playback::start(Arc::new(timeline), self.channels.clone(), sinks));
        Ok(())
    }

    /// Stop whatever is playing, then hand `path` to the external decoder.
    ///
    /// A decoder that fails to start is logged and treated as already stopped.
    pub fn play_audio(&self, path: impl AsRef<Path>) {
        let path = path.as_ref();
        let mut active = self.lock();
        stop_locked(&mut active);

        match self.decoder.launch(path) {
            Ok(proc) => {
                info!("playing {:?} through decoder", path);
                active.audio = Some(proc);
            }
            Err(e) => warn!("{e}"),
        }
    }

    /// Stop MIDI dispatch and the decoder. Idempotent.
    pub fn stop(&self) {
        stop_locked(&mut self.lock());
    }

    /// True while MIDI events are being dispatched.
    pub fn is_active(&self) -> bool {
        self.lock().midi.as_ref().is_some_and(Playback::is_active)
    }

    /// True while the external decoder process is alive.
    pub fn is_audio_playing(&self) -> bool {
        self.lock().audio.as_mut().is_some_and(|p| p.is_running())
    }

    pub fn state(&self) -> PlaybackState {
        self.lock().midi.as_ref().map(Playback::state).unwrap_or(PlaybackState::Idle)
    }

    /// Progress of the current MIDI playback in [0, 1]; 0 when nothing is playing.
    pub fn elapsed_fraction(&self) -> f64 {
        match self.lock().midi.as_ref() {
            Some(p) if p.is_active() => p.elapsed_fraction(),
            _ => 0.0,
        }
    }

    /// Length of the current MIDI file in seconds, 0 when none.
    pub fn duration_secs(&self) -> f64 {
        self.lock().midi.as_ref().map(Playback::duration_secs).unwrap_or(0.0)
    }

    /// Route `track` to `channel mod NUM_OUT` and persist. Returns the stored channel.
    pub fn set_channel(&self, track: usize, channel: i64) -> Option<u8> {
        let ch = self.channels.set(track, channel)?;
        self.persist();
        Some(ch)
    }

    /// Step a track's channel up or down, clamped to the valid range, and persist.
    pub fn nudge_channel(&self, track: usize, step: i64) -> Option<u8> {
        let ch = self.channels.nudge(track, step)?;
        self.persist();
        Some(ch)
    }

    /// Snapshot of the routing table.
    pub fn channel_map(&self) -> ChannelMap {
        (*self.channels).clone()
    }

    pub fn num_tracks(&self) -> usize {
        NUM_TRACKS
    }

    fn persist(&self) {
        // in-memory map stays authoritative if the write fails
        if let Err(e) = self.store.save(&self.channels) {
            warn!("unable to save channel map: {e}");
        }
    }

    fn lock(&self) -> MutexGuard<'_, Active> {
        self.active.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.stop();
    }
}

fn stop_locked(active: &mut Active) {
    // the joined playback stays behind so state() reports Stopped
    if let Some(playback) = active.midi.as_mut() {
        if playback.state() != PlaybackState::Stopped {
            playback.stop();
            debug!("midi playback stopped");
        }
    }
    if let Some(mut proc) = active.audio.take() {
        if let Err(e) = proc.terminate() {
            warn!("{e}");
        }
    }
}
