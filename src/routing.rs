//! Track → output channel routing.
//!
//! The table is shared between the dispatch thread (reads on every event) and the
//! setup editor (writes one entry at a time). Each entry is its own atomic, so a
//! reader sees either the old or the new channel for a track, never a torn table.

use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    sync::atomic::{AtomicU8, Ordering},
};

use log::{debug, warn};

use crate::error::{PlayerError, Result};

/// Number of tracks the setup table covers.
pub const NUM_TRACKS: usize = 16;
/// Number of output channels.
pub const NUM_OUT: usize = 16;

/// Map a track index to an output channel.
///
/// Tracks outside the table route to `track mod NUM_OUT`. Stored values are wrapped too.
pub fn route(track: i64, map: &ChannelMap) -> u8 {
    let stored = usize::try_from(track).ok().and_then(|t| map.get(t));
    match stored {
        Some(ch) => (ch as usize % NUM_OUT) as u8,
        None => track.rem_euclid(NUM_OUT as i64) as u8,
    }
}

pub struct ChannelMap {
    slots: [AtomicU8; NUM_TRACKS],
}

impl ChannelMap {
    /// Track i → channel i.
    pub fn identity() -> Self {
        Self { slots: std::array::from_fn(|i| AtomicU8::new(i as u8)) }
    }

    pub fn from_channels(channels: [u8; NUM_TRACKS]) -> Self {
        Self { slots: channels.map(|ch| AtomicU8::new(wrap_channel(ch as i64))) }
    }

    pub fn get(&self, track: usize) -> Option<u8> {
        self.slots.get(track).map(|s| s.load(Ordering::Relaxed))
    }

    /// Store `channel mod NUM_OUT` for `track`. Returns the stored value, or `None`
    /// when the track is outside the table.
    pub fn set(&self, track: usize, channel: i64) -> Option<u8> {
        let slot = self.slots.get(track)?;
        let ch = wrap_channel(channel);
        slot.store(ch, Ordering::Relaxed);
        Some(ch)
    }

    /// Move a track's channel by `step`, clamped to [0, NUM_OUT-1].
    pub fn nudge(&self, track: usize, step: i64) -> Option<u8> {
        let slot = self.slots.get(track)?;
        let cur = slot.load(Ordering::Relaxed) as i64;
        let ch = (cur + step).clamp(0, NUM_OUT as i64 - 1) as u8;
        slot.store(ch, Ordering::Relaxed);
        Some(ch)
    }

    pub fn channels(&self) -> [u8; NUM_TRACKS] {
        std::array::from_fn(|i| self.slots[i].load(Ordering::Relaxed))
    }
}

impl Default for ChannelMap {
    fn default() -> Self {
        Self::identity()
    }
}

impl Clone for ChannelMap {
    fn clone(&self) -> Self {
        Self::from_channels(self.channels())
    }
}

impl PartialEq for ChannelMap {
    fn eq(&self, other: &Self) -> bool {
        self.channels() == other.channels()
    }
}

impl std::fmt::Debug for ChannelMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ChannelMap").field(&self.channels()).finish()
    }
}

fn wrap_channel(ch: i64) -> u8 {
    ch.rem_euclid(NUM_OUT as i64) as u8
}

/// JSON persistence for the channel map: `{"0": 0, "1": 3, ...}`.
#[derive(Debug, Clone)]
pub struct ChannelStore {
    path: PathBuf,
}

impl ChannelStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the map, falling back to identity when the file is missing or unreadable.
    pub fn load(&self) -> ChannelMap {
        if !self.path.exists() {
            debug!("no channel map at {:?}, using identity", self.path);
            return ChannelMap::identity();
        }
        match self.try_load() {
            Ok(map) => map,
            Err(e) => {
                warn!("{e}; using identity map");
                ChannelMap::identity()
            }
        }
    }

    fn try_load(&self) -> Result<ChannelMap> {
        let text = fs::read_to_string(&self.path).map_err(|e| self.err(e))?;
        let raw: HashMap<String, i64> = serde_json::from_str(&text).map_err(|e| self.err(e))?;

        let map = ChannelMap::identity();
        for (key, ch) in raw {
            let track: i64 = key.trim().parse().map_err(|e| self.err(format!("key {key:?}: {e}")))?;
            // keys beyond the table have no slot; route() covers those tracks
            if let Ok(track) = usize::try_from(track) {
                map.set(track, ch);
            }
        }
        Ok(map)
    }

    /// Overwrite the file with the whole map.
    pub fn save(&self, map: &ChannelMap) -> Result<()> {
        let raw: serde_json::Map<String, serde_json::Value> = map
            .channels()
            .iter()
            .enumerate()
            .map(|(track, &ch)| (track.to_string(), serde_json::Value::from(ch)))
            .collect();
        let text = serde_json::to_string(&raw).map_err(|e| self.err(e))?;
        fs::write(&self.path, text).map_err(|e| self.err(e))?;
        debug!("saved channel map to {:?}", self.path);
        Ok(())
    }

    fn err(&self, reason: impl ToString) -> PlayerError {
        PlayerError::Persistence { path: self.path.clone(), reason: reason.to_string() }
    }
}
