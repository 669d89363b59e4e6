//! midi.rs
//!
//! This module turns a Standard MIDI File (SMF) into a single playback timeline.
//!
//! A MIDI file stores one event list per track, and every event carries a *delta tick*:
//! the number of ticks since the previous event of the same track. To replay the file
//! against a wall clock we need the opposite view: one list, ordered by the absolute
//! tick at which each event happens, with a note of which track it came from so the
//! router can pick an output channel for it.
//!
//! This module takes care of:
//!  - Decoding the file with `midly` into our own `MidiEvent` model
//!  - Accumulating delta ticks into absolute ticks per track
//!  - Merging all tracks with a stable sort (ties keep track order, then file order)
//!  - Converting ticks to seconds at a fixed 120 BPM
//!
//! Tempo meta events are collected but not applied to timing. Every conversion uses
//! `DEFAULT_US_PER_QN`.

use std::path::Path;

use log::{debug, warn};
use midly::{
    MetaMessage, MidiMessage, Smf, Timing, TrackEventKind,
    live::LiveEvent,
    num::{u4, u7, u14},
};

use crate::error::{PlayerError, Result};

/// 500,000 µs per quarter note = 120 BPM.
pub const DEFAULT_US_PER_QN: u32 = 500_000;

/// Ticks per quarter note assumed for SMPTE-timed files.
pub const FALLBACK_TICKS_PER_QN: u16 = 480;

/// A channel-voice message. The first field is always the channel (0–15).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Msg {
    /// (channel, key, velocity)
    NoteOn(u8, u8, u8),
    /// (channel, key, velocity)
    NoteOff(u8, u8, u8),
    /// (channel, program)
    Program(u8, u8),
    /// (channel, controller number, value)
    Control(u8, u8, u8),
    /// (channel, bend value 0–16383, center=8192)
    PitchBend(u8, u16),
    /// Per-note aftertouch: (channel, key, pressure)
    AfterTouch(u8, u8, u8),
    /// Channel-wide aftertouch: (channel, pressure)
    ChannelAftertouch(u8, u8),
}

impl Msg {
    fn from_midly(channel: u4, message: MidiMessage) -> Self {
        let ch = channel.as_int();
        match message {
            MidiMessage::NoteOn { key, vel } => Msg::NoteOn(ch, key.as_int(), vel.as_int()),
            MidiMessage::NoteOff { key, vel } => Msg::NoteOff(ch, key.as_int(), vel.as_int()),
            MidiMessage::ProgramChange { program } => Msg::Program(ch, program.as_int()),
            MidiMessage::Controller { controller, value } => {
                Msg::Control(ch, controller.as_int(), value.as_int())
            }
            MidiMessage::PitchBend { bend } => Msg::PitchBend(ch, bend.0.as_int()),
            MidiMessage::Aftertouch { key, vel } => Msg::AfterTouch(ch, key.as_int(), vel.as_int()),
            MidiMessage::ChannelAftertouch { vel } => Msg::ChannelAftertouch(ch, vel.as_int()),
        }
    }

    pub fn channel(&self) -> u8 {
        match *self {
            Msg::NoteOn(ch, ..)
            | Msg::NoteOff(ch, ..)
            | Msg::Program(ch, _)
            | Msg::Control(ch, ..)
            | Msg::PitchBend(ch, _)
            | Msg::AfterTouch(ch, ..)
            | Msg::ChannelAftertouch(ch, _) => ch,
        }
    }

    /// Copy of this message addressed to another channel.
    pub fn with_channel(self, ch: u8) -> Self {
        let ch = ch & 0x0F;
        match self {
            Msg::NoteOn(_, k, v) => Msg::NoteOn(ch, k, v),
            Msg::NoteOff(_, k, v) => Msg::NoteOff(ch, k, v),
            Msg::Program(_, p) => Msg::Program(ch, p),
            Msg::Control(_, c, v) => Msg::Control(ch, c, v),
            Msg::PitchBend(_, b) => Msg::PitchBend(ch, b),
            Msg::AfterTouch(_, k, v) => Msg::AfterTouch(ch, k, v),
            Msg::ChannelAftertouch(_, v) => Msg::ChannelAftertouch(ch, v),
        }
    }

    fn to_midly(self) -> MidiMessage {
        match self {
            Msg::NoteOn(_, key, vel) => MidiMessage::NoteOn { key: u7::from(key), vel: u7::from(vel) },
            Msg::NoteOff(_, key, vel) => MidiMessage::NoteOff { key: u7::from(key), vel: u7::from(vel) },
            Msg::Program(_, program) => MidiMessage::ProgramChange { program: u7::from(program) },
            Msg::Control(_, controller, value) => MidiMessage::Controller {
                controller: u7::from(controller),
                value: u7::from(value),
            },
            Msg::PitchBend(_, bend) => MidiMessage::PitchBend { bend: midly::PitchBend(u14::from(bend)) },
            Msg::AfterTouch(_, key, vel) => MidiMessage::Aftertouch { key: u7::from(key), vel: u7::from(vel) },
            Msg::ChannelAftertouch(_, vel) => MidiMessage::ChannelAftertouch { vel: u7::from(vel) },
        }
    }

    /// Encode as raw wire bytes, ready for an output port.
    pub fn to_bytes(self) -> std::io::Result<Vec<u8>> {
        let ev = LiveEvent::Midi { channel: u4::from(self.channel()), message: self.to_midly() };
        let mut buf = Vec::with_capacity(3);
        ev.write_std(&mut buf)?;
        Ok(buf)
    }
}

/// Meta events we care about. Everything else collapses into `Other`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Meta {
    /// Microseconds per quarter note
    Tempo(u32),
    EndOfTrack,
    Other,
}

/// One decoded event from a track.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MidiEvent {
    Voice(Msg),
    SysEx(Vec<u8>),
    Meta(Meta),
}

impl MidiEvent {
    pub fn is_meta(&self) -> bool {
        matches!(self, MidiEvent::Meta(_))
    }

    /// The channel-voice message, if this event can be sent to an output.
    pub fn voice(&self) -> Option<Msg> {
        match self {
            MidiEvent::Voice(m) => Some(*m),
            _ => None,
        }
    }
}

/// An event exactly as stored in a track: delta ticks since the previous event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrackEvent {
    pub delta: u32,
    pub event: MidiEvent,
}

impl TrackEvent {
    pub fn new(delta: u32, event: MidiEvent) -> Self {
        Self { delta, event }
    }
}

/// An event placed on the merged timeline.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TimelineEntry {
    pub tick: u64,
    pub track: usize,
    pub event: MidiEvent,
}

/// The full merged result of a MIDI file.
#[derive(Clone, Debug)]
pub struct PlaybackTimeline {
    /// Ticks per quarter note (from header)
    pub ticks_per_qn: u16,
    /// Non-meta events from all tracks, ordered by absolute tick
    pub entries: Vec<TimelineEntry>,
    /// (absolute tick, µs per quarter note) for every tempo event seen, in timeline order.
    /// Informational only.
    pub tempo_changes: Vec<(u64, u32)>,
    /// Length of the file at the default tempo
    pub duration_secs: f64,
}

impl PlaybackTimeline {
    /// Read and decode a MIDI file from disk.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|source| PlayerError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let tl = Self::from_bytes(&bytes)?;
        debug!(
            "loaded {:?}: {} events, ppq {}, {}",
            path,
            tl.entries.len(),
            tl.ticks_per_qn,
            format_duration((tl.duration_secs * 1_000_000.0) as u64)
        );
        Ok(tl)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let (ticks_per_qn, tracks) = decode_smf(bytes)?;
        Ok(build_timeline(ticks_per_qn, &tracks))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last_tick(&self) -> u64 {
        self.entries.last().map(|e| e.tick).unwrap_or(0)
    }
}

/// Convert a tick count to seconds.
///
/// Callers guarantee both denominators are positive.
pub fn ticks_to_seconds(delta_ticks: u64, ticks_per_qn: u32, us_per_qn: u32) -> f64 {
    delta_ticks as f64 * us_per_qn as f64 / (ticks_per_qn as f64 * 1_000_000.0)
}

/// Decode SMF bytes into the header's ticks-per-quarter-note and one event list per track.
pub fn decode_smf(bytes: &[u8]) -> Result<(u16, Vec<Vec<TrackEvent>>)> {
    let smf = Smf::parse(bytes)?;

    let ticks_per_qn = match smf.header.timing {
        Timing::Metrical(t) if t.as_int() == 0 => {
            return Err(PlayerError::Parse {
                reason: "header declares 0 ticks per quarter note".into(),
                source: None,
            });
        }
        Timing::Metrical(t) => t.as_int(),
        Timing::Timecode(fps, sub) => {
            warn!(
                "SMPTE timing ({} fps, {} subframes) not supported, assuming {} ticks/qn",
                fps.as_int(),
                sub,
                FALLBACK_TICKS_PER_QN
            );
            FALLBACK_TICKS_PER_QN
        }
    };

    let tracks = smf
        .tracks
        .iter()
        .map(|tr| {
            tr.iter()
                .map(|ev| {
                    let event = match ev.kind {
                        TrackEventKind::Midi { channel, message } => {
                            MidiEvent::Voice(Msg::from_midly(channel, message))
                        }
                        TrackEventKind::SysEx(data) | TrackEventKind::Escape(data) => {
                            MidiEvent::SysEx(data.to_vec())
                        }
                        TrackEventKind::Meta(MetaMessage::Tempo(tp)) => MidiEvent::Meta(Meta::Tempo(tp.as_int())),
                        TrackEventKind::Meta(MetaMessage::EndOfTrack) => MidiEvent::Meta(Meta::EndOfTrack),
                        TrackEventKind::Meta(_) => MidiEvent::Meta(Meta::Other),
                    };
                    TrackEvent::new(ev.delta.as_int(), event)
                })
                .collect()
        })
        .collect();

    Ok((ticks_per_qn, tracks))
}

/// Merge per-track event lists into one timeline.
///
/// - Walk each track independently, accumulating delta ticks into absolute ticks
/// - Keep every non-meta event, tagged with its track index
/// - Stable-sort by absolute tick, so equal ticks stay in (track, file) order
/// - Duration is the last tick at the default tempo
pub fn build_timeline(ticks_per_qn: u16, tracks: &[Vec<TrackEvent>]) -> PlaybackTimeline {
    let mut entries = Vec::with_capacity(tracks.iter().map(Vec::len).sum());
    let mut tempo_changes = Vec::new();

    for (track, events) in tracks.iter().enumerate() {
        let mut abs_ticks: u64 = 0;
        for ev in events {
            abs_ticks += ev.delta as u64;
            match &ev.event {
                MidiEvent::Meta(Meta::Tempo(us)) => tempo_changes.push((abs_ticks, *us)),
                MidiEvent::Meta(_) => {}
                other => entries.push(TimelineEntry { tick: abs_ticks, track, event: other.clone() }),
            }
        }
    }

    entries.sort_by_key(|e| e.tick);
    tempo_changes.sort_by_key(|&(tick, _)| tick);

    let last_tick = entries.last().map(|e| e.tick).unwrap_or(0);
    let duration_secs = if ticks_per_qn == 0 {
        0.0
    } else {
        ticks_to_seconds(last_tick, ticks_per_qn as u32, DEFAULT_US_PER_QN)
    };

    PlaybackTimeline { ticks_per_qn, entries, tempo_changes, duration_secs }
}

/// Format a microsecond timestamp as MM:SS string for logging/debugging.
pub fn format_duration(us: u64) -> String {
    let total_secs = us / 1_000_000;
    let mins = total_secs / 60;
    let secs = total_secs % 60;
    format!("{:02}:{:02}", mins, secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{note_off, note_on, smf_bytes, tempo};

    fn voice(delta: u32, m: Msg) -> TrackEvent {
        TrackEvent::new(delta, MidiEvent::Voice(m))
    }

    fn ticks(tl: &PlaybackTimeline) -> Vec<(u64, usize)> {
        tl.entries.iter().map(|e| (e.tick, e.track)).collect()
    }

    #[test]
    fn zero_ticks_is_zero_seconds() {
        for tpq in [1, 96, 480, 960] {
            for mpq in [1, 250_000, 500_000, 1_000_000] {
                assert_eq!(ticks_to_seconds(0, tpq, mpq), 0.0);
            }
        }
    }

    #[test]
    fn ticks_to_seconds_is_linear() {
        let one = ticks_to_seconds(120, 480, DEFAULT_US_PER_QN);
        let three = ticks_to_seconds(360, 480, DEFAULT_US_PER_QN);
        assert!((three - 3.0 * one).abs() < 1e-12);
        assert!((ticks_to_seconds(480, 480, 500_000) - 0.5).abs() < 1e-12);
        assert!((ticks_to_seconds(960, 96, 1_000_000) - 10.0).abs() < 1e-12);
    }

    #[test]
    fn two_tracks_merge_with_stable_tie_break() {
        let tracks = vec![
            vec![voice(0, Msg::NoteOn(0, 60, 100)), voice(480, Msg::NoteOff(0, 60, 0))],
            vec![voice(240, Msg::NoteOn(1, 64, 90)), voice(240, Msg::NoteOff(1, 64, 0))],
        ];
        let tl = build_timeline(480, &tracks);

        assert_eq!(ticks(&tl), vec![(0, 0), (240, 1), (480, 0), (480, 1)]);
        assert_eq!(tl.entries[2].event, MidiEvent::Voice(Msg::NoteOff(0, 60, 0)));
        assert_eq!(tl.entries[3].event, MidiEvent::Voice(Msg::NoteOff(1, 64, 0)));
        assert!((tl.duration_secs - 0.5).abs() < 1e-12);
    }

    #[test]
    fn equal_ticks_within_a_track_keep_file_order() {
        let tracks = vec![
            vec![voice(10, Msg::NoteOn(0, 60, 1)), voice(0, Msg::NoteOn(0, 61, 1))],
            vec![voice(10, Msg::NoteOn(0, 62, 1)), voice(0, Msg::NoteOn(0, 63, 1))],
        ];
        let tl = build_timeline(96, &tracks);
        let keys: Vec<u8> = tl
            .entries
            .iter()
            .map(|e| match e.event {
                MidiEvent::Voice(Msg::NoteOn(_, k, _)) => k,
                _ => 0,
            })
            .collect();
        assert_eq!(keys, vec![60, 61, 62, 63]);
    }

    #[test]
    fn absolute_ticks_are_prefix_sums_and_sorted() {
        // three tracks with irregular deltas, meta events mixed in
        let deltas: [&[u32]; 3] = [&[5, 0, 17, 3, 100], &[0, 1, 1, 1, 250], &[40, 40, 0, 7]];
        let tracks: Vec<Vec<TrackEvent>> = deltas
            .iter()
            .map(|ds| {
                ds.iter()
                    .enumerate()
                    .map(|(i, &d)| {
                        if i == 1 {
                            TrackEvent::new(d, MidiEvent::Meta(Meta::Other))
                        } else {
                            voice(d, Msg::Control(0, i as u8, 0))
                        }
                    })
                    .collect()
            })
            .collect();
        let tl = build_timeline(480, &tracks);

        assert!(tl.entries.windows(2).all(|w| w[0].tick <= w[1].tick));
        for (t, ds) in deltas.iter().enumerate() {
            let mut acc = 0u64;
            let mut expected = Vec::new();
            for (i, &d) in ds.iter().enumerate() {
                acc += d as u64;
                if i != 1 {
                    expected.push(acc);
                }
            }
            let got: Vec<u64> = tl.entries.iter().filter(|e| e.track == t).map(|e| e.tick).collect();
            assert_eq!(got, expected, "track {t}");
        }
    }

    #[test]
    fn meta_events_are_excluded_but_tempo_is_recorded() {
        let tracks = vec![vec![
            TrackEvent::new(0, MidiEvent::Meta(Meta::Tempo(250_000))),
            voice(480, Msg::NoteOn(0, 60, 100)),
            TrackEvent::new(480, MidiEvent::Meta(Meta::EndOfTrack)),
        ]];
        let tl = build_timeline(480, &tracks);

        assert_eq!(tl.entries.len(), 1);
        assert_eq!(tl.tempo_changes, vec![(0, 250_000)]);
        // tempo is not applied: 480 ticks at 120 BPM
        assert!((tl.duration_secs - 0.5).abs() < 1e-12);
    }

    #[test]
    fn sysex_stays_on_timeline_without_voice() {
        let tracks = vec![vec![TrackEvent::new(3, MidiEvent::SysEx(vec![0x7E, 0x7F]))]];
        let tl = build_timeline(480, &tracks);
        assert_eq!(tl.entries.len(), 1);
        assert_eq!(tl.entries[0].event.voice(), None);
    }

    #[test]
    fn empty_input_has_zero_duration() {
        let tl = build_timeline(480, &[]);
        assert!(tl.is_empty());
        assert_eq!(tl.duration_secs, 0.0);
        assert_eq!(tl.last_tick(), 0);
    }

    #[test]
    fn decodes_a_real_file() {
        let bytes = smf_bytes(
            480,
            &[
                &[(0, tempo(600_000)), (0, note_on(0, 60, 100)), (480, note_off(0, 60))],
                &[(240, note_on(1, 64, 90)), (240, note_off(1, 64))],
            ],
        );
        let tl = PlaybackTimeline::from_bytes(&bytes).unwrap();

        assert_eq!(tl.ticks_per_qn, 480);
        assert_eq!(ticks(&tl), vec![(0, 0), (240, 1), (480, 0), (480, 1)]);
        assert_eq!(tl.entries[1].event, MidiEvent::Voice(Msg::NoteOn(1, 64, 90)));
        assert_eq!(tl.tempo_changes, vec![(0, 600_000)]);
        assert!((tl.duration_secs - 0.5).abs() < 1e-12);
    }

    #[test]
    fn garbage_is_a_parse_error() {
        let err = PlaybackTimeline::from_bytes(b"definitely not midi").unwrap_err();
        assert!(matches!(err, PlayerError::Parse { .. }), "{err:?}");
        // the midly error is kept as the cause
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn truncated_header_is_a_parse_error() {
        let bytes = smf_bytes(480, &[&[(0, note_on(0, 60, 100))]]);
        let err = PlaybackTimeline::from_bytes(&bytes[..10]).unwrap_err();
        assert!(matches!(err, PlayerError::Parse { .. }), "{err:?}");
    }

    #[test]
    fn zero_ticks_per_quarter_is_rejected() {
        let bytes = smf_bytes(0, &[&[(0, note_on(0, 60, 100))]]);
        assert!(matches!(PlaybackTimeline::from_bytes(&bytes), Err(PlayerError::Parse { .. })));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = PlaybackTimeline::load("/nonexistent/song.mid").unwrap_err();
        assert!(matches!(err, PlayerError::Io { .. }));
    }

    #[test]
    fn restamping_changes_only_the_channel() {
        let m = Msg::Control(2, 7, 100).with_channel(9);
        assert_eq!(m, Msg::Control(9, 7, 100));
        assert_eq!(m.to_bytes().unwrap(), vec![0xB9, 7, 100]);
        assert_eq!(Msg::NoteOn(0, 60, 100).with_channel(15).to_bytes().unwrap(), vec![0x9F, 60, 100]);
        assert_eq!(Msg::PitchBend(0, 8192).to_bytes().unwrap(), vec![0xE0, 0x00, 0x40]);
    }

    #[test]
    fn duration_formats_as_minutes_and_seconds() {
        assert_eq!(format_duration(0), "00:00");
        assert_eq!(format_duration(61_500_000), "01:01");
    }
}
