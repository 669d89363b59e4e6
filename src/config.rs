use std::path::PathBuf;

use clap::Parser;

use crate::{audio::DecoderLauncher, routing::ChannelStore, sinks::PortFilter};

#[derive(Parser, Debug, Clone)]
#[command(name = "midibox", about = "MIDI and MP3 player for a small display-and-buttons box")]
pub struct Opt {
    /// Directory scanned for .mid files
    #[arg(long, default_value = "/home/pi/Music/MIDI")]
    pub midi_dir: PathBuf,
    /// Directory scanned for .mp3 files
    #[arg(long, default_value = "/home/pi/Music/MP3")]
    pub audio_dir: PathBuf,
    /// Track-to-channel map (JSON)
    #[arg(long, default_value = "/home/pi/track_map.json")]
    pub map_file: PathBuf,
    /// External MP3 decoder, run as `<decoder> -q <file>`
    #[arg(long, default_value = "mpg123")]
    pub decoder: String,
    /// Skip output ports whose name starts with this (loopback ports)
    #[arg(long, default_value = "Midi Through")]
    pub exclude_prefix: String,
    /// Only open output ports whose name contains this; empty opens all
    #[arg(long, default_value = "MIDI")]
    pub require_name: String,
    /// Client name shown to the MIDI subsystem
    #[arg(long, default_value = "midibox")]
    pub client_name: String,
}

impl Opt {
    pub fn port_filter(&self) -> PortFilter {
        PortFilter {
            exclude_prefix: self.exclude_prefix.clone(),
            require: Some(self.require_name.clone()).filter(|s| !s.is_empty()),
        }
    }

    pub fn channel_store(&self) -> ChannelStore {
        ChannelStore::new(&self.map_file)
    }

    pub fn decoder(&self) -> DecoderLauncher {
        DecoderLauncher::new(&self.decoder, vec!["-q".into()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_appliance_layout() {
        let opt = Opt::parse_from(["midibox"]);
        assert_eq!(opt.midi_dir, PathBuf::from("/home/pi/Music/MIDI"));
        assert_eq!(opt.map_file, PathBuf::from("/home/pi/track_map.json"));
        let f = opt.port_filter();
        assert_eq!(f.exclude_prefix, "Midi Through");
        assert_eq!(f.require.as_deref(), Some("MIDI"));
    }

    #[test]
    fn empty_requirement_opens_every_port() {
        let opt = Opt::parse_from(["midibox", "--require-name", "", "--decoder", "mpv"]);
        assert!(opt.port_filter().require.is_none());
        assert_eq!(opt.decoder, "mpv");
    }
}
