use anyhow::Result;
use clap::Parser;
use std::{
    io::{Write, stdin, stdout},
    time::Duration,
};

use crossterm::event::{self, Event, KeyCode, KeyModifiers};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};

use midibox::{
    SessionController,
    config::Opt,
    library::{self, AUDIO_EXT, MIDI_EXT, MediaFile},
    midi::format_duration,
    routing::NUM_OUT,
    sinks::MidirProvider,
};

struct RawGuard;
impl RawGuard {
    fn enter() -> anyhow::Result<Self> {
        enable_raw_mode()?;
        Ok(Self)
    }
}
impl Drop for RawGuard {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
    }
}

/// What the terminal shell knows between commands.
struct Shell {
    opt: Opt,
    ctl: SessionController,
    midi_files: Vec<MediaFile>,
    audio_files: Vec<MediaFile>,
}

impl Shell {
    fn rescan(&mut self) {
        self.midi_files = library::scan(&self.opt.midi_dir, MIDI_EXT);
        self.audio_files = library::scan(&self.opt.audio_dir, AUDIO_EXT);
    }

    fn print_list(title: &str, files: &[MediaFile]) {
        println!("\n{title}:");
        if files.is_empty() {
            println!("  <Empty>");
        }
        for (i, f) in files.iter().enumerate() {
            println!("  {:>3}  {}", i + 1, f.name);
        }
    }

    fn print_map(&self) {
        let map = self.ctl.channel_map();
        for (track, ch) in map.channels().iter().enumerate() {
            println!("  TRK {:>2} -> OUT {:>2}", track + 1, ch + 1);
        }
    }

    fn print_status(&self) {
        if self.ctl.is_active() {
            let total = self.ctl.duration_secs();
            let done = total * self.ctl.elapsed_fraction();
            println!(
                "MIDI playing {} / {}",
                format_duration((done * 1_000_000.0) as u64),
                format_duration((total * 1_000_000.0) as u64)
            );
        } else if self.ctl.is_audio_playing() {
            println!("MP3 playing");
        } else {
            println!("Stopped");
        }
    }

    fn pick<'a>(files: &'a [MediaFile], arg: Option<&str>) -> Option<&'a MediaFile> {
        let n: usize = arg?.parse().ok()?;
        files.get(n.checked_sub(1)?)
    }

    /// Show a progress bar until the song ends. Esc stops it, Enter leaves it playing.
    fn watch(&self) -> Result<()> {
        let _raw = RawGuard::enter()?;
        print!("Controls: Esc = stop, Enter = back to prompt\r\n");

        loop {
            if !self.ctl.is_active() {
                print!("\r\nPlayback finished.\r\n");
                break;
            }
            let frac = self.ctl.elapsed_fraction();
            let filled = (frac * 30.0) as usize;
            print!("\r[{}{}] {:>3.0}%", "#".repeat(filled), "-".repeat(30 - filled), frac * 100.0);
            stdout().flush().ok();

            if event::poll(Duration::from_millis(100))? {
                if let Event::Key(k) = event::read()? {
                    match k.code {
                        KeyCode::Esc => {
                            self.ctl.stop();
                            print!("\r\nStopped.\r\n");
                            break;
                        }
                        KeyCode::Char('c') if k.modifiers.contains(KeyModifiers::CONTROL) => {
                            self.ctl.stop();
                            break;
                        }
                        KeyCode::Enter => {
                            print!("\r\n");
                            break;
                        }
                        _ => {}
                    }
                }
            }
        }
        Ok(())
    }

    fn run_command(&mut self, line: &str) -> Result<()> {
        let mut words = line.split_whitespace();
        let cmd = words.next().unwrap_or("").to_ascii_lowercase();
        let arg = words.next();
        let arg2 = words.next();

        match cmd.as_str() {
            "list" | "midi" if arg.is_none() => Self::print_list("MIDI files", &self.midi_files),
            "mp3" if arg.is_none() => Self::print_list("MP3 files", &self.audio_files),
            "rescan" => {
                self.rescan();
                println!("{} MIDI, {} MP3", self.midi_files.len(), self.audio_files.len());
            }
            "play" | "midi" => {
                let Some(f) = Self::pick(&self.midi_files, arg).cloned() else {
                    println!("No such MIDI file. Try 'list'.");
                    return Ok(());
                };
                match self.ctl.play_midi(&f.path) {
                    Ok(()) => {
                        println!("Playing {}", f.name);
                        self.watch()?;
                    }
                    Err(e) => println!("Cannot play {}: {}", f.name, e),
                }
            }
            "mp3" => {
                let Some(f) = Self::pick(&self.audio_files, arg) else {
                    println!("No such MP3 file. Try 'mp3'.");
                    return Ok(());
                };
                self.ctl.play_audio(&f.path);
                self.print_status();
            }
            "stop" => {
                self.ctl.stop();
                println!("Stopped");
            }
            "status" => self.print_status(),
            "map" => self.print_map(),
            "set" | "up" | "down" => {
                let track = arg.and_then(|t| t.parse::<usize>().ok()).and_then(|t| t.checked_sub(1));
                let stored = match (cmd.as_str(), track) {
                    (_, None) => None,
                    ("up", Some(t)) => self.ctl.nudge_channel(t, 1),
                    ("down", Some(t)) => self.ctl.nudge_channel(t, -1),
                    (_, Some(t)) => match arg2.and_then(|c| c.parse::<i64>().ok()) {
                        Some(c) => self.ctl.set_channel(t, c - 1),
                        None => None,
                    },
                };
                match (track, stored) {
                    (Some(t), Some(ch)) => println!("TRK {} -> OUT {}", t + 1, ch + 1),
                    _ => println!(
                        "Usage: set TRACK CHANNEL | up TRACK | down TRACK (tracks 1-{}, channels 1-{})",
                        self.ctl.num_tracks(),
                        NUM_OUT
                    ),
                }
            }
            "ports" => {
                let provider = MidirProvider::new(&self.opt.client_name, self.opt.port_filter());
                match provider.port_names() {
                    Ok(names) => {
                        for n in names {
                            let mark = if self.opt.port_filter().accepts(&n) { "*" } else { " " };
                            println!(" {mark} {n}");
                        }
                    }
                    Err(e) => println!("{e}"),
                }
            }
            _ => println!(
                "Commands: list, mp3, play N, mp3 N, stop, status, map, set T C, up T, down T, ports, rescan"
            ),
        }
        Ok(())
    }
}

fn main() -> Result<()> {
    env_logger::init();
    let opt = Opt::parse();

    let ctl = SessionController::new(
        opt.channel_store(),
        Box::new(MidirProvider::new(&opt.client_name, opt.port_filter())),
        Box::new(opt.decoder()),
    );
    let mut shell = Shell { opt, ctl, midi_files: Vec::new(), audio_files: Vec::new() };
    shell.rescan();
    Shell::print_list("MIDI files", &shell.midi_files);

    // REPL: empty line quits.
    loop {
        print!("\n> ");
        stdout().flush().ok();

        let mut line = String::new();
        if stdin().read_line(&mut line).is_err() {
            break;
        }
        let line = line.trim();
        if line.is_empty() {
            break;
        }
        shell.run_command(line)?;
    }

    shell.ctl.stop();
    Ok(())
}
