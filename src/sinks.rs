//! sinks.rs
//!
//! Output endpoints. A *sink* is an open MIDI output port; a *provider* knows how to
//! enumerate the host's ports and open the ones worth playing to.
//!
//! Opening is best effort: a port that refuses to open is skipped, and ending up with
//! no sinks at all is fine (events then go nowhere). Closing never fails.

use log::{debug, warn};
use midir::{MidiOutput, MidiOutputConnection};

use crate::error::{PlayerError, Result};

pub trait OutputSink: Send {
    fn name(&self) -> &str;
    /// Send raw MIDI bytes.
    fn send(&mut self, message: &[u8]) -> Result<()>;
    fn close(self: Box<Self>);
}

pub trait SinkProvider: Send + Sync {
    fn open_all(&self) -> Vec<Box<dyn OutputSink>>;
}

/// Close every sink, leaving `sinks` empty.
pub fn close_all(sinks: &mut Vec<Box<dyn OutputSink>>) {
    for sink in sinks.drain(..) {
        debug!("closing output {}", sink.name());
        sink.close();
    }
}

/// Which port names to open.
#[derive(Debug, Clone)]
pub struct PortFilter {
    /// Ports whose name starts with this are loopbacks and are skipped
    pub exclude_prefix: String,
    /// When set, only ports whose name contains this are opened
    pub require: Option<String>,
}

impl PortFilter {
    pub fn accepts(&self, name: &str) -> bool {
        if !self.exclude_prefix.is_empty() && name.starts_with(&self.exclude_prefix) {
            return false;
        }
        match &self.require {
            Some(needle) => name.contains(needle.as_str()),
            None => true,
        }
    }
}

impl Default for PortFilter {
    fn default() -> Self {
        Self { exclude_prefix: "Midi Through".into(), require: Some("MIDI".into()) }
    }
}

/// Hardware ports through midir.
pub struct MidirProvider {
    client_name: String,
    filter: PortFilter,
}

impl MidirProvider {
    pub fn new(client_name: impl Into<String>, filter: PortFilter) -> Self {
        Self { client_name: client_name.into(), filter }
    }

    /// Names of every output port the host reports, accepted or not.
    pub fn port_names(&self) -> Result<Vec<String>> {
        let out = MidiOutput::new(&self.client_name).map_err(|e| PlayerError::SinkOpen {
            name: self.client_name.clone(),
            reason: e.to_string(),
        })?;
        Ok(out.ports().iter().filter_map(|p| out.port_name(p).ok()).collect())
    }

    fn open_one(&self, name: &str) -> Result<MidirSink> {
        let open_err = |reason: String| PlayerError::SinkOpen { name: name.to_string(), reason };

        // connect() consumes the MidiOutput, so every port gets its own client
        let out = MidiOutput::new(&self.client_name).map_err(|e| open_err(e.to_string()))?;
        let port = out
            .ports()
            .into_iter()
            .find(|p| out.port_name(p).map(|n| n == name).unwrap_or(false))
            .ok_or_else(|| open_err("port disappeared".into()))?;
        let conn = out.connect(&port, &self.client_name).map_err(|e| open_err(e.to_string()))?;
        Ok(MidirSink { name: name.to_string(), conn })
    }
}

impl SinkProvider for MidirProvider {
    fn open_all(&self) -> Vec<Box<dyn OutputSink>> {
        let names = match self.port_names() {
            Ok(n) => n,
            Err(e) => {
                warn!("{e}");
                return Vec::new();
            }
        };

        let mut sinks: Vec<Box<dyn OutputSink>> = Vec::new();
        for name in names.iter().filter(|n| self.filter.accepts(n)) {
            match self.open_one(name) {
                Ok(sink) => {
                    debug!("opened output {name}");
                    sinks.push(Box::new(sink));
                }
                Err(e) => debug!("skipping: {e}"),
            }
        }
        debug!("{} of {} outputs open", sinks.len(), names.len());
        sinks
    }
}

pub struct MidirSink {
    name: String,
    conn: MidiOutputConnection,
}

impl OutputSink for MidirSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn send(&mut self, message: &[u8]) -> Result<()> {
        self.conn.send(message).map_err(|e| PlayerError::SinkSend {
            name: self.name.clone(),
            reason: e.to_string(),
        })
    }

    fn close(self: Box<Self>) {
        // dropping the returned client releases the handle
        let _ = self.conn.close();
    }
}
