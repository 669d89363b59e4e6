use std::path::PathBuf;

#[derive(thiserror::Error, Debug)]
pub enum PlayerError {
    #[error("not a playable MIDI file: {reason}")]
    Parse {
        reason: String,
        #[source]
        source: Option<midly::Error>,
    },
    #[error("reading {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("channel map {path:?}: {reason}")]
    Persistence { path: PathBuf, reason: String },
    #[error("opening output {name}: {reason}")]
    SinkOpen { name: String, reason: String },
    #[error("sending to output {name}: {reason}")]
    SinkSend { name: String, reason: String },
    #[error("external decoder: {0}")]
    ExternalProcess(#[source] std::io::Error),
}

impl From<midly::Error> for PlayerError {
    fn from(e: midly::Error) -> Self {
        PlayerError::Parse { reason: e.to_string(), source: Some(e) }
    }
}

pub type Result<T, E = PlayerError> = std::result::Result<T, E>;
