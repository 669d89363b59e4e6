use std::path::{Path, PathBuf};

use log::debug;
use walkdir::WalkDir;

pub const MIDI_EXT: &str = "mid";
pub const AUDIO_EXT: &str = "mp3";

/// A playable file found under one of the media directories.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaFile {
    pub name: String,
    pub path: PathBuf,
}

/// Recursively collect files under `root` with extension `ext` (case-insensitive),
/// sorted by name. A missing directory yields an empty list.
pub fn scan(root: impl AsRef<Path>, ext: &str) -> Vec<MediaFile> {
    let root = root.as_ref();
    let mut files: Vec<MediaFile> = WalkDir::new(root)
        .follow_links(true)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| {
            e.path()
                .extension()
                .and_then(|x| x.to_str())
                .is_some_and(|x| x.eq_ignore_ascii_case(ext))
        })
        .map(|e| MediaFile {
            name: e.file_name().to_string_lossy().into_owned(),
            path: e.into_path(),
        })
        .collect();
    files.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
    debug!("{} .{} files under {:?}", files.len(), ext, root);
    files
}
