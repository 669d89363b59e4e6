//! Hand-assembled SMF bytes for tests.

use std::io::Write;

use tempfile::NamedTempFile;

pub fn note_on(ch: u8, key: u8, vel: u8) -> Vec<u8> {
    vec![0x90 | ch, key, vel]
}

pub fn note_off(ch: u8, key: u8) -> Vec<u8> {
    vec![0x80 | ch, key, 0]
}

pub fn tempo(us_per_qn: u32) -> Vec<u8> {
    let b = us_per_qn.to_be_bytes();
    vec![0xFF, 0x51, 0x03, b[1], b[2], b[3]]
}

fn write_vlq(mut v: u32, out: &mut Vec<u8>) {
    let mut bytes = vec![(v & 0x7F) as u8];
    v >>= 7;
    while v > 0 {
        bytes.push((v & 0x7F) as u8 | 0x80);
        v >>= 7;
    }
    bytes.reverse();
    out.extend(bytes);
}

/// Build a format 0/1 file. Each track is a list of (delta, raw event bytes);
/// an end-of-track meta event is appended.
pub fn smf_bytes(ticks_per_qn: u16, tracks: &[&[(u32, Vec<u8>)]]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend(b"MThd");
    out.extend(6u32.to_be_bytes());
    let format: u16 = if tracks.len() > 1 { 1 } else { 0 };
    out.extend(format.to_be_bytes());
    out.extend((tracks.len() as u16).to_be_bytes());
    out.extend(ticks_per_qn.to_be_bytes());

    for track in tracks {
        let mut body = Vec::new();
        for (delta, bytes) in track.iter() {
            write_vlq(*delta, &mut body);
            body.extend(bytes);
        }
        body.extend([0x00, 0xFF, 0x2F, 0x00]);
        out.extend(b"MTrk");
        out.extend((body.len() as u32).to_be_bytes());
        out.extend(body);
    }
    out
}

pub fn smf_file(ticks_per_qn: u16, tracks: &[&[(u32, Vec<u8>)]]) -> NamedTempFile {
    let mut f = NamedTempFile::new().unwrap();
    f.write_all(&smf_bytes(ticks_per_qn, tracks)).unwrap();
    f.flush().unwrap();
    f
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vlq_matches_smf_examples() {
        for (v, expected) in [
            (0u32, vec![0x00]),
            (0x40, vec![0x40]),
            (0x7F, vec![0x7F]),
            (0x80, vec![0x81, 0x00]),
            (0x2000, vec![0xC0, 0x00]),
            (0x0FFF_FFFF, vec![0xFF, 0xFF, 0xFF, 0x7F]),
        ] {
            let mut out = Vec::new();
            write_vlq(v, &mut out);
            assert_eq!(out, expected, "{v:#x}");
        }
    }
}
