//! Recursive directory scan for audio files.
//!
//! Supported extensions: mp3, flac, ogg, wav, m4a, aac, opus
//! (case-insensitive). Cue sheets expand into their virtual track URLs and
//! replace the media file they split: an audio file with a sidecar sheet
//! is skipped, the sheet's tracks are emitted instead. Long scans run on
//! the worker and poll their cancellation token between files.

use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::cue;
use crate::worker::CancelToken;

const AUDIO_EXTENSIONS: &[&str] = &["mp3", "flac", "ogg", "wav", "m4a", "aac", "opus"];

pub fn is_audio_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .is_some_and(|e| AUDIO_EXTENSIONS.contains(&e.as_str()))
}

/// Walk `root`, calling `on_track` with the path or cue URL of every
/// playable track found. Returns the number of tracks emitted; stops early
/// when cancelled.
pub fn scan(root: &Path, cancel: &CancelToken, mut on_track: impl FnMut(String)) -> usize {
    let mut found = 0;
    for entry in WalkDir::new(root).into_iter().filter_map(|e| e.ok()) {
        if cancel.is_cancelled() {
            tracing::debug!(root = %root.display(), found, "scan cancelled");
            break;
        }
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let Some(path_str) = path.to_str() else {
            continue;
        };
        if cue::is_cue_path(path) {
            match cue::CueSheet::from_file(path) {
                Some(sheet) => {
                    for track in &sheet.tracks {
                        found += 1;
                        on_track(cue::cue_url(path_str, track.number));
                    }
                }
                None => {
                    tracing::debug!(path = %path.display(), "skipping malformed cue sheet");
                }
            }
        } else if is_audio_file(path) {
            if cue::associated_cue(path).is_some() {
                // the sheet's virtual tracks stand in for the file
                continue;
            }
            found += 1;
            on_track(path_str.to_string());
        }
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use tempfile::tempdir;

    fn file_names(paths: &[String]) -> Vec<&str> {
        paths
            .iter()
            .filter_map(|p| p.rsplit('/').next())
            .collect()
    }

    #[test]
    fn test_scan_finds_audio_files() {
        let dir = tempdir().expect("temp dir");
        let root = dir.path();

        File::create(root.join("song.mp3")).expect("create");
        File::create(root.join("music.flac")).expect("create");
        File::create(root.join("notes.txt")).expect("create");
        File::create(root.join("UPPERCASE.OGG")).expect("create");

        let subdir = root.join("subdir");
        std::fs::create_dir(&subdir).expect("mkdir");
        File::create(subdir.join("track.wav")).expect("create");
        File::create(subdir.join("ignore.doc")).expect("create");

        let mut paths = Vec::new();
        let found = scan(root, &CancelToken::new(), |p| paths.push(p));
        assert_eq!(found, 4);

        let names = file_names(&paths);
        assert!(names.contains(&"song.mp3"));
        assert!(names.contains(&"music.flac"));
        assert!(names.contains(&"track.wav"));
        assert!(names.contains(&"UPPERCASE.OGG"));
        assert!(!names.contains(&"notes.txt"));
    }

    #[test]
    fn test_cue_sheet_replaces_its_media_file() {
        let dir = tempdir().expect("temp dir");
        let root = dir.path();

        File::create(root.join("album.flac")).expect("create media");
        std::fs::write(
            root.join("album.cue"),
            "FILE \"album.flac\" WAVE\n\
             TRACK 01 AUDIO\nINDEX 01 00:00:00\n\
             TRACK 02 AUDIO\nINDEX 01 02:00:00\n",
        )
        .expect("write sheet");
        File::create(root.join("single.mp3")).expect("create");

        let mut paths = Vec::new();
        let found = scan(root, &CancelToken::new(), |p| paths.push(p));
        assert_eq!(found, 3);

        let sheet = root.join("album.cue");
        let sheet = sheet.to_str().expect("utf-8");
        assert!(paths.contains(&cue::cue_url(sheet, 1)));
        assert!(paths.contains(&cue::cue_url(sheet, 2)));
        // the split media file itself is not emitted
        assert!(!paths.iter().any(|p| p.ends_with("album.flac")));
        assert!(paths.iter().any(|p| p.ends_with("single.mp3")));
    }

    #[test]
    fn test_malformed_cue_sheet_is_skipped() {
        let dir = tempdir().expect("temp dir");
        std::fs::write(dir.path().join("broken.cue"), "TRACK potato\n").expect("write");
        File::create(dir.path().join("song.mp3")).expect("create");

        let mut paths = Vec::new();
        let found = scan(dir.path(), &CancelToken::new(), |p| paths.push(p));
        assert_eq!(found, 1);
        assert!(paths[0].ends_with("song.mp3"));
    }

    #[test]
    fn test_cancelled_scan_stops() {
        let dir = tempdir().expect("temp dir");
        for i in 0..20 {
            File::create(dir.path().join(format!("{i}.mp3"))).expect("create");
        }
        let cancel = CancelToken::new();
        cancel.cancel();
        let found = scan(dir.path(), &CancelToken::new(), |_| {});
        assert!(found > 0);
        let found = scan(dir.path(), &cancel, |_| {});
        assert_eq!(found, 0);
    }
}
