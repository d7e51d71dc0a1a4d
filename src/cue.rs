//! Cue sheet support: one physical file split into virtual tracks.
//!
//! A sheet names a media file and a list of tracks, each with an offset
//! (INDEX times run at 75 frames per second), optional gaps and its own
//! metadata. Virtual tracks are addressed as `cue://<sheet-path>/<number>`;
//! the cache resolves those URLs through the sheet, so cue tracks flow
//! through the library like any other [`TrackInfo`].
//!
//! Sheet-level metadata (TITLE, PERFORMER, REM DATE, ...) applies before
//! the first TRACK command and fills in whatever a track does not set
//! itself. A malformed sheet is rejected whole: track numbers must be
//! consecutive, every track needs an index, and offsets must be monotonic.
//!
//! Playing a virtual track needs a decoder that opens the media file and
//! confines reads to [offset, offset + length); that sits behind the
//! [`Decoder`](crate::player::Decoder) contract like the http stream
//! decoder and is not bundled.

use std::path::{Path, PathBuf};

use crate::model::{Tags, TrackInfo};

/// INDEX/PREGAP/POSTGAP times count frames at 75 per second.
const FRAMES_PER_SECOND: i64 = 75;

const CUE_URL_PREFIX: &str = "cue://";

/// Metadata block; used once for the sheet and once per track.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CueMeta {
    pub performer: Option<String>,
    pub songwriter: Option<String>,
    pub title: Option<String>,
    pub genre: Option<String>,
    pub date: Option<String>,
    pub comment: Option<String>,
    pub compilation: Option<String>,
    pub discnumber: Option<String>,
}

/// One virtual track of a sheet.
#[derive(Debug, Clone)]
pub struct CueTrack {
    pub number: u32,
    /// Start within the media file, seconds.
    pub offset: f64,
    /// Seconds; `None` for the last track (it runs to the end of the
    /// media, which only a decoder knows).
    pub length: Option<f64>,
    pub meta: CueMeta,
}

#[derive(Debug, Clone)]
pub struct CueSheet {
    /// The media file the sheet splits, as written in the FILE command.
    pub file: String,
    pub tracks: Vec<CueTrack>,
    pub meta: CueMeta,
}

/// Track prototype while parsing; offsets stay in frames until the
/// post-processing pass resolves gaps.
#[derive(Debug, Default)]
struct ProtoTrack {
    number: u32,
    pregap: Option<i64>,
    postgap: Option<i64>,
    index0: Option<i64>,
    index1: Option<i64>,
    meta: CueMeta,
}

/// Split the next token off a line. Quoted tokens keep embedded
/// whitespace; bare tokens end at the first space or tab.
fn next_token(line: &str) -> Option<(&str, &str)> {
    let line = line.trim_start_matches([' ', '\t']);
    if line.is_empty() {
        return None;
    }
    if let Some(rest) = line.strip_prefix('"') {
        let end = rest.find('"').unwrap_or(rest.len());
        let after = rest.get(end + 1..).unwrap_or("");
        return Some((&rest[..end], after));
    }
    let end = line.find([' ', '\t']).unwrap_or(line.len());
    Some((&line[..end], &line[end..]))
}

/// "mm:ss:ff" (or fewer fields, filling from minutes) to frames.
fn parse_time(value: &str) -> Option<i64> {
    let mut fields = [0i64; 3];
    let mut used = 0;
    for part in value.split(':') {
        if used == 3 {
            break;
        }
        fields[used] = part.parse().ok().filter(|v| *v >= 0)?;
        used += 1;
    }
    if used == 0 {
        return None;
    }
    Some((fields[0] * 60 + fields[1]) * FRAMES_PER_SECOND + fields[2])
}

/// First writer wins, like the reference parser: a stray duplicate
/// command never overwrites metadata.
fn set_once(dst: &mut Option<String>, rest: &str) {
    if dst.is_none() {
        if let Some((value, _)) = next_token(rest) {
            *dst = Some(value.to_string());
        }
    }
}

impl CueSheet {
    /// Parse a sheet. Returns `None` for anything malformed; a partial
    /// parse is never kept.
    pub fn parse(src: &str) -> Option<CueSheet> {
        let mut file: Option<String> = None;
        let mut sheet_meta = CueMeta::default();
        let mut protos: Vec<ProtoTrack> = Vec::new();

        for line in src.lines() {
            let Some((command, rest)) = next_token(line) else {
                continue;
            };
            // metadata commands land on the sheet before the first TRACK
            // and on the latest track after it
            match command.to_ascii_uppercase().as_str() {
                "FILE" => set_once(&mut file, rest),
                "TRACK" => {
                    let (number, _) = next_token(rest)?;
                    protos.push(ProtoTrack {
                        number: number.parse().ok()?,
                        ..Default::default()
                    });
                }
                "INDEX" => {
                    let (index, rest) = next_token(rest)?;
                    let index: u32 = index.parse().ok()?;
                    if index > 1 {
                        continue;
                    }
                    let (time, _) = next_token(rest)?;
                    let frames = parse_time(time)?;
                    if let Some(last) = protos.last_mut() {
                        if index == 0 {
                            last.index0 = Some(frames);
                        } else {
                            last.index1 = Some(frames);
                        }
                    }
                }
                "PREGAP" | "POSTGAP" => {
                    let (time, _) = next_token(rest)?;
                    let frames = parse_time(time)?;
                    if let Some(last) = protos.last_mut() {
                        if command.eq_ignore_ascii_case("PREGAP") {
                            last.pregap = Some(frames);
                        } else {
                            last.postgap = Some(frames);
                        }
                    }
                }
                "PERFORMER" => {
                    let slot = match protos.last_mut() {
                        Some(t) => &mut t.meta.performer,
                        None => &mut sheet_meta.performer,
                    };
                    set_once(slot, rest);
                }
                "SONGWRITER" => {
                    let slot = match protos.last_mut() {
                        Some(t) => &mut t.meta.songwriter,
                        None => &mut sheet_meta.songwriter,
                    };
                    set_once(slot, rest);
                }
                "TITLE" => {
                    let slot = match protos.last_mut() {
                        Some(t) => &mut t.meta.title,
                        None => &mut sheet_meta.title,
                    };
                    set_once(slot, rest);
                }
                "REM" => {
                    let Some((sub, rest)) = next_token(rest) else {
                        continue;
                    };
                    let track_meta = protos.last_mut().map(|t| &mut t.meta);
                    let meta = match track_meta {
                        Some(m) => m,
                        None => &mut sheet_meta,
                    };
                    match sub.to_ascii_uppercase().as_str() {
                        "DATE" => set_once(&mut meta.date, rest),
                        "GENRE" => set_once(&mut meta.genre, rest),
                        "COMMENT" => set_once(&mut meta.comment, rest),
                        "COMPILATION" => set_once(&mut meta.compilation, rest),
                        "DISCNUMBER" => set_once(&mut meta.discnumber, rest),
                        _ => {}
                    }
                }
                _ => {} // unknown commands are skipped, not errors
            }
        }

        Self::assemble(file?, sheet_meta, protos)
    }

    fn assemble(file: String, meta: CueMeta, mut protos: Vec<ProtoTrack>) -> Option<CueSheet> {
        if protos.is_empty() {
            return None;
        }

        let mut previous: Option<u32> = None;
        for proto in &protos {
            if previous.is_some_and(|n| proto.number != n + 1) {
                return None;
            }
            previous = Some(proto.number);
        }

        // a missing index is derived from the other one and the pregap;
        // offsets must never move backwards
        let mut last_end: Option<i64> = None;
        for proto in &mut protos {
            let pregap = proto.pregap.unwrap_or(0);
            match (proto.index0, proto.index1) {
                (None, None) => return None,
                (Some(i0), None) => proto.index1 = Some(i0 + pregap),
                (None, Some(i1)) => proto.index0 = Some(i1 - pregap),
                _ => {}
            }
            let (Some(index0), Some(index1)) = (proto.index0, proto.index1) else {
                return None;
            };
            if last_end.is_some_and(|end| index0 < end) {
                return None;
            }
            last_end = Some(index1 + proto.postgap.unwrap_or(0));
        }

        let mut tracks = Vec::with_capacity(protos.len());
        for (at, proto) in protos.iter().enumerate() {
            let start = proto.index1.unwrap_or(0);
            let length = protos.get(at + 1).and_then(|next| {
                let end = next.index1? - proto.postgap.unwrap_or(0);
                Some((end - start) as f64 / FRAMES_PER_SECOND as f64)
            });
            tracks.push(CueTrack {
                number: proto.number,
                offset: start as f64 / FRAMES_PER_SECOND as f64,
                length,
                meta: proto.meta.clone(),
            });
        }

        Some(CueSheet { file, tracks, meta })
    }

    /// Read and parse a sheet file; tolerates a UTF-8 BOM.
    pub fn from_file(path: &Path) -> Option<CueSheet> {
        let bytes = std::fs::read(path).ok()?;
        let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(&bytes);
        Self::parse(&String::from_utf8_lossy(bytes))
    }

    pub fn track(&self, number: u32) -> Option<&CueTrack> {
        self.tracks.iter().find(|t| t.number == number)
    }

    /// Build the virtual [`TrackInfo`] for one track of this sheet. Track
    /// metadata wins over sheet metadata; the sheet title becomes the
    /// album and the sheet performer the album artist.
    pub fn virtual_track(&self, sheet_path: &str, number: u32) -> Option<TrackInfo> {
        let track = self.track(number)?;
        let pick = |t: &Option<String>, s: &Option<String>| t.clone().or_else(|| s.clone());

        let mut info = TrackInfo::new(cue_url(sheet_path, number));
        info.duration = track.length.map(|l| l.round() as i32).unwrap_or(-1);

        let mut tags = Tags::new();
        if let Some(title) = track.meta.title.clone() {
            tags.push("title", title);
        }
        if let Some(artist) = pick(&track.meta.performer, &self.meta.performer) {
            tags.push("artist", artist);
        }
        if let Some(albumartist) = self.meta.performer.clone() {
            tags.push("albumartist", albumartist);
        }
        if let Some(album) = self.meta.title.clone() {
            tags.push("album", album);
        }
        if let Some(composer) = pick(&track.meta.songwriter, &self.meta.songwriter) {
            tags.push("composer", composer);
        }
        if let Some(genre) = pick(&track.meta.genre, &self.meta.genre) {
            tags.push("genre", genre);
        }
        if let Some(date) = pick(&track.meta.date, &self.meta.date) {
            tags.push("date", date);
        }
        if let Some(comment) = pick(&track.meta.comment, &self.meta.comment) {
            tags.push("comment", comment);
        }
        if let Some(compilation) = pick(&track.meta.compilation, &self.meta.compilation) {
            tags.push("compilation", compilation);
        }
        if let Some(discnumber) = pick(&track.meta.discnumber, &self.meta.discnumber) {
            tags.push("discnumber", discnumber);
        }
        tags.push("tracknumber", number.to_string());
        info.tags = tags;
        Some(info)
    }
}

/// True for `.cue` files (case-insensitive).
pub fn is_cue_path(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("cue"))
}

/// The virtual-track URL for track `number` of a sheet.
pub fn cue_url(sheet_path: &str, number: u32) -> String {
    format!("{CUE_URL_PREFIX}{sheet_path}/{number}")
}

/// Split a cue URL back into (sheet path, track number).
pub fn parse_cue_url(url: &str) -> Option<(&str, u32)> {
    let rest = url.strip_prefix(CUE_URL_PREFIX)?;
    let (sheet, number) = rest.rsplit_once('/')?;
    if sheet.is_empty() {
        return None;
    }
    Some((sheet, number.parse().ok()?))
}

/// The sidecar sheet for a media file (`album.flac` -> `album.cue`), when
/// one exists on disk.
pub fn associated_cue(media: &Path) -> Option<PathBuf> {
    let sheet = media.with_extension("cue");
    sheet.is_file().then_some(sheet)
}

/// Resolve a cue URL into a complete record; the cache uses this on a
/// miss. The record's mtime is the sheet's, so editing a sheet invalidates
/// its virtual tracks on refresh.
pub fn probe_cue_url(url: &str) -> Option<TrackInfo> {
    let (sheet_path, number) = parse_cue_url(url)?;
    let sheet = CueSheet::from_file(Path::new(sheet_path))?;
    let mut info = sheet.virtual_track(sheet_path, number)?;
    info.mtime = std::fs::metadata(sheet_path)
        .ok()
        .and_then(|m| m.modified().ok())
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(-1);
    Some(info)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHEET: &str = r#"
PERFORMER "Potato Masters"
TITLE "Who Potato? That Potato!"
REM GENRE Potatofunk
REM DATE 1988
FILE "album.flac" WAVE
  TRACK 01 AUDIO
    TITLE "The Potato Song"
    INDEX 01 00:00:00
  TRACK 02 AUDIO
    TITLE "The Even Better Potato Song"
    PERFORMER "Bob"
    INDEX 00 03:58:00
    INDEX 01 04:00:00
  TRACK 03 AUDIO
    TITLE "The Potato Vacation"
    INDEX 01 07:30:33
"#;

    #[test]
    fn test_blank_sheet_rejected() {
        assert!(CueSheet::parse("").is_none());
    }

    #[test]
    fn test_parse_sheet_and_track_metadata() {
        let sheet = CueSheet::parse(SHEET).expect("valid sheet");
        assert_eq!(sheet.file, "album.flac");
        assert_eq!(sheet.tracks.len(), 3);
        assert_eq!(sheet.meta.performer.as_deref(), Some("Potato Masters"));
        assert_eq!(sheet.meta.title.as_deref(), Some("Who Potato? That Potato!"));
        assert_eq!(sheet.meta.genre.as_deref(), Some("Potatofunk"));
        assert_eq!(sheet.meta.date.as_deref(), Some("1988"));

        let two = sheet.track(2).expect("track 2");
        assert_eq!(two.meta.title.as_deref(), Some("The Even Better Potato Song"));
        assert_eq!(two.meta.performer.as_deref(), Some("Bob"));
        // sheet metadata stays on the sheet, not copied onto tracks
        assert_eq!(two.meta.genre, None);
    }

    #[test]
    fn test_offsets_and_lengths() {
        let sheet = CueSheet::parse(SHEET).expect("valid sheet");
        let [one, two, three] = &sheet.tracks[..] else {
            panic!("three tracks");
        };
        assert_eq!(one.offset, 0.0);
        assert_eq!(two.offset, 240.0);
        // track 1 runs up to track 2's INDEX 01
        assert_eq!(one.length, Some(240.0));
        assert!((two.length.expect("bounded") - 210.44).abs() < 0.01);
        // the last track runs to the end of the media
        assert_eq!(three.length, None);
        assert!((three.offset - (450.0 + 33.0 / 75.0)).abs() < 0.001);
    }

    #[test]
    fn test_index_derived_from_pregap() {
        let src = "FILE \"a.flac\" WAVE\nTRACK 01 AUDIO\nPREGAP 00:02:00\nINDEX 00 00:10:00\n";
        let sheet = CueSheet::parse(src).expect("index 1 derived");
        // index1 = index0 + pregap = 12 seconds
        assert_eq!(sheet.tracks[0].offset, 12.0);
    }

    #[test]
    fn test_malformed_sheets_rejected() {
        // no FILE
        assert!(CueSheet::parse("TRACK 01 AUDIO\nINDEX 01 00:00:00\n").is_none());
        // no tracks
        assert!(CueSheet::parse("FILE \"a.flac\" WAVE\n").is_none());
        // track without any index
        assert!(CueSheet::parse("FILE \"a.flac\" WAVE\nTRACK 01 AUDIO\n").is_none());
        // non-consecutive numbering
        assert!(
            CueSheet::parse(
                "FILE \"a.flac\" WAVE\nTRACK 01 AUDIO\nINDEX 01 00:00:00\nTRACK 03 AUDIO\nINDEX 01 01:00:00\n"
            )
            .is_none()
        );
        // offsets moving backwards
        assert!(
            CueSheet::parse(
                "FILE \"a.flac\" WAVE\nTRACK 01 AUDIO\nINDEX 01 02:00:00\nTRACK 02 AUDIO\nINDEX 01 01:00:00\n"
            )
            .is_none()
        );
    }

    #[test]
    fn test_bom_is_skipped() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("bom.cue");
        let mut bytes = b"\xEF\xBB\xBF".to_vec();
        bytes.extend_from_slice(b"FILE \"a.flac\" WAVE\nTRACK 01 AUDIO\nINDEX 01 00:00:00\n");
        std::fs::write(&path, bytes).expect("write");
        assert!(CueSheet::from_file(&path).is_some());
    }

    #[test]
    fn test_url_roundtrip() {
        let url = cue_url("/music/album.cue", 3);
        assert_eq!(url, "cue:///music/album.cue/3");
        let (sheet, number) = parse_cue_url(&url).expect("roundtrip");
        assert_eq!(sheet, "/music/album.cue");
        assert_eq!(number, 3);

        assert!(parse_cue_url("/music/album.flac").is_none());
        assert!(parse_cue_url("cue://no-number").is_none());
    }

    #[test]
    fn test_associated_cue_sidecar() {
        let dir = tempfile::tempdir().expect("temp dir");
        let media = dir.path().join("album.flac");
        std::fs::write(&media, b"x").expect("create media");
        assert!(associated_cue(&media).is_none());

        let sheet = dir.path().join("album.cue");
        std::fs::write(&sheet, b"x").expect("create sheet");
        assert_eq!(associated_cue(&media), Some(sheet));
    }

    #[test]
    fn test_virtual_track_tags() {
        let sheet = CueSheet::parse(SHEET).expect("valid sheet");
        let info = sheet.virtual_track("/m/album.cue", 2).expect("track 2");
        assert_eq!(info.path, "cue:///m/album.cue/2");
        assert_eq!(info.title(), Some("The Even Better Potato Song"));
        // the track performer overrides the sheet's
        assert_eq!(info.artist(), Some("Bob"));
        assert_eq!(info.albumartist(), Some("Potato Masters"));
        assert_eq!(info.album(), Some("Who Potato? That Potato!"));
        assert_eq!(info.genre(), Some("Potatofunk"));
        assert_eq!(info.track_number(), Some(2));
        assert_eq!(info.date(), 19880000);
        assert_eq!(info.duration, 210);
        assert!(!info.is_remote());

        assert!(sheet.virtual_track("/m/album.cue", 9).is_none());
    }

    #[test]
    fn test_probe_cue_url_reads_sheet_mtime() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("album.cue");
        std::fs::write(&path, SHEET).expect("write sheet");
        let url = cue_url(path.to_str().expect("utf-8"), 1);

        let info = probe_cue_url(&url).expect("resolves");
        assert_eq!(info.title(), Some("The Potato Song"));
        assert_eq!(info.duration, 240);
        assert!(info.mtime > 0);

        assert!(probe_cue_url(&cue_url("/missing.cue", 1)).is_none());
    }
}
