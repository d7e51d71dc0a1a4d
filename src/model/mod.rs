//! Core data model: immutable track metadata.
//!
//! A [`TrackInfo`] describes one audio source (a file or an http stream) and
//! never changes after construction. It is shared as `Arc<TrackInfo>`: the
//! cache holds one strong reference per entry, each view holds one per
//! membership, and the player holds one for the currently playing track. When
//! the last clone drops, the record and its tag dictionary are freed.

use std::sync::Arc;

/// Insertion-ordered tag dictionary with case-insensitive key lookup.
///
/// Keys are compared ASCII case-insensitively; insertion order is preserved
/// because the on-disk cache format round-trips pairs in order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tags(Vec<(String, String)>);

impl Tags {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn push(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.push((key.into(), value.into()));
    }

    /// First value stored under `key`, ignoring ASCII case.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, String)> for Tags {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Immutable metadata record for one audio source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackInfo {
    /// File path or stream URL. Uniqueness key; UTF-8.
    pub path: String,
    /// Modification time of the file, seconds since the epoch. -1 for streams.
    pub mtime: i64,
    /// Duration in seconds. -1 = unknown / stream.
    pub duration: i32,
    /// Bitrate in bits per second. -1 = unknown.
    pub bitrate: i32,
    /// Beats per minute. -1 = unknown.
    pub bpm: i32,
    /// Times this track finished playing.
    pub play_count: u32,
    /// Codec name, e.g. "flac".
    pub codec: Option<String>,
    /// Codec profile, e.g. "LC" for AAC.
    pub codec_profile: Option<String>,
    /// Tag dictionary.
    pub tags: Tags,
}

impl TrackInfo {
    /// A record with only the path set; every other field unknown.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            mtime: -1,
            duration: -1,
            bitrate: -1,
            bpm: -1,
            play_count: 0,
            codec: None,
            codec_profile: None,
            tags: Tags::new(),
        }
    }

    /// True for http(s) stream URLs. Streams cannot seek and buffer
    /// differently.
    pub fn is_remote(&self) -> bool {
        is_remote_path(&self.path)
    }

    pub fn artist(&self) -> Option<&str> {
        self.tags.get("artist")
    }

    pub fn album(&self) -> Option<&str> {
        self.tags.get("album")
    }

    pub fn title(&self) -> Option<&str> {
        self.tags.get("title")
    }

    pub fn genre(&self) -> Option<&str> {
        self.tags.get("genre")
    }

    /// Album artist tag, raw (no compilation substitution).
    pub fn albumartist(&self) -> Option<&str> {
        self.tags.get("albumartist")
    }

    /// Explicit artist sort name: `albumartistsort` wins over `artistsort`.
    pub fn artist_sort(&self) -> Option<&str> {
        self.tags
            .get("albumartistsort")
            .or_else(|| self.tags.get("artistsort"))
    }

    pub fn album_sort(&self) -> Option<&str> {
        self.tags.get("albumsort")
    }

    /// Compilation detection: an explicit truthy `compilation` tag, an
    /// albumartist of "Various Artists", or an albumartist that disagrees
    /// with the artist.
    pub fn is_compilation(&self) -> bool {
        if self.tags.get("compilation").is_some_and(is_freeform_true) {
            return true;
        }
        match (self.albumartist(), self.artist()) {
            (Some(aa), _) if aa.eq_ignore_ascii_case("Various Artists") => true,
            (Some(aa), Some(a)) => !aa.eq_ignore_ascii_case(a),
            _ => false,
        }
    }

    /// Release date as YYYYMMDD, or -1 when missing/unparsable.
    pub fn date(&self) -> i32 {
        parse_date(self.tags.get("date"))
    }

    /// Original release date as YYYYMMDD, or -1.
    pub fn original_date(&self) -> i32 {
        parse_date(self.tags.get("originaldate"))
    }

    /// Disc number, if tagged (handles "1/2" style values).
    pub fn disc_number(&self) -> Option<i64> {
        parse_int(self.tags.get("discnumber"))
    }

    /// Track number, if tagged (handles "3/12" style values).
    pub fn track_number(&self) -> Option<i64> {
        parse_int(self.tags.get("tracknumber"))
    }

    /// Last path component, used as the fallback display name and the final
    /// sort tiebreak.
    pub fn filename(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }

    /// Word-wise substring match over the selected fields.
    ///
    /// Every whitespace-separated word of `text` must match at least one of
    /// the enabled fields, case-insensitively. A title match also tries the
    /// filename when no title tag exists.
    pub fn matches(&self, text: &str, fields: MatchFields) -> bool {
        let hay_of = |s: Option<&str>| s.map(|s| s.to_lowercase());
        let artist = fields.artist.then(|| hay_of(self.artist())).flatten();
        let album = fields.album.then(|| hay_of(self.album())).flatten();
        let albumartist = fields
            .albumartist
            .then(|| hay_of(self.albumartist()))
            .flatten();
        let title = fields
            .title
            .then(|| hay_of(self.title().or(Some(self.filename()))))
            .flatten();

        text.split_whitespace().all(|word| {
            let w = word.to_lowercase();
            [&artist, &album, &albumartist, &title]
                .into_iter()
                .flatten()
                .any(|hay| hay.contains(&w))
        })
    }
}

/// Fields the word-match in [`TrackInfo::matches`] looks at.
#[derive(Debug, Clone, Copy, Default)]
pub struct MatchFields {
    pub artist: bool,
    pub album: bool,
    pub title: bool,
    pub albumartist: bool,
}

impl MatchFields {
    pub const ALL: Self = Self {
        artist: true,
        album: true,
        title: true,
        albumartist: true,
    };
}

/// A shared, immutable track info reference.
pub type TrackRef = Arc<TrackInfo>;

fn is_freeform_true(v: &str) -> bool {
    v.eq_ignore_ascii_case("1")
        || v.eq_ignore_ascii_case("y")
        || v.eq_ignore_ascii_case("yes")
        || v.eq_ignore_ascii_case("true")
}

/// True for http(s) URLs.
pub fn is_remote_path(path: &str) -> bool {
    path.starts_with("http://") || path.starts_with("https://")
}

fn parse_int(val: Option<&str>) -> Option<i64> {
    let val = val?.trim();
    // "3/12" style track numbers keep only the leading integer
    let digits = val.split(['/', '-']).next()?.trim();
    digits.parse().ok()
}

/// Parse "YYYY", "YYYY-MM" or "YYYY-MM-DD" into a sortable YYYYMMDD integer.
/// Returns -1 for anything that does not start with a four-digit year.
fn parse_date(val: Option<&str>) -> i32 {
    let Some(val) = val else { return -1 };
    let mut parts = val.trim().splitn(3, '-');
    let year: i32 = match parts.next().and_then(|y| y.parse().ok()) {
        Some(y) if (1000..=9999).contains(&y) => y,
        _ => return -1,
    };
    let month: i32 = parts.next().and_then(|m| m.parse().ok()).unwrap_or(0);
    let day: i32 = parts.next().and_then(|d| d.parse().ok()).unwrap_or(0);
    year * 10000 + month.clamp(0, 99) * 100 + day.clamp(0, 99)
}

/// One component of a composite sort order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKey {
    Artist,
    Album,
    AlbumArtist,
    Title,
    TrackNumber,
    DiscNumber,
    Date,
    OriginalDate,
    Genre,
    FileName,
    PlayCount,
    Duration,
    Bitrate,
    Bpm,
}

impl SortKey {
    /// Parse a config-file key name.
    pub fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "artist" => Self::Artist,
            "album" => Self::Album,
            "albumartist" => Self::AlbumArtist,
            "title" => Self::Title,
            "tracknumber" => Self::TrackNumber,
            "discnumber" => Self::DiscNumber,
            "date" => Self::Date,
            "originaldate" => Self::OriginalDate,
            "genre" => Self::Genre,
            "filename" => Self::FileName,
            "play_count" => Self::PlayCount,
            "duration" => Self::Duration,
            "bitrate" => Self::Bitrate,
            "bpm" => Self::Bpm,
            _ => return None,
        })
    }
}

/// The default sorted-view key tuple.
pub const DEFAULT_SORT_KEYS: &[SortKey] = &[
    SortKey::Artist,
    SortKey::Album,
    SortKey::DiscNumber,
    SortKey::TrackNumber,
    SortKey::Title,
    SortKey::FileName,
];

/// Album-internal ordering: disc, then track, then filename.
pub const ALBUM_TRACK_SORT_KEYS: &[SortKey] =
    &[SortKey::DiscNumber, SortKey::TrackNumber, SortKey::FileName];

use std::cmp::Ordering;

/// Missing numeric keys sort after known ones.
fn cmp_numeric(a: Option<i64>, b: Option<i64>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

fn cmp_str(a: Option<&str>, b: Option<&str>) -> Ordering {
    let a = a.unwrap_or("").to_lowercase();
    let b = b.unwrap_or("").to_lowercase();
    a.cmp(&b)
}

fn nonneg(v: i32) -> Option<i64> {
    (v >= 0).then_some(v as i64)
}

/// Compare two tracks by a composite key tuple.
///
/// The path is always the final tiebreak, so the resulting order is total for
/// any key tuple (inserting a track set in any order yields the same
/// sequence).
pub fn track_cmp(a: &TrackInfo, b: &TrackInfo, keys: &[SortKey]) -> Ordering {
    for key in keys {
        let ord = match key {
            SortKey::Artist => cmp_str(
                a.artist_sort().or(a.artist()),
                b.artist_sort().or(b.artist()),
            ),
            SortKey::Album => cmp_str(a.album(), b.album()),
            SortKey::AlbumArtist => cmp_str(a.albumartist(), b.albumartist()),
            SortKey::Title => cmp_str(a.title(), b.title()),
            SortKey::TrackNumber => cmp_numeric(a.track_number(), b.track_number()),
            SortKey::DiscNumber => cmp_numeric(a.disc_number(), b.disc_number()),
            SortKey::Date => cmp_numeric(nonneg(a.date()), nonneg(b.date())),
            SortKey::OriginalDate => {
                cmp_numeric(nonneg(a.original_date()), nonneg(b.original_date()))
            }
            SortKey::Genre => cmp_str(a.genre(), b.genre()),
            SortKey::FileName => a.filename().cmp(b.filename()),
            SortKey::PlayCount => a.play_count.cmp(&b.play_count),
            SortKey::Duration => cmp_numeric(nonneg(a.duration), nonneg(b.duration)),
            SortKey::Bitrate => cmp_numeric(nonneg(a.bitrate), nonneg(b.bitrate)),
            SortKey::Bpm => cmp_numeric(nonneg(a.bpm), nonneg(b.bpm)),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    a.path.cmp(&b.path)
}
