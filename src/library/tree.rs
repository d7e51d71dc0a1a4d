//! The artist → album → track tree view.
//!
//! Artists are ordered by sort key: an explicit `artistsort` tag wins, then
//! the auto-generated "The X" → "X, The" form (when smart artist sort is
//! on), then the plain name. Names beginning with `<` are reserved
//! sentinels (`<Stream>`, `<No Name>`, `<Various Artists>`) and always sort
//! first. Albums of a compilation artist sort alphabetically, all others by
//! (date, name); an album's date is the max over its tracks and the album
//! re-buckets when it grows. Tracks within an album sort by
//! (disc, track, filename); unknown numbers sort last.

use std::cmp::Ordering;

use crate::model::{ALBUM_TRACK_SORT_KEYS, TrackInfo, TrackRef, track_cmp};

use super::AaaMode;

/// Grouping name for the tree: streams file under `<Stream>`, compilations
/// under `<Various Artists>`, untagged tracks under `<No Name>`.
pub fn artist_key_of(ti: &TrackInfo) -> String {
    if ti.is_remote() {
        return "<Stream>".to_string();
    }
    if ti.is_compilation() {
        return "<Various Artists>".to_string();
    }
    match ti.albumartist().or_else(|| ti.artist()) {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => "<No Name>".to_string(),
    }
}

pub fn album_key_of(ti: &TrackInfo) -> String {
    if ti.is_remote() {
        return "<Stream>".to_string();
    }
    match ti.album() {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => "<No Name>".to_string(),
    }
}

fn date_of(ti: &TrackInfo) -> i32 {
    let original = ti.original_date();
    if original >= 0 { original } else { ti.date() }
}

/// "The Beatles" → "Beatles, The"; `None` when the name has no such prefix.
fn auto_sort_name(name: &str) -> Option<String> {
    let rest = name
        .get(..4)
        .filter(|p| p.eq_ignore_ascii_case("the "))
        .map(|_| name[4..].trim_start())?;
    if rest.is_empty() {
        return None;
    }
    Some(format!("{rest}, {}", &name[..3]))
}

fn collkey(s: &str) -> String {
    s.to_lowercase()
}

/// Keep `<...>` sentinels on top, then compare collation keys.
fn special_name_cmp(a_name: &str, a_key: &str, b_name: &str, b_key: &str) -> Ordering {
    let a_special = a_name.starts_with('<');
    let b_special = b_name.starts_with('<');
    b_special.cmp(&a_special).then_with(|| a_key.cmp(b_key))
}

pub struct Album {
    pub name: String,
    sort_name: Option<String>,
    collkey_name: String,
    collkey_sort: Option<String>,
    /// Max date over the contained tracks; chronological sort key.
    pub date: i32,
    pub tracks: Vec<TrackRef>,
}

impl Album {
    fn new(name: &str, sort_name: Option<&str>, date: i32) -> Self {
        Self {
            name: name.to_string(),
            sort_name: sort_name.map(str::to_string),
            collkey_name: collkey(name),
            collkey_sort: sort_name.map(collkey),
            date,
            tracks: Vec::new(),
        }
    }

    fn sort_collkey(&self) -> &str {
        self.collkey_sort.as_deref().unwrap_or(&self.collkey_name)
    }

    fn cmp_alpha(&self, other: &Self) -> Ordering {
        special_name_cmp(
            &self.name,
            self.sort_collkey(),
            &other.name,
            other.sort_collkey(),
        )
    }

    fn cmp_date(&self, other: &Self) -> Ordering {
        let a_special = self.name.starts_with('<');
        let b_special = other.name.starts_with('<');
        b_special
            .cmp(&a_special)
            .then_with(|| self.date.cmp(&other.date))
            .then_with(|| self.sort_collkey().cmp(other.sort_collkey()))
    }
}

pub struct Artist {
    pub name: String,
    sort_name: Option<String>,
    auto_sort_name: Option<String>,
    collkey_name: String,
    collkey_sort: Option<String>,
    collkey_auto: Option<String>,
    /// Albums render as children in the tree view when set.
    pub expanded: bool,
    pub is_compilation: bool,
    pub albums: Vec<Album>,
}

impl Artist {
    fn new(name: &str, sort_name: Option<&str>, is_compilation: bool) -> Self {
        let auto = auto_sort_name(name);
        Self {
            name: name.to_string(),
            sort_name: sort_name.map(str::to_string),
            collkey_auto: auto.as_deref().map(collkey),
            auto_sort_name: auto,
            collkey_name: collkey(name),
            collkey_sort: sort_name.map(collkey),
            expanded: false,
            is_compilation,
            albums: Vec::new(),
        }
    }

    fn sort_collkey(&self, smart: bool) -> &str {
        if let Some(key) = self.collkey_sort.as_deref() {
            return key;
        }
        if smart {
            if let Some(key) = self.collkey_auto.as_deref() {
                return key;
            }
        }
        &self.collkey_name
    }

    fn cmp(&self, other: &Self, smart: bool) -> Ordering {
        special_name_cmp(
            &self.name,
            self.sort_collkey(smart),
            &other.name,
            other.sort_collkey(smart),
        )
    }

    fn insert_album(&mut self, album: Album) -> usize {
        let compilation = self.is_compilation;
        let cmp = move |a: &Album, b: &Album| {
            if compilation {
                a.cmp_alpha(b)
            } else {
                a.cmp_date(b)
            }
        };
        let at = self
            .albums
            .partition_point(|existing| cmp(existing, &album) == Ordering::Less);
        self.albums.insert(at, album);
        at
    }

    /// Albums with equal names but different dates must merge, so the
    /// lookup ignores dates.
    fn find_album(&self, probe: &Album) -> Option<usize> {
        self.albums
            .iter()
            .position(|a| a.cmp_alpha(probe) == Ordering::Equal)
    }
}

pub struct Tree {
    artists: Vec<Artist>,
    smart_artist_sort: bool,
}

impl Tree {
    pub fn new(smart_artist_sort: bool) -> Self {
        Self {
            artists: Vec::new(),
            smart_artist_sort,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.artists.is_empty()
    }

    pub fn artists(&self) -> &[Artist] {
        &self.artists
    }

    pub fn artists_mut(&mut self) -> &mut [Artist] {
        &mut self.artists
    }

    pub fn clear(&mut self) {
        self.artists.clear();
    }

    pub fn track_count(&self) -> usize {
        self.artists
            .iter()
            .flat_map(|a| a.albums.iter())
            .map(|album| album.tracks.len())
            .sum()
    }

    fn find_artist(&self, probe: &Artist) -> Option<usize> {
        let smart = self.smart_artist_sort;
        self.artists
            .iter()
            .position(|a| a.cmp(probe, smart) == Ordering::Equal)
    }

    fn insert_artist(&mut self, artist: Artist) -> usize {
        let smart = self.smart_artist_sort;
        let at = self
            .artists
            .partition_point(|existing| existing.cmp(&artist, smart) == Ordering::Less);
        self.artists.insert(at, artist);
        at
    }

    /// Insert a track, creating its artist and album as needed and updating
    /// artist sort names and album dates along the way.
    pub fn add_track(&mut self, ti: TrackRef) {
        let artist_name = artist_key_of(&ti);
        let album_name = album_key_of(&ti);
        let date = date_of(&ti);
        let remote = ti.is_remote();
        let artistsort = (!remote).then(|| ti.artist_sort()).flatten();
        let albumsort = (!remote).then(|| ti.album_sort()).flatten();
        let is_compilation = !remote && ti.is_compilation();

        let probe_artist = Artist::new(&artist_name, artistsort, is_compilation);
        let ai = match self.find_artist(&probe_artist) {
            Some(ai) => {
                let mut changed = false;
                {
                    let artist = &mut self.artists[ai];
                    if artist.sort_name.is_none() {
                        if let Some(sort) = artistsort {
                            artist.sort_name = Some(sort.to_string());
                            artist.collkey_sort = Some(collkey(sort));
                            changed = true;
                        }
                    }
                    if artist.auto_sort_name.is_none() {
                        if let Some(auto) = auto_sort_name(&artist_name) {
                            artist.name = artist_name.clone();
                            artist.collkey_name = collkey(&artist_name);
                            artist.collkey_auto = Some(collkey(&auto));
                            artist.auto_sort_name = Some(auto);
                            changed = true;
                        }
                    }
                }
                if changed {
                    // the sort key moved; re-bucket the artist
                    let artist = self.artists.remove(ai);
                    self.insert_artist(artist)
                } else {
                    ai
                }
            }
            None => self.insert_artist(probe_artist),
        };

        let artist = &mut self.artists[ai];
        let probe_album = Album::new(&album_name, albumsort, date);
        let bi = match artist.find_album(&probe_album) {
            Some(bi) => {
                if artist.albums[bi].date < date {
                    // album grew a newer track; re-bucket chronologically
                    let mut album = artist.albums.remove(bi);
                    album.date = date;
                    artist.insert_album(album)
                } else {
                    bi
                }
            }
            None => artist.insert_album(probe_album),
        };

        let tracks = &mut self.artists[ai].albums[bi].tracks;
        match tracks.binary_search_by(|probe| track_cmp(probe, &ti, ALBUM_TRACK_SORT_KEYS)) {
            Ok(_) => {} // already present
            Err(at) => tracks.insert(at, ti),
        }
    }

    fn locate(&self, ti: &TrackInfo) -> Option<(usize, usize, usize)> {
        // fast path through the derived keys
        let probe_artist = Artist::new(&artist_key_of(ti), ti.artist_sort(), ti.is_compilation());
        if let Some(ai) = self.find_artist(&probe_artist) {
            let artist = &self.artists[ai];
            let probe_album = Album::new(&album_key_of(ti), ti.album_sort(), date_of(ti));
            if let Some(bi) = artist.find_album(&probe_album) {
                if let Ok(t) = artist.albums[bi]
                    .tracks
                    .binary_search_by(|probe| track_cmp(probe, ti, ALBUM_TRACK_SORT_KEYS))
                {
                    return Some((ai, bi, t));
                }
            }
        }
        // the artist may have been renamed since insertion; scan
        for (ai, artist) in self.artists.iter().enumerate() {
            for (bi, album) in artist.albums.iter().enumerate() {
                if let Some(t) = album.tracks.iter().position(|t| t.path == ti.path) {
                    return Some((ai, bi, t));
                }
            }
        }
        None
    }

    pub fn contains(&self, ti: &TrackInfo) -> bool {
        self.locate(ti).is_some()
    }

    /// Remove a track. An emptied album is removed with it, and an emptied
    /// artist with the album.
    pub fn remove_track(&mut self, ti: &TrackInfo) -> bool {
        let Some((ai, bi, t)) = self.locate(ti) else {
            return false;
        };
        let artist = &mut self.artists[ai];
        artist.albums[bi].tracks.remove(t);
        if artist.albums[bi].tracks.is_empty() {
            artist.albums.remove(bi);
            if artist.albums.is_empty() {
                self.artists.remove(ai);
            }
        }
        true
    }

    pub fn first_track(&self) -> Option<TrackRef> {
        self.artists
            .first()?
            .albums
            .first()?
            .tracks
            .first()
            .cloned()
    }

    pub fn last_track(&self) -> Option<TrackRef> {
        self.artists.last()?.albums.last()?.tracks.last().cloned()
    }

    /// In-order successor for automatic advance. The wrap behavior depends
    /// on the aaa mode (stay within the album or artist) and the repeat
    /// flag.
    pub fn next_track(
        &self,
        cur: Option<&TrackInfo>,
        aaa: AaaMode,
        repeat: bool,
    ) -> Option<TrackRef> {
        let Some((ai, bi, t)) = cur.and_then(|ti| self.locate(ti)) else {
            return self.first_track();
        };
        let artist = &self.artists[ai];
        let album = &artist.albums[bi];

        if let Some(next) = album.tracks.get(t + 1) {
            return Some(next.clone());
        }
        if aaa == AaaMode::Album {
            return repeat.then(|| album.tracks.first().cloned()).flatten();
        }
        if let Some(next_album) = artist.albums.get(bi + 1) {
            return next_album.tracks.first().cloned();
        }
        if aaa == AaaMode::Artist {
            return repeat
                .then(|| artist.albums.first().and_then(|a| a.tracks.first().cloned()))
                .flatten();
        }
        if let Some(next_artist) = self.artists.get(ai + 1) {
            return next_artist.albums.first().and_then(|a| a.tracks.first().cloned());
        }
        if repeat { self.first_track() } else { None }
    }

    /// Mirror of [`Tree::next_track`].
    pub fn prev_track(
        &self,
        cur: Option<&TrackInfo>,
        aaa: AaaMode,
        repeat: bool,
    ) -> Option<TrackRef> {
        let Some((ai, bi, t)) = cur.and_then(|ti| self.locate(ti)) else {
            return self.first_track();
        };
        let artist = &self.artists[ai];
        let album = &artist.albums[bi];

        if t > 0 {
            return album.tracks.get(t - 1).cloned();
        }
        if aaa == AaaMode::Album {
            return repeat.then(|| album.tracks.last().cloned()).flatten();
        }
        if bi > 0 {
            return artist.albums[bi - 1].tracks.last().cloned();
        }
        if aaa == AaaMode::Artist {
            return repeat
                .then(|| artist.albums.last().and_then(|a| a.tracks.last().cloned()))
                .flatten();
        }
        if ai > 0 {
            return self.artists[ai - 1]
                .albums
                .last()
                .and_then(|a| a.tracks.last().cloned());
        }
        if repeat { self.last_track() } else { None }
    }

    /// All tracks in tree order.
    pub fn iter(&self) -> impl Iterator<Item = &TrackRef> {
        self.artists
            .iter()
            .flat_map(|artist| artist.albums.iter())
            .flat_map(|album| album.tracks.iter())
    }
}
