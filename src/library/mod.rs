//! The track library: one store, three interlinked views.
//!
//! Every added track lives in a path-keyed store holding a strong
//! reference, visible or not. Visible tracks (those passing both the
//! compiled tag filter and the live filter) are additionally linked into
//! the artist/album tree, the flat sorted view and the shuffle order, one
//! strong reference per view.
//!
//! Narrowing a filter shrinks the views in place; a change that may grow
//! the result clears the views and repopulates them from the store.

pub mod filter;
pub mod shuffle;
pub mod sorted;
pub mod tree;

pub use filter::TagFilter;
pub use shuffle::ShuffleList;
pub use sorted::SortedList;
pub use tree::Tree;

use std::collections::HashMap;

use rand::SeedableRng;
use rand::rngs::SmallRng;

use crate::model::{MatchFields, SortKey, TrackInfo, TrackRef};

/// Restricts what automatic advance may move across: the whole library, the
/// current artist, or the current album.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AaaMode {
    #[default]
    All,
    Artist,
    Album,
}

impl AaaMode {
    pub fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "all" => Self::All,
            "artist" => Self::Artist,
            "album" => Self::Album,
            _ => return None,
        })
    }
}

/// Flags steering [`Library::set_next`] / [`Library::set_prev`].
#[derive(Debug, Clone, Copy)]
pub struct AdvanceOpts {
    pub shuffle: bool,
    pub repeat: bool,
    pub play_sorted: bool,
    pub aaa_mode: AaaMode,
    pub auto_reshuffle: bool,
}

impl Default for AdvanceOpts {
    fn default() -> Self {
        Self {
            shuffle: false,
            repeat: false,
            play_sorted: false,
            aaa_mode: AaaMode::All,
            auto_reshuffle: true,
        }
    }
}

/// Acceptance predicate for the aaa restriction: candidates must share the
/// current track's album (or artist). With no current track or `All` mode
/// everything passes. Shared by the library and the playlist walks.
pub(crate) fn aaa_accept(cur: Option<&TrackRef>, mode: AaaMode) -> impl Fn(&TrackRef) -> bool {
    let ctx = cur.map(|ti| (tree::artist_key_of(ti), tree::album_key_of(ti)));
    move |candidate: &TrackRef| match (mode, &ctx) {
        (AaaMode::All, _) | (_, None) => true,
        (AaaMode::Artist, Some((artist, _))) => tree::artist_key_of(candidate) == *artist,
        (AaaMode::Album, Some((artist, album))) => {
            tree::artist_key_of(candidate) == *artist && tree::album_key_of(candidate) == *album
        }
    }
}

struct Entry {
    ti: TrackRef,
    visible: bool,
}

pub struct Library {
    tracks: HashMap<String, Entry>,
    pub tree: Tree,
    pub sorted: SortedList,
    shuffle: ShuffleList,
    filter: Option<TagFilter>,
    live_filter: Option<String>,
    cur: Option<TrackRef>,
    rng: SmallRng,
}

impl Library {
    pub fn new(smart_artist_sort: bool, sort_keys: Vec<SortKey>) -> Self {
        Self::with_rng(smart_artist_sort, sort_keys, SmallRng::from_os_rng())
    }

    /// Deterministic shuffle order for tests.
    pub fn with_seed(smart_artist_sort: bool, sort_keys: Vec<SortKey>, seed: u64) -> Self {
        Self::with_rng(smart_artist_sort, sort_keys, SmallRng::seed_from_u64(seed))
    }

    fn with_rng(smart_artist_sort: bool, sort_keys: Vec<SortKey>, rng: SmallRng) -> Self {
        Self {
            tracks: HashMap::new(),
            tree: Tree::new(smart_artist_sort),
            sorted: SortedList::new(sort_keys),
            shuffle: ShuffleList::new(),
            filter: None,
            live_filter: None,
            cur: None,
            rng,
        }
    }

    /// Total store size, including filtered-out tracks.
    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn visible_len(&self) -> usize {
        self.sorted.len()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.tracks.contains_key(path)
    }

    fn passes_filters(&self, ti: &TrackInfo) -> bool {
        if let Some(filter) = &self.filter {
            if !filter.accepts(ti) {
                return false;
            }
        }
        if let Some(text) = &self.live_filter {
            if !ti.matches(text, MatchFields::ALL) {
                return false;
            }
        }
        true
    }

    fn views_add(&mut self, ti: &TrackRef) {
        self.tree.add_track(ti.clone());
        self.sorted.insert(ti.clone());
        self.shuffle.insert(ti.clone(), &mut self.rng);
    }

    fn views_remove(&mut self, ti: &TrackInfo) {
        self.tree.remove_track(ti);
        self.sorted.remove(ti);
        self.shuffle.remove(&ti.path);
    }

    /// Add a track to the store (duplicate paths are rejected) and to the
    /// views when it passes the filters.
    pub fn add_track(&mut self, ti: TrackRef) -> bool {
        if self.tracks.contains_key(&ti.path) {
            return false;
        }
        let visible = self.passes_filters(&ti);
        self.tracks.insert(
            ti.path.clone(),
            Entry {
                ti: ti.clone(),
                visible,
            },
        );
        if visible {
            self.views_add(&ti);
        }
        true
    }

    /// Remove a track from the store and every view.
    pub fn remove_track(&mut self, ti: &TrackInfo) -> bool {
        let Some(entry) = self.tracks.remove(&ti.path) else {
            return false;
        };
        if entry.visible {
            self.views_remove(&entry.ti);
        }
        if self.cur.as_ref().is_some_and(|c| c.path == ti.path) {
            self.cur = None;
        }
        true
    }

    pub fn clear(&mut self) {
        self.tracks.clear();
        self.tree.clear();
        self.sorted.clear();
        self.shuffle.clear();
        self.cur = None;
    }

    /// Replace one record with a re-read one (cache refresh propagation).
    pub fn replace_track(&mut self, old: &TrackInfo, new: TrackRef) {
        self.remove_track(old);
        self.add_track(new);
    }

    /// Install (or clear) the user-defined tag expression.
    pub fn set_filter(&mut self, filter: Option<TagFilter>) {
        let clear_before = self.filter.is_some() || self.live_filter.is_some();
        self.live_filter = None;
        self.filter = filter;
        self.apply_filters(clear_before);
    }

    /// Install (or clear) the live search filter.
    pub fn set_live_filter(&mut self, text: Option<String>) {
        if text == self.live_filter {
            return;
        }
        // appending to the old string can only shrink the result; anything
        // else may grow it and needs a rebuild
        let clear_before = match (&self.live_filter, &text) {
            (None, _) => false,
            (Some(_), None) => true,
            (Some(old), Some(new)) => !new.contains(old.as_str()),
        };
        self.live_filter = text;
        self.apply_filters(clear_before);
    }

    pub fn live_filter(&self) -> Option<&str> {
        self.live_filter.as_deref()
    }

    fn apply_filters(&mut self, clear_before: bool) {
        if clear_before {
            self.tree.clear();
            self.sorted.clear();
            self.shuffle.clear();
            let mut to_add: Vec<TrackRef> = Vec::new();
            let mut visibles: Vec<(String, bool)> = Vec::new();
            for (path, entry) in &self.tracks {
                let visible = self.passes_filters(&entry.ti);
                visibles.push((path.clone(), visible));
                if visible {
                    to_add.push(entry.ti.clone());
                }
            }
            for (path, visible) in visibles {
                if let Some(entry) = self.tracks.get_mut(&path) {
                    entry.visible = visible;
                }
            }
            for ti in to_add {
                self.views_add(&ti);
            }
        } else {
            let mut to_hide: Vec<TrackRef> = Vec::new();
            for entry in self.tracks.values() {
                if entry.visible && !self.passes_filters(&entry.ti) {
                    to_hide.push(entry.ti.clone());
                }
            }
            for ti in &to_hide {
                self.views_remove(ti);
                if let Some(entry) = self.tracks.get_mut(&ti.path) {
                    entry.visible = false;
                }
            }
        }
        if let Some(cur) = self.cur.clone() {
            let still_visible = self
                .tracks
                .get(&cur.path)
                .is_some_and(|entry| entry.visible);
            if !still_visible {
                self.cur = None;
            }
        }
    }

    /// Change the sorted view's key tuple; O(n log n).
    pub fn set_sort_keys(&mut self, keys: Vec<SortKey>) {
        self.sorted.set_keys(keys);
    }

    /// Assign fresh random keys to the shuffle order.
    pub fn reshuffle(&mut self) {
        self.shuffle.reshuffle(&mut self.rng);
    }

    pub fn shuffle_order(&self) -> impl DoubleEndedIterator<Item = &TrackRef> {
        self.shuffle.iter()
    }

    pub fn current(&self) -> Option<&TrackRef> {
        self.cur.as_ref()
    }

    /// Make `ti` the current track (manual jump from a view selection).
    pub fn set_current(&mut self, ti: TrackRef) -> TrackRef {
        self.cur = Some(ti.clone());
        ti
    }

    /// Advance to the next track per the play flags and return a strong
    /// reference; `None` transitions the caller to stopped.
    pub fn set_next(&mut self, opts: &AdvanceOpts) -> Option<TrackRef> {
        if self.tree.is_empty() {
            return None;
        }
        let cur = self.cur.clone();
        let next = if opts.shuffle {
            let accept = aaa_accept(cur.as_ref(), opts.aaa_mode);
            self.shuffle.next(
                cur.as_ref().map(|ti| ti.path.as_str()),
                accept,
                opts.repeat,
                opts.auto_reshuffle,
                &mut self.rng,
            )
        } else if opts.play_sorted {
            let accept = aaa_accept(cur.as_ref(), opts.aaa_mode);
            self.sorted
                .next(cur.as_deref(), accept, opts.repeat)
        } else {
            self.tree
                .next_track(cur.as_deref(), opts.aaa_mode, opts.repeat)
        };
        if let Some(ti) = &next {
            self.cur = Some(ti.clone());
        }
        next
    }

    /// Mirror of [`Library::set_next`].
    pub fn set_prev(&mut self, opts: &AdvanceOpts) -> Option<TrackRef> {
        if self.tree.is_empty() {
            return None;
        }
        let cur = self.cur.clone();
        let prev = if opts.shuffle {
            let accept = aaa_accept(cur.as_ref(), opts.aaa_mode);
            self.shuffle.prev(
                cur.as_ref().map(|ti| ti.path.as_str()),
                accept,
                opts.repeat,
                opts.auto_reshuffle,
                &mut self.rng,
            )
        } else if opts.play_sorted {
            let accept = aaa_accept(cur.as_ref(), opts.aaa_mode);
            self.sorted
                .prev(cur.as_deref(), accept, opts.repeat)
        } else {
            self.tree
                .prev_track(cur.as_deref(), opts.aaa_mode, opts.repeat)
        };
        if let Some(ti) = &prev {
            self.cur = Some(ti.clone());
        }
        prev
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::DEFAULT_SORT_KEYS;
    use std::sync::Arc;

    fn track(path: &str, tags: &[(&str, &str)]) -> TrackRef {
        let mut ti = TrackInfo::new(path);
        for (k, v) in tags {
            ti.tags.push(*k, *v);
        }
        Arc::new(ti)
    }

    fn lib() -> Library {
        Library::with_seed(true, DEFAULT_SORT_KEYS.to_vec(), 42)
    }

    fn two_artist_lib() -> (Library, Vec<TrackRef>) {
        let mut library = lib();
        let tracks = vec![
            track(
                "/a1.flac",
                &[("artist", "A"), ("album", "X"), ("tracknumber", "1"), ("title", "Alpha One")],
            ),
            track(
                "/a2.flac",
                &[("artist", "A"), ("album", "X"), ("tracknumber", "2"), ("title", "Alpha Two")],
            ),
            track(
                "/b1.flac",
                &[("artist", "B"), ("album", "Y"), ("tracknumber", "1"), ("title", "Beta One")],
            ),
            track(
                "/b2.flac",
                &[("artist", "B"), ("album", "Y"), ("tracknumber", "2"), ("title", "Beta Two")],
            ),
        ];
        for ti in &tracks {
            library.add_track(Arc::clone(ti));
        }
        (library, tracks)
    }

    #[test]
    fn test_track_in_every_view_exactly_once() {
        let (library, tracks) = two_artist_lib();
        assert_eq!(library.len(), 4);
        assert_eq!(library.visible_len(), 4);
        assert_eq!(library.tree.track_count(), 4);
        for ti in &tracks {
            assert!(library.tree.contains(ti));
            assert!(library.sorted.contains(ti));
        }
        assert_eq!(library.shuffle_order().count(), 4);
    }

    #[test]
    fn test_duplicate_paths_rejected() {
        let mut library = lib();
        let ti = track("/dup.flac", &[]);
        assert!(library.add_track(Arc::clone(&ti)));
        assert!(!library.add_track(ti));
        assert_eq!(library.len(), 1);
    }

    #[test]
    fn test_removal_leaves_no_view_behind() {
        let (mut library, tracks) = two_artist_lib();
        assert!(library.remove_track(&tracks[0]));
        assert_eq!(library.len(), 3);
        assert!(!library.tree.contains(&tracks[0]));
        assert!(!library.sorted.contains(&tracks[0]));
        assert_eq!(library.shuffle_order().count(), 3);

        // removing the last track of B removes album and artist
        library.remove_track(&tracks[2]);
        library.remove_track(&tracks[3]);
        assert_eq!(library.tree.artists().len(), 1);
    }

    #[test]
    fn test_tree_mode_advance_and_stop() {
        let (mut library, tracks) = two_artist_lib();
        let opts = AdvanceOpts::default();

        library.set_current(Arc::clone(&tracks[1])); // A/2
        let next = library.set_next(&opts).expect("B/1 follows A/2");
        assert_eq!(next.path, "/b1.flac");

        library.set_current(Arc::clone(&tracks[3])); // B/2
        assert!(library.set_next(&opts).is_none());
        // the failed advance must not clobber the current track
        assert_eq!(library.current().expect("current").path, "/b2.flac");
    }

    #[test]
    fn test_sorted_mode_advance() {
        let (mut library, tracks) = two_artist_lib();
        let opts = AdvanceOpts {
            play_sorted: true,
            ..Default::default()
        };
        library.set_current(Arc::clone(&tracks[0]));
        let next = library.set_next(&opts).expect("next in sorted order");
        assert_eq!(next.path, "/a2.flac");
    }

    #[test]
    fn test_shuffle_mode_covers_all() {
        let (mut library, _tracks) = two_artist_lib();
        let opts = AdvanceOpts {
            shuffle: true,
            ..Default::default()
        };
        let mut seen = Vec::new();
        // no current track: the walk starts at the shuffle order's head
        while let Some(ti) = library.set_next(&opts) {
            seen.push(ti.path.clone());
        }
        seen.sort();
        seen.dedup();
        assert_eq!(seen.len(), 4);
    }

    #[test]
    fn test_shuffle_aaa_album_restricts() {
        let (mut library, tracks) = two_artist_lib();
        let opts = AdvanceOpts {
            shuffle: true,
            aaa_mode: AaaMode::Album,
            ..Default::default()
        };
        library.set_current(Arc::clone(&tracks[0])); // A/X/1
        // only /a2.flac shares the album; the walk may end instead, but can
        // never yield a B track
        if let Some(next) = library.set_next(&opts) {
            assert_eq!(next.path, "/a2.flac");
        }
    }

    #[test]
    fn test_reshuffle_keeps_multiset() {
        let (mut library, _) = two_artist_lib();
        let mut before: Vec<String> =
            library.shuffle_order().map(|t| t.path.clone()).collect();
        library.reshuffle();
        let mut after: Vec<String> = library.shuffle_order().map(|t| t.path.clone()).collect();
        before.sort();
        after.sort();
        assert_eq!(before, after);
    }

    #[test]
    fn test_live_filter_narrows_then_rebuilds() {
        let (mut library, _) = two_artist_lib();
        library.set_live_filter(Some("alpha".to_string()));
        assert_eq!(library.visible_len(), 2);
        assert_eq!(library.len(), 4);

        // narrowing in place: the new text contains the old
        library.set_live_filter(Some("alpha two".to_string()));
        assert_eq!(library.visible_len(), 1);

        // widening rebuilds from the store
        library.set_live_filter(Some("alpha".to_string()));
        assert_eq!(library.visible_len(), 2);
        library.set_live_filter(None);
        assert_eq!(library.visible_len(), 4);
    }

    #[test]
    fn test_tag_filter_composes_with_live_filter() {
        let (mut library, _) = two_artist_lib();
        let filter = TagFilter::parse("artist=A").expect("parse");
        library.set_filter(Some(filter));
        assert_eq!(library.visible_len(), 2);

        library.set_live_filter(Some("two".to_string()));
        assert_eq!(library.visible_len(), 1);

        // both layers must accept: the live filter hits Beta One but the
        // tag filter rejects artist B
        library.set_live_filter(Some("beta one".to_string()));
        assert_eq!(library.visible_len(), 0);

        library.set_filter(None);
        assert_eq!(library.visible_len(), 4);
    }

    #[test]
    fn test_hidden_current_track_is_dropped() {
        let (mut library, tracks) = two_artist_lib();
        library.set_current(Arc::clone(&tracks[3])); // B/2
        library.set_filter(Some(TagFilter::parse("artist=A").expect("parse")));
        assert!(library.current().is_none());
    }

    #[test]
    fn test_set_sort_keys_reorders_sorted_view() {
        let (mut library, _) = two_artist_lib();
        library.set_sort_keys(vec![SortKey::TrackNumber, SortKey::Artist]);
        let order: Vec<&str> = library.sorted.iter().map(|t| t.path.as_str()).collect();
        assert_eq!(order, vec!["/a1.flac", "/b1.flac", "/a2.flac", "/b2.flac"]);
    }
}
