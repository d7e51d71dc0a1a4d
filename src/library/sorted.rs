//! The flat, sorted view over the library's tracks.
//!
//! Tracks are kept in the order of a configurable sort-key tuple; the path
//! tiebreak in [`track_cmp`] makes the order total, so the sequence is
//! independent of insertion order. Changing the keys re-sorts in
//! O(n log n).

use crate::model::{SortKey, TrackInfo, TrackRef, track_cmp};

pub struct SortedList {
    tracks: Vec<TrackRef>,
    keys: Vec<SortKey>,
}

impl SortedList {
    pub fn new(keys: Vec<SortKey>) -> Self {
        Self {
            tracks: Vec::new(),
            keys,
        }
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn keys(&self) -> &[SortKey] {
        &self.keys
    }

    fn position(&self, ti: &TrackInfo) -> Result<usize, usize> {
        self.tracks
            .binary_search_by(|probe| track_cmp(probe, ti, &self.keys))
    }

    /// Insert in sort order; duplicates (same path) are ignored.
    pub fn insert(&mut self, ti: TrackRef) -> bool {
        match self.position(&ti) {
            Ok(_) => false,
            Err(at) => {
                self.tracks.insert(at, ti);
                true
            }
        }
    }

    pub fn remove(&mut self, ti: &TrackInfo) -> bool {
        match self.position(ti) {
            Ok(at) => {
                self.tracks.remove(at);
                true
            }
            Err(_) => false,
        }
    }

    pub fn clear(&mut self) {
        self.tracks.clear();
    }

    pub fn contains(&self, ti: &TrackInfo) -> bool {
        self.position(ti).is_ok()
    }

    /// Replace the sort keys and re-sort.
    pub fn set_keys(&mut self, keys: Vec<SortKey>) {
        self.keys = keys;
        let keys = &self.keys;
        self.tracks.sort_by(|a, b| track_cmp(a, b, keys));
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &TrackRef> {
        self.tracks.iter()
    }

    /// Next track after `cur` passing `accept`; wraps when `repeat`.
    /// Without a current track the walk starts at the beginning.
    pub fn next(
        &self,
        cur: Option<&TrackInfo>,
        accept: impl Fn(&TrackRef) -> bool,
        repeat: bool,
    ) -> Option<TrackRef> {
        let start = match cur {
            Some(ti) => match self.position(ti) {
                Ok(at) => at + 1,
                Err(at) => at,
            },
            None => 0,
        };
        if let Some(ti) = self.tracks[start.min(self.tracks.len())..]
            .iter()
            .find(|&ti| accept(ti))
        {
            return Some(ti.clone());
        }
        if cur.is_some() && repeat {
            return self.tracks.iter().find(|&ti| accept(ti)).cloned();
        }
        None
    }

    /// Mirror of [`SortedList::next`].
    pub fn prev(
        &self,
        cur: Option<&TrackInfo>,
        accept: impl Fn(&TrackRef) -> bool,
        repeat: bool,
    ) -> Option<TrackRef> {
        let end = match cur {
            Some(ti) => match self.position(ti) {
                Ok(at) | Err(at) => at,
            },
            None => self.tracks.len(),
        };
        if let Some(ti) = self.tracks[..end].iter().rev().find(|&ti| accept(ti)) {
            return Some(ti.clone());
        }
        if cur.is_some() && repeat {
            return self.tracks.iter().rev().find(|&ti| accept(ti)).cloned();
        }
        None
    }
}

impl std::fmt::Debug for SortedList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SortedList")
            .field("len", &self.tracks.len())
            .field("keys", &self.keys)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DEFAULT_SORT_KEYS, TrackInfo};
    use proptest::prelude::*;
    use std::sync::Arc;

    fn track(path: &str, tags: &[(&str, &str)]) -> TrackRef {
        let mut ti = TrackInfo::new(path);
        for (k, v) in tags {
            ti.tags.push(*k, *v);
        }
        Arc::new(ti)
    }

    fn sample_set() -> Vec<TrackRef> {
        vec![
            track("/m/b2.flac", &[("artist", "B"), ("album", "X"), ("tracknumber", "2")]),
            track("/m/a1.flac", &[("artist", "A"), ("album", "Y"), ("tracknumber", "1")]),
            track("/m/b1.flac", &[("artist", "B"), ("album", "X"), ("tracknumber", "1")]),
            track("/m/c.flac", &[("artist", "C")]),
        ]
    }

    #[test]
    fn test_insertion_order_does_not_matter() {
        let mut forward = SortedList::new(DEFAULT_SORT_KEYS.to_vec());
        let mut backward = SortedList::new(DEFAULT_SORT_KEYS.to_vec());
        let set = sample_set();
        for ti in &set {
            forward.insert(Arc::clone(ti));
        }
        for ti in set.iter().rev() {
            backward.insert(Arc::clone(ti));
        }
        let a: Vec<&str> = forward.iter().map(|t| t.path.as_str()).collect();
        let b: Vec<&str> = backward.iter().map(|t| t.path.as_str()).collect();
        assert_eq!(a, b);
        assert_eq!(a, vec!["/m/a1.flac", "/m/b1.flac", "/m/b2.flac", "/m/c.flac"]);
    }

    #[test]
    fn test_duplicate_paths_ignored() {
        let mut list = SortedList::new(DEFAULT_SORT_KEYS.to_vec());
        let ti = track("/m/a.flac", &[]);
        assert!(list.insert(Arc::clone(&ti)));
        assert!(!list.insert(ti));
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn test_set_keys_resorts() {
        let mut list = SortedList::new(DEFAULT_SORT_KEYS.to_vec());
        for ti in sample_set() {
            list.insert(ti);
        }
        list.set_keys(vec![SortKey::FileName]);
        let names: Vec<&str> = list.iter().map(|t| t.path.as_str()).collect();
        assert_eq!(names, vec!["/m/a1.flac", "/m/b1.flac", "/m/b2.flac", "/m/c.flac"]);

        list.set_keys(vec![SortKey::TrackNumber]);
        let first = list.iter().next().expect("non-empty");
        assert_eq!(first.track_number(), Some(1));
        // unknown numbers sort last
        let last = list.iter().next_back().expect("non-empty");
        assert_eq!(last.track_number(), None);
    }

    #[test]
    fn test_next_walks_in_order() {
        let mut list = SortedList::new(DEFAULT_SORT_KEYS.to_vec());
        for ti in sample_set() {
            list.insert(ti);
        }
        let first = list.next(None, |_| true, false).expect("first");
        assert_eq!(first.path, "/m/a1.flac");
        let second = list.next(Some(first.as_ref()), |_| true, false).expect("second");
        assert_eq!(second.path, "/m/b1.flac");
    }

    #[test]
    fn test_next_end_behavior() {
        let mut list = SortedList::new(DEFAULT_SORT_KEYS.to_vec());
        for ti in sample_set() {
            list.insert(ti);
        }
        let last = list.iter().next_back().expect("non-empty").clone();
        assert!(list.next(Some(last.as_ref()), |_| true, false).is_none());
        let wrapped = list.next(Some(last.as_ref()), |_| true, true).expect("wraps");
        assert_eq!(wrapped.path, "/m/a1.flac");
    }

    #[test]
    fn test_prev_walks_backwards() {
        let mut list = SortedList::new(DEFAULT_SORT_KEYS.to_vec());
        for ti in sample_set() {
            list.insert(ti);
        }
        let first = list.iter().next().expect("non-empty").clone();
        assert!(list.prev(Some(first.as_ref()), |_| true, false).is_none());
        let wrapped = list.prev(Some(first.as_ref()), |_| true, true).expect("wraps");
        assert_eq!(wrapped.path, "/m/c.flac");
    }

    proptest! {
        /// Any insertion order of any track set yields the same sequence.
        #[test]
        fn prop_order_independent(mut indices in proptest::collection::vec(0usize..50, 1..50)) {
            indices.sort();
            indices.dedup();
            let tracks: Vec<TrackRef> = indices
                .iter()
                .map(|i| {
                    track(
                        &format!("/gen/{i:02}.flac"),
                        &[("artist", if i % 3 == 0 { "X" } else { "Y" }),
                          ("tracknumber", &format!("{}", i % 7))],
                    )
                })
                .collect();

            let mut sorted_fwd = SortedList::new(DEFAULT_SORT_KEYS.to_vec());
            let mut sorted_rev = SortedList::new(DEFAULT_SORT_KEYS.to_vec());
            for ti in &tracks {
                sorted_fwd.insert(Arc::clone(ti));
            }
            for ti in tracks.iter().rev() {
                sorted_rev.insert(Arc::clone(ti));
            }
            let a: Vec<&str> = sorted_fwd.iter().map(|t| t.path.as_str()).collect();
            let b: Vec<&str> = sorted_rev.iter().map(|t| t.path.as_str()).collect();
            prop_assert_eq!(a, b);
        }
    }
}
