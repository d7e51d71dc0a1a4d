//! Shuffle order over the library's visible tracks.
//!
//! Every track gets a random u64 key when it enters the view; the shuffle
//! order is the ascending order of those keys. Reshuffling reassigns every
//! key. Walks skip tracks the caller's filter rejects (the aaa-mode
//! restriction) and wrap only when repeat is on, reshuffling first when
//! auto-reshuffle is enabled.

use std::collections::{BTreeMap, HashMap};

use rand::Rng;
use rand::rngs::SmallRng;

use crate::model::TrackRef;

/// (random key, path): the path disambiguates the astronomically unlikely
/// key collision and keeps the order total.
type OrderKey = (u64, String);

#[derive(Default)]
pub struct ShuffleList {
    order: BTreeMap<OrderKey, TrackRef>,
    keys: HashMap<String, u64>,
}

impl ShuffleList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn insert(&mut self, ti: TrackRef, rng: &mut SmallRng) {
        if self.keys.contains_key(&ti.path) {
            return;
        }
        let key = rng.random::<u64>();
        self.keys.insert(ti.path.clone(), key);
        self.order.insert((key, ti.path.clone()), ti);
    }

    pub fn remove(&mut self, path: &str) -> bool {
        let Some(key) = self.keys.remove(path) else {
            return false;
        };
        self.order.remove(&(key, path.to_string())).is_some()
    }

    pub fn clear(&mut self) {
        self.order.clear();
        self.keys.clear();
    }

    /// Reassign every random key.
    pub fn reshuffle(&mut self, rng: &mut SmallRng) {
        let tracks: Vec<TrackRef> = self.order.values().cloned().collect();
        self.clear();
        for ti in tracks {
            self.insert(ti, rng);
        }
    }

    /// Tracks in shuffle order.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &TrackRef> {
        self.order.values()
    }

    fn order_key(&self, path: &str) -> Option<OrderKey> {
        self.keys.get(path).map(|&k| (k, path.to_string()))
    }

    /// The next track after `cur` in shuffle order that passes `accept`.
    /// At the end of the order: wrap when `repeat`, reshuffling first when
    /// `auto_reshuffle`.
    pub fn next(
        &mut self,
        cur: Option<&str>,
        accept: impl Fn(&TrackRef) -> bool,
        repeat: bool,
        auto_reshuffle: bool,
        rng: &mut SmallRng,
    ) -> Option<TrackRef> {
        let start = cur.and_then(|path| self.order_key(path));
        if let Some(start) = start {
            use std::ops::Bound::{Excluded, Unbounded};
            if let Some(ti) = self
                .order
                .range((Excluded(start), Unbounded))
                .map(|(_, ti)| ti)
                .find(|&ti| accept(ti))
            {
                return Some(ti.clone());
            }
            if !repeat {
                return None;
            }
            if auto_reshuffle {
                self.reshuffle(rng);
            }
        }
        self.order.values().find(|&ti| accept(ti)).cloned()
    }

    /// Mirror of [`ShuffleList::next`].
    pub fn prev(
        &mut self,
        cur: Option<&str>,
        accept: impl Fn(&TrackRef) -> bool,
        repeat: bool,
        auto_reshuffle: bool,
        rng: &mut SmallRng,
    ) -> Option<TrackRef> {
        let start = cur.and_then(|path| self.order_key(path));
        if let Some(start) = start {
            if let Some(ti) = self
                .order
                .range(..start)
                .rev()
                .map(|(_, ti)| ti)
                .find(|&ti| accept(ti))
            {
                return Some(ti.clone());
            }
            if !repeat {
                return None;
            }
            if auto_reshuffle {
                self.reshuffle(rng);
            }
        }
        self.order.values().rev().find(|&ti| accept(ti)).cloned()
    }
}
