//! The user playlist: an editable flat list played in user order.
//!
//! Carries its own shuffle keys and current pointer; when the play-library
//! flag is off, track advance runs over this list with the same shuffle /
//! repeat / aaa rules as the library views.
//!
//! Persistence is one UTF-8 path per line. Blank lines and lines starting
//! with `#` are comments. Saves go to `<path>.tmp` followed by an atomic
//! rename.

use std::io::Write;
use std::path::Path;

use rand::SeedableRng;
use rand::rngs::SmallRng;

use crate::error::{Error, Result};
use crate::library::{AdvanceOpts, ShuffleList, aaa_accept};
use crate::model::{TrackInfo, TrackRef};

pub struct Playlist {
    /// User order.
    tracks: Vec<TrackRef>,
    shuffle: ShuffleList,
    cur: Option<TrackRef>,
    rng: SmallRng,
}

impl Playlist {
    pub fn new() -> Self {
        Self::with_rng(SmallRng::from_os_rng())
    }

    /// Deterministic shuffle order for tests.
    pub fn with_seed(seed: u64) -> Self {
        Self::with_rng(SmallRng::seed_from_u64(seed))
    }

    fn with_rng(rng: SmallRng) -> Self {
        Self {
            tracks: Vec::new(),
            shuffle: ShuffleList::new(),
            cur: None,
            rng,
        }
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &TrackRef> {
        self.tracks.iter()
    }

    /// Append a track; duplicate paths are rejected.
    pub fn add(&mut self, ti: TrackRef) -> bool {
        if self.tracks.iter().any(|t| t.path == ti.path) {
            return false;
        }
        self.shuffle.insert(ti.clone(), &mut self.rng);
        self.tracks.push(ti);
        true
    }

    pub fn remove_at(&mut self, index: usize) -> Option<TrackRef> {
        if index >= self.tracks.len() {
            return None;
        }
        let ti = self.tracks.remove(index);
        self.shuffle.remove(&ti.path);
        if self.cur.as_ref().is_some_and(|c| c.path == ti.path) {
            self.cur = None;
        }
        Some(ti)
    }

    pub fn remove(&mut self, ti: &TrackInfo) -> bool {
        let Some(at) = self.tracks.iter().position(|t| t.path == ti.path) else {
            return false;
        };
        self.remove_at(at).is_some()
    }

    /// Move an entry within the user order.
    pub fn reorder(&mut self, from: usize, to: usize) {
        if from < self.tracks.len() && to < self.tracks.len() && from != to {
            let ti = self.tracks.remove(from);
            self.tracks.insert(to, ti);
        }
    }

    pub fn clear(&mut self) {
        self.tracks.clear();
        self.shuffle.clear();
        self.cur = None;
    }

    pub fn current(&self) -> Option<&TrackRef> {
        self.cur.as_ref()
    }

    pub fn set_current(&mut self, ti: TrackRef) -> TrackRef {
        self.cur = Some(ti.clone());
        ti
    }

    pub fn reshuffle(&mut self) {
        self.shuffle.reshuffle(&mut self.rng);
    }

    fn position(&self, ti: &TrackInfo) -> Option<usize> {
        self.tracks.iter().position(|t| t.path == ti.path)
    }

    /// Advance within the playlist; same shape as the library rules, over
    /// the user order (or the shuffle order).
    pub fn set_next(&mut self, opts: &AdvanceOpts) -> Option<TrackRef> {
        if self.tracks.is_empty() {
            return None;
        }
        let cur = self.cur.clone();
        let accept = aaa_accept(cur.as_ref(), opts.aaa_mode);
        let next = if opts.shuffle {
            self.shuffle.next(
                cur.as_ref().map(|ti| ti.path.as_str()),
                accept,
                opts.repeat,
                opts.auto_reshuffle,
                &mut self.rng,
            )
        } else {
            let start = match cur.as_deref().and_then(|ti| self.position(ti)) {
                Some(at) => at + 1,
                None => 0,
            };
            self.tracks[start.min(self.tracks.len())..]
                .iter()
                .find(|&ti| accept(ti))
                .cloned()
                .or_else(|| {
                    (cur.is_some() && opts.repeat)
                        .then(|| self.tracks.iter().find(|&ti| accept(ti)).cloned())
                        .flatten()
                })
        };
        if let Some(ti) = &next {
            self.cur = Some(ti.clone());
        }
        next
    }

    /// Mirror of [`Playlist::set_next`].
    pub fn set_prev(&mut self, opts: &AdvanceOpts) -> Option<TrackRef> {
        if self.tracks.is_empty() {
            return None;
        }
        let cur = self.cur.clone();
        let accept = aaa_accept(cur.as_ref(), opts.aaa_mode);
        let prev = if opts.shuffle {
            self.shuffle.prev(
                cur.as_ref().map(|ti| ti.path.as_str()),
                accept,
                opts.repeat,
                opts.auto_reshuffle,
                &mut self.rng,
            )
        } else {
            let end = match cur.as_deref().and_then(|ti| self.position(ti)) {
                Some(at) => at,
                None => self.tracks.len(),
            };
            self.tracks[..end]
                .iter()
                .rev()
                .find(|&ti| accept(ti))
                .cloned()
                .or_else(|| {
                    (cur.is_some() && opts.repeat)
                        .then(|| self.tracks.iter().rev().find(|&ti| accept(ti)).cloned())
                        .flatten()
                })
        };
        if let Some(ti) = &prev {
            self.cur = Some(ti.clone());
        }
        prev
    }

    /// Load a playlist file, resolving each path to a track through
    /// `resolve` (usually the cache). Unresolvable paths are skipped.
    pub fn load(
        &mut self,
        path: &Path,
        mut resolve: impl FnMut(&str) -> Option<TrackRef>,
    ) -> Result<usize> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::playlist(path, e.to_string()))?;
        let mut added = 0;
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some(ti) = resolve(line) {
                if self.add(ti) {
                    added += 1;
                }
            } else {
                tracing::debug!(target: "playlist", line, "skipping unresolvable entry");
            }
        }
        Ok(added)
    }

    /// Write the playlist to `<path>.tmp`, then atomically rename.
    pub fn save(&self, path: &Path) -> Result<()> {
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = std::path::PathBuf::from(tmp);
        let mut file = std::fs::File::create(&tmp)
            .map_err(|e| Error::playlist(path, e.to_string()))?;
        for ti in &self.tracks {
            writeln!(file, "{}", ti.path).map_err(|e| Error::playlist(path, e.to_string()))?;
        }
        file.sync_all()
            .and_then(|_| std::fs::rename(&tmp, path))
            .map_err(|e| Error::playlist(path, e.to_string()))
    }
}

impl Default for Playlist {
    fn default() -> Self {
        Self::new()
    }
}
