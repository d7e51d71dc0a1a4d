//! The injected process state: cache, library, playlist, queue and playback
//! options as one value, plus the next-track policy that ties them
//! together.
//!
//! The policy order for automatic advance:
//!
//! 1. a non-empty play queue wins; its head is popped
//! 2. repeat-current returns the playing track again
//! 3. with play-library off, the playlist's rules run over its list
//! 4. otherwise the library advances in shuffle, sorted or tree order
//!
//! Manual jumps ("play the selected track") bypass 1–2 and go through
//! [`Engine::play_selected`].

use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::cache::{Cache, CacheOptions, LoadStatus};
use crate::config::Config;
use crate::library::{AaaMode, AdvanceOpts, Library};
use crate::model::TrackRef;
use crate::player::{PlayerCallbacks, PlayQueue};
use crate::playlist::Playlist;

/// Playback-policy flags, mutated by the UI at any time.
#[derive(Debug, Clone)]
pub struct PlayOpts {
    pub shuffle: bool,
    pub repeat: bool,
    /// Automatic advance hands the current track back out.
    pub repeat_current: bool,
    /// Advance over the library (true) or the playlist (false).
    pub play_library: bool,
    /// Library advance follows the sorted view instead of the tree.
    pub play_sorted: bool,
    pub aaa_mode: AaaMode,
    pub auto_reshuffle: bool,
}

impl Default for PlayOpts {
    fn default() -> Self {
        Self {
            shuffle: false,
            repeat: false,
            repeat_current: false,
            play_library: true,
            play_sorted: false,
            aaa_mode: AaaMode::All,
            auto_reshuffle: true,
        }
    }
}

impl PlayOpts {
    fn advance(&self) -> AdvanceOpts {
        AdvanceOpts {
            shuffle: self.shuffle,
            repeat: self.repeat,
            play_sorted: self.play_sorted,
            aaa_mode: self.aaa_mode,
            auto_reshuffle: self.auto_reshuffle,
        }
    }
}

/// Everything the core shares between the UI thread, the player callbacks
/// and the worker jobs. Tests instantiate their own.
pub struct Engine {
    pub cache: Arc<Cache>,
    pub library: Arc<Mutex<Library>>,
    pub playlist: Arc<Mutex<Playlist>>,
    pub queue: Arc<Mutex<PlayQueue>>,
    pub opts: Arc<Mutex<PlayOpts>>,
}

impl Engine {
    /// Build an engine from the configuration, loading the cache file.
    pub fn from_config(config: &Config, config_dir: &Path) -> (Self, LoadStatus) {
        let cache_options = CacheOptions {
            rescan_zero_duration: config.library.rescan_zero_duration,
            skip_track_info: config.library.skip_track_info,
        };
        let (cache, status) = Cache::open(config_dir, cache_options);
        let library = Library::new(config.library.smart_artist_sort, config.sort_keys());
        let engine = Self {
            cache: Arc::new(cache),
            library: Arc::new(Mutex::new(library)),
            playlist: Arc::new(Mutex::new(Playlist::new())),
            queue: Arc::new(Mutex::new(PlayQueue::new())),
            opts: Arc::new(Mutex::new(config.play_opts())),
        };
        (engine, status)
    }

    /// An engine with empty state for tests; the shuffle order is seeded.
    pub fn for_tests(config_dir: &Path, seed: u64) -> Self {
        let (cache, _) = Cache::open_with(
            config_dir,
            CacheOptions::default(),
            Box::new(|_| None),
        );
        Self {
            cache: Arc::new(cache),
            library: Arc::new(Mutex::new(Library::with_seed(
                true,
                crate::model::DEFAULT_SORT_KEYS.to_vec(),
                seed,
            ))),
            playlist: Arc::new(Mutex::new(Playlist::with_seed(seed))),
            queue: Arc::new(Mutex::new(PlayQueue::new())),
            opts: Arc::new(Mutex::new(PlayOpts::default())),
        }
    }

    /// Resolve the next track on automatic advance.
    pub fn next_track(&self) -> Option<TrackRef> {
        if let Some(ti) = self.queue.lock().pop_head() {
            return Some(ti);
        }
        let opts = self.opts.lock().clone();
        if opts.repeat_current {
            let cur = if opts.play_library {
                self.library.lock().current().cloned()
            } else {
                self.playlist.lock().current().cloned()
            };
            if cur.is_some() {
                return cur;
            }
        }
        if opts.play_library {
            self.library.lock().set_next(&opts.advance())
        } else {
            self.playlist.lock().set_next(&opts.advance())
        }
    }

    /// Mirror of [`Engine::next_track`]; the queue and repeat-current do
    /// not apply when stepping backwards.
    pub fn prev_track(&self) -> Option<TrackRef> {
        let opts = self.opts.lock().clone();
        if opts.play_library {
            self.library.lock().set_prev(&opts.advance())
        } else {
            self.playlist.lock().set_prev(&opts.advance())
        }
    }

    /// Manual jump: make `ti` the current track of the active view and
    /// return it (bypasses the queue and repeat-current).
    pub fn play_selected(&self, ti: TrackRef) -> TrackRef {
        let opts = self.opts.lock().clone();
        if opts.play_library {
            self.library.lock().set_current(ti)
        } else {
            self.playlist.lock().set_current(ti)
        }
    }

    /// Package the policy as player callbacks.
    ///
    /// The closure runs with both player locks held, so it only touches the
    /// engine's own locks (which are leaves relative to the player's).
    pub fn callbacks(engine: &Arc<Self>) -> PlayerCallbacks {
        let engine = Arc::clone(engine);
        PlayerCallbacks {
            get_next: Box::new(move || engine.next_track()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TrackInfo;
    use std::sync::Arc;

    fn track(path: &str, artist: &str, num: &str) -> TrackRef {
        let mut ti = TrackInfo::new(path);
        ti.tags.push("artist", artist);
        ti.tags.push("album", artist.to_string() + " album");
        ti.tags.push("tracknumber", num);
        Arc::new(ti)
    }

    /// Artists A < B, one album each, two tracks each.
    fn engine_with_library(dir: &Path) -> (Engine, Vec<TrackRef>) {
        let engine = Engine::for_tests(dir, 42);
        let tracks = vec![
            track("/a1.flac", "A", "1"),
            track("/a2.flac", "A", "2"),
            track("/b1.flac", "B", "1"),
            track("/b2.flac", "B", "2"),
        ];
        {
            let mut library = engine.library.lock();
            for ti in &tracks {
                library.add_track(Arc::clone(ti));
            }
        }
        (engine, tracks)
    }

    #[test]
    fn test_tree_mode_advance_with_empty_queue() {
        let dir = tempfile::tempdir().expect("temp dir");
        let (engine, tracks) = engine_with_library(dir.path());

        engine.library.lock().set_current(Arc::clone(&tracks[1])); // A/2
        let next = engine.next_track().expect("B/1 follows A/2");
        assert_eq!(next.path, "/b1.flac");

        engine.library.lock().set_current(Arc::clone(&tracks[3])); // B/2
        assert!(engine.next_track().is_none());
    }

    #[test]
    fn test_queue_overrides_automatic_advance() {
        let dir = tempfile::tempdir().expect("temp dir");
        let (engine, tracks) = engine_with_library(dir.path());

        let queued = track("/x.flac", "X", "1");
        engine.queue.lock().append(Arc::clone(&queued));
        engine.library.lock().set_current(Arc::clone(&tracks[0])); // A/1

        let first = engine.next_track().expect("queued track wins");
        assert_eq!(first.path, "/x.flac");
        assert!(engine.queue.lock().is_empty());

        // the queue drained; advance resumes from the library position
        let second = engine.next_track().expect("A/2 follows A/1");
        assert_eq!(second.path, "/a2.flac");
    }

    #[test]
    fn test_repeat_current_returns_same_track() {
        let dir = tempfile::tempdir().expect("temp dir");
        let (engine, tracks) = engine_with_library(dir.path());
        engine.library.lock().set_current(Arc::clone(&tracks[0]));
        engine.opts.lock().repeat_current = true;

        let again = engine.next_track().expect("same track");
        assert_eq!(again.path, "/a1.flac");
        let again = engine.next_track().expect("still the same");
        assert_eq!(again.path, "/a1.flac");

        // the queue still wins over repeat-current
        engine.queue.lock().append(track("/x.flac", "X", "1"));
        assert_eq!(engine.next_track().expect("queued").path, "/x.flac");
    }

    #[test]
    fn test_playlist_mode_advances_over_playlist() {
        let dir = tempfile::tempdir().expect("temp dir");
        let (engine, _tracks) = engine_with_library(dir.path());
        engine.opts.lock().play_library = false;
        {
            let mut playlist = engine.playlist.lock();
            playlist.add(track("/p1.mp3", "P", "1"));
            playlist.add(track("/p2.mp3", "P", "2"));
        }
        assert_eq!(engine.next_track().expect("p1").path, "/p1.mp3");
        assert_eq!(engine.next_track().expect("p2").path, "/p2.mp3");
        assert!(engine.next_track().is_none());
    }

    #[test]
    fn test_prev_ignores_queue() {
        let dir = tempfile::tempdir().expect("temp dir");
        let (engine, tracks) = engine_with_library(dir.path());
        engine.queue.lock().append(track("/x.flac", "X", "1"));
        engine.library.lock().set_current(Arc::clone(&tracks[1])); // A/2
        let prev = engine.prev_track().expect("A/1");
        assert_eq!(prev.path, "/a1.flac");
        assert_eq!(engine.queue.lock().len(), 1);
    }

    #[test]
    fn test_callbacks_drive_the_policy() {
        let dir = tempfile::tempdir().expect("temp dir");
        let (engine, tracks) = engine_with_library(dir.path());
        let engine = Arc::new(engine);
        let callbacks = Engine::callbacks(&engine);
        engine.library.lock().set_current(Arc::clone(&tracks[0]));
        let next = (callbacks.get_next)().expect("A/2");
        assert_eq!(next.path, "/a2.flac");
    }
}
