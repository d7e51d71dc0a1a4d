//! Persistent track info store.
//!
//! A process-wide table mapping file paths to [`TrackInfo`] records, backed
//! by a versioned binary snapshot in the config directory. Lookups insert on
//! miss by reading tags through the injected reader (the bundled one probes
//! with lofty); refresh re-stats every entry and reports what changed so the
//! caller can propagate updates through the views.
//!
//! The table sits behind a FIFO-fair mutex: long jobs (refresh) release the
//! lock between entries, and fair handoff guarantees a waiting UI operation
//! gets in without starvation.

mod file;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::FairMutex;

use crate::cue;
use crate::model::{TrackInfo, TrackRef, is_remote_path};
use crate::player::decoder;

/// Number of hash buckets (the table is fixed-size; chains stay short for
/// any realistic library).
pub const HASH_SIZE: usize = 1023;

/// Stable string hash (djb2); must not change between runs, the bucket
/// layout is an invariant the tests pin down.
pub fn hash_path(path: &str) -> u32 {
    let mut hash: u32 = 5381;
    for b in path.bytes() {
        hash = hash.wrapping_mul(33).wrapping_add(b as u32);
    }
    hash
}

fn bucket_of(path: &str) -> usize {
    hash_path(path) as usize % HASH_SIZE
}

/// Cache errors.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// The cache file failed validation. Recoverable: the cache starts
    /// empty and the file is overwritten on the next close.
    #[error("cache file is corrupt")]
    Corrupt,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Outcome of loading the cache file at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStatus {
    /// Entries restored from a valid file.
    Loaded(usize),
    /// No cache file yet; empty cache.
    Missing,
    /// Invalid file; empty cache, file replaced on close.
    Corrupt,
}

/// One entry's outcome from [`Cache::refresh`].
#[derive(Debug, Clone)]
pub enum RefreshEvent {
    /// mtime unchanged; nothing to do.
    Unchanged(TrackRef),
    /// Re-read tags supersede the old record.
    Changed { old: TrackRef, new: TrackRef },
    /// The file is gone.
    Removed(TrackRef),
}

/// Reads a complete record for a path, or `None` when the file cannot be
/// read as audio. Injectable so tests run without real audio files.
pub type TagReader = Box<dyn Fn(&str) -> Option<TrackInfo> + Send + Sync>;

/// Policies from the configuration.
#[derive(Debug, Clone)]
pub struct CacheOptions {
    /// Treat a cached non-stream entry with `duration == 0` as stale and
    /// re-read it on lookup.
    pub rescan_zero_duration: bool,
    /// On miss, produce a bare record instead of reading the file (fast
    /// imports of huge playlists).
    pub skip_track_info: bool,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            rescan_zero_duration: true,
            skip_track_info: false,
        }
    }
}

struct Table {
    buckets: Vec<Vec<TrackRef>>,
    total: usize,
}

impl Table {
    fn new() -> Self {
        Self {
            buckets: (0..HASH_SIZE).map(|_| Vec::new()).collect(),
            total: 0,
        }
    }

    fn lookup(&self, path: &str) -> Option<&TrackRef> {
        self.buckets[bucket_of(path)]
            .iter()
            .find(|ti| ti.path == path)
    }

    fn insert(&mut self, ti: TrackRef) {
        self.buckets[bucket_of(&ti.path)].push(ti);
        self.total += 1;
    }

    fn remove(&mut self, path: &str) -> Option<TrackRef> {
        let bucket = &mut self.buckets[bucket_of(path)];
        let at = bucket.iter().position(|ti| ti.path == path)?;
        self.total -= 1;
        Some(bucket.swap_remove(at))
    }

    /// All entries, sorted by path (the on-disk order).
    fn sorted_entries(&self) -> Vec<TrackRef> {
        let mut entries: Vec<TrackRef> = self
            .buckets
            .iter()
            .flat_map(|b| b.iter().cloned())
            .collect();
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        entries
    }
}

/// The track info store.
pub struct Cache {
    table: FairMutex<Table>,
    cache_path: PathBuf,
    options: CacheOptions,
    reader: TagReader,
}

impl Cache {
    /// Open the cache under `config_dir` with the bundled tag reader:
    /// cue URLs resolve through their sheet, everything else through the
    /// file probe.
    pub fn open(config_dir: &Path, options: CacheOptions) -> (Self, LoadStatus) {
        Self::open_with(
            config_dir,
            options,
            Box::new(|path| {
                if cue::parse_cue_url(path).is_some() {
                    return cue::probe_cue_url(path);
                }
                decoder::probe_file(path).ok()
            }),
        )
    }

    /// Open with an explicit tag reader.
    pub fn open_with(config_dir: &Path, options: CacheOptions, reader: TagReader) -> (Self, LoadStatus) {
        let cache_path = config_dir.join("cache");
        let mut table = Table::new();
        let status = match std::fs::read(&cache_path) {
            Ok(buf) => match file::parse(&buf) {
                Ok(entries) => {
                    let n = entries.len();
                    for ti in entries {
                        table.insert(Arc::new(ti));
                    }
                    LoadStatus::Loaded(n)
                }
                Err(_) => {
                    tracing::warn!(target: "cache", path = %cache_path.display(), "corrupt cache file, starting empty");
                    LoadStatus::Corrupt
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => LoadStatus::Missing,
            Err(e) => {
                tracing::warn!(target: "cache", error = %e, "cannot read cache file, starting empty");
                LoadStatus::Corrupt
            }
        };
        (
            Self {
                table: FairMutex::new(table),
                cache_path,
                options,
                reader,
            },
            status,
        )
    }

    /// Number of cached records.
    pub fn len(&self) -> usize {
        self.table.lock().total
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Look up a record, reading the file on a miss. `force` discards any
    /// cached record first. A cached non-stream record with duration 0 is
    /// treated as stale under the `rescan_zero_duration` policy.
    ///
    /// Returns a new strong reference, or `None` when the file cannot be
    /// read.
    pub fn get_or_load(&self, path: &str, force: bool) -> Option<TrackRef> {
        let mut table = self.table.lock();
        let mut reload = false;

        match table.lookup(path) {
            Some(ti)
                if !force
                    && !(self.options.rescan_zero_duration
                        && !self.options.skip_track_info
                        && ti.duration == 0
                        && !is_remote_path(path)) =>
            {
                return Some(Arc::clone(ti));
            }
            Some(_) => {
                // forced or stale (zero duration); drop and re-read
                table.remove(path);
                reload = true;
            }
            None => {}
        }

        let ti = if self.options.skip_track_info && !reload && !force {
            let mut bare = TrackInfo::new(path);
            bare.duration = 0;
            Some(bare)
        } else {
            (self.reader)(path)
        };
        let ti = Arc::new(ti?);
        table.insert(Arc::clone(&ti));
        Some(ti)
    }

    /// Drop the cache's reference to a record.
    pub fn remove(&self, ti: &TrackInfo) {
        self.table.lock().remove(&ti.path);
    }

    /// Re-stat every cached file and re-read the changed ones.
    ///
    /// The table lock is released between entries, so UI operations
    /// interleave with a long refresh (the fair mutex hands the lock over
    /// in FIFO order). With `force`, entries nobody else references are
    /// simply dropped; they reload on the next lookup.
    pub fn refresh(&self, force: bool) -> Vec<RefreshEvent> {
        let snapshot = self.table.lock().sorted_entries();
        let mut events = Vec::new();

        for ti in snapshot {
            // lock per entry; see the module docs on fairness
            let mut table = self.table.lock();
            if table.lookup(&ti.path).is_none() {
                // removed while we were not looking
                continue;
            }

            if is_remote_path(&ti.path) {
                events.push(RefreshEvent::Unchanged(ti));
                continue;
            }

            // virtual cue tracks stat their sheet; editing the sheet
            // invalidates every track it describes
            let stat_path = cue::parse_cue_url(&ti.path)
                .map(|(sheet, _)| sheet)
                .unwrap_or(ti.path.as_str());
            let stat = std::fs::metadata(stat_path).ok().and_then(|m| {
                m.modified()
                    .ok()
                    .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                    .map(|d| d.as_secs() as i64)
            });

            match stat {
                Some(mtime) if !force && mtime == ti.mtime => {
                    events.push(RefreshEvent::Unchanged(ti));
                }
                Some(_) => {
                    table.remove(&ti.path);
                    // snapshot + table held the only references: nothing to
                    // propagate, the entry reloads on the next lookup
                    if force && Arc::strong_count(&ti) <= 2 {
                        continue;
                    }
                    drop(table);
                    let new = (self.reader)(&ti.path).map(Arc::new);
                    let mut table = self.table.lock();
                    if table.lookup(&ti.path).is_some() {
                        // a lookup raced us and re-inserted the path
                        continue;
                    }
                    match new {
                        Some(new) => {
                            table.insert(Arc::clone(&new));
                            events.push(RefreshEvent::Changed { old: ti, new });
                        }
                        None => events.push(RefreshEvent::Removed(ti)),
                    }
                }
                None => {
                    table.remove(&ti.path);
                    events.push(RefreshEvent::Removed(ti));
                }
            }
        }
        events
    }

    /// Serialize every entry to a temp file and atomically replace the
    /// cache file. The old image stays intact unless the full write
    /// succeeded.
    pub fn close(&self) -> Result<(), CacheError> {
        let entries = self.table.lock().sorted_entries();
        let refs: Vec<&TrackInfo> = entries.iter().map(|ti| ti.as_ref()).collect();
        let tmp = self.cache_path.with_extension("tmp");
        file::write(&tmp, &refs)?;
        std::fs::rename(&tmp, &self.cache_path)?;
        tracing::debug!(target: "cache", entries = refs.len(), "cache written");
        Ok(())
    }

    /// Run `f` for every cached record, releasing the lock between calls.
    pub fn for_each(&self, mut f: impl FnMut(&TrackRef)) {
        for ti in self.table.lock().sorted_entries() {
            f(&ti);
        }
    }

    #[cfg(test)]
    fn bucket_len(&self, index: usize) -> usize {
        self.table.lock().buckets[index].len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Tags;
    use std::collections::HashMap;
    use std::sync::Mutex;

    fn synthetic(path: &str, duration: i32, tags: &[(&str, &str)]) -> TrackInfo {
        let mut ti = TrackInfo::new(path);
        ti.duration = duration;
        ti.mtime = 1000;
        ti.bitrate = 128_000;
        ti.codec = Some("flac".to_string());
        let mut t = Tags::new();
        for (k, v) in tags {
            t.push(*k, *v);
        }
        ti.tags = t;
        ti
    }

    fn reader_for(files: &[TrackInfo]) -> TagReader {
        let map: HashMap<String, TrackInfo> = files
            .iter()
            .map(|ti| (ti.path.clone(), ti.clone()))
            .collect();
        Box::new(move |path| map.get(path).cloned())
    }

    fn four_tracks() -> Vec<TrackInfo> {
        vec![
            synthetic("/a.flac", 120, &[("artist", "A"), ("title", "one")]),
            synthetic("/b.mp3", 200, &[("artist", "B"), ("title", "two")]),
            synthetic("/c.ogg", 95, &[("artist", "C"), ("album", "third")]),
            synthetic("/d.wav", 30, &[("title", "four")]),
        ]
    }

    #[test]
    fn test_cache_round_trip() {
        let dir = tempfile::tempdir().expect("temp dir");
        let originals = four_tracks();

        let (cache, status) = Cache::open_with(
            dir.path(),
            CacheOptions::default(),
            reader_for(&originals),
        );
        assert_eq!(status, LoadStatus::Missing);
        for ti in &originals {
            cache.get_or_load(&ti.path, false).expect("load");
        }
        assert_eq!(cache.len(), 4);
        cache.close().expect("close");

        // reopen with a reader that can no longer see the files: everything
        // must come from disk
        let (cache, status) = Cache::open_with(
            dir.path(),
            CacheOptions::default(),
            Box::new(|_| None),
        );
        assert_eq!(status, LoadStatus::Loaded(4));
        for ti in &originals {
            let cached = cache.get_or_load(&ti.path, false).expect("cached");
            assert_eq!(cached.as_ref(), ti);
        }

        // size bound: fixed prefixes + strings + padding + header
        let len = std::fs::metadata(dir.path().join("cache")).expect("stat").len() as usize;
        let string_bytes: usize = originals
            .iter()
            .map(|ti| {
                ti.path.len() + 1
                    + ti.codec.as_deref().map_or(0, str::len) + 1
                    + 1
                    + ti.tags.iter().map(|(k, v)| k.len() + v.len() + 2).sum::<usize>()
            })
            .sum();
        assert!(len <= 8 + 4 * 80 + string_bytes + 4 * 8);
    }

    #[test]
    fn test_corrupt_cache_recovery() {
        let dir = tempfile::tempdir().expect("temp dir");
        let originals = four_tracks();
        let (cache, _) = Cache::open_with(
            dir.path(),
            CacheOptions::default(),
            reader_for(&originals),
        );
        cache.get_or_load("/a.flac", false).expect("load");
        cache.close().expect("close");

        // flip the version byte
        let path = dir.path().join("cache");
        let mut buf = std::fs::read(&path).expect("read");
        buf[3] = buf[3].wrapping_add(1);
        std::fs::write(&path, &buf).expect("write");

        let (cache, status) = Cache::open_with(
            dir.path(),
            CacheOptions::default(),
            Box::new(|_| None),
        );
        assert_eq!(status, LoadStatus::Corrupt);
        assert!(cache.is_empty());

        // closing replaces the bad file with a valid empty image
        cache.close().expect("close");
        let len = std::fs::metadata(&path).expect("stat").len();
        assert_eq!(len, 8);
    }

    #[test]
    fn test_entries_hash_into_correct_bucket() {
        let dir = tempfile::tempdir().expect("temp dir");
        let originals = four_tracks();
        let (cache, _) = Cache::open_with(
            dir.path(),
            CacheOptions::default(),
            reader_for(&originals),
        );
        for ti in &originals {
            cache.get_or_load(&ti.path, false).expect("load");
            assert!(cache.bucket_len(bucket_of(&ti.path)) >= 1);
        }
        let total: usize = (0..HASH_SIZE).map(|i| cache.bucket_len(i)).sum();
        assert_eq!(total, 4);
    }

    #[test]
    fn test_lookup_returns_same_record() {
        let dir = tempfile::tempdir().expect("temp dir");
        let originals = four_tracks();
        let (cache, _) = Cache::open_with(
            dir.path(),
            CacheOptions::default(),
            reader_for(&originals),
        );
        let first = cache.get_or_load("/a.flac", false).expect("load");
        let second = cache.get_or_load("/a.flac", false).expect("cached");
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_zero_duration_entry_is_reread() {
        let dir = tempfile::tempdir().expect("temp dir");
        let calls = Arc::new(Mutex::new(0u32));
        let counter = Arc::clone(&calls);
        let reader: TagReader = Box::new(move |path| {
            let mut calls = counter.lock().expect("mutex");
            *calls += 1;
            // first read yields a suspicious zero duration, later reads the
            // real one
            let duration = if *calls == 1 { 0 } else { 180 };
            Some(synthetic(path, duration, &[]))
        });
        let (cache, _) = Cache::open_with(dir.path(), CacheOptions::default(), reader);

        let first = cache.get_or_load("/z.flac", false).expect("load");
        assert_eq!(first.duration, 0);
        let second = cache.get_or_load("/z.flac", false).expect("re-read");
        assert_eq!(second.duration, 180);
        assert_eq!(*calls.lock().expect("mutex"), 2);

        // once the duration is sane the record sticks
        let third = cache.get_or_load("/z.flac", false).expect("cached");
        assert!(Arc::ptr_eq(&second, &third));
    }

    #[test]
    fn test_zero_duration_policy_disabled() {
        let dir = tempfile::tempdir().expect("temp dir");
        let reader: TagReader = Box::new(|path| Some(synthetic(path, 0, &[])));
        let options = CacheOptions {
            rescan_zero_duration: false,
            ..Default::default()
        };
        let (cache, _) = Cache::open_with(dir.path(), options, reader);
        let first = cache.get_or_load("/z.flac", false).expect("load");
        let second = cache.get_or_load("/z.flac", false).expect("cached");
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_skip_track_info_produces_bare_records() {
        let dir = tempfile::tempdir().expect("temp dir");
        let reader: TagReader = Box::new(|_| panic!("reader must not run"));
        let options = CacheOptions {
            skip_track_info: true,
            ..Default::default()
        };
        let (cache, _) = Cache::open_with(dir.path(), options, reader);
        let ti = cache.get_or_load("/quick.mp3", false).expect("bare record");
        assert_eq!(ti.duration, 0);
        assert!(ti.tags.is_empty());
    }

    #[test]
    fn test_remove_drops_reference() {
        let dir = tempfile::tempdir().expect("temp dir");
        let originals = four_tracks();
        let (cache, _) = Cache::open_with(
            dir.path(),
            CacheOptions::default(),
            reader_for(&originals),
        );
        let ti = cache.get_or_load("/a.flac", false).expect("load");
        assert_eq!(Arc::strong_count(&ti), 2);
        cache.remove(&ti);
        assert_eq!(Arc::strong_count(&ti), 1);
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_refresh_detects_change_and_removal() {
        let dir = tempfile::tempdir().expect("temp dir");
        // a real file whose stored mtime disagrees with the filesystem
        let real = dir.path().join("song.flac");
        std::fs::write(&real, b"x").expect("create");
        let real_path = real.to_str().expect("utf-8").to_string();

        let changed_path = real_path.clone();
        let reader: TagReader = Box::new(move |path| {
            let mut ti = synthetic(path, 100, &[("artist", "Fresh")]);
            // mtime as the filesystem reports it
            ti.mtime = std::fs::metadata(&changed_path)
                .ok()
                .and_then(|m| m.modified().ok())
                .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                .map(|d| d.as_secs() as i64)
                .unwrap_or(-1);
            Some(ti)
        });
        let (cache, _) = Cache::open_with(dir.path(), CacheOptions::default(), reader);

        // stale mtime forces a re-read; missing file forces a removal
        let stale = Arc::new(synthetic(&real_path, 50, &[("artist", "Stale")]));
        cache.table.lock().insert(Arc::clone(&stale));
        let gone = Arc::new(synthetic("/vanished.mp3", 60, &[]));
        cache.table.lock().insert(Arc::clone(&gone));

        let events = cache.refresh(false);
        assert_eq!(events.len(), 2);

        let mut saw_changed = false;
        let mut saw_removed = false;
        for event in events {
            match event {
                RefreshEvent::Changed { old, new } => {
                    assert_eq!(old.path, real_path);
                    assert_eq!(new.tags.get("artist"), Some("Fresh"));
                    saw_changed = true;
                }
                RefreshEvent::Removed(old) => {
                    assert_eq!(old.path, "/vanished.mp3");
                    saw_removed = true;
                }
                RefreshEvent::Unchanged(_) => panic!("nothing should be unchanged"),
            }
        }
        assert!(saw_changed && saw_removed);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_refresh_unchanged_when_mtime_matches() {
        let dir = tempfile::tempdir().expect("temp dir");
        let real = dir.path().join("song.flac");
        std::fs::write(&real, b"x").expect("create");
        let real_path = real.to_str().expect("utf-8").to_string();
        let mtime = std::fs::metadata(&real)
            .expect("stat")
            .modified()
            .expect("mtime")
            .duration_since(std::time::UNIX_EPOCH)
            .expect("epoch")
            .as_secs() as i64;

        let (cache, _) = Cache::open_with(
            dir.path(),
            CacheOptions::default(),
            Box::new(|_| panic!("unchanged entries are not re-read")),
        );
        let mut ti = synthetic(&real_path, 100, &[]);
        ti.mtime = mtime;
        cache.table.lock().insert(Arc::new(ti));

        let events = cache.refresh(false);
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], RefreshEvent::Unchanged(_)));
    }

    #[test]
    fn test_refresh_stats_the_cue_sheet() {
        let dir = tempfile::tempdir().expect("temp dir");
        let sheet = dir.path().join("album.cue");
        std::fs::write(
            &sheet,
            "FILE \"album.flac\" WAVE\n\
             TRACK 01 AUDIO\nINDEX 01 00:00:00\n\
             TRACK 02 AUDIO\nINDEX 01 02:00:00\n",
        )
        .expect("write sheet");
        let url = cue::cue_url(sheet.to_str().expect("utf-8"), 1);

        let (cache, _) = Cache::open_with(
            dir.path(),
            CacheOptions::default(),
            Box::new(cue::probe_cue_url),
        );
        let ti = cache.get_or_load(&url, false).expect("virtual track");
        assert_eq!(ti.duration, 120);
        assert!(ti.mtime > 0);

        // the sheet's mtime matches the record: nothing to do
        let events = cache.refresh(false);
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], RefreshEvent::Unchanged(_)));

        // a stale stored mtime re-reads the track through the sheet
        cache.remove(&ti);
        let mut stale = (*ti).clone();
        stale.mtime = 1;
        cache.table.lock().insert(Arc::new(stale));
        let events = cache.refresh(false);
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], RefreshEvent::Changed { .. }));
    }

    #[test]
    fn test_forced_refresh_drops_cache_only_entries() {
        let dir = tempfile::tempdir().expect("temp dir");
        let real = dir.path().join("song.flac");
        std::fs::write(&real, b"x").expect("create");
        let real_path = real.to_str().expect("utf-8").to_string();

        let (cache, _) = Cache::open_with(
            dir.path(),
            CacheOptions::default(),
            Box::new(|_| panic!("cache-only entries are dropped, not re-read")),
        );
        cache
            .table
            .lock()
            .insert(Arc::new(synthetic(&real_path, 100, &[])));

        let events = cache.refresh(true);
        assert!(events.is_empty());
        assert!(cache.is_empty());
    }
}
