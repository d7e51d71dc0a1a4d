//! The playback engine: producer and consumer threads around a chunked ring
//! buffer, and the façade that serializes control requests against both.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                    Player façade (any thread)                │
//! │   play / pause / seek / set_file, takes both locks           │
//! └──────────────┬──────────────────────────────┬────────────────┘
//!                ▼                              ▼
//! ┌───────────────────────────┐   ┌───────────────────────────────┐
//! │  Producer thread          │   │  Consumer thread              │
//! │  decoder → ring buffer    │──▶│  ring buffer → output plugin  │
//! └───────────────────────────┘   └───────────────────────────────┘
//! ```
//!
//! # Locking
//!
//! The lock order is global and never violated: `consumer` before
//! `producer`. Façade operations take both; the consumer thread takes the
//! producer lock only to disambiguate end-of-stream from a buffer underrun.
//! `PlayerInfo` sits behind its own leaf mutex acquired last.
//!
//! # Debugging
//!
//! Run with `RUST_LOG=player::commands=debug` to watch control requests and
//! state transitions.

pub mod buffer;
pub mod convert;
pub mod decoder;
pub mod info;
pub mod output;
pub mod queue;
pub mod sf;

pub use buffer::{CHUNK_SIZE, ChunkBuffer, ChunkReader, ChunkWriter};
pub use decoder::{Decoder, DecoderError};
pub use info::{DirtyFlags, PlayerInfo, PlayerStatus};
pub use output::{Output, OutputError, SetSampleFormat};
pub use queue::PlayQueue;
pub use sf::{ChannelMap, SampleFormat};

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};

use crate::model::{Tags, TrackRef};

/// Player-level errors surfaced to callers of the façade.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PlayerError {
    #[error("output error: {0}")]
    Output(#[from] OutputError),

    #[error("decoder error: {0}")]
    Decoder(#[from] DecoderError),

    #[error("audio thread failed to start: {0}")]
    ThreadStart(String),
}

/// Callbacks the surrounding layer supplies to the player.
///
/// `get_next` resolves the next track on automatic advance. It is invoked
/// with both player locks held, so it must not call back into the player.
pub struct PlayerCallbacks {
    pub get_next: Box<dyn Fn() -> Option<TrackRef> + Send + Sync>,
}

/// Factory for per-file decoders, injectable for tests.
pub type DecoderFactory = Box<dyn Fn(&str) -> Box<dyn Decoder> + Send + Sync>;

/// Construction options for [`Player`].
pub struct PlayerOptions {
    /// Output plugin name ("cpal" or "null").
    pub output: String,
    /// Ring buffer size in chunks, clamped to [3, 30].
    pub buffer_chunks: usize,
    /// Promote ≤2-channel, ≤16-bit formats to stereo signed 16-bit.
    pub promote_stereo_16bit: bool,
    /// Continue past the end of the current track.
    pub cont: bool,
    /// Decoder factory; `None` uses the bundled symphonia decoder.
    pub decoder_factory: Option<DecoderFactory>,
}

impl Default for PlayerOptions {
    fn default() -> Self {
        Self {
            output: "cpal".to_string(),
            buffer_chunks: 16,
            promote_stereo_16bit: true,
            cont: true,
            decoder_factory: None,
        }
    }
}

/// Where a seek offset is measured from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekWhence {
    /// Absolute position.
    Set,
    /// Relative to the current position.
    Cur,
}

const IDLE_SLEEP: Duration = Duration::from_millis(50);
const UNDERRUN_SLEEP: Duration = Duration::from_millis(10);
const SPACE_SLEEP: Duration = Duration::from_millis(25);
/// Minimum output space before the consumer bothers writing (~25 ms of CD
/// audio).
const MIN_WRITE: usize = 4096;
/// Local files prebuffer this much audio before playback starts.
const PREBUFFER_MS: usize = 250;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProducerStatus {
    Unloaded,
    Stopped,
    Playing,
    Paused,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConsumerStatus {
    Stopped,
    Playing,
    Paused,
}

struct ProducerState {
    status: ProducerStatus,
    decoder: Option<Box<dyn Decoder>>,
    current: Option<TrackRef>,
    writer: ChunkWriter,
    buffer_sf: SampleFormat,
    /// Staging area for PCM that needs conversion into the buffer format.
    scratch: Vec<u8>,
    last_fill: usize,
    running: bool,
}

struct ConsumerState {
    status: ConsumerStatus,
    output: Box<dyn Output>,
    reader: ChunkReader,
    buffer_sf: SampleFormat,
    /// Bytes written to the output since the last buffer reset.
    pos: usize,
    last_published_pos: u32,
    running: bool,
}

struct Shared {
    /// Lock order: `consumer` strictly before `producer`.
    consumer: Mutex<ConsumerState>,
    producer: Mutex<ProducerState>,
    info: Mutex<PlayerInfo>,
    cont: AtomicBool,
    promote: bool,
    callbacks: PlayerCallbacks,
    decoder_factory: DecoderFactory,
}

/// The playback engine façade.
///
/// Owns the two worker threads; dropping the player joins them.
pub struct Player {
    shared: Arc<Shared>,
    producer_thread: Option<JoinHandle<()>>,
    consumer_thread: Option<JoinHandle<()>>,
}

impl Player {
    /// Start the playback engine: create the output plugin, the ring buffer
    /// and both worker threads.
    pub fn new(callbacks: PlayerCallbacks, options: PlayerOptions) -> Result<Self, PlayerError> {
        let chunks = options.buffer_chunks.clamp(3, 30);
        let (writer, reader) = ChunkBuffer::new(chunks);
        let out = output::create(&options.output)?;
        let sf = SampleFormat::stereo_s16(44100);

        let shared = Arc::new(Shared {
            consumer: Mutex::new(ConsumerState {
                status: ConsumerStatus::Stopped,
                output: out,
                reader,
                buffer_sf: sf,
                pos: 0,
                last_published_pos: 0,
                running: true,
            }),
            producer: Mutex::new(ProducerState {
                status: ProducerStatus::Unloaded,
                decoder: None,
                current: None,
                writer,
                buffer_sf: sf,
                scratch: Vec::new(),
                last_fill: 0,
                running: true,
            }),
            info: Mutex::new(PlayerInfo {
                cont: options.cont,
                vol_max: 100,
                buffer_size: chunks,
                ..Default::default()
            }),
            cont: AtomicBool::new(options.cont),
            promote: options.promote_stereo_16bit,
            callbacks,
            decoder_factory: options
                .decoder_factory
                .unwrap_or_else(|| Box::new(|path| decoder::create(path))),
        });

        let producer_shared = Arc::clone(&shared);
        let producer_thread = std::thread::Builder::new()
            .name("producer".to_string())
            .spawn(move || producer_loop(&producer_shared))
            .map_err(|e| PlayerError::ThreadStart(e.to_string()))?;

        let consumer_shared = Arc::clone(&shared);
        let consumer_thread = std::thread::Builder::new()
            .name("consumer".to_string())
            .spawn(move || consumer_loop(&consumer_shared))
            .map_err(|e| PlayerError::ThreadStart(e.to_string()))?;

        let player = Self {
            shared,
            producer_thread: Some(producer_thread),
            consumer_thread: Some(consumer_thread),
        };
        {
            let (mut c, _p) = player.lock_both();
            publish_status(&player.shared, &mut c);
        }
        Ok(player)
    }

    /// Take both locks in the canonical order.
    fn lock_both(&self) -> (MutexGuard<'_, ConsumerState>, MutexGuard<'_, ProducerState>) {
        let c = self.shared.consumer.lock();
        let p = self.shared.producer.lock();
        (c, p)
    }

    /// Access the observable state. The guard is a leaf lock; drop it before
    /// calling any control operation.
    pub fn info(&self) -> MutexGuard<'_, PlayerInfo> {
        self.shared.info.lock()
    }

    /// Start or restart playback. From nothing loaded this asks the
    /// next-track callback; from playing it restarts the current track.
    pub fn play(&self) {
        tracing::debug!(target: "player::commands", "play");
        let (mut c, mut p) = self.lock_both();
        if p.status == ProducerStatus::Playing
            && p.decoder.as_ref().is_some_and(|d| d.is_remote())
        {
            // restart would be a seek; streams cannot
            return;
        }
        let prebuf = c.status == ConsumerStatus::Stopped;
        producer_play(&self.shared, &mut p, &mut c);
        if p.status == ProducerStatus::Playing {
            consumer_play(&self.shared, &mut c, &mut p);
            if c.status != ConsumerStatus::Playing {
                producer_stop(&mut p, &mut c);
            }
        } else {
            consumer_stop(&mut c);
        }
        publish_status(&self.shared, &mut c);
        if c.status == ConsumerStatus::Playing && prebuf {
            prebuffer(&self.shared, &mut p);
        }
    }

    /// Stop playback, dropping buffered audio.
    pub fn stop(&self) {
        tracing::debug!(target: "player::commands", "stop");
        let (mut c, mut p) = self.lock_both();
        consumer_stop(&mut c);
        producer_stop(&mut p, &mut c);
        publish_status(&self.shared, &mut c);
    }

    /// Toggle pause. Ignored for remote streams.
    pub fn pause(&self) {
        tracing::debug!(target: "player::commands", "pause");
        let (mut c, mut p) = self.lock_both();
        if p.decoder.as_ref().is_some_and(|d| d.is_remote()) {
            return;
        }
        producer_pause(&mut p);
        consumer_pause(&mut c);
        publish_status(&self.shared, &mut c);
    }

    /// Load a track without forcing playback; if something was playing the
    /// new track starts in its place.
    pub fn set_file(&self, ti: TrackRef) {
        tracing::debug!(target: "player::commands", path = %ti.path, "set_file");
        let (mut c, mut p) = self.lock_both();
        producer_set_file(&self.shared, &mut p, &mut c, ti);
        if p.status == ProducerStatus::Unloaded {
            consumer_stop(&mut c);
        } else if matches!(c.status, ConsumerStatus::Playing | ConsumerStatus::Paused) {
            producer_play(&self.shared, &mut p, &mut c);
            if p.status == ProducerStatus::Unloaded {
                consumer_stop(&mut c);
            } else {
                renegotiate_output(&self.shared, &mut c, &mut p);
            }
        }
        publish_status(&self.shared, &mut c);
        if p.status == ProducerStatus::Playing {
            prebuffer(&self.shared, &mut p);
        }
    }

    /// Load a track and start playing it.
    pub fn play_file(&self, ti: TrackRef) {
        tracing::debug!(target: "player::commands", path = %ti.path, "play_file");
        let (mut c, mut p) = self.lock_both();
        producer_set_file(&self.shared, &mut p, &mut c, ti);
        if p.status != ProducerStatus::Unloaded {
            producer_play(&self.shared, &mut p, &mut c);
        }
        if p.status == ProducerStatus::Unloaded {
            consumer_stop(&mut c);
        } else if c.status == ConsumerStatus::Stopped {
            consumer_play(&self.shared, &mut c, &mut p);
            if c.status == ConsumerStatus::Stopped {
                producer_stop(&mut p, &mut c);
            }
        } else {
            renegotiate_output(&self.shared, &mut c, &mut p);
        }
        publish_status(&self.shared, &mut c);
        if p.status == ProducerStatus::Playing {
            prebuffer(&self.shared, &mut p);
        }
    }

    /// Seek within the current track.
    ///
    /// Forward seeks smaller than half a second are rejected to suppress UI
    /// flood; forward positions clamp to `duration - 5`, backward to 0.
    /// Absolute positions outside `[0, duration]` are rejected.
    pub fn seek(&self, offset: f64, whence: SeekWhence) {
        let (mut c, mut p) = self.lock_both();
        if !matches!(c.status, ConsumerStatus::Playing | ConsumerStatus::Paused) {
            return;
        }
        let Some(dec) = p.decoder.as_ref() else { return };
        let duration = dec.duration();
        if duration < 0 {
            tracing::debug!(target: "player::commands", "can't seek: unknown duration");
            return;
        }
        let duration = duration as f64;
        let pos = c.pos as f64 / c.buffer_sf.second_size() as f64;

        let new_pos = match whence {
            SeekWhence::Cur => {
                let mut new_pos = (pos + offset).max(0.0);
                if offset > 0.0 {
                    new_pos = new_pos.min((duration - 5.0).max(0.0));
                    if new_pos - pos < 0.5 {
                        tracing::debug!(target: "player::commands", "seek rejected: < 0.5s forward");
                        return;
                    }
                }
                new_pos
            }
            SeekWhence::Set => {
                if offset < 0.0 || offset > duration {
                    tracing::debug!(target: "player::commands", offset, "seek offset out of range");
                    return;
                }
                offset
            }
        };

        let dec = p.decoder.as_mut().expect("checked above");
        match dec.seek(new_pos) {
            Ok(()) => {
                c.output.drop_buffered();
                reset_buffer(&mut p, &mut c);
                c.pos = (new_pos * c.buffer_sf.second_size() as f64) as usize;
                publish_position(&self.shared, &mut c);
            }
            Err(e) => {
                tracing::debug!(target: "player::commands", error = %e, "decoder seek failed");
            }
        }
    }

    /// Switch to a different output plugin without stopping playback.
    pub fn set_output(&self, name: &str) -> Result<(), PlayerError> {
        tracing::debug!(target: "player::commands", name, "set_output");
        let (mut c, mut p) = self.lock_both();

        // close drains, so drop buffered audio first when paused
        if c.status == ConsumerStatus::Paused {
            c.output.drop_buffered();
        }
        if matches!(c.status, ConsumerStatus::Playing | ConsumerStatus::Paused) {
            c.output.close();
        }

        match output::create(name) {
            Ok(out) => {
                let (l, r) = c.output.volume();
                c.output = out;
                c.output.set_volume(l, r);
            }
            Err(e) => {
                c.status = ConsumerStatus::Stopped;
                producer_stop(&mut p, &mut c);
                publish_error(&self.shared, format!("selecting output '{name}': {e}"));
                return Err(e.into());
            }
        }

        if matches!(c.status, ConsumerStatus::Playing | ConsumerStatus::Paused) {
            let sf = c.buffer_sf;
            let map = ChannelMap::default_for(sf.channels());
            if let Err(e) = c.output.open(sf, &map) {
                c.status = ConsumerStatus::Stopped;
                producer_stop(&mut p, &mut c);
                publish_error(&self.shared, format!("opening audio device: {e}"));
                return Err(e.into());
            }
            if c.status == ConsumerStatus::Paused {
                c.output.pause();
            }
        }
        publish_status(&self.shared, &mut c);
        Ok(())
    }

    /// Resize the ring buffer. Stops playback; `n` clamps to [3, 30].
    pub fn set_buffer_chunks(&self, n: usize) {
        let n = n.clamp(3, 30);
        let (mut c, mut p) = self.lock_both();
        producer_stop(&mut p, &mut c);
        consumer_stop(&mut c);
        let (writer, reader) = ChunkBuffer::new(n);
        p.writer = writer;
        c.reader = reader;
        publish_status(&self.shared, &mut c);
    }

    /// Set whether playback continues past the end of the current track.
    pub fn set_cont(&self, cont: bool) {
        self.shared.cont.store(cont, Ordering::Relaxed);
        let mut info = self.shared.info.lock();
        if info.cont != cont {
            info.cont = cont;
            info.dirty.status = true;
        }
    }

    pub fn toggle_cont(&self) {
        let cont = !self.shared.cont.load(Ordering::Relaxed);
        self.set_cont(cont);
    }

    /// Set per-channel volume (0..=100).
    pub fn set_volume(&self, left: u8, right: u8) {
        let mut c = self.shared.consumer.lock();
        c.output.set_volume(left.min(100), right.min(100));
        let (l, r) = c.output.volume();
        drop(c);
        publish_volume(&self.shared, l, r);
    }

    pub fn volume(&self) -> (u8, u8) {
        self.shared.consumer.lock().output.volume()
    }

    /// Duration and tags for a file, without touching playback state.
    pub fn file_info(&self, path: &str) -> Result<(i32, Tags), PlayerError> {
        let mut dec = (self.shared.decoder_factory)(path);
        if dec.is_remote() {
            return Ok((-1, Tags::new()));
        }
        dec.open()?;
        let duration = dec.duration();
        let tags = dec.read_tags()?;
        dec.close();
        Ok((duration, tags))
    }

    /// Stop both threads and join them.
    pub fn shutdown(&mut self) {
        {
            let (mut c, mut p) = self.lock_both();
            c.running = false;
            p.running = false;
        }
        if let Some(t) = self.consumer_thread.take() {
            let _ = t.join();
        }
        if let Some(t) = self.producer_thread.take() {
            let _ = t.join();
        }
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ---------------------------------------------------------------------------
// status publication
// ---------------------------------------------------------------------------

fn consumer_player_status(status: ConsumerStatus) -> PlayerStatus {
    match status {
        ConsumerStatus::Stopped => PlayerStatus::Stopped,
        ConsumerStatus::Playing => PlayerStatus::Playing,
        ConsumerStatus::Paused => PlayerStatus::Paused,
    }
}

/// The current track changed (or went away). Publication of the new track
/// pointer precedes the dirty bit.
fn publish_file_changed(shared: &Shared, p: &ProducerState) {
    let mut info = shared.info.lock();
    info.current = if p.status == ProducerStatus::Unloaded {
        None
    } else {
        p.current.clone()
    };
    tracing::debug!(
        target: "player::events",
        path = info.current.as_ref().map(|t| t.path.as_str()).unwrap_or(""),
        "file changed"
    );
    info.metadata = None;
    info.dirty.file = true;
}

fn publish_metadata(shared: &Shared, metadata: Option<String>) {
    let mut info = shared.info.lock();
    tracing::debug!(target: "player::events", metadata = metadata.as_deref().unwrap_or(""), "metadata changed");
    info.metadata = metadata;
    info.dirty.metadata = true;
}

fn publish_volume(shared: &Shared, left: u8, right: u8) {
    let mut info = shared.info.lock();
    info.vol_left = left;
    info.vol_right = right;
    info.dirty.volume = true;
}

fn publish_error(shared: &Shared, msg: String) {
    tracing::warn!(target: "player::events", error = %msg, "player error");
    let mut info = shared.info.lock();
    info.error_msg = Some(msg);
    info.dirty.status = true;
}

/// Something big happened (stopped/paused/unpaused/...).
fn publish_status(shared: &Shared, c: &mut ConsumerState) {
    let pos = match c.status {
        ConsumerStatus::Playing | ConsumerStatus::Paused => {
            (c.pos / c.buffer_sf.second_size()) as u32
        }
        ConsumerStatus::Stopped => 0,
    };
    let mut info = shared.info.lock();
    info.status = consumer_player_status(c.status);
    info.position = pos;
    info.cont = shared.cont.load(Ordering::Relaxed);
    info.buffer_fill = c.reader.filled_chunks();
    info.buffer_size = c.reader.chunk_count();
    info.vol_max = c.output.max_volume();
    info.dirty.status = true;
    c.last_published_pos = pos;
}

/// Publish the position when its integer second changes.
fn publish_position(shared: &Shared, c: &mut ConsumerState) {
    let pos = match c.status {
        ConsumerStatus::Playing | ConsumerStatus::Paused => {
            (c.pos / c.buffer_sf.second_size()) as u32
        }
        ConsumerStatus::Stopped => 0,
    };
    if pos != c.last_published_pos {
        c.last_published_pos = pos;
        let mut info = shared.info.lock();
        info.position = pos;
        info.dirty.position = true;
    }
}

fn publish_buffer_fill(shared: &Shared, p: &mut ProducerState) {
    let fill = p.writer.filled_chunks();
    if fill != p.last_fill {
        p.last_fill = fill;
        let mut info = shared.info.lock();
        info.buffer_fill = fill;
        info.dirty.buffer_fill = true;
    }
}

// ---------------------------------------------------------------------------
// producer state transitions (both locks held unless noted)
// ---------------------------------------------------------------------------

fn reset_buffer(p: &mut ProducerState, c: &mut ConsumerState) {
    ChunkBuffer::reset(&mut p.writer, &mut c.reader);
    c.pos = 0;
}

/// Pick the ring-buffer format for a decoder format, applying the stereo
/// 16-bit promotion when configured.
fn set_buffer_sf(shared: &Shared, p: &mut ProducerState, c: &mut ConsumerState) -> SampleFormat {
    let sf = p
        .decoder
        .as_ref()
        .map(|d| d.sample_format())
        .unwrap_or(p.buffer_sf);
    let sf = if shared.promote && sf.channels() <= 2 && sf.bits() <= 16 {
        SampleFormat::stereo_s16(sf.rate())
    } else {
        sf
    };
    p.buffer_sf = sf;
    c.buffer_sf = sf;
    sf
}

fn producer_play(shared: &Shared, p: &mut ProducerState, c: &mut ConsumerState) {
    match p.status {
        ProducerStatus::Unloaded => {
            if let Some(ti) = (shared.callbacks.get_next)() {
                let mut dec = (shared.decoder_factory)(&ti.path);
                match dec.open() {
                    Ok(()) => {
                        p.decoder = Some(dec);
                        p.current = Some(ti);
                        p.status = ProducerStatus::Playing;
                    }
                    Err(e) => {
                        publish_error(shared, format!("opening `{}': {e}", ti.path));
                    }
                }
                publish_file_changed(shared, p);
            }
        }
        ProducerStatus::Playing => {
            let dec = p.decoder.as_mut().expect("playing implies decoder");
            if dec.seek(0.0).is_ok() {
                reset_buffer(p, c);
            }
        }
        ProducerStatus::Stopped => {
            let dec = p.decoder.as_mut().expect("stopped implies decoder");
            match dec.open() {
                Ok(()) => p.status = ProducerStatus::Playing,
                Err(e) => {
                    let path = dec.path().to_string();
                    publish_error(shared, format!("opening `{path}': {e}"));
                    p.decoder = None;
                    p.current = None;
                    p.status = ProducerStatus::Unloaded;
                }
            }
        }
        ProducerStatus::Paused => p.status = ProducerStatus::Playing,
    }
}

fn producer_stop(p: &mut ProducerState, c: &mut ConsumerState) {
    if matches!(p.status, ProducerStatus::Playing | ProducerStatus::Paused) {
        if let Some(dec) = p.decoder.as_mut() {
            dec.close();
        }
        p.status = ProducerStatus::Stopped;
        reset_buffer(p, c);
    }
}

fn producer_unload(p: &mut ProducerState, c: &mut ConsumerState) {
    producer_stop(p, c);
    if p.status == ProducerStatus::Stopped || p.status == ProducerStatus::Unloaded {
        p.decoder = None;
        p.current = None;
        p.status = ProducerStatus::Unloaded;
    }
}

fn producer_pause(p: &mut ProducerState) {
    p.status = match p.status {
        ProducerStatus::Playing => ProducerStatus::Paused,
        ProducerStatus::Paused => ProducerStatus::Playing,
        other => other,
    };
}

fn producer_set_file(shared: &Shared, p: &mut ProducerState, c: &mut ConsumerState, ti: TrackRef) {
    producer_unload(p, c);
    p.decoder = Some((shared.decoder_factory)(&ti.path));
    p.current = Some(ti);
    p.status = ProducerStatus::Stopped;
    publish_file_changed(shared, p);
}

// ---------------------------------------------------------------------------
// consumer state transitions
// ---------------------------------------------------------------------------

fn consumer_play(shared: &Shared, c: &mut ConsumerState, p: &mut ProducerState) {
    match c.status {
        ConsumerStatus::Playing => c.output.drop_buffered(),
        ConsumerStatus::Stopped => {
            let sf = set_buffer_sf(shared, p, c);
            let map = ChannelMap::default_for(sf.channels());
            match c.output.open(sf, &map) {
                Ok(()) => c.status = ConsumerStatus::Playing,
                Err(e) => publish_error(shared, format!("opening audio device: {e}")),
            }
        }
        ConsumerStatus::Paused => {
            c.output.unpause();
            c.status = ConsumerStatus::Playing;
        }
    }
}

/// Close the output, letting it drain what was written (track boundary).
fn consumer_drain_and_stop(c: &mut ConsumerState) {
    if matches!(c.status, ConsumerStatus::Playing | ConsumerStatus::Paused) {
        c.output.close();
        c.status = ConsumerStatus::Stopped;
    }
}

/// Close the output, discarding what was written (hard stop).
fn consumer_stop(c: &mut ConsumerState) {
    if matches!(c.status, ConsumerStatus::Playing | ConsumerStatus::Paused) {
        c.output.drop_buffered();
        c.output.close();
        c.status = ConsumerStatus::Stopped;
    }
}

fn consumer_pause(c: &mut ConsumerState) {
    match c.status {
        ConsumerStatus::Playing => {
            c.output.pause();
            c.status = ConsumerStatus::Paused;
        }
        ConsumerStatus::Paused => {
            c.output.unpause();
            c.status = ConsumerStatus::Playing;
        }
        ConsumerStatus::Stopped => {}
    }
}

/// After a track switch while the device is open: drop stale audio and
/// renegotiate the sample format, reopening the device only if the plugin
/// needs to.
fn renegotiate_output(shared: &Shared, c: &mut ConsumerState, p: &mut ProducerState) {
    // drop before set_sample_format: a reopen would drain otherwise
    c.output.drop_buffered();
    let sf = set_buffer_sf(shared, p, c);
    match c.output.set_sample_format(sf) {
        Ok(SetSampleFormat::Kept) => {
            if c.status == ConsumerStatus::Paused {
                c.output.unpause();
            }
            c.status = ConsumerStatus::Playing;
        }
        Ok(SetSampleFormat::Reopened) => c.status = ConsumerStatus::Playing,
        Err(e) => {
            producer_stop(p, c);
            publish_error(shared, format!("setting sample format: {e}"));
            c.status = ConsumerStatus::Stopped;
        }
    }
}

// ---------------------------------------------------------------------------
// filling the ring buffer
// ---------------------------------------------------------------------------

enum Fill {
    /// One chunk committed.
    Filled,
    /// Ring buffer is full.
    Full,
    Eof,
    WouldBlock,
    /// Fatal decoder error, already published; decoder unloaded by caller.
    Failed,
}

fn fill_one_chunk(shared: &Shared, p: &mut ProducerState) -> Fill {
    let ProducerState {
        decoder,
        writer,
        scratch,
        buffer_sf,
        ..
    } = p;
    let Some(dec) = decoder.as_mut() else {
        return Fill::Failed;
    };

    let region = writer.write_region();
    if region.is_empty() {
        return Fill::Full;
    }

    let src_sf = dec.sample_format();
    let factor = convert::conversion_factor(&src_sf, buffer_sf).unwrap_or(1);
    let read = if factor == 1 {
        dec.read(region)
    } else {
        let src_frame = src_sf.frame_size();
        let want = ((region.len() / factor) / src_frame) * src_frame;
        scratch.resize(want, 0);
        dec.read(&mut scratch[..want])
    };

    match read {
        Ok(0) => {
            // a zero commit seals a partial chunk; the consumer observes EOF
            // once the buffer drains
            writer.commit(0);
            Fill::Eof
        }
        Ok(n) => {
            let committed = if factor == 1 {
                n
            } else {
                debug_assert_eq!(n % src_sf.frame_size(), 0);
                let region = writer.write_region();
                convert::convert(&src_sf, buffer_sf, &scratch[..n], &mut region[..n * factor])
            };
            writer.commit(committed);
            if dec.metadata_changed() {
                let metadata = dec.metadata();
                publish_metadata(shared, metadata);
            }
            Fill::Filled
        }
        Err(e) if e.is_transient() => Fill::WouldBlock,
        Err(e) => {
            let path = dec.path().to_string();
            publish_error(shared, format!("reading {path}: {e}"));
            Fill::Failed
        }
    }
}

/// Fill ~250 ms of audio for local files, or the whole ring buffer for
/// remote streams, before returning control. Both locks held.
fn prebuffer(shared: &Shared, p: &mut ProducerState) {
    debug_assert_eq!(p.status, ProducerStatus::Playing);
    let remote = p.decoder.as_ref().is_some_and(|d| d.is_remote());
    let limit_chunks = if remote {
        p.writer.chunk_count()
    } else {
        (PREBUFFER_MS * p.buffer_sf.second_size() / 1000 / CHUNK_SIZE).max(1)
    };

    loop {
        if p.writer.filled_chunks() >= limit_chunks {
            break;
        }
        match fill_one_chunk(shared, p) {
            Fill::Filled => publish_buffer_fill(shared, p),
            Fill::WouldBlock => continue,
            Fill::Full | Fill::Eof => break,
            Fill::Failed => {
                p.decoder = None;
                p.current = None;
                p.status = ProducerStatus::Unloaded;
                break;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// end of stream
// ---------------------------------------------------------------------------

/// The buffer drained and the decoder reports EOF. Resolve the next track
/// and either continue into it, stop at the boundary, or stop entirely.
/// Called with both locks held.
fn handle_eof(shared: &Shared, c: &mut ConsumerState, p: &mut ProducerState) {
    if p.decoder.as_ref().is_some_and(|d| d.is_remote()) {
        producer_stop(p, c);
        consumer_drain_and_stop(c);
        publish_error(shared, "lost connection".to_string());
        publish_status(shared, c);
        return;
    }

    if let Some(ti) = (shared.callbacks.get_next)() {
        producer_unload(p, c);
        p.decoder = Some((shared.decoder_factory)(&ti.path));
        p.current = Some(ti);
        p.status = ProducerStatus::Stopped;

        if shared.cont.load(Ordering::Relaxed) {
            producer_play(shared, p, c);
            if p.status == ProducerStatus::Unloaded {
                consumer_stop(c);
                publish_file_changed(shared, p);
            } else {
                let sf = set_buffer_sf(shared, p, c);
                match c.output.set_sample_format(sf) {
                    Ok(_) => {
                        publish_file_changed(shared, p);
                        prebuffer(shared, p);
                    }
                    Err(e) => {
                        producer_stop(p, c);
                        c.status = ConsumerStatus::Stopped;
                        publish_error(shared, format!("setting sample format: {e}"));
                        publish_file_changed(shared, p);
                    }
                }
            }
        } else {
            // track loaded but playback stops at the boundary
            consumer_drain_and_stop(c);
            publish_file_changed(shared, p);
        }
    } else {
        producer_unload(p, c);
        consumer_drain_and_stop(c);
        publish_file_changed(shared, p);
    }
    publish_status(shared, c);
}

// ---------------------------------------------------------------------------
// thread loops
// ---------------------------------------------------------------------------

fn producer_loop(shared: &Shared) {
    loop {
        let mut p = shared.producer.lock();
        if !p.running {
            // final cleanup; no buffer reset here (that needs the consumer
            // lock, which would invert the order)
            if let Some(dec) = p.decoder.as_mut() {
                dec.close();
            }
            p.decoder = None;
            p.current = None;
            p.status = ProducerStatus::Unloaded;
            return;
        }

        let eof = p.decoder.as_ref().is_some_and(|d| d.eof());
        if p.status != ProducerStatus::Playing || eof {
            drop(p);
            std::thread::sleep(IDLE_SLEEP);
            continue;
        }

        // chunks to push per lock hold: large batches delay control
        // requests, small ones risk underruns
        const CHUNKS: usize = 1;
        let mut i = 0;
        loop {
            match fill_one_chunk(shared, &mut p) {
                Fill::Full | Fill::Eof => {
                    publish_buffer_fill(shared, &mut p);
                    drop(p);
                    std::thread::sleep(IDLE_SLEEP);
                    break;
                }
                Fill::WouldBlock => {
                    drop(p);
                    std::thread::sleep(IDLE_SLEEP);
                    break;
                }
                Fill::Failed => {
                    p.decoder = None;
                    p.current = None;
                    p.status = ProducerStatus::Unloaded;
                    drop(p);
                    std::thread::sleep(IDLE_SLEEP);
                    break;
                }
                Fill::Filled => {
                    publish_buffer_fill(shared, &mut p);
                    if i == CHUNKS {
                        // release the lock so control requests interleave
                        drop(p);
                        break;
                    }
                    i += 1;
                }
            }
        }
    }
}

fn consumer_loop(shared: &Shared) {
    loop {
        let mut c = shared.consumer.lock();
        if !c.running {
            consumer_stop(&mut c);
            return;
        }

        if matches!(c.status, ConsumerStatus::Paused | ConsumerStatus::Stopped) {
            mixer_check(shared, &mut c);
            drop(c);
            std::thread::sleep(IDLE_SLEEP);
            continue;
        }

        let Some(mut space) = c.output.buffer_space() else {
            // device busy
            publish_position(shared, &mut c);
            drop(c);
            std::thread::sleep(IDLE_SLEEP);
            continue;
        };

        loop {
            if space < MIN_WRITE {
                publish_position(shared, &mut c);
                mixer_check(shared, &mut c);
                drop(c);
                std::thread::sleep(SPACE_SLEEP);
                break;
            }

            if c.reader.read_region().is_empty() {
                let mut p = shared.producer.lock();
                if p.status != ProducerStatus::Playing {
                    drop(p);
                    drop(c);
                    std::thread::sleep(UNDERRUN_SLEEP);
                    break;
                }
                // must recheck: the producer may have filled a chunk before
                // we took its lock
                if c.reader.read_region().is_empty() {
                    if p.decoder.as_ref().is_some_and(|d| d.eof()) {
                        handle_eof(shared, &mut c, &mut p);
                        drop(p);
                        drop(c);
                        break;
                    }
                    // transient underrun
                    drop(p);
                    publish_position(shared, &mut c);
                    drop(c);
                    std::thread::sleep(UNDERRUN_SLEEP);
                    break;
                }
                drop(p);
            }

            let ConsumerState { reader, output, .. } = &mut *c;
            let region = reader.read_region();
            let n = region.len().min(space);
            match output.write(&region[..n]) {
                Ok(written) => {
                    reader.consume(written);
                    c.pos += written;
                    space -= written;
                }
                Err(e) => {
                    tracing::warn!(target: "player::events", error = %e, "output write failed");
                    drop(c);
                    break;
                }
            }
        }
    }
}

/// Poll the output for externally-changed volume (mixer moved by another
/// program).
fn mixer_check(shared: &Shared, c: &mut ConsumerState) {
    if let Some((l, r)) = c.output.volume_changed() {
        publish_volume(shared, l, r);
    }
}
