//! Output plugin contract and the bundled cpal and null implementations.
//!
//! The consumer thread owns one [`Output`] and pushes interleaved PCM into
//! it with `write`, pacing itself on `buffer_space`. `drop_buffered`
//! discards anything not yet audible (seek, stop); `close` drains first.
//!
//! # The cpal output
//!
//! cpal is callback-driven, so the plugin bridges the push-style contract
//! with a dedicated audio thread that owns the stream and a lock-free ring
//! the callback drains:
//!
//! - `write` converts PCM to f32, rate-converts when the device cannot run
//!   at the track rate (the playback core never resamples), and pushes into
//!   the ring.
//! - The callback only does atomics and ring pops: volume scaling, a paused
//!   flag that substitutes silence, and a flushing flag that drains the
//!   ring without playing it.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use rubato::{FastFixedIn, PolynomialDegree, Resampler as RubatoResampler};

use super::sf::{ChannelMap, SampleFormat};

/// Errors an output plugin can report.
#[derive(Debug, Clone, thiserror::Error)]
pub enum OutputError {
    #[error("no output plugin named {0}")]
    NoSuchPlugin(String),

    #[error("failed to open audio device: {0}")]
    Open(String),

    #[error("write failed: {0}")]
    Write(String),

    #[error("unsupported sample format: {0}")]
    Unsupported(String),

    #[error("output not open")]
    NotOpen,
}

/// Result of [`Output::set_sample_format`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetSampleFormat {
    /// The device accepted the new format without reopening.
    Kept,
    /// The device was closed and reopened for the new format.
    Reopened,
}

/// Output plugin capability object.
pub trait Output: Send {
    fn name(&self) -> &'static str;

    fn open(&mut self, sf: SampleFormat, map: &ChannelMap) -> Result<(), OutputError>;

    /// Drain and close the device. Safe to call when closed.
    fn close(&mut self);

    /// Write interleaved PCM, returning the bytes accepted (whole frames).
    fn write(&mut self, buf: &[u8]) -> Result<usize, OutputError>;

    /// Writable space in bytes, or `None` while the device is busy.
    fn buffer_space(&mut self) -> Option<usize>;

    fn pause(&mut self);

    fn unpause(&mut self);

    /// Discard buffered, not-yet-played audio (used on seek and stop).
    fn drop_buffered(&mut self);

    /// Switch to a new format, reopening the device only when necessary.
    fn set_sample_format(&mut self, sf: SampleFormat) -> Result<SetSampleFormat, OutputError>;

    /// Volume per channel, 0..=100.
    fn set_volume(&mut self, left: u8, right: u8);

    fn volume(&self) -> (u8, u8);

    /// Externally-changed volume since the last poll, if the backend has a
    /// mixer that can change behind our back.
    fn volume_changed(&mut self) -> Option<(u8, u8)> {
        None
    }

    fn max_volume(&self) -> u8 {
        100
    }
}

/// Instantiate an output plugin by name.
pub fn create(name: &str) -> Result<Box<dyn Output>, OutputError> {
    match name {
        "cpal" | "default" => Ok(Box::new(CpalOutput::new())),
        "null" => Ok(Box::new(NullOutput::new())),
        other => Err(OutputError::NoSuchPlugin(other.to_string())),
    }
}

// ---------------------------------------------------------------------------
// null output
// ---------------------------------------------------------------------------

/// A device-less output that "plays" writes at wall-clock speed against a
/// fixed virtual buffer; used by tests and headless runs.
pub struct NullOutput {
    open: Option<SampleFormat>,
    paused: bool,
    buffered: usize,
    capacity: usize,
    last_drain: std::time::Instant,
    volume: (u8, u8),
}

impl NullOutput {
    pub fn new() -> Self {
        Self {
            open: None,
            paused: false,
            buffered: 0,
            capacity: 64 * 1024,
            last_drain: std::time::Instant::now(),
            volume: (100, 100),
        }
    }

    /// Advance the virtual playback clock, consuming buffered bytes at the
    /// open format's byte rate.
    fn drain(&mut self) {
        let now = std::time::Instant::now();
        if let Some(sf) = self.open {
            if !self.paused {
                let played = (now - self.last_drain).as_secs_f64() * sf.second_size() as f64;
                self.buffered = self.buffered.saturating_sub(played as usize);
            }
        }
        self.last_drain = now;
    }
}

impl Default for NullOutput {
    fn default() -> Self {
        Self::new()
    }
}

impl Output for NullOutput {
    fn name(&self) -> &'static str {
        "null"
    }

    fn open(&mut self, sf: SampleFormat, _map: &ChannelMap) -> Result<(), OutputError> {
        self.open = Some(sf);
        self.buffered = 0;
        self.paused = false;
        self.last_drain = std::time::Instant::now();
        Ok(())
    }

    fn close(&mut self) {
        self.open = None;
        self.buffered = 0;
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize, OutputError> {
        if self.open.is_none() {
            return Err(OutputError::NotOpen);
        }
        self.drain();
        let n = buf.len().min(self.capacity - self.buffered);
        self.buffered += n;
        Ok(n)
    }

    fn buffer_space(&mut self) -> Option<usize> {
        self.open.as_ref()?;
        self.drain();
        Some(self.capacity - self.buffered)
    }

    fn pause(&mut self) {
        self.drain();
        self.paused = true;
    }

    fn unpause(&mut self) {
        self.paused = false;
        self.last_drain = std::time::Instant::now();
    }

    fn drop_buffered(&mut self) {
        self.buffered = 0;
    }

    fn set_sample_format(&mut self, sf: SampleFormat) -> Result<SetSampleFormat, OutputError> {
        self.open = Some(sf);
        Ok(SetSampleFormat::Kept)
    }

    fn set_volume(&mut self, left: u8, right: u8) {
        self.volume = (left.min(100), right.min(100));
    }

    fn volume(&self) -> (u8, u8) {
        self.volume
    }
}

// ---------------------------------------------------------------------------
// cpal output
// ---------------------------------------------------------------------------

/// Shared state between the writer side and the audio callback. Atomics
/// only: the callback runs on a high-priority thread and must never block.
struct CallbackShared {
    vol_left_bits: AtomicU32,
    vol_right_bits: AtomicU32,
    paused: AtomicBool,
    flushing: AtomicBool,
}

impl CallbackShared {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            vol_left_bits: AtomicU32::new(1.0f32.to_bits()),
            vol_right_bits: AtomicU32::new(1.0f32.to_bits()),
            paused: AtomicBool::new(false),
            flushing: AtomicBool::new(false),
        })
    }

    fn volumes(&self) -> (f32, f32) {
        (
            f32::from_bits(self.vol_left_bits.load(Ordering::Relaxed)),
            f32::from_bits(self.vol_right_bits.load(Ordering::Relaxed)),
        )
    }
}

/// Frames per conversion call; small enough that the converter adds less
/// than the device's own buffering latency.
const CONVERT_CHUNK_FRAMES: usize = 512;

/// Rate conversion on the way into the device ring, for devices that
/// cannot run at the track's rate.
///
/// Interleaved input accumulates in `pending` until a converter chunk is
/// complete; the chunk is split into reused per-channel planes and pushed
/// through rubato's fixed-input polynomial resampler with preallocated
/// output planes (no per-chunk allocation, this runs on the consumer
/// thread every write). `finish` hands the sub-chunk tail to a partial
/// process call at end of stream.
struct RateConverter {
    inner: FastFixedIn<f32>,
    channels: usize,
    /// Interleaved samples short of one converter chunk.
    pending: Vec<f32>,
    planar_in: Vec<Vec<f32>>,
    planar_out: Vec<Vec<f32>>,
}

impl RateConverter {
    /// `None` when the rates already match.
    fn new(source_rate: u32, device_rate: u32, channels: u8) -> Option<Self> {
        if source_rate == device_rate {
            return None;
        }
        let channels = channels as usize;
        let ratio = device_rate as f64 / source_rate as f64;
        let inner = FastFixedIn::<f32>::new(
            ratio,
            1.0,
            PolynomialDegree::Cubic,
            CONVERT_CHUNK_FRAMES,
            channels,
        )
        .expect("valid converter parameters");
        let out_frames = inner.output_frames_max();
        tracing::debug!(source_rate, device_rate, channels, "rate conversion enabled");
        Some(Self {
            channels,
            pending: Vec::new(),
            planar_in: vec![vec![0.0; CONVERT_CHUNK_FRAMES]; channels],
            planar_out: vec![vec![0.0; out_frames]; channels],
            inner,
        })
    }

    fn split_pending_chunk(&mut self, frames: usize) {
        for (ch, plane) in self.planar_in.iter_mut().enumerate() {
            plane.clear();
            plane.extend(self.pending.iter().skip(ch).step_by(self.channels).take(frames));
        }
        self.pending.drain(..frames * self.channels);
    }

    /// Feed interleaved samples; whatever full chunks convert is appended
    /// to `out` interleaved at the device rate.
    fn push(&mut self, interleaved: &[f32], out: &mut Vec<f32>) {
        self.pending.extend_from_slice(interleaved);
        loop {
            let frames = self.inner.input_frames_next();
            if self.pending.len() < frames * self.channels {
                break;
            }
            self.split_pending_chunk(frames);
            match self
                .inner
                .process_into_buffer(&self.planar_in, &mut self.planar_out, None)
            {
                Ok((_, frames_out)) => interleave_frames(&self.planar_out, frames_out, out),
                Err(e) => {
                    tracing::warn!("rate conversion error: {e}");
                    return;
                }
            }
        }
    }

    /// Convert the sub-chunk tail at end of stream.
    fn finish(&mut self, out: &mut Vec<f32>) {
        let frames = self.pending.len() / self.channels;
        if frames == 0 {
            return;
        }
        self.split_pending_chunk(frames);
        match self.inner.process_partial_into_buffer(
            Some(self.planar_in.as_slice()),
            &mut self.planar_out,
            None,
        ) {
            Ok((_, frames_out)) => interleave_frames(&self.planar_out, frames_out, out),
            Err(e) => tracing::warn!("rate conversion flush error: {e}"),
        }
    }

    /// Drop pending input and interpolation history (seek, stop).
    fn reset(&mut self) {
        self.pending.clear();
        self.inner.reset();
    }
}

fn interleave_frames(planar: &[Vec<f32>], frames: usize, out: &mut Vec<f32>) {
    for frame in 0..frames {
        for plane in planar {
            out.push(plane[frame]);
        }
    }
}

struct OpenCpal {
    sf: SampleFormat,
    producer: rtrb::Producer<f32>,
    shared: Arc<CallbackShared>,
    converter: Option<RateConverter>,
    /// Device samples produced per source sample.
    ratio: f64,
    shutdown_tx: crossbeam_channel::Sender<()>,
    thread: Option<JoinHandle<()>>,
}

/// cpal-backed output. See the module docs for the thread layout.
pub struct CpalOutput {
    open: Option<OpenCpal>,
    volume: (u8, u8),
}

impl CpalOutput {
    pub fn new() -> Self {
        Self {
            open: None,
            volume: (100, 100),
        }
    }

    fn apply_volume(&mut self) {
        if let Some(ref open) = self.open {
            let (l, r) = self.volume;
            open.shared
                .vol_left_bits
                .store((l as f32 / 100.0).to_bits(), Ordering::Relaxed);
            open.shared
                .vol_right_bits
                .store((r as f32 / 100.0).to_bits(), Ordering::Relaxed);
        }
    }
}

impl Default for CpalOutput {
    fn default() -> Self {
        Self::new()
    }
}

impl Output for CpalOutput {
    fn name(&self) -> &'static str {
        "cpal"
    }

    fn open(&mut self, sf: SampleFormat, _map: &ChannelMap) -> Result<(), OutputError> {
        self.close();
        if sf.bits() != 16 && sf.bits() != 8 {
            return Err(OutputError::Unsupported(format!("{sf}")));
        }

        // One second of device-side audio; the callback drains this.
        let device_rate = default_device_rate()?;
        let ring_capacity = device_rate as usize * sf.channels() as usize;
        let (producer, consumer) = rtrb::RingBuffer::<f32>::new(ring_capacity);
        let shared = CallbackShared::new();
        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded(1);
        let (init_tx, init_rx) = crossbeam_channel::bounded(1);

        let thread_shared = Arc::clone(&shared);
        let channels = sf.channels();
        let thread = std::thread::Builder::new()
            .name("audio-output".to_string())
            .spawn(move || {
                audio_thread_main(
                    channels,
                    device_rate,
                    consumer,
                    thread_shared,
                    init_tx,
                    shutdown_rx,
                );
            })
            .map_err(|e| OutputError::Open(e.to_string()))?;

        match init_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = thread.join();
                return Err(e);
            }
            Err(_) => return Err(OutputError::Open("audio thread died".to_string())),
        }

        let converter = RateConverter::new(sf.rate(), device_rate, sf.channels());
        let ratio = device_rate as f64 / sf.rate() as f64;
        self.open = Some(OpenCpal {
            sf,
            producer,
            shared,
            converter,
            ratio,
            shutdown_tx,
            thread: Some(thread),
        });
        self.apply_volume();
        Ok(())
    }

    fn close(&mut self) {
        if let Some(mut open) = self.open.take() {
            // the converter may still hold a sub-chunk tail; convert it and
            // queue what fits before draining
            if let Some(conv) = open.converter.as_mut() {
                let mut tail = Vec::new();
                conv.finish(&mut tail);
                let deadline = std::time::Instant::now() + Duration::from_millis(500);
                'tail: for sample in tail {
                    while open.producer.push(sample).is_err() {
                        if std::time::Instant::now() > deadline {
                            break 'tail;
                        }
                        std::thread::sleep(Duration::from_millis(1));
                    }
                }
            }
            // drain what is buffered before tearing the stream down
            let deadline = std::time::Instant::now() + Duration::from_secs(2);
            while open.producer.slots() < open.producer.buffer().capacity()
                && std::time::Instant::now() < deadline
            {
                std::thread::sleep(Duration::from_millis(10));
            }
            let _ = open.shutdown_tx.send(());
            if let Some(thread) = open.thread.take() {
                let _ = thread.join();
            }
        }
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize, OutputError> {
        let open = self.open.as_mut().ok_or(OutputError::NotOpen)?;
        let frame = open.sf.frame_size();
        let whole = (buf.len() / frame) * frame;
        if whole == 0 {
            return Ok(0);
        }
        let samples = bytes_to_f32(&buf[..whole], &open.sf);
        let mut staged = Vec::new();
        let device_samples: &[f32] = match open.converter.as_mut() {
            Some(conv) => {
                conv.push(&samples, &mut staged);
                &staged
            }
            None => &samples,
        };
        for &sample in device_samples {
            // the ring was sized from buffer_space; spinning here is rare
            while open.producer.push(sample).is_err() {
                std::thread::sleep(Duration::from_micros(100));
            }
        }
        Ok(whole)
    }

    fn buffer_space(&mut self) -> Option<usize> {
        let open = self.open.as_ref()?;
        let device_slots = open.producer.slots();
        let bytes_per_sample = open.sf.bits() as usize / 8;
        let source_samples = (device_slots as f64 / open.ratio) as usize;
        let frame = open.sf.frame_size();
        Some(source_samples * bytes_per_sample / frame * frame)
    }

    fn pause(&mut self) {
        if let Some(ref open) = self.open {
            open.shared.paused.store(true, Ordering::Relaxed);
        }
    }

    fn unpause(&mut self) {
        if let Some(ref open) = self.open {
            open.shared.paused.store(false, Ordering::Relaxed);
        }
    }

    fn drop_buffered(&mut self) {
        if let Some(ref mut open) = self.open {
            if let Some(conv) = open.converter.as_mut() {
                conv.reset();
            }
            open.shared.flushing.store(true, Ordering::Release);
            // wait for the callback to drain so fresh audio is not flushed
            let deadline = std::time::Instant::now() + Duration::from_millis(100);
            while open.shared.flushing.load(Ordering::Acquire)
                && std::time::Instant::now() < deadline
            {
                std::thread::sleep(Duration::from_millis(2));
            }
        }
    }

    fn set_sample_format(&mut self, sf: SampleFormat) -> Result<SetSampleFormat, OutputError> {
        match self.open {
            Some(ref open) if open.sf == sf => Ok(SetSampleFormat::Kept),
            _ => {
                let map = ChannelMap::default_for(sf.channels());
                self.open(sf, &map)?;
                Ok(SetSampleFormat::Reopened)
            }
        }
    }

    fn set_volume(&mut self, left: u8, right: u8) {
        self.volume = (left.min(100), right.min(100));
        self.apply_volume();
    }

    fn volume(&self) -> (u8, u8) {
        self.volume
    }
}

impl Drop for CpalOutput {
    fn drop(&mut self) {
        self.close();
    }
}

fn default_device_rate() -> Result<u32, OutputError> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| OutputError::Open("no output device found".to_string()))?;
    let config = device
        .default_output_config()
        .map_err(|e| OutputError::Open(e.to_string()))?;
    Ok(config.sample_rate().0)
}

fn bytes_to_f32(buf: &[u8], sf: &SampleFormat) -> Vec<f32> {
    match sf.bits() {
        16 => buf
            .chunks_exact(2)
            .map(|p| i16::from_ne_bytes([p[0], p[1]]) as f32 / 32768.0)
            .collect(),
        8 if sf.is_signed() => buf.iter().map(|&b| (b as i8) as f32 / 128.0).collect(),
        _ => buf.iter().map(|&b| (b as f32 - 128.0) / 128.0).collect(),
    }
}

fn audio_thread_main(
    channels: u8,
    device_rate: u32,
    mut ring: rtrb::Consumer<f32>,
    shared: Arc<CallbackShared>,
    init_tx: crossbeam_channel::Sender<Result<(), OutputError>>,
    shutdown_rx: crossbeam_channel::Receiver<()>,
) {
    let host = cpal::default_host();
    let Some(device) = host.default_output_device() else {
        let _ = init_tx.send(Err(OutputError::Open("no output device found".to_string())));
        return;
    };
    let supported = match device.default_output_config() {
        Ok(c) => c,
        Err(e) => {
            let _ = init_tx.send(Err(OutputError::Open(e.to_string())));
            return;
        }
    };
    let config = cpal::StreamConfig {
        channels: channels as u16,
        sample_rate: cpal::SampleRate(device_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    let cb_shared = Arc::clone(&shared);
    let data_fn = move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
        if cb_shared.flushing.load(Ordering::Acquire) {
            while ring.pop().is_ok() {}
            cb_shared.flushing.store(false, Ordering::Release);
            data.fill(0.0);
            return;
        }
        if cb_shared.paused.load(Ordering::Relaxed) {
            data.fill(0.0);
            return;
        }
        let (vol_l, vol_r) = cb_shared.volumes();
        let ch = channels as usize;
        for (i, sample) in data.iter_mut().enumerate() {
            let vol = if ch >= 2 && i % ch == 1 { vol_r } else { vol_l };
            *sample = match ring.pop() {
                Ok(s) => s * vol,
                Err(_) => 0.0,
            };
        }
    };
    let err_fn = |err| tracing::error!("audio stream error: {err}");

    let stream = match supported.sample_format() {
        cpal::SampleFormat::F32 => device.build_output_stream(&config, data_fn, err_fn, None),
        other => {
            let _ = init_tx.send(Err(OutputError::Unsupported(format!(
                "device sample format {other:?}"
            ))));
            return;
        }
    };
    let stream = match stream {
        Ok(s) => s,
        Err(e) => {
            let _ = init_tx.send(Err(OutputError::Open(e.to_string())));
            return;
        }
    };
    if let Err(e) = stream.play() {
        let _ = init_tx.send(Err(OutputError::Open(e.to_string())));
        return;
    }
    let _ = init_tx.send(Ok(()));

    // keep the stream alive until close
    let _ = shutdown_rx.recv();
    drop(stream);
}
