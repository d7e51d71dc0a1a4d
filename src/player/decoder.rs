//! Decoder plugin contract and the bundled symphonia-based implementation.
//!
//! The producer thread owns one [`Decoder`] instance at a time and drives it
//! through open/read/seek/close. `read` fills a caller-supplied byte buffer
//! with interleaved PCM in the decoder's reported [`SampleFormat`];
//! `Ok(0)` signals end of stream and [`DecoderError::WouldBlock`] is a
//! transient condition the producer retries.
//!
//! Supported formats of the bundled decoder: MP3, FLAC, OGG Vorbis, WAV/PCM,
//! AAC. Tags are read through lofty so the same code path serves cache
//! population.

use std::fs::File;
use std::path::Path;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{CODEC_TYPE_NULL, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::units::Time;

use lofty::file::{AudioFile, TaggedFileExt};
use lofty::probe::Probe;
use lofty::tag::ItemKey;

use crate::model::{Tags, TrackInfo, is_remote_path};

use super::sf::{ChannelMap, SampleFormat};

/// Errors a decoder can report.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DecoderError {
    #[error("failed to open: {0}")]
    Open(String),

    #[error("read failed: {0}")]
    Read(String),

    #[error("seeking not supported")]
    SeekNotSupported,

    #[error("unsupported format: {0}")]
    Unsupported(String),

    #[error("failed to read tags: {0}")]
    Tags(String),

    /// Transient; the caller should retry later.
    #[error("input not ready")]
    WouldBlock,

    #[error("decoder not open")]
    NotOpen,
}

impl DecoderError {
    /// True for conditions the producer retries instead of unloading.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::WouldBlock)
    }
}

/// Per-file decoder capability object.
pub trait Decoder: Send {
    /// Source path or URL.
    fn path(&self) -> &str;

    /// Open the source. Must be called before `read`/`seek`.
    fn open(&mut self) -> Result<(), DecoderError>;

    /// Close the source, keeping the instance reusable via `open`.
    fn close(&mut self);

    /// Fill `buf` with interleaved PCM. `Ok(0)` = end of stream.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, DecoderError>;

    /// Seek to an absolute position in seconds.
    fn seek(&mut self, seconds: f64) -> Result<(), DecoderError>;

    /// Read the tag dictionary. Does not require `open`.
    fn read_tags(&mut self) -> Result<Tags, DecoderError>;

    /// Duration in seconds, -1 when unknown (streams).
    fn duration(&self) -> i32;

    /// Bitrate in bits per second, -1 when unknown.
    fn bitrate(&self) -> i32;

    fn codec(&self) -> Option<String>;

    fn codec_profile(&self) -> Option<String>;

    /// The PCM format `read` produces. Valid after `open`.
    fn sample_format(&self) -> SampleFormat;

    fn channel_map(&self) -> ChannelMap;

    /// True for http streams: seeking is disabled and the player prebuffers
    /// the whole ring buffer.
    fn is_remote(&self) -> bool;

    /// Stream metadata (title updates) changed since the last `metadata`
    /// call.
    fn metadata_changed(&mut self) -> bool;

    /// Current stream metadata line, if any.
    fn metadata(&self) -> Option<String>;

    /// True once `read` has returned 0.
    fn eof(&self) -> bool;
}

/// Create a decoder for a path. Local files get the symphonia decoder;
/// remote URLs get one too, which reports `is_remote` and fails to open
/// (no stream transport is bundled).
pub fn create(path: &str) -> Box<dyn Decoder> {
    Box::new(SymphoniaDecoder::new(path))
}

struct OpenState {
    reader: Box<dyn FormatReader>,
    decoder: Box<dyn symphonia::core::codecs::Decoder>,
    track_id: u32,
    sample_buf: Option<SampleBuffer<i16>>,
}

/// Local-file decoder backed by symphonia, emitting interleaved i16
/// native-endian PCM.
pub struct SymphoniaDecoder {
    path: String,
    state: Option<OpenState>,
    sf: SampleFormat,
    duration: i32,
    bitrate: i32,
    codec: Option<String>,
    /// Converted samples not yet handed to the caller.
    pending: Vec<u8>,
    at_eof: bool,
}

impl SymphoniaDecoder {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            state: None,
            sf: SampleFormat::stereo_s16(44100),
            duration: -1,
            bitrate: -1,
            codec: None,
            pending: Vec::new(),
            at_eof: false,
        }
    }

    fn decode_more(&mut self) -> Result<bool, DecoderError> {
        let state = self.state.as_mut().ok_or(DecoderError::NotOpen)?;
        loop {
            let packet = match state.reader.next_packet() {
                Ok(p) => p,
                Err(SymphoniaError::IoError(e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    return Ok(false);
                }
                Err(SymphoniaError::ResetRequired) => {
                    state.decoder.reset();
                    continue;
                }
                Err(e) => return Err(DecoderError::Read(e.to_string())),
            };
            if packet.track_id() != state.track_id {
                continue;
            }
            let decoded = match state.decoder.decode(&packet) {
                Ok(d) => d,
                // skip over a corrupt frame
                Err(SymphoniaError::DecodeError(_)) => continue,
                Err(e) => return Err(DecoderError::Read(e.to_string())),
            };
            if decoded.frames() == 0 {
                continue;
            }
            if state.sample_buf.is_none() {
                let spec = *decoded.spec();
                state.sample_buf = Some(SampleBuffer::new(decoded.capacity() as u64, spec));
            }
            let sample_buf = state.sample_buf.as_mut().expect("allocated above");
            sample_buf.copy_interleaved_ref(decoded);
            self.pending.reserve(sample_buf.len() * 2);
            for sample in sample_buf.samples() {
                self.pending.extend_from_slice(&sample.to_ne_bytes());
            }
            return Ok(true);
        }
    }
}

impl Decoder for SymphoniaDecoder {
    fn path(&self) -> &str {
        &self.path
    }

    fn open(&mut self) -> Result<(), DecoderError> {
        if self.is_remote() {
            return Err(DecoderError::Unsupported(
                "http streams need a stream decoder".into(),
            ));
        }
        let file = File::open(&self.path).map_err(|e| DecoderError::Open(e.to_string()))?;
        let byte_len = file.metadata().ok().map(|m| m.len());
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = Path::new(&self.path).extension() {
            hint.with_extension(&ext.to_string_lossy());
        }

        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| DecoderError::Unsupported(e.to_string()))?;
        let reader = probed.format;

        let track = reader
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| DecoderError::Unsupported("no audio track".into()))?;
        let track_id = track.id;
        let params = track.codec_params.clone();

        let rate = params
            .sample_rate
            .ok_or_else(|| DecoderError::Unsupported("unknown sample rate".into()))?;
        let channels = params.channels.map(|c| c.count() as u8).unwrap_or(2);
        let time_base = params.time_base;

        self.duration = match (params.n_frames, time_base) {
            (Some(frames), Some(tb)) => {
                let t = tb.calc_time(frames);
                (t.seconds as f64 + t.frac).round() as i32
            }
            (Some(frames), None) => (frames as f64 / rate as f64).round() as i32,
            _ => -1,
        };
        self.bitrate = match (byte_len, self.duration) {
            (Some(len), d) if d > 0 => ((len * 8) / d as u64) as i32,
            _ => -1,
        };
        self.codec = codec_name(params.codec);

        let decoder = symphonia::default::get_codecs()
            .make(&params, &DecoderOptions::default())
            .map_err(|e| DecoderError::Unsupported(e.to_string()))?;

        self.sf = SampleFormat::new(rate, channels, 16, true);
        self.pending.clear();
        self.at_eof = false;
        self.state = Some(OpenState {
            reader,
            decoder,
            track_id,
            sample_buf: None,
        });
        Ok(())
    }

    fn close(&mut self) {
        self.state = None;
        self.pending.clear();
        self.at_eof = false;
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, DecoderError> {
        if self.state.is_none() {
            return Err(DecoderError::NotOpen);
        }
        while self.pending.is_empty() {
            if !self.decode_more()? {
                self.at_eof = true;
                return Ok(0);
            }
        }
        let n = buf.len().min(self.pending.len());
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.drain(..n);
        Ok(n)
    }

    fn seek(&mut self, seconds: f64) -> Result<(), DecoderError> {
        let state = self.state.as_mut().ok_or(DecoderError::NotOpen)?;
        state
            .reader
            .seek(
                SeekMode::Accurate,
                SeekTo::Time {
                    time: Time::from(seconds.max(0.0)),
                    track_id: Some(state.track_id),
                },
            )
            .map_err(|e| DecoderError::Read(format!("seek failed: {e}")))?;
        state.decoder.reset();
        self.pending.clear();
        self.at_eof = false;
        Ok(())
    }

    fn read_tags(&mut self) -> Result<Tags, DecoderError> {
        read_tags_from_path(Path::new(&self.path))
    }

    fn duration(&self) -> i32 {
        self.duration
    }

    fn bitrate(&self) -> i32 {
        self.bitrate
    }

    fn codec(&self) -> Option<String> {
        self.codec.clone()
    }

    fn codec_profile(&self) -> Option<String> {
        None
    }

    fn sample_format(&self) -> SampleFormat {
        self.sf
    }

    fn channel_map(&self) -> ChannelMap {
        ChannelMap::default_for(self.sf.channels())
    }

    fn is_remote(&self) -> bool {
        is_remote_path(&self.path)
    }

    fn metadata_changed(&mut self) -> bool {
        false
    }

    fn metadata(&self) -> Option<String> {
        None
    }

    fn eof(&self) -> bool {
        self.at_eof
    }
}

fn codec_name(codec: symphonia::core::codecs::CodecType) -> Option<String> {
    use symphonia::core::codecs::*;
    let name = match codec {
        CODEC_TYPE_MP3 => "mp3",
        CODEC_TYPE_FLAC => "flac",
        CODEC_TYPE_VORBIS => "vorbis",
        CODEC_TYPE_AAC => "aac",
        CODEC_TYPE_OPUS => "opus",
        CODEC_TYPE_PCM_S16LE | CODEC_TYPE_PCM_S16BE | CODEC_TYPE_PCM_S24LE
        | CODEC_TYPE_PCM_S24BE | CODEC_TYPE_PCM_S32LE | CODEC_TYPE_PCM_S32BE
        | CODEC_TYPE_PCM_U8 | CODEC_TYPE_PCM_S8 | CODEC_TYPE_PCM_F32LE
        | CODEC_TYPE_PCM_F64LE => "pcm",
        _ => return None,
    };
    Some(name.to_string())
}

/// (lofty item key, cache tag name) pairs read into the tag dictionary.
const TAG_KEYS: &[(ItemKey, &str)] = &[
    (ItemKey::TrackTitle, "title"),
    (ItemKey::TrackArtist, "artist"),
    (ItemKey::AlbumTitle, "album"),
    (ItemKey::AlbumArtist, "albumartist"),
    (ItemKey::TrackNumber, "tracknumber"),
    (ItemKey::TrackTotal, "totaltracks"),
    (ItemKey::DiscNumber, "discnumber"),
    (ItemKey::DiscTotal, "totaldiscs"),
    (ItemKey::RecordingDate, "date"),
    (ItemKey::Year, "date"),
    (ItemKey::OriginalReleaseDate, "originaldate"),
    (ItemKey::Genre, "genre"),
    (ItemKey::Composer, "composer"),
    (ItemKey::Comment, "comment"),
    (ItemKey::FlagCompilation, "compilation"),
    (ItemKey::AlbumArtistSortOrder, "albumartistsort"),
    (ItemKey::TrackArtistSortOrder, "artistsort"),
    (ItemKey::AlbumTitleSortOrder, "albumsort"),
];

/// Read the tag dictionary of a file through lofty.
pub fn read_tags_from_path(path: &Path) -> Result<Tags, DecoderError> {
    let tagged = Probe::open(path)
        .map_err(|e| DecoderError::Tags(e.to_string()))?
        .read()
        .map_err(|e| DecoderError::Tags(e.to_string()))?;

    let mut tags = Tags::new();
    let Some(tag) = tagged.primary_tag().or_else(|| tagged.first_tag()) else {
        return Ok(tags);
    };
    for (item, name) in TAG_KEYS {
        if tags.get(name).is_some() {
            continue;
        }
        if let Some(value) = tag.get_string(item) {
            if !value.is_empty() {
                tags.push(*name, value);
            }
        }
    }
    Ok(tags)
}

/// Build a complete [`TrackInfo`] for a local file: tags, duration, bitrate
/// and codec. This is the path the cache uses on a miss.
pub fn probe_file(path: &str) -> Result<TrackInfo, DecoderError> {
    let fs_path = Path::new(path);
    let tagged = Probe::open(fs_path)
        .map_err(|e| DecoderError::Open(e.to_string()))?
        .read()
        .map_err(|e| DecoderError::Unsupported(e.to_string()))?;

    let mut info = TrackInfo::new(path);
    info.mtime = std::fs::metadata(fs_path)
        .ok()
        .and_then(|m| m.modified().ok())
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(-1);

    let properties = tagged.properties();
    let secs = properties.duration().as_secs();
    info.duration = if secs > 0 { secs as i32 } else { 0 };
    info.bitrate = properties
        .audio_bitrate()
        .map(|kbps| kbps as i32 * 1000)
        .unwrap_or(-1);
    info.codec = Some(format!("{:?}", tagged.file_type()).to_lowercase());

    if let Some(tag) = tagged.primary_tag().or_else(|| tagged.first_tag()) {
        for (item, name) in TAG_KEYS {
            if info.tags.get(name).is_some() {
                continue;
            }
            if let Some(value) = tag.get_string(item) {
                if !value.is_empty() {
                    info.tags.push(*name, value);
                }
            }
        }
        if let Some(bpm) = tag.get_string(&ItemKey::IntegerBpm) {
            info.bpm = bpm.trim().parse().unwrap_or(-1);
        }
    }
    Ok(info)
}
