//! Shared test fixtures.

use crate::model::{Tags, TrackInfo, TrackRef, is_remote_path};
use crate::player::decoder::{Decoder, DecoderError};
use crate::player::sf::{ChannelMap, SampleFormat};
use std::sync::Arc;

/// Build a track info with the given tag pairs.
pub fn track_with_tags(path: &str, tags: &[(&str, &str)]) -> TrackRef {
    let mut info = TrackInfo::new(path);
    for (k, v) in tags {
        info.tags.push(*k, *v);
    }
    Arc::new(info)
}

/// A deterministic decoder producing silence at CD stereo format.
///
/// Duration is exact: `read` hands out zeros until the configured number of
/// bytes has been produced, then reports end of stream.
pub struct FakeDecoder {
    path: String,
    sf: SampleFormat,
    duration_secs: i32,
    total_bytes: usize,
    produced: usize,
    open: bool,
    at_eof: bool,
    tags: Tags,
}

impl FakeDecoder {
    pub fn new(path: impl Into<String>, duration_secs: i32) -> Self {
        let sf = SampleFormat::stereo_s16(44100);
        Self {
            path: path.into(),
            sf,
            duration_secs,
            total_bytes: duration_secs.max(0) as usize * sf.second_size(),
            produced: 0,
            open: false,
            at_eof: false,
            tags: Tags::new(),
        }
    }

    /// Override the audio length in milliseconds (duration stays whole
    /// seconds, as decoders report it).
    pub fn with_duration_ms(mut self, ms: usize) -> Self {
        self.total_bytes = ms * self.sf.second_size() / 1000;
        self.duration_secs = (ms / 1000) as i32;
        self
    }

    pub fn with_tags(mut self, tags: &[(&str, &str)]) -> Self {
        let mut t = Tags::new();
        for (k, v) in tags {
            t.push(*k, *v);
        }
        self.tags = t;
        self
    }
}

impl Decoder for FakeDecoder {
    fn path(&self) -> &str {
        &self.path
    }

    fn open(&mut self) -> Result<(), DecoderError> {
        self.open = true;
        self.produced = 0;
        self.at_eof = false;
        Ok(())
    }

    fn close(&mut self) {
        self.open = false;
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, DecoderError> {
        if !self.open {
            return Err(DecoderError::NotOpen);
        }
        let remaining = self.total_bytes.saturating_sub(self.produced);
        let n = buf.len().min(remaining);
        if n == 0 {
            self.at_eof = true;
            return Ok(0);
        }
        buf[..n].fill(0);
        self.produced += n;
        Ok(n)
    }

    fn seek(&mut self, seconds: f64) -> Result<(), DecoderError> {
        if !self.open {
            return Err(DecoderError::NotOpen);
        }
        self.produced = (seconds * self.sf.second_size() as f64) as usize;
        self.at_eof = false;
        Ok(())
    }

    fn read_tags(&mut self) -> Result<Tags, DecoderError> {
        Ok(self.tags.clone())
    }

    fn duration(&self) -> i32 {
        self.duration_secs
    }

    fn bitrate(&self) -> i32 {
        self.sf.second_size() as i32 * 8
    }

    fn codec(&self) -> Option<String> {
        Some("fake".to_string())
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
