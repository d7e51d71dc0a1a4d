//! The on-disk cache image.
//!
//! Layout (native byte order; the file is tied to the host's endianness and
//! pointer width):
//!
//! ```text
//! header:  'C' 'T' 'C'  version  0 0 0 flags
//! entry*:  aligned to the machine word
//!   u32  size          entry size in bytes, including this field
//!   u32  play_count
//!   i64  mtime
//!   i32  duration
//!   i32  bitrate
//!   i32  bpm
//!   52 × 0xff          reserved for future fields
//!   strings            NUL-terminated: filename, codec, codec_profile,
//!                      then (key, value) pairs
//! ```
//!
//! The string count must be odd (three fixed strings plus pairs) and the
//! last byte must be a NUL. Any violation rejects the whole file: the load
//! stops and everything read so far is discarded.

use std::io::Write;
use std::path::Path;

use crate::model::{Tags, TrackInfo};

use super::CacheError;

/// Bumped whenever the entry layout changes.
pub const CACHE_VERSION: u8 = 0x0d;

const FLAG_64_BIT: u8 = 0x01;
const FLAG_BIG_ENDIAN: u8 = 0x02;

const HEADER_SIZE: usize = 8;
const ENTRY_RESERVED_SIZE: usize = 52;
/// Fixed prefix: size + play_count + mtime + duration + bitrate + bpm +
/// reserved.
const ENTRY_FIXED_SIZE: usize = 4 + 4 + 8 + 4 + 4 + 4 + ENTRY_RESERVED_SIZE;

const WORD: usize = std::mem::size_of::<usize>();

fn align(offset: usize) -> usize {
    (offset + WORD - 1) & !(WORD - 1)
}

/// The 8-byte header for this build.
pub fn header() -> [u8; HEADER_SIZE] {
    let mut flags = 0u8;
    if WORD == 8 {
        flags |= FLAG_64_BIT;
    }
    if cfg!(target_endian = "big") {
        flags |= FLAG_BIG_ENDIAN;
    }
    [b'C', b'T', b'C', CACHE_VERSION, 0, 0, 0, flags]
}

fn read_u32(buf: &[u8], at: usize) -> u32 {
    u32::from_ne_bytes(buf[at..at + 4].try_into().expect("4 bytes"))
}

fn read_i32(buf: &[u8], at: usize) -> i32 {
    i32::from_ne_bytes(buf[at..at + 4].try_into().expect("4 bytes"))
}

fn read_i64(buf: &[u8], at: usize) -> i64 {
    i64::from_ne_bytes(buf[at..at + 8].try_into().expect("8 bytes"))
}

fn valid_entry(buf: &[u8]) -> bool {
    // buf spans exactly the strings region here
    if buf.is_empty() || *buf.last().expect("non-empty") != 0 {
        return false;
    }
    let nuls = buf.iter().filter(|&&b| b == 0).count();
    nuls >= 3 && nuls % 2 == 1
}

fn parse_entry(buf: &[u8]) -> TrackInfo {
    let strings = &buf[ENTRY_FIXED_SIZE..];
    let mut parts = strings.split(|&b| b == 0);
    let mut next_str = || {
        parts
            .next()
            .map(|s| String::from_utf8_lossy(s).into_owned())
            .unwrap_or_default()
    };

    let mut info = TrackInfo::new(next_str());
    info.play_count = read_u32(buf, 4);
    info.mtime = read_i64(buf, 8);
    info.duration = read_i32(buf, 16);
    info.bitrate = read_i32(buf, 20);
    info.bpm = read_i32(buf, 24);

    let codec = next_str();
    info.codec = (!codec.is_empty()).then_some(codec);
    let profile = next_str();
    info.codec_profile = (!profile.is_empty()).then_some(profile);

    let mut tags = Tags::new();
    // the final NUL leaves one trailing empty slice, which falls out of the
    // pair iteration naturally
    loop {
        let Some(key) = parts.next() else { break };
        let Some(value) = parts.next() else { break };
        tags.push(
            String::from_utf8_lossy(key).into_owned(),
            String::from_utf8_lossy(value).into_owned(),
        );
    }
    info.tags = tags;
    info
}

/// Parse a whole cache image. Returns `Corrupt` when anything is off; a
/// partial load is never kept.
pub fn parse(buf: &[u8]) -> Result<Vec<TrackInfo>, CacheError> {
    if buf.len() < HEADER_SIZE || buf[..HEADER_SIZE] != header() {
        return Err(CacheError::Corrupt);
    }
    let mut entries = Vec::new();
    let mut offset = HEADER_SIZE;
    while offset < buf.len() {
        let avail = buf.len() - offset;
        if avail < ENTRY_FIXED_SIZE {
            return Err(CacheError::Corrupt);
        }
        let size = read_u32(buf, offset) as usize;
        if size < ENTRY_FIXED_SIZE || size > avail {
            return Err(CacheError::Corrupt);
        }
        let entry = &buf[offset..offset + size];
        if !valid_entry(&entry[ENTRY_FIXED_SIZE..]) {
            return Err(CacheError::Corrupt);
        }
        entries.push(parse_entry(entry));
        offset = align(offset + size);
    }
    Ok(entries)
}

fn entry_size(ti: &TrackInfo) -> usize {
    let mut size = ENTRY_FIXED_SIZE;
    size += ti.path.len() + 1;
    size += ti.codec.as_deref().map_or(0, str::len) + 1;
    size += ti.codec_profile.as_deref().map_or(0, str::len) + 1;
    for (k, v) in ti.tags.iter() {
        size += k.len() + 1 + v.len() + 1;
    }
    size
}

fn write_entry<W: Write>(w: &mut W, ti: &TrackInfo, offset: &mut usize) -> std::io::Result<()> {
    let pad = align(*offset) - *offset;
    if pad > 0 {
        w.write_all(&[0u8; WORD][..pad])?;
    }
    let size = entry_size(ti);

    w.write_all(&(size as u32).to_ne_bytes())?;
    w.write_all(&ti.play_count.to_ne_bytes())?;
    w.write_all(&ti.mtime.to_ne_bytes())?;
    w.write_all(&ti.duration.to_ne_bytes())?;
    w.write_all(&ti.bitrate.to_ne_bytes())?;
    w.write_all(&ti.bpm.to_ne_bytes())?;
    w.write_all(&[0xffu8; ENTRY_RESERVED_SIZE])?;

    let mut write_str = |w: &mut W, s: &str| -> std::io::Result<()> {
        w.write_all(s.as_bytes())?;
        w.write_all(&[0])
    };
    write_str(w, &ti.path)?;
    write_str(w, ti.codec.as_deref().unwrap_or(""))?;
    write_str(w, ti.codec_profile.as_deref().unwrap_or(""))?;
    for (k, v) in ti.tags.iter() {
        write_str(w, k)?;
        write_str(w, v)?;
    }

    *offset = align(*offset) + size;
    Ok(())
}

/// Serialize `entries` to `path` (entries must already be in the order they
/// should land on disk).
pub fn write(path: &Path, entries: &[&TrackInfo]) -> std::io::Result<()> {
    let file = std::fs::File::create(path)?;
    let mut w = std::io::BufWriter::new(file);
    w.write_all(&header())?;
    let mut offset = HEADER_SIZE;
    for ti in entries {
        write_entry(&mut w, ti, &mut offset)?;
    }
    w.flush()?;
    w.into_inner().map_err(|e| e.into_error())?.sync_all()
}
