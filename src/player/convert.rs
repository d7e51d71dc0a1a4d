//! PCM conversion between the decoder format and the buffer format.
//!
//! Only the conversions the stereo/16-bit promotion can require exist here:
//! widening 8-bit samples to signed 16-bit and duplicating mono into stereo.
//! Rates never change (resampling is the output plugin's concern) and
//! formats above stereo/16-bit pass through unconverted.

use super::sf::SampleFormat;

/// How many destination bytes one source byte produces, or `None` when the
/// pair is not a supported conversion.
///
/// Identity returns `Some(1)`.
pub fn conversion_factor(src: &SampleFormat, dst: &SampleFormat) -> Option<usize> {
    if src == dst {
        return Some(1);
    }
    if src.rate() != dst.rate() || dst.bits() != 16 || !dst.is_signed() {
        return None;
    }
    let widen = match src.bits() {
        16 => 1,
        8 => 2,
        _ => return None,
    };
    let spread = match (src.channels(), dst.channels()) {
        (c, d) if c == d => 1,
        (1, 2) => 2,
        _ => return None,
    };
    Some(widen * spread)
}

/// Convert `src` into `dst`. `dst` must hold exactly
/// `src.len() * conversion_factor` bytes. Returns the bytes written.
pub fn convert(src_sf: &SampleFormat, dst_sf: &SampleFormat, src: &[u8], dst: &mut [u8]) -> usize {
    let factor = conversion_factor(src_sf, dst_sf)
        .expect("conversion_factor checked before convert");
    debug_assert_eq!(dst.len(), src.len() * factor);
    if factor == 1 {
        dst.copy_from_slice(src);
        return src.len();
    }

    let duplicate = src_sf.channels() == 1 && dst_sf.channels() == 2;
    let mut out = 0;
    let mut emit = |sample: i16, dst: &mut [u8]| {
        let bytes = sample.to_ne_bytes();
        dst[out..out + 2].copy_from_slice(&bytes);
        out += 2;
        if duplicate {
            dst[out..out + 2].copy_from_slice(&bytes);
            out += 2;
        }
    };

    match src_sf.bits() {
        8 if src_sf.is_signed() => {
            for &b in src {
                emit(((b as i8) as i16) << 8, dst);
            }
        }
        8 => {
            for &b in src {
                emit(((b as i16) - 128) << 8, dst);
            }
        }
        16 => {
            for pair in src.chunks_exact(2) {
                emit(i16::from_ne_bytes([pair[0], pair[1]]), dst);
            }
        }
        _ => unreachable!("conversion_factor rejects other widths"),
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_factor() {
        let sf = SampleFormat::stereo_s16(44100);
        assert_eq!(conversion_factor(&sf, &sf), Some(1));
    }

    #[test]
    fn test_mono_to_stereo_factor() {
        let src = SampleFormat::new(44100, 1, 16, true);
        let dst = SampleFormat::stereo_s16(44100);
        assert_eq!(conversion_factor(&src, &dst), Some(2));
    }

    #[test]
    fn test_unsigned8_mono_to_stereo16() {
        let src = SampleFormat::new(8000, 1, 8, false);
        let dst = SampleFormat::stereo_s16(8000);
        assert_eq!(conversion_factor(&src, &dst), Some(4));

        let input = [128u8, 255, 0];
        let mut output = [0u8; 12];
        let written = convert(&src, &dst, &input, &mut output);
        assert_eq!(written, 12);

        let samples: Vec<i16> = output
            .chunks_exact(2)
            .map(|p| i16::from_ne_bytes([p[0], p[1]]))
            .collect();
        // each mono sample appears twice, centered around zero
        assert_eq!(samples[0], 0);
        assert_eq!(samples[1], 0);
        assert_eq!(samples[2], 127 << 8);
        assert_eq!(samples[3], 127 << 8);
        assert_eq!(samples[4], -128 << 8);
        assert_eq!(samples[5], -128 << 8);
    }

    #[test]
    fn test_rate_change_unsupported() {
        let src = SampleFormat::new(22050, 1, 16, true);
        let dst = SampleFormat::stereo_s16(44100);
        assert_eq!(conversion_factor(&src, &dst), None);
    }

    #[test]
    fn test_mono16_duplicated() {
        let src = SampleFormat::new(44100, 1, 16, true);
        let dst = SampleFormat::stereo_s16(44100);
        let sample = 1234i16.to_ne_bytes();
        let input = [sample[0], sample[1]];
        let mut output = [0u8; 4];
        convert(&src, &dst, &input, &mut output);
        assert_eq!(output[..2], sample);
        assert_eq!(output[2..], sample);
    }
}
