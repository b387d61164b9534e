//! Embeds a message into audio in place.
//!
//! Audio is processed in non-overlapping frames with direct FFT
//! replacement: each frame is transformed, patchwork-modified and
//! transformed back, so the decoder sees exactly the spectrum that was
//! written. Frames cycle through Block positions; a long enough signal
//! carries the Block over and over, and a trailing partial Block is
//! embedded as far as it goes.

use crate::audio::AudioBuffer;
use crate::codec::{self, FrameCodec, SYNC_FRAME_COUNT};
use crate::config::Parameters;
use crate::error::{Error, Result};
use crate::frame;
use crate::key::Key;
use crate::payload::Payload;
use crate::shortcode::ShortCode;

/// The per-Block bit layout shared by the sequential and parallel
/// embedders.
pub(crate) struct BlockPlan {
    sync: Vec<bool>,
    codeword: Vec<bool>,
    assignment: Vec<usize>,
}

impl BlockPlan {
    /// Validates the request and lays out one Block's bits.
    pub(crate) fn new(key: &Key, payload: &Payload, params: &Parameters) -> Result<Self> {
        params.validate()?;
        if payload.bits() != params.payload_size {
            return Err(Error::InvalidPayloadLength {
                expected: params.payload_size,
                got: payload.bits(),
            });
        }
        let codeword = if params.short {
            ShortCode::new(params.payload_size)?.encode(&payload.to_bits())
        } else {
            payload.to_bits()
        };
        Ok(Self {
            sync: codec::sync_bits(key),
            codeword,
            assignment: codec::bit_assignment(key, params),
        })
    }

    /// Embeds the frame at Block position `position`, starting at
    /// per-channel sample `start`.
    pub(crate) fn embed_frame(
        &self,
        codec: &mut FrameCodec,
        samples: &mut [f32],
        channels: usize,
        start: usize,
        position: usize,
    ) -> Result<()> {
        if position < SYNC_FRAME_COUNT {
            codec.embed_sync_frame(samples, channels, start, self.sync[position])
        } else {
            let data_position = position - SYNC_FRAME_COUNT;
            let bit = self.codeword[self.assignment[data_position]];
            codec.embed_data_frame(samples, channels, start, data_position as u32, bit)
        }
    }
}

/// Embeds `payload` into `buffer` under `key`.
///
/// Deterministic: the same inputs always produce bit-identical output.
/// Every whole frame is marked; leftover samples after the last whole
/// frame pass through untouched. The soft limiter runs over the marked
/// span afterwards unless `params.test_no_limiter` is set.
pub fn embed(
    buffer: &mut AudioBuffer,
    key: &Key,
    payload: &Payload,
    params: &Parameters,
) -> Result<()> {
    let plan = BlockPlan::new(key, payload, params)?;
    let frame_size = params.frame_size;
    let num_frames = frame::frame_count(buffer.len(), 0, frame_size);
    if num_frames == 0 {
        return Err(Error::AudioTooShort {
            needed: frame_size,
            got: buffer.len(),
        });
    }

    let frames_per_block = codec::frames_per_block(params);
    let channels = buffer.channels();
    let samples = buffer.samples_mut();
    let mut codec = FrameCodec::new(key, params)?;
    for f in 0..num_frames {
        plan.embed_frame(&mut codec, samples, channels, f * frame_size, f % frames_per_block)?;
    }

    if !params.test_no_limiter {
        codec::soft_limit(&mut samples[..num_frames * frame_size * channels]);
    }
    tracing::debug!(
        "embedded {num_frames} frames ({} whole blocks)",
        num_frames / frames_per_block
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_test_audio(num_samples: usize, sample_rate: u32) -> Vec<f32> {
        let mut samples = vec![0.0f32; num_samples];
        for (i, sample) in samples.iter_mut().enumerate() {
            let t = i as f64 / f64::from(sample_rate);
            for k in 1u32..=80 {
                let freq = f64::from(k) * 60.0;
                let amp = 1.0 / f64::from(k).sqrt();
                *sample +=
                    (amp * (2.0 * std::f64::consts::PI * freq * t + f64::from(k)).sin()) as f32;
            }
        }
        let peak = samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max);
        if peak > 0.0 {
            for s in &mut samples {
                *s *= 0.5 / peak;
            }
        }
        samples
    }

    #[test]
    fn embed_does_not_destroy_signal() {
        let params = Parameters::default();
        let key = Key::from_test_key(42);
        let payload = Payload::from_bytes(&[0xf0; 16]).unwrap();

        let original = make_test_audio(88_200, 44_100);
        let mut buffer = AudioBuffer::new(original.clone(), 1, 44_100).unwrap();
        embed(&mut buffer, &key, &payload, &params).unwrap();

        let max_diff = original
            .iter()
            .zip(buffer.samples())
            .map(|(a, b)| (a - b).abs())
            .fold(0.0f32, f32::max);
        assert!(max_diff < 0.1, "distortion too high: {max_diff}");

        let total_diff: f32 = original
            .iter()
            .zip(buffer.samples())
            .map(|(a, b)| (a - b).abs())
            .sum();
        assert!(total_diff > 0.0, "mark had no effect");
    }

    #[test]
    fn embed_too_short() {
        let params = Parameters::default();
        let key = Key::from_test_key(42);
        let payload = Payload::from_bytes(&[0; 16]).unwrap();
        let mut buffer = AudioBuffer::new(vec![0.0; 100], 1, 44_100).unwrap();

        assert!(matches!(
            embed(&mut buffer, &key, &payload, &params),
            Err(Error::AudioTooShort { .. })
        ));
    }

    #[test]
    fn payload_must_match_the_configured_size() {
        let params = Parameters::default();
        let key = Key::from_test_key(42);
        let payload = Payload::from_bytes(&[1, 2, 3, 4]).unwrap();
        let mut buffer = AudioBuffer::new(vec![0.0; 4096], 1, 44_100).unwrap();

        assert!(matches!(
            embed(&mut buffer, &key, &payload, &params),
            Err(Error::InvalidPayloadLength {
                expected: 128,
                got: 32,
            })
        ));
    }

    #[test]
    fn embedding_is_deterministic() {
        let params = Parameters::default();
        let key = Key::from_test_key(7);
        let payload = Payload::from_bytes(&[0xa5; 16]).unwrap();
        let audio = make_test_audio(44_100, 44_100);

        let mut first = AudioBuffer::new(audio.clone(), 2, 44_100).unwrap();
        let mut second = AudioBuffer::new(audio, 2, 44_100).unwrap();
        embed(&mut first, &key, &payload, &params).unwrap();
        embed(&mut second, &key, &payload, &params).unwrap();

        assert_eq!(first.samples(), second.samples());
    }

    #[test]
    fn tail_after_the_last_whole_frame_is_untouched() {
        let params = Parameters::default();
        let key = Key::from_test_key(42);
        let payload = Payload::from_bytes(&[0x11; 16]).unwrap();

        let len = 3 * params.frame_size + 100;
        let original = make_test_audio(len, 44_100);
        let mut buffer = AudioBuffer::new(original.clone(), 1, 44_100).unwrap();
        embed(&mut buffer, &key, &payload, &params).unwrap();

        let marked = 3 * params.frame_size;
        assert_eq!(&buffer.samples()[marked..], &original[marked..]);
        assert_ne!(&buffer.samples()[..marked], &original[..marked]);
    }

    #[test]
    fn limiter_squashes_hot_samples() {
        let key = Key::from_test_key(42);
        let payload = Payload::from_bytes(&[0; 16]).unwrap();
        let params = Parameters::default();
        // constant input has no energy in the marked bins, so the only
        // change comes from the limiter
        let hot = vec![0.98f32; 2 * params.frame_size];

        let mut limited = AudioBuffer::new(hot.clone(), 1, 44_100).unwrap();
        embed(&mut limited, &key, &payload, &params).unwrap();
        let expected = 0.9 + 0.1 * ((0.98f32 - 0.9) / 0.1).tanh();
        for s in limited.samples() {
            assert!((s - expected).abs() < 1e-3, "sample {s}, expected {expected}");
        }

        let no_limiter = Parameters {
            test_no_limiter: true,
            ..Parameters::default()
        };
        let mut raw = AudioBuffer::new(hot, 1, 44_100).unwrap();
        embed(&mut raw, &key, &payload, &no_limiter).unwrap();
        for s in raw.samples() {
            assert!((s - 0.98).abs() < 1e-4, "sample {s} should be untouched");
        }
    }
}
