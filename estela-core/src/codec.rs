//! Frame-level watermark codec: keyed spreading patterns, patchwork
//! embedding/extraction, Block geometry and the payload bit layout.

use realfft::num_complex::Complex32;

use crate::config::Parameters;
use crate::error::Result;
use crate::fft::FftProcessor;
use crate::frame::{read_frame, write_frame};
use crate::key::{Key, KeyedStream, StreamId};
use crate::shortcode::CODEWORD_BITS;

/// Sync frames at the head of every Block.
pub const SYNC_FRAME_COUNT: usize = 128;

/// Data frames per Block: one 128-bit codeword spread over
/// `frames_per_bit` frames per bit.
pub fn data_frame_count(params: &Parameters) -> usize {
    CODEWORD_BITS * params.frames_per_bit
}

/// Total frames per Block.
pub fn frames_per_block(params: &Parameters) -> usize {
    SYNC_FRAME_COUNT + data_frame_count(params)
}

/// Per-channel samples per Block.
pub fn block_samples(params: &Parameters) -> usize {
    frames_per_block(params) * params.frame_size
}

/// The ±1 sign sequence carried by the sync frames.
pub fn sync_bits(key: &Key) -> Vec<bool> {
    KeyedStream::derive(key, StreamId::SyncBits).bits(SYNC_FRAME_COUNT)
}

/// Which codeword bit each data frame carries.
///
/// Every bit index appears `frames_per_bit` times; the multiset is
/// shuffled by the `BitOrder` stream so a damaged stretch of audio
/// spreads its harm over many bits instead of erasing a few.
pub fn bit_assignment(key: &Key, params: &Parameters) -> Vec<usize> {
    let count = data_frame_count(params);
    let mut order: Vec<usize> = (0..count).map(|j| j / params.frames_per_bit).collect();
    let mut stream = KeyedStream::derive(key, StreamId::BitOrder);
    for i in (1..count).rev() {
        let j = stream.next_range(i as u32 + 1) as usize;
        order.swap(i, j);
    }
    order
}

/// Soft amplitude limiter applied after embedding.
///
/// Identity below the 0.9 knee; above it the overshoot is squashed with a
/// tanh so output magnitude stays within 1.0. Continuous and slope-1 at
/// the knee.
pub fn soft_limit(samples: &mut [f32]) {
    const KNEE: f32 = 0.9;
    for s in samples.iter_mut() {
        let mag = s.abs();
        if mag > KNEE {
            let squashed = KNEE + (1.0 - KNEE) * ((mag - KNEE) / (1.0 - KNEE)).tanh();
            *s = s.signum() * squashed;
        }
    }
}

/// Per-frame embedder/extractor bound to one key and parameter set.
///
/// Holds the FFT pair and a scratch frame, so one instance serves a whole
/// channel pass without allocating. Spreading patterns are redrawn from
/// the key on every call; the sync pattern is the position-0 draw of its
/// own stream, shared by all sync frames.
pub struct FrameCodec {
    key: Key,
    params: Parameters,
    fft: FftProcessor,
    frame: Vec<f32>,
}

impl FrameCodec {
    pub fn new(key: &Key, params: &Parameters) -> Result<Self> {
        let fft = FftProcessor::new(params.frame_size)?;
        Ok(Self {
            key: key.clone(),
            params: params.clone(),
            fft,
            frame: vec![0.0; params.frame_size],
        })
    }

    /// Embed a sync bit into the frame at per-channel position `start`,
    /// perturbing every channel identically.
    pub fn embed_sync_frame(
        &mut self,
        samples: &mut [f32],
        channels: usize,
        start: usize,
        bit: bool,
    ) -> Result<()> {
        let pattern = generate_pattern(&self.key, StreamId::SyncPattern, 0, &self.params);
        self.embed_with_pattern(samples, channels, start, &pattern, bit)
    }

    /// Embed a data bit using the pattern for block position `position`.
    pub fn embed_data_frame(
        &mut self,
        samples: &mut [f32],
        channels: usize,
        start: usize,
        position: u32,
        bit: bool,
    ) -> Result<()> {
        let pattern = generate_pattern(&self.key, StreamId::DataPattern, position, &self.params);
        self.embed_with_pattern(samples, channels, start, &pattern, bit)
    }

    /// Soft sync value of the frame at `start`: sign is the bit guess,
    /// magnitude the per-frame confidence. Channels vote into one sum.
    pub fn sync_soft(&mut self, samples: &[f32], channels: usize, start: usize) -> Result<f32> {
        let pattern = generate_pattern(&self.key, StreamId::SyncPattern, 0, &self.params);
        self.extract_with_pattern(samples, channels, start, &pattern)
    }

    /// Soft data value of the frame at `start` for block position
    /// `position`.
    pub fn data_soft(
        &mut self,
        samples: &[f32],
        channels: usize,
        start: usize,
        position: u32,
    ) -> Result<f32> {
        let pattern = generate_pattern(&self.key, StreamId::DataPattern, position, &self.params);
        self.extract_with_pattern(samples, channels, start, &pattern)
    }

    #[cfg(feature = "parallel")]
    pub(crate) fn key(&self) -> &Key {
        &self.key
    }

    #[cfg(feature = "parallel")]
    pub(crate) fn params(&self) -> &Parameters {
        &self.params
    }

    /// Soft value against a caller-held pattern. The sync search calls
    /// this once per frame per offset, so the pattern is drawn once by
    /// the caller instead of per call.
    pub fn pattern_soft(
        &mut self,
        samples: &[f32],
        channels: usize,
        start: usize,
        pattern: &[(usize, usize)],
    ) -> Result<f32> {
        self.extract_with_pattern(samples, channels, start, pattern)
    }

    fn embed_with_pattern(
        &mut self,
        samples: &mut [f32],
        channels: usize,
        start: usize,
        pattern: &[(usize, usize)],
        bit: bool,
    ) -> Result<()> {
        let strength = self.params.strength;
        for ch in 0..channels {
            read_frame(samples, channels, ch, start, &mut self.frame);
            self.fft.rewrite_frame(&mut self.frame, |bins| {
                scale_pairs(bins, pattern, bit, strength);
            })?;
            write_frame(samples, channels, ch, start, &self.frame);
        }
        Ok(())
    }

    fn extract_with_pattern(
        &mut self,
        samples: &[f32],
        channels: usize,
        start: usize,
        pattern: &[(usize, usize)],
    ) -> Result<f32> {
        let mut diff = 0.0f32;
        let mut total = 0.0f32;
        for ch in 0..channels {
            read_frame(samples, channels, ch, start, &mut self.frame);
            let bins = self.fft.forward(&mut self.frame)?;
            for &(a, b) in pattern {
                if a >= bins.len() || b >= bins.len() {
                    continue;
                }
                let mag_a = bins[a].norm();
                let mag_b = bins[b].norm();
                diff += mag_a - mag_b;
                total += mag_a + mag_b;
            }
        }
        if total < 1e-10 {
            return Ok(0.0);
        }
        Ok(diff / total)
    }
}

/// The spreading pattern shared by every sync frame.
pub fn sync_pattern(key: &Key, params: &Parameters) -> Vec<(usize, usize)> {
    generate_pattern(key, StreamId::SyncPattern, 0, params)
}

/// Draw a spreading pattern: `num_bin_pairs` adjacent-bin pairs with
/// keyed centre selection and keyed a/b order.
fn generate_pattern(
    key: &Key,
    id: StreamId,
    position: u32,
    params: &Parameters,
) -> Vec<(usize, usize)> {
    let span = params.max_bin - params.min_bin;
    let mut stream = KeyedStream::derive_at(key, id, position);
    let mut pairs = Vec::with_capacity(params.num_bin_pairs);
    for _ in 0..params.num_bin_pairs {
        let center = params.min_bin + stream.next_range(span as u32 - 1) as usize;
        if stream.next_bool() {
            pairs.push((center + 1, center));
        } else {
            pairs.push((center, center + 1));
        }
    }
    pairs
}

/// Scale each pair's magnitudes by (1 ± strength); bit=1 favours `a`.
/// Near-silent bins are skipped, matching the detection floor.
fn scale_pairs(bins: &mut [Complex32], pairs: &[(usize, usize)], bit: bool, strength: f32) {
    let (scale_a, scale_b) = if bit {
        (1.0 + strength, 1.0 - strength)
    } else {
        (1.0 - strength, 1.0 + strength)
    };
    for &(a, b) in pairs {
        if a >= bins.len() || b >= bins.len() {
            continue;
        }
        if bins[a].norm() < 1e-10 || bins[b].norm() < 1e-10 {
            continue;
        }
        bins[a] *= scale_a;
        bins[b] *= scale_b;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_params() -> Parameters {
        Parameters::default()
    }

    /// Broadband frame: many harmonics so every bin pair carries energy.
    fn make_test_frame(size: usize, channels: usize) -> Vec<f32> {
        let mut samples = vec![0.0f32; size * channels];
        for i in 0..size {
            let t = i as f32 / size as f32;
            let mut s = 0.0f32;
            for k in 1..80 {
                let phase = 2.0 * std::f32::consts::PI * k as f32 * t + k as f32;
                s += phase.sin() / (k as f32).sqrt();
            }
            for ch in 0..channels {
                samples[i * channels + ch] = s * 0.05;
            }
        }
        samples
    }

    #[test]
    fn geometry_defaults() {
        let params = test_params();
        assert_eq!(data_frame_count(&params), 256);
        assert_eq!(frames_per_block(&params), 384);
        assert_eq!(block_samples(&params), 196_608);
    }

    #[test]
    fn patterns_are_deterministic_and_keyed() {
        let params = test_params();
        let key = Key::from_test_key(42);
        let a = generate_pattern(&key, StreamId::DataPattern, 3, &params);
        let b = generate_pattern(&key, StreamId::DataPattern, 3, &params);
        assert_eq!(a, b);

        let other_position = generate_pattern(&key, StreamId::DataPattern, 4, &params);
        assert_ne!(a, other_position);

        let other_key = generate_pattern(&Key::from_test_key(43), StreamId::DataPattern, 3, &params);
        assert_ne!(a, other_key);
    }

    #[test]
    fn pattern_bins_in_range() {
        let params = test_params();
        let key = Key::from_test_key(1);
        for position in 0..8 {
            for (a, b) in generate_pattern(&key, StreamId::DataPattern, position, &params) {
                assert!(a >= params.min_bin && a <= params.max_bin);
                assert!(b >= params.min_bin && b <= params.max_bin);
                assert_eq!(a.abs_diff(b), 1);
            }
        }
    }

    #[test]
    fn sync_bits_are_stable_per_key() {
        let key = Key::from_test_key(9);
        let bits = sync_bits(&key);
        assert_eq!(bits.len(), SYNC_FRAME_COUNT);
        assert_eq!(bits, sync_bits(&key));
        assert_ne!(bits, sync_bits(&Key::from_test_key(10)));
        // keyed sequence is roughly balanced
        let ones = bits.iter().filter(|&&b| b).count();
        assert!(ones > 32 && ones < 96, "ones = {ones}");
    }

    #[test]
    fn bit_assignment_covers_every_bit_evenly() {
        let params = test_params();
        let key = Key::from_test_key(5);
        let assignment = bit_assignment(&key, &params);
        assert_eq!(assignment.len(), data_frame_count(&params));

        let mut counts = vec![0usize; CODEWORD_BITS];
        for &idx in &assignment {
            counts[idx] += 1;
        }
        assert!(counts.iter().all(|&c| c == params.frames_per_bit));

        // shuffled, not consecutive
        assert_ne!(assignment, bit_assignment(&Key::from_test_key(6), &params));
        let consecutive: Vec<usize> = (0..assignment.len())
            .map(|j| j / params.frames_per_bit)
            .collect();
        assert_ne!(assignment, consecutive);
    }

    #[test]
    fn embed_extract_single_frame() {
        let params = test_params();
        let key = Key::from_test_key(42);
        let mut codec = FrameCodec::new(&key, &params).unwrap();

        let clean = make_test_frame(params.frame_size, 1);
        let baseline = codec.data_soft(&clean, 1, 0, 7).unwrap();

        let mut marked_true = clean.clone();
        codec.embed_data_frame(&mut marked_true, 1, 0, 7, true).unwrap();
        let soft_true = codec.data_soft(&marked_true, 1, 0, 7).unwrap();
        assert!(
            soft_true > baseline,
            "bit=true must raise the statistic: {soft_true} vs {baseline}"
        );

        let mut marked_false = clean.clone();
        codec.embed_data_frame(&mut marked_false, 1, 0, 7, false).unwrap();
        let soft_false = codec.data_soft(&marked_false, 1, 0, 7).unwrap();
        assert!(
            soft_false < baseline,
            "bit=false must lower the statistic: {soft_false} vs {baseline}"
        );
    }

    #[test]
    fn stereo_channels_vote_together() {
        let params = test_params();
        let key = Key::from_test_key(42);
        let mut codec = FrameCodec::new(&key, &params).unwrap();

        let mut samples = make_test_frame(params.frame_size, 2);
        codec.embed_sync_frame(&mut samples, 2, 0, true).unwrap();
        let soft = codec.sync_soft(&samples, 2, 0).unwrap();
        assert!(soft > 0.0, "stereo sync soft value: {soft}");
    }

    #[test]
    fn sync_and_data_patterns_differ() {
        let params = test_params();
        let key = Key::from_test_key(42);
        let sync = generate_pattern(&key, StreamId::SyncPattern, 0, &params);
        let data = generate_pattern(&key, StreamId::DataPattern, 0, &params);
        assert_ne!(sync, data);
    }

    #[test]
    fn embed_perturbation_is_small() {
        let params = test_params();
        let key = Key::from_test_key(42);
        let mut codec = FrameCodec::new(&key, &params).unwrap();

        let original = make_test_frame(params.frame_size, 1);
        let mut marked = original.clone();
        codec.embed_data_frame(&mut marked, 1, 0, 0, true).unwrap();

        let max_diff = original
            .iter()
            .zip(marked.iter())
            .map(|(a, b)| (a - b).abs())
            .fold(0.0f32, f32::max);
        assert!(max_diff > 0.0, "embedding must change the frame");
        assert!(max_diff < 0.05, "perturbation too large: {max_diff}");
    }

    #[test]
    fn silent_frame_extracts_zero() {
        let params = test_params();
        let key = Key::from_test_key(42);
        let mut codec = FrameCodec::new(&key, &params).unwrap();
        let silence = vec![0.0f32; params.frame_size];
        assert_eq!(codec.sync_soft(&silence, 1, 0).unwrap(), 0.0);
    }

    #[test]
    fn limiter_identity_below_knee() {
        let mut samples = vec![0.0, 0.25, -0.5, 0.89, -0.89];
        let original = samples.clone();
        soft_limit(&mut samples);
        assert_eq!(samples, original);
    }

    #[test]
    fn limiter_bounds_hot_samples() {
        let mut samples = vec![0.95, -1.2, 3.0, -10.0];
        soft_limit(&mut samples);
        for (i, &s) in samples.iter().enumerate() {
            assert!(s.abs() <= 1.0, "sample {i} not bounded: {s}");
            assert!(s.abs() > 0.9, "sample {i} over-squashed: {s}");
        }
        assert!(samples[0] > 0.0 && samples[1] < 0.0);
        // monotonic: louder in, louder out
        assert!(samples[2] > samples[0]);
        assert!(samples[3] < samples[1]);
    }
}
