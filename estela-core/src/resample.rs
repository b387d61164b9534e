//! Fractional resampling for speed-drift compensation.
//!
//! A signal played back `r` times faster than the original is restored by
//! resampling with factor `r`: the output has `len * r` samples and
//! `out[j] = in(j / r)` evaluated at fractional positions with a
//! windowed-sinc kernel (Blackman window, per-sample kernel normalization
//! for unity DC gain). Positions are computed in f64 so long buffers keep
//! sub-sample accuracy.

use crate::audio::AudioBuffer;
use crate::error::Result;

/// Kernel half-width in input samples.
const HALF_TAPS: isize = 16;

/// Resample one channel by `ratio` (output length = input length × ratio).
pub fn resample(input: &[f32], ratio: f64) -> Vec<f32> {
    if (ratio - 1.0).abs() < 1e-12 {
        return input.to_vec();
    }
    let out_len = (input.len() as f64 * ratio).floor() as usize;
    // Downward resampling must lowpass below the output Nyquist; a small
    // guard band keeps the transition inside the filter's reach.
    let cutoff = ratio.min(1.0) * 0.95;

    let mut out = Vec::with_capacity(out_len);
    for j in 0..out_len {
        let x = j as f64 / ratio;
        let center = x.floor() as isize;
        let frac = x - x.floor();

        let mut acc = 0.0f64;
        let mut norm = 0.0f64;
        for k in (1 - HALF_TAPS)..=HALF_TAPS {
            let idx = center + k;
            if idx < 0 || idx as usize >= input.len() {
                continue;
            }
            let w = windowed_sinc(k as f64 - frac, cutoff);
            acc += w * f64::from(input[idx as usize]);
            norm += w;
        }
        out.push(if norm.abs() > 1e-12 {
            (acc / norm) as f32
        } else {
            0.0
        });
    }
    out
}

/// Resample every channel of a buffer by `ratio`.
pub fn resample_buffer(audio: &AudioBuffer, ratio: f64) -> Result<AudioBuffer> {
    let channels = audio.channels();
    let resampled: Vec<Vec<f32>> = audio
        .deinterleave()
        .iter()
        .map(|ch| resample(ch, ratio))
        .collect();

    let out_len = resampled.first().map_or(0, Vec::len);
    let mut samples = vec![0.0f32; out_len * channels];
    for (ch, channel) in resampled.iter().enumerate() {
        for (i, &s) in channel.iter().enumerate() {
            samples[i * channels + ch] = s;
        }
    }
    AudioBuffer::new(samples, channels, audio.sample_rate())
}

/// sinc(cutoff · t) under a Blackman window spanning ±HALF_TAPS.
fn windowed_sinc(t: f64, cutoff: f64) -> f64 {
    let pi = std::f64::consts::PI;
    let sinc = if t.abs() < 1e-9 {
        cutoff
    } else {
        (pi * cutoff * t).sin() / (pi * t)
    };
    let half = HALF_TAPS as f64;
    let phase = pi * (t + half) / half;
    let window = 0.42 - 0.5 * phase.cos() + 0.08 * (2.0 * phase).cos();
    sinc * window
}
