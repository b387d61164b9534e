//! Optional parallel processing using rayon.
//!
//! Enable with the `parallel` feature. Provides [`embed_parallel`] and
//! the batched soft-value extraction the sync search switches to when
//! the feature is on. Both produce output identical to the sequential
//! paths: frames are independent, every task gets its own FFT, and
//! results land in indexed slots.

use rayon::prelude::*;

use crate::audio::AudioBuffer;
use crate::codec::{self, FrameCodec};
use crate::config::Parameters;
use crate::embed::BlockPlan;
use crate::error::{Error, Result};
use crate::frame;
use crate::key::Key;
use crate::payload::Payload;

/// Frames processed per rayon task.
const BATCH_SIZE: usize = 64;

/// Embeds `payload` like [`crate::embed`], fanning frame batches out
/// across the rayon pool.
///
/// Bit-identical to the sequential embedder: each frame's computation
/// is unchanged and each write lands in its own sample span.
pub fn embed_parallel(
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
    let span = frame_size * channels;
    let marked = &mut samples[..num_frames * span];

    marked
        .par_chunks_mut(BATCH_SIZE * span)
        .enumerate()
        .try_for_each(|(chunk_idx, chunk)| -> Result<()> {
            let mut codec = FrameCodec::new(key, params)?;
            let base_frame = chunk_idx * BATCH_SIZE;
            let frames_in_chunk = chunk.len() / span;
            for local in 0..frames_in_chunk {
                let position = (base_frame + local) % frames_per_block;
                plan.embed_frame(&mut codec, chunk, channels, local * frame_size, position)?;
            }
            Ok(())
        })?;

    if !params.test_no_limiter {
        codec::soft_limit(marked);
    }
    Ok(())
}

/// Soft values for `count` frames starting at per-channel sample
/// `offset`, one batch of frames per rayon task.
pub(crate) fn frame_softs(
    samples: &[f32],
    channels: usize,
    offset: usize,
    count: usize,
    key: &Key,
    params: &Parameters,
    pattern: &[(usize, usize)],
) -> Result<Vec<f32>> {
    let frame_size = params.frame_size;
    let mut soft = vec![0.0f32; count];
    soft.par_chunks_mut(BATCH_SIZE)
        .enumerate()
        .try_for_each(|(chunk_idx, out)| -> Result<()> {
            let mut codec = FrameCodec::new(key, params)?;
            let base_frame = chunk_idx * BATCH_SIZE;
            for (local, slot) in out.iter_mut().enumerate() {
                let start = offset + (base_frame + local) * frame_size;
                *slot = codec.pattern_soft(samples, channels, start, pattern)?;
            }
            Ok(())
        })?;
    Ok(soft)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assemble::DecodeOutcome;
    use crate::decode::decode;
    use crate::embed::embed;

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
    fn parallel_embed_matches_sequential_exactly() {
        let params = Parameters::default();
        let key = Key::from_test_key(42);
        let payload = Payload::from_bytes(&[0xde; 16]).unwrap();
        let audio = make_test_audio(88_200, 44_100);

        let mut seq = AudioBuffer::new(audio.clone(), 2, 44_100).unwrap();
        embed(&mut seq, &key, &payload, &params).unwrap();

        let mut par = AudioBuffer::new(audio, 2, 44_100).unwrap();
        embed_parallel(&mut par, &key, &payload, &params).unwrap();

        assert_eq!(seq.samples(), par.samples());
    }

    #[test]
    fn parallel_softs_match_sequential_exactly() {
        let params = Parameters::default();
        let key = Key::from_test_key(42);
        let payload = Payload::from_bytes(&[0xbe; 16]).unwrap();
        let len = codec::block_samples(&params);
        let mut buffer = AudioBuffer::new(make_test_audio(len, 44_100), 1, 44_100).unwrap();
        embed(&mut buffer, &key, &payload, &params).unwrap();

        let pattern = codec::sync_pattern(&key, &params);
        let count = frame::frame_count(buffer.len(), 0, params.frame_size);
        let par = frame_softs(buffer.samples(), 1, 0, count, &key, &params, &pattern).unwrap();

        let mut codec = FrameCodec::new(&key, &params).unwrap();
        let mut seq = Vec::with_capacity(count);
        for f in 0..count {
            let start = f * params.frame_size;
            seq.push(
                codec
                    .pattern_soft(buffer.samples(), 1, start, &pattern)
                    .unwrap(),
            );
        }

        assert_eq!(seq, par);
    }

    #[test]
    fn parallel_embed_decode_round_trip() {
        let params = Parameters::default();
        let key = Key::from_test_key(42);
        let payload = Payload::from_bytes(&[0xca; 16]).unwrap();
        let len = codec::block_samples(&params) + 4 * params.frame_size;
        let mut buffer = AudioBuffer::new(make_test_audio(len, 44_100), 1, 44_100).unwrap();

        embed_parallel(&mut buffer, &key, &payload, &params).unwrap();
        let report = decode(&buffer, &key, &params).unwrap();
        let DecodeOutcome::Found(decoded) = report.outcome else {
            panic!("expected Found");
        };
        assert_eq!(decoded.payload, payload);
    }
}
