//! Frame access over interleaved sample buffers.
//!
//! The frame grid is contiguous and non-overlapping: frame `f` of a grid
//! anchored at per-channel position `offset` covers per-channel samples
//! `offset + f * frame_size ..`. Embedding rewrites frames in place, so
//! reads and writes work directly on the interleaved buffer.

/// Whole frames available from `offset` in `len` samples per channel.
pub fn frame_count(len: usize, offset: usize, frame_size: usize) -> usize {
    len.saturating_sub(offset) / frame_size
}

/// Copy one channel's frame starting at per-channel position `start`.
pub fn read_frame(samples: &[f32], channels: usize, channel: usize, start: usize, out: &mut [f32]) {
    debug_assert!(channel < channels);
    for (i, slot) in out.iter_mut().enumerate() {
        *slot = samples[(start + i) * channels + channel];
    }
}

/// Write one channel's frame back at per-channel position `start`.
pub fn write_frame(
    samples: &mut [f32],
    channels: usize,
    channel: usize,
    start: usize,
    frame: &[f32],
) {
    debug_assert!(channel < channels);
    for (i, &s) in frame.iter().enumerate() {
        samples[(start + i) * channels + channel] = s;
    }
}
