use crate::error::{Error, Result};

/// Audio samples handed to the engine by the caller.
///
/// Samples are interleaved f32 in [-1, 1]. The engine performs no file
/// access; readers/writers live at the boundary (CLI, tests).
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    samples: Vec<f32>,
    channels: usize,
    sample_rate: u32,
}

impl AudioBuffer {
    /// Wrap interleaved samples. Length must be a multiple of the channel
    /// count; channel count and sample rate must be non-zero.
    pub fn new(samples: Vec<f32>, channels: usize, sample_rate: u32) -> Result<Self> {
        if channels == 0 {
            return Err(Error::InvalidAudio("channel count is zero".into()));
        }
        if sample_rate == 0 {
            return Err(Error::InvalidAudio("sample rate is zero".into()));
        }
        if !samples.len().is_multiple_of(channels) {
            return Err(Error::InvalidAudio(format!(
                "sample count {} is not a multiple of {} channels",
                samples.len(),
                channels
            )));
        }
        Ok(Self {
            samples,
            channels,
            sample_rate,
        })
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Samples per channel.
    pub fn len(&self) -> usize {
        self.samples.len() / self.channels
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// The interleaved sample data.
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn samples_mut(&mut self) -> &mut [f32] {
        &mut self.samples
    }

    pub fn into_samples(self) -> Vec<f32> {
        self.samples
    }

    /// Split into one contiguous buffer per channel.
    pub fn deinterleave(&self) -> Vec<Vec<f32>> {
        let n = self.len();
        let mut out = vec![Vec::with_capacity(n); self.channels];
        for (i, &s) in self.samples.iter().enumerate() {
            out[i % self.channels].push(s);
        }
        out
    }

    /// Average all channels into one.
    pub fn downmix_mono(&self) -> Vec<f32> {
        if self.channels == 1 {
            return self.samples.clone();
        }
        let scale = 1.0 / self.channels as f32;
        self.samples
            .chunks_exact(self.channels)
            .map(|frame| frame.iter().sum::<f32>() * scale)
            .collect()
    }

    /// A copy covering samples `[start, start + len)` of every channel.
    pub fn window(&self, start: usize, len: usize) -> Self {
        let end = (start + len).min(self.len());
        let start = start.min(end);
        Self {
            samples: self.samples[start * self.channels..end * self.channels].to_vec(),
            channels: self.channels,
            sample_rate: self.sample_rate,
        }
    }
}
