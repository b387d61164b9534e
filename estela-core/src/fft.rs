use realfft::num_complex::Complex32;
use realfft::{ComplexToReal, RealFftPlanner, RealToComplex};
use std::sync::Arc;

use crate::error::{Error, Result};

/// Pre-allocated real FFT pair for a fixed frame size.
///
/// Embedding rewrites every frame as inverse(edit(forward(frame))), so
/// both directions share one processor with scratch buffers sized once.
pub struct FftProcessor {
    frame_size: usize,
    forward: Arc<dyn RealToComplex<f32>>,
    inverse: Arc<dyn ComplexToReal<f32>>,
    freq_buf: Vec<Complex32>,
    scratch_fwd: Vec<Complex32>,
    scratch_inv: Vec<Complex32>,
}

impl FftProcessor {
    /// Create a processor for the given frame size (even, > 0).
    pub fn new(frame_size: usize) -> Result<Self> {
        let mut planner = RealFftPlanner::<f32>::new();
        let forward = planner.plan_fft_forward(frame_size);
        let inverse = planner.plan_fft_inverse(frame_size);

        let freq_buf = forward.make_output_vec();
        let scratch_fwd = forward.make_scratch_vec();
        let scratch_inv = inverse.make_scratch_vec();

        Ok(Self {
            frame_size,
            forward,
            inverse,
            freq_buf,
            scratch_fwd,
            scratch_inv,
        })
    }

    /// Number of complex bins in the half spectrum (frame_size/2 + 1).
    pub fn num_bins(&self) -> usize {
        self.frame_size / 2 + 1
    }

    /// Frame size this processor was created for.
    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    /// Forward transform into the internal half-spectrum buffer.
    ///
    /// `frame` must hold exactly `frame_size` samples; it is consumed as
    /// the FFT work buffer.
    pub fn forward(&mut self, frame: &mut [f32]) -> Result<&[Complex32]> {
        self.check_len(frame.len())?;
        self.forward
            .process_with_scratch(frame, &mut self.freq_buf, &mut self.scratch_fwd)
            .map_err(|e| Error::Fft(e.to_string()))?;
        Ok(&self.freq_buf)
    }

    /// Inverse transform of the internal spectrum into `frame`, rescaled
    /// to unit amplitude (realfft's inverse gains a factor of frame_size).
    pub fn inverse_normalized(&mut self, frame: &mut [f32]) -> Result<()> {
        self.check_len(frame.len())?;
        self.inverse
            .process_with_scratch(&mut self.freq_buf, frame, &mut self.scratch_inv)
            .map_err(|e| Error::Fft(e.to_string()))?;
        let scale = 1.0 / self.frame_size as f32;
        for s in frame.iter_mut() {
            *s *= scale;
        }
        Ok(())
    }

    /// Apply `edit` to the half spectrum of `frame` and write the edited
    /// signal back in place. Real scaling of interior bins keeps the full
    /// spectrum conjugate-symmetric, so the output stays real-valued.
    pub fn rewrite_frame(
        &mut self,
        frame: &mut [f32],
        edit: impl FnOnce(&mut [Complex32]),
    ) -> Result<()> {
        self.check_len(frame.len())?;
        self.forward
            .process_with_scratch(frame, &mut self.freq_buf, &mut self.scratch_fwd)
            .map_err(|e| Error::Fft(e.to_string()))?;
        edit(&mut self.freq_buf);
        self.inverse_normalized(frame)
    }

    /// The most recent half spectrum produced by [`Self::forward`].
    pub fn freq_bins(&self) -> &[Complex32] {
        &self.freq_buf
    }

    fn check_len(&self, len: usize) -> Result<()> {
        if len != self.frame_size {
            return Err(Error::Fft(format!(
                "expected {} samples, got {len}",
                self.frame_size
            )));
        }
        Ok(())
    }
}
