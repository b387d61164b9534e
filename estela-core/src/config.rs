use crate::error::{Error, Result};
use crate::shortcode::ShortCode;

/// Payload size carried in default (non-short) mode.
pub const DEFAULT_PAYLOAD_BITS: usize = 128;

/// How playback-speed drift is compensated during decode.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SpeedMode {
    /// Assume ratio 1.0, no scanning.
    Disabled,
    /// Coarse grid over 0.85..=1.15 plus one refinement stage.
    Quick,
    /// Finer grid, two refinement stages, longer scan clip.
    Patient,
    /// Caller-supplied exact ratio (test harnesses, re-runs).
    Fixed(f64),
}

/// Read-only configuration snapshot for one embed/decode invocation.
///
/// Defaults are process-wide constants; a snapshot is never mutated once
/// a call begins. Test-only overrides exist for harnesses that need to
/// bypass parts of the pipeline and are off in production use.
#[derive(Debug, Clone)]
pub struct Parameters {
    /// Embedding strength. Higher = more robust but more audible.
    /// Typical range: 0.005 to 0.05.
    pub strength: f32,
    /// FFT frame size in samples. Must be a power of two >= 64.
    pub frame_size: usize,
    /// Consecutive frames that jointly encode one payload bit.
    pub frames_per_bit: usize,
    /// Payload size in bits: 128, or a supported short size (see
    /// [`ShortCode::SUPPORTED_SIZES`]) when `short` is set.
    pub payload_size: usize,
    /// Reduced-payload mode backed by the forward-error-correcting code.
    pub short: bool,
    /// Escalate otherwise-tolerated minor issues to hard failures.
    pub strict: bool,
    /// Speed-drift compensation mode.
    pub speed: SpeedMode,
    /// Number of frequency bin pairs per frame.
    pub num_bin_pairs: usize,
    /// Minimum FFT bin index (skip DC and very low frequencies).
    pub min_bin: usize,
    /// Maximum FFT bin index (exclusive).
    pub max_bin: usize,
    /// Comparison mode: minimum block occurrences that must fully match.
    pub required_matches: Option<usize>,
    /// Test override: skip the output limiter.
    pub test_no_limiter: bool,
    /// Test override: assume blocks start at offset 0, skip sync search.
    pub test_no_sync: bool,
    /// Test override: drop this many leading samples before decoding.
    pub test_cut: Option<usize>,
    /// Test override: decode only the first N seconds.
    pub test_truncate_seconds: Option<u32>,
}

impl Default for Parameters {
    fn default() -> Self {
        Self {
            strength: 0.025,
            frame_size: 512,
            frames_per_bit: 2,
            payload_size: DEFAULT_PAYLOAD_BITS,
            short: false,
            strict: false,
            speed: SpeedMode::Disabled,
            num_bin_pairs: 80,
            min_bin: 5,
            max_bin: 220,
            required_matches: None,
            test_no_limiter: false,
            test_no_sync: false,
            test_cut: None,
            test_truncate_seconds: None,
        }
    }
}

impl Parameters {
    /// Number of complex frequency bins (frame_size / 2 + 1).
    pub fn num_bins(&self) -> usize {
        self.frame_size / 2 + 1
    }

    /// Check the snapshot before any signal processing.
    pub fn validate(&self) -> Result<()> {
        if self.frame_size < 64 || !self.frame_size.is_power_of_two() {
            return Err(Error::InvalidFrameSize(self.frame_size));
        }
        if !(self.strength > 0.0 && self.strength < 0.5) {
            return Err(Error::InvalidParameter(format!(
                "strength {} out of range (0, 0.5)",
                self.strength
            )));
        }
        if self.frames_per_bit == 0 {
            return Err(Error::InvalidParameter("frames_per_bit is zero".into()));
        }
        if self.short {
            // Unsupported sizes are reported here, before any signal work.
            ShortCode::new(self.payload_size)?;
        } else if self.payload_size != DEFAULT_PAYLOAD_BITS {
            return Err(Error::UnsupportedPayloadSize(self.payload_size));
        }
        if self.num_bin_pairs == 0 {
            return Err(Error::InvalidParameter("num_bin_pairs is zero".into()));
        }
        if self.min_bin + 1 >= self.max_bin || self.max_bin >= self.num_bins() {
            return Err(Error::InvalidParameter(format!(
                "bin range [{}, {}) invalid for {} bins",
                self.min_bin,
                self.max_bin,
                self.num_bins()
            )));
        }
        if let SpeedMode::Fixed(r) = self.speed {
            if !(0.5..=2.0).contains(&r) {
                return Err(Error::InvalidParameter(format!(
                    "fixed speed ratio {r} out of range [0.5, 2.0]"
                )));
            }
        }
        Ok(())
    }
}
