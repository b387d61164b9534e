pub mod assemble;
pub mod audio;
pub mod codec;
pub mod config;
pub mod decode;
pub mod embed;
pub mod error;
pub mod fft;
pub mod frame;
pub mod key;
pub mod payload;
pub mod resample;
pub mod shortcode;
pub mod speed;
pub mod sync;

#[cfg(feature = "parallel")]
pub mod parallel;

// Re-export primary API types
pub use assemble::{DecodeOutcome, Decoded};
pub use audio::AudioBuffer;
pub use config::{Parameters, SpeedMode};
pub use decode::{Comparison, DecodeDiagnostics, DecodeReport};
pub use error::Error;
pub use key::Key;
pub use payload::Payload;
pub use shortcode::{ShortCode, ShortDecode};

#[cfg(feature = "parallel")]
pub use parallel::embed_parallel;

/// Embed a message into an audio buffer (in-place).
///
/// This is the one-shot API for file-based workflows.
pub fn embed(
    buffer: &mut AudioBuffer,
    key: &Key,
    payload: &Payload,
    params: &Parameters,
) -> error::Result<()> {
    embed::embed(buffer, key, payload, params)
}

/// Decode whatever message the audio carries under `key`.
///
/// Returns a verdict with diagnostics; unmarked audio is a NotFound
/// outcome, not an error.
pub fn decode(
    buffer: &AudioBuffer,
    key: &Key,
    params: &Parameters,
) -> error::Result<DecodeReport> {
    decode::decode(buffer, key, params)
}

/// Decode and grade the result against an expected message.
pub fn compare(
    buffer: &AudioBuffer,
    key: &Key,
    expected: &Payload,
    params: &Parameters,
) -> error::Result<Comparison> {
    decode::compare(buffer, key, expected, params)
}
