use thiserror::Error;

/// Errors reported by the engine.
///
/// Variants fall into two groups. Configuration errors (key material,
/// payload sizing, parameter snapshots) are detected before any signal
/// processing starts. Input errors (audio shape, FFT setup) abort the
/// invocation with no partial output. A decode that finds nothing is not
/// an error; see [`crate::assemble::DecodeOutcome`].
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid key length: expected 16 bytes, got {0}")]
    InvalidKeyLength(usize),

    #[error("malformed key file: {0}")]
    MalformedKeyFile(String),

    #[error("unsupported payload size: {0} bits")]
    UnsupportedPayloadSize(usize),

    #[error("invalid payload length: expected {expected} bits, got {got}")]
    InvalidPayloadLength { expected: usize, got: usize },

    #[error("invalid frame size: {0} (must be a power of two >= 64)")]
    InvalidFrameSize(usize),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("audio too short: need at least {needed} samples per channel, got {got}")]
    AudioTooShort { needed: usize, got: usize },

    #[error("invalid audio: {0}")]
    InvalidAudio(String),

    #[error("FFT error: {0}")]
    Fft(String),
}

pub type Result<T> = std::result::Result<T, Error>;
