//! Combines per-Block evidence into one message verdict.
//!
//! Every synchronized Block contributes a weighted vote per codeword
//! bit. Weights are the sync scores, so a cleanly recovered repetition
//! outvotes one dug out of a damaged stretch. The vote also yields a
//! per-bit coherence figure that drives the confidence gate between
//! [`DecodeOutcome::Found`] and [`DecodeOutcome::LowConfidence`].

use crate::config::Parameters;
use crate::error::Result;
use crate::payload::Payload;
use crate::shortcode::{CODEWORD_BITS, ShortCode, ShortDecode};

/// Minimum confidence for a decode to count as found.
pub const FOUND_CONFIDENCE: f32 = 0.5;

/// Evidence from one synchronized Block.
#[derive(Debug, Clone)]
pub struct BlockDecode {
    /// Block start in samples per channel.
    pub offset: usize,
    /// Sync correlation of the candidate, used as the vote weight.
    pub score: f32,
    /// Per codeword bit, the sum of soft values over the bit's frames.
    pub bit_soft: Vec<f32>,
    /// Per codeword bit, the sum of absolute soft values over the same
    /// frames. Bounds the achievable `bit_soft`, giving coherence.
    pub bit_mag: Vec<f32>,
}

/// A recovered message and the statistics behind it.
#[derive(Debug, Clone)]
pub struct Decoded {
    pub payload: Payload,
    /// Mean per-bit coherence of the weighted vote, in [0, 1].
    pub confidence: f32,
    /// Bit-error estimate derived from the coherence spread.
    pub bit_error_estimate: f32,
    /// Symbol corrections applied by the short code, in short mode.
    pub corrected_errors: Option<usize>,
    /// True when short-code correction failed; `payload` then carries
    /// the raw systematic bytes as a best effort.
    pub uncorrected: bool,
    /// Blocks that contributed to the vote.
    pub blocks: usize,
}

/// Verdict of a decode run.
#[derive(Debug, Clone)]
pub enum DecodeOutcome {
    /// No sync candidate carried a usable vote.
    NotFound,
    /// A message was read but should not be trusted on its own.
    LowConfidence(Decoded),
    /// A message was read with confidence.
    Found(Decoded),
}

impl DecodeOutcome {
    /// The recovered message, if any was read at all.
    pub fn decoded(&self) -> Option<&Decoded> {
        match self {
            Self::NotFound => None,
            Self::LowConfidence(decoded) | Self::Found(decoded) => Some(decoded),
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, Self::Found(_))
    }
}

/// Reduces Block votes to a message.
///
/// The voted 128-bit codeword either is the message (full-size mode) or
/// feeds the short code, whose failure forces the outcome down to
/// LowConfidence no matter how coherent the vote looked.
pub fn assemble(blocks: &[BlockDecode], params: &Parameters) -> Result<DecodeOutcome> {
    let Some(vote) = weighted_vote(blocks) else {
        return Ok(DecodeOutcome::NotFound);
    };

    let bits = CODEWORD_BITS as f32;
    let confidence = vote.coherence.iter().sum::<f32>() / bits;
    let bit_error_estimate = vote.coherence.iter().map(|c| (1.0 - c) / 2.0).sum::<f32>() / bits;

    let (payload, corrected_errors, uncorrected) = if params.short {
        let code = ShortCode::new(params.payload_size)?;
        match code.decode(&vote.bits) {
            ShortDecode::Corrected { bits, errors } => {
                (Payload::from_bits(&bits)?, Some(errors), false)
            }
            ShortDecode::Uncorrectable => (
                Payload::from_bits(&vote.bits[..params.payload_size])?,
                None,
                true,
            ),
        }
    } else {
        (Payload::from_bits(&vote.bits)?, None, false)
    };

    let decoded = Decoded {
        payload,
        confidence,
        bit_error_estimate,
        corrected_errors,
        uncorrected,
        blocks: vote.blocks,
    };
    if decoded.uncorrected || decoded.confidence < FOUND_CONFIDENCE {
        Ok(DecodeOutcome::LowConfidence(decoded))
    } else {
        Ok(DecodeOutcome::Found(decoded))
    }
}

struct Vote {
    bits: Vec<bool>,
    coherence: Vec<f32>,
    blocks: usize,
}

/// Sums every Block's soft values weighted by its sync score.
///
/// Blocks with non-positive scores carry no information and are
/// skipped. A zero accumulator votes false, so the result is
/// deterministic even on degenerate input.
fn weighted_vote(blocks: &[BlockDecode]) -> Option<Vote> {
    let mut acc = vec![0.0f32; CODEWORD_BITS];
    let mut mag = vec![0.0f32; CODEWORD_BITS];
    let mut used = 0;
    for block in blocks {
        if block.score <= 0.0 {
            continue;
        }
        debug_assert_eq!(block.bit_soft.len(), CODEWORD_BITS);
        debug_assert_eq!(block.bit_mag.len(), CODEWORD_BITS);
        used += 1;
        for i in 0..CODEWORD_BITS {
            acc[i] += block.score * block.bit_soft[i];
            mag[i] += block.score * block.bit_mag[i];
        }
    }
    if used == 0 {
        return None;
    }

    let bits = acc.iter().map(|a| *a > 0.0).collect();
    let coherence = acc
        .iter()
        .zip(&mag)
        .map(|(a, m)| if *m > 0.0 { a.abs() / m } else { 0.0 })
        .collect();
    Some(Vote {
        bits,
        coherence,
        blocks: used,
    })
}
