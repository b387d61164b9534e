//! Decodes a message from audio that may be shifted, truncated or
//! resampled.
//!
//! The pipeline runs speed detection, whole-signal restoration, sync
//! search, per-Block soft extraction and the weighted vote, in that
//! order. Nothing here retries: the search grids inside the speed and
//! sync stages are the only exhaustiveness the decoder needs.

use crate::assemble::{self, BlockDecode, DecodeOutcome};
use crate::audio::AudioBuffer;
use crate::codec::{self, FrameCodec, SYNC_FRAME_COUNT};
use crate::config::Parameters;
use crate::error::{Error, Result};
use crate::key::Key;
use crate::payload::Payload;
use crate::resample;
use crate::shortcode::CODEWORD_BITS;
use crate::speed;
use crate::sync::SyncFinder;

/// Detected ratios closer to 1 than this are not worth a resample pass.
const SPEED_EPSILON: f64 = 1e-6;

/// One sync candidate as reported to the caller.
#[derive(Debug, Clone, Copy)]
pub struct CandidateReport {
    /// Block start in samples per channel of the analyzed signal.
    pub offset: usize,
    /// Playback-speed ratio the signal was corrected by.
    pub ratio: f64,
    /// Sync correlation of the candidate.
    pub score: f32,
}

/// What the decoder saw along the way, found or not.
#[derive(Debug, Clone)]
pub struct DecodeDiagnostics {
    /// Candidates that went into the vote, ranked best first.
    pub candidates: Vec<CandidateReport>,
    /// Detected playback-speed ratio (1.0 when not scanned).
    pub speed_ratio: f64,
    /// Resample trials the speed scan ran.
    pub speed_trials: usize,
    /// Best sync correlation seen anywhere in the search.
    pub best_sync_score: f32,
}

/// Decode verdict plus diagnostics.
#[derive(Debug, Clone)]
pub struct DecodeReport {
    pub outcome: DecodeOutcome,
    pub diagnostics: DecodeDiagnostics,
}

/// Result of checking a decode against an expected message.
#[derive(Debug, Clone)]
pub struct Comparison {
    pub outcome: DecodeOutcome,
    /// Bit errors of the voted message against the expected one.
    pub bit_errors: usize,
    pub bit_error_rate: f32,
    /// Candidates whose individual vote reproduced the expected
    /// message exactly.
    pub match_count: usize,
    /// Whether `match_count` reached `params.required_matches`.
    pub required_met: bool,
}

/// Decodes whatever message `buffer` carries under `key`.
///
/// Audio shorter than one frame is an error; audio shorter than one
/// Block decodes to NotFound. Everything else is a verdict, not an
/// error: unmarked audio comes back NotFound with the search
/// diagnostics filled in.
pub fn decode(buffer: &AudioBuffer, key: &Key, params: &Parameters) -> Result<DecodeReport> {
    let analysis = analyze(buffer, key, params)?;
    let outcome = assemble::assemble(&analysis.blocks, params)?;
    tracing::debug!(
        "decode: {} candidates, best sync {}",
        analysis.blocks.len(),
        analysis.best_sync_score
    );
    Ok(DecodeReport {
        diagnostics: analysis.into_diagnostics(),
        outcome,
    })
}

/// Decodes `buffer` and grades the result against `expected`.
///
/// A message of the wrong length cannot match: it counts as total
/// failure normally and is a hard error under strict mode.
pub fn compare(
    buffer: &AudioBuffer,
    key: &Key,
    expected: &Payload,
    params: &Parameters,
) -> Result<Comparison> {
    if expected.bits() != params.payload_size {
        if params.strict {
            return Err(Error::InvalidPayloadLength {
                expected: params.payload_size,
                got: expected.bits(),
            });
        }
        let report = decode(buffer, key, params)?;
        return Ok(Comparison {
            outcome: report.outcome,
            bit_errors: params.payload_size,
            bit_error_rate: 1.0,
            match_count: 0,
            required_met: false,
        });
    }

    let analysis = analyze(buffer, key, params)?;
    let outcome = assemble::assemble(&analysis.blocks, params)?;

    let mut match_count = 0;
    for block in &analysis.blocks {
        let vote = assemble::assemble(std::slice::from_ref(block), params)?;
        if vote.decoded().is_some_and(|d| d.payload == *expected) {
            match_count += 1;
        }
    }

    let bit_errors = match outcome.decoded() {
        Some(decoded) => decoded
            .payload
            .as_bytes()
            .iter()
            .zip(expected.as_bytes())
            .map(|(a, b)| (a ^ b).count_ones() as usize)
            .sum(),
        None => params.payload_size,
    };
    let required = params.required_matches.unwrap_or(1);

    Ok(Comparison {
        outcome,
        bit_errors,
        bit_error_rate: bit_errors as f32 / params.payload_size as f32,
        match_count,
        required_met: match_count >= required,
    })
}

struct Analysis {
    blocks: Vec<BlockDecode>,
    speed_ratio: f64,
    speed_trials: usize,
    best_sync_score: f32,
}

impl Analysis {
    fn into_diagnostics(self) -> DecodeDiagnostics {
        DecodeDiagnostics {
            candidates: self
                .blocks
                .iter()
                .map(|b| CandidateReport {
                    offset: b.offset,
                    ratio: self.speed_ratio,
                    score: b.score,
                })
                .collect(),
            speed_ratio: self.speed_ratio,
            speed_trials: self.speed_trials,
            best_sync_score: self.best_sync_score,
        }
    }
}

/// Runs the search stages and extracts per-Block votes.
fn analyze(buffer: &AudioBuffer, key: &Key, params: &Parameters) -> Result<Analysis> {
    params.validate()?;

    let taps = apply_test_taps(buffer, params);
    let received = taps.as_ref().unwrap_or(buffer);
    if received.len() < params.frame_size {
        return Err(Error::AudioTooShort {
            needed: params.frame_size,
            got: received.len(),
        });
    }

    let scan = speed::scan(received, key, params)?;
    let restored;
    let signal = if (scan.ratio - 1.0).abs() > SPEED_EPSILON {
        restored = resample::resample_buffer(received, scan.ratio)?;
        &restored
    } else {
        received
    };

    if signal.len() < codec::block_samples(params) {
        return Ok(Analysis {
            blocks: Vec::new(),
            speed_ratio: scan.ratio,
            speed_trials: scan.trials,
            best_sync_score: 0.0,
        });
    }

    let mut finder = SyncFinder::new(key, params)?;
    let samples = signal.samples();
    let channels = signal.channels();
    let search = if params.test_no_sync {
        finder.assumed(samples, channels)?
    } else {
        finder.find(samples, channels)?
    };

    let assignment = codec::bit_assignment(key, params);
    let mut codec = FrameCodec::new(key, params)?;
    let mut blocks = Vec::with_capacity(search.candidates.len());
    for candidate in &search.candidates {
        let mut bit_soft = vec![0.0f32; CODEWORD_BITS];
        let mut bit_mag = vec![0.0f32; CODEWORD_BITS];
        for (q, &bit_index) in assignment.iter().enumerate() {
            let start = candidate.offset + (SYNC_FRAME_COUNT + q) * params.frame_size;
            let soft = codec.data_soft(samples, channels, start, q as u32)?;
            bit_soft[bit_index] += soft;
            bit_mag[bit_index] += soft.abs();
        }
        tracing::trace!(
            "block candidate at {} scored {}",
            candidate.offset,
            candidate.score
        );
        blocks.push(BlockDecode {
            offset: candidate.offset,
            score: candidate.score,
            bit_soft,
            bit_mag,
        });
    }

    Ok(Analysis {
        blocks,
        speed_ratio: scan.ratio,
        speed_trials: scan.trials,
        best_sync_score: search.best_score,
    })
}

/// Decode-side damage taps for tests: drop a leading cut, then
/// truncate, in that order.
fn apply_test_taps(buffer: &AudioBuffer, params: &Parameters) -> Option<AudioBuffer> {
    let mut out: Option<AudioBuffer> = None;
    if let Some(cut) = params.test_cut {
        let src = out.as_ref().unwrap_or(buffer);
        out = Some(src.window(cut, src.len().saturating_sub(cut)));
    }
    if let Some(seconds) = params.test_truncate_seconds {
        let src = out.as_ref().unwrap_or(buffer);
        let keep = seconds as usize * src.sample_rate() as usize;
        if keep < src.len() {
            out = Some(src.window(0, keep));
        }
    }
    out
}
