//! Playback-speed detection by exhaustive resample trials.
//!
//! A recording played r× faster carries the mark compressed by r, which
//! breaks the frame grid long before it breaks the spectral patterns.
//! There is no closed-form estimator for r, so the scanner brute-forces
//! it: resample a short clip at each trial ratio, run a reduced sync
//! search over the result, and keep the ratio whose best window
//! correlates strongest. A coarse pass over the full range is refined
//! around its winner with a step ten times smaller per pass.

use crate::audio::AudioBuffer;
use crate::config::{Parameters, SpeedMode};
use crate::error::Result;
use crate::key::Key;
use crate::resample::resample;
use crate::sync::SyncFinder;

/// Slowest playback ratio the scan considers.
const RANGE_LOW: f64 = 0.85;

/// Fastest playback ratio the scan considers.
const RANGE_HIGH: f64 = 1.15;

/// Coarse grid step for the quick scan.
const QUICK_STEP: f64 = 0.005;

/// Coarse grid step for the patient scan.
const PATIENT_STEP: f64 = 0.002;

/// Trial ratios on each side of the carried best per refinement pass.
const REFINE_STEPS: i32 = 8;

/// Seconds of centred mono audio resampled per quick trial.
const QUICK_CLIP_SECONDS: u32 = 20;

/// Seconds of centred mono audio resampled per patient trial.
const PATIENT_CLIP_SECONDS: u32 = 40;

/// Sample offsets tried by the reduced sync pass of each trial.
const TRIAL_OFFSET_COUNT: usize = 4;

/// Outcome of a speed scan.
#[derive(Debug, Clone, Copy)]
pub struct SpeedScan {
    /// Detected playback-speed ratio (1.0 means unchanged).
    pub ratio: f64,
    /// Best sync correlation seen at that ratio.
    pub score: f32,
    /// Number of resample trials run.
    pub trials: usize,
}

/// Detects the playback-speed ratio of `buffer` per `params.speed`.
///
/// Disabled and Fixed modes return without touching the audio. Quick
/// and Patient scan the ±15 % range; ties keep the lower ratio because
/// grids run in ascending order and only a strictly better score
/// replaces the incumbent. Audio too short to hold a whole Block at any
/// trial ratio scores no trial and falls back to 1.0.
pub fn scan(buffer: &AudioBuffer, key: &Key, params: &Parameters) -> Result<SpeedScan> {
    let clip_seconds = match params.speed {
        SpeedMode::Disabled => {
            return Ok(SpeedScan { ratio: 1.0, score: 0.0, trials: 0 });
        }
        SpeedMode::Fixed(ratio) => {
            return Ok(SpeedScan { ratio, score: 0.0, trials: 0 });
        }
        SpeedMode::Quick => QUICK_CLIP_SECONDS,
        SpeedMode::Patient => PATIENT_CLIP_SECONDS,
    };

    let clip = speed_clip(buffer, clip_seconds);
    let offsets = trial_offsets(params);
    let mut finder = SyncFinder::new(key, params)?;
    let mut trials = 0;

    let coarse_step = match params.speed {
        SpeedMode::Quick => QUICK_STEP,
        _ => PATIENT_STEP,
    };
    let mut best = (1.0, f32::NEG_INFINITY);
    best = scan_grid(
        &mut finder,
        &clip,
        &offsets,
        &coarse_grid(coarse_step),
        best,
        &mut trials,
    )?;
    tracing::debug!("speed coarse pass: ratio {} score {}", best.0, best.1);

    let mut step = coarse_step / 10.0;
    best = scan_grid(
        &mut finder,
        &clip,
        &offsets,
        &refine_grid(best.0, step),
        best,
        &mut trials,
    )?;
    if matches!(params.speed, SpeedMode::Patient) {
        step /= 10.0;
        best = scan_grid(
            &mut finder,
            &clip,
            &offsets,
            &refine_grid(best.0, step),
            best,
            &mut trials,
        )?;
    }
    tracing::debug!("speed scan done: ratio {} score {} after {trials} trials", best.0, best.1);

    Ok(SpeedScan {
        ratio: best.0,
        score: best.1,
        trials,
    })
}

/// Runs one grid of trial ratios, carrying the incumbent best through.
fn scan_grid(
    finder: &mut SyncFinder,
    clip: &[f32],
    offsets: &[usize],
    ratios: &[f64],
    carry: (f64, f32),
    trials: &mut usize,
) -> Result<(f64, f32)> {
    let (mut best_ratio, mut best_score) = carry;
    for &ratio in ratios {
        let restored = resample(clip, ratio);
        let score = finder.best_score(&restored, 1, offsets)?;
        *trials += 1;
        tracing::trace!("speed trial: ratio {ratio} score {score}");
        if score > best_score {
            best_ratio = ratio;
            best_score = score;
        }
    }
    Ok((best_ratio, best_score))
}

/// Ascending ratios covering the whole range at `step`.
fn coarse_grid(step: f64) -> Vec<f64> {
    let count = ((RANGE_HIGH - RANGE_LOW) / step).round() as i32;
    (0..=count)
        .map(|i| RANGE_LOW + f64::from(i) * step)
        .collect()
}

/// Ascending ratios around `center`, skipping the already-tried centre.
fn refine_grid(center: f64, step: f64) -> Vec<f64> {
    (-REFINE_STEPS..=REFINE_STEPS)
        .filter(|i| *i != 0)
        .map(|i| center + f64::from(i) * step)
        .collect()
}

/// Evenly spaced sub-frame offsets for the reduced sync pass.
fn trial_offsets(params: &Parameters) -> Vec<usize> {
    (0..TRIAL_OFFSET_COUNT)
        .map(|i| i * params.frame_size / TRIAL_OFFSET_COUNT)
        .collect()
}

/// A centred mono clip of at most `seconds`, or the whole downmix.
fn speed_clip(buffer: &AudioBuffer, seconds: u32) -> Vec<f32> {
    let mono = buffer.downmix_mono();
    let want = seconds as usize * buffer.sample_rate() as usize;
    if mono.len() <= want {
        return mono;
    }
    let start = (mono.len() - want) / 2;
    mono[start..start + want].to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_mode_skips_the_scan() {
        let buffer = AudioBuffer::new(vec![0.0; 4096], 1, 44_100).unwrap();
        let key = Key::from_test_key(1);
        let params = Parameters::default();
        let scan = scan(&buffer, &key, &params).unwrap();
        assert_eq!(scan.ratio, 1.0);
        assert_eq!(scan.trials, 0);
    }

    #[test]
    fn fixed_mode_passes_the_ratio_through() {
        let buffer = AudioBuffer::new(vec![0.0; 4096], 1, 44_100).unwrap();
        let key = Key::from_test_key(1);
        let params = Parameters {
            speed: SpeedMode::Fixed(1.02),
            ..Parameters::default()
        };
        let scan = scan(&buffer, &key, &params).unwrap();
        assert_eq!(scan.ratio, 1.02);
        assert_eq!(scan.trials, 0);
    }

    #[test]
    fn coarse_grid_spans_the_range() {
        let quick = coarse_grid(QUICK_STEP);
        assert_eq!(quick.len(), 61);
        assert!((quick[0] - RANGE_LOW).abs() < 1e-12);
        assert!((quick[quick.len() - 1] - RANGE_HIGH).abs() < 1e-9);

        let patient = coarse_grid(PATIENT_STEP);
        assert_eq!(patient.len(), 151);
    }

    #[test]
    fn refine_grid_brackets_the_centre() {
        let grid = refine_grid(1.0, 0.0005);
        assert_eq!(grid.len(), 16);
        assert!((grid[0] - 0.996).abs() < 1e-12);
        assert!((grid[grid.len() - 1] - 1.004).abs() < 1e-12);
        assert!(grid.iter().all(|r| (*r - 1.0).abs() > 1e-9));
        assert!(grid.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn quick_scan_of_short_audio_falls_back_to_unity() {
        let buffer = AudioBuffer::new(vec![0.01; 13_230], 1, 44_100).unwrap();
        let key = Key::from_test_key(1);
        let params = Parameters {
            speed: SpeedMode::Quick,
            ..Parameters::default()
        };
        let scan = scan(&buffer, &key, &params).unwrap();
        assert_eq!(scan.ratio, 1.0);
        assert!(scan.trials > 0);
    }

    #[test]
    fn clip_is_centred_and_bounded() {
        let samples: Vec<f32> = (0..10 * 44_100).map(|i| i as f32).collect();
        let buffer = AudioBuffer::new(samples, 1, 44_100).unwrap();
        let clip = speed_clip(&buffer, 2);
        assert_eq!(clip.len(), 2 * 44_100);
        assert_eq!(clip[0], (4 * 44_100) as f32);

        let short = speed_clip(&buffer, 60);
        assert_eq!(short.len(), 10 * 44_100);
    }
}
