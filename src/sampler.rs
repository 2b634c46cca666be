//! Timestamp selection for thumbnails and still extraction.

use serde::{Deserialize, Serialize};

use crate::foundation::error::{ClipmarkError, ClipmarkResult};

/// Safety margin kept between the last requested timestamp and the clip end.
///
/// Decoders commonly return nothing when asked for a frame exactly at the end of the stream.
pub const DEFAULT_END_MARGIN_SEC: f64 = 0.1;

/// Upper bound on the number of timestamps a single policy may produce.
pub const MAX_SAMPLES: usize = 100_000;

/// Rule for choosing the timestamps to pull frames at.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SamplingPolicy {
    /// `n >= 2` timestamps evenly spaced from the start to the usable end, inclusive.
    ByCount(u32),
    /// Timestamps `0, step, 2*step, ...` strictly before the usable end.
    ByInterval(f64),
}

impl SamplingPolicy {
    pub fn validate(&self) -> ClipmarkResult<()> {
        match *self {
            Self::ByCount(n) if n < 2 => Err(ClipmarkError::validation(format!(
                "frame count must be >= 2, got {n}"
            ))),
            Self::ByCount(n) if n as usize > MAX_SAMPLES => Err(ClipmarkError::validation(
                format!("frame count must be <= {MAX_SAMPLES}, got {n}"),
            )),
            Self::ByInterval(step) if !step.is_finite() || step <= 0.0 => {
                Err(ClipmarkError::validation(format!(
                    "frame interval must be finite and > 0, got {step}"
                )))
            }
            _ => Ok(()),
        }
    }
}

/// Sample `policy` over a clip of `duration_sec`, keeping [`DEFAULT_END_MARGIN_SEC`] clear of the
/// end.
pub fn sample(duration_sec: f64, policy: &SamplingPolicy) -> ClipmarkResult<Vec<f64>> {
    sample_with_margin(duration_sec, policy, DEFAULT_END_MARGIN_SEC)
}

/// Like [`sample`] with an explicit end margin.
///
/// An empty result means the clip is too short to sample; callers report that as "no frames to
/// extract".
pub fn sample_with_margin(
    duration_sec: f64,
    policy: &SamplingPolicy,
    end_margin_sec: f64,
) -> ClipmarkResult<Vec<f64>> {
    if !duration_sec.is_finite() || duration_sec < 0.0 {
        return Err(ClipmarkError::validation(format!(
            "clip duration must be finite and >= 0, got {duration_sec}"
        )));
    }
    if !end_margin_sec.is_finite() || end_margin_sec <= 0.0 {
        return Err(ClipmarkError::validation(
            "end margin must be finite and > 0",
        ));
    }
    policy.validate()?;

    if duration_sec == 0.0 {
        return Ok(Vec::new());
    }
    let usable_end = duration_sec - end_margin_sec;

    match *policy {
        SamplingPolicy::ByCount(n) => {
            let end = usable_end.max(0.0);
            let last = f64::from(n - 1);
            Ok((0..n).map(|i| end * f64::from(i) / last).collect())
        }
        SamplingPolicy::ByInterval(step) => {
            if usable_end <= 0.0 {
                return Ok(Vec::new());
            }
            let count = (usable_end / step).ceil();
            if count > MAX_SAMPLES as f64 {
                return Err(ClipmarkError::validation(format!(
                    "interval {step}s over {duration_sec}s would produce more than {MAX_SAMPLES} frames"
                )));
            }
            // Index-based so spacing does not accumulate rounding error.
            Ok((0u64..)
                .map(|k| k as f64 * step)
                .take_while(|&t| t < usable_end)
                .collect())
        }
    }
}
