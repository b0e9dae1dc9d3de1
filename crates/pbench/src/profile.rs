//! Load profile: the throughput curve a run should follow.

use std::time::Duration;

use serde::Serialize;

use crate::error::{PbenchError, Result};

/// Declarative load shape for one run.
///
/// The timeline is `[0, ramp_up)` followed by `[ramp_up, ramp_up + hold_for)`.
/// During ramp-up the rate climbs from zero to `throughput`, either linearly
/// (`steps == 0`) or as a staircase of `steps` equal intervals.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoadProfile {
    /// Number of parallel connections the generator keeps open.
    pub concurrency: u32,
    /// Target requests per second, 0 means unconstrained.
    pub throughput: f64,
    pub ramp_up: Duration,
    /// `None` holds the final rate indefinitely.
    pub hold_for: Option<Duration>,
    /// 0 means a continuous ramp.
    pub steps: u32,
    /// Stop after exactly this many requests regardless of elapsed time.
    pub iterations: Option<u64>,
}

impl Default for LoadProfile {
    fn default() -> Self {
        Self {
            concurrency: 1,
            throughput: 0.0,
            ramp_up: Duration::ZERO,
            hold_for: Some(Duration::ZERO),
            steps: 0,
            iterations: None,
        }
    }
}

impl LoadProfile {
    /// Total planned run time, `None` when the hold is unbounded.
    ///
    /// Saturates at `Duration::MAX`; `validate` rejects such profiles.
    pub fn duration(&self) -> Option<Duration> {
        self.hold_for.map(|hold| self.ramp_up.saturating_add(hold))
    }

    pub fn ramp_up_secs(&self) -> f64 {
        self.ramp_up.as_secs_f64()
    }

    /// Whether the profile has neither a duration nor an iteration bound.
    pub fn is_empty(&self) -> bool {
        matches!(self.iterations, None | Some(0)) && self.duration() == Some(Duration::ZERO)
    }

    /// Instantaneous target rate (requests/sec) at `t` seconds from start.
    pub fn rate_at(&self, t: f64) -> f64 {
        if t < 0.0 {
            return 0.0;
        }
        let ramp = self.ramp_up_secs();
        if t >= ramp {
            return self.throughput;
        }
        if self.steps == 0 {
            self.throughput * t / ramp
        } else {
            let steps = f64::from(self.steps);
            let step_len = ramp / steps;
            let index = ((t / step_len).floor()).min(steps - 1.0);
            self.throughput * (index + 1.0) / steps
        }
    }

    /// Check the profile can be turned into a rate-driven schedule.
    pub fn validate(&self) -> Result<()> {
        if !self.throughput.is_finite() || self.throughput < 0.0 {
            return Err(PbenchError::UnsupportedLoadProfile(format!(
                "throughput must be a non-negative number, got {}",
                self.throughput
            )));
        }
        if self.throughput == 0.0 {
            return Err(PbenchError::UnsupportedLoadProfile(
                "only throughput-driven schedules are supported, set a non-zero throughput"
                    .to_string(),
            ));
        }
        if let Some(hold) = self.hold_for {
            if self.ramp_up.checked_add(hold).is_none() {
                return Err(PbenchError::UnsupportedLoadProfile(
                    "ramp-up plus hold-for does not fit in a duration".to_string(),
                ));
            }
        }
        if self.is_empty() {
            return Err(PbenchError::UnsupportedLoadProfile(
                "neither a duration nor an iteration limit is set".to_string(),
            ));
        }
        Ok(())
    }
}
