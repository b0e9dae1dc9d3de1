//! Load schedule generation.
//!
//! Turns a [`LoadProfile`] and an ordered list of [`TestCase`]s into a lazy,
//! time-ordered sequence of [`ScheduleItem`]s.
//!
//! # Discretization
//!
//! The continuous rate curve is integrated into a request credit
//!
//! ```text
//! C(t) = ∫₀ᵗ rate(s) ds
//! ```
//!
//! and item `k` fires at the instant where `C(t) = k + ½`. Fractional credit
//! is therefore carried across seconds instead of being rounded per second:
//! the number of items in any window `[a, b)` differs from `C(b) - C(a)` by
//! less than one, and in constant-rate regions successive fire times are
//! exactly `1 / rate` apart. Items sit mid-way between credit boundaries, so
//! with an integral rate no item lands on a whole second and a one-second
//! bucket never holds more than `rate` items.
//!
//! `C` is piecewise quadratic (linear ramp) or piecewise linear (stepped ramp,
//! hold), so every fire time is solved in closed form with no per-item state
//! beyond the item index. That keeps the sequence restartable: cloning a
//! [`Schedule`] or calling [`generate`] again replays it exactly.

use std::io::Write;

use crate::error::{PbenchError, Result};
use crate::profile::LoadProfile;
use crate::testcase::TestCase;

/// A test case and the moment it should be fired.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduleItem<'a> {
    /// Seconds from the start of the run.
    pub fire_time: f64,
    pub test_case: &'a TestCase,
}

impl ScheduleItem<'_> {
    /// Fire time at the generator's millisecond granularity.
    pub fn fire_ms(&self) -> u64 {
        (self.fire_time * 1000.0).round() as u64
    }

    /// Write this item as a schedule artifact record:
    /// `<payload-len> <fire-ms> <marker>\n<payload>\n`.
    pub fn write_to<W: Write>(&self, out: &mut W) -> Result<()> {
        writeln!(
            out,
            "{} {} {}",
            self.test_case.payload.len(),
            self.fire_ms(),
            self.test_case.marker
        )?;
        out.write_all(&self.test_case.payload)?;
        out.write_all(b"\n")?;
        Ok(())
    }
}

/// Closed-form view of the credit curve for one profile.
#[derive(Debug, Clone, Copy)]
struct CreditCurve {
    throughput: f64,
    ramp: f64,
    steps: u32,
}

impl CreditCurve {
    fn new(profile: &LoadProfile) -> Self {
        Self {
            throughput: profile.throughput,
            ramp: profile.ramp_up_secs(),
            steps: profile.steps,
        }
    }

    /// Credit earned by a single full step interval at the lowest level.
    fn step_unit(&self) -> f64 {
        let steps = f64::from(self.steps);
        self.throughput * (self.ramp / steps) / steps
    }

    /// Credit accumulated after `i` complete step intervals.
    fn credit_after_steps(&self, i: u32) -> f64 {
        let i = f64::from(i);
        self.step_unit() * i * (i + 1.0) / 2.0
    }

    /// Total credit accumulated over the whole ramp.
    fn ramp_credit(&self) -> f64 {
        if self.ramp <= 0.0 {
            0.0
        } else if self.steps == 0 {
            self.throughput * self.ramp / 2.0
        } else {
            self.credit_after_steps(self.steps)
        }
    }

    fn credit_at(&self, t: f64) -> f64 {
        if t <= 0.0 {
            return 0.0;
        }
        if t >= self.ramp {
            return self.ramp_credit() + self.throughput * (t - self.ramp);
        }
        if self.steps == 0 {
            self.throughput * t * t / (2.0 * self.ramp)
        } else {
            let step_len = self.ramp / f64::from(self.steps);
            let i = ((t / step_len).floor() as u32).min(self.steps - 1);
            let rate = self.throughput * f64::from(i + 1) / f64::from(self.steps);
            self.credit_after_steps(i) + rate * (t - f64::from(i) * step_len)
        }
    }

    /// Inverse of `credit_at`: the earliest time at which `credit` is reached.
    fn time_for_credit(&self, credit: f64) -> f64 {
        let ramp_credit = self.ramp_credit();
        if credit >= ramp_credit {
            return self.ramp + (credit - ramp_credit) / self.throughput;
        }

        if self.steps == 0 {
            return (2.0 * credit * self.ramp / self.throughput).sqrt();
        }

        // Solve u*i*(i+1)/2 <= credit for the current step, then nudge for rounding
        let unit = self.step_unit();
        let estimate = ((1.0 + 8.0 * credit / unit).sqrt() - 1.0) / 2.0;
        let mut i = (estimate.floor().max(0.0) as u32).min(self.steps - 1);
        while i + 1 < self.steps && self.credit_after_steps(i + 1) <= credit {
            i += 1;
        }
        while i > 0 && self.credit_after_steps(i) > credit {
            i -= 1;
        }

        let step_len = self.ramp / f64::from(self.steps);
        let rate = self.throughput * f64::from(i + 1) / f64::from(self.steps);
        f64::from(i) * step_len + (credit - self.credit_after_steps(i)) / rate
    }
}

/// Lazy firing schedule. Cloning restarts from the current position.
#[derive(Debug, Clone)]
pub struct Schedule<'a> {
    curve: CreditCurve,
    test_cases: &'a [TestCase],
    /// Duration bound in seconds, ignored when `iterations` is set.
    end: Option<f64>,
    iterations: Option<u64>,
    next_index: u64,
    done: bool,
}

impl<'a> Schedule<'a> {
    /// Whether the schedule terminates.
    pub fn is_finite(&self) -> bool {
        self.iterations.is_some() || self.end.is_some()
    }

    /// Request credit accumulated by `t` seconds from start.
    pub fn credit_at(&self, t: f64) -> f64 {
        self.curve.credit_at(t)
    }

    /// Number of items the schedule will produce, `None` when unbounded.
    pub fn planned_items(&self) -> Option<u64> {
        if let Some(iterations) = self.iterations {
            return Some(iterations);
        }
        self.end.map(|end| {
            // count of k with k + 1/2 < C(end)
            let credit = self.curve.credit_at(end);
            (credit - 0.5).ceil().max(0.0) as u64
        })
    }

    /// Stream the remaining items as artifact records, returning the count.
    pub fn write_to<W: Write>(self, out: &mut W) -> Result<u64> {
        if !self.is_finite() {
            return Err(PbenchError::UnsupportedLoadProfile(
                "cannot materialize an unbounded schedule, set iterations or hold-for"
                    .to_string(),
            ));
        }
        let mut written = 0;
        for item in self {
            item.write_to(out)?;
            written += 1;
        }
        Ok(written)
    }
}

impl<'a> Iterator for Schedule<'a> {
    type Item = ScheduleItem<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let index = self.next_index;
        if let Some(iterations) = self.iterations {
            if index >= iterations {
                self.done = true;
                return None;
            }
        }

        let fire_time = self.curve.time_for_credit(index as f64 + 0.5);
        if self.iterations.is_none() {
            if let Some(end) = self.end {
                if fire_time >= end {
                    self.done = true;
                    return None;
                }
            }
        }

        self.next_index += 1;
        let test_case = &self.test_cases[(index % self.test_cases.len() as u64) as usize];
        Some(ScheduleItem {
            fire_time,
            test_case,
        })
    }
}

/// Build the firing schedule for `profile` over `test_cases`.
///
/// Fails before producing anything when the profile cannot be scheduled or
/// there is nothing to fire.
pub fn generate<'a>(profile: &LoadProfile, test_cases: &'a [TestCase]) -> Result<Schedule<'a>> {
    profile.validate()?;
    if test_cases.is_empty() {
        return Err(PbenchError::EmptyTestCaseSet);
    }

    Ok(Schedule {
        curve: CreditCurve::new(profile),
        test_cases,
        end: profile.duration().map(|d| d.as_secs_f64()),
        // zero iterations means no iteration bound
        iterations: profile.iterations.filter(|&n| n > 0),
        next_index: 0,
        done: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn cases(n: usize) -> Vec<TestCase> {
        (0..n)
            .map(|i| TestCase::new(i, format!("case{}", i), format!("payload{}", i)))
            .collect()
    }

    fn profile(throughput: f64, ramp_up: u64, steps: u32, hold_for: u64) -> LoadProfile {
        LoadProfile {
            throughput,
            ramp_up: Duration::from_secs(ramp_up),
            steps,
            hold_for: Some(Duration::from_secs(hold_for)),
            ..LoadProfile::default()
        }
    }

    #[test]
    fn test_empty_profile_is_unsupported() {
        let tc = cases(1);
        let err = generate(&LoadProfile::default(), &tc).unwrap_err();
        assert!(matches!(err, PbenchError::UnsupportedLoadProfile(_)));
    }

    #[test]
    fn test_empty_test_cases() {
        let err = generate(&profile(10.0, 0, 0, 10), &[]).unwrap_err();
        assert!(matches!(err, PbenchError::EmptyTestCaseSet));
    }

    #[test]
    fn test_hold_spacing_is_inverse_rate() {
        let tc = cases(1);
        let items: Vec<_> = generate(&profile(4.0, 0, 0, 2), &tc).unwrap().collect();
        assert_eq!(items.len(), 8);
        for pair in items.windows(2) {
            assert!((pair[1].fire_time - pair[0].fire_time - 0.25).abs() < 1e-9);
        }
        assert!((items[0].fire_time - 0.125).abs() < 1e-9);
    }

    #[test]
    fn test_stepped_ramp_total_and_bucket_bound() {
        let tc = cases(2);
        let schedule = generate(&profile(9.0, 12, 3, 0), &tc).unwrap();
        assert_eq!(schedule.planned_items(), Some(72));

        let mut buckets = std::collections::BTreeMap::new();
        let mut count = 0;
        for item in schedule {
            *buckets.entry(item.fire_time.ceil() as i64).or_insert(0u32) += 1;
            count += 1;
        }
        assert_eq!(count, 72);
        assert!(buckets.values().all(|&n| n <= 9));
        assert_eq!(buckets[&1], 3);
        assert_eq!(buckets[&12], 9);
    }

    #[test]
    fn test_linear_ramp_credit_matches_integral() {
        let tc = cases(1);
        let schedule = generate(&profile(100.0, 10, 0, 0), &tc).unwrap();
        let items: Vec<_> = schedule.clone().collect();
        // ∫0..10 of 10t dt = 500
        assert_eq!(items.len(), 500);
        let in_window = items
            .iter()
            .filter(|i| i.fire_time >= 4.0 && i.fire_time < 6.0)
            .count() as f64;
        let expected = schedule.credit_at(6.0) - schedule.credit_at(4.0);
        assert!((in_window - expected).abs() <= 1.0);
    }

    #[test]
    fn test_iterations_override_duration() {
        let tc = cases(3);
        let p = LoadProfile {
            iterations: Some(25),
            ..profile(10.0, 0, 0, 1)
        };
        let items: Vec<_> = generate(&p, &tc).unwrap().collect();
        assert_eq!(items.len(), 25);
        assert!(items.last().unwrap().fire_time > 1.0);
    }

    #[test]
    fn test_unbounded_hold_is_infinite() {
        let tc = cases(1);
        let p = LoadProfile {
            hold_for: None,
            ..profile(1000.0, 1, 0, 0)
        };
        let schedule = generate(&p, &tc).unwrap();
        assert!(!schedule.is_finite());
        assert_eq!(schedule.planned_items(), None);
        assert_eq!(schedule.take(10_000).count(), 10_000);
    }

    #[test]
    fn test_round_robin_assignment() {
        let tc = cases(3);
        let items: Vec<_> = generate(&profile(50.0, 0, 0, 1), &tc).unwrap().collect();
        for (i, item) in items.iter().enumerate() {
            assert_eq!(item.test_case.index, i % 3);
        }
    }

    #[test]
    fn test_record_format() {
        let tc = vec![TestCase::new(0, "root", "GET / HTTP/1.1\r\n\r\n")];
        let item = ScheduleItem {
            fire_time: 1.25,
            test_case: &tc[0],
        };
        let mut buf = Vec::new();
        item.write_to(&mut buf).unwrap();
        assert_eq!(
            String::from_utf8(buf).unwrap(),
            "18 1250 root\nGET / HTTP/1.1\r\n\r\n\n"
        );
    }

    #[test]
    fn test_write_refuses_unbounded() {
        let tc = cases(1);
        let p = LoadProfile {
            hold_for: None,
            ..profile(10.0, 0, 0, 0)
        };
        let mut sink = Vec::new();
        let err = generate(&p, &tc).unwrap().write_to(&mut sink).unwrap_err();
        assert!(matches!(err, PbenchError::UnsupportedLoadProfile(_)));
        assert!(sink.is_empty());
    }
}
