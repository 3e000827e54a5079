//! Latency sampling.
//!
//! A [`Cdf`] is the sampling contract consumed by the link model: given a uniform draw in
//! `[0, 1)`, it inverts to a nanosecond delay. How the table is produced (loaded from a file, or
//! generated from summary statistics) is out of scope here; we only specify the contract and a
//! convenience generator for the common `{center, width, tail}` form used in topology files.

use rand::Rng;
use sim_time::SimulationTime;

/// A point on the cumulative distribution: `fraction` of samples fall at or below `delay`.
#[derive(Copy, Clone, Debug)]
pub struct CdfPoint {
    pub delay: SimulationTime,
    pub fraction: f64,
}

/// A monotonic latency distribution, sampled by inverse-transform.
#[derive(Clone, Debug)]
pub struct Cdf {
    // sorted by `fraction`, strictly increasing, first fraction > 0.0, last fraction == 1.0
    points: Vec<CdfPoint>,
}

#[derive(Debug)]
pub enum CdfError {
    Empty,
    NotMonotonic,
    LastFractionNotOne,
}

impl Cdf {
    /// Build a CDF from explicit (delay, cumulative fraction) points, as would be read from a
    /// CDF file. Points must be sorted by increasing delay and fraction, and the final fraction
    /// must be `1.0`.
    pub fn from_points(points: Vec<CdfPoint>) -> Result<Self, CdfError> {
        if points.is_empty() {
            return Err(CdfError::Empty);
        }
        for w in points.windows(2) {
            if w[1].delay < w[0].delay || w[1].fraction <= w[0].fraction {
                return Err(CdfError::NotMonotonic);
            }
        }
        if (points.last().unwrap().fraction - 1.0).abs() > 1e-9 {
            return Err(CdfError::LastFractionNotOne);
        }
        Ok(Self { points })
    }

    /// A fixed-latency "distribution": every sample returns exactly `latency`. Useful for tests
    /// and for the common topology shorthand of a single constant-latency link.
    pub fn constant(latency: SimulationTime) -> Self {
        Self {
            points: vec![CdfPoint {
                delay: latency,
                fraction: 1.0,
            }],
        }
    }

    /// Generate a CDF from the `{center, width, tail}` summary form. `center` and `width` are in
    /// nanoseconds; `tail` controls how heavy the upper tail is (higher = heavier). This
    /// approximates the generative CDFs that Shadow topology files can request instead of
    /// shipping a full table: a piecewise-linear rise to `center`, then a decaying tail out to
    /// `center + width * (1 + tail)`.
    pub fn generate(center: SimulationTime, width: SimulationTime, tail: f64) -> Self {
        const STEPS: u32 = 20;
        let center_ns = center.as_nanos() as f64;
        let width_ns = width.as_nanos().max(1) as f64;
        let tail = tail.max(0.0);

        let mut points = Vec::with_capacity(STEPS as usize);
        for i in 1..=STEPS {
            let frac = i as f64 / STEPS as f64;
            // piecewise: first 80% of mass rises linearly to `center`, remaining 20% stretches
            // into the tail, whose length grows with `tail`.
            let delay_ns = if frac <= 0.8 {
                center_ns * (frac / 0.8)
            } else {
                let tail_frac = (frac - 0.8) / 0.2;
                center_ns + width_ns * (1.0 + tail) * tail_frac
            };
            points.push(CdfPoint {
                delay: SimulationTime::from_nanos(delay_ns.max(0.0) as u64),
                fraction: frac,
            });
        }
        // force exact endpoints after the float math above
        points.last_mut().unwrap().fraction = 1.0;
        Self { points }
    }

    /// The minimum delay this CDF can ever sample (used to derive the scheduler's Δ_min floor).
    pub fn min_delay(&self) -> SimulationTime {
        self.points
            .iter()
            .map(|p| p.delay)
            .min()
            .unwrap_or(SimulationTime::ZERO)
    }

    /// Draw a latency sample using the given RNG. Per §5 Concurrency & Resource Model, callers
    /// must pass a per-host RNG, never a shared global one.
    pub fn sample(&self, rng: &mut impl Rng) -> SimulationTime {
        let u: f64 = rng.gen_range(0.0..1.0);
        // first point whose cumulative fraction is >= u
        match self.points.iter().find(|p| p.fraction >= u) {
            Some(p) => p.delay,
            None => self.points.last().unwrap().delay,
        }
    }

    /// (p25, p50, p75) latency quartiles, computed from the table. Used for the optional summary
    /// a [`crate::Link`] may carry.
    pub fn quartiles(&self) -> (SimulationTime, SimulationTime, SimulationTime) {
        let at = |q: f64| -> SimulationTime {
            self.points
                .iter()
                .find(|p| p.fraction >= q)
                .map(|p| p.delay)
                .unwrap_or_else(|| self.points.last().unwrap().delay)
        };
        (at(0.25), at(0.5), at(0.75))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn constant_always_samples_the_same_value() {
        let cdf = Cdf::constant(SimulationTime::from_millis(50));
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        for _ in 0..50 {
            assert_eq!(cdf.sample(&mut rng), SimulationTime::from_millis(50));
        }
    }

    #[test]
    fn sampling_stays_within_the_table_range() {
        let cdf = Cdf::generate(
            SimulationTime::from_millis(100),
            SimulationTime::from_millis(20),
            0.5,
        );
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let max = cdf.points.last().unwrap().delay;
        for _ in 0..1000 {
            let sample = cdf.sample(&mut rng);
            assert!(sample <= max);
        }
    }

    #[test]
    fn rejects_a_table_that_does_not_end_at_one() {
        let points = vec![CdfPoint {
            delay: SimulationTime::from_millis(1),
            fraction: 0.9,
        }];
        assert!(matches!(
            Cdf::from_points(points),
            Err(CdfError::LastFractionNotOne)
        ));
    }
}
