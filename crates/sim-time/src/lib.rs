//! The simulation's virtual clock.
//!
//! `SimulationTime` represents an instant or a duration in nanoseconds since the simulation
//! started. It intentionally mirrors `std::time::Duration`'s API surface so that code ported from
//! wall-clock reasoning reads naturally, but it is a distinct type: simulated time and real time
//! must never be implicitly mixed.

use std::fmt;

/// A point in (or duration of) simulated time, in nanoseconds.
///
/// The all-ones bit pattern is a reserved sentinel meaning "invalid" or "never"; it is never a
/// valid simulation instant and is never produced by the arithmetic below.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct SimulationTime(u64);

/// The sentinel bit pattern for "invalid/never". Kept distinct from `MAX` so that ordinary
/// arithmetic near the end of the valid range can never accidentally produce it.
const INVALID: u64 = u64::MAX;

impl SimulationTime {
    pub const ZERO: SimulationTime = SimulationTime(0);
    pub const NANOSECOND: SimulationTime = SimulationTime(1);
    pub const MICROSECOND: SimulationTime = SimulationTime(1_000);
    pub const MILLISECOND: SimulationTime = SimulationTime(1_000_000);
    pub const SECOND: SimulationTime = SimulationTime(1_000_000_000);
    pub const MINUTE: SimulationTime = SimulationTime(60 * 1_000_000_000);
    /// The largest representable simulation time. One less than the invalid sentinel so the
    /// sentinel can never be confused with a legitimate (if enormous) instant.
    pub const MAX: SimulationTime = SimulationTime(INVALID - 1);

    pub const fn from_nanos(n: u64) -> Self {
        assert!(n != INVALID, "nanosecond count collides with the invalid sentinel");
        Self(n)
    }

    pub const fn from_micros(n: u64) -> Self {
        Self::from_nanos(n * 1_000)
    }

    pub const fn from_millis(n: u64) -> Self {
        Self::from_nanos(n * 1_000_000)
    }

    pub const fn from_secs(n: u64) -> Self {
        Self::from_nanos(n * 1_000_000_000)
    }

    /// The reserved "invalid/never" value. Any event scheduled with this time is a fatal engine
    /// error (see `Engine::schedule`).
    pub const fn invalid() -> Self {
        Self(INVALID)
    }

    pub const fn is_invalid(&self) -> bool {
        self.0 == INVALID
    }

    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub const fn as_nanos(&self) -> u64 {
        self.0
    }

    pub const fn as_micros(&self) -> u64 {
        self.0 / 1_000
    }

    pub const fn as_millis(&self) -> u64 {
        self.0 / 1_000_000
    }

    pub const fn as_secs_f64(&self) -> f64 {
        self.0 as f64 / 1_000_000_000.0
    }

    pub fn checked_add(self, other: Self) -> Option<Self> {
        if self.is_invalid() || other.is_invalid() {
            return None;
        }
        let sum = self.0.checked_add(other.0)?;
        (sum != INVALID).then_some(Self(sum))
    }

    pub fn checked_sub(self, other: Self) -> Option<Self> {
        if self.is_invalid() || other.is_invalid() {
            return None;
        }
        self.0.checked_sub(other.0).map(Self)
    }

    pub fn saturating_add(self, other: Self) -> Self {
        self.checked_add(other).unwrap_or(Self::MAX)
    }

    pub fn saturating_sub(self, other: Self) -> Self {
        self.checked_sub(other).unwrap_or(Self::ZERO)
    }

    pub fn saturating_mul(self, factor: u64) -> Self {
        let product = self.0.saturating_mul(factor);
        if product >= INVALID {
            Self::MAX
        } else {
            Self(product)
        }
    }
}

impl std::ops::Add for SimulationTime {
    type Output = SimulationTime;
    fn add(self, rhs: Self) -> Self::Output {
        self.checked_add(rhs).expect("SimulationTime overflow")
    }
}

impl std::ops::AddAssign for SimulationTime {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl std::ops::Sub for SimulationTime {
    type Output = SimulationTime;
    fn sub(self, rhs: Self) -> Self::Output {
        self.checked_sub(rhs).expect("SimulationTime underflow")
    }
}

impl std::ops::Mul<u64> for SimulationTime {
    type Output = SimulationTime;
    fn mul(self, rhs: u64) -> Self::Output {
        Self(self.0.checked_mul(rhs).expect("SimulationTime overflow"))
    }
}

impl std::ops::Div<u64> for SimulationTime {
    type Output = SimulationTime;
    fn div(self, rhs: u64) -> Self::Output {
        Self(self.0 / rhs)
    }
}

impl fmt::Debug for SimulationTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_invalid() {
            write!(f, "SimulationTime(invalid)")
        } else {
            write!(f, "SimulationTime({}ns)", self.0)
        }
    }
}

impl fmt::Display for SimulationTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_invalid() {
            return write!(f, "invalid");
        }
        let secs = self.0 / 1_000_000_000;
        let nanos = self.0 % 1_000_000_000;
        write!(f, "{secs}.{nanos:09}")
    }
}

impl Default for SimulationTime {
    fn default() -> Self {
        Self::ZERO
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_is_not_a_valid_instant() {
        assert!(SimulationTime::invalid().is_invalid());
        assert!(!SimulationTime::MAX.is_invalid());
        assert!(SimulationTime::MAX.checked_add(SimulationTime::from_nanos(1)).is_none());
    }

    #[test]
    fn arithmetic_round_trips() {
        let a = SimulationTime::from_secs(1);
        let b = SimulationTime::from_millis(500);
        assert_eq!(a + b, SimulationTime::from_millis(1500));
        assert_eq!(a - b, SimulationTime::from_millis(500));
        assert_eq!(format!("{a}"), "1.000000000");
    }

    #[test]
    fn ordering_is_total() {
        let mut v = vec![
            SimulationTime::from_secs(2),
            SimulationTime::ZERO,
            SimulationTime::from_secs(1),
        ];
        v.sort();
        assert_eq!(
            v,
            vec![
                SimulationTime::ZERO,
                SimulationTime::from_secs(1),
                SimulationTime::from_secs(2)
            ]
        );
    }
}
