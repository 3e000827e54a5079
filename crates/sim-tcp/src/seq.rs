//! 32-bit TCP sequence number arithmetic with wraparound, per RFC 793 §3.3's "modulo 2**32
//! arithmetic" rule: comparisons are defined by the sign of the wrapping difference, not by the
//! raw integer value.

use std::cmp::Ordering;
use std::fmt;
use std::ops::{Add, Sub};

#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Default)]
pub struct Seq(pub u32);

impl Seq {
    pub const ZERO: Seq = Seq(0);

    pub fn new(n: u32) -> Self {
        Seq(n)
    }

    /// Signed distance `self - other`, correct across a wraparound as long as the true distance
    /// fits in `i32` (true for any window size TCP uses in practice).
    pub fn distance_from(self, other: Seq) -> i32 {
        self.0.wrapping_sub(other.0) as i32
    }
}

impl Add<u32> for Seq {
    type Output = Seq;
    fn add(self, rhs: u32) -> Seq {
        Seq(self.0.wrapping_add(rhs))
    }
}

impl Sub<u32> for Seq {
    type Output = Seq;
    fn sub(self, rhs: u32) -> Seq {
        Seq(self.0.wrapping_sub(rhs))
    }
}

impl PartialOrd for Seq {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Seq {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance_from(*other).cmp(&0)
    }
}

impl fmt::Display for Seq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A half-open range `[start, start+len)` of sequence space, e.g. the bytes one segment covers.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct SeqRange {
    pub start: Seq,
    pub len: u32,
}

impl SeqRange {
    pub fn new(start: Seq, len: u32) -> Self {
        Self { start, len }
    }

    pub fn end(&self) -> Seq {
        self.start + self.len
    }

    pub fn contains(&self, seq: Seq) -> bool {
        seq >= self.start && seq < self.end()
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Trim this range to what falls inside `window` (typically the receiver's advertised
    /// window), returning `None` if nothing survives. Mirrors the segment-acceptability test of
    /// RFC 793 §3.3.
    pub fn trim_to(&self, window: SeqRange) -> Option<SeqRange> {
        let start = if self.start < window.start {
            window.start
        } else {
            self.start
        };
        let end = if self.end() > window.end() {
            window.end()
        } else {
            self.end()
        };
        if start >= end {
            // zero-length probes are kept alive only if they sit exactly at the window start
            if self.is_empty() && self.start == window.start {
                return Some(SeqRange::new(self.start, 0));
            }
            return None;
        }
        Some(SeqRange::new(start, end.distance_from(start) as u32))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_wraps_around_u32_max() {
        let near_max = Seq(u32::MAX - 1);
        let wrapped = near_max + 3;
        assert!(wrapped > near_max);
        assert_eq!(wrapped.distance_from(near_max), 4);
    }

    #[test]
    fn trim_to_clips_both_edges() {
        let segment = SeqRange::new(Seq(100), 50); // [100, 150)
        let window = SeqRange::new(Seq(120), 20); // [120, 140)
        let trimmed = segment.trim_to(window).unwrap();
        assert_eq!(trimmed.start, Seq(120));
        assert_eq!(trimmed.len, 20);
    }

    #[test]
    fn trim_to_rejects_disjoint_ranges() {
        let segment = SeqRange::new(Seq(0), 10);
        let window = SeqRange::new(Seq(100), 10);
        assert!(segment.trim_to(window).is_none());
    }
}
