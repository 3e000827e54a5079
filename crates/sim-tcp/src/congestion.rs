//! Slow start, congestion avoidance, and fast retransmit/recovery (§4.6). Formulas follow the
//! classic Reno shape rather than any of the newer pluggable algorithms; which one to model was
//! left open by the design and is pinned here (see the crate-level constants).

/// Segments, not bytes: `cwnd`/`ssthresh` are counted in units of [`crate::MSS`], matching the
/// textbook presentation this module follows.
#[derive(Copy, Clone, Debug)]
pub struct CongestionControl {
    cwnd: f64,
    ssthresh: f64,
    dup_acks: u32,
    in_fast_recovery: bool,
}

const INITIAL_CWND_SEGMENTS: f64 = 1.0;
const INITIAL_SSTHRESH_SEGMENTS: f64 = 64.0;
pub const FAST_RETRANSMIT_DUP_ACKS: u32 = 3;

impl CongestionControl {
    pub fn new() -> Self {
        Self {
            cwnd: INITIAL_CWND_SEGMENTS,
            ssthresh: INITIAL_SSTHRESH_SEGMENTS,
            dup_acks: 0,
            in_fast_recovery: false,
        }
    }

    /// Current send window in segments. The sender's actual allowed outstanding bytes is
    /// `min(cwnd_segments, advertised_window) * MSS`; combining with the receiver window happens
    /// in [`crate::connection::Connection`].
    pub fn cwnd_segments(&self) -> f64 {
        self.cwnd
    }

    pub fn ssthresh_segments(&self) -> f64 {
        self.ssthresh
    }

    pub fn is_in_fast_recovery(&self) -> bool {
        self.in_fast_recovery
    }

    /// A new, non-duplicate ACK arrived acknowledging forward progress.
    pub fn on_new_ack(&mut self) {
        self.dup_acks = 0;
        if self.in_fast_recovery {
            // deflate back to ssthresh on recovery from the retransmit, per Reno fast recovery.
            self.cwnd = self.ssthresh;
            self.in_fast_recovery = false;
            return;
        }
        if self.cwnd < self.ssthresh {
            // slow start: one segment's worth of growth per ACK.
            self.cwnd += 1.0;
        } else {
            // congestion avoidance: roughly one segment's worth of growth per RTT.
            self.cwnd += 1.0 / self.cwnd;
        }
    }

    /// A duplicate ACK arrived. Returns `true` the moment the third duplicate triggers fast
    /// retransmit, so the caller knows to resend the missing segment immediately rather than
    /// waiting on the retransmission timer.
    pub fn on_duplicate_ack(&mut self) -> bool {
        if self.in_fast_recovery {
            // each further duplicate during recovery inflates the window (Reno's "inflate").
            self.cwnd += 1.0;
            return false;
        }
        self.dup_acks += 1;
        if self.dup_acks == FAST_RETRANSMIT_DUP_ACKS {
            // spec.md §4.6 "Retransmission": halve ssthresh and set cwnd = ssthresh exactly, no
            // Reno fast-recovery inflation burst.
            self.ssthresh = (self.cwnd / 2.0).max(2.0);
            self.cwnd = self.ssthresh;
            self.in_fast_recovery = true;
            return true;
        }
        false
    }

    /// The retransmission timer fired: collapse back to slow start, per spec.md §4.6
    /// "Retransmission": `cwnd` drops to one segment and `ssthresh := max(snd_wnd/2, 2*MSS)`, taken
    /// here in segment units as `max(snd_wnd_segments/2, 2.0)`.
    pub fn on_retransmit_timeout(&mut self, snd_wnd_segments: f64) {
        self.ssthresh = (snd_wnd_segments / 2.0).max(2.0);
        self.cwnd = INITIAL_CWND_SEGMENTS;
        self.dup_acks = 0;
        self.in_fast_recovery = false;
    }
}

impl Default for CongestionControl {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slow_start_doubles_roughly_every_rtt() {
        let mut cc = CongestionControl::new();
        for _ in 0..4 {
            cc.on_new_ack();
        }
        assert_eq!(cc.cwnd_segments(), 5.0);
    }

    #[test]
    fn third_duplicate_ack_triggers_fast_retransmit() {
        let mut cc = CongestionControl::new();
        for _ in 0..6 {
            cc.on_new_ack();
        }
        assert!(!cc.on_duplicate_ack());
        assert!(!cc.on_duplicate_ack());
        assert!(cc.on_duplicate_ack());
        assert!(cc.is_in_fast_recovery());
    }

    #[test]
    fn timeout_resets_to_slow_start() {
        let mut cc = CongestionControl::new();
        for _ in 0..10 {
            cc.on_new_ack();
        }
        cc.on_retransmit_timeout(20.0);
        assert_eq!(cc.cwnd_segments(), 1.0);
        assert_eq!(cc.ssthresh_segments(), 10.0);
        assert!(!cc.is_in_fast_recovery());
    }
}
