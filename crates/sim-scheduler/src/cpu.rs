//! A host's CPU-delay model (§3 "CPU speed", §2 "CPU-delay model").
//!
//! Shadow's core explicitly excludes cycle-accurate CPU modeling (§1 Non-goals); what's left is a
//! queueing model: every unit of work a host's CPU does (handling a syscall, running a plugin
//! callback) consumes a slice of virtual time that scales inversely with the host's configured
//! speed, and slices for the same host serialize rather than overlap.

use sim_time::SimulationTime;

/// A fixed cost, in nanoseconds at a 1000 MHz baseline, charged per dispatched host operation.
/// Not an attempt to model instruction counts — just enough to give faster-configured hosts a
/// visible edge without claiming cycle accuracy.
pub const BASE_OPERATION_COST_NS: u64 = 1_000;

/// Tracks when this host's (virtual) CPU is next free to start new work.
#[derive(Debug, Clone, Copy)]
pub struct Cpu {
    speed_mhz: u64,
    available_at: SimulationTime,
}

impl Cpu {
    pub fn new(speed_mhz: u64) -> Self {
        Self {
            speed_mhz: speed_mhz.max(1),
            available_at: SimulationTime::ZERO,
        }
    }

    pub fn speed_mhz(&self) -> u64 {
        self.speed_mhz
    }

    /// Charge `now` for one host operation, returning the delay (possibly zero) the caller
    /// should add on top of whatever it was about to schedule. Idle time before `now` is not
    /// banked — a host that's been quiet doesn't get to front-load work instantaneously.
    pub fn charge(&mut self, now: SimulationTime) -> SimulationTime {
        self.charge_ns(now, BASE_OPERATION_COST_NS)
    }

    fn charge_ns(&mut self, now: SimulationTime, cost_at_1ghz: u64) -> SimulationTime {
        let scaled_ns = cost_at_1ghz.saturating_mul(1_000) / self.speed_mhz;
        let start = self.available_at.max(now);
        let finish = start + SimulationTime::from_nanos(scaled_ns);
        self.available_at = finish;
        finish.saturating_sub(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn a_faster_cpu_charges_less_delay_for_the_same_operation() {
        let mut slow = Cpu::new(1_000);
        let mut fast = Cpu::new(4_000);
        let now = SimulationTime::from_secs(1);
        assert!(fast.charge(now) <= slow.charge(now));
    }

    #[test]
    fn back_to_back_charges_serialize_rather_than_overlap() {
        let mut cpu = Cpu::new(1_000);
        let now = SimulationTime::from_secs(1);
        let first = cpu.charge(now);
        let second = cpu.charge(now);
        assert!(second >= first);
    }
}
