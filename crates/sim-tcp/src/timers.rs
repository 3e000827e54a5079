//! The sans-I/O boundary between the state machine and the scheduler. [`Connection`] never
//! reads the clock or touches a timer queue directly; it asks its [`Dependencies`] to do so.
//! This keeps the state machine deterministic and unit-testable without a running simulation.

use sim_time::SimulationTime;

/// The distinct timers a single connection can have outstanding. At most one of each kind is
/// ever live; arming one implicitly cancels a previously-armed timer of the same kind.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum TimerKind {
    /// Retransmission timeout for the oldest unacknowledged segment.
    Retransmission,
    /// At most one delayed ACK may be outstanding per connection (§9 Open Questions): arming this
    /// timer a second time while one is already pending is a no-op rather than resetting the
    /// deadline, so a steady stream of incoming data never indefinitely postpones the ACK.
    DelayedAck,
    /// TIME-WAIT teardown, fixed at 2×MSL.
    TimeWait,
}

pub trait Dependencies {
    fn now(&self) -> SimulationTime;

    /// Arm a timer to fire `after` nanoseconds from now. Implementations must replace any
    /// previously-armed timer of the same `kind` for this connection.
    fn arm_timer(&mut self, kind: TimerKind, after: SimulationTime);

    /// Cancel a previously-armed timer of the given kind, if any. A no-op if none is armed.
    fn cancel_timer(&mut self, kind: TimerKind);
}
