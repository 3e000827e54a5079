//! The per-thread simulation context a worker publishes around the code it's currently running,
//! so a log record emitted from deep inside a host's call stack can be stamped with *which*
//! simulated moment and host produced it without threading a parameter through every function.

use std::cell::RefCell;

use sim_time::SimulationTime;

/// Everything the logger wants to know about "where we are" in the simulation when a record is
/// produced. Cheap to clone; rebuilt by the worker every time it switches which host it's running.
#[derive(Clone, Debug, Default)]
pub struct LogContext {
    pub worker_id: Option<u32>,
    pub sim_time: Option<SimulationTime>,
    pub host_name: Option<String>,
    pub host_ip: Option<String>,
    /// Per-host log level override (§6), checked in preference to the engine-wide default.
    pub log_level: Option<log::LevelFilter>,
}

thread_local! {
    static ACTIVE: RefCell<Option<LogContext>> = const { RefCell::new(None) };
}

/// Publish `ctx` as the context for the current thread. Called by the worker just before it
/// activates a host; pair with [`clear`] once the host is deactivated.
pub fn set(ctx: LogContext) {
    ACTIVE.with(|cell| *cell.borrow_mut() = Some(ctx));
}

pub fn clear() {
    ACTIVE.with(|cell| *cell.borrow_mut() = None);
}

/// A clone of the current thread's published context, if any has been set.
pub fn current() -> Option<LogContext> {
    ACTIVE.with(|cell| cell.borrow().clone())
}
