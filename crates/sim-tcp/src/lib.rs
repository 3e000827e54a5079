//! The TCP state machine (§4.6): connection establishment and teardown, reliable in-order
//! delivery, windowed flow control, and Reno-style congestion control. Deliberately sans-I/O —
//! see [`timers::Dependencies`] — so the same state machine runs under the simulator's
//! deterministic clock or under a plain unit test.

pub mod congestion;
pub mod connection;
pub mod rto;
pub mod seq;
pub mod timers;

use sim_time::SimulationTime;

pub use congestion::CongestionControl;
pub use connection::{Connection, ConnectionError, Event, IncomingSegment, OutgoingSegment, TcpState};
pub use seq::{Seq, SeqRange};
pub use timers::{Dependencies, TimerKind};

/// Maximum segment size. Real TCP negotiates this per-connection from each side's interface MTU;
/// Shadow pins it to Ethernet's common value rather than modeling MTU discovery (§9 Open
/// Questions — documented in the implementation's README).
pub const MSS: u16 = 1460;

/// Initial retransmission timeout, used until the first RTT sample is in (§9 Open Questions).
pub const INITIAL_RTO: SimulationTime = SimulationTime::from_secs(1);

/// Maximum Segment Lifetime. TIME-WAIT holds a connection for `2 * MSL` (§4.6).
pub const MSL: SimulationTime = SimulationTime::from_secs(60);

pub const TIME_WAIT_DURATION: SimulationTime = SimulationTime::from_nanos(2 * MSL.as_nanos());

/// Fixed delayed-ACK timeout (§4.6). Real stacks vary this; Shadow pins a single constant.
pub const DELAYED_ACK_TIMEOUT: SimulationTime = SimulationTime::from_millis(10);

/// Default advertised receive window, in bytes, for a newly created connection.
pub const DEFAULT_RECEIVE_WINDOW: u32 = 64 * 1024;

/// Default send/receive socket buffer capacity, in bytes.
pub const DEFAULT_BUFFER_CAPACITY: usize = 256 * 1024;
