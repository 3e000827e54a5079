//! The event subsystem (§4.4): a polymorphic record carrying dispatch time, owner host, a
//! monotonic tie-breaker, and a payload the engine never inspects — only dispatch code does.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;

use bytes::Bytes;
use sim_net::HostId;
use sim_packet::PacketRef;
use sim_socket::Descriptor;
use sim_time::SimulationTime;

/// A shared "is this timer still live" flag. Cancellation (§4.4) flips this rather than removing
/// the event from whatever queue holds it; the event checks it at dispatch time and is a no-op if
/// cancelled.
pub type CancelToken = Arc<AtomicBool>;

pub fn new_cancel_token() -> CancelToken {
    Arc::new(AtomicBool::new(false))
}

/// What happened, carried by an [`Event`]. The engine's scheduling loop never looks inside this;
/// only [`crate::host::Host::dispatch`] does.
pub enum EventPayload {
    /// A packet finished its trip across a link and is ready to enter the destination's
    /// TCP/UDP receive path.
    PacketArrived { local: (Ipv4Addr, u16), remote: (Ipv4Addr, u16), packet: PacketRef },
    /// Bootstrap asked this host to start running an application (plugin instance).
    StartApplication { plugin: String, args: Vec<String> },
    /// A socket's readiness changed; re-poll any epoll instances watching it.
    SocketActivated { descriptor: Descriptor },
    DelayedAckTimer { descriptor: Descriptor },
    RetransmissionTimer { descriptor: Descriptor },
    TimeWaitTimer { descriptor: Descriptor },
    /// A plugin asked to be called back later via its kernel services table.
    DeferredCallback { instance: usize, data: usize },
    KillEngine,
}

pub struct Event {
    pub time: SimulationTime,
    pub host: HostId,
    pub seq: u64,
    pub cancelled: CancelToken,
    pub payload: EventPayload,
}

impl Event {
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(AtomicOrdering::Relaxed)
    }

    fn order_key(&self) -> (SimulationTime, HostId, u64) {
        (self.time, self.host, self.seq)
    }
}

impl Eq for Event {}
impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.order_key() == other.order_key()
    }
}
impl Ord for Event {
    /// Ascending by `(time, owner-id, insertion-counter)` — the tie-break order §4.1/§5 require.
    fn cmp(&self, other: &Self) -> Ordering {
        self.order_key().cmp(&other.order_key())
    }
}
impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A min-heap of events ordered by `(time, owner-id, insertion-counter)`, with its own
/// monotonically increasing insertion counter so within-host ties are broken by arrival order.
#[derive(Default)]
pub struct EventQueue {
    heap: BinaryHeap<std::cmp::Reverse<Event>>,
    next_seq: u64,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule `payload` for `host` at `time`. Returns a [`CancelToken`] the caller can flip to
    /// suppress dispatch later.
    pub fn push(&mut self, time: SimulationTime, host: HostId, payload: EventPayload) -> CancelToken {
        let cancelled = new_cancel_token();
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(std::cmp::Reverse(Event {
            time,
            host,
            seq,
            cancelled: cancelled.clone(),
            payload,
        }));
        cancelled
    }

    /// Insert an [`Event`] that already carries its own ordering key. Used by the mailbox drain
    /// path (`Host::mail_pop`), where the tie-breaker is assigned deterministically by the
    /// *sending* host at schedule time rather than by this queue at insertion time — see
    /// `Host::next_send_seq`.
    pub fn push_event(&mut self, event: Event) {
        self.heap.push(std::cmp::Reverse(event));
    }

    pub fn peek_time(&self) -> Option<SimulationTime> {
        self.heap.peek().map(|e| e.0.time)
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Pop the next event if its time is `<= barrier`, skipping (and discarding) any cancelled
    /// events found along the way.
    pub fn pop_until(&mut self, barrier: SimulationTime) -> Option<Event> {
        loop {
            match self.heap.peek() {
                Some(top) if top.0.time <= barrier => {
                    let event = self.heap.pop().unwrap().0;
                    if event.is_cancelled() {
                        continue;
                    }
                    return Some(event);
                }
                _ => return None,
            }
        }
    }
}
