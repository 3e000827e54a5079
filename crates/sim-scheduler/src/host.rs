//! Host (Node) (§4.3): owns the per-host event mailbox, the local priority queue a worker drains
//! while it has this host checked out, the virtual socket manager, the CPU-delay model, and this
//! host's registered plug-in instances.

use std::collections::HashMap;
use std::net::Ipv4Addr;

use crossbeam::queue::SegQueue;
use parking_lot::Mutex;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use sim_net::{Address, HostId, NetworkId};
use sim_socket::SocketManager;
use sim_tcp::{Dependencies, TimerKind};
use sim_time::SimulationTime;

use crate::cpu::Cpu;
use crate::event::{CancelToken, Event, EventPayload, EventQueue};

/// A plug-in instance pointer, wrapped so it can cross worker threads inside a [`Host`]. Safe
/// because a host's instance is only ever touched while that host is checked out to exactly one
/// worker, the same invariant `sim_plugin::state::GlobalRegion` relies on.
#[derive(Copy, Clone)]
pub struct AppInstancePtr(pub *mut std::ffi::c_void);

unsafe impl Send for AppInstancePtr {}

pub struct RunningApp {
    pub plugin: String,
    pub instance: AppInstancePtr,
}

/// Everything about a host that only ever changes while a single worker has it checked out. Held
/// behind [`Host`]'s lock, separately from the mailbox, which other hosts push into without
/// locking anything (§5 "Host mailbox: multi-producer / single-consumer thread-safe queue").
pub struct HostState {
    pub local_queue: EventQueue,
    pub sockets: SocketManager,
    pub cpu: Cpu,
    pub rng: ChaCha8Rng,
    pub apps: Vec<RunningApp>,
    pub active_timers: HashMap<(sim_socket::Descriptor, TimerKind), CancelToken>,
    /// Assigns every event this host originates (whether to itself or to a peer) a globally
    /// unique, strictly increasing tie-breaker. Embedding `host_id` in the high bits means two
    /// hosts' counters can never collide, so the eventual dispatch order at the *destination*
    /// host is fixed by (time, seq) alone regardless of which thread delivered which event first
    /// (§4.1 "the set of events executed is deterministic ... regardless of worker count").
    next_send_seq: u64,
}

pub struct Host {
    pub id: HostId,
    pub address: Address,
    pub network: NetworkId,
    pub bandwidth_down_bps: u64,
    pub bandwidth_up_bps: u64,
    mailbox: SegQueue<Event>,
    pub state: Mutex<HostState>,
}

impl Host {
    pub fn new(
        id: HostId,
        address: Address,
        network: NetworkId,
        bandwidth_down_bps: u64,
        bandwidth_up_bps: u64,
        cpu_speed_mhz: u64,
        global_seed: u64,
    ) -> Self {
        Self {
            id,
            network,
            bandwidth_down_bps,
            bandwidth_up_bps,
            mailbox: SegQueue::new(),
            state: Mutex::new(HostState {
                local_queue: EventQueue::new(),
                sockets: SocketManager::new(address.ip()),
                cpu: Cpu::new(cpu_speed_mhz),
                // Per-host RNG derived from the global seed and this host's id, never a shared
                // global generator (§5 "Global RNG: forbidden in hot paths").
                rng: ChaCha8Rng::seed_from_u64(global_seed ^ ((id.as_u32() as u64) << 32)),
                apps: Vec::new(),
                active_timers: HashMap::new(),
                next_send_seq: 0,
            }),
            address,
        }
    }

    pub fn ip(&self) -> Ipv4Addr {
        self.address.ip()
    }

    /// Thread-safe: any host's worker may call this to deliver an event to `self`, without taking
    /// `self.state`'s lock.
    pub fn mail_push(&self, event: Event) {
        self.mailbox.push(event);
    }

    /// Worker-private: drain everything currently in the mailbox into the local priority queue,
    /// under this host's lock. Called once at the start of this host's turn in a round.
    pub fn mail_pop(&self) {
        let mut state = self.state.lock();
        while let Some(event) = self.mailbox.pop() {
            state.local_queue.push_event(event);
        }
    }

    pub fn is_idle(&self) -> bool {
        self.mailbox.is_empty() && self.state.lock().local_queue.is_empty()
    }
}

/// Reserve the next tie-breaking sequence number `owner` will use to originate an event, composed
/// so it can never collide with another host's counter.
fn reserve_seq(counter: &mut u64, owner: HostId) -> u64 {
    let seq = *counter;
    *counter += 1;
    ((owner.as_u32() as u64) << 32) | seq
}

impl HostState {
    pub fn next_seq(&mut self, owner: HostId) -> u64 {
        reserve_seq(&mut self.next_send_seq, owner)
    }

    /// Split into the disjoint pieces a [`TimerDeps`] needs plus the socket manager, so a caller
    /// can hold a `TimerDeps` borrow and call into `sockets` in the same breath instead of the two
    /// fighting over a single `&mut HostState`.
    pub fn split_for_timers(
        &mut self,
    ) -> (&mut EventQueue, &mut HashMap<(sim_socket::Descriptor, TimerKind), CancelToken>, &mut u64, &mut SocketManager) {
        (&mut self.local_queue, &mut self.active_timers, &mut self.next_send_seq, &mut self.sockets)
    }
}

/// A collection of [`Host`]s addressable by [`HostId`], assigned densely at bootstrap.
pub struct HostTable(Vec<Host>);

impl HostTable {
    pub fn new(hosts: Vec<Host>) -> Self {
        Self(hosts)
    }

    pub fn get(&self, id: HostId) -> &Host {
        &self.0[id.as_u32() as usize]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Host> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Bridges [`sim_tcp::Dependencies`] to a host's local event queue for one connection's timers.
/// Constructed fresh for each socket-manager call that might need to arm or cancel a timer, from
/// the disjoint fields [`HostState::split_for_timers`] hands out — never from the whole
/// `HostState`, so a caller can still reach `sockets` while a `TimerDeps` built from the same
/// state is alive.
pub struct TimerDeps<'a> {
    local_queue: &'a mut EventQueue,
    active_timers: &'a mut HashMap<(sim_socket::Descriptor, TimerKind), CancelToken>,
    next_send_seq: &'a mut u64,
    host: HostId,
    descriptor: sim_socket::Descriptor,
    now: SimulationTime,
}

impl<'a> TimerDeps<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        local_queue: &'a mut EventQueue,
        active_timers: &'a mut HashMap<(sim_socket::Descriptor, TimerKind), CancelToken>,
        next_send_seq: &'a mut u64,
        host: HostId,
        descriptor: sim_socket::Descriptor,
        now: SimulationTime,
    ) -> Self {
        Self { local_queue, active_timers, next_send_seq, host, descriptor, now }
    }
}

impl Dependencies for TimerDeps<'_> {
    fn now(&self) -> SimulationTime {
        self.now
    }

    fn arm_timer(&mut self, kind: TimerKind, after: SimulationTime) {
        self.cancel_timer(kind);
        let payload = match kind {
            TimerKind::Retransmission => EventPayload::RetransmissionTimer { descriptor: self.descriptor },
            TimerKind::DelayedAck => EventPayload::DelayedAckTimer { descriptor: self.descriptor },
            TimerKind::TimeWait => EventPayload::TimeWaitTimer { descriptor: self.descriptor },
        };
        let seq = reserve_seq(self.next_send_seq, self.host);
        let cancelled = crate::event::new_cancel_token();
        self.local_queue.push_event(Event {
            time: self.now + after,
            host: self.host,
            seq,
            cancelled: cancelled.clone(),
            payload,
        });
        self.active_timers.insert((self.descriptor, kind), cancelled);
    }

    fn cancel_timer(&mut self, kind: TimerKind) {
        if let Some(token) = self.active_timers.remove(&(self.descriptor, kind)) {
            token.store(true, std::sync::atomic::Ordering::Relaxed);
        }
    }
}
