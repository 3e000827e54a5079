//! The top-level scheduler (§4.1): owns the global clock, the host table, the shared topology and
//! plug-in state every worker consults, and the conservative time-barrier protocol that lets
//! workers run ahead of each other without ever reordering a causally-related pair of events.
//!
//! Bootstrap replay (loading plug-ins, building the topology, creating hosts and scheduling their
//! first application) lives in [`crate::bootstrap`] one level up, in `shadow-sim`; this module
//! only consumes the resulting [`crate::bootstrap::BootstrapAction`]s. XML parsing is out of
//! scope here and everywhere else in this crate family (§1).

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::OnceLock;

use parking_lot::Mutex;
use sim_net::{Cdf, Dns, DnsBuilder, HostId, Internetwork, Link, Network, NetworkId};
use sim_plugin::Plugin;
use sim_time::SimulationTime;
use thiserror::Error;

use crate::bootstrap::BootstrapAction;
use crate::event::EventPayload;
use crate::host::{Host, HostTable};
use crate::worker;

/// Engine-level configuration (§4.1 "Configuration"). `min_time_jump` is the positive floor
/// required when a topology's link latencies can sample zero (§4.9); everything else maps
/// directly onto the named recognized option.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub worker_threads: usize,
    pub min_time_jump: SimulationTime,
    pub seed: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_threads: 1,
            min_time_jump: SimulationTime::from_nanos(1),
            seed: 0,
        }
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("barrier violation: {0}")]
    BarrierViolation(String),
    #[error("event scheduled with invalid (sentinel) time")]
    InvalidTime,
}

/// Exit codes §6 assigns to `shadow-sim`'s process. Kept here, next to the error type that drives
/// them, rather than in the binary, so a test can assert on the mapping without spawning a process.
pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_CONFIG_ERROR: i32 = 1;
pub const EXIT_RUNTIME_ERROR: i32 = 2;

/// Everything read-mostly that every worker thread needs regardless of which host it is currently
/// running: the topology, virtual DNS, and the registry of loaded plug-ins. Built once at
/// bootstrap and never swapped out; the only interior mutability is `plugins` (a plug-in's
/// switch-in/switch-out is serialized per library, §5 "Workers must not run two hosts sharing the
/// same plug-in concurrently... simplest valid implementation: one plug-in-wide lock") and the
/// barrier-violation latch a worker may set.
pub struct SharedContext {
    pub dns: Dns,
    pub internetwork: Internetwork,
    pub plugins: Mutex<HashMap<String, Plugin>>,
    /// Δ_min (§4.1, §4.9): the conservative barrier floor. Any cross-host delay sampled below
    /// this is an engineering bug in the link model or a synthetic test event, never an expected
    /// outcome, hence the hard abort rather than a silent clamp.
    pub delta_min: SimulationTime,
    violation: OnceLock<String>,
}

impl SharedContext {
    fn new(dns: Dns, internetwork: Internetwork, plugins: HashMap<String, Plugin>, delta_min: SimulationTime) -> Self {
        Self {
            dns,
            internetwork,
            plugins: Mutex::new(plugins),
            delta_min,
            violation: OnceLock::new(),
        }
    }

    /// Record a barrier violation (§4.1 "Fatal conditions"). The first reported detail wins; later
    /// ones are dropped since the engine is about to abort anyway.
    pub fn report_barrier_violation(&self, detail: String) {
        self.violation.set(detail).ok();
    }

    pub fn barrier_violation(&self) -> Option<&str> {
        self.violation.get().map(String::as_str)
    }
}

/// A `node{...}` action's fields, held only long enough to resolve its network name to a
/// [`NetworkId`] once every `CreateNetwork` action has been replayed.
struct HostBuild {
    name: String,
    ip: Ipv4Addr,
    network: String,
    bandwidth_down_bps: u64,
    bandwidth_up_bps: u64,
    cpu_speed_mhz: u64,
}

/// The engine (§4.1). Owns the global clock, the host table, the shared topology/plug-in state,
/// and the kill time the scheduling loop runs until.
pub struct Engine {
    config: EngineConfig,
    clock: SimulationTime,
    kill_time: SimulationTime,
    hosts: HostTable,
    shared: SharedContext,
    /// Monotonic counter used only by [`Self::schedule_cross_host`], the test-facing injection
    /// point — the normal dispatch path (`worker::route_tcp`/`route_udp`) assigns its own
    /// tie-breakers through `HostState::next_seq`.
    injected_seq: AtomicU64,
}

impl Engine {
    /// Replay `actions` (§6, in file order) to build the topology, plug-ins and host table, then
    /// run the scheduling loop to completion. Returns the process exit code §6 specifies: 0 on a
    /// clean finish, 1 for a configuration error encountered during replay, 2 for a runtime
    /// (barrier violation or invalid-time) abort.
    pub fn run(config: EngineConfig, actions: Vec<BootstrapAction>) -> i32 {
        match Self::bootstrap(config, actions) {
            Ok(mut engine) => engine.run_loop(),
            Err(EngineError::Configuration(msg)) => {
                log::error!("configuration error: {msg}");
                EXIT_CONFIG_ERROR
            }
            Err(err) => {
                log::error!("fatal error during bootstrap: {err}");
                EXIT_RUNTIME_ERROR
            }
        }
    }

    /// Replay the ordered bootstrap actions into a fully-built [`Engine`], without starting the
    /// scheduling loop. Exposed separately from [`Self::run`] so tests can build an engine, run a
    /// few rounds, and inspect host state without driving it to completion.
    pub fn bootstrap(config: EngineConfig, actions: Vec<BootstrapAction>) -> Result<Self, EngineError> {
        let mut plugin_paths: HashMap<String, PathBuf> = HashMap::new();
        let mut cdfs: HashMap<String, Cdf> = HashMap::new();
        let mut internetwork = Internetwork::new();
        let mut network_ids: HashMap<String, NetworkId> = HashMap::new();
        let mut dns_builder = DnsBuilder::new();
        let mut host_builds: Vec<HostBuild> = Vec::new();
        let mut start_actions: Vec<(String, String, Vec<String>, SimulationTime, Option<SimulationTime>)> = Vec::new();
        let mut latest_deadline = SimulationTime::ZERO;

        for action in actions {
            match action {
                BootstrapAction::LoadPlugin { name, path } => {
                    plugin_paths.insert(name, path);
                }
                BootstrapAction::GenerateCdf { name, center, width, tail } => {
                    cdfs.insert(name, Cdf::generate(center, width, tail));
                }
                BootstrapAction::LoadCdf { name, points } => {
                    let points = points
                        .into_iter()
                        .map(|(fraction, delay)| sim_net::cdf::CdfPoint { delay, fraction })
                        .collect();
                    let cdf = Cdf::from_points(points)
                        .map_err(|_| EngineError::Configuration(format!("CDF `{name}` is not a valid distribution")))?;
                    cdfs.insert(name, cdf);
                }
                BootstrapAction::CreateNetwork { name, cdf_name } => {
                    let cdf = cdfs
                        .get(&cdf_name)
                        .ok_or_else(|| EngineError::Configuration(format!("network `{name}` references unknown cdf `{cdf_name}`")))?
                        .clone();
                    let id = internetwork.add_network(Network::new(name.clone(), cdf));
                    network_ids.insert(name, id);
                }
                BootstrapAction::ConnectNetworks {
                    network_a,
                    network_b,
                    latency_a_to_b,
                    latency_b_to_a,
                    reliability_a_to_b,
                    reliability_b_to_a,
                } => {
                    let a = *network_ids
                        .get(&network_a)
                        .ok_or_else(|| EngineError::Configuration(format!("link references unknown network `{network_a}`")))?;
                    let b = *network_ids
                        .get(&network_b)
                        .ok_or_else(|| EngineError::Configuration(format!("link references unknown network `{network_b}`")))?;
                    internetwork
                        .add_link(a, b, Link::new(Cdf::constant(latency_a_to_b), 1.0 - reliability_a_to_b))
                        .map_err(|e| EngineError::Configuration(format!("{network_a}->{network_b}: {e:?}")))?;
                    internetwork
                        .add_link(b, a, Link::new(Cdf::constant(latency_b_to_a), 1.0 - reliability_b_to_a))
                        .map_err(|e| EngineError::Configuration(format!("{network_b}->{network_a}: {e:?}")))?;
                }
                BootstrapAction::CreateNode { name, network, ip, bandwidth_down_bps, bandwidth_up_bps, cpu_speed_mhz } => {
                    host_builds.push(HostBuild { name, ip, network, bandwidth_down_bps, bandwidth_up_bps, cpu_speed_mhz });
                }
                BootstrapAction::StartApplication { node, plugin, arguments, start_time, stop_time } => {
                    latest_deadline = latest_deadline.max(stop_time.unwrap_or(start_time));
                    start_actions.push((node, plugin, arguments, start_time, stop_time));
                }
            }
        }

        internetwork
            .validate()
            .map_err(|e| EngineError::Configuration(format!("{e:?}")))?;

        let mut plugins = HashMap::new();
        for (name, path) in plugin_paths {
            let plugin = Plugin::load(&path).map_err(|e| EngineError::Configuration(format!("plugin `{name}`: {e}")))?;
            plugins.insert(name, plugin);
        }

        let mut hosts = Vec::with_capacity(host_builds.len());
        let mut host_ids: HashMap<String, HostId> = HashMap::new();
        for (idx, build) in host_builds.into_iter().enumerate() {
            let id = HostId::new(idx as u32);
            let network_id = *network_ids
                .get(&build.network)
                .ok_or_else(|| EngineError::Configuration(format!("node `{}` references unknown network `{}`", build.name, build.network)))?;
            dns_builder
                .register(id, build.ip, build.name.clone())
                .map_err(|e| EngineError::Configuration(format!("{e:?}")))?;
            let address = sim_net::Address::new(build.ip, build.name.clone());
            hosts.push(Host::new(id, address, network_id, build.bandwidth_down_bps, build.bandwidth_up_bps, build.cpu_speed_mhz, config.seed));
            host_ids.insert(build.name, id);
        }

        let delta_min = internetwork.min_possible_latency().max(config.min_time_jump);
        let hosts = HostTable::new(hosts);
        let shared = SharedContext::new(dns_builder.into_dns(), internetwork, plugins, delta_min);

        let mut engine = Self {
            kill_time: latest_deadline,
            clock: SimulationTime::ZERO,
            hosts,
            shared,
            config,
            injected_seq: AtomicU64::new(0),
        };

        for (node, plugin, arguments, start_time, _stop_time) in start_actions {
            let host_id = *host_ids
                .get(&node)
                .ok_or_else(|| EngineError::Configuration(format!("application on unknown node `{node}`")))?;
            engine.seed_event(host_id, start_time, EventPayload::StartApplication { plugin, args: arguments });
        }

        Ok(engine)
    }

    /// Place a bootstrap-originated event directly on its target host's local queue. These are
    /// not "cross-host" in the causal sense §4.1 guards against — they are the simulation's
    /// initial conditions, not the outcome of one host acting on another — so they are exempt from
    /// the Δ_min check (§4.1's guard rail is about events hosts cause for each other mid-run).
    fn seed_event(&mut self, host: HostId, time: SimulationTime, payload: EventPayload) {
        let mut state = self.hosts.get(host).state.lock();
        let seq = state.next_seq(host);
        state.local_queue.push_event(crate::event::Event {
            time,
            host,
            seq,
            cancelled: crate::event::new_cancel_token(),
            payload,
        });
    }

    /// Test-facing injection point for Scenario F ("a synthetic event scheduled with cross-host
    /// delay = Δ_min/2 must cause the engine to abort with the barrier-violation exit code").
    /// Mirrors the validation `worker::send_packet` performs on every real cross-host send, but
    /// callable directly without playing out a whole handshake.
    pub fn schedule_cross_host(&self, origin: HostId, target: HostId, delay: SimulationTime) -> Result<(), EngineError> {
        if delay.is_invalid() {
            return Err(EngineError::InvalidTime);
        }
        if origin != target && delay < self.shared.delta_min {
            let detail = format!(
                "{origin} scheduled an event for {target} with delay {delay} < Δ_min {}",
                self.shared.delta_min
            );
            self.shared.report_barrier_violation(detail.clone());
            return Err(EngineError::BarrierViolation(detail));
        }
        let seq = self.injected_seq.fetch_add(1, AtomicOrdering::Relaxed);
        self.hosts.get(target).mail_push(crate::event::Event {
            time: self.clock + delay,
            host: target,
            seq: (u64::from(origin.as_u32()) << 48) | seq,
            cancelled: crate::event::new_cancel_token(),
            payload: EventPayload::DeferredCallback { instance: 0, data: 0 },
        });
        Ok(())
    }

    pub fn now(&self) -> SimulationTime {
        self.clock
    }

    pub fn delta_min(&self) -> SimulationTime {
        self.shared.delta_min
    }

    pub fn hosts(&self) -> &HostTable {
        &self.hosts
    }

    pub fn shared(&self) -> &SharedContext {
        &self.shared
    }

    /// The conservative time-barrier scheduling loop (§4.1). Each round: let every host drain
    /// events up to the barrier `B = T_now + Δ_min`, then advance `T_now` to the next event's time
    /// anywhere in the system, recompute `B`, and repeat until nothing is left to do or the clock
    /// has passed the kill time.
    fn run_loop(&mut self) -> i32 {
        loop {
            let barrier = self.clock + self.shared.delta_min;
            self.run_round(barrier);

            if let Some(detail) = self.shared.barrier_violation() {
                log::error!("{detail}");
                return EXIT_RUNTIME_ERROR;
            }

            match self.next_pending_time() {
                None => return EXIT_SUCCESS,
                Some(next) if next > self.kill_time => return EXIT_SUCCESS,
                Some(next) => self.clock = next,
            }
        }
    }

    /// Run one barrier round: every host drains its mailbox and dispatches everything with time
    /// `<= barrier`. Single-worker configurations do this inline (and, per §4.1, would be free to
    /// fold a self-targeted event straight into the local queue, which the dispatch paths already
    /// do by construction); multi-worker configurations fan the hosts out across a scoped thread
    /// pool and block until every host has caught up to the barrier.
    fn run_round(&self, barrier: SimulationTime) {
        if self.config.worker_threads <= 1 || self.hosts.len() <= 1 {
            for host in self.hosts.iter() {
                worker::run_host_round(host, &self.hosts, &self.shared, barrier);
            }
            return;
        }

        crossbeam::thread::scope(|scope| {
            let chunk = self.hosts.len().div_ceil(self.config.worker_threads);
            let host_refs: Vec<&Host> = self.hosts.iter().collect();
            for slice in host_refs.chunks(chunk.max(1)) {
                let hosts = &self.hosts;
                let shared = &self.shared;
                scope.spawn(move |_| {
                    for host in slice {
                        worker::run_host_round(host, hosts, shared, barrier);
                    }
                });
            }
        })
        .expect("worker thread panicked");
    }

    /// The smallest pending-event time across every host's mailbox and local queue, or `None` if
    /// the whole simulation is quiescent. This is the next value `T_now` advances to (§4.1 step
    /// b): "advances T_now to the minimum time of any mailbox-pending event across all hosts."
    fn next_pending_time(&self) -> Option<SimulationTime> {
        self.hosts
            .iter()
            .filter_map(|h| h.state.lock().local_queue.peek_time())
            .min()
    }

    /// True once every host's mailbox and local queue are empty. Exposed for tests that want to
    /// assert full quiescence at the end of a scenario without reaching into host internals.
    pub fn all_idle(&self) -> bool {
        self.hosts.iter().all(|h| h.is_idle())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn two_host_actions() -> Vec<BootstrapAction> {
        vec![
            BootstrapAction::GenerateCdf {
                name: "net".into(),
                center: SimulationTime::from_millis(50),
                width: SimulationTime::from_millis(1),
                tail: 0.1,
            },
            BootstrapAction::CreateNetwork { name: "n1".into(), cdf_name: "net".into() },
            BootstrapAction::CreateNode {
                name: "h1".into(),
                network: "n1".into(),
                ip: Ipv4Addr::new(10, 0, 0, 1),
                bandwidth_down_bps: 1_000_000,
                bandwidth_up_bps: 1_000_000,
                cpu_speed_mhz: 1000,
            },
            BootstrapAction::CreateNode {
                name: "h2".into(),
                network: "n1".into(),
                ip: Ipv4Addr::new(10, 0, 0, 2),
                bandwidth_down_bps: 1_000_000,
                bandwidth_up_bps: 1_000_000,
                cpu_speed_mhz: 1000,
            },
        ]
    }

    #[test]
    fn an_empty_topology_finishes_immediately() {
        let code = Engine::run(EngineConfig::default(), Vec::new());
        assert_eq!(code, EXIT_SUCCESS);
    }

    #[test]
    fn a_topology_with_no_scheduled_work_drains_and_succeeds() {
        let config = EngineConfig::default();
        let engine = Engine::bootstrap(config, two_host_actions()).unwrap();
        assert!(engine.all_idle());
    }

    #[test]
    fn delta_min_is_derived_from_the_topology_and_the_configured_floor() {
        let mut config = EngineConfig::default();
        config.min_time_jump = SimulationTime::from_nanos(1);
        let engine = Engine::bootstrap(config, two_host_actions()).unwrap();
        // The generated CDF's first point is well above zero, so the topology floor dominates the
        // configured minimum.
        assert!(engine.delta_min() > SimulationTime::ZERO);
    }

    #[test]
    fn a_cross_host_event_scheduled_below_delta_min_is_a_barrier_violation() {
        let config = EngineConfig::default();
        let engine = Engine::bootstrap(config, two_host_actions()).unwrap();
        let half = engine.delta_min() / 2;
        let err = engine.schedule_cross_host(HostId::new(0), HostId::new(1), half).unwrap_err();
        assert!(matches!(err, EngineError::BarrierViolation(_)));
        assert!(engine.shared().barrier_violation().is_some());
    }

    #[test]
    fn a_cross_host_event_at_or_above_delta_min_is_accepted() {
        let config = EngineConfig::default();
        let engine = Engine::bootstrap(config, two_host_actions()).unwrap();
        let delta_min = engine.delta_min();
        assert!(engine.schedule_cross_host(HostId::new(0), HostId::new(1), delta_min).is_ok());
        assert!(engine.shared().barrier_violation().is_none());
    }

    #[test]
    fn a_same_host_event_is_exempt_from_the_delta_min_floor() {
        let config = EngineConfig::default();
        let engine = Engine::bootstrap(config, two_host_actions()).unwrap();
        assert!(engine
            .schedule_cross_host(HostId::new(0), HostId::new(0), SimulationTime::ZERO)
            .is_ok());
    }

    #[test]
    fn an_unknown_cdf_reference_is_a_configuration_error_not_a_panic() {
        let actions = vec![BootstrapAction::CreateNetwork { name: "n1".into(), cdf_name: "missing".into() }];
        let err = Engine::bootstrap(EngineConfig::default(), actions).unwrap_err();
        assert!(matches!(err, EngineError::Configuration(_)));
    }

    #[test]
    fn a_disconnected_topology_is_rejected_at_bootstrap() {
        let actions = vec![
            BootstrapAction::GenerateCdf {
                name: "net".into(),
                center: SimulationTime::from_millis(10),
                width: SimulationTime::from_millis(1),
                tail: 0.1,
            },
            BootstrapAction::CreateNetwork { name: "a".into(), cdf_name: "net".into() },
            BootstrapAction::CreateNetwork { name: "b".into(), cdf_name: "net".into() },
        ];
        let err = Engine::bootstrap(EngineConfig::default(), actions).unwrap_err();
        assert!(matches!(err, EngineError::Configuration(_)));
    }
}
