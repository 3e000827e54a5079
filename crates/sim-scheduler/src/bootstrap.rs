//! Bootstrap actions (§3, §6): the ordered list topology loading produces, replayed once by
//! [`crate::engine::Engine::run`] before the scheduling loop starts. Kept concrete and
//! loader-agnostic so the engine never depends on how a topology file was read — parsing XML is
//! out of scope for this crate, and lives instead in `shadow-sim`'s binary-level `topology`
//! module, which only ever hands the engine a `Vec<BootstrapAction>`.

use std::net::Ipv4Addr;
use std::path::PathBuf;

use sim_time::SimulationTime;

/// One topology-file element. Order matters: §6 requires "actions are executed in file order",
/// so this is a plain `Vec`, not a set, and `Engine::run` replays it front to back.
#[derive(Debug)]
pub enum BootstrapAction {
    /// `plugin{name, path}`.
    LoadPlugin { name: String, path: PathBuf },
    /// `cdf{name, center, width, tail}` — the generative form.
    GenerateCdf {
        name: String,
        center: SimulationTime,
        width: SimulationTime,
        tail: f64,
    },
    /// `cdf{name, path}` — points read from a CDF file. The file format itself is out of scope
    /// (§1); this action only carries the already-parsed `(cumulative fraction, delay)` table.
    LoadCdf { name: String, points: Vec<(f64, SimulationTime)> },
    /// `network{name, bandwidthdown, bandwidthup, packetloss}`. The topology grammar names no
    /// CDF attribute directly on a network element; every scenario in §8 first declares a named
    /// CDF and then a network that uses it, so `cdf_name` resolves one of the names registered by
    /// a prior `GenerateCdf`/`LoadCdf` action in this same replay.
    CreateNetwork { name: String, cdf_name: String },
    /// `link{networka, networkb, latencyab, latencyba, reliabilityab, reliabilityba}` (or its
    /// symmetric shorthand, already expanded to both directions by the loader). Each direction's
    /// latency is a single fixed value rather than a full table — equivalent to a constant-valued
    /// CDF, matching the "CDF with constant 50 ms latency" phrasing §8 uses for a whole network.
    ConnectNetworks {
        network_a: String,
        network_b: String,
        latency_a_to_b: SimulationTime,
        latency_b_to_a: SimulationTime,
        reliability_a_to_b: f64,
        reliability_b_to_a: f64,
    },
    /// `node{name, network, ip, bandwidthdown, bandwidthup, cpu, quantity, application}`, already
    /// expanded one action per instance if `quantity > 1`.
    CreateNode {
        name: String,
        network: String,
        ip: Ipv4Addr,
        bandwidth_down_bps: u64,
        bandwidth_up_bps: u64,
        cpu_speed_mhz: u64,
    },
    /// `application{plugin, arguments, starttime, stoptime}`, attached to the node it was nested
    /// under by the loader.
    StartApplication {
        node: String,
        plugin: String,
        arguments: Vec<String>,
        start_time: SimulationTime,
        stop_time: Option<SimulationTime>,
    },
}
