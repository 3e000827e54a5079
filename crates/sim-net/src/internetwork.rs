//! The internetwork: a directed multigraph of [`Network`]s joined by [`Link`]s, built once at
//! topology load and consulted on every packet send to sample a delivery delay (§4.9).

use petgraph::algo::connected_components;
use petgraph::graph::{Graph, NodeIndex};
use petgraph::Directed;
use rand::Rng;
use sim_time::SimulationTime;

use crate::link::{Link, Network};

/// Opaque handle to a [`Network`] registered in an [`Internetwork`].
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct NetworkId(NodeIndex);

#[derive(Debug)]
pub enum InternetworkError {
    /// The graph of networks is not weakly connected, so some pair of hosts could never
    /// exchange a packet. Topology build must reject this at bootstrap (§3: "the graph must be
    /// weakly connected").
    NotConnected,
    /// A link already exists for this ordered pair of networks.
    DuplicateLink(NetworkId, NetworkId),
}

#[derive(Debug, Eq, PartialEq)]
pub enum RouteError {
    UnknownNetwork,
    /// No link exists from the source network to the destination network, and they are not the
    /// same network (so there is no intra-network path either).
    NoRoute,
}

/// The directed multigraph of networks and links.
pub struct Internetwork {
    graph: Graph<Network, Link, Directed>,
}

impl Internetwork {
    pub fn new() -> Self {
        Self {
            graph: Graph::new(),
        }
    }

    pub fn add_network(&mut self, network: Network) -> NetworkId {
        NetworkId(self.graph.add_node(network))
    }

    pub fn network(&self, id: NetworkId) -> &Network {
        &self.graph[id.0]
    }

    /// Join `from` to `to` with the given directed link. A reverse link (for a symmetric
    /// topology file entry) must be added separately, mirroring the `link{networka, networkb,
    /// latencyab, latencyba, ...}` topology form (§6).
    pub fn add_link(&mut self, from: NetworkId, to: NetworkId, link: Link) -> Result<(), InternetworkError> {
        if self.graph.find_edge(from.0, to.0).is_some() {
            return Err(InternetworkError::DuplicateLink(from, to));
        }
        self.graph.add_edge(from.0, to.0, link);
        Ok(())
    }

    /// Verify the graph is weakly connected, as required once topology build finishes.
    pub fn validate(&self) -> Result<(), InternetworkError> {
        if self.graph.node_count() == 0 {
            return Ok(());
        }
        // `connected_components` treats the graph as undirected for this purpose, matching
        // "weakly connected" in the data model.
        let undirected = self.graph.clone().into_edge_type::<petgraph::Undirected>();
        if connected_components(&undirected) != 1 {
            return Err(InternetworkError::NotConnected);
        }
        Ok(())
    }

    fn link(&self, from: NetworkId, to: NetworkId) -> Option<&Link> {
        self.graph
            .find_edge(from.0, to.0)
            .map(|e| &self.graph[e])
    }

    /// Sample the one-way network delay (not counting serialization) for a packet crossing from
    /// `src` to `dst`. Same network uses the intra-network CDF; different networks require a
    /// direct link (no multi-hop routing is modeled — topologies name every pair that should be
    /// able to talk directly, matching the legacy internetwork model).
    pub fn sample_latency(
        &self,
        src: NetworkId,
        dst: NetworkId,
        rng: &mut impl Rng,
    ) -> Result<SimulationTime, RouteError> {
        if src == dst {
            return Ok(self.graph[src.0].intra_cdf().sample(rng));
        }
        let link = self.link(src, dst).ok_or(RouteError::NoRoute)?;
        Ok(link.cdf().sample(rng))
    }

    /// Draw against the loss probability for a src/dst pair; `true` means "drop". Intra-network
    /// traffic is never lossy in this model (no link object carries a loss probability for it).
    pub fn sample_loss(&self, src: NetworkId, dst: NetworkId, rng: &mut impl Rng) -> Result<bool, RouteError> {
        if src == dst {
            return Ok(false);
        }
        let link = self.link(src, dst).ok_or(RouteError::NoRoute)?;
        if link.loss_probability() <= 0.0 {
            return Ok(false);
        }
        Ok(rng.gen_range(0.0..1.0) < link.loss_probability())
    }

    /// The minimum possible one-hop delay anywhere in the topology: the smallest CDF floor
    /// across every link and every network's intra-CDF. This is the basis for the scheduler's
    /// Δ_min conservative barrier (§4.1, §4.9).
    pub fn min_possible_latency(&self) -> SimulationTime {
        let intra_min = self
            .graph
            .node_weights()
            .map(|n| n.intra_cdf().min_delay())
            .min();
        let link_min = self
            .graph
            .edge_weights()
            .map(|l| l.cdf().min_delay())
            .min();
        match (intra_min, link_min) {
            (Some(a), Some(b)) => a.min(b),
            (Some(a), None) => a,
            (None, Some(b)) => b,
            (None, None) => SimulationTime::ZERO,
        }
    }
}

impl Default for Internetwork {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cdf::Cdf;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn rejects_a_disconnected_topology() {
        let mut net = Internetwork::new();
        net.add_network(Network::new("a", Cdf::constant(SimulationTime::from_millis(1))));
        net.add_network(Network::new("b", Cdf::constant(SimulationTime::from_millis(1))));
        assert!(matches!(net.validate(), Err(InternetworkError::NotConnected)));
    }

    #[test]
    fn same_network_uses_intra_cdf() {
        let mut net = Internetwork::new();
        let a = net.add_network(Network::new("a", Cdf::constant(SimulationTime::from_millis(5))));
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        assert_eq!(
            net.sample_latency(a, a, &mut rng).unwrap(),
            SimulationTime::from_millis(5)
        );
    }

    #[test]
    fn cross_network_requires_a_link() {
        let mut net = Internetwork::new();
        let a = net.add_network(Network::new("a", Cdf::constant(SimulationTime::from_millis(1))));
        let b = net.add_network(Network::new("b", Cdf::constant(SimulationTime::from_millis(1))));
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        assert_eq!(net.sample_latency(a, b, &mut rng).unwrap_err(), RouteError::NoRoute);

        net.add_link(a, b, Link::new(Cdf::constant(SimulationTime::from_millis(100)), 0.0))
            .unwrap();
        assert_eq!(
            net.sample_latency(a, b, &mut rng).unwrap(),
            SimulationTime::from_millis(100)
        );
        net.validate().unwrap();
    }

    #[test]
    fn min_possible_latency_is_the_floor_across_everything() {
        let mut net = Internetwork::new();
        let a = net.add_network(Network::new("a", Cdf::constant(SimulationTime::from_millis(10))));
        let b = net.add_network(Network::new("b", Cdf::constant(SimulationTime::from_millis(20))));
        net.add_link(a, b, Link::new(Cdf::constant(SimulationTime::from_millis(2)), 0.0))
            .unwrap();
        assert_eq!(net.min_possible_latency(), SimulationTime::from_millis(2));
    }
}
