use sim_time::SimulationTime;

use crate::cdf::Cdf;

/// A network is a node in the internetwork graph: a point where hosts attach and an intra-network
/// latency distribution applies to peers that share it.
#[derive(Debug)]
pub struct Network {
    name: String,
    intra_cdf: Cdf,
}

impl Network {
    pub fn new(name: impl Into<String>, intra_cdf: Cdf) -> Self {
        Self {
            name: name.into(),
            intra_cdf,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn intra_cdf(&self) -> &Cdf {
        &self.intra_cdf
    }
}

/// A directed edge joining two networks: a latency distribution and a loss probability, sampled
/// independently per packet (§4.9).
#[derive(Debug)]
pub struct Link {
    cdf: Cdf,
    /// Probability in `[0, 1]` that any given packet traversing this link is dropped.
    loss_probability: f64,
}

impl Link {
    pub fn new(cdf: Cdf, loss_probability: f64) -> Self {
        assert!((0.0..=1.0).contains(&loss_probability));
        Self { cdf, loss_probability }
    }

    pub fn cdf(&self) -> &Cdf {
        &self.cdf
    }

    pub fn loss_probability(&self) -> f64 {
        self.loss_probability
    }

    /// The p25/p50/p75 latency summary for this link, computed on demand from its CDF.
    pub fn latency_quartiles(&self) -> (SimulationTime, SimulationTime, SimulationTime) {
        self.cdf.quartiles()
    }
}
