//! Topology-file loading (§6): a thin `roxmltree` adapter from a topology XML document to the
//! ordered [`BootstrapAction`] list `sim_scheduler::Engine` replays. XML semantics are explicitly
//! out of scope for the kernel crates (§1); this module is the one place that grammar is read.
//!
//! Grammar (attribute names exactly as §6 names them):
//!
//! ```xml
//! <topology>
//!   <plugin name="echo" path="plugins/libecho.so"/>
//!   <cdf name="lan" center="50ms" width="5ms" tail="0.1"/>
//!   <cdf name="wan" path="wan.cdf"/>
//!   <network name="n1" cdf="lan" bandwidthdown="1 MiB" bandwidthup="1 MiB" packetloss="0"/>
//!   <link networka="n1" networkb="n2" latency="100ms" reliability="1.0"/>
//!   <node name="h1" network="n1" ip="10.0.0.1" bandwidthdown="1 MiB" bandwidthup="1 MiB"
//!         cpu="1000" quantity="1">
//!     <application plugin="echo" arguments="--port 9000" starttime="0s" stoptime="60s"/>
//!   </node>
//! </topology>
//! ```
//!
//! `network` additionally names a `cdf` attribute (not spelled out verbatim in §6's attribute
//! list, but every scenario in §8 declares a cdf before the network that uses it) resolving one of
//! the names registered by a prior `cdf` element in the same file.

use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use roxmltree::{Document, Node};
use sim_scheduler::BootstrapAction;
use sim_time::SimulationTime;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TopologyError {
    #[error("could not read topology file {path}: {source}")]
    Io { path: PathBuf, #[source] source: std::io::Error },
    #[error("{path}: malformed XML: {source}")]
    Parse { path: PathBuf, #[source] source: roxmltree::Error },
    #[error("{path}: <{element}> missing required attribute `{attribute}`")]
    MissingAttribute { path: PathBuf, element: String, attribute: String },
    #[error("{path}: <{element}> attribute `{attribute}` has invalid value `{value}`")]
    InvalidAttribute { path: PathBuf, element: String, attribute: String, value: String },
    #[error("{path}: unrecognized top-level element <{element}>")]
    UnrecognizedElement { path: PathBuf, element: String },
}

/// Parse one or more topology files in the order given (§6: "actions are executed in file
/// order"), concatenating their actions into a single replay list.
pub fn load_all(paths: &[PathBuf]) -> Result<Vec<BootstrapAction>, TopologyError> {
    let mut actions = Vec::new();
    for path in paths {
        actions.extend(load_file(path)?);
    }
    Ok(actions)
}

fn load_file(path: &Path) -> Result<Vec<BootstrapAction>, TopologyError> {
    let text = std::fs::read_to_string(path).map_err(|source| TopologyError::Io { path: path.to_path_buf(), source })?;
    parse(path, &text)
}

/// A network's `bandwidthdown`/`bandwidthup` attributes, carried forward as the default a `node`
/// inherits when it names that network and omits its own bandwidth.
#[derive(Copy, Clone)]
struct NetworkDefaults {
    bandwidth_down_bps: u64,
    bandwidth_up_bps: u64,
}

fn parse(path: &Path, text: &str) -> Result<Vec<BootstrapAction>, TopologyError> {
    let doc = Document::parse(text).map_err(|source| TopologyError::Parse { path: path.to_path_buf(), source })?;
    let mut actions = Vec::new();
    let mut network_defaults: std::collections::HashMap<String, NetworkDefaults> = std::collections::HashMap::new();

    for node in doc.root_element().children().filter(Node::is_element) {
        match node.tag_name().name() {
            "plugin" => actions.push(parse_plugin(path, node)?),
            "cdf" => actions.push(parse_cdf(path, node)?),
            "network" => {
                let (action, defaults) = parse_network(path, node)?;
                if let Some(defaults) = defaults {
                    if let BootstrapAction::CreateNetwork { name, .. } = &action {
                        network_defaults.insert(name.clone(), defaults);
                    }
                }
                actions.push(action);
            }
            "link" => actions.push(parse_link(path, node)?),
            "node" => actions.extend(parse_node(path, node, &network_defaults)?),
            other => {
                return Err(TopologyError::UnrecognizedElement { path: path.to_path_buf(), element: other.to_string() });
            }
        }
    }

    Ok(actions)
}

fn required<'a>(path: &Path, node: Node<'a, 'a>, attribute: &str) -> Result<&'a str, TopologyError> {
    node.attribute(attribute).ok_or_else(|| TopologyError::MissingAttribute {
        path: path.to_path_buf(),
        element: node.tag_name().name().to_string(),
        attribute: attribute.to_string(),
    })
}

fn parse_value<T: FromStr>(path: &Path, node: Node, attribute: &str, value: &str) -> Result<T, TopologyError> {
    value.parse().map_err(|_| TopologyError::InvalidAttribute {
        path: path.to_path_buf(),
        element: node.tag_name().name().to_string(),
        attribute: attribute.to_string(),
        value: value.to_string(),
    })
}

/// Parse a duration attribute such as `"50ms"`, `"10 s"`, `"1500us"` or a bare nanosecond count.
/// Recognized unit suffixes: `ns`, `us`, `ms`, `s`. Whitespace between the number and unit is
/// allowed.
fn parse_duration(path: &Path, node: Node, attribute: &str, value: &str) -> Result<SimulationTime, TopologyError> {
    let trimmed = value.trim();
    let split_at = trimmed.find(|c: char| c.is_alphabetic()).unwrap_or(trimmed.len());
    let (number, unit) = trimmed.split_at(split_at);
    let number: f64 = parse_value(path, node, attribute, number.trim())?;
    let unit = unit.trim();
    let nanos = match unit {
        "" | "ns" => number,
        "us" => number * 1_000.0,
        "ms" => number * 1_000_000.0,
        "s" => number * 1_000_000_000.0,
        _ => {
            return Err(TopologyError::InvalidAttribute {
                path: path.to_path_buf(),
                element: node.tag_name().name().to_string(),
                attribute: attribute.to_string(),
                value: value.to_string(),
            });
        }
    };
    if nanos < 0.0 {
        return Err(TopologyError::InvalidAttribute {
            path: path.to_path_buf(),
            element: node.tag_name().name().to_string(),
            attribute: attribute.to_string(),
            value: value.to_string(),
        });
    }
    Ok(SimulationTime::from_nanos(nanos.round() as u64))
}

/// Parse a byte-rate attribute such as `"1 MiB"`, `"500 KiB"`, or a bare byte count, returning
/// bits per second the way `Host::bandwidth_*_bps` expects.
fn parse_bandwidth_bps(path: &Path, node: Node, attribute: &str, value: &str) -> Result<u64, TopologyError> {
    let trimmed = value.trim();
    let split_at = trimmed.find(|c: char| c.is_alphabetic()).unwrap_or(trimmed.len());
    let (number, unit) = trimmed.split_at(split_at);
    let number: f64 = parse_value(path, node, attribute, number.trim())?;
    let unit = unit.trim();
    let bytes_per_sec = match unit {
        "" | "B" => number,
        "KiB" => number * 1024.0,
        "MiB" => number * 1024.0 * 1024.0,
        "GiB" => number * 1024.0 * 1024.0 * 1024.0,
        _ => {
            return Err(TopologyError::InvalidAttribute {
                path: path.to_path_buf(),
                element: node.tag_name().name().to_string(),
                attribute: attribute.to_string(),
                value: value.to_string(),
            });
        }
    };
    Ok((bytes_per_sec * 8.0).round() as u64)
}

fn parse_plugin(path: &Path, node: Node) -> Result<BootstrapAction, TopologyError> {
    let name = required(path, node, "name")?.to_string();
    let p = required(path, node, "path")?;
    Ok(BootstrapAction::LoadPlugin { name, path: PathBuf::from(p) })
}

fn parse_cdf(path: &Path, node: Node) -> Result<BootstrapAction, TopologyError> {
    let name = required(path, node, "name")?.to_string();
    if let Some(center) = node.attribute("center") {
        let width = required(path, node, "width")?;
        let tail = required(path, node, "tail")?;
        return Ok(BootstrapAction::GenerateCdf {
            name,
            center: parse_duration(path, node, "center", center)?,
            width: parse_duration(path, node, "width", width)?,
            tail: parse_value(path, node, "tail", tail)?,
        });
    }
    let cdf_path = required(path, node, "path")?;
    let points = load_cdf_points(path, node, Path::new(cdf_path))?;
    Ok(BootstrapAction::LoadCdf { name, points })
}

/// Read a CDF file's `fraction,delay_ns` lines (blank lines and `#`-prefixed comments skipped).
/// The CDF file format itself is out of scope for the kernel (§1); this is the one place its
/// textual shape is decided.
fn load_cdf_points(topology_path: &Path, node: Node, cdf_path: &Path) -> Result<Vec<(f64, SimulationTime)>, TopologyError> {
    let resolved = topology_path.parent().map(|dir| dir.join(cdf_path)).unwrap_or_else(|| cdf_path.to_path_buf());
    let text = std::fs::read_to_string(&resolved).map_err(|source| TopologyError::Io { path: resolved.clone(), source })?;
    let mut points = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let (fraction, delay) = line.split_once(',').ok_or_else(|| TopologyError::InvalidAttribute {
            path: topology_path.to_path_buf(),
            element: node.tag_name().name().to_string(),
            attribute: "path".to_string(),
            value: line.to_string(),
        })?;
        let fraction: f64 = parse_value(topology_path, node, "path", fraction.trim())?;
        let delay = parse_duration(topology_path, node, "path", delay.trim())?;
        points.push((fraction, delay));
    }
    Ok(points)
}

fn parse_network(path: &Path, node: Node) -> Result<(BootstrapAction, Option<NetworkDefaults>), TopologyError> {
    let name = required(path, node, "name")?.to_string();
    let cdf_name = required(path, node, "cdf")?.to_string();
    // `packetloss` is accepted per §6's grammar but the internetwork graph carries no
    // network-wide loss model (intra-network traffic is lossless by construction, see
    // `sim_net::Internetwork::sample_loss`), so it is read here only to be validated.
    if let Some(loss) = node.attribute("packetloss") {
        let _: f64 = parse_value(path, node, "packetloss", loss)?;
    }
    let defaults = match (node.attribute("bandwidthdown"), node.attribute("bandwidthup")) {
        (Some(down), Some(up)) => Some(NetworkDefaults {
            bandwidth_down_bps: parse_bandwidth_bps(path, node, "bandwidthdown", down)?,
            bandwidth_up_bps: parse_bandwidth_bps(path, node, "bandwidthup", up)?,
        }),
        _ => None,
    };
    Ok((BootstrapAction::CreateNetwork { name, cdf_name }, defaults))
}

fn parse_link(path: &Path, node: Node) -> Result<BootstrapAction, TopologyError> {
    let network_a = required(path, node, "networka")?.to_string();
    let network_b = required(path, node, "networkb")?.to_string();

    let (latency_a_to_b, latency_b_to_a) = if let Some(latency) = node.attribute("latency") {
        let d = parse_duration(path, node, "latency", latency)?;
        (d, d)
    } else {
        let ab = required(path, node, "latencyab")?;
        let ba = required(path, node, "latencyba")?;
        (parse_duration(path, node, "latencyab", ab)?, parse_duration(path, node, "latencyba", ba)?)
    };

    let (reliability_a_to_b, reliability_b_to_a) = if let Some(reliability) = node.attribute("reliability") {
        let r = parse_value(path, node, "reliability", reliability)?;
        (r, r)
    } else {
        let ab = required(path, node, "reliabilityab")?;
        let ba = required(path, node, "reliabilityba")?;
        (parse_value(path, node, "reliabilityab", ab)?, parse_value(path, node, "reliabilityba", ba)?)
    };

    Ok(BootstrapAction::ConnectNetworks {
        network_a,
        network_b,
        latency_a_to_b,
        latency_b_to_a,
        reliability_a_to_b,
        reliability_b_to_a,
    })
}

/// `node{...}` may nest zero or more `application{...}` elements and may request `quantity > 1`
/// instances, each getting its own incrementing IP and a `-N` suffixed name (§6: "already expanded
/// one action per instance if quantity > 1").
fn parse_node(
    path: &Path,
    node: Node,
    network_defaults: &std::collections::HashMap<String, NetworkDefaults>,
) -> Result<Vec<BootstrapAction>, TopologyError> {
    let base_name = required(path, node, "name")?.to_string();
    let network = required(path, node, "network")?.to_string();
    let ip: Ipv4Addr = parse_value(path, node, "ip", required(path, node, "ip")?)?;
    let defaults = network_defaults.get(&network).copied();
    let bandwidth_down_bps = match node.attribute("bandwidthdown") {
        Some(v) => parse_bandwidth_bps(path, node, "bandwidthdown", v)?,
        None => defaults
            .map(|d| d.bandwidth_down_bps)
            .ok_or_else(|| TopologyError::MissingAttribute {
                path: path.to_path_buf(),
                element: node.tag_name().name().to_string(),
                attribute: "bandwidthdown".to_string(),
            })?,
    };
    let bandwidth_up_bps = match node.attribute("bandwidthup") {
        Some(v) => parse_bandwidth_bps(path, node, "bandwidthup", v)?,
        None => defaults
            .map(|d| d.bandwidth_up_bps)
            .ok_or_else(|| TopologyError::MissingAttribute {
                path: path.to_path_buf(),
                element: node.tag_name().name().to_string(),
                attribute: "bandwidthup".to_string(),
            })?,
    };
    let cpu_speed_mhz: u64 = parse_value(path, node, "cpu", required(path, node, "cpu")?)?;
    let quantity: u32 = match node.attribute("quantity") {
        Some(q) => parse_value(path, node, "quantity", q)?,
        None => 1,
    };

    let applications: Vec<Node> = node.children().filter(Node::is_element).filter(|n| n.tag_name().name() == "application").collect();

    let mut actions = Vec::with_capacity(quantity as usize * (1 + applications.len()));
    let ip_base = u32::from(ip);
    for instance in 0..quantity {
        let (name, instance_ip) = if quantity == 1 {
            (base_name.clone(), ip)
        } else {
            (format!("{base_name}-{instance}"), Ipv4Addr::from(ip_base + instance))
        };
        actions.push(BootstrapAction::CreateNode {
            name: name.clone(),
            network: network.clone(),
            ip: instance_ip,
            bandwidth_down_bps,
            bandwidth_up_bps,
            cpu_speed_mhz,
        });
        for app in &applications {
            actions.push(parse_application(path, *app, &name)?);
        }
    }

    Ok(actions)
}

fn parse_application(path: &Path, node: Node, owner: &str) -> Result<BootstrapAction, TopologyError> {
    let plugin = required(path, node, "plugin")?.to_string();
    let arguments = match node.attribute("arguments") {
        Some(args) if !args.trim().is_empty() => args.split_whitespace().map(str::to_string).collect(),
        _ => Vec::new(),
    };
    let start_time = match node.attribute("starttime") {
        Some(v) => parse_duration(path, node, "starttime", v)?,
        None => SimulationTime::ZERO,
    };
    let stop_time = match node.attribute("stoptime") {
        Some(v) => Some(parse_duration(path, node, "stoptime", v)?),
        None => None,
    };
    Ok(BootstrapAction::StartApplication { node: owner.to_string(), plugin, arguments, start_time, stop_time })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn actions_from(xml: &str) -> Vec<BootstrapAction> {
        parse(Path::new("test.xml"), xml).unwrap()
    }

    #[test]
    fn parses_a_minimal_two_host_topology() {
        let xml = r#"
            <topology>
              <cdf name="lan" center="50ms" width="1ms" tail="0.1"/>
              <network name="n1" cdf="lan"/>
              <node name="h1" network="n1" ip="10.0.0.1" bandwidthdown="1 MiB" bandwidthup="1 MiB" cpu="1000">
                <application plugin="echo" starttime="0s"/>
              </node>
              <node name="h2" network="n1" ip="10.0.0.2" bandwidthdown="1 MiB" bandwidthup="1 MiB" cpu="1000"/>
            </topology>
        "#;
        let actions = actions_from(xml);
        assert!(matches!(actions[0], BootstrapAction::GenerateCdf { .. }));
        assert!(matches!(actions[1], BootstrapAction::CreateNetwork { .. }));
        assert!(matches!(actions[2], BootstrapAction::CreateNode { .. }));
        assert!(matches!(actions[3], BootstrapAction::StartApplication { .. }));
        assert!(matches!(actions[4], BootstrapAction::CreateNode { .. }));
    }

    #[test]
    fn symmetric_link_attributes_expand_to_both_directions() {
        let xml = r#"
            <topology>
              <link networka="a" networkb="b" latency="100ms" reliability="0.9"/>
            </topology>
        "#;
        let actions = actions_from(xml);
        match &actions[0] {
            BootstrapAction::ConnectNetworks {
                latency_a_to_b,
                latency_b_to_a,
                reliability_a_to_b,
                reliability_b_to_a,
                ..
            } => {
                assert_eq!(*latency_a_to_b, SimulationTime::from_millis(100));
                assert_eq!(*latency_a_to_b, *latency_b_to_a);
                assert_eq!(*reliability_a_to_b, 0.9);
                assert_eq!(*reliability_a_to_b, *reliability_b_to_a);
            }
            other => panic!("expected ConnectNetworks, got {other:?}"),
        }
    }

    #[test]
    fn asymmetric_link_attributes_are_kept_distinct() {
        let xml = r#"
            <topology>
              <link networka="a" networkb="b" latencyab="10ms" latencyba="20ms"
                    reliabilityab="1.0" reliabilityba="0.5"/>
            </topology>
        "#;
        let actions = actions_from(xml);
        match &actions[0] {
            BootstrapAction::ConnectNetworks { latency_a_to_b, latency_b_to_a, .. } => {
                assert_eq!(*latency_a_to_b, SimulationTime::from_millis(10));
                assert_eq!(*latency_b_to_a, SimulationTime::from_millis(20));
            }
            other => panic!("expected ConnectNetworks, got {other:?}"),
        }
    }

    #[test]
    fn quantity_expands_into_one_node_per_instance_with_distinct_ips() {
        let xml = r#"
            <topology>
              <node name="client" network="n1" ip="10.0.0.1" bandwidthdown="1 MiB" bandwidthup="1 MiB"
                    cpu="1000" quantity="3"/>
            </topology>
        "#;
        let actions = actions_from(xml);
        assert_eq!(actions.len(), 3);
        let names: Vec<&str> = actions
            .iter()
            .map(|a| match a {
                BootstrapAction::CreateNode { name, .. } => name.as_str(),
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(names, vec!["client-0", "client-1", "client-2"]);
    }

    #[test]
    fn missing_required_attribute_is_a_topology_error_not_a_panic() {
        let xml = r#"<topology><network name="n1"/></topology>"#;
        let err = parse(Path::new("test.xml"), xml).unwrap_err();
        assert!(matches!(err, TopologyError::MissingAttribute { .. }));
    }

    #[test]
    fn unrecognized_element_is_rejected() {
        let xml = r#"<topology><bogus/></topology>"#;
        let err = parse(Path::new("test.xml"), xml).unwrap_err();
        assert!(matches!(err, TopologyError::UnrecognizedElement { .. }));
    }

    #[test]
    fn bare_nanosecond_durations_and_byte_counts_parse_without_units() {
        let xml = r#"
            <topology>
              <cdf name="lan" center="50000000" width="1000000" tail="0.1"/>
            </topology>
        "#;
        let actions = actions_from(xml);
        match &actions[0] {
            BootstrapAction::GenerateCdf { center, .. } => assert_eq!(*center, SimulationTime::from_millis(50)),
            other => panic!("expected GenerateCdf, got {other:?}"),
        }
    }
}
