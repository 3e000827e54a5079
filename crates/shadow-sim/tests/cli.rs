//! End-to-end checks of the `shadow-sim` binary's process contract (§6): the exit codes a
//! malformed invocation or topology file must produce. A full plugin-driven run needs a
//! platform `.so`/`.dylib` built from `sim-plugin`'s shim, which is out of reach without invoking
//! the Rust toolchain from here, so these stick to topology-loading outcomes the binary can reach
//! entirely on its own.

use std::io::Write;
use std::process::Command;

fn shadow_sim() -> Command {
    Command::new(env!("CARGO_BIN_EXE_shadow-sim"))
}

fn write_topology(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(".xml").tempfile().expect("create scratch topology file");
    file.write_all(contents.as_bytes()).expect("write scratch topology file");
    file
}

#[test]
fn empty_topology_runs_to_completion_with_exit_code_zero() {
    let topology = write_topology("<topology></topology>");
    let status = shadow_sim().arg(topology.path()).status().expect("spawn shadow-sim");
    assert_eq!(status.code(), Some(0));
}

#[test]
fn a_two_host_idle_topology_also_exits_cleanly() {
    let topology = write_topology(
        r#"
        <topology>
          <cdf name="lan" center="50ms" width="1ms" tail="0.1"/>
          <network name="n1" cdf="lan"/>
          <node name="h1" network="n1" ip="10.0.0.1" bandwidthdown="1 MiB" bandwidthup="1 MiB" cpu="1000"/>
          <node name="h2" network="n1" ip="10.0.0.2" bandwidthdown="1 MiB" bandwidthup="1 MiB" cpu="1000"/>
        </topology>
        "#,
    );
    let status = shadow_sim().arg(topology.path()).status().expect("spawn shadow-sim");
    assert_eq!(status.code(), Some(0));
}

#[test]
fn malformed_xml_exits_with_the_configuration_error_code() {
    let topology = write_topology("<topology><node name=\"broken\"");
    let status = shadow_sim().arg(topology.path()).status().expect("spawn shadow-sim");
    assert_eq!(status.code(), Some(1));
}

#[test]
fn a_node_naming_an_undeclared_network_exits_with_the_configuration_error_code() {
    let topology = write_topology(
        r#"
        <topology>
          <node name="h1" network="nowhere" ip="10.0.0.1" bandwidthdown="1 MiB" bandwidthup="1 MiB" cpu="1000"/>
        </topology>
        "#,
    );
    let status = shadow_sim().arg(topology.path()).status().expect("spawn shadow-sim");
    assert_eq!(status.code(), Some(1));
}

#[test]
fn a_nonexistent_topology_path_exits_with_the_configuration_error_code() {
    let status = shadow_sim().arg("/nonexistent/path/to/topology.xml").status().expect("spawn shadow-sim");
    assert_eq!(status.code(), Some(1));
}
