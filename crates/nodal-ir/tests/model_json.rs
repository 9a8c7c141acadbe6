//! The model is handed to the engine as JSON; these tests pin its shape.

use nodal_ir::{Configuration, DataPlane, Edge, HeaderSpace, IpProtocol, LineAction, SubRange};

const NETWORK: &str = r#"{
    "configurations": {
        "r1": {
            "hostname": "r1",
            "interfaces": {
                "eth0": { "name": "eth0", "address": "10.0.12.1/30", "outgoing_filter": "to-r2" },
                "lo0": { "name": "lo0", "address": "1.1.1.1/32" }
            },
            "ip_access_lists": {
                "to-r2": {
                    "name": "to-r2",
                    "lines": [
                        { "name": "no-ssh", "action": "Reject",
                          "header_space": { "ip_protocols": [6], "dst_ports": [{ "start": 22, "end": 22 }] } },
                        { "name": "rest", "action": "Accept" }
                    ]
                }
            }
        }
    },
    "data_plane": {
        "fibs": {
            "r1": [
                { "prefix": "2.2.2.2/32", "interface": "eth0", "next_hop": "r2" },
                { "prefix": "0.0.0.0/0", "interface": "null_interface" }
            ]
        },
        "topology_edges": [
            { "node1": "r1", "int1": "eth0", "node2": "r2", "int2": "eth0" }
        ],
        "flow_sinks": []
    }
}"#;

#[derive(serde::Deserialize)]
struct Network {
    configurations: std::collections::BTreeMap<String, Configuration>,
    data_plane: DataPlane,
}

#[test]
fn network_document_deserializes() {
    let network: Network = serde_json::from_str(NETWORK).expect("valid document");
    let r1 = &network.configurations["r1"];
    assert_eq!(r1.owned_ips().len(), 2);

    let acl = &r1.ip_access_lists["to-r2"];
    assert_eq!(acl.lines[0].action, LineAction::Reject);
    assert!(acl.lines[0].header_space.ip_protocols.contains(&IpProtocol::TCP));
    assert!(acl.lines[1].header_space.is_unconstrained());

    let fib = &network.data_plane.fibs["r1"];
    assert_eq!(fib[0].next_hop.as_deref(), Some("r2"));
    assert!(network
        .data_plane
        .topology_edges
        .contains(&Edge::new("r1", "eth0", "r2", "eth0")));
}

#[test]
fn header_space_survives_json() {
    let hs = HeaderSpace::any()
        .with_dst_ip("10.0.0.0:0.255.0.255".parse().unwrap())
        .with_protocol(IpProtocol::UDP)
        .with_dst_ports(SubRange::new(53, 53))
        .negated();
    let json = serde_json::to_string(&hs).unwrap();
    let back: HeaderSpace = serde_json::from_str(&json).unwrap();
    assert_eq!(back, hs);
}

#[test]
fn malformed_prefix_is_rejected() {
    let bad = r#"{ "fibs": { "r1": [ { "prefix": "10.0.0.0/40", "interface": "eth0" } ] } }"#;
    assert!(serde_json::from_str::<DataPlane>(bad).is_err());
}
