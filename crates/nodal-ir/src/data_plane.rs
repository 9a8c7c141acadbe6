use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::ip::{Ip, Prefix};
use crate::topology::{Edge, NodeInterfacePair};

/// Interface names that discard traffic routed to them.
pub const NULL_INTERFACES: [&str; 3] = ["null_interface", "null0", "drop"];

/// Whether routing to `interface` discards the packet.
pub fn is_null_interface(interface: &str) -> bool {
    let lower = interface.to_ascii_lowercase();
    NULL_INTERFACES.contains(&lower.as_str())
}

/// One forwarding entry: packets matching `prefix` leave through `interface`,
/// optionally toward a specific neighbor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FibRow {
    pub prefix: Prefix,
    pub interface: String,
    /// Neighbor hostname; `None` means any neighbor on the interface.
    #[serde(default)]
    pub next_hop: Option<String>,
    #[serde(default)]
    pub next_hop_interface: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_hop_ip: Option<Ip>,
}

impl FibRow {
    pub fn new(prefix: Prefix, interface: impl Into<String>) -> Self {
        Self {
            prefix,
            interface: interface.into(),
            next_hop: None,
            next_hop_interface: None,
            next_hop_ip: None,
        }
    }

    pub fn via(mut self, next_hop: impl Into<String>, next_hop_interface: impl Into<String>) -> Self {
        self.next_hop = Some(next_hop.into());
        self.next_hop_interface = Some(next_hop_interface.into());
        self
    }

    /// Whether `edge` leaves through this row's interface toward its next hop.
    pub fn selects(&self, edge: &Edge) -> bool {
        edge.int1 == self.interface
            && self.next_hop.as_ref().map_or(true, |n| *n == edge.node2)
            && self
                .next_hop_interface
                .as_ref()
                .map_or(true, |i| *i == edge.int2)
    }
}

/// A computed data-plane snapshot: per-node forwarding tables, the layer-3
/// topology and the interfaces where traffic leaves the modelled network.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataPlane {
    #[serde(default)]
    pub fibs: BTreeMap<String, Vec<FibRow>>,
    #[serde(default)]
    pub topology_edges: BTreeSet<Edge>,
    #[serde(default)]
    pub flow_sinks: BTreeSet<NodeInterfacePair>,
}

impl DataPlane {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_route(&mut self, hostname: &str, row: FibRow) {
        self.fibs.entry(hostname.to_string()).or_default().push(row);
    }

    /// Adds `edge` and its reverse.
    pub fn add_link(&mut self, edge: Edge) {
        self.topology_edges.insert(edge.reversed());
        self.topology_edges.insert(edge);
    }

    pub fn edges_from<'a>(
        &'a self,
        hostname: &'a str,
        interface: &'a str,
    ) -> impl Iterator<Item = &'a Edge> + 'a {
        self.topology_edges
            .iter()
            .filter(move |e| e.node1 == hostname && e.int1 == interface)
    }

    /// Rows of `hostname` whose prefix is the longest one containing `ip`.
    pub fn longest_prefix_match(&self, hostname: &str, ip: Ip) -> Vec<&FibRow> {
        let Some(rows) = self.fibs.get(hostname) else {
            return Vec::new();
        };
        let best = rows
            .iter()
            .filter(|r| r.prefix.contains(ip))
            .map(|r| r.prefix.length())
            .max();
        match best {
            Some(len) => rows
                .iter()
                .filter(|r| r.prefix.length() == len && r.prefix.contains(ip))
                .collect(),
            None => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prefix(s: &str) -> Prefix {
        s.parse().unwrap()
    }

    #[test]
    fn longest_prefix_wins_and_keeps_ecmp_rows() {
        let mut dp = DataPlane::new();
        dp.add_route("r1", FibRow::new(prefix("0.0.0.0/0"), "eth0"));
        dp.add_route("r1", FibRow::new(prefix("10.0.0.0/8"), "eth1"));
        dp.add_route("r1", FibRow::new(prefix("10.0.0.0/8"), "eth2"));

        let ip: Ip = "10.1.2.3".parse().unwrap();
        let ifaces: Vec<&str> = dp
            .longest_prefix_match("r1", ip)
            .iter()
            .map(|r| r.interface.as_str())
            .collect();
        assert_eq!(ifaces, vec!["eth1", "eth2"]);

        let other: Ip = "8.8.8.8".parse().unwrap();
        assert_eq!(dp.longest_prefix_match("r1", other)[0].interface, "eth0");
        assert!(dp.longest_prefix_match("r9", other).is_empty());
    }

    #[test]
    fn row_next_hop_filters_edges() {
        let mut dp = DataPlane::new();
        dp.add_link(Edge::new("r1", "eth0", "r2", "eth0"));
        dp.add_link(Edge::new("r1", "eth0", "r3", "eth0"));
        let row = FibRow::new(prefix("10.0.0.0/8"), "eth0").via("r3", "eth0");
        let selected: Vec<&Edge> = dp
            .edges_from("r1", "eth0")
            .filter(|e| row.selects(e))
            .collect();
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].node2, "r3");
    }

    #[test]
    fn null_interfaces_are_case_insensitive() {
        assert!(is_null_interface("Null0"));
        assert!(is_null_interface("null_interface"));
        assert!(!is_null_interface("eth0"));
    }
}
