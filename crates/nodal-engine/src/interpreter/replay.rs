//! Concrete forwarding over a data-plane snapshot.

use std::collections::{BTreeMap, BTreeSet};

use nodal_ir::data_plane::is_null_interface;
use nodal_ir::{
    Configuration, DataPlane, Edge, Flow, FlowDisposition, FlowTrace, FlowTraceHop,
    NodeInterfacePair,
};
use tracing::trace;

use super::FlowReplayer;

/// Replays flows hop by hop with the same semantics the compiler encodes:
/// local delivery first, then longest-prefix match, outgoing filter, and the
/// neighbor's incoming filter. Every ECMP branch yields its own trace.
pub struct DataPlaneReplayer<'a> {
    configurations: &'a BTreeMap<String, Configuration>,
    data_plane: &'a DataPlane,
}

impl<'a> DataPlaneReplayer<'a> {
    pub fn new(configurations: &'a BTreeMap<String, Configuration>, data_plane: &'a DataPlane) -> Self {
        Self {
            configurations,
            data_plane,
        }
    }

    fn interface_up(&self, pair: &NodeInterfacePair) -> bool {
        self.configurations
            .get(&pair.hostname)
            .and_then(|c| c.interfaces.get(&pair.interface))
            .is_some_and(|i| i.active)
    }

    /// An interface without a filter in that direction permits everything.
    fn filter_permits(&self, hostname: &str, interface: &str, flow: &Flow, incoming: bool) -> bool {
        let Some(config) = self.configurations.get(hostname) else {
            return true;
        };
        let filter = config.interfaces.get(interface).and_then(|i| {
            if incoming {
                i.incoming_filter.as_deref()
            } else {
                i.outgoing_filter.as_deref()
            }
        });
        match filter {
            // An undefined filter never reaches here: compilation rejects it.
            Some(name) => config
                .ip_access_lists
                .get(name)
                .map_or(false, |acl| acl.permits(flow)),
            None => true,
        }
    }

    fn walk(
        &self,
        flow: &Flow,
        node: &str,
        hops: &mut Vec<FlowTraceHop>,
        visited: &mut BTreeSet<String>,
        traces: &mut Vec<FlowTrace>,
    ) {
        if !visited.insert(node.to_string()) {
            traces.push(finish(hops, FlowDisposition::Loop, format!("revisits {node}")));
            return;
        }
        let config = self.configurations.get(node);
        if config.is_some_and(|c| c.owned_ips().contains(&flow.dst_ip)) {
            traces.push(finish(hops, FlowDisposition::Accepted, format!("accepted by {node}")));
            visited.remove(node);
            return;
        }

        let rows = self.data_plane.longest_prefix_match(node, flow.dst_ip);
        if rows.is_empty() {
            traces.push(finish(hops, FlowDisposition::NoRoute, format!("no route at {node}")));
            visited.remove(node);
            return;
        }

        let mut seen = BTreeSet::new();
        for row in rows {
            if !seen.insert((row.interface.clone(), row.next_hop.clone(), row.next_hop_interface.clone())) {
                continue;
            }
            let interface = config.and_then(|c| c.interfaces.get(&row.interface));
            if is_null_interface(&row.interface) || interface.is_some_and(|i| i.active && i.is_loopback()) {
                traces.push(finish(hops, FlowDisposition::NullRouted, format!("null route {} at {node}", row.prefix)));
                continue;
            }
            if !interface.is_some_and(|i| i.active) {
                traces.push(finish(
                    hops,
                    FlowDisposition::NeighborUnreachable,
                    format!("{node}:{} is down", row.interface),
                ));
                continue;
            }
            if !self.filter_permits(node, &row.interface, flow, false) {
                traces.push(finish(
                    hops,
                    FlowDisposition::DeniedOut,
                    format!("denied out of {node}:{}", row.interface),
                ));
                continue;
            }
            let exit = NodeInterfacePair::new(node, &row.interface);
            if self.data_plane.flow_sinks.contains(&exit) {
                traces.push(finish(hops, FlowDisposition::Accepted, format!("exits the network at {exit}")));
                continue;
            }
            let next: Vec<&Edge> = self
                .data_plane
                .edges_from(node, &row.interface)
                .filter(|e| row.selects(e) && self.interface_up(&e.head()))
                .collect();
            if next.is_empty() {
                traces.push(finish(
                    hops,
                    FlowDisposition::NeighborUnreachable,
                    format!("no neighbor on {exit}"),
                ));
                continue;
            }
            for edge in next {
                hops.push(FlowTraceHop { edge: edge.clone() });
                if self.filter_permits(&edge.node2, &edge.int2, flow, true) {
                    self.walk(flow, &edge.node2, hops, visited, traces);
                } else {
                    traces.push(finish(hops, FlowDisposition::DeniedIn, format!("denied into {}", edge.head())));
                }
                hops.pop();
            }
        }
        visited.remove(node);
    }
}

fn finish(hops: &[FlowTraceHop], disposition: FlowDisposition, notes: String) -> FlowTrace {
    FlowTrace {
        hops: hops.to_vec(),
        disposition,
        notes,
    }
}

impl FlowReplayer for DataPlaneReplayer<'_> {
    fn replay(&self, flow: &Flow) -> Vec<FlowTrace> {
        let mut traces = Vec::new();
        self.walk(
            flow,
            &flow.ingress_node,
            &mut Vec::new(),
            &mut BTreeSet::new(),
            &mut traces,
        );
        trace!(%flow, traces = traces.len(), "Replayed flow");
        traces
    }
}
