//! Forwarding model compiler.
//!
//! A [`Synthesizer`] is built once per batch from configurations (and
//! optionally a data-plane snapshot) and is never mutated afterwards. Jobs
//! share it behind `Arc` and instantiate its logic into their own
//! [`Encoding`](nodal_smt::encoding::Encoding) through a [`LayerEncoder`].

pub mod acl;
pub mod forwarding;
pub mod header;
pub mod layer;
pub mod variables;

use std::collections::{BTreeMap, BTreeSet};

use indexmap::{IndexMap, IndexSet};
use thiserror::Error;
use tracing::{debug, info, warn};

use nodal_ir::{Configuration, DataPlane, Edge, Ip, NodeInterfacePair};

pub use acl::{CompiledAcl, CompiledLine};
pub use forwarding::{Instance, NodeOutcome, Origin, RouteGroup, RouteTarget};
pub use layer::{LayerEncoder, Mask};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CompileError {
    #[error("configuration keyed '{key}' declares hostname '{hostname}'")]
    HostnameMismatch { key: String, hostname: String },
    #[error("{hostname}: interface '{interface}' references undefined ACL '{acl}'")]
    UnknownAcl {
        hostname: String,
        interface: String,
        acl: String,
    },
    #[error("{hostname}: unknown interface '{interface}' referenced by {context}")]
    UnknownInterface {
        hostname: String,
        interface: String,
        context: &'static str,
    },
    #[error("inconsistent data plane: {0}")]
    InconsistentDataPlane(String),
}

/// Compiled state of one device.
#[derive(Debug, Clone)]
pub struct NodeModel {
    /// The device configuration restricted to active interfaces.
    pub configuration: Configuration,
    pub owned_ips: Vec<Ip>,
    pub acls: IndexMap<String, CompiledAcl>,
    /// Longest-prefix-match groups; empty without a data plane.
    pub routes: Vec<RouteGroup>,
    pub in_edges: Vec<usize>,
    pub out_edges: Vec<usize>,
}

impl NodeModel {
    pub fn hostname(&self) -> &str {
        &self.configuration.hostname
    }

    pub fn incoming_filter(&self, interface: &str) -> Option<&str> {
        self.configuration
            .interfaces
            .get(interface)
            .and_then(|i| i.incoming_filter.as_deref())
    }

    pub fn outgoing_filter(&self, interface: &str) -> Option<&str> {
        self.configuration
            .interfaces
            .get(interface)
            .and_then(|i| i.outgoing_filter.as_deref())
    }
}

/// The compiled logical model of a set of devices.
#[derive(Debug, Clone)]
pub struct Synthesizer {
    nodes: IndexMap<String, NodeModel>,
    edges: IndexSet<Edge>,
    data_plane: bool,
    warnings: Vec<String>,
}

impl Synthesizer {
    /// ACL logic only, for data-plane-independent properties.
    pub fn control_plane(
        configurations: &BTreeMap<String, Configuration>,
        simplify: bool,
    ) -> Result<Self, CompileError> {
        let mut warnings = Vec::new();
        let nodes = compile_nodes(configurations, simplify, &mut warnings)?;
        let acl_count: usize = nodes.values().map(|n| n.acls.len()).sum();
        info!(
            nodes = nodes.len(),
            acls = acl_count,
            warnings = warnings.len(),
            "Compiled control-plane model"
        );
        log_warnings(&warnings);
        Ok(Self {
            nodes,
            edges: IndexSet::new(),
            data_plane: false,
            warnings,
        })
    }

    /// ACL logic plus the forwarding transition system of `data_plane`.
    pub fn with_data_plane(
        configurations: &BTreeMap<String, Configuration>,
        data_plane: &DataPlane,
        simplify: bool,
    ) -> Result<Self, CompileError> {
        check_consistency(configurations, data_plane)?;

        let mut warnings = Vec::new();
        let mut nodes = compile_nodes(configurations, simplify, &mut warnings)?;
        let edges = compile_edges(configurations, data_plane, &mut warnings)?;
        for (index, edge) in edges.iter().enumerate() {
            if let Some(tail) = nodes.get_mut(&edge.node1) {
                tail.out_edges.push(index);
            }
            if let Some(head) = nodes.get_mut(&edge.node2) {
                head.in_edges.push(index);
            }
        }
        let sinks = compile_sinks(&nodes, configurations, data_plane, &mut warnings)?;

        for (hostname, node) in nodes.iter_mut() {
            let rows = data_plane.fibs.get(hostname).map(Vec::as_slice).unwrap_or(&[]);
            node.routes = forwarding::compile_routes(
                hostname,
                rows,
                configurations.get(hostname),
                &edges,
                &sinks,
                &mut warnings,
            )?;
        }

        let route_count: usize = nodes.values().map(|n| n.routes.len()).sum();
        info!(
            nodes = nodes.len(),
            edges = edges.len(),
            route_groups = route_count,
            warnings = warnings.len(),
            "Compiled data-plane model"
        );
        log_warnings(&warnings);
        Ok(Self {
            nodes,
            edges,
            data_plane: true,
            warnings,
        })
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn has_data_plane(&self) -> bool {
        self.data_plane
    }

    pub fn hostnames(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(String::as_str)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn node(&self, hostname: &str) -> Option<&NodeModel> {
        self.nodes.get(hostname)
    }

    pub fn node_index(&self, hostname: &str) -> Option<usize> {
        self.nodes.get_index_of(hostname)
    }

    pub(crate) fn node_at(&self, index: usize) -> Option<(&String, &NodeModel)> {
        self.nodes.get_index(index)
    }

    pub(crate) fn nodes(&self) -> impl Iterator<Item = (usize, &NodeModel)> {
        self.nodes.values().enumerate()
    }

    pub fn edges(&self) -> &IndexSet<Edge> {
        &self.edges
    }

    pub fn edge_index(&self, edge: &Edge) -> Option<usize> {
        self.edges.get_index_of(edge)
    }

    pub fn acl(&self, hostname: &str, acl: &str) -> Option<&CompiledAcl> {
        self.nodes.get(hostname)?.acls.get(acl)
    }

    /// Whether a flow can enter at `vrf` on `hostname`.
    pub fn has_ingress(&self, hostname: &str, vrf: &str) -> bool {
        self.nodes
            .get(hostname)
            .is_some_and(|node| node.configuration.vrfs().contains(vrf))
    }

    /// Every (node, vrf) pair a flow can enter at.
    pub fn ingress_points(&self) -> BTreeSet<(String, String)> {
        self.nodes
            .iter()
            .flat_map(|(host, node)| {
                node.configuration
                    .vrfs()
                    .into_iter()
                    .map(move |vrf| (host.clone(), vrf))
            })
            .collect()
    }

    /// Addresses owned by the nodes, interfaces and edge endpoints in `mask`.
    pub fn blacklisted_ips(&self, mask: &Mask) -> BTreeSet<Ip> {
        let mut ips = BTreeSet::new();
        let mut interface_ip = |pair: &NodeInterfacePair| {
            if let Some(address) = self
                .nodes
                .get(&pair.hostname)
                .and_then(|n| n.configuration.interfaces.get(&pair.interface))
                .and_then(|i| i.address)
            {
                ips.insert(address.ip);
            }
        };
        for pair in mask.interfaces() {
            interface_ip(pair);
        }
        for edge in mask.edges() {
            interface_ip(&edge.tail());
            interface_ip(&edge.head());
        }
        for host in mask.nodes() {
            if let Some(node) = self.nodes.get(host) {
                ips.extend(node.owned_ips.iter().copied());
            }
        }
        ips
    }
}

fn log_warnings(warnings: &[String]) {
    for w in warnings {
        warn!("{w}");
    }
}

fn compile_nodes(
    configurations: &BTreeMap<String, Configuration>,
    simplify: bool,
    warnings: &mut Vec<String>,
) -> Result<IndexMap<String, NodeModel>, CompileError> {
    let mut nodes = IndexMap::new();
    for (key, config) in configurations {
        if *key != config.hostname {
            return Err(CompileError::HostnameMismatch {
                key: key.clone(),
                hostname: config.hostname.clone(),
            });
        }
        let mut active = config.clone();
        active.interfaces.retain(|_, i| i.active);
        let pruned = config.interfaces.len() - active.interfaces.len();
        if pruned > 0 {
            debug!(hostname = %key, pruned, "Pruned inactive interfaces");
        }

        for interface in active.interfaces.values() {
            for acl in [&interface.incoming_filter, &interface.outgoing_filter]
                .into_iter()
                .flatten()
            {
                if !active.ip_access_lists.contains_key(acl) {
                    return Err(CompileError::UnknownAcl {
                        hostname: key.clone(),
                        interface: interface.name.clone(),
                        acl: acl.clone(),
                    });
                }
            }
            if !interface.source_nats.is_empty() {
                warnings.push(format!(
                    "{key}: source NAT on interface '{}' is not modelled; treated as identity",
                    interface.name
                ));
            }
        }

        let acls = active
            .ip_access_lists
            .values()
            .map(|acl| {
                (
                    acl.name.clone(),
                    CompiledAcl::compile(acl, simplify, warnings, key),
                )
            })
            .collect();
        let owned_ips = active.owned_ips().into_iter().collect();
        nodes.insert(
            key.clone(),
            NodeModel {
                configuration: active,
                owned_ips,
                acls,
                routes: Vec::new(),
                in_edges: Vec::new(),
                out_edges: Vec::new(),
            },
        );
    }
    Ok(nodes)
}

fn check_consistency(
    configurations: &BTreeMap<String, Configuration>,
    data_plane: &DataPlane,
) -> Result<(), CompileError> {
    if let Some(host) = data_plane.fibs.keys().find(|h| !configurations.contains_key(*h)) {
        return Err(CompileError::InconsistentDataPlane(format!(
            "FIB for node '{host}' which has no configuration"
        )));
    }
    if let Some(host) = configurations.keys().find(|h| !data_plane.fibs.contains_key(*h)) {
        return Err(CompileError::InconsistentDataPlane(format!(
            "node '{host}' has no FIB"
        )));
    }
    Ok(())
}

/// Whether `pair` names an active interface. Unknown interfaces are an error.
fn interface_state(
    configurations: &BTreeMap<String, Configuration>,
    pair: &NodeInterfacePair,
    context: &'static str,
) -> Result<bool, CompileError> {
    configurations
        .get(&pair.hostname)
        .and_then(|c| c.interfaces.get(&pair.interface))
        .map(|i| i.active)
        .ok_or_else(|| CompileError::UnknownInterface {
            hostname: pair.hostname.clone(),
            interface: pair.interface.clone(),
            context,
        })
}

fn compile_edges(
    configurations: &BTreeMap<String, Configuration>,
    data_plane: &DataPlane,
    warnings: &mut Vec<String>,
) -> Result<IndexSet<Edge>, CompileError> {
    let mut edges = IndexSet::new();
    for edge in &data_plane.topology_edges {
        let tail_up = interface_state(configurations, &edge.tail(), "a topology edge")?;
        let head_up = interface_state(configurations, &edge.head(), "a topology edge")?;
        if !(tail_up && head_up) {
            warnings.push(format!("edge {edge} touches an inactive interface and was pruned"));
            continue;
        }
        edges.insert(edge.clone());
    }
    Ok(edges)
}

fn compile_sinks(
    nodes: &IndexMap<String, NodeModel>,
    configurations: &BTreeMap<String, Configuration>,
    data_plane: &DataPlane,
    warnings: &mut Vec<String>,
) -> Result<BTreeSet<NodeInterfacePair>, CompileError> {
    let mut sinks = BTreeSet::new();
    for sink in &data_plane.flow_sinks {
        if !nodes.contains_key(&sink.hostname) {
            return Err(CompileError::InconsistentDataPlane(format!(
                "flow sink {sink} on a node with no configuration"
            )));
        }
        if !interface_state(configurations, sink, "a flow sink")? {
            warnings.push(format!("flow sink {sink} is on an inactive interface and was pruned"));
            continue;
        }
        sinks.insert(sink.clone());
    }
    Ok(sinks)
}
