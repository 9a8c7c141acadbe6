//! Routing and the unrolled forwarding fixpoint.
//!
//! An [`Instance`] tracks one symbolic packet through one layer. `P_t[n]`
//! says the packet is at node `n` (past its ingress filter) after at most `t`
//! hops and `X_t[e]` that it leaves across edge `e` from such a state:
//!
//! ```text
//! P_0[n]     = origin(n)
//! X_t[e]     = P_t[tail] ∧ ¬local[tail] ∧ routed(e) ∧ permit_out(e) ∧ ¬masked(e)
//! P_{t+1}[n] = origin(n) ∨ ⋁_{e into n} (X_t[e] ∧ permit_in(e))
//! ```
//!
//! Both are monotone in `t`, and a loop-free path visits at most `|nodes|`
//! nodes, so `|nodes| - 1` steps reach the least fixpoint. Every ECMP branch
//! is followed at once: dispositions hold when *some* path ends that way.

use std::collections::{BTreeMap, BTreeSet};

use indexmap::IndexSet;
use nodal_ir::data_plane::is_null_interface;
use nodal_ir::{Configuration, Edge, FibRow, ForwardingAction, NodeInterfacePair, Prefix};
use nodal_smt::encoding::Encoding;
use nodal_smt::terms::{SmtSort, SmtTerm};

use super::layer::LayerEncoder;
use super::{variables, CompileError};

/// Where a route sends matching packets.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RouteTarget {
    /// Index into the synthesizer's edge set.
    Edge(usize),
    /// Out of the modelled network through this interface.
    Sink(String),
    Null,
    /// An interface with no neighbor in the topology; the packet vanishes.
    Unreachable(String),
}

impl RouteTarget {
    fn interface<'e>(&'e self, edges: &'e IndexSet<Edge>) -> Option<&'e str> {
        match self {
            RouteTarget::Edge(e) => edges.get_index(*e).map(|edge| edge.int1.as_str()),
            RouteTarget::Sink(i) | RouteTarget::Unreachable(i) => Some(i.as_str()),
            RouteTarget::Null => None,
        }
    }
}

/// All FIB rows of a node sharing one prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteGroup {
    pub prefix: Prefix,
    pub targets: Vec<RouteTarget>,
    /// Groups of the same node whose prefix is strictly inside this one.
    pub more_specific: Vec<usize>,
}

pub(crate) fn compile_routes(
    hostname: &str,
    rows: &[FibRow],
    configuration: Option<&Configuration>,
    edges: &IndexSet<Edge>,
    sinks: &BTreeSet<NodeInterfacePair>,
    warnings: &mut Vec<String>,
) -> Result<Vec<RouteGroup>, CompileError> {
    let mut grouped: BTreeMap<Prefix, BTreeSet<RouteTarget>> = BTreeMap::new();
    for row in rows {
        let targets = grouped.entry(row.prefix).or_default();
        if is_null_interface(&row.interface) {
            targets.insert(RouteTarget::Null);
            continue;
        }
        let interface = configuration
            .and_then(|c| c.interfaces.get(&row.interface))
            .ok_or_else(|| CompileError::UnknownInterface {
                hostname: hostname.to_string(),
                interface: row.interface.clone(),
                context: "a FIB row",
            })?;
        if !interface.active {
            warnings.push(format!(
                "{hostname}: route {} leaves through inactive interface '{}'",
                row.prefix, row.interface
            ));
            targets.insert(RouteTarget::Unreachable(row.interface.clone()));
            continue;
        }
        if interface.is_loopback() {
            targets.insert(RouteTarget::Null);
            continue;
        }
        if sinks.contains(&NodeInterfacePair::new(hostname, &row.interface)) {
            targets.insert(RouteTarget::Sink(row.interface.clone()));
            continue;
        }
        let before = targets.len();
        for (index, edge) in edges.iter().enumerate() {
            if edge.node1 == hostname && row.selects(edge) {
                targets.insert(RouteTarget::Edge(index));
            }
        }
        if targets.len() == before && !targets.iter().any(|t| t.interface(edges) == Some(row.interface.as_str())) {
            warnings.push(format!(
                "{hostname}: route {} via '{}' has no matching topology edge",
                row.prefix, row.interface
            ));
            targets.insert(RouteTarget::Unreachable(row.interface.clone()));
        }
    }

    let prefixes: Vec<Prefix> = grouped.keys().copied().collect();
    Ok(grouped
        .into_iter()
        .map(|(prefix, targets)| RouteGroup {
            prefix,
            targets: targets.into_iter().collect(),
            more_specific: prefixes
                .iter()
                .enumerate()
                .filter(|(_, p)| p.length() > prefix.length() && prefix.contains_prefix(p))
                .map(|(i, _)| i)
                .collect(),
        })
        .collect())
}

/// How an instance's packet enters the layer.
#[derive(Debug, Clone)]
pub enum Origin {
    /// Exactly one node, chosen by free origin variables that a job pins.
    Free,
    /// At `node`, whenever `via` holds. The ingress filter is assumed passed.
    Rooted { node: usize, via: SmtTerm },
}

/// Final-step disposition terms of one node.
#[derive(Debug, Clone)]
pub struct NodeOutcome {
    pub accept: SmtTerm,
    pub drop_acl_in: SmtTerm,
    pub drop_acl_out: SmtTerm,
    pub drop_no_route: SmtTerm,
    pub drop_null_route: SmtTerm,
    /// Sent toward an interface without a (visible) neighbor.
    pub drop_unreachable: SmtTerm,
    pub forward: SmtTerm,
}

impl NodeOutcome {
    pub fn action(&self, action: ForwardingAction) -> SmtTerm {
        match action {
            ForwardingAction::Accept => self.accept.clone(),
            ForwardingAction::Drop => SmtTerm::or(vec![
                self.drop_acl_in.clone(),
                self.drop_acl_out.clone(),
                self.drop_no_route.clone(),
                self.drop_null_route.clone(),
                self.drop_unreachable.clone(),
            ]),
            ForwardingAction::DropAclIn => self.drop_acl_in.clone(),
            ForwardingAction::DropAclOut => self.drop_acl_out.clone(),
            ForwardingAction::DropNoRoute => self.drop_no_route.clone(),
            ForwardingAction::DropNullRoute => self.drop_null_route.clone(),
            ForwardingAction::Forward => self.forward.clone(),
        }
    }
}

/// One symbolic packet propagated through a layer.
#[derive(Debug, Clone)]
pub struct Instance {
    /// `(hostname, variable)` for free origins.
    origins: Vec<(String, String)>,
    outcomes: Vec<NodeOutcome>,
    crossings: Vec<SmtTerm>,
}

impl Instance {
    pub fn origin_vars(&self) -> &[(String, String)] {
        &self.origins
    }

    pub fn outcome(&self, node: usize) -> Option<&NodeOutcome> {
        self.outcomes.get(node)
    }

    /// Some path ends with `action` at one of `nodes` (all nodes when `None`).
    pub fn action_at(&self, action: ForwardingAction, nodes: Option<&BTreeSet<usize>>) -> SmtTerm {
        SmtTerm::or(
            self.outcomes
                .iter()
                .enumerate()
                .filter(|(i, _)| nodes.map_or(true, |set| set.contains(i)))
                .map(|(_, o)| o.action(action))
                .collect(),
        )
    }

    /// The packet crosses edge `edge` and passes the head's ingress filter.
    pub fn crosses(&self, edge: usize) -> SmtTerm {
        self.crossings.get(edge).cloned().unwrap_or_else(SmtTerm::ff)
    }
}

impl<'a> LayerEncoder<'a> {
    /// Unroll the forwarding fixpoint for a fresh packet instance.
    pub fn instance(&mut self, enc: &mut Encoding, origin: Origin) -> Instance {
        let id = self.instances;
        self.instances += 1;
        let slot = self.slot;
        let synth = self.synth;
        let edges = synth.edges();
        let node_count = synth.node_count();
        let steps = node_count.saturating_sub(1);

        let node_hidden: Vec<bool> = synth
            .nodes()
            .map(|(_, n)| self.mask.hides_node(n.hostname()))
            .collect();
        let edge_live: Vec<bool> = edges.iter().map(|e| !self.mask.hides_edge(e)).collect();

        let mut origins = Vec::new();
        let mut origin_terms = Vec::with_capacity(node_count);
        match &origin {
            Origin::Free => {
                let mut count = SmtTerm::int(0);
                for (index, node) in synth.nodes() {
                    let name = variables::origin(slot, id, index);
                    enc.declare(name.clone(), SmtSort::Bool);
                    count = count.add(SmtTerm::ite(
                        SmtTerm::var(name.clone()),
                        SmtTerm::int(1),
                        SmtTerm::int(0),
                    ));
                    origin_terms.push(SmtTerm::var(name.clone()));
                    origins.push((node.hostname().to_string(), name));
                }
                enc.assert_term(count.eq(SmtTerm::int(1)));
            }
            Origin::Rooted { node, via } => {
                for index in 0..node_count {
                    origin_terms.push(if index == *node { via.clone() } else { SmtTerm::ff() });
                }
            }
        }

        // Header-only ingredients, shared by every step.
        let local: Vec<SmtTerm> = (0..node_count).map(|n| self.local(enc, n)).collect();
        let mut routed: Vec<Vec<SmtTerm>> = vec![Vec::new(); edges.len()];
        for (index, node) in synth.nodes() {
            for (g, group) in node.routes.iter().enumerate() {
                for target in &group.targets {
                    if let RouteTarget::Edge(e) = target {
                        routed[*e].push(self.route_chosen(enc, index, g));
                    }
                }
            }
        }
        let mut tail = Vec::with_capacity(edges.len());
        let mut head = Vec::with_capacity(edges.len());
        let mut out_ok = Vec::with_capacity(edges.len());
        let mut in_ok = Vec::with_capacity(edges.len());
        for edge in edges {
            let t = synth.node_index(&edge.node1).unwrap_or(usize::MAX);
            let h = synth.node_index(&edge.node2).unwrap_or(usize::MAX);
            out_ok.push(self.permit_out(enc, t, &edge.int1));
            in_ok.push(self.permit_in(enc, h, &edge.int2));
            tail.push(t);
            head.push(h);
        }

        let mut present: Vec<SmtTerm> = (0..node_count)
            .map(|n| {
                let body = if node_hidden[n] { SmtTerm::ff() } else { origin_terms[n].clone() };
                LayerEncoder::define(enc, variables::present(slot, id, 0, n), || body)
            })
            .collect();
        let mut crossing: Vec<SmtTerm>;
        let mut step = 0;
        loop {
            crossing = (0..edges.len())
                .map(|e| {
                    let body = if edge_live[e] && tail[e] < node_count {
                        SmtTerm::and(vec![
                            present[tail[e]].clone(),
                            local[tail[e]].clone().not(),
                            SmtTerm::or(routed[e].clone()),
                            out_ok[e].clone(),
                        ])
                    } else {
                        SmtTerm::ff()
                    };
                    LayerEncoder::define(enc, variables::crosses(slot, id, step, e), || body)
                })
                .collect();
            if step == steps {
                break;
            }
            present = (0..node_count)
                .map(|n| {
                    let body = if node_hidden[n] {
                        SmtTerm::ff()
                    } else {
                        let mut arrivals = vec![origin_terms[n].clone()];
                        for e in (0..edges.len()).filter(|e| head[*e] == n && edge_live[*e]) {
                            arrivals.push(SmtTerm::and(vec![crossing[e].clone(), in_ok[e].clone()]));
                        }
                        SmtTerm::or(arrivals)
                    };
                    LayerEncoder::define(enc, variables::present(slot, id, step + 1, n), || body)
                })
                .collect();
            step += 1;
        }

        let mut outcomes = Vec::with_capacity(node_count);
        for (index, node) in synth.nodes() {
            let here = present[index].clone();
            let transit = SmtTerm::and(vec![here.clone(), local[index].clone().not()]);
            let mut accept = vec![SmtTerm::and(vec![here.clone(), local[index].clone()])];
            let mut acl_out = Vec::new();
            let mut null_route = Vec::new();
            let mut unreachable = Vec::new();
            let mut any_route = Vec::new();
            for (g, group) in node.routes.iter().enumerate() {
                let chosen = self.route_chosen(enc, index, g);
                any_route.push(chosen.clone());
                let taken = SmtTerm::and(vec![transit.clone(), chosen]);
                for target in &group.targets {
                    let Some(interface) = target.interface(edges) else {
                        null_route.push(taken.clone());
                        continue;
                    };
                    let permit = self.permit_out(enc, index, interface);
                    acl_out.push(SmtTerm::and(vec![taken.clone(), permit.clone().not()]));
                    let passed = SmtTerm::and(vec![taken.clone(), permit]);
                    match target {
                        RouteTarget::Sink(i) if !self.mask.hides_interface(node.hostname(), i) => {
                            accept.push(passed)
                        }
                        RouteTarget::Edge(e) if edge_live[*e] => {}
                        _ => unreachable.push(passed),
                    }
                }
            }
            let arriving: Vec<usize> = node.in_edges.iter().copied().filter(|e| edge_live[*e]).collect();
            let leaving: Vec<usize> = node.out_edges.iter().copied().filter(|e| edge_live[*e]).collect();
            outcomes.push(NodeOutcome {
                accept: SmtTerm::or(accept),
                drop_acl_in: SmtTerm::or(
                    arriving
                        .iter()
                        .map(|e| SmtTerm::and(vec![crossing[*e].clone(), in_ok[*e].clone().not()]))
                        .collect(),
                ),
                drop_acl_out: SmtTerm::or(acl_out),
                drop_no_route: SmtTerm::and(vec![transit, SmtTerm::or(any_route).not()]),
                drop_null_route: SmtTerm::or(null_route),
                drop_unreachable: SmtTerm::or(unreachable),
                forward: SmtTerm::or(leaving.iter().map(|e| crossing[*e].clone()).collect()),
            });
        }

        let crossings = (0..edges.len())
            .map(|e| SmtTerm::and(vec![crossing[e].clone(), in_ok[e].clone()]))
            .collect();
        Instance {
            origins,
            outcomes,
            crossings,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nodal_ir::Interface;

    fn prefix(s: &str) -> Prefix {
        s.parse().unwrap()
    }

    #[test]
    fn groups_record_more_specific_prefixes() {
        let mut c = Configuration::new("r1");
        c.add_interface(Interface::new("eth0"));
        c.add_interface(Interface::new("eth1"));
        let mut edges = IndexSet::new();
        edges.insert(Edge::new("r1", "eth0", "r2", "eth0"));
        let sinks: BTreeSet<NodeInterfacePair> = [NodeInterfacePair::new("r1", "eth1")].into();
        let rows = vec![
            FibRow::new(prefix("0.0.0.0/0"), "eth0"),
            FibRow::new(prefix("10.0.0.0/8"), "eth1"),
            FibRow::new(prefix("10.1.0.0/16"), "Null0"),
            FibRow::new(prefix("192.168.0.0/16"), "eth0"),
        ];
        let mut warnings = Vec::new();
        let groups = compile_routes("r1", &rows, Some(&c), &edges, &sinks, &mut warnings).unwrap();
        assert!(warnings.is_empty(), "{warnings:?}");
        assert_eq!(groups.len(), 4);
        assert_eq!(groups[0].prefix, prefix("0.0.0.0/0"));
        assert_eq!(groups[0].more_specific, vec![1, 2, 3]);
        assert_eq!(groups[1].more_specific, vec![2]);
        assert_eq!(groups[1].targets, vec![RouteTarget::Sink("eth1".into())]);
        assert_eq!(groups[2].targets, vec![RouteTarget::Null]);
        assert_eq!(groups[3].targets, vec![RouteTarget::Edge(0)]);
    }

    #[test]
    fn route_out_unknown_interface_is_fatal() {
        let c = Configuration::new("r1");
        let rows = vec![FibRow::new(prefix("0.0.0.0/0"), "eth5")];
        let err = compile_routes("r1", &rows, Some(&c), &IndexSet::new(), &BTreeSet::new(), &mut Vec::new())
            .unwrap_err();
        assert!(matches!(err, CompileError::UnknownInterface { context: "a FIB row", .. }));
    }
}
