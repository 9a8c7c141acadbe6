//! Forwarding properties: reachability, multipath inconsistency and edge
//! crossing.

use std::collections::{BTreeMap, BTreeSet};

use nodal_ir::{Edge, ForwardingAction, HeaderSpace};
use nodal_smt::encoding::Encoding;
use nodal_smt::terms::SmtTerm;
use serde::{Deserialize, Serialize};

use super::{QueryEncoding, QueryError};
use crate::synthesizer::header::header_space_term;
use crate::synthesizer::{Instance, LayerEncoder, Origin, Synthesizer};

fn known_node(synth: &Synthesizer, hostname: &str) -> Result<(), QueryError> {
    synth
        .node_index(hostname)
        .map(|_| ())
        .ok_or_else(|| QueryError::UnknownNode(hostname.to_string()))
}

fn known_ingress(synth: &Synthesizer, node: &str, vrf: &str) -> Result<(), QueryError> {
    known_node(synth, node)?;
    if synth.has_ingress(node, vrf) {
        Ok(())
    } else {
        Err(QueryError::UnknownVrf {
            node: node.to_string(),
            vrf: vrf.to_string(),
        })
    }
}

fn valid_header(hs: &HeaderSpace) -> Result<(), QueryError> {
    hs.validate().map_err(QueryError::InvalidHeaderSpace)
}

/// Restrict a free instance's origin to one of `hosts`.
fn origin_among<'h>(instance: &Instance, hosts: impl IntoIterator<Item = &'h String>) -> SmtTerm {
    let hosts: BTreeSet<&String> = hosts.into_iter().collect();
    SmtTerm::or(
        instance
            .origin_vars()
            .iter()
            .filter(|(host, _)| hosts.contains(host))
            .map(|(_, var)| SmtTerm::var(var.clone()))
            .collect(),
    )
}

/// A packet in `header_space` entering at an ingress node ends with one of
/// `actions` at one of `final_nodes` (any node when empty).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReachabilityQuery {
    pub actions: BTreeSet<ForwardingAction>,
    #[serde(default)]
    pub header_space: HeaderSpace,
    #[serde(default)]
    pub final_nodes: BTreeSet<String>,
    /// Allowed ingress points; empty allows every node.
    #[serde(default)]
    pub ingress_nodes: BTreeMap<String, BTreeSet<String>>,
    #[serde(default)]
    pub negate: bool,
}

impl ReachabilityQuery {
    pub fn new(actions: impl IntoIterator<Item = ForwardingAction>, header_space: HeaderSpace) -> Self {
        Self {
            actions: actions.into_iter().collect(),
            header_space,
            final_nodes: BTreeSet::new(),
            ingress_nodes: BTreeMap::new(),
            negate: false,
        }
    }

    pub fn with_final_nodes<S: Into<String>>(mut self, nodes: impl IntoIterator<Item = S>) -> Self {
        self.final_nodes = nodes.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_ingress(mut self, node: impl Into<String>, vrf: impl Into<String>) -> Self {
        self.ingress_nodes.entry(node.into()).or_default().insert(vrf.into());
        self
    }

    pub fn negated(mut self) -> Self {
        self.negate = !self.negate;
        self
    }

    pub(crate) fn validate(&self, synth: &Synthesizer) -> Result<(), QueryError> {
        if self.actions.is_empty() {
            return Err(QueryError::EmptyActions);
        }
        for node in &self.final_nodes {
            known_node(synth, node)?;
        }
        for (node, vrfs) in &self.ingress_nodes {
            known_node(synth, node)?;
            for vrf in vrfs {
                known_ingress(synth, node, vrf)?;
            }
        }
        valid_header(&self.header_space)
    }

    pub(crate) fn encode(&self, layer: &mut LayerEncoder<'_>, enc: &mut Encoding) -> QueryEncoding {
        let synth = layer.synthesizer();
        let instance = layer.instance(enc, Origin::Free);
        if !self.ingress_nodes.is_empty() {
            enc.assert_term(origin_among(&instance, self.ingress_nodes.keys()));
        }
        let finals: Option<BTreeSet<usize>> = (!self.final_nodes.is_empty()).then(|| {
            self.final_nodes
                .iter()
                .filter_map(|n| synth.node_index(n))
                .collect()
        });
        let property = SmtTerm::or(
            self.actions
                .iter()
                .map(|a| instance.action_at(*a, finals.as_ref()))
                .collect(),
        );
        enc.assert_term(header_space_term(&self.header_space));
        enc.assert_term(if self.negate { property.not() } else { property });
        QueryEncoding {
            origins: vec![instance.origin_vars().to_vec()],
            alternatives: Vec::new(),
        }
    }
}

/// Some path of a packet entering at `ingress_node` is accepted while
/// another one is dropped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultipathQuery {
    pub ingress_node: String,
    pub vrf: String,
    #[serde(default)]
    pub header_space: HeaderSpace,
}

impl MultipathQuery {
    pub fn new(ingress_node: impl Into<String>, vrf: impl Into<String>, header_space: HeaderSpace) -> Self {
        Self {
            ingress_node: ingress_node.into(),
            vrf: vrf.into(),
            header_space,
        }
    }

    pub(crate) fn validate(&self, synth: &Synthesizer) -> Result<(), QueryError> {
        known_ingress(synth, &self.ingress_node, &self.vrf)?;
        valid_header(&self.header_space)
    }

    pub(crate) fn encode(&self, layer: &mut LayerEncoder<'_>, enc: &mut Encoding) -> QueryEncoding {
        let instance = layer.instance(enc, Origin::Free);
        enc.assert_term(origin_among(&instance, [&self.ingress_node]));
        enc.assert_term(header_space_term(&self.header_space));
        enc.assert_term(SmtTerm::and(vec![
            instance.action_at(ForwardingAction::Accept, None),
            instance.action_at(ForwardingAction::Drop, None),
        ]));
        QueryEncoding {
            origins: vec![instance.origin_vars().to_vec()],
            alternatives: Vec::new(),
        }
    }
}

/// A packet entering at `ingress_node` crosses `edge` (and, when
/// `require_acceptance`, is then accepted somewhere downstream of it).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReachEdgeQuery {
    pub ingress_node: String,
    pub vrf: String,
    pub edge: Edge,
    #[serde(default)]
    pub require_acceptance: bool,
    #[serde(default)]
    pub header_space: HeaderSpace,
    #[serde(default)]
    pub negate: bool,
}

impl ReachEdgeQuery {
    pub fn new(ingress_node: impl Into<String>, vrf: impl Into<String>, edge: Edge) -> Self {
        Self {
            ingress_node: ingress_node.into(),
            vrf: vrf.into(),
            edge,
            require_acceptance: false,
            header_space: HeaderSpace::any(),
            negate: false,
        }
    }

    pub fn with_header_space(mut self, header_space: HeaderSpace) -> Self {
        self.header_space = header_space;
        self
    }

    pub fn requiring_acceptance(mut self) -> Self {
        self.require_acceptance = true;
        self
    }

    pub fn negated(mut self) -> Self {
        self.negate = !self.negate;
        self
    }

    pub(crate) fn validate(&self, synth: &Synthesizer) -> Result<(), QueryError> {
        known_node(synth, &self.ingress_node)?;
        known_node(synth, &self.edge.node1)?;
        known_node(synth, &self.edge.node2)?;
        valid_header(&self.header_space)
    }

    /// An edge missing from the layer's topology can never be crossed.
    pub(crate) fn encode(&self, layer: &mut LayerEncoder<'_>, enc: &mut Encoding) -> QueryEncoding {
        let synth = layer.synthesizer();
        let instance = layer.instance(enc, Origin::Free);
        enc.assert_term(origin_among(&instance, [&self.ingress_node]));
        enc.assert_term(header_space_term(&self.header_space));

        let crossing = synth
            .edge_index(&self.edge)
            .map(|e| instance.crosses(e))
            .unwrap_or_else(SmtTerm::ff);
        let property = match synth.node_index(&self.edge.node2) {
            Some(head) if self.require_acceptance && !crossing.is_false() => {
                let downstream = layer.instance(
                    enc,
                    Origin::Rooted {
                        node: head,
                        via: crossing.clone(),
                    },
                );
                SmtTerm::and(vec![crossing, downstream.action_at(ForwardingAction::Accept, None)])
            }
            _ if self.require_acceptance => SmtTerm::ff(),
            _ => crossing,
        };
        enc.assert_term(if self.negate { property.not() } else { property });
        QueryEncoding {
            origins: vec![instance.origin_vars().to_vec()],
            alternatives: Vec::new(),
        }
    }
}
