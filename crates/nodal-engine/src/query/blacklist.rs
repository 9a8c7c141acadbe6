use std::collections::BTreeSet;

use nodal_ir::{Edge, NodeInterfacePair};
use nodal_smt::encoding::Encoding;
use serde::{Deserialize, Serialize};

use super::QueryEncoding;
use crate::synthesizer::header::dst_ip_in;
use crate::synthesizer::{LayerEncoder, Mask};

/// Topology known to be removed.
///
/// The layer it is paired with loses these nodes, interfaces and edges, and
/// packets addressed to them are excluded. Names unknown to the layer are
/// ignored, so one blacklist can be shared by base and delta layers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlacklistQuery {
    #[serde(default)]
    pub nodes: BTreeSet<String>,
    #[serde(default)]
    pub interfaces: BTreeSet<NodeInterfacePair>,
    #[serde(default)]
    pub edges: BTreeSet<Edge>,
}

impl BlacklistQuery {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.interfaces.is_empty() && self.edges.is_empty()
    }

    pub fn with_edge(mut self, edge: Edge) -> Self {
        self.edges.insert(edge);
        self
    }

    pub fn with_node(mut self, node: impl Into<String>) -> Self {
        self.nodes.insert(node.into());
        self
    }

    pub fn mask(&self) -> Mask {
        Mask::new(self.nodes.clone(), self.interfaces.clone(), self.edges.clone())
    }

    pub(crate) fn encode(&self, layer: &mut LayerEncoder<'_>, enc: &mut Encoding) -> QueryEncoding {
        let ips = layer.synthesizer().blacklisted_ips(&self.mask());
        if !ips.is_empty() {
            enc.assert_term(dst_ip_in(ips).not());
        }
        QueryEncoding::default()
    }
}
