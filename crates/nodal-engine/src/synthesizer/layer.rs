use std::collections::BTreeSet;

use nodal_ir::{Edge, IpWildcard, LineAction, NodeInterfacePair, Prefix};
use nodal_smt::encoding::Encoding;
use nodal_smt::terms::{SmtSort, SmtTerm};

use super::header::{dst_ip_in, wildcard_term, DST_IP};
use super::variables;
use super::Synthesizer;

/// Parts of a topology removed from a layer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Mask {
    nodes: BTreeSet<String>,
    interfaces: BTreeSet<NodeInterfacePair>,
    edges: BTreeSet<Edge>,
}

impl Mask {
    pub fn new(
        nodes: BTreeSet<String>,
        interfaces: BTreeSet<NodeInterfacePair>,
        edges: BTreeSet<Edge>,
    ) -> Self {
        Self {
            nodes,
            interfaces,
            edges,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.interfaces.is_empty() && self.edges.is_empty()
    }

    pub fn union(&mut self, other: &Mask) {
        self.nodes.extend(other.nodes.iter().cloned());
        self.interfaces.extend(other.interfaces.iter().cloned());
        self.edges.extend(other.edges.iter().cloned());
    }

    pub fn nodes(&self) -> &BTreeSet<String> {
        &self.nodes
    }

    pub fn interfaces(&self) -> &BTreeSet<NodeInterfacePair> {
        &self.interfaces
    }

    pub fn edges(&self) -> &BTreeSet<Edge> {
        &self.edges
    }

    pub fn hides_node(&self, hostname: &str) -> bool {
        self.nodes.contains(hostname)
    }

    pub fn hides_interface(&self, hostname: &str, interface: &str) -> bool {
        self.hides_node(hostname)
            || self
                .interfaces
                .contains(&NodeInterfacePair::new(hostname, interface))
    }

    /// Blacklisting a link removes both directions.
    pub fn hides_edge(&self, edge: &Edge) -> bool {
        self.hides_interface(&edge.node1, &edge.int1)
            || self.hides_interface(&edge.node2, &edge.int2)
            || self.edges.contains(edge)
            || self.edges.contains(&edge.reversed())
    }
}

/// One synthesizer placed at a slot of a job.
///
/// Helper variables (ACL matches, route choices, locality) depend on the
/// header only; they are declared and defined the first time a query asks for
/// them, so a job pays only for the parts of the model it touches.
pub struct LayerEncoder<'a> {
    pub(crate) slot: usize,
    pub(crate) synth: &'a Synthesizer,
    pub(crate) mask: Mask,
    pub(crate) instances: usize,
}

impl<'a> LayerEncoder<'a> {
    pub fn new(slot: usize, synth: &'a Synthesizer, mask: Mask) -> Self {
        Self {
            slot,
            synth,
            mask,
            instances: 0,
        }
    }

    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn synthesizer(&self) -> &'a Synthesizer {
        self.synth
    }

    pub fn mask(&self) -> &Mask {
        &self.mask
    }

    /// Declare `name` and define it as `definition` unless already present.
    pub(crate) fn define(enc: &mut Encoding, name: String, definition: impl FnOnce() -> SmtTerm) -> SmtTerm {
        if !enc.is_declared(&name) {
            enc.declare(name.clone(), SmtSort::Bool);
            let body = definition();
            enc.assert_term(SmtTerm::var(name.clone()).iff(body));
        }
        SmtTerm::var(name)
    }

    /// Line `line` of the ACL matches, ignoring earlier lines.
    pub fn acl_line_match(&self, enc: &mut Encoding, node: usize, acl: usize, line: usize) -> SmtTerm {
        let matcher = self
            .synth
            .node_at(node)
            .and_then(|(_, n)| n.acls.get_index(acl))
            .and_then(|(_, a)| a.lines.get(line))
            .map(|l| l.matcher.clone())
            .unwrap_or_else(SmtTerm::ff);
        Self::define(enc, variables::acl_match(self.slot, node, acl, line), || matcher)
    }

    /// No line before `line` matches.
    fn acl_unmatched(&self, enc: &mut Encoding, node: usize, acl: usize, line: usize) -> SmtTerm {
        let mut previous = SmtTerm::tt();
        for l in 1..=line {
            let earlier = self.acl_line_match(enc, node, acl, l - 1);
            let prev = previous.clone();
            previous = Self::define(enc, variables::acl_unmatched(self.slot, node, acl, l), || {
                SmtTerm::and(vec![prev, earlier.not()])
            });
        }
        previous
    }

    /// `line` is the first line of the ACL to match.
    pub fn acl_first_match(&self, enc: &mut Encoding, node: usize, acl: usize, line: usize) -> SmtTerm {
        let matched = self.acl_line_match(enc, node, acl, line);
        let unmatched = self.acl_unmatched(enc, node, acl, line);
        SmtTerm::and(vec![matched, unmatched])
    }

    /// The ACL permits the packet.
    pub fn acl_permit(&self, enc: &mut Encoding, node: usize, acl: usize) -> SmtTerm {
        let name = variables::acl_permit(self.slot, node, acl);
        if enc.is_declared(&name) {
            return SmtTerm::var(name);
        }
        let actions: Vec<LineAction> = self
            .synth
            .node_at(node)
            .and_then(|(_, n)| n.acls.get_index(acl))
            .map(|(_, a)| a.lines.iter().map(|l| l.action).collect())
            .unwrap_or_default();
        let mut permitting = Vec::new();
        for (line, action) in actions.into_iter().enumerate() {
            if action == LineAction::Accept {
                permitting.push(self.acl_first_match(enc, node, acl, line));
            }
        }
        Self::define(enc, name, || SmtTerm::or(permitting))
    }

    fn filter_permit(&self, enc: &mut Encoding, node: usize, filter: Option<&str>) -> SmtTerm {
        let index = filter.and_then(|name| {
            self.synth
                .node_at(node)
                .and_then(|(_, n)| n.acls.get_index_of(name))
        });
        match index {
            Some(acl) => self.acl_permit(enc, node, acl),
            None => SmtTerm::tt(),
        }
    }

    /// The packet passes the incoming filter of `interface`, if any.
    pub fn permit_in(&self, enc: &mut Encoding, node: usize, interface: &str) -> SmtTerm {
        let filter = self
            .synth
            .node_at(node)
            .and_then(|(_, n)| n.incoming_filter(interface));
        self.filter_permit(enc, node, filter)
    }

    /// The packet passes the outgoing filter of `interface`, if any.
    pub fn permit_out(&self, enc: &mut Encoding, node: usize, interface: &str) -> SmtTerm {
        let filter = self
            .synth
            .node_at(node)
            .and_then(|(_, n)| n.outgoing_filter(interface));
        self.filter_permit(enc, node, filter)
    }

    /// The destination is an address owned by the node.
    pub fn local(&self, enc: &mut Encoding, node: usize) -> SmtTerm {
        let owned = self
            .synth
            .node_at(node)
            .map(|(_, n)| n.owned_ips.clone())
            .unwrap_or_default();
        Self::define(enc, variables::local(self.slot, node), || dst_ip_in(owned))
    }

    /// Route group `group` is the longest prefix containing the destination.
    pub fn route_chosen(&self, enc: &mut Encoding, node: usize, group: usize) -> SmtTerm {
        let definition = self
            .synth
            .node_at(node)
            .and_then(|(_, n)| {
                let g = n.routes.get(group)?;
                let matches = |prefix: Prefix| wildcard_term(DST_IP, &IpWildcard::from(prefix));
                let shadowing: Vec<SmtTerm> = g
                    .more_specific
                    .iter()
                    .filter_map(|i| n.routes.get(*i))
                    .map(|m| matches(m.prefix))
                    .collect();
                Some(SmtTerm::and(vec![
                    matches(g.prefix),
                    SmtTerm::or(shadowing).not(),
                ]))
            })
            .unwrap_or_else(SmtTerm::ff);
        Self::define(enc, variables::route_chosen(self.slot, node, group), || definition)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blacklisted_link_hides_both_directions() {
        let edge = Edge::new("a", "eth0", "b", "eth0");
        let mask = Mask::new(BTreeSet::new(), BTreeSet::new(), [edge.clone()].into());
        assert!(mask.hides_edge(&edge));
        assert!(mask.hides_edge(&edge.reversed()));
        assert!(!mask.hides_edge(&Edge::new("a", "eth1", "c", "eth0")));
    }

    #[test]
    fn blacklisted_node_hides_its_interfaces() {
        let mask = Mask::new(["b".to_string()].into(), BTreeSet::new(), BTreeSet::new());
        assert!(mask.hides_interface("b", "eth7"));
        assert!(mask.hides_edge(&Edge::new("a", "eth0", "b", "eth0")));
        assert!(!mask.hides_interface("a", "eth0"));
    }
}
