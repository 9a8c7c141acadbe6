use std::fmt;

use serde::{Deserialize, Serialize};

use crate::header_space::{IpProtocol, TcpFlags};
use crate::ip::Ip;
use crate::topology::Edge;

/// Outcome of a packet at a node, used both to pose reachability questions
/// and to classify answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ForwardingAction {
    /// Delivered to the node itself or out of a flow sink.
    Accept,
    /// Any kind of drop.
    Drop,
    DropAclIn,
    DropAclOut,
    DropNoRoute,
    DropNullRoute,
    /// Transit: the node sends the packet across a topology edge.
    Forward,
}

impl ForwardingAction {
    pub fn is_drop(self) -> bool {
        matches!(
            self,
            ForwardingAction::Drop
                | ForwardingAction::DropAclIn
                | ForwardingAction::DropAclOut
                | ForwardingAction::DropNoRoute
                | ForwardingAction::DropNullRoute
        )
    }

    /// Whether a replayed trace with `disposition` is an instance of this action.
    pub fn covers(self, disposition: FlowDisposition) -> bool {
        match self {
            ForwardingAction::Accept => disposition == FlowDisposition::Accepted,
            ForwardingAction::Drop => disposition.is_drop(),
            ForwardingAction::DropAclIn => disposition == FlowDisposition::DeniedIn,
            ForwardingAction::DropAclOut => disposition == FlowDisposition::DeniedOut,
            ForwardingAction::DropNoRoute => disposition == FlowDisposition::NoRoute,
            ForwardingAction::DropNullRoute => disposition == FlowDisposition::NullRouted,
            ForwardingAction::Forward => false,
        }
    }
}

impl fmt::Display for ForwardingAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ForwardingAction::Accept => "ACCEPT",
            ForwardingAction::Drop => "DROP",
            ForwardingAction::DropAclIn => "DROP_ACL_IN",
            ForwardingAction::DropAclOut => "DROP_ACL_OUT",
            ForwardingAction::DropNoRoute => "DROP_NO_ROUTE",
            ForwardingAction::DropNullRoute => "DROP_NULL_ROUTE",
            ForwardingAction::Forward => "FORWARD",
        };
        f.write_str(s)
    }
}

/// A fully concrete packet plus the point it enters the network.
///
/// Field order defines the total order used to deduplicate flows in sets.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Flow {
    pub ingress_node: String,
    pub ingress_vrf: String,
    pub src_ip: Ip,
    pub dst_ip: Ip,
    pub src_port: u16,
    pub dst_port: u16,
    pub ip_protocol: IpProtocol,
    pub icmp_type: u8,
    pub icmp_code: u8,
    pub fragment_offset: u16,
    pub dscp: u8,
    pub ecn: u8,
    pub tcp_flags: TcpFlags,
    pub tag: String,
}

impl Flow {
    /// An all-zero IP packet entering at `ingress_node`.
    pub fn new(
        ingress_node: impl Into<String>,
        ingress_vrf: impl Into<String>,
        tag: impl Into<String>,
    ) -> Self {
        Self {
            ingress_node: ingress_node.into(),
            ingress_vrf: ingress_vrf.into(),
            src_ip: Ip::ZERO,
            dst_ip: Ip::ZERO,
            src_port: 0,
            dst_port: 0,
            ip_protocol: IpProtocol::IP,
            icmp_type: 0,
            icmp_code: 0,
            fragment_offset: 0,
            dscp: 0,
            ecn: 0,
            tcp_flags: TcpFlags::default(),
            tag: tag.into(),
        }
    }
}

impl fmt::Display for Flow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Flow<ingress:{}/{} {} {}:{} -> {}:{}",
            self.ingress_node,
            self.ingress_vrf,
            self.ip_protocol,
            self.src_ip,
            self.src_port,
            self.dst_ip,
            self.dst_port
        )?;
        if self.ip_protocol == IpProtocol::ICMP {
            write!(f, " icmp:{}/{}", self.icmp_type, self.icmp_code)?;
        }
        if self.tcp_flags.0 != 0 {
            let names: Vec<&str> = TcpFlags::NAMED
                .iter()
                .filter(|(_, bit)| self.tcp_flags.is_set(*bit))
                .map(|(name, _)| *name)
                .collect();
            write!(f, " flags:{}", names.join(","))?;
        }
        write!(f, " tag:{}>", self.tag)
    }
}

/// Final fate of a replayed flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FlowDisposition {
    Accepted,
    DeniedIn,
    DeniedOut,
    NoRoute,
    NullRouted,
    /// Forwarded toward an interface with no neighbor in the topology.
    NeighborUnreachable,
    Loop,
}

impl FlowDisposition {
    pub fn is_drop(self) -> bool {
        !matches!(self, FlowDisposition::Accepted)
    }
}

impl fmt::Display for FlowDisposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FlowDisposition::Accepted => "ACCEPTED",
            FlowDisposition::DeniedIn => "DENIED_IN",
            FlowDisposition::DeniedOut => "DENIED_OUT",
            FlowDisposition::NoRoute => "NO_ROUTE",
            FlowDisposition::NullRouted => "NULL_ROUTED",
            FlowDisposition::NeighborUnreachable => "NEIGHBOR_UNREACHABLE",
            FlowDisposition::Loop => "LOOP",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FlowTraceHop {
    pub edge: Edge,
}

/// Hop-by-hop record of a flow replayed through the data plane.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FlowTrace {
    pub hops: Vec<FlowTraceHop>,
    pub disposition: FlowDisposition,
    pub notes: String,
}

impl FlowTrace {
    /// The node where the trace ends, or `ingress` for a zero-hop trace.
    pub fn final_node<'a>(&'a self, ingress: &'a str) -> &'a str {
        self.hops
            .last()
            .map(|hop| hop.edge.node2.as_str())
            .unwrap_or(ingress)
    }
}

impl fmt::Display for FlowTrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, hop) in self.hops.iter().enumerate() {
            writeln!(f, "{}. {}", i + 1, hop.edge)?;
        }
        write!(f, "{} {}", self.disposition, self.notes)
    }
}
