use std::fmt;

use serde::{Deserialize, Serialize};

/// An interface identified by its owning node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeInterfacePair {
    pub hostname: String,
    pub interface: String,
}

impl NodeInterfacePair {
    pub fn new(hostname: impl Into<String>, interface: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            interface: interface.into(),
        }
    }
}

impl fmt::Display for NodeInterfacePair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.hostname, self.interface)
    }
}

/// A directed layer-3 adjacency: packets leave `node1:int1` and arrive on
/// `node2:int2`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Edge {
    pub node1: String,
    pub int1: String,
    pub node2: String,
    pub int2: String,
}

impl Edge {
    pub fn new(
        node1: impl Into<String>,
        int1: impl Into<String>,
        node2: impl Into<String>,
        int2: impl Into<String>,
    ) -> Self {
        Self {
            node1: node1.into(),
            int1: int1.into(),
            node2: node2.into(),
            int2: int2.into(),
        }
    }

    pub fn tail(&self) -> NodeInterfacePair {
        NodeInterfacePair::new(&self.node1, &self.int1)
    }

    pub fn head(&self) -> NodeInterfacePair {
        NodeInterfacePair::new(&self.node2, &self.int2)
    }

    pub fn reversed(&self) -> Edge {
        Edge::new(&self.node2, &self.int2, &self.node1, &self.int1)
    }
}

impl fmt::Display for Edge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} -> {}:{}", self.node1, self.int1, self.node2, self.int2)
    }
}
