#![doc = include_str!("../README.md")]

//! Network data model shared by the compiler, the query encodings and the
//! trace interpreter.

pub mod acl;
pub mod configuration;
pub mod data_plane;
pub mod flow;
pub mod header_space;
pub mod ip;
#[cfg(any(test, feature = "proptest"))]
pub mod proptest_generators;
pub mod topology;

pub use acl::{IpAccessList, IpAccessListLine, LineAction};
pub use configuration::{Configuration, Interface, InterfaceAddress, SourceNat, DEFAULT_VRF};
pub use data_plane::{DataPlane, FibRow};
pub use flow::{Flow, FlowDisposition, FlowTrace, FlowTraceHop, ForwardingAction};
pub use header_space::{HeaderSpace, IpProtocol, TcpFlags, TcpFlagsMatch};
pub use ip::{Ip, IpParseError, IpWildcard, Prefix, SubRange};
pub use topology::{Edge, NodeInterfacePair};
