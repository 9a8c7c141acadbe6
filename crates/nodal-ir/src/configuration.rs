use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::acl::IpAccessList;
use crate::ip::{Ip, IpParseError, Prefix};

pub const DEFAULT_VRF: &str = "default";

fn default_vrf() -> String {
    DEFAULT_VRF.to_string()
}

fn default_true() -> bool {
    true
}

/// An interface address: host address plus the length of its subnet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct InterfaceAddress {
    pub ip: Ip,
    pub length: u8,
}

impl InterfaceAddress {
    pub fn new(ip: Ip, length: u8) -> Self {
        Self {
            ip,
            length: length.min(32),
        }
    }

    pub fn prefix(&self) -> Prefix {
        Prefix::new(self.ip, self.length)
    }
}

impl FromStr for InterfaceAddress {
    type Err = IpParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (ip, len) = s
            .split_once('/')
            .ok_or_else(|| IpParseError::PrefixLength(s.to_string()))?;
        let length: u8 = len
            .parse()
            .ok()
            .filter(|l| *l <= 32)
            .ok_or_else(|| IpParseError::PrefixLength(s.to_string()))?;
        Ok(InterfaceAddress::new(ip.parse()?, length))
    }
}

impl fmt::Display for InterfaceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.ip, self.length)
    }
}

impl TryFrom<String> for InterfaceAddress {
    type Error = IpParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<InterfaceAddress> for String {
    fn from(a: InterfaceAddress) -> Self {
        a.to_string()
    }
}

/// Dynamic source NAT rule. The engine does not model address rewriting and
/// treats these as identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceNat {
    pub acl: Option<String>,
    pub pool_start: Ip,
    pub pool_end: Ip,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interface {
    pub name: String,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default)]
    pub address: Option<InterfaceAddress>,
    #[serde(default = "default_vrf")]
    pub vrf: String,
    #[serde(default)]
    pub incoming_filter: Option<String>,
    #[serde(default)]
    pub outgoing_filter: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub source_nats: Vec<SourceNat>,
}

impl Interface {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            active: true,
            address: None,
            vrf: default_vrf(),
            incoming_filter: None,
            outgoing_filter: None,
            source_nats: Vec::new(),
        }
    }

    pub fn with_address(mut self, address: &str) -> Result<Self, IpParseError> {
        self.address = Some(address.parse()?);
        Ok(self)
    }

    pub fn with_filters(mut self, incoming: Option<&str>, outgoing: Option<&str>) -> Self {
        self.incoming_filter = incoming.map(str::to_string);
        self.outgoing_filter = outgoing.map(str::to_string);
        self
    }

    /// Loopback interfaces by vendor naming convention.
    pub fn is_loopback(&self) -> bool {
        let lower = self.name.to_ascii_lowercase();
        lower.starts_with("lo")
    }
}

/// Vendor-independent configuration of one device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Configuration {
    pub hostname: String,
    #[serde(default)]
    pub interfaces: BTreeMap<String, Interface>,
    #[serde(default)]
    pub ip_access_lists: BTreeMap<String, IpAccessList>,
}

impl Configuration {
    pub fn new(hostname: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            interfaces: BTreeMap::new(),
            ip_access_lists: BTreeMap::new(),
        }
    }

    pub fn add_interface(&mut self, interface: Interface) {
        self.interfaces.insert(interface.name.clone(), interface);
    }

    pub fn add_acl(&mut self, acl: IpAccessList) {
        self.ip_access_lists.insert(acl.name.clone(), acl);
    }

    pub fn active_interfaces(&self) -> impl Iterator<Item = &Interface> {
        self.interfaces.values().filter(|i| i.active)
    }

    /// Every VRF with at least one active interface, plus the default VRF.
    pub fn vrfs(&self) -> BTreeSet<String> {
        let mut vrfs: BTreeSet<String> = self.active_interfaces().map(|i| i.vrf.clone()).collect();
        vrfs.insert(default_vrf());
        vrfs
    }

    /// Addresses owned by active interfaces; packets to these are accepted.
    pub fn owned_ips(&self) -> BTreeSet<Ip> {
        self.active_interfaces()
            .filter_map(|i| i.address.map(|a| a.ip))
            .collect()
    }
}
