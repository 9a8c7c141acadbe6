use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IpParseError {
    #[error("Invalid IPv4 address '{0}'")]
    Address(String),
    #[error("Invalid prefix length in '{0}'")]
    PrefixLength(String),
    #[error("Invalid wildcard '{0}'")]
    Wildcard(String),
}

/// An IPv4 address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Ip(pub u32);

impl Ip {
    pub const ZERO: Ip = Ip(0);
    pub const MAX: Ip = Ip(u32::MAX);

    pub fn as_u32(self) -> u32 {
        self.0
    }

    pub fn as_i64(self) -> i64 {
        i64::from(self.0)
    }
}

impl FromStr for Ip {
    type Err = IpParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<Ipv4Addr>()
            .map(Ip::from)
            .map_err(|_| IpParseError::Address(s.to_string()))
    }
}

impl From<Ipv4Addr> for Ip {
    fn from(addr: Ipv4Addr) -> Self {
        Ip(u32::from(addr))
    }
}

impl fmt::Display for Ip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d] = self.0.to_be_bytes();
        write!(f, "{a}.{b}.{c}.{d}")
    }
}

impl TryFrom<String> for Ip {
    type Error = IpParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Ip> for String {
    fn from(ip: Ip) -> Self {
        ip.to_string()
    }
}

fn mask_for_length(length: u8) -> u32 {
    if length == 0 {
        0
    } else {
        u32::MAX << (32 - u32::from(length))
    }
}

/// An IPv4 network: a normalised address plus a length in `0..=32`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Prefix {
    address: Ip,
    length: u8,
}

impl Prefix {
    /// Host bits of `address` are cleared. Lengths above 32 are clamped.
    pub fn new(address: Ip, length: u8) -> Self {
        let length = length.min(32);
        Self {
            address: Ip(address.0 & mask_for_length(length)),
            length,
        }
    }

    pub fn address(&self) -> Ip {
        self.address
    }

    pub fn length(&self) -> u8 {
        self.length
    }

    pub fn start(&self) -> Ip {
        self.address
    }

    pub fn end(&self) -> Ip {
        Ip(self.address.0 | !mask_for_length(self.length))
    }

    pub fn contains(&self, ip: Ip) -> bool {
        ip.0 & mask_for_length(self.length) == self.address.0
    }

    /// True when every address of `other` is in `self`.
    pub fn contains_prefix(&self, other: &Prefix) -> bool {
        other.length >= self.length && self.contains(other.address)
    }
}

impl FromStr for Prefix {
    type Err = IpParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr, len) = s
            .split_once('/')
            .ok_or_else(|| IpParseError::PrefixLength(s.to_string()))?;
        let length: u8 = Some(len)
            .filter(|l| !l.is_empty() && l.bytes().all(|b| b.is_ascii_digit()))
            .and_then(|l| l.parse().ok())
            .filter(|l| *l <= 32)
            .ok_or_else(|| IpParseError::PrefixLength(s.to_string()))?;
        Ok(Prefix::new(addr.parse()?, length))
    }
}

impl fmt::Display for Prefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.address, self.length)
    }
}

impl TryFrom<String> for Prefix {
    type Error = IpParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Prefix> for String {
    fn from(prefix: Prefix) -> Self {
        prefix.to_string()
    }
}

/// An address plus a "don't care" mask: a set bit in `wildcard` means the
/// corresponding address bit is free.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct IpWildcard {
    ip: Ip,
    wildcard: u32,
}

impl IpWildcard {
    pub const ANY: IpWildcard = IpWildcard {
        ip: Ip::ZERO,
        wildcard: u32::MAX,
    };

    pub fn new(ip: Ip, wildcard: u32) -> Self {
        Self {
            ip: Ip(ip.0 & !wildcard),
            wildcard,
        }
    }

    pub fn host(ip: Ip) -> Self {
        Self::new(ip, 0)
    }

    pub fn ip(&self) -> Ip {
        self.ip
    }

    pub fn wildcard(&self) -> u32 {
        self.wildcard
    }

    pub fn matches(&self, ip: Ip) -> bool {
        (ip.0 & !self.wildcard) == self.ip.0
    }

    /// The equivalent prefix when the free bits are a contiguous low run.
    pub fn as_prefix(&self) -> Option<Prefix> {
        let free = self.wildcard;
        if free & free.wrapping_add(1) != 0 {
            return None;
        }
        let length = 32 - free.count_ones() as u8;
        Some(Prefix::new(self.ip, length))
    }
}

impl From<Prefix> for IpWildcard {
    fn from(prefix: Prefix) -> Self {
        IpWildcard::new(prefix.address(), !mask_for_length(prefix.length()))
    }
}

impl FromStr for IpWildcard {
    type Err = IpParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.contains('/') {
            return Ok(s.parse::<Prefix>()?.into());
        }
        if let Some((addr, mask)) = s.split_once(':') {
            let mask: Ip = mask
                .parse()
                .map_err(|_| IpParseError::Wildcard(s.to_string()))?;
            return Ok(IpWildcard::new(addr.parse()?, mask.0));
        }
        Ok(IpWildcard::host(s.parse()?))
    }
}

impl fmt::Display for IpWildcard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_prefix() {
            Some(prefix) if prefix.length() == 32 => write!(f, "{}", self.ip),
            Some(prefix) => write!(f, "{prefix}"),
            None => write!(f, "{}:{}", self.ip, Ip(self.wildcard)),
        }
    }
}

impl TryFrom<String> for IpWildcard {
    type Error = IpParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<IpWildcard> for String {
    fn from(w: IpWildcard) -> Self {
        w.to_string()
    }
}

/// An inclusive integer range used for ports, ICMP values, DSCP and friends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubRange {
    pub start: u32,
    pub end: u32,
}

impl SubRange {
    pub fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    pub fn singleton(value: u32) -> Self {
        Self::new(value, value)
    }

    pub fn contains(&self, value: u32) -> bool {
        self.start <= value && value <= self.end
    }

    pub fn is_empty(&self) -> bool {
        self.start > self.end
    }
}

impl fmt::Display for SubRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start == self.end {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}-{}", self.start, self.end)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ip_round_trips_through_dotted_quad() {
        let ip: Ip = "10.1.255.7".parse().unwrap();
        assert_eq!(ip.0, 0x0a01_ff07);
        assert_eq!(ip.to_string(), "10.1.255.7");
        assert!("10.1.2".parse::<Ip>().is_err());
        assert!("10.1.2.256".parse::<Ip>().is_err());
        assert!("10.1.2.3.4".parse::<Ip>().is_err());
    }

    #[test]
    fn signed_or_padded_literals_are_rejected() {
        assert!("+1.+2.+3.+4".parse::<Ip>().is_err());
        assert!("1.2.3.+4".parse::<Ip>().is_err());
        assert!(" 1.2.3.4".parse::<Ip>().is_err());
        assert!("1.2.3.4/+8".parse::<Prefix>().is_err());
        assert!("1.2.3.4/".parse::<Prefix>().is_err());
        assert_eq!("0.0.0.0".parse::<Ip>(), Ok(Ip::ZERO));
        assert_eq!("255.255.255.255".parse::<Ip>(), Ok(Ip::MAX));
    }

    #[test]
    fn prefix_normalises_host_bits() {
        let p: Prefix = "10.1.2.3/16".parse().unwrap();
        assert_eq!(p.to_string(), "10.1.0.0/16");
        assert_eq!(p.end().to_string(), "10.1.255.255");
        assert!(p.contains("10.1.200.1".parse().unwrap()));
        assert!(!p.contains("10.2.0.0".parse().unwrap()));
        assert!("10.0.0.0/33".parse::<Prefix>().is_err());
    }

    #[test]
    fn default_route_contains_everything() {
        let any: Prefix = "0.0.0.0/0".parse().unwrap();
        assert!(any.contains(Ip::MAX));
        assert_eq!(any.end(), Ip::MAX);
        assert!(any.contains_prefix(&"192.168.0.0/24".parse().unwrap()));
    }

    #[test]
    fn wildcard_forms_parse() {
        let prefix: IpWildcard = "10.0.0.0/8".parse().unwrap();
        assert_eq!(prefix.wildcard(), 0x00ff_ffff);
        assert_eq!(prefix.as_prefix().map(|p| p.length()), Some(8));

        let host: IpWildcard = "1.2.3.4".parse().unwrap();
        assert_eq!(host.wildcard(), 0);
        assert_eq!(host.to_string(), "1.2.3.4");

        let sparse: IpWildcard = "10.0.0.1:0.255.0.0".parse().unwrap();
        assert!(sparse.as_prefix().is_none());
        assert!(sparse.matches("10.77.0.1".parse().unwrap()));
        assert!(!sparse.matches("10.77.0.2".parse().unwrap()));
        assert_eq!(sparse.to_string(), "10.0.0.1:0.255.0.0");
    }

    #[test]
    fn any_wildcard_matches_everything() {
        assert!(IpWildcard::ANY.matches(Ip::ZERO));
        assert!(IpWildcard::ANY.matches(Ip::MAX));
        assert_eq!(IpWildcard::ANY.as_prefix().map(|p| p.length()), Some(0));
    }

    #[test]
    fn addresses_serialize_as_strings() {
        let p: Prefix = "172.16.0.0/12".parse().unwrap();
        let json = serde_json::to_string(&p).unwrap();
        assert_eq!(json, "\"172.16.0.0/12\"");
        let back: Prefix = serde_json::from_str(&json).unwrap();
        assert_eq!(back, p);
    }
}
