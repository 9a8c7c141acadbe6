use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::flow::Flow;
use crate::ip::{Ip, IpWildcard, SubRange};

pub const MAX_PORT: u32 = 65_535;
pub const MAX_ICMP: u32 = 255;
pub const MAX_FRAGMENT_OFFSET: u32 = 8_191;
pub const MAX_DSCP: u8 = 63;
pub const MAX_ECN: u8 = 3;

/// IP protocol number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IpProtocol(pub u8);

impl IpProtocol {
    pub const IP: IpProtocol = IpProtocol(0);
    pub const ICMP: IpProtocol = IpProtocol(1);
    pub const TCP: IpProtocol = IpProtocol(6);
    pub const UDP: IpProtocol = IpProtocol(17);

    /// Only TCP and UDP carry port numbers.
    pub fn has_ports(self) -> bool {
        self == IpProtocol::TCP || self == IpProtocol::UDP
    }
}

impl fmt::Display for IpProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            IpProtocol::IP => write!(f, "IP"),
            IpProtocol::ICMP => write!(f, "ICMP"),
            IpProtocol::TCP => write!(f, "TCP"),
            IpProtocol::UDP => write!(f, "UDP"),
            IpProtocol(n) => write!(f, "proto{n}"),
        }
    }
}

/// The eight TCP control bits of a concrete packet.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct TcpFlags(pub u8);

impl TcpFlags {
    pub const CWR: u8 = 0x80;
    pub const ECE: u8 = 0x40;
    pub const URG: u8 = 0x20;
    pub const ACK: u8 = 0x10;
    pub const PSH: u8 = 0x08;
    pub const RST: u8 = 0x04;
    pub const SYN: u8 = 0x02;
    pub const FIN: u8 = 0x01;

    /// Flag names with their bit, most significant first.
    pub const NAMED: [(&'static str, u8); 8] = [
        ("cwr", Self::CWR),
        ("ece", Self::ECE),
        ("urg", Self::URG),
        ("ack", Self::ACK),
        ("psh", Self::PSH),
        ("rst", Self::RST),
        ("syn", Self::SYN),
        ("fin", Self::FIN),
    ];

    pub fn is_set(self, bit: u8) -> bool {
        self.0 & bit != 0
    }

    pub fn with(self, bit: u8, value: bool) -> Self {
        if value {
            TcpFlags(self.0 | bit)
        } else {
            TcpFlags(self.0 & !bit)
        }
    }
}

/// Matches packets whose flags agree with `value` on every bit in `mask`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TcpFlagsMatch {
    pub mask: u8,
    pub value: u8,
}

impl TcpFlagsMatch {
    pub fn new(mask: u8, value: u8) -> Self {
        Self {
            mask,
            value: value & mask,
        }
    }

    /// Matches when every bit in `bits` is set, ignoring the others.
    pub fn all_set(bits: u8) -> Self {
        Self::new(bits, bits)
    }

    pub fn matches(&self, flags: TcpFlags) -> bool {
        flags.0 & self.mask == self.value
    }
}

/// A constraint set over packet header fields.
///
/// Every field is a set of allowed (or, for `not_*`, forbidden) values; an
/// empty set leaves the field unconstrained. `negate` complements the whole
/// space after all fields have been evaluated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct HeaderSpace {
    pub src_ips: BTreeSet<IpWildcard>,
    pub not_src_ips: BTreeSet<IpWildcard>,
    pub dst_ips: BTreeSet<IpWildcard>,
    pub not_dst_ips: BTreeSet<IpWildcard>,
    pub src_or_dst_ips: BTreeSet<IpWildcard>,
    pub src_ports: BTreeSet<SubRange>,
    pub not_src_ports: BTreeSet<SubRange>,
    pub dst_ports: BTreeSet<SubRange>,
    pub not_dst_ports: BTreeSet<SubRange>,
    pub src_or_dst_ports: BTreeSet<SubRange>,
    pub ip_protocols: BTreeSet<IpProtocol>,
    pub not_ip_protocols: BTreeSet<IpProtocol>,
    pub icmp_types: BTreeSet<SubRange>,
    pub not_icmp_types: BTreeSet<SubRange>,
    pub icmp_codes: BTreeSet<SubRange>,
    pub not_icmp_codes: BTreeSet<SubRange>,
    pub fragment_offsets: BTreeSet<SubRange>,
    pub not_fragment_offsets: BTreeSet<SubRange>,
    pub dscps: BTreeSet<u8>,
    pub not_dscps: BTreeSet<u8>,
    pub ecns: BTreeSet<u8>,
    pub not_ecns: BTreeSet<u8>,
    pub tcp_flags: Vec<TcpFlagsMatch>,
    pub negate: bool,
}

fn wildcards_contain(set: &BTreeSet<IpWildcard>, ip: Ip) -> bool {
    set.iter().any(|w| w.matches(ip))
}

fn ranges_contain(set: &BTreeSet<SubRange>, value: u32) -> bool {
    set.iter().any(|r| r.contains(value))
}

/// `allowed` empty or containing the value, and `forbidden` not containing it.
fn field_ok(allowed: bool, allowed_empty: bool, forbidden: bool) -> bool {
    (allowed_empty || allowed) && !forbidden
}

impl HeaderSpace {
    /// The unconstrained space.
    pub fn any() -> Self {
        Self::default()
    }

    /// The singleton space containing exactly `flow`'s header.
    pub fn from_flow(flow: &Flow) -> Self {
        let mut hs = HeaderSpace::default();
        hs.src_ips.insert(IpWildcard::host(flow.src_ip));
        hs.dst_ips.insert(IpWildcard::host(flow.dst_ip));
        hs.src_ports.insert(SubRange::singleton(u32::from(flow.src_port)));
        hs.dst_ports.insert(SubRange::singleton(u32::from(flow.dst_port)));
        hs.ip_protocols.insert(flow.ip_protocol);
        hs.icmp_types.insert(SubRange::singleton(u32::from(flow.icmp_type)));
        hs.icmp_codes.insert(SubRange::singleton(u32::from(flow.icmp_code)));
        hs.fragment_offsets
            .insert(SubRange::singleton(u32::from(flow.fragment_offset)));
        hs.dscps.insert(flow.dscp);
        hs.ecns.insert(flow.ecn);
        hs.tcp_flags.push(TcpFlagsMatch::new(0xff, flow.tcp_flags.0));
        hs
    }

    pub fn with_dst_ip(mut self, dst: IpWildcard) -> Self {
        self.dst_ips.insert(dst);
        self
    }

    pub fn with_src_ip(mut self, src: IpWildcard) -> Self {
        self.src_ips.insert(src);
        self
    }

    pub fn with_protocol(mut self, protocol: IpProtocol) -> Self {
        self.ip_protocols.insert(protocol);
        self
    }

    pub fn with_dst_ports(mut self, range: SubRange) -> Self {
        self.dst_ports.insert(range);
        self
    }

    pub fn negated(mut self) -> Self {
        self.negate = !self.negate;
        self
    }

    /// True when no field carries a constraint (regardless of `negate`).
    pub fn is_unconstrained(&self) -> bool {
        *self
            == HeaderSpace {
                negate: self.negate,
                ..HeaderSpace::default()
            }
    }

    /// Concrete membership test, the reference semantics for the symbolic
    /// encoding.
    pub fn matches(&self, flow: &Flow) -> bool {
        self.matches_fields(flow) != self.negate
    }

    fn matches_fields(&self, flow: &Flow) -> bool {
        let src_port = u32::from(flow.src_port);
        let dst_port = u32::from(flow.dst_port);

        field_ok(
            wildcards_contain(&self.src_ips, flow.src_ip),
            self.src_ips.is_empty(),
            wildcards_contain(&self.not_src_ips, flow.src_ip),
        ) && field_ok(
            wildcards_contain(&self.dst_ips, flow.dst_ip),
            self.dst_ips.is_empty(),
            wildcards_contain(&self.not_dst_ips, flow.dst_ip),
        ) && (self.src_or_dst_ips.is_empty()
            || wildcards_contain(&self.src_or_dst_ips, flow.src_ip)
            || wildcards_contain(&self.src_or_dst_ips, flow.dst_ip))
            && field_ok(
                ranges_contain(&self.src_ports, src_port),
                self.src_ports.is_empty(),
                ranges_contain(&self.not_src_ports, src_port),
            )
            && field_ok(
                ranges_contain(&self.dst_ports, dst_port),
                self.dst_ports.is_empty(),
                ranges_contain(&self.not_dst_ports, dst_port),
            )
            && (self.src_or_dst_ports.is_empty()
                || ranges_contain(&self.src_or_dst_ports, src_port)
                || ranges_contain(&self.src_or_dst_ports, dst_port))
            && field_ok(
                self.ip_protocols.contains(&flow.ip_protocol),
                self.ip_protocols.is_empty(),
                self.not_ip_protocols.contains(&flow.ip_protocol),
            )
            && field_ok(
                ranges_contain(&self.icmp_types, u32::from(flow.icmp_type)),
                self.icmp_types.is_empty(),
                ranges_contain(&self.not_icmp_types, u32::from(flow.icmp_type)),
            )
            && field_ok(
                ranges_contain(&self.icmp_codes, u32::from(flow.icmp_code)),
                self.icmp_codes.is_empty(),
                ranges_contain(&self.not_icmp_codes, u32::from(flow.icmp_code)),
            )
            && field_ok(
                ranges_contain(&self.fragment_offsets, u32::from(flow.fragment_offset)),
                self.fragment_offsets.is_empty(),
                ranges_contain(&self.not_fragment_offsets, u32::from(flow.fragment_offset)),
            )
            && field_ok(
                self.dscps.contains(&flow.dscp),
                self.dscps.is_empty(),
                self.not_dscps.contains(&flow.dscp),
            )
            && field_ok(
                self.ecns.contains(&flow.ecn),
                self.ecns.is_empty(),
                self.not_ecns.contains(&flow.ecn),
            )
            && (self.tcp_flags.is_empty()
                || self.tcp_flags.iter().any(|m| m.matches(flow.tcp_flags)))
    }

    /// Describe the first out-of-domain or inverted constraint, if any.
    pub fn validate(&self) -> Result<(), String> {
        let range_sets: [(&str, &BTreeSet<SubRange>, u32); 9] = [
            ("src_ports", &self.src_ports, MAX_PORT),
            ("not_src_ports", &self.not_src_ports, MAX_PORT),
            ("dst_ports", &self.dst_ports, MAX_PORT),
            ("not_dst_ports", &self.not_dst_ports, MAX_PORT),
            ("src_or_dst_ports", &self.src_or_dst_ports, MAX_PORT),
            ("icmp_types", &self.icmp_types, MAX_ICMP),
            ("icmp_codes", &self.icmp_codes, MAX_ICMP),
            ("fragment_offsets", &self.fragment_offsets, MAX_FRAGMENT_OFFSET),
            ("not_fragment_offsets", &self.not_fragment_offsets, MAX_FRAGMENT_OFFSET),
        ];
        for (field, set, max) in range_sets {
            for range in set {
                if range.is_empty() {
                    return Err(format!("{field}: inverted range {}-{}", range.start, range.end));
                }
                if range.end > max {
                    return Err(format!("{field}: {range} exceeds maximum {max}"));
                }
            }
        }
        for range in self.not_icmp_types.iter().chain(&self.not_icmp_codes) {
            if range.is_empty() || range.end > MAX_ICMP {
                return Err(format!("icmp exclusion {range} is out of range"));
            }
        }
        if let Some(d) = self.dscps.iter().chain(&self.not_dscps).find(|d| **d > MAX_DSCP) {
            return Err(format!("dscp {d} exceeds maximum {MAX_DSCP}"));
        }
        if let Some(e) = self.ecns.iter().chain(&self.not_ecns).find(|e| **e > MAX_ECN) {
            return Err(format!("ecn {e} exceeds maximum {MAX_ECN}"));
        }
        Ok(())
    }
}
