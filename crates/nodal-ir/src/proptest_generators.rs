//! Proptest strategies for addresses, header spaces and well-formed flows.

use proptest::prelude::*;

use crate::flow::Flow;
use crate::header_space::{HeaderSpace, IpProtocol, TcpFlags, TcpFlagsMatch, MAX_DSCP, MAX_ECN};
use crate::ip::{Ip, IpWildcard, Prefix, SubRange};

/// Addresses drawn from a few small blocks so that generated wildcards and
/// flows collide often.
pub fn arb_ip() -> impl Strategy<Value = Ip> {
    prop_oneof![
        (0u32..=255).prop_map(|low| Ip(0x0a00_0000 | low)),
        (0u32..=255).prop_map(|low| Ip(0xc0a8_0100 | low)),
        any::<u32>().prop_map(Ip),
    ]
}

/// Prefix-shaped and non-contiguous wildcards.
pub fn arb_ip_wildcard() -> impl Strategy<Value = IpWildcard> {
    prop_oneof![
        3 => (arb_ip(), 0u8..=32).prop_map(|(ip, len)| IpWildcard::from(Prefix::new(ip, len))),
        1 => (arb_ip(), any::<u32>()).prop_map(|(ip, wildcard)| IpWildcard::new(ip, wildcard)),
    ]
}

fn arb_protocol() -> impl Strategy<Value = IpProtocol> {
    prop_oneof![
        Just(IpProtocol::TCP),
        Just(IpProtocol::UDP),
        Just(IpProtocol::ICMP),
        Just(IpProtocol::IP),
        (0u8..=255).prop_map(IpProtocol),
    ]
}

fn arb_range(max: u32) -> impl Strategy<Value = SubRange> {
    (0..=max, 0..=max).prop_map(|(a, b)| SubRange::new(a.min(b), a.max(b)))
}

fn small_set<T: Ord + std::fmt::Debug>(
    element: impl Strategy<Value = T>,
) -> impl Strategy<Value = std::collections::BTreeSet<T>> {
    proptest::collection::btree_set(element, 0..=2)
}

/// Header spaces constraining a random subset of fields with in-domain
/// values.
pub fn arb_header_space() -> impl Strategy<Value = HeaderSpace> {
    let ips = (
        small_set(arb_ip_wildcard()),
        small_set(arb_ip_wildcard()),
        small_set(arb_ip_wildcard()),
        small_set(arb_ip_wildcard()),
    );
    let ports = (
        small_set(arb_range(1024)),
        small_set(arb_range(1024)),
        small_set(arb_range(1024)),
    );
    let misc = (
        small_set(arb_protocol()),
        small_set(arb_protocol()),
        small_set(arb_range(20)),
        small_set(0..=MAX_DSCP),
        small_set(0..=MAX_ECN),
        proptest::collection::vec(
            (any::<u8>(), any::<u8>()).prop_map(|(m, v)| TcpFlagsMatch::new(m, v)),
            0..=2,
        ),
        any::<bool>(),
    );
    (ips, ports, misc).prop_map(
        |(
            (src_ips, not_src_ips, dst_ips, not_dst_ips),
            (src_ports, dst_ports, not_dst_ports),
            (ip_protocols, not_ip_protocols, icmp_types, dscps, ecns, tcp_flags, negate),
        )| HeaderSpace {
            src_ips,
            not_src_ips,
            dst_ips,
            not_dst_ips,
            src_ports,
            dst_ports,
            not_dst_ports,
            ip_protocols,
            not_ip_protocols,
            icmp_types,
            dscps,
            ecns,
            tcp_flags,
            negate,
            ..HeaderSpace::default()
        },
    )
}

/// Flows whose fields respect protocol sanity: ports only for TCP/UDP, ICMP
/// values only for ICMP, flags only for TCP.
pub fn arb_flow() -> impl Strategy<Value = Flow> {
    (
        arb_ip(),
        arb_ip(),
        arb_protocol(),
        (0u16..=1024, 0u16..=1024),
        (0u8..=20, 0u8..=20),
        (0u16..=8191, 0..=MAX_DSCP, 0..=MAX_ECN),
        any::<u8>(),
    )
        .prop_map(
            |(src_ip, dst_ip, ip_protocol, (sp, dp), (it, ic), (frag, dscp, ecn), flags)| {
                let mut flow = Flow::new("r1", crate::DEFAULT_VRF, "base");
                flow.src_ip = src_ip;
                flow.dst_ip = dst_ip;
                flow.ip_protocol = ip_protocol;
                if ip_protocol.has_ports() {
                    flow.src_port = sp;
                    flow.dst_port = dp;
                }
                if ip_protocol == IpProtocol::ICMP {
                    flow.icmp_type = it;
                    flow.icmp_code = ic;
                }
                if ip_protocol == IpProtocol::TCP {
                    flow.tcp_flags = TcpFlags(flags);
                }
                flow.fragment_offset = frag;
                flow.dscp = dscp;
                flow.ecn = ecn;
                flow
            },
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn generated_header_spaces_validate(hs in arb_header_space()) {
            prop_assert!(hs.validate().is_ok());
        }

        #[test]
        fn generated_flows_respect_protocol_sanity(flow in arb_flow()) {
            if !flow.ip_protocol.has_ports() {
                prop_assert_eq!((flow.src_port, flow.dst_port), (0, 0));
            }
            if flow.ip_protocol != IpProtocol::ICMP {
                prop_assert_eq!((flow.icmp_type, flow.icmp_code), (0, 0));
            }
            if flow.ip_protocol != IpProtocol::TCP {
                prop_assert_eq!(flow.tcp_flags, TcpFlags::default());
            }
        }

        #[test]
        fn a_flow_matches_its_own_header_space(flow in arb_flow()) {
            let hs = HeaderSpace::from_flow(&flow);
            prop_assert!(hs.matches(&flow));
            prop_assert!(!hs.negated().matches(&flow));
        }
    }
}
