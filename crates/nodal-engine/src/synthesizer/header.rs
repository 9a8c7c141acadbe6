//! Packet header variables shared by every layer of a job, and the
//! translation of header spaces into constraints over them.

use std::collections::BTreeSet;

use nodal_ir::header_space::{MAX_DSCP, MAX_ECN, MAX_FRAGMENT_OFFSET, MAX_ICMP, MAX_PORT};
use nodal_ir::{Flow, HeaderSpace, Ip, IpProtocol, IpWildcard, SubRange, TcpFlags, TcpFlagsMatch};
use nodal_smt::encoding::Encoding;
use nodal_smt::solver::Model;
use nodal_smt::terms::{SmtSort, SmtTerm};

pub const SRC_IP: &str = "src_ip";
pub const DST_IP: &str = "dst_ip";
pub const SRC_PORT: &str = "src_port";
pub const DST_PORT: &str = "dst_port";
pub const IP_PROTOCOL: &str = "ip_protocol";
pub const ICMP_TYPE: &str = "icmp_type";
pub const ICMP_CODE: &str = "icmp_code";
pub const FRAGMENT_OFFSET: &str = "fragment_offset";
pub const DSCP: &str = "dscp";
pub const ECN: &str = "ecn";

/// Integer header fields with their inclusive upper bounds.
pub const INT_FIELDS: [(&str, i64); 10] = [
    (SRC_IP, u32::MAX as i64),
    (DST_IP, u32::MAX as i64),
    (SRC_PORT, MAX_PORT as i64),
    (DST_PORT, MAX_PORT as i64),
    (IP_PROTOCOL, 255),
    (ICMP_TYPE, MAX_ICMP as i64),
    (ICMP_CODE, MAX_ICMP as i64),
    (FRAGMENT_OFFSET, MAX_FRAGMENT_OFFSET as i64),
    (DSCP, MAX_DSCP as i64),
    (ECN, MAX_ECN as i64),
];

/// One boolean per TCP flag bit.
pub const TCP_FLAG_VARS: [(&str, u8); 8] = [
    ("tcp_cwr", TcpFlags::CWR),
    ("tcp_ece", TcpFlags::ECE),
    ("tcp_urg", TcpFlags::URG),
    ("tcp_ack", TcpFlags::ACK),
    ("tcp_psh", TcpFlags::PSH),
    ("tcp_rst", TcpFlags::RST),
    ("tcp_syn", TcpFlags::SYN),
    ("tcp_fin", TcpFlags::FIN),
];

/// Order in which under-constrained fields are pinned when concretizing a
/// model. Bit variables are omitted: they follow from their address.
pub const CONCRETIZATION_ORDER: [(&str, SmtSort); 18] = [
    (DST_IP, SmtSort::Int),
    (SRC_IP, SmtSort::Int),
    (IP_PROTOCOL, SmtSort::Int),
    (DST_PORT, SmtSort::Int),
    (SRC_PORT, SmtSort::Int),
    (ICMP_TYPE, SmtSort::Int),
    (ICMP_CODE, SmtSort::Int),
    (FRAGMENT_OFFSET, SmtSort::Int),
    (DSCP, SmtSort::Int),
    (ECN, SmtSort::Int),
    ("tcp_cwr", SmtSort::Bool),
    ("tcp_ece", SmtSort::Bool),
    ("tcp_urg", SmtSort::Bool),
    ("tcp_ack", SmtSort::Bool),
    ("tcp_psh", SmtSort::Bool),
    ("tcp_rst", SmtSort::Bool),
    ("tcp_syn", SmtSort::Bool),
    ("tcp_fin", SmtSort::Bool),
];

pub fn ip_bit_var(field: &str, bit: u32) -> String {
    format!("{field}_b{bit}")
}

/// Declare the header variables and assert their domains, the bit linking of
/// both addresses and the protocol sanity constraints.
pub fn declare_packet(enc: &mut Encoding) {
    for (name, max) in INT_FIELDS {
        enc.declare(name, SmtSort::Int);
        enc.assert_term(SmtTerm::var(name).in_range(0, max));
    }
    for (name, _) in TCP_FLAG_VARS {
        enc.declare(name, SmtSort::Bool);
    }
    for field in [SRC_IP, DST_IP] {
        let mut sum = SmtTerm::int(0);
        for bit in 0..32 {
            let name = ip_bit_var(field, bit);
            enc.declare(name.clone(), SmtSort::Bool);
            let weight = SmtTerm::int(1i64 << bit);
            sum = sum.add(SmtTerm::ite(SmtTerm::var(name), weight, SmtTerm::int(0)));
        }
        enc.assert_term(SmtTerm::var(field).eq(sum));
    }
    for term in sanity_constraints() {
        enc.assert_term(term);
    }
}

fn protocol_is(protocol: IpProtocol) -> SmtTerm {
    SmtTerm::var(IP_PROTOCOL).eq(SmtTerm::int(i64::from(protocol.0)))
}

fn sanity_constraints() -> Vec<SmtTerm> {
    let zero = |name: &str| SmtTerm::var(name).eq(SmtTerm::int(0));
    let has_ports = SmtTerm::or(vec![protocol_is(IpProtocol::TCP), protocol_is(IpProtocol::UDP)]);
    let mut no_flags = Vec::with_capacity(TCP_FLAG_VARS.len());
    for (name, _) in TCP_FLAG_VARS {
        no_flags.push(SmtTerm::var(name).not());
    }
    vec![
        has_ports
            .not()
            .implies(SmtTerm::and(vec![zero(SRC_PORT), zero(DST_PORT)])),
        protocol_is(IpProtocol::ICMP)
            .not()
            .implies(SmtTerm::and(vec![zero(ICMP_TYPE), zero(ICMP_CODE)])),
        protocol_is(IpProtocol::TCP).not().implies(SmtTerm::and(no_flags)),
    ]
}

/// `field` lies in the wildcard. Prefix-shaped wildcards become a range over
/// the integer variable; others constrain the fixed bits individually.
pub fn wildcard_term(field: &str, wildcard: &IpWildcard) -> SmtTerm {
    if let Some(prefix) = wildcard.as_prefix() {
        if prefix.length() == 0 {
            return SmtTerm::tt();
        }
        return SmtTerm::var(field).in_range(prefix.start().as_i64(), prefix.end().as_i64());
    }
    let fixed = !wildcard.wildcard();
    let address = wildcard.ip().as_u32();
    let mut bits = Vec::new();
    for bit in 0..32 {
        if fixed & (1 << bit) == 0 {
            continue;
        }
        let var = SmtTerm::var(ip_bit_var(field, bit));
        if address & (1 << bit) != 0 {
            bits.push(var);
        } else {
            bits.push(var.not());
        }
    }
    SmtTerm::and(bits)
}

fn wildcards_term(field: &str, set: &BTreeSet<IpWildcard>) -> SmtTerm {
    SmtTerm::or(set.iter().map(|w| wildcard_term(field, w)).collect())
}

fn ranges_term(field: &str, set: &BTreeSet<SubRange>) -> SmtTerm {
    SmtTerm::or(
        set.iter()
            .map(|r| SmtTerm::var(field).in_range(i64::from(r.start), i64::from(r.end)))
            .collect(),
    )
}

fn values_term(field: &str, values: impl Iterator<Item = i64>) -> SmtTerm {
    SmtTerm::or(values.map(|v| SmtTerm::var(field).eq(SmtTerm::int(v))).collect())
}

/// Positive set (unless empty) and not the negative set.
fn field_term(positive: Option<SmtTerm>, negative: Option<SmtTerm>) -> Vec<SmtTerm> {
    let mut out = Vec::new();
    if let Some(p) = positive {
        out.push(p);
    }
    if let Some(n) = negative {
        out.push(n.not());
    }
    out
}

fn non_empty<T>(set: &BTreeSet<T>, f: impl FnOnce(&BTreeSet<T>) -> SmtTerm) -> Option<SmtTerm> {
    (!set.is_empty()).then(|| f(set))
}

fn tcp_flags_term(matches: &[TcpFlagsMatch]) -> SmtTerm {
    let mut alternatives = Vec::with_capacity(matches.len());
    for m in matches {
        let mut bits = Vec::new();
        for (name, bit) in TCP_FLAG_VARS {
            if m.mask & bit == 0 {
                continue;
            }
            let var = SmtTerm::var(name);
            bits.push(if m.value & bit != 0 { var } else { var.not() });
        }
        alternatives.push(SmtTerm::and(bits));
    }
    SmtTerm::or(alternatives)
}

/// Constraint satisfied exactly by the packets in `hs`.
pub fn header_space_term(hs: &HeaderSpace) -> SmtTerm {
    let mut conjuncts = Vec::new();

    conjuncts.extend(field_term(
        non_empty(&hs.src_ips, |s| wildcards_term(SRC_IP, s)),
        non_empty(&hs.not_src_ips, |s| wildcards_term(SRC_IP, s)),
    ));
    conjuncts.extend(field_term(
        non_empty(&hs.dst_ips, |s| wildcards_term(DST_IP, s)),
        non_empty(&hs.not_dst_ips, |s| wildcards_term(DST_IP, s)),
    ));
    if !hs.src_or_dst_ips.is_empty() {
        conjuncts.push(SmtTerm::or(vec![
            wildcards_term(SRC_IP, &hs.src_or_dst_ips),
            wildcards_term(DST_IP, &hs.src_or_dst_ips),
        ]));
    }

    conjuncts.extend(field_term(
        non_empty(&hs.src_ports, |s| ranges_term(SRC_PORT, s)),
        non_empty(&hs.not_src_ports, |s| ranges_term(SRC_PORT, s)),
    ));
    conjuncts.extend(field_term(
        non_empty(&hs.dst_ports, |s| ranges_term(DST_PORT, s)),
        non_empty(&hs.not_dst_ports, |s| ranges_term(DST_PORT, s)),
    ));
    if !hs.src_or_dst_ports.is_empty() {
        conjuncts.push(SmtTerm::or(vec![
            ranges_term(SRC_PORT, &hs.src_or_dst_ports),
            ranges_term(DST_PORT, &hs.src_or_dst_ports),
        ]));
    }

    conjuncts.extend(field_term(
        non_empty(&hs.ip_protocols, |s| {
            values_term(IP_PROTOCOL, s.iter().map(|p| i64::from(p.0)))
        }),
        non_empty(&hs.not_ip_protocols, |s| {
            values_term(IP_PROTOCOL, s.iter().map(|p| i64::from(p.0)))
        }),
    ));
    conjuncts.extend(field_term(
        non_empty(&hs.icmp_types, |s| ranges_term(ICMP_TYPE, s)),
        non_empty(&hs.not_icmp_types, |s| ranges_term(ICMP_TYPE, s)),
    ));
    conjuncts.extend(field_term(
        non_empty(&hs.icmp_codes, |s| ranges_term(ICMP_CODE, s)),
        non_empty(&hs.not_icmp_codes, |s| ranges_term(ICMP_CODE, s)),
    ));
    conjuncts.extend(field_term(
        non_empty(&hs.fragment_offsets, |s| ranges_term(FRAGMENT_OFFSET, s)),
        non_empty(&hs.not_fragment_offsets, |s| ranges_term(FRAGMENT_OFFSET, s)),
    ));
    conjuncts.extend(field_term(
        non_empty(&hs.dscps, |s| values_term(DSCP, s.iter().map(|v| i64::from(*v)))),
        non_empty(&hs.not_dscps, |s| values_term(DSCP, s.iter().map(|v| i64::from(*v)))),
    ));
    conjuncts.extend(field_term(
        non_empty(&hs.ecns, |s| values_term(ECN, s.iter().map(|v| i64::from(*v)))),
        non_empty(&hs.not_ecns, |s| values_term(ECN, s.iter().map(|v| i64::from(*v)))),
    ));
    if !hs.tcp_flags.is_empty() {
        conjuncts.push(tcp_flags_term(&hs.tcp_flags));
    }

    let term = SmtTerm::and(conjuncts);
    if hs.negate {
        term.not()
    } else {
        term
    }
}

/// `dst_ip` is one of `ips`.
pub fn dst_ip_in(ips: impl IntoIterator<Item = Ip>) -> SmtTerm {
    values_term(DST_IP, ips.into_iter().map(Ip::as_i64))
}

/// Variables a decoded flow reads from a model.
pub fn model_vars() -> Vec<(&'static str, SmtSort)> {
    let mut vars: Vec<(&'static str, SmtSort)> =
        INT_FIELDS.iter().map(|(name, _)| (*name, SmtSort::Int)).collect();
    vars.extend(TCP_FLAG_VARS.iter().map(|(name, _)| (*name, SmtSort::Bool)));
    vars
}

/// The model assignment of `flow`'s header, including bit variables.
pub fn model_of_flow(flow: &Flow) -> Model {
    let mut model = Model::default();
    model.insert_int(SRC_IP, flow.src_ip.as_i64());
    model.insert_int(DST_IP, flow.dst_ip.as_i64());
    model.insert_int(SRC_PORT, i64::from(flow.src_port));
    model.insert_int(DST_PORT, i64::from(flow.dst_port));
    model.insert_int(IP_PROTOCOL, i64::from(flow.ip_protocol.0));
    model.insert_int(ICMP_TYPE, i64::from(flow.icmp_type));
    model.insert_int(ICMP_CODE, i64::from(flow.icmp_code));
    model.insert_int(FRAGMENT_OFFSET, i64::from(flow.fragment_offset));
    model.insert_int(DSCP, i64::from(flow.dscp));
    model.insert_int(ECN, i64::from(flow.ecn));
    for (name, bit) in TCP_FLAG_VARS {
        model.insert_bool(name, flow.tcp_flags.is_set(bit));
    }
    for (field, ip) in [(SRC_IP, flow.src_ip), (DST_IP, flow.dst_ip)] {
        for bit in 0..32 {
            model.insert_bool(ip_bit_var(field, bit), ip.as_u32() & (1 << bit) != 0);
        }
    }
    model
}

fn read_int<T: TryFrom<i64>>(model: &Model, name: &str) -> Result<T, String> {
    let value = model
        .get_int(name)
        .ok_or_else(|| format!("model has no value for '{name}'"))?;
    T::try_from(value).map_err(|_| format!("value {value} of '{name}' is out of range"))
}

/// Build a concrete flow from a model of the header variables.
pub fn flow_from_model(
    model: &Model,
    ingress_node: &str,
    ingress_vrf: &str,
    tag: &str,
) -> Result<Flow, String> {
    let mut flow = Flow::new(ingress_node, ingress_vrf, tag);
    flow.src_ip = Ip(read_int(model, SRC_IP)?);
    flow.dst_ip = Ip(read_int(model, DST_IP)?);
    flow.src_port = read_int(model, SRC_PORT)?;
    flow.dst_port = read_int(model, DST_PORT)?;
    flow.ip_protocol = IpProtocol(read_int(model, IP_PROTOCOL)?);
    flow.icmp_type = read_int(model, ICMP_TYPE)?;
    flow.icmp_code = read_int(model, ICMP_CODE)?;
    flow.fragment_offset = read_int(model, FRAGMENT_OFFSET)?;
    flow.dscp = read_int(model, DSCP)?;
    flow.ecn = read_int(model, ECN)?;
    let mut flags = TcpFlags::default();
    for (name, bit) in TCP_FLAG_VARS {
        let set = model
            .get_bool(name)
            .ok_or_else(|| format!("model has no value for '{name}'"))?;
        flags = flags.with(bit, set);
    }
    flow.tcp_flags = flags;
    Ok(flow)
}
