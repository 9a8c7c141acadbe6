#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;

use nodal_engine::{EngineSettings, Synthesizer};
use nodal_ir::{
    Configuration, DataPlane, Edge, FibRow, HeaderSpace, Interface, IpAccessList, IpAccessListLine,
    NodeInterfacePair,
};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn settings() -> EngineSettings {
    EngineSettings {
        job_timeout_ms: 60_000,
        ..EngineSettings::sequential()
    }
}

pub fn configs(list: Vec<Configuration>) -> BTreeMap<String, Configuration> {
    list.into_iter().map(|c| (c.hostname.clone(), c)).collect()
}

pub fn prefix_hs(dst: &str) -> HeaderSpace {
    HeaderSpace::any().with_dst_ip(dst.parse().unwrap())
}

/// `a:eth0 (10.0.0.1/30) <-> b:eth0 (10.0.0.2/30)`, `b` owns `2.2.2.2` on a
/// loopback and `a` routes `2.2.2.2/32` toward `b`. When `block_at_b` is
/// set, `b` drops everything arriving on `eth0`.
pub fn two_node(block_at_b: bool) -> (BTreeMap<String, Configuration>, DataPlane) {
    let mut a = Configuration::new("a");
    a.add_interface(Interface::new("eth0").with_address("10.0.0.1/30").unwrap());

    let mut b = Configuration::new("b");
    let mut eth0 = Interface::new("eth0").with_address("10.0.0.2/30").unwrap();
    if block_at_b {
        eth0 = eth0.with_filters(Some("block"), None);
        b.add_acl(IpAccessList::new(
            "block",
            vec![IpAccessListLine::deny("all", HeaderSpace::any())],
        ));
    }
    b.add_interface(eth0);
    b.add_interface(Interface::new("lo0").with_address("2.2.2.2/32").unwrap());

    let mut dp = DataPlane::new();
    dp.add_route("a", FibRow::new("2.2.2.2/32".parse().unwrap(), "eth0"));
    dp.fibs.insert("b".into(), Vec::new());
    dp.add_link(Edge::new("a", "eth0", "b", "eth0"));
    (configs(vec![a, b]), dp)
}

/// `a` load-balances `9.9.9.0/24` between `b` and a null route; `b` hands it
/// to a flow sink on `eth1`.
pub fn ecmp_with_null_branch() -> (BTreeMap<String, Configuration>, DataPlane) {
    let mut a = Configuration::new("a");
    a.add_interface(Interface::new("eth0").with_address("10.0.0.1/30").unwrap());
    let mut b = Configuration::new("b");
    b.add_interface(Interface::new("eth0").with_address("10.0.0.2/30").unwrap());
    b.add_interface(Interface::new("eth1").with_address("10.1.0.1/30").unwrap());

    let mut dp = DataPlane::new();
    dp.add_route("a", FibRow::new("9.9.9.0/24".parse().unwrap(), "eth0"));
    dp.add_route("a", FibRow::new("9.9.9.0/24".parse().unwrap(), "null0"));
    dp.add_route("b", FibRow::new("9.9.9.0/24".parse().unwrap(), "eth1"));
    dp.add_link(Edge::new("a", "eth0", "b", "eth0"));
    dp.flow_sinks.insert(NodeInterfacePair::new("b", "eth1"));
    (configs(vec![a, b]), dp)
}

pub fn layer(configs: &BTreeMap<String, Configuration>, dp: &DataPlane) -> Arc<Synthesizer> {
    layer_with(configs, dp, true)
}

pub fn layer_with(
    configs: &BTreeMap<String, Configuration>,
    dp: &DataPlane,
    simplify: bool,
) -> Arc<Synthesizer> {
    Arc::new(Synthesizer::with_data_plane(configs, dp, simplify).unwrap())
}

/// `fw` with shadowed lines in `edge-in`, a disabled line in `mgmt` and an
/// empty ACL.
pub fn shadowed_firewall() -> Configuration {
    let mut fw = Configuration::new("fw");
    fw.add_interface(
        Interface::new("eth0")
            .with_address("10.0.0.1/24")
            .unwrap()
            .with_filters(Some("edge-in"), None),
    );
    fw.add_acl(IpAccessList::new(
        "edge-in",
        vec![
            IpAccessListLine::permit("permit-ten", prefix_hs("10.0.0.0/8")),
            IpAccessListLine::deny("deny-ten", prefix_hs("10.0.0.0/8")),
            IpAccessListLine::deny("deny-subnet", prefix_hs("10.1.0.0/16")),
            IpAccessListLine::permit("permit-rest", HeaderSpace::any()),
            IpAccessListLine::deny("deny-all", HeaderSpace::any()),
        ],
    ));
    let mut odd = IpAccessListLine::permit("odd", HeaderSpace::any());
    odd.invalid_message = Some("unsupported match".into());
    fw.add_acl(IpAccessList::new(
        "mgmt",
        vec![odd, IpAccessListLine::permit("ssh", prefix_hs("192.168.0.0/16"))],
    ));
    fw.add_acl(IpAccessList::new("empty", Vec::new()));
    fw
}
