mod common;

use std::collections::BTreeSet;

use common::{ecmp_with_null_branch, init_tracing, layer, prefix_hs, settings, two_node};
use nodal_engine::interpreter::{
    DataPlaneReplayer, Environment, EnvironmentContext, FlowHistory, FlowInterpreter,
};
use nodal_engine::query::{
    BlacklistQuery, MultipathQuery, QueryError, QuerySynthesizer, ReachabilityQuery,
};
use nodal_engine::questions::{
    local_edge_reachability_jobs, multipath_jobs, reachability_jobs, reduced_reachability_jobs,
};
use nodal_engine::{run_flow_jobs, EngineError, EngineSettings, NodJob};
use nodal_ir::{Edge, Flow, FlowDisposition, ForwardingAction, HeaderSpace, Ip, DEFAULT_VRF};

fn accepted_at_b(hs: HeaderSpace) -> ReachabilityQuery {
    ReachabilityQuery::new([ForwardingAction::Accept], hs)
        .with_final_nodes(["b"])
        .with_ingress("a", DEFAULT_VRF)
}

fn solve(query: &ReachabilityQuery, blacklist: Option<&BlacklistQuery>) -> BTreeSet<Flow> {
    let (configs, dp) = two_node(false);
    let synth = layer(&configs, &dp);
    let jobs = reachability_jobs(&synth, query, blacklist, "base").unwrap();
    let batch = run_flow_jobs(&settings(), jobs, "reachability").unwrap();
    assert!(batch.summary.failures.is_empty(), "{:?}", batch.summary.failures);
    batch.flows
}

#[test]
fn accepted_flow_is_found_from_the_ingress() {
    init_tracing();
    let flows = solve(&accepted_at_b(HeaderSpace::any()), None);
    assert_eq!(flows.len(), 1);
    let flow = flows.iter().next().unwrap();
    assert_eq!(flow.ingress_node, "a");
    assert_eq!(flow.ingress_vrf, DEFAULT_VRF);
    assert_eq!(flow.dst_ip, "2.2.2.2".parse::<Ip>().unwrap());
    assert_eq!(flow.tag, "base");
}

#[test]
fn ingress_in_an_unknown_vrf_is_rejected() {
    init_tracing();
    let (configs, dp) = two_node(false);
    let synth = layer(&configs, &dp);
    let query = ReachabilityQuery::new([ForwardingAction::Accept], HeaderSpace::any())
        .with_ingress("a", DEFAULT_VRF)
        .with_ingress("a", "blue");
    let err = reachability_jobs(&synth, &query, None, "base").unwrap_err();
    assert!(
        matches!(&err, EngineError::Query(QueryError::UnknownVrf { node, vrf }) if node == "a" && vrf == "blue"),
        "{err}"
    );

    let multipath = MultipathQuery::new("b", "blue", HeaderSpace::any());
    let err = NodJob::new(
        vec![synth],
        vec![QuerySynthesizer::MultipathInconsistency(multipath)],
        [("b".to_string(), "blue".to_string())].into(),
        "multipath",
    )
    .unwrap_err();
    assert_eq!(
        err,
        QueryError::UnknownVrf {
            node: "b".into(),
            vrf: "blue".into()
        }
    );
}

#[test]
fn blacklisted_destination_node_leaves_nothing_to_find() {
    init_tracing();
    let blacklist = BlacklistQuery::default().with_node("b");
    let flows = solve(&accepted_at_b(prefix_hs("2.2.2.2/32")), Some(&blacklist));
    assert!(flows.is_empty());
}

#[test]
fn blacklisted_link_leaves_nothing_to_find() {
    init_tracing();
    let blacklist = BlacklistQuery::default().with_edge(Edge::new("a", "eth0", "b", "eth0"));
    let flows = solve(&accepted_at_b(HeaderSpace::any()), Some(&blacklist));
    assert!(flows.is_empty());
}

#[test]
fn solving_twice_gives_the_same_witness() {
    init_tracing();
    let query = ReachabilityQuery::new([ForwardingAction::Drop], HeaderSpace::any());
    let first = solve(&query, None);
    assert_eq!(first.len(), 2);
    assert_eq!(solve(&query, None), first);
}

#[test]
fn pinned_witness_is_found_again_and_negation_is_its_dual() {
    init_tracing();
    let flows = solve(&accepted_at_b(prefix_hs("2.2.2.2/32")), None);
    let witness = flows.iter().next().unwrap().clone();
    let exact = HeaderSpace::from_flow(&witness);

    assert_eq!(solve(&accepted_at_b(exact.clone()), None), flows);
    assert!(solve(&accepted_at_b(exact.clone()).negated(), None).is_empty());

    let dropped = ReachabilityQuery::new([ForwardingAction::Drop], exact).with_ingress("a", DEFAULT_VRF);
    assert!(solve(&dropped, None).is_empty());
    assert_eq!(solve(&dropped.negated(), None).len(), 1);
}

#[test]
fn unrouted_destination_is_a_no_route_drop() {
    init_tracing();
    let query = ReachabilityQuery::new([ForwardingAction::DropNoRoute], prefix_hs("8.8.8.0/24"))
        .with_ingress("a", DEFAULT_VRF);
    let flows = solve(&query, None);
    assert_eq!(flows.len(), 1);
    let flow = flows.iter().next().unwrap();
    assert!(nodal_ir::Prefix::new("8.8.8.0".parse().unwrap(), 24).contains(flow.dst_ip));
}

#[test]
fn multipath_inconsistency_needs_both_branches() {
    init_tracing();
    let (configs, dp) = ecmp_with_null_branch();
    let synth = layer(&configs, &dp);
    let jobs = multipath_jobs(&synth, &HeaderSpace::any(), "multipath").unwrap();
    assert_eq!(jobs.len(), 2);
    let batch = run_flow_jobs(&settings(), jobs, "multipath").unwrap();
    assert_eq!(batch.flows.len(), 1);
    let flow = batch.flows.iter().next().unwrap();
    assert_eq!(flow.ingress_node, "a");

    let replayer = DataPlaneReplayer::new(&configs, &dp);
    let interpreter = FlowInterpreter::new().with_replayer(Environment::Base, &replayer);
    let mut history = FlowHistory::new();
    interpreter
        .process_flows(&batch.flows, &EnvironmentContext::of(Environment::Base, "multipath"), &mut history)
        .unwrap();
    let dispositions: BTreeSet<FlowDisposition> = history
        .traces_for(flow, "base")
        .unwrap()
        .iter()
        .map(|t| t.disposition)
        .collect();
    assert_eq!(
        dispositions,
        [FlowDisposition::Accepted, FlowDisposition::NullRouted].into()
    );
}

#[test]
fn reduced_reachability_replays_differently() {
    init_tracing();
    let (base_configs, base_dp) = two_node(false);
    let (delta_configs, delta_dp) = two_node(true);
    let base = layer(&base_configs, &base_dp);
    let delta = layer(&delta_configs, &delta_dp);

    let jobs = reduced_reachability_jobs(&base, &delta, None, &HeaderSpace::any(), "diff").unwrap();
    assert_eq!(jobs.len(), 2);
    let batch = run_flow_jobs(&settings(), jobs, "reduced reachability").unwrap();
    assert_eq!(batch.flows.len(), 1);
    let flow = batch.flows.iter().next().unwrap();
    assert_eq!(flow.ingress_node, "a");
    assert_eq!(flow.dst_ip, "2.2.2.2".parse::<Ip>().unwrap());

    let base_replayer = DataPlaneReplayer::new(&base_configs, &base_dp);
    let delta_replayer = DataPlaneReplayer::new(&delta_configs, &delta_dp);
    let interpreter = FlowInterpreter::new()
        .with_replayer(Environment::Base, &base_replayer)
        .with_replayer(Environment::Delta, &delta_replayer);
    let mut history = FlowHistory::new();
    interpreter
        .process_differential(
            &batch.flows,
            &EnvironmentContext::of(Environment::Base, "diff"),
            &EnvironmentContext::of(Environment::Delta, "diff"),
            &mut history,
        )
        .unwrap();
    assert_eq!(history.differing_flows("base", "delta"), vec![flow]);
    let delta_traces = history.traces_for(flow, "delta").unwrap();
    assert!(delta_traces.iter().all(|t| t.disposition == FlowDisposition::DeniedIn));
}

#[test]
fn local_edge_reachability_reports_the_blocked_link() {
    init_tracing();
    let (base_configs, base_dp) = two_node(false);
    let (delta_configs, delta_dp) = two_node(true);
    let base = layer(&base_configs, &base_dp);
    let delta = layer(&delta_configs, &delta_dp);

    let jobs = local_edge_reachability_jobs(&base, &delta, None, &HeaderSpace::any(), "edge").unwrap();
    assert_eq!(jobs.len(), 2);
    let batch = run_flow_jobs(&settings(), jobs, "local edge reachability").unwrap();
    assert_eq!(batch.flows.len(), 1);
    let flow = batch.flows.iter().next().unwrap();
    assert_eq!(flow.ingress_node, "a");
    assert_eq!(flow.dst_ip, "2.2.2.2".parse::<Ip>().unwrap());
}

#[test]
fn unchanged_environments_have_no_reduced_reachability() {
    init_tracing();
    let (configs, dp) = two_node(false);
    let base = layer(&configs, &dp);
    let delta = layer(&configs, &dp);
    let jobs = reduced_reachability_jobs(&base, &delta, None, &HeaderSpace::any(), "same").unwrap();
    let batch = run_flow_jobs(&settings(), jobs, "reduced reachability").unwrap();
    assert!(batch.flows.is_empty());
    assert!(batch.summary.is_complete());
}

#[test]
fn solved_jobs_leave_an_smt_script_behind() {
    init_tracing();
    let tmp = tempfile::TempDir::new().unwrap();
    let dump_dir = tmp.path().join("scripts");
    let (configs, dp) = two_node(false);
    let synth = layer(&configs, &dp);
    let jobs = reachability_jobs(&synth, &accepted_at_b(HeaderSpace::any()), None, "base").unwrap();
    assert_eq!(jobs.len(), 1);
    let dumping = EngineSettings {
        dump_smt: Some(dump_dir.clone()),
        ..settings()
    };
    let batch = run_flow_jobs(&dumping, jobs, "dumped reachability").unwrap();
    assert_eq!(batch.flows.len(), 1);

    let scripts: Vec<_> = std::fs::read_dir(&dump_dir)
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .collect();
    assert_eq!(scripts.len(), 1);
    assert_eq!(scripts[0].extension().and_then(|e| e.to_str()), Some("smt2"));
    let script = std::fs::read_to_string(&scripts[0]).unwrap();
    assert!(script.contains("(declare-const dst_ip Int)"));
    assert!(script.contains("(declare-const tcp_syn Bool)"));
    assert!(script.trim_end().ends_with("(exit)"));
}
