mod common;

use common::{configs, init_tracing, settings, shadowed_firewall};
use nodal_engine::executor::JobStatus;
use nodal_engine::{analyze_acl_lines, EngineSettings};

#[test]
fn shadowed_lines_point_at_their_earliest_cover() {
    init_tracing();
    let answer = analyze_acl_lines(&configs(vec![shadowed_firewall()]), |_, _| true, &settings()).unwrap();

    let line = |acl: &str, i: usize| answer.entry("fw", acl, i).unwrap().clone();
    assert!(line("edge-in", 0).reachable);

    let deny_ten = line("edge-in", 1);
    assert!(!deny_ten.reachable);
    assert_eq!(deny_ten.earliest_more_general_line_index, Some(0));
    assert_eq!(deny_ten.earliest_more_general_line_name.as_deref(), Some("permit-ten"));
    assert!(deny_ten.different_action);

    let deny_subnet = line("edge-in", 2);
    assert!(!deny_subnet.reachable);
    assert_eq!(deny_subnet.earliest_more_general_line_index, Some(0));

    assert!(line("edge-in", 3).reachable);

    let deny_all = line("edge-in", 4);
    assert!(!deny_all.reachable);
    assert_eq!(deny_all.earliest_more_general_line_index, Some(3));
    assert!(deny_all.different_action);

    assert_eq!(answer.total_lines, 7);
    assert_eq!(answer.unreachable_lines, 4);
    assert_eq!(answer.acls_with_unreachable_lines, 2);
    assert!(answer.warnings.iter().any(|w| w.contains("'fw:empty'")));

    let json = serde_json::to_value(&answer).unwrap();
    let reported = &json["acls"]["fw"]["edge-in"][1];
    assert_eq!(reported["earliest_more_general_line_index"], 0);
    assert_eq!(reported["different_action"], true);
    assert!(json["acls"]["fw"]["edge-in"][0].get("earliest_more_general_line_index").is_none());
}

#[test]
fn disabled_line_is_unreachable_without_a_cover() {
    init_tracing();
    let answer = analyze_acl_lines(&configs(vec![shadowed_firewall()]), |_, acl| acl == "mgmt", &settings()).unwrap();
    let odd = answer.entry("fw", "mgmt", 0).unwrap();
    assert!(!odd.reachable);
    assert_eq!(odd.earliest_more_general_line_index, None);
    assert!(answer.entry("fw", "mgmt", 1).unwrap().reachable);
    assert!(answer.entry("fw", "edge-in", 0).is_none());
}

#[test]
fn parallel_shuffled_run_matches_sequential_run() {
    init_tracing();
    let network = configs(vec![shadowed_firewall()]);
    let sequential = analyze_acl_lines(&network, |_, _| true, &settings()).unwrap();
    let parallel_settings = EngineSettings {
        workers: 4,
        shuffle_jobs: true,
        shuffle_seed: Some(7),
        ..settings()
    };
    let parallel = analyze_acl_lines(&network, |_, _| true, &parallel_settings).unwrap();
    assert_eq!(sequential.acls, parallel.acls);
    assert_eq!(sequential.unreachable_lines, parallel.unreachable_lines);
    assert_eq!(sequential.jobs.jobs.len(), parallel.jobs.jobs.len());
    let unreachable: Vec<_> = parallel.unreachable().map(|(h, a, e)| (h, a, e.index)).collect();
    assert_eq!(
        unreachable,
        vec![("fw", "edge-in", 1), ("fw", "edge-in", 2), ("fw", "edge-in", 4), ("fw", "mgmt", 0)]
    );
}

#[test]
fn halting_on_a_failed_line_keeps_the_lines_already_solved() {
    init_tracing();
    let halting = EngineSettings {
        halt_on_job_failure: true,
        job_timeout_ms: 1,
        ..settings()
    };
    let answer = analyze_acl_lines(&configs(vec![shadowed_firewall()]), |_, _| true, &halting).unwrap();

    let failed = answer.jobs.failures().count();
    assert!(failed <= 1);
    assert_eq!(answer.aborted, failed == 1);
    if answer.aborted {
        assert!(answer.warnings.iter().any(|w| w.contains("aborted")));
    }
    let solved_lines = answer
        .jobs
        .jobs
        .iter()
        .filter(|r| r.status == JobStatus::Succeeded && r.job.starts_with("acl-reachability"))
        .count();
    assert_eq!(answer.total_lines, solved_lines);
}
