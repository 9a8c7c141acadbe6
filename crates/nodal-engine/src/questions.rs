//! Job builders for the standard reachability questions, and the runner
//! collecting their flows.
//!
//! Differential questions compose three layers: the property in the base
//! environment, its negation in the delta environment, and a blacklist
//! evaluated against the base so that the failed elements are never the
//! destination of a witness.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use nodal_ir::{Edge, Flow, ForwardingAction, HeaderSpace};
use tracing::{debug, info};

use crate::error::EngineError;
use crate::executor::{keep_partial, run_jobs, BatchAnswerElement, BatchJob, BatchSummary};
use crate::job::NodJob;
use crate::query::{BlacklistQuery, MultipathQuery, QuerySynthesizer, ReachEdgeQuery, ReachabilityQuery};
use crate::settings::EngineSettings;
use crate::synthesizer::Synthesizer;

/// Flows found by a batch of flow jobs, with the batch bookkeeping.
#[derive(Debug, Clone)]
pub struct FlowBatch {
    pub flows: BTreeSet<Flow>,
    pub answer: BatchAnswerElement,
    pub summary: BatchSummary,
}

/// One job per ingress point: those named by the query, or every
/// `(node, vrf)` of the layer when it names none.
pub fn reachability_jobs(
    layer: &Arc<Synthesizer>,
    query: &ReachabilityQuery,
    blacklist: Option<&BlacklistQuery>,
    tag: &str,
) -> Result<Vec<NodJob>, EngineError> {
    let ingress: BTreeSet<(String, String)> = if query.ingress_nodes.is_empty() {
        layer.ingress_points()
    } else {
        query
            .ingress_nodes
            .iter()
            .flat_map(|(node, vrfs)| vrfs.iter().map(move |vrf| (node.clone(), vrf.clone())))
            .collect()
    };
    let mut queries = vec![QuerySynthesizer::Reachability(query.clone())];
    if let Some(blacklist) = blacklist.filter(|b| !b.is_empty()) {
        queries.push(QuerySynthesizer::Blacklist(blacklist.clone()));
    }
    let jobs = ingress
        .into_iter()
        .map(|point| NodJob::new(vec![Arc::clone(layer)], queries.clone(), [point].into(), tag))
        .collect::<Result<Vec<_>, _>>()?;
    debug!(jobs = jobs.len(), tag, "Built reachability jobs");
    Ok(jobs)
}

/// One job per `(node, vrf)` looking for packets both accepted and dropped.
pub fn multipath_jobs(
    layer: &Arc<Synthesizer>,
    header_space: &HeaderSpace,
    tag: &str,
) -> Result<Vec<NodJob>, EngineError> {
    let jobs = layer
        .ingress_points()
        .into_iter()
        .map(|(node, vrf)| {
            let query = MultipathQuery::new(node.as_str(), vrf.as_str(), header_space.clone());
            NodJob::new(
                vec![Arc::clone(layer)],
                vec![QuerySynthesizer::MultipathInconsistency(query)],
                [(node, vrf)].into(),
                tag,
            )
        })
        .collect::<Result<Vec<_>, _>>()?;
    debug!(jobs = jobs.len(), tag, "Built multipath jobs");
    Ok(jobs)
}

/// Packets accepted in `base` but not in `delta`, from every ingress point
/// present in both.
pub fn reduced_reachability_jobs(
    base: &Arc<Synthesizer>,
    delta: &Arc<Synthesizer>,
    blacklist: Option<&BlacklistQuery>,
    header_space: &HeaderSpace,
    tag: &str,
) -> Result<Vec<NodJob>, EngineError> {
    let blacklist = blacklist.cloned().unwrap_or_default();
    let layers = vec![Arc::clone(base), Arc::clone(delta), Arc::clone(base)];
    let mut jobs = Vec::new();
    for (node, vrf) in base.ingress_points() {
        if !delta.has_ingress(&node, &vrf) {
            continue;
        }
        let accepted = ReachabilityQuery::new([ForwardingAction::Accept], header_space.clone())
            .with_ingress(node.as_str(), vrf.as_str());
        let not_accepted = ReachabilityQuery::new([ForwardingAction::Accept], HeaderSpace::any())
            .with_ingress(node.as_str(), vrf.as_str())
            .negated();
        jobs.push(NodJob::new(
            layers.clone(),
            vec![
                QuerySynthesizer::Reachability(accepted),
                QuerySynthesizer::Reachability(not_accepted),
                QuerySynthesizer::Blacklist(blacklist.clone()),
            ],
            [(node, vrf)].into(),
            tag,
        )?);
    }
    debug!(jobs = jobs.len(), tag, "Built reduced reachability jobs");
    Ok(jobs)
}

/// Packets leaving the tail of an edge, crossing it and then accepted,
/// which stop doing so between environments.
///
/// Every edge of `delta` yields a three-layer job comparing both sides.
/// Every edge present only in `base` whose tail interface survives in
/// `delta` yields a two-layer job that needs the edge in base alone.
pub fn local_edge_reachability_jobs(
    base: &Arc<Synthesizer>,
    delta: &Arc<Synthesizer>,
    blacklist: Option<&BlacklistQuery>,
    header_space: &HeaderSpace,
    tag: &str,
) -> Result<Vec<NodJob>, EngineError> {
    let blacklist = QuerySynthesizer::Blacklist(blacklist.cloned().unwrap_or_default());
    let mut jobs = Vec::new();

    for edge in delta.edges() {
        let Some(vrf) = tail_vrf(delta, edge) else {
            continue;
        };
        if base.node(&edge.node1).is_none() || base.node(&edge.node2).is_none() {
            debug!(%edge, "Edge endpoints missing from base, skipping");
            continue;
        }
        let reach = ReachEdgeQuery::new(edge.node1.as_str(), vrf.as_str(), edge.clone())
            .with_header_space(header_space.clone())
            .requiring_acceptance();
        let no_reach = ReachEdgeQuery::new(edge.node1.as_str(), vrf.as_str(), edge.clone())
            .requiring_acceptance()
            .negated();
        jobs.push(NodJob::new(
            vec![Arc::clone(base), Arc::clone(delta), Arc::clone(base)],
            vec![
                QuerySynthesizer::ReachEdge(reach),
                QuerySynthesizer::ReachEdge(no_reach),
                blacklist.clone(),
            ],
            [(edge.node1.clone(), vrf)].into(),
            tag,
        )?);
    }

    let missing: Vec<&Edge> = base
        .edges()
        .iter()
        .filter(|e| delta.edge_index(e).is_none())
        .collect();
    for edge in missing {
        // The tail interface must survive for the job to have an ingress.
        let Some(vrf) = tail_vrf(delta, edge) else {
            continue;
        };
        let reach = ReachEdgeQuery::new(edge.node1.as_str(), vrf.as_str(), edge.clone())
            .with_header_space(header_space.clone())
            .requiring_acceptance();
        jobs.push(NodJob::new(
            vec![Arc::clone(base), Arc::clone(base)],
            vec![QuerySynthesizer::ReachEdge(reach), blacklist.clone()],
            [(edge.node1.clone(), vrf)].into(),
            tag,
        )?);
    }
    debug!(jobs = jobs.len(), tag, "Built local edge reachability jobs");
    Ok(jobs)
}

fn tail_vrf(layer: &Synthesizer, edge: &Edge) -> Option<String> {
    layer
        .node(&edge.node1)?
        .configuration
        .interfaces
        .get(&edge.int1)
        .map(|i| i.vrf.clone())
}

/// Run `jobs` and union their flows.
///
/// A batch stopped by `halt_on_job_failure` still returns the flows found
/// so far, with `summary.aborted` set.
pub fn run_flow_jobs<J>(
    settings: &EngineSettings,
    jobs: Vec<J>,
    description: &str,
) -> Result<FlowBatch, EngineError>
where
    J: BatchJob<Output = BTreeSet<Flow>>,
{
    let mut flows = BTreeSet::new();
    let mut answer = BatchAnswerElement::default();
    let outcome = run_jobs(settings, jobs, &mut flows, &mut answer, description);
    let summary = keep_partial(outcome, &mut answer)?;
    let mut tags: BTreeMap<&str, usize> = BTreeMap::new();
    for flow in &flows {
        *tags.entry(flow.tag.as_str()).or_default() += 1;
    }
    info!(description, flows = flows.len(), ?tags, "Collected flows");
    Ok(FlowBatch {
        flows,
        answer,
        summary,
    })
}
