//! Dead ACL line detection.
//!
//! Phase one asks, line by line, whether any packet reaches and matches the
//! line. Phase two explains each unreachable line by searching the earlier
//! reachable lines, in order, for the first one matching everything it
//! matches. This avoids comparing every pair of lines directly.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use nodal_ir::{Configuration, IpAccessList};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::EngineError;
use crate::executor::{keep_partial, run_jobs, BatchAnswerElement};
use crate::job::{NodFirstUnsatJob, NodSatJob};
use crate::query::{AclReachabilityQuery, EarliestMoreGeneralQuery, QuerySynthesizer};
use crate::settings::EngineSettings;
use crate::synthesizer::Synthesizer;

/// Identity of one ACL line.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AclLine {
    pub hostname: String,
    pub acl_name: String,
    pub line: usize,
}

impl AclLine {
    pub fn new(hostname: impl Into<String>, acl_name: impl Into<String>, line: usize) -> Self {
        Self {
            hostname: hostname.into(),
            acl_name: acl_name.into(),
            line,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AclReachabilityEntry {
    pub index: usize,
    pub name: String,
    pub reachable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub earliest_more_general_line_index: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub earliest_more_general_line_name: Option<String>,
    /// The covering line disposes of the packets differently.
    #[serde(default)]
    pub different_action: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AclLinesAnswerElement {
    /// hostname → ACL name → classified lines, in line order.
    pub acls: BTreeMap<String, BTreeMap<String, Vec<AclReachabilityEntry>>>,
    pub total_lines: usize,
    pub unreachable_lines: usize,
    pub acls_with_unreachable_lines: usize,
    pub warnings: Vec<String>,
    /// A job failed under `halt_on_job_failure`; only lines solved before
    /// that are classified.
    #[serde(default)]
    pub aborted: bool,
    pub jobs: BatchAnswerElement,
}

impl AclLinesAnswerElement {
    pub fn entry(&self, hostname: &str, acl: &str, line: usize) -> Option<&AclReachabilityEntry> {
        self.acls.get(hostname)?.get(acl)?.iter().find(|e| e.index == line)
    }

    /// `(hostname, acl, entry)` for every unreachable line.
    pub fn unreachable(&self) -> impl Iterator<Item = (&str, &str, &AclReachabilityEntry)> {
        self.acls.iter().flat_map(|(host, acls)| {
            acls.iter().flat_map(move |(acl, entries)| {
                entries
                    .iter()
                    .filter(|e| !e.reachable)
                    .map(move |e| (host.as_str(), acl.as_str(), e))
            })
        })
    }
}

/// Classify every line of the ACLs selected by `select(hostname, acl)`.
///
/// Each host is compiled on its own, without a data plane. Lines whose jobs
/// fail are left out of the answer and reported as warnings. Under
/// `halt_on_job_failure` the lines solved before the halt are still
/// classified and the answer is flagged `aborted`.
pub fn analyze_acl_lines(
    configurations: &BTreeMap<String, Configuration>,
    select: impl Fn(&str, &str) -> bool,
    settings: &EngineSettings,
) -> Result<AclLinesAnswerElement, EngineError> {
    let mut answer = AclLinesAnswerElement::default();
    let mut layers: BTreeMap<String, Arc<Synthesizer>> = BTreeMap::new();
    let mut jobs = Vec::new();

    for (hostname, config) in configurations {
        let single: BTreeMap<String, Configuration> = [(hostname.clone(), config.clone())].into();
        let layer = Arc::new(Synthesizer::control_plane(&single, settings.simplify)?);
        answer.warnings.extend(layer.warnings().iter().cloned());
        for acl in config.ip_access_lists.values() {
            if !select(hostname, &acl.name) {
                continue;
            }
            if acl.lines.is_empty() {
                let warning = format!("ACL '{hostname}:{}' contains no lines", acl.name);
                warn!("{warning}");
                answer.warnings.push(warning);
                continue;
            }
            for line in 0..acl.lines.len() {
                let query = AclReachabilityQuery::new(hostname.as_str(), acl.name.as_str(), line);
                jobs.push(NodSatJob::new(
                    Arc::clone(&layer),
                    QuerySynthesizer::AclReachability(query),
                    AclLine::new(hostname.as_str(), acl.name.as_str(), line),
                )?);
            }
        }
        layers.insert(hostname.clone(), layer);
    }

    let mut reachability: BTreeMap<AclLine, bool> = BTreeMap::new();
    let outcome = run_jobs(settings, jobs, &mut reachability, &mut answer.jobs, "acl line reachability");
    answer.aborted = keep_partial(outcome, &mut answer.jobs)?.aborted;

    let mut shadow_jobs = Vec::new();
    for (line, reachable) in &reachability {
        if *reachable || answer.aborted {
            continue;
        }
        let Some(layer) = layers.get(&line.hostname) else {
            continue;
        };
        let valid = layer
            .acl(&line.hostname, &line.acl_name)
            .and_then(|acl| acl.lines.get(line.line))
            .is_some_and(|l| l.valid);
        if !valid {
            continue;
        }
        let candidates: Vec<usize> = (0..line.line)
            .filter(|earlier| {
                reachability.get(&AclLine::new(line.hostname.as_str(), line.acl_name.as_str(), *earlier))
                    == Some(&true)
            })
            .collect();
        if candidates.is_empty() {
            continue;
        }
        let query = EarliestMoreGeneralQuery::new(
            line.hostname.as_str(),
            line.acl_name.as_str(),
            line.line,
            candidates,
        );
        shadow_jobs.push(NodFirstUnsatJob::new(Arc::clone(layer), query, line.clone())?);
    }

    let mut covering: BTreeMap<AclLine, Option<usize>> = BTreeMap::new();
    let outcome = run_jobs(settings, shadow_jobs, &mut covering, &mut answer.jobs, "earliest more general line");
    answer.aborted |= keep_partial(outcome, &mut answer.jobs)?.aborted;

    classify(configurations, &reachability, &covering, &mut answer);
    for record in answer.jobs.failures() {
        answer.warnings.push(format!("ACL line job '{}' failed", record.job));
    }
    answer.warnings.extend(answer.jobs.warnings.iter().cloned());
    info!(
        lines = answer.total_lines,
        unreachable = answer.unreachable_lines,
        acls_with_unreachable_lines = answer.acls_with_unreachable_lines,
        "ACL line analysis finished"
    );
    Ok(answer)
}

fn classify(
    configurations: &BTreeMap<String, Configuration>,
    reachability: &BTreeMap<AclLine, bool>,
    covering: &BTreeMap<AclLine, Option<usize>>,
    answer: &mut AclLinesAnswerElement,
) {
    let mut dirty: BTreeSet<(&str, &str)> = BTreeSet::new();
    for (line, reachable) in reachability {
        let Some(acl) = configurations
            .get(&line.hostname)
            .and_then(|c| c.ip_access_lists.get(&line.acl_name))
        else {
            continue;
        };
        let Some(entry) = entry_for(acl, line, *reachable, covering) else {
            continue;
        };
        if !entry.reachable {
            debug!(
                hostname = %line.hostname,
                acl = %line.acl_name,
                line = line.line,
                name = %entry.name,
                covered_by = ?entry.earliest_more_general_line_index,
                "Unreachable line"
            );
            answer.unreachable_lines += 1;
            dirty.insert((line.hostname.as_str(), line.acl_name.as_str()));
        }
        answer.total_lines += 1;
        answer
            .acls
            .entry(line.hostname.clone())
            .or_default()
            .entry(line.acl_name.clone())
            .or_default()
            .push(entry);
    }
    answer.acls_with_unreachable_lines = dirty.len();
}

fn entry_for(
    acl: &IpAccessList,
    line: &AclLine,
    reachable: bool,
    covering: &BTreeMap<AclLine, Option<usize>>,
) -> Option<AclReachabilityEntry> {
    let target = acl.lines.get(line.line)?;
    let mut entry = AclReachabilityEntry {
        index: line.line,
        name: target.name.clone(),
        reachable,
        earliest_more_general_line_index: None,
        earliest_more_general_line_name: None,
        different_action: false,
    };
    if let Some(general) = covering.get(line).copied().flatten().and_then(|i| acl.lines.get(i).map(|l| (i, l))) {
        entry.earliest_more_general_line_index = Some(general.0);
        entry.earliest_more_general_line_name = Some(general.1.name.clone());
        entry.different_action = general.1.action != target.action;
    }
    Some(entry)
}
