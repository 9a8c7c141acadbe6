//! Units of solver work and the decoding of their answers.
//!
//! Every job builds its own solver on the worker thread that executes it; the
//! compiled layers are shared read-only behind `Arc`.

use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use nodal_ir::Flow;
use nodal_smt::backends::z3_backend::Z3Solver;
use nodal_smt::encoding::Encoding;
use nodal_smt::solver::{Model, SatResult, SmtSolver};
use nodal_smt::terms::{SmtSort, SmtTerm};
use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::executor::BatchJob;
use crate::query::{
    compose, validate_composition, ComposedQuery, EarliestMoreGeneralQuery, QueryError,
    QuerySynthesizer,
};
use crate::settings::EngineSettings;
use crate::synthesizer::header::{flow_from_model, model_vars, CONCRETIZATION_ORDER};
use crate::synthesizer::Synthesizer;

/// Per-job failure. Recorded by the executor; never mistaken for UNSAT.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum JobError {
    #[error("{job}: solver exceeded the {limit_ms} ms limit")]
    Timeout { job: String, limit_ms: u64 },
    #[error("{job}: solver failure: {message}")]
    Solver { job: String, message: String },
    #[error("{job}: cannot decode model: {message}")]
    Decode { job: String, message: String },
    #[error("{job}: {source}")]
    Query {
        job: String,
        #[source]
        source: QueryError,
    },
}

impl JobError {
    pub fn job(&self) -> &str {
        match self {
            JobError::Timeout { job, .. }
            | JobError::Solver { job, .. }
            | JobError::Decode { job, .. }
            | JobError::Query { job, .. } => job,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, JobError::Timeout { .. })
    }
}

/// Solver work that is generic over the backend.
trait Solve {
    type Output;

    fn solve<S: SmtSolver>(
        &self,
        solver: &mut S,
        name: &str,
        settings: &EngineSettings,
        limit_ms: u64,
    ) -> Result<Self::Output, JobError>;
}

/// Run `task` against a fresh Z3 solver bounded by `limit_ms`.
fn with_backend<T: Solve>(
    task: &T,
    name: &str,
    settings: &EngineSettings,
    limit_ms: u64,
) -> Result<T::Output, JobError> {
    let mut solver = Z3Solver::with_timeout_ms(limit_ms);
    task.solve(&mut solver, name, settings, limit_ms)
}

fn backend(job: &str, error: impl fmt::Display) -> JobError {
    JobError::Solver {
        job: job.to_string(),
        message: error.to_string(),
    }
}

fn decode(job: &str, message: impl Into<String>) -> JobError {
    JobError::Decode {
        job: job.to_string(),
        message: message.into(),
    }
}

/// Map an `Unknown` verdict to the matching job failure.
fn unknown(job: &str, reason: String, limit_ms: u64) -> JobError {
    if SatResult::Unknown(reason.clone()).is_timeout() {
        return JobError::Timeout {
            job: job.to_string(),
            limit_ms,
        };
    }
    backend(job, format!("solver returned unknown: {reason}"))
}

fn check_sat<S: SmtSolver>(solver: &mut S, job: &str, limit_ms: u64) -> Result<bool, JobError> {
    match solver.check_sat().map_err(|e| backend(job, e))? {
        SatResult::Sat => Ok(true),
        SatResult::Unsat => Ok(false),
        SatResult::Unknown(reason) => Err(unknown(job, reason, limit_ms)),
    }
}

/// `Some(model)` over the header variables when SAT, `None` when UNSAT.
fn check_model<S: SmtSolver>(
    solver: &mut S,
    job: &str,
    limit_ms: u64,
) -> Result<Option<Model>, JobError> {
    let vars = model_vars();
    let refs: Vec<(&str, &SmtSort)> = vars.iter().map(|(name, sort)| (*name, sort)).collect();
    let (result, model) = solver
        .check_sat_with_model(&refs)
        .map_err(|e| backend(job, e))?;
    match result {
        SatResult::Sat => model
            .map(Some)
            .ok_or_else(|| decode(job, "solver reported SAT without a model")),
        SatResult::Unsat => Ok(None),
        SatResult::Unknown(reason) => Err(unknown(job, reason, limit_ms)),
    }
}

fn default_value(name: &str, sort: SmtSort) -> SmtTerm {
    match sort {
        SmtSort::Int => SmtTerm::var(name).eq(SmtTerm::int(0)),
        SmtSort::Bool => SmtTerm::var(name).not(),
    }
}

fn model_value(model: &Model, name: &str, sort: SmtSort) -> Option<SmtTerm> {
    match sort {
        SmtSort::Int => model.get_int(name).map(|v| SmtTerm::var(name).eq(SmtTerm::int(v))),
        SmtSort::Bool => model.get_bool(name).map(|b| {
            if b {
                SmtTerm::var(name)
            } else {
                SmtTerm::var(name).not()
            }
        }),
    }
}

/// Fill under-constrained header fields reproducibly.
///
/// Fields are visited in [`CONCRETIZATION_ORDER`]; each is pinned to zero (or
/// false) when that stays satisfiable and to the current model's value
/// otherwise. The solver's assertion stack is restored before returning.
fn concretize<S: SmtSolver>(
    solver: &mut S,
    mut model: Model,
    job: &str,
    limit_ms: u64,
) -> Result<Model, JobError> {
    let mut scopes = 0usize;
    for (name, sort) in CONCRETIZATION_ORDER {
        let default = default_value(name, sort);
        solver.push().map_err(|e| backend(job, e))?;
        scopes += 1;
        if model.eval_bool(&default) == Some(true) {
            solver.assert(&default).map_err(|e| backend(job, e))?;
            continue;
        }
        solver.assert(&default).map_err(|e| backend(job, e))?;
        match check_model(solver, job, limit_ms)? {
            Some(next) => {
                trace!(field = name, "Pinned field to its default");
                model = next;
            }
            None => {
                let current = model_value(&model, name, sort)
                    .ok_or_else(|| decode(job, format!("model has no value for '{name}'")))?;
                solver.pop().map_err(|e| backend(job, e))?;
                solver.push().map_err(|e| backend(job, e))?;
                solver.assert(&current).map_err(|e| backend(job, e))?;
            }
        }
    }
    for _ in 0..scopes {
        solver.pop().map_err(|e| backend(job, e))?;
    }
    Ok(model)
}

fn compose_for(
    job: &str,
    layers: &[Arc<Synthesizer>],
    queries: &[QuerySynthesizer],
    settings: &EngineSettings,
) -> Result<ComposedQuery, JobError> {
    let composed = compose(layers, queries, settings.simplify).map_err(|source| JobError::Query {
        job: job.to_string(),
        source,
    })?;
    debug!(
        job,
        declarations = composed.encoding.declarations().len(),
        assertions = composed.encoding.assertion_unique(),
        "Encoded job"
    );
    if let Some(dir) = &settings.dump_smt {
        dump_script(dir, job, &composed.encoding);
    }
    Ok(composed)
}

/// Best effort: a failed dump is logged, never fatal.
fn dump_script(dir: &Path, job: &str, encoding: &Encoding) {
    let file: String = job
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    let path = dir.join(format!("{file}.smt2"));
    let written = std::fs::create_dir_all(dir)
        .and_then(|_| std::fs::write(&path, encoding.to_smt2_script()));
    if let Err(e) = written {
        warn!(job, path = %path.display(), error = %e, "Could not dump SMT script");
    }
}

/// Finds one concrete flow per ingress point of `scope`.
#[derive(Debug, Clone)]
pub struct NodJob {
    layers: Vec<Arc<Synthesizer>>,
    queries: Vec<QuerySynthesizer>,
    scope: BTreeSet<(String, String)>,
    tag: String,
    timeout_ms: Option<u64>,
}

impl NodJob {
    /// Validates the composition and the scope; nothing is solved here.
    pub fn new(
        layers: Vec<Arc<Synthesizer>>,
        queries: Vec<QuerySynthesizer>,
        scope: BTreeSet<(String, String)>,
        tag: impl Into<String>,
    ) -> Result<Self, QueryError> {
        validate_composition(&layers, &queries)?;
        if scope.is_empty() {
            return Err(QueryError::Empty("scope"));
        }
        for (node, _) in &scope {
            if layers.iter().any(|l| l.node_index(node).is_none()) {
                return Err(QueryError::UnknownNode(node.clone()));
            }
        }
        Ok(Self {
            layers,
            queries,
            scope,
            tag: tag.into(),
            timeout_ms: None,
        })
    }

    /// Override the batch-wide per-job limit.
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn scope(&self) -> &BTreeSet<(String, String)> {
        &self.scope
    }

    pub fn queries(&self) -> &[QuerySynthesizer] {
        &self.queries
    }
}

impl Solve for NodJob {
    type Output = BTreeSet<Flow>;

    fn solve<S: SmtSolver>(
        &self,
        solver: &mut S,
        name: &str,
        settings: &EngineSettings,
        limit_ms: u64,
    ) -> Result<BTreeSet<Flow>, JobError> {
        let composed = compose_for(name, &self.layers, &self.queries, settings)?;
        composed.encoding.apply(solver).map_err(|e| backend(name, e))?;

        let mut flows = BTreeSet::new();
        for (node, vrf) in &self.scope {
            solver.push().map_err(|e| backend(name, e))?;
            for origins in &composed.origins {
                for (host, var) in origins {
                    let pin = if host == node {
                        SmtTerm::var(var.as_str())
                    } else {
                        SmtTerm::var(var.as_str()).not()
                    };
                    solver.assert(&pin).map_err(|e| backend(name, e))?;
                }
            }
            if let Some(model) = check_model(solver, name, limit_ms)? {
                let model = concretize(solver, model, name, limit_ms)?;
                let flow = flow_from_model(&model, node, vrf, &self.tag).map_err(|m| decode(name, m))?;
                debug!(job = name, %flow, "Found flow");
                flows.insert(flow);
            }
            solver.pop().map_err(|e| backend(name, e))?;
        }
        Ok(flows)
    }
}

impl BatchJob for NodJob {
    type Output = BTreeSet<Flow>;

    fn execute(&self, settings: &EngineSettings) -> Result<BTreeSet<Flow>, JobError> {
        let name = self.describe();
        with_backend(self, &name, settings, self.timeout_ms(settings))
    }

    fn describe(&self) -> String {
        let queries: Vec<&str> = self.queries.iter().map(QuerySynthesizer::name).collect();
        let scope: Vec<String> = self.scope.iter().map(|(n, v)| format!("{n}/{v}")).collect();
        format!("{}[{}]@{}", queries.join("+"), self.tag, scope.join(","))
    }

    fn timeout_ms(&self, settings: &EngineSettings) -> u64 {
        self.timeout_ms.unwrap_or(settings.job_timeout_ms)
    }
}

/// Whether a single query is satisfiable, reported under `key`.
#[derive(Debug, Clone)]
pub struct NodSatJob<K> {
    layer: Arc<Synthesizer>,
    query: QuerySynthesizer,
    key: K,
    timeout_ms: Option<u64>,
}

impl<K> NodSatJob<K> {
    pub fn new(layer: Arc<Synthesizer>, query: QuerySynthesizer, key: K) -> Result<Self, QueryError> {
        query.validate(&layer)?;
        Ok(Self {
            layer,
            query,
            key,
            timeout_ms: None,
        })
    }

    /// Override the batch-wide per-job limit.
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn key(&self) -> &K {
        &self.key
    }
}

impl<K: Clone> Solve for NodSatJob<K> {
    type Output = (K, bool);

    fn solve<S: SmtSolver>(
        &self,
        solver: &mut S,
        name: &str,
        settings: &EngineSettings,
        limit_ms: u64,
    ) -> Result<(K, bool), JobError> {
        let composed = compose_for(
            name,
            std::slice::from_ref(&self.layer),
            std::slice::from_ref(&self.query),
            settings,
        )?;
        composed.encoding.apply(solver).map_err(|e| backend(name, e))?;
        Ok((self.key.clone(), check_sat(solver, name, limit_ms)?))
    }
}

impl<K> BatchJob for NodSatJob<K>
where
    K: Clone + fmt::Debug + Send + Sync,
{
    type Output = (K, bool);

    fn execute(&self, settings: &EngineSettings) -> Result<(K, bool), JobError> {
        let name = self.describe();
        with_backend(self, &name, settings, self.timeout_ms(settings))
    }

    fn describe(&self) -> String {
        format!("{}:{:?}", self.query.name(), self.key)
    }

    fn timeout_ms(&self, settings: &EngineSettings) -> u64 {
        self.timeout_ms.unwrap_or(settings.job_timeout_ms)
    }
}

/// Index of the first candidate line whose alternative is UNSAT, reported under
/// `key`.
#[derive(Debug, Clone)]
pub struct NodFirstUnsatJob<K> {
    layer: Arc<Synthesizer>,
    query: EarliestMoreGeneralQuery,
    key: K,
    timeout_ms: Option<u64>,
}

impl<K> NodFirstUnsatJob<K> {
    pub fn new(layer: Arc<Synthesizer>, query: EarliestMoreGeneralQuery, key: K) -> Result<Self, QueryError> {
        query.validate(&layer)?;
        Ok(Self {
            layer,
            query,
            key,
            timeout_ms: None,
        })
    }

    /// Override the batch-wide per-job limit.
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn key(&self) -> &K {
        &self.key
    }
}

impl<K: Clone> Solve for NodFirstUnsatJob<K> {
    type Output = (K, Option<usize>);

    fn solve<S: SmtSolver>(
        &self,
        solver: &mut S,
        name: &str,
        settings: &EngineSettings,
        limit_ms: u64,
    ) -> Result<(K, Option<usize>), JobError> {
        let query = QuerySynthesizer::EarliestMoreGeneralReachableLine(self.query.clone());
        let composed = compose_for(
            name,
            std::slice::from_ref(&self.layer),
            std::slice::from_ref(&query),
            settings,
        )?;
        composed.encoding.apply(solver).map_err(|e| backend(name, e))?;
        for (candidate, alternative) in self.query.candidates.iter().zip(&composed.alternatives) {
            solver.push().map_err(|e| backend(name, e))?;
            solver.assert(alternative).map_err(|e| backend(name, e))?;
            let sat = check_sat(solver, name, limit_ms)?;
            solver.pop().map_err(|e| backend(name, e))?;
            if !sat {
                return Ok((self.key.clone(), Some(*candidate)));
            }
        }
        Ok((self.key.clone(), None))
    }
}

impl<K> BatchJob for NodFirstUnsatJob<K>
where
    K: Clone + fmt::Debug + Send + Sync,
{
    type Output = (K, Option<usize>);

    fn execute(&self, settings: &EngineSettings) -> Result<(K, Option<usize>), JobError> {
        let name = self.describe();
        with_backend(self, &name, settings, self.timeout_ms(settings))
    }

    fn describe(&self) -> String {
        format!("earliest-more-general:{:?}", self.key)
    }

    fn timeout_ms(&self, settings: &EngineSettings) -> u64 {
        self.timeout_ms.unwrap_or(settings.job_timeout_ms)
    }
}
