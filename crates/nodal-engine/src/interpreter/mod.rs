//! Turning solver witnesses into traces.
//!
//! The interpreter owns no forwarding semantics: it hands each flow to the
//! [`FlowReplayer`] of the environment being evaluated and files the traces in
//! a [`FlowHistory`] under that environment's name.

pub mod replay;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use nodal_ir::{Flow, FlowDisposition, FlowTrace};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

pub use replay::DataPlaneReplayer;

/// The data-plane replay capability of one environment.
pub trait FlowReplayer {
    /// One trace per forwarding branch the flow takes.
    fn replay(&self, flow: &Flow) -> Vec<FlowTrace>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Base,
    Delta,
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Environment::Base => f.write_str("base"),
            Environment::Delta => f.write_str("delta"),
        }
    }
}

/// Which environment is being evaluated and which flows belong to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentContext {
    pub environment: Environment,
    /// Name traces are filed under.
    pub name: String,
    /// Only flows carrying this tag are replayed.
    pub tag: String,
}

impl EnvironmentContext {
    pub fn new(environment: Environment, name: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            environment,
            name: name.into(),
            tag: tag.into(),
        }
    }

    /// Named after the environment itself.
    pub fn of(environment: Environment, tag: impl Into<String>) -> Self {
        Self::new(environment, environment.to_string(), tag)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InterpreterError {
    #[error("no replayer registered for the {0} environment")]
    NoReplayer(Environment),
}

/// Flat view of one history cell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowHistoryEntry {
    pub flow: Flow,
    pub environment: String,
    pub traces: Vec<FlowTrace>,
}

/// Traces of each flow, per environment name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlowHistory {
    traces: BTreeMap<Flow, BTreeMap<String, BTreeSet<FlowTrace>>>,
}

impl FlowHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_trace(&mut self, flow: &Flow, environment: &str, trace: FlowTrace) {
        self.traces
            .entry(flow.clone())
            .or_default()
            .entry(environment.to_string())
            .or_default()
            .insert(trace);
    }

    pub fn len(&self) -> usize {
        self.traces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.traces.is_empty()
    }

    pub fn flows(&self) -> impl Iterator<Item = &Flow> {
        self.traces.keys()
    }

    pub fn traces_for(&self, flow: &Flow, environment: &str) -> Option<&BTreeSet<FlowTrace>> {
        self.traces.get(flow)?.get(environment)
    }

    pub fn environments<'a>(&'a self, flow: &Flow) -> impl Iterator<Item = &'a str> + 'a {
        self.traces
            .get(flow)
            .into_iter()
            .flat_map(|envs| envs.keys().map(String::as_str))
    }

    fn dispositions(&self, flow: &Flow, environment: &str) -> Option<BTreeSet<FlowDisposition>> {
        self.traces_for(flow, environment)
            .map(|ts| ts.iter().map(|t| t.disposition).collect())
    }

    /// Flows replayed in both environments whose sets of dispositions differ.
    pub fn differing_flows<'a>(&'a self, left: &str, right: &str) -> Vec<&'a Flow> {
        self.traces
            .keys()
            .filter(|flow| match (self.dispositions(flow, left), self.dispositions(flow, right)) {
                (Some(l), Some(r)) => l != r,
                _ => false,
            })
            .collect()
    }

    pub fn entries(&self) -> Vec<FlowHistoryEntry> {
        self.traces
            .iter()
            .flat_map(|(flow, envs)| {
                envs.iter().map(move |(env, traces)| FlowHistoryEntry {
                    flow: flow.clone(),
                    environment: env.clone(),
                    traces: traces.iter().cloned().collect(),
                })
            })
            .collect()
    }
}

/// Routes flows to the replayer of the environment being evaluated.
#[derive(Default)]
pub struct FlowInterpreter<'r> {
    replayers: BTreeMap<Environment, &'r dyn FlowReplayer>,
}

impl<'r> FlowInterpreter<'r> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_replayer(mut self, environment: Environment, replayer: &'r dyn FlowReplayer) -> Self {
        self.replayers.insert(environment, replayer);
        self
    }

    /// Replay the flows tagged `ctx.tag` and record them under `ctx.name`.
    /// Returns how many flows were replayed.
    pub fn process_flows<'f>(
        &self,
        flows: impl IntoIterator<Item = &'f Flow>,
        ctx: &EnvironmentContext,
        history: &mut FlowHistory,
    ) -> Result<usize, InterpreterError> {
        let replayer = self
            .replayers
            .get(&ctx.environment)
            .ok_or(InterpreterError::NoReplayer(ctx.environment))?;
        let mut replayed = 0;
        let mut skipped = 0;
        for flow in flows {
            if flow.tag != ctx.tag {
                skipped += 1;
                continue;
            }
            for trace in replayer.replay(flow) {
                history.add_trace(flow, &ctx.name, trace);
            }
            replayed += 1;
        }
        if skipped > 0 {
            debug!(environment = %ctx.name, tag = %ctx.tag, skipped, "Ignored flows with other tags");
        }
        info!(environment = %ctx.name, flows = replayed, "Recorded flow traces");
        Ok(replayed)
    }

    /// Replay the same flows under both contexts, which must share a tag for
    /// the flows to be comparable.
    pub fn process_differential<'f>(
        &self,
        flows: impl IntoIterator<Item = &'f Flow> + Clone,
        base: &EnvironmentContext,
        delta: &EnvironmentContext,
        history: &mut FlowHistory,
    ) -> Result<usize, InterpreterError> {
        let replayed = self.process_flows(flows.clone(), base, history)?;
        self.process_flows(flows, delta, history)?;
        Ok(replayed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nodal_ir::Edge;

    /// Accepts everything in one environment and drops it in the other.
    struct Fixed(FlowDisposition);

    impl FlowReplayer for Fixed {
        fn replay(&self, _: &Flow) -> Vec<FlowTrace> {
            vec![FlowTrace {
                hops: vec![nodal_ir::FlowTraceHop {
                    edge: Edge::new("a", "e0", "b", "e0"),
                }],
                disposition: self.0,
                notes: String::new(),
            }]
        }
    }

    #[test]
    fn differential_history_compares_environments() {
        let accept = Fixed(FlowDisposition::Accepted);
        let drop = Fixed(FlowDisposition::NoRoute);
        let interpreter = FlowInterpreter::new()
            .with_replayer(Environment::Base, &accept)
            .with_replayer(Environment::Delta, &drop);
        let flows: BTreeSet<Flow> = [Flow::new("a", "default", "diff"), Flow::new("b", "default", "other")].into();

        let mut history = FlowHistory::new();
        let replayed = interpreter
            .process_differential(
                &flows,
                &EnvironmentContext::of(Environment::Base, "diff"),
                &EnvironmentContext::of(Environment::Delta, "diff"),
                &mut history,
            )
            .unwrap();
        assert_eq!(replayed, 1);
        assert_eq!(history.len(), 1);
        let flow = Flow::new("a", "default", "diff");
        assert_eq!(history.environments(&flow).collect::<Vec<_>>(), vec!["base", "delta"]);
        assert_eq!(history.differing_flows("base", "delta"), vec![&flow]);
        assert_eq!(history.entries().len(), 2);
    }

    #[test]
    fn missing_replayer_is_an_error() {
        let interpreter = FlowInterpreter::new();
        let err = interpreter
            .process_flows(
                std::iter::empty(),
                &EnvironmentContext::of(Environment::Delta, "t"),
                &mut FlowHistory::new(),
            )
            .unwrap_err();
        assert_eq!(err, InterpreterError::NoReplayer(Environment::Delta));
    }
}
