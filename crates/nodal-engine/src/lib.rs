#![doc = include_str!("../README.md")]

//! Nodal reachability engine.
//!
//! This crate compiles network models into SMT, builds reachability jobs
//! over one or more compiled layers, solves them in parallel and replays the
//! resulting witness flows.

pub mod acl_lines;
pub mod error;
pub mod executor;
pub mod interpreter;
pub mod job;
pub mod query;
pub mod questions;
pub mod settings;
pub mod synthesizer;

pub use acl_lines::{analyze_acl_lines, AclLine, AclLinesAnswerElement, AclReachabilityEntry};
pub use error::EngineError;
pub use executor::{run_jobs, BatchAnswerElement, BatchJob, BatchSummary};
pub use interpreter::{
    DataPlaneReplayer, Environment, EnvironmentContext, FlowHistory, FlowInterpreter, FlowReplayer,
};
pub use job::{JobError, NodFirstUnsatJob, NodJob, NodSatJob};
pub use query::{QueryError, QuerySynthesizer};
pub use questions::{run_flow_jobs, FlowBatch};
pub use settings::EngineSettings;
pub use synthesizer::Synthesizer;
