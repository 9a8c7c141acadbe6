use thiserror::Error;

use crate::executor::BatchSummary;
use crate::interpreter::InterpreterError;
use crate::job::JobError;
use crate::query::QueryError;
use crate::synthesizer::CompileError;

/// Failures surfaced by the batch-level entry points.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Compilation error: {0}")]
    Compile(#[from] CompileError),
    #[error("Query error: {0}")]
    Query(#[from] QueryError),
    #[error("Job error: {0}")]
    Job(#[from] JobError),
    #[error("Interpreter error: {0}")]
    Interpreter(#[from] InterpreterError),
    #[error("Worker pool error: {0}")]
    Pool(String),
    /// A job failed under the halt-on-failure policy. Results merged before
    /// the failure are still in the caller's output.
    #[error("Batch '{}' aborted after {} failure(s)", .0.description, .0.failures.len())]
    BatchAborted(Box<BatchSummary>),
}
