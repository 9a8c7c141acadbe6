#![doc = include_str!("../README.md")]

//! SMT term representation and solver integration for packet reachability.
//!
//! Everything the engine asks of a solver goes through [`solver::SmtSolver`],
//! so a backend can be swapped without touching query construction.

pub mod backends;
pub mod encoding;
pub mod simplify;
pub mod solver;
pub mod terms;
