//! Property encodings layered on compiled synthesizers.
//!
//! Each variant validates its parameters against the layer it is paired with
//! and then asserts its property into the job's encoding. Header variables are
//! shared by every layer of a job; everything a variant instantiates lives in
//! its layer's namespace.

pub mod acl;
pub mod blacklist;
pub mod reachability;

use std::sync::Arc;

use nodal_smt::encoding::Encoding;
use nodal_smt::terms::SmtTerm;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::synthesizer::header::declare_packet;
use crate::synthesizer::{LayerEncoder, Mask, Synthesizer};

pub use acl::{AclReachabilityQuery, EarliestMoreGeneralQuery};
pub use blacklist::BlacklistQuery;
pub use reachability::{MultipathQuery, ReachEdgeQuery, ReachabilityQuery};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueryError {
    #[error("unknown node '{0}'")]
    UnknownNode(String),
    #[error("{node}: unknown VRF '{vrf}'")]
    UnknownVrf { node: String, vrf: String },
    #[error("{hostname}: unknown ACL '{acl}'")]
    UnknownAcl { hostname: String, acl: String },
    #[error("{hostname}: ACL '{acl}' has {len} lines, line {line} does not exist")]
    LineOutOfRange {
        hostname: String,
        acl: String,
        line: usize,
        len: usize,
    },
    #[error("candidate line {candidate} is not strictly before line {line} or out of order")]
    BadCandidate { line: usize, candidate: usize },
    #[error("{0} query needs a synthesizer built with a data plane")]
    RequiresDataPlane(&'static str),
    #[error("reachability query with no forwarding actions")]
    EmptyActions,
    #[error("invalid header space: {0}")]
    InvalidHeaderSpace(String),
    #[error("{layers} layers cannot be paired with {queries} queries")]
    LayerMismatch { layers: usize, queries: usize },
    #[error("job has no {0}")]
    Empty(&'static str),
}

/// The closed family of property encodings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum QuerySynthesizer {
    Reachability(ReachabilityQuery),
    MultipathInconsistency(MultipathQuery),
    ReachEdge(ReachEdgeQuery),
    AclReachability(AclReachabilityQuery),
    EarliestMoreGeneralReachableLine(EarliestMoreGeneralQuery),
    Blacklist(BlacklistQuery),
}

/// What a query leaves behind for the job besides its assertions.
#[derive(Debug, Clone, Default)]
pub struct QueryEncoding {
    /// Free origin variables, one list per instance, as `(hostname, var)`.
    pub origins: Vec<Vec<(String, String)>>,
    /// Alternative assertions a job checks one at a time, in order.
    pub alternatives: Vec<SmtTerm>,
}

impl QuerySynthesizer {
    pub fn name(&self) -> &'static str {
        match self {
            QuerySynthesizer::Reachability(_) => "reachability",
            QuerySynthesizer::MultipathInconsistency(_) => "multipath",
            QuerySynthesizer::ReachEdge(_) => "reach-edge",
            QuerySynthesizer::AclReachability(_) => "acl-reachability",
            QuerySynthesizer::EarliestMoreGeneralReachableLine(_) => "earliest-more-general",
            QuerySynthesizer::Blacklist(_) => "blacklist",
        }
    }

    /// Whether the query instantiates the forwarding transition system.
    pub fn needs_forwarding(&self) -> bool {
        matches!(
            self,
            QuerySynthesizer::Reachability(_)
                | QuerySynthesizer::MultipathInconsistency(_)
                | QuerySynthesizer::ReachEdge(_)
        )
    }

    pub fn validate(&self, synth: &Synthesizer) -> Result<(), QueryError> {
        if self.needs_forwarding() && !synth.has_data_plane() {
            return Err(QueryError::RequiresDataPlane(self.name()));
        }
        match self {
            QuerySynthesizer::Reachability(q) => q.validate(synth),
            QuerySynthesizer::MultipathInconsistency(q) => q.validate(synth),
            QuerySynthesizer::ReachEdge(q) => q.validate(synth),
            QuerySynthesizer::AclReachability(q) => q.validate(synth),
            QuerySynthesizer::EarliestMoreGeneralReachableLine(q) => q.validate(synth),
            QuerySynthesizer::Blacklist(_) => Ok(()),
        }
    }

    /// Topology removed from the layer this query is paired with.
    pub fn mask(&self) -> Option<Mask> {
        match self {
            QuerySynthesizer::Blacklist(q) => Some(q.mask()),
            _ => None,
        }
    }

    pub fn encode(&self, layer: &mut LayerEncoder<'_>, enc: &mut Encoding) -> QueryEncoding {
        match self {
            QuerySynthesizer::Reachability(q) => q.encode(layer, enc),
            QuerySynthesizer::MultipathInconsistency(q) => q.encode(layer, enc),
            QuerySynthesizer::ReachEdge(q) => q.encode(layer, enc),
            QuerySynthesizer::AclReachability(q) => q.encode(layer, enc),
            QuerySynthesizer::EarliestMoreGeneralReachableLine(q) => q.encode(layer, enc),
            QuerySynthesizer::Blacklist(q) => q.encode(layer, enc),
        }
    }
}

/// Slot of the layer each query applies to: with one layer every query uses
/// it, otherwise query `i` uses layer `i`.
pub fn pair_slots(layers: usize, queries: usize) -> Result<Vec<usize>, QueryError> {
    if layers == 0 {
        return Err(QueryError::Empty("layers"));
    }
    if queries == 0 {
        return Err(QueryError::Empty("queries"));
    }
    if layers == 1 {
        return Ok(vec![0; queries]);
    }
    if layers != queries {
        return Err(QueryError::LayerMismatch { layers, queries });
    }
    Ok((0..queries).collect())
}

/// Validate every query against the layer it is paired with.
pub fn validate_composition(
    layers: &[Arc<Synthesizer>],
    queries: &[QuerySynthesizer],
) -> Result<(), QueryError> {
    let slots = pair_slots(layers.len(), queries.len())?;
    for (query, slot) in queries.iter().zip(slots) {
        query.validate(&layers[slot])?;
    }
    Ok(())
}

/// The conjunction of all layers and queries, ready for a solver.
#[derive(Debug, Clone)]
pub struct ComposedQuery {
    pub encoding: Encoding,
    pub origins: Vec<Vec<(String, String)>>,
    pub alternatives: Vec<SmtTerm>,
}

/// Encode `queries` against `layers`. Blacklists mask every instance of their
/// own layer, so they are gathered before anything else is encoded.
pub fn compose(
    layers: &[Arc<Synthesizer>],
    queries: &[QuerySynthesizer],
    simplify: bool,
) -> Result<ComposedQuery, QueryError> {
    let slots = pair_slots(layers.len(), queries.len())?;
    let mut encoding = if simplify {
        Encoding::simplifying()
    } else {
        Encoding::new()
    };
    declare_packet(&mut encoding);

    let mut masks = vec![Mask::default(); layers.len()];
    for (query, slot) in queries.iter().zip(&slots) {
        if let Some(mask) = query.mask() {
            masks[*slot].union(&mask);
        }
    }
    let mut encoders: Vec<LayerEncoder<'_>> = layers
        .iter()
        .zip(masks)
        .enumerate()
        .map(|(slot, (synth, mask))| LayerEncoder::new(slot, synth, mask))
        .collect();

    let mut origins = Vec::new();
    let mut alternatives = Vec::new();
    for (query, slot) in queries.iter().zip(slots) {
        let out = query.encode(&mut encoders[slot], &mut encoding);
        origins.extend(out.origins);
        alternatives.extend(out.alternatives);
    }
    Ok(ComposedQuery {
        encoding,
        origins,
        alternatives,
    })
}
