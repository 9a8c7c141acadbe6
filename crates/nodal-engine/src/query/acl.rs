//! ACL line properties. These only need a control-plane synthesizer.

use nodal_smt::encoding::Encoding;
use serde::{Deserialize, Serialize};

use super::{QueryEncoding, QueryError};
use crate::synthesizer::{LayerEncoder, Synthesizer};

/// Resolve `(hostname, acl)` to node and ACL indices, checking `line`.
fn locate(
    synth: &Synthesizer,
    hostname: &str,
    acl_name: &str,
    line: usize,
) -> Result<(usize, usize), QueryError> {
    let node = synth
        .node_index(hostname)
        .ok_or_else(|| QueryError::UnknownNode(hostname.to_string()))?;
    let model = synth
        .node(hostname)
        .ok_or_else(|| QueryError::UnknownNode(hostname.to_string()))?;
    let (acl, _, compiled) = model
        .acls
        .get_full(acl_name)
        .ok_or_else(|| QueryError::UnknownAcl {
            hostname: hostname.to_string(),
            acl: acl_name.to_string(),
        })?;
    if line >= compiled.len() {
        return Err(QueryError::LineOutOfRange {
            hostname: hostname.to_string(),
            acl: acl_name.to_string(),
            line,
            len: compiled.len(),
        });
    }
    Ok((node, acl))
}

/// Some packet is matched by `line` and by no earlier line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AclReachabilityQuery {
    pub hostname: String,
    pub acl_name: String,
    pub line: usize,
}

impl AclReachabilityQuery {
    pub fn new(hostname: impl Into<String>, acl_name: impl Into<String>, line: usize) -> Self {
        Self {
            hostname: hostname.into(),
            acl_name: acl_name.into(),
            line,
        }
    }

    pub(crate) fn validate(&self, synth: &Synthesizer) -> Result<(), QueryError> {
        locate(synth, &self.hostname, &self.acl_name, self.line).map(|_| ())
    }

    pub(crate) fn encode(&self, layer: &mut LayerEncoder<'_>, enc: &mut Encoding) -> QueryEncoding {
        if let Ok((node, acl)) = locate(layer.synthesizer(), &self.hostname, &self.acl_name, self.line) {
            let first = layer.acl_first_match(enc, node, acl, self.line);
            enc.assert_term(first);
        }
        QueryEncoding::default()
    }
}

/// Checks, in order, whether each candidate line matches every packet that
/// `line` matches. The base assertion is "`line` matches"; alternative `i`
/// adds "candidate `i` does not match", so the first UNSAT alternative names the
/// earliest candidate that subsumes the line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EarliestMoreGeneralQuery {
    pub hostname: String,
    pub acl_name: String,
    pub line: usize,
    /// Strictly increasing, all before `line`.
    pub candidates: Vec<usize>,
}

impl EarliestMoreGeneralQuery {
    pub fn new(
        hostname: impl Into<String>,
        acl_name: impl Into<String>,
        line: usize,
        candidates: Vec<usize>,
    ) -> Self {
        Self {
            hostname: hostname.into(),
            acl_name: acl_name.into(),
            line,
            candidates,
        }
    }

    pub(crate) fn validate(&self, synth: &Synthesizer) -> Result<(), QueryError> {
        locate(synth, &self.hostname, &self.acl_name, self.line)?;
        let mut previous: Option<usize> = None;
        for &candidate in &self.candidates {
            if candidate >= self.line || previous.is_some_and(|p| p >= candidate) {
                return Err(QueryError::BadCandidate {
                    line: self.line,
                    candidate,
                });
            }
            previous = Some(candidate);
        }
        Ok(())
    }

    pub(crate) fn encode(&self, layer: &mut LayerEncoder<'_>, enc: &mut Encoding) -> QueryEncoding {
        let Ok((node, acl)) = locate(layer.synthesizer(), &self.hostname, &self.acl_name, self.line) else {
            return QueryEncoding::default();
        };
        let target = layer.acl_line_match(enc, node, acl, self.line);
        enc.assert_term(target);
        let alternatives = self
            .candidates
            .iter()
            .map(|c| layer.acl_line_match(enc, node, acl, *c).not())
            .collect();
        QueryEncoding {
            origins: Vec::new(),
            alternatives,
        }
    }
}
