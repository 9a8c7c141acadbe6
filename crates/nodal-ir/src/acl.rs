use std::fmt;

use serde::{Deserialize, Serialize};

use crate::flow::Flow;
use crate::header_space::HeaderSpace;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LineAction {
    Accept,
    Reject,
}

impl fmt::Display for LineAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LineAction::Accept => write!(f, "permit"),
            LineAction::Reject => write!(f, "deny"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpAccessListLine {
    pub name: String,
    pub action: LineAction,
    #[serde(default)]
    pub header_space: HeaderSpace,
    /// Set when the line could not be converted faithfully; such a line never
    /// matches.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invalid_message: Option<String>,
}

impl IpAccessListLine {
    pub fn new(name: impl Into<String>, action: LineAction, header_space: HeaderSpace) -> Self {
        Self {
            name: name.into(),
            action,
            header_space,
            invalid_message: None,
        }
    }

    pub fn permit(name: impl Into<String>, header_space: HeaderSpace) -> Self {
        Self::new(name, LineAction::Accept, header_space)
    }

    pub fn deny(name: impl Into<String>, header_space: HeaderSpace) -> Self {
        Self::new(name, LineAction::Reject, header_space)
    }

    pub fn is_valid(&self) -> bool {
        self.invalid_message.is_none()
    }
}

/// A first-match packet filter with an implicit deny at the end.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpAccessList {
    pub name: String,
    pub lines: Vec<IpAccessListLine>,
}

impl IpAccessList {
    pub fn new(name: impl Into<String>, lines: Vec<IpAccessListLine>) -> Self {
        Self {
            name: name.into(),
            lines,
        }
    }

    /// Index of the first valid line matching `flow`.
    pub fn first_match(&self, flow: &Flow) -> Option<usize> {
        self.lines
            .iter()
            .position(|line| line.is_valid() && line.header_space.matches(flow))
    }

    pub fn permits(&self, flow: &Flow) -> bool {
        self.first_match(flow)
            .map(|i| self.lines[i].action == LineAction::Accept)
            .unwrap_or(false)
    }
}
