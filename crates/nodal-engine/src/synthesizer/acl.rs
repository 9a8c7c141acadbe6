//! First-match ACL logic.

use nodal_ir::{IpAccessList, LineAction};
use nodal_smt::simplify::simplify;
use nodal_smt::terms::SmtTerm;

use super::header::header_space_term;

/// A line's match condition over the packet variables.
#[derive(Debug, Clone)]
pub struct CompiledLine {
    pub name: String,
    pub action: LineAction,
    /// `false` for invalid lines.
    pub matcher: SmtTerm,
    pub valid: bool,
}

#[derive(Debug, Clone)]
pub struct CompiledAcl {
    pub name: String,
    pub lines: Vec<CompiledLine>,
}

impl CompiledAcl {
    pub fn compile(acl: &IpAccessList, simplify_terms: bool, warnings: &mut Vec<String>, hostname: &str) -> Self {
        let lines = acl
            .lines
            .iter()
            .enumerate()
            .map(|(index, line)| {
                if let Some(reason) = &line.invalid_message {
                    warnings.push(format!(
                        "{hostname}: line {index} ('{}') of ACL '{}' is disabled: {reason}",
                        line.name, acl.name
                    ));
                    return CompiledLine {
                        name: line.name.clone(),
                        action: line.action,
                        matcher: SmtTerm::ff(),
                        valid: false,
                    };
                }
                let raw = header_space_term(&line.header_space);
                CompiledLine {
                    name: line.name.clone(),
                    action: line.action,
                    matcher: if simplify_terms { simplify(&raw) } else { raw },
                    valid: true,
                }
            })
            .collect();
        Self {
            name: acl.name.clone(),
            lines,
        }
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nodal_ir::{HeaderSpace, IpAccessListLine};

    #[test]
    fn invalid_lines_compile_to_false_with_a_warning() {
        let mut bad = IpAccessListLine::permit("bad", HeaderSpace::any());
        bad.invalid_message = Some("unsupported object-group".into());
        let acl = IpAccessList::new(
            "edge",
            vec![bad, IpAccessListLine::deny("rest", HeaderSpace::any())],
        );
        let mut warnings = Vec::new();
        let compiled = CompiledAcl::compile(&acl, true, &mut warnings, "fw1");
        assert_eq!(compiled.len(), 2);
        assert!(compiled.lines[0].matcher.is_false());
        assert!(!compiled.lines[0].valid);
        assert!(compiled.lines[1].matcher.is_true());
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("fw1") && warnings[0].contains("edge"));
    }
}
