//! A solver-independent query: declarations plus de-duplicated assertions.

use std::collections::HashSet;

use crate::backends::smtlib_printer::query_to_smt2_script;
use crate::simplify::simplify;
use crate::solver::SmtSolver;
use crate::terms::{SmtSort, SmtTerm};

/// Declarations and assertions in insertion order.
///
/// Re-declaring a name is a no-op, and structurally identical assertions are
/// kept once (commutative operands are compared order-insensitively).
#[derive(Debug, Clone, Default)]
pub struct Encoding {
    declarations: Vec<(String, SmtSort)>,
    declared: HashSet<String>,
    assertions: Vec<SmtTerm>,
    assertion_keys: HashSet<String>,
    simplify: bool,
}

impl Encoding {
    pub fn new() -> Self {
        Self::default()
    }

    /// An encoding that runs [`simplify`] over every assertion it receives.
    pub fn simplifying() -> Self {
        Self {
            simplify: true,
            ..Self::default()
        }
    }

    pub fn declare(&mut self, name: impl Into<String>, sort: SmtSort) {
        let name = name.into();
        if self.declared.insert(name.clone()) {
            self.declarations.push((name, sort));
        }
    }

    pub fn is_declared(&self, name: &str) -> bool {
        self.declared.contains(name)
    }

    pub fn assert_term(&mut self, term: SmtTerm) {
        let term = if self.simplify { simplify(&term) } else { term };
        if term.is_true() {
            return;
        }
        // Conjunctions are split so each conjunct dedups on its own.
        if let SmtTerm::And(parts) = term {
            for part in parts {
                self.assert_term(part);
            }
            return;
        }
        if self.assertion_keys.insert(canonical_term_key(&term)) {
            self.assertions.push(term);
        }
    }

    pub fn declarations(&self) -> &[(String, SmtSort)] {
        &self.declarations
    }

    pub fn assertions(&self) -> &[SmtTerm] {
        &self.assertions
    }

    pub fn assertion_unique(&self) -> usize {
        self.assertions.len()
    }

    /// Declare and assert everything into `solver`.
    pub fn apply<S: SmtSolver>(&self, solver: &mut S) -> Result<(), S::Error> {
        for (name, sort) in &self.declarations {
            solver.declare_var(name, sort)?;
        }
        for assertion in &self.assertions {
            solver.assert(assertion)?;
        }
        Ok(())
    }

    /// Standalone SMT-LIB script for offline debugging.
    pub fn to_smt2_script(&self) -> String {
        query_to_smt2_script(&self.declarations, &self.assertions)
    }
}

fn canonical_binary_commutative(tag: &str, lhs: &SmtTerm, rhs: &SmtTerm) -> String {
    let left = canonical_term_key(lhs);
    let right = canonical_term_key(rhs);
    if left <= right {
        format!("({tag} {left} {right})")
    } else {
        format!("({tag} {right} {left})")
    }
}

fn canonical_nary(tag: &str, terms: &[SmtTerm]) -> String {
    let mut keys: Vec<String> = terms.iter().map(canonical_term_key).collect();
    keys.sort();
    keys.dedup();
    format!("({tag} {})", keys.join(" "))
}

fn canonical_term_key(term: &SmtTerm) -> String {
    match term {
        SmtTerm::Var(name) => format!("(var {name})"),
        SmtTerm::IntLit(v) => format!("(int {v})"),
        SmtTerm::BoolLit(v) => format!("(bool {v})"),
        SmtTerm::Add(lhs, rhs) => canonical_binary_commutative("+", lhs, rhs),
        SmtTerm::Sub(lhs, rhs) => format!(
            "(- {} {})",
            canonical_term_key(lhs),
            canonical_term_key(rhs)
        ),
        SmtTerm::Eq(lhs, rhs) => canonical_binary_commutative("=", lhs, rhs),
        // a < b and b > a are the same constraint
        SmtTerm::Lt(lhs, rhs) => format!(
            "(< {} {})",
            canonical_term_key(lhs),
            canonical_term_key(rhs)
        ),
        SmtTerm::Gt(lhs, rhs) => format!(
            "(< {} {})",
            canonical_term_key(rhs),
            canonical_term_key(lhs)
        ),
        SmtTerm::Le(lhs, rhs) => format!(
            "(<= {} {})",
            canonical_term_key(lhs),
            canonical_term_key(rhs)
        ),
        SmtTerm::Ge(lhs, rhs) => format!(
            "(<= {} {})",
            canonical_term_key(rhs),
            canonical_term_key(lhs)
        ),
        SmtTerm::And(terms) => canonical_nary("and", terms),
        SmtTerm::Or(terms) => canonical_nary("or", terms),
        SmtTerm::Not(inner) => format!("(not {})", canonical_term_key(inner)),
        SmtTerm::Implies(lhs, rhs) => format!(
            "(=> {} {})",
            canonical_term_key(lhs),
            canonical_term_key(rhs)
        ),
        SmtTerm::Ite(c, t, e) => format!(
            "(ite {} {} {})",
            canonical_term_key(c),
            canonical_term_key(t),
            canonical_term_key(e)
        ),
    }
}
