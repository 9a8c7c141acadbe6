use std::collections::HashMap;

use crate::terms::{SmtSort, SmtTerm};

/// Result of a satisfiability check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SatResult {
    Sat,
    Unsat,
    /// The backend gave up; the string carries its reason (e.g. `timeout`).
    Unknown(String),
}

impl SatResult {
    /// True when an `Unknown` verdict was caused by a resource limit.
    pub fn is_timeout(&self) -> bool {
        match self {
            SatResult::Unknown(reason) => {
                let reason = reason.to_ascii_lowercase();
                reason.contains("timeout") || reason.contains("canceled") || reason.contains("resource")
            }
            _ => false,
        }
    }
}

/// A model (variable assignments) extracted from a SAT result.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Model {
    pub values: HashMap<String, ModelValue>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelValue {
    Int(i64),
    Bool(bool),
}

impl Model {
    pub fn get_int(&self, name: &str) -> Option<i64> {
        match self.values.get(name) {
            Some(ModelValue::Int(n)) => Some(*n),
            _ => None,
        }
    }

    pub fn get_bool(&self, name: &str) -> Option<bool> {
        match self.values.get(name) {
            Some(ModelValue::Bool(b)) => Some(*b),
            _ => None,
        }
    }

    pub fn insert_int(&mut self, name: impl Into<String>, value: i64) {
        self.values.insert(name.into(), ModelValue::Int(value));
    }

    pub fn insert_bool(&mut self, name: impl Into<String>, value: bool) {
        self.values.insert(name.into(), ModelValue::Bool(value));
    }

    /// Evaluate a term under this assignment.
    ///
    /// Returns `None` when the term mentions an unassigned variable or mixes
    /// sorts. Arithmetic overflow also yields `None`.
    pub fn eval(&self, term: &SmtTerm) -> Option<ModelValue> {
        Some(match term {
            SmtTerm::Var(name) => *self.values.get(name)?,
            SmtTerm::IntLit(n) => ModelValue::Int(*n),
            SmtTerm::BoolLit(b) => ModelValue::Bool(*b),
            SmtTerm::Add(l, r) => ModelValue::Int(self.eval_int(l)?.checked_add(self.eval_int(r)?)?),
            SmtTerm::Sub(l, r) => ModelValue::Int(self.eval_int(l)?.checked_sub(self.eval_int(r)?)?),
            SmtTerm::Eq(l, r) => match (self.eval(l)?, self.eval(r)?) {
                (ModelValue::Int(a), ModelValue::Int(b)) => ModelValue::Bool(a == b),
                (ModelValue::Bool(a), ModelValue::Bool(b)) => ModelValue::Bool(a == b),
                _ => return None,
            },
            SmtTerm::Lt(l, r) => ModelValue::Bool(self.eval_int(l)? < self.eval_int(r)?),
            SmtTerm::Le(l, r) => ModelValue::Bool(self.eval_int(l)? <= self.eval_int(r)?),
            SmtTerm::Gt(l, r) => ModelValue::Bool(self.eval_int(l)? > self.eval_int(r)?),
            SmtTerm::Ge(l, r) => ModelValue::Bool(self.eval_int(l)? >= self.eval_int(r)?),
            SmtTerm::And(terms) => {
                let mut all = true;
                for t in terms {
                    all &= self.eval_bool(t)?;
                }
                ModelValue::Bool(all)
            }
            SmtTerm::Or(terms) => {
                let mut any = false;
                for t in terms {
                    any |= self.eval_bool(t)?;
                }
                ModelValue::Bool(any)
            }
            SmtTerm::Not(inner) => ModelValue::Bool(!self.eval_bool(inner)?),
            SmtTerm::Implies(l, r) => ModelValue::Bool(!self.eval_bool(l)? || self.eval_bool(r)?),
            SmtTerm::Ite(c, t, e) => {
                if self.eval_bool(c)? {
                    self.eval(t)?
                } else {
                    self.eval(e)?
                }
            }
        })
    }

    pub fn eval_bool(&self, term: &SmtTerm) -> Option<bool> {
        match self.eval(term)? {
            ModelValue::Bool(b) => Some(b),
            ModelValue::Int(_) => None,
        }
    }

    pub fn eval_int(&self, term: &SmtTerm) -> Option<i64> {
        match self.eval(term)? {
            ModelValue::Int(n) => Some(n),
            ModelValue::Bool(_) => None,
        }
    }
}

/// Abstract SMT solver interface.
pub trait SmtSolver {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Declare a new variable.
    fn declare_var(&mut self, name: &str, sort: &SmtSort) -> Result<(), Self::Error>;

    /// Assert a constraint.
    fn assert(&mut self, term: &SmtTerm) -> Result<(), Self::Error>;

    /// Push a new scope.
    fn push(&mut self) -> Result<(), Self::Error>;

    /// Pop a scope.
    fn pop(&mut self) -> Result<(), Self::Error>;

    /// Check satisfiability.
    fn check_sat(&mut self) -> Result<SatResult, Self::Error>;

    /// Check satisfiability and extract a model if SAT.
    fn check_sat_with_model(
        &mut self,
        var_names: &[(&str, &SmtSort)],
    ) -> Result<(SatResult, Option<Model>), Self::Error>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_getters_return_typed_values_only() {
        let mut model = Model::default();
        model.insert_int("x", 42);
        model.insert_bool("flag", true);

        assert_eq!(model.get_int("x"), Some(42));
        assert_eq!(model.get_bool("flag"), Some(true));
        assert_eq!(model.get_int("flag"), None);
        assert_eq!(model.get_bool("x"), None);
        assert_eq!(model.get_int("missing"), None);
    }

    #[test]
    fn eval_follows_connective_semantics() {
        let mut model = Model::default();
        model.insert_int("port", 443);
        model.insert_bool("syn", false);

        let https = SmtTerm::var("port").in_range(443, 443);
        assert_eq!(model.eval_bool(&https), Some(true));
        assert_eq!(
            model.eval_bool(&SmtTerm::var("syn").implies(SmtTerm::ff())),
            Some(true)
        );
        assert_eq!(model.eval_bool(&SmtTerm::or(vec![])), Some(false));
        assert_eq!(model.eval_bool(&SmtTerm::and(vec![])), Some(true));
        let picked = SmtTerm::ite(SmtTerm::var("syn"), SmtTerm::int(1), SmtTerm::int(2));
        assert_eq!(model.eval_int(&picked), Some(2));
    }

    #[test]
    fn eval_rejects_unassigned_and_ill_sorted_terms() {
        let mut model = Model::default();
        model.insert_int("x", 1);
        assert_eq!(model.eval(&SmtTerm::var("y")), None);
        assert_eq!(model.eval(&SmtTerm::var("x").not()), None);
        assert_eq!(model.eval(&SmtTerm::var("x").eq(SmtTerm::tt())), None);
    }

    #[test]
    fn unknown_reason_classifies_timeouts() {
        assert!(SatResult::Unknown("timeout".into()).is_timeout());
        assert!(SatResult::Unknown("Z3 returned unknown: canceled".into()).is_timeout());
        assert!(!SatResult::Unknown("incomplete quantifiers".into()).is_timeout());
        assert!(!SatResult::Unsat.is_timeout());
    }
}
