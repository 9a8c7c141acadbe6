use std::collections::{BTreeMap, HashMap};

use thiserror::Error;
use z3::ast::{Bool, Int};
use z3::SatResult as Z3SatResult;

use crate::solver::{Model, ModelValue, SatResult, SmtSolver};
use crate::terms::{SmtSort, SmtTerm};

#[derive(Debug, Error)]
pub enum Z3Error {
    #[error("Z3 error: {0}")]
    Internal(String),
    #[error("Unknown variable: {0}")]
    UnknownVariable(String),
}

/// A translated term of either sort.
#[derive(Clone)]
enum Ast {
    Int(Int),
    Bool(Bool),
}

impl Ast {
    fn int(self, op: &str) -> Result<Int, Z3Error> {
        match self {
            Ast::Int(i) => Ok(i),
            Ast::Bool(_) => Err(Z3Error::Internal(format!("'{op}' expects Int operands"))),
        }
    }

    fn boolean(self, op: &str) -> Result<Bool, Z3Error> {
        match self {
            Ast::Bool(b) => Ok(b),
            Ast::Int(_) => Err(Z3Error::Internal(format!("'{op}' expects Bool operands"))),
        }
    }
}

/// In-process Z3 solver.
///
/// Z3 contexts are thread-local, so a `Z3Solver` is created and used on the
/// worker thread that runs the job.
pub struct Z3Solver {
    solver: z3::Solver,
    vars: BTreeMap<String, Ast>,
}

impl Z3Solver {
    pub fn new() -> Self {
        Self::with_timeout_ms(0)
    }

    /// Every `check` gives up after `timeout_ms`; zero means no limit.
    pub fn with_timeout_ms(timeout_ms: u64) -> Self {
        let solver = z3::Solver::new();
        if timeout_ms > 0 {
            let mut params = z3::Params::new();
            params.set_u32("timeout", u32::try_from(timeout_ms).unwrap_or(u32::MAX));
            solver.set_params(&params);
        }
        Self {
            solver,
            vars: BTreeMap::new(),
        }
    }

    fn unknown(&self) -> SatResult {
        let reason = self.solver.get_reason_unknown().unwrap_or_default();
        SatResult::Unknown(format!("Z3 returned unknown: {reason}"))
    }

    fn ints(&self, op: &str, lhs: &SmtTerm, rhs: &SmtTerm) -> Result<(Int, Int), Z3Error> {
        Ok((self.translate(lhs)?.int(op)?, self.translate(rhs)?.int(op)?))
    }

    fn bools(&self, op: &str, terms: &[SmtTerm]) -> Result<Bool, Z3Error> {
        let parts = terms
            .iter()
            .map(|t| self.translate(t)?.boolean(op))
            .collect::<Result<Vec<_>, _>>()?;
        let refs: Vec<&Bool> = parts.iter().collect();
        Ok(if op == "and" { Bool::and(&refs) } else { Bool::or(&refs) })
    }

    fn translate(&self, term: &SmtTerm) -> Result<Ast, Z3Error> {
        let ast = match term {
            SmtTerm::Var(name) => self
                .vars
                .get(name)
                .cloned()
                .ok_or_else(|| Z3Error::UnknownVariable(name.clone()))?,
            SmtTerm::IntLit(n) => Ast::Int(Int::from_i64(*n)),
            SmtTerm::BoolLit(b) => Ast::Bool(Bool::from_bool(*b)),
            SmtTerm::Add(l, r) => {
                let (l, r) = self.ints("+", l, r)?;
                Ast::Int(&l + &r)
            }
            SmtTerm::Sub(l, r) => {
                let (l, r) = self.ints("-", l, r)?;
                Ast::Int(&l - &r)
            }
            SmtTerm::Lt(l, r) => {
                let (l, r) = self.ints("<", l, r)?;
                Ast::Bool(l.lt(&r))
            }
            SmtTerm::Le(l, r) => {
                let (l, r) = self.ints("<=", l, r)?;
                Ast::Bool(l.le(&r))
            }
            SmtTerm::Gt(l, r) => {
                let (l, r) = self.ints(">", l, r)?;
                Ast::Bool(l.gt(&r))
            }
            SmtTerm::Ge(l, r) => {
                let (l, r) = self.ints(">=", l, r)?;
                Ast::Bool(l.ge(&r))
            }
            SmtTerm::Eq(l, r) => match (self.translate(l)?, self.translate(r)?) {
                (Ast::Int(l), Ast::Int(r)) => Ast::Bool(l.eq(&r)),
                (Ast::Bool(l), Ast::Bool(r)) => Ast::Bool(l.eq(&r)),
                _ => return Err(Z3Error::Internal("'=' over mixed sorts".into())),
            },
            SmtTerm::And(terms) => Ast::Bool(self.bools("and", terms)?),
            SmtTerm::Or(terms) => Ast::Bool(self.bools("or", terms)?),
            SmtTerm::Not(inner) => Ast::Bool(self.translate(inner)?.boolean("not")?.not()),
            SmtTerm::Implies(l, r) => {
                let l = self.translate(l)?.boolean("=>")?;
                Ast::Bool(l.implies(&self.translate(r)?.boolean("=>")?))
            }
            SmtTerm::Ite(c, t, e) => {
                let c = self.translate(c)?.boolean("ite")?;
                match (self.translate(t)?, self.translate(e)?) {
                    (Ast::Int(t), Ast::Int(e)) => Ast::Int(c.ite(&t, &e)),
                    (Ast::Bool(t), Ast::Bool(e)) => Ast::Bool(c.ite(&t, &e)),
                    _ => return Err(Z3Error::Internal("'ite' branches differ in sort".into())),
                }
            }
        };
        Ok(ast)
    }

    fn read_model(&self, wanted: &[(&str, &SmtSort)]) -> Result<Model, Z3Error> {
        let model = self
            .solver
            .get_model()
            .ok_or_else(|| Z3Error::Internal("SAT without a model".into()))?;
        let mut values = HashMap::new();
        for (name, _) in wanted {
            let value = match self.vars.get(*name) {
                Some(Ast::Int(v)) => model.eval(v, true).and_then(|n| n.as_i64()).map(ModelValue::Int),
                Some(Ast::Bool(v)) => model.eval(v, true).and_then(|b| b.as_bool()).map(ModelValue::Bool),
                None => None,
            };
            if let Some(value) = value {
                values.insert((*name).to_string(), value);
            }
        }
        Ok(Model { values })
    }
}

impl Default for Z3Solver {
    fn default() -> Self {
        Self::new()
    }
}

impl SmtSolver for Z3Solver {
    type Error = Z3Error;

    fn declare_var(&mut self, name: &str, sort: &SmtSort) -> Result<(), Z3Error> {
        let var = match sort {
            SmtSort::Int => Ast::Int(Int::new_const(name)),
            SmtSort::Bool => Ast::Bool(Bool::new_const(name)),
        };
        self.vars.insert(name.to_string(), var);
        Ok(())
    }

    fn assert(&mut self, term: &SmtTerm) -> Result<(), Z3Error> {
        let constraint = self.translate(term)?.boolean("assert")?;
        self.solver.assert(&constraint);
        Ok(())
    }

    fn push(&mut self) -> Result<(), Z3Error> {
        self.solver.push();
        Ok(())
    }

    fn pop(&mut self) -> Result<(), Z3Error> {
        self.solver.pop(1);
        Ok(())
    }

    fn check_sat(&mut self) -> Result<SatResult, Z3Error> {
        Ok(match self.solver.check() {
            Z3SatResult::Sat => SatResult::Sat,
            Z3SatResult::Unsat => SatResult::Unsat,
            Z3SatResult::Unknown => self.unknown(),
        })
    }

    fn check_sat_with_model(
        &mut self,
        var_names: &[(&str, &SmtSort)],
    ) -> Result<(SatResult, Option<Model>), Z3Error> {
        match self.check_sat()? {
            SatResult::Sat => Ok((SatResult::Sat, Some(self.read_model(var_names)?))),
            other => Ok((other, None)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    type TestResult = Result<(), Box<dyn std::error::Error>>;

    #[test]
    fn web_port_above_ephemeral_range() -> TestResult {
        let mut solver = Z3Solver::new();
        solver.declare_var("src_port", &SmtSort::Int)?;
        solver.declare_var("dst_port", &SmtSort::Int)?;
        solver.assert(&SmtTerm::and(vec![
            SmtTerm::var("src_port").gt(SmtTerm::int(1023)),
            SmtTerm::var("dst_port").in_range(80, 80),
            SmtTerm::var("src_port")
                .add(SmtTerm::var("dst_port"))
                .eq(SmtTerm::int(1104)),
        ]))?;
        let (result, model) = solver.check_sat_with_model(&[("src_port", &SmtSort::Int)])?;
        assert_eq!(result, SatResult::Sat);
        assert_eq!(model.ok_or("no model")?.get_int("src_port"), Some(1024));
        Ok(())
    }

    #[test]
    fn pop_discards_scoped_assertions() -> TestResult {
        let mut solver = Z3Solver::with_timeout_ms(2_000);
        solver.declare_var("dst_ip", &SmtSort::Int)?;
        solver.assert(&SmtTerm::var("dst_ip").in_range(0x0a00_0000, 0x0aff_ffff))?;
        solver.push()?;
        solver.assert(&SmtTerm::var("dst_ip").lt(SmtTerm::int(0x0a00_0000)))?;
        assert_eq!(solver.check_sat()?, SatResult::Unsat);
        let (result, model) = solver.check_sat_with_model(&[("dst_ip", &SmtSort::Int)])?;
        assert_eq!((result, model), (SatResult::Unsat, None));
        solver.pop()?;
        assert_eq!(solver.check_sat()?, SatResult::Sat);
        Ok(())
    }

    #[test]
    fn bool_model_values_and_nested_ite() -> TestResult {
        let mut solver = Z3Solver::new();
        solver.declare_var("syn", &SmtSort::Bool)?;
        solver.declare_var("ack", &SmtSort::Bool)?;
        solver.declare_var("x", &SmtSort::Int)?;
        let inner = SmtTerm::ite(SmtTerm::var("ack"), SmtTerm::int(1), SmtTerm::int(2));
        let outer = SmtTerm::ite(SmtTerm::var("syn"), inner, SmtTerm::int(3));
        solver.assert(&SmtTerm::var("x").eq(outer))?;
        solver.assert(&SmtTerm::var("syn"))?;
        solver.assert(&SmtTerm::var("ack").not())?;

        let (_, model) = solver.check_sat_with_model(&[
            ("x", &SmtSort::Int),
            ("ack", &SmtSort::Bool),
            ("missing", &SmtSort::Bool),
        ])?;
        let model = model.ok_or("no model")?;
        assert_eq!(model.get_int("x"), Some(2));
        assert_eq!(model.get_bool("ack"), Some(false));
        assert_eq!(model.get_bool("missing"), None);
        Ok(())
    }

    #[test]
    fn undeclared_and_ill_sorted_terms_are_rejected() -> TestResult {
        let mut solver = Z3Solver::new();
        let err = solver.assert(&SmtTerm::var("ghost"));
        assert!(matches!(err, Err(Z3Error::UnknownVariable(name)) if name == "ghost"));
        solver.declare_var("x", &SmtSort::Int)?;
        assert!(solver.assert(&SmtTerm::var("x")).is_err());
        assert!(solver.assert(&SmtTerm::var("x").eq(SmtTerm::tt())).is_err());
        Ok(())
    }
}
