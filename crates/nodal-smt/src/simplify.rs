//! Equivalence-preserving term simplification.
//!
//! The rewrites here only fold constants, flatten nested connectives and drop
//! duplicates; they never change the set of models of a formula.

use std::collections::HashSet;

use crate::terms::SmtTerm;

/// Simplify `term` bottom-up.
pub fn simplify(term: &SmtTerm) -> SmtTerm {
    match term {
        SmtTerm::Var(_) | SmtTerm::IntLit(_) | SmtTerm::BoolLit(_) => term.clone(),
        SmtTerm::Add(l, r) => fold_arith(simplify(l), simplify(r), i64::checked_add, SmtTerm::add),
        SmtTerm::Sub(l, r) => {
            let (l, r) = (simplify(l), simplify(r));
            if r == SmtTerm::IntLit(0) {
                return l;
            }
            fold_arith(l, r, i64::checked_sub, SmtTerm::sub)
        }
        SmtTerm::Eq(l, r) => simplify_eq(simplify(l), simplify(r)),
        SmtTerm::Lt(l, r) => fold_cmp(simplify(l), simplify(r), |a, b| a < b, false, SmtTerm::lt),
        SmtTerm::Le(l, r) => fold_cmp(simplify(l), simplify(r), |a, b| a <= b, true, SmtTerm::le),
        SmtTerm::Gt(l, r) => fold_cmp(simplify(l), simplify(r), |a, b| a > b, false, SmtTerm::gt),
        SmtTerm::Ge(l, r) => fold_cmp(simplify(l), simplify(r), |a, b| a >= b, true, SmtTerm::ge),
        SmtTerm::And(terms) => simplify_junction(terms, true),
        SmtTerm::Or(terms) => simplify_junction(terms, false),
        SmtTerm::Not(inner) => negate(simplify(inner)),
        SmtTerm::Implies(l, r) => {
            let (l, r) = (simplify(l), simplify(r));
            match (&l, &r) {
                (SmtTerm::BoolLit(false), _) | (_, SmtTerm::BoolLit(true)) => SmtTerm::tt(),
                (SmtTerm::BoolLit(true), _) => r,
                (_, SmtTerm::BoolLit(false)) => negate(l),
                _ if l == r => SmtTerm::tt(),
                _ => l.implies(r),
            }
        }
        SmtTerm::Ite(c, t, e) => {
            let (c, t, e) = (simplify(c), simplify(t), simplify(e));
            match (&c, &t, &e) {
                (SmtTerm::BoolLit(true), _, _) => t,
                (SmtTerm::BoolLit(false), _, _) => e,
                _ if t == e => t,
                (_, SmtTerm::BoolLit(true), SmtTerm::BoolLit(false)) => c,
                (_, SmtTerm::BoolLit(false), SmtTerm::BoolLit(true)) => negate(c),
                _ => SmtTerm::ite(c, t, e),
            }
        }
    }
}

fn negate(term: SmtTerm) -> SmtTerm {
    match term {
        SmtTerm::BoolLit(b) => SmtTerm::BoolLit(!b),
        SmtTerm::Not(inner) => *inner,
        other => other.not(),
    }
}

fn fold_arith(
    l: SmtTerm,
    r: SmtTerm,
    op: fn(i64, i64) -> Option<i64>,
    rebuild: fn(SmtTerm, SmtTerm) -> SmtTerm,
) -> SmtTerm {
    if let (SmtTerm::IntLit(a), SmtTerm::IntLit(b)) = (&l, &r) {
        if let Some(n) = op(*a, *b) {
            return SmtTerm::IntLit(n);
        }
    }
    rebuild(l, r)
}

fn fold_cmp(
    l: SmtTerm,
    r: SmtTerm,
    op: fn(i64, i64) -> bool,
    reflexive: bool,
    rebuild: fn(SmtTerm, SmtTerm) -> SmtTerm,
) -> SmtTerm {
    match (&l, &r) {
        (SmtTerm::IntLit(a), SmtTerm::IntLit(b)) => SmtTerm::BoolLit(op(*a, *b)),
        _ if l == r => SmtTerm::BoolLit(reflexive),
        _ => rebuild(l, r),
    }
}

fn simplify_eq(l: SmtTerm, r: SmtTerm) -> SmtTerm {
    match (&l, &r) {
        (SmtTerm::IntLit(a), SmtTerm::IntLit(b)) => SmtTerm::BoolLit(a == b),
        (SmtTerm::BoolLit(a), SmtTerm::BoolLit(b)) => SmtTerm::BoolLit(a == b),
        (SmtTerm::BoolLit(true), _) => r,
        (_, SmtTerm::BoolLit(true)) => l,
        (SmtTerm::BoolLit(false), _) => negate(r),
        (_, SmtTerm::BoolLit(false)) => negate(l),
        _ if l == r => SmtTerm::tt(),
        _ => l.eq(r),
    }
}

/// Shared body for `and` (`conjunction == true`) and `or`.
fn simplify_junction(terms: &[SmtTerm], conjunction: bool) -> SmtTerm {
    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(terms.len());
    let mut stack: Vec<SmtTerm> = terms.iter().rev().map(simplify).collect();

    while let Some(t) = stack.pop() {
        match t {
            SmtTerm::BoolLit(b) if b == conjunction => {}
            SmtTerm::BoolLit(_) => return SmtTerm::BoolLit(!conjunction),
            SmtTerm::And(inner) if conjunction => stack.extend(inner.into_iter().rev()),
            SmtTerm::Or(inner) if !conjunction => stack.extend(inner.into_iter().rev()),
            other => {
                if seen.insert(other.clone()) {
                    out.push(other);
                }
            }
        }
    }

    // x and (not x), x or (not x)
    if out
        .iter()
        .any(|t| matches!(t, SmtTerm::Not(inner) if seen.contains(inner.as_ref())))
    {
        return SmtTerm::BoolLit(!conjunction);
    }

    match out.len() {
        0 => SmtTerm::BoolLit(conjunction),
        1 => out.remove(0),
        _ if conjunction => SmtTerm::And(out),
        _ => SmtTerm::Or(out),
    }
}
