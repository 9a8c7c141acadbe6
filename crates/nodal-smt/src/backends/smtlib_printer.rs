use std::fmt::Write as _;

use crate::terms::{SmtSort, SmtTerm};

/// Print an SmtTerm as SMT-LIB2 format.
pub fn to_smtlib(term: &SmtTerm) -> String {
    let mut out = String::new();
    write_term(&mut out, term);
    out
}

fn write_binary(out: &mut String, op: &str, lhs: &SmtTerm, rhs: &SmtTerm) {
    out.push('(');
    out.push_str(op);
    out.push(' ');
    write_term(out, lhs);
    out.push(' ');
    write_term(out, rhs);
    out.push(')');
}

fn write_nary(out: &mut String, op: &str, unit: &str, terms: &[SmtTerm]) {
    match terms {
        [] => out.push_str(unit),
        [single] => write_term(out, single),
        _ => {
            out.push('(');
            out.push_str(op);
            for t in terms {
                out.push(' ');
                write_term(out, t);
            }
            out.push(')');
        }
    }
}

fn write_term(out: &mut String, term: &SmtTerm) {
    match term {
        SmtTerm::Var(name) => out.push_str(name),
        SmtTerm::IntLit(n) => {
            if *n < 0 {
                let _ = write!(out, "(- {})", n.unsigned_abs());
            } else {
                let _ = write!(out, "{n}");
            }
        }
        SmtTerm::BoolLit(b) => out.push_str(if *b { "true" } else { "false" }),
        SmtTerm::Add(lhs, rhs) => write_binary(out, "+", lhs, rhs),
        SmtTerm::Sub(lhs, rhs) => write_binary(out, "-", lhs, rhs),
        SmtTerm::Eq(lhs, rhs) => write_binary(out, "=", lhs, rhs),
        SmtTerm::Lt(lhs, rhs) => write_binary(out, "<", lhs, rhs),
        SmtTerm::Le(lhs, rhs) => write_binary(out, "<=", lhs, rhs),
        SmtTerm::Gt(lhs, rhs) => write_binary(out, ">", lhs, rhs),
        SmtTerm::Ge(lhs, rhs) => write_binary(out, ">=", lhs, rhs),
        SmtTerm::And(terms) => write_nary(out, "and", "true", terms),
        SmtTerm::Or(terms) => write_nary(out, "or", "false", terms),
        SmtTerm::Not(inner) => {
            out.push_str("(not ");
            write_term(out, inner);
            out.push(')');
        }
        SmtTerm::Implies(lhs, rhs) => write_binary(out, "=>", lhs, rhs),
        SmtTerm::Ite(cond, then, els) => {
            out.push_str("(ite ");
            write_term(out, cond);
            out.push(' ');
            write_term(out, then);
            out.push(' ');
            write_term(out, els);
            out.push(')');
        }
    }
}

/// Print a sort as SMT-LIB2 format.
pub fn sort_to_smtlib(sort: &SmtSort) -> &'static str {
    match sort {
        SmtSort::Bool => "Bool",
        SmtSort::Int => "Int",
    }
}

/// Render declarations and assertions as a standalone SMT-LIB script.
pub fn query_to_smt2_script(declarations: &[(String, SmtSort)], assertions: &[SmtTerm]) -> String {
    let mut smt = String::new();
    smt.push_str("(set-logic QF_LIA)\n");
    for (name, sort) in declarations {
        let _ = writeln!(smt, "(declare-const {} {})", name, sort_to_smtlib(sort));
    }
    for assertion in assertions {
        let _ = writeln!(smt, "(assert {})", to_smtlib(assertion));
    }
    smt.push_str("(check-sat)\n");
    smt.push_str("(exit)\n");
    smt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_connectives_print_their_units() {
        assert_eq!(to_smtlib(&SmtTerm::and(vec![])), "true");
        assert_eq!(to_smtlib(&SmtTerm::or(vec![])), "false");
        assert_eq!(
            to_smtlib(&SmtTerm::and(vec![SmtTerm::var("a")])),
            "a",
            "singleton conjunction prints its only operand"
        );
    }

    #[test]
    fn negative_literals_use_unary_minus() {
        assert_eq!(to_smtlib(&SmtTerm::int(-5)), "(- 5)");
        assert_eq!(to_smtlib(&SmtTerm::int(i64::MIN)), "(- 9223372036854775808)");
    }

    #[test]
    fn script_declares_before_asserting() {
        let script = query_to_smt2_script(
            &[("dst_ip".to_string(), SmtSort::Int), ("ok".to_string(), SmtSort::Bool)],
            &[SmtTerm::var("ok").implies(SmtTerm::var("dst_ip").ge(SmtTerm::int(1)))],
        );
        let decl = script.find("(declare-const dst_ip Int)");
        let assert = script.find("(assert (=> ok (>= dst_ip 1)))");
        assert!(decl.is_some() && assert.is_some());
        assert!(decl < assert);
        assert!(script.starts_with("(set-logic QF_LIA)"));
        assert!(script.ends_with("(check-sat)\n(exit)\n"));
    }
}
