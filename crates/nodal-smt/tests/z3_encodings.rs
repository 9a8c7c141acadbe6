//! Z3 verdicts on the shapes of formula the reachability encodings produce,
//! with and without simplification.

use nodal_smt::backends::z3_backend::Z3Solver;
use nodal_smt::encoding::Encoding;
use nodal_smt::solver::{SatResult, SmtSolver};
use nodal_smt::terms::{SmtSort, SmtTerm};

fn fresh(simplify: bool) -> Encoding {
    if simplify {
        Encoding::simplifying()
    } else {
        Encoding::new()
    }
}

/// dst_ip in 10.0.0.0/8, but not in 10.1.0.0/16 and not equal to 10.0.0.1.
fn prefix_exclusion(simplify: bool) -> Encoding {
    let mut enc = fresh(simplify);
    enc.declare("dst_ip", SmtSort::Int);
    enc.assert_term(SmtTerm::var("dst_ip").in_range(0x0a00_0000, 0x0aff_ffff));
    enc.assert_term(SmtTerm::var("dst_ip").in_range(0x0a01_0000, 0x0a01_ffff).not());
    enc.assert_term(SmtTerm::var("dst_ip").eq(SmtTerm::int(0x0a00_0001)).not());
    enc
}

/// First-match ACL where the second line is shadowed by the first.
fn shadowed_line(simplify: bool) -> Encoding {
    let mut enc = fresh(simplify);
    enc.declare("dst_port", SmtSort::Int);
    let line0 = SmtTerm::var("dst_port").in_range(0, 1023);
    let line1 = SmtTerm::var("dst_port").in_range(80, 80);
    enc.assert_term(SmtTerm::and(vec![line1, line0.not().not().not(), SmtTerm::tt()]));
    enc
}

/// Two bits of an address tied to its integer value.
fn bit_blast(simplify: bool) -> Encoding {
    let mut enc = fresh(simplify);
    enc.declare("ip", SmtSort::Int);
    enc.declare("b0", SmtSort::Bool);
    enc.declare("b1", SmtSort::Bool);
    let sum = SmtTerm::ite(SmtTerm::var("b0"), SmtTerm::int(1), SmtTerm::int(0))
        .add(SmtTerm::ite(SmtTerm::var("b1"), SmtTerm::int(2), SmtTerm::int(0)));
    enc.assert_term(SmtTerm::var("ip").eq(sum));
    enc.assert_term(SmtTerm::var("ip").eq(SmtTerm::int(2)));
    enc.assert_term(SmtTerm::var("b0"));
    enc
}

fn check(enc: &Encoding) -> SatResult {
    let mut solver = Z3Solver::new();
    enc.apply(&mut solver).unwrap();
    solver.check_sat().unwrap()
}

#[test]
fn verdicts_do_not_depend_on_simplification() {
    type Shape = fn(bool) -> Encoding;
    let shapes: [(&str, Shape, SatResult); 3] = [
        ("prefix exclusion", prefix_exclusion, SatResult::Sat),
        ("shadowed line", shadowed_line, SatResult::Unsat),
        ("bit blast", bit_blast, SatResult::Unsat),
    ];
    for (name, shape, expected) in shapes {
        for simplify in [false, true] {
            let enc = shape(simplify);
            assert_eq!(check(&enc), expected, "{name} (simplify={simplify}):\n{}", enc.to_smt2_script());
        }
    }
}

#[test]
fn excluded_prefix_model_lands_outside_the_hole() {
    let mut solver = Z3Solver::with_timeout_ms(10_000);
    prefix_exclusion(true).apply(&mut solver).unwrap();
    let (result, model) = solver.check_sat_with_model(&[("dst_ip", &SmtSort::Int)]).unwrap();
    assert_eq!(result, SatResult::Sat);
    let ip = model.unwrap().get_int("dst_ip").unwrap();
    assert!((0x0a00_0000..=0x0aff_ffff).contains(&ip));
    assert!(!(0x0a01_0000..=0x0a01_ffff).contains(&ip));
    assert_ne!(ip, 0x0a00_0001);
}
