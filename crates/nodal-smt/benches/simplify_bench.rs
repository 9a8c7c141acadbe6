use criterion::{black_box, criterion_group, criterion_main, Criterion};
use nodal_smt::encoding::Encoding;
use nodal_smt::simplify::simplify;
use nodal_smt::terms::SmtTerm;

/// A first-match chain over `lines` port ranges, shaped like a compiled ACL.
fn acl_chain(lines: i64) -> SmtTerm {
    let mut earlier = Vec::new();
    let mut permits = Vec::new();
    for i in 0..lines {
        let matches = SmtTerm::and(vec![
            SmtTerm::var("dst_port").in_range(i * 10, i * 10 + 9),
            SmtTerm::tt(),
            SmtTerm::var("ip_protocol").eq(SmtTerm::int(6)),
        ]);
        let mut first = vec![matches.clone()];
        first.extend(earlier.iter().cloned().map(SmtTerm::not));
        if i % 2 == 0 {
            permits.push(SmtTerm::and(first));
        }
        earlier.push(matches);
    }
    SmtTerm::or(permits)
}

fn bench_simplify_acl_chain(c: &mut Criterion) {
    let term = acl_chain(64);
    c.bench_function("simplify_acl_chain_64", |b| b.iter(|| simplify(black_box(&term))));
}

fn bench_encoding_dedup(c: &mut Criterion) {
    let term = acl_chain(32);
    c.bench_function("encoding_dedup_acl_chain_32", |b| {
        b.iter(|| {
            let mut enc = Encoding::simplifying();
            for _ in 0..4 {
                enc.assert_term(black_box(term.clone()));
            }
            enc.assertion_unique()
        })
    });
}

criterion_group!(benches, bench_simplify_acl_chain, bench_encoding_dedup);
criterion_main!(benches);
