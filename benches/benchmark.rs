use std::hint::black_box;

use criterion::{criterion_group, criterion_main, Criterion};

use tolog::event::EventLog;
use tolog::iri::Iri;
use tolog::lexer::tokenize;
use tolog::source::Source;
use tolog::ParseOptions;

const RULES: &str = r#"%version 1.2
%prefix ex <http://example.org/>
works-for($person, $company) :- { employed-by($person : employee, $company : employer) | ex:contractor($person, $company) } .
colleague-of($a, $b) :- works-for($a, $c), works-for($b, $c), $a /= $b .
"#;

fn query(clauses: usize) -> String {
    let mut text = String::from(RULES);
    text.push_str("select $a, count($b) from ");
    for i in 0..clauses {
        if i > 0 {
            text.push_str(", ");
        }
        text.push_str(&format!("colleague-of($a, $b), instance-of($a, person), topic-name($a, $n{i}), value($n{i}, \"name {i}\")"));
    }
    text.push_str(" order by $a limit 10?");
    text
}

pub fn criterion_benchmark(c: &mut Criterion) {
    let base = Iri::parse("http://example.org/q").unwrap();
    for clauses in [1, 10, 100] {
        let text = query(clauses);
        c.bench_function(&format!("tokenize {clauses}"), |b| {
            b.iter(|| tokenize(black_box(&text)).count())
        });
        let source = Source::from_text(text.clone(), base.clone());
        c.bench_function(&format!("parse events {clauses}"), |b| {
            b.iter(|| tolog::parse(black_box(&source), &mut EventLog::new(), false).unwrap())
        });
        let options = ParseOptions::default();
        c.bench_function(&format!("parse query {clauses}"), |b| {
            b.iter(|| tolog::parse_query(black_box(&source), &options).unwrap())
        });
        c.bench_function(&format!("render tolog+ {clauses}"), |b| {
            b.iter(|| tolog::parse_to_tolog_plus(black_box(&source), &options, true).unwrap())
        });
    }
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
