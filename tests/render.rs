use tolog::error::TologError;
use tolog::event::EventLog;
use tolog::iri::Iri;
use tolog::render::{render, Dialect, RenderOptions};
use tolog::source::Source;
use tolog::tree::TreeBuilder;
use tolog::ParseOptions;

const PLUS_CORPUS: &[&str] = &[
    "select $t from instance-of($t, person)?",
    "%base <http://example.org/base/>\n%prefix ex <http://example.org/>\nselect $a, count($b) from ex:works-for($a, $b) order by $a desc, $b limit 10 offset 5?",
    "%version 1.2 { instance-of($x, a) | instance-of($x, b) || topic($x) }, not(topic-name($x, $n)), $x /= @42?",
    "employed-by($p : employee, $c : employer), value($n, \"say \"\"hi\"\"\"), value($m, 1.5), value($k, -3)?",
    "ancestor-of($a, $d) :- parent-of($a, $d) . parent-of($p, $c) :- born-to($c : child, $p : parent) .",
    "insert topic-a isa thing . from topic($x)",
    "insert topic-a isa thing .",
    "update value($n, \"new\") from topic-name(@1, $n)",
    "delete $x, value($n, \"x\") from instance-of($x, person), topic-name($x, $n)",
    "merge $a, $b from subject-identifier($a, \"x\"), subject-identifier($b, \"x\")",
    "%version 1.2 load <http://example.org/a.ctm> into <http://example.org/tm>",
    "%version 1.2 drop <http://example.org/tm>",
    "%version 1.2 create <http://example.org/tm>",
    "%version 1.2 %prefix ex <http://example.org/> using loc for a\"http://example.org/loc/\" =ex:name($x, $y), [ex:b]($x, $y), ^ex:c($x, $y), topic(loc:doc)?",
    "%version 1.2 %import m <http://example.org/m.tl> m:friend($a, $b), value($o, \"1\"^^<http://www.w3.org/2001/XMLSchema#integer>), value($o, %p%), value($o, 2024-05-01T10:00:00Z)?",
];

fn events(text: &str) -> EventLog {
    let mut log = EventLog::new();
    tolog::parser::parse(text, &mut log, false).unwrap_or_else(|e| panic!("{text}: {e}"));
    log
}

fn render_raw(text: &str, options: RenderOptions) -> tolog::error::Result<String> {
    let mut builder = TreeBuilder::new();
    tolog::parser::parse(text, &mut builder, false)?;
    render(&builder.into_tree()?, options)
}

fn source(text: &str) -> Source {
    Source::from_text(text, Iri::parse("http://example.org/").unwrap())
}

#[test]
fn plus_round_trip_reproduces_events() {
    for text in PLUS_CORPUS {
        let rendered = render_raw(text, RenderOptions::plus()).unwrap_or_else(|e| panic!("{text}: {e}"));
        assert_eq!(events(text), events(&rendered), "{text}\nrendered as\n{rendered}");
    }
}

#[test]
fn legacy_round_trip_of_plain_queries() {
    for text in PLUS_CORPUS.iter().filter(|t| !t.contains("%")) {
        let rendered = render_raw(text, RenderOptions::legacy()).unwrap_or_else(|e| panic!("{text}: {e}"));
        assert!(!rendered.contains("%version"), "{rendered}");
        assert_eq!(events(text), events(&rendered), "{text}\nrendered as\n{rendered}");
    }
}

#[test]
fn plus_output_shape() {
    let text = "%prefix ex <http://example.org/>\nusing loc for a\"http://example.org/loc/\"\nselect $x from instance-of($x, ex:person) limit 2?";
    let rendered = render_raw(text, RenderOptions::plus()).unwrap();
    assert_eq!(
        rendered,
        "%version 1.2\n%prefix ex <http://example.org/>\nusing loc for a\"http://example.org/loc/\"\nselect $x from instance-of($x, ex:person) limit 2?\n"
    );
}

#[test]
fn legacy_prefixes() {
    let text = "%prefix ex <http://example.org/>\n%import m <http://example.org/m.tl>\ninstance-of($x, ex:person)?";
    let rendered = render_raw(text, RenderOptions::legacy()).unwrap();
    assert_eq!(
        rendered,
        "using ex for i\"http://example.org/\"\nimport \"http://example.org/m.tl\" as m\ninstance-of($x, ex:person)?\n"
    );
}

#[test]
fn legacy_rejects_plus_constructs() {
    for text in [
        "%base <http://example.org/> topic($x)?",
        "%version 1.2 topic($x), $x /= $y?",
        "%version 1.2 %prefix ex <http://example.org/> topic([ex:a])?",
        "%version 1.2 drop <http://example.org/tm>",
    ] {
        let err = render_raw(text, RenderOptions::legacy()).unwrap_err();
        assert!(matches!(err, TologError::Render(_)), "{text}: {err}");
    }
}

#[test]
fn legacy_writes_not_and_branches() {
    let text = "{ topic($x) | instance-of($x, a) || topic-name($x, $n) }, not(topic-name($x, $m))?";
    let rendered = render_raw(text, RenderOptions::legacy()).unwrap();
    assert_eq!(rendered, format!("{text}\n"));
}

#[test]
fn insert_with_clauses() {
    let rendered = render_raw("insert topic-a . from topic($x)", RenderOptions::plus()).unwrap();
    assert_eq!(rendered, "%version 1.2\ninsert topic-a . from \ntopic($x)\n");
}

#[test]
fn rules_are_written_one_per_line() {
    let rendered = render_raw("r($a) :- topic($a), instance-of($a, t) . r($x)?", RenderOptions::legacy()).unwrap();
    assert_eq!(rendered, "r($a) :- topic($a), instance-of($a, t) .\nr($x)?\n");
}

#[test]
fn internal_predicates_are_written_as_builtins() {
    let text = tolog::parse_to_tolog(&source("select $t from instance-of($x, $t)?"), &ParseOptions::default(), false)
        .unwrap();
    assert_eq!(text, "select $t from instance-of($x, $t)?\n");
}

#[test]
fn hints_become_comments() {
    let text = tolog::parse_to_tolog_plus(
        &source("select $t from instance-of($x, $t)?"),
        &ParseOptions::default(),
        true,
    )
    .unwrap();
    assert_eq!(text, "%version 1.2\nselect $t from /* optimized by internal-predicates */ instance-of($x, $t)?\n");
    assert_eq!(events(&text), events("select $t from instance-of($x, $t)?"), "comments do not change the query");
}

#[test]
fn list_annotations_are_written_before_the_list() {
    let options = ParseOptions { tolog_plus: true, optimizers: Some(vec!["filters-last".into()]) };
    let text = tolog::parse_to_tolog_plus(&source("$x /= $y, topic($x), topic($y)?"), &options, true).unwrap();
    assert_eq!(text, "%version 1.2\n/* optimized by filters-last */ topic($x), topic($y), $x /= $y?\n");
}

#[test]
fn optimized_output_reparses() {
    let text = "%version 1.2 topic($x), topic($x), $x /= @1, instance-of($x, $t), topic-name($x, $n), value($n, \"a\")?";
    let rendered = tolog::parse_to_tolog_plus(&source(text), &ParseOptions::default(), true).unwrap();
    let reparsed = tolog::parse_query(&source(&rendered), &ParseOptions::default()).unwrap();
    let original = tolog::parse_query(&source(text), &ParseOptions::default()).unwrap();
    assert_eq!(reparsed.statement, original.statement, "{rendered}");
}

#[test]
fn dialect_defaults_to_plus() {
    assert_eq!(RenderOptions::default().dialect, Dialect::Plus);
    assert!(!RenderOptions::default().hints);
}
