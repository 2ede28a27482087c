use proptest::prelude::*;

use tolog::error::TologError;
use tolog::iri::Iri;
use tolog::optimizer::{Optimizer, DEFAULT_PASSES, PASSES};
use tolog::source::Source;
use tolog::tree::{Element, TreeBuilder};
use tolog::ParseOptions;

fn raw_tree(text: &str) -> Element {
    let mut builder = TreeBuilder::new();
    tolog::parser::parse(text, &mut builder, true).unwrap_or_else(|e| panic!("{text}: {e}"));
    builder.into_tree().unwrap()
}

fn optimize(text: &str, passes: &[&str]) -> Element {
    Optimizer::new(passes).expect("known passes").optimize(raw_tree(text))
}

fn clause_names(list: &Element) -> Vec<String> {
    list.children
        .iter()
        .map(|c| c.attr("name").map_or(c.name.clone(), |n| format!("{}:{n}", c.name)))
        .collect()
}

fn where_of(tree: &Element) -> &Element {
    tree.child("select").and_then(|s| s.child("where")).expect("select with where")
}

#[test]
fn default_pass_order() {
    assert_eq!(Optimizer::default().names(), DEFAULT_PASSES.to_vec());
    assert!(Optimizer::none().is_empty());
    assert_eq!(PASSES.len(), DEFAULT_PASSES.len());
}

#[test]
fn unknown_pass_is_a_config_error() {
    let err = Optimizer::new(&["remove-duplicates", "make-it-fast"]).err().expect("fails");
    assert!(matches!(err, TologError::Config(ref m) if m.contains("make-it-fast")), "{err}");
}

#[test]
fn remove_duplicates() {
    let tree = optimize("topic($x), topic($x), instance-of($x, a), topic($x)?", &["remove-duplicates"]);
    let list = where_of(&tree);
    assert_eq!(clause_names(list), vec!["builtin-predicate:topic", "builtin-predicate:instance-of"]);
    assert_eq!(list.optimized_by(), vec!["remove-duplicates"]);
}

#[test]
fn remove_duplicates_inside_branches() {
    let tree = optimize("{ topic($x), topic($x) | instance-of($x, a) }?", &["remove-duplicates"]);
    let or = where_of(&tree).child("or").unwrap();
    assert_eq!(or.children[0].children.len(), 1);
    assert_eq!(or.children[1].children.len(), 1);
    assert!(where_of(&tree).optimized_by().is_empty(), "the where list itself did not change");
}

#[test]
fn narrow_hints() {
    let tree = optimize("topic-name($t, $n), value($n, \"x\")?", &["narrow-hints"]);
    let value = &where_of(&tree).children[1];
    assert_eq!(value.attr("name"), Some("value"));
    assert_eq!(value.attr("hints"), Some("name"));
    assert_eq!(value.optimized_by(), vec!["narrow-hints"]);
    let topic_name = &where_of(&tree).children[0];
    assert_eq!(topic_name.attr("hints"), Some("name"), "nothing to narrow");
    assert!(topic_name.optimized_by().is_empty());
}

#[test]
fn narrow_hints_needs_evidence() {
    let tree = optimize("value($n, \"x\")?", &["narrow-hints"]);
    assert_eq!(where_of(&tree).children[0].attr("hints"), Some("name occurrence variant"));
}

#[test]
fn branches_see_the_enclosing_where() {
    let tree = optimize("topic-name($t, $n), { value($n, \"x\") | topic($t) }?", &["narrow-hints"]);
    let or = where_of(&tree).child("or").unwrap();
    let value = &or.children[0].children[0];
    assert_eq!(value.attr("hints"), Some("name"));
    assert_eq!(value.optimized_by(), vec!["narrow-hints"]);

    let tree = optimize("topic-name($t, $n), not(value($n, \"x\"))?", &["narrow-hints"]);
    let not = where_of(&tree).child("not").unwrap();
    assert_eq!(not.children[0].attr("hints"), Some("name"));
}

#[test]
fn narrow_hints_ignores_negated_and_sibling_evidence() {
    let tree = optimize("not(topic-name($t, $n)), value($n, \"x\")?", &["narrow-hints"]);
    let value = &where_of(&tree).children[1];
    assert_eq!(value.attr("hints"), Some("name occurrence variant"), "a negated clause is no evidence");

    let tree = optimize("{ topic-name($t, $n) | value($n, \"x\") }?", &["narrow-hints"]);
    let or = where_of(&tree).child("or").unwrap();
    assert_eq!(or.children[1].children[0].attr("hints"), Some("name occurrence variant"));

    let tree = optimize("{ topic-name($t, $n) | topic($t) }, value($n, \"x\")?", &["narrow-hints"]);
    assert_eq!(where_of(&tree).children[1].attr("hints"), Some("name occurrence variant"));
}

#[test]
fn internal_predicates() {
    let tree = optimize("select $t from instance-of($x, $t)?", &["internal-predicates"]);
    let clause = &where_of(&tree).children[0];
    assert_eq!(clause.name, "internal-predicate");
    assert_eq!(clause.attr("name"), Some("types"));
    assert_eq!(clause.attr("removed-variables"), Some("x"));
    assert_eq!(clause.children.len(), 1);
    assert!(clause.children[0].is_variable("t"));

    let tree = optimize("select $x from direct-instance-of($x, $t)?", &["internal-predicates"]);
    assert_eq!(where_of(&tree).children[0].attr("name"), Some("direct-typed"));
}

#[test]
fn internal_predicates_keep_shared_variables() {
    let tree = optimize("select $x, $t from instance-of($x, $t)?", &["internal-predicates"]);
    assert_eq!(where_of(&tree).children[0].name, "builtin-predicate");

    // a variable in the inserted content counts as a use
    let tree = optimize("insert $x isa thing . from instance-of($x, $t), topic($t)", &["internal-predicates"]);
    let clause = &tree.child("insert").unwrap().child("where").unwrap().children[0];
    assert_eq!(clause.name, "builtin-predicate", "$x is used by the content");
}

#[test]
fn internal_predicates_in_rules_count_per_rule() {
    let tree = optimize("r($t) :- instance-of($x, $t) . select $x from instance-of($x, $y)?", &["internal-predicates"]);
    let rule_clause = &tree.child("rule").unwrap().child("body").unwrap().children[0];
    assert_eq!(rule_clause.attr("name"), Some("types"), "$x is unused inside the rule");
    assert_eq!(where_of(&tree).children[0].attr("name"), Some("typed"));
}

#[test]
fn filters_last() {
    let tree = optimize("$x /= $y, not(topic($z)), topic($x), topic($y)?", &["filters-last"]);
    let list = where_of(&tree);
    assert_eq!(
        clause_names(list),
        vec!["builtin-predicate:topic", "builtin-predicate:topic", "infix-predicate:ne", "not"]
    );
    assert_eq!(list.optimized_by(), vec!["filters-last"]);
}

#[test]
fn filters_already_last_are_left_alone() {
    let tree = optimize("topic($x), topic($y), $x /= $y?", &["filters-last"]);
    assert!(where_of(&tree).optimized_by().is_empty());
}

#[test]
fn passes_are_idempotent() {
    let corpus = [
        "topic($x), topic($x), $x /= $y, topic-name($x, $n), value($n, \"v\")?",
        "select $t from instance-of($x, $t), { topic($t) | not(topic($t)), topic($t) }?",
        "r($a) :- $a = 1, topic($a), topic($a) . select $a from r($a)?",
    ];
    for text in corpus {
        for pass in PASSES {
            let once = optimize(text, &[pass.name]);
            let twice = Optimizer::new(&[pass.name]).unwrap().optimize(once.clone());
            assert_eq!(once, twice, "{} on {text}", pass.name);
        }
        let once = Optimizer::default().optimize(raw_tree(text));
        let twice = Optimizer::default().optimize(once.clone());
        assert_eq!(once, twice, "default passes on {text}");
    }
}

#[test]
fn optimized_tree_builds_a_query() {
    let base = Iri::parse("http://example.org/").unwrap();
    let source = Source::from_text("topic($x), topic($x), $x /= @1, instance-of($x, $t)?", base);
    let query = tolog::parse_query(&source, &ParseOptions::tolog_plus()).expect("builds");
    let clauses = query.statement.as_ref().unwrap().clauses();
    assert_eq!(clauses.len(), 3);
    assert!(matches!(clauses[1], tolog::query::Clause::Internal { .. }));
    assert!(matches!(clauses[2], tolog::query::Clause::Infix { .. }));
}

#[test]
fn empty_pass_list_leaves_tree_alone() {
    let text = "topic($x), topic($x)?";
    let base = Iri::parse("http://example.org/").unwrap();
    let source = Source::from_text(text, base);
    let tree = tolog::parse_to_tree(&source, &ParseOptions::default().unoptimized()).unwrap();
    assert_eq!(tree, raw_tree(text));
}

const CLAUSES: &[&str] = &[
    "topic($x)",
    "topic($y)",
    "instance-of($x, $t)",
    "direct-instance-of($y, person)",
    "topic-name($x, $n)",
    "value($n, \"v\")",
    "occurrence($y, $o)",
    "$x /= $y",
    "not(topic($y))",
    "{ topic($x) | topic($y) }",
];

proptest! {
    #[test]
    fn each_pass_reaches_a_fixed_point(picks in prop::collection::vec(0..CLAUSES.len(), 1..8), select_t in any::<bool>()) {
        let body: Vec<&str> = picks.iter().map(|i| CLAUSES[*i]).collect();
        let text = if select_t {
            format!("select $t from {}?", body.join(", "))
        } else {
            format!("{}?", body.join(", "))
        };
        for pass in PASSES {
            let optimizer = Optimizer::new(&[pass.name]).unwrap();
            let once = optimizer.optimize(raw_tree(&text));
            let twice = optimizer.optimize(once.clone());
            prop_assert_eq!(&once, &twice, "{} on {}", pass.name, text);
        }
    }
}
