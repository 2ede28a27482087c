use tolog::event::{check_nesting, Event, EventLog};
use tolog::parser::parse;
use tolog::render::RenderOptions;
use tolog::tree::TreeBuilder;

// plain tolog queries, parsed without tolog+
const LEGACY: &[&str] = &[
    "select $PERSON from
      born-in($PERSON : person, $CITY : place),
      located-in($CITY : containee, italy : container)?",
    "select $A, count($B) from
      composed-by($A : composer, $B : opera)?",
    "select $A, count($B) from
      composed-by($A : composer, $B : opera)
    order by $B desc?",
    "select $OPERA from
      { premiere($OPERA : opera, milano : place) |
        premiere($OPERA : opera, $THEATRE : place),
        located-in($THEATRE : containee, milano : container) }?",
    r#"select $TOP from
      i"http://www.topicmaps.org/xtm/1.0/core.xtm#superclass-subclass"(
        $TOP : i"http://www.topicmaps.org/xtm/1.0/core.xtm#superclass",
        $SUB : i"http://www.topicmaps.org/xtm/1.0/core.xtm#subclass"),
      not(i"http://www.topicmaps.org/xtm/1.0/core.xtm#superclass-subclass"(
        $OTHER : i"http://www.topicmaps.org/xtm/1.0/core.xtm#superclass",
        $TOP : i"http://www.topicmaps.org/xtm/1.0/core.xtm#subclass"))?"#,
    "select $A, count($B) from
      composed-by($A : composer, $B : opera)
    order by $B desc LiMiT 1?",
    r#"select $UPNAME from
      instance-of($PERSON, person), name($PERSON, $NAME),
      substring($NAME, 0, 1, $FIRST), translate($FIRST, "abcdef...", "ABCDEF...", $U1),
      substring($NAME, 1, 1000, $REST), concat($U1, $REST, $UPNAME)
    order by $UPNAME?"#,
    r#"import "http://psi.ontopia.net/tolog/string/" as str
   insert $topic $psi . from
   article-about($topic, $psi),
   str:starts-with($psi, "http://en.wikipedia.org/wiki/")"#,
    r#"update value($TN, "Ontopia") from
   topic-name(oks, $TN)"#,
    "merge $T1, $T2 from
   email($T1, $EMAIL),
   email($T2, $EMAIL)",
    "select $x from { bla($x) || blub($x) } ?",
    "select $TYPE, $VALUE from
      occurrence(topic, $OCC),
      type($OCC, $TYPE),
      { resource($OCC, $VALUE) | value($OCC, $VALUE) }?",
];

fn events(text: &str) -> Vec<Event> {
    let mut log = EventLog::new();
    parse(text, &mut log, false).unwrap_or_else(|e| panic!("{text}: {e}"));
    log.events
}

#[test]
fn legacy_corpus_parses() {
    for text in LEGACY {
        let events = events(text);
        check_nesting(&events).unwrap_or_else(|e| panic!("{text}: {e}"));
    }
}

#[test]
fn not_and_branches_are_plain_tolog() {
    let events = events("select $x from { bla($x) || blub($x) } ?");
    assert!(events.contains(&Event::StartOr));
    assert!(events.contains(&Event::StartBranch { short_circuit: true }), "|| marks the second branch");

    let events = self::events("instance-of($x, a), not(topic-name($x, $n))?");
    assert!(events.contains(&Event::StartNot));
}

#[test]
fn legacy_corpus_renders_as_legacy() {
    for text in LEGACY.iter().filter(|t| !t.contains("insert")) {
        let mut builder = TreeBuilder::new();
        parse(text, &mut builder, false).unwrap();
        let rendered = tolog::render::render(&builder.into_tree().unwrap(), RenderOptions::legacy())
            .unwrap_or_else(|e| panic!("{text}: {e}"));
        assert!(!rendered.contains("%version"), "{rendered}");
        assert_eq!(events(text), events(&rendered), "{text}\nrendered as\n{rendered}");
    }
}
