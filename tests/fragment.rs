use proptest::prelude::*;

use tolog::event::{Event, EventLog};
use tolog::lexer::{find_fragment_end, tokenize, Keyword, TokenKind};

fn kinds(text: &str) -> Vec<TokenKind> {
    tokenize(text).map(|t| t.expect("lexes").kind).collect()
}

fn fragment(text: &str) -> String {
    kinds(text)
        .into_iter()
        .find_map(|k| match k {
            TokenKind::Fragment(content) => Some(content),
            _ => None,
        })
        .expect("a fragment token")
}

#[test]
fn content_without_from_runs_to_the_end() {
    let text = r#"INSERT tolog-updates isa update-language; - "tolog updates"."#;
    assert_eq!(fragment(text), r#"tolog-updates isa update-language; - "tolog updates"."#);
}

#[test]
fn from_followed_by_clauses_splits() {
    let tokens = kinds("INSERT topic . from q($x)");
    assert_eq!(tokens[0], TokenKind::Keyword(Keyword::Insert));
    assert_eq!(tokens[1], TokenKind::Fragment("topic .".into()));
    assert_eq!(tokens[2], TokenKind::Keyword(Keyword::From), "lexing resumes at from");
    assert_eq!(tokens[3], TokenKind::Ident("q".into()));
}

#[test]
fn from_inside_content_does_not_split() {
    // the rest of the line holds a quote and a dot, so this from is content
    let text = r#"INSERT ex:a - "x"; from "y"."#;
    assert_eq!(fragment(text), r#"ex:a - "x"; from "y"."#);
}

#[test]
fn from_on_its_own_line_splits() {
    let text = "INSERT $t - \"Name\" .\nfrom\ninstance-of($t, person)";
    assert_eq!(fragment(text), "$t - \"Name\" .");
}

#[test]
fn single_trailing_newline_is_not_content() {
    assert_eq!(fragment("INSERT a isa b .\n"), "a isa b .");
    assert_eq!(fragment("INSERT a isa b .\n\n"), "a isa b .\n");
}

#[test]
fn insert_needs_whitespace() {
    let err = tokenize("INSERT(").nth(1).unwrap().unwrap_err();
    assert!(err.is_lexical_error(), "{err}");
}

#[test]
fn question_mark_inside_fragment_is_content() {
    assert_eq!(fragment("INSERT a - \"why?\" ."), "a - \"why?\" .");
}

#[test]
fn find_fragment_end_reports_resume_position() {
    let text = "abc   from x(y)";
    assert_eq!(find_fragment_end(text, 0), Some((3, 6)));
    assert_eq!(find_fragment_end(text, 100), None, "start past the end");
}

#[test]
fn fragment_variables_become_events() {
    let mut log = EventLog::new();
    tolog::parser::parse("insert $a - \"x\"; $b isa $a . from topic($a), topic($b)", &mut log, false)
        .expect("parses");
    let fragment: Vec<&Event> = log
        .events
        .iter()
        .skip_while(|e| **e != Event::StartFragment)
        .take_while(|e| **e != Event::EndFragment)
        .collect();
    assert_eq!(fragment[1], &Event::Variable("a".into()));
    assert_eq!(fragment[2], &Event::Variable("b".into()), "each variable once, first occurrence first");
    assert!(matches!(fragment[3], Event::FragmentContent(c) if c == "$a - \"x\"; $b isa $a ."));
}

#[test]
fn hash_after_from_keeps_it_in_the_content() {
    let tokens = kinds("INSERT a from b #c\nfrom q($x)");
    assert_eq!(tokens[1], TokenKind::Fragment("a from b #c".into()));
    assert_eq!(tokens[2], TokenKind::Keyword(Keyword::From));
}

#[test]
fn newline_after_from_does_not_hide_the_line() {
    // the whitespace after from crosses the newline, the next line decides
    assert_eq!(fragment("INSERT a from\n  b #c ."), "a from\n  b #c .");
    assert_eq!(fragment("INSERT a from\n  q($x)"), "a");
}

#[test]
fn space_before_newline_after_from_splits() {
    // consuming only the space leaves an empty rest of line
    assert_eq!(fragment("INSERT a from \n\"x\" ."), "a");
}

#[test]
fn first_acceptable_from_wins() {
    let tokens = kinds("INSERT a from q($x) from r($y)");
    assert_eq!(tokens[1], TokenKind::Fragment("a".into()));
    assert_eq!(tokens.iter().filter(|k| **k == TokenKind::Keyword(Keyword::From)).count(), 2);
}

fn word() -> impl Strategy<Value = String> {
    "[a-z]{1,6}".prop_filter("not from", |w| !w.contains("from"))
}

fn from_keyword() -> impl Strategy<Value = &'static str> {
    prop::sample::select(vec!["from", "FROM", "From"])
}

/// A `from` whose line goes on with a quote, a dot or a `#`.
fn content_from() -> impl Strategy<Value = String> {
    (
        prop::sample::select(vec![" ", "\n", " \n", "\t"]),
        from_keyword(),
        prop::sample::select(vec![" ", "\n", "\n  ", "\t"]),
        word(),
        prop::sample::select(vec!["#", "\"", "."]),
        word(),
    )
        .prop_map(|(before, from, after, w1, mark, w2)| format!("{before}{from}{after}{w1} {mark}{w2}"))
}

proptest! {
    #[test]
    fn content_froms_before_a_clause_list(
        head in word(),
        froms in prop::collection::vec(content_from(), 1..4),
        gap in prop::sample::select(vec![" ", "\n", " \n  ", "\t"]),
        from in from_keyword(),
    ) {
        let content = format!("{head}{}", froms.concat());
        let text = format!("INSERT {content}{gap}{from} q($x)");
        let tokens = kinds(&text);
        prop_assert_eq!(&tokens[1], &TokenKind::Fragment(content));
        prop_assert_eq!(&tokens[2], &TokenKind::Keyword(Keyword::From));
        prop_assert_eq!(&tokens[3], &TokenKind::Ident("q".into()));
    }

    #[test]
    fn only_content_froms_keep_everything(
        head in word(),
        froms in prop::collection::vec(content_from(), 1..4),
        trailing in prop::sample::select(vec!["", "\n"]),
    ) {
        let content = format!("{head}{}", froms.concat());
        let text = format!("INSERT {content}{trailing}");
        prop_assert_eq!(fragment(&text), content);
    }


    #[test]
    fn content_without_from_is_kept_whole(content in "[a-z][a-z ;:.\"-]{0,40}[a-z.]") {
        prop_assume!(!content.to_ascii_lowercase().contains("from"));
        let text = format!("INSERT {content}");
        prop_assert_eq!(fragment(&text), content);
    }

    #[test]
    fn clause_lists_after_from_are_lexed(name in "[a-z]{1,8}", var in "[a-z]{1,8}") {
        prop_assume!(name != "from" && tolog::lexer::Keyword::lookup(&name).is_none());
        let text = format!("INSERT {name} isa thing . from {name}(${var})");
        let tokens = kinds(&text);
        prop_assert_eq!(&tokens[1], &TokenKind::Fragment(format!("{name} isa thing .")));
        prop_assert_eq!(&tokens[2], &TokenKind::Keyword(Keyword::From));
        prop_assert_eq!(tokens.last(), Some(&TokenKind::RParen));
    }
}
