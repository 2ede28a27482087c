use tolog::event::{Event, EventLog, ReferenceKind};
use tolog::parser::parse;

fn events(text: &str, tolog_plus: bool) -> tolog::error::Result<Vec<Event>> {
    let mut log = EventLog::new();
    parse(text, &mut log, tolog_plus)?;
    Ok(log.events)
}

fn namespaces(events: &[Event]) -> Vec<(String, String, ReferenceKind)> {
    events
        .iter()
        .filter_map(|e| match e {
            Event::Namespace { identifier, iri, kind } => Some((identifier.clone(), iri.clone(), *kind)),
            _ => None,
        })
        .collect()
}

#[test]
fn prefix_forms() {
    let text = r#"%prefix ex <http://example.org/>
using loc for a"http://example.org/loc/"
using ii for s"http://example.org/ii/"
import "http://example.org/rules.tl" as r
instance-of($x, ex:person)?"#;
    let events = events(text, false).expect("parses");
    assert_eq!(
        namespaces(&events),
        vec![
            ("ex".into(), "http://example.org/".into(), ReferenceKind::SubjectIdentifier),
            ("loc".into(), "http://example.org/loc/".into(), ReferenceKind::SubjectLocator),
            ("ii".into(), "http://example.org/ii/".into(), ReferenceKind::ItemIdentifier),
            ("r".into(), "http://example.org/rules.tl".into(), ReferenceKind::Module),
        ]
    );
}

#[test]
fn repeating_an_identical_prefix_is_allowed() {
    let text = "%prefix ex <http://example.org/>\n%prefix ex <http://example.org/>\ninstance-of($x, ex:a)?";
    let events = events(text, false).expect("identical rebinding parses");
    assert_eq!(namespaces(&events).len(), 1, "reported once");
}

#[test]
fn rebinding_a_prefix_fails() {
    let text = "%prefix ex <http://example.org/>\n%prefix ex <http://other.org/>\ninstance-of($x, ex:a)?";
    let err = events(text, false).unwrap_err();
    assert!(err.is_query_error(), "{err}");
    assert!(err.to_string().contains("already bound"), "{err}");
    assert!(err.to_string().contains("2:1"), "reported at the second directive: {err}");
}

#[test]
fn rebinding_with_another_kind_fails() {
    let text = "%prefix ex <http://example.org/>\nusing ex for a\"http://example.org/\"\ninstance-of($x, ex:a)?";
    assert!(events(text, false).unwrap_err().is_query_error());
}

#[test]
fn base_must_come_first() {
    let ok = events("%base <http://example.org/>\n%version 1.1\ninstance-of($x, y)?", false).expect("parses");
    assert_eq!(ok[1], Event::Base("http://example.org/".into()));

    let err = events("%version 1.1\n%base <http://example.org/>\ninstance-of($x, y)?", false).unwrap_err();
    assert!(err.to_string().contains("%base must be the first directive"), "{err}");
}

#[test]
fn version_switches_dialect() {
    let plus = "instance-of($x, y), $x /= $y?";
    assert!(events(plus, false).is_err(), "infix predicates need tolog+");
    assert!(events(&format!("%version 1.1 {plus}"), false).is_ok());
    assert!(events(&format!("%version 1.2 {plus}"), false).is_ok());
    assert!(events(&format!("%version 1.0 {plus}"), false).is_err(), "1.0 stays plain tolog");
    assert!(events(plus, true).is_ok(), "tolog+ requested by the caller");
}

#[test]
fn unsupported_version() {
    let err = events("%version 2.0 instance-of($x, y)?", false).unwrap_err();
    assert!(err.to_string().contains("unsupported tolog version 2.0"), "{err}");
}

#[test]
fn unknown_directive() {
    let err = events("%frobnicate instance-of($x, y)?", false).unwrap_err();
    assert!(err.is_query_error());
}

#[test]
fn unbound_prefix_is_reported() {
    let err = events("instance-of($x, ex:person)?", false).unwrap_err();
    assert!(err.to_string().contains("unbound prefix 'ex'"), "{err}");
    assert!(err.to_string().contains("1:17"), "position of the QName: {err}");
}

#[test]
fn module_prefix_cannot_be_a_reference() {
    let text = "%version 1.2 %import m <http://example.org/m.tl>\ninstance-of($x, m:thing)?";
    let err = events(text, false).unwrap_err();
    assert!(err.to_string().contains("module prefix 'm'"), "{err}");
}

#[test]
fn module_qname_in_name_position() {
    let text = "%version 1.2 %import m <http://example.org/m.tl>\nm:friend($a, $b)?";
    let events = events(text, false).expect("parses");
    assert!(events.contains(&Event::StartPredicate), "module rule calls are plain predicates");
    assert!(events.contains(&Event::QName {
        kind: ReferenceKind::Module,
        prefix: "m".into(),
        local: "friend".into()
    }));
}
