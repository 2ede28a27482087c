//! Tree rewrites over the XML projection.
//!
//! An [`Optimizer`] is an ordered list of named passes taken from the static
//! [`PASSES`] table. Every pass is a pure `Element -> Element` function which
//! reaches a fixed point after one application, and marks each element it
//! changed with an `optimized-by` annotation.

use std::collections::HashMap;

use tracing::debug;

use crate::OtherHasher;
use crate::builtin;
use crate::error::{Result, TologError};
use crate::event::Hint;
use crate::tree::Element;

pub struct Pass {
    pub name: &'static str,
    pub description: &'static str,
    pub apply: fn(Element) -> Element,
}

pub static PASSES: &[Pass] = &[
    Pass {
        name: "remove-duplicates",
        description: "drops clauses equal to an earlier clause of the same list",
        apply: remove_duplicates,
    },
    Pass {
        name: "narrow-hints",
        description: "narrows built-in predicate hints using the kinds implied by other clauses",
        apply: narrow_hints,
    },
    Pass {
        name: "internal-predicates",
        description: "replaces instance-of with an internal predicate when a variable is used once",
        apply: internal_predicates,
    },
    Pass {
        name: "filters-last",
        description: "moves comparisons and negations behind the other clauses",
        apply: filters_last,
    },
];

/// Used when no pass list is given.
pub const DEFAULT_PASSES: &[&str] = &["remove-duplicates", "narrow-hints", "internal-predicates", "filters-last"];

pub fn pass(name: &str) -> Option<&'static Pass> {
    PASSES.iter().find(|p| p.name == name)
}

#[derive(Clone)]
pub struct Optimizer {
    passes: Vec<&'static Pass>,
}

impl Default for Optimizer {
    fn default() -> Self {
        Self { passes: DEFAULT_PASSES.iter().filter_map(|name| pass(name)).collect() }
    }
}

impl Optimizer {
    /// Passes in the given order; an unknown name is a configuration error.
    pub fn new<S: AsRef<str>>(names: &[S]) -> Result<Self> {
        let passes = names
            .iter()
            .map(|name| {
                let name = name.as_ref();
                pass(name).ok_or_else(|| TologError::Config(format!("unknown optimizer pass '{name}'")))
            })
            .collect::<Result<_>>()?;
        Ok(Self { passes })
    }

    /// An optimizer that leaves the tree alone.
    pub fn none() -> Self {
        Self { passes: Vec::new() }
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.passes.iter().map(|p| p.name).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.passes.is_empty()
    }

    pub fn optimize(&self, mut tree: Element) -> Element {
        debug!(passes = ?self.names(), "optimizing");
        for pass in &self.passes {
            let before = tree.clone();
            tree = (pass.apply)(tree);
            debug!(pass = pass.name, changed = !before.same_as(&tree), "optimizer pass");
        }
        tree
    }
}

// ------------- Helpers -------------
const CLAUSE_LISTS: &[&str] = &["where", "body", "branch", "not"];

fn is_filter(clause: &Element) -> bool {
    matches!(clause.name.as_str(), "infix-predicate" | "not")
}

/// Applies `f` to the clause list of every where/body/branch/not element,
/// innermost lists first. `f` returns whether it changed the list.
fn each_list(element: &mut Element, f: &mut dyn FnMut(&mut Vec<Element>) -> bool, pass: &str) {
    for child in &mut element.children {
        each_list(child, f, pass);
    }
    if CLAUSE_LISTS.contains(&element.name.as_str()) && f(&mut element.children) {
        element.annotate(pass);
    }
}

/// Elements that are arguments of a predicate clause.
fn arguments(clause: &Element) -> impl Iterator<Item = &Element> {
    clause.children.iter().filter(|c| c.name != "name")
}

fn variable_of(element: &Element) -> Option<&str> {
    (element.name == "variable").then(|| element.attr("value")).flatten()
}

// ------------- remove-duplicates -------------
fn remove_duplicates(mut tree: Element) -> Element {
    each_list(
        &mut tree,
        &mut |clauses| {
            let before = clauses.len();
            let mut kept: Vec<Element> = Vec::with_capacity(before);
            for clause in clauses.drain(..) {
                if !kept.iter().any(|k| k.same_as(&clause)) {
                    kept.push(clause);
                }
            }
            *clauses = kept;
            clauses.len() != before
        },
        "remove-duplicates",
    );
    tree
}

// ------------- narrow-hints -------------
/// Kinds a clause implies for the variables at its argument positions.
fn implied_kinds(clause: &Element) -> Vec<(&str, Hint)> {
    if clause.name != "builtin-predicate" {
        return Vec::new();
    }
    let positions: &[(usize, Hint)] = match clause.attr("name") {
        Some("association") => &[(0, Hint::Association)],
        Some("association-role") => &[(0, Hint::Association), (1, Hint::Role)],
        Some("role-player") => &[(0, Hint::Role)],
        Some("occurrence") => &[(1, Hint::Occurrence)],
        Some("topic-name") => &[(1, Hint::Name)],
        Some("variant") => &[(0, Hint::Name), (1, Hint::Variant)],
        _ => &[],
    };
    let args: Vec<&Element> = arguments(clause).collect();
    positions
        .iter()
        .filter_map(|(i, hint)| args.get(*i).and_then(|a| variable_of(a)).map(|v| (v, *hint)))
        .collect()
}

fn narrow_hints(mut tree: Element) -> Element {
    for scope in &mut tree.children {
        narrow_in(scope, &[]);
    }
    tree
}

/// Narrows the builtin predicates of every clause list below `element`.
/// `outer` holds the kinds implied by the clauses of the enclosing lists, so
/// a branch sees its where clause but not its sibling branches.
fn narrow_in(element: &mut Element, outer: &[(String, Hint)]) {
    if !CLAUSE_LISTS.contains(&element.name.as_str()) {
        for child in &mut element.children {
            narrow_in(child, outer);
        }
        return;
    }
    // a negated clause implies nothing about its variables
    let local: Vec<Vec<(String, Hint)>> = element
        .children
        .iter()
        .map(|c| {
            if element.name == "not" {
                Vec::new()
            } else {
                implied_kinds(c).into_iter().map(|(v, h)| (v.to_string(), h)).collect()
            }
        })
        .collect();
    for (i, clause) in element.children.iter_mut().enumerate() {
        let evidence = outer
            .iter()
            .chain(local.iter().enumerate().filter(|(j, _)| *j != i).flat_map(|(_, kinds)| kinds.iter()));
        narrow_clause(clause, evidence);
    }
    let inner: Vec<(String, Hint)> = outer.iter().cloned().chain(local.into_iter().flatten()).collect();
    for clause in &mut element.children {
        narrow_in(clause, &inner);
    }
}

fn narrow_clause<'e>(clause: &mut Element, evidence: impl Iterator<Item = &'e (String, Hint)>) {
    if clause.name != "builtin-predicate" {
        return;
    }
    let Some(hints) = clause.attr("hints").and_then(Hint::split) else {
        return;
    };
    let Some(first) = arguments(clause).next().and_then(variable_of).map(str::to_string) else {
        return;
    };
    let kinds: Vec<Hint> = evidence.filter(|(v, _)| *v == first).map(|(_, h)| *h).collect();
    let narrowed: Vec<Hint> = hints.iter().copied().filter(|h| kinds.contains(h)).collect();
    if !narrowed.is_empty() && narrowed.len() < hints.len() {
        clause.set_attr("hints", Hint::join(&narrowed));
        clause.annotate("narrow-hints");
    }
}

// ------------- internal-predicates -------------
/// How often each variable is mentioned below `scope`.
fn variable_counts(scope: &Element) -> HashMap<String, usize, OtherHasher> {
    let mut counts: HashMap<String, usize, OtherHasher> = HashMap::default();
    for e in scope.descendants() {
        if let ("variable" | "count" | "ascending" | "descending", Some(v)) = (e.name.as_str(), e.attr("value")) {
            *counts.entry(v.to_string()).or_default() += 1;
        }
        if e.name == "content" {
            for v in crate::parser::fragment_variables(e.text.as_deref().unwrap_or("")) {
                *counts.entry(v).or_default() += 1;
            }
        }
    }
    counts
}

fn to_internal(clause: &mut Element, counts: &HashMap<String, usize, OtherHasher>) -> bool {
    if clause.name != "builtin-predicate" {
        return false;
    }
    let Some(name) = clause.attr("name").map(str::to_string) else {
        return false;
    };
    let args: Vec<Option<String>> = arguments(clause).map(|a| variable_of(a).map(str::to_string)).collect();
    if args.len() != 2 {
        return false;
    }
    let single = |at: usize| args[at].as_ref().filter(|v| counts.get(v.as_str()) == Some(&1));
    let Some((removed_at, variable)) = [0, 1].into_iter().find_map(|at| single(at).map(|v| (at, v.clone()))) else {
        return false;
    };
    let Some(internal) = builtin::internal_for(&name, removed_at) else {
        return false;
    };
    let mut rewritten = Element::new("internal-predicate").with_attr("name", internal.name);
    if let Some(hints) = clause.attr("hints") {
        rewritten.set_attr("hints", hints);
    }
    rewritten.set_attr("removed-variables", variable);
    let mut position = 0;
    for child in clause.children.drain(..) {
        if child.name != "name" {
            position += 1;
            if position - 1 == removed_at {
                continue;
            }
        }
        rewritten.children.push(child);
    }
    rewritten.annotate("internal-predicates");
    *clause = rewritten;
    true
}

fn rewrite_clauses(element: &mut Element, counts: &HashMap<String, usize, OtherHasher>) {
    let is_list = CLAUSE_LISTS.contains(&element.name.as_str());
    for child in &mut element.children {
        if is_list {
            to_internal(child, counts);
        }
        rewrite_clauses(child, counts);
    }
}

fn internal_predicates(mut tree: Element) -> Element {
    for scope in &mut tree.children {
        if matches!(scope.name.as_str(), "base" | "namespace") {
            continue;
        }
        let counts = variable_counts(scope);
        rewrite_clauses(scope, &counts);
    }
    tree
}

// ------------- filters-last -------------
fn filters_last(mut tree: Element) -> Element {
    each_list(
        &mut tree,
        &mut |clauses| {
            let Some(first_filter) = clauses.iter().position(is_filter) else {
                return false;
            };
            if clauses[first_filter..].iter().all(is_filter) {
                return false;
            }
            let (others, filters): (Vec<Element>, Vec<Element>) = clauses.drain(..).partition(|c| !is_filter(c));
            clauses.extend(others);
            clauses.extend(filters);
            true
        },
        "filters-last",
    );
    tree
}
