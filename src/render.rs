//! Writes a (possibly optimized) projection back as query text.

use std::collections::HashMap;
use std::fmt::Write;

use serde::Deserialize;

use crate::OtherHasher;
use crate::builtin;
use crate::error::{Result, TologError};
use crate::event::{InfixOp, ReferenceKind};
use crate::tree::Element;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Dialect {
    /// tolog 1.0: `using`/`import` directives, no tolog+ constructs
    Legacy,
    #[default]
    Plus,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RenderOptions {
    pub dialect: Dialect,
    /// emit `/* optimized by ... */` comments for rewritten nodes
    pub hints: bool,
}

impl RenderOptions {
    pub fn legacy() -> Self {
        Self { dialect: Dialect::Legacy, hints: false }
    }

    pub fn plus() -> Self {
        Self { dialect: Dialect::Plus, hints: false }
    }

    pub fn with_hints(mut self, hints: bool) -> Self {
        self.hints = hints;
        self
    }
}

pub fn render(tree: &Element, options: RenderOptions) -> Result<String> {
    let mut renderer = Renderer { options, prefixes: HashMap::default(), out: String::new() };
    renderer.document(tree)?;
    Ok(renderer.out)
}

struct Renderer {
    options: RenderOptions,
    prefixes: HashMap<String, ReferenceKind, OtherHasher>,
    out: String,
}

fn required<'e>(element: &'e Element, attr: &str) -> Result<&'e str> {
    element
        .attr(attr)
        .ok_or_else(|| TologError::Render(format!("<{}> lacks the {attr} attribute", element.name)))
}

fn value(element: &Element) -> Result<&str> {
    required(element, "value")
}

fn quote(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

fn reference_letter(kind: ReferenceKind) -> &'static str {
    match kind {
        ReferenceKind::SubjectLocator => "a",
        ReferenceKind::ItemIdentifier => "s",
        ReferenceKind::SubjectIdentifier | ReferenceKind::Module => "i",
    }
}

fn marker(kind: ReferenceKind) -> &'static str {
    match kind {
        ReferenceKind::SubjectLocator => "=",
        ReferenceKind::ItemIdentifier => "^",
        ReferenceKind::SubjectIdentifier | ReferenceKind::Module => "",
    }
}

impl Renderer {
    fn plus(&self) -> bool {
        self.options.dialect == Dialect::Plus
    }

    fn require_plus(&self, what: &str) -> Result<()> {
        if self.plus() {
            Ok(())
        } else {
            Err(TologError::Render(format!("{what} cannot be written in tolog 1.0")))
        }
    }

    fn hint(&self, element: &Element) -> String {
        let passes = element.optimized_by();
        if !self.options.hints || passes.is_empty() {
            return String::new();
        }
        format!("/* optimized by {} */ ", passes.join(", "))
    }

    // ------------- document -------------
    fn document(&mut self, tree: &Element) -> Result<()> {
        if tree.name != "tolog" {
            return Err(TologError::Render(format!("expected <tolog>, found <{}>", tree.name)));
        }
        let mut header = String::new();
        if let Some(base) = tree.child("base") {
            self.require_plus("%base")?;
            writeln!(header, "%base <{}>", required(base, "iri")?).ok();
        }
        if self.plus() {
            header.push_str("%version 1.2\n");
        }
        for ns in tree.children.iter().filter(|c| c.name == "namespace") {
            let identifier = required(ns, "identifier")?;
            let iri = required(ns, "iri")?;
            let kind = ReferenceKind::parse(required(ns, "kind")?)
                .ok_or_else(|| TologError::Render(format!("unknown prefix kind for {identifier}")))?;
            self.prefixes.insert(identifier.to_string(), kind);
            let line = match (kind, self.plus()) {
                (ReferenceKind::SubjectIdentifier, true) => format!("%prefix {identifier} <{iri}>"),
                (ReferenceKind::Module, true) => format!("%import {identifier} <{iri}>"),
                (ReferenceKind::Module, false) => format!("import {} as {identifier}", quote(iri)),
                (kind, _) => format!("using {identifier} for {}{}", reference_letter(kind), quote(iri)),
            };
            header.push_str(&line);
            header.push('\n');
        }
        self.out.push_str(&header);
        for child in &tree.children {
            match child.name.as_str() {
                "base" | "namespace" => {}
                "rule" => self.rule(child)?,
                _ => self.statement(child)?,
            }
        }
        Ok(())
    }

    fn rule(&mut self, rule: &Element) -> Result<()> {
        let name = required(rule, "name")?;
        let parameters = rule
            .children
            .iter()
            .filter(|c| c.name == "variable")
            .map(|v| value(v).map(|v| format!("${v}")))
            .collect::<Result<Vec<_>>>()?;
        let body = match rule.child("body") {
            Some(body) => self.clause_list(body)?,
            None => String::new(),
        };
        let hint = self.hint(rule);
        writeln!(self.out, "{hint}{name}({}) :- {body} .", parameters.join(", ")).ok();
        Ok(())
    }

    // ------------- statements -------------
    fn statement(&mut self, statement: &Element) -> Result<()> {
        let hint = self.hint(statement);
        let head = match statement.name.as_str() {
            "select" => {
                let projection = statement
                    .children
                    .iter()
                    .filter_map(|c| match c.name.as_str() {
                        "variable" => Some(value(c).map(|v| format!("${v}"))),
                        "count" => Some(value(c).map(|v| format!("count(${v})"))),
                        _ => None,
                    })
                    .collect::<Result<Vec<_>>>()?;
                if projection.is_empty() { String::new() } else { format!("select {} from ", projection.join(", ")) }
            }
            "insert" => {
                let content = statement
                    .child("fragment")
                    .and_then(|f| f.child("content"))
                    .and_then(|c| c.text.as_deref())
                    .ok_or_else(|| TologError::Render("insert without content".into()))?;
                match statement.child("where") {
                    Some(_) => format!("insert {content} from \n"),
                    None => format!("insert {content}"),
                }
            }
            "update" => format!("update {} from ", self.clauses(statement.children.iter())?),
            "delete" => {
                let targets = statement
                    .children
                    .iter()
                    .filter(|c| !matches!(c.name.as_str(), "where" | "orderby" | "pagination"))
                    .map(|c| if self.is_clause(c) { self.clause(c) } else { self.term(c) })
                    .collect::<Result<Vec<_>>>()?;
                format!("delete {} from ", targets.join(", "))
            }
            "merge" => {
                let terms = self.terms(statement.children.iter().filter(|c| !Self::is_part(c)))?;
                format!("merge {} from ", terms.join(", "))
            }
            "load" => {
                self.require_plus("load")?;
                let source = self.terms(statement.children.iter().filter(|c| c.name != "into"))?;
                let mut text = format!("load {}", source.join(", "));
                if let Some(into) = statement.child("into") {
                    write!(text, " into {}", self.terms(into.children.iter())?.join(", ")).ok();
                }
                self.out.push_str(&format!("{hint}{text}\n"));
                return Ok(());
            }
            "drop" | "create" => {
                self.require_plus(&statement.name)?;
                let target = self.terms(statement.children.iter())?;
                self.out.push_str(&format!("{hint}{} {}\n", statement.name, target.join(", ")));
                return Ok(());
            }
            other => return Err(TologError::Render(format!("unexpected <{other}>"))),
        };
        self.out.push_str(&hint);
        match statement.child("where") {
            Some(where_) => {
                self.out.push_str(&head);
                let clauses = self.clause_list(where_)?;
                self.out.push_str(&clauses);
            }
            None => self.out.push_str(head.trim_end_matches("from ")),
        }
        let tail = self.tail(statement)?;
        self.out.push_str(&tail);
        if statement.name == "select" {
            self.out.push('?');
        }
        self.out.push('\n');
        Ok(())
    }

    fn is_part(element: &Element) -> bool {
        matches!(element.name.as_str(), "where" | "orderby" | "pagination" | "into")
    }

    fn tail(&self, statement: &Element) -> Result<String> {
        let mut tail = String::new();
        if let Some(order) = statement.child("orderby") {
            let keys = order
                .children
                .iter()
                .map(|c| {
                    let v = value(c)?;
                    Ok(if c.name == "descending" { format!("${v} desc") } else { format!("${v}") })
                })
                .collect::<Result<Vec<_>>>()?;
            write!(tail, " order by {}", keys.join(", ")).ok();
        }
        if let Some(pagination) = statement.child("pagination") {
            for part in &pagination.children {
                write!(tail, " {} {}", part.name, value(part)?).ok();
            }
        }
        Ok(tail)
    }

    // ------------- clauses -------------
    fn is_clause(&self, element: &Element) -> bool {
        matches!(
            element.name.as_str(),
            "predicate"
                | "builtin-predicate"
                | "internal-predicate"
                | "infix-predicate"
                | "association-predicate"
                | "dynamic-predicate"
                | "not"
                | "or"
        )
    }

    /// The clauses of a where/body/branch/not list, prefixed with the
    /// list's own optimizer comment.
    fn clause_list(&self, list: &Element) -> Result<String> {
        Ok(format!("{}{}", self.hint(list), self.clauses(list.children.iter())?))
    }

    fn clauses<'e>(&self, elements: impl Iterator<Item = &'e Element>) -> Result<String> {
        let clauses = elements
            .filter(|c| self.is_clause(c))
            .map(|c| self.clause(c))
            .collect::<Result<Vec<_>>>()?;
        Ok(clauses.join(", "))
    }

    fn clause(&self, clause: &Element) -> Result<String> {
        let hint = self.hint(clause);
        let text = match clause.name.as_str() {
            "predicate" | "dynamic-predicate" => {
                let name = self.name(clause)?;
                let args = self.terms(clause.children.iter().filter(|c| c.name != "name"))?;
                format!("{name}({})", args.join(", "))
            }
            "builtin-predicate" => {
                let args = self.terms(clause.children.iter())?;
                format!("{}({})", required(clause, "name")?, args.join(", "))
            }
            "internal-predicate" => {
                let name = required(clause, "name")?;
                let args = self.terms(clause.children.iter())?;
                let removed = clause
                    .attr("removed-variables")
                    .unwrap_or("")
                    .split_whitespace()
                    .map(|v| format!("${v}"))
                    .collect();
                let (builtin, args) = builtin::reconstruct(name, args, removed)
                    .ok_or_else(|| TologError::Render(format!("unknown internal predicate {name}")))?;
                format!("{builtin}({})", args.join(", "))
            }
            "infix-predicate" => {
                self.require_plus("infix predicates")?;
                let name = required(clause, "name")?;
                let op = InfixOp::from_name(name)
                    .ok_or_else(|| TologError::Render(format!("unknown infix operator {name}")))?;
                let side = |n: &str| -> Result<String> {
                    let side = clause
                        .child(n)
                        .and_then(|s| s.children.first())
                        .ok_or_else(|| TologError::Render(format!("infix predicate without {n} side")))?;
                    self.term(side)
                };
                format!("{} {} {}", side("left")?, op.symbol(), side("right")?)
            }
            "association-predicate" => {
                let name = self.name(clause)?;
                let roles = clause
                    .children
                    .iter()
                    .filter(|c| c.name == "pair")
                    .map(|pair| {
                        let part = |n: &str| -> Result<String> {
                            let e = pair
                                .child(n)
                                .and_then(|p| p.children.first())
                                .ok_or_else(|| TologError::Render(format!("role without {n}")))?;
                            self.term(e)
                        };
                        Ok(format!("{} : {}", part("player")?, part("type")?))
                    })
                    .collect::<Result<Vec<_>>>()?;
                format!("{name}({})", roles.join(", "))
            }
            "not" => format!("not({})", self.clause_list(clause)?),
            "or" => {
                let mut text = String::from("{ ");
                for (i, branch) in clause.children.iter().enumerate() {
                    if i > 0 {
                        text.push_str(if branch.attr("short-circuit") == Some("true") { " || " } else { " | " });
                    }
                    text.push_str(&self.clause_list(branch)?);
                }
                text.push_str(" }");
                text
            }
            other => return Err(TologError::Render(format!("<{other}> is not a clause"))),
        };
        Ok(format!("{hint}{text}"))
    }

    fn name(&self, clause: &Element) -> Result<String> {
        let name = clause
            .child("name")
            .and_then(|n| n.children.first())
            .ok_or_else(|| TologError::Render(format!("<{}> without name", clause.name)))?;
        self.term(name)
    }

    // ------------- terms -------------
    fn terms<'e>(&self, elements: impl Iterator<Item = &'e Element>) -> Result<Vec<String>> {
        elements.map(|e| self.term(e)).collect()
    }

    fn prefixed(&self, element: &Element, bracket: bool) -> Result<String> {
        let prefix = required(element, "prefix")?;
        let local = required(element, "localpart")?;
        let kind = ReferenceKind::parse(required(element, "kind")?)
            .ok_or_else(|| TologError::Render(format!("unknown reference kind for {prefix}:{local}")))?;
        let bound = match self.prefixes.get(prefix) {
            Some(ReferenceKind::Module) if bracket => ReferenceKind::SubjectIdentifier,
            Some(kind) => *kind,
            None => return Err(TologError::Render(format!("unbound prefix '{prefix}'"))),
        };
        let mark = if kind == bound { "" } else { marker(kind) };
        if !mark.is_empty() {
            self.require_plus("reference markers")?;
        }
        Ok(if bracket { format!("{mark}[{prefix}:{local}]") } else { format!("{mark}{prefix}:{local}") })
    }

    fn term(&self, term: &Element) -> Result<String> {
        let text = match term.name.as_str() {
            "variable" => format!("${}", value(term)?),
            "parameter" => format!("%{}%", value(term)?),
            "identifier" | "integer" | "decimal" | "date" | "datetime" => value(term)?.to_string(),
            "objectid" => format!("@{}", value(term)?),
            "subjectidentifier" => format!("i{}", quote(value(term)?)),
            "subjectlocator" => format!("a{}", quote(value(term)?)),
            "itemidentifier" => format!("s{}", quote(value(term)?)),
            "iri" => format!("<{}>", value(term)?),
            "string" => quote(value(term)?),
            "qname" => self.prefixed(term, false)?,
            "curie" => {
                self.require_plus("CURIEs")?;
                self.prefixed(term, true)?
            }
            "literal" => {
                let datatype = match term.attr("datatype-iri") {
                    Some(iri) => format!("<{iri}>"),
                    None => format!("{}:{}", required(term, "datatype-prefix")?, required(term, "datatype-localpart")?),
                };
                format!("{}^^{datatype}", quote(value(term)?))
            }
            other => return Err(TologError::Render(format!("<{other}> is not a term"))),
        };
        Ok(text)
    }
}
