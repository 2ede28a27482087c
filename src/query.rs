//! The query object model produced by the [`crate::builder::QueryBuilder`].
//!
//! All references are resolved: QNames and CURIEs are expanded against
//! their prefix, relative IRIs against the query base.

use bigdecimal::BigDecimal;
use serde::Serialize;

use crate::event::{Hint, InfixOp, ReferenceKind};
use crate::iri::Iri;
use crate::module::Module;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Query {
    pub base: Iri,
    pub prefixes: Vec<Prefix>,
    pub rules: Vec<Rule>,
    /// `None` for a module: directives and rules only
    pub statement: Option<Statement>,
    /// modules reached through imports, filled in by [`crate::module::ModuleLoader`]
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub imported: Vec<Module>,
}

impl Query {
    pub fn is_module(&self) -> bool {
        self.statement.is_none()
    }

    pub fn rule(&self, name: &str) -> Option<&Rule> {
        self.rules.iter().find(|r| r.name == name)
    }

    /// A rule of a loaded module, as named by a `prefix:rule` call.
    pub fn module_rule(&self, module: &Iri, name: &str) -> Option<&Rule> {
        self.imported
            .iter()
            .find(|m| m.iri == *module)
            .and_then(|m| m.rules.iter().find(|r| r.name == name))
    }

    /// Module IRIs imported with `%import` or `import ... as`.
    pub fn modules(&self) -> impl Iterator<Item = &Iri> {
        self.prefixes
            .iter()
            .filter(|p| p.kind == ReferenceKind::Module)
            .map(|p| &p.iri)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prefix {
    pub identifier: String,
    pub iri: Iri,
    pub kind: ReferenceKind,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Rule {
    pub name: String,
    pub parameters: Vec<String>,
    pub body: Vec<Clause>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Statement {
    Select { projection: Vec<Projection>, clauses: Vec<Clause>, modifiers: Modifiers },
    Insert { fragment: Fragment, clauses: Vec<Clause>, modifiers: Modifiers },
    Update { changes: Vec<Clause>, clauses: Vec<Clause>, modifiers: Modifiers },
    Delete { targets: Vec<Deletion>, clauses: Vec<Clause>, modifiers: Modifiers },
    Merge { first: Term, second: Term, clauses: Vec<Clause>, modifiers: Modifiers },
    Load { source: Iri, into: Vec<Iri> },
    Drop { target: Iri },
    Create { target: Iri },
}

impl Statement {
    pub fn clauses(&self) -> &[Clause] {
        match self {
            Statement::Select { clauses, .. }
            | Statement::Insert { clauses, .. }
            | Statement::Update { clauses, .. }
            | Statement::Delete { clauses, .. }
            | Statement::Merge { clauses, .. } => clauses,
            Statement::Load { .. } | Statement::Drop { .. } | Statement::Create { .. } => &[],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "variable", rename_all = "kebab-case")]
pub enum Projection {
    Variable(String),
    Count(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Modifiers {
    pub order_by: Vec<Ordering>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Ordering {
    pub variable: String,
    pub descending: bool,
}

/// Topic map content of an insert, never interpreted here.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Fragment {
    pub variables: Vec<String>,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Deletion {
    Term(Term),
    Predicate(Clause),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Clause {
    /// rule or module predicate call
    Predicate { name: Term, arguments: Vec<Term> },
    Builtin { name: String, hints: Vec<Hint>, arguments: Vec<Term> },
    Internal { name: String, hints: Vec<Hint>, removed_variables: Vec<String>, arguments: Vec<Term> },
    Infix { op: InfixOp, left: Term, right: Term },
    Association { name: Term, roles: Vec<Role> },
    Dynamic { name: Term, arguments: Vec<Term> },
    Not { clauses: Vec<Clause> },
    Or { branches: Vec<Branch> },
}

impl Clause {
    /// Appends the variables used by this clause, in order of appearance.
    pub fn collect_variables<'a>(&'a self, into: &mut Vec<&'a str>) {
        let push = |terms: &'a [Term], into: &mut Vec<&'a str>| {
            into.extend(terms.iter().filter_map(Term::variable));
        };
        match self {
            Clause::Predicate { arguments, .. }
            | Clause::Builtin { arguments, .. }
            | Clause::Internal { arguments, .. }
            | Clause::Dynamic { arguments, .. } => push(arguments, into),
            Clause::Infix { left, right, .. } => {
                into.extend(left.variable());
                into.extend(right.variable());
            }
            Clause::Association { roles, .. } => {
                for role in roles {
                    into.extend(role.player.variable());
                    into.extend(role.role_type.variable());
                }
            }
            Clause::Not { clauses } => clauses.iter().for_each(|c| c.collect_variables(into)),
            Clause::Or { branches } => branches
                .iter()
                .flat_map(|b| b.clauses.iter())
                .for_each(|c| c.collect_variables(into)),
        }
    }
}

/// Variables used anywhere in `clauses`, first occurrence first.
pub fn variables(clauses: &[Clause]) -> Vec<&str> {
    let mut all = Vec::new();
    clauses.iter().for_each(|c| c.collect_variables(&mut all));
    let mut seen = Vec::new();
    for v in all {
        if !seen.contains(&v) {
            seen.push(v);
        }
    }
    seen
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Role {
    pub player: Term,
    #[serde(rename = "type")]
    pub role_type: Term,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Branch {
    pub short_circuit: bool,
    pub clauses: Vec<Clause>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "kebab-case")]
pub enum Term {
    Variable(String),
    Parameter(String),
    Identifier(String),
    ObjectId(String),
    Reference { kind: ReferenceKind, iri: Iri },
    /// a predicate defined in an imported module
    Module { module: Iri, name: String },
    String(String),
    /// integers have no size limit, so they are kept as scale-0 decimals
    Integer(BigDecimal),
    Decimal(BigDecimal),
    Date(String),
    DateTime(String),
    Literal { value: String, datatype: Iri },
}

impl Term {
    pub fn variable(&self) -> Option<&str> {
        match self {
            Term::Variable(v) => Some(v),
            _ => None,
        }
    }
}
