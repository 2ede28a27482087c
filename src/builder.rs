//! Builds a [`Query`] from the event protocol.
//!
//! [`QueryBuilder`] keeps a stack of frames mirroring the event nesting. On
//! every `End*` event the finished frame's operands are handed to the
//! matching [`QueryFactory`] method and the result becomes an operand of the
//! parent frame.

use std::collections::HashMap;

use bigdecimal::BigDecimal;
use tracing::debug;

use crate::OtherHasher;
use crate::builtin;
use crate::error::{Result, TologError};
use crate::event::{Datatype, Event, Handler, Hint, InfixOp, ReferenceKind, Shape};
use crate::iri::Iri;
use crate::query::{
    Branch, Clause, Deletion, Fragment, Modifiers, Ordering, Prefix, Projection, Query, Role, Rule, Statement,
    Term, variables,
};

// ------------- Factory -------------
/// Creates the parts of a query. Every method may reject an operand
/// combination it does not support with a builder error.
pub trait QueryFactory {
    fn create_iri(&self, iri: &str) -> Result<Iri> {
        Iri::parse(iri)
    }

    fn resolve_iri(&self, base: &Iri, reference: &str) -> Result<Iri> {
        base.resolve(reference)
    }

    fn create_select_query(&self, projection: Vec<Projection>, clauses: Vec<Clause>, modifiers: Modifiers) -> Result<Statement> {
        if clauses.is_empty() {
            return Err(TologError::Builder("select without clauses".into()));
        }
        Ok(Statement::Select { projection, clauses, modifiers })
    }

    fn create_insert_query(&self, fragment: Fragment, clauses: Vec<Clause>, modifiers: Modifiers) -> Result<Statement> {
        Ok(Statement::Insert { fragment, clauses, modifiers })
    }

    fn create_update_query(&self, changes: Vec<Clause>, clauses: Vec<Clause>, modifiers: Modifiers) -> Result<Statement> {
        if changes.is_empty() {
            return Err(TologError::Builder("update without changes".into()));
        }
        Ok(Statement::Update { changes, clauses, modifiers })
    }

    fn create_delete_query(&self, targets: Vec<Deletion>, clauses: Vec<Clause>, modifiers: Modifiers) -> Result<Statement> {
        if targets.is_empty() {
            return Err(TologError::Builder("delete without targets".into()));
        }
        Ok(Statement::Delete { targets, clauses, modifiers })
    }

    fn create_merge_query(&self, terms: Vec<Term>, clauses: Vec<Clause>, modifiers: Modifiers) -> Result<Statement> {
        let [first, second]: [Term; 2] = terms
            .try_into()
            .map_err(|terms: Vec<Term>| TologError::Builder(format!("merge expects two topics, got {}", terms.len())))?;
        Ok(Statement::Merge { first, second, clauses, modifiers })
    }

    fn create_load_query(&self, source: Iri, into: Vec<Iri>) -> Result<Statement> {
        Ok(Statement::Load { source, into })
    }

    fn create_drop_query(&self, target: Iri) -> Result<Statement> {
        Ok(Statement::Drop { target })
    }

    fn create_create_query(&self, target: Iri) -> Result<Statement> {
        Ok(Statement::Create { target })
    }

    fn create_rule(&self, name: String, parameters: Vec<String>, body: Vec<Clause>) -> Result<Rule> {
        for (i, p) in parameters.iter().enumerate() {
            if parameters[..i].contains(p) {
                return Err(TologError::Builder(format!("rule {name}: parameter ${p} declared twice")));
            }
        }
        let used = variables(&body);
        if let Some(p) = parameters.iter().find(|p| !used.contains(&p.as_str())) {
            return Err(TologError::Builder(format!("rule {name}: parameter ${p} is not used in the body")));
        }
        Ok(Rule { name, parameters, body })
    }

    fn create_count(&self, variable: String) -> Result<Projection> {
        Ok(Projection::Count(variable))
    }

    fn create_predicate(&self, name: Term, arguments: Vec<Term>) -> Result<Clause> {
        Ok(Clause::Predicate { name, arguments })
    }

    fn create_builtin_predicate(&self, name: String, hints: Vec<Hint>, arguments: Vec<Term>) -> Result<Clause> {
        Ok(Clause::Builtin { name, hints, arguments })
    }

    /// Without native support for internal predicates the equivalent
    /// built-in is rebuilt by putting the removed variables back.
    fn create_internal_predicate(
        &self,
        name: String,
        hints: Vec<Hint>,
        removed_variables: Vec<String>,
        arguments: Vec<Term>,
    ) -> Result<Clause> {
        let removed = removed_variables.into_iter().map(Term::Variable).collect();
        let (builtin, arguments) = builtin::reconstruct(&name, arguments, removed)
            .ok_or_else(|| TologError::Builder(format!("unknown internal predicate {name}")))?;
        self.create_builtin_predicate(builtin.to_string(), hints, arguments)
    }

    fn create_infix_predicate(&self, op: InfixOp, left: Term, right: Term) -> Result<Clause> {
        Ok(Clause::Infix { op, left, right })
    }

    fn create_association_predicate(&self, name: Term, roles: Vec<Role>) -> Result<Clause> {
        if roles.is_empty() {
            return Err(TologError::Builder("association predicate without roles".into()));
        }
        Ok(Clause::Association { name, roles })
    }

    fn create_dynamic_predicate(&self, name: Term, arguments: Vec<Term>) -> Result<Clause> {
        Ok(Clause::Dynamic { name, arguments })
    }

    fn create_not(&self, clauses: Vec<Clause>) -> Result<Clause> {
        Ok(Clause::Not { clauses })
    }

    fn create_or(&self, branches: Vec<Branch>) -> Result<Clause> {
        if branches.is_empty() {
            return Err(TologError::Builder("or without branches".into()));
        }
        Ok(Clause::Or { branches })
    }
}

/// Keeps internal predicates as they are.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultFactory;

impl QueryFactory for DefaultFactory {
    fn create_internal_predicate(
        &self,
        name: String,
        hints: Vec<Hint>,
        removed_variables: Vec<String>,
        arguments: Vec<Term>,
    ) -> Result<Clause> {
        if builtin::internal(&name).is_none() {
            return Err(TologError::Builder(format!("unknown internal predicate {name}")));
        }
        Ok(Clause::Internal { name, hints, removed_variables, arguments })
    }
}

/// Turns internal predicates back into the built-ins they replace.
#[derive(Debug, Default, Clone, Copy)]
pub struct BuiltinFactory;

impl QueryFactory for BuiltinFactory {}

// ------------- Builder -------------
#[derive(Debug)]
enum Operand {
    Term(Term),
    Clause(Clause),
    Projection(Projection),
    Ordering(Ordering),
    Limit(u64),
    Offset(u64),
    Content(String),
    Statement(Statement),
    Rule(Rule),
    Where(Vec<Clause>),
    OrderBy(Vec<Ordering>),
    Pagination(Option<u64>, Option<u64>),
    Fragment(Fragment),
    Into(Vec<Term>),
    Body(Vec<Clause>),
    Branch(Branch),
    Name(Term),
    Role(Role),
    Player(Term),
    Type(Term),
    Left(Term),
    Right(Term),
}

#[derive(Debug)]
struct Frame {
    event: Event,
    operands: Vec<Operand>,
}

pub struct QueryBuilder<F: QueryFactory = DefaultFactory> {
    factory: F,
    document_base: Iri,
    base: Iri,
    prefixes: HashMap<String, (Iri, ReferenceKind), OtherHasher>,
    prefix_list: Vec<Prefix>,
    stack: Vec<Frame>,
    query: Option<Query>,
}

impl QueryBuilder<DefaultFactory> {
    pub fn new(base: Iri) -> Self {
        Self::with_factory(base, DefaultFactory)
    }
}

impl<F: QueryFactory> QueryBuilder<F> {
    pub fn with_factory(base: Iri, factory: F) -> Self {
        Self {
            factory,
            document_base: base.clone(),
            base,
            prefixes: HashMap::default(),
            prefix_list: Vec::new(),
            stack: Vec::new(),
            query: None,
        }
    }

    /// The finished query; fails until the final `End` event was seen.
    pub fn query(&self) -> Result<&Query> {
        self.query.as_ref().ok_or_else(|| TologError::Builder("incomplete query".into()))
    }

    pub fn into_query(self) -> Result<Query> {
        self.query.ok_or_else(|| TologError::Builder("incomplete query".into()))
    }

    fn push(&mut self, operand: Operand) -> Result<()> {
        match self.stack.last_mut() {
            Some(frame) => {
                frame.operands.push(operand);
                Ok(())
            }
            None => Err(TologError::Builder(format!("{operand:?} outside of start/end"))),
        }
    }

    fn reference(&self, kind: ReferenceKind, iri: &str) -> Result<Term> {
        let iri = self.factory.resolve_iri(&self.base, iri)?;
        Ok(Term::Reference { kind, iri })
    }

    fn expand(&self, prefix: &str, local: &str) -> Result<(Iri, ReferenceKind)> {
        let (iri, kind) = self
            .prefixes
            .get(prefix)
            .ok_or_else(|| TologError::Builder(format!("unbound prefix '{prefix}'")))?;
        let expanded = self.factory.create_iri(&format!("{iri}{local}"))?;
        Ok((expanded, *kind))
    }

    fn term(&self, event: Event) -> Result<Term> {
        let term = match event {
            Event::Variable(v) => Term::Variable(v),
            Event::Parameter(v) => Term::Parameter(v),
            Event::Identifier(v) => Term::Identifier(v),
            Event::ObjectId(v) => Term::ObjectId(v),
            Event::SubjectIdentifier(v) | Event::Iri(v) => self.reference(ReferenceKind::SubjectIdentifier, &v)?,
            Event::SubjectLocator(v) => self.reference(ReferenceKind::SubjectLocator, &v)?,
            Event::ItemIdentifier(v) => self.reference(ReferenceKind::ItemIdentifier, &v)?,
            Event::QName { kind: ReferenceKind::Module, prefix, local } => {
                let (module, _) = self
                    .prefixes
                    .get(&prefix)
                    .ok_or_else(|| TologError::Builder(format!("unbound prefix '{prefix}'")))?;
                Term::Module { module: module.clone(), name: local }
            }
            Event::QName { kind, prefix, local } | Event::Curie { kind, prefix, local } => {
                let (iri, _) = self.expand(&prefix, &local)?;
                Term::Reference { kind, iri }
            }
            Event::String(v) => Term::String(v),
            Event::Integer(v) => Term::Integer(
                v.trim_start_matches('+')
                    .parse::<BigDecimal>()
                    .map_err(|e| TologError::Builder(format!("invalid integer {v}: {e}")))?,
            ),
            Event::Decimal(v) => Term::Decimal(
                v.parse::<BigDecimal>()
                    .map_err(|e| TologError::Builder(format!("invalid decimal {v}: {e}")))?,
            ),
            Event::Date(v) => Term::Date(v),
            Event::DateTime(v) => Term::DateTime(v),
            Event::Literal { value, datatype } => {
                let datatype = match datatype {
                    Datatype::Iri(iri) => self.factory.resolve_iri(&self.base, &iri)?,
                    Datatype::QName { prefix, local } => self.expand(&prefix, &local)?.0,
                };
                Term::Literal { value, datatype }
            }
            other => return Err(TologError::Builder(format!("{other} is not a term"))),
        };
        Ok(term)
    }

    fn open(&mut self, event: Event) -> Result<()> {
        if self.query.is_some() {
            return Err(TologError::Builder("events after end".into()));
        }
        if event == Event::Start && !self.stack.is_empty() {
            return Err(TologError::Builder("nested start".into()));
        }
        if event != Event::Start && self.stack.is_empty() {
            return Err(TologError::Builder(format!("{event} before start")));
        }
        self.stack.push(Frame { event, operands: Vec::new() });
        Ok(())
    }

    fn close(&mut self, name: &'static str) -> Result<()> {
        let frame = self
            .stack
            .pop()
            .ok_or_else(|| TologError::Builder(format!("</{name}> without start")))?;
        if frame.event.shape() != Shape::Open(name) {
            return Err(TologError::Builder(format!("</{name}> closes {}", frame.event)));
        }
        let parts = Parts::new(frame.operands);
        let f = &self.factory;
        let operand = match frame.event {
            Event::Start => return self.finish(parts),
            Event::StartSelect => {
                let (where_, modifiers) = parts.clauses_and_modifiers();
                Operand::Statement(f.create_select_query(parts.projection()?, where_, modifiers)?)
            }
            Event::StartInsert => {
                let (where_, modifiers) = parts.clauses_and_modifiers();
                let fragment = parts
                    .fragment()
                    .ok_or_else(|| TologError::Builder("insert without topic map content".into()))?;
                Operand::Statement(f.create_insert_query(fragment, where_, modifiers)?)
            }
            Event::StartUpdate => {
                let (where_, modifiers) = parts.clauses_and_modifiers();
                Operand::Statement(f.create_update_query(parts.clauses(), where_, modifiers)?)
            }
            Event::StartDelete => {
                let (where_, modifiers) = parts.clauses_and_modifiers();
                Operand::Statement(f.create_delete_query(parts.deletions()?, where_, modifiers)?)
            }
            Event::StartMerge => {
                let (where_, modifiers) = parts.clauses_and_modifiers();
                Operand::Statement(f.create_merge_query(parts.terms()?, where_, modifiers)?)
            }
            Event::StartLoad => {
                let source = single_iri(parts.terms()?, "load")?;
                let into = parts.into_terms().into_iter().map(|t| single_iri(vec![t], "into")).collect::<Result<_>>()?;
                Operand::Statement(f.create_load_query(source, into)?)
            }
            Event::StartDrop => Operand::Statement(f.create_drop_query(single_iri(parts.terms()?, "drop")?)?),
            Event::StartCreate => Operand::Statement(f.create_create_query(single_iri(parts.terms()?, "create")?)?),
            Event::StartInto => Operand::Into(parts.terms()?),
            Event::StartWhere => Operand::Where(parts.clauses()),
            Event::StartOrderBy => Operand::OrderBy(parts.orderings()),
            Event::StartPagination => Operand::Pagination(parts.limit(), parts.offset()),
            Event::StartRule(name) => {
                let parameters = parts.variables()?;
                let body = parts.body();
                Operand::Rule(f.create_rule(name, parameters, body)?)
            }
            Event::StartBody => Operand::Body(parts.clauses()),
            Event::StartFragment => {
                let variables = parts.variables()?;
                let content = parts.content();
                Operand::Fragment(Fragment { variables, content })
            }
            Event::StartNot => Operand::Clause(f.create_not(parts.clauses())?),
            Event::StartOr => Operand::Clause(f.create_or(parts.branches())?),
            Event::StartBranch { short_circuit } => {
                Operand::Branch(Branch { short_circuit, clauses: parts.clauses() })
            }
            Event::StartBuiltinPredicate { name, hints } => {
                Operand::Clause(f.create_builtin_predicate(name, hints, parts.terms()?)?)
            }
            Event::StartInternalPredicate { name, hints, removed_variables } => {
                Operand::Clause(f.create_internal_predicate(name, hints, removed_variables, parts.terms()?)?)
            }
            Event::StartInfixPredicate(op) => {
                let (left, right) = parts.sides()?;
                Operand::Clause(f.create_infix_predicate(op, left, right)?)
            }
            Event::StartLeft => Operand::Left(parts.single_term("left")?),
            Event::StartRight => Operand::Right(parts.single_term("right")?),
            Event::StartAssociationPredicate => {
                let name = parts.name()?;
                Operand::Clause(f.create_association_predicate(name, parts.roles())?)
            }
            Event::StartPair => {
                let (player, role_type) = parts.player_and_type()?;
                Operand::Role(Role { player, role_type })
            }
            Event::StartPlayer => Operand::Player(parts.single_term("player")?),
            Event::StartType => Operand::Type(parts.single_term("type")?),
            Event::StartDynamicPredicate => {
                let name = parts.name()?;
                Operand::Clause(f.create_dynamic_predicate(name, parts.terms()?)?)
            }
            Event::StartPredicate => {
                let name = parts.name()?;
                Operand::Clause(f.create_predicate(name, parts.terms()?)?)
            }
            Event::StartName => Operand::Name(parts.single_name()?),
            other => return Err(TologError::Builder(format!("unexpected container {other}"))),
        };
        self.push(operand)
    }

    fn finish(&mut self, parts: Parts) -> Result<()> {
        let mut rules = Vec::new();
        let mut statement = None;
        for operand in parts.0 {
            match operand {
                Operand::Rule(rule) => rules.push(rule),
                Operand::Statement(s) if statement.is_none() => statement = Some(s),
                Operand::Statement(_) => return Err(TologError::Builder("more than one statement".into())),
                other => return Err(TologError::Builder(format!("unexpected top level operand {other:?}"))),
            }
        }
        debug!(rules = rules.len(), module = statement.is_none(), "query built");
        self.query = Some(Query {
            base: self.base.clone(),
            prefixes: std::mem::take(&mut self.prefix_list),
            rules,
            statement,
            imported: Vec::new(),
        });
        Ok(())
    }
}

impl<F: QueryFactory> Handler for QueryBuilder<F> {
    fn handle(&mut self, event: Event) -> Result<()> {
        match event.shape() {
            Shape::Open(_) => return self.open(event),
            Shape::Close(name) => return self.close(name),
            Shape::Leaf(_) => {}
        }
        match event {
            Event::Base(iri) => {
                self.base = self.factory.resolve_iri(&self.document_base, &iri)?;
                Ok(())
            }
            Event::Namespace { identifier, iri, kind } => {
                let iri = self.factory.resolve_iri(&self.base, &iri)?;
                self.prefixes.insert(identifier.clone(), (iri.clone(), kind));
                self.prefix_list.push(Prefix { identifier, iri, kind });
                Ok(())
            }
            Event::Count(v) => {
                let projection = self.factory.create_count(v)?;
                self.push(Operand::Projection(projection))
            }
            Event::Ascending(variable) => self.push(Operand::Ordering(Ordering { variable, descending: false })),
            Event::Descending(variable) => self.push(Operand::Ordering(Ordering { variable, descending: true })),
            Event::Limit(n) => self.push(Operand::Limit(n)),
            Event::Offset(n) => self.push(Operand::Offset(n)),
            Event::FragmentContent(content) => self.push(Operand::Content(content)),
            other => {
                let term = self.term(other)?;
                self.push(Operand::Term(term))
            }
        }
    }
}

fn single_iri(terms: Vec<Term>, what: &str) -> Result<Iri> {
    match <[Term; 1]>::try_from(terms) {
        Ok([Term::Reference { iri, .. }]) => Ok(iri),
        _ => Err(TologError::Builder(format!("{what} expects a single IRI"))),
    }
}

/// Operands of a closed frame, taken apart by kind.
struct Parts(Vec<Operand>);

impl Parts {
    fn new(operands: Vec<Operand>) -> Self {
        Self(operands)
    }

    fn take<T>(&self, pick: impl Fn(&Operand) -> Option<T>) -> Vec<T> {
        self.0.iter().filter_map(pick).collect()
    }

    fn terms(&self) -> Result<Vec<Term>> {
        let terms = self.take(|o| match o {
            Operand::Term(t) => Some(t.clone()),
            _ => None,
        });
        if terms.iter().any(|t| matches!(t, Term::Module { .. })) {
            return Err(TologError::Builder("a module reference cannot be used as an argument".into()));
        }
        Ok(terms)
    }

    fn single_term(&self, what: &str) -> Result<Term> {
        match <[Term; 1]>::try_from(self.terms()?) {
            Ok([term]) => Ok(term),
            Err(terms) => Err(TologError::Builder(format!("{what} expects one term, got {}", terms.len()))),
        }
    }

    fn single_name(&self) -> Result<Term> {
        let names = self.take(|o| match o {
            Operand::Term(t) => Some(t.clone()),
            _ => None,
        });
        match <[Term; 1]>::try_from(names) {
            Ok([term]) => Ok(term),
            Err(_) => Err(TologError::Builder("a predicate needs exactly one name".into())),
        }
    }

    fn variables(&self) -> Result<Vec<String>> {
        self.terms()?
            .into_iter()
            .map(|t| match t {
                Term::Variable(v) => Ok(v),
                other => Err(TologError::Builder(format!("expected a variable, got {other:?}"))),
            })
            .collect()
    }

    fn projection(&self) -> Result<Vec<Projection>> {
        let mut projection = Vec::new();
        for operand in &self.0 {
            match operand {
                Operand::Term(Term::Variable(v)) => projection.push(Projection::Variable(v.clone())),
                Operand::Projection(p) => projection.push(p.clone()),
                Operand::Term(other) => {
                    return Err(TologError::Builder(format!("cannot select {other:?}")));
                }
                _ => {}
            }
        }
        Ok(projection)
    }

    fn clauses(&self) -> Vec<Clause> {
        self.take(|o| match o {
            Operand::Clause(c) => Some(c.clone()),
            _ => None,
        })
    }

    fn deletions(&self) -> Result<Vec<Deletion>> {
        let mut targets = Vec::new();
        for operand in &self.0 {
            match operand {
                Operand::Term(Term::Module { .. }) => {
                    return Err(TologError::Builder("a module reference cannot be deleted".into()));
                }
                Operand::Term(t) => targets.push(Deletion::Term(t.clone())),
                Operand::Clause(c) => targets.push(Deletion::Predicate(c.clone())),
                _ => {}
            }
        }
        Ok(targets)
    }

    fn clauses_and_modifiers(&self) -> (Vec<Clause>, Modifiers) {
        let mut clauses = Vec::new();
        let mut modifiers = Modifiers::default();
        for operand in &self.0 {
            match operand {
                Operand::Where(c) => clauses = c.clone(),
                Operand::OrderBy(o) => modifiers.order_by = o.clone(),
                Operand::Pagination(limit, offset) => {
                    modifiers.limit = *limit;
                    modifiers.offset = *offset;
                }
                _ => {}
            }
        }
        (clauses, modifiers)
    }

    fn fragment(&self) -> Option<Fragment> {
        self.0.iter().find_map(|o| match o {
            Operand::Fragment(f) => Some(f.clone()),
            _ => None,
        })
    }

    fn content(&self) -> String {
        self.take(|o| match o {
            Operand::Content(c) => Some(c.clone()),
            _ => None,
        })
        .concat()
    }

    fn into_terms(&self) -> Vec<Term> {
        self.0
            .iter()
            .find_map(|o| match o {
                Operand::Into(t) => Some(t.clone()),
                _ => None,
            })
            .unwrap_or_default()
    }

    fn orderings(&self) -> Vec<Ordering> {
        self.take(|o| match o {
            Operand::Ordering(o) => Some(o.clone()),
            _ => None,
        })
    }

    fn limit(&self) -> Option<u64> {
        self.0.iter().find_map(|o| match o {
            Operand::Limit(n) => Some(*n),
            _ => None,
        })
    }

    fn offset(&self) -> Option<u64> {
        self.0.iter().find_map(|o| match o {
            Operand::Offset(n) => Some(*n),
            _ => None,
        })
    }

    fn body(&self) -> Vec<Clause> {
        self.0
            .iter()
            .find_map(|o| match o {
                Operand::Body(c) => Some(c.clone()),
                _ => None,
            })
            .unwrap_or_default()
    }

    fn branches(&self) -> Vec<Branch> {
        self.take(|o| match o {
            Operand::Branch(b) => Some(b.clone()),
            _ => None,
        })
    }

    fn sides(&self) -> Result<(Term, Term)> {
        let left = self.0.iter().find_map(|o| match o {
            Operand::Left(t) => Some(t.clone()),
            _ => None,
        });
        let right = self.0.iter().find_map(|o| match o {
            Operand::Right(t) => Some(t.clone()),
            _ => None,
        });
        left.zip(right)
            .ok_or_else(|| TologError::Builder("infix predicate needs a left and a right side".into()))
    }

    fn name(&self) -> Result<Term> {
        self.0
            .iter()
            .find_map(|o| match o {
                Operand::Name(t) => Some(t.clone()),
                _ => None,
            })
            .ok_or_else(|| TologError::Builder("predicate without name".into()))
    }

    fn roles(&self) -> Vec<Role> {
        self.take(|o| match o {
            Operand::Role(r) => Some(r.clone()),
            _ => None,
        })
    }

    fn player_and_type(&self) -> Result<(Term, Term)> {
        let player = self.0.iter().find_map(|o| match o {
            Operand::Player(t) => Some(t.clone()),
            _ => None,
        });
        let role_type = self.0.iter().find_map(|o| match o {
            Operand::Type(t) => Some(t.clone()),
            _ => None,
        });
        player
            .zip(role_type)
            .ok_or_else(|| TologError::Builder("role pair needs a player and a type".into()))
    }
}
