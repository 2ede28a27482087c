//! The event protocol between the parser and its consumers.
//!
//! A parse is reported as an ordered stream of [`Event`]s. Container events
//! come in `Start*`/`End*` pairs which nest strictly (LIFO); everything else
//! is a leaf. Every consumer (query builder, XML projection, logger, or a
//! plain [`EventLog`]) implements [`Handler`] with one exhaustive match.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::error::{Result, TologError};

// ------------- Hint -------------
/// Topic map construct kinds a predicate may touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Hint {
    Association,
    Role,
    Occurrence,
    Name,
    Variant,
}

impl Hint {
    pub const ALL: [Hint; 5] = [Hint::Association, Hint::Role, Hint::Occurrence, Hint::Name, Hint::Variant];

    pub fn as_str(&self) -> &'static str {
        match self {
            Hint::Association => "association",
            Hint::Role => "role",
            Hint::Occurrence => "occurrence",
            Hint::Name => "name",
            Hint::Variant => "variant",
        }
    }

    pub fn parse(s: &str) -> Option<Hint> {
        Hint::ALL.into_iter().find(|h| h.as_str() == s)
    }

    /// Space separated list, as used in the XML projection.
    pub fn join(hints: &[Hint]) -> String {
        hints.iter().map(Hint::as_str).collect::<Vec<_>>().join(" ")
    }

    pub fn split(s: &str) -> Option<Vec<Hint>> {
        s.split_whitespace().map(Hint::parse).collect()
    }
}

// ------------- ReferenceKind -------------
/// What a prefix (or a marked reference) points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReferenceKind {
    SubjectIdentifier,
    SubjectLocator,
    ItemIdentifier,
    Module,
}

impl ReferenceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReferenceKind::SubjectIdentifier => "subject-identifier",
            ReferenceKind::SubjectLocator => "subject-locator",
            ReferenceKind::ItemIdentifier => "item-identifier",
            ReferenceKind::Module => "module",
        }
    }

    pub fn parse(s: &str) -> Option<ReferenceKind> {
        match s {
            "subject-identifier" => Some(ReferenceKind::SubjectIdentifier),
            "subject-locator" => Some(ReferenceKind::SubjectLocator),
            "item-identifier" => Some(ReferenceKind::ItemIdentifier),
            "module" => Some(ReferenceKind::Module),
            _ => None,
        }
    }
}

// ------------- InfixOp -------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InfixOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl InfixOp {
    pub const ALL: [InfixOp; 6] = [InfixOp::Eq, InfixOp::Ne, InfixOp::Lt, InfixOp::Le, InfixOp::Gt, InfixOp::Ge];

    pub fn name(&self) -> &'static str {
        match self {
            InfixOp::Eq => "eq",
            InfixOp::Ne => "ne",
            InfixOp::Lt => "lt",
            InfixOp::Le => "le",
            InfixOp::Gt => "gt",
            InfixOp::Ge => "ge",
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            InfixOp::Eq => "=",
            InfixOp::Ne => "/=",
            InfixOp::Lt => "<",
            InfixOp::Le => "<=",
            InfixOp::Gt => ">",
            InfixOp::Ge => ">=",
        }
    }

    pub fn from_name(name: &str) -> Option<InfixOp> {
        InfixOp::ALL.into_iter().find(|op| op.name() == name)
    }
}

/// Datatype of a typed literal (`"v"^^<iri>` or `"v"^^prefix:local`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Datatype {
    Iri(String),
    QName { prefix: String, local: String },
}

// ------------- Event -------------
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Start,
    End,
    Base(String),
    Namespace { identifier: String, iri: String, kind: ReferenceKind },

    StartSelect,
    EndSelect,
    StartInsert,
    EndInsert,
    StartUpdate,
    EndUpdate,
    StartDelete,
    EndDelete,
    StartMerge,
    EndMerge,
    StartLoad,
    EndLoad,
    StartInto,
    EndInto,
    StartDrop,
    EndDrop,
    StartCreate,
    EndCreate,

    StartWhere,
    EndWhere,
    StartOrderBy,
    EndOrderBy,
    StartPagination,
    EndPagination,

    StartRule(String),
    EndRule,
    StartBody,
    EndBody,

    StartFragment,
    EndFragment,
    FragmentContent(String),

    StartNot,
    EndNot,
    StartOr,
    EndOr,
    StartBranch { short_circuit: bool },
    EndBranch,

    StartBuiltinPredicate { name: String, hints: Vec<Hint> },
    EndBuiltinPredicate,
    StartInternalPredicate { name: String, hints: Vec<Hint>, removed_variables: Vec<String> },
    EndInternalPredicate,
    StartInfixPredicate(InfixOp),
    EndInfixPredicate,
    StartLeft,
    EndLeft,
    StartRight,
    EndRight,
    StartAssociationPredicate,
    EndAssociationPredicate,
    StartPair,
    EndPair,
    StartPlayer,
    EndPlayer,
    StartType,
    EndType,
    StartDynamicPredicate,
    EndDynamicPredicate,
    StartPredicate,
    EndPredicate,
    StartName,
    EndName,

    Variable(String),
    Parameter(String),
    Count(String),
    Ascending(String),
    Descending(String),
    Limit(u64),
    Offset(u64),
    Identifier(String),
    ObjectId(String),
    SubjectIdentifier(String),
    SubjectLocator(String),
    ItemIdentifier(String),
    Iri(String),
    Curie { kind: ReferenceKind, prefix: String, local: String },
    QName { kind: ReferenceKind, prefix: String, local: String },
    String(String),
    Integer(String),
    Decimal(String),
    Date(String),
    DateTime(String),
    Literal { value: String, datatype: Datatype },
}

/// How an event participates in the nesting: it opens or closes the named
/// element, or it is a leaf of that name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    Open(&'static str),
    Close(&'static str),
    Leaf(&'static str),
}

impl Event {
    pub fn shape(&self) -> Shape {
        use Event::*;
        use Shape::{Close, Leaf, Open};
        match self {
            Start => Open("tolog"),
            End => Close("tolog"),
            Base(_) => Leaf("base"),
            Namespace { .. } => Leaf("namespace"),
            StartSelect => Open("select"),
            EndSelect => Close("select"),
            StartInsert => Open("insert"),
            EndInsert => Close("insert"),
            StartUpdate => Open("update"),
            EndUpdate => Close("update"),
            StartDelete => Open("delete"),
            EndDelete => Close("delete"),
            StartMerge => Open("merge"),
            EndMerge => Close("merge"),
            StartLoad => Open("load"),
            EndLoad => Close("load"),
            StartInto => Open("into"),
            EndInto => Close("into"),
            StartDrop => Open("drop"),
            EndDrop => Close("drop"),
            StartCreate => Open("create"),
            EndCreate => Close("create"),
            StartWhere => Open("where"),
            EndWhere => Close("where"),
            StartOrderBy => Open("orderby"),
            EndOrderBy => Close("orderby"),
            StartPagination => Open("pagination"),
            EndPagination => Close("pagination"),
            StartRule(_) => Open("rule"),
            EndRule => Close("rule"),
            StartBody => Open("body"),
            EndBody => Close("body"),
            StartFragment => Open("fragment"),
            EndFragment => Close("fragment"),
            FragmentContent(_) => Leaf("content"),
            StartNot => Open("not"),
            EndNot => Close("not"),
            StartOr => Open("or"),
            EndOr => Close("or"),
            StartBranch { .. } => Open("branch"),
            EndBranch => Close("branch"),
            StartBuiltinPredicate { .. } => Open("builtin-predicate"),
            EndBuiltinPredicate => Close("builtin-predicate"),
            StartInternalPredicate { .. } => Open("internal-predicate"),
            EndInternalPredicate => Close("internal-predicate"),
            StartInfixPredicate(_) => Open("infix-predicate"),
            EndInfixPredicate => Close("infix-predicate"),
            StartLeft => Open("left"),
            EndLeft => Close("left"),
            StartRight => Open("right"),
            EndRight => Close("right"),
            StartAssociationPredicate => Open("association-predicate"),
            EndAssociationPredicate => Close("association-predicate"),
            StartPair => Open("pair"),
            EndPair => Close("pair"),
            StartPlayer => Open("player"),
            EndPlayer => Close("player"),
            StartType => Open("type"),
            EndType => Close("type"),
            StartDynamicPredicate => Open("dynamic-predicate"),
            EndDynamicPredicate => Close("dynamic-predicate"),
            StartPredicate => Open("predicate"),
            EndPredicate => Close("predicate"),
            StartName => Open("name"),
            EndName => Close("name"),
            Variable(_) => Leaf("variable"),
            Parameter(_) => Leaf("parameter"),
            Count(_) => Leaf("count"),
            Ascending(_) => Leaf("ascending"),
            Descending(_) => Leaf("descending"),
            Limit(_) => Leaf("limit"),
            Offset(_) => Leaf("offset"),
            Identifier(_) => Leaf("identifier"),
            ObjectId(_) => Leaf("objectid"),
            SubjectIdentifier(_) => Leaf("subjectidentifier"),
            SubjectLocator(_) => Leaf("subjectlocator"),
            ItemIdentifier(_) => Leaf("itemidentifier"),
            Iri(_) => Leaf("iri"),
            Curie { .. } => Leaf("curie"),
            QName { .. } => Leaf("qname"),
            String(_) => Leaf("string"),
            Integer(_) => Leaf("integer"),
            Decimal(_) => Leaf("decimal"),
            Date(_) => Leaf("date"),
            DateTime(_) => Leaf("datetime"),
            Literal { .. } => Leaf("literal"),
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self.shape(), Shape::Open(_))
    }

    pub fn is_close(&self) -> bool {
        matches!(self.shape(), Shape::Close(_))
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.shape() {
            Shape::Open(name) => write!(f, "<{name}>"),
            Shape::Close(name) => write!(f, "</{name}>"),
            Shape::Leaf(name) => write!(f, "<{name}/>"),
        }
    }
}

// ------------- Handler -------------
/// A consumer of the event protocol.
pub trait Handler {
    fn handle(&mut self, event: Event) -> Result<()>;
}

impl<H: Handler + ?Sized> Handler for &mut H {
    fn handle(&mut self, event: Event) -> Result<()> {
        (**self).handle(event)
    }
}

impl<H: Handler + ?Sized> Handler for Box<H> {
    fn handle(&mut self, event: Event) -> Result<()> {
        (**self).handle(event)
    }
}

/// Records the event stream, mainly for tests and tooling.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct EventLog {
    pub events: Vec<Event>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self, name: &str) -> usize {
        self.events
            .iter()
            .filter(|e| matches!(e.shape(), Shape::Open(n) | Shape::Leaf(n) if n == name))
            .count()
    }
}

impl Handler for EventLog {
    fn handle(&mut self, event: Event) -> Result<()> {
        self.events.push(event);
        Ok(())
    }
}

/// Traces every event and forwards it to the wrapped handler.
pub struct LoggingHandler<H> {
    inner: H,
    depth: usize,
}

impl<H: Handler> LoggingHandler<H> {
    pub fn new(inner: H) -> Self {
        Self { inner, depth: 0 }
    }

    pub fn into_inner(self) -> H {
        self.inner
    }
}

impl<H: Handler> Handler for LoggingHandler<H> {
    fn handle(&mut self, event: Event) -> Result<()> {
        if event.is_close() {
            self.depth = self.depth.saturating_sub(1);
        }
        trace!(depth = self.depth, event = ?event, "tolog event");
        if event.is_open() {
            self.depth += 1;
        }
        self.inner.handle(event)
    }
}

/// Verifies that every opened construct is closed exactly once in LIFO
/// order and that the stream is bracketed by `Start`/`End`.
pub fn check_nesting(events: &[Event]) -> Result<()> {
    let mut stack: Vec<&'static str> = Vec::new();
    for (i, event) in events.iter().enumerate() {
        if i == 0 && *event != Event::Start {
            return Err(TologError::Invariant("event stream must begin with start".into()));
        }
        match event.shape() {
            Shape::Open(name) => stack.push(name),
            Shape::Close(name) => match stack.pop() {
                Some(open) if open == name => {}
                Some(open) => {
                    return Err(TologError::Invariant(format!(
                        "event {i}: </{name}> closes <{open}>"
                    )));
                }
                None => {
                    return Err(TologError::Invariant(format!("event {i}: </{name}> without start")));
                }
            },
            Shape::Leaf(_) => {
                if stack.is_empty() {
                    return Err(TologError::Invariant(format!("event {i}: {event} outside of start/end")));
                }
            }
        }
        if stack.is_empty() && i + 1 != events.len() {
            return Err(TologError::Invariant(format!("event {i}: events after end")));
        }
    }
    if let Some(open) = stack.last() {
        return Err(TologError::Invariant(format!("<{open}> is never closed")));
    }
    Ok(())
}
