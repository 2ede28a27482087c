//! The XML projection: an element tree isomorphic to the event stream.
//!
//! [`TreeBuilder`] turns events into an [`Element`] tree, [`replay`] turns a
//! tree back into events. The tree is the working representation of the
//! optimizer and the input of the renderer. [`to_xml`] and [`from_xml`] move
//! it in and out of XML text.

use std::borrow::Cow;

use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event as XmlEvent};
use quick_xml::{Reader, Writer};

use crate::error::{Result, TologError};
use crate::event::{Datatype, Event, Handler, Hint, InfixOp, ReferenceKind, Shape};

pub const NAMESPACE: &str = "http://psi.semagia.com/tolog-xml/";

/// Attribute listing the optimizer passes that changed an element.
pub const OPTIMIZED_BY: &str = "optimized-by";

// ------------- Element -------------
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Element {
    pub name: String,
    /// in insertion order
    pub attributes: Vec<(String, String)>,
    pub text: Option<String>,
    pub children: Vec<Element>,
}

impl Element {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), ..Default::default() }
    }

    pub fn with_attr(mut self, name: &str, value: impl Into<String>) -> Self {
        self.set_attr(name, value);
        self
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes.iter().find(|(n, _)| n == name).map(|(_, v)| v.as_str())
    }

    pub fn set_attr(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self.attributes.iter_mut().find(|(n, _)| n == name) {
            Some((_, v)) => *v = value,
            None => self.attributes.push((name.to_string(), value)),
        }
    }

    pub fn child(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.name == name)
    }

    /// Records that `pass` changed this element.
    pub fn annotate(&mut self, pass: &str) {
        let passes = match self.attr(OPTIMIZED_BY) {
            Some(existing) if existing.split_whitespace().any(|p| p == pass) => return,
            Some(existing) => format!("{existing} {pass}"),
            None => pass.to_string(),
        };
        self.set_attr(OPTIMIZED_BY, passes);
    }

    pub fn optimized_by(&self) -> Vec<&str> {
        self.attr(OPTIMIZED_BY).map(|p| p.split_whitespace().collect()).unwrap_or_default()
    }

    /// Structural equality ignoring optimizer annotations.
    pub fn same_as(&self, other: &Element) -> bool {
        let attrs = |e: &'_ Element| -> Vec<(String, String)> {
            e.attributes.iter().filter(|(n, _)| n != OPTIMIZED_BY).cloned().collect()
        };
        self.name == other.name
            && self.text == other.text
            && attrs(self) == attrs(other)
            && self.children.len() == other.children.len()
            && self.children.iter().zip(&other.children).all(|(a, b)| a.same_as(b))
    }

    /// Every element of the subtree, breadth first, self included.
    pub fn descendants(&self) -> Vec<&Element> {
        let mut all = vec![self];
        let mut i = 0;
        while i < all.len() {
            let e = all[i];
            all.extend(e.children.iter());
            i += 1;
        }
        all
    }

    pub fn is_variable(&self, name: &str) -> bool {
        self.name == "variable" && self.attr("value") == Some(name)
    }
}

// ------------- Events to tree -------------
fn value(name: &str, v: impl Into<String>) -> Element {
    Element::new(name).with_attr("value", v)
}

fn reference(name: &str, kind: ReferenceKind, prefix: String, local: String) -> Element {
    Element::new(name)
        .with_attr("kind", kind.as_str())
        .with_attr("prefix", prefix)
        .with_attr("localpart", local)
}

/// The element an opening or leaf event stands for.
fn element_for(event: Event) -> Element {
    let name = match event.shape() {
        Shape::Open(n) | Shape::Close(n) | Shape::Leaf(n) => n,
    };
    match event {
        Event::Base(iri) => Element::new(name).with_attr("iri", iri),
        Event::Namespace { identifier, iri, kind } => Element::new(name)
            .with_attr("identifier", identifier)
            .with_attr("iri", iri)
            .with_attr("kind", kind.as_str()),
        Event::StartRule(rule) => Element::new(name).with_attr("name", rule),
        Event::StartBranch { short_circuit: true } => Element::new(name).with_attr("short-circuit", "true"),
        Event::StartBuiltinPredicate { name: builtin, hints } => {
            let mut e = Element::new(name).with_attr("name", builtin);
            if !hints.is_empty() {
                e.set_attr("hints", Hint::join(&hints));
            }
            e
        }
        Event::StartInternalPredicate { name: internal, hints, removed_variables } => {
            let mut e = Element::new(name).with_attr("name", internal);
            if !hints.is_empty() {
                e.set_attr("hints", Hint::join(&hints));
            }
            e.with_attr("removed-variables", removed_variables.join(" "))
        }
        Event::StartInfixPredicate(op) => Element::new(name).with_attr("name", op.name()),
        Event::FragmentContent(content) => Element { text: Some(content), ..Element::new(name) },
        Event::Curie { kind, prefix, local } | Event::QName { kind, prefix, local } => {
            reference(name, kind, prefix, local)
        }
        Event::Literal { value: v, datatype } => {
            let e = Element::new(name).with_attr("value", v);
            match datatype {
                Datatype::Iri(iri) => e.with_attr("datatype-iri", iri),
                Datatype::QName { prefix, local } => {
                    e.with_attr("datatype-prefix", prefix).with_attr("datatype-localpart", local)
                }
            }
        }
        Event::Limit(n) | Event::Offset(n) => value(name, n.to_string()),
        Event::Variable(v)
        | Event::Parameter(v)
        | Event::Count(v)
        | Event::Ascending(v)
        | Event::Descending(v)
        | Event::Identifier(v)
        | Event::ObjectId(v)
        | Event::SubjectIdentifier(v)
        | Event::SubjectLocator(v)
        | Event::ItemIdentifier(v)
        | Event::Iri(v)
        | Event::String(v)
        | Event::Integer(v)
        | Event::Decimal(v)
        | Event::Date(v)
        | Event::DateTime(v) => value(name, v),
        _ => Element::new(name),
    }
}

/// Collects the event stream into an element tree.
#[derive(Debug, Default)]
pub struct TreeBuilder {
    stack: Vec<Element>,
    root: Option<Element>,
}

impl TreeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_tree(self) -> Result<Element> {
        self.root.ok_or_else(|| TologError::Invariant("incomplete event stream".into()))
    }
}

impl Handler for TreeBuilder {
    fn handle(&mut self, event: Event) -> Result<()> {
        if self.root.is_some() {
            return Err(TologError::Invariant(format!("{event} after end")));
        }
        match event.shape() {
            Shape::Open(_) => {
                self.stack.push(element_for(event));
                Ok(())
            }
            Shape::Leaf(_) => {
                let leaf = element_for(event);
                let parent = self
                    .stack
                    .last_mut()
                    .ok_or_else(|| TologError::Invariant(format!("<{}/> outside of start/end", leaf.name)))?;
                parent.children.push(leaf);
                Ok(())
            }
            Shape::Close(name) => {
                let element = self
                    .stack
                    .pop()
                    .ok_or_else(|| TologError::Invariant(format!("</{name}> without start")))?;
                if element.name != name {
                    return Err(TologError::Invariant(format!("</{name}> closes <{}>", element.name)));
                }
                match self.stack.last_mut() {
                    Some(parent) => parent.children.push(element),
                    None => self.root = Some(element),
                }
                Ok(())
            }
        }
    }
}

// ------------- Tree to events -------------
fn end_for(name: &str) -> Option<Event> {
    let event = match name {
        "tolog" => Event::End,
        "select" => Event::EndSelect,
        "insert" => Event::EndInsert,
        "update" => Event::EndUpdate,
        "delete" => Event::EndDelete,
        "merge" => Event::EndMerge,
        "load" => Event::EndLoad,
        "into" => Event::EndInto,
        "drop" => Event::EndDrop,
        "create" => Event::EndCreate,
        "where" => Event::EndWhere,
        "orderby" => Event::EndOrderBy,
        "pagination" => Event::EndPagination,
        "rule" => Event::EndRule,
        "body" => Event::EndBody,
        "fragment" => Event::EndFragment,
        "not" => Event::EndNot,
        "or" => Event::EndOr,
        "branch" => Event::EndBranch,
        "builtin-predicate" => Event::EndBuiltinPredicate,
        "internal-predicate" => Event::EndInternalPredicate,
        "infix-predicate" => Event::EndInfixPredicate,
        "left" => Event::EndLeft,
        "right" => Event::EndRight,
        "association-predicate" => Event::EndAssociationPredicate,
        "pair" => Event::EndPair,
        "player" => Event::EndPlayer,
        "type" => Event::EndType,
        "dynamic-predicate" => Event::EndDynamicPredicate,
        "predicate" => Event::EndPredicate,
        "name" => Event::EndName,
        _ => return None,
    };
    Some(event)
}

fn required<'e>(element: &'e Element, attr: &str) -> Result<&'e str> {
    element
        .attr(attr)
        .ok_or_else(|| TologError::Invariant(format!("<{}> lacks the {attr} attribute", element.name)))
}

fn kind_of(element: &Element) -> Result<ReferenceKind> {
    let kind = required(element, "kind")?;
    ReferenceKind::parse(kind).ok_or_else(|| TologError::Invariant(format!("unknown reference kind {kind}")))
}

fn hints_of(element: &Element) -> Result<Vec<Hint>> {
    let hints = element.attr("hints").unwrap_or("");
    Hint::split(hints).ok_or_else(|| TologError::Invariant(format!("invalid hints '{hints}'")))
}

fn number(element: &Element) -> Result<u64> {
    let v = required(element, "value")?;
    v.parse()
        .map_err(|_| TologError::Invariant(format!("<{}> value {v} is not a number", element.name)))
}

/// The opening or leaf event for an element.
fn event_for(element: &Element) -> Result<Event> {
    let v = || required(element, "value").map(str::to_string);
    let event = match element.name.as_str() {
        "tolog" => Event::Start,
        "base" => Event::Base(required(element, "iri")?.to_string()),
        "namespace" => Event::Namespace {
            identifier: required(element, "identifier")?.to_string(),
            iri: required(element, "iri")?.to_string(),
            kind: kind_of(element)?,
        },
        "select" => Event::StartSelect,
        "insert" => Event::StartInsert,
        "update" => Event::StartUpdate,
        "delete" => Event::StartDelete,
        "merge" => Event::StartMerge,
        "load" => Event::StartLoad,
        "into" => Event::StartInto,
        "drop" => Event::StartDrop,
        "create" => Event::StartCreate,
        "where" => Event::StartWhere,
        "orderby" => Event::StartOrderBy,
        "pagination" => Event::StartPagination,
        "rule" => Event::StartRule(required(element, "name")?.to_string()),
        "body" => Event::StartBody,
        "fragment" => Event::StartFragment,
        "content" => Event::FragmentContent(element.text.clone().unwrap_or_default()),
        "not" => Event::StartNot,
        "or" => Event::StartOr,
        "branch" => Event::StartBranch { short_circuit: element.attr("short-circuit") == Some("true") },
        "builtin-predicate" => Event::StartBuiltinPredicate {
            name: required(element, "name")?.to_string(),
            hints: hints_of(element)?,
        },
        "internal-predicate" => Event::StartInternalPredicate {
            name: required(element, "name")?.to_string(),
            hints: hints_of(element)?,
            removed_variables: element
                .attr("removed-variables")
                .unwrap_or("")
                .split_whitespace()
                .map(str::to_string)
                .collect(),
        },
        "infix-predicate" => {
            let name = required(element, "name")?;
            Event::StartInfixPredicate(
                InfixOp::from_name(name)
                    .ok_or_else(|| TologError::Invariant(format!("unknown infix operator {name}")))?,
            )
        }
        "left" => Event::StartLeft,
        "right" => Event::StartRight,
        "association-predicate" => Event::StartAssociationPredicate,
        "pair" => Event::StartPair,
        "player" => Event::StartPlayer,
        "type" => Event::StartType,
        "dynamic-predicate" => Event::StartDynamicPredicate,
        "predicate" => Event::StartPredicate,
        "name" => Event::StartName,
        "variable" => Event::Variable(v()?),
        "parameter" => Event::Parameter(v()?),
        "count" => Event::Count(v()?),
        "ascending" => Event::Ascending(v()?),
        "descending" => Event::Descending(v()?),
        "limit" => Event::Limit(number(element)?),
        "offset" => Event::Offset(number(element)?),
        "identifier" => Event::Identifier(v()?),
        "objectid" => Event::ObjectId(v()?),
        "subjectidentifier" => Event::SubjectIdentifier(v()?),
        "subjectlocator" => Event::SubjectLocator(v()?),
        "itemidentifier" => Event::ItemIdentifier(v()?),
        "iri" => Event::Iri(v()?),
        "curie" | "qname" => {
            let kind = kind_of(element)?;
            let prefix = required(element, "prefix")?.to_string();
            let local = required(element, "localpart")?.to_string();
            if element.name == "curie" {
                Event::Curie { kind, prefix, local }
            } else {
                Event::QName { kind, prefix, local }
            }
        }
        "string" => Event::String(v()?),
        "integer" => Event::Integer(v()?),
        "decimal" => Event::Decimal(v()?),
        "date" => Event::Date(v()?),
        "datetime" => Event::DateTime(v()?),
        "literal" => {
            let datatype = match element.attr("datatype-iri") {
                Some(iri) => Datatype::Iri(iri.to_string()),
                None => Datatype::QName {
                    prefix: required(element, "datatype-prefix")?.to_string(),
                    local: required(element, "datatype-localpart")?.to_string(),
                },
            };
            Event::Literal { value: v()?, datatype }
        }
        other => return Err(TologError::Invariant(format!("unknown element <{other}>"))),
    };
    Ok(event)
}

/// Drives `handler` with the events the tree was built from.
pub fn replay(element: &Element, handler: &mut dyn Handler) -> Result<()> {
    let event = event_for(element)?;
    match end_for(&element.name) {
        Some(end) => {
            handler.handle(event)?;
            for child in &element.children {
                replay(child, handler)?;
            }
            handler.handle(end)
        }
        None if element.children.is_empty() => handler.handle(event),
        None => Err(TologError::Invariant(format!("leaf <{}> has children", element.name))),
    }
}

// ------------- XML text -------------
fn write_err(e: impl std::fmt::Display) -> TologError {
    TologError::Render(format!("cannot write XML: {e}"))
}

fn write_element(writer: &mut Writer<Vec<u8>>, element: &Element, root: bool) -> Result<()> {
    let mut start = BytesStart::new(element.name.as_str());
    if root {
        start.push_attribute(("xmlns", NAMESPACE));
    }
    for (name, value) in &element.attributes {
        start.push_attribute((name.as_str(), value.as_str()));
    }
    if element.children.is_empty() && element.text.is_none() {
        return writer.write_event(XmlEvent::Empty(start)).map_err(write_err);
    }
    writer.write_event(XmlEvent::Start(start)).map_err(write_err)?;
    if let Some(text) = &element.text {
        writer.write_event(XmlEvent::Text(BytesText::new(text))).map_err(write_err)?;
    }
    for child in &element.children {
        write_element(writer, child, false)?;
    }
    writer
        .write_event(XmlEvent::End(BytesEnd::new(element.name.as_str())))
        .map_err(write_err)
}

/// Serializes the tree; the root element carries the tolog-xml namespace.
pub fn to_xml(element: &Element) -> Result<String> {
    let mut writer = Writer::new(Vec::new());
    write_element(&mut writer, element, true)?;
    String::from_utf8(writer.into_inner()).map_err(|e| TologError::Render(format!("XML is not UTF-8: {e}")))
}

fn start_element(e: &BytesStart<'_>) -> Result<Element> {
    let name = std::str::from_utf8(e.local_name().as_ref())
        .map_err(|err| TologError::Source(format!("invalid element name: {err}")))?
        .to_string();
    let mut element = Element::new(name);
    for attr in e.attributes().flatten() {
        let key = attr.key.as_ref();
        if key == b"xmlns" || key.starts_with(b"xmlns:") {
            continue;
        }
        let key = std::str::from_utf8(attr.key.local_name().as_ref())
            .map_err(|err| TologError::Source(format!("invalid attribute name: {err}")))?
            .to_string();
        let value = attr
            .unescape_value()
            .map_err(|err| TologError::Source(format!("invalid attribute value: {err}")))?;
        element.attributes.push((key, value.into_owned()));
    }
    Ok(element)
}

fn append(stack: &mut [Element], root: &mut Option<Element>, element: Element) -> Result<()> {
    match stack.last_mut() {
        Some(parent) => parent.children.push(element),
        None if root.is_none() => *root = Some(element),
        None => return Err(TologError::Source("more than one root element".into())),
    }
    Ok(())
}

/// Parses XML text written by [`to_xml`] (or by hand) back into a tree.
/// Whitespace-only text outside `content` elements is ignored.
pub fn from_xml(xml: &str) -> Result<Element> {
    let mut reader = Reader::from_str(xml);
    let mut stack: Vec<Element> = Vec::new();
    let mut root = None;
    loop {
        let event = reader
            .read_event()
            .map_err(|e| TologError::Source(format!("invalid XML at {}: {e}", reader.buffer_position())))?;
        match event {
            XmlEvent::Start(e) => stack.push(start_element(&e)?),
            XmlEvent::Empty(e) => {
                let element = start_element(&e)?;
                append(&mut stack, &mut root, element)?;
            }
            XmlEvent::End(_) => {
                let element = stack.pop().ok_or_else(|| TologError::Source("unbalanced end tag".into()))?;
                append(&mut stack, &mut root, element)?;
            }
            XmlEvent::Text(t) => {
                let text = t
                    .unescape()
                    .map_err(|e| TologError::Source(format!("invalid text: {e}")))?;
                push_text(&mut stack, text)?;
            }
            XmlEvent::CData(c) => {
                let text = String::from_utf8(c.into_inner().into_owned())
                    .map_err(|e| TologError::Source(format!("invalid CDATA: {e}")))?;
                push_text(&mut stack, Cow::Owned(text))?;
            }
            XmlEvent::Eof => break,
            _ => {}
        }
    }
    if !stack.is_empty() {
        return Err(TologError::Source("unexpected end of XML".into()));
    }
    root.ok_or_else(|| TologError::Source("no root element".into()))
}

fn push_text(stack: &mut [Element], text: Cow<'_, str>) -> Result<()> {
    match stack.last_mut() {
        Some(element) if element.name == "content" => {
            element.text.get_or_insert_with(String::new).push_str(&text);
            Ok(())
        }
        _ if text.trim().is_empty() => Ok(()),
        Some(element) => Err(TologError::Source(format!("unexpected text in <{}>", element.name))),
        None => Err(TologError::Source("text outside of the root element".into())),
    }
}
