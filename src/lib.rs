//! tolog – a parser, optimizer and pretty printer for the tolog topic map
//! query language and its tolog+ dialect.
//!
//! A query goes through a fixed pipeline:
//! * the [`lexer`] turns text into tokens, switching into a raw fragment mode
//!   after `INSERT` so embedded topic map content is kept as one token;
//! * the [`parser`] recognizes directives, rules and one statement and reports
//!   them as a stream of [`event::Event`]s;
//! * the [`tree`] module collects the events into an XML shaped element tree;
//! * the [`optimizer`] applies named rewrite passes to the tree;
//! * the tree is replayed into the [`builder::QueryBuilder`], which produces a
//!   [`query::Query`], or handed to the [`render`]er, which writes it back as
//!   tolog or tolog+ text.
//!
//! Executing queries is left to whatever consumes the [`query::Query`]; this
//! crate never touches a topic map.
//!
//! ## Modules
//! * [`lexer`] – Tokens, the two lexer modes and the raw fragment split.
//! * [`parser`] – Grammar, directive validation and event emission.
//! * [`event`] – The event protocol and the [`event::Handler`] trait.
//! * [`builtin`] – Built-in predicates with their hints, internal predicates.
//! * [`builder`] – [`builder::QueryFactory`] and the event driven query builder.
//! * [`query`] – The resolved query object model.
//! * [`tree`] – XML projection, replay and XML text I/O.
//! * [`optimizer`] – The static pass table and the [`optimizer::Optimizer`].
//! * [`render`] – Tree to tolog / tolog+ text.
//! * [`source`] – Query sources, the processed-set [`source::Context`] and resolvers.
//! * [`module`] – Loading rules from imported modules.
//! * [`settings`] – Configuration for the binary and the HTTP service.
//! * [`server`] – The `POST /v1/parse` HTTP endpoint.
//!
//! ## Dialects
//! Plain tolog is the default. A `%version 1.1` (or `1.2`) directive switches
//! the parser to tolog+, which adds infix comparisons, CURIEs, reference
//! markers and `load`/`drop`/`create`.
//!
//! ## Quick Start
//! ```
//! use tolog::{iri::Iri, source::Source, ParseOptions};
//! let base = Iri::parse("http://example.org/").unwrap();
//! let source = Source::from_text("select $t from instance-of($t, person)?", base);
//! let query = tolog::parse_query(&source, &ParseOptions::default()).unwrap();
//! assert!(!query.is_module());
//! let text = tolog::parse_to_tolog_plus(&source, &ParseOptions::default(), false).unwrap();
//! assert!(text.contains("%version 1.2"));
//! ```

use std::hash::BuildHasherDefault;

use seahash::SeaHasher;

pub mod builder;
pub mod builtin;
pub mod error;
pub mod event;
pub mod iri;
pub mod lexer;
pub mod module;
pub mod optimizer;
pub mod parser;
pub mod query;
pub mod render;
pub mod server;
pub mod settings;
pub mod source;
pub mod tree;

use crate::builder::{QueryBuilder, QueryFactory};
use crate::error::{Result, TologError};
use crate::event::{Handler, LoggingHandler};
use crate::module::ModuleLoader;
use crate::optimizer::Optimizer;
use crate::query::Query;
use crate::render::RenderOptions;
use crate::settings::Output;
use crate::source::{FileResolver, Source, SourceResolver};
use crate::tree::{Element, TreeBuilder};

// used for hash maps and sets keyed by strings (prefixes, variables, IRIs)
pub type OtherHasher = BuildHasherDefault<SeaHasher>;

#[derive(Debug, Clone, Default)]
pub struct ParseOptions {
    /// start in tolog+; a `%version` directive may switch it on anyway
    pub tolog_plus: bool,
    /// optimizer passes by name; `None` for the default list, empty for none
    pub optimizers: Option<Vec<String>>,
}

impl ParseOptions {
    pub fn tolog_plus() -> Self {
        Self { tolog_plus: true, optimizers: None }
    }

    pub fn unoptimized(mut self) -> Self {
        self.optimizers = Some(Vec::new());
        self
    }

    pub fn optimizer(&self) -> Result<Optimizer> {
        match &self.optimizers {
            None => Ok(Optimizer::default()),
            Some(names) => Optimizer::new(names),
        }
    }
}

/// Parses `source` and reports the raw (unoptimized) event stream.
pub fn parse(source: &Source, handler: &mut dyn Handler, tolog_plus: bool) -> Result<()> {
    let text = source.read()?;
    let mut logged = LoggingHandler::new(handler);
    parser::parse(&text, &mut logged, tolog_plus)
}

/// The optimized XML projection of `source`.
pub fn parse_to_tree(source: &Source, options: &ParseOptions) -> Result<Element> {
    let optimizer = options.optimizer()?;
    let mut builder = TreeBuilder::new();
    parse(source, &mut builder, options.tolog_plus)?;
    Ok(optimizer.optimize(builder.into_tree()?))
}

/// The optimized projection as XML text.
pub fn parse_to_xml(source: &Source, options: &ParseOptions) -> Result<String> {
    tree::to_xml(&parse_to_tree(source, options)?)
}

/// Parses and optimizes `source` and builds the query with the default factory.
pub fn parse_query(source: &Source, options: &ParseOptions) -> Result<Query> {
    parse_query_with(source, options, builder::DefaultFactory)
}

pub fn parse_query_with<F: QueryFactory>(source: &Source, options: &ParseOptions, factory: F) -> Result<Query> {
    let tree = parse_to_tree(source, options)?;
    let mut builder = QueryBuilder::with_factory(source.base().clone(), factory);
    tree::replay(&tree, &mut builder)?;
    builder.into_query()
}

/// [`parse_query`] plus the rules of every module the query imports, read
/// through `resolver`. One processed set covers the whole load, so each
/// module is read at most once and import cycles end.
pub fn parse_query_with_modules<R: SourceResolver>(source: &Source, options: &ParseOptions, resolver: R) -> Result<Query> {
    let mut query = parse_query(source, options)?;
    query.imported = ModuleLoader::new(resolver).tolog_plus(options.tolog_plus).load_all(&query)?;
    Ok(query)
}

/// Regenerates `source` as tolog 1.0 text.
pub fn parse_to_tolog(source: &Source, options: &ParseOptions, hints: bool) -> Result<String> {
    render::render(&parse_to_tree(source, options)?, RenderOptions::legacy().with_hints(hints))
}

/// Regenerates `source` as tolog+ text.
pub fn parse_to_tolog_plus(source: &Source, options: &ParseOptions, hints: bool) -> Result<String> {
    render::render(&parse_to_tree(source, options)?, RenderOptions::plus().with_hints(hints))
}

/// `source` in the requested output form: query text, XML, or the built
/// query as JSON. Imported modules are read from local files.
pub fn transform(source: &Source, options: &ParseOptions, output: Output, hints: bool) -> Result<String> {
    transform_with(source, options, output, hints, FileResolver)
}

/// [`transform`] with the modules of the JSON form read through `resolver`.
pub fn transform_with<R: SourceResolver>(
    source: &Source,
    options: &ParseOptions,
    output: Output,
    hints: bool,
    resolver: R,
) -> Result<String> {
    match output {
        Output::Tolog => parse_to_tolog(source, options, hints),
        Output::TologPlus => parse_to_tolog_plus(source, options, hints),
        Output::Xml => parse_to_xml(source, options),
        Output::Json => {
            let query = parse_query_with_modules(source, options, resolver)?;
            serde_json::to_string_pretty(&query).map_err(|e| TologError::Render(e.to_string()))
        }
    }
}
