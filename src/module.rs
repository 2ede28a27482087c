//! Loading the rules of imported modules.

use serde::Serialize;
use tracing::debug;

use crate::builder::QueryBuilder;
use crate::error::{Result, TologError};
use crate::iri::Iri;
use crate::parser;
use crate::query::{Query, Rule};
use crate::source::{Context, SourceResolver};

/// The rules of one imported module.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Module {
    pub iri: Iri,
    pub rules: Vec<Rule>,
}

pub struct ModuleLoader<R: SourceResolver> {
    resolver: R,
    tolog_plus: bool,
}

impl<R: SourceResolver> ModuleLoader<R> {
    pub fn new(resolver: R) -> Self {
        Self { resolver, tolog_plus: false }
    }

    pub fn tolog_plus(mut self, tolog_plus: bool) -> Self {
        self.tolog_plus = tolog_plus;
        self
    }

    /// Loads every module `query` imports, and the modules those import.
    /// The query's own base is marked as processed first.
    pub fn load_all(&self, query: &Query) -> Result<Vec<Module>> {
        let mut context = Context::new();
        context.mark(&query.base);
        let mut modules = Vec::new();
        self.load(query, &mut context, &mut modules)?;
        Ok(modules)
    }

    /// Depth first; a document already in `context` is not loaded again.
    pub fn load(&self, query: &Query, context: &mut Context, modules: &mut Vec<Module>) -> Result<()> {
        for iri in query.modules() {
            if !context.mark(iri) {
                debug!(module = %iri, "module already processed");
                continue;
            }
            let Some(source) = self.resolver.resolve(iri)? else {
                debug!(module = %iri, "no source for module, skipped");
                continue;
            };
            let text = source.read()?;
            let mut builder = QueryBuilder::new(source.base().clone());
            parser::parse(&text, &mut builder, self.tolog_plus)?;
            let module = builder.into_query()?;
            if !module.is_module() {
                return Err(TologError::Query {
                    message: format!("module <{iri}> contains a query statement"),
                    line: 0,
                    col: 0,
                });
            }
            debug!(module = %iri, rules = module.rules.len(), "module loaded");
            modules.push(Module { iri: iri.clone(), rules: module.rules.clone() });
            self.load(&module, context, modules)?;
        }
        Ok(())
    }
}
