//! Query sources and the resolution of module IRIs to sources.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::OtherHasher;
use crate::error::{Result, TologError};
use crate::iri::Iri;

#[derive(Debug, Clone)]
enum Input {
    Text(String),
    Bytes(Vec<u8>),
    File(PathBuf),
}

/// Query text together with the base IRI its relative references resolve
/// against.
#[derive(Debug, Clone)]
pub struct Source {
    input: Input,
    base: Iri,
}

impl Source {
    pub fn from_text(text: impl Into<String>, base: Iri) -> Self {
        Self { input: Input::Text(text.into()), base }
    }

    /// Bytes must be UTF-8; they are checked when read.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>, base: Iri) -> Self {
        Self { input: Input::Bytes(bytes.into()), base }
    }

    /// A file whose base is its own `file:` IRI.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = std::fs::canonicalize(path.as_ref())
            .map_err(|e| TologError::Source(format!("cannot open {}: {e}", path.as_ref().display())))?;
        let base = Iri::from_file_path(&path)?;
        Ok(Self { input: Input::File(path), base })
    }

    /// A file read with an explicit base.
    pub fn from_file_with_base(path: impl Into<PathBuf>, base: Iri) -> Self {
        Self { input: Input::File(path.into()), base }
    }

    pub fn base(&self) -> &Iri {
        &self.base
    }

    pub fn read(&self) -> Result<String> {
        match &self.input {
            Input::Text(text) => Ok(text.clone()),
            Input::Bytes(bytes) => decode(bytes.clone()),
            Input::File(path) => {
                debug!(path = %path.display(), "reading query source");
                decode(std::fs::read(path)?)
            }
        }
    }
}

fn decode(bytes: Vec<u8>) -> Result<String> {
    String::from_utf8(bytes).map_err(|e| {
        let valid = &e.as_bytes()[..e.utf8_error().valid_up_to()];
        let valid = String::from_utf8_lossy(valid);
        let line = valid.matches('\n').count() + 1;
        let col = valid.rsplit('\n').next().map_or(0, |l| l.chars().count()) + 1;
        TologError::Lexical { message: "invalid UTF-8 sequence".into(), line, col }
    })
}

// ------------- Context -------------
/// The absolute IRIs of all documents processed during one top level parse.
#[derive(Debug, Default)]
pub struct Context {
    processed: HashSet<String, OtherHasher>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks `iri` as processed; false if it already was.
    pub fn mark(&mut self, iri: &Iri) -> bool {
        self.processed.insert(iri.as_str().to_string())
    }

    pub fn len(&self) -> usize {
        self.processed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processed.is_empty()
    }
}

// ------------- Resolvers -------------
/// Maps a module IRI to a source. `Ok(None)` means the IRI names something
/// that has no source, such as a built-in function library.
pub trait SourceResolver {
    fn resolve(&self, iri: &Iri) -> Result<Option<Source>>;
}

impl<R: SourceResolver + ?Sized> SourceResolver for &R {
    fn resolve(&self, iri: &Iri) -> Result<Option<Source>> {
        (**self).resolve(iri)
    }
}

/// Module texts held in memory, keyed by IRI.
#[derive(Debug, Default, Clone)]
pub struct MemoryResolver {
    documents: HashMap<String, String, OtherHasher>,
}

impl MemoryResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, iri: &Iri, text: impl Into<String>) {
        self.documents.insert(iri.as_str().to_string(), text.into());
    }

    pub fn with(mut self, iri: &Iri, text: impl Into<String>) -> Self {
        self.insert(iri, text);
        self
    }
}

impl SourceResolver for MemoryResolver {
    fn resolve(&self, iri: &Iri) -> Result<Option<Source>> {
        Ok(self.documents.get(iri.as_str()).map(|text| Source::from_text(text.clone(), iri.clone())))
    }
}

/// Resolves `file:` IRIs to local files.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileResolver;

impl SourceResolver for FileResolver {
    fn resolve(&self, iri: &Iri) -> Result<Option<Source>> {
        if iri.scheme() != "file" {
            return Ok(None);
        }
        let path = iri
            .to_file_path()
            .ok_or_else(|| TologError::Source(format!("no local path for <{iri}>")))?;
        if !path.is_file() {
            return Err(TologError::Source(format!("module <{iri}> not found")));
        }
        Ok(Some(Source::from_file_with_base(path, iri.clone())))
    }
}
