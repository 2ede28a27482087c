use std::fmt;

use serde::{Serialize, Serializer};
use url::Url;

use crate::error::{Result, TologError};

/// An absolute IRI.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Iri(Url);

impl Iri {
    pub fn parse(iri: &str) -> Result<Iri> {
        Url::parse(iri)
            .map(Iri)
            .map_err(|e| TologError::Source(format!("invalid IRI <{iri}>: {e}")))
    }

    /// Resolves a (possibly relative) reference against this IRI.
    pub fn resolve(&self, reference: &str) -> Result<Iri> {
        self.0
            .join(reference)
            .map(Iri)
            .map_err(|e| TologError::Builder(format!("cannot resolve <{reference}> against <{}>: {e}", self.0)))
    }

    /// `file:` IRI of an absolute path.
    pub fn from_file_path(path: &std::path::Path) -> Result<Iri> {
        Url::from_file_path(path)
            .map(Iri)
            .map_err(|_| TologError::Source(format!("{} is not an absolute path", path.display())))
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    pub fn scheme(&self) -> &str {
        self.0.scheme()
    }

    pub fn to_file_path(&self) -> Option<std::path::PathBuf> {
        self.0.to_file_path().ok()
    }
}

impl fmt::Display for Iri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for Iri {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}
