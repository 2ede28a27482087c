//! Settings for the `tolog` binary and the HTTP service.
//!
//! Read through the `config` crate from an optional `tolog.toml` (any format
//! `config` knows by extension) and `TOLOG_*` environment variables, the
//! latter taking precedence.

use std::path::Path;

use config::{Config, Environment, File};
use serde::Deserialize;

use crate::ParseOptions;
use crate::error::Result;
use crate::iri::Iri;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Output {
    Tolog,
    #[default]
    TologPlus,
    Xml,
    Json,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub base: String,
    pub tolog_plus: bool,
    /// absent: default passes, empty: no optimization
    pub optimizers: Option<Vec<String>>,
    pub output: Output,
    pub hints: bool,
    pub bind: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            base: "file:///".into(),
            tolog_plus: false,
            optimizers: None,
            output: Output::default(),
            hints: false,
            bind: "127.0.0.1:8080".into(),
        }
    }
}

fn environment() -> Environment {
    Environment::with_prefix("TOLOG")
        .try_parsing(true)
        .list_separator(",")
        .with_list_parse_key("optimizers")
}

impl Settings {
    /// `tolog.*` in the working directory, then the environment.
    pub fn load() -> Result<Settings> {
        let settings = Config::builder()
            .add_source(File::with_name("tolog").required(false))
            .add_source(environment())
            .build()?
            .try_deserialize()?;
        Ok(settings)
    }

    pub fn from_file(path: &Path) -> Result<Settings> {
        let settings = Config::builder()
            .add_source(File::from(path))
            .build()?
            .try_deserialize()?;
        Ok(settings)
    }

    pub fn base_iri(&self) -> Result<Iri> {
        Iri::parse(&self.base)
    }

    pub fn parse_options(&self) -> ParseOptions {
        ParseOptions {
            tolog_plus: self.tolog_plus,
            optimizers: self
                .optimizers
                .as_ref()
                .map(|names| names.iter().filter(|n| !n.trim().is_empty()).map(|n| n.trim().to_string()).collect()),
        }
    }
}
