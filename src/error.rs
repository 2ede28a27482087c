use thiserror::Error;

#[derive(Error, Debug)]
pub enum TologError {
    #[error("Lexical error at {line}:{col}: {message}")]
    Lexical { message: String, line: usize, col: usize },
    #[error("Invalid query at {line}:{col}: {message}")]
    Query { message: String, line: usize, col: usize },
    #[error("Builder error: {0}")]
    Builder(String),
    #[error("Config error: {0}")]
    Config(String),
    #[error("Source error: {0}")]
    Source(String),
    #[error("Render error: {0}")]
    Render(String),
    #[error("Internal invariant violated: {0}")]
    Invariant(String),
}

impl TologError {
    pub fn is_query_error(&self) -> bool {
        matches!(self, Self::Query { .. })
    }
    pub fn is_lexical_error(&self) -> bool {
        matches!(self, Self::Lexical { .. })
    }
}

pub type Result<T> = std::result::Result<T, TologError>;

// Helper conversions
impl From<std::io::Error> for TologError {
    fn from(e: std::io::Error) -> Self { Self::Source(e.to_string()) }
}

impl From<config::ConfigError> for TologError {
    fn from(e: config::ConfigError) -> Self { Self::Config(e.to_string()) }
}
