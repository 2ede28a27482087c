//! Tokenizer for tolog and tolog+ source text.
//!
//! The lexer is a lazy iterator over [`Token`]s with two modes. In normal
//! mode it recognizes the usual tolog vocabulary. Right after the `INSERT`
//! keyword it switches to fragment mode and hands the following
//! topic map content to the parser as one opaque [`TokenKind::Fragment`],
//! splitting at the first `from` that looks like the start of a tolog clause
//! list (see [`find_fragment_end`]).
//!
//! A `?` ends the statement: anything after it is never lexed.

use std::fmt;

use lazy_static::lazy_static;
use regex::Regex;

use crate::error::{Result, TologError};

lazy_static! {
    static ref IDENT: Regex = Regex::new(r"^[_a-zA-Z][_\w.-]*").unwrap();
    static ref QNAME: Regex = Regex::new(r"^([_a-zA-Z][_\w.-]*):([_\w.-]+)").unwrap();
    static ref CURIE: Regex = Regex::new(r"^\[([_a-zA-Z][_\w.-]*):([^\]\s]*)\]").unwrap();
    static ref VARIABLE: Regex = Regex::new(r"^\$([_a-zA-Z][_\w.-]*)").unwrap();
    static ref OBJECT_ID: Regex = Regex::new(r"^@([_\w][_\w.-]*)").unwrap();
    static ref PARAMETER: Regex = Regex::new(r"^%([_a-zA-Z][_\w.-]*)%").unwrap();
    static ref DIRECTIVE: Regex = Regex::new(r"^%([_a-zA-Z][_\w.-]*)").unwrap();
    static ref REFERENCE: Regex = Regex::new(r#"^([ias])"([^"]+)""#).unwrap();
    static ref IRI: Regex = Regex::new(r#"^<([^<>"{}`\\\s]+)>"#).unwrap();
    static ref DATE_TIME: Regex = Regex::new(concat!(
        r"^-?[0-9]{4,}-(0[1-9]|1[0-2])-(0[1-9]|[12][0-9]|3[01])",
        r"T[0-9]{2}:[0-9]{2}:[0-9]{2}(\.[0-9]+)?(Z|[+-][0-9]{2}:[0-9]{2})?"
    )).unwrap();
    static ref DATE: Regex = Regex::new(r"^-?[0-9]{4,}-(0[1-9]|1[0-2])-(0[1-9]|[12][0-9]|3[01])").unwrap();
    static ref DECIMAL: Regex = Regex::new(r"^[+-]?([0-9]+\.[0-9]+|\.[0-9]+)").unwrap();
    static ref INTEGER: Regex = Regex::new(r"^[+-]?[0-9]+").unwrap();
}

// ------------- Keyword -------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Keyword {
    Select,
    From,
    Where,
    Count,
    Not,
    Limit,
    Offset,
    Order,
    By,
    Asc,
    Desc,
    Import,
    As,
    Using,
    For,
    Delete,
    Merge,
    Update,
    Insert,
    Load,
    Into,
    Drop,
    Create,
}

impl Keyword {
    /// Case-insensitive lookup against the reserved words.
    pub fn lookup(word: &str) -> Option<Keyword> {
        let keyword = match word.to_ascii_lowercase().as_str() {
            "select" => Keyword::Select,
            "from" => Keyword::From,
            "where" => Keyword::Where,
            "count" => Keyword::Count,
            "not" => Keyword::Not,
            "limit" => Keyword::Limit,
            "offset" => Keyword::Offset,
            "order" => Keyword::Order,
            "by" => Keyword::By,
            "asc" => Keyword::Asc,
            "desc" => Keyword::Desc,
            "import" => Keyword::Import,
            "as" => Keyword::As,
            "using" => Keyword::Using,
            "for" => Keyword::For,
            "delete" => Keyword::Delete,
            "merge" => Keyword::Merge,
            "update" => Keyword::Update,
            "insert" => Keyword::Insert,
            "load" => Keyword::Load,
            "into" => Keyword::Into,
            "drop" => Keyword::Drop,
            "create" => Keyword::Create,
            _ => return None,
        };
        Some(keyword)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Keyword::Select => "select",
            Keyword::From => "from",
            Keyword::Where => "where",
            Keyword::Count => "count",
            Keyword::Not => "not",
            Keyword::Limit => "limit",
            Keyword::Offset => "offset",
            Keyword::Order => "order",
            Keyword::By => "by",
            Keyword::Asc => "asc",
            Keyword::Desc => "desc",
            Keyword::Import => "import",
            Keyword::As => "as",
            Keyword::Using => "using",
            Keyword::For => "for",
            Keyword::Delete => "delete",
            Keyword::Merge => "merge",
            Keyword::Update => "update",
            Keyword::Insert => "insert",
            Keyword::Load => "load",
            Keyword::Into => "into",
            Keyword::Drop => "drop",
            Keyword::Create => "create",
        }
    }
}

// ------------- Token -------------
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Keyword(Keyword),
    Ident(String),
    QName { prefix: String, local: String },
    /// `[prefix:local]`
    Curie { prefix: String, local: String },
    Variable(String),
    Parameter(String),
    ObjectId(String),
    /// `%version`, `%prefix`, `%base`, `%import`
    Directive(String),
    String(String),
    Iri(String),
    SubjectIdentifier(String),
    SubjectLocator(String),
    ItemIdentifier(String),
    Date(String),
    DateTime(String),
    Decimal(String),
    Integer(String),
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    LParen,
    RParen,
    LBrace,
    RBrace,
    Comma,
    Colon,
    Pipe,
    PipePipe,
    QuestionMark,
    Implies,
    Dot,
    DoubleCircumflex,
    Circumflex,
    /// Raw topic map content following `INSERT`.
    Fragment(String),
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::Keyword(k) => write!(f, "{}", k.as_str()),
            TokenKind::Ident(s) => write!(f, "{s}"),
            TokenKind::QName { prefix, local } => write!(f, "{prefix}:{local}"),
            TokenKind::Curie { prefix, local } => write!(f, "[{prefix}:{local}]"),
            TokenKind::Variable(s) => write!(f, "${s}"),
            TokenKind::Parameter(s) => write!(f, "%{s}%"),
            TokenKind::ObjectId(s) => write!(f, "@{s}"),
            TokenKind::Directive(s) => write!(f, "%{s}"),
            TokenKind::String(s) => write!(f, "\"{}\"", s.replace('"', "\"\"")),
            TokenKind::Iri(s) => write!(f, "<{s}>"),
            TokenKind::SubjectIdentifier(s) => write!(f, "i\"{s}\""),
            TokenKind::SubjectLocator(s) => write!(f, "a\"{s}\""),
            TokenKind::ItemIdentifier(s) => write!(f, "s\"{s}\""),
            TokenKind::Date(s)
            | TokenKind::DateTime(s)
            | TokenKind::Decimal(s)
            | TokenKind::Integer(s) => write!(f, "{s}"),
            TokenKind::Eq => write!(f, "="),
            TokenKind::Ne => write!(f, "/="),
            TokenKind::Lt => write!(f, "<"),
            TokenKind::Le => write!(f, "<="),
            TokenKind::Gt => write!(f, ">"),
            TokenKind::Ge => write!(f, ">="),
            TokenKind::LParen => write!(f, "("),
            TokenKind::RParen => write!(f, ")"),
            TokenKind::LBrace => write!(f, "{{"),
            TokenKind::RBrace => write!(f, "}}"),
            TokenKind::Comma => write!(f, ","),
            TokenKind::Colon => write!(f, ":"),
            TokenKind::Pipe => write!(f, "|"),
            TokenKind::PipePipe => write!(f, "||"),
            TokenKind::QuestionMark => write!(f, "?"),
            TokenKind::Implies => write!(f, ":-"),
            TokenKind::Dot => write!(f, "."),
            TokenKind::DoubleCircumflex => write!(f, "^^"),
            TokenKind::Circumflex => write!(f, "^"),
            TokenKind::Fragment(_) => write!(f, "<topic map fragment>"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    /// byte offset into the source text
    pub offset: usize,
    pub line: usize,
    pub col: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Normal,
    Fragment,
}

// ------------- Lexer -------------
pub struct Lexer<'a> {
    text: &'a str,
    pos: usize,
    line: usize,
    line_start: usize,
    mode: Mode,
    done: bool,
}

/// Lazily tokenizes `text`.
pub fn tokenize(text: &str) -> Lexer<'_> {
    Lexer::new(text)
}

impl<'a> Lexer<'a> {
    pub fn new(text: &'a str) -> Self {
        Self { text, pos: 0, line: 1, line_start: 0, mode: Mode::Normal, done: false }
    }

    fn rest(&self) -> &'a str {
        let text: &'a str = self.text;
        &text[self.pos..]
    }

    fn col(&self) -> usize {
        self.pos - self.line_start + 1
    }

    fn advance(&mut self, len: usize) {
        let consumed = &self.text[self.pos..self.pos + len];
        for (i, c) in consumed.char_indices() {
            if c == '\n' {
                self.line += 1;
                self.line_start = self.pos + i + 1;
            }
        }
        self.pos += len;
    }

    fn error(&self, message: impl Into<String>) -> TologError {
        TologError::Lexical { message: message.into(), line: self.line, col: self.col() }
    }

    fn token(&mut self, kind: TokenKind, len: usize) -> Token {
        let token = Token { kind, offset: self.pos, line: self.line, col: self.col() };
        self.advance(len);
        token
    }

    fn skip_ignorable(&mut self) -> Result<()> {
        loop {
            let rest = self.rest();
            if let Some(c) = rest.chars().next().filter(|c| c.is_whitespace()) {
                self.advance(c.len_utf8());
            } else if rest.starts_with("/*") {
                match rest[2..].find("*/") {
                    Some(end) => self.advance(end + 4),
                    None => return Err(self.error("unterminated comment")),
                }
            } else {
                return Ok(());
            }
        }
    }

    fn next_fragment(&mut self) -> Result<Option<Token>> {
        self.mode = Mode::Normal;
        let rest = self.rest();
        let Some(first) = rest.chars().next() else {
            return Ok(None);
        };
        if !first.is_whitespace() {
            return Err(self.error(format!("expected whitespace after INSERT, found {first:?}")));
        }
        let run = whitespace_run(rest);
        self.advance(run);
        let (end, resume) = find_fragment_end(self.text, self.pos).ok_or_else(|| {
            TologError::Invariant("cannot find topic map content to insert".into())
        })?;
        let content = self.text[self.pos..end].to_string();
        let token = self.token(TokenKind::Fragment(content), end - self.pos);
        self.advance(resume - end);
        Ok(Some(token))
    }

    fn next_normal(&mut self) -> Result<Option<Token>> {
        self.skip_ignorable()?;
        let rest = self.rest();
        let Some(c) = rest.chars().next() else {
            return Ok(None);
        };
        let token = match c {
            '?' => {
                let token = self.token(TokenKind::QuestionMark, 1);
                // everything after the question mark is ignored
                self.advance(self.text.len() - self.pos);
                token
            }
            '"' => {
                let (value, len) = self.scan_string(rest)?;
                self.token(TokenKind::String(value), len)
            }
            '<' => {
                if let Some(m) = IRI.captures(rest) {
                    let len = m[0].len();
                    self.token(TokenKind::Iri(m[1].to_string()), len)
                } else if rest.starts_with("<=") {
                    self.token(TokenKind::Le, 2)
                } else {
                    self.token(TokenKind::Lt, 1)
                }
            }
            '$' => match VARIABLE.captures(rest) {
                Some(m) => {
                    let len = m[0].len();
                    self.token(TokenKind::Variable(m[1].to_string()), len)
                }
                None => return Err(self.error("invalid variable name")),
            },
            '@' => match OBJECT_ID.captures(rest) {
                Some(m) => {
                    let len = m[0].len();
                    self.token(TokenKind::ObjectId(m[1].to_string()), len)
                }
                None => return Err(self.error("invalid object id")),
            },
            '%' => {
                if let Some(m) = PARAMETER.captures(rest) {
                    let len = m[0].len();
                    self.token(TokenKind::Parameter(m[1].to_string()), len)
                } else if let Some(m) = DIRECTIVE.captures(rest) {
                    let len = m[0].len();
                    self.token(TokenKind::Directive(m[1].to_string()), len)
                } else {
                    return Err(self.error("invalid parameter or directive"));
                }
            }
            '[' => match CURIE.captures(rest) {
                Some(m) => {
                    let len = m[0].len();
                    let kind = TokenKind::Curie { prefix: m[1].to_string(), local: m[2].to_string() };
                    self.token(kind, len)
                }
                None => return Err(self.error("invalid CURIE")),
            },
            c if c == '_' || c.is_ascii_alphabetic() => self.scan_word(rest),
            c if c.is_ascii_digit() || c == '-' || c == '+' || c == '.' => {
                if let Some(token) = self.scan_number(rest) {
                    token
                } else if c == '.' {
                    self.token(TokenKind::Dot, 1)
                } else {
                    return Err(self.error(format!("unexpected character {c:?}")));
                }
            }
            _ => match self.scan_operator(rest) {
                Some(token) => token,
                None => return Err(self.error(format!("unexpected character {c:?}"))),
            },
        };
        Ok(Some(token))
    }

    fn scan_string(&self, rest: &str) -> Result<(String, usize)> {
        let bytes = rest.as_bytes();
        let mut i = 1;
        while i < bytes.len() {
            if bytes[i] == b'"' {
                if bytes.get(i + 1) == Some(&b'"') {
                    i += 2;
                    continue;
                }
                return Ok((rest[1..i].replace("\"\"", "\""), i + 1));
            }
            i += 1;
        }
        Err(self.error("unterminated string"))
    }

    fn scan_word(&mut self, rest: &str) -> Token {
        if let Some(m) = REFERENCE.captures(rest) {
            let len = m[0].len();
            let value = m[2].to_string();
            let kind = match &m[1] {
                "i" => TokenKind::SubjectIdentifier(value),
                "a" => TokenKind::SubjectLocator(value),
                _ => TokenKind::ItemIdentifier(value),
            };
            return self.token(kind, len);
        }
        if let Some(m) = QNAME.captures(rest) {
            let len = m[0].len();
            let kind = TokenKind::QName { prefix: m[1].to_string(), local: m[2].to_string() };
            return self.token(kind, len);
        }
        // the first character is an identifier start, so this always matches
        let word = IDENT.find(rest).map_or(&rest[..1], |m| m.as_str());
        let len = word.len();
        match Keyword::lookup(word) {
            Some(keyword) => {
                if keyword == Keyword::Insert {
                    self.mode = Mode::Fragment;
                }
                self.token(TokenKind::Keyword(keyword), len)
            }
            None => self.token(TokenKind::Ident(word.to_string()), len),
        }
    }

    fn scan_number(&mut self, rest: &str) -> Option<Token> {
        if let Some(m) = DATE_TIME.find(rest) {
            return Some(self.token(TokenKind::DateTime(m.as_str().to_string()), m.len()));
        }
        if let Some(m) = DATE.find(rest) {
            return Some(self.token(TokenKind::Date(m.as_str().to_string()), m.len()));
        }
        if let Some(m) = DECIMAL.find(rest) {
            return Some(self.token(TokenKind::Decimal(m.as_str().to_string()), m.len()));
        }
        if let Some(m) = INTEGER.find(rest) {
            return Some(self.token(TokenKind::Integer(m.as_str().to_string()), m.len()));
        }
        None
    }

    fn scan_operator(&mut self, rest: &str) -> Option<Token> {
        const OPERATORS: [(&str, TokenKind); 16] = [
            ("||", TokenKind::PipePipe),
            ("^^", TokenKind::DoubleCircumflex),
            ("/=", TokenKind::Ne),
            (">=", TokenKind::Ge),
            (":-", TokenKind::Implies),
            ("(", TokenKind::LParen),
            (")", TokenKind::RParen),
            ("{", TokenKind::LBrace),
            ("}", TokenKind::RBrace),
            ("|", TokenKind::Pipe),
            ("^", TokenKind::Circumflex),
            ("=", TokenKind::Eq),
            (">", TokenKind::Gt),
            (",", TokenKind::Comma),
            (":", TokenKind::Colon),
            (".", TokenKind::Dot),
        ];
        OPERATORS
            .iter()
            .find(|(text, _)| rest.starts_with(*text))
            .map(|(text, kind)| (text.len(), kind.clone()))
            .map(|(len, kind)| self.token(kind, len))
    }
}

impl Iterator for Lexer<'_> {
    type Item = Result<Token>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let next = match self.mode {
            Mode::Normal => self.next_normal(),
            Mode::Fragment => self.next_fragment(),
        };
        match next {
            Ok(Some(token)) => Some(Ok(token)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                // no recovery
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

// ------------- Fragment split -------------
/// Finds where the topic map content starting at `start` ends.
///
/// Returns `(end, resume)`: the content is `text[start..end]` and lexing
/// continues at `resume`, which is the position of the `from` keyword when a
/// clause list follows. A split candidate is a whitespace run followed by
/// `from` (any case) and at least one whitespace character. The candidate is
/// rejected if, for every way of consuming that whitespace, the rest of the
/// line contains a quote, a dot or a `#`, which marks `from` as part of the
/// topic map content. Without an acceptable candidate the content extends to
/// the end of the text, or to just before a single final newline.
pub fn find_fragment_end(text: &str, start: usize) -> Option<(usize, usize)> {
    if start > text.len() || !text.is_char_boundary(start) {
        return None;
    }
    let mut p = start;
    loop {
        if at_end_anchor(text, p) {
            return Some((p, p));
        }
        let rest = &text[p..];
        let c = rest.chars().next()?;
        if c.is_whitespace() {
            let run_end = p + whitespace_run(rest);
            if accepts_from(&text[run_end..]) {
                return Some((p, run_end));
            }
        }
        p += c.len_utf8();
    }
}

fn at_end_anchor(text: &str, p: usize) -> bool {
    p == text.len() || (p + 1 == text.len() && text.as_bytes()[p] == b'\n')
}

fn whitespace_run(s: &str) -> usize {
    s.char_indices()
        .find(|(_, c)| !c.is_whitespace())
        .map_or(s.len(), |(i, _)| i)
}

fn accepts_from(s: &str) -> bool {
    let Some(head) = s.get(..4) else {
        return false;
    };
    if !head.eq_ignore_ascii_case("from") {
        return false;
    }
    let after = &s[4..];
    let cuts: Vec<usize> = after
        .char_indices()
        .take_while(|(_, c)| c.is_whitespace())
        .map(|(i, c)| i + c.len_utf8())
        .collect();
    cuts.iter().rev().any(|&k| !line_has_terminator(&after[k..]))
}

fn line_has_terminator(s: &str) -> bool {
    let line = s.split('\n').next().unwrap_or_default();
    line.contains(['"', '.', '#'])
}
