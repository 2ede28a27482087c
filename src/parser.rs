//! Recursive descent parser for tolog and tolog+.
//!
//! The parser pulls tokens from the [`Lexer`] through a small lookahead
//! buffer and reports what it recognizes as [`Event`]s to a [`Handler`].
//! Directive and prefix validation happens while parsing, so the first
//! offending token is the one reported.
//!
//! Grammar outline:
//!
//! ```text
//! query      := directive* rule* statement? '?'?
//! directive  := '%version' NUMBER | '%base' IRI | '%prefix' IDENT IRI
//!             | '%import' IDENT IRI | 'using' IDENT 'for' (i"" | a"" | s"")
//!             | 'import' (STRING | IRI) 'as' IDENT
//! rule       := IDENT '(' variables? ')' ':-' clauses '.'
//! statement  := select | insert | update | delete | merge | load | drop | create | clauses tail
//! clauses    := clause (',' clause)*
//! clause     := 'not' '(' clauses ')' | '{' clauses (('|' | '||') clauses)* '}'
//!             | term OP term | predicate
//! tail       := ('order' 'by' VAR ('asc'|'desc')? (',' ...)*)? ('limit' INT)? ('offset' INT)?
//! ```

use std::collections::{HashMap, HashSet, VecDeque};

use lazy_static::lazy_static;
use regex::Regex;
use tracing::debug;

use crate::OtherHasher;
use crate::builtin;
use crate::error::{Result, TologError};
use crate::event::{Datatype, Event, Handler, InfixOp, ReferenceKind};
use crate::lexer::{Keyword, Lexer, Token, TokenKind};

lazy_static! {
    static ref FRAGMENT_VARIABLE: Regex = Regex::new(r"\$([_a-zA-Z](?:[_\w.-]*[_\w-])?)").unwrap();
}

/// Values accepted by `%version`. Anything above 1.0 switches on tolog+.
pub const SUPPORTED_VERSIONS: [&str; 3] = ["1.0", "1.1", "1.2"];

/// Parses `text` and reports it to `handler`.
pub fn parse(text: &str, handler: &mut dyn Handler, tolog_plus: bool) -> Result<()> {
    Parser::new(text, handler, tolog_plus).run()
}

/// Variables mentioned in raw topic map content, in order of first occurrence.
pub fn fragment_variables(content: &str) -> Vec<String> {
    let mut seen = HashSet::<String, OtherHasher>::default();
    FRAGMENT_VARIABLE
        .captures_iter(content)
        .map(|c| c[1].to_string())
        .filter(|v| seen.insert(v.clone()))
        .collect()
}

struct CallShape {
    arity: usize,
    has_pairs: bool,
    followed_by: Option<TokenKind>,
}

/// How a predicate name was written, which drives predicate classification.
enum NameKind {
    Plain(String),
    Module,
    Reference,
    Dynamic,
}

pub struct Parser<'a, 'h> {
    lexer: Lexer<'a>,
    lookahead: VecDeque<Token>,
    handler: &'h mut dyn Handler,
    tolog_plus: bool,
    prefixes: HashMap<String, (String, ReferenceKind), OtherHasher>,
    directives: usize,
    rule_names: HashSet<String, OtherHasher>,
    // position of the last consumed token, used for end-of-input errors
    last: (usize, usize),
}

impl<'a, 'h> Parser<'a, 'h> {
    pub fn new(text: &'a str, handler: &'h mut dyn Handler, tolog_plus: bool) -> Self {
        Self {
            lexer: Lexer::new(text),
            lookahead: VecDeque::new(),
            handler,
            tolog_plus,
            prefixes: HashMap::default(),
            directives: 0,
            rule_names: defined_rules(text),
            last: (1, 1),
        }
    }

    pub fn run(mut self) -> Result<()> {
        self.emit(Event::Start)?;
        self.directives()?;
        while self.at_rule()? {
            self.rule()?;
        }
        if !self.at_end()? {
            self.statement()?;
        }
        self.eat(&TokenKind::QuestionMark)?;
        if let Some(token) = self.bump()? {
            return Err(self.unexpected(&token));
        }
        self.emit(Event::End)?;
        debug!(tolog_plus = self.tolog_plus, prefixes = self.prefixes.len(), "query parsed");
        Ok(())
    }

    // ------------- token plumbing -------------
    fn fill(&mut self, n: usize) -> Result<()> {
        while self.lookahead.len() <= n {
            match self.lexer.next() {
                Some(token) => self.lookahead.push_back(token?),
                None => break,
            }
        }
        Ok(())
    }

    fn peek_nth(&mut self, n: usize) -> Result<Option<TokenKind>> {
        self.fill(n)?;
        Ok(self.lookahead.get(n).map(|t| t.kind.clone()))
    }

    fn peek(&mut self) -> Result<Option<TokenKind>> {
        self.peek_nth(0)
    }

    fn bump(&mut self) -> Result<Option<Token>> {
        self.fill(0)?;
        let token = self.lookahead.pop_front();
        if let Some(t) = &token {
            self.last = (t.line, t.col);
        }
        Ok(token)
    }

    fn next_token(&mut self, expected: &str) -> Result<Token> {
        match self.bump()? {
            Some(token) => Ok(token),
            None => Err(self.eof_error(expected)),
        }
    }

    fn eat(&mut self, kind: &TokenKind) -> Result<bool> {
        if self.peek()?.as_ref() == Some(kind) {
            self.bump()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn eat_keyword(&mut self, keyword: Keyword) -> Result<bool> {
        self.eat(&TokenKind::Keyword(keyword))
    }

    fn expect(&mut self, kind: TokenKind) -> Result<Token> {
        let what = format!("'{kind}'");
        let token = self.next_token(&what)?;
        if token.kind == kind { Ok(token) } else { Err(self.expected(&token, &what)) }
    }

    fn at_end(&mut self) -> Result<bool> {
        Ok(matches!(self.peek()?, None | Some(TokenKind::QuestionMark)))
    }

    fn emit(&mut self, event: Event) -> Result<()> {
        self.handler.handle(event)
    }

    // ------------- errors -------------
    fn error_at(&self, token: &Token, message: impl Into<String>) -> TologError {
        TologError::Query { message: message.into(), line: token.line, col: token.col }
    }

    fn unexpected(&self, token: &Token) -> TologError {
        self.error_at(token, format!("unexpected '{}'", token.kind))
    }

    fn expected(&self, token: &Token, what: &str) -> TologError {
        self.error_at(token, format!("expected {what}, found '{}'", token.kind))
    }

    fn eof_error(&self, what: &str) -> TologError {
        TologError::Query {
            message: format!("expected {what}, found end of input"),
            line: self.last.0,
            col: self.last.1,
        }
    }

    fn require_plus(&self, token: &Token, what: &str) -> Result<()> {
        if self.tolog_plus {
            Ok(())
        } else {
            Err(self.error_at(token, format!("{what} requires tolog+ (%version 1.1 or later)")))
        }
    }

    // ------------- directives -------------
    fn directives(&mut self) -> Result<()> {
        loop {
            match self.peek()? {
                Some(TokenKind::Directive(name)) => {
                    let token = self.next_token("a directive")?;
                    self.directive(&token, &name)?;
                }
                Some(TokenKind::Keyword(Keyword::Using)) => self.using()?,
                Some(TokenKind::Keyword(Keyword::Import)) => self.import()?,
                _ => return Ok(()),
            }
        }
    }

    fn directive(&mut self, token: &Token, name: &str) -> Result<()> {
        match name {
            "base" => {
                if self.directives > 0 {
                    return Err(self.error_at(token, "%base must be the first directive"));
                }
                let iri = self.iri_value("an IRI after %base")?;
                self.directives += 1;
                self.emit(Event::Base(iri))
            }
            "version" => {
                let value = self.next_token("a version number")?;
                let version = match &value.kind {
                    TokenKind::Decimal(v) | TokenKind::Integer(v) => v.clone(),
                    _ => return Err(self.expected(&value, "a version number")),
                };
                if !SUPPORTED_VERSIONS.contains(&version.as_str()) {
                    return Err(self.error_at(&value, format!("unsupported tolog version {version}")));
                }
                if version != "1.0" {
                    self.tolog_plus = true;
                }
                self.directives += 1;
                Ok(())
            }
            "prefix" => {
                let identifier = self.ident_value("a prefix identifier")?;
                let iri = self.iri_value("an IRI")?;
                self.register(token, identifier, iri, ReferenceKind::SubjectIdentifier)
            }
            "import" => {
                let identifier = self.ident_value("a module identifier")?;
                let iri = self.iri_value("an IRI")?;
                self.register(token, identifier, iri, ReferenceKind::Module)
            }
            _ => Err(self.error_at(token, format!("unknown directive %{name}"))),
        }
    }

    fn using(&mut self) -> Result<()> {
        let token = self.next_token("using")?;
        let identifier = self.ident_value("a prefix identifier")?;
        self.expect(TokenKind::Keyword(Keyword::For))?;
        let reference = self.next_token("a reference")?;
        let (iri, kind) = match reference.kind {
            TokenKind::SubjectIdentifier(v) => (v, ReferenceKind::SubjectIdentifier),
            TokenKind::SubjectLocator(v) => (v, ReferenceKind::SubjectLocator),
            TokenKind::ItemIdentifier(v) => (v, ReferenceKind::ItemIdentifier),
            _ => return Err(self.expected(&reference, "i\"...\", a\"...\" or s\"...\"")),
        };
        self.register(&token, identifier, iri, kind)
    }

    fn import(&mut self) -> Result<()> {
        let token = self.next_token("import")?;
        let location = self.next_token("a module location")?;
        let iri = match location.kind {
            TokenKind::String(v) | TokenKind::Iri(v) => v,
            _ => return Err(self.expected(&location, "a module location")),
        };
        self.expect(TokenKind::Keyword(Keyword::As))?;
        let identifier = self.ident_value("a module identifier")?;
        self.register(&token, identifier, iri, ReferenceKind::Module)
    }

    fn register(&mut self, token: &Token, identifier: String, iri: String, kind: ReferenceKind) -> Result<()> {
        self.directives += 1;
        match self.prefixes.get(&identifier) {
            Some((bound, bound_kind)) if *bound == iri && *bound_kind == kind => Ok(()),
            Some((bound, bound_kind)) => Err(self.error_at(
                token,
                format!("prefix '{identifier}' is already bound to <{bound}> ({})", bound_kind.as_str()),
            )),
            None => {
                self.prefixes.insert(identifier.clone(), (iri.clone(), kind));
                self.emit(Event::Namespace { identifier, iri, kind })
            }
        }
    }

    fn prefix_kind(&self, token: &Token, prefix: &str) -> Result<ReferenceKind> {
        match self.prefixes.get(prefix) {
            Some((_, kind)) => Ok(*kind),
            None => Err(self.error_at(token, format!("unbound prefix '{prefix}'"))),
        }
    }

    fn ident_value(&mut self, what: &str) -> Result<String> {
        let token = self.next_token(what)?;
        match token.kind {
            TokenKind::Ident(v) => Ok(v),
            _ => Err(self.expected(&token, what)),
        }
    }

    fn iri_value(&mut self, what: &str) -> Result<String> {
        let token = self.next_token(what)?;
        match token.kind {
            TokenKind::Iri(v) => Ok(v),
            _ => Err(self.expected(&token, what)),
        }
    }

    fn variable_value(&mut self) -> Result<String> {
        let token = self.next_token("a variable")?;
        match token.kind {
            TokenKind::Variable(v) => Ok(v),
            _ => Err(self.expected(&token, "a variable")),
        }
    }

    fn unsigned(&mut self, what: &str) -> Result<u64> {
        let token = self.next_token(what)?;
        match &token.kind {
            TokenKind::Integer(v) => v
                .trim_start_matches('+')
                .parse()
                .map_err(|_| self.expected(&token, what)),
            _ => Err(self.expected(&token, what)),
        }
    }

    // ------------- rules -------------
    /// Scans the argument list whose `(` sits at lookahead position `lparen`.
    fn call_shape(&mut self, lparen: usize) -> Result<Option<CallShape>> {
        if self.peek_nth(lparen)? != Some(TokenKind::LParen) {
            return Ok(None);
        }
        let mut depth = 0usize;
        let mut commas = 0;
        let mut has_pairs = false;
        let mut empty = true;
        let mut i = lparen;
        loop {
            let Some(kind) = self.peek_nth(i)? else {
                return Ok(None);
            };
            match kind {
                TokenKind::LParen => depth += 1,
                TokenKind::RParen => {
                    depth -= 1;
                    if depth == 0 {
                        break;
                    }
                }
                TokenKind::Comma if depth == 1 => commas += 1,
                TokenKind::Colon if depth == 1 => has_pairs = true,
                TokenKind::QuestionMark => return Ok(None),
                _ => {}
            }
            if i > lparen {
                empty = false;
            }
            i += 1;
        }
        let arity = if empty { 0 } else { commas + 1 };
        let followed_by = self.peek_nth(i + 1)?;
        Ok(Some(CallShape { arity, has_pairs, followed_by }))
    }

    fn at_rule(&mut self) -> Result<bool> {
        if !matches!(self.peek()?, Some(TokenKind::Ident(_))) {
            return Ok(false);
        }
        Ok(self
            .call_shape(1)?
            .is_some_and(|shape| shape.followed_by == Some(TokenKind::Implies)))
    }

    fn rule(&mut self) -> Result<()> {
        let name = self.ident_value("a rule name")?;
        self.expect(TokenKind::LParen)?;
        self.emit(Event::StartRule(name))?;
        if !self.eat(&TokenKind::RParen)? {
            loop {
                let token = self.next_token("a rule parameter")?;
                match token.kind {
                    TokenKind::Variable(v) => self.emit(Event::Variable(v))?,
                    _ => return Err(self.expected(&token, "a variable as rule parameter")),
                }
                if !self.eat(&TokenKind::Comma)? {
                    self.expect(TokenKind::RParen)?;
                    break;
                }
            }
        }
        self.expect(TokenKind::Implies)?;
        self.emit(Event::StartBody)?;
        self.clauses()?;
        self.emit(Event::EndBody)?;
        self.expect(TokenKind::Dot)?;
        self.emit(Event::EndRule)
    }

    // ------------- statements -------------
    fn statement(&mut self) -> Result<()> {
        match self.peek()? {
            Some(TokenKind::Keyword(Keyword::Select)) => self.select(),
            Some(TokenKind::Keyword(Keyword::Insert)) => self.insert(),
            Some(TokenKind::Keyword(Keyword::Update)) => self.update(),
            Some(TokenKind::Keyword(Keyword::Delete)) => self.delete(),
            Some(TokenKind::Keyword(Keyword::Merge)) => self.merge(),
            Some(TokenKind::Keyword(Keyword::Load)) => self.load(),
            Some(TokenKind::Keyword(Keyword::Drop)) => {
                self.single_iri("drop", Event::StartDrop, Event::EndDrop)
            }
            Some(TokenKind::Keyword(Keyword::Create)) => {
                self.single_iri("create", Event::StartCreate, Event::EndCreate)
            }
            _ => self.bare_query(),
        }
    }

    fn select(&mut self) -> Result<()> {
        self.bump()?;
        self.emit(Event::StartSelect)?;
        loop {
            let token = self.next_token("a variable or count(...)")?;
            match token.kind {
                TokenKind::Variable(v) => self.emit(Event::Variable(v))?,
                TokenKind::Keyword(Keyword::Count) => {
                    self.expect(TokenKind::LParen)?;
                    let v = self.variable_value()?;
                    self.expect(TokenKind::RParen)?;
                    self.emit(Event::Count(v))?;
                }
                _ => return Err(self.expected(&token, "a variable or count(...)")),
            }
            if !self.eat(&TokenKind::Comma)? {
                break;
            }
        }
        let token = self.next_token("'from'")?;
        if !matches!(token.kind, TokenKind::Keyword(Keyword::From | Keyword::Where)) {
            return Err(self.expected(&token, "'from'"));
        }
        self.where_clause()?;
        self.tail()?;
        self.emit(Event::EndSelect)
    }

    fn bare_query(&mut self) -> Result<()> {
        self.emit(Event::StartSelect)?;
        self.where_clause()?;
        self.tail()?;
        self.emit(Event::EndSelect)
    }

    fn insert(&mut self) -> Result<()> {
        self.bump()?;
        self.emit(Event::StartInsert)?;
        let token = self.next_token("topic map content")?;
        let TokenKind::Fragment(content) = token.kind else {
            return Err(self.expected(&token, "topic map content"));
        };
        self.emit(Event::StartFragment)?;
        for variable in fragment_variables(&content) {
            self.emit(Event::Variable(variable))?;
        }
        self.emit(Event::FragmentContent(content))?;
        self.emit(Event::EndFragment)?;
        self.optional_where()?;
        self.emit(Event::EndInsert)
    }

    fn update(&mut self) -> Result<()> {
        self.bump()?;
        self.emit(Event::StartUpdate)?;
        loop {
            self.predicate()?;
            if !self.eat(&TokenKind::Comma)? {
                break;
            }
        }
        self.optional_where()?;
        self.emit(Event::EndUpdate)
    }

    fn delete(&mut self) -> Result<()> {
        self.bump()?;
        self.emit(Event::StartDelete)?;
        loop {
            if self.peek_nth(1)? == Some(TokenKind::LParen) {
                self.predicate()?;
            } else {
                self.term()?;
            }
            if !self.eat(&TokenKind::Comma)? {
                break;
            }
        }
        self.optional_where()?;
        self.emit(Event::EndDelete)
    }

    fn merge(&mut self) -> Result<()> {
        self.bump()?;
        self.emit(Event::StartMerge)?;
        self.term()?;
        self.expect(TokenKind::Comma)?;
        self.term()?;
        self.optional_where()?;
        self.emit(Event::EndMerge)
    }

    fn load(&mut self) -> Result<()> {
        let token = self.next_token("load")?;
        self.require_plus(&token, "load")?;
        self.emit(Event::StartLoad)?;
        self.iri_term()?;
        if self.eat_keyword(Keyword::Into)? {
            self.emit(Event::StartInto)?;
            loop {
                self.iri_term()?;
                if !self.eat(&TokenKind::Comma)? {
                    break;
                }
            }
            self.emit(Event::EndInto)?;
        }
        self.emit(Event::EndLoad)
    }

    fn single_iri(&mut self, what: &str, start: Event, end: Event) -> Result<()> {
        let token = self.next_token(what)?;
        self.require_plus(&token, what)?;
        self.emit(start)?;
        self.iri_term()?;
        self.emit(end)
    }

    fn optional_where(&mut self) -> Result<()> {
        if self.eat_keyword(Keyword::From)? || self.eat_keyword(Keyword::Where)? {
            self.where_clause()?;
            self.tail()?;
        }
        Ok(())
    }

    fn where_clause(&mut self) -> Result<()> {
        self.emit(Event::StartWhere)?;
        self.clauses()?;
        self.emit(Event::EndWhere)
    }

    fn tail(&mut self) -> Result<()> {
        if self.eat_keyword(Keyword::Order)? {
            self.expect(TokenKind::Keyword(Keyword::By))?;
            self.emit(Event::StartOrderBy)?;
            loop {
                let variable = self.variable_value()?;
                if self.eat_keyword(Keyword::Desc)? {
                    self.emit(Event::Descending(variable))?;
                } else {
                    self.eat_keyword(Keyword::Asc)?;
                    self.emit(Event::Ascending(variable))?;
                }
                if !self.eat(&TokenKind::Comma)? {
                    break;
                }
            }
            self.emit(Event::EndOrderBy)?;
        }
        let limit = if self.eat_keyword(Keyword::Limit)? { Some(self.unsigned("a limit")?) } else { None };
        let offset = if self.eat_keyword(Keyword::Offset)? { Some(self.unsigned("an offset")?) } else { None };
        if limit.is_some() || offset.is_some() {
            self.emit(Event::StartPagination)?;
            if let Some(limit) = limit {
                self.emit(Event::Limit(limit))?;
            }
            if let Some(offset) = offset {
                self.emit(Event::Offset(offset))?;
            }
            self.emit(Event::EndPagination)?;
        }
        Ok(())
    }

    // ------------- clauses -------------
    fn clauses(&mut self) -> Result<()> {
        loop {
            self.clause()?;
            if !self.eat(&TokenKind::Comma)? {
                return Ok(());
            }
        }
    }

    fn clause(&mut self) -> Result<()> {
        match self.peek()? {
            None => Err(self.eof_error("a clause")),
            Some(TokenKind::Keyword(Keyword::Not)) => self.not_clause(),
            Some(TokenKind::LBrace) => self.or_clause(),
            Some(_) => match self.infix_operator()? {
                Some(op) => self.infix(op),
                None => self.predicate(),
            },
        }
    }

    fn not_clause(&mut self) -> Result<()> {
        self.bump()?;
        self.emit(Event::StartNot)?;
        self.expect(TokenKind::LParen)?;
        self.clauses()?;
        self.expect(TokenKind::RParen)?;
        self.emit(Event::EndNot)
    }

    fn or_clause(&mut self) -> Result<()> {
        self.bump()?;
        self.emit(Event::StartOr)?;
        let mut short_circuit = false;
        loop {
            self.emit(Event::StartBranch { short_circuit })?;
            self.clauses()?;
            self.emit(Event::EndBranch)?;
            short_circuit = match self.peek()? {
                Some(TokenKind::Pipe) => false,
                Some(TokenKind::PipePipe) => true,
                _ => break,
            };
            self.bump()?;
        }
        self.expect(TokenKind::RBrace)?;
        self.emit(Event::EndOr)
    }

    /// Number of tokens the term starting at lookahead position `i` spans.
    fn term_len(&mut self, i: usize) -> Result<Option<usize>> {
        let len = match self.peek_nth(i)? {
            Some(TokenKind::String(_)) => {
                if self.peek_nth(i + 1)? == Some(TokenKind::DoubleCircumflex) { 3 } else { 1 }
            }
            Some(
                TokenKind::Variable(_)
                | TokenKind::Parameter(_)
                | TokenKind::Ident(_)
                | TokenKind::QName { .. }
                | TokenKind::Curie { .. }
                | TokenKind::ObjectId(_)
                | TokenKind::Iri(_)
                | TokenKind::SubjectIdentifier(_)
                | TokenKind::SubjectLocator(_)
                | TokenKind::ItemIdentifier(_)
                | TokenKind::Integer(_)
                | TokenKind::Decimal(_)
                | TokenKind::Date(_)
                | TokenKind::DateTime(_),
            ) => 1,
            Some(TokenKind::Eq | TokenKind::Circumflex) => match self.term_len(i + 1)? {
                Some(n) => n + 1,
                None => return Ok(None),
            },
            _ => return Ok(None),
        };
        Ok(Some(len))
    }

    fn infix_operator(&mut self) -> Result<Option<InfixOp>> {
        let Some(len) = self.term_len(0)? else {
            return Ok(None);
        };
        let op = match self.peek_nth(len)? {
            Some(TokenKind::Eq) => InfixOp::Eq,
            Some(TokenKind::Ne) => InfixOp::Ne,
            Some(TokenKind::Lt) => InfixOp::Lt,
            Some(TokenKind::Le) => InfixOp::Le,
            Some(TokenKind::Gt) => InfixOp::Gt,
            Some(TokenKind::Ge) => InfixOp::Ge,
            _ => return Ok(None),
        };
        Ok(Some(op))
    }

    fn infix(&mut self, op: InfixOp) -> Result<()> {
        self.emit(Event::StartInfixPredicate(op))?;
        self.emit(Event::StartLeft)?;
        self.term()?;
        self.emit(Event::EndLeft)?;
        let token = self.next_token("an operator")?;
        self.require_plus(&token, "infix predicates")?;
        self.emit(Event::StartRight)?;
        self.term()?;
        self.emit(Event::EndRight)?;
        self.emit(Event::EndInfixPredicate)
    }

    fn predicate(&mut self) -> Result<()> {
        let marker = match self.peek()? {
            Some(TokenKind::Eq) => Some(ReferenceKind::SubjectLocator),
            Some(TokenKind::Circumflex) => Some(ReferenceKind::ItemIdentifier),
            _ => None,
        };
        if marker.is_some() {
            let token = self.next_token("a marker")?;
            self.require_plus(&token, "reference markers")?;
        }
        let name_token = self.next_token("a predicate name")?;
        let Some(shape) = self.call_shape(0)? else {
            return Err(match self.bump()? {
                Some(token) => self.expected(&token, "'(' after the predicate name"),
                None => self.eof_error("'(' after the predicate name"),
            });
        };
        let (name, kind) = self.predicate_name(&name_token, marker)?;
        if shape.has_pairs {
            return self.association(name);
        }
        match kind {
            NameKind::Plain(plain) if !self.rule_names.contains(&plain) => {
                if let Some(b) = builtin::lookup(&plain) {
                    self.emit(Event::StartBuiltinPredicate { name: plain, hints: b.hints.to_vec() })?;
                    self.arguments()?;
                    return self.emit(Event::EndBuiltinPredicate);
                }
                if shape.arity == 2 {
                    return self.dynamic(name);
                }
                self.plain(name)
            }
            NameKind::Dynamic => self.dynamic(name),
            NameKind::Reference if shape.arity == 2 => self.dynamic(name),
            NameKind::Plain(_) | NameKind::Module | NameKind::Reference => self.plain(name),
        }
    }

    fn predicate_name(&self, token: &Token, marker: Option<ReferenceKind>) -> Result<(Event, NameKind)> {
        let unmarked = |parser: &Self| match marker {
            Some(_) => Err(parser.expected(token, "a CURIE, QName or IRI after the marker")),
            None => Ok(()),
        };
        let named = match &token.kind {
            TokenKind::Ident(name) => {
                unmarked(self)?;
                (Event::Identifier(name.clone()), NameKind::Plain(name.clone()))
            }
            TokenKind::QName { prefix, local } => {
                let bound = self.prefix_kind(token, prefix)?;
                let name_kind = match (bound, marker) {
                    (ReferenceKind::Module, Some(_)) => {
                        return Err(self.error_at(token, format!("module prefix '{prefix}' cannot be marked")));
                    }
                    (ReferenceKind::Module, None) => NameKind::Module,
                    (_, Some(_)) => NameKind::Dynamic,
                    (_, None) => NameKind::Reference,
                };
                let kind = marker.unwrap_or(bound);
                (Event::QName { kind, prefix: prefix.clone(), local: local.clone() }, name_kind)
            }
            TokenKind::Curie { .. } => (self.curie(token, marker)?, NameKind::Dynamic),
            TokenKind::Iri(v) => (marked_iri(v.clone(), marker), NameKind::Dynamic),
            TokenKind::SubjectIdentifier(v) => {
                unmarked(self)?;
                (Event::SubjectIdentifier(v.clone()), NameKind::Dynamic)
            }
            TokenKind::SubjectLocator(v) => {
                unmarked(self)?;
                (Event::SubjectLocator(v.clone()), NameKind::Dynamic)
            }
            TokenKind::ItemIdentifier(v) => {
                unmarked(self)?;
                (Event::ItemIdentifier(v.clone()), NameKind::Dynamic)
            }
            _ => return Err(self.expected(token, "a predicate name")),
        };
        Ok(named)
    }

    fn curie(&self, token: &Token, marker: Option<ReferenceKind>) -> Result<Event> {
        let TokenKind::Curie { prefix, local } = &token.kind else {
            return Err(self.expected(token, "a CURIE"));
        };
        self.require_plus(token, "CURIEs")?;
        let bound = match self.prefix_kind(token, prefix)? {
            ReferenceKind::Module => ReferenceKind::SubjectIdentifier,
            kind => kind,
        };
        let kind = marker.unwrap_or(bound);
        Ok(Event::Curie { kind, prefix: prefix.clone(), local: local.clone() })
    }

    fn association(&mut self, name: Event) -> Result<()> {
        self.emit(Event::StartAssociationPredicate)?;
        self.emit(Event::StartName)?;
        self.emit(name)?;
        self.emit(Event::EndName)?;
        self.expect(TokenKind::LParen)?;
        loop {
            self.emit(Event::StartPair)?;
            self.emit(Event::StartPlayer)?;
            self.term()?;
            self.emit(Event::EndPlayer)?;
            self.expect(TokenKind::Colon)?;
            self.emit(Event::StartType)?;
            self.term()?;
            self.emit(Event::EndType)?;
            self.emit(Event::EndPair)?;
            if !self.eat(&TokenKind::Comma)? {
                break;
            }
        }
        self.expect(TokenKind::RParen)?;
        self.emit(Event::EndAssociationPredicate)
    }

    fn dynamic(&mut self, name: Event) -> Result<()> {
        self.emit(Event::StartDynamicPredicate)?;
        self.emit(Event::StartName)?;
        self.emit(name)?;
        self.emit(Event::EndName)?;
        self.arguments()?;
        self.emit(Event::EndDynamicPredicate)
    }

    fn plain(&mut self, name: Event) -> Result<()> {
        self.emit(Event::StartPredicate)?;
        self.emit(Event::StartName)?;
        self.emit(name)?;
        self.emit(Event::EndName)?;
        self.arguments()?;
        self.emit(Event::EndPredicate)
    }

    fn arguments(&mut self) -> Result<()> {
        self.expect(TokenKind::LParen)?;
        if self.eat(&TokenKind::RParen)? {
            return Ok(());
        }
        loop {
            self.term()?;
            if !self.eat(&TokenKind::Comma)? {
                break;
            }
        }
        self.expect(TokenKind::RParen)?;
        Ok(())
    }

    // ------------- terms -------------
    fn term(&mut self) -> Result<()> {
        let token = self.next_token("a term")?;
        let event = match &token.kind {
            TokenKind::Variable(v) => Event::Variable(v.clone()),
            TokenKind::Parameter(v) => Event::Parameter(v.clone()),
            TokenKind::Ident(v) => Event::Identifier(v.clone()),
            TokenKind::ObjectId(v) => Event::ObjectId(v.clone()),
            TokenKind::SubjectIdentifier(v) => Event::SubjectIdentifier(v.clone()),
            TokenKind::SubjectLocator(v) => Event::SubjectLocator(v.clone()),
            TokenKind::ItemIdentifier(v) => Event::ItemIdentifier(v.clone()),
            TokenKind::Iri(v) => Event::Iri(v.clone()),
            TokenKind::Integer(v) => Event::Integer(v.clone()),
            TokenKind::Decimal(v) => Event::Decimal(v.clone()),
            TokenKind::Date(v) => Event::Date(v.clone()),
            TokenKind::DateTime(v) => Event::DateTime(v.clone()),
            TokenKind::String(v) => {
                if self.eat(&TokenKind::DoubleCircumflex)? {
                    let datatype = self.datatype()?;
                    Event::Literal { value: v.clone(), datatype }
                } else {
                    Event::String(v.clone())
                }
            }
            TokenKind::QName { .. } => self.reference_qname(&token, None)?,
            TokenKind::Curie { .. } => self.curie(&token, None)?,
            TokenKind::Eq | TokenKind::Circumflex => {
                self.require_plus(&token, "reference markers")?;
                let marker = if token.kind == TokenKind::Eq {
                    ReferenceKind::SubjectLocator
                } else {
                    ReferenceKind::ItemIdentifier
                };
                let target = self.next_token("a reference after the marker")?;
                match &target.kind {
                    TokenKind::Iri(v) => marked_iri(v.clone(), Some(marker)),
                    TokenKind::QName { .. } => self.reference_qname(&target, Some(marker))?,
                    TokenKind::Curie { .. } => self.curie(&target, Some(marker))?,
                    _ => return Err(self.expected(&target, "a CURIE, QName or IRI after the marker")),
                }
            }
            _ => return Err(self.expected(&token, "a term")),
        };
        self.emit(event)
    }

    fn reference_qname(&self, token: &Token, marker: Option<ReferenceKind>) -> Result<Event> {
        let TokenKind::QName { prefix, local } = &token.kind else {
            return Err(self.expected(token, "a QName"));
        };
        let bound = self.prefix_kind(token, prefix)?;
        if bound == ReferenceKind::Module {
            return Err(self.error_at(token, format!("module prefix '{prefix}' cannot be used as a reference")));
        }
        let kind = marker.unwrap_or(bound);
        Ok(Event::QName { kind, prefix: prefix.clone(), local: local.clone() })
    }

    fn datatype(&mut self) -> Result<Datatype> {
        let token = self.next_token("a datatype")?;
        match &token.kind {
            TokenKind::Iri(v) => Ok(Datatype::Iri(v.clone())),
            TokenKind::QName { prefix, local } => {
                self.prefix_kind(&token, prefix)?;
                Ok(Datatype::QName { prefix: prefix.clone(), local: local.clone() })
            }
            _ => Err(self.expected(&token, "a datatype IRI or QName")),
        }
    }

    fn iri_term(&mut self) -> Result<()> {
        let token = self.next_token("an IRI")?;
        let event = match &token.kind {
            TokenKind::Iri(v) => Event::Iri(v.clone()),
            TokenKind::QName { .. } => self.reference_qname(&token, None)?,
            _ => return Err(self.expected(&token, "an IRI")),
        };
        self.emit(event)
    }
}

fn marked_iri(iri: String, marker: Option<ReferenceKind>) -> Event {
    match marker {
        Some(ReferenceKind::SubjectLocator) => Event::SubjectLocator(iri),
        Some(ReferenceKind::ItemIdentifier) => Event::ItemIdentifier(iri),
        _ => Event::Iri(iri),
    }
}

/// Names of all rules defined in `text`, so calls to rules defined further
/// down are not mistaken for dynamic predicates.
fn defined_rules(text: &str) -> HashSet<String, OtherHasher> {
    let tokens: Vec<TokenKind> = Lexer::new(text).map_while(|t| t.ok()).map(|t| t.kind).collect();
    let mut names = HashSet::default();
    for (i, kind) in tokens.iter().enumerate() {
        let TokenKind::Ident(name) = kind else { continue };
        if tokens.get(i + 1) != Some(&TokenKind::LParen) {
            continue;
        }
        let Some(close) = tokens[i + 1..].iter().position(|k| *k == TokenKind::RParen) else {
            continue;
        };
        if tokens.get(i + 1 + close + 1) == Some(&TokenKind::Implies) {
            names.insert(name.clone());
        }
    }
    names
}
