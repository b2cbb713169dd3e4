//! Lucene-style query syntax for the in-process engine.
//!
//! Supported: implicit AND between clauses, `AND`/`OR`/`NOT` (also `&&`,
//! `||`, `!`), `+`/`-` prefixes, quoted phrases with optional `~N` slop,
//! `*`/`?` wildcards, `~N` fuzzy terms, parentheses, backslash escapes and
//! the `content:`, `path:` and `filename:` fields.

use crate::utils::tokenizer::{analyze, normalize_term};
use std::fmt;

/// Default edit distance for `term~`
const DEFAULT_FUZZY_EDITS: u8 = 2;

/// Largest accepted edit distance
const MAX_FUZZY_EDITS: u8 = 2;

/// Document field a clause applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    /// Analyzed file content (case-insensitive)
    Content,
    /// Absolute path, matched as a whole keyword
    Path,
    /// File name, matched as a whole keyword
    Filename,
}

impl Field {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "content" => Some(Field::Content),
            "path" => Some(Field::Path),
            "filename" => Some(Field::Filename),
            _ => None,
        }
    }
}

/// Query AST node
#[derive(Debug, Clone, PartialEq)]
pub enum QueryNode {
    /// Exact term (content terms are lowercased)
    Term { field: Field, text: String },
    /// Term containing `*` or `?`
    Wildcard { field: Field, pattern: String },
    /// Term matched within an edit distance
    Fuzzy { field: Field, text: String, max_edits: u8 },
    /// Consecutive terms, allowing `slop` extra positions
    Phrase { field: Field, terms: Vec<String>, slop: u32 },
    /// Boolean AND (all must match)
    And(Vec<QueryNode>),
    /// Boolean OR (any can match)
    Or(Vec<QueryNode>),
    /// Boolean NOT (exclude matches)
    Not(Box<QueryNode>),
    /// Clause that analyzed to nothing; matches no documents
    Empty,
}

/// Syntax error with the byte position it was detected at
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub position: usize,
    pub message: String,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Cannot parse query at position {}: {}", self.position, self.message)
    }
}

impl std::error::Error for ParseError {}

/// Parse a query string into its AST
pub fn parse_query(input: &str) -> Result<QueryNode, ParseError> {
    let mut parser = QueryParser::new(input);
    let node = parser.parse_or()?;
    parser.skip_whitespace();
    if !parser.is_eof() {
        return Err(parser.error("unexpected ')'"));
    }
    Ok(node)
}

/// Operator keywords recognised between clauses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operator {
    And,
    Or,
    Not,
}

/// Query parser
struct QueryParser<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> QueryParser<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn parse_or(&mut self) -> Result<QueryNode, ParseError> {
        let mut nodes = vec![self.parse_and()?];

        loop {
            self.skip_whitespace();
            if self.peek_operator() != Some(Operator::Or) {
                break;
            }
            self.consume_operator();
            self.skip_whitespace();
            if self.at_clause_end() {
                return Err(self.error("expected a clause after OR"));
            }
            nodes.push(self.parse_and()?);
        }

        Ok(simplify(nodes, QueryNode::Or))
    }

    fn parse_and(&mut self) -> Result<QueryNode, ParseError> {
        let mut nodes = Vec::new();

        loop {
            self.skip_whitespace();

            if self.at_clause_end() {
                break;
            }

            match self.peek_operator() {
                Some(Operator::Or) => break,
                Some(Operator::And) => {
                    if nodes.is_empty() {
                        return Err(self.error("expected a clause before AND"));
                    }
                    self.consume_operator();
                    self.skip_whitespace();
                    if self.at_clause_end() || self.peek_operator() == Some(Operator::Or) {
                        return Err(self.error("expected a clause after AND"));
                    }
                    continue;
                }
                _ => {}
            }

            nodes.push(self.parse_unary()?);
        }

        if nodes.is_empty() {
            return Err(self.error("expected a clause"));
        }

        Ok(simplify(nodes, QueryNode::And))
    }

    fn parse_unary(&mut self) -> Result<QueryNode, ParseError> {
        self.skip_whitespace();

        if self.peek_operator() == Some(Operator::Not) || self.peek_char() == Some('-') {
            if self.peek_char() == Some('-') {
                self.advance();
            } else {
                self.consume_operator();
            }
            self.skip_whitespace();
            if self.at_clause_end() {
                return Err(self.error("expected a clause after NOT"));
            }
            let inner = self.parse_unary()?;
            return Ok(QueryNode::Not(Box::new(inner)));
        }

        // Required marker, same as the default operator
        if self.consume_char('+') {
            if self.at_clause_end() {
                return Err(self.error("expected a clause after '+'"));
            }
            return self.parse_unary();
        }

        self.parse_primary(Field::Content)
    }

    fn parse_primary(&mut self, field: Field) -> Result<QueryNode, ParseError> {
        self.skip_whitespace();

        // Parenthesized expression
        if self.consume_char('(') {
            self.skip_whitespace();
            if self.consume_char(')') {
                return Err(self.error("empty parentheses"));
            }
            let node = self.parse_or()?;
            self.skip_whitespace();
            if !self.consume_char(')') {
                return Err(self.error("missing closing parenthesis"));
            }
            return Ok(node);
        }

        // Quoted phrase
        if self.peek_char() == Some('"') {
            return self.parse_phrase(field);
        }

        self.parse_term(field)
    }

    fn parse_phrase(&mut self, field: Field) -> Result<QueryNode, ParseError> {
        let open = self.pos;
        self.consume_char('"');
        let mut text = String::new();

        loop {
            match self.peek_char() {
                None => {
                    return Err(ParseError {
                        position: open,
                        message: "unterminated quoted phrase".to_string(),
                    });
                }
                Some('"') => {
                    self.advance();
                    break;
                }
                Some('\\') => {
                    self.advance();
                    if let Some(ch) = self.peek_char() {
                        text.push(ch);
                        self.advance();
                    }
                }
                Some(ch) => {
                    text.push(ch);
                    self.advance();
                }
            }
        }

        let slop = if self.consume_char('~') {
            self.parse_number()?.unwrap_or(0)
        } else {
            0
        };

        if field != Field::Content {
            return Ok(QueryNode::Term { field, text });
        }

        let terms: Vec<String> = analyze(&text).into_iter().map(|t| t.text).collect();
        Ok(match terms.len() {
            0 => QueryNode::Empty,
            1 => QueryNode::Term {
                field,
                text: terms.into_iter().next().unwrap_or_default(),
            },
            _ => QueryNode::Phrase { field, terms, slop },
        })
    }

    fn parse_term(&mut self, field: Field) -> Result<QueryNode, ParseError> {
        let start = self.pos;
        let mut word = String::new();
        let mut has_wildcard = false;
        let mut fuzzy: Option<u8> = None;

        while let Some(ch) = self.peek_char() {
            if ch.is_whitespace() || ch == '(' || ch == ')' || ch == '"' {
                break;
            }

            match ch {
                '\\' => {
                    self.advance();
                    if let Some(escaped) = self.peek_char() {
                        word.push(escaped);
                        self.advance();
                    }
                }
                ':' if field == Field::Content && !word.is_empty() && !has_wildcard => {
                    let name = word.clone();
                    let Some(target) = Field::from_name(&name) else {
                        return Err(ParseError {
                            position: start,
                            message: format!("unknown field '{}'", name),
                        });
                    };
                    self.advance();
                    if self.is_eof() || self.peek_char().is_some_and(char::is_whitespace) {
                        return Err(self.error("expected a value after field name"));
                    }
                    return self.parse_primary(target);
                }
                '~' => {
                    self.advance();
                    let edits = self.parse_number()?.unwrap_or(DEFAULT_FUZZY_EDITS as u32);
                    if edits > MAX_FUZZY_EDITS as u32 {
                        return Err(self.error("fuzzy edit distance must be 0, 1 or 2"));
                    }
                    fuzzy = Some(edits as u8);
                    break;
                }
                '*' | '?' => {
                    has_wildcard = true;
                    word.push(ch);
                    self.advance();
                }
                _ => {
                    word.push(ch);
                    self.advance();
                }
            }
        }

        if word.is_empty() {
            return Err(ParseError {
                position: start,
                message: "expected a term".to_string(),
            });
        }

        if has_wildcard {
            let pattern = if field == Field::Content { normalize_term(&word) } else { word };
            return Ok(QueryNode::Wildcard { field, pattern });
        }

        if let Some(max_edits) = fuzzy {
            let text = if field == Field::Content { normalize_term(&word) } else { word };
            return Ok(QueryNode::Fuzzy { field, text, max_edits });
        }

        if field != Field::Content {
            return Ok(QueryNode::Term { field, text: word });
        }

        // A term that analyzes into several tokens behaves like a phrase
        let terms: Vec<String> = analyze(&word).into_iter().map(|t| t.text).collect();
        Ok(match terms.len() {
            0 => QueryNode::Empty,
            1 => QueryNode::Term {
                field,
                text: terms.into_iter().next().unwrap_or_default(),
            },
            _ => QueryNode::Phrase { field, terms, slop: 0 },
        })
    }

    fn parse_number(&mut self) -> Result<Option<u32>, ParseError> {
        let start = self.pos;
        while self.peek_char().is_some_and(|c| c.is_ascii_digit()) {
            self.advance();
        }
        if start == self.pos {
            return Ok(None);
        }
        self.input[start..self.pos]
            .parse()
            .map(Some)
            .map_err(|_| ParseError {
                position: start,
                message: "number out of range".to_string(),
            })
    }

    /// Operator keyword at the cursor, if it stands alone
    fn peek_operator(&self) -> Option<Operator> {
        let rest = self.remaining();
        if rest.starts_with("&&") {
            return Some(Operator::And);
        }
        if rest.starts_with("||") {
            return Some(Operator::Or);
        }
        if rest.starts_with('!') {
            return Some(Operator::Not);
        }
        for (word, op) in [("AND", Operator::And), ("OR", Operator::Or), ("NOT", Operator::Not)] {
            if let Some(after) = rest.strip_prefix(word)
                && after
                    .chars()
                    .next()
                    .is_none_or(|c| c.is_whitespace() || c == '(' || c == '"')
            {
                return Some(op);
            }
        }
        None
    }

    fn consume_operator(&mut self) {
        let rest = self.remaining();
        let len = if rest.starts_with("&&") || rest.starts_with("||") {
            2
        } else if rest.starts_with('!') {
            1
        } else if rest.starts_with("AND") || rest.starts_with("NOT") {
            3
        } else if rest.starts_with("OR") {
            2
        } else {
            0
        };
        self.pos += len;
    }

    fn at_clause_end(&self) -> bool {
        self.is_eof() || self.peek_char() == Some(')')
    }

    fn error(&self, message: &str) -> ParseError {
        ParseError {
            position: self.pos,
            message: message.to_string(),
        }
    }

    fn skip_whitespace(&mut self) {
        while self.peek_char().is_some_and(char::is_whitespace) {
            self.advance();
        }
    }

    fn is_eof(&self) -> bool {
        self.pos >= self.input.len()
    }

    fn peek_char(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn consume_char(&mut self, expected: char) -> bool {
        if self.peek_char() == Some(expected) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn advance(&mut self) {
        if let Some(ch) = self.peek_char() {
            self.pos += ch.len_utf8();
        }
    }

    fn remaining(&self) -> &str {
        &self.input[self.pos..]
    }
}

/// Collapse single-child groups and drop clauses that analyzed to nothing
fn simplify(mut nodes: Vec<QueryNode>, wrap: fn(Vec<QueryNode>) -> QueryNode) -> QueryNode {
    nodes.retain(|n| *n != QueryNode::Empty);
    match nodes.len() {
        0 => QueryNode::Empty,
        1 => nodes.pop().unwrap_or(QueryNode::Empty),
        _ => wrap(nodes),
    }
}
