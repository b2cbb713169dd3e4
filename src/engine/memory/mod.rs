//! In-process inverted index implementing [`SearchEngine`].
//!
//! Content is tokenized with [`analyze`]; each token maps to a roaring
//! bitmap of document ids. `path` and `filename` are keyword fields matched
//! against the stored values. Results are ordered by number of matched
//! term occurrences, ties broken by path.

pub mod parser;

use crate::engine::highlight;
use crate::engine::{EngineHit, EngineHits, EngineQuery, ItemOutcome, SearchEngine};
use crate::error::EngineError;
use crate::index::types::{CandidateDocument, Document};
use crate::utils::tokenizer::{Token, analyze};
use parser::{Field, QueryNode, parse_query};
use regex::Regex;
use roaring::RoaringBitmap;
use rustc_hash::FxHashMap;
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

/// A stored document with its analyzed tokens
struct StoredDoc {
    path: String,
    filename: String,
    content: String,
    tokens: Vec<Token>,
}

#[derive(Default)]
struct MemoryIndex {
    docs: Vec<Option<StoredDoc>>,
    keys: HashMap<String, u32>,
    postings: FxHashMap<String, RoaringBitmap>,
    live: RoaringBitmap,
}

impl MemoryIndex {
    fn upsert(&mut self, doc: &CandidateDocument) {
        let tokens = analyze(&doc.content);
        let id = match self.keys.get(&doc.path) {
            Some(&id) => {
                self.unlink(id);
                id
            }
            None => {
                let id = self.docs.len() as u32;
                self.docs.push(None);
                self.keys.insert(doc.path.clone(), id);
                id
            }
        };

        for token in &tokens {
            self.postings.entry(token.text.clone()).or_default().insert(id);
        }
        self.live.insert(id);
        self.docs[id as usize] = Some(StoredDoc {
            path: doc.path.clone(),
            filename: doc.filename.clone(),
            content: doc.content.clone(),
            tokens,
        });
    }

    /// Remove a document's postings, leaving its slot empty
    fn unlink(&mut self, id: u32) {
        if let Some(old) = self.docs.get_mut(id as usize).and_then(Option::take) {
            for token in &old.tokens {
                if let Some(bitmap) = self.postings.get_mut(&token.text) {
                    bitmap.remove(id);
                    if bitmap.is_empty() {
                        self.postings.remove(&token.text);
                    }
                }
            }
        }
        self.live.remove(id);
    }

    fn doc(&self, id: u32) -> Option<&StoredDoc> {
        self.docs.get(id as usize).and_then(Option::as_ref)
    }

    fn evaluate(&self, node: &Matcher) -> RoaringBitmap {
        match node {
            Matcher::Leaf(leaf) => self.evaluate_leaf(leaf),
            Matcher::And(children) => {
                let mut positives = children.iter().filter(|c| !matches!(c, Matcher::Not(_)));
                let mut result = match positives.next() {
                    Some(first) => self.evaluate(first),
                    None => self.live.clone(),
                };
                for child in positives {
                    if result.is_empty() {
                        break;
                    }
                    result &= self.evaluate(child);
                }
                for child in children {
                    if let Matcher::Not(inner) = child {
                        result -= self.evaluate(inner);
                    }
                }
                result
            }
            Matcher::Or(children) => {
                let mut result = RoaringBitmap::new();
                for child in children {
                    result |= self.evaluate(child);
                }
                result
            }
            Matcher::Not(inner) => &self.live - &self.evaluate(inner),
            Matcher::Nothing => RoaringBitmap::new(),
        }
    }

    fn evaluate_leaf(&self, leaf: &Leaf) -> RoaringBitmap {
        match leaf {
            Leaf::Content(term) => match term {
                TermMatcher::Exact(text) => self.postings.get(text).cloned().unwrap_or_default(),
                TermMatcher::Phrase { terms, slop } => {
                    let mut candidates = self.live.clone();
                    for term in terms {
                        match self.postings.get(term) {
                            Some(bitmap) => candidates &= bitmap,
                            None => return RoaringBitmap::new(),
                        }
                    }
                    candidates
                        .iter()
                        .filter(|&id| {
                            self.doc(id)
                                .is_some_and(|d| !phrase_spans(&d.tokens, terms, *slop).is_empty())
                        })
                        .collect()
                }
                other => {
                    let mut result = RoaringBitmap::new();
                    for (token, bitmap) in &self.postings {
                        if other.matches_token(token) {
                            result |= bitmap;
                        }
                    }
                    result
                }
            },
            Leaf::Keyword { field, term } => self
                .live
                .iter()
                .filter(|&id| {
                    self.doc(id).is_some_and(|d| {
                        let value = if *field == Field::Path { &d.path } else { &d.filename };
                        term.matches_keyword(value)
                    })
                })
                .collect(),
        }
    }
}

/// Compiled form of a single term clause
enum TermMatcher {
    Exact(String),
    Wildcard(Regex),
    Fuzzy { text: Vec<char>, max_edits: u8 },
    Phrase { terms: Vec<String>, slop: u32 },
}

impl TermMatcher {
    fn matches_token(&self, token: &str) -> bool {
        match self {
            TermMatcher::Exact(text) => text == token,
            TermMatcher::Wildcard(re) => re.is_match(token),
            TermMatcher::Fuzzy { text, max_edits } => within_edits(text, token, *max_edits as usize),
            TermMatcher::Phrase { .. } => false,
        }
    }

    fn matches_keyword(&self, value: &str) -> bool {
        match self {
            TermMatcher::Phrase { .. } => false,
            other => other.matches_token(value),
        }
    }
}

enum Leaf {
    Content(TermMatcher),
    Keyword { field: Field, term: TermMatcher },
}

/// Query AST with wildcards compiled
enum Matcher {
    Leaf(Leaf),
    And(Vec<Matcher>),
    Or(Vec<Matcher>),
    Not(Box<Matcher>),
    Nothing,
}

impl Matcher {
    fn compile(node: &QueryNode) -> Result<Self, EngineError> {
        let leaf = |field: Field, term: TermMatcher| {
            if field == Field::Content {
                Matcher::Leaf(Leaf::Content(term))
            } else {
                Matcher::Leaf(Leaf::Keyword { field, term })
            }
        };

        Ok(match node {
            QueryNode::Term { field, text } => leaf(*field, TermMatcher::Exact(text.clone())),
            QueryNode::Wildcard { field, pattern } => {
                leaf(*field, TermMatcher::Wildcard(wildcard_regex(pattern)?))
            }
            QueryNode::Fuzzy { field, text, max_edits } => leaf(
                *field,
                TermMatcher::Fuzzy {
                    text: text.chars().collect(),
                    max_edits: *max_edits,
                },
            ),
            QueryNode::Phrase { field, terms, slop } => leaf(
                *field,
                TermMatcher::Phrase {
                    terms: terms.clone(),
                    slop: *slop,
                },
            ),
            QueryNode::And(children) => {
                Matcher::And(children.iter().map(Matcher::compile).collect::<Result<_, _>>()?)
            }
            QueryNode::Or(children) => {
                Matcher::Or(children.iter().map(Matcher::compile).collect::<Result<_, _>>()?)
            }
            QueryNode::Not(inner) => Matcher::Not(Box::new(Matcher::compile(inner)?)),
            QueryNode::Empty => Matcher::Nothing,
        })
    }

    /// Content clauses that contribute highlights (those not under a NOT)
    fn highlight_terms<'m>(&'m self, out: &mut Vec<&'m TermMatcher>) {
        match self {
            Matcher::Leaf(Leaf::Content(term)) => out.push(term),
            Matcher::And(children) | Matcher::Or(children) => {
                for child in children {
                    child.highlight_terms(out);
                }
            }
            _ => {}
        }
    }
}

/// In-process search engine
#[derive(Default)]
pub struct MemoryEngine {
    index: RwLock<MemoryIndex>,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, MemoryIndex> {
        self.index.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, MemoryIndex> {
        self.index.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl SearchEngine for MemoryEngine {
    fn name(&self) -> &str {
        "memory"
    }

    fn reset(&self, _timeout: Duration) -> Result<(), EngineError> {
        *self.write() = MemoryIndex::default();
        Ok(())
    }

    fn bulk_write(
        &self,
        docs: &[CandidateDocument],
        _timeout: Duration,
    ) -> Result<Vec<ItemOutcome>, EngineError> {
        let mut index = self.write();
        Ok(docs
            .iter()
            .map(|doc| {
                if doc.path.is_empty() {
                    return Err("document key must not be empty".to_string());
                }
                index.upsert(doc);
                Ok(())
            })
            .collect())
    }

    fn query(&self, query: &EngineQuery, _timeout: Duration) -> Result<EngineHits, EngineError> {
        let ast = parse_query(&query.query).map_err(|e| EngineError::Rejected(e.to_string()))?;
        let matcher = Matcher::compile(&ast)?;
        let mut highlight_terms = Vec::new();
        matcher.highlight_terms(&mut highlight_terms);

        let index = self.read();
        let matched = index.evaluate(&matcher);

        let mut scored: Vec<(usize, &StoredDoc, Vec<(usize, usize)>)> = matched
            .iter()
            .filter_map(|id| index.doc(id))
            .map(|doc| {
                let spans = match_spans(&doc.tokens, &highlight_terms);
                (spans.len(), doc, spans)
            })
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.path.cmp(&b.1.path)));

        let hits = scored
            .into_iter()
            .skip(query.from)
            .take(query.size)
            .map(|(_, doc, spans)| EngineHit {
                path: doc.path.clone(),
                filename: doc.filename.clone(),
                content: doc.content.clone(),
                fragments: if query.highlight {
                    highlight::fragments(&doc.content, &spans)
                } else {
                    Vec::new()
                },
            })
            .collect();

        Ok(EngineHits {
            total: matched.len(),
            hits,
        })
    }

    fn get(&self, key: &str, _timeout: Duration) -> Result<Option<Document>, EngineError> {
        let index = self.read();
        Ok(index.keys.get(key).and_then(|&id| index.doc(id)).map(|d| Document {
            path: d.path.clone(),
            filename: d.filename.clone(),
            content: d.content.clone(),
        }))
    }

    fn doc_count(&self, _timeout: Duration) -> Result<u64, EngineError> {
        Ok(self.read().live.len())
    }
}

/// Byte spans of every token occurrence matched by the highlight clauses
fn match_spans(tokens: &[Token], terms: &[&TermMatcher]) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    for term in terms {
        match term {
            TermMatcher::Phrase { terms, slop } => spans.extend(phrase_spans(tokens, terms, *slop)),
            other => spans.extend(
                tokens
                    .iter()
                    .filter(|t| other.matches_token(&t.text))
                    .map(|t| (t.start, t.end)),
            ),
        }
    }
    spans
}

/// Spans of phrase occurrences: terms in order, with at most `slop` extra positions in total
fn phrase_spans(tokens: &[Token], terms: &[String], slop: u32) -> Vec<(usize, usize)> {
    let Some(first) = terms.first() else {
        return Vec::new();
    };
    let max_width = terms.len() + slop as usize;
    let mut spans = Vec::new();

    for (start, token) in tokens.iter().enumerate() {
        if token.text != *first {
            continue;
        }
        let mut pos = start;
        let mut complete = true;
        for term in &terms[1..] {
            let limit = (start + max_width).min(tokens.len());
            match (pos + 1..limit).find(|&i| tokens[i].text == *term) {
                Some(next) => pos = next,
                None => {
                    complete = false;
                    break;
                }
            }
        }
        if complete {
            spans.push((token.start, tokens[pos].end));
        }
    }
    spans
}

/// Translate a `*`/`?` pattern into an anchored regex
fn wildcard_regex(pattern: &str) -> Result<Regex, EngineError> {
    let mut re = String::with_capacity(pattern.len() + 8);
    re.push('^');
    let mut buf = [0u8; 4];
    for ch in pattern.chars() {
        match ch {
            '*' => re.push_str(".*"),
            '?' => re.push('.'),
            _ => re.push_str(&regex::escape(ch.encode_utf8(&mut buf))),
        }
    }
    re.push('$');
    Regex::new(&re).map_err(|e| EngineError::Rejected(format!("invalid wildcard '{}': {}", pattern, e)))
}

/// Levenshtein distance check with early exit
fn within_edits(query: &[char], candidate: &str, max_edits: usize) -> bool {
    let candidate: Vec<char> = candidate.chars().collect();
    if query.len().abs_diff(candidate.len()) > max_edits {
        return false;
    }

    let mut prev: Vec<usize> = (0..=candidate.len()).collect();
    let mut curr = vec![0; candidate.len() + 1];
    for (i, qc) in query.iter().enumerate() {
        curr[0] = i + 1;
        let mut row_min = curr[0];
        for (j, cc) in candidate.iter().enumerate() {
            let cost = usize::from(qc != cc);
            curr[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(curr[j] + 1);
            row_min = row_min.min(curr[j + 1]);
        }
        if row_min > max_edits {
            return false;
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[candidate.len()] <= max_edits
}

#[cfg(test)]
mod tests {
    use super::*;

    const T: Duration = Duration::from_secs(1);

    fn doc(path: &str, content: &str) -> CandidateDocument {
        CandidateDocument {
            path: path.to_string(),
            filename: path.rsplit('/').next().unwrap().to_string(),
            content: content.to_string(),
        }
    }

    fn engine_with(docs: &[(&str, &str)]) -> MemoryEngine {
        let engine = MemoryEngine::new();
        let docs: Vec<_> = docs.iter().map(|(p, c)| doc(p, c)).collect();
        let outcomes = engine.bulk_write(&docs, T).unwrap();
        assert!(outcomes.iter().all(Result::is_ok));
        engine
    }

    fn search(engine: &MemoryEngine, q: &str) -> EngineHits {
        engine
            .query(
                &EngineQuery {
                    query: q.to_string(),
                    from: 0,
                    size: 10,
                    highlight: true,
                },
                T,
            )
            .unwrap()
    }

    fn paths(hits: &EngineHits) -> Vec<&str> {
        hits.hits.iter().map(|h| h.path.as_str()).collect()
    }

    fn sample() -> MemoryEngine {
        engine_with(&[
            ("/sql/a.sql", "SELECT id FROM customers"),
            ("/sql/b.sql", "SELECT * FROM orders JOIN customers ON customers.id = orders.cid"),
            ("/sql/c.sql", "INSERT INTO orders VALUES (1)"),
            ("/sql/reports/d.sql", "-- monthly report\nSELECT total FROM invoices"),
        ])
    }

    #[test]
    fn test_term_query_is_case_insensitive() {
        let hits = search(&sample(), "CUSTOMERS");
        assert_eq!(hits.total, 2);
        // b.sql mentions customers twice
        assert_eq!(paths(&hits), vec!["/sql/b.sql", "/sql/a.sql"]);
    }

    #[test]
    fn test_implicit_and() {
        let hits = search(&sample(), "select orders");
        assert_eq!(paths(&hits), vec!["/sql/b.sql"]);
    }

    #[test]
    fn test_or_and_not() {
        let engine = sample();
        assert_eq!(search(&engine, "invoices OR insert").total, 2);
        assert_eq!(paths(&search(&engine, "orders NOT join")), vec!["/sql/c.sql"]);
        assert_eq!(paths(&search(&engine, "orders -select")), vec!["/sql/c.sql"]);
        assert_eq!(search(&engine, "NOT select").total, 1);
    }

    #[test]
    fn test_phrase_and_slop() {
        let engine = sample();
        assert_eq!(paths(&search(&engine, "\"select total\"")), vec!["/sql/reports/d.sql"]);
        assert_eq!(paths(&search(&engine, "\"select from\"")), vec!["/sql/b.sql"]);
        assert_eq!(search(&engine, "\"select from\"~1").total, 3);
    }

    #[test]
    fn test_wildcard_and_fuzzy() {
        let engine = sample();
        assert_eq!(search(&engine, "invoi*").total, 1);
        assert_eq!(search(&engine, "ord?rs").total, 2);
        assert_eq!(search(&engine, "custmers~1").total, 2);
        assert_eq!(search(&engine, "custmrs~1").total, 0);
    }

    #[test]
    fn test_keyword_fields() {
        let engine = sample();
        assert_eq!(paths(&search(&engine, "filename:d.sql")), vec!["/sql/reports/d.sql"]);
        assert_eq!(search(&engine, "path:/sql/reports/*").total, 1);
        assert_eq!(search(&engine, "filename:D.SQL").total, 0);
    }

    #[test]
    fn test_malformed_query_rejected() {
        let err = sample()
            .query(
                &EngineQuery {
                    query: "(orders".to_string(),
                    from: 0,
                    size: 10,
                    highlight: false,
                },
                T,
            )
            .unwrap_err();
        assert!(matches!(err, EngineError::Rejected(_)));
    }

    #[test]
    fn test_highlight_fragments() {
        let hits = search(&sample(), "invoices");
        assert_eq!(hits.hits[0].fragments.len(), 1);
        assert!(hits.hits[0].fragments[0].contains("<em>invoices</em>"));
    }

    #[test]
    fn test_not_clause_is_not_highlighted() {
        let hits = search(&sample(), "orders NOT join");
        assert!(!hits.hits[0].fragments[0].contains("<em>INSERT</em>"));
        assert!(hits.hits[0].fragments[0].contains("<em>orders</em>"));
    }

    #[test]
    fn test_paging_keeps_exact_total() {
        let docs: Vec<(String, String)> = (0..25)
            .map(|i| (format!("/sql/{:02}.sql", i), "select 1".to_string()))
            .collect();
        let refs: Vec<(&str, &str)> = docs.iter().map(|(p, c)| (p.as_str(), c.as_str())).collect();
        let engine = engine_with(&refs);

        let page = engine
            .query(
                &EngineQuery {
                    query: "select".to_string(),
                    from: 20,
                    size: 10,
                    highlight: false,
                },
                T,
            )
            .unwrap();
        assert_eq!(page.total, 25);
        assert_eq!(page.hits.len(), 5);
        assert_eq!(page.hits[0].path, "/sql/20.sql");
        assert!(page.hits[0].fragments.is_empty());
    }

    #[test]
    fn test_upsert_replaces_document() {
        let engine = sample();
        engine.bulk_write(&[doc("/sql/a.sql", "DROP TABLE audit")], T).unwrap();
        assert_eq!(engine.doc_count(T).unwrap(), 4);
        assert_eq!(search(&engine, "customers").total, 1);
        assert_eq!(search(&engine, "audit").total, 1);
    }

    #[test]
    fn test_get_and_reset() {
        let engine = sample();
        let stored = engine.get("/sql/c.sql", T).unwrap().unwrap();
        assert_eq!(stored.filename, "c.sql");
        assert_eq!(stored.content, "INSERT INTO orders VALUES (1)");
        assert!(engine.get("/sql/missing.sql", T).unwrap().is_none());

        engine.reset(T).unwrap();
        assert_eq!(engine.doc_count(T).unwrap(), 0);
        assert!(engine.get("/sql/c.sql", T).unwrap().is_none());
    }

    #[test]
    fn test_empty_key_rejected_per_item() {
        let engine = MemoryEngine::new();
        let outcomes = engine.bulk_write(&[doc("/sql/ok.sql", "x"), doc("", "y")], T).unwrap();
        assert!(outcomes[0].is_ok());
        assert!(outcomes[1].is_err());
        assert_eq!(engine.doc_count(T).unwrap(), 1);
    }

    #[test]
    fn test_within_edits() {
        let q: Vec<char> = "customer".chars().collect();
        assert!(within_edits(&q, "customer", 0));
        assert!(within_edits(&q, "custmer", 1));
        assert!(within_edits(&q, "costumer", 2));
        assert!(!within_edits(&q, "cust", 2));
    }
}
