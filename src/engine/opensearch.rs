//! OpenSearch / Elasticsearch engine over the REST API.

use crate::engine::highlight::{POST_TAG, PRE_TAG};
use crate::engine::{EngineHit, EngineHits, EngineQuery, ItemOutcome, SearchEngine};
use crate::error::EngineError;
use crate::index::types::{CandidateDocument, Document};
use anyhow::{Context, Result};
use reqwest::StatusCode;
use reqwest::blocking::{Client, RequestBuilder, Response};
use serde::Deserialize;
use serde_json::{Value, json};
use std::time::Duration;

/// Longest error body quoted back to the caller
const MAX_REASON_LEN: usize = 500;

/// Blocking client bound to one index
pub struct OpenSearchEngine {
    client: Client,
    index_url: String,
    /// Search body shared by every query; exact totals are always requested
    search_template: Value,
}

impl OpenSearchEngine {
    pub fn new(base_url: &str, index: &str) -> Result<Self> {
        let base = base_url.trim().trim_end_matches('/');
        if base.is_empty() {
            anyhow::bail!("search engine URL is empty");
        }
        if index.trim().is_empty() {
            anyhow::bail!("search engine index name is empty");
        }

        let client = Client::builder()
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            index_url: format!("{}/{}", base, urlencoding::encode(index.trim())),
            search_template: search_template(),
        })
    }

    fn send(&self, request: RequestBuilder, timeout: Duration) -> Result<Response, EngineError> {
        request.timeout(timeout).send().map_err(transport_error)
    }
}

impl SearchEngine for OpenSearchEngine {
    fn name(&self) -> &str {
        "opensearch"
    }

    fn reset(&self, timeout: Duration) -> Result<(), EngineError> {
        let response = self.send(self.client.delete(&self.index_url), timeout)?;
        if response.status() != StatusCode::NOT_FOUND {
            check_status(response)?;
        }

        let response = self.send(self.client.put(&self.index_url).json(&index_definition()), timeout)?;
        check_status(response)?;
        log::debug!("recreated index {}", self.index_url);
        Ok(())
    }

    fn bulk_write(
        &self,
        docs: &[CandidateDocument],
        timeout: Duration,
    ) -> Result<Vec<ItemOutcome>, EngineError> {
        if docs.is_empty() {
            return Ok(Vec::new());
        }

        let request = self
            .client
            .post(format!("{}/_bulk?refresh=wait_for", self.index_url))
            .header("Content-Type", "application/x-ndjson")
            .body(bulk_body(docs)?);
        let response = check_status(self.send(request, timeout)?)?;
        let text = response.text().map_err(transport_error)?;
        parse_bulk_response(&text)
    }

    fn query(&self, query: &EngineQuery, timeout: Duration) -> Result<EngineHits, EngineError> {
        let body = search_body(&self.search_template, query);
        let request = self.client.post(format!("{}/_search", self.index_url)).json(&body);
        let response = self.send(request, timeout)?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(EngineHits::default());
        }
        let text = check_status(response)?.text().map_err(transport_error)?;
        parse_search_response(&text)
    }

    fn get(&self, key: &str, timeout: Duration) -> Result<Option<Document>, EngineError> {
        let url = format!("{}/_doc/{}", self.index_url, urlencoding::encode(key));
        let response = self.send(self.client.get(url), timeout)?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let text = check_status(response)?.text().map_err(transport_error)?;

        #[derive(Deserialize)]
        struct GetResponse {
            found: bool,
            #[serde(rename = "_source")]
            source: Option<Document>,
        }

        let parsed: GetResponse =
            serde_json::from_str(&text).map_err(|e| EngineError::Protocol(e.to_string()))?;
        Ok(if parsed.found { parsed.source } else { None })
    }

    fn doc_count(&self, timeout: Duration) -> Result<u64, EngineError> {
        let response = self.send(self.client.get(format!("{}/_count", self.index_url)), timeout)?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(0);
        }
        let text = check_status(response)?.text().map_err(transport_error)?;

        #[derive(Deserialize)]
        struct CountResponse {
            count: u64,
        }

        serde_json::from_str::<CountResponse>(&text)
            .map(|c| c.count)
            .map_err(|e| EngineError::Protocol(e.to_string()))
    }
}

/// Settings and mapping for a fresh index
fn index_definition() -> Value {
    json!({
        "settings": {
            "analysis": {
                "analyzer": {
                    "cs_analyzer": {
                        "type": "custom",
                        "tokenizer": "standard",
                        "filter": []
                    }
                }
            }
        },
        "mappings": {
            "properties": {
                "path": { "type": "keyword" },
                "filename": { "type": "keyword" },
                "content": {
                    "type": "text",
                    "fields": {
                        "cs": { "type": "text", "analyzer": "cs_analyzer" }
                    }
                }
            }
        }
    })
}

fn search_template() -> Value {
    json!({
        "track_total_hits": true,
        // Equal scores fall back to path so pages are stable across shard copies
        "sort": ["_score", { "path": "asc" }],
        "query": {
            "query_string": {
                "query": "",
                "fields": ["content"],
                "default_operator": "AND",
                "analyze_wildcard": true
            }
        }
    })
}

fn search_body(template: &Value, query: &EngineQuery) -> Value {
    let mut body = template.clone();
    body["from"] = json!(query.from);
    body["size"] = json!(query.size);
    body["query"]["query_string"]["query"] = json!(query.query);
    if query.highlight {
        body["highlight"] = json!({
            "encoder": "html",
            "pre_tags": [PRE_TAG],
            "post_tags": [POST_TAG],
            "fields": { "content": {} }
        });
    }
    body
}

/// NDJSON action/source pairs keyed by path
fn bulk_body(docs: &[CandidateDocument]) -> Result<String, EngineError> {
    let mut body = String::new();
    for doc in docs {
        let action = json!({ "index": { "_id": doc.path } });
        let source = serde_json::to_string(doc).map_err(|e| EngineError::Protocol(e.to_string()))?;
        body.push_str(&action.to_string());
        body.push('\n');
        body.push_str(&source);
        body.push('\n');
    }
    Ok(body)
}

fn parse_bulk_response(text: &str) -> Result<Vec<ItemOutcome>, EngineError> {
    #[derive(Deserialize)]
    struct BulkResponse {
        items: Vec<Value>,
    }

    let parsed: BulkResponse =
        serde_json::from_str(text).map_err(|e| EngineError::Protocol(e.to_string()))?;

    Ok(parsed
        .items
        .iter()
        .map(|item| {
            // Each item is keyed by its action name
            let result = item.as_object().and_then(|o| o.values().next());
            let Some(result) = result else {
                return Err("malformed bulk item".to_string());
            };
            let status = result["status"].as_u64().unwrap_or(0);
            if (200..300).contains(&status) {
                Ok(())
            } else {
                Err(error_reason(&result["error"]).unwrap_or_else(|| format!("status {}", status)))
            }
        })
        .collect())
}

fn parse_search_response(text: &str) -> Result<EngineHits, EngineError> {
    #[derive(Deserialize)]
    struct SearchResponse {
        hits: HitsBlock,
    }

    #[derive(Deserialize)]
    struct HitsBlock {
        total: Total,
        hits: Vec<RawHit>,
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Total {
        Counted { value: u64, relation: String },
        Plain(u64),
    }

    #[derive(Deserialize)]
    struct RawHit {
        #[serde(rename = "_source")]
        source: Document,
        #[serde(default)]
        highlight: Option<Highlight>,
    }

    #[derive(Deserialize)]
    struct Highlight {
        #[serde(default)]
        content: Vec<String>,
    }

    let parsed: SearchResponse =
        serde_json::from_str(text).map_err(|e| EngineError::Protocol(e.to_string()))?;

    let total = match parsed.hits.total {
        Total::Counted { value, relation } if relation == "eq" => value,
        Total::Counted { relation, .. } => {
            return Err(EngineError::Protocol(format!(
                "total hit count is not exact (relation '{}')",
                relation
            )));
        }
        Total::Plain(value) => value,
    };

    let hits = parsed
        .hits
        .hits
        .into_iter()
        .map(|hit| EngineHit {
            path: hit.source.path,
            filename: hit.source.filename,
            content: hit.source.content,
            fragments: hit.highlight.map(|h| h.content).unwrap_or_default(),
        })
        .collect();

    Ok(EngineHits { total, hits })
}

/// Turn an error status into an [`EngineError`], quoting the engine's reason
fn check_status(response: Response) -> Result<Response, EngineError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().unwrap_or_default();
    let reason = serde_json::from_str::<Value>(&body)
        .ok()
        .and_then(|v| error_reason(&v["error"]))
        .unwrap_or_else(|| truncate(&body));
    let message = format!("{}: {}", status, reason);

    Err(match status {
        StatusCode::TOO_MANY_REQUESTS
        | StatusCode::BAD_GATEWAY
        | StatusCode::SERVICE_UNAVAILABLE => EngineError::Unavailable(message),
        StatusCode::GATEWAY_TIMEOUT | StatusCode::REQUEST_TIMEOUT => EngineError::Timeout(message),
        s if s.is_client_error() => EngineError::Rejected(reason),
        _ => EngineError::Protocol(message),
    })
}

/// Most specific reason in an OpenSearch error object
fn error_reason(error: &Value) -> Option<String> {
    let root = error["root_cause"]
        .as_array()
        .and_then(|causes| causes.first())
        .and_then(|c| c["reason"].as_str());
    root.or_else(|| error["reason"].as_str())
        .or_else(|| error.as_str())
        .map(truncate)
}

fn truncate(s: &str) -> String {
    s.chars().take(MAX_REASON_LEN).collect()
}

fn transport_error(e: reqwest::Error) -> EngineError {
    if e.is_timeout() {
        EngineError::Timeout(e.to_string())
    } else {
        EngineError::Unavailable(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(q: &str, highlight: bool) -> EngineQuery {
        EngineQuery {
            query: q.to_string(),
            from: 20,
            size: 10,
            highlight,
        }
    }

    #[test]
    fn test_search_body_passes_query_through() {
        let body = search_body(&search_template(), &query("status:active AND (a OR b*)", true));
        assert_eq!(body["query"]["query_string"]["query"], "status:active AND (a OR b*)");
        assert_eq!(body["query"]["query_string"]["default_operator"], "AND");
        assert_eq!(body["track_total_hits"], true);
        assert_eq!(body["from"], 20);
        assert_eq!(body["size"], 10);
        assert_eq!(body["highlight"]["encoder"], "html");
        assert_eq!(body["highlight"]["pre_tags"][0], "<em>");
    }

    #[test]
    fn test_search_body_breaks_score_ties_by_path() {
        let body = search_body(&search_template(), &query("select", false));
        assert_eq!(body["sort"], json!(["_score", { "path": "asc" }]));
    }

    #[test]
    fn test_search_body_without_highlight() {
        let body = search_body(&search_template(), &query("select", false));
        assert!(body.get("highlight").is_none());
    }

    #[test]
    fn test_bulk_body_is_ndjson() {
        let docs = vec![CandidateDocument {
            path: "/srv/sql/a.sql".to_string(),
            filename: "a.sql".to_string(),
            content: "SELECT 1;\nSELECT 2;".to_string(),
        }];
        let body = bulk_body(&docs).unwrap();
        let lines: Vec<&str> = body.lines().collect();
        assert_eq!(lines.len(), 2);
        let action: Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(action["index"]["_id"], "/srv/sql/a.sql");
        let source: Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(source["content"], "SELECT 1;\nSELECT 2;");
        assert!(body.ends_with('\n'));
    }

    #[test]
    fn test_parse_bulk_response_per_item() {
        let text = r#"{"took": 3, "errors": true, "items": [
            {"index": {"_id": "/a.sql", "status": 201}},
            {"index": {"_id": "/b.sql", "status": 400,
                "error": {"type": "mapper_parsing_exception", "reason": "failed to parse field [content]"}}}
        ]}"#;
        let outcomes = parse_bulk_response(text).unwrap();
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes[0].is_ok());
        assert_eq!(outcomes[1].as_ref().unwrap_err(), "failed to parse field [content]");
    }

    #[test]
    fn test_parse_search_response() {
        let text = r#"{"hits": {"total": {"value": 42, "relation": "eq"}, "hits": [
            {"_id": "/a.sql", "_source": {"path": "/a.sql", "filename": "a.sql", "content": "select 1"},
             "highlight": {"content": ["<em>select</em> 1"]}}
        ]}}"#;
        let hits = parse_search_response(text).unwrap();
        assert_eq!(hits.total, 42);
        assert_eq!(hits.hits[0].filename, "a.sql");
        assert_eq!(hits.hits[0].fragments, vec!["<em>select</em> 1"]);
    }

    #[test]
    fn test_inexact_total_is_protocol_error() {
        let text = r#"{"hits": {"total": {"value": 10000, "relation": "gte"}, "hits": []}}"#;
        assert!(matches!(parse_search_response(text), Err(EngineError::Protocol(_))));
    }

    #[test]
    fn test_error_reason_prefers_root_cause() {
        let error = json!({
            "root_cause": [{"type": "query_shard_exception", "reason": "Failed to parse query [(a]"}],
            "type": "search_phase_execution_exception",
            "reason": "all shards failed"
        });
        assert_eq!(error_reason(&error).unwrap(), "Failed to parse query [(a]");
        assert_eq!(error_reason(&json!({"reason": "boom"})).unwrap(), "boom");
        assert!(error_reason(&Value::Null).is_none());
    }

    #[test]
    fn test_new_rejects_empty_url() {
        assert!(OpenSearchEngine::new("  ", "sql_files").is_err());
        let engine = OpenSearchEngine::new("http://localhost:9200/", "sql_files").unwrap();
        assert_eq!(engine.index_url, "http://localhost:9200/sql_files");
    }
}
