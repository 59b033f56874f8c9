//! Caller-facing search: one query string in, one page of formatted hits out.

use crate::compiler::compile;
use crate::error::{SearchError, SearchResult};
use crate::parser::parse;
use crate::{AssetKind, Db, SearchRecord, VulnerabilitySummary};
use serde::Serialize;
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchHit {
    pub id: i64,
    pub url: String,
    pub host: String,
    pub title: String,
    pub technologies: Vec<String>,
    pub status_code: Option<i64>,
    pub response_headers: Map<String, Value>,
    pub response_body: String,
    pub vulnerabilities: Vec<VulnerabilitySummary>,
}

impl From<SearchRecord> for SearchHit {
    fn from(r: SearchRecord) -> Self {
        SearchHit {
            id: r.id,
            response_headers: parse_headers(&r.response_headers),
            url: r.url,
            host: r.host,
            title: r.title,
            technologies: r.tech,
            status_code: r.status_code,
            response_body: r.response_body,
            vulnerabilities: r.vulnerabilities,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchPage {
    pub results: Vec<SearchHit>,
    pub total: i64,
    pub page: usize,
    pub page_size: usize,
    pub total_pages: usize,
}

/// Headers stored as a JSON object are returned as-is; anything else is read as `Name: value` lines.
pub fn parse_headers(raw: &str) -> Map<String, Value> {
    if raw.trim().is_empty() {
        return Map::new();
    }
    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(raw) {
        return map;
    }
    let mut out = Map::new();
    for line in raw.lines() {
        if let Some((k, v)) = line.split_once(':') {
            let k = k.trim();
            if !k.is_empty() {
                out.insert(k.to_string(), Value::String(v.trim().to_string()));
            }
        }
    }
    out
}

impl Db {
    /// `page` is clamped to at least 1 and `page_size` to `[1, max_page_size]`.
    /// A blank query is a client error; anything else is searched best-effort.
    pub fn search_page(&self, query: &str, kind: AssetKind, page: usize, page_size: Option<usize>) -> SearchResult<SearchPage> {
        if query.trim().is_empty() {
            return Err(SearchError::EmptyQuery);
        }
        let settings = self.settings();
        let page = page.max(1);
        let page_size = page_size
            .unwrap_or(settings.default_page_size)
            .clamp(1, settings.max_page_size.max(1));

        let tree = parse(query);
        let predicate = compile(&tree, kind);
        let total = self.count_matching(&predicate)?;
        let total_pages = if total > 0 { (total as usize).div_ceil(page_size) } else { 1 };
        let offset = (page - 1).saturating_mul(page_size);
        let results = self
            .fetch_window(&predicate, Some(page_size), offset)?
            .into_iter()
            .map(SearchHit::from)
            .collect();
        tracing::info!(%kind, query, groups = tree.groups.len(), total, page, "asset search");
        Ok(SearchPage { results, total, page, page_size, total_pages })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_headers_parse_to_object() {
        let m = parse_headers(r#"{"Server":"nginx","X-Count":3}"#);
        assert_eq!(m.get("Server"), Some(&Value::String("nginx".into())));
        assert_eq!(m.get("X-Count"), Some(&Value::from(3)));
    }

    #[test]
    fn raw_headers_parse_by_line() {
        let m = parse_headers("HTTP/1.1 200 OK\r\nServer: nginx\r\nLocation: http://a.com:8080/x\r\n");
        assert_eq!(m.len(), 2);
        assert_eq!(m.get("Server"), Some(&Value::String("nginx".into())));
        assert_eq!(m.get("Location"), Some(&Value::String("http://a.com:8080/x".into())));
    }

    #[test]
    fn json_that_is_not_an_object_falls_back_to_lines() {
        assert!(parse_headers("[1,2]").is_empty());
        assert!(parse_headers("   ").is_empty());
    }
}
