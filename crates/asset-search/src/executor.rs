use crate::compiler::{compile, CompiledQuery, Predicate};
use crate::deadline::StatementDeadline;
use crate::error::{SearchError, SearchResult};
use crate::parser::ConditionTree;
use crate::{AssetKind, Db, SearchRecord, VulnerabilitySummary};
use rusqlite::{params_from_iter, Row};

struct RawRow {
    id: i64,
    target_id: i64,
    url: String,
    host: Option<String>,
    title: Option<String>,
    status_code: Option<i64>,
    content_length: Option<i64>,
    webserver: Option<String>,
    response_headers: Option<String>,
    response_body: Option<String>,
    content_type: Option<String>,
    location: Option<String>,
    vhost: Option<i64>,
    created_at_ms: i64,
    tech: String,
    patterns: String,
    vulns: String,
}

fn raw_row(r: &Row) -> rusqlite::Result<RawRow> {
    Ok(RawRow {
        id: r.get(0)?,
        target_id: r.get(1)?,
        url: r.get(2)?,
        host: r.get(3)?,
        title: r.get(4)?,
        status_code: r.get(5)?,
        content_length: r.get(6)?,
        webserver: r.get(7)?,
        response_headers: r.get(8)?,
        response_body: r.get(9)?,
        content_type: r.get(10)?,
        location: r.get(11)?,
        vhost: r.get(12)?,
        created_at_ms: r.get(13)?,
        tech: r.get(14)?,
        patterns: r.get(15)?,
        vulns: r.get(16)?,
    })
}

impl RawRow {
    fn decode(self) -> SearchResult<SearchRecord> {
        let json_list = |s: &str, what: &str| -> SearchResult<Vec<String>> {
            serde_json::from_str(s).map_err(|e| SearchError::Decode(format!("{what} of asset {}: {e}", self.id)))
        };
        let tech = json_list(&self.tech, "tech")?;
        let matched_patterns = json_list(&self.patterns, "matched patterns")?;
        let vulnerabilities: Vec<VulnerabilitySummary> = serde_json::from_str(&self.vulns)
            .map_err(|e| SearchError::Decode(format!("vulnerabilities of asset {}: {e}", self.id)))?;
        Ok(SearchRecord {
            id: self.id,
            target_id: self.target_id,
            url: self.url,
            host: self.host.unwrap_or_default(),
            title: self.title.unwrap_or_default(),
            status_code: self.status_code,
            content_length: self.content_length,
            webserver: self.webserver.unwrap_or_default(),
            response_headers: self.response_headers.unwrap_or_default(),
            response_body: self.response_body.unwrap_or_default(),
            content_type: self.content_type.unwrap_or_default(),
            location: self.location.unwrap_or_default(),
            vhost: self.vhost.map(|v| v != 0),
            tech,
            matched_patterns,
            created_at_ms: self.created_at_ms,
            vulnerabilities,
        })
    }
}

impl Db {
    /// Matching records, newest first. `limit` of `None` returns every match.
    pub fn search(&self, tree: &ConditionTree, kind: AssetKind, limit: Option<usize>) -> SearchResult<Vec<SearchRecord>> {
        let predicate = compile(tree, kind);
        self.fetch_window(&predicate, limit, 0)
    }

    pub fn count(&self, tree: &ConditionTree, kind: AssetKind) -> SearchResult<i64> {
        self.count_matching(&compile(tree, kind))
    }

    /// Lazily walks the matches in windows of `batch_size`. The predicate is compiled once and
    /// every window uses it with the same ordering. Dropping the stream between windows is free.
    pub fn search_stream(&self, tree: &ConditionTree, kind: AssetKind, batch_size: usize) -> SearchStream<'_> {
        SearchStream {
            db: self,
            predicate: compile(tree, kind),
            batch_size: batch_size.max(1),
            offset: 0,
            buffer: Vec::new().into_iter(),
            exhausted: false,
            windows: 0,
        }
    }

    pub(crate) fn count_matching(&self, predicate: &Predicate) -> SearchResult<i64> {
        let q = predicate.count_query();
        let guard = StatementDeadline::arm(&self.conn, self.settings().statement_timeout());
        let res = self
            .conn
            .prepare_cached(&q.sql)
            .and_then(|mut stmt| stmt.query_row(params_from_iter(q.params.iter()), |r| r.get::<_, i64>(0)));
        res.map_err(|e| failed(&q, guard.classify(e)))
    }

    pub(crate) fn fetch_window(&self, predicate: &Predicate, limit: Option<usize>, offset: usize) -> SearchResult<Vec<SearchRecord>> {
        let q = predicate.select_query(limit, offset);
        let guard = StatementDeadline::arm(&self.conn, self.settings().statement_timeout());
        let rows = self.conn.prepare_cached(&q.sql).and_then(|mut stmt| {
            let mapped = stmt.query_map(params_from_iter(q.params.iter()), raw_row)?;
            let collected = mapped.collect::<rusqlite::Result<Vec<_>>>();
            collected
        });
        let rows = rows.map_err(|e| failed(&q, guard.classify(e)))?;
        tracing::debug!(kind = %predicate.kind, offset, rows = rows.len(), "search window fetched");
        rows.into_iter().map(RawRow::decode).collect()
    }
}

fn failed(q: &CompiledQuery, err: SearchError) -> SearchError {
    tracing::error!(sql = %q.sql, params = ?q.params, error = %err, "search query failed");
    err
}

pub struct SearchStream<'a> {
    db: &'a Db,
    predicate: Predicate,
    batch_size: usize,
    offset: usize,
    buffer: std::vec::IntoIter<SearchRecord>,
    exhausted: bool,
    windows: usize,
}

impl SearchStream<'_> {
    /// Windows queried so far, including a trailing empty one.
    pub fn windows_fetched(&self) -> usize {
        self.windows
    }

    pub fn predicate(&self) -> &Predicate {
        &self.predicate
    }
}

impl Iterator for SearchStream<'_> {
    type Item = SearchResult<SearchRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(rec) = self.buffer.next() {
                return Some(Ok(rec));
            }
            if self.exhausted {
                return None;
            }
            match self.db.fetch_window(&self.predicate, Some(self.batch_size), self.offset) {
                Ok(rows) => {
                    self.windows += 1;
                    self.offset += rows.len();
                    self.exhausted = rows.len() < self.batch_size;
                    self.buffer = rows.into_iter();
                }
                Err(e) => {
                    self.exhausted = true;
                    return Some(Err(e));
                }
            }
        }
    }
}
