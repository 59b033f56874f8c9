use crate::error::SearchError;
use rusqlite::{Connection, ErrorCode};
use std::time::{Duration, Instant};

/// VM instructions between deadline checks.
const PROGRESS_OPS: i32 = 1_000;

/// Interrupts statements on `conn` once `limit` has elapsed. Scoped to the guard's lifetime,
/// so each query carries its own bound.
pub(crate) struct StatementDeadline<'c> {
    conn: &'c Connection,
    limit: Duration,
}

impl<'c> StatementDeadline<'c> {
    pub(crate) fn arm(conn: &'c Connection, limit: Duration) -> Self {
        let deadline = Instant::now() + limit;
        conn.progress_handler(PROGRESS_OPS, Some(move || Instant::now() >= deadline));
        StatementDeadline { conn, limit }
    }

    /// Maps an interrupt caused by this deadline to [`SearchError::Timeout`].
    pub(crate) fn classify(&self, err: rusqlite::Error) -> SearchError {
        match &err {
            rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::OperationInterrupted => {
                SearchError::Timeout { limit_ms: self.limit.as_millis() as u64 }
            }
            _ => SearchError::Store(err),
        }
    }
}

impl Drop for StatementDeadline<'_> {
    fn drop(&mut self) {
        self.conn.progress_handler(0, None::<fn() -> bool>);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RUNAWAY: &str = "WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c) SELECT COUNT(*) FROM c";

    #[test]
    fn runaway_statement_times_out() {
        let conn = Connection::open_in_memory().unwrap();
        let guard = StatementDeadline::arm(&conn, Duration::from_millis(50));
        let err = conn.query_row(RUNAWAY, [], |r| r.get::<_, i64>(0)).unwrap_err();
        assert!(matches!(guard.classify(err), SearchError::Timeout { limit_ms: 50 }));
    }

    #[test]
    fn guard_is_released_on_drop() {
        let conn = Connection::open_in_memory().unwrap();
        {
            let _guard = StatementDeadline::arm(&conn, Duration::ZERO);
        }
        let n: i64 = conn
            .query_row("WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c WHERE x < 50000) SELECT COUNT(*) FROM c", [], |r| r.get(0))
            .unwrap();
        assert_eq!(n, 50_000);
    }

    #[test]
    fn other_errors_stay_store_errors() {
        let conn = Connection::open_in_memory().unwrap();
        let guard = StatementDeadline::arm(&conn, Duration::from_secs(5));
        let err = conn.execute("SELECT * FROM missing_table", []).unwrap_err();
        assert!(matches!(guard.classify(err), SearchError::Store(_)));
    }
}
