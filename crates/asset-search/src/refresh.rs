//! Refresh governor: a single persisted status row (`id = 1`) plus the projection resync.
//!
//! Writers call [`Db::mark_dirty`]; a scheduler asks [`Db::should_refresh`] and then calls
//! [`Db::refresh`]. Marking is a single-row update and commutes, so writers need no locking.
//! A refresh that fails keeps the dirty flag and records the error on the row.

use crate::schema::PROJECTED_COLUMNS;
use crate::settings::{ProjectionStrategy, RefreshMode};
use crate::{AssetKind, Db, GovernorState, RefreshOutcome, RefreshStatus};
use anyhow::Result;
use rusqlite::{params, Connection, OptionalExtension, Transaction, TransactionBehavior};
use std::time::Instant;

impl Db {
    fn ensure_status_row(&self) -> rusqlite::Result<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO asset_search_refresh_status(id, needs_refresh, updated_at_ms) VALUES (1, 0, ?)",
            params![self.now_ms()],
        )?;
        Ok(())
    }

    /// Records that the asset tables changed. Under the incremental strategy the projection is
    /// already current, so only the timestamp moves.
    pub fn mark_dirty(&self) -> Result<()> {
        self.ensure_status_row()?;
        let sql = match self.settings().strategy {
            ProjectionStrategy::Snapshot => "UPDATE asset_search_refresh_status SET needs_refresh = 1, updated_at_ms = ? WHERE id = 1",
            ProjectionStrategy::Incremental => "UPDATE asset_search_refresh_status SET updated_at_ms = ? WHERE id = 1",
        };
        self.conn.execute(sql, params![self.now_ms()])?;
        tracing::debug!("search projection marked dirty");
        Ok(())
    }

    pub fn refresh_status(&self) -> Result<RefreshStatus> {
        self.ensure_status_row()?;
        let status = self.conn.query_row(
            "SELECT needs_refresh, last_refresh_at_ms, last_refresh_duration_ms, last_error, updated_at_ms
             FROM asset_search_refresh_status WHERE id = 1",
            [],
            |r| {
                Ok(RefreshStatus {
                    needs_refresh: r.get::<_, i64>(0)? != 0,
                    last_refresh_at_ms: r.get(1)?,
                    last_refresh_duration_ms: r.get(2)?,
                    last_error: r.get(3)?,
                    updated_at_ms: r.get(4)?,
                })
            },
        )?;
        Ok(status)
    }

    pub fn governor_state(&self) -> Result<GovernorState> {
        let status = self.refresh_status()?;
        Ok(state_at(&status, self.now_ms(), self.settings().debounce().as_millis() as i64))
    }

    /// True once the projection is dirty and the debounce window since the last completed
    /// refresh has passed. The first refresh is never debounced. Store errors answer `false`.
    pub fn should_refresh(&self) -> bool {
        match self.governor_state() {
            Ok(state) => state == GovernorState::DirtyDue,
            Err(e) => {
                tracing::error!(error = %e, "cannot read search refresh status");
                false
            }
        }
    }

    /// Resynchronises every projection using the configured refresh mode.
    pub fn refresh(&self) -> RefreshOutcome {
        self.refresh_with_mode(self.settings().refresh_mode)
    }

    pub fn refresh_with_mode(&self, mode: RefreshMode) -> RefreshOutcome {
        let started = Instant::now();
        match self.resync(mode, started) {
            Ok(duration_ms) => {
                tracing::info!(?mode, duration_ms, "search projection refreshed");
                RefreshOutcome { success: true, duration_ms, error: None }
            }
            Err(e) => {
                let duration_ms = started.elapsed().as_millis() as i64;
                let error = e.to_string();
                tracing::error!(?mode, duration_ms, %error, "search projection refresh failed");
                if let Err(bk) = self.record_refresh_failure(duration_ms, &error) {
                    tracing::error!(error = %bk, "cannot record refresh failure");
                }
                RefreshOutcome { success: false, duration_ms, error: Some(error) }
            }
        }
    }

    /// The scheduler's tick: refresh only when due.
    pub fn refresh_if_due(&self) -> Option<RefreshOutcome> {
        self.should_refresh().then(|| self.refresh())
    }

    fn resync(&self, mode: RefreshMode, started: Instant) -> rusqlite::Result<i64> {
        let tx = Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate)?;
        for kind in AssetKind::ALL {
            let (removed, written) = resync_projection(&tx, kind, mode)?;
            tracing::debug!(%kind, removed, written, "projection resynchronised");
        }
        let duration_ms = started.elapsed().as_millis() as i64;
        let now = self.now_ms();
        tx.execute(
            "UPDATE asset_search_refresh_status
             SET needs_refresh = 0, last_refresh_at_ms = ?, last_refresh_duration_ms = ?, last_error = NULL, updated_at_ms = ?
             WHERE id = 1",
            params![now, duration_ms, now],
        )?;
        tx.commit()?;
        Ok(duration_ms)
    }

    fn record_refresh_failure(&self, duration_ms: i64, error: &str) -> rusqlite::Result<()> {
        self.ensure_status_row()?;
        self.conn.execute(
            "UPDATE asset_search_refresh_status SET last_refresh_duration_ms = ?, last_error = ?, updated_at_ms = ? WHERE id = 1",
            params![duration_ms, error, self.now_ms()],
        )?;
        Ok(())
    }

    /// Id of the newest projected row, for callers polling freshness.
    pub fn newest_projected_id(&self, kind: AssetKind) -> Result<Option<i64>> {
        let sql = format!("SELECT MAX(id) FROM {}", kind.projection());
        Ok(self.conn.query_row(&sql, [], |r| r.get::<_, Option<i64>>(0)).optional()?.flatten())
    }
}

fn state_at(status: &RefreshStatus, now_ms: i64, debounce_ms: i64) -> GovernorState {
    if !status.needs_refresh {
        return GovernorState::Clean;
    }
    match status.last_refresh_at_ms {
        None => GovernorState::DirtyDue,
        Some(last) if now_ms - last > debounce_ms => GovernorState::DirtyDue,
        Some(_) => GovernorState::DirtyPending,
    }
}

/// Returns `(rows removed, rows written)`.
fn resync_projection(conn: &Connection, kind: AssetKind, mode: RefreshMode) -> rusqlite::Result<(usize, usize)> {
    let table = kind.table();
    let view = kind.projection();
    let cols = PROJECTED_COLUMNS.join(", ");
    match mode {
        RefreshMode::Exclusive => {
            let removed = conn.execute(&format!("DELETE FROM {view}"), [])?;
            let written = conn.execute(&format!("INSERT INTO {view}({cols}) SELECT {cols} FROM {table}"), [])?;
            Ok((removed, written))
        }
        RefreshMode::Concurrent => {
            let src_cols = PROJECTED_COLUMNS.iter().map(|c| format!("s.{c}")).collect::<Vec<_>>().join(", ");
            let changed = PROJECTED_COLUMNS
                .iter()
                .filter(|c| **c != "id")
                .map(|c| format!("v.{c} IS NOT s.{c}"))
                .collect::<Vec<_>>()
                .join(" OR ");
            let removed = conn.execute(&format!("DELETE FROM {view} WHERE id NOT IN (SELECT id FROM {table})"), [])?;
            let written = conn.execute(
                &format!(
                    "INSERT OR REPLACE INTO {view}({cols}) SELECT {src_cols} FROM {table} s \
                     LEFT JOIN {view} v ON v.id = s.id WHERE v.id IS NULL OR {changed}"
                ),
                [],
            )?;
            Ok((removed, written))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(needs: bool, last: Option<i64>) -> RefreshStatus {
        RefreshStatus { needs_refresh: needs, last_refresh_at_ms: last, last_refresh_duration_ms: None, last_error: None, updated_at_ms: 0 }
    }

    #[test]
    fn clean_stays_clean() {
        assert_eq!(state_at(&status(false, None), 10, 5), GovernorState::Clean);
        assert_eq!(state_at(&status(false, Some(0)), 10_000, 5), GovernorState::Clean);
    }

    #[test]
    fn first_refresh_is_not_debounced() {
        assert_eq!(state_at(&status(true, None), 0, 600_000), GovernorState::DirtyDue);
    }

    #[test]
    fn debounce_window_is_exclusive() {
        let s = status(true, Some(1_000));
        assert_eq!(state_at(&s, 1_000 + 600_000, 600_000), GovernorState::DirtyPending);
        assert_eq!(state_at(&s, 1_000 + 600_001, 600_000), GovernorState::DirtyDue);
    }
}
