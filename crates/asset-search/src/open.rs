use crate::schema::{self, MIG_0001_INIT};
use crate::settings::{ProjectionStrategy, SearchSettings};
use crate::AssetKind;
use anyhow::Result;
use rusqlite::functions::FunctionFlags;
use rusqlite::Connection;
use std::sync::Arc;
use std::time::Duration;
use toolbox_core::{Clock, SystemClock};

pub struct Db {
    pub conn: Connection,
    settings: SearchSettings,
    clock: Arc<dyn Clock>,
}

impl Db {
    pub fn open_or_create(path: impl AsRef<std::path::Path>, settings: SearchSettings) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::bootstrap(conn, settings)
    }

    pub fn open_in_memory(settings: SearchSettings) -> Result<Self> {
        Self::bootstrap(Connection::open_in_memory()?, settings)
    }

    fn bootstrap(conn: Connection, settings: SearchSettings) -> Result<Self> {
        apply_pragmas(&conn)?;
        register_functions(&conn)?;
        migrate(&conn)?;
        let db = Db { conn, settings, clock: Arc::new(SystemClock) };
        db.provision()?;
        Ok(db)
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn settings(&self) -> &SearchSettings {
        &self.settings
    }

    pub(crate) fn now_ms(&self) -> i64 {
        self.clock.now_ms()
    }

    /// Installs or removes the projection maintenance triggers to match the configured strategy.
    /// Switching to `incremental` resynchronises the projections once so they start out current.
    pub fn provision(&self) -> Result<()> {
        match self.settings.strategy {
            ProjectionStrategy::Snapshot => {
                for kind in AssetKind::ALL {
                    self.conn.execute_batch(&schema::drop_maintenance_triggers(kind))?;
                }
            }
            ProjectionStrategy::Incremental => {
                let mut installed = false;
                for kind in AssetKind::ALL {
                    let [ai, ..] = schema::trigger_names(kind);
                    if !self.trigger_exists(&ai)? {
                        self.conn.execute_batch(&schema::maintenance_triggers(kind))?;
                        installed = true;
                    }
                }
                if installed {
                    tracing::info!("projection maintenance triggers installed; running initial resync");
                    let outcome = self.refresh();
                    if let Some(err) = outcome.error {
                        anyhow::bail!("initial projection resync failed: {err}");
                    }
                }
            }
        }
        tracing::debug!(strategy = ?self.settings.strategy, "search projections provisioned");
        Ok(())
    }
}

fn apply_pragmas(conn: &Connection) -> Result<()> {
    // first, so switching journal mode waits out a writer on a shared file
    conn.busy_timeout(Duration::from_secs(10))?;
    conn.pragma_update(None, "journal_mode", &"WAL")?;
    conn.pragma_update(None, "synchronous", &"NORMAL")?;
    conn.pragma_update(None, "foreign_keys", &"ON")?;
    // REPLACE into a projection must fire its delete trigger to keep the trigram index in step
    conn.pragma_update(None, "recursive_triggers", &"ON")?;
    conn.pragma_update(None, "mmap_size", &268435456i64)?; // 256 MiB
    conn.pragma_update(None, "cache_size", &-262144i64)?; // 1 GiB target
    Ok(())
}

/// `casefold(text)`: full Unicode lowercase, the folding fuzzy matches compare under.
fn register_functions(conn: &Connection) -> Result<()> {
    conn.create_scalar_function(
        "casefold",
        1,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let s: Option<String> = ctx.get(0)?;
            Ok(s.map(|s| s.to_lowercase()))
        },
    )?;
    Ok(())
}

pub(crate) fn master_entry_exists(conn: &Connection, kind: &str, name: &str) -> Result<bool> {
    let cnt: i64 = conn.query_row(
        "SELECT COUNT(1) FROM sqlite_master WHERE type=? AND name=?",
        [kind, name],
        |r| r.get(0),
    )?;
    Ok(cnt > 0)
}

fn migrate(conn: &Connection) -> Result<()> {
    // naive: each step keys off a table it creates
    if !master_entry_exists(conn, "table", "asset_search_refresh_status")? {
        conn.execute_batch(MIG_0001_INIT)?;
        tracing::info!("applied schema migration 0001");
    }
    if !master_entry_exists(conn, "table", AssetKind::Website.search_fts())? {
        let mut batch = String::from("BEGIN IMMEDIATE;\n");
        for kind in AssetKind::ALL {
            batch.push_str(&schema::search_fts_ddl(kind));
        }
        batch.push_str("COMMIT;\n");
        conn.execute_batch(&batch)?;
        tracing::info!("applied schema migration 0002 (trigram search index)");
    }
    Ok(())
}
