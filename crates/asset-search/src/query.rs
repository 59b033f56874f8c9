use crate::open::master_entry_exists;
use crate::{AssetKind, Db};
use anyhow::Result;

impl Db {
    pub fn table_exists(&self, name: &str) -> Result<bool> {
        master_entry_exists(&self.conn, "table", name)
    }

    pub fn trigger_exists(&self, name: &str) -> Result<bool> {
        master_entry_exists(&self.conn, "trigger", name)
    }

    /// Rows currently in the asset table of `kind`.
    pub fn asset_count(&self, kind: AssetKind) -> Result<i64> {
        let sql = format!("SELECT COUNT(1) FROM {}", kind.table());
        Ok(self.conn.query_row(&sql, [], |r| r.get(0))?)
    }

    /// Rows currently in the projection of `kind`. May trail `asset_count` until the next refresh.
    pub fn projection_count(&self, kind: AssetKind) -> Result<i64> {
        let sql = format!("SELECT COUNT(1) FROM {}", kind.projection());
        Ok(self.conn.query_row(&sql, [], |r| r.get(0))?)
    }
}
