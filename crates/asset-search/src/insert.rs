use crate::{AssetInput, AssetKind, Db, TargetId, VulnerabilityInput};
use anyhow::Result;
use rusqlite::{params, Transaction, TransactionBehavior};
use std::collections::HashMap;

const WEBSITE_UPSERT: &str = "INSERT INTO website(target_id,url,host,title,status_code,content_length,webserver,response_headers,response_body,content_type,location,vhost,tech,created_at_ms)
     VALUES (?,?,?,?,?,?,?,?,?,?,?,?,?,?)
     ON CONFLICT(target_id,url) DO UPDATE SET host=excluded.host, title=excluded.title, status_code=excluded.status_code, content_length=excluded.content_length, webserver=excluded.webserver, response_headers=excluded.response_headers, response_body=excluded.response_body, content_type=excluded.content_type, location=excluded.location, vhost=excluded.vhost, tech=excluded.tech";

const ENDPOINT_UPSERT: &str = "INSERT INTO endpoint(target_id,url,host,title,status_code,content_length,webserver,response_headers,response_body,content_type,location,vhost,tech,created_at_ms,matched_gf_patterns)
     VALUES (?,?,?,?,?,?,?,?,?,?,?,?,?,?,?)
     ON CONFLICT(target_id,url) DO UPDATE SET host=excluded.host, title=excluded.title, status_code=excluded.status_code, content_length=excluded.content_length, webserver=excluded.webserver, response_headers=excluded.response_headers, response_body=excluded.response_body, content_type=excluded.content_type, location=excluded.location, vhost=excluded.vhost, tech=excluded.tech, matched_gf_patterns=excluded.matched_gf_patterns";

impl Db {
    pub fn ensure_target(&self, name: &str) -> Result<TargetId> {
        self.conn.execute(
            "INSERT INTO target(name, created_at_ms) VALUES (?,?) ON CONFLICT(name) DO NOTHING",
            params![name, self.now_ms()],
        )?;
        let id: TargetId = self.conn.query_row("SELECT id FROM target WHERE name=?", [name], |r| r.get(0))?;
        Ok(id)
    }

    pub fn bulk_upsert_websites(&self, target_id: TargetId, items: &[AssetInput]) -> Result<usize> {
        self.bulk_upsert(AssetKind::Website, target_id, items)
    }

    pub fn bulk_upsert_endpoints(&self, target_id: TargetId, items: &[AssetInput]) -> Result<usize> {
        self.bulk_upsert(AssetKind::Endpoint, target_id, items)
    }

    /// Inserts or overwrites assets keyed by `(target, url)`, keeping `created_at_ms` of existing
    /// rows. Duplicate urls within `items` collapse to the last one.
    pub fn bulk_upsert(&self, kind: AssetKind, target_id: TargetId, items: &[AssetInput]) -> Result<usize> {
        let mut last: HashMap<&str, usize> = HashMap::new();
        for (i, item) in items.iter().enumerate() {
            if item.url.trim().is_empty() {
                tracing::warn!(%kind, index = i, "skipping asset without url");
                continue;
            }
            last.insert(item.url.as_str(), i);
        }
        let mut order: Vec<usize> = last.into_values().collect();
        order.sort_unstable();
        if order.is_empty() {
            return Ok(0);
        }

        let tx = Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate)?;
        {
            let mut stmt = tx.prepare_cached(match kind {
                AssetKind::Website => WEBSITE_UPSERT,
                AssetKind::Endpoint => ENDPOINT_UPSERT,
            })?;
            let now = self.now_ms();
            for &i in &order {
                let a = &items[i];
                let tech = serde_json::to_string(&a.tech)?;
                let vhost = a.vhost.map(|v| if v { 1i64 } else { 0i64 });
                match kind {
                    AssetKind::Website => stmt.execute(params![
                        target_id, a.url, a.host.as_deref().unwrap_or(""), a.title.as_deref().unwrap_or(""), a.status_code, a.content_length,
                        a.webserver.as_deref().unwrap_or(""), a.response_headers.as_deref().unwrap_or(""), a.response_body.as_deref().unwrap_or(""),
                        a.content_type.as_deref().unwrap_or(""), a.location.as_deref().unwrap_or(""), vhost, tech, now,
                    ])?,
                    AssetKind::Endpoint => stmt.execute(params![
                        target_id, a.url, a.host.as_deref().unwrap_or(""), a.title.as_deref().unwrap_or(""), a.status_code, a.content_length,
                        a.webserver.as_deref().unwrap_or(""), a.response_headers.as_deref().unwrap_or(""), a.response_body.as_deref().unwrap_or(""),
                        a.content_type.as_deref().unwrap_or(""), a.location.as_deref().unwrap_or(""), vhost, tech, now,
                        serde_json::to_string(&a.matched_patterns)?,
                    ])?,
                };
            }
        }
        tx.commit()?;
        tracing::debug!(%kind, target_id, count = order.len(), "assets upserted");
        self.notify_write();
        Ok(order.len())
    }

    pub fn add_vulnerability(&self, target_id: TargetId, v: &VulnerabilityInput) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO vulnerability(target_id,url,name,severity,source,created_at_ms) VALUES (?,?,?,?,?,?)",
            params![target_id, v.url, v.name, normalize_severity(&v.severity), v.source, self.now_ms()],
        )?;
        let id = self.conn.last_insert_rowid();
        self.notify_write();
        Ok(id)
    }

    /// Removes a target and, by cascade, its assets and vulnerabilities.
    pub fn delete_target(&self, target_id: TargetId) -> Result<bool> {
        let n = self.conn.execute("DELETE FROM target WHERE id=?", [target_id])?;
        if n > 0 {
            self.notify_write();
        }
        Ok(n > 0)
    }

    fn notify_write(&self) {
        if let Err(e) = self.mark_dirty() {
            tracing::warn!(error = %e, "failed to mark search projection dirty");
        }
    }
}

const SEVERITIES: [&str; 6] = ["unknown", "info", "low", "medium", "high", "critical"];

fn normalize_severity(raw: &str) -> &'static str {
    let lower = raw.trim().to_ascii_lowercase();
    SEVERITIES.iter().copied().find(|s| *s == lower).unwrap_or("unknown")
}
