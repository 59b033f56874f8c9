use crate::AssetKind;

pub const MIG_0001_INIT: &str = r#"
BEGIN;

CREATE TABLE target (
  id              INTEGER PRIMARY KEY AUTOINCREMENT,
  name            TEXT NOT NULL UNIQUE,
  created_at_ms   INTEGER NOT NULL
);

CREATE TABLE website (
  id                INTEGER PRIMARY KEY AUTOINCREMENT,
  target_id         INTEGER NOT NULL REFERENCES target(id) ON DELETE CASCADE,
  url               TEXT NOT NULL,
  host              TEXT NOT NULL DEFAULT '',
  title             TEXT NOT NULL DEFAULT '',
  status_code       INTEGER,
  content_length    INTEGER,
  webserver         TEXT NOT NULL DEFAULT '',
  response_headers  TEXT NOT NULL DEFAULT '',
  response_body     TEXT NOT NULL DEFAULT '',
  content_type      TEXT NOT NULL DEFAULT '',
  location          TEXT NOT NULL DEFAULT '',
  vhost             INTEGER CHECK (vhost IN (0,1)),
  tech              TEXT NOT NULL DEFAULT '[]' CHECK (json_valid(tech)),
  created_at_ms     INTEGER NOT NULL,
  UNIQUE (target_id, url)
);

CREATE TABLE endpoint (
  id                  INTEGER PRIMARY KEY AUTOINCREMENT,
  target_id           INTEGER NOT NULL REFERENCES target(id) ON DELETE CASCADE,
  url                 TEXT NOT NULL,
  host                TEXT NOT NULL DEFAULT '',
  title               TEXT NOT NULL DEFAULT '',
  status_code         INTEGER,
  content_length      INTEGER,
  webserver           TEXT NOT NULL DEFAULT '',
  response_headers    TEXT NOT NULL DEFAULT '',
  response_body       TEXT NOT NULL DEFAULT '',
  content_type        TEXT NOT NULL DEFAULT '',
  location            TEXT NOT NULL DEFAULT '',
  vhost               INTEGER CHECK (vhost IN (0,1)),
  tech                TEXT NOT NULL DEFAULT '[]' CHECK (json_valid(tech)),
  matched_gf_patterns TEXT NOT NULL DEFAULT '[]' CHECK (json_valid(matched_gf_patterns)),
  created_at_ms       INTEGER NOT NULL,
  UNIQUE (target_id, url)
);

CREATE TABLE vulnerability (
  id              INTEGER PRIMARY KEY AUTOINCREMENT,
  target_id       INTEGER NOT NULL REFERENCES target(id) ON DELETE CASCADE,
  url             TEXT NOT NULL,
  name            TEXT NOT NULL,
  severity        TEXT NOT NULL CHECK (severity IN ('unknown','info','low','medium','high','critical')),
  source          TEXT NOT NULL DEFAULT '',
  created_at_ms   INTEGER NOT NULL
);

-- Projections carry scalar columns only; tag arrays are joined back from the asset tables.
CREATE TABLE website_search_view (
  id                INTEGER NOT NULL,
  url               TEXT NOT NULL,
  host              TEXT,
  title             TEXT,
  status_code       INTEGER,
  response_headers  TEXT,
  response_body     TEXT,
  content_type      TEXT,
  content_length    INTEGER,
  webserver         TEXT,
  location          TEXT,
  vhost             INTEGER,
  created_at_ms     INTEGER NOT NULL,
  target_id         INTEGER NOT NULL
);

CREATE TABLE endpoint_search_view (
  id                INTEGER NOT NULL,
  url               TEXT NOT NULL,
  host              TEXT,
  title             TEXT,
  status_code       INTEGER,
  response_headers  TEXT,
  response_body     TEXT,
  content_type      TEXT,
  content_length    INTEGER,
  webserver         TEXT,
  location          TEXT,
  vhost             INTEGER,
  created_at_ms     INTEGER NOT NULL,
  target_id         INTEGER NOT NULL
);

CREATE TABLE asset_search_refresh_status (
  id                        INTEGER PRIMARY KEY CHECK (id = 1),
  needs_refresh             INTEGER NOT NULL DEFAULT 0 CHECK (needs_refresh IN (0,1)),
  last_refresh_at_ms        INTEGER,
  last_refresh_duration_ms  INTEGER,
  last_error                TEXT,
  updated_at_ms             INTEGER NOT NULL
);

INSERT INTO asset_search_refresh_status(id, needs_refresh, updated_at_ms) VALUES (1, 0, 0);

CREATE INDEX idx_website_target ON website(target_id);
CREATE INDEX idx_endpoint_target ON endpoint(target_id);
CREATE INDEX idx_vuln_lookup ON vulnerability(target_id, url);

CREATE UNIQUE INDEX website_search_view_id_idx ON website_search_view(id);
CREATE INDEX website_search_view_url_idx ON website_search_view(url);
CREATE INDEX website_search_view_status_idx ON website_search_view(status_code);
CREATE INDEX website_search_view_created_idx ON website_search_view(created_at_ms DESC, id DESC);

CREATE UNIQUE INDEX endpoint_search_view_id_idx ON endpoint_search_view(id);
CREATE INDEX endpoint_search_view_url_idx ON endpoint_search_view(url);
CREATE INDEX endpoint_search_view_status_idx ON endpoint_search_view(status_code);
CREATE INDEX endpoint_search_view_created_idx ON endpoint_search_view(created_at_ms DESC, id DESC);

COMMIT;
"#
;

/// Columns shared by an asset table and its projection, in projection order.
pub const PROJECTED_COLUMNS: &[&str] = &[
    "id",
    "url",
    "host",
    "title",
    "status_code",
    "response_headers",
    "response_body",
    "content_type",
    "content_length",
    "webserver",
    "location",
    "vhost",
    "created_at_ms",
    "target_id",
];

/// Projection columns mirrored into `<kind>_search_fts`. Substring filters on these go
/// through the trigram index.
pub const FTS_COLUMNS: &[&str] = &["host", "title", "url", "response_headers", "response_body"];

/// External-content FTS5 trigram index over the projection, kept in step by triggers on the
/// projection itself. Replaced rows only reach the delete trigger with `recursive_triggers` on.
pub(crate) fn search_fts_ddl(kind: AssetKind) -> String {
    let view = kind.projection();
    let fts = kind.search_fts();
    let cols = FTS_COLUMNS.join(", ");
    let new_vals = FTS_COLUMNS.iter().map(|c| format!("NEW.{c}")).collect::<Vec<_>>().join(", ");
    let old_vals = FTS_COLUMNS.iter().map(|c| format!("OLD.{c}")).collect::<Vec<_>>().join(", ");
    format!(
        r#"
CREATE VIRTUAL TABLE IF NOT EXISTS {fts} USING fts5(
  {cols}, content='{view}', content_rowid='id', tokenize='trigram'
);
CREATE TRIGGER IF NOT EXISTS {fts}_ai AFTER INSERT ON {view} BEGIN
  INSERT INTO {fts}(rowid, {cols}) VALUES (NEW.id, {new_vals});
END;
CREATE TRIGGER IF NOT EXISTS {fts}_ad AFTER DELETE ON {view} BEGIN
  INSERT INTO {fts}({fts}, rowid, {cols}) VALUES ('delete', OLD.id, {old_vals});
END;
CREATE TRIGGER IF NOT EXISTS {fts}_au AFTER UPDATE ON {view} BEGIN
  INSERT INTO {fts}({fts}, rowid, {cols}) VALUES ('delete', OLD.id, {old_vals});
  INSERT INTO {fts}(rowid, {cols}) VALUES (NEW.id, {new_vals});
END;
INSERT INTO {fts}({fts}) VALUES ('rebuild');
"#
    )
}

pub(crate) fn trigger_names(kind: AssetKind) -> [String; 3] {
    let t = kind.table();
    [format!("{t}_search_view_ai"), format!("{t}_search_view_au"), format!("{t}_search_view_ad")]
}

/// Triggers that keep `<kind>_search_view` current on every write to the asset table.
pub(crate) fn maintenance_triggers(kind: AssetKind) -> String {
    let table = kind.table();
    let view = kind.projection();
    let cols = PROJECTED_COLUMNS.join(", ");
    let new_vals = PROJECTED_COLUMNS.iter().map(|c| format!("NEW.{c}")).collect::<Vec<_>>().join(", ");
    let [ai, au, ad] = trigger_names(kind);
    format!(
        r#"
CREATE TRIGGER IF NOT EXISTS {ai} AFTER INSERT ON {table} BEGIN
  INSERT OR REPLACE INTO {view}({cols}) VALUES ({new_vals});
END;
CREATE TRIGGER IF NOT EXISTS {au} AFTER UPDATE ON {table} BEGIN
  DELETE FROM {view} WHERE id = OLD.id AND OLD.id != NEW.id;
  INSERT OR REPLACE INTO {view}({cols}) VALUES ({new_vals});
END;
CREATE TRIGGER IF NOT EXISTS {ad} AFTER DELETE ON {table} BEGIN
  DELETE FROM {view} WHERE id = OLD.id;
END;
"#
    )
}

pub(crate) fn drop_maintenance_triggers(kind: AssetKind) -> String {
    trigger_names(kind)
        .iter()
        .map(|n| format!("DROP TRIGGER IF EXISTS {n};\n"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn triggers_cover_every_projected_column() {
        let sql = maintenance_triggers(AssetKind::Endpoint);
        for c in PROJECTED_COLUMNS {
            assert!(sql.contains(&format!("NEW.{c}")), "missing {c}");
        }
        assert!(sql.contains("endpoint_search_view_ad"));
        assert!(!sql.contains("matched_gf_patterns"));
    }

    #[test]
    fn fts_triggers_mirror_every_indexed_column() {
        let sql = search_fts_ddl(AssetKind::Website);
        assert!(sql.contains("USING fts5("));
        assert!(sql.contains("tokenize='trigram'"));
        assert!(sql.contains("content='website_search_view'"));
        for c in FTS_COLUMNS {
            assert!(sql.contains(&format!("NEW.{c}")), "missing NEW.{c}");
            assert!(sql.contains(&format!("OLD.{c}")), "missing OLD.{c}");
            assert!(PROJECTED_COLUMNS.contains(c));
        }
    }
}
