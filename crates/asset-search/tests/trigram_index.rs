mod common;

use asset_search::{compile_count, parse, AssetKind, Db, ProjectionStrategy, RefreshMode, SearchSettings};
use common::{open, site};
use rusqlite::params_from_iter;

fn titled(url: &str, title: &str) -> asset_search::AssetInput {
    let mut s = site(url, "fts.test", Some(200), &[]);
    s.title = Some(title.to_string());
    s
}

fn assert_index_consistent(db: &Db) {
    for kind in AssetKind::ALL {
        let fts = kind.search_fts();
        db.conn
            .execute(&format!("INSERT INTO {fts}({fts}, rank) VALUES ('integrity-check', 1)"), [])
            .unwrap_or_else(|e| panic!("{fts} out of step with its projection: {e}"));
    }
}

fn title_count(db: &Db, needle: &str) -> i64 {
    db.count(&parse(&format!(r#"title="{needle}""#)), AssetKind::Website).unwrap()
}

#[test]
fn substring_filters_are_served_by_the_trigram_index() {
    let (db, _clock) = open(SearchSettings::default());
    let q = compile_count(&parse(r#"title="admin" || body="token""#), AssetKind::Endpoint);
    let mut stmt = db.conn.prepare(&format!("EXPLAIN QUERY PLAN {}", q.sql)).unwrap();
    let plan: Vec<String> = stmt
        .query_map(params_from_iter(q.params.iter()), |r| r.get::<_, String>(3))
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert!(plan.iter().any(|d| d.contains("endpoint_search_fts VIRTUAL TABLE")), "{plan:?}");
}

#[test]
fn index_follows_concurrent_refreshes() {
    let (db, _clock) = open(SearchSettings::default());
    let t = db.ensure_target("acme").unwrap();
    db.bulk_upsert_websites(t, &[titled("http://a.test", "Old Portal"), titled("http://b.test", "Status Page")]).unwrap();
    db.refresh();
    assert_eq!(title_count(&db, "old portal"), 1);

    db.bulk_upsert_websites(t, &[titled("http://a.test", "New Console")]).unwrap();
    db.refresh();
    assert_eq!(title_count(&db, "portal"), 0);
    assert_eq!(title_count(&db, "console"), 1);
    assert_eq!(title_count(&db, "status"), 1);
    assert_index_consistent(&db);

    db.delete_target(t).unwrap();
    db.refresh();
    assert_eq!(db.projection_count(AssetKind::Website).unwrap(), 0);
    assert_index_consistent(&db);
}

#[test]
fn index_follows_exclusive_rebuilds() {
    let settings = SearchSettings { refresh_mode: RefreshMode::Exclusive, ..Default::default() };
    let (db, _clock) = open(settings);
    let t = db.ensure_target("acme").unwrap();
    db.bulk_upsert_websites(t, &[titled("http://a.test", "Grafana Login")]).unwrap();
    db.refresh();
    db.bulk_upsert_websites(t, &[titled("http://a.test", "Kibana Login")]).unwrap();
    db.refresh();

    assert_eq!(title_count(&db, "grafana"), 0);
    assert_eq!(title_count(&db, "kibana"), 1);
    assert_index_consistent(&db);
}

#[test]
fn index_follows_incremental_maintenance() {
    let settings = SearchSettings { strategy: ProjectionStrategy::Incremental, ..Default::default() };
    let (db, _clock) = open(settings);
    let t = db.ensure_target("acme").unwrap();
    db.bulk_upsert_websites(t, &[titled("http://a.test", "Jenkins Dashboard")]).unwrap();
    assert_eq!(title_count(&db, "jenkins"), 1);

    db.bulk_upsert_websites(t, &[titled("http://a.test", "Gitea Dashboard")]).unwrap();
    assert_eq!(title_count(&db, "jenkins"), 0);
    assert_eq!(title_count(&db, "gitea"), 1);
    assert_index_consistent(&db);

    db.delete_target(t).unwrap();
    assert_eq!(title_count(&db, "dashboard"), 0);
    assert_index_consistent(&db);
}

#[test]
fn reopening_a_store_without_the_index_builds_it_from_the_projection() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("assets.db");
    {
        let db = Db::open_or_create(&path, SearchSettings::default()).unwrap();
        let t = db.ensure_target("acme").unwrap();
        db.bulk_upsert_websites(t, &[titled("http://a.test", "Legacy Portal")]).unwrap();
        db.refresh();
        for kind in AssetKind::ALL {
            let fts = kind.search_fts();
            db.conn
                .execute_batch(&format!(
                    "DROP TRIGGER {fts}_ai; DROP TRIGGER {fts}_au; DROP TRIGGER {fts}_ad; DROP TABLE {fts};"
                ))
                .unwrap();
        }
        assert!(!db.table_exists("website_search_fts").unwrap());
    }

    let db = Db::open_or_create(&path, SearchSettings::default()).unwrap();
    assert!(db.table_exists("website_search_fts").unwrap());
    assert_eq!(title_count(&db, "legacy"), 1);
    assert_index_consistent(&db);
}
