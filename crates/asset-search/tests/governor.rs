mod common;

use asset_search::{parse, AssetKind, GovernorState, ProjectionStrategy, RefreshMode, SearchSettings};
use common::{open, site, T0};
use std::time::Duration;

#[test]
fn fresh_store_is_clean_until_marked() {
    let (db, _clock) = open(SearchSettings::default());
    assert_eq!(db.governor_state().unwrap(), GovernorState::Clean);
    assert!(!db.should_refresh());
    assert!(db.refresh_if_due().is_none());

    db.mark_dirty().unwrap();
    assert_eq!(db.governor_state().unwrap(), GovernorState::DirtyDue, "never refreshed, so no debounce");
}

#[test]
fn debounce_holds_back_refreshes_inside_the_window() {
    let (db, clock) = open(SearchSettings::default());
    let t = db.ensure_target("acme").unwrap();
    db.bulk_upsert_websites(t, &[site("http://a.com", "a.com", Some(200), &[])]).unwrap();

    let first = db.refresh_if_due().expect("first refresh is due");
    assert!(first.success);
    assert_eq!(db.governor_state().unwrap(), GovernorState::Clean);
    assert_eq!(db.refresh_status().unwrap().last_refresh_at_ms, Some(T0));

    for _ in 0..5 {
        clock.advance(Duration::from_secs(60));
        db.mark_dirty().unwrap();
        assert_eq!(db.governor_state().unwrap(), GovernorState::DirtyPending);
        assert!(db.refresh_if_due().is_none());
    }

    clock.set(T0 + 600_000);
    assert!(!db.should_refresh(), "exactly one debounce interval is still inside the window");
    clock.advance(Duration::from_millis(1));
    assert!(db.should_refresh());

    let second = db.refresh_if_due().expect("due after the window");
    assert!(second.success);
    assert!(db.refresh_if_due().is_none());
}

#[test]
fn custom_debounce_is_honoured() {
    let settings = SearchSettings { debounce_secs: 5, ..Default::default() };
    let (db, clock) = open(settings);
    db.mark_dirty().unwrap();
    assert!(db.refresh().success);
    db.mark_dirty().unwrap();
    clock.advance(Duration::from_secs(4));
    assert!(!db.should_refresh());
    clock.advance(Duration::from_secs(2));
    assert!(db.should_refresh());
}

#[test]
fn refresh_is_idempotent() {
    let (db, _clock) = open(SearchSettings::default());
    let t = db.ensure_target("acme").unwrap();
    let batch: Vec<_> = (0..3).map(|i| site(&format!("http://i{i}.test"), "idem", Some(200), &["nginx"])).collect();
    db.bulk_upsert_websites(t, &batch).unwrap();

    assert!(db.refresh().success);
    let once = db.search(&parse("idem"), AssetKind::Website, None).unwrap();
    assert!(db.refresh().success);
    let twice = db.search(&parse("idem"), AssetKind::Website, None).unwrap();
    assert_eq!(once, twice);
    assert_eq!(db.projection_count(AssetKind::Website).unwrap(), 3);
}

#[test]
fn concurrent_refresh_applies_only_the_difference() {
    let (db, clock) = open(SearchSettings::default());
    let t = db.ensure_target("acme").unwrap();
    let batch: Vec<_> = (0..3).map(|i| site(&format!("http://d{i}.test"), "diff", Some(200), &[])).collect();
    db.bulk_upsert_websites(t, &batch).unwrap();
    db.refresh();
    let newest = db.newest_projected_id(AssetKind::Website).unwrap();
    assert!(newest.is_some());

    clock.advance(Duration::from_secs(1));
    db.bulk_upsert_websites(t, &[site("http://d1.test", "diff", Some(503), &[])]).unwrap();
    db.refresh();

    assert_eq!(db.count(&parse(r#"status=="503""#), AssetKind::Website).unwrap(), 1);
    assert_eq!(db.count(&parse(r#"status=="200""#), AssetKind::Website).unwrap(), 2);
    assert_eq!(db.newest_projected_id(AssetKind::Website).unwrap(), newest);
}

#[test]
fn exclusive_refresh_rebuilds_the_projection() {
    let settings = SearchSettings { refresh_mode: RefreshMode::Exclusive, ..Default::default() };
    let (db, _clock) = open(settings);
    let t = db.ensure_target("acme").unwrap();
    db.bulk_upsert_websites(t, &[site("http://x.test", "x", Some(200), &[])]).unwrap();
    db.bulk_upsert_endpoints(t, &[site("http://x.test/api", "x", Some(401), &[])]).unwrap();

    let outcome = db.refresh();
    assert!(outcome.success);
    assert!(outcome.error.is_none());
    assert_eq!(db.projection_count(AssetKind::Website).unwrap(), 1);
    assert_eq!(db.projection_count(AssetKind::Endpoint).unwrap(), 1);

    assert!(db.refresh_with_mode(RefreshMode::Concurrent).success);
    assert_eq!(db.projection_count(AssetKind::Endpoint).unwrap(), 1);
}

#[test]
fn failed_refresh_keeps_the_projection_dirty() {
    let (db, clock) = open(SearchSettings::default());
    let t = db.ensure_target("acme").unwrap();
    db.bulk_upsert_websites(t, &[site("http://a.com", "a.com", Some(200), &[])]).unwrap();
    assert!(db.refresh().success);
    let before = db.refresh_status().unwrap();

    db.conn.execute_batch("DROP TABLE endpoint_search_view").unwrap();
    clock.advance(Duration::from_secs(601));
    db.bulk_upsert_websites(t, &[site("http://b.com", "b.com", Some(200), &[])]).unwrap();

    let outcome = db.refresh_if_due().expect("due");
    assert!(!outcome.success);
    assert!(outcome.error.as_deref().unwrap_or_default().contains("endpoint_search_view"));

    let after = db.refresh_status().unwrap();
    assert!(after.needs_refresh);
    assert_eq!(after.last_refresh_at_ms, before.last_refresh_at_ms);
    assert!(after.last_error.is_some());
    assert_eq!(db.governor_state().unwrap(), GovernorState::DirtyDue, "a failed refresh is retried on the next tick");
    assert_eq!(db.projection_count(AssetKind::Website).unwrap(), 1, "the website half rolled back too");
}

#[test]
fn incremental_strategy_needs_no_refresh() {
    let settings = SearchSettings { strategy: ProjectionStrategy::Incremental, ..Default::default() };
    let (db, _clock) = open(settings);
    let t = db.ensure_target("acme").unwrap();
    db.bulk_upsert_websites(t, &[site("http://live.test", "live.test", Some(200), &["nginx"])]).unwrap();

    assert_eq!(db.count(&parse(r#"tech=="nginx""#), AssetKind::Website).unwrap(), 1);
    assert_eq!(db.governor_state().unwrap(), GovernorState::Clean);
    assert!(db.refresh_if_due().is_none());

    db.bulk_upsert_websites(t, &[site("http://live.test", "live.test", Some(302), &["nginx"])]).unwrap();
    assert_eq!(db.count(&parse(r#"status=="302""#), AssetKind::Website).unwrap(), 1);

    db.delete_target(t).unwrap();
    assert_eq!(db.projection_count(AssetKind::Website).unwrap(), 0);
}
