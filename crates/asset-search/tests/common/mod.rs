#![allow(dead_code)]

use asset_search::{AssetInput, Db, SearchSettings};
use std::sync::Arc;
use toolbox_core::ManualClock;

pub const T0: i64 = 1_700_000_000_000;

pub fn open(settings: SearchSettings) -> (Db, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(T0));
    let db = Db::open_in_memory(settings).expect("open db").with_clock(clock.clone());
    (db, clock)
}

pub fn site(url: &str, host: &str, status: Option<i64>, tech: &[&str]) -> AssetInput {
    AssetInput {
        url: url.to_string(),
        host: Some(host.to_string()),
        title: Some(format!("{host} home")),
        status_code: status,
        tech: tech.iter().map(|t| t.to_string()).collect(),
        ..Default::default()
    }
}
