use serde::Deserialize;
use std::time::Duration;

/// How the search projections are kept in step with the asset tables.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectionStrategy {
    /// Point-in-time copy, resynchronised by the refresh governor.
    #[default]
    Snapshot,
    /// Triggers on the asset tables maintain the projection on every write.
    Incremental,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefreshMode {
    /// Diff against the current projection; needs the unique index on `id`.
    #[default]
    Concurrent,
    /// Empty the projection and reload it.
    Exclusive,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SearchSettings {
    pub strategy: ProjectionStrategy,
    pub refresh_mode: RefreshMode,
    pub debounce_secs: u64,
    pub statement_timeout_ms: u64,
    pub stream_batch_size: usize,
    pub default_page_size: usize,
    pub max_page_size: usize,
}

impl Default for SearchSettings {
    fn default() -> Self {
        SearchSettings {
            strategy: ProjectionStrategy::Snapshot,
            refresh_mode: RefreshMode::Concurrent,
            debounce_secs: 600,
            statement_timeout_ms: 30_000,
            stream_batch_size: 500,
            default_page_size: 10,
            max_page_size: 100,
        }
    }
}

impl SearchSettings {
    pub fn debounce(&self) -> Duration {
        Duration::from_secs(self.debounce_secs)
    }

    pub fn statement_timeout(&self) -> Duration {
        Duration::from_millis(self.statement_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_yaml_keeps_defaults() {
        let s: SearchSettings = serde_json::from_str(r#"{"strategy":"incremental","debounce_secs":5}"#).unwrap();
        assert_eq!(s.strategy, ProjectionStrategy::Incremental);
        assert_eq!(s.debounce(), Duration::from_secs(5));
        assert_eq!(s.refresh_mode, RefreshMode::Concurrent);
        assert_eq!(s.max_page_size, 100);
    }
}
