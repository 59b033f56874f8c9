use anyhow::{Context, Result};
use asset_search::SearchSettings;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Default, Deserialize, Clone)]
pub struct SchedulerConfig {
    pub interval_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize, Clone)]
pub struct Config {
    pub db: Option<PathBuf>,
    pub search: Option<SearchSettings>,
    pub scheduler: Option<SchedulerConfig>,
}

/// Reads `path`, or `./toolbox.yaml` when no path is given and that file exists.
/// An explicit path that cannot be read or parsed is an error.
pub fn load_config(path: Option<&Path>) -> Result<Option<Config>> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => {
            let p = Path::new("toolbox.yaml");
            if p.exists() { p.to_path_buf() } else { return Ok(None); }
        }
    };
    let s = fs::read_to_string(&path).with_context(|| format!("reading config {}", path.display()))?;
    let cfg = serde_yaml::from_str(&s).with_context(|| format!("parsing config {}", path.display()))?;
    Ok(Some(cfg))
}

#[cfg(test)]
mod tests {
    use super::*;
    use asset_search::{ProjectionStrategy, RefreshMode};

    #[test]
    fn partial_search_section_keeps_defaults() {
        let cfg: Config = serde_yaml::from_str(
            "db: ./assets.db\nsearch:\n  strategy: incremental\n  debounce_secs: 30\nscheduler:\n  interval_secs: 15\n",
        )
        .unwrap();
        let search = cfg.search.unwrap();
        assert_eq!(search.strategy, ProjectionStrategy::Incremental);
        assert_eq!(search.refresh_mode, RefreshMode::Concurrent);
        assert_eq!(search.debounce_secs, 30);
        assert_eq!(search.max_page_size, 100);
        assert_eq!(cfg.scheduler.unwrap().interval_secs, Some(15));
        assert_eq!(cfg.db.unwrap(), PathBuf::from("./assets.db"));
    }

    #[test]
    fn explicit_path_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.yaml");
        assert!(load_config(Some(&missing)).is_err());
    }
}
