use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub type TargetId = i64;
pub type AssetId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetKind {
    Website,
    Endpoint,
}

impl AssetKind {
    pub const ALL: [AssetKind; 2] = [AssetKind::Website, AssetKind::Endpoint];

    pub fn table(self) -> &'static str {
        match self {
            AssetKind::Website => "website",
            AssetKind::Endpoint => "endpoint",
        }
    }

    pub fn projection(self) -> &'static str {
        match self {
            AssetKind::Website => "website_search_view",
            AssetKind::Endpoint => "endpoint_search_view",
        }
    }

    /// Trigram full-text index over the projection's free-text columns.
    pub fn search_fts(self) -> &'static str {
        match self {
            AssetKind::Website => "website_search_fts",
            AssetKind::Endpoint => "endpoint_search_fts",
        }
    }
}

impl fmt::Display for AssetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table())
    }
}

impl FromStr for AssetKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "website" | "websites" => Ok(AssetKind::Website),
            "endpoint" | "endpoints" => Ok(AssetKind::Endpoint),
            other => Err(format!("unknown asset kind: {other}")),
        }
    }
}

/// One discovered resource as handed over by a scan. `matched_patterns` is only stored for endpoints.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AssetInput {
    pub url: String,
    pub host: Option<String>,
    pub title: Option<String>,
    pub status_code: Option<i64>,
    pub content_length: Option<i64>,
    pub webserver: Option<String>,
    pub response_headers: Option<String>,
    pub response_body: Option<String>,
    pub content_type: Option<String>,
    pub location: Option<String>,
    pub vhost: Option<bool>,
    pub tech: Vec<String>,
    pub matched_patterns: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VulnerabilityInput {
    pub url: String,
    pub name: String,
    pub severity: String,
    #[serde(default)]
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VulnerabilitySummary {
    pub name: String,
    pub severity: String,
    #[serde(default)]
    pub source: String,
}

/// A projection row joined back to its asset row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchRecord {
    pub id: AssetId,
    pub target_id: TargetId,
    pub url: String,
    pub host: String,
    pub title: String,
    pub status_code: Option<i64>,
    pub content_length: Option<i64>,
    pub webserver: String,
    pub response_headers: String,
    pub response_body: String,
    pub content_type: String,
    pub location: String,
    pub vhost: Option<bool>,
    pub tech: Vec<String>,
    pub matched_patterns: Vec<String>,
    pub created_at_ms: i64,
    pub vulnerabilities: Vec<VulnerabilitySummary>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshStatus {
    pub needs_refresh: bool,
    pub last_refresh_at_ms: Option<i64>,
    pub last_refresh_duration_ms: Option<i64>,
    pub last_error: Option<String>,
    pub updated_at_ms: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GovernorState {
    Clean,
    DirtyPending,
    DirtyDue,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshOutcome {
    pub success: bool,
    pub duration_ms: i64,
    pub error: Option<String>,
}
