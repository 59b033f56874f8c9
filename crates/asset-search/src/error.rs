use thiserror::Error;

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("search query is required")]
    EmptyQuery,
    #[error("query exceeded the {limit_ms} ms execution limit")]
    Timeout { limit_ms: u64 },
    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

impl SearchError {
    /// True when the caller sent a bad request rather than the store failing.
    pub fn is_client_error(&self) -> bool {
        matches!(self, SearchError::EmptyQuery)
    }
}

pub type SearchResult<T> = Result<T, SearchError>;
