//! Searchable inventory of discovered websites and endpoints.
//!
//! Assets live in per-kind tables. Searches run against `<kind>_search_view` projections, which
//! hold the scalar columns and are joined back to the asset rows for tag arrays. The projections
//! are kept current by triggers or by the refresh governor, depending on [`ProjectionStrategy`].

mod arrow_schemas;
pub mod compiler;
mod deadline;
mod error;
mod executor;
mod export_parquet;
pub mod fields;
mod insert;
mod models;
mod open;
pub mod parser;
mod query;
mod refresh;
mod schema;
mod settings;
mod surface;

pub use compiler::{compile, compile_count, CompiledQuery, Predicate};
pub use error::{SearchError, SearchResult};
pub use executor::SearchStream;
pub use export_parquet::export_search_to_parquet;
pub use fields::SearchField;
pub use models::*;
pub use open::Db;
pub use parser::{parse, Condition, ConditionTree, Operator, SearchGroup};
pub use settings::{ProjectionStrategy, RefreshMode, SearchSettings};
pub use surface::{parse_headers, SearchHit, SearchPage};
