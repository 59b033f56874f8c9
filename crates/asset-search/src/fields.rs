//! The searchable field allow-list and where each field physically lives.

use crate::AssetKind;
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchField {
    Host,
    Url,
    Title,
    Tech,
    Status,
    Body,
    Header,
    Webserver,
    Location,
    Pattern,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Integer,
    TextArray,
}

/// Relation that owns a column in the compiled query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relation {
    Projection,
    Asset,
}

impl Relation {
    pub fn alias(self) -> &'static str {
        match self {
            Relation::Projection => "p",
            Relation::Asset => "a",
        }
    }
}

impl SearchField {
    pub const DEFAULT: SearchField = SearchField::Host;

    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name.to_ascii_lowercase().as_str() {
            "host" => SearchField::Host,
            "url" => SearchField::Url,
            "title" => SearchField::Title,
            "tech" => SearchField::Tech,
            "status" => SearchField::Status,
            "body" => SearchField::Body,
            "header" => SearchField::Header,
            "webserver" => SearchField::Webserver,
            "location" => SearchField::Location,
            "pattern" => SearchField::Pattern,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            SearchField::Host => "host",
            SearchField::Url => "url",
            SearchField::Title => "title",
            SearchField::Tech => "tech",
            SearchField::Status => "status",
            SearchField::Body => "body",
            SearchField::Header => "header",
            SearchField::Webserver => "webserver",
            SearchField::Location => "location",
            SearchField::Pattern => "pattern",
        }
    }

    pub fn kind(self) -> FieldKind {
        match self {
            SearchField::Status => FieldKind::Integer,
            SearchField::Tech | SearchField::Pattern => FieldKind::TextArray,
            _ => FieldKind::Text,
        }
    }

    pub fn column(self) -> &'static str {
        match self {
            SearchField::Host => "host",
            SearchField::Url => "url",
            SearchField::Title => "title",
            SearchField::Tech => "tech",
            SearchField::Status => "status_code",
            SearchField::Body => "response_body",
            SearchField::Header => "response_headers",
            SearchField::Webserver => "webserver",
            SearchField::Location => "location",
            SearchField::Pattern => "matched_gf_patterns",
        }
    }

    /// Relation that holds this field for `kind`, or `None` when the kind has no such field.
    /// Arrays are never projected, so they resolve against the joined asset row.
    pub fn relation(self, kind: AssetKind) -> Option<Relation> {
        match (self, kind) {
            (SearchField::Pattern, AssetKind::Website) => None,
            (f, _) if f.kind() == FieldKind::TextArray => Some(Relation::Asset),
            _ => Some(Relation::Projection),
        }
    }
}

impl fmt::Display for SearchField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
