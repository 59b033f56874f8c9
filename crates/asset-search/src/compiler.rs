//! Turns a [`ConditionTree`] into a parameterised SQL predicate over `<kind>_search_view p`
//! joined to `<kind> a`. Values only ever travel as bound parameters.
//!
//! Fuzzy `=` is a substring test under `casefold` (Unicode lowercase, registered on every
//! connection). Indexed projection columns are first narrowed through `<kind>_search_fts`.

use crate::fields::{FieldKind, Relation, SearchField};
use crate::parser::{Condition, ConditionTree, Operator};
use crate::schema::FTS_COLUMNS;
use crate::AssetKind;
use rusqlite::types::Value;

#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    pub kind: AssetKind,
    /// Boolean SQL expression with `?` placeholders.
    pub expr: String,
    pub params: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    pub sql: String,
    pub params: Vec<Value>,
}

const SELECT_COLUMNS: &str = "p.id, p.target_id, p.url, p.host, p.title, p.status_code, p.content_length, \
p.webserver, p.response_headers, p.response_body, p.content_type, p.location, p.vhost, p.created_at_ms, a.tech";

const VULN_SUMMARIES: &str = "(SELECT json_group_array(json_object('name', v.name, 'severity', v.severity, 'source', v.source)) \
FROM vulnerability v WHERE v.target_id = p.target_id AND v.url = p.url)";

pub fn compile(tree: &ConditionTree, kind: AssetKind) -> Predicate {
    let mut params = Vec::new();
    let mut groups = Vec::new();
    for group in &tree.groups {
        let clauses: Vec<String> = group
            .conditions
            .iter()
            .filter_map(|c| compile_condition(c, kind, &mut params))
            .collect();
        if !clauses.is_empty() {
            groups.push(format!("({})", clauses.join(" AND ")));
        }
    }
    let expr = if groups.is_empty() { "1=1".to_string() } else { groups.join(" OR ") };
    Predicate { kind, expr, params }
}

pub fn compile_count(tree: &ConditionTree, kind: AssetKind) -> CompiledQuery {
    compile(tree, kind).count_query()
}

impl Predicate {
    fn from_clause(&self) -> String {
        format!("{} p JOIN {} a ON a.id = p.id", self.kind.projection(), self.kind.table())
    }

    pub fn is_match_all(&self) -> bool {
        self.params.is_empty() && self.expr == "1=1"
    }

    pub fn count_query(&self) -> CompiledQuery {
        CompiledQuery {
            sql: format!("SELECT COUNT(*) FROM {} WHERE {}", self.from_clause(), self.expr),
            params: self.params.clone(),
        }
    }

    /// Newest first with the id as tie-breaker, so windows never overlap or skip.
    /// `limit` of `None` fetches everything past `offset`.
    pub fn select_query(&self, limit: Option<usize>, offset: usize) -> CompiledQuery {
        let patterns = match self.kind {
            AssetKind::Endpoint => "a.matched_gf_patterns",
            AssetKind::Website => "'[]'",
        };
        let sql = format!(
            "SELECT {SELECT_COLUMNS}, {patterns}, {VULN_SUMMARIES} FROM {} WHERE {} \
             ORDER BY p.created_at_ms DESC, p.id DESC LIMIT ? OFFSET ?",
            self.from_clause(),
            self.expr
        );
        let mut params = self.params.clone();
        params.push(Value::Integer(limit.map(clamp_i64).unwrap_or(-1)));
        params.push(Value::Integer(clamp_i64(offset)));
        CompiledQuery { sql, params }
    }
}

fn compile_condition(cond: &Condition, kind: AssetKind, params: &mut Vec<Value>) -> Option<String> {
    let Some(relation) = cond.field.relation(kind) else {
        tracing::debug!(field = %cond.field, %kind, "field not available for asset kind; ignoring condition");
        return None;
    };
    let col = qualified(relation, cond.field);
    let value = cond.value.as_str();
    let clause = match (cond.field.kind(), cond.op) {
        (FieldKind::Text, Operator::Fuzzy) => compile_contains(&col, relation, cond.field, kind, value, params),
        (FieldKind::Text, Operator::Exact) => {
            params.push(Value::Text(value.to_string()));
            format!("{col} = ?")
        }
        (FieldKind::Text, Operator::NotEqual) => {
            params.push(Value::Text(value.to_string()));
            format!("({col} IS NULL OR {col} != ?)")
        }
        (FieldKind::Integer, op) => compile_integer(&col, op, value, params),
        (FieldKind::TextArray, Operator::Fuzzy) => {
            params.push(Value::Text(value.to_lowercase()));
            format!("EXISTS (SELECT 1 FROM json_each({col}) AS je WHERE instr(casefold(je.value), ?) > 0)")
        }
        (FieldKind::TextArray, Operator::Exact) => {
            params.push(Value::Text(value.to_string()));
            format!("EXISTS (SELECT 1 FROM json_each({col}) AS je WHERE je.value = ?)")
        }
        (FieldKind::TextArray, Operator::NotEqual) => {
            params.push(Value::Text(value.to_string()));
            format!("NOT EXISTS (SELECT 1 FROM json_each({col}) AS je WHERE je.value = ?)")
        }
    };
    Some(clause)
}

/// Integer columns compare as integers when the literal parses, else as text.
fn compile_integer(col: &str, op: Operator, value: &str, params: &mut Vec<Value>) -> String {
    match (value.trim().parse::<i64>(), op) {
        (Ok(n), Operator::Fuzzy | Operator::Exact) => {
            params.push(Value::Integer(n));
            format!("{col} = ?")
        }
        (Ok(n), Operator::NotEqual) => {
            params.push(Value::Integer(n));
            format!("({col} IS NULL OR {col} != ?)")
        }
        (Err(_), Operator::Fuzzy) => {
            params.push(Value::Text(value.to_string()));
            format!("instr(CAST({col} AS TEXT), ?) > 0")
        }
        (Err(_), Operator::Exact) => {
            params.push(Value::Text(value.to_string()));
            format!("CAST({col} AS TEXT) = ?")
        }
        (Err(_), Operator::NotEqual) => {
            params.push(Value::Text(value.to_string()));
            format!("({col} IS NULL OR CAST({col} AS TEXT) != ?)")
        }
    }
}

fn qualified(relation: Relation, field: SearchField) -> String {
    format!("{}.{}", relation.alias(), field.column())
}

/// Case-folded substring test. A needle long enough to form a trigram on an indexed projection
/// column first selects candidate ids from the trigram index, then rechecks them exactly.
fn compile_contains(
    col: &str,
    relation: Relation,
    field: SearchField,
    kind: AssetKind,
    value: &str,
    params: &mut Vec<Value>,
) -> String {
    let needle = value.to_lowercase();
    let check = format!("instr(casefold({col}), ?) > 0");
    let indexed = relation == Relation::Projection && FTS_COLUMNS.contains(&field.column());
    if !indexed || needle.chars().count() < 3 {
        params.push(Value::Text(needle));
        return check;
    }
    let fts = kind.search_fts();
    params.push(Value::Text(fts_phrase(field.column(), &needle)));
    params.push(Value::Text(needle));
    format!("(p.id IN (SELECT rowid FROM {fts} WHERE {fts} MATCH ?) AND {check})")
}

/// `column : "needle"` as an FTS5 phrase, so no character of the needle is read as query syntax.
fn fts_phrase(column: &str, needle: &str) -> String {
    format!("{column} : \"{}\"", needle.replace('"', "\"\""))
}

/// SQLite binds `i64`; larger windows saturate instead of wrapping negative.
fn clamp_i64(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}
