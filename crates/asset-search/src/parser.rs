//! Query language: `field="v"` (contains), `field=="v"` (equals), `field!="v"` (not equals),
//! joined by `&&` and `||`. `||` binds loosest; one level of wrapping parentheses is allowed
//! around a group or a condition. Fragments that don't parse are dropped, not rejected.

use crate::fields::SearchField;
use regex::Regex;
use serde::Serialize;
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Operator {
    /// `=`
    Fuzzy,
    /// `==`
    Exact,
    /// `!=`
    NotEqual,
}

impl Operator {
    fn from_token(tok: &str) -> Option<Self> {
        match tok {
            "=" => Some(Operator::Fuzzy),
            "==" => Some(Operator::Exact),
            "!=" => Some(Operator::NotEqual),
            _ => None,
        }
    }

    pub fn token(self) -> &'static str {
        match self {
            Operator::Fuzzy => "=",
            Operator::Exact => "==",
            Operator::NotEqual => "!=",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Condition {
    pub field: SearchField,
    pub op: Operator,
    pub value: String,
}

impl Condition {
    pub fn new(field: SearchField, op: Operator, value: impl Into<String>) -> Self {
        Condition { field, op, value: value.into() }
    }
}

/// Conditions AND-ed together.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SearchGroup {
    pub conditions: Vec<Condition>,
}

/// Groups OR-ed together. No groups means match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConditionTree {
    pub groups: Vec<SearchGroup>,
}

impl ConditionTree {
    pub fn match_all() -> Self {
        ConditionTree::default()
    }

    pub fn is_match_all(&self) -> bool {
        self.groups.iter().all(|g| g.conditions.is_empty())
    }

    pub fn condition_count(&self) -> usize {
        self.groups.iter().map(|g| g.conditions.len()).sum()
    }
}

fn condition_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"^([A-Za-z0-9_]+)\s*(==|!=|=)\s*"([^"]*)"$"#).expect("condition pattern compiles")
    })
}

fn any_condition_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"[A-Za-z0-9_]+\s*(?:==|!=|=)\s*"[^"]*""#).expect("condition pattern compiles"))
}

pub fn parse(query: &str) -> ConditionTree {
    let query = query.trim();
    if query.is_empty() {
        return ConditionTree::match_all();
    }

    if !any_condition_re().is_match(query) {
        let text = strip_wrapping(query, '"', '"');
        tracing::debug!(value = text, "bare text query; matching default field");
        return ConditionTree {
            groups: vec![SearchGroup { conditions: vec![Condition::new(SearchField::DEFAULT, Operator::Fuzzy, text)] }],
        };
    }

    let mut groups = Vec::new();
    for raw_group in split_outside_quotes(query, "||") {
        let group = strip_parens(raw_group);
        let conditions: Vec<Condition> = split_outside_quotes(group, "&&")
            .into_iter()
            .filter_map(parse_condition)
            .collect();
        if conditions.is_empty() {
            tracing::warn!(group = raw_group, "query group has no usable conditions; ignoring it");
            continue;
        }
        groups.push(SearchGroup { conditions });
    }
    ConditionTree { groups }
}

fn parse_condition(fragment: &str) -> Option<Condition> {
    let fragment = strip_parens(fragment);
    let Some(caps) = condition_re().captures(fragment) else {
        tracing::warn!(fragment, "cannot parse condition; dropping it");
        return None;
    };
    let Some(field) = SearchField::from_name(&caps[1]) else {
        tracing::warn!(field = &caps[1], "unknown search field; dropping condition");
        return None;
    };
    let op = Operator::from_token(&caps[2])?;
    Some(Condition::new(field, op, &caps[3]))
}

/// Splits on `delim` wherever it appears outside double quotes. Empty pieces are discarded.
pub(crate) fn split_outside_quotes<'q>(s: &'q str, delim: &str) -> Vec<&'q str> {
    let bytes = s.as_bytes();
    let d = delim.as_bytes();
    let mut parts = Vec::new();
    let mut in_quotes = false;
    let mut start = 0;
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'"' {
            in_quotes = !in_quotes;
        } else if !in_quotes && bytes[i..].starts_with(d) {
            parts.push(&s[start..i]);
            i += d.len();
            start = i;
            continue;
        }
        i += 1;
    }
    parts.push(&s[start..]);
    parts.into_iter().map(str::trim).filter(|p| !p.is_empty()).collect()
}

/// Strips one pair of parentheses only when they enclose the whole fragment.
fn strip_parens(s: &str) -> &str {
    let s = s.trim();
    if !(s.len() >= 2 && s.starts_with('(') && s.ends_with(')')) {
        return s;
    }
    let mut depth = 0i32;
    let mut in_quotes = false;
    for (i, b) in s.bytes().enumerate() {
        match b {
            b'"' => in_quotes = !in_quotes,
            b'(' if !in_quotes => depth += 1,
            b')' if !in_quotes => {
                depth -= 1;
                if depth == 0 && i != s.len() - 1 {
                    return s;
                }
            }
            _ => {}
        }
    }
    s[1..s.len() - 1].trim()
}

fn strip_wrapping(s: &str, open: char, close: char) -> &str {
    let s = s.trim();
    if s.len() >= 2 && s.starts_with(open) && s.ends_with(close) {
        s[open.len_utf8()..s.len() - close.len_utf8()].trim()
    } else {
        s
    }
}
