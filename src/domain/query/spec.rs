//! QuerySpec: the structured DSL the model emits in place of SQL
//!
//! Shape and operator whitelists are enforced at deserialization; schema
//! binding, type compatibility, and derived-expression resolution happen in
//! the compiler.

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

/// Filter operators admissible in a QuerySpec
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum FilterOp {
    #[serde(rename = "=")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Gte,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Lte,
    #[serde(rename = "in")]
    In,
    #[serde(rename = "between")]
    Between,
    #[serde(rename = "contains")]
    Contains,
    #[serde(rename = "is_null")]
    IsNull,
}

impl FilterOp {
    /// SQL comparison operator for the scalar forms
    pub const fn comparison_sql(&self) -> Option<&'static str> {
        match self {
            Self::Eq => Some("="),
            Self::Ne => Some("!="),
            Self::Gt => Some(">"),
            Self::Gte => Some(">="),
            Self::Lt => Some("<"),
            Self::Lte => Some("<="),
            _ => None,
        }
    }

    /// Ordering comparisons require an orderable column type
    pub const fn is_range(&self) -> bool {
        matches!(self, Self::Gt | Self::Gte | Self::Lt | Self::Lte | Self::Between)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FilterCondition {
    pub col: String,
    pub op: FilterOp,
    #[serde(default)]
    pub value: Json,
}

/// Aggregation functions admissible in a QuerySpec
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AggFn {
    Sum,
    Avg,
    Min,
    Max,
    Count,
    Nunique,
}

impl AggFn {
    pub const fn requires_numeric(&self) -> bool {
        matches!(self, Self::Sum | Self::Avg)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Aggregation {
    /// Output column name; must be an identifier, unique within the spec
    #[serde(rename = "as")]
    pub alias: String,
    pub agg: AggFn,
    /// Source column, or `"*"` for `count`
    pub col: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DerivedField {
    #[serde(rename = "as")]
    pub alias: String,
    pub expr: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDir {
    #[default]
    Asc,
    Desc,
}

impl SortDir {
    pub const fn as_sql(&self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

// `asc`/`desc` are matched case-insensitively on the wire.
impl<'de> Deserialize<'de> for SortDir {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        match raw.to_ascii_lowercase().as_str() {
            "asc" => Ok(Self::Asc),
            "desc" => Ok(Self::Desc),
            other => Err(de::Error::custom(format!(
                "invalid sort direction: {other:?} (expected asc or desc)"
            ))),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SortSpec {
    pub col: String,
    #[serde(default)]
    pub dir: SortDir,
}

/// The full query DSL; field order is canonical for cache keying
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QuerySpec {
    pub dataset_id: String,
    #[serde(default)]
    pub filters: Vec<FilterCondition>,
    #[serde(default)]
    pub group_by: Vec<String>,
    #[serde(default)]
    pub aggregations: Vec<Aggregation>,
    #[serde(default)]
    pub derived: Vec<DerivedField>,
    #[serde(default)]
    pub sort: Vec<SortSpec>,
    /// Missing means the hard ceiling; 0 is rejected by the compiler
    #[serde(default)]
    pub limit: Option<u64>,
}

/// `[A-Za-z_][A-Za-z0-9_]*`, the shape required of output aliases
pub fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_full_spec() {
        let spec: QuerySpec = serde_json::from_value(serde_json::json!({
            "dataset_id": "ds_1",
            "filters": [{"col": "year", "op": "=", "value": 2025}],
            "group_by": ["account"],
            "aggregations": [{"as": "total", "agg": "sum", "col": "returns"}],
            "derived": [{"as": "rate", "expr": "total / nullif(total, 0)"}],
            "sort": [{"col": "total", "dir": "DESC"}],
            "limit": 100
        }))
        .unwrap();

        assert_eq!(spec.filters[0].op, FilterOp::Eq);
        assert_eq!(spec.aggregations[0].agg, AggFn::Sum);
        assert_eq!(spec.aggregations[0].alias, "total");
        assert_eq!(spec.sort[0].dir, SortDir::Desc);
        assert_eq!(spec.limit, Some(100));
    }

    #[test]
    fn defaults_apply_for_missing_clauses() {
        let spec: QuerySpec =
            serde_json::from_value(serde_json::json!({"dataset_id": "ds_1"})).unwrap();
        assert!(spec.filters.is_empty());
        assert!(spec.group_by.is_empty());
        assert!(spec.aggregations.is_empty());
        assert!(spec.limit.is_none());
    }

    #[test]
    fn rejects_operators_outside_the_whitelist() {
        let result: Result<FilterCondition, _> = serde_json::from_value(serde_json::json!(
            {"col": "a", "op": "like", "value": "x"}
        ));
        assert!(result.is_err());

        let result: Result<Aggregation, _> = serde_json::from_value(serde_json::json!(
            {"as": "a", "agg": "median", "col": "x"}
        ));
        assert!(result.is_err());
    }

    #[test]
    fn sort_dir_is_case_insensitive() {
        let sort: SortSpec =
            serde_json::from_value(serde_json::json!({"col": "a", "dir": "Desc"})).unwrap();
        assert_eq!(sort.dir, SortDir::Desc);

        let result: Result<SortSpec, _> =
            serde_json::from_value(serde_json::json!({"col": "a", "dir": "sideways"}));
        assert!(result.is_err());
    }

    #[test]
    fn identifier_shapes() {
        assert!(is_identifier("total"));
        assert!(is_identifier("_x9"));
        assert!(!is_identifier("9x"));
        assert!(!is_identifier("a-b"));
        assert!(!is_identifier(""));
        assert!(!is_identifier("总数"));
    }

    #[test]
    fn canonical_serialization_is_stable() {
        let spec: QuerySpec = serde_json::from_value(serde_json::json!({
            "dataset_id": "ds_1",
            "limit": 10,
            "group_by": ["a"]
        }))
        .unwrap();
        let a = serde_json::to_string(&spec).unwrap();
        let b = serde_json::to_string(&spec).unwrap();
        assert_eq!(a, b);
    }
}
