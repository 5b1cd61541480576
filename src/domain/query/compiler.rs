//! QuerySpec → SQL compiler
//!
//! Validates a spec against a dataset schema in a fixed order (shape and
//! whitelists are already enforced by deserialization): complexity caps,
//! schema binding, type compatibility, derived-expression resolution, limit
//! clamping. Only then is SQL emitted: identifiers quoted, filter values
//! carried as parameters, derived projections wrapped in an outer SELECT
//! over the aggregation subquery, and the LIMIT raised by one probe row so
//! the executor can report truncation.

use std::collections::HashSet;
use std::sync::Arc;

use duckdb::ToSql;
use duckdb::types::{ToSqlOutput, Value as DuckValue};
use serde::Serialize;
use serde_json::Value as Json;

use super::cache::QueryCache;
use super::expr;
use super::spec::{AggFn, Aggregation, FilterCondition, FilterOp, QuerySpec, is_identifier};
use crate::core::constants::{MAX_AGGREGATIONS, MAX_FILTERS, MAX_GROUP_BY, MAX_QUERY_ROWS};
use crate::data::registry::{Column, ColumnType, Dataset, DatasetRegistry};
use crate::domain::error::ToolError;
use crate::utils::sql::{escape_like_pattern, quote_ident};

/// Tabular query result
#[derive(Debug, Clone, Serialize)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Json>>,
    pub row_count: usize,
    /// True when the underlying query produced more than `limit` rows
    pub truncated: bool,
}

/// A typed SQL parameter; the only path for filter values into a statement
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Int(i64),
    Float(f64),
    Text(String),
    Bool(bool),
}

impl ToSql for SqlValue {
    fn to_sql(&self) -> duckdb::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::Owned(match self {
            SqlValue::Int(v) => DuckValue::BigInt(*v),
            SqlValue::Float(v) => DuckValue::Double(*v),
            SqlValue::Text(v) => DuckValue::Text(v.clone()),
            SqlValue::Bool(v) => DuckValue::Boolean(*v),
        }))
    }
}

/// Output of a successful compilation
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    pub sql: String,
    pub params: Vec<SqlValue>,
    /// Projection column names, in SELECT order
    pub columns: Vec<String>,
    /// Clamped row limit; the SQL carries `limit + 1` as a truncation probe
    pub limit: usize,
}

/// Validate the spec against the dataset schema and emit SQL
pub fn compile(spec: &QuerySpec, dataset: &Dataset) -> Result<CompiledQuery, ToolError> {
    check_complexity(spec)?;
    let limit = clamp_limit(spec)?;

    let grouped = !spec.group_by.is_empty();
    let has_aggs = !spec.aggregations.is_empty();

    // Schema binding: group_by
    for (i, col) in spec.group_by.iter().enumerate() {
        if dataset.column(col).is_none() {
            return Err(ToolError::bad_spec(
                format!("group_by[{i}]"),
                format!("unknown column: {col}"),
            ));
        }
    }

    // Schema binding + type compatibility: aggregations
    let mut output_names: HashSet<&str> = spec.group_by.iter().map(String::as_str).collect();
    for (i, agg) in spec.aggregations.iter().enumerate() {
        validate_aggregation(i, agg, dataset)?;
        if !output_names.insert(&agg.alias) {
            return Err(ToolError::bad_spec(
                format!("aggregations[{i}].as"),
                format!("duplicate output column: {}", agg.alias),
            ));
        }
    }

    // Filters
    let mut where_parts = Vec::with_capacity(spec.filters.len());
    let mut params = Vec::new();
    for (i, filter) in spec.filters.iter().enumerate() {
        let (clause, mut values) = build_filter(i, filter, dataset)?;
        where_parts.push(clause);
        params.append(&mut values);
    }

    // Derived expressions: parse under the grammar, then resolve every
    // identifier to an aggregation alias or a grouped column.
    let resolvable: HashSet<&str> = spec
        .aggregations
        .iter()
        .map(|a| a.alias.as_str())
        .chain(spec.group_by.iter().map(String::as_str))
        .collect();
    let mut derived_trees = Vec::with_capacity(spec.derived.len());
    for (i, derived) in spec.derived.iter().enumerate() {
        if !is_identifier(&derived.alias) {
            return Err(ToolError::bad_spec(
                format!("derived[{i}].as"),
                format!("alias is not a valid identifier: {}", derived.alias),
            ));
        }
        if !output_names.insert(&derived.alias) {
            return Err(ToolError::bad_spec(
                format!("derived[{i}].as"),
                format!("duplicate output column: {}", derived.alias),
            ));
        }
        let tree = expr::parse(&derived.expr)
            .map_err(|e| ToolError::bad_spec(format!("derived[{i}].expr"), e.reason))?;
        for ident in tree.identifiers() {
            if !resolvable.contains(ident) {
                return Err(ToolError::bad_spec(
                    format!("derived[{i}].expr"),
                    format!("unknown identifier: {ident} (expected an aggregation alias or grouped column)"),
                ));
            }
        }
        derived_trees.push(tree);
    }

    // Projection, in SELECT order
    let mut columns: Vec<String> = if grouped || has_aggs {
        spec.group_by
            .iter()
            .cloned()
            .chain(spec.aggregations.iter().map(|a| a.alias.clone()))
            .collect()
    } else {
        dataset.columns.iter().map(|c| c.name.clone()).collect()
    };
    let sortable: HashSet<&str> = columns
        .iter()
        .map(String::as_str)
        .chain(spec.derived.iter().map(|d| d.alias.as_str()))
        .collect();

    // Sort targets must be projected
    for (i, sort) in spec.sort.iter().enumerate() {
        if !sortable.contains(sort.col.as_str()) {
            return Err(ToolError::bad_spec(
                format!("sort[{i}].col"),
                format!(
                    "sort column must be a grouped column, aggregation alias, or derived alias: {}",
                    sort.col
                ),
            ));
        }
    }

    // SQL emission
    let select_list = if grouped || has_aggs {
        let mut parts: Vec<String> = spec.group_by.iter().map(|c| quote_ident(c)).collect();
        parts.extend(spec.aggregations.iter().map(aggregation_sql));
        parts.join(", ")
    } else {
        "*".to_string()
    };

    let mut base = format!(
        "SELECT {} FROM {}",
        select_list,
        quote_ident(&dataset.table_name)
    );
    if !where_parts.is_empty() {
        base.push_str(" WHERE ");
        base.push_str(&where_parts.join(" AND "));
    }
    if grouped {
        let group_cols: Vec<String> = spec.group_by.iter().map(|c| quote_ident(c)).collect();
        base.push_str(" GROUP BY ");
        base.push_str(&group_cols.join(", "));
    }

    let order_clause = if spec.sort.is_empty() {
        String::new()
    } else {
        let items: Vec<String> = spec
            .sort
            .iter()
            .map(|s| format!("{} {}", quote_ident(&s.col), s.dir.as_sql()))
            .collect();
        format!(" ORDER BY {}", items.join(", "))
    };
    let limit_clause = format!(" LIMIT {}", limit + 1);

    let sql = if derived_trees.is_empty() {
        format!("{base}{order_clause}{limit_clause}")
    } else {
        // Derived identifiers reference SELECT-list aliases, so the
        // aggregation projection becomes a subquery and derived expressions
        // live in the outer SELECT where the engine can resolve them.
        let mut outer: Vec<String> = if grouped || has_aggs {
            columns.iter().map(|c| quote_ident(c)).collect()
        } else {
            vec!["*".to_string()]
        };
        for (derived, tree) in spec.derived.iter().zip(&derived_trees) {
            outer.push(format!("{} AS {}", tree.to_sql(), quote_ident(&derived.alias)));
        }
        format!(
            "SELECT {} FROM ({}) AS sub{}{}",
            outer.join(", "),
            base,
            order_clause,
            limit_clause
        )
    };

    columns.extend(spec.derived.iter().map(|d| d.alias.clone()));

    Ok(CompiledQuery {
        sql,
        params,
        columns,
        limit,
    })
}

fn check_complexity(spec: &QuerySpec) -> Result<(), ToolError> {
    if spec.filters.len() > MAX_FILTERS {
        return Err(ToolError::bad_spec(
            "filters",
            format!("too many filters: {} > {}", spec.filters.len(), MAX_FILTERS),
        ));
    }
    if spec.group_by.len() > MAX_GROUP_BY {
        return Err(ToolError::bad_spec(
            "group_by",
            format!(
                "too many group-by columns: {} > {}",
                spec.group_by.len(),
                MAX_GROUP_BY
            ),
        ));
    }
    if spec.aggregations.len() > MAX_AGGREGATIONS {
        return Err(ToolError::bad_spec(
            "aggregations",
            format!(
                "too many aggregations: {} > {}",
                spec.aggregations.len(),
                MAX_AGGREGATIONS
            ),
        ));
    }
    Ok(())
}

fn clamp_limit(spec: &QuerySpec) -> Result<usize, ToolError> {
    match spec.limit {
        Some(0) => Err(ToolError::bad_spec("limit", "limit must be at least 1")),
        Some(n) => Ok((n as usize).min(MAX_QUERY_ROWS)),
        None => Ok(MAX_QUERY_ROWS),
    }
}

fn validate_aggregation(index: usize, agg: &Aggregation, dataset: &Dataset) -> Result<(), ToolError> {
    if !is_identifier(&agg.alias) {
        return Err(ToolError::bad_spec(
            format!("aggregations[{index}].as"),
            format!("alias is not a valid identifier: {}", agg.alias),
        ));
    }

    if agg.col == "*" {
        if agg.agg != AggFn::Count {
            return Err(ToolError::bad_spec(
                format!("aggregations[{index}].col"),
                "\"*\" is only valid with count",
            ));
        }
        return Ok(());
    }

    let Some(column) = dataset.column(&agg.col) else {
        return Err(ToolError::bad_spec(
            format!("aggregations[{index}].col"),
            format!("unknown column: {}", agg.col),
        ));
    };

    if agg.agg.requires_numeric() && !column.column_type.is_numeric() {
        return Err(ToolError::bad_spec(
            format!("aggregations[{index}].col"),
            format!(
                "{:?} requires a numeric column, {} is {}",
                agg.agg,
                agg.col,
                column.column_type.as_str()
            ),
        ));
    }
    Ok(())
}

fn aggregation_sql(agg: &Aggregation) -> String {
    let alias = quote_ident(&agg.alias);
    match agg.agg {
        AggFn::Count if agg.col == "*" => format!("COUNT(*) AS {alias}"),
        AggFn::Count => format!("COUNT({}) AS {alias}", quote_ident(&agg.col)),
        AggFn::Nunique => format!("COUNT(DISTINCT {}) AS {alias}", quote_ident(&agg.col)),
        AggFn::Sum => format!("SUM({}) AS {alias}", quote_ident(&agg.col)),
        AggFn::Avg => format!("AVG({}) AS {alias}", quote_ident(&agg.col)),
        AggFn::Min => format!("MIN({}) AS {alias}", quote_ident(&agg.col)),
        AggFn::Max => format!("MAX({}) AS {alias}", quote_ident(&agg.col)),
    }
}

fn build_filter(
    index: usize,
    filter: &FilterCondition,
    dataset: &Dataset,
) -> Result<(String, Vec<SqlValue>), ToolError> {
    let Some(column) = dataset.column(&filter.col) else {
        return Err(ToolError::bad_spec(
            format!("filters[{index}].col"),
            format!("unknown column: {}", filter.col),
        ));
    };
    let col = quote_ident(&filter.col);
    let value_path = format!("filters[{index}].value");

    if filter.op.is_range() && !column.column_type.is_comparable() {
        return Err(ToolError::bad_spec(
            format!("filters[{index}].op"),
            format!(
                "range comparison on non-orderable column {} ({})",
                filter.col,
                column.column_type.as_str()
            ),
        ));
    }

    match filter.op {
        FilterOp::IsNull => {
            if !filter.value.is_null() {
                return Err(ToolError::bad_spec(value_path, "is_null takes no value"));
            }
            Ok((format!("{col} IS NULL"), Vec::new()))
        }
        FilterOp::Contains => {
            if column.column_type != ColumnType::String {
                return Err(ToolError::bad_spec(
                    format!("filters[{index}].col"),
                    format!("contains requires a string column, {} is {}",
                        filter.col,
                        column.column_type.as_str()
                    ),
                ));
            }
            let needle = filter.value.as_str().ok_or_else(|| {
                ToolError::bad_spec(value_path.clone(), "contains requires a string value")
            })?;
            let pattern = format!("%{}%", escape_like_pattern(needle));
            Ok((
                format!("{col} LIKE ? ESCAPE '\\'"),
                vec![SqlValue::Text(pattern)],
            ))
        }
        FilterOp::In => {
            let Some(items) = filter.value.as_array() else {
                return Err(ToolError::bad_spec(value_path, "in requires a list"));
            };
            if items.is_empty() {
                return Err(ToolError::bad_spec(value_path, "in requires a non-empty list"));
            }
            let first_kind = json_kind(&items[0]);
            let mut values = Vec::with_capacity(items.len());
            for (j, item) in items.iter().enumerate() {
                if json_kind(item) != first_kind {
                    return Err(ToolError::bad_spec(
                        value_path,
                        format!("heterogeneous list: element {j} is {}, expected {first_kind}",
                            json_kind(item)
                        ),
                    ));
                }
                values.push(scalar_value(item, column, &value_path)?);
            }
            let placeholders: Vec<&str> = values.iter().map(|_| "?").collect();
            Ok((
                format!("{col} IN ({})", placeholders.join(", ")),
                values,
            ))
        }
        FilterOp::Between => {
            let Some(items) = filter.value.as_array() else {
                return Err(ToolError::bad_spec(
                    value_path,
                    "between requires a two-element list",
                ));
            };
            if items.len() != 2 {
                return Err(ToolError::bad_spec(
                    value_path,
                    format!("between requires exactly 2 elements, got {}", items.len()),
                ));
            }
            if json_kind(&items[0]) != json_kind(&items[1]) {
                return Err(ToolError::bad_spec(
                    value_path,
                    "between bounds must have the same type",
                ));
            }
            let low = scalar_value(&items[0], column, &value_path)?;
            let high = scalar_value(&items[1], column, &value_path)?;
            Ok((format!("{col} BETWEEN ? AND ?"), vec![low, high]))
        }
        _ => {
            // Scalar comparisons: = != > >= < <=
            let op = filter
                .op
                .comparison_sql()
                .expect("non-scalar ops handled above");
            if filter.value.is_null() {
                return Err(ToolError::bad_spec(
                    value_path,
                    "null value is not comparable; use is_null",
                ));
            }
            let value = scalar_value(&filter.value, column, &value_path)?;
            Ok((format!("{col} {op} ?"), vec![value]))
        }
    }
}

fn scalar_value(value: &Json, column: &Column, path: &str) -> Result<SqlValue, ToolError> {
    match column.column_type {
        ColumnType::Int | ColumnType::Float => {
            if let Some(v) = value.as_i64() {
                Ok(SqlValue::Int(v))
            } else if let Some(v) = value.as_f64() {
                Ok(SqlValue::Float(v))
            } else {
                Err(ToolError::bad_spec(
                    path,
                    format!("expected a number for column {}", column.name),
                ))
            }
        }
        ColumnType::String | ColumnType::Date | ColumnType::Datetime => match value.as_str() {
            Some(v) => Ok(SqlValue::Text(v.to_string())),
            None => Err(ToolError::bad_spec(
                path,
                format!("expected a string for column {}", column.name),
            )),
        },
        ColumnType::Bool => match value.as_bool() {
            Some(v) => Ok(SqlValue::Bool(v)),
            None => Err(ToolError::bad_spec(
                path,
                format!("expected a boolean for column {}", column.name),
            )),
        },
    }
}

const fn json_kind(value: &Json) -> &'static str {
    match value {
        Json::Null => "null",
        Json::Bool(_) => "boolean",
        Json::Number(_) => "number",
        Json::String(_) => "string",
        Json::Array(_) => "list",
        Json::Object(_) => "object",
    }
}

/// Execute a compiled query and fold the probe row into `truncated`
pub async fn run_compiled(
    registry: &Arc<DatasetRegistry>,
    compiled: CompiledQuery,
) -> Result<Table, ToolError> {
    let CompiledQuery {
        sql,
        params,
        columns,
        limit,
    } = compiled;

    tracing::debug!(sql = %sql, "Executing compiled query");
    let width = columns.len();
    let mut rows = registry
        .db()
        .run(move |conn| {
            let refs: Vec<&dyn ToSql> = params.iter().map(|p| p as &dyn ToSql).collect();
            crate::data::duckdb::fetch_rows(conn, &sql, &refs, width)
        })
        .await
        .map_err(ToolError::from)?;

    let truncated = rows.len() > limit;
    rows.truncate(limit);
    let row_count = rows.len();

    Ok(Table {
        columns,
        rows,
        row_count,
        truncated,
    })
}

/// Full compiler contract: resolve the dataset, consult the cache, compile,
/// execute, and memoize the result.
pub async fn compile_and_run(
    registry: &Arc<DatasetRegistry>,
    cache: &QueryCache,
    spec: &QuerySpec,
) -> Result<Table, ToolError> {
    let dataset = registry.get(&spec.dataset_id).map_err(ToolError::from)?;
    if let Some(hit) = cache.get(spec) {
        tracing::debug!(dataset_id = %spec.dataset_id, "Query cache hit");
        return Ok(hit);
    }
    let compiled = compile(spec, &dataset)?;
    let table = run_compiled(registry, compiled).await?;
    cache.insert(spec, table.clone());
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::DuckdbService;
    use crate::domain::error::ErrorCode;

    fn column(name: &str, column_type: ColumnType) -> Column {
        Column {
            name: name.to_string(),
            column_type,
            null_ratio: 0.0,
            example_values: vec![],
            unique_count: None,
            min_value: None,
            max_value: None,
        }
    }

    fn sales_dataset() -> Dataset {
        Dataset {
            dataset_id: "ds_sales".to_string(),
            table_name: "t_sales".to_string(),
            columns: vec![
                column("account", ColumnType::String),
                column("month", ColumnType::String),
                column("returns", ColumnType::Int),
                column("quality", ColumnType::Int),
                column("year", ColumnType::Int),
            ],
            row_count: 1000,
            created_at: chrono::Utc::now(),
            source_file: None,
        }
    }

    fn spec(json: serde_json::Value) -> QuerySpec {
        serde_json::from_value(json).unwrap()
    }

    fn compile_err(json: serde_json::Value) -> ToolError {
        compile(&spec(json), &sales_dataset()).unwrap_err()
    }

    #[test]
    fn compiles_grouped_aggregation() {
        let compiled = compile(
            &spec(serde_json::json!({
                "dataset_id": "ds_sales",
                "filters": [{"col": "year", "op": "=", "value": 2025}],
                "group_by": ["account"],
                "aggregations": [{"as": "total", "agg": "sum", "col": "returns"}]
            })),
            &sales_dataset(),
        )
        .unwrap();

        assert_eq!(
            compiled.sql,
            "SELECT \"account\", SUM(\"returns\") AS \"total\" FROM \"t_sales\" \
             WHERE \"year\" = ? GROUP BY \"account\" LIMIT 10001"
        );
        assert_eq!(compiled.params, vec![SqlValue::Int(2025)]);
        assert_eq!(compiled.columns, vec!["account", "total"]);
        assert_eq!(compiled.limit, 10_000);
    }

    #[test]
    fn compiles_derived_in_outer_select() {
        let compiled = compile(
            &spec(serde_json::json!({
                "dataset_id": "ds_sales",
                "filters": [{"col": "year", "op": "=", "value": 2025}],
                "group_by": ["account", "month"],
                "aggregations": [
                    {"as": "total", "agg": "sum", "col": "returns"},
                    {"as": "quality_cnt", "agg": "sum", "col": "quality"}
                ],
                "derived": [{"as": "quality_rate", "expr": "quality_cnt / nullif(total, 0)"}],
                "sort": [{"col": "month", "dir": "asc"}]
            })),
            &sales_dataset(),
        )
        .unwrap();

        assert_eq!(
            compiled.sql,
            "SELECT \"account\", \"month\", \"total\", \"quality_cnt\", \
             (\"quality_cnt\" / nullif(\"total\", 0)) AS \"quality_rate\" FROM \
             (SELECT \"account\", \"month\", SUM(\"returns\") AS \"total\", \
             SUM(\"quality\") AS \"quality_cnt\" FROM \"t_sales\" WHERE \"year\" = ? \
             GROUP BY \"account\", \"month\") AS sub ORDER BY \"month\" ASC LIMIT 10001"
        );
        assert_eq!(
            compiled.columns,
            vec!["account", "month", "total", "quality_cnt", "quality_rate"]
        );
    }

    #[test]
    fn compilation_is_deterministic() {
        let q = spec(serde_json::json!({
            "dataset_id": "ds_sales",
            "filters": [
                {"col": "account", "op": "in", "value": ["a", "b"]},
                {"col": "returns", "op": "between", "value": [1, 10]}
            ],
            "group_by": ["account"],
            "aggregations": [{"as": "n", "agg": "count", "col": "*"}],
            "sort": [{"col": "n", "dir": "desc"}],
            "limit": 50
        }));
        let a = compile(&q, &sales_dataset()).unwrap();
        let b = compile(&q, &sales_dataset()).unwrap();
        assert_eq!(a, b);
        assert_eq!(
            a.sql,
            "SELECT \"account\", COUNT(*) AS \"n\" FROM \"t_sales\" WHERE \
             \"account\" IN (?, ?) AND \"returns\" BETWEEN ? AND ? \
             GROUP BY \"account\" ORDER BY \"n\" DESC LIMIT 51"
        );
        assert_eq!(
            a.params,
            vec![
                SqlValue::Text("a".into()),
                SqlValue::Text("b".into()),
                SqlValue::Int(1),
                SqlValue::Int(10)
            ]
        );
    }

    #[test]
    fn plain_select_without_grouping() {
        let compiled = compile(
            &spec(serde_json::json!({
                "dataset_id": "ds_sales",
                "filters": [{"col": "account", "op": "contains", "value": "50%_a"}],
                "limit": 5
            })),
            &sales_dataset(),
        )
        .unwrap();

        assert_eq!(
            compiled.sql,
            "SELECT * FROM \"t_sales\" WHERE \"account\" LIKE ? ESCAPE '\\' LIMIT 6"
        );
        assert_eq!(
            compiled.params,
            vec![SqlValue::Text("%50\\%\\_a%".into())]
        );
        assert_eq!(compiled.columns.len(), 5);
    }

    #[test]
    fn is_null_emits_no_parameter() {
        let compiled = compile(
            &spec(serde_json::json!({
                "dataset_id": "ds_sales",
                "filters": [{"col": "month", "op": "is_null"}]
            })),
            &sales_dataset(),
        )
        .unwrap();
        assert!(compiled.sql.contains("\"month\" IS NULL"));
        assert!(compiled.params.is_empty());
    }

    #[test]
    fn oversized_limit_is_clamped_with_probe() {
        let compiled = compile(
            &spec(serde_json::json!({"dataset_id": "ds_sales", "limit": 50_000})),
            &sales_dataset(),
        )
        .unwrap();
        assert_eq!(compiled.limit, 10_000);
        assert!(compiled.sql.ends_with("LIMIT 10001"));
    }

    #[test]
    fn zero_limit_is_rejected() {
        let err = compile_err(serde_json::json!({"dataset_id": "ds_sales", "limit": 0}));
        assert_eq!(err.code, ErrorCode::BadSpec);
        assert_eq!(err.field_path.as_deref(), Some("limit"));
    }

    #[test]
    fn unknown_columns_are_rejected_per_clause() {
        let err = compile_err(serde_json::json!({
            "dataset_id": "ds_sales",
            "filters": [{"col": "ghost", "op": "=", "value": 1}]
        }));
        assert_eq!(err.field_path.as_deref(), Some("filters[0].col"));

        let err = compile_err(serde_json::json!({
            "dataset_id": "ds_sales", "group_by": ["ghost"]
        }));
        assert_eq!(err.field_path.as_deref(), Some("group_by[0]"));

        let err = compile_err(serde_json::json!({
            "dataset_id": "ds_sales",
            "aggregations": [{"as": "t", "agg": "sum", "col": "ghost"}]
        }));
        assert_eq!(err.field_path.as_deref(), Some("aggregations[0].col"));
    }

    #[test]
    fn between_requires_two_homogeneous_elements() {
        let err = compile_err(serde_json::json!({
            "dataset_id": "ds_sales",
            "filters": [{"col": "returns", "op": "between", "value": [1]}]
        }));
        assert_eq!(err.code, ErrorCode::BadSpec);

        let err = compile_err(serde_json::json!({
            "dataset_id": "ds_sales",
            "filters": [{"col": "returns", "op": "between", "value": [1, "x"]}]
        }));
        assert_eq!(err.code, ErrorCode::BadSpec);
    }

    #[test]
    fn heterogeneous_in_list_is_rejected() {
        let err = compile_err(serde_json::json!({
            "dataset_id": "ds_sales",
            "filters": [{"col": "account", "op": "in", "value": ["a", 2]}]
        }));
        assert_eq!(err.code, ErrorCode::BadSpec);
        assert_eq!(err.field_path.as_deref(), Some("filters[0].value"));
    }

    #[test]
    fn star_only_valid_for_count() {
        assert!(
            compile(
                &spec(serde_json::json!({
                    "dataset_id": "ds_sales",
                    "aggregations": [{"as": "n", "agg": "count", "col": "*"}]
                })),
                &sales_dataset()
            )
            .is_ok()
        );

        let err = compile_err(serde_json::json!({
            "dataset_id": "ds_sales",
            "aggregations": [{"as": "t", "agg": "sum", "col": "*"}]
        }));
        assert_eq!(err.code, ErrorCode::BadSpec);
    }

    #[test]
    fn numeric_aggregations_require_numeric_columns() {
        let err = compile_err(serde_json::json!({
            "dataset_id": "ds_sales",
            "aggregations": [{"as": "t", "agg": "avg", "col": "account"}]
        }));
        assert_eq!(err.code, ErrorCode::BadSpec);

        // min/max accept orderable non-numeric columns
        assert!(
            compile(
                &spec(serde_json::json!({
                    "dataset_id": "ds_sales",
                    "aggregations": [{"as": "m", "agg": "max", "col": "month"}]
                })),
                &sales_dataset()
            )
            .is_ok()
        );
    }

    #[test]
    fn contains_requires_string_column() {
        let err = compile_err(serde_json::json!({
            "dataset_id": "ds_sales",
            "filters": [{"col": "returns", "op": "contains", "value": "1"}]
        }));
        assert_eq!(err.code, ErrorCode::BadSpec);
    }

    #[test]
    fn derived_must_resolve_to_declared_names() {
        let err = compile_err(serde_json::json!({
            "dataset_id": "ds_sales",
            "group_by": ["account"],
            "aggregations": [{"as": "total", "agg": "sum", "col": "returns"}],
            "derived": [{"as": "rate", "expr": "total / nullif(ghost, 0)"}]
        }));
        assert_eq!(err.code, ErrorCode::BadSpec);
        assert_eq!(err.field_path.as_deref(), Some("derived[0].expr"));

        let err = compile_err(serde_json::json!({
            "dataset_id": "ds_sales",
            "group_by": ["account"],
            "aggregations": [{"as": "total", "agg": "sum", "col": "returns"}],
            "derived": [{"as": "bad", "expr": "total; drop"}]
        }));
        assert_eq!(err.code, ErrorCode::BadSpec);
    }

    #[test]
    fn duplicate_output_names_are_rejected() {
        let err = compile_err(serde_json::json!({
            "dataset_id": "ds_sales",
            "group_by": ["account"],
            "aggregations": [
                {"as": "total", "agg": "sum", "col": "returns"},
                {"as": "total", "agg": "sum", "col": "quality"}
            ]
        }));
        assert_eq!(err.code, ErrorCode::BadSpec);

        let err = compile_err(serde_json::json!({
            "dataset_id": "ds_sales",
            "group_by": ["account"],
            "aggregations": [{"as": "account", "agg": "sum", "col": "returns"}]
        }));
        assert_eq!(err.code, ErrorCode::BadSpec);
    }

    #[test]
    fn sort_must_target_projection() {
        let err = compile_err(serde_json::json!({
            "dataset_id": "ds_sales",
            "group_by": ["account"],
            "aggregations": [{"as": "total", "agg": "sum", "col": "returns"}],
            "sort": [{"col": "returns", "dir": "asc"}]
        }));
        assert_eq!(err.code, ErrorCode::BadSpec);
        assert_eq!(err.field_path.as_deref(), Some("sort[0].col"));
    }

    // ------------------------------------------------------------------
    // Execution against an in-memory store
    // ------------------------------------------------------------------

    async fn seeded_registry() -> Arc<DatasetRegistry> {
        let db = Arc::new(DuckdbService::open_in_memory().unwrap());
        db.run(|conn| {
            conn.execute_batch(
                "CREATE TABLE t_sales (account VARCHAR, month VARCHAR, returns BIGINT, quality BIGINT, year BIGINT);
                 INSERT INTO t_sales VALUES
                   ('acme', '2025-01', 10, 5, 2025),
                   ('acme', '2025-02', 4, 1, 2025),
                   ('globex', '2025-01', 8, 0, 2025),
                   ('globex', '2025-02', 0, 0, 2025),
                   ('initech', '2024-12', 7, 3, 2024);",
            )?;
            Ok(())
        })
        .await
        .unwrap();
        Arc::new(DatasetRegistry::new(db))
    }

    fn register_sales(registry: &DatasetRegistry) -> String {
        let dataset = registry.register(
            "t_sales".to_string(),
            sales_dataset().columns,
            5,
            None,
        );
        dataset.dataset_id.clone()
    }

    #[tokio::test]
    async fn executes_grouped_totals() {
        let registry = seeded_registry().await;
        let id = register_sales(&registry);
        let cache = QueryCache::default();

        let q = spec(serde_json::json!({
            "dataset_id": id,
            "filters": [{"col": "year", "op": "=", "value": 2025}],
            "group_by": ["account"],
            "aggregations": [{"as": "total", "agg": "sum", "col": "returns"}],
            "sort": [{"col": "account", "dir": "asc"}]
        }));
        let table = compile_and_run(&registry, &cache, &q).await.unwrap();

        assert_eq!(table.columns, vec!["account", "total"]);
        assert_eq!(table.row_count, 2);
        assert!(!table.truncated);
        assert_eq!(table.rows[0][0], Json::String("acme".into()));
        assert_eq!(table.rows[0][1], Json::from(14));
        assert_eq!(table.rows[1][1], Json::from(8));
    }

    #[tokio::test]
    async fn truncation_probe_drops_extra_row() {
        let registry = seeded_registry().await;
        let id = register_sales(&registry);
        let cache = QueryCache::default();

        let q = spec(serde_json::json!({
            "dataset_id": id,
            "sort": [{"col": "account", "dir": "asc"}],
            "limit": 2
        }));
        let table = compile_and_run(&registry, &cache, &q).await.unwrap();
        assert!(table.truncated);
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.row_count, 2);
    }

    #[tokio::test]
    async fn integer_division_yields_reals_and_nullif_guards_zero() {
        let registry = seeded_registry().await;
        let id = register_sales(&registry);
        let cache = QueryCache::default();

        let q = spec(serde_json::json!({
            "dataset_id": id,
            "filters": [{"col": "year", "op": "=", "value": 2025}],
            "group_by": ["account"],
            "aggregations": [
                {"as": "total", "agg": "sum", "col": "returns"},
                {"as": "quality_cnt", "agg": "sum", "col": "quality"}
            ],
            "derived": [{"as": "quality_rate", "expr": "quality_cnt / nullif(total, 0)"}],
            "sort": [{"col": "account", "dir": "asc"}]
        }));
        let table = compile_and_run(&registry, &cache, &q).await.unwrap();

        assert_eq!(
            table.columns,
            vec!["account", "total", "quality_cnt", "quality_rate"]
        );
        // acme: 6 / 14, and DuckDB's `/` divides integers as reals
        let rate = table.rows[0][3].as_f64().unwrap();
        assert!((rate - 6.0 / 14.0).abs() < 1e-9);
        // globex: 0 / nullif(8, 0) = 0.0
        assert_eq!(table.rows[1][3].as_f64(), Some(0.0));
    }

    #[tokio::test]
    async fn division_by_zero_through_nullif_is_null() {
        let registry = seeded_registry().await;
        let id = register_sales(&registry);
        let cache = QueryCache::default();

        // month 2025-02 for globex has returns = 0: total is 0 per group
        let q = spec(serde_json::json!({
            "dataset_id": id,
            "filters": [{"col": "account", "op": "=", "value": "globex"}],
            "group_by": ["month"],
            "aggregations": [
                {"as": "total", "agg": "sum", "col": "returns"},
                {"as": "quality_cnt", "agg": "sum", "col": "quality"}
            ],
            "derived": [{"as": "rate", "expr": "quality_cnt / nullif(total, 0)"}],
            "sort": [{"col": "month", "dir": "asc"}]
        }));
        let table = compile_and_run(&registry, &cache, &q).await.unwrap();
        // 2025-02: nullif(0, 0) → NULL → division result NULL, preserved
        assert_eq!(table.rows[1][3], Json::Null);
    }

    #[tokio::test]
    async fn bare_division_by_zero_is_null() {
        let registry = seeded_registry().await;
        let id = register_sales(&registry);
        let cache = QueryCache::default();

        let q = spec(serde_json::json!({
            "dataset_id": id,
            "filters": [
                {"col": "account", "op": "=", "value": "globex"},
                {"col": "month", "op": "=", "value": "2025-02"}
            ],
            "group_by": ["month"],
            "aggregations": [
                {"as": "total", "agg": "sum", "col": "returns"},
                {"as": "quality_cnt", "agg": "sum", "col": "quality"}
            ],
            "derived": [{"as": "rate", "expr": "quality_cnt / total"}]
        }));
        let table = compile_and_run(&registry, &cache, &q).await.unwrap();
        // total is 0; DuckDB division by zero yields NULL, preserved as-is
        assert_eq!(table.rows[0][3], Json::Null);
    }

    #[tokio::test]
    async fn nunique_and_count_star() {
        let registry = seeded_registry().await;
        let id = register_sales(&registry);
        let cache = QueryCache::default();

        let q = spec(serde_json::json!({
            "dataset_id": id,
            "aggregations": [
                {"as": "rows", "agg": "count", "col": "*"},
                {"as": "accounts", "agg": "nunique", "col": "account"}
            ]
        }));
        let table = compile_and_run(&registry, &cache, &q).await.unwrap();
        // Empty group_by with aggregations: a single row
        assert_eq!(table.row_count, 1);
        assert_eq!(table.rows[0][0], Json::from(5));
        assert_eq!(table.rows[0][1], Json::from(3));
    }

    #[tokio::test]
    async fn unknown_dataset_maps_to_dataset_not_found() {
        let registry = seeded_registry().await;
        let cache = QueryCache::default();
        let q = spec(serde_json::json!({"dataset_id": "ds_ghost"}));
        let err = compile_and_run(&registry, &cache, &q).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::DatasetNotFound);
    }

    #[tokio::test]
    async fn repeated_specs_hit_the_cache() {
        let registry = seeded_registry().await;
        let id = register_sales(&registry);
        let cache = QueryCache::default();

        let q = spec(serde_json::json!({
            "dataset_id": id,
            "group_by": ["account"],
            "aggregations": [{"as": "total", "agg": "sum", "col": "returns"}],
            "sort": [{"col": "account", "dir": "asc"}]
        }));
        let first = compile_and_run(&registry, &cache, &q).await.unwrap();

        // Mutate the table behind the cache's back; a hit returns the
        // memoized result, not a re-execution.
        registry
            .db()
            .run(|conn| {
                conn.execute_batch("DELETE FROM t_sales")?;
                Ok(())
            })
            .await
            .unwrap();

        let second = compile_and_run(&registry, &cache, &q).await.unwrap();
        assert_eq!(first.rows, second.rows);
    }
}
