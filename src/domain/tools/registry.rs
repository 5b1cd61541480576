//! Static tool registry
//!
//! Declares every backend capability the model may invoke: name, purpose,
//! and argument schema. The schemas ship to the provider with each
//! completion request; the executor re-validates arguments on arrival.
//! No tool outside this table is ever dispatched.

use std::sync::LazyLock;

use serde_json::{Value as Json, json};

/// The closed set of callable tools
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolName {
    CreateDataset,
    GetSchema,
    SampleRows,
    RunQuery,
    Plot,
    ResolveFields,
}

impl ToolName {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::CreateDataset => "create_dataset",
            Self::GetSchema => "get_schema",
            Self::SampleRows => "sample_rows",
            Self::RunQuery => "run_query",
            Self::Plot => "plot",
            Self::ResolveFields => "resolve_fields",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "create_dataset" => Some(Self::CreateDataset),
            "get_schema" => Some(Self::GetSchema),
            "sample_rows" => Some(Self::SampleRows),
            "run_query" => Some(Self::RunQuery),
            "plot" => Some(Self::Plot),
            "resolve_fields" => Some(Self::ResolveFields),
            _ => None,
        }
    }
}

/// One tool declaration as shipped to the LLM provider
#[derive(Debug, Clone)]
pub struct ToolDecl {
    pub name: &'static str,
    pub description: &'static str,
    /// JSON Schema of the arguments object
    pub parameters: Json,
}

static DECLARATIONS: LazyLock<Vec<ToolDecl>> = LazyLock::new(|| {
    vec![
        ToolDecl {
            name: "create_dataset",
            description: "Register a previously uploaded delimited-text file as a queryable dataset. \
                          Returns the dataset id, its column schema, and the row count.",
            parameters: json!({
                "type": "object",
                "properties": {
                    "file_id": {"type": "string", "description": "Id returned by the upload endpoint"},
                    "sheet": {"type": "string", "description": "Spreadsheet sheet name (spreadsheets are handled by the upload collaborator)"},
                    "header_row": {"type": "integer", "minimum": 1, "description": "1-based header row; rows above it are skipped"}
                },
                "required": ["file_id"]
            }),
        },
        ToolDecl {
            name: "get_schema",
            description: "Return a dataset's column schema: names, types, null ratios, example values. \
                          Call this before querying.",
            parameters: json!({
                "type": "object",
                "properties": {
                    "dataset_id": {"type": "string"}
                },
                "required": ["dataset_id"]
            }),
        },
        ToolDecl {
            name: "sample_rows",
            description: "Return the first rows of a dataset (deterministic prefix, at most 100).",
            parameters: json!({
                "type": "object",
                "properties": {
                    "dataset_id": {"type": "string"},
                    "n": {"type": "integer", "minimum": 1, "maximum": 100, "default": 5},
                    "columns": {"type": "array", "items": {"type": "string"}, "description": "Optional projection"}
                },
                "required": ["dataset_id"]
            }),
        },
        ToolDecl {
            name: "run_query",
            description: "Execute a structured query: filter, group, aggregate, derive, sort, limit. \
                          All computation happens here; results include columns and rows.",
            parameters: json!({
                "type": "object",
                "properties": {
                    "dataset_id": {"type": "string"},
                    "filters": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "col": {"type": "string"},
                                "op": {"type": "string", "enum": ["=", "!=", ">", ">=", "<", "<=", "in", "between", "contains", "is_null"]},
                                "value": {"description": "Scalar for comparisons, list for in, two-element list for between, absent for is_null"}
                            },
                            "required": ["col", "op"]
                        }
                    },
                    "group_by": {"type": "array", "items": {"type": "string"}},
                    "aggregations": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "as": {"type": "string", "description": "Output alias, e.g. total"},
                                "agg": {"type": "string", "enum": ["sum", "avg", "min", "max", "count", "nunique"]},
                                "col": {"type": "string", "description": "Source column, or \"*\" for count"}
                            },
                            "required": ["as", "agg", "col"]
                        }
                    },
                    "derived": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "as": {"type": "string"},
                                "expr": {"type": "string", "description": "Arithmetic over aggregation aliases and grouped columns; functions: nullif, coalesce, round, abs. Example: quality_cnt / nullif(total, 0)"}
                            },
                            "required": ["as", "expr"]
                        }
                    },
                    "sort": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "col": {"type": "string"},
                                "dir": {"type": "string", "enum": ["asc", "desc"]}
                            },
                            "required": ["col"]
                        }
                    },
                    "limit": {"type": "integer", "minimum": 1, "maximum": 10000}
                },
                "required": ["dataset_id"]
            }),
        },
        ToolDecl {
            name: "plot",
            description: "Build a chart from the most recent run_query result. \
                          x, y, and series must be columns of that result.",
            parameters: json!({
                "type": "object",
                "properties": {
                    "chart_type": {"type": "string", "enum": ["line", "bar", "pie", "scatter", "area"]},
                    "title": {"type": "string"},
                    "x": {"type": "string", "description": "Category column (pie: slice labels)"},
                    "y": {"type": "string", "description": "Value column (pie: slice values)"},
                    "series": {"type": "string", "description": "Optional column; each distinct value becomes a series"},
                    "y_format": {"type": "string", "enum": ["plain", "percent"], "default": "plain"}
                },
                "required": ["chart_type", "title", "x", "y"]
            }),
        },
        ToolDecl {
            name: "resolve_fields",
            description: "Map free-form terms to actual dataset column names when the user's wording \
                          does not match the schema exactly.",
            parameters: json!({
                "type": "object",
                "properties": {
                    "dataset_id": {"type": "string"},
                    "terms": {"type": "array", "items": {"type": "string"}}
                },
                "required": ["dataset_id", "terms"]
            }),
        },
    ]
});

/// All registered tool declarations
pub fn declarations() -> &'static [ToolDecl] {
    &DECLARATIONS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_tool_is_declared_exactly_once() {
        let names: Vec<&str> = declarations().iter().map(|d| d.name).collect();
        assert_eq!(
            names,
            vec![
                "create_dataset",
                "get_schema",
                "sample_rows",
                "run_query",
                "plot",
                "resolve_fields"
            ]
        );
    }

    #[test]
    fn declared_names_round_trip_through_parse() {
        for decl in declarations() {
            let parsed = ToolName::parse(decl.name).expect("declared tool parses");
            assert_eq!(parsed.as_str(), decl.name);
        }
        assert!(ToolName::parse("drop_table").is_none());
    }

    #[test]
    fn schemas_declare_required_fields() {
        for decl in declarations() {
            assert_eq!(decl.parameters["type"], "object", "{}", decl.name);
            assert!(
                decl.parameters["required"].is_array(),
                "{} lacks required list",
                decl.name
            );
        }
    }

    #[test]
    fn run_query_schema_pins_the_operator_whitelist() {
        let run_query = declarations().iter().find(|d| d.name == "run_query").unwrap();
        let ops = &run_query.parameters["properties"]["filters"]["items"]["properties"]["op"]["enum"];
        assert_eq!(ops.as_array().unwrap().len(), 10);
        let aggs = &run_query.parameters["properties"]["aggregations"]["items"]["properties"]["agg"]["enum"];
        assert_eq!(aggs.as_array().unwrap().len(), 6);
    }
}
