//! Plot spec normalisation
//!
//! Turns the most recent query table plus a PlotSpec into a renderer-neutral
//! chart description (axes, series arrays, legend, optional percent
//! formatting). The option shape is ECharts-compatible but carries no
//! renderer dependency.

use serde::{Deserialize, Serialize};
use serde_json::{Value as Json, json};

use super::error::ToolError;
use super::query::Table;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartType {
    Line,
    Bar,
    Pie,
    Scatter,
    Area,
}

impl ChartType {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Line => "line",
            Self::Bar => "bar",
            Self::Pie => "pie",
            Self::Scatter => "scatter",
            Self::Area => "area",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum YFormat {
    #[default]
    Plain,
    Percent,
}

/// Chart request bound to the latest query result
#[derive(Debug, Clone, Deserialize)]
pub struct PlotSpec {
    pub chart_type: ChartType,
    pub title: String,
    /// Category axis column (pie: the slice label column)
    pub x: String,
    /// Value axis column (pie: the slice value column)
    pub y: String,
    /// Optional pivot column: each distinct value becomes its own series
    #[serde(default)]
    pub series: Option<String>,
    #[serde(default)]
    pub y_format: YFormat,
}

/// Renderer-neutral chart output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChartOutput {
    #[serde(rename = "type")]
    pub chart_type: ChartType,
    pub title: String,
    pub option: Json,
}

/// Build a chart description from the given table
pub fn normalise(table: &Table, spec: &PlotSpec) -> Result<ChartOutput, ToolError> {
    let x_idx = column_index(table, &spec.x)?;
    let y_idx = column_index(table, &spec.y)?;

    let option = match spec.chart_type {
        ChartType::Pie => pie_option(table, spec, x_idx, y_idx),
        ChartType::Scatter => scatter_option(table, spec, x_idx, y_idx),
        ChartType::Line | ChartType::Bar | ChartType::Area => {
            let series_idx = match &spec.series {
                Some(col) => Some(column_index(table, col)?),
                None => None,
            };
            axis_option(table, spec, x_idx, y_idx, series_idx)
        }
    };

    Ok(ChartOutput {
        chart_type: spec.chart_type,
        title: spec.title.clone(),
        option,
    })
}

fn column_index(table: &Table, name: &str) -> Result<usize, ToolError> {
    table
        .columns
        .iter()
        .position(|c| c == name)
        .ok_or_else(|| {
            ToolError::bad_plot(format!(
                "column {name:?} is not in the query result (available: {})",
                table.columns.join(", ")
            ))
        })
}

fn axis_label(y_format: YFormat) -> Json {
    match y_format {
        YFormat::Percent => json!({"formatter": "{value}%"}),
        YFormat::Plain => json!({"formatter": "{value}"}),
    }
}

/// Display label for axis categories and series names
fn label(value: &Json) -> String {
    match value {
        Json::String(s) => s.clone(),
        Json::Null => "null".to_string(),
        other => other.to_string(),
    }
}

fn axis_option(
    table: &Table,
    spec: &PlotSpec,
    x_idx: usize,
    y_idx: usize,
    series_idx: Option<usize>,
) -> Json {
    let mark = match spec.chart_type {
        ChartType::Bar => "bar",
        _ => "line",
    };

    let (x_data, series): (Vec<String>, Vec<Json>) = match series_idx {
        Some(s_idx) => {
            // Pivot: shared x domain in first-appearance order, one series
            // per distinct series value, missing points as null.
            let mut x_domain: Vec<String> = Vec::new();
            let mut series_names: Vec<String> = Vec::new();
            for row in &table.rows {
                let x = label(&row[x_idx]);
                if !x_domain.contains(&x) {
                    x_domain.push(x);
                }
                let name = label(&row[s_idx]);
                if !series_names.contains(&name) {
                    series_names.push(name);
                }
            }

            let mut matrix = vec![vec![Json::Null; x_domain.len()]; series_names.len()];
            for row in &table.rows {
                let x = label(&row[x_idx]);
                let name = label(&row[s_idx]);
                let xi = x_domain.iter().position(|v| *v == x).expect("x in domain");
                let si = series_names
                    .iter()
                    .position(|v| *v == name)
                    .expect("series in names");
                matrix[si][xi] = row[y_idx].clone();
            }

            let series = series_names
                .into_iter()
                .zip(matrix)
                .map(|(name, data)| series_entry(spec.chart_type, mark, name, data))
                .collect();
            (x_domain, series)
        }
        None => {
            let x_data = table.rows.iter().map(|row| label(&row[x_idx])).collect();
            let data: Vec<Json> = table.rows.iter().map(|row| row[y_idx].clone()).collect();
            let series = vec![series_entry(
                spec.chart_type,
                mark,
                spec.y.clone(),
                data,
            )];
            (x_data, series)
        }
    };

    let legend: Vec<Json> = series
        .iter()
        .filter_map(|s| s.get("name").cloned())
        .collect();

    json!({
        "title": {"text": spec.title},
        "tooltip": {"trigger": "axis"},
        "legend": {"data": legend},
        "xAxis": {"type": "category", "data": x_data, "name": spec.x},
        "yAxis": {"type": "value", "name": spec.y, "axisLabel": axis_label(spec.y_format)},
        "series": series,
    })
}

fn series_entry(chart_type: ChartType, mark: &str, name: String, data: Vec<Json>) -> Json {
    let mut entry = json!({
        "name": name,
        "type": mark,
        "data": data,
    });
    match chart_type {
        ChartType::Line => {
            entry["smooth"] = json!(true);
        }
        ChartType::Area => {
            entry["smooth"] = json!(true);
            entry["areaStyle"] = json!({});
        }
        _ => {}
    }
    entry
}

fn pie_option(table: &Table, spec: &PlotSpec, x_idx: usize, y_idx: usize) -> Json {
    // x names the category, y the value; series is ignored for pies
    let data: Vec<Json> = table
        .rows
        .iter()
        .map(|row| json!({"name": label(&row[x_idx]), "value": row[y_idx]}))
        .collect();

    json!({
        "title": {"text": spec.title, "left": "center"},
        "tooltip": {"trigger": "item"},
        "legend": {"orient": "vertical", "left": "left"},
        "series": [{
            "type": "pie",
            "radius": "50%",
            "data": data,
        }],
    })
}

fn scatter_option(table: &Table, spec: &PlotSpec, x_idx: usize, y_idx: usize) -> Json {
    let data: Vec<Json> = table
        .rows
        .iter()
        .map(|row| json!([row[x_idx], row[y_idx]]))
        .collect();

    json!({
        "title": {"text": spec.title},
        "tooltip": {"trigger": "item"},
        "xAxis": {"name": spec.x},
        "yAxis": {"name": spec.y, "axisLabel": axis_label(spec.y_format)},
        "series": [{"type": "scatter", "data": data}],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::error::ErrorCode;

    fn table() -> Table {
        Table {
            columns: vec!["month".into(), "account".into(), "rate".into()],
            rows: vec![
                vec![json!("2025-01"), json!("acme"), json!(0.5)],
                vec![json!("2025-01"), json!("globex"), json!(0.25)],
                vec![json!("2025-02"), json!("acme"), json!(0.75)],
            ],
            row_count: 3,
            truncated: false,
        }
    }

    fn plot(json_spec: serde_json::Value) -> PlotSpec {
        serde_json::from_value(json_spec).unwrap()
    }

    #[test]
    fn line_with_series_pivots_over_shared_domain() {
        let chart = normalise(
            &table(),
            &plot(json!({
                "chart_type": "line",
                "title": "Quality trend",
                "x": "month",
                "y": "rate",
                "series": "account",
                "y_format": "percent"
            })),
        )
        .unwrap();

        assert_eq!(chart.chart_type, ChartType::Line);
        let option = &chart.option;
        assert_eq!(option["xAxis"]["data"], json!(["2025-01", "2025-02"]));
        assert_eq!(option["legend"]["data"], json!(["acme", "globex"]));
        assert_eq!(option["yAxis"]["axisLabel"]["formatter"], "{value}%");

        let series = option["series"].as_array().unwrap();
        assert_eq!(series.len(), 2);
        assert_eq!(series[0]["data"], json!([0.5, 0.75]));
        // globex has no 2025-02 point: padded with null
        assert_eq!(series[1]["data"], json!([0.25, null]));
        assert_eq!(series[0]["smooth"], json!(true));
    }

    #[test]
    fn single_series_keeps_row_order() {
        let chart = normalise(
            &table(),
            &plot(json!({
                "chart_type": "bar",
                "title": "Rates",
                "x": "month",
                "y": "rate"
            })),
        )
        .unwrap();

        let option = &chart.option;
        assert_eq!(
            option["xAxis"]["data"],
            json!(["2025-01", "2025-01", "2025-02"])
        );
        let series = option["series"].as_array().unwrap();
        assert_eq!(series.len(), 1);
        assert_eq!(series[0]["name"], "rate");
        assert_eq!(series[0]["type"], "bar");
        assert_eq!(option["yAxis"]["axisLabel"]["formatter"], "{value}");
    }

    #[test]
    fn area_charts_carry_area_style() {
        let chart = normalise(
            &table(),
            &plot(json!({
                "chart_type": "area",
                "title": "t",
                "x": "month",
                "y": "rate"
            })),
        )
        .unwrap();
        let series = chart.option["series"].as_array().unwrap();
        assert!(series[0].get("areaStyle").is_some());
        assert_eq!(series[0]["type"], "line");
    }

    #[test]
    fn pie_maps_x_to_name_and_y_to_value() {
        let chart = normalise(
            &table(),
            &plot(json!({
                "chart_type": "pie",
                "title": "Share",
                "x": "account",
                "y": "rate",
                "series": "month"
            })),
        )
        .unwrap();

        let data = chart.option["series"][0]["data"].as_array().unwrap();
        assert_eq!(data[0], json!({"name": "acme", "value": 0.5}));
        assert_eq!(data.len(), 3);
    }

    #[test]
    fn scatter_emits_pairs() {
        let chart = normalise(
            &table(),
            &plot(json!({
                "chart_type": "scatter",
                "title": "t",
                "x": "rate",
                "y": "rate"
            })),
        )
        .unwrap();
        let data = chart.option["series"][0]["data"].as_array().unwrap();
        assert_eq!(data[0], json!([0.5, 0.5]));
    }

    #[test]
    fn unknown_columns_are_bad_plot() {
        let err = normalise(
            &table(),
            &plot(json!({
                "chart_type": "line",
                "title": "t",
                "x": "ghost",
                "y": "rate"
            })),
        )
        .unwrap_err();
        assert_eq!(err.code, ErrorCode::BadPlot);

        let err = normalise(
            &table(),
            &plot(json!({
                "chart_type": "line",
                "title": "t",
                "x": "month",
                "y": "rate",
                "series": "ghost"
            })),
        )
        .unwrap_err();
        assert_eq!(err.code, ErrorCode::BadPlot);
    }

    #[test]
    fn unsupported_chart_type_fails_at_parse() {
        let result: Result<PlotSpec, _> = serde_json::from_value(json!({
            "chart_type": "radar",
            "title": "t",
            "x": "a",
            "y": "b"
        }));
        assert!(result.is_err());
    }
}
