//! Declarative chart specifications built from query results.
//!
//! The builder validates the requested chart kind and axis fields and emits a
//! renderer-agnostic description; drawing is left to whoever consumes it.

mod spec;

pub use spec::{AxisMapping, ChartKind, ChartSpec, DataPoint, Series};

use std::str::FromStr;

use crate::error::ChartError;
use crate::query::{QueryResult, Value};

/// Keywords that mark a column as a time axis.
const TIME_HINTS: &[&str] = &["date", "time", "month", "day"];

/// Preferred y-axis columns, in priority order.
const Y_PRIORITY: &[&str] = &["revenue", "spend", "roas", "cost", "amount", "value", "count"];

/// Requested chart kind, before `auto` is resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChartRequest {
    Auto,
    Kind(ChartKind),
}

impl FromStr for ChartRequest {
    type Err = ChartError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "auto" | "" => Ok(ChartRequest::Auto),
            other => other.parse().map(ChartRequest::Kind),
        }
    }
}

/// Build a chart spec from `result`.
///
/// `chart_type` must be one of the supported kinds or `auto`. Every field
/// named in `mapping` must be a column of `result`; x/y fields left unset are
/// auto-detected.
pub fn build(
    result: &QueryResult,
    chart_type: &str,
    mapping: &AxisMapping,
    title: &str,
) -> Result<ChartSpec, ChartError> {
    let request: ChartRequest = chart_type.parse()?;

    for field in mapping.fields() {
        if !result.has_column(field) {
            return Err(ChartError::UnknownField {
                field: field.to_string(),
                available: result.columns.clone(),
            });
        }
    }

    let kind = match request {
        ChartRequest::Kind(kind) => kind,
        ChartRequest::Auto => suggest_kind(result),
    };

    let x = match &mapping.x {
        Some(x) => x.clone(),
        None => detect_x(result).ok_or(ChartError::NoColumns)?,
    };
    let y = match &mapping.y {
        Some(y) => y.clone(),
        None => detect_y(result, &x).ok_or(ChartError::NoColumns)?,
    };
    let color = mapping.color.clone();

    let series = build_series(result, &x, &y, color.as_deref());

    tracing::debug!(
        template = %result.template,
        kind = %kind,
        x = %x,
        y = %y,
        points = result.row_count(),
        "Built chart spec"
    );

    Ok(ChartSpec {
        kind,
        title: title.to_string(),
        x,
        y,
        color,
        series,
        data_points: result.row_count(),
        template: result.template.clone(),
    })
}

/// Pick a chart kind from the shape of the data.
pub fn suggest_kind(result: &QueryResult) -> ChartKind {
    if result.row_count() <= 2 {
        return ChartKind::Bar;
    }

    let numeric = result.numeric_columns().len();
    let categorical = result.text_columns().len() + result.date_columns().len();
    let rows = result.row_count();

    if categorical == 1 && numeric == 1 {
        if rows > 10 {
            if has_time_column(result) {
                ChartKind::Line
            } else {
                ChartKind::Bar
            }
        } else if rows <= 8 {
            ChartKind::Pie
        } else {
            ChartKind::Bar
        }
    } else if has_time_column(result) && numeric >= 1 {
        ChartKind::Line
    } else if numeric >= 2 && categorical == 0 {
        ChartKind::Scatter
    } else {
        ChartKind::Bar
    }
}

fn is_time_like(column: &str) -> bool {
    let lower = column.to_lowercase();
    TIME_HINTS.iter().any(|hint| lower.contains(hint))
}

fn has_time_column(result: &QueryResult) -> bool {
    !result.date_columns().is_empty() || result.columns.iter().any(|c| is_time_like(c))
}

fn detect_x(result: &QueryResult) -> Option<String> {
    result
        .columns
        .iter()
        .find(|c| is_time_like(c))
        .map(String::as_str)
        .or_else(|| result.text_columns().first().copied())
        .or_else(|| result.columns.first().map(String::as_str))
        .map(str::to_string)
}

fn detect_y(result: &QueryResult, x: &str) -> Option<String> {
    let numeric: Vec<&str> = result
        .numeric_columns()
        .into_iter()
        .filter(|c| *c != x)
        .collect();

    Y_PRIORITY
        .iter()
        .find_map(|keyword| {
            numeric
                .iter()
                .find(|c| c.to_lowercase().contains(keyword))
                .copied()
        })
        .or_else(|| numeric.first().copied())
        .or_else(|| result.columns.iter().map(String::as_str).rfind(|c| *c != x))
        .map(str::to_string)
}

/// One series per distinct color value (first-appearance order), or a
/// single series named after `y` when no color field is set.
fn build_series(result: &QueryResult, x: &str, y: &str, color: Option<&str>) -> Vec<Series> {
    let mut series: Vec<Series> = Vec::new();

    for row in &result.rows {
        let name = match color {
            Some(c) => series_name(QueryResult::cell(row, c)),
            None => y.to_string(),
        };
        let point = DataPoint {
            x: QueryResult::cell(row, x).clone(),
            y: QueryResult::cell(row, y).clone(),
        };

        match series.iter_mut().find(|s| s.name == name) {
            Some(existing) => existing.points.push(point),
            None => series.push(Series {
                name,
                points: vec![point],
            }),
        }
    }

    series
}

fn series_name(value: &Value) -> String {
    match value {
        Value::Null => "(none)".to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::Row;
    use chrono::NaiveDate;

    fn campaigns(n: usize) -> QueryResult {
        let rows = (0..n)
            .map(|i| {
                Row::from([
                    ("campaign".to_string(), Value::from(format!("C{}", i))),
                    ("revenue".to_string(), Value::Float(100.0 * i as f64)),
                ])
            })
            .collect();
        QueryResult::new("TOP_CAMPAIGNS", vec!["campaign".into(), "revenue".into()], rows)
    }

    #[test]
    fn test_rejects_unknown_fields_for_every_axis() {
        let result = campaigns(4);
        let mappings = [
            AxisMapping::new().with_x("nope"),
            AxisMapping::new().with_y("nope"),
            AxisMapping::new().with_color("nope"),
        ];
        for mapping in mappings {
            let err = build(&result, "bar", &mapping, "t").unwrap_err();
            assert!(matches!(err, ChartError::UnknownField { ref field, .. } if field == "nope"));
        }
    }

    #[test]
    fn test_rejects_unknown_fields_even_on_empty_results() {
        let result = QueryResult::new("T", vec!["a".into()], vec![]);
        let err = build(&result, "line", &AxisMapping::new().with_y("b"), "t").unwrap_err();
        assert!(matches!(err, ChartError::UnknownField { .. }));
    }

    #[test]
    fn test_rejects_unsupported_chart_type() {
        let err = build(&campaigns(3), "radar", &AxisMapping::new(), "t").unwrap_err();
        assert_eq!(err, ChartError::UnsupportedChartType("radar".to_string()));
    }

    #[test]
    fn test_auto_detects_axes() {
        let spec = build(&campaigns(3), "bar", &AxisMapping::new(), "Revenue").unwrap();
        assert_eq!(spec.kind, ChartKind::Bar);
        assert_eq!(spec.x, "campaign");
        assert_eq!(spec.y, "revenue");
        assert_eq!(spec.series.len(), 1);
        assert_eq!(spec.series[0].points.len(), 3);
    }

    #[test]
    fn test_suggest_kind() {
        assert_eq!(suggest_kind(&campaigns(2)), ChartKind::Bar);
        assert_eq!(suggest_kind(&campaigns(6)), ChartKind::Pie);
        assert_eq!(suggest_kind(&campaigns(9)), ChartKind::Bar);

        let daily: Vec<Row> = (1..=12)
            .map(|d| {
                Row::from([
                    (
                        "month".to_string(),
                        Value::Date(NaiveDate::from_ymd_opt(2025, 8, d).unwrap()),
                    ),
                    ("revenue".to_string(), Value::Float(d as f64)),
                ])
            })
            .collect();
        let daily = QueryResult::new("KPI_SUMMARY", vec!["month".into(), "revenue".into()], daily);
        assert_eq!(suggest_kind(&daily), ChartKind::Line);
    }

    #[test]
    fn test_color_groups_series_in_first_appearance_order() {
        let rows = [("Search", "Retail", 1.0), ("Email", "SME", 2.0), ("Social", "Retail", 3.0)]
            .iter()
            .map(|(channel, segment, spend)| {
                Row::from([
                    ("channel".to_string(), Value::from(*channel)),
                    ("segment".to_string(), Value::from(*segment)),
                    ("marketing_spend".to_string(), Value::Float(*spend)),
                ])
            })
            .collect();
        let result = QueryResult::new(
            "T",
            vec!["channel".into(), "segment".into(), "marketing_spend".into()],
            rows,
        );

        let spec = build(
            &result,
            "bar",
            &AxisMapping::new()
                .with_x("channel")
                .with_y("marketing_spend")
                .with_color("segment"),
            "Spend",
        )
        .unwrap();

        let names: Vec<&str> = spec.series.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["Retail", "SME"]);
        assert_eq!(spec.series[0].points.len(), 2);
    }
}
