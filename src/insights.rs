//! Derived metrics, rankings and trends over query results.
//!
//! Everything here is pure and deterministic: the same result and options
//! always produce the same insight set.

use serde::{Serialize, Serializer};

use crate::query::{QueryResult, Row, Value};

/// Columns that name the entity a row describes, in preference order.
const LABEL_COLUMNS: &[&str] = &["campaign", "channel", "segment", "segment_name"];

/// Columns that order rows in time, in preference order.
const TIME_COLUMNS: &[&str] = &["month", "date", "day", "snapshot_date"];

pub const COST_EFFICIENCY: &str = "cost_efficiency_ratio";
pub const CONVERSION: &str = "conversion_ratio";

const DEFAULT_TOP_N: usize = 3;

/// Relative change over the observed period below which a trend is flat.
const FLAT_THRESHOLD: f64 = 0.01;

/// A ratio that may be undefined because its denominator was zero or absent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Ratio {
    Value(f64),
    Undefined,
}

impl Ratio {
    pub fn of(numerator: Option<f64>, denominator: Option<f64>) -> Self {
        match (numerator, denominator) {
            (Some(n), Some(d)) if d != 0.0 => {
                let r = n / d;
                if r.is_finite() { Ratio::Value(r) } else { Ratio::Undefined }
            }
            _ => Ratio::Undefined,
        }
    }

    pub fn value(&self) -> Option<f64> {
        match self {
            Ratio::Value(v) => Some(*v),
            Ratio::Undefined => None,
        }
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Ratio::Undefined)
    }
}

impl Serialize for Ratio {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Ratio::Value(v) => serializer.serialize_f64(*v),
            Ratio::Undefined => serializer.serialize_str("undefined"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InsightOptions {
    /// Column or derived ratio to rank by. Resolved automatically when unset.
    pub rank_by: Option<String>,
    pub top_n: usize,
}

impl Default for InsightOptions {
    fn default() -> Self {
        Self {
            rank_by: None,
            top_n: DEFAULT_TOP_N,
        }
    }
}

/// Derived ratios for one row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RowRatios {
    pub index: usize,
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost_efficiency_ratio: Option<Ratio>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversion_ratio: Option<Ratio>,
}

/// A row's place in the ranking.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedRow {
    /// 1-based position among ranked rows.
    pub rank: usize,
    /// Position of the row in the source result.
    pub index: usize,
    pub label: String,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnSummary {
    pub column: String,
    pub sum: f64,
    pub mean: f64,
    /// Non-null cells that contributed.
    pub count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendDirection {
    Up,
    Down,
    Flat,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Trend {
    pub metric: String,
    pub over: String,
    pub direction: TrendDirection,
    /// Least-squares slope per time unit (days for date columns).
    pub slope: f64,
    pub points: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Totals {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost_efficiency_ratio: Option<Ratio>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversion_ratio: Option<Ratio>,
}

/// Everything the extractor derives from one result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InsightSet {
    pub template: String,
    pub row_count: usize,
    pub totals: Totals,
    pub rows: Vec<RowRatios>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ranked_by: Option<String>,
    pub top: Vec<RankedRow>,
    pub bottom: Vec<RankedRow>,
    /// Rows left out of the ranking because their metric was undefined.
    pub unranked: usize,
    pub summary: Vec<ColumnSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trend: Option<Trend>,
    pub highlights: Vec<String>,
}

/// Metrics `rank_by` may name for `result`.
pub fn rankable_metrics(result: &QueryResult) -> Vec<String> {
    let mut metrics: Vec<String> = result
        .numeric_columns()
        .into_iter()
        .map(str::to_string)
        .collect();
    if has_cost_columns(result) {
        metrics.push(COST_EFFICIENCY.to_string());
    }
    if has_conversion_columns(result) {
        metrics.push(CONVERSION.to_string());
    }
    metrics
}

/// Analyze `result`.
pub fn analyze(result: &QueryResult, options: &InsightOptions) -> InsightSet {
    let label_column = label_column(result);
    let labels: Vec<String> = result
        .rows
        .iter()
        .enumerate()
        .map(|(i, row)| row_label(row, label_column.as_deref(), i))
        .collect();

    let rows: Vec<RowRatios> = result
        .rows
        .iter()
        .enumerate()
        .map(|(index, row)| RowRatios {
            index,
            label: labels[index].clone(),
            cost_efficiency_ratio: has_cost_columns(result).then(|| cost_efficiency(row)),
            conversion_ratio: has_conversion_columns(result).then(|| conversion(row)),
        })
        .collect();

    let totals = Totals {
        cost_efficiency_ratio: has_cost_columns(result)
            .then(|| Ratio::of(column_sum(result, "revenue"), column_sum(result, "marketing_spend"))),
        conversion_ratio: has_conversion_columns(result)
            .then(|| Ratio::of(column_sum(result, "funded_loans"), column_sum(result, "applications"))),
    };

    let metric = resolve_metric(result, options.rank_by.as_deref());
    let metric_values: Vec<Option<f64>> = match &metric {
        Some(m) => result.rows.iter().map(|row| metric_value(row, m)).collect(),
        None => Vec::new(),
    };

    let mut ranked: Vec<(usize, f64)> = metric_values
        .iter()
        .enumerate()
        .filter_map(|(i, v)| v.map(|v| (i, v)))
        .collect();
    ranked.sort_by(|(ia, a), (ib, b)| {
        b.total_cmp(a)
            .then_with(|| labels[*ia].cmp(&labels[*ib]))
            .then_with(|| ia.cmp(ib))
    });
    let unranked = if metric.is_some() {
        result.row_count() - ranked.len()
    } else {
        0
    };

    let ranked: Vec<RankedRow> = ranked
        .into_iter()
        .enumerate()
        .map(|(pos, (index, value))| RankedRow {
            rank: pos + 1,
            index,
            label: labels[index].clone(),
            value,
        })
        .collect();
    let top: Vec<RankedRow> = ranked.iter().take(options.top_n).cloned().collect();
    let bottom: Vec<RankedRow> = ranked.iter().rev().take(options.top_n).cloned().collect();

    let summary = summarize(result);

    let trend_metric = metric.clone().or_else(|| {
        result
            .has_column("revenue")
            .then(|| "revenue".to_string())
    });
    let trend = trend_metric.and_then(|m| trend(result, &m));

    let mut insights = InsightSet {
        template: result.template.clone(),
        row_count: result.row_count(),
        totals,
        rows,
        ranked_by: metric,
        top,
        bottom,
        unranked,
        summary,
        trend,
        highlights: Vec::new(),
    };
    insights.highlights = highlights(&insights);

    tracing::debug!(
        template = %insights.template,
        rows = insights.row_count,
        ranked_by = ?insights.ranked_by,
        unranked = insights.unranked,
        "Extracted insights"
    );

    insights
}

fn has_cost_columns(result: &QueryResult) -> bool {
    result.has_column("revenue") && result.has_column("marketing_spend")
}

fn has_conversion_columns(result: &QueryResult) -> bool {
    result.has_column("funded_loans") && result.has_column("applications")
}

fn cost_efficiency(row: &Row) -> Ratio {
    Ratio::of(
        QueryResult::cell(row, "revenue").as_f64(),
        QueryResult::cell(row, "marketing_spend").as_f64(),
    )
}

fn conversion(row: &Row) -> Ratio {
    Ratio::of(
        QueryResult::cell(row, "funded_loans").as_f64(),
        QueryResult::cell(row, "applications").as_f64(),
    )
}

fn column_sum(result: &QueryResult, column: &str) -> Option<f64> {
    let values: Vec<f64> = result
        .rows
        .iter()
        .filter_map(|row| QueryResult::cell(row, column).as_f64())
        .collect();
    (!values.is_empty()).then(|| values.iter().sum())
}

fn label_column(result: &QueryResult) -> Option<String> {
    LABEL_COLUMNS
        .iter()
        .find(|c| result.has_column(c))
        .map(|c| c.to_string())
        .or_else(|| result.text_columns().first().map(|c| c.to_string()))
        .or_else(|| result.date_columns().first().map(|c| c.to_string()))
}

fn row_label(row: &Row, column: Option<&str>, index: usize) -> String {
    match column.map(|c| QueryResult::cell(row, c)) {
        Some(Value::Null) | None => format!("row {}", index + 1),
        Some(value) => value.to_string(),
    }
}

/// An explicit `rank_by` wins when it names something rankable; otherwise
/// fall back to ROAS, then cost efficiency, then the first numeric column.
fn resolve_metric(result: &QueryResult, requested: Option<&str>) -> Option<String> {
    let available = rankable_metrics(result);
    if let Some(requested) = requested {
        if available.iter().any(|m| m == requested) {
            return Some(requested.to_string());
        }
        tracing::debug!(requested, "Ignoring unknown ranking metric");
    }

    ["roas", COST_EFFICIENCY]
        .iter()
        .find(|m| available.iter().any(|a| a.as_str() == **m))
        .map(|m| m.to_string())
        .or_else(|| result.numeric_columns().first().map(|c| c.to_string()))
}

fn metric_value(row: &Row, metric: &str) -> Option<f64> {
    match metric {
        COST_EFFICIENCY => cost_efficiency(row).value(),
        CONVERSION => conversion(row).value(),
        column => QueryResult::cell(row, column).as_f64(),
    }
}

fn summarize(result: &QueryResult) -> Vec<ColumnSummary> {
    result
        .numeric_columns()
        .into_iter()
        .filter_map(|column| {
            let values: Vec<f64> = result
                .rows
                .iter()
                .filter_map(|row| QueryResult::cell(row, column).as_f64())
                .collect();
            if values.is_empty() {
                return None;
            }
            let sum: f64 = values.iter().sum();
            Some(ColumnSummary {
                column: column.to_string(),
                sum,
                mean: sum / values.len() as f64,
                count: values.len(),
            })
        })
        .collect()
}

fn time_column(result: &QueryResult) -> Option<String> {
    TIME_COLUMNS
        .iter()
        .find(|c| result.has_column(c))
        .map(|c| c.to_string())
        .or_else(|| result.date_columns().first().map(|c| c.to_string()))
}

fn time_coordinate(value: &Value) -> Option<f64> {
    match value {
        Value::Date(d) => Some(f64::from(chrono::Datelike::num_days_from_ce(d))),
        other => other.as_f64(),
    }
}

fn trend(result: &QueryResult, metric: &str) -> Option<Trend> {
    let over = time_column(result)?;

    let mut points: Vec<(f64, f64)> = result
        .rows
        .iter()
        .filter_map(|row| {
            let x = time_coordinate(QueryResult::cell(row, &over))?;
            let y = metric_value(row, metric)?;
            Some((x, y))
        })
        .collect();
    if points.len() < 2 {
        return None;
    }
    points.sort_by(|a, b| a.0.total_cmp(&b.0));

    let n = points.len() as f64;
    let mean_x = points.iter().map(|(x, _)| x).sum::<f64>() / n;
    let mean_y = points.iter().map(|(_, y)| y).sum::<f64>() / n;
    let sxx: f64 = points.iter().map(|(x, _)| (x - mean_x).powi(2)).sum();
    if sxx == 0.0 {
        return None;
    }
    let sxy: f64 = points
        .iter()
        .map(|(x, y)| (x - mean_x) * (y - mean_y))
        .sum();
    let slope = sxy / sxx;

    let span = points[points.len() - 1].0 - points[0].0;
    let change = slope * span;
    let relative = if mean_y != 0.0 { change / mean_y.abs() } else { change };
    let direction = if relative.abs() < FLAT_THRESHOLD {
        TrendDirection::Flat
    } else if slope > 0.0 {
        TrendDirection::Up
    } else {
        TrendDirection::Down
    };

    Some(Trend {
        metric: metric.to_string(),
        over,
        direction,
        slope,
        points: points.len(),
    })
}

fn highlights(insights: &InsightSet) -> Vec<String> {
    let mut lines = Vec::new();

    if let Some(ratio) = insights.totals.cost_efficiency_ratio {
        lines.push(match ratio {
            Ratio::Value(v) => format!("Overall revenue per unit of spend: {:.2}", v),
            Ratio::Undefined => "Overall revenue per unit of spend is undefined (no spend)".to_string(),
        });
    }
    if let Some(Ratio::Value(v)) = insights.totals.conversion_ratio {
        lines.push(format!("Overall funding rate: {:.1}%", v * 100.0));
    }
    if let (Some(metric), Some(best)) = (&insights.ranked_by, insights.top.first()) {
        lines.push(format!("Top performer by {}: {} ({:.2})", metric, best.label, best.value));
    }
    if insights.unranked > 0 {
        lines.push(format!(
            "{} row(s) have an undefined metric and were not ranked",
            insights.unranked
        ));
    }
    if let Some(trend) = &insights.trend {
        let word = match trend.direction {
            TrendDirection::Up => "upward",
            TrendDirection::Down => "downward",
            TrendDirection::Flat => "flat",
        };
        lines.push(format!("{} trend is {} over {}", trend.metric, word, trend.over));
    }

    lines
}
