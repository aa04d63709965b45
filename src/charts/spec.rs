//! Chart spec types.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ChartError;
use crate::query::Value;

/// Supported chart kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartKind {
    Bar,
    Line,
    Scatter,
    Pie,
    Funnel,
}

impl FromStr for ChartKind {
    type Err = ChartError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "bar" => Ok(ChartKind::Bar),
            "line" => Ok(ChartKind::Line),
            "scatter" => Ok(ChartKind::Scatter),
            "pie" => Ok(ChartKind::Pie),
            "funnel" => Ok(ChartKind::Funnel),
            _ => Err(ChartError::UnsupportedChartType(s.to_string())),
        }
    }
}

impl fmt::Display for ChartKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChartKind::Bar => "bar",
            ChartKind::Line => "line",
            ChartKind::Scatter => "scatter",
            ChartKind::Pie => "pie",
            ChartKind::Funnel => "funnel",
        };
        f.write_str(name)
    }
}

/// Which result columns feed which visual channel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AxisMapping {
    pub x: Option<String>,
    pub y: Option<String>,
    pub color: Option<String>,
}

impl AxisMapping {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_x(mut self, x: impl Into<String>) -> Self {
        self.x = Some(x.into());
        self
    }

    pub fn with_y(mut self, y: impl Into<String>) -> Self {
        self.y = Some(y.into());
        self
    }

    pub fn with_color(mut self, color: impl Into<String>) -> Self {
        self.color = Some(color.into());
        self
    }

    /// Every field the mapping references.
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        [&self.x, &self.y, &self.color]
            .into_iter()
            .filter_map(|f| f.as_deref())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    pub x: Value,
    pub y: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Series {
    pub name: String,
    pub points: Vec<DataPoint>,
}

/// Renderer-agnostic chart description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartSpec {
    pub kind: ChartKind,
    pub title: String,
    /// Column bound to the x axis (or slice labels for pie/funnel).
    pub x: String,
    /// Column bound to the y axis (or slice values for pie/funnel).
    pub y: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    pub series: Vec<Series>,
    pub data_points: usize,
    /// Template that produced the underlying rows.
    pub template: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chart_kind_parse() {
        assert_eq!("Line".parse::<ChartKind>().unwrap(), ChartKind::Line);
        assert!(matches!(
            "heatmap".parse::<ChartKind>(),
            Err(ChartError::UnsupportedChartType(_))
        ));
    }

    #[test]
    fn test_mapping_fields() {
        let mapping = AxisMapping::new().with_x("a").with_color("c");
        assert_eq!(mapping.fields().collect::<Vec<_>>(), vec!["a", "c"]);
    }
}
