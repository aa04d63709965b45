//! Per-turn state shared by tool invocations.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::charts::ChartSpec;
use crate::query::QueryResult;

/// Filters supplied with the inbound request.
///
/// Query tool arguments the model leaves out fall back to these.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_from: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_to: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub segment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
}

impl Filters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dates(mut self, from: NaiveDate, to: NaiveDate) -> Self {
        self.date_from = Some(from);
        self.date_to = Some(to);
        self
    }

    pub fn with_segment(mut self, segment: impl Into<String>) -> Self {
        self.segment = Some(segment.into());
        self
    }

    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = Some(channel.into());
        self
    }

    /// Fill unset dates from the given defaults.
    pub fn with_default_dates(mut self, from: NaiveDate, to: NaiveDate) -> Self {
        self.date_from.get_or_insert(from);
        self.date_to.get_or_insert(to);
        self
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

/// Results and charts produced so far in the current turn.
#[derive(Debug, Clone)]
pub struct ToolContext {
    filters: Filters,
    results: Vec<(String, QueryResult)>,
    charts: Vec<ChartSpec>,
}

impl ToolContext {
    /// `filters` should already carry effective dates.
    pub fn new(filters: Filters) -> Self {
        Self {
            filters,
            results: Vec::new(),
            charts: Vec::new(),
        }
    }

    pub fn filters(&self) -> &Filters {
        &self.filters
    }

    /// Keep a result for later tools and return its id (`result_1`, ...).
    pub fn store_result(&mut self, result: QueryResult) -> String {
        let id = format!("result_{}", self.results.len() + 1);
        self.results.push((id.clone(), result));
        id
    }

    /// The result with `id`, or the latest one when `id` is `None`.
    pub fn result(&self, id: Option<&str>) -> Option<&QueryResult> {
        match id {
            Some(id) => self
                .results
                .iter()
                .find(|(rid, _)| rid == id)
                .map(|(_, r)| r),
            None => self.results.last().map(|(_, r)| r),
        }
    }

    pub fn result_ids(&self) -> Vec<&str> {
        self.results.iter().map(|(id, _)| id.as_str()).collect()
    }

    pub fn push_chart(&mut self, chart: ChartSpec) {
        self.charts.push(chart);
    }

    pub fn latest_chart(&self) -> Option<&ChartSpec> {
        self.charts.last()
    }

    /// Consume the context, yielding every result and the latest chart.
    pub fn into_outputs(self) -> (Vec<QueryResult>, Option<ChartSpec>) {
        let results = self.results.into_iter().map(|(_, r)| r).collect();
        (results, self.charts.into_iter().last())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    #[test]
    fn test_default_dates_fill_only_unset() {
        let filters = Filters::new()
            .with_segment("SME")
            .with_default_dates(date("2025-08-01"), date("2025-09-18"));
        assert_eq!(filters.date_from, Some(date("2025-08-01")));

        let explicit = Filters::new()
            .with_dates(date("2025-09-01"), date("2025-09-10"))
            .with_default_dates(date("2025-08-01"), date("2025-09-18"));
        assert_eq!(explicit.date_from, Some(date("2025-09-01")));
        assert!(Filters::new().is_empty());
    }

    #[test]
    fn test_results_are_numbered_and_latest_is_default() {
        let mut ctx = ToolContext::new(Filters::new());
        assert!(ctx.result(None).is_none());

        let first = ctx.store_result(QueryResult::new("A", vec![], vec![]));
        let second = ctx.store_result(QueryResult::new("B", vec![], vec![]));

        assert_eq!((first.as_str(), second.as_str()), ("result_1", "result_2"));
        assert_eq!(ctx.result(None).unwrap().template, "B");
        assert_eq!(ctx.result(Some("result_1")).unwrap().template, "A");
        assert!(ctx.result(Some("result_9")).is_none());
    }
}
