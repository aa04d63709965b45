//! In-memory store serving canned rows per template.
//!
//! Used by the test suite and by the CLI's `--fixture` mode. Every call is
//! recorded so callers can assert how (and whether) the store was reached.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::db::{DataStore, RowSet};
use crate::error::DatabaseError;
use crate::query::catalog;
use crate::query::{ParamValue, QueryTemplate, Row, Value};

/// One recorded fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct FixtureCall {
    pub template: String,
    pub params: Vec<ParamValue>,
}

/// Canned-row store.
#[derive(Debug, Default)]
pub struct FixtureStore {
    tables: HashMap<String, RowSet>,
    calls: Mutex<Vec<FixtureCall>>,
    unavailable: bool,
    failing: bool,
}

impl FixtureStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `rows` (with `columns` in select order) for `template`.
    pub fn with_rows(mut self, template: impl Into<String>, columns: &[&str], rows: Vec<Row>) -> Self {
        self.tables.insert(
            template.into(),
            RowSet {
                columns: columns.iter().map(|c| c.to_string()).collect(),
                rows,
            },
        );
        self
    }

    /// Make every call fail as if no connection could be acquired.
    pub fn unavailable(mut self) -> Self {
        self.unavailable = true;
        self
    }

    /// Make every call fail as if the query itself errored.
    pub fn failing(mut self) -> Self {
        self.failing = true;
        self
    }

    pub fn calls(&self) -> Vec<FixtureCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|c| c.len()).unwrap_or_default()
    }

    /// Small marketing dataset covering every built-in template.
    pub fn demo() -> Self {
        let campaign_columns = [
            "campaign",
            "marketing_spend",
            "revenue",
            "applications",
            "funded_loans",
            "roas",
        ];
        let campaigns = demo_campaigns();

        Self::new()
            .with_rows(catalog::TOP_CAMPAIGNS, &campaign_columns, campaigns.clone())
            .with_rows(catalog::ALL_CAMPAIGNS, &campaign_columns, campaigns)
            .with_rows(
                catalog::CHANNEL_PERFORMANCE,
                &[
                    "channel",
                    "marketing_spend",
                    "revenue",
                    "applications",
                    "funded_loans",
                    "roas",
                ],
                vec![
                    grouped("channel", "Search", 42_000.0, 126_000.0, 610, 140),
                    grouped("channel", "Social", 31_500.0, 72_450.0, 520, 96),
                    grouped("channel", "Email", 8_200.0, 36_900.0, 240, 71),
                    grouped("channel", "Display", 19_800.0, 25_740.0, 310, 38),
                    grouped("channel", "Direct", 0.0, 18_300.0, 150, 44),
                ],
            )
            .with_rows(
                catalog::SEGMENT_ANALYSIS,
                &[
                    "segment",
                    "marketing_spend",
                    "revenue",
                    "applications",
                    "funded_loans",
                    "avg_approved_amount",
                    "roas",
                ],
                vec![
                    with_cell(
                        grouped("segment", "Retail", 54_000.0, 140_400.0, 980, 220),
                        "avg_approved_amount",
                        Value::Float(12_400.0),
                    ),
                    with_cell(
                        grouped("segment", "SME", 33_000.0, 99_000.0, 450, 120),
                        "avg_approved_amount",
                        Value::Float(48_750.0),
                    ),
                    with_cell(
                        grouped("segment", "Premium", 14_500.0, 39_990.0, 400, 49),
                        "avg_approved_amount",
                        Value::Float(31_200.0),
                    ),
                ],
            )
            .with_rows(
                catalog::KPI_SUMMARY,
                &[
                    "month",
                    "marketing_spend",
                    "revenue",
                    "applications",
                    "funded_loans",
                    "funded_amount",
                    "funding_rate",
                    "roas",
                    "cost_per_funded_loan",
                ],
                demo_kpis(),
            )
    }
}

#[async_trait]
impl DataStore for FixtureStore {
    async fn fetch(
        &self,
        template: &QueryTemplate,
        params: &[ParamValue],
    ) -> Result<RowSet, DatabaseError> {
        if self.unavailable {
            return Err(DatabaseError::Pool("fixture store marked unavailable".to_string()));
        }

        if let Ok(mut calls) = self.calls.lock() {
            calls.push(FixtureCall {
                template: template.id().to_string(),
                params: params.to_vec(),
            });
        }

        if self.failing {
            return Err(DatabaseError::Query(
                "relation \"curated_pl_marketing_wide_synth\" does not exist".to_string(),
            ));
        }

        self.tables
            .get(template.id())
            .cloned()
            .ok_or_else(|| DatabaseError::MissingFixture(template.id().to_string()))
    }

    async fn ping(&self) -> Result<(), DatabaseError> {
        if self.unavailable {
            return Err(DatabaseError::Pool("fixture store marked unavailable".to_string()));
        }
        Ok(())
    }

    fn backend(&self) -> &str {
        "fixture"
    }
}

fn grouped(label_column: &str, label: &str, spend: f64, revenue: f64, applications: i64, funded: i64) -> Row {
    let roas = if spend == 0.0 {
        Value::Null
    } else {
        Value::Float(revenue / spend)
    };
    Row::from([
        (label_column.to_string(), Value::from(label)),
        ("marketing_spend".to_string(), Value::Float(spend)),
        ("revenue".to_string(), Value::Float(revenue)),
        ("applications".to_string(), Value::Integer(applications)),
        ("funded_loans".to_string(), Value::Integer(funded)),
        ("roas".to_string(), roas),
    ])
}

fn with_cell(mut row: Row, column: &str, value: Value) -> Row {
    row.insert(column.to_string(), value);
    row
}

/// Eight campaigns in no particular order; two pairs tie on ROAS.
fn demo_campaigns() -> Vec<Row> {
    vec![
        grouped("campaign", "Summer Refi Push", 12_000.0, 30_000.0, 140, 31),
        grouped("campaign", "Brand Search Core", 9_000.0, 36_000.0, 210, 58),
        grouped("campaign", "Debt Consolidation Q3", 15_000.0, 45_000.0, 260, 52),
        grouped("campaign", "Auto Loan Retarget", 4_000.0, 16_000.0, 90, 21),
        grouped("campaign", "Email Win-back", 2_500.0, 12_500.0, 60, 19),
        grouped("campaign", "Display Awareness", 18_000.0, 14_400.0, 200, 12),
        grouped("campaign", "Premium Cross-sell", 6_000.0, 18_000.0, 70, 16),
        grouped("campaign", "Social Lookalike", 11_000.0, 22_000.0, 180, 27),
    ]
}

fn demo_kpis() -> Vec<Row> {
    let days = [
        (1, 2_100.0, 5_900.0, 41, 9, 92_000.0),
        (2, 2_300.0, 6_200.0, 44, 11, 118_000.0),
        (3, 1_900.0, 6_050.0, 38, 10, 104_500.0),
        (4, 2_400.0, 7_300.0, 47, 13, 139_000.0),
        (5, 2_200.0, 7_800.0, 45, 14, 151_250.0),
    ];
    days.iter()
        .filter_map(|(day, spend, revenue, apps, funded, amount)| {
            let month = NaiveDate::from_ymd_opt(2025, 8, *day)?;
            let apps = *apps as f64;
            let funded_f = *funded as f64;
            Some(Row::from([
                ("month".to_string(), Value::Date(month)),
                ("marketing_spend".to_string(), Value::Float(*spend)),
                ("revenue".to_string(), Value::Float(*revenue)),
                ("applications".to_string(), Value::Integer(apps as i64)),
                ("funded_loans".to_string(), Value::Integer(*funded)),
                ("funded_amount".to_string(), Value::Float(*amount)),
                ("funding_rate".to_string(), Value::Float(funded_f / apps * 100.0)),
                ("roas".to_string(), Value::Float(revenue / spend)),
                ("cost_per_funded_loan".to_string(), Value::Float(spend / funded_f)),
            ]))
        })
        .collect()
}
