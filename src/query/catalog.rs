//! The built-in marketing template catalog.
//!
//! Every template filters on an inclusive snapshot date range and optional
//! segment/channel equality filters. Optional filters are bound as nullable
//! parameters (`$n::text IS NULL OR column = $n`) rather than spliced in.

use crate::error::QueryError;
use crate::query::template::{ParamSpec, ParamValue, QueryTemplate, SortKey, TemplateRegistry};

pub const KPI_SUMMARY: &str = "KPI_SUMMARY";
pub const TOP_CAMPAIGNS: &str = "TOP_CAMPAIGNS";
pub const ALL_CAMPAIGNS: &str = "ALL_CAMPAIGNS";
pub const CHANNEL_PERFORMANCE: &str = "CHANNEL_PERFORMANCE";
pub const SEGMENT_ANALYSIS: &str = "SEGMENT_ANALYSIS";

pub const SEGMENTS: &[&str] = &["Retail", "SME", "Premium"];
pub const CHANNELS: &[&str] = &["Search", "Social", "Email", "Display", "Direct"];

/// Upper bound for the `limit` parameter of ranked templates.
pub const MAX_LIMIT: i64 = 50;
const DEFAULT_TOP_LIMIT: i64 = 10;

const FILTERS: &str = "snapshot_date BETWEEN $1::date AND $2::date
          AND ($3::text IS NULL OR segment_name = $3::text)
          AND ($4::text IS NULL OR first_touch_channel = $4::text)";

const GROUP_METRICS: &str = "SUM(mkt_cost_daily_alloc)::float8 AS marketing_spend,
               SUM(revenue_daily)::float8 AS revenue,
               COUNT(DISTINCT application_id) AS applications,
               SUM(CASE WHEN funded_flag THEN 1 ELSE 0 END)::int8 AS funded_loans";

const ROAS: &str = "CASE WHEN SUM(mkt_cost_daily_alloc) = 0 THEN NULL
                    ELSE (SUM(revenue_daily) / SUM(mkt_cost_daily_alloc))::float8 END AS roas";

const HAVING_ACTIVITY: &str =
    "HAVING SUM(mkt_cost_daily_alloc) > 0 OR SUM(revenue_daily) > 0";

/// Registry holding the built-in catalog.
pub fn builtin_registry() -> Result<TemplateRegistry, QueryError> {
    let mut registry = TemplateRegistry::new();
    for template in builtin_templates() {
        registry.register(template)?;
    }
    Ok(registry)
}

pub fn builtin_templates() -> Vec<QueryTemplate> {
    vec![
        kpi_summary(),
        top_campaigns(),
        all_campaigns(),
        channel_performance(),
        segment_analysis(),
    ]
}

fn with_filters(template: QueryTemplate) -> QueryTemplate {
    template
        .param(ParamSpec::date("date_from", "Start of the snapshot range (YYYY-MM-DD)").required())
        .param(ParamSpec::date("date_to", "End of the snapshot range (YYYY-MM-DD)").required())
        .param(ParamSpec::one_of("segment", "Customer segment filter", SEGMENTS))
        .param(ParamSpec::one_of("channel", "First-touch marketing channel filter", CHANNELS))
        .date_range("date_from", "date_to")
}

fn kpi_summary() -> QueryTemplate {
    let sql = format!(
        "WITH agg AS (
          SELECT snapshot_date::date AS month,
                 SUM(mkt_cost_daily_alloc)::float8 AS marketing_spend,
                 SUM(revenue_daily)::float8 AS revenue,
                 COUNT(DISTINCT application_id) AS applications,
                 SUM(CASE WHEN funded_flag THEN 1 ELSE 0 END)::int8 AS funded_loans,
                 COALESCE(SUM(funded_amt), 0)::float8 AS funded_amount
          FROM curated_pl_marketing_wide_synth
          WHERE {FILTERS}
          GROUP BY snapshot_date::date
        )
        SELECT month, marketing_spend, revenue, applications, funded_loans, funded_amount,
               CASE WHEN applications = 0 THEN NULL
                    ELSE funded_loans::float8 / applications * 100 END AS funding_rate,
               CASE WHEN marketing_spend = 0 THEN NULL
                    ELSE revenue / marketing_spend END AS roas,
               CASE WHEN funded_loans = 0 THEN NULL
                    ELSE marketing_spend / funded_loans END AS cost_per_funded_loan
        FROM agg
        WHERE marketing_spend > 0 OR revenue > 0
        ORDER BY month ASC"
    );

    with_filters(QueryTemplate::new(
        KPI_SUMMARY,
        "Daily marketing spend, revenue, applications, funded loans and derived KPIs (funding rate, ROAS, cost per funded loan), oldest first.",
        sql,
    ))
    .order_by(SortKey::asc("month"))
}

fn campaign_sql(limit: bool) -> String {
    let limit_clause = if limit { "\n        LIMIT $5::int8" } else { "" };
    format!(
        "SELECT campaign_name AS campaign,
               {GROUP_METRICS},
               {ROAS}
        FROM curated_pl_marketing_wide_synth
        WHERE {FILTERS}
          AND campaign_name IS NOT NULL
        GROUP BY campaign_name
        {HAVING_ACTIVITY}
        ORDER BY roas DESC NULLS LAST, campaign ASC{limit_clause}"
    )
}

fn top_campaigns() -> QueryTemplate {
    with_filters(QueryTemplate::new(
        TOP_CAMPAIGNS,
        "Best performing campaigns ranked by ROAS (revenue / spend), ties by campaign name. Use `limit` for how many (default 10).",
        campaign_sql(true),
    ))
    .param(
        ParamSpec::integer("limit", "Number of campaigns to return", 1, MAX_LIMIT)
            .with_default(ParamValue::Integer(DEFAULT_TOP_LIMIT)),
    )
    .order_by(SortKey::desc("roas"))
    .order_by(SortKey::asc("campaign"))
    .limit_by("limit")
}

fn all_campaigns() -> QueryTemplate {
    with_filters(QueryTemplate::new(
        ALL_CAMPAIGNS,
        "Every active campaign ranked by ROAS, without a limit. Use when the user asks for all campaigns.",
        campaign_sql(false),
    ))
    .order_by(SortKey::desc("roas"))
    .order_by(SortKey::asc("campaign"))
}

fn channel_performance() -> QueryTemplate {
    let sql = format!(
        "SELECT first_touch_channel AS channel,
               {GROUP_METRICS},
               {ROAS}
        FROM curated_pl_marketing_wide_synth
        WHERE {FILTERS}
          AND first_touch_channel IS NOT NULL
        GROUP BY first_touch_channel
        {HAVING_ACTIVITY}
        ORDER BY marketing_spend DESC, channel ASC"
    );

    with_filters(QueryTemplate::new(
        CHANNEL_PERFORMANCE,
        "Spend, revenue, applications, funded loans and ROAS per first-touch marketing channel, highest spend first.",
        sql,
    ))
    .order_by(SortKey::desc("marketing_spend"))
    .order_by(SortKey::asc("channel"))
}

fn segment_analysis() -> QueryTemplate {
    let sql = format!(
        "SELECT segment_name AS segment,
               {GROUP_METRICS},
               AVG(approved_amt)::float8 AS avg_approved_amount,
               {ROAS}
        FROM curated_pl_marketing_wide_synth
        WHERE {FILTERS}
          AND segment_name IS NOT NULL
        GROUP BY segment_name
        {HAVING_ACTIVITY}
        ORDER BY marketing_spend DESC, segment ASC"
    );

    with_filters(QueryTemplate::new(
        SEGMENT_ANALYSIS,
        "Spend, revenue, applications, funded loans, average approved amount and ROAS per customer segment, highest spend first.",
        sql,
    ))
    .order_by(SortKey::desc("marketing_spend"))
    .order_by(SortKey::asc("segment"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_registry_is_populated() {
        let registry = builtin_registry().unwrap();
        assert_eq!(
            registry.ids(),
            vec![ALL_CAMPAIGNS, CHANNEL_PERFORMANCE, KPI_SUMMARY, SEGMENT_ANALYSIS, TOP_CAMPAIGNS]
        );
    }

    #[test]
    fn test_placeholders_match_declared_params() {
        for template in builtin_templates() {
            let declared = template.params().len();
            for n in 1..=declared {
                assert!(
                    template.sql().contains(&format!("${}", n)),
                    "{} does not reference ${}",
                    template.id(),
                    n
                );
            }
            assert!(
                !template.sql().contains(&format!("${}", declared + 1)),
                "{} references an undeclared parameter",
                template.id()
            );
        }
    }

    #[test]
    fn test_sql_is_read_only() {
        for template in builtin_templates() {
            let upper = template.sql().to_uppercase();
            for keyword in ["INSERT", "UPDATE", "DELETE", "DROP", "ALTER", "TRUNCATE", "GRANT"] {
                assert!(!upper.contains(keyword), "{} contains {}", template.id(), keyword);
            }
        }
    }
}
