//! Tabular query results.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// A scalar cell value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    Date(NaiveDate),
    Text(String),
}

impl Value {
    /// Numeric view of the value, if it has one.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::Float(f) if f.is_finite() => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn is_numeric(&self) -> bool {
        self.as_f64().is_some()
    }

    /// Total order used for deterministic sorting.
    ///
    /// Nulls sort first, numbers compare numerically across integer/float
    /// with NaN after every other number, and values of different kinds fall
    /// back to a fixed kind rank.
    pub fn total_cmp(&self, other: &Value) -> Ordering {
        if let (Some(a), Some(b)) = (self.sort_number(), other.sort_number()) {
            return match (a.is_nan(), b.is_nan()) {
                (true, true) => Ordering::Equal,
                (true, false) => Ordering::Greater,
                (false, true) => Ordering::Less,
                (false, false) => a.total_cmp(&b),
            };
        }
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Date(a), Value::Date(b)) => a.cmp(b),
            (Value::Text(a), Value::Text(b)) => a.cmp(b),
            _ => self.kind_rank().cmp(&other.kind_rank()),
        }
    }

    fn sort_number(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    fn kind_rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Integer(_) | Value::Float(_) => 2,
            Value::Date(_) => 3,
            Value::Text(_) => 4,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<NaiveDate> for Value {
    fn from(d: NaiveDate) -> Self {
        Value::Date(d)
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Date(d) => write!(f, "{}", d),
            Value::Text(s) => write!(f, "{}", s),
        }
    }
}

/// One result row, keyed by column name.
pub type Row = BTreeMap<String, Value>;

/// Rows produced by exactly one registered template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    /// Identifier of the template that produced these rows.
    pub template: String,
    /// Column names in select order.
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

impl QueryResult {
    pub fn new(template: impl Into<String>, columns: Vec<String>, rows: Vec<Row>) -> Self {
        Self {
            template: template.into(),
            columns,
            rows,
        }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c == name)
    }

    /// Value of `column` in `row`, treating a missing cell as null.
    pub fn cell<'a>(row: &'a Row, column: &str) -> &'a Value {
        const NULL: &Value = &Value::Null;
        row.get(column).unwrap_or(NULL)
    }

    /// Columns whose non-null cells are all numeric (and at least one exists).
    pub fn numeric_columns(&self) -> Vec<&str> {
        self.columns_where(|v| v.is_numeric())
    }

    /// Columns whose non-null cells are all text.
    pub fn text_columns(&self) -> Vec<&str> {
        self.columns_where(|v| matches!(v, Value::Text(_)))
    }

    /// Columns whose non-null cells are all dates.
    pub fn date_columns(&self) -> Vec<&str> {
        self.columns_where(|v| matches!(v, Value::Date(_)))
    }

    fn columns_where(&self, pred: impl Fn(&Value) -> bool) -> Vec<&str> {
        self.columns
            .iter()
            .filter(|col| {
                let mut seen = false;
                for row in &self.rows {
                    let v = Self::cell(row, col);
                    if v.is_null() {
                        continue;
                    }
                    if !pred(v) {
                        return false;
                    }
                    seen = true;
                }
                seen
            })
            .map(String::as_str)
            .collect()
    }

    /// Rows as positional arrays in column order.
    pub fn to_table(&self) -> Vec<Vec<Value>> {
        self.rows
            .iter()
            .map(|row| {
                self.columns
                    .iter()
                    .map(|c| Self::cell(row, c).clone())
                    .collect()
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(pairs: &[(&str, Value)]) -> Row {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_total_cmp_mixes_integer_and_float() {
        assert_eq!(Value::Integer(2).total_cmp(&Value::Float(1.5)), Ordering::Greater);
        assert_eq!(Value::Null.total_cmp(&Value::Integer(0)), Ordering::Less);
        assert_eq!(Value::from("a").total_cmp(&Value::from("b")), Ordering::Less);
    }

    #[test]
    fn test_total_cmp_orders_non_finite_floats() {
        let nan = Value::Float(f64::NAN);
        assert_eq!(nan.total_cmp(&Value::Float(f64::INFINITY)), Ordering::Greater);
        assert_eq!(nan.total_cmp(&Value::Integer(i64::MAX)), Ordering::Greater);
        assert_eq!(Value::Integer(0).total_cmp(&nan), Ordering::Less);
        assert_eq!(Value::Float(-f64::NAN).total_cmp(&nan), Ordering::Equal);
        assert_eq!(
            Value::Float(f64::NEG_INFINITY).total_cmp(&Value::Integer(-1)),
            Ordering::Less
        );
        assert_eq!(nan.total_cmp(&Value::Null), Ordering::Greater);

        let mut values = vec![nan.clone(), Value::Float(2.0), Value::Null, Value::Integer(1)];
        values.sort_by(Value::total_cmp);
        assert!(matches!(values[3], Value::Float(f) if f.is_nan()));
        assert_eq!(&values[..3], &[Value::Null, Value::Integer(1), Value::Float(2.0)]);
    }

    #[test]
    fn test_column_classification() {
        let result = QueryResult::new(
            "T",
            vec!["campaign".into(), "revenue".into(), "month".into()],
            vec![
                row(&[
                    ("campaign", "Alpha".into()),
                    ("revenue", Value::Float(10.0)),
                    ("month", Value::Date(NaiveDate::from_ymd_opt(2025, 8, 1).unwrap())),
                ]),
                row(&[("campaign", "Beta".into()), ("revenue", Value::Null)]),
            ],
        );

        assert_eq!(result.numeric_columns(), vec!["revenue"]);
        assert_eq!(result.text_columns(), vec!["campaign"]);
        assert_eq!(result.date_columns(), vec!["month"]);
    }

    #[test]
    fn test_untagged_value_round_trips_dates_and_text() {
        let parsed: Vec<Value> = serde_json::from_str(r#"[null, 3, 1.5, "2025-08-01", "SME"]"#).unwrap();
        assert_eq!(parsed[0], Value::Null);
        assert_eq!(parsed[1], Value::Integer(3));
        assert_eq!(parsed[2], Value::Float(1.5));
        assert!(matches!(parsed[3], Value::Date(_)));
        assert_eq!(parsed[4], Value::from("SME"));
    }
}
