//! Parameterized query templates and the registry that holds them.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::NaiveDate;
use serde::Serialize;

use crate::error::QueryError;
use crate::query::result::{QueryResult, Row, Value};

/// Declared type of a template parameter, with its allowed values.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ParamKind {
    /// ISO `YYYY-MM-DD` date, optionally bounded (inclusive).
    Date {
        #[serde(skip_serializing_if = "Option::is_none")]
        min: Option<NaiveDate>,
        #[serde(skip_serializing_if = "Option::is_none")]
        max: Option<NaiveDate>,
    },
    /// Free text up to `max_len` characters, or one of `allowed`.
    Text {
        max_len: usize,
        #[serde(skip_serializing_if = "Option::is_none")]
        allowed: Option<Vec<String>>,
    },
    /// Integer within `min..=max`.
    Integer { min: i64, max: i64 },
}

/// A bound parameter value, in the shape the data store receives it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ParamValue {
    Date(NaiveDate),
    Text(String),
    Integer(i64),
    Null,
}

/// One declared parameter.
#[derive(Debug, Clone, Serialize)]
pub struct ParamSpec {
    pub name: String,
    pub description: String,
    #[serde(flatten)]
    pub kind: ParamKind,
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<ParamValue>,
}

impl ParamSpec {
    pub fn date(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(name, description, ParamKind::Date { min: None, max: None })
    }

    pub fn text(name: impl Into<String>, description: impl Into<String>, max_len: usize) -> Self {
        Self::new(
            name,
            description,
            ParamKind::Text {
                max_len,
                allowed: None,
            },
        )
    }

    pub fn one_of(
        name: impl Into<String>,
        description: impl Into<String>,
        allowed: &[&str],
    ) -> Self {
        let max_len = allowed.iter().map(|a| a.len()).max().unwrap_or(0);
        Self::new(
            name,
            description,
            ParamKind::Text {
                max_len,
                allowed: Some(allowed.iter().map(|a| a.to_string()).collect()),
            },
        )
    }

    pub fn integer(name: impl Into<String>, description: impl Into<String>, min: i64, max: i64) -> Self {
        Self::new(name, description, ParamKind::Integer { min, max })
    }

    fn new(name: impl Into<String>, description: impl Into<String>, kind: ParamKind) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            kind,
            required: false,
            default: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_default(mut self, value: ParamValue) -> Self {
        self.default = Some(value);
        self
    }

    /// Convert a supplied JSON value into a bound value, enforcing the kind.
    ///
    /// `null` and empty strings count as "not supplied".
    pub fn bind(&self, supplied: Option<&serde_json::Value>) -> Result<ParamValue, QueryError> {
        let supplied = match supplied {
            None | Some(serde_json::Value::Null) => None,
            Some(serde_json::Value::String(s)) if s.trim().is_empty() => None,
            Some(v) => Some(v),
        };

        let Some(raw) = supplied else {
            if let Some(default) = &self.default {
                return Ok(default.clone());
            }
            if self.required {
                return Err(QueryError::invalid(&self.name, "is required"));
            }
            return Ok(ParamValue::Null);
        };

        match &self.kind {
            ParamKind::Date { min, max } => {
                let s = raw
                    .as_str()
                    .ok_or_else(|| QueryError::invalid(&self.name, "expected a date string"))?;
                let date = NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
                    .map_err(|_| QueryError::invalid(&self.name, "expected format YYYY-MM-DD"))?;
                if let Some(min) = min {
                    if date < *min {
                        return Err(QueryError::invalid(&self.name, format!("must be on or after {}", min)));
                    }
                }
                if let Some(max) = max {
                    if date > *max {
                        return Err(QueryError::invalid(&self.name, format!("must be on or before {}", max)));
                    }
                }
                Ok(ParamValue::Date(date))
            }
            ParamKind::Text { max_len, allowed } => {
                let s = raw
                    .as_str()
                    .ok_or_else(|| QueryError::invalid(&self.name, "expected a string"))?
                    .trim();
                if let Some(allowed) = allowed {
                    // Canonicalize case so "sme" binds as "SME".
                    return allowed
                        .iter()
                        .find(|a| a.eq_ignore_ascii_case(s))
                        .map(|a| ParamValue::Text(a.clone()))
                        .ok_or_else(|| {
                            QueryError::invalid(
                                &self.name,
                                format!("must be one of: {}", allowed.join(", ")),
                            )
                        });
                }
                if s.chars().count() > *max_len {
                    return Err(QueryError::invalid(
                        &self.name,
                        format!("must be at most {} characters", max_len),
                    ));
                }
                Ok(ParamValue::Text(s.to_string()))
            }
            ParamKind::Integer { min, max } => {
                let n = raw
                    .as_i64()
                    .or_else(|| {
                        raw.as_f64()
                            .filter(|f| f.fract() == 0.0 && f.abs() < 1e15)
                            .map(|f| f as i64)
                    })
                    .ok_or_else(|| QueryError::invalid(&self.name, "expected an integer"))?;
                if n < *min || n > *max {
                    return Err(QueryError::invalid(
                        &self.name,
                        format!("must be between {} and {}", min, max),
                    ));
                }
                Ok(ParamValue::Integer(n))
            }
        }
    }
}

/// Result ordering contract of a template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SortKey {
    pub column: String,
    pub descending: bool,
}

impl SortKey {
    pub fn asc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            descending: false,
        }
    }

    pub fn desc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            descending: true,
        }
    }
}

/// Relationship between two date parameters that must hold.
#[derive(Debug, Clone, Serialize)]
struct DateOrder {
    earlier: String,
    later: String,
}

/// A named, parameterized, pre-approved query.
///
/// The SQL body references parameters positionally (`$1..$n`) in declaration
/// order; values are always bound by the driver.
#[derive(Debug, Clone, Serialize)]
pub struct QueryTemplate {
    id: String,
    description: String,
    params: Vec<ParamSpec>,
    #[serde(skip)]
    sql: String,
    order_by: Vec<SortKey>,
    #[serde(skip_serializing_if = "Option::is_none")]
    limit_param: Option<String>,
    #[serde(skip)]
    date_orders: Vec<DateOrder>,
}

impl QueryTemplate {
    pub fn new(id: impl Into<String>, description: impl Into<String>, sql: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            params: Vec::new(),
            sql: sql.into(),
            order_by: Vec::new(),
            limit_param: None,
            date_orders: Vec::new(),
        }
    }

    pub fn param(mut self, spec: ParamSpec) -> Self {
        self.params.push(spec);
        self
    }

    pub fn order_by(mut self, key: SortKey) -> Self {
        self.order_by.push(key);
        self
    }

    /// Truncate results to the value of this integer parameter.
    pub fn limit_by(mut self, param: impl Into<String>) -> Self {
        self.limit_param = Some(param.into());
        self
    }

    /// Require `earlier <= later` for two date parameters.
    pub fn date_range(mut self, earlier: impl Into<String>, later: impl Into<String>) -> Self {
        self.date_orders.push(DateOrder {
            earlier: earlier.into(),
            later: later.into(),
        });
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn params(&self) -> &[ParamSpec] {
        &self.params
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn order(&self) -> &[SortKey] {
        &self.order_by
    }

    /// Published view of the template, without its SQL body.
    pub fn info(&self) -> TemplateInfo {
        TemplateInfo {
            id: self.id.clone(),
            description: self.description.clone(),
            params: self.params.clone(),
        }
    }

    /// Validate supplied parameters and bind them in declaration order.
    ///
    /// Fails on the first violation; nothing is bound unless every
    /// parameter passes.
    pub fn bind(
        &self,
        supplied: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<Vec<ParamValue>, QueryError> {
        if let Some(unknown) = supplied
            .keys()
            .find(|k| !self.params.iter().any(|p| &p.name == *k))
        {
            return Err(QueryError::invalid(
                unknown.as_str(),
                format!("not a parameter of {}", self.id),
            ));
        }

        let values = self
            .params
            .iter()
            .map(|spec| spec.bind(supplied.get(&spec.name)))
            .collect::<Result<Vec<_>, _>>()?;

        for order in &self.date_orders {
            let earlier = self.bound(&values, &order.earlier);
            let later = self.bound(&values, &order.later);
            if let (Some(ParamValue::Date(a)), Some(ParamValue::Date(b))) = (earlier, later) {
                if b < a {
                    return Err(QueryError::invalid(
                        &order.later,
                        format!("must not precede {}", order.earlier),
                    ));
                }
            }
        }

        Ok(values)
    }

    fn bound<'a>(&self, values: &'a [ParamValue], name: &str) -> Option<&'a ParamValue> {
        self.params
            .iter()
            .position(|p| p.name == name)
            .and_then(|i| values.get(i))
    }

    /// Apply the ordering contract and limit to raw store rows.
    ///
    /// The sort is stable, so rows equal on every key keep store order.
    pub fn shape(&self, values: &[ParamValue], columns: Vec<String>, mut rows: Vec<Row>) -> QueryResult {
        if !self.order_by.is_empty() {
            rows.sort_by(|a, b| {
                self.order_by
                    .iter()
                    .map(|key| {
                        let ord = QueryResult::cell(a, &key.column)
                            .total_cmp(QueryResult::cell(b, &key.column));
                        if key.descending { ord.reverse() } else { ord }
                    })
                    .find(|ord| *ord != Ordering::Equal)
                    .unwrap_or(Ordering::Equal)
            });
        }

        if let Some(limit_param) = &self.limit_param {
            if let Some(ParamValue::Integer(n)) = self.bound(values, limit_param) {
                rows.truncate(usize::try_from(*n).unwrap_or(0));
            }
        }

        QueryResult::new(self.id.clone(), columns, rows)
    }
}

/// What callers (and the reasoning engine) get to see of a template.
#[derive(Debug, Clone, Serialize)]
pub struct TemplateInfo {
    pub id: String,
    pub description: String,
    pub params: Vec<ParamSpec>,
}

/// Immutable set of templates, populated once at start-up.
///
/// Registration takes `&mut self`; once wrapped in an `Arc` there is no
/// mutation path left, so concurrent sessions read it without locking.
#[derive(Debug, Default)]
pub struct TemplateRegistry {
    templates: BTreeMap<String, Arc<QueryTemplate>>,
}

impl TemplateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, template: QueryTemplate) -> Result<(), QueryError> {
        if self.templates.contains_key(template.id()) {
            return Err(QueryError::DuplicateTemplate(template.id().to_string()));
        }
        self.templates
            .insert(template.id().to_string(), Arc::new(template));
        Ok(())
    }

    pub fn lookup(&self, name: &str) -> Result<Arc<QueryTemplate>, QueryError> {
        self.templates
            .get(name)
            .cloned()
            .ok_or_else(|| QueryError::UnknownTemplate(name.to_string()))
    }

    /// Templates in identifier order.
    pub fn templates(&self) -> impl Iterator<Item = &QueryTemplate> {
        self.templates.values().map(|t| t.as_ref())
    }

    pub fn describe(&self) -> Vec<TemplateInfo> {
        self.templates().map(QueryTemplate::info).collect()
    }

    pub fn ids(&self) -> Vec<&str> {
        self.templates.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}
