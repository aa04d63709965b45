//! PostgreSQL backend over a `deadpool-postgres` pool.

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use deadpool_postgres::{Config, Pool, Runtime};
use postgres_types::{ToSql, Type};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use tokio_postgres::NoTls;

use crate::config::DatabaseConfig;
use crate::db::{DataStore, RowSet};
use crate::error::{ConfigError, DatabaseError};
use crate::query::{ParamKind, ParamValue, QueryTemplate, Row, Value};

/// Pooled PostgreSQL store.
///
/// Every fetch runs inside a `READ ONLY` transaction that is rolled back
/// afterwards; pooled connections return to the pool when dropped, which
/// covers errors, timeouts and cancelled futures alike.
pub struct PgStore {
    pool: Pool,
}

impl PgStore {
    /// Create the pool and verify a connection can be made.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, DatabaseError> {
        let url = config.url().map_err(|e: ConfigError| DatabaseError::Pool(e.to_string()))?;

        let mut cfg = Config::new();
        cfg.url = Some(url.to_string());
        cfg.pool = Some(deadpool_postgres::PoolConfig {
            max_size: config.pool_size,
            ..Default::default()
        });

        let pool = cfg
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| DatabaseError::Pool(e.to_string()))?;

        let store = Self { pool };
        store.ping().await?;
        tracing::info!(pool_size = config.pool_size, "Connected to PostgreSQL");
        Ok(store)
    }

    /// Wrap an existing pool.
    pub fn from_pool(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DataStore for PgStore {
    async fn fetch(
        &self,
        template: &QueryTemplate,
        params: &[ParamValue],
    ) -> Result<RowSet, DatabaseError> {
        let mut client = self.pool.get().await?;
        let tx = client.build_transaction().read_only(true).start().await?;

        let bound: Vec<Box<dyn ToSql + Sync + Send>> = template
            .params()
            .iter()
            .zip(params)
            .map(|(spec, value)| to_sql(&spec.kind, value))
            .collect();
        let refs: Vec<&(dyn ToSql + Sync)> = bound
            .iter()
            .map(|p| p.as_ref() as &(dyn ToSql + Sync))
            .collect();

        let statement = tx.prepare(template.sql()).await?;
        let columns: Vec<String> = statement
            .columns()
            .iter()
            .map(|c| c.name().to_string())
            .collect();

        let pg_rows = tx.query(&statement, &refs).await?;
        let rows = pg_rows
            .iter()
            .map(decode_row)
            .collect::<Result<Vec<_>, _>>()?;

        tx.rollback().await?;

        tracing::debug!(
            template = template.id(),
            rows = rows.len(),
            "PostgreSQL fetch complete"
        );

        Ok(RowSet { columns, rows })
    }

    async fn ping(&self) -> Result<(), DatabaseError> {
        let client = self.pool.get().await?;
        client.simple_query("SELECT 1").await?;
        Ok(())
    }

    fn backend(&self) -> &str {
        "postgres"
    }
}

/// Typed driver parameter. NULLs carry the declared type so the server can
/// resolve `$n::type IS NULL`.
fn to_sql(kind: &ParamKind, value: &ParamValue) -> Box<dyn ToSql + Sync + Send> {
    match (value, kind) {
        (ParamValue::Date(d), _) => Box::new(*d),
        (ParamValue::Text(s), _) => Box::new(s.clone()),
        (ParamValue::Integer(i), _) => Box::new(*i),
        (ParamValue::Null, ParamKind::Date { .. }) => Box::new(None::<NaiveDate>),
        (ParamValue::Null, ParamKind::Integer { .. }) => Box::new(None::<i64>),
        (ParamValue::Null, ParamKind::Text { .. }) => Box::new(None::<String>),
    }
}

fn decode_row(row: &tokio_postgres::Row) -> Result<Row, DatabaseError> {
    row.columns()
        .iter()
        .enumerate()
        .map(|(idx, column)| {
            let value = decode_cell(row, idx, column.type_()).map_err(|e| match e {
                CellError::Unsupported => DatabaseError::UnsupportedColumn {
                    column: column.name().to_string(),
                    type_name: column.type_().name().to_string(),
                },
                CellError::Driver(e) => DatabaseError::from(e),
            })?;
            Ok((column.name().to_string(), value))
        })
        .collect()
}

enum CellError {
    Unsupported,
    Driver(tokio_postgres::Error),
}

impl From<tokio_postgres::Error> for CellError {
    fn from(err: tokio_postgres::Error) -> Self {
        CellError::Driver(err)
    }
}

fn decode_cell(row: &tokio_postgres::Row, idx: usize, ty: &Type) -> Result<Value, CellError> {
    let value = if *ty == Type::BOOL {
        row.try_get::<_, Option<bool>>(idx)?.map(Value::Bool)
    } else if *ty == Type::INT2 {
        row.try_get::<_, Option<i16>>(idx)?
            .map(|v| Value::Integer(v.into()))
    } else if *ty == Type::INT4 {
        row.try_get::<_, Option<i32>>(idx)?
            .map(|v| Value::Integer(v.into()))
    } else if *ty == Type::INT8 {
        row.try_get::<_, Option<i64>>(idx)?.map(Value::Integer)
    } else if *ty == Type::FLOAT4 {
        row.try_get::<_, Option<f32>>(idx)?
            .map(|v| Value::Float(v.into()))
    } else if *ty == Type::FLOAT8 {
        row.try_get::<_, Option<f64>>(idx)?.map(Value::Float)
    } else if *ty == Type::NUMERIC {
        row.try_get::<_, Option<Decimal>>(idx)?
            .and_then(|d| d.to_f64())
            .map(Value::Float)
    } else if [Type::TEXT, Type::VARCHAR, Type::BPCHAR, Type::NAME].contains(ty) {
        row.try_get::<_, Option<String>>(idx)?.map(Value::Text)
    } else if *ty == Type::DATE {
        row.try_get::<_, Option<NaiveDate>>(idx)?.map(Value::Date)
    } else if *ty == Type::TIMESTAMP {
        row.try_get::<_, Option<NaiveDateTime>>(idx)?
            .map(|ts| Value::Date(ts.date()))
    } else {
        return Err(CellError::Unsupported);
    };
    Ok(value.unwrap_or(Value::Null))
}
