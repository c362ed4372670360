use std::collections::BTreeSet;
use std::time::Duration;

use serde_json::{Map, Value};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use wfconfig_schema::registry::{self, FieldKind, FieldSpec};
use wfconfig_schema::{ConfigRecord, FieldValue, Payload, ValidationError};

#[derive(Debug)]
pub enum StoreError {
    Validation(ValidationError),
    NotFound(i64),
    SchemaMismatch(Vec<String>),
    Timeout,
    Sqlx(sqlx::Error),
}

impl StoreError {
    pub fn code(&self) -> &'static str {
        match self {
            StoreError::Validation(_) => ValidationError::CODE,
            StoreError::NotFound(_) => "ERR_NOT_FOUND",
            StoreError::SchemaMismatch(_) => "ERR_INVALID_CONFIG",
            StoreError::Timeout => "ERR_STORAGE_TIMEOUT",
            StoreError::Sqlx(_) => "ERR_STORAGE",
        }
    }
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Validation(err) => write!(f, "{}", err),
            StoreError::NotFound(id) => write!(f, "config record {} not found", id),
            StoreError::SchemaMismatch(missing) => {
                write!(f, "config table is missing columns [{}]", missing.join(", "))
            }
            StoreError::Timeout => write!(f, "storage operation timed out"),
            StoreError::Sqlx(err) => write!(f, "storage error: {}", err),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::Validation(err) => Some(err),
            StoreError::Sqlx(err) => Some(err),
            _ => None,
        }
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(value: sqlx::Error) -> Self {
        StoreError::Sqlx(value)
    }
}

impl From<ValidationError> for StoreError {
    fn from(value: ValidationError) -> Self {
        StoreError::Validation(value)
    }
}

pub async fn connect_pool(db_url: &str, max_connections: u32) -> Result<PgPool, StoreError> {
    let pool = tokio::time::timeout(
        Duration::from_secs(5),
        PgPoolOptions::new()
            .max_connections(max_connections.max(1))
            .acquire_timeout(Duration::from_secs(5))
            .connect(db_url),
    )
    .await
    .map_err(|_| StoreError::Timeout)??;
    Ok(pool)
}

/// Applies the bundled development schema: the configuration table and
/// stand-ins for the session procedures. Production databases own both.
pub async fn migrate(pool: &PgPool) -> Result<(), StoreError> {
    tokio::time::timeout(Duration::from_secs(10), sqlx::migrate!("./migrations").run(pool))
        .await
        .map_err(|_| StoreError::Timeout)?
        .map_err(|err| StoreError::Sqlx(err.into()))?;
    Ok(())
}

/// Reads and rewrites rows of the configuration table.
#[derive(Clone)]
pub struct ConfigStore {
    pool: PgPool,
    table: String,
    query_timeout: Duration,
    select_sql: String,
    update_sql: String,
}

impl ConfigStore {
    /// `table` must already be validated with
    /// [`registry::is_qualified_identifier`]; it is interpolated into SQL.
    pub fn new(pool: PgPool, table: &str, query_timeout: Duration) -> Self {
        Self {
            pool,
            table: table.to_string(),
            query_timeout,
            select_sql: select_sql(table),
            update_sql: update_sql(table),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub async fn ping(&self) -> Result<(), StoreError> {
        tokio::time::timeout(
            self.query_timeout,
            sqlx::query("SELECT 1").execute(&self.pool),
        )
        .await
        .map_err(|_| StoreError::Timeout)??;
        Ok(())
    }

    /// All rows ordered by identifier.
    pub async fn list_records(&self) -> Result<Vec<ConfigRecord>, StoreError> {
        let rows = tokio::time::timeout(
            self.query_timeout,
            sqlx::query(&self.select_sql).fetch_all(&self.pool),
        )
        .await
        .map_err(|_| StoreError::Timeout)??;

        let mut records = Vec::with_capacity(rows.len());
        for row in &rows {
            records.push(decode_row(row)?);
        }
        Ok(records)
    }

    /// Rewrites every editable column of one row in a single statement.
    pub async fn update_record(&self, id: i64, payload: &Payload) -> Result<(), StoreError> {
        payload.ensure_complete()?;

        let mut query = sqlx::query(&self.update_sql);
        for (_, value) in payload.iter() {
            query = match value {
                FieldValue::Text(s) => query.bind(s.clone()),
                FieldValue::Integer(n) => query.bind(*n),
                FieldValue::Numeric(n) => query.bind(*n),
                // JSON null is stored as SQL NULL.
                FieldValue::Json(Value::Null) => query.bind(None::<Value>),
                FieldValue::Json(v) => query.bind(Some(v.clone())),
            };
        }
        query = query.bind(id);

        let result = tokio::time::timeout(self.query_timeout, query.execute(&self.pool))
            .await
            .map_err(|_| StoreError::Timeout)??;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }

    /// Fails with [`StoreError::SchemaMismatch`] when the table lacks any
    /// registry column.
    pub async fn validate_schema(&self) -> Result<(), StoreError> {
        let (schema, table) = match self.table.split_once('.') {
            Some((schema, table)) => (Some(schema), table),
            None => (None, self.table.as_str()),
        };

        let rows = tokio::time::timeout(
            self.query_timeout,
            sqlx::query(
                "SELECT column_name::text AS column_name \
                 FROM information_schema.columns \
                 WHERE table_schema::text = COALESCE($1::text, current_schema()::text) \
                   AND table_name::text = $2::text",
            )
            .bind(schema)
            .bind(table)
            .fetch_all(&self.pool),
        )
        .await
        .map_err(|_| StoreError::Timeout)??;

        let available = rows
            .into_iter()
            .filter_map(|row| row.try_get::<String, _>("column_name").ok())
            .map(|c| c.to_ascii_lowercase())
            .collect::<BTreeSet<_>>();

        let missing = missing_columns(&available);
        if !missing.is_empty() {
            return Err(StoreError::SchemaMismatch(missing));
        }
        Ok(())
    }
}

pub fn missing_columns(available: &BTreeSet<String>) -> Vec<String> {
    registry::FIELDS
        .iter()
        .filter(|spec| !available.contains(spec.name))
        .map(|spec| spec.name.to_string())
        .collect()
}

fn select_expr(spec: &FieldSpec) -> String {
    let c = spec.name;
    match spec.kind {
        FieldKind::Identifier => format!("{c}::bigint AS {c}"),
        FieldKind::ReadOnly => format!(
            "to_char({c} AT TIME ZONE 'UTC', 'YYYY-MM-DD\"T\"HH24:MI:SS\"Z\"') AS {c}"
        ),
        FieldKind::Text => format!("{c}::text AS {c}"),
        FieldKind::Integer => format!("{c}::bigint AS {c}"),
        FieldKind::Numeric => format!("{c}::float8 AS {c}"),
        FieldKind::Json => format!("{c}::jsonb AS {c}"),
    }
}

fn select_sql(table: &str) -> String {
    let columns = registry::FIELDS
        .iter()
        .map(select_expr)
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "SELECT {} FROM {} ORDER BY {} ASC",
        columns,
        table,
        registry::ID_FIELD
    )
}

fn update_sql(table: &str) -> String {
    let mut assignments = Vec::with_capacity(registry::editable_field_count());
    for (idx, spec) in registry::editable_fields().enumerate() {
        let param = idx + 1;
        match spec.kind.sql_cast() {
            Some(cast) => assignments.push(format!("{} = ${}::{}", spec.name, param, cast)),
            None => assignments.push(format!("{} = ${}", spec.name, param)),
        }
    }
    format!(
        "UPDATE {} SET {} WHERE {} = ${}::bigint",
        table,
        assignments.join(", "),
        registry::ID_FIELD,
        assignments.len() + 1
    )
}

fn decode_row(row: &PgRow) -> Result<ConfigRecord, sqlx::Error> {
    let id = row.try_get::<i64, _>(registry::ID_FIELD)?;
    let created_at = row.try_get::<Option<String>, _>(registry::CREATED_AT_FIELD)?;

    let mut fields = Map::new();
    for spec in registry::editable_fields() {
        let c = spec.name;
        let value = match spec.kind {
            FieldKind::Text => row
                .try_get::<Option<String>, _>(c)?
                .map(Value::String)
                .unwrap_or(Value::Null),
            FieldKind::Integer => row
                .try_get::<Option<i64>, _>(c)?
                .map(Value::from)
                .unwrap_or(Value::Null),
            FieldKind::Numeric => row
                .try_get::<Option<f64>, _>(c)?
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            FieldKind::Json => row.try_get::<Option<Value>, _>(c)?.unwrap_or(Value::Null),
            FieldKind::Identifier | FieldKind::ReadOnly => continue,
        };
        fields.insert(c.to_string(), value);
    }

    Ok(ConfigRecord {
        id,
        created_at,
        fields,
    })
}
