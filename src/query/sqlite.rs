//! SQLite query runner using sqlx.
//!
//! Executes query text on a pooled connection and converts each returned row
//! through [`row_to_record`].

use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Column, Row as _, TypeInfo, ValueRef};

use crate::config::{DEFAULT_ACQUIRE_TIMEOUT, DEFAULT_MAX_CONNECTIONS};
use crate::query::{QueryError, QueryRunner};
use crate::row::{Record, Row, Value, row_to_record};

/// Pool settings for [`SqliteRunner`].
#[derive(Debug, Clone)]
pub struct SqliteRunnerOptions {
    /// Maximum pooled connections.
    pub max_connections: u32,
    /// Time to wait for a free connection.
    pub acquire_timeout: Duration,
    /// Create the database file when it does not exist.
    pub create_if_missing: bool,
}

impl Default for SqliteRunnerOptions {
    fn default() -> Self {
        Self {
            max_connections: DEFAULT_MAX_CONNECTIONS,
            acquire_timeout: DEFAULT_ACQUIRE_TIMEOUT,
            create_if_missing: false,
        }
    }
}

/// Query runner backed by a sqlx SQLite pool.
#[derive(Clone)]
pub struct SqliteRunner {
    pool: SqlitePool,
}

impl std::fmt::Debug for SqliteRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteRunner").finish_non_exhaustive()
    }
}

impl SqliteRunner {
    /// Connect to a SQLite database.
    ///
    /// # Arguments
    ///
    /// * `url` - SQLite connection URL, e.g., `sqlite:data/metrics.db?mode=ro`
    pub async fn connect(url: &str, options: SqliteRunnerOptions) -> Result<Self, QueryError> {
        let connect_options =
            SqliteConnectOptions::from_str(url)?.create_if_missing(options.create_if_missing);

        let pool = SqlitePoolOptions::new()
            .max_connections(options.max_connections)
            .acquire_timeout(options.acquire_timeout)
            .connect_with(connect_options)
            .await?;

        Ok(Self { pool })
    }

    /// Wrap an existing pool.
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Close the connection pool gracefully.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait::async_trait]
impl QueryRunner for SqliteRunner {
    async fn query(&self, query: &str) -> Result<Vec<Record>, QueryError> {
        let rows = sqlx::query(query).fetch_all(&self.pool).await?;
        rows.iter()
            .map(|row| Ok(row_to_record(&sqlite_row_to_row(row)?)))
            .collect()
    }
}

/// Map every column of a SQLite row into a [`Value`].
///
/// The runtime storage class decides the variant; declared `BOOLEAN` and
/// date/time columns are refined into [`Value::Bool`] and [`Value::Timestamp`].
fn sqlite_row_to_row(row: &SqliteRow) -> Result<Row, QueryError> {
    let mut out = Row::with_capacity(row.columns().len());

    for (idx, column) in row.columns().iter().enumerate() {
        let raw = row.try_get_raw(idx)?;
        if raw.is_null() {
            out.insert(column.name().to_string(), Value::Null);
            continue;
        }

        let storage = raw.type_info().name().to_ascii_uppercase();
        let declared = column.type_info().name().to_ascii_uppercase();

        let value = match (declared.as_str(), storage.as_str()) {
            ("BOOLEAN", "INTEGER") => Value::Bool(row.try_get_unchecked::<bool, _>(idx)?),
            ("DATETIME" | "DATE" | "TIMESTAMP", "TEXT" | "INTEGER") => {
                match row.try_get_unchecked::<DateTime<Utc>, _>(idx) {
                    Ok(ts) => Value::Timestamp(ts),
                    Err(_) => decode_storage(row, idx, &storage)?,
                }
            }
            _ => decode_storage(row, idx, &storage)?,
        };
        out.insert(column.name().to_string(), value);
    }

    Ok(out)
}

fn decode_storage(row: &SqliteRow, idx: usize, storage: &str) -> Result<Value, QueryError> {
    let value = match storage {
        "INTEGER" => Value::Int(row.try_get_unchecked::<i64, _>(idx)?),
        "REAL" | "NUMERIC" => Value::Float(row.try_get_unchecked::<f64, _>(idx)?),
        "TEXT" => Value::String(row.try_get_unchecked::<String, _>(idx)?),
        _ => Value::Bytes(row.try_get_unchecked::<Vec<u8>, _>(idx)?),
    };
    Ok(value)
}
