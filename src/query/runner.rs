//! Query runner trait and errors.

use std::time::Duration;

use thiserror::Error;

use crate::row::Record;

/// Errors returned by a query execution.
///
/// Callers treat every variant as transient: the cached snapshot is kept and
/// the query is retried on the next refresh cycle.
#[derive(Debug, Error)]
pub enum QueryError {
    /// The database driver reported an error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The query did not finish before its deadline.
    #[error("query timed out after {0:?}")]
    Timeout(Duration),

    /// Any other engine failure.
    #[error("query failed: {0}")]
    Failed(String),
}

/// Executes query text against the data engine.
#[async_trait::async_trait]
pub trait QueryRunner: Send + Sync + 'static {
    /// Run `query` and return one record per result row, in row order.
    async fn query(&self, query: &str) -> Result<Vec<Record>, QueryError>;
}
