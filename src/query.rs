//! Query Layer
//!
//! The seam between collectors and the tabular data engine. A
//! [`QueryRunner`] executes query text and returns converted [`Record`]s.
//!
//! - [`QueryRunner`]: engine-agnostic trait used by collectors
//! - [`SqliteRunner`]: sqlx-backed runner for SQLite databases
//!
//! [`Record`]: crate::row::Record

mod runner;
mod sqlite;
#[cfg(test)]
pub(crate) mod testing;

pub use runner::{QueryError, QueryRunner};
pub use sqlite::{SqliteRunner, SqliteRunnerOptions};
