//! SQL execution against reconciled clusters
//!
//! The controller only needs a handful of query shapes, captured by
//! [`SqlExecutor`]. [`Connector`] opens executors from a superuser
//! credential and [`ConnectionProvider`] keeps one per
//! `(host, user, database)` for the lifetime of the process.

mod pg;
mod provider;

use std::sync::Arc;

use async_trait::async_trait;

#[cfg(test)]
use mockall::automock;

use crate::types::SuperuserCredential;
use crate::Error;

pub use pg::{PgConnector, PgExecutor, PoolSettings};
pub use provider::ConnectionProvider;

/// A live, shareable connection to one database
pub type SharedConnection = Arc<dyn SqlExecutor>;

/// Trait abstracting the SQL calls issued during reconciliation
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SqlExecutor: Send + Sync {
    /// Check the connection is alive
    async fn ping(&self) -> Result<(), Error>;

    /// Run `sql` with one text parameter and report whether any row came back
    async fn query_exists(&self, sql: &str, arg: &str) -> Result<bool, Error>;

    /// Run `sql` with one text parameter and return the first column of the
    /// first row, or `None` when no row came back
    async fn query_text(&self, sql: &str, arg: &str) -> Result<Option<String>, Error>;

    /// Run `sql` and return the first column of every row
    async fn query_column(&self, sql: &str) -> Result<Vec<String>, Error>;

    /// Execute a statement that returns no rows
    async fn execute(&self, sql: &str) -> Result<(), Error>;
}

/// Trait abstracting how connections are opened
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a connection for `credential` (not yet pinged)
    async fn open(&self, credential: &SuperuserCredential) -> Result<SharedConnection, Error>;
}

/// Quote an identifier with double quotes, doubling embedded quotes
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Render an identifier bare when it is a plain identifier, quoted otherwise
///
/// Bare names keep PostgreSQL's case folding (`PostGIS` installs `postgis`);
/// names like `uuid-ossp` that cannot be written bare are quoted.
pub fn ident(name: &str) -> String {
    let mut chars = name.chars();
    let plain = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if plain {
        name.to_string()
    } else {
        quote_ident(name)
    }
}
