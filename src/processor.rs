//! Idempotent database operations
//!
//! Every check follows the same shape: consult the fact cache and
//! short-circuit when the fact is known, otherwise ask the database, treat
//! "no rows" as a definite `false` (not cached), propagate any other error,
//! and record the fact when it holds.

use async_trait::async_trait;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use crate::postgres::{ident, quote_ident, SharedConnection};
use crate::store::FactCache;
use crate::types::ClusterIdentity;
use crate::Error;

/// Role lookup
pub const ROLE_EXISTS_SQL: &str = "SELECT 1 FROM pg_catalog.pg_roles WHERE rolname = $1 LIMIT 1";

/// Database lookup
pub const DATABASE_EXISTS_SQL: &str =
    "SELECT 1 FROM pg_catalog.pg_database WHERE datname = $1 LIMIT 1";

/// Current owner of a database, rendered as a role name
pub const DATABASE_OWNER_SQL: &str =
    "SELECT datdba::regrole::text FROM pg_database WHERE datname = $1 LIMIT 1";

/// Installed extensions of the connected database
pub const INSTALLED_EXTENSIONS_SQL: &str = "SELECT extname FROM pg_extension";

/// Statement transferring ownership of `database` to `user`
pub fn make_owner_sql(database: &str, user: &str) -> String {
    format!(
        "ALTER DATABASE {} OWNER TO {}",
        quote_ident(database),
        quote_ident(user)
    )
}

/// Statement installing `name`, optionally with its dependencies
pub fn create_extension_sql(name: &str, cascade: bool) -> String {
    let mut sql = format!("CREATE EXTENSION {}", ident(name));
    if cascade {
        sql.push_str(" CASCADE");
    }
    sql
}

/// The six operations a reconciliation pass is built from
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Processor: Send + Sync {
    /// Whether role `role` exists
    async fn role_exists(&self, conn: &SharedConnection, role: &str) -> Result<bool, Error>;

    /// Whether `database` exists in `cluster`
    async fn database_exists(
        &self,
        conn: &SharedConnection,
        cluster: &ClusterIdentity,
        database: &str,
    ) -> Result<bool, Error>;

    /// Whether `database` in `cluster` is owned by `user`
    async fn database_owned(
        &self,
        conn: &SharedConnection,
        cluster: &ClusterIdentity,
        user: &str,
        database: &str,
    ) -> Result<bool, Error>;

    /// Transfer ownership of `database` to `user`
    async fn make_owner(
        &self,
        conn: &SharedConnection,
        database: &str,
        user: &str,
    ) -> Result<(), Error>;

    /// Whether extension `name` is installed in the connected database
    async fn extension_installed(&self, conn: &SharedConnection, name: &str)
        -> Result<bool, Error>;

    /// Install extension `name` into the connected database
    async fn create_extension(
        &self,
        conn: &SharedConnection,
        name: &str,
        cascade: bool,
    ) -> Result<(), Error>;
}

/// [`Processor`] issuing SQL and memoizing facts that hold
#[derive(Default)]
pub struct PgProcessor {
    roles: FactCache,
    databases: FactCache,
    ownership: FactCache,
    // Keyed by extension name only: an extension seen in one database is
    // assumed installed in every other database of every cluster.
    extensions: FactCache,
}

impl PgProcessor {
    /// Create a processor with empty fact caches
    pub fn new() -> Self {
        Self::default()
    }
}

fn database_key(cluster: &ClusterIdentity, database: &str) -> String {
    format!("{}:{}", cluster.key(), database)
}

fn ownership_key(cluster: &ClusterIdentity, user: &str, database: &str) -> String {
    format!("{}:{}:{}", cluster.key(), user, database)
}

#[async_trait]
impl Processor for PgProcessor {
    async fn role_exists(&self, conn: &SharedConnection, role: &str) -> Result<bool, Error> {
        if self.roles.holds(role) {
            return Ok(true);
        }
        let exists = conn.query_exists(ROLE_EXISTS_SQL, role).await?;
        if exists {
            self.roles.record(role);
        }
        Ok(exists)
    }

    async fn database_exists(
        &self,
        conn: &SharedConnection,
        cluster: &ClusterIdentity,
        database: &str,
    ) -> Result<bool, Error> {
        let key = database_key(cluster, database);
        if self.databases.holds(&key) {
            return Ok(true);
        }
        let exists = conn.query_exists(DATABASE_EXISTS_SQL, database).await?;
        if exists {
            self.databases.record(key);
        }
        Ok(exists)
    }

    async fn database_owned(
        &self,
        conn: &SharedConnection,
        cluster: &ClusterIdentity,
        user: &str,
        database: &str,
    ) -> Result<bool, Error> {
        let key = ownership_key(cluster, user, database);
        if self.ownership.holds(&key) {
            return Ok(true);
        }
        let Some(owner) = conn.query_text(DATABASE_OWNER_SQL, database).await? else {
            return Ok(false);
        };
        if owner != user {
            debug!(database = %database, owner = %owner, user = %user, "database owned by another role");
            return Ok(false);
        }
        self.ownership.record(key);
        Ok(true)
    }

    async fn make_owner(
        &self,
        conn: &SharedConnection,
        database: &str,
        user: &str,
    ) -> Result<(), Error> {
        conn.execute(&make_owner_sql(database, user)).await
    }

    async fn extension_installed(
        &self,
        conn: &SharedConnection,
        name: &str,
    ) -> Result<bool, Error> {
        if self.extensions.holds(name) {
            return Ok(true);
        }
        let installed = conn.query_column(INSTALLED_EXTENSIONS_SQL).await?;
        if !installed.iter().any(|ext| ext == name) {
            return Ok(false);
        }
        self.extensions.record(name);
        Ok(true)
    }

    async fn create_extension(
        &self,
        conn: &SharedConnection,
        name: &str,
        cascade: bool,
    ) -> Result<(), Error> {
        conn.execute(&create_extension_sql(name, cascade)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::postgres::MockSqlExecutor;
    use std::sync::Arc;

    fn cluster() -> ClusterIdentity {
        ClusterIdentity::new("test", "test")
    }

    fn conn(mock: MockSqlExecutor) -> SharedConnection {
        Arc::new(mock)
    }

    #[test]
    fn statements_have_expected_shape() {
        assert_eq!(
            make_owner_sql("bongo", "bingo"),
            r#"ALTER DATABASE "bongo" OWNER TO "bingo""#
        );
        assert_eq!(create_extension_sql("vector", false), "CREATE EXTENSION vector");
        assert_eq!(
            create_extension_sql("vector", true),
            "CREATE EXTENSION vector CASCADE"
        );
        assert_eq!(
            create_extension_sql("PostGIS", false),
            "CREATE EXTENSION PostGIS"
        );
        assert_eq!(
            create_extension_sql("uuid-ossp", false),
            r#"CREATE EXTENSION "uuid-ossp""#
        );
    }

    mod role_exists {
        use super::*;

        #[tokio::test]
        async fn found_role_is_cached_and_never_queried_again() {
            let mut mock = MockSqlExecutor::new();
            mock.expect_query_exists()
                .withf(|sql, arg| sql == ROLE_EXISTS_SQL && arg == "bongo")
                .times(1)
                .returning(|_, _| Ok(true));
            let conn = conn(mock);
            let processor = PgProcessor::new();

            assert!(processor.role_exists(&conn, "bongo").await.unwrap());
            assert!(processor.role_exists(&conn, "bongo").await.unwrap());
        }

        #[tokio::test]
        async fn missing_role_is_rechecked() {
            let mut mock = MockSqlExecutor::new();
            mock.expect_query_exists()
                .times(2)
                .returning(|_, _| Ok(false));
            let conn = conn(mock);
            let processor = PgProcessor::new();

            assert!(!processor.role_exists(&conn, "bongo").await.unwrap());
            assert!(!processor.role_exists(&conn, "bongo").await.unwrap());
        }

        #[tokio::test]
        async fn query_error_propagates_and_is_not_cached() {
            let mut mock = MockSqlExecutor::new();
            let mut seq = mockall::Sequence::new();
            mock.expect_query_exists()
                .times(1)
                .in_sequence(&mut seq)
                .returning(|_, _| Err(Error::database("connection reset")));
            mock.expect_query_exists()
                .times(1)
                .in_sequence(&mut seq)
                .returning(|_, _| Ok(true));
            let conn = conn(mock);
            let processor = PgProcessor::new();

            assert!(processor.role_exists(&conn, "bongo").await.is_err());
            assert!(processor.role_exists(&conn, "bongo").await.unwrap());
        }
    }

    mod database_exists {
        use super::*;

        #[tokio::test]
        async fn cache_is_scoped_per_cluster() {
            let mut mock = MockSqlExecutor::new();
            mock.expect_query_exists()
                .withf(|sql, arg| sql == DATABASE_EXISTS_SQL && arg == "bongo")
                .times(2)
                .returning(|_, _| Ok(true));
            let conn = conn(mock);
            let processor = PgProcessor::new();

            let other = ClusterIdentity::new("other", "test");
            assert!(processor
                .database_exists(&conn, &cluster(), "bongo")
                .await
                .unwrap());
            assert!(processor
                .database_exists(&conn, &cluster(), "bongo")
                .await
                .unwrap());
            assert!(processor
                .database_exists(&conn, &other, "bongo")
                .await
                .unwrap());
        }

        #[tokio::test]
        async fn absent_database_is_false() {
            let mut mock = MockSqlExecutor::new();
            mock.expect_query_exists().returning(|_, _| Ok(false));
            let conn = conn(mock);
            let processor = PgProcessor::new();

            assert!(!processor
                .database_exists(&conn, &cluster(), "bongo")
                .await
                .unwrap());
        }
    }

    mod database_owned {
        use super::*;

        #[tokio::test]
        async fn matching_owner_is_cached() {
            let mut mock = MockSqlExecutor::new();
            mock.expect_query_text()
                .withf(|sql, arg| sql == DATABASE_OWNER_SQL && arg == "bongo")
                .times(1)
                .returning(|_, _| Ok(Some("bongo".to_string())));
            let conn = conn(mock);
            let processor = PgProcessor::new();

            for _ in 0..3 {
                assert!(processor
                    .database_owned(&conn, &cluster(), "bongo", "bongo")
                    .await
                    .unwrap());
            }
        }

        #[tokio::test]
        async fn other_owner_is_false_and_not_cached() {
            let mut mock = MockSqlExecutor::new();
            mock.expect_query_text()
                .times(2)
                .returning(|_, _| Ok(Some("postgres".to_string())));
            let conn = conn(mock);
            let processor = PgProcessor::new();

            assert!(!processor
                .database_owned(&conn, &cluster(), "bongo", "bongo")
                .await
                .unwrap());
            assert!(!processor
                .database_owned(&conn, &cluster(), "bongo", "bongo")
                .await
                .unwrap());
        }

        #[tokio::test]
        async fn no_row_is_false() {
            let mut mock = MockSqlExecutor::new();
            mock.expect_query_text().returning(|_, _| Ok(None));
            let conn = conn(mock);
            let processor = PgProcessor::new();

            assert!(!processor
                .database_owned(&conn, &cluster(), "bongo", "bongo")
                .await
                .unwrap());
        }

        #[tokio::test]
        async fn ownership_is_cached_per_user() {
            let mut mock = MockSqlExecutor::new();
            mock.expect_query_text()
                .times(2)
                .returning(|_, _| Ok(Some("bongo".to_string())));
            let conn = conn(mock);
            let processor = PgProcessor::new();

            assert!(processor
                .database_owned(&conn, &cluster(), "bongo", "shared")
                .await
                .unwrap());
            assert!(!processor
                .database_owned(&conn, &cluster(), "bingo", "shared")
                .await
                .unwrap());
        }
    }

    mod extensions {
        use super::*;

        #[tokio::test]
        async fn installed_extension_is_cached() {
            let mut mock = MockSqlExecutor::new();
            mock.expect_query_column()
                .withf(|sql| sql == INSTALLED_EXTENSIONS_SQL)
                .times(1)
                .returning(|_| Ok(vec!["plpgsql".to_string(), "vector".to_string()]));
            let conn = conn(mock);
            let processor = PgProcessor::new();

            assert!(processor.extension_installed(&conn, "vector").await.unwrap());
            assert!(processor.extension_installed(&conn, "vector").await.unwrap());
        }

        #[tokio::test]
        async fn missing_extension_is_false() {
            let mut mock = MockSqlExecutor::new();
            mock.expect_query_column()
                .returning(|_| Ok(vec!["plpgsql".to_string()]));
            let conn = conn(mock);
            let processor = PgProcessor::new();

            assert!(!processor.extension_installed(&conn, "vector").await.unwrap());
        }

        /// Extension facts are shared across databases: once `vector` is seen
        /// in one database it is reported installed everywhere without asking.
        #[tokio::test]
        async fn installed_extension_is_shared_across_databases() {
            let mut app = MockSqlExecutor::new();
            app.expect_query_column()
                .times(1)
                .returning(|_| Ok(vec!["vector".to_string()]));
            let mut other = MockSqlExecutor::new();
            other.expect_query_column().never();

            let app = conn(app);
            let other = conn(other);
            let processor = PgProcessor::new();

            assert!(processor.extension_installed(&app, "vector").await.unwrap());
            assert!(processor.extension_installed(&other, "vector").await.unwrap());
        }

        #[tokio::test]
        async fn create_extension_issues_statement() {
            let mut mock = MockSqlExecutor::new();
            mock.expect_execute()
                .withf(|sql| sql == "CREATE EXTENSION postgis CASCADE")
                .times(1)
                .returning(|_| Ok(()));
            let conn = conn(mock);
            let processor = PgProcessor::new();

            processor
                .create_extension(&conn, "postgis", true)
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn make_owner_issues_alter_database() {
        let mut mock = MockSqlExecutor::new();
        mock.expect_execute()
            .withf(|sql| sql == r#"ALTER DATABASE "bingo" OWNER TO "bongo""#)
            .times(1)
            .returning(|_| Ok(()));
        let conn = conn(mock);
        let processor = PgProcessor::new();

        processor.make_owner(&conn, "bingo", "bongo").await.unwrap();
    }

    #[tokio::test]
    async fn make_owner_error_propagates() {
        let mut mock = MockSqlExecutor::new();
        mock.expect_execute()
            .returning(|_| Err(Error::database_during("exec", "permission denied")));
        let conn = conn(mock);
        let processor = PgProcessor::new();

        assert!(processor.make_owner(&conn, "bingo", "bongo").await.is_err());
    }
}
