//! Process-lifetime connection cache

use std::sync::Arc;

use tracing::debug;

use super::{Connector, SharedConnection};
use crate::store::Store;
use crate::types::SuperuserCredential;
use crate::Error;

/// Hands out one cached connection per `(host, user, database)`
///
/// A connection is pinged once when first opened and reused without further
/// checks afterwards. Connections that fail their ping are dropped and not
/// cached, so the next request opens a fresh one.
pub struct ConnectionProvider {
    connector: Arc<dyn Connector>,
    connections: Store<SharedConnection>,
}

impl ConnectionProvider {
    /// Create a provider opening connections through `connector`
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            connections: Store::new(),
        }
    }

    /// Get the connection for `credential`, opening and pinging it on first use
    pub async fn get(&self, credential: &SuperuserCredential) -> Result<SharedConnection, Error> {
        let key = credential.key();
        if let Some(conn) = self.connections.get(&key) {
            return Ok(conn);
        }

        let conn = self.connector.open(credential).await?;
        conn.ping().await?;
        debug!(key = %key, "connection opened");

        self.connections.put(key, conn.clone());
        Ok(conn)
    }

    /// Number of cached connections
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Whether no connection has been cached yet
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::postgres::{MockConnector, MockSqlExecutor};

    fn credential(database: &str) -> SuperuserCredential {
        SuperuserCredential {
            host: "127.0.0.1".to_string(),
            port: 5432,
            user: "postgres".to_string(),
            password: "postgres".to_string(),
            database: database.to_string(),
        }
    }

    fn healthy_connection() -> SharedConnection {
        let mut conn = MockSqlExecutor::new();
        conn.expect_ping().times(1).returning(|| Ok(()));
        Arc::new(conn)
    }

    #[tokio::test]
    async fn reuses_connection_without_pinging_again() {
        let mut connector = MockConnector::new();
        connector
            .expect_open()
            .times(1)
            .returning(|_| Ok(healthy_connection()));

        let provider = ConnectionProvider::new(Arc::new(connector));
        let first = provider.get(&credential("postgres")).await.unwrap();
        let second = provider.get(&credential("postgres")).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(provider.len(), 1);
    }

    #[tokio::test]
    async fn each_database_gets_its_own_connection() {
        let mut connector = MockConnector::new();
        connector
            .expect_open()
            .times(2)
            .returning(|_| Ok(healthy_connection()));

        let provider = ConnectionProvider::new(Arc::new(connector));
        provider.get(&credential("postgres")).await.unwrap();
        provider.get(&credential("app")).await.unwrap();

        assert_eq!(provider.len(), 2);
    }

    #[tokio::test]
    async fn failed_ping_is_not_cached() {
        let mut connector = MockConnector::new();
        let mut seq = mockall::Sequence::new();
        connector
            .expect_open()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| {
                let mut conn = MockSqlExecutor::new();
                conn.expect_ping()
                    .returning(|| Err(Error::database_during("ping", "connection refused")));
                Ok(Arc::new(conn) as SharedConnection)
            });
        connector
            .expect_open()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(healthy_connection()));

        let provider = ConnectionProvider::new(Arc::new(connector));
        assert!(provider.get(&credential("postgres")).await.is_err());
        assert!(provider.is_empty());

        assert!(provider.get(&credential("postgres")).await.is_ok());
        assert_eq!(provider.len(), 1);
    }

    #[tokio::test]
    async fn open_failure_propagates() {
        let mut connector = MockConnector::new();
        connector
            .expect_open()
            .returning(|_| Err(Error::database_during("open", "bad url")));

        let provider = ConnectionProvider::new(Arc::new(connector));
        let Err(err) = provider.get(&credential("postgres")).await else {
            panic!("expected open failure");
        };
        assert_eq!(err.context(), Some("open"));
        assert!(provider.is_empty());
    }
}
