//! One reconciliation pass over a cluster's declared state
//!
//! Users are processed in declaration order, databases within a user in
//! declaration order. Every failing step is logged and counted; siblings are
//! still processed and the pass itself never fails.

use std::sync::Arc;

use tracing::{debug, error, info};

use crate::postgres::{ConnectionProvider, SharedConnection};
use crate::processor::Processor;
use crate::types::{DeclaredExtension, ReconciliationResult};

/// What one pass looked at and changed
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PassSummary {
    /// Declared users visited
    pub users: usize,
    /// Databases visited, across users whose role exists
    pub databases: usize,
    /// Extensions visited, across databases that exist
    pub extensions: usize,
    /// Ownership transfers issued successfully
    pub ownership_transfers: usize,
    /// Extensions created successfully
    pub extensions_created: usize,
    /// Steps that failed and were skipped
    pub failed_steps: usize,
}

/// Drives one cluster's databases towards their declared state
///
/// Constructed once at startup; the processor's fact caches and the
/// connection provider live as long as the reconciler does.
pub struct Reconciler {
    processor: Arc<dyn Processor>,
    connections: ConnectionProvider,
}

impl Reconciler {
    /// Create a reconciler from a processor and a connection provider
    pub fn new(processor: Arc<dyn Processor>, connections: ConnectionProvider) -> Self {
        Self {
            processor,
            connections,
        }
    }

    /// Run a full pass over `result`
    ///
    /// Counts are logged once per pass, including passes that end early.
    pub async fn reconcile(&self, result: &ReconciliationResult) -> PassSummary {
        let cluster = &result.identity;
        info!(cluster = %cluster.name, namespace = %cluster.namespace, "processing cluster");

        let mut summary = PassSummary::default();
        self.reconcile_users(result, &mut summary).await;

        info!(
            cluster = %cluster.name,
            namespace = %cluster.namespace,
            users = summary.users,
            databases = summary.databases,
            extensions = summary.extensions,
            ownership_transfers = summary.ownership_transfers,
            extensions_created = summary.extensions_created,
            failed_steps = summary.failed_steps,
            "cluster processed"
        );

        summary
    }

    async fn reconcile_users(&self, result: &ReconciliationResult, summary: &mut PassSummary) {
        let cluster = &result.identity;

        let superuser = match self.connections.get(&result.credential).await {
            Ok(conn) => conn,
            Err(e) => {
                error!(
                    cluster = %cluster.name,
                    namespace = %cluster.namespace,
                    error = %e,
                    retryable = e.is_transient(),
                    "could not open db connection"
                );
                summary.failed_steps += 1;
                return;
            }
        };

        for user in &result.users {
            summary.users += 1;

            match self.processor.role_exists(&superuser, &user.name).await {
                Ok(true) => {}
                Ok(false) => {
                    info!(cluster = %cluster.name, user = %user.name, "user does not exist, skipping");
                    continue;
                }
                Err(e) => {
                    error!(
                        cluster = %cluster.name,
                        user = %user.name,
                        error = %e,
                        retryable = e.is_transient(),
                        "could not determine if user exists"
                    );
                    summary.failed_steps += 1;
                    continue;
                }
            }

            for database in &user.databases {
                summary.databases += 1;
                self.reconcile_database(&superuser, result, &user.name, database, summary)
                    .await;
            }
        }
    }

    async fn reconcile_database(
        &self,
        superuser: &SharedConnection,
        result: &ReconciliationResult,
        user: &str,
        database: &str,
        summary: &mut PassSummary,
    ) {
        let cluster = &result.identity;

        match self
            .processor
            .database_exists(superuser, cluster, database)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                debug!(cluster = %cluster.name, database = %database, "database does not exist, skipping");
                return;
            }
            Err(e) => {
                error!(
                    cluster = %cluster.name,
                    database = %database,
                    error = %e,
                    retryable = e.is_transient(),
                    "could not determine if database exists"
                );
                summary.failed_steps += 1;
                return;
            }
        }

        match self
            .processor
            .database_owned(superuser, cluster, user, database)
            .await
        {
            Ok(true) => {
                debug!(cluster = %cluster.name, user = %user, database = %database, "user owns the database");
            }
            Ok(false) => {
                info!(cluster = %cluster.name, user = %user, database = %database, "updating database owner");
                match self.processor.make_owner(superuser, database, user).await {
                    Ok(()) => summary.ownership_transfers += 1,
                    Err(e) => {
                        error!(
                            cluster = %cluster.name,
                            user = %user,
                            database = %database,
                            error = %e,
                            retryable = e.is_transient(),
                            "could not make user the owner"
                        );
                        summary.failed_steps += 1;
                    }
                }
            }
            Err(e) => {
                error!(
                    cluster = %cluster.name,
                    user = %user,
                    database = %database,
                    error = %e,
                    retryable = e.is_transient(),
                    "could not determine if user owns the database"
                );
                summary.failed_steps += 1;
                return;
            }
        }

        for extension in result.extensions_for(database) {
            summary.extensions += 1;
            self.reconcile_extension(result, extension, summary).await;
        }
    }

    async fn reconcile_extension(
        &self,
        result: &ReconciliationResult,
        extension: &DeclaredExtension,
        summary: &mut PassSummary,
    ) {
        let cluster = &result.identity;
        let credential = result.credential.for_database(&extension.database);

        let conn = match self.connections.get(&credential).await {
            Ok(conn) => conn,
            Err(e) => {
                error!(
                    cluster = %cluster.name,
                    database = %extension.database,
                    error = %e,
                    retryable = e.is_transient(),
                    "could not open db connection"
                );
                summary.failed_steps += 1;
                return;
            }
        };

        match self
            .processor
            .extension_installed(&conn, &extension.extension)
            .await
        {
            Ok(true) => {
                debug!(
                    cluster = %cluster.name,
                    database = %extension.database,
                    extension = %extension.extension,
                    "extension already installed"
                );
            }
            Ok(false) => {
                info!(
                    cluster = %cluster.name,
                    database = %extension.database,
                    extension = %extension.extension,
                    cascade = extension.cascade,
                    "creating extension"
                );
                match self
                    .processor
                    .create_extension(&conn, &extension.extension, extension.cascade)
                    .await
                {
                    Ok(()) => summary.extensions_created += 1,
                    Err(e) => {
                        error!(
                            cluster = %cluster.name,
                            database = %extension.database,
                            extension = %extension.extension,
                            error = %e,
                            retryable = e.is_transient(),
                            "could not create extension"
                        );
                        summary.failed_steps += 1;
                    }
                }
            }
            Err(e) => {
                error!(
                    cluster = %cluster.name,
                    database = %extension.database,
                    extension = %extension.extension,
                    error = %e,
                    retryable = e.is_transient(),
                    "could not determine if extension is installed"
                );
                summary.failed_steps += 1;
            }
        }
    }
}
