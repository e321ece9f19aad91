//! Reconciliation against a real PostgreSQL server
//!
//! These tests need a superuser connection and are ignored by default:
//!
//! ```bash
//! PGHOST=127.0.0.1 PGPASSWORD=postgres cargo test --test postgres -- --ignored
//! ```
//!
//! `PGHOST`, `PGPORT`, `PGUSER`, `PGPASSWORD` and `PGDATABASE` default to a
//! local server with `postgres`/`postgres`.

use std::collections::BTreeMap;
use std::sync::Arc;

use crunchy_users::controller::Reconciler;
use crunchy_users::postgres::{ConnectionProvider, PgConnector, PoolSettings};
use crunchy_users::processor::PgProcessor;
use crunchy_users::types::{
    group_extensions, ClusterIdentity, DeclaredExtension, DeclaredUser, ReconciliationResult,
    SuperuserCredential,
};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::PgPool;

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn superuser() -> SuperuserCredential {
    SuperuserCredential {
        host: env_or("PGHOST", "127.0.0.1"),
        port: env_or("PGPORT", "5432").parse().unwrap(),
        user: env_or("PGUSER", "postgres"),
        password: env_or("PGPASSWORD", "postgres"),
        database: env_or("PGDATABASE", "postgres"),
    }
}

async fn admin_pool(credential: &SuperuserCredential) -> PgPool {
    let options = PgConnectOptions::new()
        .host(&credential.host)
        .port(credential.port)
        .username(&credential.user)
        .password(&credential.password)
        .database(&credential.database);
    PgPoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .expect("superuser connection")
}

async fn owner_of(pool: &PgPool, database: &str) -> String {
    sqlx::query_scalar("SELECT datdba::regrole::text FROM pg_database WHERE datname = $1")
        .bind(database)
        .fetch_one(pool)
        .await
        .unwrap()
}

/// Story: a user declared on a cluster takes over its database
///
/// The role and database are created up front by the "operator"; the pass
/// transfers ownership and installs the declared extension, and a second
/// pass changes nothing.
#[tokio::test]
#[ignore]
async fn story_ownership_and_extension_converge() {
    let credential = superuser();
    let admin = admin_pool(&credential).await;

    let user = "crunchy_users_it";
    let database = "crunchy_users_it";

    sqlx::raw_sql(&format!("DROP DATABASE IF EXISTS {database}"))
        .execute(&admin)
        .await
        .unwrap();
    sqlx::raw_sql(&format!("DROP ROLE IF EXISTS {user}"))
        .execute(&admin)
        .await
        .unwrap();
    sqlx::raw_sql(&format!("CREATE ROLE {user} LOGIN"))
        .execute(&admin)
        .await
        .unwrap();
    sqlx::raw_sql(&format!("CREATE DATABASE {database}"))
        .execute(&admin)
        .await
        .unwrap();
    assert_ne!(owner_of(&admin, database).await, user);

    let result = ReconciliationResult {
        identity: ClusterIdentity::new("hippo", "it"),
        credential: credential.clone(),
        users: vec![DeclaredUser {
            name: user.to_string(),
            databases: vec![database.to_string(), "crunchy_users_missing".to_string()],
        }],
        extensions: group_extensions(vec![DeclaredExtension {
            database: database.to_string(),
            extension: "pg_trgm".to_string(),
            cascade: false,
        }]),
    };

    let reconciler = Reconciler::new(
        Arc::new(PgProcessor::new()),
        ConnectionProvider::new(Arc::new(PgConnector::new(PoolSettings::default()))),
    );

    let first = reconciler.reconcile(&result).await;
    assert_eq!(first.ownership_transfers, 1);
    assert_eq!(first.extensions_created, 1);
    assert_eq!(first.failed_steps, 0);
    assert_eq!(owner_of(&admin, database).await, user);

    let target = admin_pool(&credential.for_database(database)).await;
    let installed: Vec<String> = sqlx::query_scalar("SELECT extname FROM pg_extension")
        .fetch_all(&target)
        .await
        .unwrap();
    assert!(installed.iter().any(|e| e == "pg_trgm"));
    target.close().await;

    let second = reconciler.reconcile(&result).await;
    assert_eq!(second.ownership_transfers, 0);
    assert_eq!(second.extensions_created, 0);
    assert_eq!(second.failed_steps, 0);
}

#[tokio::test]
#[ignore]
async fn missing_role_is_left_alone() {
    let credential = superuser();
    let result = ReconciliationResult {
        identity: ClusterIdentity::new("hippo", "it"),
        credential,
        users: vec![DeclaredUser {
            name: "crunchy_users_nobody".to_string(),
            databases: vec!["postgres".to_string()],
        }],
        extensions: BTreeMap::new(),
    };

    let reconciler = Reconciler::new(
        Arc::new(PgProcessor::new()),
        ConnectionProvider::new(Arc::new(PgConnector::new(PoolSettings::default()))),
    );
    let summary = reconciler.reconcile(&result).await;

    assert_eq!(summary.users, 1);
    assert_eq!(summary.databases, 0);
    assert_eq!(summary.failed_steps, 0);
}
