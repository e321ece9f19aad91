//! Custom resource shapes consumed by the controller

mod postgres_cluster;

pub use postgres_cluster::{PostgresCluster, PostgresClusterSpec, PostgresUserSpec};
