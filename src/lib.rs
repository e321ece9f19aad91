//! crunchy-users - declarative database ownership and extensions for Crunchy PostgresClusters
//!
//! The controller watches `PostgresCluster` resources that opt in with a label,
//! reads the users/databases they declare plus an optional extensions
//! annotation, and converges each database towards "owned by its declared
//! user, with the declared extensions installed". It never creates roles and
//! never undoes changes made by hand; it only drives state forward.
//!
//! # Architecture
//!
//! Data flows in one direction:
//!
//! ```text
//! watch event -> ClusterWatcher -> ReconciliationResult -> channel(1)
//!     -> controller::run -> Reconciler -> Processor -> SQL
//! ```
//!
//! Facts that were observed to hold (a role exists, a database is owned by
//! its user, ...) are memoized for the lifetime of the process so repeated
//! passes do not re-issue redundant queries.
//!
//! # Modules
//!
//! - [`config`] - Process configuration and platform client construction
//! - [`controller`] - Reconciliation pass and the convergence loop
//! - [`crd`] - Typed `PostgresCluster` shape and the labels/annotations we read
//! - [`postgres`] - SQL executor abstraction and the connection provider
//! - [`processor`] - Idempotent check-then-act database operations
//! - [`secret`] - Superuser credential resolution
//! - [`store`] - Generic memoization store and the fact cache
//! - [`telemetry`] - Structured logging setup
//! - [`types`] - Data model shared between watcher and controller
//! - [`watcher`] - PostgresCluster watch, filtering and normalisation
//! - [`error`] - Error types

#![deny(missing_docs)]

pub mod config;
pub mod controller;
pub mod crd;
pub mod error;
pub mod postgres;
pub mod processor;
pub mod secret;
pub mod store;
pub mod telemetry;
pub mod types;
pub mod watcher;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Resource contract
// =============================================================================
// Labels and annotations are part of the public contract with resource
// authors and must stay bit-exact.

/// Label that opts a PostgresCluster into reconciliation (value must be `"true"`)
pub const WATCH_LABEL: &str = "crunchy-users.henrywhitaker3.github.com/watch";

/// Annotation naming the superuser whose secret we connect with
pub const SUPERUSER_ANNOTATION: &str = "crunchy-users.henrywhitaker3.github.com/superuser";

/// Annotation holding a JSON array of `{database, extension, cascade}`
pub const EXTENSIONS_ANNOTATION: &str = "crunchy-users.henrywhitaker3.github.com/extensions";

/// Capacity of the watcher -> controller channel
///
/// A capacity of one serialises reconciliation passes: the watcher blocks
/// until the previous result has been picked up by the convergence loop.
pub const CHANNEL_CAPACITY: usize = 1;

/// Default informer resync interval in seconds
pub const DEFAULT_RESYNC_INTERVAL_SECS: u64 = 60;
