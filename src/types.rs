//! Data model shared between the watcher and the convergence loop

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifies a watched PostgresCluster
///
/// Used as the prefix of every cache key that is scoped to a cluster.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ClusterIdentity {
    /// Resource name
    pub name: String,
    /// Resource namespace
    pub namespace: String,
}

impl ClusterIdentity {
    /// Create a new identity
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
        }
    }

    /// Cache key for this cluster (`name:namespace`)
    pub fn key(&self) -> String {
        format!("{}:{}", self.name, self.namespace)
    }
}

impl fmt::Display for ClusterIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Connection parameters of a cluster superuser
#[derive(Clone, PartialEq, Eq)]
pub struct SuperuserCredential {
    /// Database host
    pub host: String,
    /// Database port
    pub port: u16,
    /// Role to connect as
    pub user: String,
    /// Password for `user`
    pub password: String,
    /// Database to connect to
    pub database: String,
}

impl SuperuserCredential {
    /// Connection URL for this credential
    pub fn url(&self) -> String {
        format!(
            "postgresql://{}:{}@{}:{}/{}",
            self.user, self.password, self.host, self.port, self.database
        )
    }

    /// Key identifying the connection this credential opens (`host:user:database`)
    pub fn key(&self) -> String {
        format!("{}:{}:{}", self.host, self.user, self.database)
    }

    /// The same credential pointed at another database
    pub fn for_database(&self, database: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            ..self.clone()
        }
    }
}

impl fmt::Debug for SuperuserCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SuperuserCredential")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("database", &self.database)
            .finish()
    }
}

/// A user declared in `spec.users` and the databases it should own
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeclaredUser {
    /// Role name
    pub name: String,
    /// Databases in declaration order
    pub databases: Vec<String>,
}

/// An extension declared in the extensions annotation
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeclaredExtension {
    /// Database the extension is installed into
    pub database: String,
    /// Extension name
    pub extension: String,
    /// Whether to install with `CASCADE`
    #[serde(default)]
    pub cascade: bool,
}

/// Normalized view of one watched cluster, produced per watch notification
#[derive(Clone, Debug, PartialEq)]
pub struct ReconciliationResult {
    /// Cluster the result was derived from
    pub identity: ClusterIdentity,
    /// Superuser used for every statement of the pass
    pub credential: SuperuserCredential,
    /// Declared users in declaration order
    pub users: Vec<DeclaredUser>,
    /// Declared extensions grouped by target database
    pub extensions: BTreeMap<String, Vec<DeclaredExtension>>,
}

impl ReconciliationResult {
    /// Extensions declared for `database`, in declaration order
    pub fn extensions_for(&self, database: &str) -> &[DeclaredExtension] {
        self.extensions
            .get(database)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}

/// Group extensions by target database, keeping declaration order per database
pub fn group_extensions(
    extensions: Vec<DeclaredExtension>,
) -> BTreeMap<String, Vec<DeclaredExtension>> {
    let mut grouped: BTreeMap<String, Vec<DeclaredExtension>> = BTreeMap::new();
    for ext in extensions {
        grouped.entry(ext.database.clone()).or_default().push(ext);
    }
    grouped
}
