//! PostgresCluster custom resource (Crunchy Data postgres-operator)
//!
//! We do not own this CRD; only the fields the controller reads are modelled
//! and everything else in the spec is ignored on deserialization.

use std::collections::BTreeMap;

use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::types::ClusterIdentity;

/// Subset of the PostgresCluster spec relevant to user reconciliation
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "postgres-operator.crunchydata.com",
    version = "v1beta1",
    kind = "PostgresCluster",
    plural = "postgresclusters",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct PostgresClusterSpec {
    /// Users the operator provisions, with the databases they are granted
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub users: Vec<PostgresUserSpec>,
}

/// A user entry in `spec.users`
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct PostgresUserSpec {
    /// Role name
    pub name: String,

    /// Databases this user should own
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub databases: Vec<String>,
}

impl PostgresCluster {
    /// Identity of this cluster
    pub fn identity(&self) -> ClusterIdentity {
        ClusterIdentity::new(self.name_any(), self.namespace().unwrap_or_default())
    }

    /// Label value for `key`, if set
    pub fn label(&self, key: &str) -> Option<&str> {
        lookup(self.metadata.labels.as_ref(), key)
    }

    /// Annotation value for `key`, if set
    pub fn annotation(&self, key: &str) -> Option<&str> {
        lookup(self.metadata.annotations.as_ref(), key)
    }
}

fn lookup<'a>(map: Option<&'a BTreeMap<String, String>>, key: &str) -> Option<&'a str> {
    map.and_then(|m| m.get(key)).map(String::as_str)
}
