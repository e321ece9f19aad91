//! Superuser credential resolution
//!
//! Crunchy stores each user's connection details in a secret named
//! `{cluster}-pguser-{user}`. The resolver reads the one named by the
//! superuser annotation and memoizes the decoded credential per cluster for
//! the lifetime of the process (no rotation).

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::{Api, Client};
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use crate::store::Store;
use crate::types::{ClusterIdentity, SuperuserCredential};
use crate::Error;

/// Trait abstracting secret reads so resolution can be tested without a cluster
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SecretClient: Send + Sync {
    /// Fetch the decoded `data` of the secret `name` in `namespace`
    async fn get_secret(&self, namespace: &str, name: &str)
        -> Result<BTreeMap<String, Vec<u8>>, Error>;
}

/// [`SecretClient`] backed by the Kubernetes API
pub struct KubeSecretClient {
    client: Client,
}

impl KubeSecretClient {
    /// Create a new KubeSecretClient wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SecretClient for KubeSecretClient {
    async fn get_secret(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<BTreeMap<String, Vec<u8>>, Error> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let secret = api.get(name).await?;

        Ok(secret
            .data
            .unwrap_or_default()
            .into_iter()
            .map(|(k, v)| (k, v.0))
            .collect())
    }
}

/// Name of the secret holding the credentials of `user` in `cluster`
pub fn secret_name(cluster: &str, user: &str) -> String {
    format!("{cluster}-pguser-{user}")
}

/// Resolves and memoizes superuser credentials per cluster
pub struct SecretResolver {
    client: Arc<dyn SecretClient>,
    credentials: Store<SuperuserCredential>,
}

impl SecretResolver {
    /// Create a resolver reading secrets through `client`
    pub fn new(client: Arc<dyn SecretClient>) -> Self {
        Self {
            client,
            credentials: Store::new(),
        }
    }

    /// Resolve the superuser credential for `identity`
    ///
    /// A cached credential is returned without touching the API. On a miss
    /// the secret `{cluster}-pguser-{reference}` is read from the cluster's
    /// namespace; it must carry `host`, `port`, `user`, `dbname` and
    /// `password`. Failures are not cached, so the next watch notification
    /// tries again.
    pub async fn resolve(
        &self,
        identity: &ClusterIdentity,
        reference: &str,
    ) -> Result<SuperuserCredential, Error> {
        if let Some(credential) = self.credentials.get(&identity.key()) {
            return Ok(credential);
        }

        let name = secret_name(&identity.name, reference);
        debug!(cluster = %identity.name, namespace = %identity.namespace, secret = %name, "fetching superuser secret");
        let data = self.client.get_secret(&identity.namespace, &name).await?;
        let credential = decode_credential(&name, &data)?;

        self.credentials.put(identity.key(), credential.clone());
        Ok(credential)
    }
}

/// Decode a superuser credential from secret data
pub fn decode_credential(
    secret: &str,
    data: &BTreeMap<String, Vec<u8>>,
) -> Result<SuperuserCredential, Error> {
    let field = |key: &str| -> Result<String, Error> {
        let raw = data
            .get(key)
            .ok_or_else(|| Error::missing_field(secret, key))?;
        String::from_utf8(raw.clone()).map_err(|_| Error::invalid_field(secret, key))
    };

    let host = field("host")?;
    let raw_port = field("port")?;
    let port = raw_port
        .parse::<u16>()
        .map_err(|_| Error::invalid_port(secret, raw_port.clone()))?;
    let user = field("user")?;
    let database = field("dbname")?;
    let password = field("password")?;

    Ok(SuperuserCredential {
        host,
        port,
        user,
        password,
        database,
    })
}
