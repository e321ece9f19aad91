//! PostgresCluster watch
//!
//! Watches every PostgresCluster in every namespace, filters out those that
//! have not opted in, normalizes the declared users and extensions and hands
//! the result to the convergence loop over a channel of capacity one. The
//! send blocks while a previous result is still being processed, which
//! serializes reconciliation passes.
//!
//! kube-rs watchers have no informer-style resync, so objects are mirrored in
//! a reflector store and re-handled every resync interval.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use kube::api::{ApiResource, DynamicObject};
use kube::runtime::reflector::{self, store::Writer};
use kube::runtime::watcher::{self, Event};
use kube::runtime::WatchStreamExt;
use kube::{Api, Client, ResourceExt};
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::crd::PostgresCluster;
use crate::secret::SecretResolver;
use crate::types::{group_extensions, DeclaredExtension, DeclaredUser, ReconciliationResult};
use crate::{Error, CHANNEL_CAPACITY, EXTENSIONS_ANNOTATION, SUPERUSER_ANNOTATION, WATCH_LABEL};

/// Why a cluster produced no reconciliation result
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SkipReason {
    /// The watch label is absent or not `"true"`
    NotWatched,
    /// The superuser annotation is absent
    MissingSuperuser,
    /// No users and no extensions are declared
    NothingDeclared,
}

/// What a cluster declares, before credentials are resolved
#[derive(Clone, Debug, PartialEq)]
pub struct DeclaredState {
    /// Superuser reference from the superuser annotation
    pub superuser: String,
    /// Declared users in declaration order
    pub users: Vec<DeclaredUser>,
    /// Declared extensions grouped by database
    pub extensions: BTreeMap<String, Vec<DeclaredExtension>>,
}

/// Outcome of handling one watch notification
#[derive(Clone, Debug, PartialEq)]
pub enum HandleOutcome {
    /// A result was sent to the convergence loop
    Emitted,
    /// The cluster was filtered out
    Skipped(SkipReason),
    /// The object is not a valid PostgresCluster
    Invalid,
    /// The superuser credential could not be resolved
    CredentialUnavailable,
    /// The convergence loop is gone
    ChannelClosed,
}

/// Parse the extensions annotation
///
/// An absent annotation is an empty list.
pub fn parse_extensions(raw: Option<&str>) -> Result<Vec<DeclaredExtension>, Error> {
    match raw {
        Some(raw) => Ok(serde_json::from_str(raw)?),
        None => Ok(Vec::new()),
    }
}

/// Read a watched object as a typed PostgresCluster
pub fn parse_cluster(obj: &DynamicObject) -> Result<PostgresCluster, Error> {
    serde_json::to_value(obj)
        .and_then(serde_json::from_value)
        .map_err(|e| Error::serialization_for_kind("PostgresCluster", e.to_string()))
}

/// Filter and normalize a cluster's declared state
///
/// A malformed extensions annotation is logged and treated as empty.
pub fn declared_state(cluster: &PostgresCluster) -> Result<DeclaredState, SkipReason> {
    let name = cluster.name_any();
    let namespace = cluster.namespace().unwrap_or_default();

    if cluster.label(WATCH_LABEL) != Some("true") {
        debug!(cluster = %name, namespace = %namespace, "skipping cluster as it is not being watched");
        return Err(SkipReason::NotWatched);
    }

    let Some(superuser) = cluster.annotation(SUPERUSER_ANNOTATION) else {
        error!(
            cluster = %name,
            namespace = %namespace,
            annotation = SUPERUSER_ANNOTATION,
            "skipping cluster as superuser annotation not set"
        );
        return Err(SkipReason::MissingSuperuser);
    };

    let extensions = parse_extensions(cluster.annotation(EXTENSIONS_ANNOTATION)).unwrap_or_else(|e| {
        error!(cluster = %name, namespace = %namespace, error = %e, "failed to parse extensions annotation");
        Vec::new()
    });
    let extensions = group_extensions(extensions);

    let users: Vec<DeclaredUser> = cluster
        .spec
        .users
        .iter()
        .map(|u| DeclaredUser {
            name: u.name.clone(),
            databases: u.databases.clone(),
        })
        .collect();

    if users.is_empty() && extensions.is_empty() {
        info!(cluster = %name, namespace = %namespace, "skipping cluster as there are no users or extensions");
        return Err(SkipReason::NothingDeclared);
    }

    Ok(DeclaredState {
        superuser: superuser.to_string(),
        users,
        extensions,
    })
}

/// Create the watcher -> convergence loop channel
pub fn channel() -> (
    mpsc::Sender<ReconciliationResult>,
    mpsc::Receiver<ReconciliationResult>,
) {
    mpsc::channel(CHANNEL_CAPACITY)
}

/// Turns PostgresCluster notifications into reconciliation results
pub struct ClusterWatcher {
    resolver: Arc<SecretResolver>,
    out: mpsc::Sender<ReconciliationResult>,
}

impl ClusterWatcher {
    /// Create a watcher resolving credentials with `resolver` and emitting on `out`
    pub fn new(resolver: Arc<SecretResolver>, out: mpsc::Sender<ReconciliationResult>) -> Self {
        Self { resolver, out }
    }

    /// Handle one added or updated object
    pub async fn handle(&self, obj: DynamicObject) -> HandleOutcome {
        let cluster = match parse_cluster(&obj) {
            Ok(cluster) => cluster,
            Err(e) => {
                error!(
                    cluster = %obj.name_any(),
                    namespace = ?obj.namespace(),
                    error = %e,
                    "couldn't deserialize resource as PostgresCluster"
                );
                return HandleOutcome::Invalid;
            }
        };

        let declared = match declared_state(&cluster) {
            Ok(declared) => declared,
            Err(reason) => return HandleOutcome::Skipped(reason),
        };

        let identity = cluster.identity();
        let credential = match self.resolver.resolve(&identity, &declared.superuser).await {
            Ok(credential) => credential,
            Err(e) if e.is_configuration_error() => {
                error!(
                    cluster = %identity.name,
                    namespace = %identity.namespace,
                    error = %e,
                    "skipping, superuser secret is invalid"
                );
                return HandleOutcome::CredentialUnavailable;
            }
            Err(e) => {
                warn!(
                    cluster = %identity.name,
                    namespace = %identity.namespace,
                    error = %e,
                    retryable = e.is_transient(),
                    "skipping, could not get superuser credentials"
                );
                return HandleOutcome::CredentialUnavailable;
            }
        };

        let result = ReconciliationResult {
            identity,
            credential,
            users: declared.users,
            extensions: declared.extensions,
        };

        match self.out.send(result).await {
            Ok(()) => HandleOutcome::Emitted,
            Err(_) => {
                let e = Error::internal_with_context("watcher", "result channel closed");
                warn!(cluster = %cluster.name_any(), error = %e, "dropping result");
                HandleOutcome::ChannelClosed
            }
        }
    }

    /// Watch PostgresClusters across all namespaces until cancelled
    pub async fn run(self, client: Client, resync: Duration, cancel: CancellationToken) {
        let resource = ApiResource::erase::<PostgresCluster>(&());
        let api: Api<DynamicObject> = Api::all_with(client, &resource);

        let writer = Writer::new(resource);
        let store = writer.as_reader();
        let events = reflector::reflector(writer, watcher::watcher(api, watcher::Config::default()))
            .default_backoff();
        let mut events = std::pin::pin!(events);

        let mut resync_timer = tokio::time::interval_at(Instant::now() + resync, resync);
        resync_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(resync_secs = resync.as_secs(), "watching clusters");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.next() => {
                    let obj = match event {
                        Some(Ok(Event::InitApply(obj))) | Some(Ok(Event::Apply(obj))) => obj,
                        Some(Ok(Event::Delete(obj))) => {
                            debug!(cluster = %obj.name_any(), "cluster deleted, nothing to do");
                            continue;
                        }
                        Some(Ok(Event::Init)) | Some(Ok(Event::InitDone)) => {
                            debug!("watcher initialized");
                            continue;
                        }
                        Some(Err(e)) => {
                            warn!(error = %e, "watcher error, will retry");
                            continue;
                        }
                        None => {
                            warn!("watch stream ended");
                            break;
                        }
                    };
                    if self.handle(obj).await == HandleOutcome::ChannelClosed {
                        break;
                    }
                }
                _ = resync_timer.tick() => {
                    let objects = store.state();
                    debug!(count = objects.len(), "resyncing clusters");
                    for obj in objects {
                        if self.handle(obj.as_ref().clone()).await == HandleOutcome::ChannelClosed {
                            info!("cluster watcher stopped");
                            return;
                        }
                    }
                }
            }
        }

        info!("cluster watcher stopped");
    }
}
