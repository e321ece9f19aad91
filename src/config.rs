//! Process configuration and Kubernetes client construction
//!
//! Every setting can be given as a flag or through the environment. A `.env`
//! file in the working directory is loaded by the binary before parsing.

use std::path::PathBuf;
use std::time::Duration;

use clap::Args;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::Client;
use tracing::{debug, info};

use crate::postgres::PoolSettings;
use crate::{Error, DEFAULT_RESYNC_INTERVAL_SECS};

/// Log verbosity accepted by `LOG_LEVEL`
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogLevel {
    /// Everything, including per-step decisions
    Debug,
    /// Passes, corrective actions and skipped resources
    #[default]
    Info,
    /// Failures only
    Error,
}

impl LogLevel {
    /// Parse a level name; anything unrecognised is `Info`
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "debug" => LogLevel::Debug,
            "error" => LogLevel::Error,
            _ => LogLevel::Info,
        }
    }

    /// Directive understood by `tracing_subscriber::EnvFilter`
    pub fn as_directive(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Error => "error",
        }
    }
}

/// Runtime configuration for the `run` command
#[derive(Args, Clone, Debug)]
pub struct Config {
    /// Kubeconfig used when not running inside a cluster
    #[arg(long, env = "KUBE_CONFIG_PATH", default_value = "~/.kube/config")]
    pub kube_config_path: String,

    /// Log level: debug, info or error
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Seconds between full resyncs of every watched cluster
    #[arg(long, env = "RESYNC_INTERVAL_SECS", default_value_t = DEFAULT_RESYNC_INTERVAL_SECS)]
    pub resync_interval_secs: u64,

    /// Maximum pooled connections per database
    #[arg(long, env = "DB_MAX_CONNECTIONS", default_value_t = 5)]
    pub db_max_connections: u32,

    /// Seconds to wait for a database connection
    #[arg(long, env = "DB_CONNECT_TIMEOUT_SECS", default_value_t = 10)]
    pub db_connect_timeout_secs: u64,
}

impl Config {
    /// Parsed log level
    pub fn level(&self) -> LogLevel {
        LogLevel::parse(&self.log_level)
    }

    /// Resync period of the cluster watcher
    pub fn resync_interval(&self) -> Duration {
        Duration::from_secs(self.resync_interval_secs.max(1))
    }

    /// Pool settings for every connection the controller opens
    pub fn pool_settings(&self) -> PoolSettings {
        PoolSettings {
            max_connections: self.db_max_connections.max(1),
            acquire_timeout: Duration::from_secs(self.db_connect_timeout_secs),
        }
    }

    /// Kubeconfig path with a leading `~` expanded
    pub fn kubeconfig_path(&self) -> Result<PathBuf, Error> {
        expand_home(&self.kube_config_path)
    }
}

/// Expand a leading `~` to the current user's home directory
pub fn expand_home(path: &str) -> Result<PathBuf, Error> {
    let rest = match path.strip_prefix('~') {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => rest.trim_start_matches('/'),
        _ => return Ok(PathBuf::from(path)),
    };
    let home =
        dirs::home_dir().ok_or_else(|| Error::config("could not determine home directory"))?;
    Ok(if rest.is_empty() { home } else { home.join(rest) })
}

/// Build a Kubernetes client
///
/// Uses the in-cluster service account when available and falls back to the
/// configured kubeconfig otherwise.
pub async fn build_client(config: &Config) -> Result<Client, Error> {
    let kube_config = match kube::Config::incluster() {
        Ok(kube_config) => {
            info!("using in-cluster configuration");
            kube_config
        }
        Err(e) => {
            debug!(error = %e, "not running in cluster, falling back to kubeconfig");
            let path = config.kubeconfig_path()?;
            let kubeconfig = Kubeconfig::read_from(&path).map_err(|e| {
                Error::config(format!("failed to read kubeconfig {}: {}", path.display(), e))
            })?;
            info!(path = %path.display(), "using kubeconfig");
            kube::Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .map_err(|e| Error::config(format!("invalid kubeconfig: {}", e)))?
        }
    };

    Ok(Client::try_from(kube_config)?)
}
