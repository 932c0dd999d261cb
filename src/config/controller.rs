//! # Controller Configuration
//!
//! Operator-level settings loaded from environment variables.

use std::path::PathBuf;
use std::time::Duration;

/// Operator-level configuration
///
/// All settings have sensible defaults and can be overridden via environment variables.
/// Environment variables are populated from a ConfigMap using `envFrom` in the deployment.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Namespace the operator runs in; never deleted during uninstall
    pub operator_namespace: String,
    /// Component descriptor file (YAML list)
    pub component_registry_path: PathBuf,
    /// Bundled version manifest
    pub bom_path: PathBuf,
    /// Profile definitions used to compute the effective state
    pub profiles_path: PathBuf,
    /// Reconciliation error requeue interval (seconds)
    /// How long to wait before retrying a reconcile that surfaced an error to the runtime
    pub reconciliation_error_requeue_secs: u64,
    /// Short requeue (seconds) used while waiting on Modules, namespaces or transient failures
    pub short_requeue_secs: u64,
    /// Capacity of the status update queue; producers block once it is full
    pub status_queue_capacity: usize,
    /// Delay between status write attempts after an optimistic-concurrency conflict
    pub status_conflict_retry_ms: u64,
    /// Non-conflict failures tolerated for a single status event
    pub status_max_api_retries: u32,
    /// Watch stream restart delay (seconds)
    pub watch_restart_delay_secs: u64,
    /// Module availability observer interval (seconds)
    pub availability_interval_secs: u64,
    /// Namespaces shared by several components, deleted on full uninstall
    pub shared_namespaces: Vec<String>,
    /// Cluster roles (and bindings of the same name) left behind by older releases
    pub legacy_cluster_roles: Vec<String>,
    /// Port for `/metrics`, `/healthz` and `/readyz`
    pub metrics_port: u16,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        use crate::constants::*;
        Self {
            operator_namespace: "stack-system".to_string(),
            component_registry_path: PathBuf::from(DEFAULT_COMPONENT_REGISTRY_PATH),
            bom_path: PathBuf::from(DEFAULT_BOM_PATH),
            profiles_path: PathBuf::from(DEFAULT_PROFILES_PATH),
            reconciliation_error_requeue_secs: DEFAULT_RECONCILIATION_ERROR_REQUEUE_SECS,
            short_requeue_secs: DEFAULT_SHORT_REQUEUE_SECS,
            status_queue_capacity: DEFAULT_STATUS_QUEUE_CAPACITY,
            status_conflict_retry_ms: DEFAULT_STATUS_CONFLICT_RETRY_MS,
            status_max_api_retries: DEFAULT_STATUS_MAX_API_RETRIES,
            watch_restart_delay_secs: DEFAULT_WATCH_RESTART_DELAY_SECS,
            availability_interval_secs: DEFAULT_AVAILABILITY_INTERVAL_SECS,
            shared_namespaces: Vec::new(),
            legacy_cluster_roles: Vec::new(),
            metrics_port: DEFAULT_METRICS_PORT,
        }
    }
}

impl ControllerConfig {
    /// Load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        use crate::constants::*;
        Self {
            operator_namespace: env_var_or_default_str("POD_NAMESPACE", "stack-system"),
            component_registry_path: PathBuf::from(env_var_or_default_str(
                "COMPONENT_REGISTRY_PATH",
                DEFAULT_COMPONENT_REGISTRY_PATH,
            )),
            bom_path: PathBuf::from(env_var_or_default_str("BOM_PATH", DEFAULT_BOM_PATH)),
            profiles_path: PathBuf::from(env_var_or_default_str(
                "PROFILES_PATH",
                DEFAULT_PROFILES_PATH,
            )),
            reconciliation_error_requeue_secs: env_var_or_default(
                "RECONCILIATION_ERROR_REQUEUE_SECS",
                DEFAULT_RECONCILIATION_ERROR_REQUEUE_SECS,
            ),
            short_requeue_secs: env_var_or_default("SHORT_REQUEUE_SECS", DEFAULT_SHORT_REQUEUE_SECS),
            status_queue_capacity: env_var_or_default(
                "STATUS_QUEUE_CAPACITY",
                DEFAULT_STATUS_QUEUE_CAPACITY,
            )
            .max(1),
            status_conflict_retry_ms: env_var_or_default(
                "STATUS_CONFLICT_RETRY_MS",
                DEFAULT_STATUS_CONFLICT_RETRY_MS,
            ),
            status_max_api_retries: env_var_or_default(
                "STATUS_MAX_API_RETRIES",
                DEFAULT_STATUS_MAX_API_RETRIES,
            ),
            watch_restart_delay_secs: env_var_or_default(
                "WATCH_RESTART_DELAY_SECS",
                DEFAULT_WATCH_RESTART_DELAY_SECS,
            ),
            availability_interval_secs: env_var_or_default(
                "AVAILABILITY_INTERVAL_SECS",
                DEFAULT_AVAILABILITY_INTERVAL_SECS,
            ),
            shared_namespaces: env_var_list("SHARED_NAMESPACES"),
            legacy_cluster_roles: env_var_list("LEGACY_CLUSTER_ROLES"),
            metrics_port: env_var_or_default("METRICS_PORT", DEFAULT_METRICS_PORT),
        }
    }

    /// Get reconciliation error requeue duration
    pub fn reconciliation_error_requeue_duration(&self) -> Duration {
        Duration::from_secs(self.reconciliation_error_requeue_secs)
    }

    /// Get the short requeue duration
    pub fn short_requeue_duration(&self) -> Duration {
        Duration::from_secs(self.short_requeue_secs)
    }

    /// Get the status conflict retry delay
    pub fn status_conflict_retry_duration(&self) -> Duration {
        Duration::from_millis(self.status_conflict_retry_ms)
    }

    /// Get watch restart delay duration
    pub fn watch_restart_delay_duration(&self) -> Duration {
        Duration::from_secs(self.watch_restart_delay_secs)
    }

    pub fn availability_interval_duration(&self) -> Duration {
        Duration::from_secs(self.availability_interval_secs.max(1))
    }
}

/// Read environment variable or return default value
fn env_var_or_default<T: std::str::FromStr>(key: &str, default: T) -> T
where
    <T as std::str::FromStr>::Err: std::fmt::Debug,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Read environment variable as string or return default
fn env_var_or_default_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Read a comma separated environment variable, ignoring blanks
fn env_var_list(key: &str) -> Vec<String> {
    std::env::var(key)
        .map(|v| parse_list(&v))
        .unwrap_or_default()
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
