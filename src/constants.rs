//! # Constants
//!
//! Shared constants used throughout the operator.
//!
//! These values represent reasonable defaults and can be overridden via
//! configuration or environment variables where applicable.

/// Field manager used for every write the operator makes
pub const FIELD_MANAGER: &str = "stack-operator";

/// Finalizer token placed on every `Stack` until uninstall has completed
pub const FINALIZER: &str = "stackops.io/finalizer";

/// Label linking a Module (or a Job it spawned) back to its Stack
pub const LABEL_STACK_NAME: &str = "stackops.io/stack-name";

/// Namespace companion of [`LABEL_STACK_NAME`]
pub const LABEL_STACK_NAMESPACE: &str = "stackops.io/stack-namespace";

/// Owner label stamped on Modules and on every override copy they use
pub const LABEL_MODULE_OWNER: &str = "stackops.io/module-owner";

/// Opt-in label for workloads restarted after an upgrade completes
pub const LABEL_RESTART_ON_UPGRADE: &str = "stackops.io/restart-on-upgrade";

/// Marks Jobs and Secrets that only matter while an upgrade runs; they are
/// deleted once the upgrade completes
pub const LABEL_UPGRADE_LEFTOVER: &str = "stackops.io/upgrade-leftover";

/// Pod template annotation bumped to force a rollout
pub const ANNOTATION_RESTARTED_AT: &str = "stackops.io/restartedAt";

/// Key under which CR-derived values are stored in the synthesized Secret
pub const GENERATED_OVERRIDES_KEY: &str = "stack-generated-overrides";

/// Suffix of the synthesized CR-derived values Secret (`{module}-overrides`)
pub const GENERATED_OVERRIDES_SUFFIX: &str = "overrides";

/// Name of the cluster registration Secret kept in the Stack's namespace
pub const REGISTRATION_SECRET_NAME: &str = "stack-cluster-registration";

/// Root CA bundle ConfigMap injected into namespaces, removed on uninstall
pub const ROOT_CA_CONFIGMAP_NAME: &str = "stack-root-ca";

/// Upgrade attempts tolerated before the Stack is marked Failed
pub const MAX_UPGRADE_FAILURES: usize = 5;

/// Default HTTP server port for metrics and health probes
pub const DEFAULT_METRICS_PORT: u16 = 5000;

/// Default requeue interval for reconciliation errors (seconds)
pub const DEFAULT_RECONCILIATION_ERROR_REQUEUE_SECS: u64 = 10;

/// Default short requeue used while waiting for Modules or namespaces (seconds)
pub const DEFAULT_SHORT_REQUEUE_SECS: u64 = 3;

/// Default capacity of the status update queue
pub const DEFAULT_STATUS_QUEUE_CAPACITY: usize = 256;

/// Default delay between status write attempts after a conflict (milliseconds)
pub const DEFAULT_STATUS_CONFLICT_RETRY_MS: u64 = 200;

/// Non-conflict failures tolerated for one status event before it is dropped
pub const DEFAULT_STATUS_MAX_API_RETRIES: u32 = 10;

/// Default delay before restarting watch stream after it ends (seconds)
pub const DEFAULT_WATCH_RESTART_DELAY_SECS: u64 = 5;

/// Default interval of the Module availability observer (seconds)
pub const DEFAULT_AVAILABILITY_INTERVAL_SECS: u64 = 30;

/// Default location of the component registry descriptors
pub const DEFAULT_COMPONENT_REGISTRY_PATH: &str = "/etc/stack-operator/components.yaml";

/// Default location of the bundled version manifest
pub const DEFAULT_BOM_PATH: &str = "/etc/stack-operator/bom.yaml";

/// Default location of the profile definitions
pub const DEFAULT_PROFILES_PATH: &str = "/etc/stack-operator/profiles.yaml";

/// Initial watch backoff after an API server throttle (milliseconds)
pub const DEFAULT_WATCH_BACKOFF_START_MS: u64 = 1_000;

/// Upper bound of the watch throttle backoff (milliseconds)
pub const DEFAULT_WATCH_BACKOFF_MAX_MS: u64 = 30_000;
