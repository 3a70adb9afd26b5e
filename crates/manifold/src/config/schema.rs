use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::controller::Backoff;
use crate::deployment::DEFAULT_NAMESPACE;

/// Operator settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatorConfig {
    /// Namespace assumed for deployments that do not name one.
    #[serde(default = "default_namespace")]
    pub namespace: String,

    #[serde(default = "default_worker_count")]
    pub worker_count: usize,

    /// Upper bound on resolving a single deployment.
    #[serde(default = "default_reconcile_timeout")]
    pub reconcile_timeout_secs: u64,

    /// Local retries on a version conflict before giving up.
    #[serde(default = "default_max_conflict_retries")]
    pub max_conflict_retries: u32,

    #[serde(default = "default_retry_base_delay")]
    pub retry_base_delay_ms: u64,

    #[serde(default = "default_retry_max_delay")]
    pub retry_max_delay_secs: u64,

    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: u64,

    /// Capacity of the watch event channel.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,

    /// Directory of the filesystem secret store. In-memory when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_store_dir: Option<PathBuf>,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            worker_count: default_worker_count(),
            reconcile_timeout_secs: default_reconcile_timeout(),
            max_conflict_retries: default_max_conflict_retries(),
            retry_base_delay_ms: default_retry_base_delay(),
            retry_max_delay_secs: default_retry_max_delay(),
            http_timeout_secs: default_http_timeout(),
            event_buffer: default_event_buffer(),
            secret_store_dir: None,
        }
    }
}

impl OperatorConfig {
    pub fn reconcile_timeout(&self) -> Duration {
        Duration::from_secs(self.reconcile_timeout_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn backoff(&self) -> Backoff {
        Backoff::new(
            Duration::from_millis(self.retry_base_delay_ms),
            Duration::from_secs(self.retry_max_delay_secs),
        )
    }
}

fn default_namespace() -> String {
    DEFAULT_NAMESPACE.to_string()
}

fn default_worker_count() -> usize {
    num_cpus::get()
}

fn default_reconcile_timeout() -> u64 {
    10
}

fn default_max_conflict_retries() -> u32 {
    5
}

fn default_retry_base_delay() -> u64 {
    500
}

fn default_retry_max_delay() -> u64 {
    300
}

fn default_http_timeout() -> u64 {
    30
}

fn default_event_buffer() -> usize {
    crate::store::memory::DEFAULT_EVENT_BUFFER
}
