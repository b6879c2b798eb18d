//! Operator configuration.
//!
//! Values come from `KVREPL_*` environment variables with defaults for
//! anything unset:
//!
//! | Variable | Default |
//! |----------|---------|
//! | `KVREPL_ADMIN_PORT` | `6379` |
//! | `KVREPL_PART_OF` | `kvrepl` |
//! | `KVREPL_ROLE_LABEL` | `role` |
//! | `KVREPL_FIELD_MANAGER` | `kvrepl-operator` |
//! | `KVREPL_COMMAND_TIMEOUT_MS` | unset (transport default) |
//! | `KVREPL_ERROR_REQUEUE_SECS` | `30` |

use crate::error::{OperatorError, OperatorResult};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

/// Configuration shared by the controller and the engine's collaborators.
///
/// # Example
///
/// ```
/// use kvrepl_operator::OperatorConfig;
///
/// let config = OperatorConfig::default()
///     .admin_port(6380)
///     .command_timeout_ms(2_000);
///
/// assert_eq!(config.admin_port, 6380);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperatorConfig {
    /// Administrative port every node listens on.
    #[serde(default = "default_admin_port")]
    pub admin_port: u16,

    /// Value of the `app.kubernetes.io/part-of` label on member pods.
    #[serde(default = "default_part_of")]
    pub part_of: String,

    /// Pod label key holding the assigned role.
    #[serde(default = "default_role_label")]
    pub role_label: String,

    /// Field manager used for Kubernetes patches.
    #[serde(default = "default_field_manager")]
    pub field_manager: String,

    /// Bound on connect plus reply for a single directive.
    #[serde(default)]
    pub command_timeout_ms: Option<u64>,

    /// Requeue delay after a failed reconciliation, in seconds.
    #[serde(default = "default_error_requeue_secs")]
    pub error_requeue_secs: u64,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            admin_port: default_admin_port(),
            part_of: default_part_of(),
            role_label: default_role_label(),
            field_manager: default_field_manager(),
            command_timeout_ms: None,
            error_requeue_secs: default_error_requeue_secs(),
        }
    }
}

impl OperatorConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> OperatorResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> OperatorResult<Self> {
        let defaults = Self::default();

        Ok(Self {
            admin_port: parse_var(&lookup, "KVREPL_ADMIN_PORT")?.unwrap_or(defaults.admin_port),
            part_of: lookup("KVREPL_PART_OF").unwrap_or(defaults.part_of),
            role_label: lookup("KVREPL_ROLE_LABEL").unwrap_or(defaults.role_label),
            field_manager: lookup("KVREPL_FIELD_MANAGER").unwrap_or(defaults.field_manager),
            command_timeout_ms: parse_var(&lookup, "KVREPL_COMMAND_TIMEOUT_MS")?,
            error_requeue_secs: parse_var(&lookup, "KVREPL_ERROR_REQUEUE_SECS")?
                .unwrap_or(defaults.error_requeue_secs),
        })
    }

    /// Set the administrative port.
    pub fn admin_port(mut self, port: u16) -> Self {
        self.admin_port = port;
        self
    }

    /// Set the part-of label value.
    pub fn part_of(mut self, value: impl Into<String>) -> Self {
        self.part_of = value.into();
        self
    }

    /// Set the role label key.
    pub fn role_label(mut self, key: impl Into<String>) -> Self {
        self.role_label = key.into();
        self
    }

    /// Set the per-directive timeout in milliseconds.
    pub fn command_timeout_ms(mut self, ms: u64) -> Self {
        self.command_timeout_ms = Some(ms);
        self
    }

    /// Per-directive timeout, if configured.
    pub fn command_timeout(&self) -> Option<Duration> {
        self.command_timeout_ms.map(Duration::from_millis)
    }

    /// Requeue delay after a failed reconciliation.
    pub fn error_requeue(&self) -> Duration {
        Duration::from_secs(self.error_requeue_secs)
    }
}

fn parse_var<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> OperatorResult<Option<T>> {
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| OperatorError::InvalidConfig(format!("{} has invalid value {:?}", key, raw))),
        None => Ok(None),
    }
}

fn default_admin_port() -> u16 {
    6379
}

fn default_part_of() -> String {
    "kvrepl".to_string()
}

fn default_role_label() -> String {
    "role".to_string()
}

fn default_field_manager() -> String {
    "kvrepl-operator".to_string()
}

fn default_error_requeue_secs() -> u64 {
    30
}
