// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Process-level configuration for temporal-operator.

use std::path::PathBuf;
use std::time::Duration;

/// Operator configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct OperatorConfig {
    /// Application name, shared by all replicas
    pub app_name: String,
    /// Directory of the SQLite state database
    pub data_dir: PathBuf,
    /// Initial declared configuration (JSON), if any
    pub declared_config: Option<PathBuf>,
    /// Whether this replica starts as leader
    pub leader: bool,
    /// Root under which workload files are written
    pub workload_root: PathBuf,
    /// Interval between status checks
    pub status_interval: Duration,
    /// This replica's identity on the network
    pub unit: UnitContext,
}

/// Facts about this replica the validator and plan builder need.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitContext {
    /// Application name.
    pub app_name: String,
    /// Namespace (model) the application is deployed in.
    pub namespace: String,
    /// Address peers and the workload use to reach this replica.
    pub broadcast_address: String,
    /// Proxy environment forwarded to the workload.
    pub proxy: Option<ProxySettings>,
}

impl UnitContext {
    /// Context for `app_name` reachable at `broadcast_address`, without proxy.
    pub fn new(app_name: impl Into<String>, broadcast_address: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
            namespace: "default".to_string(),
            broadcast_address: broadcast_address.into(),
            proxy: None,
        }
    }

    /// Set the namespace.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }
}

/// Proxy variables configured on the substrate.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProxySettings {
    /// `HTTP_PROXY`.
    pub http_proxy: String,
    /// `HTTPS_PROXY`.
    pub https_proxy: String,
    /// `NO_PROXY`.
    pub no_proxy: String,
}

impl OperatorConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let app_name = std::env::var("TEMPORAL_OPERATOR_APP_NAME")
            .unwrap_or_else(|_| "temporal-k8s".to_string());
        if app_name.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                var: "TEMPORAL_OPERATOR_APP_NAME",
                value: app_name,
            });
        }

        let namespace = std::env::var("TEMPORAL_OPERATOR_NAMESPACE")
            .unwrap_or_else(|_| "default".to_string());

        let data_dir = PathBuf::from(
            std::env::var("TEMPORAL_OPERATOR_DATA_DIR").unwrap_or_else(|_| ".data".to_string()),
        );

        let declared_config = std::env::var("TEMPORAL_OPERATOR_DECLARED_CONFIG")
            .ok()
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);

        let broadcast_address = std::env::var("TEMPORAL_OPERATOR_BROADCAST_ADDRESS")
            .unwrap_or_else(|_| "127.0.0.1".to_string());

        let leader = std::env::var("TEMPORAL_OPERATOR_LEADER")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);

        let workload_root = PathBuf::from(
            std::env::var("TEMPORAL_OPERATOR_WORKLOAD_ROOT").unwrap_or_else(|_| "/".to_string()),
        );

        let raw_interval = std::env::var("TEMPORAL_OPERATOR_STATUS_INTERVAL")
            .unwrap_or_else(|_| "300".to_string());
        let status_interval = match raw_interval.parse::<u64>() {
            Ok(secs) if secs > 0 => Duration::from_secs(secs),
            _ => {
                return Err(ConfigError::InvalidValue {
                    var: "TEMPORAL_OPERATOR_STATUS_INTERVAL",
                    value: raw_interval,
                });
            }
        };

        Ok(Self {
            unit: UnitContext {
                app_name: app_name.clone(),
                namespace,
                broadcast_address,
                proxy: proxy_from_env(),
            },
            app_name,
            data_dir,
            declared_config,
            leader,
            workload_root,
            status_interval,
        })
    }

    /// Path of the SQLite state database.
    pub fn state_db_path(&self) -> PathBuf {
        self.data_dir.join("state.db")
    }
}

/// Proxy settings, present when any of the three variables is set.
fn proxy_from_env() -> Option<ProxySettings> {
    let read = |name: &str| std::env::var(name).unwrap_or_default();
    let proxy = ProxySettings {
        http_proxy: read("TEMPORAL_OPERATOR_HTTP_PROXY"),
        https_proxy: read("TEMPORAL_OPERATOR_HTTPS_PROXY"),
        no_proxy: read("TEMPORAL_OPERATOR_NO_PROXY"),
    };

    if proxy == ProxySettings::default() {
        None
    } else {
        Some(proxy)
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A variable holds a value that cannot be used.
    #[error("Invalid value for {var}: '{value}'")]
    InvalidValue {
        /// Variable name.
        var: &'static str,
        /// Offending value.
        value: String,
    },
}
