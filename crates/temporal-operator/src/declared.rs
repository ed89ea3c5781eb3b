// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Operator-declared configuration.
//!
//! Values arrive unvalidated, exactly as the operator typed them. The
//! [`validator`](crate::validator) turns them into a typed
//! [`ResolvedConfig`](crate::validator::ResolvedConfig).

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// A server role the workload can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    /// Client-facing gRPC API.
    Frontend,
    /// Workflow history service.
    History,
    /// Task queue matching service.
    Matching,
    /// System worker.
    Worker,
    /// Cluster-internal frontend, implied by `Frontend`.
    InternalFrontend,
}

impl Role {
    /// Roles an operator may declare, in canonical command-line order.
    pub const DECLARABLE: [Role; 4] = [Role::Frontend, Role::History, Role::Matching, Role::Worker];

    /// Name used on the command line and in the `services` config.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Frontend => "frontend",
            Role::History => "history",
            Role::Matching => "matching",
            Role::Worker => "worker",
            Role::InternalFrontend => "internal-frontend",
        }
    }

    /// gRPC port served by this role.
    pub fn grpc_port(&self) -> u16 {
        match self {
            Role::Frontend => 7233,
            Role::History => 7234,
            Role::Matching => 7235,
            Role::Worker => 7239,
            Role::InternalFrontend => 7236,
        }
    }

    /// HTTP (membership) port served by this role.
    pub fn http_port(&self) -> u16 {
        match self {
            Role::Frontend => 6933,
            Role::History => 6934,
            Role::Matching => 6935,
            Role::Worker => 6939,
            Role::InternalFrontend => 6936,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    /// Parses declarable roles only; `internal-frontend` is never declared directly.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Role::DECLARABLE
            .into_iter()
            .find(|r| r.as_str() == s)
            .ok_or_else(|| s.to_string())
    }
}

/// Configuration as declared by the operator.
///
/// Deserializes from JSON with kebab-case keys; missing keys take their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct DeclaredConfig {
    /// Server log level.
    pub log_level: String,
    /// Comma-separated roles to run.
    pub services: String,
    /// History shard count. Immutable once the cluster has started.
    pub num_history_shards: Option<i64>,

    /// Primary database pool size.
    pub db_max_conns: i64,
    /// Primary database idle connections.
    pub db_max_idle_conns: i64,
    /// Primary database connection lifetime.
    pub db_max_conn_time: String,
    /// Primary database connect timeout.
    pub db_connect_timeout: String,

    /// Visibility database pool size.
    pub visibility_max_conns: i64,
    /// Visibility database idle connections.
    pub visibility_max_idle_conns: i64,
    /// Visibility database connection lifetime.
    pub visibility_max_conn_time: String,
    /// Visibility database connect timeout.
    pub visibility_connect_timeout: String,

    /// Require TLS on database connections.
    pub db_tls_enabled: bool,

    /// Frontend-wide requests per second, 0 for unlimited.
    pub global_rps_limit: i64,
    /// Default per-namespace requests per second.
    pub namespace_rps_limit: i64,
    /// Per-namespace overrides, `ns1:100,ns2:50`.
    pub namespace_rps_overrides: String,
    /// Matching service long-poll expiration.
    pub matching_long_poll_expiration: String,

    /// Enable OpenFGA-backed authorization.
    pub auth_enabled: bool,
    /// Groups granted system admin.
    pub auth_admin_groups: String,
    /// Namespaces readable by every authenticated user.
    pub auth_allowed_namespaces: String,
    /// OIDC client id accepted in tokens.
    pub auth_client_id: String,

    /// Hostname the frontend is exposed under.
    pub external_hostname: String,
    /// Secret holding the ingress TLS certificate.
    pub tls_secret_name: String,
    /// Organization field of the frontend certificate subject.
    pub frontend_cert_organization: String,
    /// Country field of the frontend certificate subject.
    pub frontend_cert_country: String,
}

impl Default for DeclaredConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            services: "frontend,history,matching,worker".to_string(),
            num_history_shards: None,
            db_max_conns: 20,
            db_max_idle_conns: 20,
            db_max_conn_time: "1h".to_string(),
            db_connect_timeout: "10s".to_string(),
            visibility_max_conns: 10,
            visibility_max_idle_conns: 10,
            visibility_max_conn_time: "1h".to_string(),
            visibility_connect_timeout: "10s".to_string(),
            db_tls_enabled: false,
            global_rps_limit: 0,
            namespace_rps_limit: 2400,
            namespace_rps_overrides: String::new(),
            matching_long_poll_expiration: "60s".to_string(),
            auth_enabled: false,
            auth_admin_groups: String::new(),
            auth_allowed_namespaces: String::new(),
            auth_client_id: String::new(),
            external_hostname: String::new(),
            tls_secret_name: "temporal-tls".to_string(),
            frontend_cert_organization: String::new(),
            frontend_cert_country: String::new(),
        }
    }
}

impl DeclaredConfig {
    /// Load a declared configuration from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Raw role names from `services`, trimmed.
    pub fn service_names(&self) -> impl Iterator<Item = &str> {
        self.services.split(',').map(str::trim)
    }

    /// Whether `frontend` is among the declared services.
    ///
    /// Used by checks that run before the services list is fully validated.
    pub fn declares_frontend(&self) -> bool {
        self.service_names().any(|s| s == Role::Frontend.as_str())
    }

    /// Hostname the frontend is reachable under from outside.
    pub fn external_hostname_or<'a>(&'a self, fallback: &'a str) -> &'a str {
        if self.external_hostname.is_empty() {
            fallback
        } else {
            &self.external_hostname
        }
    }
}

/// Split a comma-separated list, dropping empty items.
pub(crate) fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}
