// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Supervision plan construction.
//!
//! [`build_plan`] is total over [`ResolvedConfig`]: every value it needs was
//! checked by the validator, so it never fails.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::declared::Role;
use crate::literals::{
    FRONTEND_CERT_PATH, FRONTEND_KEY_PATH, HEALTH_CHECK_NAME, HEALTH_CHECK_PERIOD,
    HEALTH_CHECK_THRESHOLD, SERVER_COMMAND, WORKLOAD_NAME,
};
use crate::validator::ResolvedConfig;

/// Health check level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckLevel {
    /// Process is alive.
    Alive,
    /// Process is ready to serve.
    Ready,
}

/// What the supervisor does when a check fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnCheckFailure {
    /// Report through health status only.
    Ignore,
    /// Restart the service.
    Restart,
    /// Shut the supervisor down.
    Shutdown,
}

/// Periodic liveness probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheck {
    /// Check name.
    pub name: String,
    /// Command whose exit status decides health.
    pub command: String,
    /// Period, e.g. `300s`.
    pub period: String,
    /// Check level.
    pub level: CheckLevel,
    /// Consecutive failures before the check is down.
    pub threshold: u32,
    /// Failure policy.
    pub on_failure: OnCheckFailure,
}

/// Desired supervision of the workload process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupervisionPlan {
    /// Supervised service name.
    pub service: String,
    /// Full command line.
    pub command: String,
    /// Process environment.
    pub environment: BTreeMap<String, String>,
    /// Liveness probe.
    pub health_check: HealthCheck,
    /// Ports to open, gRPC and HTTP per running role.
    pub ports: BTreeSet<u16>,
}

impl SupervisionPlan {
    /// Program and arguments of the command line.
    pub fn argv(&self) -> Vec<&str> {
        self.command.split_whitespace().collect()
    }
}

/// Roles the workload runs for `declared` roles, including implied ones.
pub fn running_roles(declared: &[Role]) -> Vec<Role> {
    let mut roles: Vec<Role> = Role::DECLARABLE
        .into_iter()
        .filter(|r| declared.contains(r))
        .collect();
    if roles.contains(&Role::Frontend) {
        roles.push(Role::InternalFrontend);
    }
    roles
}

/// Open-port set for `declared` roles.
pub fn ports_for(declared: &[Role]) -> BTreeSet<u16> {
    running_roles(declared)
        .into_iter()
        .flat_map(|r| [r.grpc_port(), r.http_port()])
        .collect()
}

/// Build the supervision plan for a validated configuration.
pub fn build_plan(resolved: &ResolvedConfig) -> SupervisionPlan {
    let services: Vec<String> = running_roles(&resolved.roles)
        .into_iter()
        .map(|r| format!("--service={r}"))
        .collect();

    SupervisionPlan {
        service: WORKLOAD_NAME.to_string(),
        command: format!("{SERVER_COMMAND} {}", services.join(" ")),
        environment: environment(resolved),
        health_check: HealthCheck {
            name: HEALTH_CHECK_NAME.to_string(),
            command: format!(
                "tctl --address={}:{} cluster health",
                resolved.app_name,
                Role::InternalFrontend.grpc_port()
            ),
            period: HEALTH_CHECK_PERIOD.to_string(),
            level: CheckLevel::Alive,
            threshold: HEALTH_CHECK_THRESHOLD,
            on_failure: OnCheckFailure::Ignore,
        },
        ports: ports_for(&resolved.roles),
    }
}

fn flag(value: bool) -> String {
    (if value { "True" } else { "False" }).to_string()
}

fn environment(resolved: &ResolvedConfig) -> BTreeMap<String, String> {
    let mut env = BTreeMap::new();
    let mut set = |key: &str, value: String| {
        env.insert(key.to_string(), value);
    };

    set("LOG_LEVEL", resolved.log_level.clone());

    for (prefix, conn) in [("DB", &resolved.primary), ("VISIBILITY", &resolved.visibility)] {
        set(&format!("{prefix}_NAME"), conn.name.clone());
        set(&format!("{prefix}_HOST"), conn.host.clone());
        set(&format!("{prefix}_PORT"), conn.port.to_string());
        set(&format!("{prefix}_USER"), conn.user.clone());
        set(&format!("{prefix}_PSWD"), conn.password.clone());
    }
    set("SQL_TLS_ENABLED", flag(resolved.sql_tls_enabled));

    set("TEMPORAL_BROADCAST_ADDRESS", resolved.broadcast_address.clone());
    set("NUM_HISTORY_SHARDS", resolved.num_shards.to_string());

    for (prefix, pool) in [
        ("SQL", &resolved.primary_pool),
        ("SQL_VIS", &resolved.visibility_pool),
    ] {
        set(&format!("{prefix}_MAX_CONNS"), pool.max_conns.to_string());
        set(&format!("{prefix}_MAX_IDLE_CONNS"), pool.max_idle_conns.to_string());
        set(&format!("{prefix}_MAX_CONN_TIME"), pool.max_conn_time.clone());
        set(&format!("{prefix}_CONNECT_TIMEOUT"), pool.connect_timeout.clone());
    }

    set("GLOBAL_RPS_LIMIT", resolved.rate_limits.global_rps.to_string());
    set("NAMESPACE_RPS_LIMIT", resolved.rate_limits.namespace_rps.to_string());

    if let Some(auth) = &resolved.auth {
        let openfga = &auth.authorization;
        set("AUTH_ENABLED", flag(true));
        set("OFGA_API_SCHEME", openfga.scheme.clone());
        set("OFGA_API_HOST", openfga.address.clone());
        set("OFGA_API_PORT", openfga.port.clone());
        set("OFGA_SECRETS_BEARER_TOKEN", openfga.token.clone());
        set("OFGA_STORE_ID", openfga.store_id.clone());
        set("OFGA_AUTH_MODEL_ID", auth.auth_model_id.clone());
        set("AUTH_ADMIN_GROUPS", auth.admin_groups.join(","));
        set("AUTH_ALLOWED_NAMESPACES", auth.allowed_namespaces.join(","));
        set("AUTH_CLIENT_ID", auth.client_id.clone());
    }

    if let Some(storage) = &resolved.archival {
        set("ARCHIVAL_ENABLED", flag(true));
        set("ARCHIVAL_BUCKET_NAME", storage.bucket.clone());
        set("ARCHIVAL_BUCKET_REGION", storage.region.clone());
        set("ARCHIVAL_ENDPOINT", storage.endpoint.clone());
        set("ARCHIVAL_URI_STYLE", storage.uri_style.clone());
        set("AWS_ACCESS_KEY_ID", storage.access_key.clone());
        set("AWS_SECRET_ACCESS_KEY", storage.secret_key.clone());
    }

    if let Some(proxy) = &resolved.proxy {
        set("HTTP_PROXY", proxy.http_proxy.clone());
        set("HTTPS_PROXY", proxy.https_proxy.clone());
        set("NO_PROXY", proxy.no_proxy.clone());
    }

    if resolved.frontend_tls.is_some() && resolved.runs_frontend() {
        set("TEMPORAL_TLS_FRONTEND_CERT", FRONTEND_CERT_PATH.to_string());
        set("TEMPORAL_TLS_FRONTEND_KEY", FRONTEND_KEY_PATH.to_string());
    }

    env
}
