// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Fail-fast validation of declared configuration against aggregated state.
//!
//! [`validate`] runs its checks in a fixed precedence order and stops at the
//! first failure, so a given input always yields the same single reason:
//!
//! ```text
//!  1. log level            7. schema ready (frontend only)
//!  2. state substrate      8. authorization
//!  3. services             9. object storage
//!  4. shard count         10. single ingress
//!  5. numeric / durations 11. certificates need frontend
//!  6. databases
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use temporal_operator_state::{
    AggregatedState, Authorization, CertificateMaterial, DatabaseConnection, DatabaseRole,
    ObjectStorage,
};

use crate::config::{ProxySettings, UnitContext};
use crate::declared::{DeclaredConfig, Role, split_list};
use crate::literals::{FRONTEND_CERTIFICATES_RELATION, VALID_LOG_LEVELS};

static DURATION: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"^[1-9][0-9]*[smh]$"));

/// The single reason a configuration was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blocked(String);

impl Blocked {
    /// Create a blocked reason.
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }

    /// Human-readable reason.
    pub fn reason(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Blocked {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Connection pool sizing for one database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolSettings {
    /// Maximum open connections.
    pub max_conns: u32,
    /// Maximum idle connections.
    pub max_idle_conns: u32,
    /// Connection lifetime, e.g. `1h`.
    pub max_conn_time: String,
    /// Connect timeout, e.g. `10s`.
    pub connect_timeout: String,
    /// Connect timeout in seconds.
    pub connect_timeout_secs: u64,
}

/// Request rate limits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimits {
    /// Frontend-wide RPS, 0 for unlimited.
    pub global_rps: u64,
    /// Default per-namespace RPS.
    pub namespace_rps: u64,
    /// Per-namespace RPS overrides.
    pub namespace_overrides: BTreeMap<String, u64>,
    /// Matching long-poll expiration, e.g. `60s`.
    pub long_poll_expiration: String,
}

/// Authorization settings, present when auth is enabled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthSettings {
    /// Authorization service connection.
    pub authorization: Authorization,
    /// Created authorization model.
    pub auth_model_id: String,
    /// Groups granted system admin.
    pub admin_groups: Vec<String>,
    /// Namespaces readable by every authenticated user.
    pub allowed_namespaces: Vec<String>,
    /// Accepted OIDC client id.
    pub client_id: String,
}

/// Configuration that passed every check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedConfig {
    /// Application name.
    pub app_name: String,
    /// This replica's address.
    pub broadcast_address: String,
    /// Server log level.
    pub log_level: String,
    /// Declared roles, deduplicated, in canonical order.
    pub roles: Vec<Role>,
    /// History shard count.
    pub num_shards: u32,
    /// Whether `num_shards` was already recorded in shared state.
    pub num_shards_fixed: bool,
    /// Primary database.
    pub primary: DatabaseConnection,
    /// Visibility database.
    pub visibility: DatabaseConnection,
    /// Primary database pool.
    pub primary_pool: PoolSettings,
    /// Visibility database pool.
    pub visibility_pool: PoolSettings,
    /// Whether database connections use TLS.
    pub sql_tls_enabled: bool,
    /// Rate limits.
    pub rate_limits: RateLimits,
    /// Authorization, when enabled.
    pub auth: Option<AuthSettings>,
    /// Archival storage, when integrated.
    pub archival: Option<ObjectStorage>,
    /// Proxy environment, when configured.
    pub proxy: Option<ProxySettings>,
    /// Frontend TLS material, when available.
    pub frontend_tls: Option<CertificateMaterial>,
}

impl ResolvedConfig {
    /// Whether the frontend role is declared.
    pub fn runs_frontend(&self) -> bool {
        self.roles.contains(&Role::Frontend)
    }
}

/// Validate `declared` against `state`.
///
/// `state` is `None` when the shared state substrate is not ready.
pub fn validate(
    declared: &DeclaredConfig,
    state: Option<&AggregatedState>,
    unit: &UnitContext,
) -> Result<ResolvedConfig, Blocked> {
    // 1
    if !VALID_LOG_LEVELS.contains(&declared.log_level.as_str()) {
        return Err(Blocked::new(format!(
            "error in log-level config: invalid log level '{}'",
            declared.log_level
        )));
    }

    // 2
    let state = state.ok_or_else(|| Blocked::new("peer relation not ready"))?;

    // 3
    let roles = parse_roles(declared)?;

    // 4
    let (num_shards, num_shards_fixed) = check_shards(declared, state)?;

    // 5
    let primary_pool = pool_settings(declared, DatabaseRole::Primary)?;
    let visibility_pool = pool_settings(declared, DatabaseRole::Visibility)?;
    let rate_limits = rate_limits(declared)?;

    // 6
    let (primary, visibility) = check_databases(state)?;

    // 7
    if roles.contains(&Role::Frontend) && !state.schema_ready {
        return Err(Blocked::new("admin:temporal relation: schema is not ready"));
    }

    // 8
    let auth = if declared.auth_enabled {
        Some(check_authorization(declared, state)?)
    } else {
        None
    };

    // 9
    let archival = check_object_storage(state)?;

    // 10
    if state.ingress.len() > 1 {
        return Err(Blocked::new(
            "Only one ingress solution is allowed - remove the ingress or the nginx-route relation.",
        ));
    }

    // 11
    if state.certificate_material.is_some() && !roles.contains(&Role::Frontend) {
        return Err(Blocked::new(format!(
            "Not a frontend service, please remove {FRONTEND_CERTIFICATES_RELATION} integration."
        )));
    }

    Ok(ResolvedConfig {
        app_name: unit.app_name.clone(),
        broadcast_address: unit.broadcast_address.clone(),
        log_level: declared.log_level.clone(),
        num_shards,
        num_shards_fixed,
        primary,
        visibility,
        primary_pool,
        visibility_pool,
        sql_tls_enabled: declared.db_tls_enabled,
        rate_limits,
        auth,
        archival,
        proxy: unit.proxy.clone(),
        frontend_tls: state.certificate_material.clone(),
        roles,
    })
}

fn parse_roles(declared: &DeclaredConfig) -> Result<Vec<Role>, Blocked> {
    let mut roles = Vec::new();
    for name in declared.service_names() {
        let role: Role = name.parse().map_err(|invalid| {
            Blocked::new(format!(
                "error in services config: invalid service '{invalid}'"
            ))
        })?;
        if !roles.contains(&role) {
            roles.push(role);
        }
    }
    roles.sort();
    Ok(roles)
}

fn check_shards(declared: &DeclaredConfig, state: &AggregatedState) -> Result<(u32, bool), Blocked> {
    if let Some(fixed) = state.num_shards {
        return match declared.num_history_shards {
            Some(n) if n == i64::from(fixed) => Ok((fixed, true)),
            _ => Err(Blocked::new(format!(
                "value of 'num-history-shards' config cannot be changed after deployment. Value should be {fixed}"
            ))),
        };
    }

    match declared.num_history_shards.map(u32::try_from) {
        Some(Ok(n)) if n.is_power_of_two() => Ok((n, false)),
        _ => Err(Blocked::new(
            "value of 'num-history-shards' config must be set to a positive power of 2 (e.g. 1, 2, 4)",
        )),
    }
}

fn pool_settings(declared: &DeclaredConfig, role: DatabaseRole) -> Result<PoolSettings, Blocked> {
    let prefix = role.relation_name();
    let (max_conns, max_idle_conns, max_conn_time, connect_timeout) = match role {
        DatabaseRole::Primary => (
            declared.db_max_conns,
            declared.db_max_idle_conns,
            &declared.db_max_conn_time,
            &declared.db_connect_timeout,
        ),
        DatabaseRole::Visibility => (
            declared.visibility_max_conns,
            declared.visibility_max_idle_conns,
            &declared.visibility_max_conn_time,
            &declared.visibility_connect_timeout,
        ),
    };

    Ok(PoolSettings {
        max_conns: at_least(&format!("{prefix}-max-conns"), max_conns, 1)?,
        max_idle_conns: at_least(&format!("{prefix}-max-idle-conns"), max_idle_conns, 1)?,
        max_conn_time: duration(&format!("{prefix}-max-conn-time"), max_conn_time)?,
        connect_timeout: duration(&format!("{prefix}-connect-timeout"), connect_timeout)?,
        connect_timeout_secs: seconds(&format!("{prefix}-connect-timeout"), connect_timeout)?,
    })
}

fn rate_limits(declared: &DeclaredConfig) -> Result<RateLimits, Blocked> {
    let global_rps: u64 = at_least("global-rps-limit", declared.global_rps_limit, 0)?;
    let namespace_rps: u64 = at_least("namespace-rps-limit", declared.namespace_rps_limit, 0)?;

    let mut namespace_overrides = BTreeMap::new();
    for entry in split_list(&declared.namespace_rps_overrides) {
        let parsed = entry
            .split_once(':')
            .map(|(ns, rps)| (ns.trim(), rps.trim().parse::<u64>()));
        match parsed {
            Some((ns, Ok(rps))) if !ns.is_empty() => {
                namespace_overrides.insert(ns.to_string(), rps);
            }
            _ => {
                return Err(Blocked::new(format!(
                    "error in namespace-rps-overrides config: invalid entry '{entry}', expected <namespace>:<rps>"
                )));
            }
        }
    }

    Ok(RateLimits {
        global_rps,
        namespace_rps,
        namespace_overrides,
        long_poll_expiration: duration(
            "matching-long-poll-expiration",
            &declared.matching_long_poll_expiration,
        )?,
    })
}

fn at_least<T: TryFrom<i64>>(key: &str, value: i64, min: i64) -> Result<T, Blocked> {
    if value < min {
        return Err(Blocked::new(format!(
            "value of '{key}' config must be an integer of at least {min}"
        )));
    }
    T::try_from(value)
        .map_err(|_| Blocked::new(format!("value of '{key}' config is out of range: {value}")))
}

/// Seconds in a `<n><s|m|h>` duration, `None` if it does not fit in `u64`.
pub fn duration_secs(value: &str) -> Option<u64> {
    let (digits, unit) = value.split_at(value.len().checked_sub(1)?);
    let n: u64 = digits.parse().ok()?;
    match unit {
        "s" => Some(n),
        "m" => n.checked_mul(60),
        "h" => n.checked_mul(3600),
        _ => None,
    }
}

fn seconds(key: &str, value: &str) -> Result<u64, Blocked> {
    DURATION
        .as_ref()
        .is_ok_and(|re| re.is_match(value))
        .then(|| duration_secs(value))
        .flatten()
        .ok_or_else(|| {
            Blocked::new(format!(
                "value of '{key}' config must be a positive duration in s, m or h (e.g. 30s, 1h)"
            ))
        })
}

fn duration(key: &str, value: &str) -> Result<String, Blocked> {
    seconds(key, value)?;
    Ok(value.to_string())
}

fn check_databases(
    state: &AggregatedState,
) -> Result<(DatabaseConnection, DatabaseConnection), Blocked> {
    match (
        state.database(DatabaseRole::Primary),
        state.database(DatabaseRole::Visibility),
    ) {
        (Some(primary), Some(visibility)) => Ok((primary.clone(), visibility.clone())),
        (None, None) => Err(Blocked::new("database relation not ready")),
        (None, Some(_)) => Err(no_connection(DatabaseRole::Primary)),
        (Some(_), None) => Err(no_connection(DatabaseRole::Visibility)),
    }
}

fn no_connection(role: DatabaseRole) -> Blocked {
    Blocked::new(format!(
        "{}:pgsql relation: no database connection available",
        role.relation_name()
    ))
}

fn check_authorization(
    declared: &DeclaredConfig,
    state: &AggregatedState,
) -> Result<AuthSettings, Blocked> {
    let not_ready = || Blocked::new("openfga:temporal relation not ready");

    let authorization = state.authorization.as_ref().ok_or_else(not_ready)?;
    let required = [
        &authorization.store_id,
        &authorization.token,
        &authorization.address,
        &authorization.port,
        &authorization.scheme,
    ];
    if required.iter().any(|v| v.is_empty()) {
        return Err(not_ready());
    }

    let auth_model_id = authorization
        .auth_model_id
        .clone()
        .filter(|id| !id.is_empty())
        .ok_or_else(|| Blocked::new("missing openfga authorization model"))?;

    Ok(AuthSettings {
        authorization: authorization.clone(),
        auth_model_id,
        admin_groups: split_list(&declared.auth_admin_groups),
        allowed_namespaces: split_list(&declared.auth_allowed_namespaces),
        client_id: declared.auth_client_id.clone(),
    })
}

fn check_object_storage(state: &AggregatedState) -> Result<Option<ObjectStorage>, Blocked> {
    let Some(storage) = state.object_storage.as_ref() else {
        return Ok(None);
    };

    let required = [
        &storage.bucket,
        &storage.endpoint,
        &storage.access_key,
        &storage.secret_key,
        &storage.uri_style,
    ];
    if required.iter().any(|v| v.is_empty()) {
        return Err(Blocked::new("s3:archival relation: missing s3 parameters"));
    }

    if !storage.bucket_provisioned {
        return Err(Blocked::new("s3:archival failed to create s3 bucket."));
    }

    Ok(Some(storage.clone()))
}
