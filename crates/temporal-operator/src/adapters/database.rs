// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Database integrations (`db` and `visibility`).

use serde::{Deserialize, Serialize};
use temporal_operator_state::{
    DatabaseConnection, DatabaseRole, LeaderToken, StateStore, update_state,
};
use tracing::{info, warn};

use super::AdapterOutcome;

/// Credentials as delivered by a database integration.
///
/// Fields are optional because the database fills them in over several events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseCredentials {
    /// Which database this is.
    pub role: DatabaseRole,
    /// Database name.
    #[serde(default)]
    pub database: Option<String>,
    /// Comma-separated `host:port` endpoints.
    #[serde(default)]
    pub endpoints: Option<String>,
    /// Login user.
    #[serde(default)]
    pub username: Option<String>,
    /// Login password.
    #[serde(default)]
    pub password: Option<String>,
}

/// Name of the database this application requests for `role`.
pub fn requested_database_name(app_name: &str, role: DatabaseRole) -> String {
    format!("{app_name}_{}", role.relation_name())
}

/// Build the connection fragment from `credentials`.
pub fn connection_from(
    credentials: &DatabaseCredentials,
    app_name: &str,
    tls_enabled: bool,
) -> Result<DatabaseConnection, AdapterOutcome> {
    let relation = credentials.role.relation_name();
    let field = |value: &Option<String>, name: &str| {
        value
            .as_deref()
            .filter(|v| !v.is_empty())
            .map(String::from)
            .ok_or_else(|| AdapterOutcome::Incomplete(format!("{relation}: missing {name}")))
    };

    let database = field(&credentials.database, "database")?;
    let endpoints = field(&credentials.endpoints, "endpoints")?;
    let user = field(&credentials.username, "username")?;
    let password = field(&credentials.password, "password")?;

    let expected = requested_database_name(app_name, credentials.role);
    if database != expected {
        return Err(AdapterOutcome::Rejected(format!(
            "{relation}: database '{database}' does not match requested database '{expected}'"
        )));
    }

    let (host, port) = first_endpoint(&endpoints).ok_or_else(|| {
        AdapterOutcome::Rejected(format!("{relation}: invalid endpoints '{endpoints}'"))
    })?;

    Ok(DatabaseConnection {
        name: database,
        host,
        port,
        user,
        password,
        tls_enabled,
    })
}

fn first_endpoint(endpoints: &str) -> Option<(String, u16)> {
    let first = endpoints.split(',').next()?.trim();
    let (host, port) = first.rsplit_once(':')?;
    if host.is_empty() {
        return None;
    }
    Some((host.to_string(), port.parse().ok()?))
}

/// Record the connection for `credentials.role`.
///
/// The recorded database name never changes; credentials for a different
/// name are rejected. Reconnecting to the same name replaces host, port and
/// login.
pub async fn apply_credentials<S: StateStore + ?Sized>(
    store: &S,
    token: &LeaderToken,
    app_name: &str,
    credentials: &DatabaseCredentials,
    tls_enabled: bool,
) -> temporal_operator_state::Result<AdapterOutcome> {
    let role = credentials.role;
    let connection = match connection_from(credentials, app_name, tls_enabled) {
        Ok(connection) => connection,
        Err(outcome) => {
            info!(%role, ?outcome, "Database credentials not usable yet");
            return Ok(outcome);
        }
    };

    let mut rejected = None;
    update_state(store, token, |state| {
        if let Some(existing) = state.database(role)
            && existing.name != connection.name
        {
            rejected = Some(format!(
                "{role}: database name cannot change from '{}' to '{}'",
                existing.name, connection.name
            ));
            return;
        }
        state.set_database(role, Some(connection));
    })
    .await?;

    match rejected {
        Some(reason) => {
            warn!(%role, reason = %reason, "Rejected database change");
            Ok(AdapterOutcome::Rejected(reason))
        }
        None => {
            info!(%role, "Database connection recorded");
            Ok(AdapterOutcome::Applied)
        }
    }
}

/// Clear the connection for `role`.
pub async fn remove<S: StateStore + ?Sized>(
    store: &S,
    token: &LeaderToken,
    role: DatabaseRole,
) -> temporal_operator_state::Result<AdapterOutcome> {
    update_state(store, token, |state| state.set_database(role, None)).await?;
    info!(%role, "Database connection removed");
    Ok(AdapterOutcome::Applied)
}
