// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Admin integration: the schema owner.
//!
//! The admin application creates the database schema once it has the
//! connection details this application publishes, then reports back.

use std::collections::BTreeMap;

use serde_json::json;
use temporal_operator_state::{AggregatedState, DatabaseRole, LeaderToken, StateStore, update_state};
use tracing::info;

use super::AdapterOutcome;

/// Record the remote schema status. Only `"ready"` counts as ready.
pub async fn apply_schema_status<S: StateStore + ?Sized>(
    store: &S,
    token: &LeaderToken,
    schema_status: Option<&str>,
) -> temporal_operator_state::Result<AdapterOutcome> {
    let ready = schema_status == Some("ready");
    update_state(store, token, |state| state.schema_ready = ready).await?;
    info!(schema_ready = ready, "Schema status recorded");
    Ok(AdapterOutcome::Applied)
}

/// Data published to the admin application, once both databases are known.
pub fn relation_data(
    state: &AggregatedState,
    tls_enabled: bool,
) -> Option<BTreeMap<String, String>> {
    let mut connections = serde_json::Map::new();
    for role in DatabaseRole::ALL {
        let conn = state.database(role)?;
        connections.insert(
            role.relation_name().to_string(),
            json!({
                "dbname": conn.name,
                "host": conn.host,
                "port": conn.port.to_string(),
                "user": conn.user,
                "password": conn.password,
            }),
        );
    }

    let mut data = BTreeMap::from([(
        "database_connections".to_string(),
        serde_json::Value::Object(connections).to_string(),
    )]);
    if tls_enabled {
        data.insert("tls_enabled".to_string(), "True".to_string());
    }
    Some(data)
}
