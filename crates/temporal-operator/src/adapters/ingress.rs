// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Ingress integrations exposing the frontend.

use std::collections::BTreeMap;

use temporal_operator_state::{IngressKind, LeaderToken, StateStore, update_state};
use tracing::info;

use super::AdapterOutcome;
use crate::declared::DeclaredConfig;
use crate::literals::INGRESS_SERVICE_PORT;

/// Record that an ingress integration joined.
pub async fn join<S: StateStore + ?Sized>(
    store: &S,
    token: &LeaderToken,
    kind: IngressKind,
) -> temporal_operator_state::Result<AdapterOutcome> {
    update_state(store, token, |state| {
        state.ingress.insert(kind);
    })
    .await?;
    info!(ingress = kind.relation_name(), "Ingress joined");
    Ok(AdapterOutcome::Applied)
}

/// Record that an ingress integration left.
pub async fn leave<S: StateStore + ?Sized>(
    store: &S,
    token: &LeaderToken,
    kind: IngressKind,
) -> temporal_operator_state::Result<AdapterOutcome> {
    update_state(store, token, |state| {
        state.ingress.remove(&kind);
    })
    .await?;
    info!(ingress = kind.relation_name(), "Ingress left");
    Ok(AdapterOutcome::Applied)
}

/// Route requested from the nginx-route integration.
pub fn nginx_route_data(
    declared: &DeclaredConfig,
    app_name: &str,
    namespace: &str,
) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("service-namespace".to_string(), namespace.to_string()),
        (
            "service-hostname".to_string(),
            declared.external_hostname_or(app_name).to_string(),
        ),
        ("service-name".to_string(), app_name.to_string()),
        ("service-port".to_string(), INGRESS_SERVICE_PORT.to_string()),
        ("backend-protocol".to_string(), "GRPC".to_string()),
        (
            "tls-secret-name".to_string(),
            declared.tls_secret_name.clone(),
        ),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use temporal_operator_state::MemoryStateStore;

    #[tokio::test]
    async fn test_join_and_leave() {
        let store = MemoryStateStore::new();
        let token = LeaderToken::elected();

        join(&store, &token, IngressKind::NginxRoute).await.unwrap();
        join(&store, &token, IngressKind::Ingress).await.unwrap();
        leave(&store, &token, IngressKind::NginxRoute).await.unwrap();

        let state = store.load().await.unwrap().unwrap().state;
        assert_eq!(
            state.ingress.into_iter().collect::<Vec<_>>(),
            vec![IngressKind::Ingress]
        );
    }

    #[test]
    fn test_nginx_route_data() {
        let mut declared = DeclaredConfig::default();
        let data = nginx_route_data(&declared, "temporal-k8s", "temporal-model");
        assert_eq!(data["service-namespace"], "temporal-model");
        assert_eq!(data["service-hostname"], "temporal-k8s");
        assert_eq!(data["service-port"], "7233");
        assert_eq!(data["backend-protocol"], "GRPC");
        assert_eq!(data["tls-secret-name"], "temporal-tls");

        declared.external_hostname = "temporal.example.com".to_string();
        let data = nginx_route_data(&declared, "temporal-k8s", "temporal-model");
        assert_eq!(data["service-hostname"], "temporal.example.com");
    }
}
