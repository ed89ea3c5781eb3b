// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for temporal-operator integration tests.
//!
//! Provides TestContext wiring a reconciler to an in-memory store, a mock
//! supervisor and fake external clients.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;
use temporal_operator::adapters::authorization::{
    AuthorizationClient, AuthorizationError, AuthorizationStore, TupleKey,
};
use temporal_operator::adapters::database::{DatabaseCredentials, requested_database_name};
use temporal_operator::adapters::object_storage::{
    BucketProvisioner, ProvisionError, S3Parameters,
};
use temporal_operator::config::UnitContext;
use temporal_operator::declared::DeclaredConfig;
use temporal_operator::supervisor::MockSupervisor;
use temporal_operator::{LifecycleEvent, Outcome, Reconciler};
use temporal_operator_state::{
    AggregatedState, Authorization, DatabaseRole, LeaderToken, MemoryStateStore, StateStore,
};

pub const APP_NAME: &str = "temporal-k8s";

/// Bucket provisioner that succeeds unless told otherwise.
#[derive(Default)]
pub struct FakeProvisioner {
    pub fail: AtomicBool,
    pub calls: AtomicUsize,
}

#[async_trait]
impl BucketProvisioner for FakeProvisioner {
    async fn ensure_bucket(&self, _: &S3Parameters, _: &str) -> Result<(), ProvisionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            Err(ProvisionError::CreateFailed {
                status: 403,
                body: "AccessDenied".to_string(),
            })
        } else {
            Ok(())
        }
    }
}

/// Authorization client returning a fixed model id and keeping tuples in memory.
pub struct FakeAuthorizationClient {
    pub model_id: String,
    pub tuples: Mutex<Vec<TupleKey>>,
}

impl FakeAuthorizationClient {
    pub fn new(model_id: &str) -> Self {
        Self {
            model_id: model_id.to_string(),
            tuples: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl AuthorizationClient for FakeAuthorizationClient {
    async fn create_model(
        &self,
        _: &Authorization,
        _: &serde_json::Value,
    ) -> Result<String, AuthorizationError> {
        Ok(self.model_id.clone())
    }

    async fn write_tuples(
        &self,
        _: &Authorization,
        writes: &[TupleKey],
        deletes: &[TupleKey],
    ) -> Result<(), AuthorizationError> {
        let mut tuples = self.tuples.lock().await;
        tuples.retain(|t| !deletes.contains(t));
        tuples.extend_from_slice(writes);
        Ok(())
    }

    async fn check(&self, _: &Authorization, tuple: &TupleKey) -> Result<bool, AuthorizationError> {
        Ok(self.tuples.lock().await.contains(tuple))
    }

    async fn list_objects(
        &self,
        _: &Authorization,
        user: &str,
        relation: &str,
        object_type: &str,
    ) -> Result<Vec<String>, AuthorizationError> {
        let prefix = format!("{object_type}:");
        Ok(self
            .tuples
            .lock()
            .await
            .iter()
            .filter(|t| t.user == user && t.relation == relation && t.object.starts_with(&prefix))
            .map(|t| t.object.clone())
            .collect())
    }

    async fn read_tuples(
        &self,
        _: &Authorization,
        object: &str,
    ) -> Result<Vec<TupleKey>, AuthorizationError> {
        Ok(self
            .tuples
            .lock()
            .await
            .iter()
            .filter(|t| t.object == object)
            .cloned()
            .collect())
    }
}

/// Reconciler with fakes for every collaborator.
pub struct TestContext {
    pub store: Arc<MemoryStateStore>,
    pub supervisor: Arc<MockSupervisor>,
    pub provisioner: Arc<FakeProvisioner>,
    pub reconciler: Reconciler,
}

impl TestContext {
    /// Fresh context with empty state and default declared config.
    pub fn new() -> Self {
        Self::with_store(MemoryStateStore::new())
    }

    /// Context over an existing store.
    pub fn with_store(store: MemoryStateStore) -> Self {
        let store = Arc::new(store);
        let supervisor = Arc::new(MockSupervisor::new());
        let provisioner = Arc::new(FakeProvisioner::default());
        let reconciler = Reconciler::new(
            store.clone(),
            supervisor.clone(),
            UnitContext::new(APP_NAME, "10.1.2.3"),
            DeclaredConfig::default(),
        )
        .unwrap()
        .with_provisioner(provisioner.clone())
        .with_authorization_client(Arc::new(FakeAuthorizationClient::new("123")));

        Self {
            store,
            supervisor,
            provisioner,
            reconciler,
        }
    }

    /// Handle an event as leader.
    pub async fn lead(&mut self, event: LifecycleEvent) -> Outcome {
        let token = LeaderToken::elected();
        self.reconciler.handle(&event, Some(&token)).await
    }

    /// Handle an event as a non-leader.
    pub async fn follow(&mut self, event: LifecycleEvent) -> Outcome {
        self.reconciler.handle(&event, None).await
    }

    /// Current shared state.
    pub async fn state(&self) -> AggregatedState {
        self.store
            .load()
            .await
            .unwrap()
            .map(|v| v.state)
            .unwrap_or_default()
    }

    /// Deliver both databases, schema readiness and a shard count.
    pub async fn make_ready(&mut self, shards: i64) {
        self.lead(config_changed(declared(shards))).await;
        self.lead(database_changed(DatabaseRole::Primary)).await;
        self.lead(database_changed(DatabaseRole::Visibility)).await;
        self.lead(schema_ready()).await;
    }
}

pub fn declared(shards: i64) -> DeclaredConfig {
    DeclaredConfig {
        num_history_shards: Some(shards),
        ..DeclaredConfig::default()
    }
}

pub fn config_changed(config: DeclaredConfig) -> LifecycleEvent {
    LifecycleEvent::ConfigChanged {
        config: Box::new(config),
    }
}

pub fn database_changed(role: DatabaseRole) -> LifecycleEvent {
    LifecycleEvent::DatabaseChanged(DatabaseCredentials {
        role,
        database: Some(requested_database_name(APP_NAME, role)),
        endpoints: Some("myhost:5432".to_string()),
        username: Some("jean-luc".to_string()),
        password: Some("inner-light".to_string()),
    })
}

pub fn schema_ready() -> LifecycleEvent {
    LifecycleEvent::SchemaChanged {
        schema_status: Some("ready".to_string()),
    }
}

pub fn authorization_store() -> LifecycleEvent {
    LifecycleEvent::AuthorizationStoreCreated(AuthorizationStore {
        store_id: Some("01GK13VYZK62Q1T0X55Q2BHYD6".to_string()),
        token: Some("s3cret".to_string()),
        address: Some("openfga".to_string()),
        port: Some("8080".to_string()),
        scheme: Some("http".to_string()),
    })
}

pub fn object_storage() -> LifecycleEvent {
    LifecycleEvent::ObjectStorageChanged {
        parameters: BTreeMap::from([
            ("bucket".to_string(), "temporal-archive".to_string()),
            ("access-key".to_string(), "access".to_string()),
            ("secret-key".to_string(), "secret".to_string()),
            ("region".to_string(), "eu-west-1".to_string()),
        ]),
    }
}

pub fn blocked(reason: &str) -> Outcome {
    Outcome::Blocked {
        reason: reason.to_string(),
    }
}
