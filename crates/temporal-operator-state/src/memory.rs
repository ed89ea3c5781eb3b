// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-memory state store.
//!
//! Behaves like the durable backends, including revision conflicts, but keeps
//! everything in process memory. Used by tests and single-process setups.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::{Result, StateError};
use crate::model::AggregatedState;
use crate::store::{LeaderToken, StateStore, Versioned};

/// In-memory state backend.
pub struct MemoryStateStore {
    inner: Mutex<Option<Versioned<AggregatedState>>>,
    ready: AtomicBool,
    writes: AtomicUsize,
}

impl Default for MemoryStateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStateStore {
    /// Create an empty, ready store.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(None),
            ready: AtomicBool::new(true),
            writes: AtomicUsize::new(0),
        }
    }

    /// Create a ready store already holding `state` at revision 1.
    pub fn with_state(state: AggregatedState) -> Self {
        Self {
            inner: Mutex::new(Some(Versioned { revision: 1, state })),
            ready: AtomicBool::new(true),
            writes: AtomicUsize::new(0),
        }
    }

    /// Toggle substrate readiness.
    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    /// Number of successful `store` calls.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    async fn load(&self) -> Result<Option<Versioned<AggregatedState>>> {
        if !self.is_ready().await {
            return Err(StateError::NotReady);
        }
        Ok(self.inner.lock().await.clone())
    }

    async fn initialize(&self, _token: &LeaderToken) -> Result<()> {
        if !self.is_ready().await {
            return Err(StateError::NotReady);
        }
        let mut inner = self.inner.lock().await;
        if inner.is_none() {
            *inner = Some(Versioned {
                revision: 1,
                state: AggregatedState::default(),
            });
        }
        Ok(())
    }

    async fn store(
        &self,
        _token: &LeaderToken,
        expected_revision: i64,
        state: &AggregatedState,
    ) -> Result<i64> {
        if !self.is_ready().await {
            return Err(StateError::NotReady);
        }
        let mut inner = self.inner.lock().await;
        let actual = inner.as_ref().map(|v| v.revision).unwrap_or(0);
        if actual != expected_revision {
            return Err(StateError::Conflict {
                expected: expected_revision,
                actual,
            });
        }

        let revision = actual + 1;
        *inner = Some(Versioned {
            revision,
            state: state.clone(),
        });
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(revision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_stale_revision_conflicts() {
        let store = MemoryStateStore::new();
        let token = LeaderToken::elected();
        store.initialize(&token).await.unwrap();

        let snapshot = store.load().await.unwrap().unwrap();
        store
            .store(&token, snapshot.revision, &snapshot.state)
            .await
            .unwrap();

        let err = store
            .store(&token, snapshot.revision, &snapshot.state)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StateError::Conflict {
                expected: 1,
                actual: 2
            }
        ));
    }

    #[tokio::test]
    async fn test_initialize_is_idempotent() {
        let mut state = AggregatedState::default();
        state.schema_ready = true;
        let store = MemoryStateStore::with_state(state);
        let token = LeaderToken::elected();

        store.initialize(&token).await.unwrap();

        let loaded = store.load().await.unwrap().unwrap();
        assert_eq!(loaded.revision, 1);
        assert!(loaded.state.schema_ready);
    }
}
