// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! State store trait definitions.
//!
//! Defines the abstract interface for the shared durable state and the
//! fragment-scoped read-modify-write built on top of it.

use async_trait::async_trait;
use tracing::debug;

use crate::error::{Result, StateError};
use crate::model::AggregatedState;

/// Capability proving the caller is the elected leader for this invocation.
///
/// Every mutating store operation takes one. The host constructs it after
/// checking leadership once, at the top of the invocation; handlers never
/// re-check leadership themselves.
#[derive(Debug)]
pub struct LeaderToken {
    _private: (),
}

impl LeaderToken {
    /// Assert leadership for the current invocation.
    pub fn elected() -> Self {
        Self { _private: () }
    }
}

/// A state snapshot together with the revision it was read at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Versioned<T> {
    /// Monotonic revision, bumped on every successful write.
    pub revision: i64,
    /// The snapshot.
    pub state: T,
}

/// Trait for shared state backends.
///
/// Backends store a single blob per application. They do not merge; callers
/// mutate a full snapshot and write it back with the revision they read.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Backend identifier (e.g., "sqlite", "memory").
    fn backend(&self) -> &'static str;

    /// Whether the substrate can currently be read and written.
    async fn is_ready(&self) -> bool;

    /// Load the current snapshot, or `None` if the state was never initialized.
    async fn load(&self) -> Result<Option<Versioned<AggregatedState>>>;

    /// Create the default state if none exists. Idempotent.
    async fn initialize(&self, token: &LeaderToken) -> Result<()>;

    /// Replace the whole blob if the persisted revision still equals `expected_revision`.
    ///
    /// Returns the new revision, or [`StateError::Conflict`] if another write
    /// landed in between.
    async fn store(
        &self,
        token: &LeaderToken,
        expected_revision: i64,
        state: &AggregatedState,
    ) -> Result<i64>;
}

/// Read the whole state, apply `mutate`, and write the whole state back.
///
/// Initializes the state first if it does not exist yet. When the mutation
/// leaves the snapshot unchanged nothing is written, so replaying the same
/// adapter event is a no-op.
pub async fn update_state<S, F>(
    store: &S,
    token: &LeaderToken,
    mutate: F,
) -> Result<AggregatedState>
where
    S: StateStore + ?Sized,
    F: FnOnce(&mut AggregatedState),
{
    if !store.is_ready().await {
        return Err(StateError::NotReady);
    }

    let current = match store.load().await? {
        Some(current) => current,
        None => {
            store.initialize(token).await?;
            store.load().await?.ok_or(StateError::NotReady)?
        }
    };

    let mut next = current.state.clone();
    mutate(&mut next);

    if next == current.state {
        debug!(revision = current.revision, "State unchanged, skipping write");
        return Ok(next);
    }

    let revision = store.store(token, current.revision, &next).await?;
    debug!(revision, "State written");
    Ok(next)
}
