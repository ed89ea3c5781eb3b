// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Integration adapters.
//!
//! Each adapter turns events from one external integration into its own
//! fragment of the aggregated state. Writes go through
//! [`update_state`](temporal_operator_state::update_state), which rewrites the
//! whole blob with only the adapter's field changed, and require a
//! [`LeaderToken`](temporal_operator_state::LeaderToken).
//!
//! Adapters also compute the data this application publishes back to its
//! integrations (admin, ui, nginx-route).

pub mod admin;
pub mod auth_rules;
pub mod authorization;
pub mod certificates;
pub mod database;
pub mod ingress;
pub mod object_storage;
pub mod ui;

use serde::{Deserialize, Serialize};

/// Result of handling an integration event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", content = "reason", rename_all = "snake_case")]
pub enum AdapterOutcome {
    /// The fragment was written (or already held the same value).
    Applied,
    /// The event lacks required fields; nothing was written.
    Incomplete(String),
    /// The event conflicts with recorded state; nothing was written.
    Rejected(String),
}

impl AdapterOutcome {
    /// Whether the fragment now reflects the event.
    pub fn is_applied(&self) -> bool {
        matches!(self, AdapterOutcome::Applied)
    }
}
