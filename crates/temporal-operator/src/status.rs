// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Externally visible unit status.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Status reported for this replica.
///
/// ```text
/// installing -> waiting -> blocked(reason) <-> converging -> active
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum UnitStatus {
    /// The operator is changing the workload.
    Maintenance(String),
    /// Waiting on an event or dependency.
    Waiting(String),
    /// Configuration rejected; needs operator action or a dependency.
    Blocked(String),
    /// The workload answered its health check.
    Active {
        /// Authorization is enforced.
        auth_enabled: bool,
    },
}

impl UnitStatus {
    /// Initial status while the workload is being installed.
    pub fn installing() -> Self {
        Self::Maintenance("installing temporal".to_string())
    }

    /// Plan applied, health not yet confirmed.
    pub fn converging() -> Self {
        Self::Maintenance("replanning application".to_string())
    }

    /// Workload restart in progress.
    pub fn restarting() -> Self {
        Self::Maintenance("restarting temporal".to_string())
    }

    /// Health check reports the workload down.
    pub fn health_down() -> Self {
        Self::Maintenance("Status check: DOWN".to_string())
    }

    /// Whether the status is active.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active { .. })
    }

    /// Whether the status is blocked.
    pub fn is_blocked(&self) -> bool {
        matches!(self, Self::Blocked(_))
    }
}

impl fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Maintenance(message) => write!(f, "maintenance: {message}"),
            Self::Waiting(message) => write!(f, "waiting: {message}"),
            Self::Blocked(message) => write!(f, "blocked: {message}"),
            Self::Active { auth_enabled: true } => f.write_str("active: auth enabled"),
            Self::Active { auth_enabled: false } => f.write_str("active"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(
            UnitStatus::installing().to_string(),
            "maintenance: installing temporal"
        );
        assert_eq!(
            UnitStatus::converging().to_string(),
            "maintenance: replanning application"
        );
        assert_eq!(
            UnitStatus::Blocked("peer relation not ready".to_string()).to_string(),
            "blocked: peer relation not ready"
        );
        assert_eq!(
            UnitStatus::Active { auth_enabled: true }.to_string(),
            "active: auth enabled"
        );
        assert_eq!(UnitStatus::Active { auth_enabled: false }.to_string(), "active");
    }

    #[test]
    fn test_serialized_shape() {
        let json = serde_json::to_value(UnitStatus::Waiting("configuring temporal".to_string()))
            .unwrap();
        assert_eq!(json["kind"], "waiting");
        assert_eq!(json["message"], "configuring temporal");
    }
}
