// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Web UI integration.

use std::collections::BTreeMap;

use crate::status::UnitStatus;

/// Data published to the UI: whether the server is usable.
pub fn relation_data(status: &UnitStatus) -> BTreeMap<String, String> {
    let server_status = if status.is_active() { "ready" } else { "blocked" };
    BTreeMap::from([("server_status".to_string(), server_status.to_string())])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_status() {
        assert_eq!(
            relation_data(&UnitStatus::Active { auth_enabled: false })["server_status"],
            "ready"
        );
        assert_eq!(
            relation_data(&UnitStatus::Blocked("peer relation not ready".to_string()))
                ["server_status"],
            "blocked"
        );
        assert_eq!(
            relation_data(&UnitStatus::converging())["server_status"],
            "blocked"
        );
    }
}
