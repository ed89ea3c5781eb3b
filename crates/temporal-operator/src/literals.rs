// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Fixed names, paths and ports of the Temporal workload.

/// Supervised service name.
pub const WORKLOAD_NAME: &str = "temporal";

/// Server executable and fixed leading arguments.
pub const SERVER_COMMAND: &str = "temporal-server --env charm start";

/// Main workload configuration file.
pub const CONFIG_PATH: &str = "/etc/temporal/config/charm.yaml";

/// Dynamic (rate-limit) configuration file.
pub const DYNAMIC_CONFIG_PATH: &str = "/etc/temporal/config/dynamicconfig/charm.yaml";

/// Frontend TLS certificate.
pub const FRONTEND_CERT_PATH: &str = "/etc/temporal/tls/frontend.crt";

/// Frontend TLS private key.
pub const FRONTEND_KEY_PATH: &str = "/etc/temporal/tls/frontend.key";

/// CA certificate of the frontend issuer.
pub const FRONTEND_CA_PATH: &str = "/etc/temporal/tls/ca.pem";

/// Accepted values of the `log-level` config.
pub const VALID_LOG_LEVELS: [&str; 5] = ["info", "debug", "warning", "error", "critical"];

/// Name of the liveness check.
pub const HEALTH_CHECK_NAME: &str = "up";

/// Liveness check period.
pub const HEALTH_CHECK_PERIOD: &str = "300s";

/// Consecutive failures before the check reports down.
pub const HEALTH_CHECK_THRESHOLD: u32 = 3;

/// Port the ingress integrations route to.
pub const INGRESS_SERVICE_PORT: u16 = 7233;

/// Default object storage endpoint.
pub const DEFAULT_S3_ENDPOINT: &str = "https://s3.amazonaws.com";

/// Integration names as they appear in status messages.
pub const FRONTEND_CERTIFICATES_RELATION: &str = "frontend-certificates";

/// Roles a group may hold on a namespace.
pub const AUTH_ROLES: [&str; 3] = ["admin", "writer", "reader"];
