// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for temporal-operator.

use thiserror::Error;

/// Operator errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Configuration loading failed.
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Shared state operation failed.
    #[error("State error: {0}")]
    State(#[from] temporal_operator_state::StateError),

    /// Process supervisor operation failed.
    #[error("Supervisor error: {0}")]
    Supervisor(#[from] crate::supervisor::SupervisorError),

    /// Object storage provisioning failed.
    #[error("Provisioning error: {0}")]
    Provision(#[from] crate::adapters::object_storage::ProvisionError),

    /// Authorization service call failed.
    #[error("Authorization error: {0}")]
    Authorization(#[from] crate::adapters::authorization::AuthorizationError),

    /// Rendering a workload configuration file failed.
    #[error("Render error: {0}")]
    Render(#[from] minijinja::Error),

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

/// Result type using operator Error.
pub type Result<T> = std::result::Result<T, Error>;
