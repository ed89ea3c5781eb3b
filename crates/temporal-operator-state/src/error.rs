// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for temporal-operator-state.

use thiserror::Error;

/// State store errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StateError {
    /// The underlying substrate cannot be read or written yet.
    #[error("state store not ready")]
    NotReady,

    /// A write was attempted against a stale revision.
    #[error("state revision conflict: expected {expected}, found {actual}")]
    Conflict {
        /// Revision the writer read before mutating.
        expected: i64,
        /// Revision currently persisted.
        actual: i64,
    },

    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Applying embedded migrations failed.
    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    /// The persisted blob could not be (de)serialized.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StateError {
    /// Whether retrying the same operation later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StateError::NotReady | StateError::Conflict { .. } | StateError::Database(_)
        )
    }
}

/// Result type using StateError.
pub type Result<T> = std::result::Result<T, StateError>;
