// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Temporal Operator State - Shared Durable Configuration State
//!
//! This crate holds the single source of truth the operator converges from:
//! the aggregated configuration fragments written by each integration adapter.
//! The state is scoped to the application, not the replica. Every replica may
//! read it; only the elected leader may write it.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐
//! │   Database   │  │ Object Store │  │ Authorization│  │ Certificates │
//! │   adapter    │  │   adapter    │  │   adapter    │  │   adapter    │
//! └──────┬───────┘  └──────┬───────┘  └──────┬───────┘  └──────┬───────┘
//!        │ fragment        │ fragment        │ fragment        │ fragment
//!        ▼                 ▼                 ▼                 ▼
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │            update_state (read-modify-write, leader only)            │
//! └─────────────────────────────────┬───────────────────────────────────┘
//!                                   ▼
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │           StateStore: one versioned blob per application            │
//! │                   (SQLite backend / memory backend)                 │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Writes are compare-and-swap on a revision counter. A writer that read a
//! stale revision gets [`StateError::Conflict`] instead of silently
//! overwriting another fragment.
//!
//! # Modules
//!
//! - [`model`]: the typed aggregated state and its fragments
//! - [`store`]: the store trait, leadership token and read-modify-write helper
//! - [`memory`]: in-memory backend
//! - [`sqlite`]: SQLite backend
//! - [`error`]: error types

#![deny(missing_docs)]

/// Error types for state operations.
pub mod error;

/// In-memory state backend.
pub mod memory;

/// Typed aggregated configuration state.
pub mod model;

/// SQLite-backed state store.
pub mod sqlite;

/// Store trait, leadership token and read-modify-write helper.
pub mod store;

pub use error::{Result, StateError};
pub use memory::MemoryStateStore;
pub use model::{
    AggregatedState, Authorization, CertificateMaterial, DatabaseConnection, DatabaseRole,
    IngressKind, ObjectStorage,
};
pub use sqlite::SqliteStateStore;
pub use store::{LeaderToken, StateStore, Versioned, update_state};
