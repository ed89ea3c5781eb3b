// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Temporal Operator - Lifecycle Management for a Temporal Server Deployment
//!
//! This crate converges a Temporal server workload to the configuration
//! declared by the operator and the credentials delivered by its
//! integrations. Every lifecycle event runs one full reconciliation pass.
//!
//! # Architecture
//!
//! ```text
//!   lifecycle events (stdin, JSON lines)
//!                │
//!                ▼
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │ OperatorRuntime: single task, deferred queue, status-check ticker   │
//! └───────────────────────────────┬─────────────────────────────────────┘
//!                                 ▼
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │ Reconciler                                                          │
//! │  ┌──────────┐   ┌───────────┐   ┌────────────┐   ┌────────────────┐ │
//! │  │ Adapters │──▶│ Validator │──▶│ Plan/Render│──▶│ Supervisor     │ │
//! │  └────┬─────┘   └─────▲─────┘   └────────────┘   └────────────────┘ │
//! └───────┼───────────────┼─────────────────────────────────────────────┘
//!         │ fragments     │ snapshot
//!         ▼               │
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │ temporal-operator-state: shared durable state (leader writes)       │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Status
//!
//! | Status | Meaning |
//! |--------|---------|
//! | `maintenance: installing temporal` | Installed, nothing applied yet |
//! | `waiting: <reason>` | An event is being handled or a dependency is missing |
//! | `blocked: <reason>` | Configuration rejected; nothing applied |
//! | `maintenance: replanning application` | Plan applied, health not yet confirmed |
//! | `maintenance: Status check: DOWN` | Health check failing |
//! | `active` / `active: auth enabled` | Health check passing |
//!
//! # Actions
//!
//! | Action | Leader only | Effect |
//! |--------|-------------|--------|
//! | `create-authorization-model` | yes | Posts the model, records its id, reconciles |
//! | `add-auth-rule` / `remove-auth-rule` | no | Writes or deletes one relationship tuple |
//! | `check-auth-rule` | no | Reports whether a rule holds |
//! | `list-auth-rule` | no | Lists rules of a user, group or namespace |
//! | `list-system-admins` | no | Reports the declared admin groups |
//!
//! # Configuration
//!
//! Process configuration is loaded from environment variables, see
//! [`config::OperatorConfig::from_env`]. The declared configuration arrives
//! with `config-changed` events and may be seeded from a JSON file.
//!
//! # Modules
//!
//! - [`adapters`]: per-integration fragment writers and published data
//! - [`config`]: process configuration from environment variables
//! - [`declared`]: the operator-declared configuration
//! - [`validator`]: cross-fragment checks producing a resolved configuration
//! - [`plan`]: supervision plan builder
//! - [`render`]: workload configuration files
//! - [`supervisor`]: process supervisor interface and backends
//! - [`reconciler`]: the convergence pass
//! - [`runtime`]: event loop, retries and status checks

#![deny(missing_docs)]

/// Integration adapters.
pub mod adapters;

/// Process configuration loaded from environment variables.
pub mod config;

/// Operator-declared configuration.
pub mod declared;

/// Error types for operator operations.
pub mod error;

/// Lifecycle events, actions and outcomes.
pub mod event;

/// Fixed names, paths and ports of the workload.
pub mod literals;

/// Supervision plan builder.
pub mod plan;

/// The convergence pass.
pub mod reconciler;

/// Workload configuration file rendering.
pub mod render;

/// Host scheduling layer.
pub mod runtime;

/// Unit status.
pub mod status;

/// Process supervisor interface and backends.
pub mod supervisor;

/// Configuration validation.
pub mod validator;

pub use error::{Error, Result};
pub use event::{Action, ActionOutcome, LifecycleEvent, Outcome, PublishedData};
pub use reconciler::Reconciler;
pub use runtime::{Input, OperatorRuntime, Report};
pub use status::UnitStatus;
