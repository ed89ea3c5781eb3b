// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Process supervisor trait definitions.
//!
//! Defines the abstract interface to whatever runs the workload process on
//! this replica: plan application, restarts, health, files and ports.

use std::collections::BTreeSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::plan::SupervisionPlan;

/// Errors from supervisor operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SupervisorError {
    /// The supervisor cannot be reached.
    #[error("Supervisor not reachable")]
    Unreachable,

    /// The workload process failed to start.
    #[error("Start failed: {0}")]
    StartFailed(String),

    /// No plan has been applied yet.
    #[error("No plan applied")]
    NoPlan,

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Other error.
    #[error("Other: {0}")]
    Other(String),
}

/// Result type for supervisor operations.
pub type Result<T> = std::result::Result<T, SupervisorError>;

/// Effect of applying a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanChange {
    /// The running plan was replaced and the workload (re)started.
    Replaced,
    /// The plan was already in place; nothing was touched.
    Unchanged,
}

/// Result of the workload liveness check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// The check passes.
    Up,
    /// The check fails.
    Down,
    /// No check result yet.
    Unknown,
}

/// Trait for process supervisors.
#[async_trait]
pub trait ProcessSupervisor: Send + Sync {
    /// Supervisor identifier (e.g., "local", "mock").
    fn supervisor_type(&self) -> &'static str;

    /// Whether this replica can currently drive the supervisor.
    async fn can_connect(&self) -> bool;

    /// Set the desired plan, replacing the running one only if it differs.
    async fn apply_plan(&self, plan: &SupervisionPlan) -> Result<PlanChange>;

    /// Restart the workload with the current plan.
    async fn restart(&self) -> Result<()>;

    /// Latest liveness result.
    async fn get_health_status(&self) -> HealthStatus;

    /// Open exactly `ports`, closing any others.
    async fn set_ports(&self, ports: &BTreeSet<u16>) -> Result<()>;

    /// Whether a workload file exists.
    async fn file_exists(&self, path: &str) -> Result<bool>;

    /// Read a workload file, `None` if it does not exist.
    async fn read_file(&self, path: &str) -> Result<Option<Vec<u8>>>;

    /// Write a workload file, creating parent directories.
    async fn write_file(&self, path: &str, contents: &[u8]) -> Result<()>;

    /// Delete a workload file. Missing files are not an error.
    async fn delete_file(&self, path: &str) -> Result<()>;
}
