// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Mock supervisor for testing.
//!
//! Records every call instead of running a process.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::traits::*;
use crate::plan::SupervisionPlan;

#[derive(Debug, Default)]
struct MockState {
    plan: Option<SupervisionPlan>,
    ports: BTreeSet<u16>,
    files: BTreeMap<String, Vec<u8>>,
    health: Option<HealthStatus>,
}

/// Mock supervisor for testing.
pub struct MockSupervisor {
    state: Mutex<MockState>,
    connected: AtomicBool,
    fail_apply: AtomicBool,
    replacements: AtomicUsize,
    restarts: AtomicUsize,
    writes: AtomicUsize,
}

impl Default for MockSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl MockSupervisor {
    /// Create a reachable mock supervisor with unknown health.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState::default()),
            connected: AtomicBool::new(true),
            fail_apply: AtomicBool::new(false),
            replacements: AtomicUsize::new(0),
            restarts: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
        }
    }

    /// Create a mock supervisor that cannot be reached.
    pub fn unreachable() -> Self {
        let supervisor = Self::new();
        supervisor.set_connected(false);
        supervisor
    }

    /// Toggle reachability.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Make `apply_plan` fail until reset.
    pub fn set_fail_apply(&self, fail: bool) {
        self.fail_apply.store(fail, Ordering::SeqCst);
    }

    /// Set the health check result.
    pub async fn set_health(&self, health: HealthStatus) {
        self.state.lock().await.health = Some(health);
    }

    /// Currently applied plan.
    pub async fn plan(&self) -> Option<SupervisionPlan> {
        self.state.lock().await.plan.clone()
    }

    /// Currently open ports.
    pub async fn ports(&self) -> BTreeSet<u16> {
        self.state.lock().await.ports.clone()
    }

    /// Contents of a workload file as UTF-8.
    pub async fn file(&self, path: &str) -> Option<String> {
        self.state
            .lock()
            .await
            .files
            .get(path)
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
    }

    /// Number of times the running plan was replaced.
    pub fn replacement_count(&self) -> usize {
        self.replacements.load(Ordering::SeqCst)
    }

    /// Number of restarts.
    pub fn restart_count(&self) -> usize {
        self.restarts.load(Ordering::SeqCst)
    }

    /// Number of file writes.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn check_connected(&self) -> Result<()> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(SupervisorError::Unreachable)
        }
    }
}

#[async_trait]
impl ProcessSupervisor for MockSupervisor {
    fn supervisor_type(&self) -> &'static str {
        "mock"
    }

    async fn can_connect(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn apply_plan(&self, plan: &SupervisionPlan) -> Result<PlanChange> {
        self.check_connected()?;
        if self.fail_apply.load(Ordering::SeqCst) {
            return Err(SupervisorError::StartFailed("mock failure".to_string()));
        }

        let mut state = self.state.lock().await;
        if state.plan.as_ref() == Some(plan) {
            return Ok(PlanChange::Unchanged);
        }

        state.plan = Some(plan.clone());
        self.replacements.fetch_add(1, Ordering::SeqCst);
        Ok(PlanChange::Replaced)
    }

    async fn restart(&self) -> Result<()> {
        self.check_connected()?;
        if self.state.lock().await.plan.is_none() {
            return Err(SupervisorError::NoPlan);
        }
        self.restarts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn get_health_status(&self) -> HealthStatus {
        self.state
            .lock()
            .await
            .health
            .unwrap_or(HealthStatus::Unknown)
    }

    async fn set_ports(&self, ports: &BTreeSet<u16>) -> Result<()> {
        self.check_connected()?;
        self.state.lock().await.ports = ports.clone();
        Ok(())
    }

    async fn file_exists(&self, path: &str) -> Result<bool> {
        self.check_connected()?;
        Ok(self.state.lock().await.files.contains_key(path))
    }

    async fn read_file(&self, path: &str) -> Result<Option<Vec<u8>>> {
        self.check_connected()?;
        Ok(self.state.lock().await.files.get(path).cloned())
    }

    async fn write_file(&self, path: &str, contents: &[u8]) -> Result<()> {
        self.check_connected()?;
        self.state
            .lock()
            .await
            .files
            .insert(path.to_string(), contents.to_vec());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn delete_file(&self, path: &str) -> Result<()> {
        self.check_connected()?;
        self.state.lock().await.files.remove(path);
        Ok(())
    }
}
