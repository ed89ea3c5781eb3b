// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Local process supervisor.
//!
//! Runs the workload as a child process of the operator. Workload paths are
//! mapped under a root directory so the operator can run unprivileged.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::traits::*;
use crate::plan::SupervisionPlan;

#[derive(Default)]
struct LocalState {
    plan: Option<SupervisionPlan>,
    child: Option<Child>,
    ports: BTreeSet<u16>,
}

/// Supervisor running the workload as a local child process.
pub struct LocalSupervisor {
    root: PathBuf,
    state: Mutex<LocalState>,
    stop_timeout: Duration,
    check_timeout: Duration,
}

impl LocalSupervisor {
    /// Create a supervisor writing workload files under `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            state: Mutex::new(LocalState::default()),
            stop_timeout: Duration::from_secs(10),
            check_timeout: Duration::from_secs(10),
        }
    }

    /// Set how long to wait after SIGTERM before killing the workload.
    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    /// Set the health check command timeout.
    pub fn with_check_timeout(mut self, timeout: Duration) -> Self {
        self.check_timeout = timeout;
        self
    }

    /// Host path of a workload path.
    pub fn host_path(&self, path: &str) -> PathBuf {
        self.root.join(path.trim_start_matches('/'))
    }

    fn spawn(&self, plan: &SupervisionPlan) -> Result<Child> {
        let argv = plan.argv();
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| SupervisorError::StartFailed("empty command".to_string()))?;

        let child = Command::new(program)
            .args(args)
            .envs(&plan.environment)
            .current_dir(&self.root)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SupervisorError::StartFailed(format!("{program}: {e}")))?;

        info!(
            service = %plan.service,
            pid = ?child.id(),
            "Started workload"
        );
        Ok(child)
    }

    async fn stop(&self, mut child: Child) {
        let Some(pid) = child.id() else {
            // Already reaped.
            return;
        };

        match signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            Ok(()) => debug!(pid, "Sent SIGTERM to workload"),
            Err(nix::errno::Errno::ESRCH) => {
                debug!(pid, "Workload already exited");
                return;
            }
            Err(e) => warn!(pid, error = %e, "Failed to send SIGTERM to workload"),
        }

        match tokio::time::timeout(self.stop_timeout, child.wait()).await {
            Ok(Ok(status)) => debug!(pid, ?status, "Workload stopped"),
            Ok(Err(e)) => warn!(pid, error = %e, "Failed to wait for workload"),
            Err(_) => {
                warn!(pid, "Workload ignored SIGTERM, killing");
                if let Err(e) = child.kill().await {
                    warn!(pid, error = %e, "Failed to kill workload");
                }
            }
        }
    }

    async fn run_check(&self, command: &str) -> HealthStatus {
        let argv: Vec<&str> = command.split_whitespace().collect();
        let Some((program, args)) = argv.split_first() else {
            return HealthStatus::Unknown;
        };

        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status();

        match tokio::time::timeout(self.check_timeout, output).await {
            Ok(Ok(status)) if status.success() => HealthStatus::Up,
            Ok(Ok(status)) => {
                debug!(?status, "Health check failed");
                HealthStatus::Down
            }
            Ok(Err(e)) => {
                warn!(program, error = %e, "Failed to run health check");
                HealthStatus::Unknown
            }
            Err(_) => {
                warn!(program, "Health check timed out");
                HealthStatus::Down
            }
        }
    }
}

fn is_running(child: &mut Option<Child>) -> bool {
    match child {
        Some(c) => matches!(c.try_wait(), Ok(None)),
        None => false,
    }
}

#[async_trait]
impl ProcessSupervisor for LocalSupervisor {
    fn supervisor_type(&self) -> &'static str {
        "local"
    }

    async fn can_connect(&self) -> bool {
        tokio::fs::metadata(&self.root)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
    }

    async fn apply_plan(&self, plan: &SupervisionPlan) -> Result<PlanChange> {
        let mut state = self.state.lock().await;

        if state.plan.as_ref() == Some(plan) && is_running(&mut state.child) {
            debug!(service = %plan.service, "Plan unchanged");
            return Ok(PlanChange::Unchanged);
        }

        if let Some(child) = state.child.take() {
            self.stop(child).await;
        }

        // Record the plan first so a failed start can be retried by `restart`.
        state.plan = Some(plan.clone());
        state.child = Some(self.spawn(plan)?);
        Ok(PlanChange::Replaced)
    }

    async fn restart(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        let plan = state.plan.clone().ok_or(SupervisorError::NoPlan)?;

        if let Some(child) = state.child.take() {
            self.stop(child).await;
        }
        state.child = Some(self.spawn(&plan)?);
        Ok(())
    }

    async fn get_health_status(&self) -> HealthStatus {
        let command = {
            let mut state = self.state.lock().await;
            let Some(plan) = state.plan.as_ref() else {
                return HealthStatus::Unknown;
            };
            let command = plan.health_check.command.clone();
            if !is_running(&mut state.child) {
                return HealthStatus::Down;
            }
            command
        };

        self.run_check(&command).await
    }

    async fn set_ports(&self, ports: &BTreeSet<u16>) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.ports != *ports {
            info!(?ports, "Workload ports updated");
            state.ports = ports.clone();
        }
        Ok(())
    }

    async fn file_exists(&self, path: &str) -> Result<bool> {
        Ok(tokio::fs::try_exists(self.host_path(path)).await?)
    }

    async fn read_file(&self, path: &str) -> Result<Option<Vec<u8>>> {
        match tokio::fs::read(self.host_path(path)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_file(&self, path: &str, contents: &[u8]) -> Result<()> {
        let host_path = self.host_path(path);
        if let Some(parent) = host_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&host_path, contents).await?;
        debug!(path = %host_path.display(), bytes = contents.len(), "Wrote workload file");
        Ok(())
    }

    async fn delete_file(&self, path: &str) -> Result<()> {
        match tokio::fs::remove_file(self.host_path(path)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

impl std::fmt::Debug for LocalSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalSupervisor")
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{CheckLevel, HealthCheck, OnCheckFailure};
    use std::collections::BTreeMap;

    fn plan(command: &str, check: &str) -> SupervisionPlan {
        SupervisionPlan {
            service: "temporal".to_string(),
            command: command.to_string(),
            environment: BTreeMap::from([("LOG_LEVEL".to_string(), "info".to_string())]),
            health_check: HealthCheck {
                name: "up".to_string(),
                command: check.to_string(),
                period: "300s".to_string(),
                level: CheckLevel::Alive,
                threshold: 3,
                on_failure: OnCheckFailure::Ignore,
            },
            ports: BTreeSet::new(),
        }
    }

    #[tokio::test]
    async fn test_files_are_mapped_under_root() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let supervisor = LocalSupervisor::new(temp_dir.path());

        assert!(supervisor.can_connect().await);
        supervisor
            .write_file("/etc/temporal/config/charm.yaml", b"log: {}")
            .await
            .unwrap();

        let host = temp_dir.path().join("etc/temporal/config/charm.yaml");
        assert_eq!(std::fs::read_to_string(&host).unwrap(), "log: {}");
        assert!(
            supervisor
                .file_exists("/etc/temporal/config/charm.yaml")
                .await
                .unwrap()
        );

        supervisor
            .delete_file("/etc/temporal/config/charm.yaml")
            .await
            .unwrap();
        assert!(
            supervisor
                .read_file("/etc/temporal/config/charm.yaml")
                .await
                .unwrap()
                .is_none()
        );
        // Deleting twice is fine.
        supervisor
            .delete_file("/etc/temporal/config/charm.yaml")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_missing_root_cannot_connect() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let supervisor = LocalSupervisor::new(temp_dir.path().join("missing"));
        assert!(!supervisor.can_connect().await);
    }

    #[tokio::test]
    async fn test_apply_replaces_only_on_change() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let supervisor =
            LocalSupervisor::new(temp_dir.path()).with_stop_timeout(Duration::from_secs(2));

        let first = plan("sleep 30", "true");
        assert_eq!(
            supervisor.apply_plan(&first).await.unwrap(),
            PlanChange::Replaced
        );
        assert_eq!(
            supervisor.apply_plan(&first).await.unwrap(),
            PlanChange::Unchanged
        );
        assert_eq!(supervisor.get_health_status().await, HealthStatus::Up);

        let second = plan("sleep 31", "false");
        assert_eq!(
            supervisor.apply_plan(&second).await.unwrap(),
            PlanChange::Replaced
        );
        assert_eq!(supervisor.get_health_status().await, HealthStatus::Down);

        supervisor.restart().await.unwrap();
    }

    #[tokio::test]
    async fn test_start_failure_is_reported() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let supervisor = LocalSupervisor::new(temp_dir.path());

        let err = supervisor
            .apply_plan(&plan("/nonexistent/temporal-server start", "true"))
            .await
            .unwrap_err();
        assert!(matches!(err, SupervisorError::StartFailed(_)));
    }

    #[tokio::test]
    async fn test_health_unknown_without_plan() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let supervisor = LocalSupervisor::new(temp_dir.path());
        assert_eq!(supervisor.get_health_status().await, HealthStatus::Unknown);
        assert!(matches!(
            supervisor.restart().await,
            Err(SupervisorError::NoPlan)
        ));
    }
}
