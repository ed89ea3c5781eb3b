// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Temporal Operator
//!
//! Reads lifecycle events and actions as JSON lines on stdin, converges the
//! local Temporal workload, and prints one JSON report per handled input on
//! stdout.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use temporal_operator::config::OperatorConfig;
use temporal_operator::declared::DeclaredConfig;
use temporal_operator::supervisor::{LocalSupervisor, ProcessSupervisor};
use temporal_operator::{Input, LifecycleEvent, OperatorRuntime, Reconciler};
use temporal_operator_state::{SqliteStateStore, StateStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr; stdout carries reports.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "temporal_operator=info,temporal_operator_state=info".into()),
        )
        .init();

    if let Err(e) = dotenvy::dotenv() {
        warn!("No .env file loaded: {}", e);
    }

    let config = OperatorConfig::from_env()?;

    info!(
        app_name = %config.app_name,
        data_dir = %config.data_dir.display(),
        workload_root = %config.workload_root.display(),
        leader = config.leader,
        "Starting Temporal Operator"
    );

    let declared = match &config.declared_config {
        Some(path) => DeclaredConfig::from_file(path)?,
        None => DeclaredConfig::default(),
    };

    let store = Arc::new(SqliteStateStore::from_path(config.state_db_path(), &config.app_name).await?);
    info!(backend = store.backend(), "State store initialized");

    let supervisor = Arc::new(LocalSupervisor::new(&config.workload_root));
    info!(supervisor_type = supervisor.supervisor_type(), "Supervisor initialized");

    let reconciler = Reconciler::new(store, supervisor, config.unit.clone(), declared)?;

    let mut runtime = OperatorRuntime::builder()
        .reconciler(reconciler)
        .leader(config.leader)
        .status_interval(config.status_interval)
        .start()?;

    let mut reports = runtime
        .reports()
        .ok_or_else(|| anyhow::anyhow!("report stream already taken"))?;
    let printer = tokio::spawn(async move {
        while let Some(report) = reports.recv().await {
            match serde_json::to_string(&report) {
                Ok(line) => println!("{line}"),
                Err(e) => warn!(error = %e, "Failed to serialize report"),
            }
        }
    });

    runtime.send_event(LifecycleEvent::Install).await?;
    runtime.send_event(LifecycleEvent::SupervisorReady).await?;

    let sender = runtime.sender();
    let reader = tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) if line.trim().is_empty() => continue,
                Ok(Some(line)) => match serde_json::from_str::<Input>(&line) {
                    Ok(input) => {
                        if sender.send(input).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!(error = %e, "Ignoring malformed input line"),
                },
                Ok(None) => {
                    info!("Input closed");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to read input");
                    break;
                }
            }
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    reader.abort();
    runtime.shutdown().await?;
    if let Err(e) = printer.await {
        warn!("Report printer task panicked: {}", e);
    }

    info!("Temporal Operator shut down");

    Ok(())
}
