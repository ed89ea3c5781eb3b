// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Host scheduling layer.
//!
//! The runtime serializes all inputs for one replica through a single task
//! that owns the [`Reconciler`]. Events whose outcome is
//! [`Outcome::Retry`] are redelivered later with exponential backoff.
//! A periodic tick injects [`LifecycleEvent::StatusCheck`]; status checks are
//! never deferred since the next tick redelivers them. At most one copy of an
//! event is waiting in the deferred queue.
//!
//! Leadership is read from a watch channel at the start of every
//! invocation and handed to the reconciler as a [`LeaderToken`].

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use temporal_operator_state::LeaderToken;
use tokio::sync::{Notify, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::error::{Error, Result};
use crate::event::{Action, ActionOutcome, LifecycleEvent, Outcome, PublishedData};
use crate::reconciler::Reconciler;
use crate::status::UnitStatus;

/// One input line: either a lifecycle event or an action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Input {
    /// A lifecycle event.
    Event(LifecycleEvent),
    /// An operator action.
    Action(Action),
}

/// What happened to one input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Report {
    /// An event was handled.
    Event {
        /// Event kind.
        event: &'static str,
        /// Delivery attempt, starting at 1.
        attempt: u32,
        /// Reconciler outcome.
        outcome: Outcome,
        /// Status after handling.
        status: UnitStatus,
        /// Data published after handling.
        published: PublishedData,
    },
    /// An action ran.
    Action {
        /// Action kind.
        action: &'static str,
        /// Action result.
        result: ActionOutcome,
        /// Status after the action.
        status: UnitStatus,
    },
}

/// Builder for [`OperatorRuntime`].
pub struct OperatorRuntimeBuilder {
    reconciler: Option<Reconciler>,
    leader: bool,
    status_interval: Duration,
    initial_backoff: Duration,
    max_backoff: Duration,
    channel_capacity: usize,
}

impl OperatorRuntimeBuilder {
    fn new() -> Self {
        Self {
            reconciler: None,
            leader: false,
            status_interval: Duration::from_secs(300),
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
            channel_capacity: 64,
        }
    }

    /// Set the reconciler (required).
    pub fn reconciler(mut self, reconciler: Reconciler) -> Self {
        self.reconciler = Some(reconciler);
        self
    }

    /// Set whether this replica starts as leader.
    pub fn leader(mut self, leader: bool) -> Self {
        self.leader = leader;
        self
    }

    /// Set the interval between status checks.
    pub fn status_interval(mut self, interval: Duration) -> Self {
        self.status_interval = interval;
        self
    }

    /// Set the first retry delay and its cap.
    pub fn backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_backoff = initial;
        self.max_backoff = max;
        self
    }

    /// Start the runtime task.
    pub fn start(self) -> Result<OperatorRuntime> {
        let reconciler = self
            .reconciler
            .ok_or_else(|| Error::Other("reconciler is required".to_string()))?;

        let (input_tx, input_rx) = mpsc::channel(self.channel_capacity);
        let (report_tx, report_rx) = mpsc::unbounded_channel();
        let (leadership_tx, leadership_rx) = watch::channel(self.leader);
        let shutdown = Arc::new(Notify::new());

        let worker = Worker {
            reconciler,
            inputs: input_rx,
            reports: report_tx,
            leadership: leadership_rx,
            shutdown: shutdown.clone(),
            deferred: VecDeque::new(),
            status_interval: self.status_interval,
            initial_backoff: self.initial_backoff,
            max_backoff: self.max_backoff,
        };
        let handle = tokio::spawn(worker.run());

        info!(
            leader = self.leader,
            status_interval_secs = self.status_interval.as_secs(),
            "OperatorRuntime started"
        );

        Ok(OperatorRuntime {
            handle,
            inputs: input_tx,
            reports: Some(report_rx),
            leadership: leadership_tx,
            shutdown,
        })
    }
}

/// A running operator for one replica.
///
/// Call [`shutdown`](Self::shutdown) for graceful termination.
pub struct OperatorRuntime {
    handle: JoinHandle<Reconciler>,
    inputs: mpsc::Sender<Input>,
    reports: Option<mpsc::UnboundedReceiver<Report>>,
    leadership: watch::Sender<bool>,
    shutdown: Arc<Notify>,
}

impl OperatorRuntime {
    /// Create a new builder for configuring the runtime.
    pub fn builder() -> OperatorRuntimeBuilder {
        OperatorRuntimeBuilder::new()
    }

    /// A sender for inputs, usable from other tasks.
    pub fn sender(&self) -> mpsc::Sender<Input> {
        self.inputs.clone()
    }

    /// Queue an input.
    pub async fn send(&self, input: Input) -> Result<()> {
        self.inputs
            .send(input)
            .await
            .map_err(|_| Error::Other("runtime stopped".to_string()))
    }

    /// Queue a lifecycle event.
    pub async fn send_event(&self, event: LifecycleEvent) -> Result<()> {
        self.send(Input::Event(event)).await
    }

    /// Take the report stream. Returns `None` after the first call.
    pub fn reports(&mut self) -> Option<mpsc::UnboundedReceiver<Report>> {
        self.reports.take()
    }

    /// Grant or revoke leadership. Gaining it triggers a leader-elected event.
    pub fn set_leader(&self, leader: bool) {
        self.leadership.send_replace(leader);
    }

    /// Check if the runtime is still running.
    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Stop the runtime and return the reconciler.
    ///
    /// Deferred events that have not been redelivered are dropped.
    pub async fn shutdown(self) -> Result<Reconciler> {
        info!("OperatorRuntime shutting down...");
        self.shutdown.notify_one();

        match self.handle.await {
            Ok(reconciler) => {
                info!("OperatorRuntime shutdown complete");
                Ok(reconciler)
            }
            Err(e) => {
                error!("OperatorRuntime task panicked: {}", e);
                Err(Error::Other(format!("runtime task panicked: {e}")))
            }
        }
    }
}

struct Deferred {
    event: LifecycleEvent,
    attempt: u32,
    due: Instant,
}

struct Worker {
    reconciler: Reconciler,
    inputs: mpsc::Receiver<Input>,
    reports: mpsc::UnboundedSender<Report>,
    leadership: watch::Receiver<bool>,
    shutdown: Arc<Notify>,
    deferred: VecDeque<Deferred>,
    status_interval: Duration,
    initial_backoff: Duration,
    max_backoff: Duration,
}

impl Worker {
    async fn run(mut self) -> Reconciler {
        let mut ticker = tokio::time::interval_at(
            Instant::now() + self.status_interval,
            self.status_interval,
        );
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let next_due = self.deferred.iter().map(|d| d.due).min();

            tokio::select! {
                biased;

                _ = self.shutdown.notified() => {
                    info!("OperatorRuntime received shutdown signal");
                    break;
                }

                input = self.inputs.recv() => match input {
                    Some(Input::Event(event)) => self.process(event, 1).await,
                    Some(Input::Action(action)) => self.run_action(action).await,
                    None => {
                        info!("Input channel closed");
                        break;
                    }
                },

                changed = self.leadership.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let leader = *self.leadership.borrow_and_update();
                    info!(leader, "Leadership changed");
                    if leader {
                        self.process(LifecycleEvent::LeaderElected, 1).await;
                    }
                }

                _ = tokio::time::sleep_until(next_due.unwrap_or_else(Instant::now)), if next_due.is_some() => {
                    self.redeliver_due().await;
                }

                _ = ticker.tick() => {
                    self.process(LifecycleEvent::StatusCheck, 1).await;
                }
            }
        }

        if !self.deferred.is_empty() {
            info!(pending = self.deferred.len(), "Dropping deferred events");
        }
        self.reconciler
    }

    fn leader_token(&self) -> Option<LeaderToken> {
        let leader = *self.leadership.borrow();
        leader.then(LeaderToken::elected)
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.initial_backoff
            .saturating_mul(1 << exponent)
            .min(self.max_backoff)
    }

    async fn process(&mut self, event: LifecycleEvent, attempt: u32) {
        let leader = self.leader_token();
        let outcome = self.reconciler.handle(&event, leader.as_ref()).await;

        let kind = event.kind();
        if outcome.is_retry() && event != LifecycleEvent::StatusCheck {
            self.defer(event, attempt);
        }

        self.report(Report::Event {
            event: kind,
            attempt,
            outcome,
            status: self.reconciler.status().clone(),
            published: self.reconciler.published().clone(),
        });
    }

    fn defer(&mut self, event: LifecycleEvent, attempt: u32) {
        if self.deferred.iter().any(|d| d.event == event) {
            debug!(event = event.kind(), "Event already deferred");
            return;
        }
        let delay = self.backoff(attempt);
        debug!(
            event = event.kind(),
            attempt,
            delay_ms = delay.as_millis() as u64,
            "Deferring event"
        );
        self.deferred.push_back(Deferred {
            event,
            attempt: attempt + 1,
            due: Instant::now() + delay,
        });
    }

    async fn redeliver_due(&mut self) {
        let now = Instant::now();
        let (due, pending): (VecDeque<_>, VecDeque<_>) =
            std::mem::take(&mut self.deferred)
                .into_iter()
                .partition(|d| d.due <= now);
        self.deferred = pending;

        for deferred in due {
            self.process(deferred.event, deferred.attempt).await;
        }
    }

    async fn run_action(&mut self, action: Action) {
        let leader = self.leader_token();
        let result = self.reconciler.run_action(&action, leader.as_ref()).await;

        if let ActionOutcome::Completed {
            reconcile: Some(reconcile),
            ..
        } = &result
            && reconcile.is_retry()
        {
            self.defer(LifecycleEvent::PeerChanged, 1);
        }

        self.report(Report::Action {
            action: action.kind(),
            result,
            status: self.reconciler.status().clone(),
        });
    }

    fn report(&self, report: Report) {
        if self.reports.send(report).is_err() {
            debug!("Report receiver dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::UnitContext;
    use crate::declared::DeclaredConfig;
    use crate::supervisor::MockSupervisor;
    use temporal_operator_state::MemoryStateStore;

    fn reconciler(supervisor: Arc<MockSupervisor>) -> Reconciler {
        Reconciler::new(
            Arc::new(MemoryStateStore::new()),
            supervisor,
            UnitContext::new("temporal-k8s", "10.1.2.3"),
            DeclaredConfig::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_input_untagged() {
        let input: Input = serde_json::from_str(r#"{"event": "status-check"}"#).unwrap();
        assert_eq!(input, Input::Event(LifecycleEvent::StatusCheck));

        let input: Input =
            serde_json::from_str(r#"{"action": "create-authorization-model"}"#).unwrap();
        assert_eq!(
            input,
            Input::Action(Action::CreateAuthorizationModel { model: None })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_is_redelivered_with_backoff() {
        let supervisor = Arc::new(MockSupervisor::unreachable());
        let mut runtime = OperatorRuntime::builder()
            .reconciler(reconciler(supervisor.clone()))
            .leader(true)
            .start()
            .unwrap();
        let mut reports = runtime.reports().unwrap();

        runtime
            .send_event(LifecycleEvent::SupervisorReady)
            .await
            .unwrap();
        let first = reports.recv().await.unwrap();
        let started = Instant::now();
        match first {
            Report::Event {
                attempt, outcome, ..
            } => {
                assert_eq!(attempt, 1);
                assert!(outcome.is_retry());
            }
            other => panic!("unexpected report {other:?}"),
        }

        let second = reports.recv().await.unwrap();
        assert!(Instant::now() - started >= Duration::from_secs(1));
        assert!(matches!(second, Report::Event { attempt: 2, .. }));

        supervisor.set_connected(true);
        match reports.recv().await.unwrap() {
            Report::Event {
                attempt, outcome, ..
            } => {
                assert_eq!(attempt, 3);
                // No databases yet.
                assert!(matches!(outcome, Outcome::Blocked { .. }));
            }
            other => panic!("unexpected report {other:?}"),
        }
        assert!(Instant::now() - started >= Duration::from_secs(3));

        runtime.shutdown().await.unwrap();
    }

    fn drain(reports: &mut mpsc::UnboundedReceiver<Report>) -> usize {
        let mut count = 0;
        while reports.try_recv().is_ok() {
            count += 1;
        }
        count
    }

    #[tokio::test(start_paused = true)]
    async fn test_deferred_queue_stays_bounded() {
        let supervisor = Arc::new(MockSupervisor::unreachable());
        let mut runtime = OperatorRuntime::builder()
            .reconciler(reconciler(supervisor))
            .leader(true)
            .status_interval(Duration::from_secs(300))
            .start()
            .unwrap();
        let mut reports = runtime.reports().unwrap();

        // The second copy merges into the first.
        for _ in 0..2 {
            runtime
                .send_event(LifecycleEvent::SupervisorReady)
                .await
                .unwrap();
        }

        tokio::time::sleep(Duration::from_secs(5 * 3600)).await;
        let first_hours = drain(&mut reports);
        tokio::time::sleep(Duration::from_secs(3600)).await;
        let last_hour = drain(&mut reports);

        // One redelivery a minute at the cap plus twelve status ticks.
        assert!(first_hours <= 400, "first five hours: {first_hours}");
        assert!(last_hour <= 75, "sixth hour: {last_hour}");
        assert!(last_hour >= 60, "sixth hour: {last_hour}");

        runtime.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_check_ticks() {
        let supervisor = Arc::new(MockSupervisor::new());
        let mut runtime = OperatorRuntime::builder()
            .reconciler(reconciler(supervisor))
            .status_interval(Duration::from_secs(10))
            .start()
            .unwrap();
        let mut reports = runtime.reports().unwrap();

        let report = reports.recv().await.unwrap();
        assert!(matches!(
            report,
            Report::Event {
                event: "status-check",
                ..
            }
        ));
        runtime.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_gaining_leadership_emits_leader_elected() {
        let supervisor = Arc::new(MockSupervisor::new());
        let mut runtime = OperatorRuntime::builder()
            .reconciler(reconciler(supervisor))
            .start()
            .unwrap();
        let mut reports = runtime.reports().unwrap();

        runtime.set_leader(true);
        let report = reports.recv().await.unwrap();
        assert!(matches!(
            report,
            Report::Event {
                event: "leader-elected",
                ..
            }
        ));

        let reconciler = runtime.shutdown().await.unwrap();
        assert!(reconciler.status().is_blocked());
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let (_tx, inputs) = mpsc::channel(1);
        let (reports, _rx) = mpsc::unbounded_channel();
        let (_leader_tx, leadership) = watch::channel(false);
        let worker = Worker {
            reconciler: reconciler(Arc::new(MockSupervisor::new())),
            inputs,
            reports,
            leadership,
            shutdown: Arc::new(Notify::new()),
            deferred: VecDeque::new(),
            status_interval: Duration::from_secs(300),
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
        };

        assert_eq!(worker.backoff(1), Duration::from_secs(1));
        assert_eq!(worker.backoff(2), Duration::from_secs(2));
        assert_eq!(worker.backoff(4), Duration::from_secs(8));
        assert_eq!(worker.backoff(7), Duration::from_secs(60));
        assert_eq!(worker.backoff(100), Duration::from_secs(60));
    }
}
