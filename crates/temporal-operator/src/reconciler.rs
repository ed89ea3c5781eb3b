// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The reconciler: one full convergence pass per event.
//!
//! Every event ends in the same pass, regardless of which fragment it
//! touched:
//!
//! ```text
//! supervisor reachable? ──no──▶ Retry
//!        │
//!   load shared state ──error──▶ Retry
//!        │
//!     validate ──blocked──▶ Blocked (plan untouched)
//!        │
//!  fix shard count (leader)
//!        │
//!  build plan ─▶ write config files ─▶ sync TLS files ─▶ set ports ─▶ apply plan
//!        │
//!   status from plan change and health
//! ```
//!
//! The pass is idempotent: replaying an event against unchanged state
//! writes nothing to the store and leaves the running plan in place.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use temporal_operator_state::{AggregatedState, IngressKind, LeaderToken, StateStore, update_state};
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::adapters::auth_rules::{self, RuleOperation};
use crate::adapters::authorization::{self, AuthorizationClient, OpenFgaClient};
use crate::adapters::object_storage::{self, BucketProvisioner, S3Client};
use crate::adapters::{AdapterOutcome, admin, certificates, database, ingress, ui};
use crate::config::UnitContext;
use crate::declared::{DeclaredConfig, split_list};
use crate::event::{Action, ActionOutcome, LifecycleEvent, Outcome, PublishedData};
use crate::literals::{CONFIG_PATH, DYNAMIC_CONFIG_PATH};
use crate::plan::build_plan;
use crate::render::Renderer;
use crate::status::UnitStatus;
use crate::supervisor::{HealthStatus, PlanChange, ProcessSupervisor, SupervisorError};
use crate::validator::{ResolvedConfig, validate};

const EXTERNAL_API_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trigger {
    Event,
    StatusCheck,
}

/// Converges the workload to the declared configuration and shared state.
pub struct Reconciler {
    store: Arc<dyn StateStore>,
    supervisor: Arc<dyn ProcessSupervisor>,
    provisioner: Arc<dyn BucketProvisioner>,
    authorization_client: Arc<dyn AuthorizationClient>,
    renderer: Renderer,
    unit: UnitContext,
    declared: DeclaredConfig,
    status: UnitStatus,
    published: PublishedData,
}

impl Reconciler {
    /// Create a reconciler with HTTP clients for the external integrations.
    pub fn new(
        store: Arc<dyn StateStore>,
        supervisor: Arc<dyn ProcessSupervisor>,
        unit: UnitContext,
        declared: DeclaredConfig,
    ) -> crate::Result<Self> {
        Ok(Self {
            store,
            supervisor,
            provisioner: Arc::new(S3Client::new(EXTERNAL_API_TIMEOUT)?),
            authorization_client: Arc::new(OpenFgaClient::new(EXTERNAL_API_TIMEOUT)?),
            renderer: Renderer::new()?,
            unit,
            declared,
            status: UnitStatus::installing(),
            published: PublishedData::default(),
        })
    }

    /// Replace the bucket provisioner.
    pub fn with_provisioner(mut self, provisioner: Arc<dyn BucketProvisioner>) -> Self {
        self.provisioner = provisioner;
        self
    }

    /// Replace the authorization model client.
    pub fn with_authorization_client(mut self, client: Arc<dyn AuthorizationClient>) -> Self {
        self.authorization_client = client;
        self
    }

    /// Current status of this replica.
    pub fn status(&self) -> &UnitStatus {
        &self.status
    }

    /// Data currently published to integrations.
    pub fn published(&self) -> &PublishedData {
        &self.published
    }

    /// Current declared configuration.
    pub fn declared(&self) -> &DeclaredConfig {
        &self.declared
    }

    /// Handle one lifecycle event.
    ///
    /// `leader` is present when this replica holds leadership for this
    /// invocation; shared state is written only then.
    pub async fn handle(&mut self, event: &LifecycleEvent, leader: Option<&LeaderToken>) -> Outcome {
        let span = info_span!("handle", event = event.kind(), leader = leader.is_some());
        async {
            debug!("Handling event");
            let previous = self.status.clone();
            let outcome = self.dispatch(event, leader).await;
            if outcome.is_retry() {
                // Deferred events leave the last stable status visible.
                self.set_status(previous);
            }
            debug!(?outcome, status = %self.status, "Handled event");
            outcome
        }
        .instrument(span)
        .await
    }

    async fn dispatch(&mut self, event: &LifecycleEvent, leader: Option<&LeaderToken>) -> Outcome {
        let was_active = self.status.is_active();

        match event {
            LifecycleEvent::Install => {
                self.set_status(UnitStatus::installing());
                if let Some(token) = leader
                    && let Err(e) = self.store.initialize(token).await
                {
                    warn!(error = %e, "Couldn't initialize shared state yet");
                }
                Outcome::Idle
            }
            LifecycleEvent::LeaderElected => {
                if let Some(token) = leader
                    && let Err(e) = self.store.initialize(token).await
                {
                    warn!(error = %e, "Couldn't initialize shared state");
                    return Outcome::retry(format!("shared state: {e}"));
                }
                self.reconcile(Trigger::Event, leader, was_active).await
            }
            LifecycleEvent::SupervisorReady | LifecycleEvent::PeerChanged => {
                self.reconcile(Trigger::Event, leader, was_active).await
            }
            LifecycleEvent::ConfigChanged { config } => {
                self.declared = config.as_ref().clone();
                self.set_status(UnitStatus::Waiting("configuring temporal".to_string()));
                self.reconcile(Trigger::Event, leader, was_active).await
            }
            LifecycleEvent::StatusCheck => {
                self.reconcile(Trigger::StatusCheck, leader, was_active).await
            }
            LifecycleEvent::Restart => self.restart(leader, was_active).await,
            _ => {
                let integration = event.integration().unwrap_or("integration");
                self.set_status(UnitStatus::Waiting(format!("handling {integration} change")));

                if !self.store.is_ready().await {
                    info!(integration, "Shared state not ready, deferring");
                    return Outcome::retry("shared state not ready");
                }

                if let Some(token) = leader {
                    match self.apply_fragment(event, token).await {
                        Ok(AdapterOutcome::Applied) => {}
                        Ok(outcome) => info!(integration, ?outcome, "Fragment not written"),
                        Err(e) => {
                            warn!(integration, error = %e, "Couldn't write fragment, deferring");
                            return Outcome::retry(format!("{integration}: {e}"));
                        }
                    }
                }

                self.reconcile(Trigger::Event, leader, was_active).await
            }
        }
    }

    async fn apply_fragment(
        &self,
        event: &LifecycleEvent,
        token: &LeaderToken,
    ) -> temporal_operator_state::Result<AdapterOutcome> {
        let store = self.store.as_ref();
        match event {
            LifecycleEvent::DatabaseChanged(credentials) => {
                database::apply_credentials(
                    store,
                    token,
                    &self.unit.app_name,
                    credentials,
                    self.declared.db_tls_enabled,
                )
                .await
            }
            LifecycleEvent::DatabaseRemoved { role } => database::remove(store, token, *role).await,
            LifecycleEvent::SchemaChanged { schema_status } => {
                admin::apply_schema_status(store, token, schema_status.as_deref()).await
            }
            LifecycleEvent::ObjectStorageChanged { parameters } => {
                object_storage::apply_parameters(store, token, self.provisioner.as_ref(), parameters)
                    .await
            }
            LifecycleEvent::ObjectStorageRemoved => object_storage::remove(store, token).await,
            LifecycleEvent::AuthorizationStoreCreated(event) => {
                authorization::apply_store(store, token, event).await
            }
            LifecycleEvent::AuthorizationRemoved => authorization::remove(store, token).await,
            LifecycleEvent::CertificateAvailable(material) => {
                certificates::apply_certificate(store, token, material).await
            }
            LifecycleEvent::CertificateRemoved => certificates::remove(store, token).await,
            LifecycleEvent::IngressJoined { kind } => ingress::join(store, token, *kind).await,
            LifecycleEvent::IngressRemoved { kind } => ingress::leave(store, token, *kind).await,
            _ => Ok(AdapterOutcome::Applied),
        }
    }

    async fn restart(&mut self, leader: Option<&LeaderToken>, was_active: bool) -> Outcome {
        if !self.supervisor.can_connect().await {
            info!("Workload not reachable, deferring restart");
            return Outcome::retry("workload not reachable");
        }

        self.set_status(UnitStatus::restarting());
        match self.supervisor.restart().await {
            Ok(()) => {
                info!("Workload restarted");
                self.set_status(UnitStatus::converging());
                self.publish(None, leader.is_some());
                Outcome::Idle
            }
            Err(SupervisorError::NoPlan) => {
                info!("No plan applied yet, reconciling instead of restarting");
                self.reconcile(Trigger::Event, leader, was_active).await
            }
            Err(e) => {
                warn!(error = %e, "Workload restart failed, deferring");
                Outcome::retry(format!("restart failed: {e}"))
            }
        }
    }

    async fn load_state(
        &self,
        leader: Option<&LeaderToken>,
    ) -> Result<Option<AggregatedState>, Outcome> {
        if !self.store.is_ready().await {
            return Ok(None);
        }

        match self.store.load().await {
            Ok(Some(versioned)) => Ok(Some(versioned.state)),
            Ok(None) => {
                if let Some(token) = leader
                    && let Err(e) = self.store.initialize(token).await
                {
                    warn!(error = %e, "Couldn't initialize shared state");
                    return Err(Outcome::retry(format!("shared state: {e}")));
                }
                Ok(Some(AggregatedState::default()))
            }
            Err(e) => {
                warn!(error = %e, "Couldn't load shared state, deferring");
                Err(Outcome::retry(format!("shared state: {e}")))
            }
        }
    }

    async fn reconcile(
        &mut self,
        trigger: Trigger,
        leader: Option<&LeaderToken>,
        was_active: bool,
    ) -> Outcome {
        if !self.supervisor.can_connect().await {
            info!("Workload not reachable, deferring");
            return Outcome::retry("workload not reachable");
        }

        let state = match self.load_state(leader).await {
            Ok(state) => state,
            Err(outcome) => return outcome,
        };

        let resolved = match validate(&self.declared, state.as_ref(), &self.unit) {
            Ok(resolved) => resolved,
            Err(blocked) => {
                warn!(reason = %blocked, "Configuration blocked");
                self.set_status(UnitStatus::Blocked(blocked.reason().to_string()));
                self.publish(state.as_ref(), leader.is_some());
                return Outcome::Blocked {
                    reason: blocked.reason().to_string(),
                };
            }
        };

        if !resolved.num_shards_fixed
            && let Some(token) = leader
        {
            let num_shards = resolved.num_shards;
            if let Err(e) = update_state(self.store.as_ref(), token, |s| {
                s.num_shards = Some(num_shards)
            })
            .await
            {
                warn!(error = %e, "Couldn't record history shard count, deferring");
                return Outcome::retry(format!("shared state: {e}"));
            }
            info!(num_shards, "History shard count fixed");
        }

        let change = match self.apply(&resolved).await {
            Ok(change) => change,
            Err(outcome) => {
                if let Outcome::Blocked { reason } = &outcome {
                    self.set_status(UnitStatus::Blocked(reason.clone()));
                }
                return outcome;
            }
        };

        let status = match (trigger, change) {
            (Trigger::StatusCheck, PlanChange::Unchanged) => {
                match self.supervisor.get_health_status().await {
                    HealthStatus::Up => UnitStatus::Active {
                        auth_enabled: resolved.auth.is_some(),
                    },
                    HealthStatus::Down => UnitStatus::health_down(),
                    HealthStatus::Unknown => UnitStatus::converging(),
                }
            }
            (Trigger::Event, PlanChange::Unchanged) if was_active => UnitStatus::Active {
                auth_enabled: resolved.auth.is_some(),
            },
            _ => UnitStatus::converging(),
        };
        self.set_status(status);
        self.publish(state.as_ref(), leader.is_some());

        Outcome::Applied { change }
    }

    /// Write workload files and apply the plan for `resolved`.
    async fn apply(&self, resolved: &ResolvedConfig) -> Result<PlanChange, Outcome> {
        let plan = build_plan(resolved);

        let rendered = self
            .renderer
            .render_config(resolved)
            .and_then(|config| Ok((config, self.renderer.render_dynamic_config(resolved)?)));
        let (config, dynamic_config) = match rendered {
            Ok(files) => files,
            Err(e) => {
                error!(error = %e, "Failed to render configuration");
                return Err(Outcome::Blocked {
                    reason: format!("failed to render configuration: {e}"),
                });
            }
        };

        let supervisor = self.supervisor.as_ref();
        let result = async {
            write_if_changed(supervisor, CONFIG_PATH, &config).await?;
            write_if_changed(supervisor, DYNAMIC_CONFIG_PATH, &dynamic_config).await?;
            certificates::sync_files(supervisor, resolved.frontend_tls.as_ref()).await?;
            supervisor.set_ports(&plan.ports).await?;
            supervisor.apply_plan(&plan).await
        }
        .await;

        match result {
            Ok(change) => {
                info!(?change, roles = ?resolved.roles, "Plan applied");
                Ok(change)
            }
            Err(e) => {
                warn!(error = %e, "Couldn't apply plan, deferring");
                Err(Outcome::retry(format!("supervisor: {e}")))
            }
        }
    }

    fn set_status(&mut self, status: UnitStatus) {
        if self.status != status {
            info!(from = %self.status, to = %status, "Status changed");
            self.status = status;
        }
    }

    /// Refresh published data. `state` is `None` when it was not read.
    fn publish(&mut self, state: Option<&AggregatedState>, leader: bool) {
        let certificate_request = self
            .declared
            .declares_frontend()
            .then(|| certificates::certificate_request(&self.declared, &self.unit.app_name));
        if !leader {
            self.published = PublishedData {
                certificate_request,
                ..PublishedData::default()
            };
            return;
        }

        self.published.certificate_request = certificate_request;

        self.published.ui = Some(ui::relation_data(&self.status));
        if let Some(state) = state {
            self.published.admin = admin::relation_data(state, self.declared.db_tls_enabled);
            self.published.nginx_route = state
                .ingress
                .contains(&IngressKind::NginxRoute)
                .then(|| {
                    ingress::nginx_route_data(
                        &self.declared,
                        &self.unit.app_name,
                        &self.unit.namespace,
                    )
                });
        }
    }

    /// Run an operator action.
    ///
    /// Failures are reported in the result and never change the status.
    pub async fn run_action(&mut self, action: &Action, leader: Option<&LeaderToken>) -> ActionOutcome {
        let span = info_span!("action", action = action.kind(), leader = leader.is_some());
        async {
            let store = self.store.as_ref();
            let client = self.authorization_client.as_ref();
            let result = match action {
                Action::CreateAuthorizationModel { model } => {
                    let Some(token) = leader else {
                        return ActionOutcome::Failed {
                            message: "only the leader can create an authorization model"
                                .to_string(),
                        };
                    };
                    match authorization::create_authorization_model(
                        store,
                        token,
                        client,
                        model.as_deref(),
                    )
                    .await
                    {
                        Ok(model_id) => {
                            let was_active = self.status.is_active();
                            let reconcile =
                                self.reconcile(Trigger::Event, leader, was_active).await;
                            return ActionOutcome::Completed {
                                output: BTreeMap::from([(
                                    "authorization-model-id".to_string(),
                                    json!(model_id),
                                )]),
                                reconcile: Some(reconcile),
                            };
                        }
                        Err(e) => Err(e),
                    }
                }
                Action::AddAuthRule(params) => {
                    auth_rules::change_rule(store, client, params, RuleOperation::Create)
                        .await
                        .map(|message| json!(message))
                }
                Action::RemoveAuthRule(params) => {
                    auth_rules::change_rule(store, client, params, RuleOperation::Delete)
                        .await
                        .map(|message| json!(message))
                }
                Action::CheckAuthRule(params) => auth_rules::check_rule(store, client, params)
                    .await
                    .map(|allowed| json!(allowed)),
                Action::ListAuthRule(params) => auth_rules::list_rules(store, client, params)
                    .await
                    .map(|rules| json!(rules)),
                Action::ListSystemAdmins => {
                    Ok(json!(split_list(&self.declared.auth_admin_groups)))
                }
            };

            match result {
                Ok(output) => ActionOutcome::Completed {
                    output: BTreeMap::from([("output".to_string(), output)]),
                    reconcile: None,
                },
                Err(e) => {
                    warn!(error = %e, "Action failed");
                    ActionOutcome::Failed {
                        message: e.to_string(),
                    }
                }
            }
        }
        .instrument(span)
        .await
    }
}

async fn write_if_changed(
    supervisor: &dyn ProcessSupervisor,
    path: &str,
    content: &str,
) -> Result<(), SupervisorError> {
    if supervisor.read_file(path).await?.as_deref() != Some(content.as_bytes()) {
        supervisor.write_file(path, content.as_bytes()).await?;
        debug!(path, "Workload file updated");
    }
    Ok(())
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("store", &self.store.backend())
            .field("supervisor", &self.supervisor.supervisor_type())
            .field("unit", &self.unit)
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}
