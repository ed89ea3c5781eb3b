// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Lifecycle events, operator actions and their outcomes.
//!
//! Events arrive as JSON objects tagged with `"event"`:
//!
//! ```json
//! {"event": "database-changed", "role": "primary", "database": "temporal-k8s_db", ...}
//! {"event": "config-changed", "config": {"services": "frontend,history"}}
//! {"event": "status-check"}
//! ```
//!
//! Actions are tagged with `"action"`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use temporal_operator_state::{CertificateMaterial, DatabaseRole, IngressKind};

use crate::adapters::auth_rules::AuthRuleParams;
use crate::adapters::authorization::AuthorizationStore;
use crate::adapters::certificates::CertificateRequest;
use crate::adapters::database::DatabaseCredentials;
use crate::declared::DeclaredConfig;
use crate::supervisor::PlanChange;

/// A lifecycle event delivered by the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum LifecycleEvent {
    /// The application is being installed on this replica.
    Install,
    /// This replica became the leader.
    LeaderElected,
    /// The workload supervisor became reachable.
    SupervisorReady,
    /// The declared configuration changed.
    ConfigChanged {
        /// New declared configuration.
        config: Box<DeclaredConfig>,
    },
    /// Periodic status check.
    StatusCheck,
    /// Operator-requested workload restart.
    Restart,
    /// Another replica changed the shared state.
    PeerChanged,
    /// A database integration delivered credentials.
    DatabaseChanged(DatabaseCredentials),
    /// A database integration was removed.
    DatabaseRemoved {
        /// Which database.
        role: DatabaseRole,
    },
    /// The schema owner reported schema status.
    SchemaChanged {
        /// Remote status; only `"ready"` counts.
        #[serde(default)]
        schema_status: Option<String>,
    },
    /// The object storage integration delivered parameters.
    ObjectStorageChanged {
        /// Raw integration parameters.
        parameters: BTreeMap<String, String>,
    },
    /// The object storage integration was removed.
    ObjectStorageRemoved,
    /// The authorization integration created a store.
    AuthorizationStoreCreated(AuthorizationStore),
    /// The authorization integration was removed.
    AuthorizationRemoved,
    /// A frontend certificate was issued.
    CertificateAvailable(CertificateMaterial),
    /// The frontend certificate was revoked or its integration removed.
    CertificateRemoved,
    /// An ingress integration joined.
    IngressJoined {
        /// Which ingress.
        kind: IngressKind,
    },
    /// An ingress integration left.
    IngressRemoved {
        /// Which ingress.
        kind: IngressKind,
    },
}

impl LifecycleEvent {
    /// Short name used in logs and reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Install => "install",
            Self::LeaderElected => "leader-elected",
            Self::SupervisorReady => "supervisor-ready",
            Self::ConfigChanged { .. } => "config-changed",
            Self::StatusCheck => "status-check",
            Self::Restart => "restart",
            Self::PeerChanged => "peer-changed",
            Self::DatabaseChanged(_) => "database-changed",
            Self::DatabaseRemoved { .. } => "database-removed",
            Self::SchemaChanged { .. } => "schema-changed",
            Self::ObjectStorageChanged { .. } => "object-storage-changed",
            Self::ObjectStorageRemoved => "object-storage-removed",
            Self::AuthorizationStoreCreated(_) => "authorization-store-created",
            Self::AuthorizationRemoved => "authorization-removed",
            Self::CertificateAvailable(_) => "certificate-available",
            Self::CertificateRemoved => "certificate-removed",
            Self::IngressJoined { .. } => "ingress-joined",
            Self::IngressRemoved { .. } => "ingress-removed",
        }
    }

    /// Integration whose fragment this event writes, if any.
    pub fn integration(&self) -> Option<&'static str> {
        match self {
            Self::DatabaseChanged(DatabaseCredentials { role, .. })
            | Self::DatabaseRemoved { role } => Some(role.relation_name()),
            Self::SchemaChanged { .. } => Some("admin"),
            Self::ObjectStorageChanged { .. } | Self::ObjectStorageRemoved => Some("s3"),
            Self::AuthorizationStoreCreated(_) | Self::AuthorizationRemoved => Some("openfga"),
            Self::CertificateAvailable(_) | Self::CertificateRemoved => {
                Some(crate::literals::FRONTEND_CERTIFICATES_RELATION)
            }
            Self::IngressJoined { kind } | Self::IngressRemoved { kind } => {
                Some(kind.relation_name())
            }
            _ => None,
        }
    }
}

/// An operator-triggered action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "kebab-case")]
pub enum Action {
    /// Post an authorization model to the authorization store.
    CreateAuthorizationModel {
        /// Model as JSON text.
        #[serde(default)]
        model: Option<String>,
    },
    /// Add a group membership or a group role on a namespace.
    AddAuthRule(AuthRuleParams),
    /// Remove a group membership or a group role on a namespace.
    RemoveAuthRule(AuthRuleParams),
    /// Check a membership or a role.
    CheckAuthRule(AuthRuleParams),
    /// List the rules of a user, group or namespace.
    ListAuthRule(AuthRuleParams),
    /// List the groups declared as system administrators.
    ListSystemAdmins,
}

impl Action {
    /// Short name used in logs and reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::CreateAuthorizationModel { .. } => "create-authorization-model",
            Self::AddAuthRule(_) => "add-auth-rule",
            Self::RemoveAuthRule(_) => "remove-auth-rule",
            Self::CheckAuthRule(_) => "check-auth-rule",
            Self::ListAuthRule(_) => "list-auth-rule",
            Self::ListSystemAdmins => "list-system-admins",
        }
    }
}

/// Result of handling one event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    /// The plan was applied.
    Applied {
        /// Whether the running plan was replaced.
        change: PlanChange,
    },
    /// Validation failed; nothing was applied.
    Blocked {
        /// The blocking reason.
        reason: String,
    },
    /// A dependency was not ready; the event must be delivered again later.
    Retry {
        /// Why the event was deferred.
        reason: String,
    },
    /// Nothing to do.
    Idle,
}

impl Outcome {
    pub(crate) fn retry(reason: impl Into<String>) -> Self {
        Self::Retry {
            reason: reason.into(),
        }
    }

    /// Whether the event must be redelivered.
    pub fn is_retry(&self) -> bool {
        matches!(self, Self::Retry { .. })
    }
}

/// Result of an action, reported to whoever triggered it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ActionOutcome {
    /// The action succeeded.
    Completed {
        /// Action output.
        output: BTreeMap<String, serde_json::Value>,
        /// Result of the reconciliation that followed, for actions that change state.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reconcile: Option<Outcome>,
    },
    /// The action failed.
    Failed {
        /// Failure message.
        message: String,
    },
}

/// Data this application publishes to its integrations.
///
/// Application-level data is published only by the leader. Every replica
/// running the frontend requests its own certificate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishedData {
    /// Frontend certificate request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub certificate_request: Option<CertificateRequest>,
    /// Database connections for the schema owner.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub admin: Option<BTreeMap<String, String>>,
    /// Server status for the UI.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ui: Option<BTreeMap<String, String>>,
    /// Route requested from nginx-route.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nginx_route: Option<BTreeMap<String, String>>,
}
