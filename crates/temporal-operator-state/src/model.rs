// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Aggregated configuration state.
//!
//! Each top-level field is a fragment owned by exactly one integration
//! adapter. Adapters replace their own fragment and never touch the others.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

/// Logical role of a related database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatabaseRole {
    /// Main persistence store.
    Primary,
    /// Search/visibility store.
    Visibility,
}

impl DatabaseRole {
    /// Both roles, in the order they are validated.
    pub const ALL: [DatabaseRole; 2] = [DatabaseRole::Primary, DatabaseRole::Visibility];

    /// Name of the integration that delivers this database.
    pub fn relation_name(&self) -> &'static str {
        match self {
            DatabaseRole::Primary => "db",
            DatabaseRole::Visibility => "visibility",
        }
    }

    /// Resolve a role from its integration name.
    pub fn from_relation_name(name: &str) -> Option<Self> {
        match name {
            "db" => Some(DatabaseRole::Primary),
            "visibility" => Some(DatabaseRole::Visibility),
            _ => None,
        }
    }
}

impl fmt::Display for DatabaseRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.relation_name())
    }
}

/// Connection details for one database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseConnection {
    /// Database name. Fixed once recorded.
    pub name: String,
    /// Host of the first advertised endpoint.
    pub host: String,
    /// Port of the first advertised endpoint.
    pub port: u16,
    /// Login user.
    pub user: String,
    /// Login password.
    pub password: String,
    /// Whether connections must use TLS.
    #[serde(default)]
    pub tls_enabled: bool,
}

/// Object storage credentials for archival.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectStorage {
    /// Bucket name.
    pub bucket: String,
    /// Service endpoint.
    pub endpoint: String,
    /// Bucket region (may be empty).
    #[serde(default)]
    pub region: String,
    /// Access key id.
    pub access_key: String,
    /// Secret access key.
    pub secret_key: String,
    /// `host` or `path` addressing.
    pub uri_style: String,
    /// Whether the bucket was found or created.
    #[serde(default)]
    pub bucket_provisioned: bool,
}

/// Authorization service (OpenFGA store) credentials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Authorization {
    /// Store identifier.
    pub store_id: String,
    /// API bearer token.
    pub token: String,
    /// API host.
    pub address: String,
    /// API port.
    pub port: String,
    /// `http` or `https`.
    pub scheme: String,
    /// Authorization model, set only after the model was created.
    #[serde(default)]
    pub auth_model_id: Option<String>,
}

impl Authorization {
    /// Base URL of the authorization API.
    pub fn api_url(&self) -> String {
        format!("{}://{}:{}", self.scheme, self.address, self.port)
    }
}

/// TLS material for the externally-facing frontend endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateMaterial {
    /// PEM certificate.
    pub certificate: String,
    /// PEM private key.
    pub private_key: String,
    /// PEM CA certificate, if the issuer provided one.
    #[serde(default)]
    pub ca: Option<String>,
}

/// Ingress integrations that may expose the frontend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IngressKind {
    /// nginx-route integration.
    NginxRoute,
    /// Generic (traefik) ingress integration.
    Ingress,
}

impl IngressKind {
    /// Integration name.
    pub fn relation_name(&self) -> &'static str {
        match self {
            IngressKind::NginxRoute => "nginx-route",
            IngressKind::Ingress => "ingress",
        }
    }
}

/// The aggregated configuration state shared by all replicas.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregatedState {
    /// Connection per database role; `None` until the database is ready.
    pub database_connections: BTreeMap<DatabaseRole, Option<DatabaseConnection>>,
    /// Set by the schema owner once the schema exists.
    pub schema_ready: bool,
    /// History shard count, fixed at first successful validation.
    pub num_shards: Option<u32>,
    /// Archival object storage, absent without the integration.
    pub object_storage: Option<ObjectStorage>,
    /// Authorization service, absent without the integration.
    pub authorization: Option<Authorization>,
    /// Frontend TLS material, absent without the integration.
    pub certificate_material: Option<CertificateMaterial>,
    /// Joined ingress integrations.
    pub ingress: BTreeSet<IngressKind>,
}

impl Default for AggregatedState {
    fn default() -> Self {
        Self {
            database_connections: DatabaseRole::ALL.into_iter().map(|r| (r, None)).collect(),
            schema_ready: false,
            num_shards: None,
            object_storage: None,
            authorization: None,
            certificate_material: None,
            ingress: BTreeSet::new(),
        }
    }
}

impl AggregatedState {
    /// Connection for a role, if recorded.
    pub fn database(&self, role: DatabaseRole) -> Option<&DatabaseConnection> {
        self.database_connections.get(&role).and_then(Option::as_ref)
    }

    /// Replace the connection for a role.
    pub fn set_database(&mut self, role: DatabaseRole, connection: Option<DatabaseConnection>) {
        self.database_connections.insert(role, connection);
    }
}
