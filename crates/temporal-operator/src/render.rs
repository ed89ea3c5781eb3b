// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Workload configuration files.
//!
//! Both files are rendered from templates embedded in the binary and are
//! fully overwritten on every successful reconciliation.

use minijinja::Environment;
use serde::Serialize;
use temporal_operator_state::DatabaseConnection;

use crate::declared::Role;
use crate::literals::{
    DYNAMIC_CONFIG_PATH, FRONTEND_CA_PATH, FRONTEND_CERT_PATH, FRONTEND_KEY_PATH,
};
use crate::plan::running_roles;
use crate::validator::{PoolSettings, ResolvedConfig};

const CONFIG_TEMPLATE: &str = "config.yaml";
const DYNAMIC_CONFIG_TEMPLATE: &str = "dynamicconfig.yaml";

#[derive(Serialize)]
struct Datastore<'a> {
    name: &'static str,
    database: &'a str,
    address: String,
    user: &'a str,
    password: &'a str,
    max_conns: u32,
    max_idle_conns: u32,
    max_conn_time: &'a str,
    connect_timeout_secs: u64,
}

#[derive(Serialize)]
struct Service {
    name: &'static str,
    grpc_port: u16,
    http_port: u16,
}

#[derive(Serialize)]
struct FrontendTls {
    cert_file: &'static str,
    key_file: &'static str,
    ca_file: Option<&'static str>,
}

#[derive(Serialize)]
struct Archival<'a> {
    bucket: &'a str,
    region: &'a str,
    endpoint: &'a str,
    path_style: bool,
}

#[derive(Serialize)]
struct ConfigContext<'a> {
    log_level: &'a str,
    num_shards: u32,
    datastores: Vec<Datastore<'a>>,
    sql_tls: bool,
    broadcast_address: &'a str,
    frontend_tls: Option<FrontendTls>,
    auth: bool,
    services: Vec<Service>,
    frontend_address: String,
    archival: Option<Archival<'a>>,
    dynamic_config_path: &'static str,
}

#[derive(Serialize)]
struct NamespaceOverride<'a> {
    namespace: &'a str,
    rps: u64,
}

#[derive(Serialize)]
struct DynamicContext<'a> {
    global_rps: u64,
    namespace_rps: u64,
    namespace_overrides: Vec<NamespaceOverride<'a>>,
    long_poll_expiration: &'a str,
}

/// Renders the workload configuration files.
pub struct Renderer {
    env: Environment<'static>,
}

impl Renderer {
    /// Create a renderer with the embedded templates.
    pub fn new() -> Result<Self, minijinja::Error> {
        let mut env = Environment::new();
        env.set_trim_blocks(true);
        env.set_lstrip_blocks(true);
        env.add_template(
            CONFIG_TEMPLATE,
            include_str!("../templates/config.yaml.j2"),
        )?;
        env.add_template(
            DYNAMIC_CONFIG_TEMPLATE,
            include_str!("../templates/dynamicconfig.yaml.j2"),
        )?;
        Ok(Self { env })
    }

    /// Render the main server configuration.
    pub fn render_config(&self, resolved: &ResolvedConfig) -> Result<String, minijinja::Error> {
        let context = ConfigContext {
            log_level: &resolved.log_level,
            num_shards: resolved.num_shards,
            datastores: vec![
                datastore("default", &resolved.primary, &resolved.primary_pool),
                datastore("visibility", &resolved.visibility, &resolved.visibility_pool),
            ],
            sql_tls: resolved.sql_tls_enabled,
            broadcast_address: &resolved.broadcast_address,
            frontend_tls: resolved
                .frontend_tls
                .as_ref()
                .filter(|_| resolved.runs_frontend())
                .map(|material| FrontendTls {
                    cert_file: FRONTEND_CERT_PATH,
                    key_file: FRONTEND_KEY_PATH,
                    ca_file: material.ca.as_ref().map(|_| FRONTEND_CA_PATH),
                }),
            auth: resolved.auth.is_some(),
            services: running_roles(&resolved.roles)
                .into_iter()
                .map(|role| Service {
                    name: role.as_str(),
                    grpc_port: role.grpc_port(),
                    http_port: role.http_port(),
                })
                .collect(),
            frontend_address: format!("{}:{}", resolved.app_name, Role::Frontend.grpc_port()),
            archival: resolved.archival.as_ref().map(|storage| Archival {
                bucket: &storage.bucket,
                region: &storage.region,
                endpoint: &storage.endpoint,
                path_style: storage.uri_style == "path",
            }),
            dynamic_config_path: DYNAMIC_CONFIG_PATH,
        };

        self.env.get_template(CONFIG_TEMPLATE)?.render(context)
    }

    /// Render the dynamic rate-limit configuration.
    pub fn render_dynamic_config(
        &self,
        resolved: &ResolvedConfig,
    ) -> Result<String, minijinja::Error> {
        let limits = &resolved.rate_limits;
        let context = DynamicContext {
            global_rps: limits.global_rps,
            namespace_rps: limits.namespace_rps,
            namespace_overrides: limits
                .namespace_overrides
                .iter()
                .map(|(namespace, rps)| NamespaceOverride {
                    namespace,
                    rps: *rps,
                })
                .collect(),
            long_poll_expiration: &limits.long_poll_expiration,
        };

        self.env
            .get_template(DYNAMIC_CONFIG_TEMPLATE)?
            .render(context)
    }
}

fn datastore<'a>(
    name: &'static str,
    conn: &'a DatabaseConnection,
    pool: &'a PoolSettings,
) -> Datastore<'a> {
    Datastore {
        name,
        database: &conn.name,
        address: format!("{}:{}", conn.host, conn.port),
        user: &conn.user,
        password: &conn.password,
        max_conns: pool.max_conns,
        max_idle_conns: pool.max_idle_conns,
        max_conn_time: &pool.max_conn_time,
        connect_timeout_secs: pool.connect_timeout_secs,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::UnitContext;
    use crate::declared::DeclaredConfig;
    use crate::validator::validate;
    use temporal_operator_state::{
        AggregatedState, CertificateMaterial, DatabaseRole, ObjectStorage,
    };

    fn state() -> AggregatedState {
        let mut state = AggregatedState::default();
        for role in DatabaseRole::ALL {
            state.set_database(
                role,
                Some(DatabaseConnection {
                    name: format!("temporal-k8s_{}", role.relation_name()),
                    host: "myhost".to_string(),
                    port: 5432,
                    user: "jean-luc".to_string(),
                    password: "inner\"light".to_string(),
                    tls_enabled: false,
                }),
            );
        }
        state.schema_ready = true;
        state
    }

    fn resolve(declared: DeclaredConfig, state: &AggregatedState) -> ResolvedConfig {
        validate(
            &declared,
            Some(state),
            &UnitContext::new("temporal-k8s", "10.1.2.3"),
        )
        .unwrap()
    }

    fn declared() -> DeclaredConfig {
        DeclaredConfig {
            num_history_shards: Some(4),
            ..DeclaredConfig::default()
        }
    }

    #[test]
    fn test_connect_timeout_in_seconds() {
        let mut config = declared();
        config.visibility_connect_timeout = "5m".to_string();
        let renderer = Renderer::new().unwrap();
        let rendered = renderer.render_config(&resolve(config, &state())).unwrap();

        assert!(rendered.contains("connect_timeout: \"10\""));
        assert!(rendered.contains("connect_timeout: \"300\""));
    }

    #[test]
    fn test_render_config() {
        let renderer = Renderer::new().unwrap();
        let config = renderer.render_config(&resolve(declared(), &state())).unwrap();

        assert!(config.contains("numHistoryShards: 4"));
        assert!(config.contains("databaseName: \"temporal-k8s_db\""));
        assert!(config.contains("databaseName: \"temporal-k8s_visibility\""));
        assert!(config.contains("connectAddr: \"myhost:5432\""));
        assert!(config.contains("password: \"inner\\\"light\""));
        assert!(config.contains("connect_timeout: \"10\""));
        assert!(config.contains("broadcastAddress: \"10.1.2.3\""));
        assert!(config.contains("  internal-frontend:\n"));
        assert!(config.contains("grpcPort: 7236"));
        assert!(config.contains("rpcAddress: \"temporal-k8s:7233\""));
        assert!(!config.contains("archival:"));
        assert!(!config.contains("authorization:"));
        assert!(!config.contains("certFile"));
    }

    #[test]
    fn test_render_config_optional_sections() {
        let mut state = state();
        state.object_storage = Some(ObjectStorage {
            bucket: "archive".to_string(),
            endpoint: "https://s3.eu-west-1.amazonaws.com".to_string(),
            region: "eu-west-1".to_string(),
            access_key: "access".to_string(),
            secret_key: "secret".to_string(),
            uri_style: "path".to_string(),
            bucket_provisioned: true,
        });
        state.certificate_material = Some(CertificateMaterial {
            certificate: "cert".to_string(),
            private_key: "key".to_string(),
            ca: Some("ca".to_string()),
        });

        let renderer = Renderer::new().unwrap();
        let config = renderer.render_config(&resolve(declared(), &state)).unwrap();

        assert!(config.contains("s3ForcePathStyle: true"));
        assert!(config.contains("URI: \"s3://archive/temporal-archival/history\""));
        assert!(config.contains("certFile: \"/etc/temporal/tls/frontend.crt\""));
        assert!(config.contains("- \"/etc/temporal/tls/ca.pem\""));
    }

    #[test]
    fn test_render_dynamic_config() {
        let mut config = declared();
        config.global_rps_limit = 500;
        config.namespace_rps_overrides = "payments:100,default:50".to_string();

        let renderer = Renderer::new().unwrap();
        let dynamic = renderer
            .render_dynamic_config(&resolve(config, &state()))
            .unwrap();

        assert!(dynamic.contains("frontend.rps:\n  - value: 500"));
        assert!(dynamic.contains("frontend.namespaceRPS:\n  - value: 2400"));
        // Overrides are sorted by namespace.
        let default_at = dynamic.find("namespace: \"default\"").unwrap();
        let payments_at = dynamic.find("namespace: \"payments\"").unwrap();
        assert!(default_at < payments_at);
        assert!(dynamic.contains("- value: \"60s\""));
    }

    #[test]
    fn test_unlimited_global_rps_is_omitted() {
        let renderer = Renderer::new().unwrap();
        let dynamic = renderer
            .render_dynamic_config(&resolve(declared(), &state()))
            .unwrap();
        assert!(!dynamic.contains("frontend.rps:"));
    }

    #[test]
    fn test_rendering_is_deterministic() {
        let renderer = Renderer::new().unwrap();
        let resolved = resolve(declared(), &state());
        assert_eq!(
            renderer.render_config(&resolved).unwrap(),
            renderer.render_config(&resolved).unwrap()
        );
    }
}
