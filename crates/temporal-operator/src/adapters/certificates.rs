// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Frontend certificates integration.
//!
//! The certificate material is kept in shared state so every replica can
//! serve it; each replica mirrors it into its own workload files.

use serde::{Deserialize, Serialize};
use temporal_operator_state::{CertificateMaterial, LeaderToken, StateStore, update_state};
use tracing::{debug, info};

use super::AdapterOutcome;
use crate::declared::DeclaredConfig;
use crate::literals::{FRONTEND_CA_PATH, FRONTEND_CERT_PATH, FRONTEND_KEY_PATH};
use crate::supervisor::{self, ProcessSupervisor};

/// Subject of the certificate this application requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateRequest {
    /// Common name.
    pub common_name: String,
    /// Subject alternative names.
    pub sans: Vec<String>,
    /// Organization, if configured.
    pub organization: Option<String>,
    /// Country, if configured.
    pub country: Option<String>,
}

/// Certificate request for the frontend endpoint.
pub fn certificate_request(declared: &DeclaredConfig, app_name: &str) -> CertificateRequest {
    let common_name = declared.external_hostname_or(app_name).to_string();
    let mut sans = vec![common_name.clone()];
    if common_name != app_name {
        sans.push(app_name.to_string());
    }

    let non_empty = |v: &str| (!v.is_empty()).then(|| v.to_string());
    CertificateRequest {
        common_name,
        sans,
        organization: non_empty(&declared.frontend_cert_organization),
        country: non_empty(&declared.frontend_cert_country),
    }
}

/// Record newly issued certificate material.
pub async fn apply_certificate<S: StateStore + ?Sized>(
    store: &S,
    token: &LeaderToken,
    material: &CertificateMaterial,
) -> temporal_operator_state::Result<AdapterOutcome> {
    if material.certificate.is_empty() || material.private_key.is_empty() {
        return Ok(AdapterOutcome::Incomplete(
            "frontend-certificates: missing certificate or private key".to_string(),
        ));
    }

    update_state(store, token, |state| {
        state.certificate_material = Some(material.clone());
    })
    .await?;
    info!("Frontend certificate recorded");
    Ok(AdapterOutcome::Applied)
}

/// Clear the certificate material.
pub async fn remove<S: StateStore + ?Sized>(
    store: &S,
    token: &LeaderToken,
) -> temporal_operator_state::Result<AdapterOutcome> {
    update_state(store, token, |state| state.certificate_material = None).await?;
    info!("Frontend certificate removed");
    Ok(AdapterOutcome::Applied)
}

/// Mirror `material` into the workload's TLS files.
///
/// Files are written only when their content differs and deleted when the
/// material is gone. Returns whether anything changed.
pub async fn sync_files<P: ProcessSupervisor + ?Sized>(
    supervisor: &P,
    material: Option<&CertificateMaterial>,
) -> supervisor::Result<bool> {
    let desired: [(&str, Option<&str>); 3] = match material {
        Some(m) => [
            (FRONTEND_CERT_PATH, Some(m.certificate.as_str())),
            (FRONTEND_KEY_PATH, Some(m.private_key.as_str())),
            (FRONTEND_CA_PATH, m.ca.as_deref()),
        ],
        None => [
            (FRONTEND_CERT_PATH, None),
            (FRONTEND_KEY_PATH, None),
            (FRONTEND_CA_PATH, None),
        ],
    };

    let mut changed = false;
    for (path, content) in desired {
        match content {
            Some(content) => {
                let current = supervisor.read_file(path).await?;
                if current.as_deref() != Some(content.as_bytes()) {
                    supervisor.write_file(path, content.as_bytes()).await?;
                    debug!(path, "TLS file updated");
                    changed = true;
                }
            }
            None => {
                if supervisor.file_exists(path).await? {
                    supervisor.delete_file(path).await?;
                    debug!(path, "TLS file removed");
                    changed = true;
                }
            }
        }
    }

    Ok(changed)
}
