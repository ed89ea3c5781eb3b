// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Authorization rule actions.
//!
//! Rules are relationship tuples in the authorization store:
//!
//! | Rule | Tuple |
//! |------|-------|
//! | user in group | `user:<user>` `member` `group:<group>` |
//! | group role on namespace | `group:<group>#member` `<role>` `namespace:<ns>` |
//! | user role on namespace (check only) | `user:<user>` `<role>` `namespace:<ns>` |
//!
//! Each action accepts a fixed set of parameter combinations; anything else
//! is rejected before the service is contacted.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use temporal_operator_state::StateStore;
use tracing::info;

use super::authorization::{
    AuthorizationClient, AuthorizationError, TupleKey, recorded_authorization,
};
use crate::literals::AUTH_ROLES;

const MEMBER: &str = "member";

/// Parameters of the rule actions. Empty strings count as absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthRuleParams {
    /// User name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    /// Group name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    /// Namespace name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Namespace role.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

/// Whether a rule is written or deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleOperation {
    /// Write the tuple.
    Create,
    /// Delete the tuple.
    Delete,
}

impl RuleOperation {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Delete => "delete",
        }
    }
}

const MEMBERSHIP: &[&str] = &["user", "group"];
const GROUP_ROLE: &[&str] = &["group", "namespace", "role"];
const USER_ROLE: &[&str] = &["user", "namespace", "role"];

fn value(field: &Option<String>) -> Option<&str> {
    field.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

impl AuthRuleParams {
    fn provided(&self) -> BTreeSet<&'static str> {
        [
            ("user", &self.user),
            ("group", &self.group),
            ("namespace", &self.namespace),
            ("role", &self.role),
        ]
        .into_iter()
        .filter(|(_, field)| value(field).is_some())
        .map(|(name, _)| name)
        .collect()
    }

    /// Index of the combination the provided parameters match exactly.
    fn combination(&self, accepted: &[&[&str]]) -> Result<usize, AuthorizationError> {
        let provided = self.provided();
        accepted
            .iter()
            .position(|combo| {
                combo.len() == provided.len() && combo.iter().all(|k| provided.contains(k))
            })
            .ok_or_else(|| {
                AuthorizationError::UnsupportedParameters(
                    accepted
                        .iter()
                        .enumerate()
                        .map(|(i, combo)| format!("{}. '{}'", i + 1, combo.join(", ")))
                        .collect::<Vec<_>>()
                        .join("\n"),
                )
            })
    }

    fn get(&self, name: &str) -> &str {
        let field = match name {
            "user" => &self.user,
            "group" => &self.group,
            "namespace" => &self.namespace,
            _ => &self.role,
        };
        value(field).unwrap_or_default()
    }

    fn role(&self) -> Result<&str, AuthorizationError> {
        let role = self.get("role");
        if AUTH_ROLES.contains(&role) {
            Ok(role)
        } else {
            Err(AuthorizationError::RoleNotAllowed(role.to_string()))
        }
    }
}

fn membership(user: &str, group: &str) -> TupleKey {
    TupleKey {
        user: format!("user:{user}"),
        relation: MEMBER.to_string(),
        object: format!("group:{group}"),
    }
}

fn group_role(group: &str, role: &str, namespace: &str) -> TupleKey {
    TupleKey {
        user: format!("group:{group}#{MEMBER}"),
        relation: role.to_string(),
        object: format!("namespace:{namespace}"),
    }
}

/// Add or remove one rule. Returns a description of what was done.
pub async fn change_rule<S, C>(
    store: &S,
    client: &C,
    params: &AuthRuleParams,
    operation: RuleOperation,
) -> Result<String, AuthorizationError>
where
    S: StateStore + ?Sized,
    C: AuthorizationClient + ?Sized,
{
    let (tuple, description) = match params.combination(&[MEMBERSHIP, GROUP_ROLE])? {
        0 => {
            let (user, group) = (params.get("user"), params.get("group"));
            (
                membership(user, group),
                format!("for user '{user}' on group '{group}'"),
            )
        }
        _ => {
            let role = params.role()?;
            let (group, namespace) = (params.get("group"), params.get("namespace"));
            (
                group_role(group, role, namespace),
                format!("for group '{group}' and role '{role}' on namespace '{namespace}'"),
            )
        }
    };

    let authorization = recorded_authorization(store).await?;
    let tuples = std::slice::from_ref(&tuple);
    match operation {
        RuleOperation::Create => client.write_tuples(&authorization, tuples, &[]).await?,
        RuleOperation::Delete => client.write_tuples(&authorization, &[], tuples).await?,
    }

    let message = format!("operation type {} {description} successful", operation.as_str());
    info!(
        operation = operation.as_str(),
        user = %tuple.user,
        relation = %tuple.relation,
        object = %tuple.object,
        "Authorization rule changed"
    );
    Ok(message)
}

/// Check whether one rule holds.
pub async fn check_rule<S, C>(
    store: &S,
    client: &C,
    params: &AuthRuleParams,
) -> Result<bool, AuthorizationError>
where
    S: StateStore + ?Sized,
    C: AuthorizationClient + ?Sized,
{
    let tuple = match params.combination(&[MEMBERSHIP, USER_ROLE, GROUP_ROLE])? {
        0 => membership(params.get("user"), params.get("group")),
        1 => TupleKey {
            user: format!("user:{}", params.get("user")),
            relation: params.get("role").to_string(),
            object: format!("namespace:{}", params.get("namespace")),
        },
        _ => group_role(
            params.get("group"),
            params.get("role"),
            params.get("namespace"),
        ),
    };

    let authorization = recorded_authorization(store).await?;
    client.check(&authorization, &tuple).await
}

/// List the rules of one user, group or namespace, keyed by relation.
///
/// Users additionally get the groups they are a member of under `member`.
pub async fn list_rules<S, C>(
    store: &S,
    client: &C,
    params: &AuthRuleParams,
) -> Result<BTreeMap<String, Vec<String>>, AuthorizationError>
where
    S: StateStore + ?Sized,
    C: AuthorizationClient + ?Sized,
{
    let combination = params.combination(&[&["user"], &["group"], &["namespace"]])?;
    let authorization = recorded_authorization(store).await?;

    let mut rules: BTreeMap<String, Vec<String>> = AUTH_ROLES
        .iter()
        .map(|role| (role.to_string(), Vec::new()))
        .collect();

    match combination {
        0 => {
            let user = format!("user:{}", params.get("user"));
            let groups = client
                .list_objects(&authorization, &user, MEMBER, "group")
                .await?;
            rules.insert(MEMBER.to_string(), groups);
            for role in AUTH_ROLES {
                let namespaces = client
                    .list_objects(&authorization, &user, role, "namespace")
                    .await?;
                rules.insert(role.to_string(), namespaces);
            }
        }
        1 => {
            let group = format!("group:{}#{MEMBER}", params.get("group"));
            for role in AUTH_ROLES {
                let namespaces = client
                    .list_objects(&authorization, &group, role, "namespace")
                    .await?;
                rules.insert(role.to_string(), namespaces);
            }
        }
        _ => {
            let object = format!("namespace:{}", params.get("namespace"));
            for tuple in client.read_tuples(&authorization, &object).await? {
                let subject = tuple
                    .user
                    .split_once('#')
                    .map_or(tuple.user.as_str(), |(group, _)| group)
                    .to_string();
                rules.entry(tuple.relation).or_default().push(subject);
            }
        }
    }

    Ok(rules)
}
