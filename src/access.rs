//! Access-control decision engine.
//!
//! Permission checks run in two layers:
//! - [`evaluate_access`] is the pure decision function: given a user, a
//!   resource, and a requested permission it produces an [`AccessDecision`]
//!   with no I/O.
//! - [`AccessPolicy`] is the pluggable lookup seam. One implementation per
//!   resource type (collection, repository, document) supplies
//!   [`resource_context`](AccessPolicy::resource_context); the provided
//!   `evaluate`/`validate` methods do the rest. The engine never reaches
//!   into a backing store on its own.
//!
//! Decision order: admin, then owner, then group overlap on non-private
//! resources, then denial. A non-private resource with an empty
//! `allowed_groups` set is reachable only by its owner and admins — that is
//! the configured meaning of an empty group list, not a defect.

use std::collections::BTreeSet;
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Requested mode of access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    Read,
    Write,
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read => write!(f, "read"),
            Self::Write => write!(f, "write"),
        }
    }
}

/// The requesting user, as resolved by the authentication collaborator.
///
/// Constructed per-request and never persisted here. Group order is
/// irrelevant; names are opaque, case-sensitive identifiers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserContext {
    pub user_id: String,
    pub groups: BTreeSet<String>,
    pub is_admin: bool,
}

impl UserContext {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            groups: BTreeSet::new(),
            is_admin: false,
        }
    }

    pub fn with_groups<I, S>(mut self, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.groups = groups.into_iter().map(Into::into).collect();
        self
    }

    pub fn admin(mut self) -> Self {
        self.is_admin = true;
        self
    }
}

/// The protected object, as described by its own repository.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceContext {
    pub resource_id: String,
    /// String tag such as `"collection"`, `"repository"`, `"document"`.
    pub resource_type: String,
    pub allowed_groups: BTreeSet<String>,
    pub owner_id: String,
    pub is_private: bool,
}

/// Outcome of evaluating a user's permission against a resource.
///
/// Immutable once constructed. `reason` is populated only on denial;
/// `granting_groups` only when access was granted through group overlap.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessDecision {
    pub allowed: bool,
    pub permission: Permission,
    pub reason: Option<String>,
    pub granting_groups: BTreeSet<String>,
}

impl AccessDecision {
    fn allowed(permission: Permission) -> Self {
        Self {
            allowed: true,
            permission,
            reason: None,
            granting_groups: BTreeSet::new(),
        }
    }

    fn allowed_via_groups(permission: Permission, granting_groups: BTreeSet<String>) -> Self {
        Self {
            allowed: true,
            permission,
            reason: None,
            granting_groups,
        }
    }

    fn denied(permission: Permission, reason: String) -> Self {
        Self {
            allowed: false,
            permission,
            reason: Some(reason),
            granting_groups: BTreeSet::new(),
        }
    }
}

/// Evaluate a user's permission against a resource. Pure; no I/O.
pub fn evaluate_access(
    user: &UserContext,
    resource: &ResourceContext,
    permission: Permission,
) -> AccessDecision {
    if user.is_admin {
        return AccessDecision::allowed(permission);
    }

    if resource.owner_id == user.user_id {
        return AccessDecision::allowed(permission);
    }

    if !resource.is_private {
        let overlap: BTreeSet<String> = user
            .groups
            .intersection(&resource.allowed_groups)
            .cloned()
            .collect();
        if !overlap.is_empty() {
            return AccessDecision::allowed_via_groups(permission, overlap);
        }
    }

    AccessDecision::denied(
        permission,
        format!(
            "user '{}' does not have {} access to {} '{}'",
            user.user_id, permission, resource.resource_type, resource.resource_id
        ),
    )
}

/// Pluggable per-resource-type access policy.
///
/// Implementations supply the resource lookup; `evaluate` and `validate`
/// are provided. A policy is the only way the engine sees a backing store.
#[async_trait]
pub trait AccessPolicy: Send + Sync {
    /// Resource-type tag used in not-found and denial messages.
    fn resource_type(&self) -> &str;

    /// Look up the access-control view of a resource, or `None` if the
    /// resource does not exist.
    async fn resource_context(&self, resource_id: &str) -> Result<Option<ResourceContext>>;

    /// Evaluate and return the decision.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] if the resource does not exist.
    async fn evaluate(
        &self,
        user: &UserContext,
        resource_id: &str,
        permission: Permission,
    ) -> Result<AccessDecision> {
        let resource = self
            .resource_context(resource_id)
            .await?
            .ok_or_else(|| Error::not_found(self.resource_type(), resource_id))?;
        Ok(evaluate_access(user, &resource, permission))
    }

    /// Evaluate and short-circuit: denial becomes [`Error::PermissionDenied`].
    ///
    /// For call sites that have no use for the decision beyond gating.
    async fn validate(
        &self,
        user: &UserContext,
        resource_id: &str,
        permission: Permission,
    ) -> Result<AccessDecision> {
        let decision = self.evaluate(user, resource_id, permission).await?;
        if !decision.allowed {
            let reason = decision.reason.clone().unwrap_or_else(|| {
                format!(
                    "access to {} '{}' denied",
                    self.resource_type(),
                    resource_id
                )
            });
            return Err(Error::PermissionDenied(reason));
        }
        Ok(decision)
    }
}
