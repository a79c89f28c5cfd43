//! Org-scoped authorization.
//!
//! [`authorize`] is the single pure decision over `(caller, membership, org,
//! minimum role)`; everything async here only loads its inputs. Every
//! component calls through this module before touching org data.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::Utc;

use crate::audit::{AuditLogger, AuditRecord};
use crate::config::GovernanceConfig;
use crate::error::GovernanceError;
use crate::ports::{DocumentStore, Precondition, Result, SharedStore, WriteBatch, WriteOp};
use crate::principal::Principal;
use crate::types::{AuditAction, Membership, Role};

/// Minimum role for creating or editing drafts and change sets.
pub const WRITE_ROLE: Role = Role::Underwriter;

/// Minimum role for publishing and cascade deletes.
pub const PUBLISH_ROLE: Role = Role::ProductManager;

/// Decide whether `principal` may act in an org at `min` or above.
/// Returns the effective role. A global admin acts as `Admin` in any
/// existing org.
pub fn authorize(
    principal: &Principal,
    membership: Option<&Membership>,
    org_exists: bool,
    min: Role,
) -> Result<Role> {
    if !org_exists {
        return Err(if principal.global_admin {
            GovernanceError::NotFound("organization".into())
        } else {
            GovernanceError::PermissionDenied(format!(
                "{} is not a member of this organization",
                principal.user_id
            ))
        });
    }
    let role = match (principal.global_admin, membership) {
        (true, _) => Role::Admin,
        (false, Some(m)) if m.user_id == principal.user_id => m.role,
        (false, _) => {
            return Err(GovernanceError::PermissionDenied(format!(
                "{} is not a member of this organization",
                principal.user_id
            )))
        }
    };
    if role.has_at_least(min) {
        Ok(role)
    } else {
        Err(GovernanceError::PermissionDenied(format!(
            "{} holds {role}, {min} or higher required",
            principal.user_id
        )))
    }
}

/// May the caller approve or reject on behalf of `role`?
pub fn can_act_as(effective: Role, role: Role) -> bool {
    effective == Role::Admin || effective == role
}

/// Load membership and org, then [`authorize`].
pub async fn resolve_role(
    store: &dyn DocumentStore,
    principal: &Principal,
    org_id: &str,
    min: Role,
) -> Result<Role> {
    let org = store.get_organization(org_id).await?;
    let membership = store.get_membership(org_id, &principal.user_id).await?;
    authorize(principal, membership.as_ref(), org.is_some(), min)
}

pub struct RoleResolver {
    store: SharedStore,
    audit: AuditLogger,
    max_attempts: u32,
    window: Duration,
    attempts: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl RoleResolver {
    pub fn new(store: SharedStore, config: &GovernanceConfig) -> Self {
        Self {
            audit: AuditLogger::new(store.clone()),
            store,
            max_attempts: config.bootstrap_max_attempts,
            window: config.bootstrap_window(),
            attempts: Mutex::new(HashMap::new()),
        }
    }

    pub async fn require_org_membership(&self, principal: &Principal, org_id: &str) -> Result<Role> {
        resolve_role(&*self.store, principal, org_id, Role::Viewer).await
    }

    pub async fn require_role(&self, principal: &Principal, org_id: &str, min: Role) -> Result<Role> {
        resolve_role(&*self.store, principal, org_id, min).await
    }

    /// Let the caller self-elevate to admin of an org that has none.
    /// Succeeds at most once per org: the store-level claim marker is taken
    /// in the same commit as the membership.
    pub async fn bootstrap_first_admin(
        &self,
        principal: &Principal,
        org_id: &str,
    ) -> Result<Membership> {
        if let Err(e) = self.note_attempt(&principal.user_id) {
            crate::telemetry::emit_bootstrap(org_id, &principal.user_id, false, "rate limited");
            return Err(e);
        }

        if self.store.get_organization(org_id).await?.is_none() {
            return Err(GovernanceError::NotFound(format!("organization {org_id}")));
        }
        let has_admin = self
            .store
            .list_memberships(org_id)
            .await?
            .iter()
            .any(|m| m.role == Role::Admin);
        if has_admin || self.store.is_bootstrap_claimed(org_id).await? {
            crate::telemetry::emit_bootstrap(org_id, &principal.user_id, false, "admin exists");
            return Err(GovernanceError::InvalidState(format!(
                "organization {org_id} already has an admin"
            )));
        }

        let previous = self.store.get_membership(org_id, &principal.user_id).await?;
        let membership = Membership {
            org_id: org_id.to_string(),
            user_id: principal.user_id.clone(),
            role: Role::Admin,
            granted_by: principal.user_id.clone(),
            granted_at: Utc::now(),
        };

        let mut batch = WriteBatch::new();
        batch
            .require(Precondition::BootstrapUnclaimed {
                org_id: org_id.to_string(),
            })
            .push(WriteOp::ClaimBootstrap {
                org_id: org_id.to_string(),
                user_id: principal.user_id.clone(),
            })
            .push(WriteOp::PutMembership(membership.clone()));
        self.audit.stage(
            &mut batch,
            AuditRecord::new(org_id, AuditAction::AdminBootstrap, &principal.user_id)
                .entity("membership", &principal.user_id)
                .previous(serde_json::json!({ "role": previous.map(|m| m.role) }))
                .values(serde_json::json!({ "role": Role::Admin })),
        );
        self.store.commit(batch).await?;

        crate::telemetry::emit_bootstrap(org_id, &principal.user_id, true, "granted");
        Ok(membership)
    }

    fn note_attempt(&self, user_id: &str) -> Result<()> {
        let now = Instant::now();
        let mut attempts = self.attempts.lock().unwrap_or_else(|e| e.into_inner());
        let seen = attempts.entry(user_id.to_string()).or_default();
        while seen
            .front()
            .is_some_and(|t| now.duration_since(*t) > self.window)
        {
            seen.pop_front();
        }
        if seen.len() >= self.max_attempts as usize {
            return Err(GovernanceError::PermissionDenied(
                "too many bootstrap attempts; try again later".into(),
            ));
        }
        seen.push_back(now);
        Ok(())
    }
}
