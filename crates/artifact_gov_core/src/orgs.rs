//! Organizations and their member rosters.

use chrono::Utc;

use crate::audit::{AuditLogger, AuditRecord};
use crate::error::GovernanceError;
use crate::ports::{Result, SharedStore, WriteBatch, WriteOp};
use crate::principal::Principal;
use crate::roles::resolve_role;
use crate::telemetry;
use crate::types::{AuditAction, Membership, Organization, Role};

pub struct OrganizationService {
    store: SharedStore,
    audit: AuditLogger,
}

impl OrganizationService {
    pub fn new(store: SharedStore) -> Self {
        Self {
            audit: AuditLogger::new(store.clone()),
            store,
        }
    }

    /// Global admins only. The creator becomes the org's first admin.
    pub async fn create_organization(
        &self,
        principal: &Principal,
        org_id: &str,
        name: &str,
    ) -> Result<Organization> {
        principal.require_global_admin()?;
        if org_id.trim().is_empty() || org_id.contains('/') {
            return Err(GovernanceError::InvalidArgument(
                "org_id must be non-empty and contain no '/'".into(),
            ));
        }
        if name.trim().is_empty() {
            return Err(GovernanceError::InvalidArgument("name is required".into()));
        }
        if self.store.get_organization(org_id).await?.is_some() {
            return Err(GovernanceError::InvalidState(format!(
                "organization {org_id} already exists"
            )));
        }

        let now = Utc::now();
        let org = Organization {
            org_id: org_id.to_string(),
            name: name.trim().to_string(),
            created_by: principal.user_id.clone(),
            created_at: now,
        };
        let membership = Membership {
            org_id: org_id.to_string(),
            user_id: principal.user_id.clone(),
            role: Role::Admin,
            granted_by: principal.user_id.clone(),
            granted_at: now,
        };

        let mut batch = WriteBatch::new();
        batch
            .push(WriteOp::PutOrganization(org.clone()))
            .push(WriteOp::PutMembership(membership));
        self.audit.stage(
            &mut batch,
            AuditRecord::new(org_id, AuditAction::OrganizationCreated, &principal.user_id)
                .entity("organization", org_id)
                .values(serde_json::json!({ "name": org.name })),
        );
        self.store.commit(batch).await?;
        telemetry::emit_role_change(org_id, &principal.user_id, Some(Role::Admin), &principal.user_id);
        Ok(org)
    }

    pub async fn get_organization(&self, principal: &Principal, org_id: &str) -> Result<Organization> {
        resolve_role(&*self.store, principal, org_id, Role::Viewer).await?;
        self.store
            .get_organization(org_id)
            .await?
            .ok_or_else(|| GovernanceError::NotFound(format!("organization {org_id}")))
    }

    pub async fn list_members(&self, principal: &Principal, org_id: &str) -> Result<Vec<Membership>> {
        resolve_role(&*self.store, principal, org_id, Role::Viewer).await?;
        self.store.list_memberships(org_id).await
    }

    pub async fn my_role(&self, principal: &Principal, org_id: &str) -> Result<Role> {
        resolve_role(&*self.store, principal, org_id, Role::Viewer).await
    }

    /// Grant or change a member's role. Org admins only.
    pub async fn set_member_role(
        &self,
        principal: &Principal,
        org_id: &str,
        user_id: &str,
        role: Role,
    ) -> Result<Membership> {
        resolve_role(&*self.store, principal, org_id, Role::Admin).await?;
        if user_id.trim().is_empty() {
            return Err(GovernanceError::InvalidArgument("user_id is required".into()));
        }
        let previous = self.store.get_membership(org_id, user_id).await?;
        if previous.as_ref().is_some_and(|m| m.role == Role::Admin) && role != Role::Admin {
            self.ensure_other_admin(org_id, user_id).await?;
        }

        let membership = Membership {
            org_id: org_id.to_string(),
            user_id: user_id.to_string(),
            role,
            granted_by: principal.user_id.clone(),
            granted_at: Utc::now(),
        };
        let mut batch = WriteBatch::new();
        batch.push(WriteOp::PutMembership(membership.clone()));
        self.audit.stage(
            &mut batch,
            AuditRecord::new(org_id, AuditAction::MemberRoleSet, &principal.user_id)
                .entity("membership", user_id)
                .previous(serde_json::json!({ "role": previous.map(|m| m.role) }))
                .values(serde_json::json!({ "role": role })),
        );
        self.store.commit(batch).await?;
        telemetry::emit_role_change(org_id, user_id, Some(role), &principal.user_id);
        Ok(membership)
    }

    /// Remove a member. The last admin cannot be removed.
    pub async fn remove_member(&self, principal: &Principal, org_id: &str, user_id: &str) -> Result<()> {
        resolve_role(&*self.store, principal, org_id, Role::Admin).await?;
        let existing = self
            .store
            .get_membership(org_id, user_id)
            .await?
            .ok_or_else(|| GovernanceError::NotFound(format!("member {user_id}")))?;
        if existing.role == Role::Admin {
            self.ensure_other_admin(org_id, user_id).await?;
        }

        let mut batch = WriteBatch::new();
        batch.push(WriteOp::DeleteMembership {
            org_id: org_id.to_string(),
            user_id: user_id.to_string(),
        });
        self.audit.stage(
            &mut batch,
            AuditRecord::new(org_id, AuditAction::MemberRemoved, &principal.user_id)
                .entity("membership", user_id)
                .previous(serde_json::json!({ "role": existing.role })),
        );
        self.store.commit(batch).await?;
        telemetry::emit_role_change(org_id, user_id, None, &principal.user_id);
        Ok(())
    }

    async fn ensure_other_admin(&self, org_id: &str, leaving: &str) -> Result<()> {
        let others = self
            .store
            .list_memberships(org_id)
            .await?
            .into_iter()
            .filter(|m| m.role == Role::Admin && m.user_id != leaving)
            .count();
        if others == 0 {
            return Err(GovernanceError::InvalidState(
                "cannot remove or demote the last admin".into(),
            ));
        }
        Ok(())
    }
}
