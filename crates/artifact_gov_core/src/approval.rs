//! Multi-role approval matrix.
//!
//! Each required role holds at most one standing decision; a later decision by
//! the same role replaces the earlier one. A single rejection vetoes the set.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::audit::{AuditLogger, AuditRecord};
use crate::changesets::{
    bump, load_reviewed_versions, publish_moves, stage_cancel_approval_tasks, stage_version_move,
};
use crate::error::GovernanceError;
use crate::events::{DomainEvent, EventEnvelope, SharedEventSink};
use crate::ports::{expect_revision, load_change_set, Result, SharedStore, WriteBatch, WriteOp};
use crate::principal::Principal;
use crate::roles::{can_act_as, resolve_role};
use crate::telemetry;
use crate::types::*;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApproveRequest {
    pub role: Role,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RejectRequest {
    pub role: Role,
    pub notes: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalOutcome {
    pub all_approved: bool,
    pub pending_count: usize,
    pub pending_roles: Vec<Role>,
}

pub struct ApprovalEngine {
    store: SharedStore,
    audit: AuditLogger,
    events: SharedEventSink,
}

impl ApprovalEngine {
    pub fn new(store: SharedStore, events: SharedEventSink) -> Self {
        Self {
            audit: AuditLogger::new(store.clone()),
            store,
            events,
        }
    }

    pub async fn approve_change_set(
        &self,
        principal: &Principal,
        org_id: &str,
        change_set_id: Uuid,
        req: ApproveRequest,
    ) -> Result<ApprovalOutcome> {
        let effective = self.reviewer_role(principal, org_id, req.role).await?;
        let cs = load_change_set(&*self.store, org_id, change_set_id).await?;
        if cs.status != ChangeSetStatus::ReadyForReview {
            return Err(GovernanceError::InvalidState(format!(
                "change set is {}; approvals are only accepted in review",
                cs.status
            )));
        }
        if !cs.required_roles.contains(&req.role) {
            return Err(GovernanceError::InvalidArgument(format!(
                "{} approval is not required for this change set",
                req.role
            )));
        }

        let now = Utc::now();
        let mut next = bump(&cs);
        next.record_decision(Approval {
            role: req.role,
            user_id: principal.user_id.clone(),
            decision: ApprovalDecision::Approved,
            notes: req.notes.clone(),
            timestamp: now,
        });
        let all_approved = next.all_approved();
        let pending_roles = next.pending_roles();

        let mut batch = WriteBatch::new();
        batch.require(expect_revision(&cs));

        let tasks = self.store.list_tasks(org_id, change_set_id).await?;
        for task in tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Open && t.approval_role() == Some(req.role))
        {
            let mut done = task.clone();
            done.status = TaskStatus::Done;
            done.resolved_by = Some(principal.user_id.clone());
            done.resolved_at = Some(now);
            batch.push(WriteOp::PutTask(done));
        }

        let mut moves = Vec::new();
        if all_approved {
            next.status = ChangeSetStatus::Approved;
            for version in load_reviewed_versions(&*self.store, &cs).await? {
                moves.extend(stage_version_move(
                    &mut batch,
                    &version,
                    &[VersionStatus::Approved],
                    now,
                )?);
            }
        }
        batch.push(WriteOp::PutChangeSet(next.clone()));
        self.audit.stage(
            &mut batch,
            AuditRecord::new(org_id, AuditAction::ChangeSetApproved, &principal.user_id)
                .entity("change_set", change_set_id)
                .change_set(change_set_id)
                .previous(serde_json::json!({ "status": cs.status }))
                .values(serde_json::json!({
                    "role": req.role,
                    "acting_role": effective,
                    "notes": req.notes,
                    "status": next.status,
                })),
        );
        self.store.commit(batch).await?;

        telemetry::emit_approval(change_set_id, req.role, all_approved, pending_roles.len());
        if all_approved {
            telemetry::emit_change_set_transition(
                change_set_id,
                cs.status,
                ChangeSetStatus::Approved,
                &principal.user_id,
            );
            self.events.publish(EventEnvelope::new(
                org_id,
                Some(change_set_id),
                DomainEvent::ChangeSetApproved,
            ));
            publish_moves(&*self.events, org_id, change_set_id, &moves, &principal.user_id);
        }

        Ok(ApprovalOutcome {
            all_approved,
            pending_count: pending_roles.len(),
            pending_roles,
        })
    }

    /// Veto. Valid in review or after approval; notes are mandatory.
    pub async fn reject_change_set(
        &self,
        principal: &Principal,
        org_id: &str,
        change_set_id: Uuid,
        req: RejectRequest,
    ) -> Result<ChangeSet> {
        let effective = self.reviewer_role(principal, org_id, req.role).await?;
        let notes = req.notes.trim();
        if notes.is_empty() {
            return Err(GovernanceError::InvalidArgument(
                "a rejection must carry notes".into(),
            ));
        }
        let cs = load_change_set(&*self.store, org_id, change_set_id).await?;
        if !matches!(
            cs.status,
            ChangeSetStatus::ReadyForReview | ChangeSetStatus::Approved
        ) {
            return Err(GovernanceError::InvalidState(format!(
                "change set is {}; only sets in review or approved can be rejected",
                cs.status
            )));
        }
        if req.role != Role::Admin && !cs.required_roles.contains(&req.role) {
            return Err(GovernanceError::InvalidArgument(format!(
                "{} is not a reviewer of this change set",
                req.role
            )));
        }

        let now = Utc::now();
        let mut next = bump(&cs);
        next.status = ChangeSetStatus::Rejected;
        next.record_decision(Approval {
            role: req.role,
            user_id: principal.user_id.clone(),
            decision: ApprovalDecision::Rejected,
            notes: Some(notes.to_string()),
            timestamp: now,
        });

        let mut batch = WriteBatch::new();
        batch.require(expect_revision(&cs));
        let mut moves = Vec::new();
        for version in load_reviewed_versions(&*self.store, &cs).await? {
            if matches!(
                version.status,
                VersionStatus::PendingReview | VersionStatus::Approved
            ) {
                moves.extend(stage_version_move(
                    &mut batch,
                    &version,
                    &[VersionStatus::Rejected],
                    now,
                )?);
            }
        }
        let tasks = self.store.list_tasks(org_id, change_set_id).await?;
        stage_cancel_approval_tasks(&mut batch, &tasks, &principal.user_id, now);
        batch.push(WriteOp::PutChangeSet(next.clone()));
        self.audit.stage(
            &mut batch,
            AuditRecord::new(org_id, AuditAction::ChangeSetRejected, &principal.user_id)
                .entity("change_set", change_set_id)
                .change_set(change_set_id)
                .previous(serde_json::json!({ "status": cs.status }))
                .values(serde_json::json!({
                    "role": req.role,
                    "acting_role": effective,
                    "notes": notes,
                    "status": ChangeSetStatus::Rejected,
                })),
        );
        self.store.commit(batch).await?;

        telemetry::emit_change_set_transition(
            change_set_id,
            cs.status,
            ChangeSetStatus::Rejected,
            &principal.user_id,
        );
        self.events.publish(EventEnvelope::new(
            org_id,
            Some(change_set_id),
            DomainEvent::ChangeSetRejected {
                role: req.role,
                notes: notes.to_string(),
            },
        ));
        publish_moves(&*self.events, org_id, change_set_id, &moves, &principal.user_id);
        Ok(next)
    }

    /// Viewers never review; everyone else reviews as their own role,
    /// admins as any.
    async fn reviewer_role(&self, principal: &Principal, org_id: &str, role: Role) -> Result<Role> {
        let effective = resolve_role(&*self.store, principal, org_id, Role::Viewer).await?;
        if effective == Role::Viewer {
            return Err(GovernanceError::PermissionDenied(
                "viewers cannot review change sets".into(),
            ));
        }
        if !can_act_as(effective, role) {
            return Err(GovernanceError::PermissionDenied(format!(
                "{} holds {effective} and cannot act as {role}",
                principal.user_id
            )));
        }
        Ok(effective)
    }
}
