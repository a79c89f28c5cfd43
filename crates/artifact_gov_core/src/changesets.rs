//! ChangeSet lifecycle: item list, draft-mutation rules, submission for
//! review, return to draft, and the task list that feeds the publish preflight.
//!
//! Every ChangeSet write carries a revision precondition, so two editors racing
//! on the same set see `Conflict` rather than losing an update.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::audit::{AuditLogger, AuditRecord};
use crate::error::GovernanceError;
use crate::events::{DomainEvent, EventEnvelope, SharedEventSink};
use crate::ports::{
    expect_revision, expect_version_status, load_change_set, DocumentStore, Precondition, Result,
    SharedStore, WriteBatch, WriteOp,
};
use crate::principal::Principal;
use crate::roles::{resolve_role, WRITE_ROLE};
use crate::telemetry;
use crate::types::*;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateChangeSet {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddChangeSetItem {
    pub entity_type: EntityType,
    pub entity_id: String,
    pub version_id: Uuid,
    pub action: ItemAction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddTask {
    pub title: String,
    #[serde(default = "default_blocking")]
    pub blocking: bool,
}

fn default_blocking() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitOutcome {
    pub success: bool,
    pub required_roles: Vec<Role>,
}

pub struct ChangeSetManager {
    store: SharedStore,
    audit: AuditLogger,
    events: SharedEventSink,
}

impl ChangeSetManager {
    pub fn new(store: SharedStore, events: SharedEventSink) -> Self {
        Self {
            audit: AuditLogger::new(store.clone()),
            store,
            events,
        }
    }

    pub async fn create_change_set(
        &self,
        principal: &Principal,
        org_id: &str,
        req: CreateChangeSet,
    ) -> Result<ChangeSet> {
        resolve_role(&*self.store, principal, org_id, WRITE_ROLE).await?;
        let name = req.name.trim();
        if name.is_empty() {
            return Err(GovernanceError::InvalidArgument("name is required".into()));
        }
        let now = Utc::now();
        let cs = ChangeSet {
            change_set_id: Uuid::new_v4(),
            org_id: org_id.to_string(),
            owner_user_id: principal.user_id.clone(),
            name: name.to_string(),
            description: req.description,
            status: ChangeSetStatus::Draft,
            items: Vec::new(),
            approvals: Vec::new(),
            required_roles: Vec::new(),
            revision: 1,
            created_at: now,
            updated_at: now,
            submitted_at: None,
            published_at: None,
            published_by: None,
        };

        let mut batch = WriteBatch::new();
        batch
            .require(Precondition::ChangeSetRevision {
                org_id: org_id.to_string(),
                change_set_id: cs.change_set_id,
                expected: 0,
            })
            .push(WriteOp::PutChangeSet(cs.clone()));
        self.audit.stage(
            &mut batch,
            AuditRecord::new(org_id, AuditAction::ChangeSetCreated, &principal.user_id)
                .entity("change_set", cs.change_set_id)
                .change_set(cs.change_set_id)
                .values(serde_json::json!({ "name": cs.name })),
        );
        self.store.commit(batch).await?;
        Ok(cs)
    }

    pub async fn get_change_set(
        &self,
        principal: &Principal,
        org_id: &str,
        change_set_id: Uuid,
    ) -> Result<ChangeSet> {
        resolve_role(&*self.store, principal, org_id, Role::Viewer).await?;
        load_change_set(&*self.store, org_id, change_set_id).await
    }

    pub async fn list_change_sets(
        &self,
        principal: &Principal,
        org_id: &str,
        status: Option<ChangeSetStatus>,
    ) -> Result<Vec<ChangeSet>> {
        resolve_role(&*self.store, principal, org_id, Role::Viewer).await?;
        self.store.list_change_sets(org_id, status).await
    }

    // ── Draft item list ───────────────────────────────────────

    pub async fn add_change_set_item(
        &self,
        principal: &Principal,
        org_id: &str,
        change_set_id: Uuid,
        req: AddChangeSetItem,
    ) -> Result<ChangeSetItem> {
        let role = resolve_role(&*self.store, principal, org_id, Role::Viewer).await?;
        let cs = load_change_set(&*self.store, org_id, change_set_id).await?;
        ensure_draft_editor(&cs, principal, role)?;

        let version = self
            .store
            .get_version(org_id, req.version_id)
            .await?
            .ok_or_else(|| {
                GovernanceError::InvalidArgument(format!(
                    "version {} does not exist in this organization",
                    req.version_id
                ))
            })?;
        if !version.belongs_to(req.entity_type, &req.entity_id) {
            return Err(GovernanceError::InvalidArgument(format!(
                "version {} does not belong to {}/{}",
                req.version_id, req.entity_type, req.entity_id
            )));
        }
        if req.action.is_reviewed() && version.status != VersionStatus::Draft {
            return Err(GovernanceError::InvalidState(format!(
                "version {} is {}; only drafts can be added for {}",
                req.version_id,
                version.status,
                req.action.as_str()
            )));
        }
        if cs
            .items
            .iter()
            .any(|i| i.entity_type == req.entity_type && i.entity_id == req.entity_id)
        {
            return Err(GovernanceError::InvalidArgument(format!(
                "{}/{} is already in this change set",
                req.entity_type, req.entity_id
            )));
        }

        let item = ChangeSetItem {
            item_id: Uuid::new_v4(),
            entity_type: req.entity_type,
            entity_id: req.entity_id,
            version_id: req.version_id,
            action: req.action,
            added_by: principal.user_id.clone(),
            added_at: Utc::now(),
        };
        let mut next = bump(&cs);
        next.items.push(item.clone());

        let mut batch = WriteBatch::new();
        batch
            .require(expect_revision(&cs))
            .push(WriteOp::PutChangeSet(next));
        self.audit.stage(
            &mut batch,
            AuditRecord::new(org_id, AuditAction::ChangeSetItemAdded, &principal.user_id)
                .entity(item.entity_type, &item.entity_id)
                .change_set(change_set_id)
                .values(serde_json::to_value(&item).map_err(anyhow::Error::from)?),
        );
        self.store.commit(batch).await?;
        Ok(item)
    }

    /// Owner or org admin, and only while the set is a draft.
    pub async fn remove_change_set_item(
        &self,
        principal: &Principal,
        org_id: &str,
        change_set_id: Uuid,
        item_id: Uuid,
    ) -> Result<()> {
        let role = resolve_role(&*self.store, principal, org_id, Role::Viewer).await?;
        let cs = load_change_set(&*self.store, org_id, change_set_id).await?;
        ensure_draft_editor(&cs, principal, role)?;
        let item = cs
            .find_item(item_id)
            .cloned()
            .ok_or_else(|| GovernanceError::NotFound(format!("item {item_id}")))?;

        let mut next = bump(&cs);
        next.items.retain(|i| i.item_id != item_id);

        let mut batch = WriteBatch::new();
        batch
            .require(expect_revision(&cs))
            .push(WriteOp::PutChangeSet(next));
        self.audit.stage(
            &mut batch,
            AuditRecord::new(org_id, AuditAction::ChangeSetItemRemoved, &principal.user_id)
                .entity(item.entity_type, &item.entity_id)
                .change_set(change_set_id)
                .previous(serde_json::to_value(&item).map_err(anyhow::Error::from)?),
        );
        self.store.commit(batch).await
    }

    // ── Review lifecycle ──────────────────────────────────────

    /// `draft → ready_for_review`. Moves reviewed versions to
    /// `pending_review` and opens one blocking approval task per required role.
    pub async fn submit_for_review(
        &self,
        principal: &Principal,
        org_id: &str,
        change_set_id: Uuid,
    ) -> Result<SubmitOutcome> {
        let role = resolve_role(&*self.store, principal, org_id, Role::Viewer).await?;
        let cs = load_change_set(&*self.store, org_id, change_set_id).await?;
        ensure_owner_or_admin(&cs, principal, role)?;
        if cs.status != ChangeSetStatus::Draft {
            return Err(GovernanceError::InvalidState(format!(
                "change set is {}; only drafts can be submitted",
                cs.status
            )));
        }
        if cs.items.is_empty() {
            return Err(GovernanceError::InvalidState(
                "cannot submit an empty change set".into(),
            ));
        }

        let required_roles = required_roles_for(&cs.items);
        let now = Utc::now();
        let versions = load_reviewed_versions(&*self.store, &cs).await?;

        let mut batch = WriteBatch::new();
        batch.require(expect_revision(&cs));
        let mut moves = Vec::new();
        for version in &versions {
            moves.extend(stage_version_move(
                &mut batch,
                version,
                &[VersionStatus::PendingReview],
                now,
            )?);
        }

        let mut next = bump(&cs);
        next.status = ChangeSetStatus::ReadyForReview;
        next.required_roles = required_roles.clone();
        next.approvals.clear();
        next.submitted_at = Some(now);
        batch.push(WriteOp::PutChangeSet(next));

        for role in &required_roles {
            batch.push(WriteOp::PutTask(Task {
                task_id: Uuid::new_v4(),
                org_id: org_id.to_string(),
                change_set_id,
                kind: TaskKind::Approval { role: *role },
                title: format!("{role} approval"),
                blocking: true,
                status: TaskStatus::Open,
                created_by: principal.user_id.clone(),
                created_at: now,
                resolved_by: None,
                resolved_at: None,
            }));
        }
        self.audit.stage(
            &mut batch,
            AuditRecord::new(org_id, AuditAction::ChangeSetSubmitted, &principal.user_id)
                .entity("change_set", change_set_id)
                .change_set(change_set_id)
                .previous(serde_json::json!({ "status": cs.status }))
                .values(serde_json::json!({
                    "status": ChangeSetStatus::ReadyForReview,
                    "required_roles": required_roles,
                })),
        );
        self.store.commit(batch).await?;

        telemetry::emit_change_set_transition(
            change_set_id,
            cs.status,
            ChangeSetStatus::ReadyForReview,
            &principal.user_id,
        );
        self.events.publish(EventEnvelope::new(
            org_id,
            Some(change_set_id),
            DomainEvent::ChangeSetSubmitted {
                required_roles: required_roles.clone(),
            },
        ));
        publish_moves(&*self.events, org_id, change_set_id, &moves, &principal.user_id);

        Ok(SubmitOutcome {
            success: true,
            required_roles,
        })
    }

    /// `ready_for_review | rejected → draft`. Clears approvals, cancels open
    /// approval tasks, and walks versions back to `draft` along legal edges.
    pub async fn return_to_draft(
        &self,
        principal: &Principal,
        org_id: &str,
        change_set_id: Uuid,
        reason: Option<String>,
    ) -> Result<ChangeSet> {
        let role = resolve_role(&*self.store, principal, org_id, Role::Viewer).await?;
        let cs = load_change_set(&*self.store, org_id, change_set_id).await?;
        ensure_owner_or_admin(&cs, principal, role)?;
        if !matches!(
            cs.status,
            ChangeSetStatus::ReadyForReview | ChangeSetStatus::Rejected
        ) {
            return Err(GovernanceError::InvalidState(format!(
                "change set is {}; only sets in review or rejected can return to draft",
                cs.status
            )));
        }

        let now = Utc::now();
        let versions = load_reviewed_versions(&*self.store, &cs).await?;
        let mut batch = WriteBatch::new();
        batch.require(expect_revision(&cs));
        let mut moves = Vec::new();
        for version in &versions {
            let path: &[VersionStatus] = match version.status {
                VersionStatus::PendingReview => &[VersionStatus::Rejected, VersionStatus::Draft],
                VersionStatus::Rejected => &[VersionStatus::Draft],
                _ => &[],
            };
            moves.extend(stage_version_move(&mut batch, version, path, now)?);
        }
        let tasks = self.store.list_tasks(org_id, change_set_id).await?;
        stage_cancel_approval_tasks(&mut batch, &tasks, &principal.user_id, now);

        let mut next = bump(&cs);
        next.status = ChangeSetStatus::Draft;
        next.approvals.clear();
        next.required_roles.clear();
        next.submitted_at = None;
        batch.push(WriteOp::PutChangeSet(next.clone()));
        self.audit.stage(
            &mut batch,
            AuditRecord::new(org_id, AuditAction::ChangeSetReturnedToDraft, &principal.user_id)
                .entity("change_set", change_set_id)
                .change_set(change_set_id)
                .previous(serde_json::json!({ "status": cs.status, "approvals": cs.approvals }))
                .values(serde_json::json!({ "status": ChangeSetStatus::Draft, "reason": reason })),
        );
        self.store.commit(batch).await?;

        telemetry::emit_change_set_transition(change_set_id, cs.status, ChangeSetStatus::Draft, &principal.user_id);
        self.events.publish(EventEnvelope::new(
            org_id,
            Some(change_set_id),
            DomainEvent::ChangeSetReturnedToDraft { reason },
        ));
        publish_moves(&*self.events, org_id, change_set_id, &moves, &principal.user_id);
        Ok(next)
    }

    // ── Tasks ─────────────────────────────────────────────────

    pub async fn add_task(
        &self,
        principal: &Principal,
        org_id: &str,
        change_set_id: Uuid,
        req: AddTask,
    ) -> Result<Task> {
        resolve_role(&*self.store, principal, org_id, WRITE_ROLE).await?;
        let cs = load_change_set(&*self.store, org_id, change_set_id).await?;
        if cs.status.is_terminal() {
            return Err(GovernanceError::InvalidState(
                "change set is already published".into(),
            ));
        }
        if req.title.trim().is_empty() {
            return Err(GovernanceError::InvalidArgument("title is required".into()));
        }
        let task = Task {
            task_id: Uuid::new_v4(),
            org_id: org_id.to_string(),
            change_set_id,
            kind: TaskKind::Manual,
            title: req.title.trim().to_string(),
            blocking: req.blocking,
            status: TaskStatus::Open,
            created_by: principal.user_id.clone(),
            created_at: Utc::now(),
            resolved_by: None,
            resolved_at: None,
        };
        let mut batch = WriteBatch::new();
        batch.push(WriteOp::PutTask(task.clone()));
        self.audit.stage(
            &mut batch,
            AuditRecord::new(org_id, AuditAction::TaskAdded, &principal.user_id)
                .entity("task", task.task_id)
                .change_set(change_set_id)
                .values(serde_json::json!({ "title": task.title, "blocking": task.blocking })),
        );
        self.store.commit(batch).await?;
        Ok(task)
    }

    /// Close a manual task. Approval tasks close only through approvals.
    pub async fn resolve_task(
        &self,
        principal: &Principal,
        org_id: &str,
        task_id: Uuid,
    ) -> Result<Task> {
        resolve_role(&*self.store, principal, org_id, WRITE_ROLE).await?;
        let task = self
            .store
            .get_task(org_id, task_id)
            .await?
            .ok_or_else(|| GovernanceError::NotFound(format!("task {task_id}")))?;
        if task.approval_role().is_some() {
            return Err(GovernanceError::InvalidArgument(
                "approval tasks are closed by approving the change set".into(),
            ));
        }
        if task.status != TaskStatus::Open {
            return Err(GovernanceError::InvalidState(format!(
                "task {task_id} is not open"
            )));
        }
        let mut resolved = task.clone();
        resolved.status = TaskStatus::Done;
        resolved.resolved_by = Some(principal.user_id.clone());
        resolved.resolved_at = Some(Utc::now());

        let mut batch = WriteBatch::new();
        batch.push(WriteOp::PutTask(resolved.clone()));
        self.audit.stage(
            &mut batch,
            AuditRecord::new(org_id, AuditAction::TaskResolved, &principal.user_id)
                .entity("task", task_id)
                .change_set(task.change_set_id),
        );
        self.store.commit(batch).await?;
        Ok(resolved)
    }

    pub async fn list_tasks(
        &self,
        principal: &Principal,
        org_id: &str,
        change_set_id: Uuid,
    ) -> Result<Vec<Task>> {
        resolve_role(&*self.store, principal, org_id, Role::Viewer).await?;
        load_change_set(&*self.store, org_id, change_set_id).await?;
        self.store.list_tasks(org_id, change_set_id).await
    }
}

// ── Shared with approval / publish ────────────────────────────

/// Distinct approver roles for the items' entity types, in rank order.
pub fn required_roles_for(items: &[ChangeSetItem]) -> Vec<Role> {
    let mut roles: Vec<Role> = items
        .iter()
        .map(|i| i.entity_type.required_approver())
        .collect();
    roles.sort();
    roles.dedup();
    roles
}

pub(crate) fn ensure_owner_or_admin(cs: &ChangeSet, principal: &Principal, role: Role) -> Result<()> {
    if cs.is_owner(&principal.user_id) || role == Role::Admin {
        Ok(())
    } else {
        Err(GovernanceError::PermissionDenied(format!(
            "only the owner or an org admin may modify change set {}",
            cs.change_set_id
        )))
    }
}

/// Item mutation needs ownership (or admin) and a draft set.
pub(crate) fn ensure_draft_editor(cs: &ChangeSet, principal: &Principal, role: Role) -> Result<()> {
    ensure_owner_or_admin(cs, principal, role)?;
    if cs.status != ChangeSetStatus::Draft {
        return Err(GovernanceError::PermissionDenied(format!(
            "change set is {}; items can only change while draft",
            cs.status
        )));
    }
    Ok(())
}

/// Copy with the revision advanced.
pub(crate) fn bump(cs: &ChangeSet) -> ChangeSet {
    let mut next = cs.clone();
    next.revision += 1;
    next.updated_at = Utc::now();
    next
}

/// Versions of the set's create/update items.
pub(crate) async fn load_reviewed_versions(
    store: &dyn DocumentStore,
    cs: &ChangeSet,
) -> Result<Vec<Version>> {
    let mut versions = Vec::new();
    for item in cs.items.iter().filter(|i| i.action.is_reviewed()) {
        let version = store
            .get_version(&cs.org_id, item.version_id)
            .await?
            .ok_or_else(|| GovernanceError::NotFound(format!("version {}", item.version_id)))?;
        versions.push(version);
    }
    Ok(versions)
}

/// One status edge taken by a version inside a commit.
#[derive(Debug, Clone)]
pub(crate) struct VersionMove {
    pub version: Version,
    pub from: VersionStatus,
    pub to: VersionStatus,
}

/// Stage a version walking `path`, checking every edge. The write is one
/// put guarded by the version's current status.
pub(crate) fn stage_version_move(
    batch: &mut WriteBatch,
    version: &Version,
    path: &[VersionStatus],
    now: DateTime<Utc>,
) -> Result<Vec<VersionMove>> {
    let Some(last) = path.last() else {
        return Ok(Vec::new());
    };
    let mut moves = Vec::with_capacity(path.len());
    let mut from = version.status;
    for to in path {
        if !from.can_transition_to(*to) {
            return Err(GovernanceError::InvalidState(format!(
                "version {} cannot move from {from} to {to}",
                version.version_id
            )));
        }
        moves.push(VersionMove {
            version: version.clone(),
            from,
            to: *to,
        });
        from = *to;
    }
    let mut updated = version.clone();
    updated.status = *last;
    updated.updated_at = now;
    if *last == VersionStatus::Published {
        updated.published_at = Some(now);
    }
    batch
        .require(expect_version_status(version))
        .push(WriteOp::PutVersion(updated));
    Ok(moves)
}

pub(crate) fn stage_cancel_approval_tasks(
    batch: &mut WriteBatch,
    tasks: &[Task],
    user_id: &str,
    now: DateTime<Utc>,
) {
    for task in tasks
        .iter()
        .filter(|t| t.status == TaskStatus::Open && t.approval_role().is_some())
    {
        let mut cancelled = task.clone();
        cancelled.status = TaskStatus::Cancelled;
        cancelled.resolved_by = Some(user_id.to_string());
        cancelled.resolved_at = Some(now);
        batch.push(WriteOp::PutTask(cancelled));
    }
}

pub(crate) fn publish_moves(
    events: &dyn crate::events::EventSink,
    org_id: &str,
    change_set_id: Uuid,
    moves: &[VersionMove],
    user_id: &str,
) {
    for m in moves {
        telemetry::emit_version_transition(m.version.version_id, m.from, m.to, user_id);
        events.publish(EventEnvelope::new(
            org_id,
            Some(change_set_id),
            DomainEvent::VersionStatusChanged {
                version_id: m.version.version_id,
                entity_type: m.version.entity_type,
                entity_id: m.version.entity_id.clone(),
                from: m.from,
                to: m.to,
            },
        ));
    }
}
