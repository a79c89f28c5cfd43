//! Versioned entities: draft creation, cloning, edits, status transitions,
//! comparison and listing.
//!
//! Version numbers come from a per-entity counter advanced by
//! compare-and-swap inside the same commit that writes the version, so two
//! concurrent creates can never share a number and a number is never reused.

pub mod diff;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::audit::{AuditLogger, AuditRecord};
use crate::config::GovernanceConfig;
use crate::error::GovernanceError;
use crate::events::{DomainEvent, EventEnvelope, SharedEventSink};
use crate::ports::{
    expect_version_status, load_version, Precondition, Result, SharedStore, WriteBatch, WriteOp,
};
use crate::principal::Principal;
use crate::publish::plan_live_write;
use crate::roles::{can_act_as, resolve_role, WRITE_ROLE};
use crate::telemetry;
use crate::types::*;

pub use diff::{diff_snapshots, ChangeKind, FieldChange, VersionDiff};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateDraftVersion {
    pub entity_type: EntityType,
    pub entity_id: String,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
    #[serde(default)]
    pub summary: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloneVersion {
    pub entity_type: EntityType,
    pub entity_id: String,
    pub source_version_id: Uuid,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateDraftVersion {
    #[serde(default)]
    pub data: Option<serde_json::Value>,
    #[serde(default)]
    pub summary: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub version_id: Uuid,
    pub previous_status: VersionStatus,
    pub new_status: VersionStatus,
}

pub struct VersionService {
    store: SharedStore,
    audit: AuditLogger,
    events: SharedEventSink,
    max_retries: u32,
}

impl VersionService {
    pub fn new(store: SharedStore, events: SharedEventSink, config: &GovernanceConfig) -> Self {
        Self {
            audit: AuditLogger::new(store.clone()),
            store,
            events,
            max_retries: config.version_counter_max_retries,
        }
    }

    // ── Writes ────────────────────────────────────────────────

    pub async fn create_draft_version(
        &self,
        principal: &Principal,
        org_id: &str,
        req: CreateDraftVersion,
    ) -> Result<Version> {
        resolve_role(&*self.store, principal, org_id, WRITE_ROLE).await?;
        validate_entity_id(&req.entity_id)?;
        let parent_id = validate_parent(req.entity_type, req.parent_id)?;

        let draft = NewVersion {
            entity_type: req.entity_type,
            entity_id: req.entity_id,
            parent_id,
            data: req.data.unwrap_or_else(|| serde_json::json!({})),
            summary: req.summary,
            parent_version_id: None,
        };
        self.allocate(principal, org_id, draft, AuditAction::VersionCreated)
            .await
    }

    /// New draft carrying the source's data, linked via `parent_version_id`.
    pub async fn clone_version(
        &self,
        principal: &Principal,
        org_id: &str,
        req: CloneVersion,
    ) -> Result<Version> {
        resolve_role(&*self.store, principal, org_id, WRITE_ROLE).await?;
        validate_entity_id(&req.entity_id)?;
        let source = load_version(&*self.store, org_id, req.source_version_id).await?;
        if source.entity_type != req.entity_type {
            return Err(GovernanceError::InvalidArgument(format!(
                "source version is a {}, not a {}",
                source.entity_type, req.entity_type
            )));
        }
        let parent_id = validate_parent(req.entity_type, req.parent_id.or(source.parent_id.clone()))?;

        let draft = NewVersion {
            entity_type: req.entity_type,
            entity_id: req.entity_id,
            parent_id,
            data: source.data.clone(),
            summary: req.summary.or(source.summary.clone()),
            parent_version_id: Some(source.version_id),
        };
        self.allocate(principal, org_id, draft, AuditAction::VersionCloned)
            .await
    }

    pub async fn update_draft_version(
        &self,
        principal: &Principal,
        org_id: &str,
        version_id: Uuid,
        req: UpdateDraftVersion,
    ) -> Result<Version> {
        resolve_role(&*self.store, principal, org_id, WRITE_ROLE).await?;
        let current = load_version(&*self.store, org_id, version_id).await?;
        if current.status != VersionStatus::Draft {
            return Err(GovernanceError::InvalidState(format!(
                "version {version_id} is {}; only drafts can be edited",
                current.status
            )));
        }
        if req.data.is_none() && req.summary.is_none() {
            return Err(GovernanceError::InvalidArgument(
                "nothing to update: supply data or summary".into(),
            ));
        }

        let mut updated = current.clone();
        if let Some(data) = req.data {
            updated.data = data;
        }
        if let Some(summary) = req.summary {
            updated.summary = Some(summary);
        }
        updated.updated_at = Utc::now();

        let mut batch = WriteBatch::new();
        batch
            .require(expect_version_status(&current))
            .push(WriteOp::PutVersion(updated.clone()));
        self.audit.stage(
            &mut batch,
            AuditRecord::new(org_id, AuditAction::VersionUpdated, &principal.user_id)
                .entity(updated.entity_type, &updated.entity_id)
                .previous(serde_json::json!({ "data": current.data, "summary": current.summary }))
                .values(serde_json::json!({ "data": updated.data, "summary": updated.summary })),
        );
        self.store.commit(batch).await?;
        Ok(updated)
    }

    /// Move one version along a legal edge of the status graph.
    ///
    /// `approved → published` here is the admin-only direct publish; it moves
    /// the live record's pointer under the same read-then-write precondition
    /// a ChangeSet publish uses.
    pub async fn transition_version_status(
        &self,
        principal: &Principal,
        org_id: &str,
        entity_type: EntityType,
        entity_id: &str,
        version_id: Uuid,
        new_status: VersionStatus,
    ) -> Result<TransitionOutcome> {
        let role = resolve_role(&*self.store, principal, org_id, Role::Viewer).await?;
        let current = load_version(&*self.store, org_id, version_id).await?;
        if !current.belongs_to(entity_type, entity_id) {
            return Err(GovernanceError::InvalidArgument(format!(
                "version {version_id} does not belong to {entity_type}/{entity_id}"
            )));
        }
        if !current.status.can_transition_to(new_status) {
            return Err(GovernanceError::InvalidState(format!(
                "cannot move version from {} to {new_status}",
                current.status
            )));
        }
        match new_status {
            VersionStatus::Published if role != Role::Admin => {
                return Err(GovernanceError::PermissionDenied(
                    "publishing a version outside a change set requires admin".into(),
                ));
            }
            VersionStatus::Approved | VersionStatus::Rejected
                if !can_act_as(role, entity_type.required_approver()) =>
            {
                return Err(GovernanceError::PermissionDenied(format!(
                    "reviewing a {entity_type} requires {}",
                    entity_type.required_approver()
                )));
            }
            VersionStatus::Draft | VersionStatus::PendingReview if !role.has_at_least(WRITE_ROLE) => {
                return Err(GovernanceError::PermissionDenied(format!(
                    "{} holds {role}, {WRITE_ROLE} or higher required",
                    principal.user_id
                )));
            }
            _ => {}
        }

        let now = Utc::now();
        let mut updated = current.clone();
        updated.status = new_status;
        updated.updated_at = now;

        let mut batch = WriteBatch::new();
        batch.require(expect_version_status(&current));
        if new_status == VersionStatus::Published {
            updated.published_at = Some(now);
            let live = plan_live_write(
                &*self.store,
                &updated,
                ItemAction::Update,
                &principal.user_id,
                now,
            )
            .await?;
            batch.preconditions.extend(live.preconditions);
            batch.ops.extend(live.ops);
        }
        batch.push(WriteOp::PutVersion(updated));
        self.audit.stage(
            &mut batch,
            AuditRecord::new(org_id, AuditAction::VersionStatusChanged, &principal.user_id)
                .entity(entity_type, entity_id)
                .previous(serde_json::json!({ "status": current.status }))
                .values(serde_json::json!({ "status": new_status, "version_id": version_id })),
        );
        self.store.commit(batch).await?;

        telemetry::emit_version_transition(version_id, current.status, new_status, &principal.user_id);
        self.events.publish(EventEnvelope::new(
            org_id,
            None,
            DomainEvent::VersionStatusChanged {
                version_id,
                entity_type,
                entity_id: entity_id.to_string(),
                from: current.status,
                to: new_status,
            },
        ));
        Ok(TransitionOutcome {
            version_id,
            previous_status: current.status,
            new_status,
        })
    }

    // ── Reads ─────────────────────────────────────────────────

    pub async fn get_version(
        &self,
        principal: &Principal,
        org_id: &str,
        version_id: Uuid,
    ) -> Result<Version> {
        resolve_role(&*self.store, principal, org_id, Role::Viewer).await?;
        load_version(&*self.store, org_id, version_id).await
    }

    pub async fn list_versions(
        &self,
        principal: &Principal,
        org_id: &str,
        entity_type: EntityType,
        entity_id: &str,
    ) -> Result<Vec<Version>> {
        resolve_role(&*self.store, principal, org_id, Role::Viewer).await?;
        self.store.list_versions(org_id, entity_type, entity_id).await
    }

    pub async fn compare_versions(
        &self,
        principal: &Principal,
        org_id: &str,
        from: Uuid,
        to: Uuid,
    ) -> Result<VersionDiff> {
        resolve_role(&*self.store, principal, org_id, Role::Viewer).await?;
        let before = load_version(&*self.store, org_id, from).await?;
        let after = load_version(&*self.store, org_id, to).await?;
        Ok(VersionDiff {
            from,
            to,
            changes: diff_snapshots(&before.data, &after.data),
        })
    }

    /// The version the live record currently points at, if any.
    pub async fn get_current_version(
        &self,
        principal: &Principal,
        org_id: &str,
        entity_type: EntityType,
        entity_id: &str,
    ) -> Result<Option<Version>> {
        resolve_role(&*self.store, principal, org_id, Role::Viewer).await?;
        let key = RecordKey::entity(entity_type, entity_id);
        let Some(version_id) = self
            .store
            .get_record(org_id, &key)
            .await?
            .and_then(|r| r.current_version_id)
        else {
            return Ok(None);
        };
        self.store.get_version(org_id, version_id).await
    }

    // ── Internal helpers ──────────────────────────────────────

    /// Write a new draft under the next counter value, retrying on CAS loss.
    async fn allocate(
        &self,
        principal: &Principal,
        org_id: &str,
        draft: NewVersion,
        action: AuditAction,
    ) -> Result<Version> {
        for attempt in 1..=self.max_retries {
            let current = self
                .store
                .read_version_counter(org_id, draft.entity_type, &draft.entity_id)
                .await?;
            let now = Utc::now();
            let version = Version {
                version_id: Uuid::new_v4(),
                org_id: org_id.to_string(),
                entity_type: draft.entity_type,
                entity_id: draft.entity_id.clone(),
                parent_id: draft.parent_id.clone(),
                version_number: current + 1,
                status: VersionStatus::Draft,
                data: draft.data.clone(),
                summary: draft.summary.clone(),
                created_by: principal.user_id.clone(),
                created_at: now,
                updated_at: now,
                parent_version_id: draft.parent_version_id,
                published_at: None,
            };

            let mut batch = WriteBatch::new();
            batch
                .require(Precondition::VersionCounterIs {
                    org_id: org_id.to_string(),
                    entity_type: draft.entity_type,
                    entity_id: draft.entity_id.clone(),
                    expected: current,
                })
                .push(WriteOp::SetVersionCounter {
                    org_id: org_id.to_string(),
                    entity_type: draft.entity_type,
                    entity_id: draft.entity_id.clone(),
                    value: version.version_number,
                })
                .push(WriteOp::PutVersion(version.clone()));
            let mut record = AuditRecord::new(org_id, action, &principal.user_id)
                .entity(version.entity_type, &version.entity_id)
                .values(serde_json::json!({
                    "version_id": version.version_id,
                    "version_number": version.version_number,
                }));
            if let Some(source) = version.parent_version_id {
                record = record.previous(serde_json::json!({ "cloned_from": source }));
            }
            self.audit.stage(&mut batch, record);

            match self.store.commit(batch).await {
                Ok(()) => {
                    telemetry::emit_version_created(
                        org_id,
                        version.entity_type,
                        &version.entity_id,
                        version.version_number,
                    );
                    return Ok(version);
                }
                Err(GovernanceError::Conflict(reason)) => {
                    tracing::debug!(
                        target: "governance.version",
                        entity_id = %version.entity_id,
                        attempt,
                        reason,
                        "version counter contended, retrying"
                    );
                }
                Err(e) => return Err(e),
            }
        }
        Err(GovernanceError::Conflict(format!(
            "version counter for {}/{} still contended after {} attempts",
            draft.entity_type, draft.entity_id, self.max_retries
        )))
    }
}

struct NewVersion {
    entity_type: EntityType,
    entity_id: String,
    parent_id: Option<String>,
    data: serde_json::Value,
    summary: Option<String>,
    parent_version_id: Option<Uuid>,
}

pub(crate) fn validate_entity_id(entity_id: &str) -> Result<()> {
    if entity_id.trim().is_empty() || entity_id.contains('/') {
        return Err(GovernanceError::InvalidArgument(
            "entity_id must be non-empty and contain no '/'".into(),
        ));
    }
    Ok(())
}

/// A parent id is only meaningful for types with a structural parent.
fn validate_parent(entity_type: EntityType, parent_id: Option<String>) -> Result<Option<String>> {
    match (entity_type.parent_type(), parent_id) {
        (_, None) => Ok(None),
        (None, Some(_)) => Err(GovernanceError::InvalidArgument(format!(
            "{entity_type} has no parent type"
        ))),
        (Some(_), Some(p)) if p.trim().is_empty() || p.contains('/') => Err(
            GovernanceError::InvalidArgument("parent_id must be non-empty and contain no '/'".into()),
        ),
        (Some(_), Some(p)) => Ok(Some(p)),
    }
}
