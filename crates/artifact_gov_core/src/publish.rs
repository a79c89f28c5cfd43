//! Atomic multi-document publish.
//!
//! Write plan per item:
//!   1. version → `published` (guarded by its current status)
//!   2. create/update: live record gets the data and the current-version
//!      pointer; delete: live record removed. Both guarded by the pointer
//!      value read while planning, so a concurrent publish aborts with
//!      `Conflict` instead of last-writer-wins.
//! Then the ChangeSet → `published` (revision precondition) and one audit
//! entry.
//!
//! The whole plan is one commit. The preflight refuses any change set whose
//! plan could exceed the store's batch limit, so a publish either applies
//! every write or none of them.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::audit::{AuditLogger, AuditRecord};
use crate::changesets::{bump, publish_moves, stage_version_move, VersionMove};
use crate::config::GovernanceConfig;
use crate::error::GovernanceError;
use crate::events::{DomainEvent, EventEnvelope, SharedEventSink};
use crate::ports::{
    expect_revision, load_change_set, load_version, DocumentStore, Precondition,
    RecordExpectation, Result, SharedStore, WriteBatch, WriteOp,
};
use crate::preflight::PreflightValidator;
use crate::principal::Principal;
use crate::roles::{resolve_role, PUBLISH_ROLE};
use crate::telemetry;
use crate::types::*;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishOutcome {
    pub success: bool,
    pub change_set_id: Uuid,
    pub published_count: usize,
    /// Writes applied by the single publish commit.
    pub writes: usize,
}

/// Writes that move one live record, guarded by the pointer read while planning.
#[derive(Debug, Clone, Default)]
pub(crate) struct LiveWrite {
    pub preconditions: Vec<Precondition>,
    pub ops: Vec<WriteOp>,
}

/// Plan the live-record write for a version being published.
pub(crate) async fn plan_live_write(
    store: &dyn DocumentStore,
    version: &Version,
    action: ItemAction,
    user_id: &str,
    now: DateTime<Utc>,
) -> Result<LiveWrite> {
    let key = version.record_key();
    let current = store.get_record(&version.org_id, &key).await?;
    let expect = match &current {
        None => RecordExpectation::Absent,
        Some(record) => RecordExpectation::Present {
            current_version_id: record.current_version_id,
        },
    };
    let mut live = LiveWrite {
        preconditions: vec![Precondition::RecordIs {
            org_id: version.org_id.clone(),
            key: key.clone(),
            expect,
        }],
        ..Default::default()
    };

    match action {
        ItemAction::Create | ItemAction::Update => {
            live.ops.push(WriteOp::PutRecord(ArtifactRecord {
                org_id: version.org_id.clone(),
                key: key.clone(),
                owners: record_owners(version),
                data: version.data.clone(),
                current_version_id: Some(version.version_id),
                current_version_number: Some(version.version_number),
                updated_by: user_id.to_string(),
                updated_at: now,
            }));
        }
        ItemAction::Delete => {
            if current.is_some() {
                live.ops.push(WriteOp::DeleteRecord {
                    org_id: version.org_id.clone(),
                    key,
                });
            }
        }
    }
    Ok(live)
}

/// Structural owners of a live entity record: the parent named by
/// `parent_id`, plus the coverage a rule is attached to via `coverageId`.
pub fn record_owners(version: &Version) -> Vec<RecordKey> {
    let mut owners: Vec<RecordKey> = version.owner_key().into_iter().collect();
    if version.entity_type == EntityType::Rule {
        if let Some(coverage_id) = version.data.get("coverageId").and_then(|v| v.as_str()) {
            owners.push(RecordKey::new(Collection::Coverages, coverage_id));
        }
    }
    owners.sort();
    owners.dedup();
    owners
}

pub struct PublishCoordinator {
    store: SharedStore,
    audit: AuditLogger,
    events: SharedEventSink,
    preflight: PreflightValidator,
    timeout: Duration,
}

impl PublishCoordinator {
    pub fn new(store: SharedStore, events: SharedEventSink, config: &GovernanceConfig) -> Self {
        Self {
            audit: AuditLogger::new(store.clone()),
            preflight: PreflightValidator::new(store.clone(), config),
            store,
            events,
            timeout: config.publish_timeout(),
        }
    }

    /// Publish an approved change set. On timeout the outcome is unknown:
    /// re-run the preflight before retrying.
    pub async fn publish_change_set(
        &self,
        principal: &Principal,
        org_id: &str,
        change_set_id: Uuid,
    ) -> Result<PublishOutcome> {
        let result = match tokio::time::timeout(
            self.timeout,
            self.publish_inner(principal, org_id, change_set_id),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(GovernanceError::OutcomeUnknown(format!(
                "publish of {change_set_id} timed out after {} ms",
                self.timeout.as_millis()
            ))),
        };
        if let Err(e) = &result {
            telemetry::emit_publish_failure(change_set_id, e.kind(), &e.to_string());
        }
        result
    }

    async fn publish_inner(
        &self,
        principal: &Principal,
        org_id: &str,
        change_set_id: Uuid,
    ) -> Result<PublishOutcome> {
        resolve_role(&*self.store, principal, org_id, PUBLISH_ROLE).await?;
        let cs = load_change_set(&*self.store, org_id, change_set_id).await?;
        if cs.status == ChangeSetStatus::Published {
            return Err(GovernanceError::InvalidState(format!(
                "change set {change_set_id} is already published"
            )));
        }
        let issues = self.preflight.evaluate(&cs).await?;
        if !issues.is_empty() {
            return Err(GovernanceError::FailedPrecondition(issues));
        }

        let now = Utc::now();
        let mut batch = WriteBatch::new();
        batch.require(expect_revision(&cs));
        let mut moves = Vec::new();
        for item in &cs.items {
            moves.extend(
                self.plan_item(&mut batch, &cs, item, &principal.user_id, now)
                    .await?,
            );
        }

        let mut next = bump(&cs);
        next.status = ChangeSetStatus::Published;
        next.published_at = Some(now);
        next.published_by = Some(principal.user_id.clone());
        batch.push(WriteOp::PutChangeSet(next));
        self.audit.stage(
            &mut batch,
            AuditRecord::new(org_id, AuditAction::ChangeSetPublished, &principal.user_id)
                .entity("change_set", change_set_id)
                .change_set(change_set_id)
                .previous(serde_json::json!({ "status": cs.status }))
                .values(serde_json::json!({
                    "status": ChangeSetStatus::Published,
                    "published_count": cs.items.len(),
                    "items": cs.items.iter().map(|i| serde_json::json!({
                        "entity_type": i.entity_type,
                        "entity_id": i.entity_id,
                        "version_id": i.version_id,
                        "action": i.action,
                    })).collect::<Vec<_>>(),
                })),
        );

        let writes = batch.len();
        self.store.commit(batch).await?;

        telemetry::emit_change_set_transition(
            change_set_id,
            cs.status,
            ChangeSetStatus::Published,
            &principal.user_id,
        );
        telemetry::emit_publish(change_set_id, cs.items.len(), writes, &principal.user_id);
        self.events.publish(EventEnvelope::new(
            org_id,
            Some(change_set_id),
            DomainEvent::ChangeSetPublished {
                published_count: cs.items.len(),
                published_by: principal.user_id.clone(),
            },
        ));
        publish_moves(&*self.events, org_id, change_set_id, &moves, &principal.user_id);

        Ok(PublishOutcome {
            success: true,
            change_set_id,
            published_count: cs.items.len(),
            writes,
        })
    }

    /// Stage one item's writes into the publish batch.
    async fn plan_item(
        &self,
        batch: &mut WriteBatch,
        cs: &ChangeSet,
        item: &ChangeSetItem,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<VersionMove>> {
        let version = load_version(&*self.store, &cs.org_id, item.version_id).await?;
        let mut moves = Vec::new();

        // Delete items may reference a draft; only approved versions publish.
        if version.status == VersionStatus::Approved {
            moves = stage_version_move(batch, &version, &[VersionStatus::Published], now)?;
        }
        let mut published = version;
        published.status = VersionStatus::Published;
        let live = plan_live_write(&*self.store, &published, item.action, user_id, now).await?;
        batch.preconditions.extend(live.preconditions);
        batch.ops.extend(live.ops);
        Ok(moves)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::approval::{ApprovalEngine, ApproveRequest};
    use crate::changesets::{AddChangeSetItem, ChangeSetManager, CreateChangeSet};
    use crate::error::IssueCode;
    use crate::events::RecordingEventSink;
    use crate::memory::MemoryStore;
    use crate::ports::{ChangeSetStore, CommitStore, RecordStore, VersionStore};
    use crate::versions::{CreateDraftVersion, VersionService};

    struct Fixture {
        store: Arc<MemoryStore>,
        events: Arc<RecordingEventSink>,
        publisher: PublishCoordinator,
        change_set_id: Uuid,
        versions: Vec<Version>,
    }

    /// An approved set of `n` coverage updates.
    async fn approved(n: usize, store: MemoryStore, config: GovernanceConfig) -> Fixture {
        let store = Arc::new(store);
        store.seed_organization("org", "Org", "ops");
        store.seed_member("org", "owner", Role::Underwriter);
        store.seed_member("org", "actuary", Role::Actuary);
        store.seed_member("org", "pm", Role::ProductManager);
        let events = Arc::new(RecordingEventSink::new());
        let version_service = VersionService::new(store.clone(), events.clone(), &config);
        let sets = ChangeSetManager::new(store.clone(), events.clone());
        let approvals = ApprovalEngine::new(store.clone(), events.clone());
        let owner = Principal::in_process("owner");

        let cs = sets
            .create_change_set(&owner, "org", CreateChangeSet { name: "cs".into(), description: None })
            .await
            .unwrap();
        let mut versions = Vec::new();
        for i in 0..n {
            let v = version_service
                .create_draft_version(
                    &owner,
                    "org",
                    CreateDraftVersion {
                        entity_type: EntityType::Coverage,
                        entity_id: format!("c{i}"),
                        parent_id: Some("p1".into()),
                        data: Some(serde_json::json!({"limit": i})),
                        summary: None,
                    },
                )
                .await
                .unwrap();
            sets.add_change_set_item(
                &owner,
                "org",
                cs.change_set_id,
                AddChangeSetItem {
                    entity_type: EntityType::Coverage,
                    entity_id: v.entity_id.clone(),
                    version_id: v.version_id,
                    action: ItemAction::Create,
                },
            )
            .await
            .unwrap();
            versions.push(v);
        }
        sets.submit_for_review(&owner, "org", cs.change_set_id).await.unwrap();
        approvals
            .approve_change_set(
                &Principal::in_process("actuary"),
                "org",
                cs.change_set_id,
                ApproveRequest { role: Role::Actuary, notes: None },
            )
            .await
            .unwrap();

        Fixture {
            publisher: PublishCoordinator::new(store.clone(), events.clone(), &config),
            store,
            events,
            change_set_id: cs.change_set_id,
            versions,
        }
    }

    fn pm() -> Principal {
        Principal::in_process("pm")
    }

    async fn assert_untouched(f: &Fixture) {
        let cs = f.store.get_change_set("org", f.change_set_id).await.unwrap().unwrap();
        assert_eq!(cs.status, ChangeSetStatus::Approved);
        for v in &f.versions {
            let stored = f.store.get_version("org", v.version_id).await.unwrap().unwrap();
            assert_eq!(stored.status, VersionStatus::Approved);
            let record = f
                .store
                .get_record("org", &RecordKey::entity(EntityType::Coverage, &v.entity_id))
                .await
                .unwrap();
            assert!(record.is_none());
        }
    }

    #[tokio::test]
    async fn publishes_in_one_commit() {
        let f = approved(3, MemoryStore::new(), GovernanceConfig::default()).await;
        let audit_before = f.store.audit_len();
        let commits_before = f.store.commit_count();
        let outcome = f.publisher.publish_change_set(&pm(), "org", f.change_set_id).await.unwrap();
        assert_eq!(outcome.published_count, 3);
        // Two writes per item, then the change set and its audit entry.
        assert_eq!(outcome.writes, 8);
        assert_eq!(f.store.commit_count(), commits_before + 1);
        assert_eq!(f.store.audit_len(), audit_before + 1);

        for v in &f.versions {
            let stored = f.store.get_version("org", v.version_id).await.unwrap().unwrap();
            assert_eq!(stored.status, VersionStatus::Published);
            assert!(stored.published_at.is_some());
            let record = f
                .store
                .get_record("org", &RecordKey::entity(EntityType::Coverage, &v.entity_id))
                .await
                .unwrap()
                .unwrap();
            assert_eq!(record.current_version_id, Some(v.version_id));
            assert_eq!(record.owners, vec![RecordKey::new(Collection::Products, "p1")]);
        }
        let names = f.events.names();
        assert!(names.contains(&"change_set_published"));
        assert_eq!(
            names.iter().filter(|n| **n == "version_status_changed").count(),
            3 * 3
        );
    }

    #[tokio::test]
    async fn underwriter_cannot_publish() {
        let f = approved(1, MemoryStore::new(), GovernanceConfig::default()).await;
        let err = f
            .publisher
            .publish_change_set(&Principal::in_process("owner"), "org", f.change_set_id)
            .await
            .unwrap_err();
        assert!(matches!(err, GovernanceError::PermissionDenied(_)));
    }

    #[tokio::test]
    async fn failed_commit_leaves_everything_unchanged() {
        let f = approved(3, MemoryStore::new(), GovernanceConfig::default()).await;
        f.store.fail_commit_after(0);
        let err = f
            .publisher
            .publish_change_set(&pm(), "org", f.change_set_id)
            .await
            .unwrap_err();
        assert!(matches!(err, GovernanceError::Internal(_)));
        assert_untouched(&f).await;
    }

    #[tokio::test]
    async fn failed_preflight_lists_issues() {
        let config = GovernanceConfig {
            max_publish_items: 2,
            ..Default::default()
        };
        let f = approved(3, MemoryStore::new(), config).await;
        let err = f
            .publisher
            .publish_change_set(&pm(), "org", f.change_set_id)
            .await
            .unwrap_err();
        assert_eq!(err.issues().len(), 1);
        assert_eq!(err.issues()[0].code, IssueCode::BatchSizeExceeded);
        assert_untouched(&f).await;
    }

    #[tokio::test]
    async fn plan_over_store_limit_is_refused_before_writing() {
        // 4 items plan 10 writes; the store commits at most 9.
        let f = approved(4, MemoryStore::with_max_batch_writes(9), GovernanceConfig::default()).await;
        let commits_before = f.store.commit_count();
        let err = f
            .publisher
            .publish_change_set(&pm(), "org", f.change_set_id)
            .await
            .unwrap_err();
        let codes: Vec<IssueCode> = err.issues().iter().map(|i| i.code).collect();
        assert_eq!(codes, vec![IssueCode::BatchWriteLimitExceeded]);
        assert_eq!(f.store.commit_count(), commits_before);
        assert_untouched(&f).await;
    }

    #[tokio::test]
    async fn plan_at_store_limit_publishes_in_one_commit() {
        let f = approved(4, MemoryStore::with_max_batch_writes(10), GovernanceConfig::default()).await;
        let commits_before = f.store.commit_count();
        let outcome = f.publisher.publish_change_set(&pm(), "org", f.change_set_id).await.unwrap();
        assert_eq!(outcome.writes, 10);
        assert_eq!(f.store.commit_count(), commits_before + 1);
        let cs = f.store.get_change_set("org", f.change_set_id).await.unwrap().unwrap();
        assert_eq!(cs.status, ChangeSetStatus::Published);
    }

    #[tokio::test]
    async fn concurrent_pointer_move_aborts_publish() {
        let f = approved(1, MemoryStore::new(), GovernanceConfig::default()).await;
        // Another writer lands a live record between planning and commit.
        let v = &f.versions[0];
        let key = RecordKey::entity(EntityType::Coverage, &v.entity_id);
        let live = plan_live_write(&*f.store, v, ItemAction::Create, "x", Utc::now())
            .await
            .unwrap();
        let mut racing = WriteBatch::new();
        racing.ops.extend(live.ops.clone());
        f.store.commit(racing).await.unwrap();

        let mut stale = WriteBatch::new();
        stale.preconditions.extend(live.preconditions);
        stale.ops.extend(live.ops);
        let err = f.store.commit(stale).await.unwrap_err();
        assert!(matches!(err, GovernanceError::Conflict(_)));
        assert!(f.store.get_record("org", &key).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn published_set_cannot_publish_again() {
        let f = approved(1, MemoryStore::new(), GovernanceConfig::default()).await;
        f.publisher.publish_change_set(&pm(), "org", f.change_set_id).await.unwrap();
        let err = f
            .publisher
            .publish_change_set(&pm(), "org", f.change_set_id)
            .await
            .unwrap_err();
        assert!(matches!(err, GovernanceError::InvalidState(_)));
    }

    #[test]
    fn rule_owners_include_attached_coverage() {
        let now = Utc::now();
        let v = Version {
            version_id: Uuid::new_v4(),
            org_id: "org".into(),
            entity_type: EntityType::Rule,
            entity_id: "r1".into(),
            parent_id: Some("p1".into()),
            version_number: 1,
            status: VersionStatus::Approved,
            data: serde_json::json!({"coverageId": "c1"}),
            summary: None,
            created_by: "u".into(),
            created_at: now,
            updated_at: now,
            parent_version_id: None,
            published_at: None,
        };
        assert_eq!(
            record_owners(&v),
            vec![
                RecordKey::new(Collection::Products, "p1"),
                RecordKey::new(Collection::Coverages, "c1"),
            ]
        );
    }
}
