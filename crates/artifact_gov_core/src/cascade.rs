//! Cascade delete of live artifacts, dependent rows, and integrity scans.
//!
//! Deletes walk the owner graph leaves first, so a cascade cut short at a
//! chunk boundary leaves a smaller tree rooted at the artifact, never a
//! record whose owner is gone. Orphans can still appear when an owner is
//! removed by a published `delete` item; [`CascadeDeleteEngine::detect_orphaned_records`]
//! reports them without repairing anything.

use std::collections::HashSet;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use strum::IntoEnumIterator;

use crate::audit::{AuditLogger, AuditRecord};
use crate::config::GovernanceConfig;
use crate::error::GovernanceError;
use crate::events::{DomainEvent, EventEnvelope, SharedEventSink};
use crate::ports::{
    DocumentStore, Precondition, RecordExpectation, Result, SharedStore, WriteBatch, WriteOp,
};
use crate::principal::Principal;
use crate::roles::{resolve_role, PUBLISH_ROLE, WRITE_ROLE};
use crate::telemetry;
use crate::types::*;
use crate::versions::validate_entity_id;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PutDependentRecord {
    pub collection: Collection,
    pub record_id: String,
    pub owners: Vec<RecordKey>,
    #[serde(default)]
    pub data: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CascadeOutcome {
    pub root: RecordKey,
    pub deleted_count: usize,
    pub chunks: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrphanedRecord {
    pub key: RecordKey,
    pub missing_owners: Vec<RecordKey>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrityCode {
    CoverageMissing,
    ParentMissing,
    FormMissing,
    RequiredCoverageMissing,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrityIssue {
    pub code: IntegrityCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<RecordKey>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoverageIntegrityReport {
    pub coverage_id: String,
    pub valid: bool,
    pub issues: Vec<IntegrityIssue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointerIssue {
    pub key: RecordKey,
    pub current_version_id: Option<uuid::Uuid>,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComprehensiveReport {
    pub healthy: bool,
    pub orphans: Vec<OrphanedRecord>,
    pub coverages: Vec<CoverageIntegrityReport>,
    pub pointer_issues: Vec<PointerIssue>,
}

/// Collections a dependent row may name as owners.
fn allowed_owners(collection: Collection) -> &'static [Collection] {
    match collection {
        Collection::FormCoverages => &[Collection::Forms, Collection::Coverages],
        Collection::CoverageLimits | Collection::CoverageDeductibles => &[Collection::Coverages],
        _ => &[],
    }
}

fn string_ids(data: &serde_json::Value, field: &str) -> Vec<String> {
    data.get(field)
        .and_then(|v| v.as_array())
        .map(|ids| {
            ids.iter()
                .filter_map(|id| id.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

pub struct CascadeDeleteEngine {
    store: SharedStore,
    audit: AuditLogger,
    events: SharedEventSink,
    chunk_size: usize,
    store_batch_limit: usize,
    timeout: Duration,
}

impl CascadeDeleteEngine {
    pub fn new(store: SharedStore, events: SharedEventSink, config: &GovernanceConfig) -> Self {
        Self {
            audit: AuditLogger::new(store.clone()),
            store,
            events,
            chunk_size: config.cascade_chunk_size,
            store_batch_limit: config.store_batch_limit,
            timeout: config.cascade_timeout(),
        }
    }

    /// Deletes per chunk; one slot is kept free for the audit entry.
    fn effective_chunk(&self) -> usize {
        let limit = self.store_batch_limit.min(self.store.max_batch_writes());
        self.chunk_size.min(limit.saturating_sub(1)).max(1)
    }

    // ── Cascade delete ────────────────────────────────────────

    pub async fn delete_artifact_cascade(
        &self,
        principal: &Principal,
        org_id: &str,
        entity_type: EntityType,
        entity_id: &str,
    ) -> Result<CascadeOutcome> {
        match tokio::time::timeout(
            self.timeout,
            self.cascade_inner(principal, org_id, entity_type, entity_id),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(GovernanceError::OutcomeUnknown(format!(
                "cascade delete of {entity_type}/{entity_id} timed out after {} ms",
                self.timeout.as_millis()
            ))),
        }
    }

    async fn cascade_inner(
        &self,
        principal: &Principal,
        org_id: &str,
        entity_type: EntityType,
        entity_id: &str,
    ) -> Result<CascadeOutcome> {
        resolve_role(&*self.store, principal, org_id, PUBLISH_ROLE).await?;
        validate_entity_id(entity_id)?;
        let root = RecordKey::entity(entity_type, entity_id);
        if self.store.get_record(org_id, &root).await?.is_none() {
            return Err(GovernanceError::NotFound(format!("artifact {}", root.path())));
        }

        let doomed = collect_leaves_first(&*self.store, org_id, &root).await?;
        let paths: Vec<String> = doomed.iter().map(RecordKey::path).collect();
        let chunk = self.effective_chunk();
        let chunk_count = doomed.len().div_ceil(chunk);

        for (index, keys) in doomed.chunks(chunk).enumerate() {
            let mut batch = WriteBatch::new();
            for key in keys {
                batch.push(WriteOp::DeleteRecord {
                    org_id: org_id.to_string(),
                    key: key.clone(),
                });
            }
            if index + 1 == chunk_count {
                self.audit.stage(
                    &mut batch,
                    AuditRecord::new(org_id, AuditAction::ArtifactCascadeDeleted, &principal.user_id)
                        .entity(entity_type, entity_id)
                        .previous(serde_json::json!({ "records": paths }))
                        .values(serde_json::json!({ "deleted_count": doomed.len() })),
                );
            }
            if let Err(e) = self.store.commit(batch).await {
                tracing::warn!(
                    target: "governance.cascade",
                    org_id,
                    root = %root.path(),
                    failed_chunk = index,
                    of = chunk_count,
                    error = %e,
                    "cascade delete stopped at chunk boundary"
                );
                return Err(e);
            }
        }

        telemetry::emit_cascade(org_id, &root.path(), doomed.len(), chunk_count);
        self.events.publish(EventEnvelope::new(
            org_id,
            None,
            DomainEvent::ArtifactCascadeDeleted {
                entity_type,
                entity_id: entity_id.to_string(),
                deleted_count: doomed.len(),
            },
        ));
        Ok(CascadeOutcome {
            root,
            deleted_count: doomed.len(),
            chunks: chunk_count,
        })
    }

    // ── Dependent rows ────────────────────────────────────────

    pub async fn put_dependent_record(
        &self,
        principal: &Principal,
        org_id: &str,
        req: PutDependentRecord,
    ) -> Result<ArtifactRecord> {
        resolve_role(&*self.store, principal, org_id, WRITE_ROLE).await?;
        if !req.collection.is_dependent() {
            return Err(GovernanceError::InvalidArgument(format!(
                "{} is versioned; publish it through a change set",
                req.collection
            )));
        }
        validate_entity_id(&req.record_id)?;
        if req.owners.is_empty() {
            return Err(GovernanceError::InvalidArgument(
                "a dependent record needs at least one owner".into(),
            ));
        }
        let allowed = allowed_owners(req.collection);
        let mut batch = WriteBatch::new();
        for owner in &req.owners {
            if !allowed.contains(&owner.collection) {
                return Err(GovernanceError::InvalidArgument(format!(
                    "{} cannot be owned by {}",
                    req.collection, owner.collection
                )));
            }
            let Some(existing) = self.store.get_record(org_id, owner).await? else {
                return Err(GovernanceError::InvalidArgument(format!(
                    "owner {} does not exist",
                    owner.path()
                )));
            };
            batch.require(Precondition::RecordIs {
                org_id: org_id.to_string(),
                key: owner.clone(),
                expect: RecordExpectation::Present {
                    current_version_id: existing.current_version_id,
                },
            });
        }

        let mut owners = req.owners;
        owners.sort();
        owners.dedup();
        let record = ArtifactRecord {
            org_id: org_id.to_string(),
            key: RecordKey::new(req.collection, req.record_id),
            owners,
            data: req.data,
            current_version_id: None,
            current_version_number: None,
            updated_by: principal.user_id.clone(),
            updated_at: Utc::now(),
        };
        batch.push(WriteOp::PutRecord(record.clone()));
        self.audit.stage(
            &mut batch,
            AuditRecord::new(org_id, AuditAction::DependentRecordCreated, &principal.user_id)
                .entity(record.key.collection, &record.key.record_id)
                .values(serde_json::json!({
                    "owners": record.owners.iter().map(RecordKey::path).collect::<Vec<_>>(),
                    "data": record.data,
                })),
        );
        self.store.commit(batch).await?;
        Ok(record)
    }

    // ── Integrity ─────────────────────────────────────────────

    pub async fn detect_orphaned_records(
        &self,
        principal: &Principal,
        org_id: &str,
    ) -> Result<Vec<OrphanedRecord>> {
        resolve_role(&*self.store, principal, org_id, Role::Viewer).await?;
        self.orphans(org_id).await
    }

    pub async fn validate_coverage_integrity(
        &self,
        principal: &Principal,
        org_id: &str,
        coverage_id: &str,
    ) -> Result<CoverageIntegrityReport> {
        resolve_role(&*self.store, principal, org_id, Role::Viewer).await?;
        self.coverage_report(org_id, coverage_id).await
    }

    pub async fn run_comprehensive_check(
        &self,
        principal: &Principal,
        org_id: &str,
    ) -> Result<ComprehensiveReport> {
        resolve_role(&*self.store, principal, org_id, Role::Viewer).await?;
        let orphans = self.orphans(org_id).await?;
        let mut coverages = Vec::new();
        for record in self.store.list_records(org_id, Collection::Coverages).await? {
            coverages.push(self.coverage_report(org_id, &record.key.record_id).await?);
        }
        let pointer_issues = self.pointer_issues(org_id).await?;
        let healthy =
            orphans.is_empty() && pointer_issues.is_empty() && coverages.iter().all(|c| c.valid);
        tracing::info!(
            target: "governance.cascade",
            org_id,
            orphans = orphans.len(),
            coverages = coverages.len(),
            pointer_issues = pointer_issues.len(),
            healthy,
            "integrity check"
        );
        Ok(ComprehensiveReport {
            healthy,
            orphans,
            coverages,
            pointer_issues,
        })
    }

    async fn orphans(&self, org_id: &str) -> Result<Vec<OrphanedRecord>> {
        let mut orphans = Vec::new();
        for collection in Collection::iter() {
            for record in self.store.list_records(org_id, collection).await? {
                let mut missing_owners = Vec::new();
                for owner in &record.owners {
                    if self.store.get_record(org_id, owner).await?.is_none() {
                        missing_owners.push(owner.clone());
                    }
                }
                if !missing_owners.is_empty() {
                    orphans.push(OrphanedRecord {
                        key: record.key,
                        missing_owners,
                    });
                }
            }
        }
        Ok(orphans)
    }

    async fn coverage_report(&self, org_id: &str, coverage_id: &str) -> Result<CoverageIntegrityReport> {
        let key = RecordKey::new(Collection::Coverages, coverage_id);
        let mut issues = Vec::new();
        let Some(coverage) = self.store.get_record(org_id, &key).await? else {
            issues.push(IntegrityIssue {
                code: IntegrityCode::CoverageMissing,
                message: format!("coverage {coverage_id} does not exist"),
                reference: Some(key),
            });
            return Ok(CoverageIntegrityReport {
                coverage_id: coverage_id.to_string(),
                valid: false,
                issues,
            });
        };

        for owner in coverage.owners.iter().filter(|o| o.collection == Collection::Products) {
            if self.store.get_record(org_id, owner).await?.is_none() {
                issues.push(IntegrityIssue {
                    code: IntegrityCode::ParentMissing,
                    message: format!("parent product {} does not exist", owner.record_id),
                    reference: Some(owner.clone()),
                });
            }
        }

        let mut forms: Vec<RecordKey> = string_ids(&coverage.data, "formIds")
            .into_iter()
            .map(|id| RecordKey::new(Collection::Forms, id))
            .collect();
        for mapping in self.store.list_dependents(org_id, &key).await? {
            if mapping.key.collection == Collection::FormCoverages {
                forms.extend(
                    mapping
                        .owners
                        .into_iter()
                        .filter(|o| o.collection == Collection::Forms),
                );
            }
        }
        forms.sort();
        forms.dedup();
        for form in forms {
            if self.store.get_record(org_id, &form).await?.is_none() {
                issues.push(IntegrityIssue {
                    code: IntegrityCode::FormMissing,
                    message: format!("referenced form {} does not exist", form.record_id),
                    reference: Some(form),
                });
            }
        }

        for required in string_ids(&coverage.data, "requiredCoverageIds") {
            let required = RecordKey::new(Collection::Coverages, required);
            if self.store.get_record(org_id, &required).await?.is_none() {
                issues.push(IntegrityIssue {
                    code: IntegrityCode::RequiredCoverageMissing,
                    message: format!("required coverage {} does not exist", required.record_id),
                    reference: Some(required),
                });
            }
        }

        Ok(CoverageIntegrityReport {
            coverage_id: coverage_id.to_string(),
            valid: issues.is_empty(),
            issues,
        })
    }

    /// Every entity record's pointer must name a published version of itself.
    async fn pointer_issues(&self, org_id: &str) -> Result<Vec<PointerIssue>> {
        let mut issues = Vec::new();
        for collection in Collection::iter().filter(|c| !c.is_dependent()) {
            for record in self.store.list_records(org_id, collection).await? {
                let Some(version_id) = record.current_version_id else {
                    continue;
                };
                let message = match self.store.get_version(org_id, version_id).await? {
                    None => Some("current version does not exist".to_string()),
                    Some(v) if v.record_key() != record.key => {
                        Some(format!("current version belongs to {}", v.record_key().path()))
                    }
                    Some(v) if v.status != VersionStatus::Published => {
                        Some(format!("current version is {}", v.status))
                    }
                    Some(_) => None,
                };
                if let Some(message) = message {
                    issues.push(PointerIssue {
                        key: record.key,
                        current_version_id: Some(version_id),
                        message,
                    });
                }
            }
        }
        Ok(issues)
    }
}

/// Post-order walk of the owner graph: every record precedes its owners and
/// the root comes last. Records with several owners appear once.
async fn collect_leaves_first(
    store: &dyn DocumentStore,
    org_id: &str,
    root: &RecordKey,
) -> Result<Vec<RecordKey>> {
    enum Step {
        Enter(RecordKey),
        Exit(RecordKey),
    }
    let mut seen: HashSet<RecordKey> = HashSet::new();
    let mut order = Vec::new();
    let mut stack = vec![Step::Enter(root.clone())];
    while let Some(step) = stack.pop() {
        match step {
            Step::Enter(key) => {
                if !seen.insert(key.clone()) {
                    continue;
                }
                let mut children = store.list_dependents(org_id, &key).await?;
                children.sort_by(|a, b| a.key.cmp(&b.key));
                stack.push(Step::Exit(key));
                for child in children.into_iter().rev() {
                    stack.push(Step::Enter(child.key));
                }
            }
            Step::Exit(key) => order.push(key),
        }
    }
    Ok(order)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::events::RecordingEventSink;
    use crate::memory::MemoryStore;
    use crate::ports::RecordStore;

    fn record(collection: Collection, id: &str, owners: Vec<RecordKey>, data: serde_json::Value) -> ArtifactRecord {
        ArtifactRecord {
            org_id: "org".into(),
            key: RecordKey::new(collection, id),
            owners,
            data,
            current_version_id: None,
            current_version_number: None,
            updated_by: "seed".into(),
            updated_at: Utc::now(),
        }
    }

    fn key(collection: Collection, id: &str) -> RecordKey {
        RecordKey::new(collection, id)
    }

    /// product p1 → coverage c1 → {limit, deductible, form mapping, rule r1};
    /// rule r1 is also owned by p1; form f1 stands alone.
    fn seeded(max_batch_writes: usize) -> (Arc<MemoryStore>, Arc<RecordingEventSink>) {
        let store = Arc::new(MemoryStore::with_max_batch_writes(max_batch_writes));
        store.seed_organization("org", "Org", "ops");
        store.seed_member("org", "pm", Role::ProductManager);
        store.seed_member("org", "uw", Role::Underwriter);
        let p1 = key(Collection::Products, "p1");
        let c1 = key(Collection::Coverages, "c1");
        let f1 = key(Collection::Forms, "f1");
        store.seed_record(record(Collection::Products, "p1", vec![], serde_json::json!({})));
        store.seed_record(record(Collection::Forms, "f1", vec![], serde_json::json!({})));
        store.seed_record(record(
            Collection::Coverages,
            "c1",
            vec![p1.clone()],
            serde_json::json!({"formIds": ["f1"]}),
        ));
        store.seed_record(record(Collection::CoverageLimits, "l1", vec![c1.clone()], serde_json::json!({})));
        store.seed_record(record(Collection::CoverageDeductibles, "d1", vec![c1.clone()], serde_json::json!({})));
        store.seed_record(record(Collection::FormCoverages, "fc1", vec![f1, c1.clone()], serde_json::json!({})));
        store.seed_record(record(Collection::Rules, "r1", vec![p1, c1], serde_json::json!({})));
        (store, Arc::new(RecordingEventSink::new()))
    }

    fn engine(store: Arc<MemoryStore>, events: Arc<RecordingEventSink>, chunk: usize) -> CascadeDeleteEngine {
        let config = GovernanceConfig {
            cascade_chunk_size: chunk,
            ..Default::default()
        };
        CascadeDeleteEngine::new(store, events, &config)
    }

    #[tokio::test]
    async fn coverage_cascade_removes_every_dependent() {
        let (store, events) = seeded(500);
        let cascade = engine(store.clone(), events.clone(), 450);
        let pm = Principal::in_process("pm");
        let outcome = cascade
            .delete_artifact_cascade(&pm, "org", EntityType::Coverage, "c1")
            .await
            .unwrap();
        assert_eq!(outcome.deleted_count, 5);
        assert_eq!(outcome.chunks, 1);
        assert_eq!(outcome.root, key(Collection::Coverages, "c1"));
        // p1 and f1 survive.
        assert_eq!(store.record_count("org"), 2);
        assert!(cascade.detect_orphaned_records(&pm, "org").await.unwrap().is_empty());
        assert_eq!(events.names(), vec!["artifact_cascade_deleted"]);
    }

    #[tokio::test]
    async fn small_chunks_split_the_cascade() {
        let (store, events) = seeded(500);
        let cascade = engine(store.clone(), events, 2);
        let audit_before = store.audit_len();
        let outcome = cascade
            .delete_artifact_cascade(&Principal::in_process("pm"), "org", EntityType::Product, "p1")
            .await
            .unwrap();
        // p1, c1, r1, l1, d1, fc1.
        assert_eq!(outcome.deleted_count, 6);
        assert_eq!(outcome.chunks, 3);
        assert_eq!(store.audit_len(), audit_before + 1);
        assert_eq!(store.record_count("org"), 1);
    }

    #[tokio::test]
    async fn leaves_come_before_owners() {
        let (store, _) = seeded(500);
        let order = collect_leaves_first(&*store, "org", &key(Collection::Products, "p1"))
            .await
            .unwrap();
        let pos = |k: RecordKey| order.iter().position(|o| *o == k).unwrap();
        assert_eq!(*order.last().unwrap(), key(Collection::Products, "p1"));
        assert!(pos(key(Collection::Rules, "r1")) < pos(key(Collection::Coverages, "c1")));
        assert!(pos(key(Collection::CoverageLimits, "l1")) < pos(key(Collection::Coverages, "c1")));
        assert_eq!(order.len(), 6);
    }

    #[tokio::test]
    async fn interrupted_cascade_leaves_no_orphans() {
        let (store, events) = seeded(500);
        let cascade = engine(store.clone(), events.clone(), 2);
        store.fail_commit_after(1);
        let pm = Principal::in_process("pm");
        assert!(cascade
            .delete_artifact_cascade(&pm, "org", EntityType::Coverage, "c1")
            .await
            .is_err());
        assert!(store.get_record("org", &key(Collection::Coverages, "c1")).await.unwrap().is_some());
        assert!(cascade.detect_orphaned_records(&pm, "org").await.unwrap().is_empty());
        assert!(events.names().is_empty());
    }

    #[tokio::test]
    async fn cascade_needs_product_manager() {
        let (store, events) = seeded(500);
        let cascade = engine(store, events, 450);
        let err = cascade
            .delete_artifact_cascade(&Principal::in_process("uw"), "org", EntityType::Coverage, "c1")
            .await
            .unwrap_err();
        assert!(matches!(err, GovernanceError::PermissionDenied(_)));
    }

    #[tokio::test]
    async fn missing_root_is_not_found() {
        let (store, events) = seeded(500);
        let cascade = engine(store, events, 450);
        let err = cascade
            .delete_artifact_cascade(&Principal::in_process("pm"), "org", EntityType::Coverage, "nope")
            .await
            .unwrap_err();
        assert!(matches!(err, GovernanceError::NotFound(_)));
    }

    #[tokio::test]
    async fn dependent_rows_need_existing_owners() {
        let (store, events) = seeded(500);
        let cascade = engine(store.clone(), events, 450);
        let uw = Principal::in_process("uw");
        let created = cascade
            .put_dependent_record(
                &uw,
                "org",
                PutDependentRecord {
                    collection: Collection::CoverageLimits,
                    record_id: "l2".into(),
                    owners: vec![key(Collection::Coverages, "c1")],
                    data: serde_json::json!({"amount": 1000}),
                },
            )
            .await
            .unwrap();
        assert_eq!(created.owners, vec![key(Collection::Coverages, "c1")]);

        let missing = cascade
            .put_dependent_record(
                &uw,
                "org",
                PutDependentRecord {
                    collection: Collection::CoverageLimits,
                    record_id: "l3".into(),
                    owners: vec![key(Collection::Coverages, "ghost")],
                    data: serde_json::Value::Null,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(missing, GovernanceError::InvalidArgument(_)));

        let versioned = cascade
            .put_dependent_record(
                &uw,
                "org",
                PutDependentRecord {
                    collection: Collection::Coverages,
                    record_id: "c9".into(),
                    owners: vec![key(Collection::Products, "p1")],
                    data: serde_json::Value::Null,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(versioned, GovernanceError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn orphans_are_reported_not_repaired() {
        let (store, events) = seeded(500);
        store.seed_record(record(
            Collection::CoverageLimits,
            "stray",
            vec![key(Collection::Coverages, "gone")],
            serde_json::json!({}),
        ));
        let cascade = engine(store.clone(), events, 450);
        let orphans = cascade
            .detect_orphaned_records(&Principal::in_process("uw"), "org")
            .await
            .unwrap();
        assert_eq!(orphans.len(), 1);
        assert_eq!(orphans[0].key, key(Collection::CoverageLimits, "stray"));
        assert_eq!(orphans[0].missing_owners, vec![key(Collection::Coverages, "gone")]);
        assert!(store
            .get_record("org", &key(Collection::CoverageLimits, "stray"))
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn coverage_integrity_codes() {
        let (store, events) = seeded(500);
        store.seed_record(record(
            Collection::Coverages,
            "c2",
            vec![key(Collection::Products, "p-gone")],
            serde_json::json!({"formIds": ["f1", "f-gone"], "requiredCoverageIds": ["c1", "c-gone"]}),
        ));
        let cascade = engine(store, events, 450);
        let uw = Principal::in_process("uw");

        let clean = cascade.validate_coverage_integrity(&uw, "org", "c1").await.unwrap();
        assert!(clean.valid, "{:?}", clean.issues);

        let broken = cascade.validate_coverage_integrity(&uw, "org", "c2").await.unwrap();
        let codes: Vec<IntegrityCode> = broken.issues.iter().map(|i| i.code).collect();
        assert_eq!(
            codes,
            vec![
                IntegrityCode::ParentMissing,
                IntegrityCode::FormMissing,
                IntegrityCode::RequiredCoverageMissing,
            ]
        );

        let missing = cascade.validate_coverage_integrity(&uw, "org", "nope").await.unwrap();
        assert_eq!(missing.issues[0].code, IntegrityCode::CoverageMissing);
    }

    #[tokio::test]
    async fn comprehensive_check_flags_dangling_pointer() {
        let (store, events) = seeded(500);
        let mut pointed = record(Collection::Forms, "f2", vec![], serde_json::json!({}));
        pointed.current_version_id = Some(uuid::Uuid::new_v4());
        store.seed_record(pointed);
        let cascade = engine(store, events, 450);
        let report = cascade
            .run_comprehensive_check(&Principal::in_process("uw"), "org")
            .await
            .unwrap();
        assert!(!report.healthy);
        assert!(report.orphans.is_empty());
        assert_eq!(report.coverages.len(), 1);
        assert_eq!(report.pointer_issues.len(), 1);
        assert_eq!(report.pointer_issues[0].key, key(Collection::Forms, "f2"));
    }
}
