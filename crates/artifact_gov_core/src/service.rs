//! GovernanceService — the single entry point adapters call.
//!
//! Wires every component over one shared store and event sink. The server
//! holds an `Arc<dyn GovernanceService>`; tests use the same facade over
//! `MemoryStore`.

use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::approval::{ApprovalEngine, ApprovalOutcome, ApproveRequest, RejectRequest};
use crate::audit::AuditLogger;
use crate::cascade::{
    CascadeDeleteEngine, CascadeOutcome, ComprehensiveReport, CoverageIntegrityReport,
    OrphanedRecord, PutDependentRecord,
};
use crate::changesets::{
    AddChangeSetItem, AddTask, ChangeSetManager, CreateChangeSet, SubmitOutcome,
};
use crate::config::GovernanceConfig;
use crate::events::SharedEventSink;
use crate::orgs::OrganizationService;
use crate::ports::{Result, SharedStore};
use crate::preflight::{PreflightReport, PreflightValidator};
use crate::principal::Principal;
use crate::publish::{PublishCoordinator, PublishOutcome};
use crate::roles::RoleResolver;
use crate::types::*;
use crate::versions::{
    CloneVersion, CreateDraftVersion, TransitionOutcome, UpdateDraftVersion, VersionDiff,
    VersionService,
};

#[async_trait]
pub trait GovernanceService: Send + Sync {
    // ── Organizations and roles ───────────────────────────────

    async fn create_organization(
        &self,
        principal: &Principal,
        org_id: &str,
        name: &str,
    ) -> Result<Organization>;

    async fn get_organization(&self, principal: &Principal, org_id: &str) -> Result<Organization>;

    async fn list_members(&self, principal: &Principal, org_id: &str) -> Result<Vec<Membership>>;

    async fn my_role(&self, principal: &Principal, org_id: &str) -> Result<Role>;

    async fn set_member_role(
        &self,
        principal: &Principal,
        org_id: &str,
        user_id: &str,
        role: Role,
    ) -> Result<Membership>;

    async fn remove_member(&self, principal: &Principal, org_id: &str, user_id: &str)
        -> Result<()>;

    /// Claim the first admin seat of an org that has none.
    async fn bootstrap_first_admin(&self, principal: &Principal, org_id: &str)
        -> Result<Membership>;

    // ── Versions ──────────────────────────────────────────────

    async fn create_draft_version(
        &self,
        principal: &Principal,
        org_id: &str,
        req: CreateDraftVersion,
    ) -> Result<Version>;

    async fn clone_version(
        &self,
        principal: &Principal,
        org_id: &str,
        req: CloneVersion,
    ) -> Result<Version>;

    async fn update_draft_version(
        &self,
        principal: &Principal,
        org_id: &str,
        version_id: Uuid,
        req: UpdateDraftVersion,
    ) -> Result<Version>;

    async fn transition_version_status(
        &self,
        principal: &Principal,
        org_id: &str,
        entity_type: EntityType,
        entity_id: &str,
        version_id: Uuid,
        new_status: VersionStatus,
    ) -> Result<TransitionOutcome>;

    async fn get_version(&self, principal: &Principal, org_id: &str, version_id: Uuid)
        -> Result<Version>;

    async fn list_versions(
        &self,
        principal: &Principal,
        org_id: &str,
        entity_type: EntityType,
        entity_id: &str,
    ) -> Result<Vec<Version>>;

    async fn compare_versions(
        &self,
        principal: &Principal,
        org_id: &str,
        from: Uuid,
        to: Uuid,
    ) -> Result<VersionDiff>;

    async fn get_current_version(
        &self,
        principal: &Principal,
        org_id: &str,
        entity_type: EntityType,
        entity_id: &str,
    ) -> Result<Option<Version>>;

    // ── Change sets ───────────────────────────────────────────

    async fn create_change_set(
        &self,
        principal: &Principal,
        org_id: &str,
        req: CreateChangeSet,
    ) -> Result<ChangeSet>;

    async fn get_change_set(
        &self,
        principal: &Principal,
        org_id: &str,
        change_set_id: Uuid,
    ) -> Result<ChangeSet>;

    async fn list_change_sets(
        &self,
        principal: &Principal,
        org_id: &str,
        status: Option<ChangeSetStatus>,
    ) -> Result<Vec<ChangeSet>>;

    async fn add_change_set_item(
        &self,
        principal: &Principal,
        org_id: &str,
        change_set_id: Uuid,
        req: AddChangeSetItem,
    ) -> Result<ChangeSetItem>;

    async fn remove_change_set_item(
        &self,
        principal: &Principal,
        org_id: &str,
        change_set_id: Uuid,
        item_id: Uuid,
    ) -> Result<()>;

    async fn submit_change_set_for_review(
        &self,
        principal: &Principal,
        org_id: &str,
        change_set_id: Uuid,
    ) -> Result<SubmitOutcome>;

    async fn return_change_set_to_draft(
        &self,
        principal: &Principal,
        org_id: &str,
        change_set_id: Uuid,
        reason: Option<String>,
    ) -> Result<ChangeSet>;

    async fn add_task(
        &self,
        principal: &Principal,
        org_id: &str,
        change_set_id: Uuid,
        req: AddTask,
    ) -> Result<Task>;

    async fn resolve_task(&self, principal: &Principal, org_id: &str, task_id: Uuid)
        -> Result<Task>;

    async fn list_tasks(
        &self,
        principal: &Principal,
        org_id: &str,
        change_set_id: Uuid,
    ) -> Result<Vec<Task>>;

    // ── Review and publish ────────────────────────────────────

    async fn approve_change_set(
        &self,
        principal: &Principal,
        org_id: &str,
        change_set_id: Uuid,
        req: ApproveRequest,
    ) -> Result<ApprovalOutcome>;

    async fn reject_change_set(
        &self,
        principal: &Principal,
        org_id: &str,
        change_set_id: Uuid,
        req: RejectRequest,
    ) -> Result<ChangeSet>;

    async fn get_publish_preflight(
        &self,
        principal: &Principal,
        org_id: &str,
        change_set_id: Uuid,
    ) -> Result<PreflightReport>;

    async fn publish_change_set(
        &self,
        principal: &Principal,
        org_id: &str,
        change_set_id: Uuid,
    ) -> Result<PublishOutcome>;

    // ── Live records ──────────────────────────────────────────

    async fn delete_artifact_cascade(
        &self,
        principal: &Principal,
        org_id: &str,
        entity_type: EntityType,
        entity_id: &str,
    ) -> Result<CascadeOutcome>;

    async fn put_dependent_record(
        &self,
        principal: &Principal,
        org_id: &str,
        req: PutDependentRecord,
    ) -> Result<ArtifactRecord>;

    async fn detect_orphaned_records(
        &self,
        principal: &Principal,
        org_id: &str,
    ) -> Result<Vec<OrphanedRecord>>;

    async fn validate_coverage_integrity(
        &self,
        principal: &Principal,
        org_id: &str,
        coverage_id: &str,
    ) -> Result<CoverageIntegrityReport>;

    async fn run_comprehensive_check(
        &self,
        principal: &Principal,
        org_id: &str,
    ) -> Result<ComprehensiveReport>;

    // ── Audit ─────────────────────────────────────────────────

    async fn list_audit_entries(
        &self,
        principal: &Principal,
        org_id: &str,
        filter: AuditFilter,
    ) -> Result<Vec<AuditEntry>>;
}

pub struct GovernanceServiceImpl {
    orgs: OrganizationService,
    roles: RoleResolver,
    versions: VersionService,
    change_sets: ChangeSetManager,
    approvals: ApprovalEngine,
    preflight: PreflightValidator,
    publisher: PublishCoordinator,
    cascade: CascadeDeleteEngine,
    audit: AuditLogger,
}

impl GovernanceServiceImpl {
    /// Fails with `InvalidArgument` if the config does not validate.
    pub fn new(store: SharedStore, events: SharedEventSink, config: GovernanceConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            orgs: OrganizationService::new(store.clone()),
            roles: RoleResolver::new(store.clone(), &config),
            versions: VersionService::new(store.clone(), events.clone(), &config),
            change_sets: ChangeSetManager::new(store.clone(), events.clone()),
            approvals: ApprovalEngine::new(store.clone(), events.clone()),
            preflight: PreflightValidator::new(store.clone(), &config),
            publisher: PublishCoordinator::new(store.clone(), events.clone(), &config),
            cascade: CascadeDeleteEngine::new(store.clone(), events, &config),
            audit: AuditLogger::new(store),
        })
    }

    pub fn shared(store: SharedStore, events: SharedEventSink, config: GovernanceConfig) -> Result<Arc<dyn GovernanceService>> {
        Ok(Arc::new(Self::new(store, events, config)?))
    }
}

#[async_trait]
impl GovernanceService for GovernanceServiceImpl {
    async fn create_organization(
        &self,
        principal: &Principal,
        org_id: &str,
        name: &str,
    ) -> Result<Organization> {
        self.orgs.create_organization(principal, org_id, name).await
    }

    async fn get_organization(&self, principal: &Principal, org_id: &str) -> Result<Organization> {
        self.orgs.get_organization(principal, org_id).await
    }

    async fn list_members(&self, principal: &Principal, org_id: &str) -> Result<Vec<Membership>> {
        self.orgs.list_members(principal, org_id).await
    }

    async fn my_role(&self, principal: &Principal, org_id: &str) -> Result<Role> {
        self.orgs.my_role(principal, org_id).await
    }

    async fn set_member_role(
        &self,
        principal: &Principal,
        org_id: &str,
        user_id: &str,
        role: Role,
    ) -> Result<Membership> {
        self.orgs.set_member_role(principal, org_id, user_id, role).await
    }

    async fn remove_member(
        &self,
        principal: &Principal,
        org_id: &str,
        user_id: &str,
    ) -> Result<()> {
        self.orgs.remove_member(principal, org_id, user_id).await
    }

    async fn bootstrap_first_admin(
        &self,
        principal: &Principal,
        org_id: &str,
    ) -> Result<Membership> {
        self.roles.bootstrap_first_admin(principal, org_id).await
    }

    async fn create_draft_version(
        &self,
        principal: &Principal,
        org_id: &str,
        req: CreateDraftVersion,
    ) -> Result<Version> {
        self.versions.create_draft_version(principal, org_id, req).await
    }

    async fn clone_version(
        &self,
        principal: &Principal,
        org_id: &str,
        req: CloneVersion,
    ) -> Result<Version> {
        self.versions.clone_version(principal, org_id, req).await
    }

    async fn update_draft_version(
        &self,
        principal: &Principal,
        org_id: &str,
        version_id: Uuid,
        req: UpdateDraftVersion,
    ) -> Result<Version> {
        self.versions
            .update_draft_version(principal, org_id, version_id, req)
            .await
    }

    async fn transition_version_status(
        &self,
        principal: &Principal,
        org_id: &str,
        entity_type: EntityType,
        entity_id: &str,
        version_id: Uuid,
        new_status: VersionStatus,
    ) -> Result<TransitionOutcome> {
        self.versions
            .transition_version_status(principal, org_id, entity_type, entity_id, version_id, new_status)
            .await
    }

    async fn get_version(
        &self,
        principal: &Principal,
        org_id: &str,
        version_id: Uuid,
    ) -> Result<Version> {
        self.versions.get_version(principal, org_id, version_id).await
    }

    async fn list_versions(
        &self,
        principal: &Principal,
        org_id: &str,
        entity_type: EntityType,
        entity_id: &str,
    ) -> Result<Vec<Version>> {
        self.versions
            .list_versions(principal, org_id, entity_type, entity_id)
            .await
    }

    async fn compare_versions(
        &self,
        principal: &Principal,
        org_id: &str,
        from: Uuid,
        to: Uuid,
    ) -> Result<VersionDiff> {
        self.versions.compare_versions(principal, org_id, from, to).await
    }

    async fn get_current_version(
        &self,
        principal: &Principal,
        org_id: &str,
        entity_type: EntityType,
        entity_id: &str,
    ) -> Result<Option<Version>> {
        self.versions
            .get_current_version(principal, org_id, entity_type, entity_id)
            .await
    }

    async fn create_change_set(
        &self,
        principal: &Principal,
        org_id: &str,
        req: CreateChangeSet,
    ) -> Result<ChangeSet> {
        self.change_sets.create_change_set(principal, org_id, req).await
    }

    async fn get_change_set(
        &self,
        principal: &Principal,
        org_id: &str,
        change_set_id: Uuid,
    ) -> Result<ChangeSet> {
        self.change_sets
            .get_change_set(principal, org_id, change_set_id)
            .await
    }

    async fn list_change_sets(
        &self,
        principal: &Principal,
        org_id: &str,
        status: Option<ChangeSetStatus>,
    ) -> Result<Vec<ChangeSet>> {
        self.change_sets.list_change_sets(principal, org_id, status).await
    }

    async fn add_change_set_item(
        &self,
        principal: &Principal,
        org_id: &str,
        change_set_id: Uuid,
        req: AddChangeSetItem,
    ) -> Result<ChangeSetItem> {
        self.change_sets
            .add_change_set_item(principal, org_id, change_set_id, req)
            .await
    }

    async fn remove_change_set_item(
        &self,
        principal: &Principal,
        org_id: &str,
        change_set_id: Uuid,
        item_id: Uuid,
    ) -> Result<()> {
        self.change_sets
            .remove_change_set_item(principal, org_id, change_set_id, item_id)
            .await
    }

    async fn submit_change_set_for_review(
        &self,
        principal: &Principal,
        org_id: &str,
        change_set_id: Uuid,
    ) -> Result<SubmitOutcome> {
        self.change_sets
            .submit_for_review(principal, org_id, change_set_id)
            .await
    }

    async fn return_change_set_to_draft(
        &self,
        principal: &Principal,
        org_id: &str,
        change_set_id: Uuid,
        reason: Option<String>,
    ) -> Result<ChangeSet> {
        self.change_sets
            .return_to_draft(principal, org_id, change_set_id, reason)
            .await
    }

    async fn add_task(
        &self,
        principal: &Principal,
        org_id: &str,
        change_set_id: Uuid,
        req: AddTask,
    ) -> Result<Task> {
        self.change_sets
            .add_task(principal, org_id, change_set_id, req)
            .await
    }

    async fn resolve_task(
        &self,
        principal: &Principal,
        org_id: &str,
        task_id: Uuid,
    ) -> Result<Task> {
        self.change_sets.resolve_task(principal, org_id, task_id).await
    }

    async fn list_tasks(
        &self,
        principal: &Principal,
        org_id: &str,
        change_set_id: Uuid,
    ) -> Result<Vec<Task>> {
        self.change_sets
            .list_tasks(principal, org_id, change_set_id)
            .await
    }

    async fn approve_change_set(
        &self,
        principal: &Principal,
        org_id: &str,
        change_set_id: Uuid,
        req: ApproveRequest,
    ) -> Result<ApprovalOutcome> {
        self.approvals
            .approve_change_set(principal, org_id, change_set_id, req)
            .await
    }

    async fn reject_change_set(
        &self,
        principal: &Principal,
        org_id: &str,
        change_set_id: Uuid,
        req: RejectRequest,
    ) -> Result<ChangeSet> {
        self.approvals
            .reject_change_set(principal, org_id, change_set_id, req)
            .await
    }

    async fn get_publish_preflight(
        &self,
        principal: &Principal,
        org_id: &str,
        change_set_id: Uuid,
    ) -> Result<PreflightReport> {
        self.preflight
            .get_publish_preflight(principal, org_id, change_set_id)
            .await
    }

    async fn publish_change_set(
        &self,
        principal: &Principal,
        org_id: &str,
        change_set_id: Uuid,
    ) -> Result<PublishOutcome> {
        self.publisher
            .publish_change_set(principal, org_id, change_set_id)
            .await
    }

    async fn delete_artifact_cascade(
        &self,
        principal: &Principal,
        org_id: &str,
        entity_type: EntityType,
        entity_id: &str,
    ) -> Result<CascadeOutcome> {
        self.cascade
            .delete_artifact_cascade(principal, org_id, entity_type, entity_id)
            .await
    }

    async fn put_dependent_record(
        &self,
        principal: &Principal,
        org_id: &str,
        req: PutDependentRecord,
    ) -> Result<ArtifactRecord> {
        self.cascade.put_dependent_record(principal, org_id, req).await
    }

    async fn detect_orphaned_records(
        &self,
        principal: &Principal,
        org_id: &str,
    ) -> Result<Vec<OrphanedRecord>> {
        self.cascade.detect_orphaned_records(principal, org_id).await
    }

    async fn validate_coverage_integrity(
        &self,
        principal: &Principal,
        org_id: &str,
        coverage_id: &str,
    ) -> Result<CoverageIntegrityReport> {
        self.cascade
            .validate_coverage_integrity(principal, org_id, coverage_id)
            .await
    }

    async fn run_comprehensive_check(
        &self,
        principal: &Principal,
        org_id: &str,
    ) -> Result<ComprehensiveReport> {
        self.cascade.run_comprehensive_check(principal, org_id).await
    }

    async fn list_audit_entries(
        &self,
        principal: &Principal,
        org_id: &str,
        filter: AuditFilter,
    ) -> Result<Vec<AuditEntry>> {
        self.audit.list(principal, org_id, &filter).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GovernanceError;
    use crate::events::NoopEventSink;
    use crate::memory::MemoryStore;

    #[test]
    fn invalid_config_is_rejected() {
        let config = GovernanceConfig {
            max_publish_items: 0,
            ..Default::default()
        };
        let result = GovernanceServiceImpl::new(
            Arc::new(MemoryStore::new()),
            Arc::new(NoopEventSink),
            config,
        );
        assert!(matches!(result, Err(GovernanceError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn facade_routes_to_components() {
        let store = Arc::new(MemoryStore::new());
        let service =
            GovernanceServiceImpl::shared(store, Arc::new(NoopEventSink), GovernanceConfig::default())
                .unwrap();
        let ops = Principal::global_admin("ops");
        service.create_organization(&ops, "acme", "Acme").await.unwrap();
        assert_eq!(service.my_role(&ops, "acme").await.unwrap(), Role::Admin);
        let entries = service
            .list_audit_entries(&ops, "acme", AuditFilter::default())
            .await
            .unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].action, AuditAction::OrganizationCreated);
    }
}
