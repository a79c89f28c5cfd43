//! Read-only publish preflight.
//!
//! Reports every failing condition, never only the first, so a caller can fix
//! everything before retrying.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::{publish_write_bound, GovernanceConfig};
use crate::error::{IssueCode, PreflightIssue};
use crate::ports::{load_change_set, Result, SharedStore};
use crate::principal::Principal;
use crate::roles::resolve_role;
use crate::telemetry;
use crate::types::*;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreflightReport {
    pub change_set_id: Uuid,
    pub can_publish: bool,
    pub issues: Vec<PreflightIssue>,
}

pub struct PreflightValidator {
    store: SharedStore,
    max_publish_items: usize,
    store_batch_limit: usize,
}

impl PreflightValidator {
    pub fn new(store: SharedStore, config: &GovernanceConfig) -> Self {
        Self {
            store,
            max_publish_items: config.max_publish_items,
            store_batch_limit: config.store_batch_limit,
        }
    }

    pub async fn get_publish_preflight(
        &self,
        principal: &Principal,
        org_id: &str,
        change_set_id: Uuid,
    ) -> Result<PreflightReport> {
        resolve_role(&*self.store, principal, org_id, Role::Viewer).await?;
        let cs = load_change_set(&*self.store, org_id, change_set_id).await?;
        let issues = self.evaluate(&cs).await?;
        Ok(PreflightReport {
            change_set_id,
            can_publish: issues.is_empty(),
            issues,
        })
    }

    /// All checks against one loaded change set. No authorization, no writes.
    pub async fn evaluate(&self, cs: &ChangeSet) -> Result<Vec<PreflightIssue>> {
        let mut issues = Vec::new();

        for task in self.store.list_tasks(&cs.org_id, cs.change_set_id).await? {
            if task.is_open_blocker() {
                issues.push(PreflightIssue::new(
                    IssueCode::TaskBlocker,
                    format!("blocking task open: {} ({})", task.title, task.task_id),
                ));
            }
        }

        if cs.status != ChangeSetStatus::Approved {
            let pending: Vec<&str> = cs.pending_roles().iter().map(|r| r.as_str()).collect();
            let detail = if pending.is_empty() {
                String::new()
            } else {
                format!("; pending: {}", pending.join(", "))
            };
            issues.push(PreflightIssue::new(
                IssueCode::ApprovalIncomplete,
                format!("change set is {}, must be approved{detail}", cs.status),
            ));
        }

        if cs.items.is_empty() {
            issues.push(PreflightIssue::new(
                IssueCode::EmptyChangeSet,
                "change set has no items",
            ));
        }

        if cs.items.len() > self.max_publish_items {
            issues.push(PreflightIssue::new(
                IssueCode::BatchSizeExceeded,
                format!(
                    "{} items exceeds the publish limit of {}",
                    cs.items.len(),
                    self.max_publish_items
                ),
            ));
        }

        // The whole plan must fit one commit; publish never splits it.
        let write_limit = self.store_batch_limit.min(self.store.max_batch_writes());
        let planned = publish_write_bound(cs.items.len());
        if planned > write_limit {
            issues.push(PreflightIssue::new(
                IssueCode::BatchWriteLimitExceeded,
                format!(
                    "publishing {} items plans {planned} writes; one commit holds {write_limit}",
                    cs.items.len()
                ),
            ));
        }

        for item in &cs.items {
            let Some(version) = self.store.get_version(&cs.org_id, item.version_id).await? else {
                issues.push(PreflightIssue::for_item(
                    IssueCode::VersionMissing,
                    item.item_id,
                    format!("version {} does not exist", item.version_id),
                ));
                continue;
            };
            if !version.belongs_to(item.entity_type, &item.entity_id) {
                issues.push(PreflightIssue::for_item(
                    IssueCode::VersionEntityMismatch,
                    item.item_id,
                    format!(
                        "version {} belongs to {}/{}, item names {}/{}",
                        version.version_id,
                        version.entity_type,
                        version.entity_id,
                        item.entity_type,
                        item.entity_id
                    ),
                ));
            }
            if !is_publishable(item.action, version.status) {
                issues.push(PreflightIssue::for_item(
                    IssueCode::VersionNotPublishable,
                    item.item_id,
                    format!(
                        "version {} is {}; {} needs approved{}",
                        version.version_id,
                        version.status,
                        item.action.as_str(),
                        if item.action == ItemAction::Delete { " or draft" } else { "" }
                    ),
                ));
            }
        }

        telemetry::emit_preflight(cs.change_set_id, &issues);
        Ok(issues)
    }
}

pub fn is_publishable(action: ItemAction, status: VersionStatus) -> bool {
    match action {
        ItemAction::Create | ItemAction::Update => status == VersionStatus::Approved,
        ItemAction::Delete => matches!(status, VersionStatus::Approved | VersionStatus::Draft),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;

    use super::*;
    use crate::memory::MemoryStore;
    use crate::ports::{CommitStore, WriteBatch, WriteOp};

    fn version(entity_id: &str, status: VersionStatus) -> Version {
        let now = Utc::now();
        Version {
            version_id: Uuid::new_v4(),
            org_id: "org".into(),
            entity_type: EntityType::Coverage,
            entity_id: entity_id.into(),
            parent_id: None,
            version_number: 1,
            status,
            data: serde_json::json!({}),
            summary: None,
            created_by: "u".into(),
            created_at: now,
            updated_at: now,
            parent_version_id: None,
            published_at: None,
        }
    }

    fn item_for(v: &Version, action: ItemAction) -> ChangeSetItem {
        ChangeSetItem {
            item_id: Uuid::new_v4(),
            entity_type: v.entity_type,
            entity_id: v.entity_id.clone(),
            version_id: v.version_id,
            action,
            added_by: "u".into(),
            added_at: Utc::now(),
        }
    }

    fn change_set(status: ChangeSetStatus, items: Vec<ChangeSetItem>) -> ChangeSet {
        let now = Utc::now();
        ChangeSet {
            change_set_id: Uuid::new_v4(),
            org_id: "org".into(),
            owner_user_id: "owner".into(),
            name: "cs".into(),
            description: None,
            status,
            items,
            approvals: vec![],
            required_roles: vec![Role::Actuary],
            revision: 1,
            created_at: now,
            updated_at: now,
            submitted_at: None,
            published_at: None,
            published_by: None,
        }
    }

    async fn seed(store: &MemoryStore, versions: &[Version], tasks: Vec<Task>) {
        let mut batch = WriteBatch::new();
        for v in versions {
            batch.push(WriteOp::PutVersion(v.clone()));
        }
        for t in tasks {
            batch.push(WriteOp::PutTask(t));
        }
        store.commit(batch).await.unwrap();
    }

    fn validator(store: Arc<MemoryStore>, max: usize) -> PreflightValidator {
        let config = GovernanceConfig {
            max_publish_items: max,
            ..Default::default()
        };
        PreflightValidator::new(store, &config)
    }

    #[tokio::test]
    async fn clean_approved_set_passes() {
        let store = Arc::new(MemoryStore::new());
        let v = version("c1", VersionStatus::Approved);
        seed(&store, &[v.clone()], vec![]).await;
        let cs = change_set(ChangeSetStatus::Approved, vec![item_for(&v, ItemAction::Update)]);
        assert!(validator(store, 450).evaluate(&cs).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn every_failing_check_is_reported() {
        let store = Arc::new(MemoryStore::new());
        let draft = version("c1", VersionStatus::Draft);
        let mismatched = version("c2", VersionStatus::Approved);
        let ghost = version("c3", VersionStatus::Approved);
        seed(&store, &[draft.clone(), mismatched.clone()], vec![]).await;

        let mut items = vec![
            item_for(&draft, ItemAction::Update),
            item_for(&mismatched, ItemAction::Update),
            item_for(&ghost, ItemAction::Create),
        ];
        items[1].entity_id = "c2-renamed".into();
        let cs = change_set(ChangeSetStatus::ReadyForReview, items);

        let blocker = Task {
            task_id: Uuid::new_v4(),
            org_id: "org".into(),
            change_set_id: cs.change_set_id,
            kind: TaskKind::Manual,
            title: "legal".into(),
            blocking: true,
            status: TaskStatus::Open,
            created_by: "u".into(),
            created_at: Utc::now(),
            resolved_by: None,
            resolved_at: None,
        };
        seed(&store, &[], vec![blocker]).await;

        let issues = validator(store, 2).evaluate(&cs).await.unwrap();
        let codes: Vec<IssueCode> = issues.iter().map(|i| i.code).collect();
        assert_eq!(
            codes,
            vec![
                IssueCode::TaskBlocker,
                IssueCode::ApprovalIncomplete,
                IssueCode::BatchSizeExceeded,
                IssueCode::VersionNotPublishable,
                IssueCode::VersionEntityMismatch,
                IssueCode::VersionMissing,
            ]
        );
        assert!(issues[1].message.contains("actuary"));
        assert!(issues[3].item_id.is_some());
    }

    #[tokio::test]
    async fn plan_larger_than_one_commit_is_reported() {
        // 4 items plan 10 writes; the store commits at most 9.
        let store = Arc::new(MemoryStore::with_max_batch_writes(9));
        let versions: Vec<Version> = (0..4)
            .map(|i| version(&format!("c{i}"), VersionStatus::Approved))
            .collect();
        seed(&store, &versions, vec![]).await;
        let items = versions.iter().map(|v| item_for(v, ItemAction::Update)).collect();
        let cs = change_set(ChangeSetStatus::Approved, items);

        let issues = validator(store.clone(), 450).evaluate(&cs).await.unwrap();
        let codes: Vec<IssueCode> = issues.iter().map(|i| i.code).collect();
        assert_eq!(codes, vec![IssueCode::BatchWriteLimitExceeded]);
        assert!(issues[0].message.contains("10 writes"));

        let roomy = Arc::new(MemoryStore::with_max_batch_writes(10));
        seed(&roomy, &versions, vec![]).await;
        assert!(validator(roomy, 450).evaluate(&cs).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_items_accept_drafts() {
        let store = Arc::new(MemoryStore::new());
        let v = version("c1", VersionStatus::Draft);
        seed(&store, &[v.clone()], vec![]).await;
        let cs = change_set(ChangeSetStatus::Approved, vec![item_for(&v, ItemAction::Delete)]);
        assert!(validator(store, 450).evaluate(&cs).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_set_is_reported() {
        let store = Arc::new(MemoryStore::new());
        let cs = change_set(ChangeSetStatus::Approved, vec![]);
        let issues = validator(store, 450).evaluate(&cs).await.unwrap();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].code, IssueCode::EmptyChangeSet);
    }

    #[test]
    fn publishability_by_action() {
        assert!(is_publishable(ItemAction::Update, VersionStatus::Approved));
        assert!(!is_publishable(ItemAction::Create, VersionStatus::Draft));
        assert!(is_publishable(ItemAction::Delete, VersionStatus::Draft));
        assert!(!is_publishable(ItemAction::Delete, VersionStatus::PendingReview));
    }
}
