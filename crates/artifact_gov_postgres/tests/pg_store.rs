//! Adapter tests against a live database.
//!
//!     DATABASE_URL=postgres://... cargo test -p artifact_gov_postgres -- --ignored

use std::sync::Arc;

use artifact_gov_core::changesets::{AddChangeSetItem, CreateChangeSet};
use artifact_gov_core::approval::ApproveRequest;
use artifact_gov_core::events::NoopEventSink;
use artifact_gov_core::ports::{
    CommitStore, Precondition, RecordExpectation, RecordStore, WriteBatch, WriteOp,
};
use artifact_gov_core::service::{GovernanceService, GovernanceServiceImpl};
use artifact_gov_core::types::*;
use artifact_gov_core::versions::CreateDraftVersion;
use artifact_gov_core::{GovernanceConfig, GovernanceError, Principal};
use artifact_gov_postgres::PgDocumentStore;
use sqlx::PgPool;
use uuid::Uuid;

async fn store() -> Arc<PgDocumentStore> {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let pool = PgPool::connect(&url).await.expect("connect");
    artifact_gov_postgres::migrate(&pool).await.expect("migrate");
    Arc::new(PgDocumentStore::new(pool))
}

/// A fresh org per test run so reruns never collide.
async fn org(gov: &Arc<dyn GovernanceService>) -> String {
    let org_id = format!("pg-{}", Uuid::new_v4().simple());
    let ops = Principal::global_admin("ops");
    gov.create_organization(&ops, &org_id, "Pg Test").await.unwrap();
    gov.set_member_role(&ops, &org_id, "owner", Role::Underwriter).await.unwrap();
    org_id
}

#[tokio::test]
#[ignore]
async fn publish_round_trip() {
    let store = store().await;
    let gov = GovernanceServiceImpl::shared(store.clone(), Arc::new(NoopEventSink), GovernanceConfig::default())
        .unwrap();
    let org_id = org(&gov).await;
    let owner = Principal::in_process("owner");
    let ops = Principal::global_admin("ops");

    let v = gov
        .create_draft_version(
            &owner,
            &org_id,
            CreateDraftVersion {
                entity_type: EntityType::Coverage,
                entity_id: "C".into(),
                parent_id: None,
                data: Some(serde_json::json!({"limit": 5})),
                summary: None,
            },
        )
        .await
        .unwrap();
    let cs = gov
        .create_change_set(&owner, &org_id, CreateChangeSet { name: "pg".into(), description: None })
        .await
        .unwrap();
    gov.add_change_set_item(
        &owner,
        &org_id,
        cs.change_set_id,
        AddChangeSetItem {
            entity_type: EntityType::Coverage,
            entity_id: "C".into(),
            version_id: v.version_id,
            action: ItemAction::Create,
        },
    )
    .await
    .unwrap();
    gov.submit_change_set_for_review(&owner, &org_id, cs.change_set_id).await.unwrap();
    gov.approve_change_set(&ops, &org_id, cs.change_set_id, ApproveRequest { role: Role::Actuary, notes: None })
        .await
        .unwrap();
    let outcome = gov.publish_change_set(&ops, &org_id, cs.change_set_id).await.unwrap();
    assert_eq!(outcome.published_count, 1);

    let record = store
        .get_record(&org_id, &RecordKey::entity(EntityType::Coverage, "C"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.current_version_id, Some(v.version_id));

    let trail = gov
        .list_audit_entries(&ops, &org_id, AuditFilter::default())
        .await
        .unwrap();
    assert_eq!(trail[0].action, AuditAction::ChangeSetPublished);
}

#[tokio::test]
#[ignore]
async fn stale_precondition_rolls_back_whole_batch() {
    let store = store().await;
    let gov = GovernanceServiceImpl::shared(store.clone(), Arc::new(NoopEventSink), GovernanceConfig::default())
        .unwrap();
    let org_id = org(&gov).await;
    let key = RecordKey::new(Collection::Products, "P");

    let record = ArtifactRecord {
        org_id: org_id.clone(),
        key: key.clone(),
        owners: vec![],
        data: serde_json::json!({}),
        current_version_id: None,
        current_version_number: None,
        updated_by: "test".into(),
        updated_at: chrono::Utc::now(),
    };
    let mut batch = WriteBatch::new();
    batch.push(WriteOp::PutRecord(record.clone()));
    // Expects the record to exist already: it does not.
    batch.require(Precondition::RecordIs {
        org_id: org_id.clone(),
        key: key.clone(),
        expect: RecordExpectation::Present { current_version_id: None },
    });
    let err = store.commit(batch).await.unwrap_err();
    assert!(matches!(err, GovernanceError::Conflict(_)));
    assert!(store.get_record(&org_id, &key).await.unwrap().is_none());
}

#[tokio::test]
#[ignore]
async fn concurrent_drafts_get_distinct_numbers() {
    let store = store().await;
    let gov = GovernanceServiceImpl::shared(store, Arc::new(NoopEventSink), GovernanceConfig::default())
        .unwrap();
    let org_id = org(&gov).await;

    let mut handles = Vec::new();
    for _ in 0..6 {
        let gov = gov.clone();
        let org_id = org_id.clone();
        handles.push(tokio::spawn(async move {
            gov.create_draft_version(
                &Principal::in_process("owner"),
                &org_id,
                CreateDraftVersion {
                    entity_type: EntityType::Form,
                    entity_id: "F".into(),
                    parent_id: None,
                    data: None,
                    summary: None,
                },
            )
            .await
        }));
    }
    let mut numbers = Vec::new();
    for handle in handles {
        // Exhausted retries surface as Conflict; every success is unique.
        if let Ok(v) = handle.await.unwrap() {
            numbers.push(v.version_number);
        }
    }
    let mut unique = numbers.clone();
    unique.sort();
    unique.dedup();
    assert_eq!(unique.len(), numbers.len());
    assert!(!numbers.is_empty());
}

#[tokio::test]
#[ignore]
async fn overlapping_batches_in_opposite_order_both_commit() {
    let store = store().await;
    let org_id = format!("pg-{}", Uuid::new_v4().simple());

    let batch = |first: Uuid, second: Uuid, record_id: String| {
        let mut batch = WriteBatch::new();
        // Unknown change sets read as revision 0, so both preconditions hold.
        for change_set_id in [first, second] {
            batch.require(Precondition::ChangeSetRevision {
                org_id: org_id.clone(),
                change_set_id,
                expected: 0,
            });
        }
        batch.push(WriteOp::PutRecord(ArtifactRecord {
            org_id: org_id.clone(),
            key: RecordKey::new(Collection::Products, &record_id),
            owners: vec![],
            data: serde_json::json!({}),
            current_version_id: None,
            current_version_number: None,
            updated_by: "test".into(),
            updated_at: chrono::Utc::now(),
        }));
        batch
    };

    for round in 0..20 {
        let x = Uuid::new_v4();
        let y = Uuid::new_v4();
        let (left, right) = tokio::join!(
            store.commit(batch(x, y, format!("L{round}"))),
            store.commit(batch(y, x, format!("R{round}"))),
        );
        left.unwrap();
        right.unwrap();
    }
}
