//! Storage port traits for the governance workflow.
//! Implemented by `memory::MemoryStore` and artifact_gov_postgres; core
//! logic depends only on these traits.
//!
//! Reads go through the per-concern stores. Every mutation goes through
//! [`CommitStore::commit`]: a [`WriteBatch`] of preconditions plus writes that
//! the store applies atomically, or not at all.

use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::GovernanceError;
use crate::types::*;

pub type Result<T> = std::result::Result<T, GovernanceError>;

// ── Read ports ────────────────────────────────────────────────

#[async_trait]
pub trait OrgStore: Send + Sync {
    async fn get_organization(&self, org_id: &str) -> Result<Option<Organization>>;

    async fn get_membership(&self, org_id: &str, user_id: &str) -> Result<Option<Membership>>;

    /// Memberships of one org, ordered by user id.
    async fn list_memberships(&self, org_id: &str) -> Result<Vec<Membership>>;

    async fn is_bootstrap_claimed(&self, org_id: &str) -> Result<bool>;
}

#[async_trait]
pub trait VersionStore: Send + Sync {
    async fn get_version(&self, org_id: &str, version_id: Uuid) -> Result<Option<Version>>;

    /// All versions of one entity, newest (highest number) first.
    async fn list_versions(
        &self,
        org_id: &str,
        entity_type: EntityType,
        entity_id: &str,
    ) -> Result<Vec<Version>>;

    /// Highest version number ever issued for the entity; 0 when none.
    async fn read_version_counter(
        &self,
        org_id: &str,
        entity_type: EntityType,
        entity_id: &str,
    ) -> Result<u64>;
}

#[async_trait]
pub trait ChangeSetStore: Send + Sync {
    async fn get_change_set(&self, org_id: &str, change_set_id: Uuid) -> Result<Option<ChangeSet>>;

    /// Change sets of one org, newest first.
    async fn list_change_sets(
        &self,
        org_id: &str,
        status: Option<ChangeSetStatus>,
    ) -> Result<Vec<ChangeSet>>;

    async fn get_task(&self, org_id: &str, task_id: Uuid) -> Result<Option<Task>>;

    /// Tasks referencing one change set, oldest first.
    async fn list_tasks(&self, org_id: &str, change_set_id: Uuid) -> Result<Vec<Task>>;
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn get_record(&self, org_id: &str, key: &RecordKey) -> Result<Option<ArtifactRecord>>;

    async fn list_records(&self, org_id: &str, collection: Collection)
        -> Result<Vec<ArtifactRecord>>;

    /// Records naming `owner` among their owners.
    async fn list_dependents(&self, org_id: &str, owner: &RecordKey)
        -> Result<Vec<ArtifactRecord>>;
}

#[async_trait]
pub trait AuditStore: Send + Sync {
    /// Entries of one org matching the filter, newest first.
    async fn list_audit(&self, org_id: &str, filter: &AuditFilter) -> Result<Vec<AuditEntry>>;
}

// ── Atomic commit ─────────────────────────────────────────────

/// What a record must look like for a batch to apply.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordExpectation {
    Absent,
    /// Present and pointing at this version (None for dependent rows).
    Present { current_version_id: Option<Uuid> },
}

/// Checked inside the commit before any write; a failing precondition
/// aborts the whole batch with `Conflict`.
#[derive(Debug, Clone, PartialEq)]
pub enum Precondition {
    VersionStatusIs {
        org_id: String,
        version_id: Uuid,
        status: VersionStatus,
    },
    VersionCounterIs {
        org_id: String,
        entity_type: EntityType,
        entity_id: String,
        expected: u64,
    },
    /// Expected revision of a change set; 0 means the change set must not exist.
    ChangeSetRevision {
        org_id: String,
        change_set_id: Uuid,
        expected: u64,
    },
    RecordIs {
        org_id: String,
        key: RecordKey,
        expect: RecordExpectation,
    },
    BootstrapUnclaimed { org_id: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    PutOrganization(Organization),
    PutMembership(Membership),
    DeleteMembership { org_id: String, user_id: String },
    ClaimBootstrap { org_id: String, user_id: String },
    SetVersionCounter {
        org_id: String,
        entity_type: EntityType,
        entity_id: String,
        value: u64,
    },
    PutVersion(Version),
    PutChangeSet(ChangeSet),
    PutTask(Task),
    PutRecord(ArtifactRecord),
    DeleteRecord { org_id: String, key: RecordKey },
    /// Append-only; an existing entry id fails the batch.
    AppendAudit(AuditEntry),
}

impl WriteOp {
    pub fn label(&self) -> &'static str {
        match self {
            Self::PutOrganization(_) => "put_organization",
            Self::PutMembership(_) => "put_membership",
            Self::DeleteMembership { .. } => "delete_membership",
            Self::ClaimBootstrap { .. } => "claim_bootstrap",
            Self::SetVersionCounter { .. } => "set_version_counter",
            Self::PutVersion(_) => "put_version",
            Self::PutChangeSet(_) => "put_change_set",
            Self::PutTask(_) => "put_task",
            Self::PutRecord(_) => "put_record",
            Self::DeleteRecord { .. } => "delete_record",
            Self::AppendAudit(_) => "append_audit",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    pub preconditions: Vec<Precondition>,
    pub ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn require(&mut self, precondition: Precondition) -> &mut Self {
        self.preconditions.push(precondition);
        self
    }

    pub fn push(&mut self, op: WriteOp) -> &mut Self {
        self.ops.push(op);
        self
    }

    pub fn extend(&mut self, other: WriteBatch) -> &mut Self {
        self.preconditions.extend(other.preconditions);
        self.ops.extend(other.ops);
        self
    }

    /// Number of document writes; preconditions do not count.
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

#[async_trait]
pub trait CommitStore: Send + Sync {
    /// Largest number of writes a single `commit` accepts.
    fn max_batch_writes(&self) -> usize;

    /// Check every precondition, then apply every write, atomically.
    /// Precondition failure → `Conflict`; oversize batch → `InvalidArgument`.
    async fn commit(&self, batch: WriteBatch) -> Result<()>;
}

/// Everything the governance components need from storage.
pub trait DocumentStore:
    OrgStore + VersionStore + ChangeSetStore + RecordStore + AuditStore + CommitStore
{
}

impl<T> DocumentStore for T where
    T: OrgStore + VersionStore + ChangeSetStore + RecordStore + AuditStore + CommitStore
{
}

pub type SharedStore = Arc<dyn DocumentStore>;

// ── Helpers used by the components ────────────────────────────

pub(crate) async fn load_change_set(
    store: &dyn DocumentStore,
    org_id: &str,
    change_set_id: Uuid,
) -> Result<ChangeSet> {
    store
        .get_change_set(org_id, change_set_id)
        .await?
        .ok_or_else(|| GovernanceError::NotFound(format!("change set {change_set_id}")))
}

pub(crate) async fn load_version(
    store: &dyn DocumentStore,
    org_id: &str,
    version_id: Uuid,
) -> Result<Version> {
    store
        .get_version(org_id, version_id)
        .await?
        .ok_or_else(|| GovernanceError::NotFound(format!("version {version_id}")))
}

pub(crate) fn expect_revision(cs: &ChangeSet) -> Precondition {
    Precondition::ChangeSetRevision {
        org_id: cs.org_id.clone(),
        change_set_id: cs.change_set_id,
        expected: cs.revision,
    }
}

pub(crate) fn expect_version_status(v: &Version) -> Precondition {
    Precondition::VersionStatusIs {
        org_id: v.org_id.clone(),
        version_id: v.version_id,
        status: v.status,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_len_counts_writes_only() {
        let mut batch = WriteBatch::new();
        batch.require(Precondition::BootstrapUnclaimed {
            org_id: "org".into(),
        });
        assert!(batch.is_empty());
        batch.push(WriteOp::DeleteMembership {
            org_id: "org".into(),
            user_id: "u".into(),
        });
        assert_eq!(batch.len(), 1);
        assert_eq!(batch.preconditions.len(), 1);
    }

    #[test]
    fn extend_merges_both_halves() {
        let mut a = WriteBatch::new();
        a.push(WriteOp::DeleteRecord {
            org_id: "o".into(),
            key: RecordKey::new(Collection::Forms, "f"),
        });
        let mut b = WriteBatch::new();
        b.require(Precondition::BootstrapUnclaimed { org_id: "o".into() });
        b.push(WriteOp::ClaimBootstrap {
            org_id: "o".into(),
            user_id: "u".into(),
        });
        a.extend(b);
        assert_eq!(a.len(), 2);
        assert_eq!(a.preconditions.len(), 1);
        assert_eq!(a.ops[1].label(), "claim_bootstrap");
    }
}
