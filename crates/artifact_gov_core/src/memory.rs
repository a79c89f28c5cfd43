//! In-memory implementation of every storage port.
//!
//! Backs the unit and scenario suites and the server when no database URL is
//! configured. `commit` validates all preconditions under one write lock and
//! only then applies the writes, so a batch is all-or-nothing.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::error::GovernanceError;
use crate::ports::*;
use crate::types::*;

type CounterKey = (String, EntityType, String);

#[derive(Default)]
struct State {
    orgs: HashMap<String, Organization>,
    memberships: BTreeMap<(String, String), Membership>,
    bootstrap_claims: HashMap<String, String>,
    versions: HashMap<(String, Uuid), Version>,
    counters: HashMap<CounterKey, u64>,
    change_sets: HashMap<(String, Uuid), ChangeSet>,
    tasks: HashMap<(String, Uuid), Task>,
    records: BTreeMap<(String, RecordKey), ArtifactRecord>,
    audit: Vec<AuditEntry>,
    audit_ids: HashSet<Uuid>,
    faults: Option<FaultPlan>,
    rival_counter_bumps: usize,
    commits: usize,
}

/// Injected commit failures: let `skip` commits through, then fail `failures`.
#[derive(Debug, Clone, Copy)]
struct FaultPlan {
    skip: usize,
    failures: usize,
}

pub struct MemoryStore {
    state: RwLock<State>,
    max_batch_writes: usize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// No commit ceiling of its own; `GovernanceConfig::store_batch_limit`
    /// bounds every batch the workflow builds.
    pub fn new() -> Self {
        Self::with_max_batch_writes(usize::MAX)
    }

    pub fn with_max_batch_writes(max_batch_writes: usize) -> Self {
        Self {
            state: RwLock::new(State::default()),
            max_batch_writes,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    // ── Test seams ────────────────────────────────────────────

    /// After `n` more successful commits, fail exactly one.
    pub fn fail_commit_after(&self, n: usize) {
        self.write().faults = Some(FaultPlan {
            skip: n,
            failures: 1,
        });
    }

    /// After `n` more successful commits, fail every later commit.
    pub fn fail_all_commits_after(&self, n: usize) {
        self.write().faults = Some(FaultPlan {
            skip: n,
            failures: usize::MAX,
        });
    }

    pub fn clear_faults(&self) {
        self.write().faults = None;
    }

    /// The next `n` commits guarded by a version counter find it already
    /// advanced by another writer.
    pub fn contend_version_counters(&self, n: usize) {
        self.write().rival_counter_bumps = n;
    }

    /// Successful commits so far.
    pub fn commit_count(&self) -> usize {
        self.read().commits
    }

    pub fn seed_organization(&self, org_id: &str, name: &str, created_by: &str) {
        self.write().orgs.insert(
            org_id.to_string(),
            Organization {
                org_id: org_id.to_string(),
                name: name.to_string(),
                created_by: created_by.to_string(),
                created_at: Utc::now(),
            },
        );
    }

    pub fn seed_member(&self, org_id: &str, user_id: &str, role: Role) {
        self.write().memberships.insert(
            (org_id.to_string(), user_id.to_string()),
            Membership {
                org_id: org_id.to_string(),
                user_id: user_id.to_string(),
                role,
                granted_by: "seed".to_string(),
                granted_at: Utc::now(),
            },
        );
    }

    pub fn seed_record(&self, record: ArtifactRecord) {
        self.write()
            .records
            .insert((record.org_id.clone(), record.key.clone()), record);
    }

    pub fn audit_len(&self) -> usize {
        self.read().audit.len()
    }

    pub fn record_count(&self, org_id: &str) -> usize {
        self.read()
            .records
            .keys()
            .filter(|(org, _)| org == org_id)
            .count()
    }
}

// ── Commit ────────────────────────────────────────────────────

fn conflict(msg: String) -> GovernanceError {
    GovernanceError::Conflict(msg)
}

impl State {
    fn check(&self, pre: &Precondition) -> Result<()> {
        match pre {
            Precondition::VersionStatusIs {
                org_id,
                version_id,
                status,
            } => match self.versions.get(&(org_id.clone(), *version_id)) {
                Some(v) if v.status == *status => Ok(()),
                Some(v) => Err(conflict(format!(
                    "version {version_id} is {}, expected {status}",
                    v.status
                ))),
                None => Err(conflict(format!("version {version_id} no longer exists"))),
            },
            Precondition::VersionCounterIs {
                org_id,
                entity_type,
                entity_id,
                expected,
            } => {
                let key = (org_id.clone(), *entity_type, entity_id.clone());
                let current = self.counters.get(&key).copied().unwrap_or(0);
                if current == *expected {
                    Ok(())
                } else {
                    Err(conflict(format!(
                        "version counter for {entity_type}/{entity_id} moved to {current}"
                    )))
                }
            }
            Precondition::ChangeSetRevision {
                org_id,
                change_set_id,
                expected,
            } => {
                let current = self
                    .change_sets
                    .get(&(org_id.clone(), *change_set_id))
                    .map(|cs| cs.revision)
                    .unwrap_or(0);
                if current == *expected {
                    Ok(())
                } else {
                    Err(conflict(format!(
                        "change set {change_set_id} revision is {current}, expected {expected}"
                    )))
                }
            }
            Precondition::RecordIs {
                org_id,
                key,
                expect,
            } => {
                let current = self.records.get(&(org_id.clone(), key.clone()));
                let ok = match (expect, current) {
                    (RecordExpectation::Absent, None) => true,
                    (
                        RecordExpectation::Present { current_version_id },
                        Some(record),
                    ) => record.current_version_id == *current_version_id,
                    _ => false,
                };
                if ok {
                    Ok(())
                } else {
                    Err(conflict(format!("record {key} changed concurrently")))
                }
            }
            Precondition::BootstrapUnclaimed { org_id } => {
                if self.bootstrap_claims.contains_key(org_id) {
                    Err(conflict(format!("bootstrap already claimed for {org_id}")))
                } else {
                    Ok(())
                }
            }
        }
    }

    fn apply(&mut self, op: WriteOp) {
        match op {
            WriteOp::PutOrganization(org) => {
                self.orgs.insert(org.org_id.clone(), org);
            }
            WriteOp::PutMembership(m) => {
                self.memberships
                    .insert((m.org_id.clone(), m.user_id.clone()), m);
            }
            WriteOp::DeleteMembership { org_id, user_id } => {
                self.memberships.remove(&(org_id, user_id));
            }
            WriteOp::ClaimBootstrap { org_id, user_id } => {
                self.bootstrap_claims.insert(org_id, user_id);
            }
            WriteOp::SetVersionCounter {
                org_id,
                entity_type,
                entity_id,
                value,
            } => {
                self.counters.insert((org_id, entity_type, entity_id), value);
            }
            WriteOp::PutVersion(v) => {
                self.versions.insert((v.org_id.clone(), v.version_id), v);
            }
            WriteOp::PutChangeSet(cs) => {
                self.change_sets
                    .insert((cs.org_id.clone(), cs.change_set_id), cs);
            }
            WriteOp::PutTask(t) => {
                self.tasks.insert((t.org_id.clone(), t.task_id), t);
            }
            WriteOp::PutRecord(r) => {
                self.records.insert((r.org_id.clone(), r.key.clone()), r);
            }
            WriteOp::DeleteRecord { org_id, key } => {
                self.records.remove(&(org_id, key));
            }
            WriteOp::AppendAudit(entry) => {
                self.audit_ids.insert(entry.entry_id);
                self.audit.push(entry);
            }
        }
    }

    fn bump_rival_counter(&mut self, preconditions: &[Precondition]) {
        if self.rival_counter_bumps == 0 {
            return;
        }
        let guarded = preconditions.iter().find_map(|pre| match pre {
            Precondition::VersionCounterIs {
                org_id,
                entity_type,
                entity_id,
                ..
            } => Some((org_id.clone(), *entity_type, entity_id.clone())),
            _ => None,
        });
        if let Some(key) = guarded {
            self.rival_counter_bumps -= 1;
            *self.counters.entry(key).or_insert(0) += 1;
        }
    }

    fn take_fault(&mut self) -> bool {
        let Some(plan) = self.faults.as_mut() else {
            return false;
        };
        if plan.skip > 0 {
            plan.skip -= 1;
            return false;
        }
        if plan.failures == 0 {
            self.faults = None;
            return false;
        }
        plan.failures = plan.failures.saturating_sub(1);
        true
    }
}

#[async_trait]
impl CommitStore for MemoryStore {
    fn max_batch_writes(&self) -> usize {
        self.max_batch_writes
    }

    async fn commit(&self, batch: WriteBatch) -> Result<()> {
        if batch.len() > self.max_batch_writes {
            return Err(GovernanceError::InvalidArgument(format!(
                "batch of {} writes exceeds store limit {}",
                batch.len(),
                self.max_batch_writes
            )));
        }
        let mut state = self.write();
        state.bump_rival_counter(&batch.preconditions);
        for pre in &batch.preconditions {
            state.check(pre)?;
        }
        let mut staged = HashSet::new();
        for op in &batch.ops {
            if let WriteOp::AppendAudit(entry) = op {
                if state.audit_ids.contains(&entry.entry_id) || !staged.insert(entry.entry_id) {
                    return Err(conflict(format!(
                        "audit entry {} already exists",
                        entry.entry_id
                    )));
                }
            }
        }
        if state.take_fault() {
            return Err(GovernanceError::Internal(anyhow::anyhow!(
                "injected commit failure"
            )));
        }
        for op in batch.ops {
            state.apply(op);
        }
        state.commits += 1;
        Ok(())
    }
}

// ── Read ports ────────────────────────────────────────────────

#[async_trait]
impl OrgStore for MemoryStore {
    async fn get_organization(&self, org_id: &str) -> Result<Option<Organization>> {
        Ok(self.read().orgs.get(org_id).cloned())
    }

    async fn get_membership(&self, org_id: &str, user_id: &str) -> Result<Option<Membership>> {
        Ok(self
            .read()
            .memberships
            .get(&(org_id.to_string(), user_id.to_string()))
            .cloned())
    }

    async fn list_memberships(&self, org_id: &str) -> Result<Vec<Membership>> {
        Ok(self
            .read()
            .memberships
            .values()
            .filter(|m| m.org_id == org_id)
            .cloned()
            .collect())
    }

    async fn is_bootstrap_claimed(&self, org_id: &str) -> Result<bool> {
        Ok(self.read().bootstrap_claims.contains_key(org_id))
    }
}

#[async_trait]
impl VersionStore for MemoryStore {
    async fn get_version(&self, org_id: &str, version_id: Uuid) -> Result<Option<Version>> {
        Ok(self
            .read()
            .versions
            .get(&(org_id.to_string(), version_id))
            .cloned())
    }

    async fn list_versions(
        &self,
        org_id: &str,
        entity_type: EntityType,
        entity_id: &str,
    ) -> Result<Vec<Version>> {
        let mut versions: Vec<Version> = self
            .read()
            .versions
            .values()
            .filter(|v| v.org_id == org_id && v.belongs_to(entity_type, entity_id))
            .cloned()
            .collect();
        versions.sort_by(|a, b| b.version_number.cmp(&a.version_number));
        Ok(versions)
    }

    async fn read_version_counter(
        &self,
        org_id: &str,
        entity_type: EntityType,
        entity_id: &str,
    ) -> Result<u64> {
        Ok(self
            .read()
            .counters
            .get(&(org_id.to_string(), entity_type, entity_id.to_string()))
            .copied()
            .unwrap_or(0))
    }
}

#[async_trait]
impl ChangeSetStore for MemoryStore {
    async fn get_change_set(&self, org_id: &str, change_set_id: Uuid) -> Result<Option<ChangeSet>> {
        Ok(self
            .read()
            .change_sets
            .get(&(org_id.to_string(), change_set_id))
            .cloned())
    }

    async fn list_change_sets(
        &self,
        org_id: &str,
        status: Option<ChangeSetStatus>,
    ) -> Result<Vec<ChangeSet>> {
        let mut sets: Vec<ChangeSet> = self
            .read()
            .change_sets
            .values()
            .filter(|cs| cs.org_id == org_id && status.map_or(true, |s| cs.status == s))
            .cloned()
            .collect();
        sets.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(sets)
    }

    async fn get_task(&self, org_id: &str, task_id: Uuid) -> Result<Option<Task>> {
        Ok(self
            .read()
            .tasks
            .get(&(org_id.to_string(), task_id))
            .cloned())
    }

    async fn list_tasks(&self, org_id: &str, change_set_id: Uuid) -> Result<Vec<Task>> {
        let mut tasks: Vec<Task> = self
            .read()
            .tasks
            .values()
            .filter(|t| t.org_id == org_id && t.change_set_id == change_set_id)
            .cloned()
            .collect();
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(tasks)
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn get_record(&self, org_id: &str, key: &RecordKey) -> Result<Option<ArtifactRecord>> {
        Ok(self
            .read()
            .records
            .get(&(org_id.to_string(), key.clone()))
            .cloned())
    }

    async fn list_records(
        &self,
        org_id: &str,
        collection: Collection,
    ) -> Result<Vec<ArtifactRecord>> {
        Ok(self
            .read()
            .records
            .values()
            .filter(|r| r.org_id == org_id && r.key.collection == collection)
            .cloned()
            .collect())
    }

    async fn list_dependents(
        &self,
        org_id: &str,
        owner: &RecordKey,
    ) -> Result<Vec<ArtifactRecord>> {
        Ok(self
            .read()
            .records
            .values()
            .filter(|r| r.org_id == org_id && r.is_owned_by(owner))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl AuditStore for MemoryStore {
    async fn list_audit(&self, org_id: &str, filter: &AuditFilter) -> Result<Vec<AuditEntry>> {
        let state = self.read();
        let matching = state
            .audit
            .iter()
            .rev()
            .filter(|e| e.org_id == org_id && filter.matches(e))
            .cloned();
        Ok(match filter.limit {
            Some(limit) => matching.take(limit).collect(),
            None => matching.collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, owners: Vec<RecordKey>) -> ArtifactRecord {
        ArtifactRecord {
            org_id: "org".into(),
            key: RecordKey::new(Collection::Coverages, id),
            owners,
            data: serde_json::json!({}),
            current_version_id: None,
            current_version_number: None,
            updated_by: "u".into(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn failed_precondition_applies_nothing() {
        let store = MemoryStore::new();
        let mut batch = WriteBatch::new();
        batch
            .require(Precondition::RecordIs {
                org_id: "org".into(),
                key: RecordKey::new(Collection::Products, "p1"),
                expect: RecordExpectation::Present {
                    current_version_id: None,
                },
            })
            .push(WriteOp::PutRecord(record("c1", vec![])));

        let err = store.commit(batch).await.unwrap_err();
        assert!(matches!(err, GovernanceError::Conflict(_)));
        assert_eq!(store.record_count("org"), 0);
        assert_eq!(store.commit_count(), 0);
    }

    #[tokio::test]
    async fn oversize_batch_is_rejected() {
        let store = MemoryStore::with_max_batch_writes(1);
        let mut batch = WriteBatch::new();
        batch
            .push(WriteOp::PutRecord(record("a", vec![])))
            .push(WriteOp::PutRecord(record("b", vec![])));
        assert!(matches!(
            store.commit(batch).await,
            Err(GovernanceError::InvalidArgument(_))
        ));
    }

    fn audit_entry() -> AuditEntry {
        AuditEntry {
            entry_id: Uuid::new_v4(),
            org_id: "org".into(),
            action: AuditAction::MemberRoleSet,
            entity_type: None,
            entity_id: None,
            change_set_id: None,
            user_id: "u".into(),
            timestamp: Utc::now(),
            previous_values: None,
            new_values: None,
            digest: String::new(),
        }
    }

    fn append(entries: &[&AuditEntry]) -> WriteBatch {
        let mut batch = WriteBatch::new();
        for entry in entries {
            batch.push(WriteOp::AppendAudit((*entry).clone()));
        }
        batch
    }

    #[tokio::test]
    async fn duplicate_audit_id_conflicts() {
        let store = MemoryStore::new();
        let entry = audit_entry();
        store.commit(append(&[&entry])).await.unwrap();

        let err = store.commit(append(&[&entry])).await.unwrap_err();
        assert!(matches!(err, GovernanceError::Conflict(_)));

        // Repeated inside one batch, even when the id is new.
        let fresh = audit_entry();
        let err = store.commit(append(&[&fresh, &fresh])).await.unwrap_err();
        assert!(matches!(err, GovernanceError::Conflict(_)));
        assert_eq!(store.audit_len(), 1);

        store.commit(append(&[&fresh])).await.unwrap();
        let err = store.commit(append(&[&audit_entry(), &fresh])).await.unwrap_err();
        assert!(matches!(err, GovernanceError::Conflict(_)));
        assert_eq!(store.audit_len(), 2);
    }

    #[tokio::test]
    async fn rival_counter_bump_fails_guarded_commits() {
        let store = MemoryStore::new();
        store.contend_version_counters(1);
        let guarded = |expected: u64| {
            let mut batch = WriteBatch::new();
            batch
                .require(Precondition::VersionCounterIs {
                    org_id: "org".into(),
                    entity_type: EntityType::Coverage,
                    entity_id: "c1".into(),
                    expected,
                })
                .push(WriteOp::SetVersionCounter {
                    org_id: "org".into(),
                    entity_type: EntityType::Coverage,
                    entity_id: "c1".into(),
                    value: expected + 1,
                });
            batch
        };

        // Unguarded batches leave the pending bump alone.
        store.commit(append(&[&audit_entry()])).await.unwrap();
        assert!(matches!(
            store.commit(guarded(0)).await,
            Err(GovernanceError::Conflict(_))
        ));
        store.commit(guarded(1)).await.unwrap();
        assert_eq!(
            store.read_version_counter("org", EntityType::Coverage, "c1").await.unwrap(),
            2
        );
    }

    #[tokio::test]
    async fn fault_injection_fails_one_commit() {
        let store = MemoryStore::new();
        store.fail_commit_after(1);
        let put = |id: &str| {
            let mut b = WriteBatch::new();
            b.push(WriteOp::PutRecord(record(id, vec![])));
            b
        };
        store.commit(put("a")).await.unwrap();
        assert!(store.commit(put("b")).await.is_err());
        store.commit(put("c")).await.unwrap();
        assert_eq!(store.record_count("org"), 2);
    }

    #[tokio::test]
    async fn dependents_are_found_by_owner() {
        let store = MemoryStore::new();
        let product = RecordKey::new(Collection::Products, "p1");
        store.seed_record(record("c1", vec![product.clone()]));
        store.seed_record(record("c2", vec![]));
        let deps = store.list_dependents("org", &product).await.unwrap();
        assert_eq!(deps.len(), 1);
        assert_eq!(deps[0].key.record_id, "c1");
    }
}
