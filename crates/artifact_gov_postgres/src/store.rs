//! Postgres implementation of every artifact_gov_core port trait.
//!
//! One newtype over PgPool. All SQL is runtime-checked (sqlx::query, not
//! sqlx::query!) so building needs no database. Documents are stored whole
//! in `doc` JSONB next to the columns used for filtering and locking.
//!
//! `commit` runs a WriteBatch in one transaction. Each precondition first
//! takes a transaction-scoped advisory lock on the document it guards, so a
//! check against a row that does not exist yet still serializes with a
//! concurrent writer of that row.

use anyhow::anyhow;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use artifact_gov_core::error::GovernanceError;
use artifact_gov_core::ports::{
    AuditStore, ChangeSetStore, CommitStore, OrgStore, Precondition, RecordExpectation,
    RecordStore, Result, VersionStore, WriteBatch, WriteOp,
};
use artifact_gov_core::types::*;

const UNIQUE_VIOLATION: &str = "23505";
const SERIALIZATION_FAILURE: &str = "40001";
const DEADLOCK_DETECTED: &str = "40P01";

pub struct PgDocumentStore {
    pool: PgPool,
    max_batch_writes: usize,
}

impl PgDocumentStore {
    /// One transaction has no write ceiling of its own;
    /// `GovernanceConfig::store_batch_limit` bounds the batches built.
    pub fn new(pool: PgPool) -> Self {
        Self::with_max_batch_writes(pool, usize::MAX)
    }

    pub fn with_max_batch_writes(pool: PgPool, max_batch_writes: usize) -> Self {
        Self {
            pool,
            max_batch_writes,
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn decode<T: DeserializeOwned>(doc: serde_json::Value) -> Result<T> {
    serde_json::from_value(doc).map_err(|e| GovernanceError::Internal(anyhow!(e)))
}

fn decode_all<T: DeserializeOwned>(docs: Vec<serde_json::Value>) -> Result<Vec<T>> {
    docs.into_iter().map(decode).collect()
}

fn encode<T: Serialize>(value: &T) -> Result<serde_json::Value> {
    serde_json::to_value(value).map_err(|e| GovernanceError::Internal(anyhow!(e)))
}

/// SQLSTATEs that mean a commit lost a race with another writer.
fn is_lost_race(code: Option<&str>) -> bool {
    matches!(
        code,
        Some(UNIQUE_VIOLATION | SERIALIZATION_FAILURE | DEADLOCK_DETECTED)
    )
}

/// Lost races inside a commit surface as `Conflict`, everything else as `Internal`.
fn tx_err(e: sqlx::Error) -> GovernanceError {
    match &e {
        sqlx::Error::Database(db) if is_lost_race(db.code().as_deref()) => {
            GovernanceError::Conflict(format!("concurrent write: {}", db.message()))
        }
        _ => GovernanceError::Internal(anyhow!(e)),
    }
}

// ── Read ports ────────────────────────────────────────────────

#[async_trait]
impl OrgStore for PgDocumentStore {
    async fn get_organization(&self, org_id: &str) -> Result<Option<Organization>> {
        let doc = sqlx::query_scalar::<_, serde_json::Value>(
            "SELECT doc FROM artifact_gov.organizations WHERE org_id = $1",
        )
        .bind(org_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| anyhow!(e))?;
        doc.map(decode).transpose()
    }

    async fn get_membership(&self, org_id: &str, user_id: &str) -> Result<Option<Membership>> {
        let doc = sqlx::query_scalar::<_, serde_json::Value>(
            "SELECT doc FROM artifact_gov.memberships WHERE org_id = $1 AND user_id = $2",
        )
        .bind(org_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| anyhow!(e))?;
        doc.map(decode).transpose()
    }

    async fn list_memberships(&self, org_id: &str) -> Result<Vec<Membership>> {
        let docs = sqlx::query_scalar::<_, serde_json::Value>(
            "SELECT doc FROM artifact_gov.memberships WHERE org_id = $1 ORDER BY user_id",
        )
        .bind(org_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| anyhow!(e))?;
        decode_all(docs)
    }

    async fn is_bootstrap_claimed(&self, org_id: &str) -> Result<bool> {
        let claimed = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM artifact_gov.bootstrap_claims WHERE org_id = $1)",
        )
        .bind(org_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| anyhow!(e))?;
        Ok(claimed)
    }
}

#[async_trait]
impl VersionStore for PgDocumentStore {
    async fn get_version(&self, org_id: &str, version_id: Uuid) -> Result<Option<Version>> {
        let doc = sqlx::query_scalar::<_, serde_json::Value>(
            "SELECT doc FROM artifact_gov.versions WHERE org_id = $1 AND version_id = $2",
        )
        .bind(org_id)
        .bind(version_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| anyhow!(e))?;
        doc.map(decode).transpose()
    }

    async fn list_versions(
        &self,
        org_id: &str,
        entity_type: EntityType,
        entity_id: &str,
    ) -> Result<Vec<Version>> {
        let docs = sqlx::query_scalar::<_, serde_json::Value>(
            r#"
            SELECT doc FROM artifact_gov.versions
            WHERE org_id = $1 AND entity_type = $2 AND entity_id = $3
            ORDER BY version_number DESC
            "#,
        )
        .bind(org_id)
        .bind(entity_type.as_str())
        .bind(entity_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| anyhow!(e))?;
        decode_all(docs)
    }

    async fn read_version_counter(
        &self,
        org_id: &str,
        entity_type: EntityType,
        entity_id: &str,
    ) -> Result<u64> {
        let value = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT value FROM artifact_gov.version_counters
            WHERE org_id = $1 AND entity_type = $2 AND entity_id = $3
            "#,
        )
        .bind(org_id)
        .bind(entity_type.as_str())
        .bind(entity_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| anyhow!(e))?;
        Ok(value.unwrap_or(0) as u64)
    }
}

#[async_trait]
impl ChangeSetStore for PgDocumentStore {
    async fn get_change_set(&self, org_id: &str, change_set_id: Uuid) -> Result<Option<ChangeSet>> {
        let doc = sqlx::query_scalar::<_, serde_json::Value>(
            "SELECT doc FROM artifact_gov.change_sets WHERE org_id = $1 AND change_set_id = $2",
        )
        .bind(org_id)
        .bind(change_set_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| anyhow!(e))?;
        doc.map(decode).transpose()
    }

    async fn list_change_sets(
        &self,
        org_id: &str,
        status: Option<ChangeSetStatus>,
    ) -> Result<Vec<ChangeSet>> {
        let docs = sqlx::query_scalar::<_, serde_json::Value>(
            r#"
            SELECT doc FROM artifact_gov.change_sets
            WHERE org_id = $1 AND ($2::text IS NULL OR status = $2)
            ORDER BY created_at DESC
            "#,
        )
        .bind(org_id)
        .bind(status.map(|s| s.as_str()))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| anyhow!(e))?;
        decode_all(docs)
    }

    async fn get_task(&self, org_id: &str, task_id: Uuid) -> Result<Option<Task>> {
        let doc = sqlx::query_scalar::<_, serde_json::Value>(
            "SELECT doc FROM artifact_gov.tasks WHERE org_id = $1 AND task_id = $2",
        )
        .bind(org_id)
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| anyhow!(e))?;
        doc.map(decode).transpose()
    }

    async fn list_tasks(&self, org_id: &str, change_set_id: Uuid) -> Result<Vec<Task>> {
        let docs = sqlx::query_scalar::<_, serde_json::Value>(
            r#"
            SELECT doc FROM artifact_gov.tasks
            WHERE org_id = $1 AND change_set_id = $2
            ORDER BY created_at, task_id
            "#,
        )
        .bind(org_id)
        .bind(change_set_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| anyhow!(e))?;
        decode_all(docs)
    }
}

#[async_trait]
impl RecordStore for PgDocumentStore {
    async fn get_record(&self, org_id: &str, key: &RecordKey) -> Result<Option<ArtifactRecord>> {
        let doc = sqlx::query_scalar::<_, serde_json::Value>(
            r#"
            SELECT doc FROM artifact_gov.records
            WHERE org_id = $1 AND collection = $2 AND record_id = $3
            "#,
        )
        .bind(org_id)
        .bind(key.collection.as_str())
        .bind(&key.record_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| anyhow!(e))?;
        doc.map(decode).transpose()
    }

    async fn list_records(
        &self,
        org_id: &str,
        collection: Collection,
    ) -> Result<Vec<ArtifactRecord>> {
        let docs = sqlx::query_scalar::<_, serde_json::Value>(
            r#"
            SELECT doc FROM artifact_gov.records
            WHERE org_id = $1 AND collection = $2
            ORDER BY record_id
            "#,
        )
        .bind(org_id)
        .bind(collection.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| anyhow!(e))?;
        decode_all(docs)
    }

    async fn list_dependents(
        &self,
        org_id: &str,
        owner: &RecordKey,
    ) -> Result<Vec<ArtifactRecord>> {
        let docs = sqlx::query_scalar::<_, serde_json::Value>(
            r#"
            SELECT doc FROM artifact_gov.records
            WHERE org_id = $1 AND owner_paths @> ARRAY[$2]::text[]
            ORDER BY collection, record_id
            "#,
        )
        .bind(org_id)
        .bind(owner.path())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| anyhow!(e))?;
        decode_all(docs)
    }
}

#[async_trait]
impl AuditStore for PgDocumentStore {
    async fn list_audit(&self, org_id: &str, filter: &AuditFilter) -> Result<Vec<AuditEntry>> {
        let docs = sqlx::query_scalar::<_, serde_json::Value>(
            r#"
            SELECT doc FROM artifact_gov.audit_log
            WHERE org_id = $1
              AND ($2::text IS NULL OR entity_type = $2)
              AND ($3::text IS NULL OR entity_id = $3)
              AND ($4::uuid IS NULL OR change_set_id = $4)
              AND ($5::text IS NULL OR action = $5)
            ORDER BY seq DESC
            LIMIT $6
            "#,
        )
        .bind(org_id)
        .bind(filter.entity_type.as_deref())
        .bind(filter.entity_id.as_deref())
        .bind(filter.change_set_id)
        .bind(filter.action.map(|a| a.as_str()))
        .bind(filter.limit.map(|l| l as i64))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| anyhow!(e))?;
        decode_all(docs)
    }
}

// ── Atomic commit ─────────────────────────────────────────────

#[async_trait]
impl CommitStore for PgDocumentStore {
    fn max_batch_writes(&self) -> usize {
        self.max_batch_writes
    }

    async fn commit(&self, batch: WriteBatch) -> Result<()> {
        if batch.len() > self.max_batch_writes {
            return Err(GovernanceError::InvalidArgument(format!(
                "batch of {} writes exceeds the store limit of {}",
                batch.len(),
                self.max_batch_writes
            )));
        }
        let mut tx = self.pool.begin().await.map_err(|e| anyhow!(e))?;
        // All locks up front, in sorted key order.
        for key in lock_order(&batch.preconditions) {
            lock(&mut *tx, key).await?;
        }
        for precondition in &batch.preconditions {
            check(&mut *tx, precondition).await?;
        }
        for op in &batch.ops {
            apply(&mut *tx, op).await?;
        }
        tx.commit().await.map_err(tx_err)?;
        tracing::debug!(
            target: "governance.store",
            preconditions = batch.preconditions.len(),
            writes = batch.ops.len(),
            "batch committed"
        );
        Ok(())
    }
}

fn lock_key(precondition: &Precondition) -> String {
    match precondition {
        Precondition::VersionStatusIs {
            org_id, version_id, ..
        } => format!("version:{org_id}:{version_id}"),
        Precondition::VersionCounterIs {
            org_id,
            entity_type,
            entity_id,
            ..
        } => format!("counter:{org_id}:{entity_type}:{entity_id}"),
        Precondition::ChangeSetRevision {
            org_id,
            change_set_id,
            ..
        } => format!("change_set:{org_id}:{change_set_id}"),
        Precondition::RecordIs { org_id, key, .. } => format!("record:{org_id}:{}", key.path()),
        Precondition::BootstrapUnclaimed { org_id } => format!("bootstrap:{org_id}"),
    }
}

/// Advisory lock keys of a batch, sorted and deduplicated.
fn lock_order(preconditions: &[Precondition]) -> Vec<String> {
    let mut keys: Vec<String> = preconditions.iter().map(lock_key).collect();
    keys.sort();
    keys.dedup();
    keys
}

async fn lock(conn: &mut PgConnection, key: String) -> Result<()> {
    sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
        .bind(key)
        .execute(&mut *conn)
        .await
        .map_err(tx_err)?;
    Ok(())
}

async fn check(conn: &mut PgConnection, precondition: &Precondition) -> Result<()> {
    match precondition {
        Precondition::VersionStatusIs {
            org_id,
            version_id,
            status,
        } => {
            let actual = sqlx::query_scalar::<_, String>(
                "SELECT status FROM artifact_gov.versions WHERE org_id = $1 AND version_id = $2",
            )
            .bind(org_id)
            .bind(version_id)
            .fetch_optional(&mut *conn)
            .await
            .map_err(tx_err)?;
            if actual.as_deref() != Some(status.as_str()) {
                return Err(GovernanceError::Conflict(format!(
                    "version {version_id} is no longer {status}"
                )));
            }
        }
        Precondition::VersionCounterIs {
            org_id,
            entity_type,
            entity_id,
            expected,
        } => {
            let actual = sqlx::query_scalar::<_, i64>(
                r#"
                SELECT value FROM artifact_gov.version_counters
                WHERE org_id = $1 AND entity_type = $2 AND entity_id = $3
                "#,
            )
            .bind(org_id)
            .bind(entity_type.as_str())
            .bind(entity_id)
            .fetch_optional(&mut *conn)
            .await
            .map_err(tx_err)?
            .unwrap_or(0);
            if actual as u64 != *expected {
                return Err(GovernanceError::Conflict(format!(
                    "version counter of {entity_type}/{entity_id} moved to {actual}"
                )));
            }
        }
        Precondition::ChangeSetRevision {
            org_id,
            change_set_id,
            expected,
        } => {
            let actual = sqlx::query_scalar::<_, i64>(
                "SELECT revision FROM artifact_gov.change_sets WHERE org_id = $1 AND change_set_id = $2",
            )
            .bind(org_id)
            .bind(change_set_id)
            .fetch_optional(&mut *conn)
            .await
            .map_err(tx_err)?
            .unwrap_or(0);
            if actual as u64 != *expected {
                return Err(GovernanceError::Conflict(format!(
                    "change set {change_set_id} was modified concurrently"
                )));
            }
        }
        Precondition::RecordIs {
            org_id,
            key,
            expect,
        } => {
            let actual = sqlx::query_scalar::<_, Option<Uuid>>(
                r#"
                SELECT current_version_id FROM artifact_gov.records
                WHERE org_id = $1 AND collection = $2 AND record_id = $3
                "#,
            )
            .bind(org_id)
            .bind(key.collection.as_str())
            .bind(&key.record_id)
            .fetch_optional(&mut *conn)
            .await
            .map_err(tx_err)?;
            let holds = match (expect, actual) {
                (RecordExpectation::Absent, None) => true,
                (RecordExpectation::Present { current_version_id }, Some(current)) => {
                    *current_version_id == current
                }
                _ => false,
            };
            if !holds {
                return Err(GovernanceError::Conflict(format!(
                    "live record {} changed since it was read",
                    key.path()
                )));
            }
        }
        Precondition::BootstrapUnclaimed { org_id } => {
            let claimed = sqlx::query_scalar::<_, bool>(
                "SELECT EXISTS (SELECT 1 FROM artifact_gov.bootstrap_claims WHERE org_id = $1)",
            )
            .bind(org_id)
            .fetch_one(&mut *conn)
            .await
            .map_err(tx_err)?;
            if claimed {
                return Err(GovernanceError::Conflict(format!(
                    "admin bootstrap of {org_id} already claimed"
                )));
            }
        }
    }
    Ok(())
}

async fn apply(conn: &mut PgConnection, op: &WriteOp) -> Result<()> {
    let query = match op {
        WriteOp::PutOrganization(org) => sqlx::query(
            r#"
            INSERT INTO artifact_gov.organizations (org_id, name, created_at, doc)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (org_id) DO UPDATE SET name = EXCLUDED.name, doc = EXCLUDED.doc
            "#,
        )
        .bind(&org.org_id)
        .bind(&org.name)
        .bind(org.created_at)
        .bind(encode(org)?),
        WriteOp::PutMembership(m) => sqlx::query(
            r#"
            INSERT INTO artifact_gov.memberships (org_id, user_id, role, doc)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (org_id, user_id) DO UPDATE SET role = EXCLUDED.role, doc = EXCLUDED.doc
            "#,
        )
        .bind(&m.org_id)
        .bind(&m.user_id)
        .bind(m.role.as_str())
        .bind(encode(m)?),
        WriteOp::DeleteMembership { org_id, user_id } => sqlx::query(
            "DELETE FROM artifact_gov.memberships WHERE org_id = $1 AND user_id = $2",
        )
        .bind(org_id)
        .bind(user_id),
        WriteOp::ClaimBootstrap { org_id, user_id } => sqlx::query(
            "INSERT INTO artifact_gov.bootstrap_claims (org_id, user_id) VALUES ($1, $2)",
        )
        .bind(org_id)
        .bind(user_id),
        WriteOp::SetVersionCounter {
            org_id,
            entity_type,
            entity_id,
            value,
        } => sqlx::query(
            r#"
            INSERT INTO artifact_gov.version_counters (org_id, entity_type, entity_id, value)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (org_id, entity_type, entity_id) DO UPDATE SET value = EXCLUDED.value
            "#,
        )
        .bind(org_id)
        .bind(entity_type.as_str())
        .bind(entity_id)
        .bind(*value as i64),
        WriteOp::PutVersion(v) => sqlx::query(
            r#"
            INSERT INTO artifact_gov.versions
                (version_id, org_id, entity_type, entity_id, version_number, status, doc)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (version_id) DO UPDATE SET status = EXCLUDED.status, doc = EXCLUDED.doc
            "#,
        )
        .bind(v.version_id)
        .bind(&v.org_id)
        .bind(v.entity_type.as_str())
        .bind(&v.entity_id)
        .bind(v.version_number as i64)
        .bind(v.status.as_str())
        .bind(encode(v)?),
        WriteOp::PutChangeSet(cs) => sqlx::query(
            r#"
            INSERT INTO artifact_gov.change_sets
                (change_set_id, org_id, status, revision, created_at, doc)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (change_set_id) DO UPDATE
                SET status = EXCLUDED.status, revision = EXCLUDED.revision, doc = EXCLUDED.doc
            "#,
        )
        .bind(cs.change_set_id)
        .bind(&cs.org_id)
        .bind(cs.status.as_str())
        .bind(cs.revision as i64)
        .bind(cs.created_at)
        .bind(encode(cs)?),
        WriteOp::PutTask(t) => sqlx::query(
            r#"
            INSERT INTO artifact_gov.tasks (task_id, org_id, change_set_id, created_at, doc)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (task_id) DO UPDATE SET doc = EXCLUDED.doc
            "#,
        )
        .bind(t.task_id)
        .bind(&t.org_id)
        .bind(t.change_set_id)
        .bind(t.created_at)
        .bind(encode(t)?),
        WriteOp::PutRecord(r) => sqlx::query(
            r#"
            INSERT INTO artifact_gov.records
                (org_id, collection, record_id, owner_paths, current_version_id, doc)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (org_id, collection, record_id) DO UPDATE
                SET owner_paths = EXCLUDED.owner_paths,
                    current_version_id = EXCLUDED.current_version_id,
                    doc = EXCLUDED.doc
            "#,
        )
        .bind(&r.org_id)
        .bind(r.key.collection.as_str())
        .bind(&r.key.record_id)
        .bind(r.owners.iter().map(RecordKey::path).collect::<Vec<_>>())
        .bind(r.current_version_id)
        .bind(encode(r)?),
        WriteOp::DeleteRecord { org_id, key } => sqlx::query(
            r#"
            DELETE FROM artifact_gov.records
            WHERE org_id = $1 AND collection = $2 AND record_id = $3
            "#,
        )
        .bind(org_id)
        .bind(key.collection.as_str())
        .bind(&key.record_id),
        WriteOp::AppendAudit(entry) => sqlx::query(
            r#"
            INSERT INTO artifact_gov.audit_log
                (entry_id, org_id, action, entity_type, entity_id, change_set_id, user_id, ts, digest, doc)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(entry.entry_id)
        .bind(&entry.org_id)
        .bind(entry.action.as_str())
        .bind(&entry.entity_type)
        .bind(&entry.entity_id)
        .bind(entry.change_set_id)
        .bind(&entry.user_id)
        .bind(entry.timestamp)
        .bind(&entry.digest)
        .bind(encode(entry)?),
    };
    query.execute(&mut *conn).await.map_err(tx_err)?;
    Ok(())
}
