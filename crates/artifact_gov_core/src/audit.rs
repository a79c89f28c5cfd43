//! Append-only audit trail.
//!
//! Entries are sealed with a content digest and either staged into the same
//! `WriteBatch` as the state change they describe, or committed alone. There is
//! no update or delete path.
//!
//! Digest: SHA-256 over `"v1:"` + the canonical JSON of every field except the
//! digest itself (serde_json maps serialize with sorted keys).

use chrono::Utc;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::GovernanceError;
use crate::ports::{Result, SharedStore, WriteBatch, WriteOp};
use crate::principal::Principal;
use crate::roles;
use crate::types::{AuditAction, AuditEntry, AuditFilter, Role};

pub const DIGEST_VERSION: &str = "v1";

/// Unsealed audit content.
#[derive(Debug, Clone)]
pub struct AuditRecord {
    pub org_id: String,
    pub action: AuditAction,
    pub user_id: String,
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
    pub change_set_id: Option<Uuid>,
    pub previous_values: Option<serde_json::Value>,
    pub new_values: Option<serde_json::Value>,
}

impl AuditRecord {
    pub fn new(org_id: &str, action: AuditAction, user_id: &str) -> Self {
        Self {
            org_id: org_id.to_string(),
            action,
            user_id: user_id.to_string(),
            entity_type: None,
            entity_id: None,
            change_set_id: None,
            previous_values: None,
            new_values: None,
        }
    }

    pub fn entity(mut self, entity_type: impl ToString, entity_id: impl ToString) -> Self {
        self.entity_type = Some(entity_type.to_string());
        self.entity_id = Some(entity_id.to_string());
        self
    }

    pub fn change_set(mut self, change_set_id: Uuid) -> Self {
        self.change_set_id = Some(change_set_id);
        self
    }

    pub fn previous(mut self, values: serde_json::Value) -> Self {
        self.previous_values = Some(values);
        self
    }

    pub fn values(mut self, values: serde_json::Value) -> Self {
        self.new_values = Some(values);
        self
    }

    /// Assign id and timestamp, and compute the digest.
    pub fn seal(self) -> AuditEntry {
        let mut entry = AuditEntry {
            entry_id: Uuid::new_v4(),
            org_id: self.org_id,
            action: self.action,
            entity_type: self.entity_type,
            entity_id: self.entity_id,
            change_set_id: self.change_set_id,
            user_id: self.user_id,
            timestamp: Utc::now(),
            previous_values: self.previous_values,
            new_values: self.new_values,
            digest: String::new(),
        };
        entry.digest = compute_digest(&entry);
        entry
    }
}

pub fn compute_digest(entry: &AuditEntry) -> String {
    let canonical = serde_json::json!({
        "entry_id": entry.entry_id,
        "org_id": entry.org_id,
        "action": entry.action.as_str(),
        "entity_type": entry.entity_type,
        "entity_id": entry.entity_id,
        "change_set_id": entry.change_set_id,
        "user_id": entry.user_id,
        "timestamp": entry.timestamp.to_rfc3339(),
        "previous_values": entry.previous_values,
        "new_values": entry.new_values,
    });
    let mut hasher = Sha256::new();
    hasher.update(format!("{DIGEST_VERSION}:").as_bytes());
    hasher.update(canonical.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

pub fn verify_digest(entry: &AuditEntry) -> bool {
    compute_digest(entry) == entry.digest
}

#[derive(Clone)]
pub struct AuditLogger {
    store: SharedStore,
}

impl AuditLogger {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    /// Seal `record` and append it to `batch`; it lands with the batch or not at all.
    pub fn stage(&self, batch: &mut WriteBatch, record: AuditRecord) -> AuditEntry {
        let entry = record.seal();
        crate::telemetry::emit_audit_appended(&entry.org_id, entry.action.as_str(), entry.entry_id);
        batch.push(WriteOp::AppendAudit(entry.clone()));
        entry
    }

    /// Commit a single entry on its own.
    pub async fn record(&self, record: AuditRecord) -> Result<AuditEntry> {
        let mut batch = WriteBatch::new();
        let entry = self.stage(&mut batch, record);
        self.store.commit(batch).await?;
        Ok(entry)
    }

    /// Read the trail of one org. Admin or compliance only.
    pub async fn list(
        &self,
        principal: &Principal,
        org_id: &str,
        filter: &AuditFilter,
    ) -> Result<Vec<AuditEntry>> {
        let role = roles::resolve_role(&*self.store, principal, org_id, Role::Viewer).await?;
        if !matches!(role, Role::Admin | Role::Compliance) {
            return Err(GovernanceError::PermissionDenied(format!(
                "{} ({role}) may not read the audit trail",
                principal.user_id
            )));
        }
        self.store.list_audit(org_id, filter).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::memory::MemoryStore;
    use crate::ports::CommitStore;

    fn logger() -> (Arc<MemoryStore>, AuditLogger) {
        let store = Arc::new(MemoryStore::new());
        store.seed_organization("org", "Org", "root");
        store.seed_member("org", "admin", Role::Admin);
        store.seed_member("org", "comp", Role::Compliance);
        store.seed_member("org", "pm", Role::ProductManager);
        (store.clone(), AuditLogger::new(store))
    }

    #[test]
    fn sealed_entry_verifies_and_detects_tampering() {
        let mut entry = AuditRecord::new("org", AuditAction::MemberRoleSet, "admin")
            .entity("membership", "bob")
            .values(serde_json::json!({"role": "actuary"}))
            .seal();
        assert_eq!(entry.digest.len(), 64);
        assert!(verify_digest(&entry));

        entry.new_values = Some(serde_json::json!({"role": "admin"}));
        assert!(!verify_digest(&entry));
    }

    #[tokio::test]
    async fn record_appends_and_list_returns_newest_first() {
        let (_store, logger) = logger();
        logger
            .record(AuditRecord::new("org", AuditAction::MemberRoleSet, "admin"))
            .await
            .unwrap();
        logger
            .record(AuditRecord::new("org", AuditAction::MemberRemoved, "admin"))
            .await
            .unwrap();

        let entries = logger
            .list(&Principal::in_process("comp"), "org", &AuditFilter::default())
            .await
            .unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].action, AuditAction::MemberRemoved);
    }

    #[tokio::test]
    async fn product_manager_cannot_read_audit() {
        let (_store, logger) = logger();
        let err = logger
            .list(&Principal::in_process("pm"), "org", &AuditFilter::default())
            .await
            .unwrap_err();
        assert!(matches!(err, GovernanceError::PermissionDenied(_)));
    }

    #[tokio::test]
    async fn staged_entry_is_lost_with_failed_batch() {
        let (store, logger) = logger();
        store.fail_commit_after(0);
        let mut batch = WriteBatch::new();
        logger.stage(
            &mut batch,
            AuditRecord::new("org", AuditAction::ChangeSetPublished, "admin"),
        );
        assert!(store.commit(batch).await.is_err());
        assert_eq!(store.audit_len(), 0);
    }
}
