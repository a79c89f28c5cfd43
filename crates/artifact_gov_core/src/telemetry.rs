//! Structured tracing events for the governance workflow.
//!
//! Every lifecycle step emits one `info!` event under a stable
//! `governance.*` target so log pipelines can filter per concern.

use uuid::Uuid;

use crate::error::PreflightIssue;
use crate::types::{ChangeSetStatus, EntityType, Role, VersionStatus};

pub fn emit_version_created(org_id: &str, entity_type: EntityType, entity_id: &str, number: u64) {
    tracing::info!(
        target: "governance.version",
        org_id,
        entity_type = %entity_type,
        entity_id,
        version_number = number,
        "version created"
    );
}

pub fn emit_version_transition(
    version_id: Uuid,
    from: VersionStatus,
    to: VersionStatus,
    user_id: &str,
) {
    tracing::info!(
        target: "governance.version",
        %version_id,
        from = %from,
        to = %to,
        user_id,
        "version status transition"
    );
}

pub fn emit_change_set_transition(
    change_set_id: Uuid,
    from: ChangeSetStatus,
    to: ChangeSetStatus,
    user_id: &str,
) {
    tracing::info!(
        target: "governance.changeset",
        %change_set_id,
        from = %from,
        to = %to,
        user_id,
        "change set status transition"
    );
}

pub fn emit_approval(change_set_id: Uuid, role: Role, all_approved: bool, pending: usize) {
    tracing::info!(
        target: "governance.approval",
        %change_set_id,
        role = %role,
        all_approved,
        pending,
        "approval recorded"
    );
}

pub fn emit_preflight(change_set_id: Uuid, issues: &[PreflightIssue]) {
    if issues.is_empty() {
        tracing::info!(target: "governance.preflight", %change_set_id, "preflight clean");
    } else {
        let codes: Vec<&str> = issues.iter().map(|i| i.code.as_str()).collect();
        tracing::info!(
            target: "governance.preflight",
            %change_set_id,
            issue_count = issues.len(),
            codes = ?codes,
            "preflight blocked"
        );
    }
}

pub fn emit_publish(change_set_id: Uuid, items: usize, writes: usize, publisher: &str) {
    tracing::info!(
        target: "governance.publish",
        %change_set_id,
        items,
        writes,
        publisher,
        "change set published"
    );
}

pub fn emit_publish_failure(change_set_id: Uuid, kind: &str, message: &str) {
    tracing::warn!(
        target: "governance.publish",
        %change_set_id,
        kind,
        message,
        "publish failed"
    );
}

pub fn emit_cascade(org_id: &str, root: &str, deleted: usize, chunks: usize) {
    tracing::info!(
        target: "governance.cascade",
        org_id,
        root,
        deleted,
        chunks,
        "cascade delete complete"
    );
}

pub fn emit_role_change(org_id: &str, user_id: &str, role: Option<Role>, by: &str) {
    tracing::info!(
        target: "governance.membership",
        org_id,
        user_id,
        role = role.map(|r| r.as_str()).unwrap_or("removed"),
        by,
        "membership changed"
    );
}

pub fn emit_bootstrap(org_id: &str, user_id: &str, granted: bool, reason: &str) {
    if granted {
        tracing::warn!(
            target: "governance.bootstrap",
            org_id,
            user_id,
            "first admin bootstrapped"
        );
    } else {
        tracing::info!(
            target: "governance.bootstrap",
            org_id,
            user_id,
            reason,
            "bootstrap refused"
        );
    }
}

pub fn emit_audit_appended(org_id: &str, action: &str, entry_id: Uuid) {
    tracing::debug!(
        target: "governance.audit",
        org_id,
        action,
        %entry_id,
        "audit entry staged"
    );
}
