//! Domain value types — organizations, roles, versions, change sets, tasks,
//! live artifact records and audit entries. Pure values, no storage logic.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{EnumIter, EnumString};
use uuid::Uuid;

// ── Role hierarchy ────────────────────────────────────────────

/// Org-scoped role. Declaration order is the hierarchy, low → high.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    EnumIter,
    EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Role {
    Viewer,
    Compliance,
    Underwriter,
    Actuary,
    ProductManager,
    Admin,
}

impl Role {
    pub fn rank(&self) -> u8 {
        *self as u8
    }

    pub fn has_at_least(&self, required: Role) -> bool {
        self.rank() >= required.rank()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Viewer => "viewer",
            Self::Compliance => "compliance",
            Self::Underwriter => "underwriter",
            Self::Actuary => "actuary",
            Self::ProductManager => "product_manager",
            Self::Admin => "admin",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        s.parse().ok()
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ── Organizations ─────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Organization {
    pub org_id: String,
    pub name: String,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

/// One membership record per (org_id, user_id).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Membership {
    pub org_id: String,
    pub user_id: String,
    pub role: Role,
    pub granted_by: String,
    pub granted_at: DateTime<Utc>,
}

// ── Versioned entities ────────────────────────────────────────

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, EnumIter, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EntityType {
    Product,
    Coverage,
    Form,
    Rule,
    RateProgram,
    StateProgram,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Product => "product",
            Self::Coverage => "coverage",
            Self::Form => "form",
            Self::Rule => "rule",
            Self::RateProgram => "rate_program",
            Self::StateProgram => "state_program",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        s.parse().ok()
    }

    /// Structural parent type, used to derive a live record's owner from a
    /// version's `parent_id`.
    pub fn parent_type(&self) -> Option<EntityType> {
        match self {
            Self::Coverage | Self::Rule | Self::RateProgram | Self::StateProgram => {
                Some(Self::Product)
            }
            Self::Product | Self::Form => None,
        }
    }

    /// Role whose approval a ChangeSet item of this type requires.
    pub fn required_approver(&self) -> Role {
        match self {
            Self::Product => Role::ProductManager,
            Self::Coverage | Self::RateProgram => Role::Actuary,
            Self::Rule => Role::Underwriter,
            Self::Form | Self::StateProgram => Role::Compliance,
        }
    }

    pub fn collection(&self) -> Collection {
        match self {
            Self::Product => Collection::Products,
            Self::Coverage => Collection::Coverages,
            Self::Form => Collection::Forms,
            Self::Rule => Collection::Rules,
            Self::RateProgram => Collection::RatePrograms,
            Self::StateProgram => Collection::StatePrograms,
        }
    }
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Version lifecycle status.
///
/// Edges:
///   draft → pending_review → approved → published
///   pending_review → rejected → draft
///   approved → rejected (reviewer veto after approval)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionStatus {
    Draft,
    PendingReview,
    Approved,
    Published,
    Rejected,
}

impl VersionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::PendingReview => "pending_review",
            Self::Approved => "approved",
            Self::Published => "published",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(Self::Draft),
            "pending_review" => Some(Self::PendingReview),
            "approved" => Some(Self::Approved),
            "published" => Some(Self::Published),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }

    pub fn can_transition_to(&self, next: VersionStatus) -> bool {
        use VersionStatus::*;
        matches!(
            (self, next),
            (Draft, PendingReview)
                | (PendingReview, Approved)
                | (PendingReview, Rejected)
                | (Rejected, Draft)
                | (Approved, Published)
                | (Approved, Rejected)
        )
    }
}

impl std::fmt::Display for VersionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An immutable-once-submitted snapshot of one artifact's data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Version {
    pub version_id: Uuid,
    pub org_id: String,
    pub entity_type: EntityType,
    pub entity_id: String,
    pub parent_id: Option<String>,
    pub version_number: u64,
    pub status: VersionStatus,
    pub data: serde_json::Value,
    pub summary: Option<String>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub parent_version_id: Option<Uuid>,
    pub published_at: Option<DateTime<Utc>>,
}

impl Version {
    pub fn belongs_to(&self, entity_type: EntityType, entity_id: &str) -> bool {
        self.entity_type == entity_type && self.entity_id == entity_id
    }

    pub fn record_key(&self) -> RecordKey {
        RecordKey::new(self.entity_type.collection(), &self.entity_id)
    }

    /// Owner of the live record this version publishes into.
    pub fn owner_key(&self) -> Option<RecordKey> {
        let parent_type = self.entity_type.parent_type()?;
        self.parent_id
            .as_deref()
            .map(|id| RecordKey::new(parent_type.collection(), id))
    }
}

// ── ChangeSets ────────────────────────────────────────────────

/// ChangeSet lifecycle status.
///
/// Transitions:
///   Draft → ReadyForReview → Approved → Published
///   ReadyForReview | Approved → Rejected (single veto)
///   ReadyForReview | Rejected → Draft (explicit return, approvals cleared)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeSetStatus {
    Draft,
    ReadyForReview,
    Approved,
    Rejected,
    Published,
}

impl ChangeSetStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::ReadyForReview => "ready_for_review",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Published => "published",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(Self::Draft),
            "ready_for_review" => Some(Self::ReadyForReview),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            "published" => Some(Self::Published),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Published)
    }
}

impl std::fmt::Display for ChangeSetStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemAction {
    Create,
    Update,
    Delete,
}

impl ItemAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }

    /// Whether the item's version goes through review (create/update) or
    /// only marks a deletion.
    pub fn is_reviewed(&self) -> bool {
        !matches!(self, Self::Delete)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeSetItem {
    pub item_id: Uuid,
    pub entity_type: EntityType,
    pub entity_id: String,
    pub version_id: Uuid,
    pub action: ItemAction,
    pub added_by: String,
    pub added_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalDecision {
    Approved,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Approval {
    pub role: Role,
    pub user_id: String,
    pub decision: ApprovalDecision,
    pub notes: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeSet {
    pub change_set_id: Uuid,
    pub org_id: String,
    pub owner_user_id: String,
    pub name: String,
    pub description: Option<String>,
    pub status: ChangeSetStatus,
    pub items: Vec<ChangeSetItem>,
    pub approvals: Vec<Approval>,
    pub required_roles: Vec<Role>,
    /// Optimistic-concurrency revision; every successful write increments it.
    pub revision: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub published_at: Option<DateTime<Utc>>,
    pub published_by: Option<String>,
}

impl ChangeSet {
    pub fn is_owner(&self, user_id: &str) -> bool {
        self.owner_user_id == user_id
    }

    pub fn find_item(&self, item_id: Uuid) -> Option<&ChangeSetItem> {
        self.items.iter().find(|i| i.item_id == item_id)
    }

    /// Required roles with a standing `approved` decision, in rank order.
    pub fn approved_roles(&self) -> Vec<Role> {
        self.required_roles
            .iter()
            .copied()
            .filter(|role| {
                self.approvals
                    .iter()
                    .any(|a| a.role == *role && a.decision == ApprovalDecision::Approved)
            })
            .collect()
    }

    pub fn pending_roles(&self) -> Vec<Role> {
        let approved = self.approved_roles();
        self.required_roles
            .iter()
            .copied()
            .filter(|r| !approved.contains(r))
            .collect()
    }

    pub fn all_approved(&self) -> bool {
        !self.has_rejection() && self.pending_roles().is_empty()
    }

    pub fn has_rejection(&self) -> bool {
        self.approvals
            .iter()
            .any(|a| a.decision == ApprovalDecision::Rejected)
    }

    /// Record a decision; the latest decision per role replaces any earlier one.
    pub fn record_decision(&mut self, approval: Approval) {
        self.approvals.retain(|a| a.role != approval.role);
        self.approvals.push(approval);
        self.approvals.sort_by_key(|a| a.role);
    }
}

// ── Tasks ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Open,
    Done,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum TaskKind {
    Approval { role: Role },
    Manual,
}

/// Work item referencing a ChangeSet. Open blocking tasks prevent publish.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub task_id: Uuid,
    pub org_id: String,
    pub change_set_id: Uuid,
    pub kind: TaskKind,
    pub title: String,
    pub blocking: bool,
    pub status: TaskStatus,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub resolved_by: Option<String>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn is_open_blocker(&self) -> bool {
        self.blocking && self.status == TaskStatus::Open
    }

    pub fn approval_role(&self) -> Option<Role> {
        match self.kind {
            TaskKind::Approval { role } => Some(role),
            TaskKind::Manual => None,
        }
    }
}

// ── Live artifact records ─────────────────────────────────────

/// Collections holding live (published) records.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, EnumIter, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Collection {
    Products,
    Coverages,
    Forms,
    Rules,
    RatePrograms,
    StatePrograms,
    FormCoverages,
    CoverageLimits,
    CoverageDeductibles,
}

impl Collection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Products => "products",
            Self::Coverages => "coverages",
            Self::Forms => "forms",
            Self::Rules => "rules",
            Self::RatePrograms => "rate_programs",
            Self::StatePrograms => "state_programs",
            Self::FormCoverages => "form_coverages",
            Self::CoverageLimits => "coverage_limits",
            Self::CoverageDeductibles => "coverage_deductibles",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        s.parse().ok()
    }

    /// Dependent collections hold unversioned child rows.
    pub fn is_dependent(&self) -> bool {
        self.entity_type().is_none()
    }

    pub fn entity_type(&self) -> Option<EntityType> {
        match self {
            Self::Products => Some(EntityType::Product),
            Self::Coverages => Some(EntityType::Coverage),
            Self::Forms => Some(EntityType::Form),
            Self::Rules => Some(EntityType::Rule),
            Self::RatePrograms => Some(EntityType::RateProgram),
            Self::StatePrograms => Some(EntityType::StateProgram),
            Self::FormCoverages | Self::CoverageLimits | Self::CoverageDeductibles => None,
        }
    }
}

impl std::fmt::Display for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordKey {
    pub collection: Collection,
    pub record_id: String,
}

impl RecordKey {
    pub fn new(collection: Collection, record_id: impl Into<String>) -> Self {
        Self {
            collection,
            record_id: record_id.into(),
        }
    }

    pub fn entity(entity_type: EntityType, entity_id: impl Into<String>) -> Self {
        Self::new(entity_type.collection(), entity_id)
    }

    /// `collection/record_id`, the form used for owner indexes.
    pub fn path(&self) -> String {
        format!("{}/{}", self.collection, self.record_id)
    }

    pub fn parse_path(path: &str) -> Option<Self> {
        let (collection, record_id) = path.split_once('/')?;
        if record_id.is_empty() {
            return None;
        }
        Some(Self::new(Collection::parse(collection)?, record_id))
    }
}

impl std::fmt::Display for RecordKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.collection, self.record_id)
    }
}

/// A live document. Entity records carry the current-version pointer;
/// dependent records leave it empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactRecord {
    pub org_id: String,
    pub key: RecordKey,
    /// Records this one depends on; deleting any owner cascades here.
    pub owners: Vec<RecordKey>,
    pub data: serde_json::Value,
    pub current_version_id: Option<Uuid>,
    pub current_version_number: Option<u64>,
    pub updated_by: String,
    pub updated_at: DateTime<Utc>,
}

impl ArtifactRecord {
    pub fn is_owned_by(&self, owner: &RecordKey) -> bool {
        self.owners.iter().any(|o| o == owner)
    }
}

// ── Audit ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    VersionCreated,
    VersionCloned,
    VersionUpdated,
    VersionStatusChanged,
    ChangeSetCreated,
    ChangeSetItemAdded,
    ChangeSetItemRemoved,
    ChangeSetSubmitted,
    ChangeSetApproved,
    ChangeSetRejected,
    ChangeSetReturnedToDraft,
    ChangeSetPublished,
    ArtifactCascadeDeleted,
    DependentRecordCreated,
    MemberRoleSet,
    MemberRemoved,
    OrganizationCreated,
    AdminBootstrap,
    TaskAdded,
    TaskResolved,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::VersionCreated => "version_created",
            Self::VersionCloned => "version_cloned",
            Self::VersionUpdated => "version_updated",
            Self::VersionStatusChanged => "version_status_changed",
            Self::ChangeSetCreated => "change_set_created",
            Self::ChangeSetItemAdded => "change_set_item_added",
            Self::ChangeSetItemRemoved => "change_set_item_removed",
            Self::ChangeSetSubmitted => "change_set_submitted",
            Self::ChangeSetApproved => "change_set_approved",
            Self::ChangeSetRejected => "change_set_rejected",
            Self::ChangeSetReturnedToDraft => "change_set_returned_to_draft",
            Self::ChangeSetPublished => "change_set_published",
            Self::ArtifactCascadeDeleted => "artifact_cascade_deleted",
            Self::DependentRecordCreated => "dependent_record_created",
            Self::MemberRoleSet => "member_role_set",
            Self::MemberRemoved => "member_removed",
            Self::OrganizationCreated => "organization_created",
            Self::AdminBootstrap => "admin_bootstrap",
            Self::TaskAdded => "task_added",
            Self::TaskResolved => "task_resolved",
        }
    }
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Immutable audit record. Never updated or deleted once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub entry_id: Uuid,
    pub org_id: String,
    pub action: AuditAction,
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
    pub change_set_id: Option<Uuid>,
    pub user_id: String,
    pub timestamp: DateTime<Utc>,
    pub previous_values: Option<serde_json::Value>,
    pub new_values: Option<serde_json::Value>,
    /// Hex SHA-256 over the entry's content, set by `AuditLogger`.
    pub digest: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuditFilter {
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
    pub change_set_id: Option<Uuid>,
    pub action: Option<AuditAction>,
    pub limit: Option<usize>,
}

impl AuditFilter {
    pub fn matches(&self, entry: &AuditEntry) -> bool {
        self.entity_type
            .as_ref()
            .map_or(true, |t| entry.entity_type.as_ref() == Some(t))
            && self
                .entity_id
                .as_ref()
                .map_or(true, |id| entry.entity_id.as_ref() == Some(id))
            && self
                .change_set_id
                .map_or(true, |id| entry.change_set_id == Some(id))
            && self.action.map_or(true, |a| entry.action == a)
    }
}

// ── Tests ─────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn role_hierarchy_is_ordered() {
        let roles: Vec<Role> = Role::iter().collect();
        for pair in roles.windows(2) {
            assert!(pair[0].rank() < pair[1].rank());
            assert!(pair[1].has_at_least(pair[0]));
            assert!(!pair[0].has_at_least(pair[1]));
        }
        assert!(Role::Admin.has_at_least(Role::ProductManager));
        assert!(Role::Actuary.has_at_least(Role::Actuary));
    }

    #[test]
    fn role_string_round_trip() {
        for role in Role::iter() {
            assert_eq!(Role::parse(role.as_str()), Some(role));
            assert_eq!(serde_json::to_value(role).unwrap(), role.as_str());
        }
        assert_eq!(Role::parse("superuser"), None);
    }

    #[test]
    fn entity_type_string_round_trip() {
        for et in EntityType::iter() {
            assert_eq!(EntityType::parse(et.as_str()), Some(et));
            assert_eq!(serde_json::to_value(et).unwrap(), et.as_str());
            assert_eq!(et.collection().entity_type(), Some(et));
        }
    }

    #[test]
    fn pricing_items_require_actuary() {
        assert_eq!(EntityType::RateProgram.required_approver(), Role::Actuary);
        assert_eq!(EntityType::Coverage.required_approver(), Role::Actuary);
        assert_eq!(EntityType::Form.required_approver(), Role::Compliance);
    }

    #[test]
    fn version_status_graph() {
        use VersionStatus::*;
        assert!(Draft.can_transition_to(PendingReview));
        assert!(PendingReview.can_transition_to(Approved));
        assert!(PendingReview.can_transition_to(Rejected));
        assert!(Rejected.can_transition_to(Draft));
        assert!(Approved.can_transition_to(Published));

        // No skipping pending_review, no going backwards from published.
        assert!(!Draft.can_transition_to(Approved));
        assert!(!Draft.can_transition_to(Published));
        assert!(!Published.can_transition_to(Draft));
        assert!(!PendingReview.can_transition_to(Draft));
        assert!(!Draft.can_transition_to(Draft));
    }

    #[test]
    fn change_set_status_round_trip() {
        for status in [
            ChangeSetStatus::Draft,
            ChangeSetStatus::ReadyForReview,
            ChangeSetStatus::Approved,
            ChangeSetStatus::Rejected,
            ChangeSetStatus::Published,
        ] {
            assert_eq!(ChangeSetStatus::parse(status.as_str()), Some(status));
        }
    }

    fn approval(role: Role, decision: ApprovalDecision) -> Approval {
        Approval {
            role,
            user_id: "u".into(),
            decision,
            notes: None,
            timestamp: Utc::now(),
        }
    }

    fn change_set(required: Vec<Role>) -> ChangeSet {
        let now = Utc::now();
        ChangeSet {
            change_set_id: Uuid::new_v4(),
            org_id: "org".into(),
            owner_user_id: "owner".into(),
            name: "cs".into(),
            description: None,
            status: ChangeSetStatus::ReadyForReview,
            items: vec![],
            approvals: vec![],
            required_roles: required,
            revision: 1,
            created_at: now,
            updated_at: now,
            submitted_at: Some(now),
            published_at: None,
            published_by: None,
        }
    }

    #[test]
    fn latest_decision_per_role_wins() {
        let mut cs = change_set(vec![Role::Compliance, Role::Actuary]);
        cs.record_decision(approval(Role::Actuary, ApprovalDecision::Rejected));
        cs.record_decision(approval(Role::Actuary, ApprovalDecision::Approved));
        assert_eq!(cs.approvals.len(), 1);
        assert_eq!(cs.approved_roles(), vec![Role::Actuary]);
        assert_eq!(cs.pending_roles(), vec![Role::Compliance]);
        assert!(!cs.all_approved());

        cs.record_decision(approval(Role::Compliance, ApprovalDecision::Approved));
        assert!(cs.all_approved());
    }

    #[test]
    fn any_rejection_blocks_all_approved() {
        let mut cs = change_set(vec![Role::Actuary]);
        cs.record_decision(approval(Role::Actuary, ApprovalDecision::Approved));
        cs.record_decision(approval(Role::Admin, ApprovalDecision::Rejected));
        assert!(cs.has_rejection());
        assert!(!cs.all_approved());
    }

    #[test]
    fn record_key_path_round_trip() {
        let key = RecordKey::new(Collection::FormCoverages, "fc-1");
        assert_eq!(key.path(), "form_coverages/fc-1");
        assert_eq!(RecordKey::parse_path(&key.path()), Some(key));
        assert_eq!(RecordKey::parse_path("nonsense"), None);
        assert_eq!(RecordKey::parse_path("coverages/"), None);
    }

    #[test]
    fn version_owner_key_follows_parent_type() {
        let now = Utc::now();
        let mut v = Version {
            version_id: Uuid::new_v4(),
            org_id: "org".into(),
            entity_type: EntityType::Coverage,
            entity_id: "cov-1".into(),
            parent_id: Some("prod-1".into()),
            version_number: 1,
            status: VersionStatus::Draft,
            data: serde_json::json!({}),
            summary: None,
            created_by: "u".into(),
            created_at: now,
            updated_at: now,
            parent_version_id: None,
            published_at: None,
        };
        assert_eq!(
            v.owner_key(),
            Some(RecordKey::new(Collection::Products, "prod-1"))
        );
        v.entity_type = EntityType::Form;
        assert_eq!(v.owner_key(), None);
    }

    #[test]
    fn audit_filter_matches() {
        let cs_id = Uuid::new_v4();
        let entry = AuditEntry {
            entry_id: Uuid::new_v4(),
            org_id: "org".into(),
            action: AuditAction::ChangeSetPublished,
            entity_type: Some("change_set".into()),
            entity_id: Some(cs_id.to_string()),
            change_set_id: Some(cs_id),
            user_id: "u".into(),
            timestamp: Utc::now(),
            previous_values: None,
            new_values: None,
            digest: String::new(),
        };
        assert!(AuditFilter::default().matches(&entry));
        let by_cs = AuditFilter {
            change_set_id: Some(cs_id),
            ..Default::default()
        };
        assert!(by_cs.matches(&entry));
        let other = AuditFilter {
            change_set_id: Some(Uuid::new_v4()),
            ..Default::default()
        };
        assert!(!other.matches(&entry));
    }
}
