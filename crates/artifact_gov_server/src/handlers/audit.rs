use axum::{
    extract::{Path, Query},
    Extension, Json,
};

use artifact_gov_core::principal::Principal;
use artifact_gov_core::types::{AuditEntry, AuditFilter};

use super::Service;
use crate::error::AppError;

/// GET /orgs/:org_id/audit?entity_type&entity_id&change_set_id&action&limit
pub async fn list(
    Extension(principal): Extension<Principal>,
    Extension(service): Extension<Service>,
    Path(org_id): Path<String>,
    Query(filter): Query<AuditFilter>,
) -> Result<Json<Vec<AuditEntry>>, AppError> {
    Ok(Json(
        service.list_audit_entries(&principal, &org_id, filter).await?,
    ))
}
