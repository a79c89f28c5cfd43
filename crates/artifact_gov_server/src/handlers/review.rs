//! Approval, preflight and publish.
//!
//! POST /orgs/:org_id/change_sets/:cs_id/approve
//! POST /orgs/:org_id/change_sets/:cs_id/reject
//! GET  /orgs/:org_id/change_sets/:cs_id/preflight
//! POST /orgs/:org_id/change_sets/:cs_id/publish

use axum::{extract::Path, Extension, Json};
use uuid::Uuid;

use artifact_gov_core::approval::{ApprovalOutcome, ApproveRequest, RejectRequest};
use artifact_gov_core::preflight::PreflightReport;
use artifact_gov_core::principal::Principal;
use artifact_gov_core::publish::PublishOutcome;
use artifact_gov_core::types::ChangeSet;

use super::Service;
use crate::error::AppError;

pub async fn approve(
    Extension(principal): Extension<Principal>,
    Extension(service): Extension<Service>,
    Path((org_id, cs_id)): Path<(String, Uuid)>,
    Json(req): Json<ApproveRequest>,
) -> Result<Json<ApprovalOutcome>, AppError> {
    Ok(Json(
        service
            .approve_change_set(&principal, &org_id, cs_id, req)
            .await?,
    ))
}

pub async fn reject(
    Extension(principal): Extension<Principal>,
    Extension(service): Extension<Service>,
    Path((org_id, cs_id)): Path<(String, Uuid)>,
    Json(req): Json<RejectRequest>,
) -> Result<Json<ChangeSet>, AppError> {
    Ok(Json(
        service
            .reject_change_set(&principal, &org_id, cs_id, req)
            .await?,
    ))
}

/// Read-only; a report with issues is still a 200.
pub async fn preflight(
    Extension(principal): Extension<Principal>,
    Extension(service): Extension<Service>,
    Path((org_id, cs_id)): Path<(String, Uuid)>,
) -> Result<Json<PreflightReport>, AppError> {
    Ok(Json(
        service
            .get_publish_preflight(&principal, &org_id, cs_id)
            .await?,
    ))
}

pub async fn publish(
    Extension(principal): Extension<Principal>,
    Extension(service): Extension<Service>,
    Path((org_id, cs_id)): Path<(String, Uuid)>,
) -> Result<Json<PublishOutcome>, AppError> {
    let outcome = service
        .publish_change_set(&principal, &org_id, cs_id)
        .await?;
    tracing::info!(
        org_id = %org_id,
        change_set_id = %cs_id,
        published = outcome.published_count,
        "change set published"
    );
    Ok(Json(outcome))
}
