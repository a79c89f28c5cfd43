//! Version handlers, all under /orgs/:org_id.
//!
//! POST  /versions                        — create draft
//! POST  /versions/clone                  — clone into a new draft
//! GET   /versions?entity_type&entity_id  — list, newest first
//! GET   /versions/current?entity_type&entity_id
//! GET   /versions/compare?from&to        — field diff
//! GET   /versions/:version_id
//! PATCH /versions/:version_id            — edit a draft
//! POST  /versions/:version_id/transition — direct status move

use axum::{
    extract::{Path, Query},
    http::StatusCode,
    Extension, Json,
};
use serde::Deserialize;
use uuid::Uuid;

use artifact_gov_core::principal::Principal;
use artifact_gov_core::types::{EntityType, Version, VersionStatus};
use artifact_gov_core::versions::{
    CloneVersion, CreateDraftVersion, TransitionOutcome, UpdateDraftVersion, VersionDiff,
};

use super::Service;
use crate::error::AppError;

#[derive(Debug, Deserialize)]
pub struct EntityQuery {
    #[serde(alias = "entityType")]
    pub entity_type: EntityType,
    #[serde(alias = "entityId")]
    pub entity_id: String,
}

#[derive(Debug, Deserialize)]
pub struct CompareQuery {
    pub from: Uuid,
    pub to: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct TransitionBody {
    pub entity_type: EntityType,
    pub entity_id: String,
    pub status: VersionStatus,
}

pub async fn create_draft(
    Extension(principal): Extension<Principal>,
    Extension(service): Extension<Service>,
    Path(org_id): Path<String>,
    Json(req): Json<CreateDraftVersion>,
) -> Result<(StatusCode, Json<Version>), AppError> {
    let version = service.create_draft_version(&principal, &org_id, req).await?;
    Ok((StatusCode::CREATED, Json(version)))
}

pub async fn clone(
    Extension(principal): Extension<Principal>,
    Extension(service): Extension<Service>,
    Path(org_id): Path<String>,
    Json(req): Json<CloneVersion>,
) -> Result<(StatusCode, Json<Version>), AppError> {
    let version = service.clone_version(&principal, &org_id, req).await?;
    Ok((StatusCode::CREATED, Json(version)))
}

pub async fn list(
    Extension(principal): Extension<Principal>,
    Extension(service): Extension<Service>,
    Path(org_id): Path<String>,
    Query(q): Query<EntityQuery>,
) -> Result<Json<Vec<Version>>, AppError> {
    Ok(Json(
        service
            .list_versions(&principal, &org_id, q.entity_type, &q.entity_id)
            .await?,
    ))
}

pub async fn current(
    Extension(principal): Extension<Principal>,
    Extension(service): Extension<Service>,
    Path(org_id): Path<String>,
    Query(q): Query<EntityQuery>,
) -> Result<Json<Option<Version>>, AppError> {
    Ok(Json(
        service
            .get_current_version(&principal, &org_id, q.entity_type, &q.entity_id)
            .await?,
    ))
}

pub async fn compare(
    Extension(principal): Extension<Principal>,
    Extension(service): Extension<Service>,
    Path(org_id): Path<String>,
    Query(q): Query<CompareQuery>,
) -> Result<Json<VersionDiff>, AppError> {
    Ok(Json(
        service
            .compare_versions(&principal, &org_id, q.from, q.to)
            .await?,
    ))
}

pub async fn get(
    Extension(principal): Extension<Principal>,
    Extension(service): Extension<Service>,
    Path((org_id, version_id)): Path<(String, Uuid)>,
) -> Result<Json<Version>, AppError> {
    Ok(Json(service.get_version(&principal, &org_id, version_id).await?))
}

pub async fn update_draft(
    Extension(principal): Extension<Principal>,
    Extension(service): Extension<Service>,
    Path((org_id, version_id)): Path<(String, Uuid)>,
    Json(req): Json<UpdateDraftVersion>,
) -> Result<Json<Version>, AppError> {
    Ok(Json(
        service
            .update_draft_version(&principal, &org_id, version_id, req)
            .await?,
    ))
}

pub async fn transition(
    Extension(principal): Extension<Principal>,
    Extension(service): Extension<Service>,
    Path((org_id, version_id)): Path<(String, Uuid)>,
    Json(body): Json<TransitionBody>,
) -> Result<Json<TransitionOutcome>, AppError> {
    Ok(Json(
        service
            .transition_version_status(
                &principal,
                &org_id,
                body.entity_type,
                &body.entity_id,
                version_id,
                body.status,
            )
            .await?,
    ))
}
