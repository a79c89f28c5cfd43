//! ChangeSet lifecycle handlers, all under /orgs/:org_id.

use axum::{
    extract::{Path, Query},
    http::StatusCode,
    Extension, Json,
};
use serde::Deserialize;
use uuid::Uuid;

use artifact_gov_core::changesets::{AddChangeSetItem, AddTask, CreateChangeSet, SubmitOutcome};
use artifact_gov_core::principal::Principal;
use artifact_gov_core::types::{ChangeSet, ChangeSetItem, ChangeSetStatus, Task};

use super::Service;
use crate::error::AppError;

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub status: Option<ChangeSetStatus>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ReturnBody {
    #[serde(default)]
    pub reason: Option<String>,
}

pub async fn create(
    Extension(principal): Extension<Principal>,
    Extension(service): Extension<Service>,
    Path(org_id): Path<String>,
    Json(req): Json<CreateChangeSet>,
) -> Result<(StatusCode, Json<ChangeSet>), AppError> {
    let cs = service.create_change_set(&principal, &org_id, req).await?;
    Ok((StatusCode::CREATED, Json(cs)))
}

pub async fn list(
    Extension(principal): Extension<Principal>,
    Extension(service): Extension<Service>,
    Path(org_id): Path<String>,
    Query(q): Query<ListQuery>,
) -> Result<Json<Vec<ChangeSet>>, AppError> {
    Ok(Json(
        service.list_change_sets(&principal, &org_id, q.status).await?,
    ))
}

pub async fn get(
    Extension(principal): Extension<Principal>,
    Extension(service): Extension<Service>,
    Path((org_id, cs_id)): Path<(String, Uuid)>,
) -> Result<Json<ChangeSet>, AppError> {
    Ok(Json(service.get_change_set(&principal, &org_id, cs_id).await?))
}

pub async fn add_item(
    Extension(principal): Extension<Principal>,
    Extension(service): Extension<Service>,
    Path((org_id, cs_id)): Path<(String, Uuid)>,
    Json(req): Json<AddChangeSetItem>,
) -> Result<(StatusCode, Json<ChangeSetItem>), AppError> {
    let item = service
        .add_change_set_item(&principal, &org_id, cs_id, req)
        .await?;
    Ok((StatusCode::CREATED, Json(item)))
}

pub async fn remove_item(
    Extension(principal): Extension<Principal>,
    Extension(service): Extension<Service>,
    Path((org_id, cs_id, item_id)): Path<(String, Uuid, Uuid)>,
) -> Result<StatusCode, AppError> {
    service
        .remove_change_set_item(&principal, &org_id, cs_id, item_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn submit(
    Extension(principal): Extension<Principal>,
    Extension(service): Extension<Service>,
    Path((org_id, cs_id)): Path<(String, Uuid)>,
) -> Result<Json<SubmitOutcome>, AppError> {
    Ok(Json(
        service
            .submit_change_set_for_review(&principal, &org_id, cs_id)
            .await?,
    ))
}

pub async fn return_to_draft(
    Extension(principal): Extension<Principal>,
    Extension(service): Extension<Service>,
    Path((org_id, cs_id)): Path<(String, Uuid)>,
    body: Option<Json<ReturnBody>>,
) -> Result<Json<ChangeSet>, AppError> {
    let reason = body.and_then(|Json(b)| b.reason);
    Ok(Json(
        service
            .return_change_set_to_draft(&principal, &org_id, cs_id, reason)
            .await?,
    ))
}

// ── Tasks ─────────────────────────────────────────────────────

pub async fn add_task(
    Extension(principal): Extension<Principal>,
    Extension(service): Extension<Service>,
    Path((org_id, cs_id)): Path<(String, Uuid)>,
    Json(req): Json<AddTask>,
) -> Result<(StatusCode, Json<Task>), AppError> {
    let task = service.add_task(&principal, &org_id, cs_id, req).await?;
    Ok((StatusCode::CREATED, Json(task)))
}

pub async fn list_tasks(
    Extension(principal): Extension<Principal>,
    Extension(service): Extension<Service>,
    Path((org_id, cs_id)): Path<(String, Uuid)>,
) -> Result<Json<Vec<Task>>, AppError> {
    Ok(Json(service.list_tasks(&principal, &org_id, cs_id).await?))
}

pub async fn resolve_task(
    Extension(principal): Extension<Principal>,
    Extension(service): Extension<Service>,
    Path((org_id, task_id)): Path<(String, Uuid)>,
) -> Result<Json<Task>, AppError> {
    Ok(Json(service.resolve_task(&principal, &org_id, task_id).await?))
}
