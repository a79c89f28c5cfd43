//! Organizations and membership.
//!
//! POST   /orgs                                  — create (global admin)
//! GET    /orgs/:org_id                          — get
//! GET    /orgs/:org_id/me                       — caller's effective role
//! POST   /orgs/:org_id/bootstrap_admin          — claim the first admin seat
//! GET    /orgs/:org_id/members                  — list
//! PUT    /orgs/:org_id/members/:user_id         — set role
//! DELETE /orgs/:org_id/members/:user_id         — remove

use axum::{extract::Path, http::StatusCode, Extension, Json};
use serde::Deserialize;

use artifact_gov_core::principal::Principal;
use artifact_gov_core::types::{Membership, Organization, Role};

use super::Service;
use crate::error::AppError;

#[derive(Debug, Deserialize)]
pub struct CreateOrganizationBody {
    pub org_id: String,
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct SetRoleBody {
    pub role: Role,
}

pub async fn create_organization(
    Extension(principal): Extension<Principal>,
    Extension(service): Extension<Service>,
    Json(body): Json<CreateOrganizationBody>,
) -> Result<(StatusCode, Json<Organization>), AppError> {
    let org = service
        .create_organization(&principal, &body.org_id, &body.name)
        .await?;
    Ok((StatusCode::CREATED, Json(org)))
}

pub async fn get_organization(
    Extension(principal): Extension<Principal>,
    Extension(service): Extension<Service>,
    Path(org_id): Path<String>,
) -> Result<Json<Organization>, AppError> {
    Ok(Json(service.get_organization(&principal, &org_id).await?))
}

pub async fn my_role(
    Extension(principal): Extension<Principal>,
    Extension(service): Extension<Service>,
    Path(org_id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let role = service.my_role(&principal, &org_id).await?;
    Ok(Json(serde_json::json!({
        "user_id": principal.user_id,
        "role": role,
    })))
}

pub async fn bootstrap_admin(
    Extension(principal): Extension<Principal>,
    Extension(service): Extension<Service>,
    Path(org_id): Path<String>,
) -> Result<Json<Membership>, AppError> {
    Ok(Json(service.bootstrap_first_admin(&principal, &org_id).await?))
}

pub async fn list_members(
    Extension(principal): Extension<Principal>,
    Extension(service): Extension<Service>,
    Path(org_id): Path<String>,
) -> Result<Json<Vec<Membership>>, AppError> {
    Ok(Json(service.list_members(&principal, &org_id).await?))
}

pub async fn set_member_role(
    Extension(principal): Extension<Principal>,
    Extension(service): Extension<Service>,
    Path((org_id, user_id)): Path<(String, String)>,
    Json(body): Json<SetRoleBody>,
) -> Result<Json<Membership>, AppError> {
    Ok(Json(
        service
            .set_member_role(&principal, &org_id, &user_id, body.role)
            .await?,
    ))
}

pub async fn remove_member(
    Extension(principal): Extension<Principal>,
    Extension(service): Extension<Service>,
    Path((org_id, user_id)): Path<(String, String)>,
) -> Result<StatusCode, AppError> {
    service.remove_member(&principal, &org_id, &user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
