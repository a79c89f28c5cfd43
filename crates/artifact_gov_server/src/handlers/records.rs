//! Live record maintenance: cascade delete, dependent writes, integrity checks.

use axum::{extract::Path, http::StatusCode, Extension, Json};

use artifact_gov_core::cascade::{
    CascadeOutcome, ComprehensiveReport, CoverageIntegrityReport, OrphanedRecord,
    PutDependentRecord,
};
use artifact_gov_core::principal::Principal;
use artifact_gov_core::types::{ArtifactRecord, EntityType};

use super::Service;
use crate::error::AppError;

pub async fn delete_cascade(
    Extension(principal): Extension<Principal>,
    Extension(service): Extension<Service>,
    Path((org_id, entity_type, entity_id)): Path<(String, EntityType, String)>,
) -> Result<Json<CascadeOutcome>, AppError> {
    Ok(Json(
        service
            .delete_artifact_cascade(&principal, &org_id, entity_type, &entity_id)
            .await?,
    ))
}

pub async fn put_dependent(
    Extension(principal): Extension<Principal>,
    Extension(service): Extension<Service>,
    Path(org_id): Path<String>,
    Json(req): Json<PutDependentRecord>,
) -> Result<(StatusCode, Json<ArtifactRecord>), AppError> {
    let record = service.put_dependent_record(&principal, &org_id, req).await?;
    Ok((StatusCode::CREATED, Json(record)))
}

pub async fn orphans(
    Extension(principal): Extension<Principal>,
    Extension(service): Extension<Service>,
    Path(org_id): Path<String>,
) -> Result<Json<Vec<OrphanedRecord>>, AppError> {
    Ok(Json(service.detect_orphaned_records(&principal, &org_id).await?))
}

pub async fn coverage_integrity(
    Extension(principal): Extension<Principal>,
    Extension(service): Extension<Service>,
    Path((org_id, coverage_id)): Path<(String, String)>,
) -> Result<Json<CoverageIntegrityReport>, AppError> {
    Ok(Json(
        service
            .validate_coverage_integrity(&principal, &org_id, &coverage_id)
            .await?,
    ))
}

pub async fn comprehensive(
    Extension(principal): Extension<Principal>,
    Extension(service): Extension<Service>,
    Path(org_id): Path<String>,
) -> Result<Json<ComprehensiveReport>, AppError> {
    Ok(Json(service.run_comprehensive_check(&principal, &org_id).await?))
}
