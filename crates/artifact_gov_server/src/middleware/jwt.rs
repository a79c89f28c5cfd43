//! Bearer-token authentication.
//!
//! Validates an HS256 JWT, builds the [`Principal`] from its claims and puts it
//! in request extensions. Handlers never see raw tokens.

use axum::{
    extract::Request,
    http::header::AUTHORIZATION,
    middleware::Next,
    response::{IntoResponse, Response},
    Extension,
};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};

use artifact_gov_core::error::GovernanceError;
use artifact_gov_core::principal::{JwtClaims, Principal};

use crate::error::AppError;

#[derive(Clone)]
pub struct JwtConfig {
    key: DecodingKey,
    validation: Validation,
}

impl JwtConfig {
    pub fn from_secret(secret: &[u8]) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        Self {
            key: DecodingKey::from_secret(secret),
            validation,
        }
    }

    pub fn principal(&self, token: &str) -> Result<Principal, GovernanceError> {
        let data = decode::<JwtClaims>(token, &self.key, &self.validation)
            .map_err(|e| GovernanceError::Unauthenticated(format!("invalid token: {e}")))?;
        Principal::from_jwt_claims(&data.claims)
    }
}

pub async fn jwt_auth(
    Extension(config): Extension<JwtConfig>,
    mut request: Request,
    next: Next,
) -> Response {
    let token = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim);
    let Some(token) = token else {
        return AppError(GovernanceError::Unauthenticated(
            "missing bearer token".into(),
        ))
        .into_response();
    };
    match config.principal(token) {
        Ok(principal) => {
            tracing::debug!(user_id = %principal.user_id, "authenticated");
            request.extensions_mut().insert(principal);
            next.run(request).await
        }
        Err(e) => AppError(e).into_response(),
    }
}
