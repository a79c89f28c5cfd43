use std::collections::HashMap;

use crate::error::GovernanceError;

/// The authenticated caller. Org-scoped roles are NOT carried here; they are
/// resolved per request from membership records by `RoleResolver`.
#[derive(Debug, Clone)]
pub struct Principal {
    pub user_id: String,
    /// Platform-wide admin, granted by an explicit identity-provider claim.
    pub global_admin: bool,
    pub claims: HashMap<String, serde_json::Value>,
}

impl Principal {
    /// Construct from validated JWT claims at the server boundary.
    /// The server middleware calls this; core logic never reads raw tokens.
    pub fn from_jwt_claims(claims: &JwtClaims) -> Result<Self, GovernanceError> {
        let user_id = claims
            .sub
            .clone()
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| GovernanceError::Unauthenticated("missing sub claim".into()))?;
        Ok(Self {
            user_id,
            global_admin: claims.global_admin.unwrap_or(false),
            claims: claims.extra.clone(),
        })
    }

    /// Construct explicitly for in-process callers and tests.
    /// There is no implicit or thread-local identity anywhere in the codebase.
    pub fn in_process(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            global_admin: false,
            claims: HashMap::new(),
        }
    }

    pub fn global_admin(user_id: impl Into<String>) -> Self {
        Self {
            global_admin: true,
            ..Self::in_process(user_id)
        }
    }

    pub fn require_global_admin(&self) -> Result<(), GovernanceError> {
        if self.global_admin {
            Ok(())
        } else {
            Err(GovernanceError::PermissionDenied(format!(
                "{} is not a global admin",
                self.user_id
            )))
        }
    }
}

/// JWT claims shape expected from the identity provider.
#[derive(Debug, serde::Deserialize)]
pub struct JwtClaims {
    pub sub: Option<String>,
    pub global_admin: Option<bool>,
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_jwt_claims_happy_path() {
        let claims: JwtClaims = serde_json::from_value(serde_json::json!({
            "sub": "alice",
            "global_admin": true,
            "email": "alice@example.com",
            "exp": 1_900_000_000u64
        }))
        .unwrap();
        let p = Principal::from_jwt_claims(&claims).unwrap();
        assert_eq!(p.user_id, "alice");
        assert!(p.global_admin);
        assert_eq!(p.claims["email"], "alice@example.com");
    }

    #[test]
    fn from_jwt_claims_missing_sub_is_unauthenticated() {
        let claims: JwtClaims = serde_json::from_value(serde_json::json!({})).unwrap();
        let err = Principal::from_jwt_claims(&claims).unwrap_err();
        assert!(matches!(err, GovernanceError::Unauthenticated(_)));
    }

    #[test]
    fn from_jwt_claims_blank_sub_is_unauthenticated() {
        let claims: JwtClaims = serde_json::from_value(serde_json::json!({"sub": "  "})).unwrap();
        assert!(Principal::from_jwt_claims(&claims).is_err());
    }

    #[test]
    fn global_admin_defaults_to_false() {
        let claims: JwtClaims = serde_json::from_value(serde_json::json!({"sub": "bob"})).unwrap();
        let p = Principal::from_jwt_claims(&claims).unwrap();
        assert!(!p.global_admin);
        assert!(p.require_global_admin().is_err());
    }

    #[test]
    fn email_claim_does_not_grant_admin() {
        let claims: JwtClaims = serde_json::from_value(serde_json::json!({
            "sub": "root",
            "email": "admin@example.com"
        }))
        .unwrap();
        let p = Principal::from_jwt_claims(&claims).unwrap();
        assert!(!p.global_admin);
    }

    #[test]
    fn in_process_constructors() {
        assert!(!Principal::in_process("u").global_admin);
        assert!(Principal::global_admin("ops").require_global_admin().is_ok());
    }
}
