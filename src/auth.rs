//! Authenticated caller, as asserted by the identity provider's bearer token.
//!
//! Tokens are HS256 JWTs carrying `{ sub, role, exp }`. Issuing them is the
//! identity provider's job; this module only trusts and decodes them.

use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts},
};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, errors::ErrorKind};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::{app_error::AppError, app_state::AppState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Customer,
    Staff,
    Admin,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: i32,
    pub role: Role,
    pub exp: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub id: i32,
    pub role: Role,
}

impl Actor {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Staff and admins both operate the floor.
    pub fn is_staff(&self) -> bool {
        matches!(self.role, Role::Staff | Role::Admin)
    }

    pub fn require_staff(&self) -> Result<(), AppError> {
        if self.is_staff() {
            Ok(())
        } else {
            Err(AppError::ForbiddenResource("Staff access required".into()))
        }
    }

    pub fn require_admin(&self) -> Result<(), AppError> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(AppError::ForbiddenResource("Admin access required".into()))
        }
    }
}

#[derive(Clone)]
pub struct JwtKeys {
    decoding: DecodingKey,
}

impl JwtKeys {
    pub fn from_secret(secret: &str) -> Self {
        Self {
            decoding: DecodingKey::from_secret(secret.as_bytes()),
        }
    }

    pub fn verify(&self, token: &str) -> Result<Actor, AppError> {
        let validation = Validation::new(Algorithm::HS256);
        let data = decode::<Claims>(token, &self.decoding, &validation).map_err(|err| {
            match err.kind() {
                ErrorKind::ExpiredSignature => AppError::Unauthorized("Token expired".into()),
                _ => AppError::Unauthorized("Invalid token".into()),
            }
        })?;

        Ok(Actor {
            id: data.claims.sub,
            role: data.claims.role,
        })
    }
}

fn bearer_token(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

impl FromRequestParts<AppState> for Actor {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        if let Some(actor) = parts.extensions.get::<Actor>() {
            return Ok(*actor);
        }

        let Some(token) = bearer_token(parts) else {
            tracing::debug!(uri = %parts.uri, "Request without bearer token");
            return Err(AppError::Unauthorized("Authentication required".into()));
        };

        let actor = state.jwt_keys.verify(token).inspect_err(|err| {
            tracing::warn!(uri = %parts.uri, "Rejected token: {}", err);
        })?;

        parts.extensions.insert(actor);
        Ok(actor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{EncodingKey, Header, encode};

    fn token(secret: &str, sub: i32, role: Role, exp: usize) -> String {
        encode(
            &Header::default(),
            &Claims { sub, role, exp },
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    fn far_future() -> usize {
        (chrono::Utc::now().timestamp() + 3600) as usize
    }

    #[test]
    fn valid_token_yields_actor() {
        let keys = JwtKeys::from_secret("s3cret");
        let actor = keys.verify(&token("s3cret", 42, Role::Staff, far_future())).unwrap();
        assert_eq!(actor, Actor { id: 42, role: Role::Staff });
        assert!(actor.is_staff());
        assert!(!actor.is_admin());
    }

    #[test]
    fn token_signed_with_other_secret_is_rejected() {
        let keys = JwtKeys::from_secret("s3cret");
        let err = keys
            .verify(&token("other", 1, Role::Admin, far_future()))
            .unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(_)));
    }

    #[test]
    fn expired_token_is_rejected() {
        let keys = JwtKeys::from_secret("s3cret");
        let err = keys.verify(&token("s3cret", 1, Role::Customer, 1)).unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(msg) if msg == "Token expired"));
    }

    #[test]
    fn customers_are_not_staff() {
        let actor = Actor { id: 3, role: Role::Customer };
        assert!(actor.require_staff().is_err());
        assert!(actor.require_admin().is_err());
        assert!(Actor { id: 4, role: Role::Admin }.require_staff().is_ok());
    }
}
