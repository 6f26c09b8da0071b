use crate::errors::ServiceError;
use async_trait::async_trait;
use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts, HeaderMap},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// Claims carried by the identity collaborator's access tokens.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user id)
    pub sub: String,
    /// "user" or "admin"
    pub role: String,
    /// Expiration time (unix seconds)
    pub exp: i64,
}

/// Authenticated principal, attached to request extensions by
/// [`auth_middleware`].
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub user_id: Uuid,
    pub role: String,
}

impl AuthenticatedUser {
    pub fn is_admin(&self) -> bool {
        self.role == "admin"
    }

    pub fn require_admin(&self) -> Result<(), ServiceError> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(ServiceError::Forbidden(
                "You do not have permission to perform this action".to_string(),
            ))
        }
    }
}

/// Shared verifier state for the auth middleware.
#[derive(Clone)]
pub struct JwtVerifier {
    secret: Arc<String>,
}

impl JwtVerifier {
    pub fn new(secret: &str) -> Self {
        Self {
            secret: Arc::new(secret.to_string()),
        }
    }
}

/// Mint an HS256 access token. Used by tests and operational tooling; token
/// issuance for real users lives in the identity service.
pub fn issue_token(
    user_id: Uuid,
    role: &str,
    secret: &str,
    ttl: Duration,
) -> Result<String, ServiceError> {
    let claims = Claims {
        sub: user_id.to_string(),
        role: role.to_string(),
        exp: (Utc::now() + ttl).timestamp(),
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| ServiceError::InternalError(format!("Failed to issue token: {}", e)))
}

pub fn decode_token(token: &str, secret: &str) -> Result<Claims, ServiceError> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|e| ServiceError::Unauthorized(format!("Invalid token: {}", e)))?;
    Ok(data.claims)
}

/// Layer for all protected routes: validates the bearer token and stores the
/// principal in request extensions for the [`AuthenticatedUser`] extractor.
pub async fn auth_middleware(
    State(verifier): State<JwtVerifier>,
    mut request: Request,
    next: Next,
) -> Response {
    match authenticate(request.headers(), &verifier.secret) {
        Ok(user) => {
            request.extensions_mut().insert(user);
            next.run(request).await
        }
        Err(e) => e.into_response(),
    }
}

fn authenticate(headers: &HeaderMap, secret: &str) -> Result<AuthenticatedUser, ServiceError> {
    let header_value = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("");

    let token = match header_value.strip_prefix("Bearer ") {
        Some(token) => token.trim(),
        None => {
            return Err(ServiceError::Unauthorized(
                "You are not logged in! Please log in to get access.".to_string(),
            ))
        }
    };

    let claims = decode_token(token, secret)?;
    let user_id = Uuid::parse_str(&claims.sub)
        .map_err(|_| ServiceError::Unauthorized("Invalid token subject".to_string()))?;

    Ok(AuthenticatedUser {
        user_id,
        role: claims.role,
    })
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthenticatedUser
where
    S: Send + Sync,
{
    type Rejection = ServiceError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthenticatedUser>()
            .cloned()
            .ok_or_else(|| ServiceError::Unauthorized("Missing authentication".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test_secret_test_secret_test_secret_test_secret_test_secret_1234";

    #[test]
    fn token_round_trip_preserves_subject_and_role() {
        let user_id = Uuid::new_v4();
        let token = issue_token(user_id, "admin", SECRET, Duration::hours(1)).unwrap();
        let claims = decode_token(&token, SECRET).unwrap();
        assert_eq!(claims.sub, user_id.to_string());
        assert_eq!(claims.role, "admin");
    }

    #[test]
    fn expired_token_is_rejected() {
        let token = issue_token(Uuid::new_v4(), "user", SECRET, Duration::hours(-2)).unwrap();
        assert!(decode_token(&token, SECRET).is_err());
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let token = issue_token(Uuid::new_v4(), "user", SECRET, Duration::hours(1)).unwrap();
        let other = "another_secret_another_secret_another_secret_another_secret_5678";
        assert!(decode_token(&token, other).is_err());
    }

    #[test]
    fn admin_gate() {
        let admin = AuthenticatedUser {
            user_id: Uuid::new_v4(),
            role: "admin".to_string(),
        };
        let user = AuthenticatedUser {
            user_id: Uuid::new_v4(),
            role: "user".to_string(),
        };
        assert!(admin.require_admin().is_ok());
        assert!(user.require_admin().is_err());
    }
}
