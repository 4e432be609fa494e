use std::time::Duration;

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::Response,
    Extension,
};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use kernel::Role;
use serde::{Deserialize, Serialize};

use crate::error::UploadError;
use crate::AppState;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub role: Role,
    pub exp: u64,
}

/// Caller identity attached to every authenticated request.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: String,
    pub role: Role,
}

/// Mints an HS256 token for `subject` valid for `ttl`.
pub fn issue_token(
    secret: &str,
    subject: &str,
    role: Role,
    ttl: Duration,
) -> Result<String, UploadError> {
    if secret.is_empty() {
        return Err(UploadError::Unauthorized(
            "JWT secret not configured".to_owned(),
        ));
    }
    let exp = chrono::Utc::now()
        .timestamp()
        .saturating_add(i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX));
    let claims = Claims {
        sub: subject.to_owned(),
        role,
        exp: u64::try_from(exp).unwrap_or_default(),
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| UploadError::Storage(format!("Failed to sign token: {e}")))
}

pub fn verify_token(secret: &str, token: &str) -> Result<Claims, UploadError> {
    if secret.is_empty() {
        return Err(UploadError::Unauthorized(
            "JWT secret not configured".to_owned(),
        ));
    }
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|e| UploadError::Unauthorized(format!("Invalid token: {e}")))
}

fn bearer_token(headers: &HeaderMap) -> Result<&str, UploadError> {
    let value = headers
        .get(header::AUTHORIZATION)
        .ok_or_else(|| UploadError::Unauthorized("Missing Authorization header".to_owned()))?
        .to_str()
        .map_err(|_| UploadError::Unauthorized("Invalid Authorization header".to_owned()))?;
    match value.strip_prefix("Bearer ") {
        Some(token) if !token.trim().is_empty() => Ok(token.trim()),
        _ => Err(UploadError::Unauthorized(
            "Authorization header must use Bearer token format".to_owned(),
        )),
    }
}

/// Rejects requests without a valid token and attaches [`AuthUser`].
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, UploadError> {
    let token = bearer_token(request.headers())?;
    let claims = verify_token(&state.config.jwt_secret, token)?;
    request.extensions_mut().insert(AuthUser {
        id: claims.sub,
        role: claims.role,
    });
    Ok(next.run(request).await)
}

/// Must run after [`require_auth`].
pub async fn require_admin(
    Extension(user): Extension<AuthUser>,
    request: Request,
    next: Next,
) -> Result<Response, UploadError> {
    if !user.role.is_admin() {
        tracing::warn!(user = %user.id, role = %user.role, "admin route denied");
        return Err(UploadError::Forbidden("Admin access required".to_owned()));
    }
    Ok(next.run(request).await)
}
