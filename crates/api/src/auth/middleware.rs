//! Authentication middleware for Axum

use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use uuid::Uuid;

use super::jwt::{JwtVerifier, Role};

/// Authenticated caller extracted from the bearer token
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub subject: String,
    pub role: Role,
    pub club_id: Option<Uuid>,
}

impl AuthUser {
    /// Get club_id, returning an error if not available
    pub fn require_club_id(&self) -> Result<Uuid, AuthError> {
        self.club_id.ok_or(AuthError::NoClub)
    }
}

/// State needed for authentication
#[derive(Clone)]
pub struct AuthState {
    pub jwt: JwtVerifier,
}

fn extract_bearer_token(request: &Request) -> Option<&str> {
    request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|header| header.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

fn authenticate(auth_state: &AuthState, request: &Request) -> Result<AuthUser, AuthError> {
    let token = extract_bearer_token(request).ok_or(AuthError::MissingAuth)?;
    let claims = auth_state.jwt.verify(token).map_err(|e| {
        tracing::debug!(error = %e, "Access token rejected");
        AuthError::InvalidToken
    })?;

    Ok(AuthUser {
        subject: claims.sub,
        role: claims.role,
        club_id: claims.club_id,
    })
}

/// Middleware for platform admin routes
pub async fn require_admin(
    State(auth_state): State<AuthState>,
    mut request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();

    match authenticate(&auth_state, &request) {
        Ok(auth_user) if auth_user.role == Role::Admin => {
            request.extensions_mut().insert(auth_user);
            next.run(request).await
        }
        Ok(auth_user) => {
            tracing::warn!(path = %path, subject = %auth_user.subject, role = ?auth_user.role, "require_admin: insufficient role");
            AuthError::InsufficientPermissions.into_response()
        }
        Err(err) => {
            tracing::warn!(path = %path, error = ?err, "require_admin: authentication failed");
            err.into_response()
        }
    }
}

/// Middleware for club self-service routes; the token must name a club
pub async fn require_club(
    State(auth_state): State<AuthState>,
    mut request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();

    let auth_user = match authenticate(&auth_state, &request) {
        Ok(user) => user,
        Err(err) => {
            tracing::warn!(path = %path, error = ?err, "require_club: authentication failed");
            return err.into_response();
        }
    };
    if auth_user.role != Role::Club {
        return AuthError::InsufficientPermissions.into_response();
    }
    if let Err(err) = auth_user.require_club_id() {
        tracing::warn!(path = %path, subject = %auth_user.subject, "require_club: token has no club_id");
        return err.into_response();
    }

    request.extensions_mut().insert(auth_user);
    next.run(request).await
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Missing authentication")]
    MissingAuth,
    #[error("Invalid or expired token")]
    InvalidToken,
    #[error("Insufficient permissions")]
    InsufficientPermissions,
    #[error("No club found")]
    NoClub,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, message, reason) = match self {
            AuthError::MissingAuth => (
                StatusCode::UNAUTHORIZED,
                "Authentication required",
                "unauthorized",
            ),
            AuthError::InvalidToken => (
                StatusCode::UNAUTHORIZED,
                "Invalid or expired token",
                "unauthorized",
            ),
            AuthError::InsufficientPermissions => (
                StatusCode::FORBIDDEN,
                "Insufficient permissions",
                "forbidden",
            ),
            AuthError::NoClub => (
                StatusCode::FORBIDDEN,
                "Token is not bound to a club",
                "forbidden",
            ),
        };

        let body = Json(json!({
            "error": message,
            "code": status.as_u16(),
            "reason": reason,
        }));

        (status, body).into_response()
    }
}
