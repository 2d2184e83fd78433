//! Unit tests for authentication middleware
//!
//! Tests cover:
//! - Missing and malformed bearer tokens
//! - Role-based access control
//! - Club binding of self-service tokens

#[cfg(test)]
mod tests {
    use super::super::jwt::{Claims, JwtVerifier, Role};
    use super::super::middleware::*;
    use axum::{
        body::Body,
        extract::Extension,
        http::{header::AUTHORIZATION, Request, StatusCode},
        middleware,
        routing::get,
        Router,
    };
    use jsonwebtoken::{encode, EncodingKey, Header};
    use tower::ServiceExt;
    use uuid::Uuid;

    const SECRET: &str = "test-jwt-secret-key-for-testing-only";

    fn auth_state() -> AuthState {
        AuthState {
            jwt: JwtVerifier::new(SECRET),
        }
    }

    fn token(role: Role, club_id: Option<Uuid>) -> String {
        let claims = Claims {
            sub: "user-1".to_string(),
            role,
            club_id,
            exp: time::OffsetDateTime::now_utc().unix_timestamp() + 3600,
        };
        encode(&Header::default(), &claims, &EncodingKey::from_secret(SECRET.as_bytes())).unwrap()
    }

    async fn whoami(Extension(user): Extension<AuthUser>) -> String {
        user.subject
    }

    fn app() -> Router {
        let admin = Router::new()
            .route("/admin", get(whoami))
            .route_layer(middleware::from_fn_with_state(auth_state(), require_admin));
        let club = Router::new()
            .route("/club", get(whoami))
            .route_layer(middleware::from_fn_with_state(auth_state(), require_club));
        admin.merge(club)
    }

    async fn status(path: &str, authorization: Option<String>) -> StatusCode {
        let mut request = Request::builder().uri(path);
        if let Some(value) = authorization {
            request = request.header(AUTHORIZATION, value);
        }
        app()
            .oneshot(request.body(Body::empty()).unwrap())
            .await
            .unwrap()
            .status()
    }

    #[tokio::test]
    async fn test_missing_token() {
        assert_eq!(status("/admin", None).await, StatusCode::UNAUTHORIZED);
        assert_eq!(status("/club", None).await, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_malformed_token() {
        assert_eq!(
            status("/admin", Some("Bearer not-a-jwt".into())).await,
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            status("/admin", Some(format!("Basic {}", token(Role::Admin, None)))).await,
            StatusCode::UNAUTHORIZED
        );
    }

    #[tokio::test]
    async fn test_roles_are_enforced() {
        let admin = format!("Bearer {}", token(Role::Admin, None));
        let club = format!("Bearer {}", token(Role::Club, Some(Uuid::new_v4())));

        assert_eq!(status("/admin", Some(admin.clone())).await, StatusCode::OK);
        assert_eq!(status("/admin", Some(club.clone())).await, StatusCode::FORBIDDEN);
        assert_eq!(status("/club", Some(club)).await, StatusCode::OK);
        assert_eq!(status("/club", Some(admin)).await, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_club_token_requires_club_id() {
        let unbound = format!("Bearer {}", token(Role::Club, None));
        assert_eq!(status("/club", Some(unbound)).await, StatusCode::FORBIDDEN);
    }
}
