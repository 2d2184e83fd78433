//! Router tests
//!
//! Drive the full axum router over the in-memory store with a logging-only
//! email service.

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use axum::{
        body::Body,
        http::{header, Method, Request, StatusCode},
        Router,
    };
    use clubboard_billing::{
        BillingEmailService, BillingResult, BillingService, InMemoryStore, LifecycleConfig,
        Resource, UsageCounter,
    };
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde_json::{json, Value};
    use tower::ServiceExt;
    use uuid::Uuid;

    use crate::auth::{Claims, Role};
    use crate::config::Config;
    use crate::routes::{create_router, payments::sign_payload};
    use crate::state::AppState;

    const JWT_SECRET: &str = "router-test-jwt-secret";
    const CRON_SECRET: &str = "router-test-cron-secret";
    const WEBHOOK_SECRET: &str = "router-test-webhook-secret";

    struct NoUsage;

    #[async_trait]
    impl UsageCounter for NoUsage {
        async fn count(&self, _tenant_id: Uuid, _resource: Resource) -> BillingResult<u64> {
            Ok(0)
        }
    }

    fn app() -> Router {
        let billing = BillingService::new(
            Arc::new(InMemoryStore::new()),
            Arc::new(BillingEmailService::disabled()),
            Arc::new(NoUsage),
            LifecycleConfig::default(),
        );
        let config = Config {
            database_url: "postgres://localhost/clubboard_test".to_string(),
            bind_address: "127.0.0.1:0".to_string(),
            jwt_secret: JWT_SECRET.to_string(),
            cron_secret: CRON_SECRET.to_string(),
            payment_webhook_secret: WEBHOOK_SECRET.to_string(),
            allowed_origins: vec![],
        };
        create_router(AppState::new(billing, config))
    }

    fn bearer(role: Role, club_id: Option<Uuid>) -> String {
        let claims = Claims {
            sub: "user-1".to_string(),
            role,
            club_id,
            exp: time::OffsetDateTime::now_utc().unix_timestamp() + 3600,
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(JWT_SECRET.as_bytes()),
        )
        .unwrap();
        format!("Bearer {token}")
    }

    fn admin() -> String {
        bearer(Role::Admin, None)
    }

    async fn send(
        app: &Router,
        method: Method,
        uri: &str,
        auth: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut request = Request::builder().method(method).uri(uri);
        if let Some(auth) = auth {
            request = request.header(header::AUTHORIZATION, auth);
        }
        let body = match body {
            Some(value) => {
                request = request.header(header::CONTENT_TYPE, "application/json");
                Body::from(value.to_string())
            }
            None => Body::empty(),
        };

        let response = app.clone().oneshot(request.body(body).unwrap()).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    async fn pay(app: &Router, payload: Value, signature: Option<String>) -> (StatusCode, Value) {
        let body = payload.to_string();
        let signature = signature.unwrap_or_else(|| sign_payload(WEBHOOK_SECRET, body.as_bytes()).unwrap());
        let request = Request::builder()
            .method(Method::POST)
            .uri("/api/v1/webhooks/payments")
            .header(header::CONTENT_TYPE, "application/json")
            .header("x-payment-signature", signature)
            .body(Body::from(body))
            .unwrap();

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    async fn create_club(app: &Router) -> Uuid {
        let club_id = Uuid::new_v4();
        let (status, body) = send(
            app,
            Method::POST,
            "/api/v1/admin/clubs",
            Some(&admin()),
            Some(json!({ "club_id": club_id, "name": "FC Musterstadt", "billing_email": "kasse@fc-musterstadt.de" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        assert_eq!(body["subscription_status"], "trial");
        club_id
    }

    #[tokio::test]
    async fn test_health() {
        let (status, body) = send(&app(), Method::GET, "/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_admin_routes_require_admin_role() {
        let app = app();
        let (status, body) = send(&app, Method::GET, "/api/v1/admin/billing/invariants", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["reason"], "unauthorized");

        let club = bearer(Role::Club, Some(Uuid::new_v4()));
        let (status, _) = send(&app, Method::GET, "/api/v1/admin/billing/invariants", Some(&club), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_upgrade_and_payment_flow() {
        let app = app();
        let club_id = create_club(&app).await;
        let club = bearer(Role::Club, Some(club_id));

        let (status, body) = send(
            &app,
            Method::POST,
            "/api/v1/club/upgrade-requests",
            Some(&club),
            Some(json!({ "package": "pro" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["status"], "pending_upgrade");
        let request_id = body["request_id"].as_str().unwrap().to_string();

        let approve = format!("/api/v1/admin/upgrade-requests/{request_id}/approve");
        let (status, body) = send(&app, Method::POST, &approve, Some(&admin()), None).await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["status"], "awaiting_payment");
        assert_eq!(body["already_processed"], false);

        let (status, body) = send(&app, Method::POST, &approve, Some(&admin()), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["already_processed"], true);

        let payload = json!({ "club_id": club_id, "package": "pro", "event_id": "evt_123" });
        let (status, _) = pay(&app, payload.clone(), Some("00".repeat(32))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, body) = pay(&app, payload.clone(), None).await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["status"], "active");
        assert_eq!(body["already_processed"], false);

        let (status, body) = pay(&app, payload, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["already_processed"], true);

        let (status, body) = send(&app, Method::GET, "/api/v1/club/subscription", Some(&club), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["tenant"]["active_package"], "pro");
        assert_eq!(body["entitlements"][0]["allowed"], true);

        let events = format!("/api/v1/admin/clubs/{club_id}/events");
        let (status, body) = send(&app, Method::GET, &events, Some(&admin()), None).await;
        assert_eq!(status, StatusCode::OK);
        let types: Vec<&str> = body
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["event_type"].as_str().unwrap())
            .collect();
        assert_eq!(
            types,
            vec!["trial_started", "upgrade_requested", "upgrade_approved", "subscription_activated"]
        );

        let (status, body) = send(&app, Method::GET, "/api/v1/admin/billing/invariants", Some(&admin()), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["healthy"], true);
    }

    #[tokio::test]
    async fn test_guard_violations_map_to_422() {
        let app = app();
        let club_id = create_club(&app).await;
        let club = bearer(Role::Club, Some(club_id));

        let (status, body) = send(
            &app,
            Method::POST,
            "/api/v1/club/upgrade-requests",
            Some(&club),
            Some(json!({ "package": "basic" })),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["reason"], "downgrade_not_allowed");
        assert_eq!(body["code"], 422);

        let payload = json!({ "club_id": club_id, "package": "plus" });
        let (status, body) = pay(&app, payload, None).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["reason"], "invalid_state");
    }

    #[tokio::test]
    async fn test_entitlement_check() {
        let app = app();
        let club_id = create_club(&app).await;
        let club = bearer(Role::Club, Some(club_id));

        let (status, body) = send(&app, Method::GET, "/api/v1/club/entitlements/ads", Some(&club), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["allowed"], false);
        assert_eq!(body["reason"], "limit_reached");

        let (status, body) = send(&app, Method::GET, "/api/v1/club/entitlements/vacancies", Some(&club), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["allowed"], true);

        let (status, _) = send(&app, Method::GET, "/api/v1/club/entitlements/banners", Some(&club), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_unknown_club_is_404() {
        let app = app();
        let uri = format!("/api/v1/admin/clubs/{}", Uuid::new_v4());
        let (status, body) = send(&app, Method::GET, &uri, Some(&admin()), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["reason"], "not_found");
    }

    #[tokio::test]
    async fn test_cron_trigger_requires_secret() {
        let app = app();
        create_club(&app).await;

        let (status, _) = send(&app, Method::POST, "/api/v1/internal/cron/lifecycle", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let request = Request::builder()
            .method(Method::POST)
            .uri("/api/v1/internal/cron/lifecycle")
            .header("x-cron-secret", CRON_SECRET)
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let summary: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(summary["failures"], 0);
        assert_eq!(summary["trials_blocked"], 0);
    }

    #[tokio::test]
    async fn test_cancel_is_idempotent_over_http() {
        let app = app();
        let club_id = create_club(&app).await;
        let club = bearer(Role::Club, Some(club_id));

        let (status, body) = send(&app, Method::POST, "/api/v1/club/cancel", Some(&club), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "cancelled");

        let cancel = format!("/api/v1/admin/clubs/{club_id}/cancel");
        let (status, body) = send(&app, Method::POST, &cancel, Some(&admin()), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["already_processed"], true);
    }
}
