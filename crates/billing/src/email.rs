//! Billing email delivery via Resend
//!
//! Without `RESEND_API_KEY` the service runs disabled and only logs what it
//! would have sent, which keeps local development and tests offline.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::Retry;

use crate::error::{BillingError, BillingResult};
use crate::models::Tenant;
use crate::notify::{NotificationTemplate, Notifier};

const RESEND_API_URL: &str = "https://api.resend.com/emails";
const MAX_SEND_ATTEMPTS: usize = 3;

/// Email configuration
#[derive(Debug, Clone)]
pub struct EmailConfig {
    pub resend_api_key: Option<String>,
    pub from_address: String,
    /// Base URL used for links in emails
    pub app_url: String,
}

impl EmailConfig {
    pub fn from_env() -> Self {
        Self {
            resend_api_key: std::env::var("RESEND_API_KEY")
                .ok()
                .filter(|key| !key.trim().is_empty()),
            from_address: std::env::var("EMAIL_FROM")
                .unwrap_or_else(|_| "Clubboard <billing@clubboard.app>".to_string()),
            app_url: std::env::var("APP_URL")
                .unwrap_or_else(|_| "http://localhost:3000".to_string()),
        }
    }
}

#[derive(Debug, Serialize)]
struct ResendEmail<'a> {
    from: &'a str,
    to: [&'a str; 1],
    subject: &'a str,
    html: &'a str,
}

/// A rendered message
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedEmail {
    pub subject: String,
    pub html: String,
}

#[derive(Clone)]
pub struct BillingEmailService {
    client: reqwest::Client,
    config: EmailConfig,
}

impl BillingEmailService {
    pub fn new(config: EmailConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self { client, config }
    }

    pub fn from_env() -> Self {
        Self::new(EmailConfig::from_env())
    }

    /// A service that never talks to Resend
    pub fn disabled() -> Self {
        Self::new(EmailConfig {
            resend_api_key: None,
            from_address: "Clubboard <billing@clubboard.app>".to_string(),
            app_url: "http://localhost:3000".to_string(),
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.config.resend_api_key.is_some()
    }

    /// Build subject and body for a template
    pub fn render(
        &self,
        tenant: &Tenant,
        template: NotificationTemplate,
        context: &serde_json::Value,
    ) -> RenderedEmail {
        let package = context
            .get("package")
            .and_then(|v| v.as_str())
            .unwrap_or(tenant.active_package.as_str());
        let billing_url = format!("{}/club/billing", self.config.app_url);

        let (subject, body) = match template {
            NotificationTemplate::UpgradeApproved => (
                format!("Your upgrade to {package} was approved"),
                format!(
                    "<p>Your request to upgrade {} to the <strong>{package}</strong> package has been approved.</p>\
                     <p>Please confirm your billing contact and complete payment to activate it: \
                     <a href=\"{billing_url}\">{billing_url}</a></p>",
                    tenant.name
                ),
            ),
            NotificationTemplate::UpgradeRejected => {
                let reason = context
                    .get("reason")
                    .and_then(|v| v.as_str())
                    .map(|r| format!("<p>Reason: {r}</p>"))
                    .unwrap_or_default();
                (
                    "Your upgrade request was not approved".to_string(),
                    format!(
                        "<p>Your request to upgrade {} to the {package} package was declined.</p>{reason}",
                        tenant.name
                    ),
                )
            }
            NotificationTemplate::SubscriptionActivated => (
                format!("Your {package} subscription is active"),
                format!(
                    "<p>Thank you! The {package} package for {} is now active.</p>",
                    tenant.name
                ),
            ),
            NotificationTemplate::SubscriptionCancelled => (
                "Your subscription was cancelled".to_string(),
                format!(
                    "<p>The subscription of {} has been cancelled. \
                     You keep access until the end of the current period.</p>",
                    tenant.name
                ),
            ),
            NotificationTemplate::SubscriptionExpired => (
                "Your subscription has ended".to_string(),
                format!(
                    "<p>The subscription of {} has ended. \
                     <a href=\"{billing_url}\">Contact us</a> to reactivate it.</p>",
                    tenant.name
                ),
            ),
            NotificationTemplate::TrialEndsIn14Days => (
                "Your trial ends in 14 days".to_string(),
                trial_body(tenant, 14, &billing_url),
            ),
            NotificationTemplate::TrialEndsIn7Days => (
                "Your trial ends in 7 days".to_string(),
                trial_body(tenant, 7, &billing_url),
            ),
            NotificationTemplate::TrialEnded => (
                "Your trial has ended".to_string(),
                format!(
                    "<p>The trial of {} has ended. Upgrade now to keep your account: \
                     <a href=\"{billing_url}\">{billing_url}</a></p>",
                    tenant.name
                ),
            ),
            NotificationTemplate::AccountBlocked => (
                "Your account has been blocked".to_string(),
                format!(
                    "<p>The account of {} was blocked because the trial ended without an upgrade. \
                     Please contact support to restore access.</p>",
                    tenant.name
                ),
            ),
        };

        RenderedEmail {
            subject,
            html: body,
        }
    }

    async fn deliver(&self, api_key: &str, to: &str, email: &RenderedEmail) -> BillingResult<()> {
        let payload = ResendEmail {
            from: &self.config.from_address,
            to: [to],
            subject: &email.subject,
            html: &email.html,
        };

        let strategy = ExponentialBackoff::from_millis(200)
            .max_delay(Duration::from_secs(5))
            .map(jitter)
            .take(MAX_SEND_ATTEMPTS - 1);

        let client = &self.client;
        let payload = &payload;
        Retry::spawn(strategy, move || async move {
            let response = client
                .post(RESEND_API_URL)
                .bearer_auth(api_key)
                .json(payload)
                .send()
                .await
                .map_err(|e| BillingError::Notification(e.to_string()))?;

            let status = response.status();
            if status.is_success() {
                Ok(())
            } else {
                let body = response.text().await.unwrap_or_default();
                tracing::warn!(status = %status, body = %body, "Resend rejected email");
                Err(BillingError::Notification(format!(
                    "Resend returned {status}"
                )))
            }
        })
        .await
    }
}

fn trial_body(tenant: &Tenant, days: i64, billing_url: &str) -> String {
    format!(
        "<p>The trial of {} ends in {days} days. \
         Choose a package to keep advertising: <a href=\"{billing_url}\">{billing_url}</a></p>",
        tenant.name
    )
}

#[async_trait]
impl Notifier for BillingEmailService {
    async fn send(
        &self,
        tenant: &Tenant,
        template: NotificationTemplate,
        context: serde_json::Value,
    ) -> BillingResult<()> {
        let Some(to) = tenant.billing_email.as_deref() else {
            tracing::warn!(
                tenant_id = %tenant.id,
                template = %template,
                "Club has no billing contact, skipping email"
            );
            return Ok(());
        };

        let email = self.render(tenant, template, &context);

        let Some(api_key) = self.config.resend_api_key.as_deref() else {
            tracing::info!(
                tenant_id = %tenant.id,
                template = %template,
                to = %to,
                subject = %email.subject,
                "Email disabled, not sending"
            );
            return Ok(());
        };

        self.deliver(api_key, to, &email).await?;
        tracing::info!(tenant_id = %tenant.id, template = %template, "Billing email sent");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::OffsetDateTime;
    use uuid::Uuid;

    fn club(email: Option<&str>) -> Tenant {
        Tenant::new_trial(
            Uuid::new_v4(),
            "SC Musterstadt",
            email.map(str::to_string),
            OffsetDateTime::now_utc(),
            30,
        )
    }

    #[test]
    fn test_render_uses_context_package() {
        let service = BillingEmailService::disabled();
        let email = service.render(
            &club(None),
            NotificationTemplate::UpgradeApproved,
            &serde_json::json!({ "package": "pro" }),
        );
        assert_eq!(email.subject, "Your upgrade to pro was approved");
        assert!(email.html.contains("SC Musterstadt"));
        assert!(email.html.contains("/club/billing"));
    }

    #[test]
    fn test_rejection_includes_reason() {
        let service = BillingEmailService::disabled();
        let email = service.render(
            &club(None),
            NotificationTemplate::UpgradeRejected,
            &serde_json::json!({ "package": "plus", "reason": "duplicate club" }),
        );
        assert!(email.html.contains("duplicate club"));
    }

    #[tokio::test]
    async fn test_disabled_service_does_not_fail() {
        let service = BillingEmailService::disabled();
        assert!(!service.is_enabled());
        service
            .send(
                &club(Some("kasse@example.org")),
                NotificationTemplate::TrialEnded,
                serde_json::json!({}),
            )
            .await
            .unwrap();
    }
}
