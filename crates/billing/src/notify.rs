//! Notification seam
//!
//! The engine only decides *that* a club should be told something; rendering
//! and transport live behind [`Notifier`]. Notifications are sent after the
//! state change has been committed and a failed send never undoes it.

use async_trait::async_trait;
use serde::Serialize;

use crate::error::BillingResult;
use crate::models::Tenant;

/// Message templates the engine can trigger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationTemplate {
    /// Upgrade approved, payment or billing contact needed
    UpgradeApproved,
    UpgradeRejected,
    SubscriptionActivated,
    SubscriptionCancelled,
    SubscriptionExpired,
    TrialEndsIn14Days,
    TrialEndsIn7Days,
    TrialEnded,
    AccountBlocked,
}

impl NotificationTemplate {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationTemplate::UpgradeApproved => "upgrade_approved",
            NotificationTemplate::UpgradeRejected => "upgrade_rejected",
            NotificationTemplate::SubscriptionActivated => "subscription_activated",
            NotificationTemplate::SubscriptionCancelled => "subscription_cancelled",
            NotificationTemplate::SubscriptionExpired => "subscription_expired",
            NotificationTemplate::TrialEndsIn14Days => "trial_ends_in_14_days",
            NotificationTemplate::TrialEndsIn7Days => "trial_ends_in_7_days",
            NotificationTemplate::TrialEnded => "trial_ended",
            NotificationTemplate::AccountBlocked => "account_blocked",
        }
    }
}

impl std::fmt::Display for NotificationTemplate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver `template` to the club's billing contact. `context` carries
    /// template variables such as the package or the days remaining.
    async fn send(
        &self,
        tenant: &Tenant,
        template: NotificationTemplate,
        context: serde_json::Value,
    ) -> BillingResult<()>;
}
